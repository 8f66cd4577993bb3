use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT payload. Carries identity and validity window only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid, // user ID
    pub iat: i64,  // issued at (unix timestamp)
    pub exp: i64,  // expires at (unix timestamp)
}
