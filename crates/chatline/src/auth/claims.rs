//! JWT claims.

use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// JWT claims structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user identity).
    pub sub: String,

    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,

    /// Expiration time (as Unix timestamp).
    pub exp: i64,

    /// Issued at (as Unix timestamp).
    #[serde(default)]
    pub iat: Option<i64>,

    /// User's display name.
    #[serde(default)]
    pub name: Option<String>,
}

impl Claims {
    pub fn identity(&self) -> Identity {
        Identity::new(self.sub.clone())
    }

    /// Display name, falling back to the subject.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.sub)
    }
}
