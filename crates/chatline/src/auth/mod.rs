//! Authentication module.
//!
//! Provides HS256 JWT validation middleware with a dev bypass mode for
//! configured test users.

mod claims;
mod config;
mod error;
mod middleware;

pub use claims::Claims;
pub use config::{AuthConfig, ConfigValidationError, DevUser};
pub use error::AuthError;
pub use middleware::{AuthState, CurrentUser, auth_middleware};
