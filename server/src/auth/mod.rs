//! Store access control and admin tokens.

mod middleware;
mod tokens;

pub use middleware::StoreAccess;
pub use tokens::{now_ms, AdminTokens};
