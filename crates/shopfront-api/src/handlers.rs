//! Request handlers.

pub mod auth;
pub mod health;
pub mod secure;

pub use auth::*;
pub use health::*;
pub use secure::*;
