//! SQLite persistence for the server identity row.

mod repository;

pub use repository::{IdentityRepository, ServerIdentityDB};
