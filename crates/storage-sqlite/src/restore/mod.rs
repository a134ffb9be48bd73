//! SQLite persistence for restore sessions.

mod model;
mod repository;

pub use model::{RestoreSessionDB, RestoreSessionEntityDB};
pub use repository::RestoreSessionRepository;
