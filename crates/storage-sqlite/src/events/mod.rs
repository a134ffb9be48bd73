//! SQLite persistence for the event log.

mod model;
mod repository;

pub use model::EventDB;
pub use repository::EventRepository;
