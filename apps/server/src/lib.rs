//! Lifeboat station server: the HTTP boundary over the disaster-recovery
//! subsystem (export, restore, health, stats).

pub mod api;
pub mod error;
pub mod main_lib;

pub use main_lib::{build_state, run, AppState, ServerConfig};
