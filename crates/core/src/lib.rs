//! Lifeboat core: the disaster-recovery subsystem for disconnected medical
//! stations.
//!
//! A causally-ordered event log, a deterministic identifier/clock scheme,
//! and an idempotent export/restore protocol that lets client devices
//! reconstruct a freshly-provisioned server's entire state from their own
//! local caches. Storage is reached through traits implemented by
//! `lifeboat-storage-sqlite`; the HTTP boundary lives in the server app.

pub mod clock;
pub mod errors;
pub mod events;
pub mod export;
pub mod identity;
pub mod payloads;
pub mod projection;
pub mod restore;

#[cfg(test)]
pub(crate) mod test_support;
