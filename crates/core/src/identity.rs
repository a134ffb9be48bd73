//! Server instance identity and state fingerprint.
//!
//! The instance id is what lets a client distinguish "server rebooted" from
//! "server replaced": it is generated exactly once when the data store is
//! first initialized and only changes when the store is genuinely fresh.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::clock::Hlc;
use crate::errors::Result;
use crate::events::EventStore;

/// Persistent identity of one server instantiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServerIdentity {
    pub server_instance_id: String,
    pub initialized_at: String,
}

/// Storage contract for the identity row.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Load the identity, creating it only when the store is genuinely fresh.
    async fn get_or_init(&self) -> Result<ServerIdentity>;
}

/// Response of the health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthReport {
    pub server_instance_id: String,
    pub state_fingerprint: String,
    pub events_count: i64,
}

/// Content fingerprint over the current event count and latest HLC position.
pub fn state_fingerprint(events_count: i64, latest_hlc: Option<&Hlc>) -> String {
    let basis = match latest_hlc {
        Some(hlc) => format!("{events_count}:{}", hlc.encode()),
        None => format!("{events_count}:-"),
    };
    let digest = Sha256::digest(basis.as_bytes());
    let mut encoded = String::with_capacity(7 + digest.len() * 2);
    encoded.push_str("sha256:");
    for byte in digest {
        encoded.push_str(&format!("{byte:02x}"));
    }
    encoded
}

/// Serves the health probe: stable instance id plus a fingerprint recomputed
/// on every call.
pub struct HealthService {
    identity: ServerIdentity,
    events: Arc<dyn EventStore>,
}

impl HealthService {
    pub fn new(identity: ServerIdentity, events: Arc<dyn EventStore>) -> Self {
        Self { identity, events }
    }

    pub fn server_instance_id(&self) -> &str {
        &self.identity.server_instance_id
    }

    pub fn health(&self) -> Result<HealthReport> {
        let events_count = self.events.events_count()?;
        let latest_hlc = self.events.latest_hlc()?;
        Ok(HealthReport {
            server_instance_id: self.identity.server_instance_id.clone(),
            state_fingerprint: state_fingerprint(events_count, latest_hlc.as_ref()),
            events_count,
        })
    }
}
