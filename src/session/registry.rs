//! Swarm registry for tracking all device sessions

use super::connection::{DeviceSession, SessionHandle, SessionInfo};
use crate::transport::TransportConnector;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use swarm_shared::{ConnectionState, DeviceAddress, DuplicateError};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Outcome of resolving a set of addresses against the registry
#[derive(Clone, Default)]
pub struct Resolution {
    pub found: Vec<SessionHandle>,
    pub missing: Vec<DeviceAddress>,
}

/// Concurrency-safe directory of device sessions
///
/// Holds at most one session per address. Mutations take the write lock;
/// lookups share the read lock and never await a session while holding it.
pub struct SwarmRegistry {
    /// Map of address -> session
    sessions: RwLock<HashMap<DeviceAddress, SessionHandle>>,
    connector: Arc<dyn TransportConnector>,
}

impl SwarmRegistry {
    /// Create an empty registry whose sessions connect through `connector`
    pub fn new(connector: Arc<dyn TransportConnector>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            connector,
        }
    }

    /// Name of the transport sessions are created with
    pub fn transport_name(&self) -> &'static str {
        self.connector.name()
    }

    /// Register a new, disconnected session for `address`
    ///
    /// Fails if a session exists and is not Faulted. A Faulted session is
    /// released and replaced.
    pub async fn add(&self, address: DeviceAddress) -> Result<SessionHandle, DuplicateError> {
        let session = Arc::new(DeviceSession::new(address.clone(), self.connector.clone()));

        let replaced = {
            let mut sessions = self.sessions.write().await;

            if let Some(existing) = sessions.get(&address) {
                let state = existing.state().await;
                if state != ConnectionState::Faulted {
                    return Err(DuplicateError { address, state });
                }
            }

            sessions.insert(address.clone(), session.clone())
        };

        if let Some(old) = replaced {
            info!("[{}] Replacing faulted session", address);
            old.disconnect().await;
        }

        Ok(session)
    }

    /// Unregister and release a session; no-op if absent
    pub async fn remove(&self, address: &DeviceAddress) -> Option<SessionInfo> {
        let session = self.sessions.write().await.remove(address)?;
        session.disconnect().await;
        debug!("[{}] Session removed", address);
        Some(session.info().await)
    }

    /// Get the session for a specific address
    pub async fn get(&self, address: &DeviceAddress) -> Option<SessionHandle> {
        self.sessions.read().await.get(address).cloned()
    }

    /// Split `addresses` into registered sessions and unknown addresses
    ///
    /// Duplicates in the input are collapsed; never fails.
    pub async fn resolve<I>(&self, addresses: I) -> Resolution
    where
        I: IntoIterator<Item = DeviceAddress>,
    {
        let sessions = self.sessions.read().await;
        let mut seen = HashSet::new();
        let mut resolution = Resolution::default();

        for address in addresses {
            if !seen.insert(address.clone()) {
                continue;
            }
            match sessions.get(&address) {
                Some(session) => resolution.found.push(session.clone()),
                None => resolution.missing.push(address),
            }
        }

        resolution
    }

    /// Every registered session
    pub async fn all(&self) -> Vec<SessionHandle> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Get list of all registered addresses
    pub async fn addresses(&self) -> Vec<DeviceAddress> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Point-in-time connection state of every session
    pub async fn snapshot(&self) -> Vec<(DeviceAddress, ConnectionState)> {
        let sessions = self.all().await;
        let states = join_all(sessions.iter().map(|s| s.state())).await;

        sessions
            .iter()
            .map(|s| s.address().clone())
            .zip(states)
            .collect()
    }

    /// Detailed view of every session
    pub async fn describe(&self) -> Vec<SessionInfo> {
        let sessions = self.all().await;
        join_all(sessions.iter().map(|s| s.info())).await
    }

    /// Get the number of registered sessions
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Release every session and empty the registry
    pub async fn teardown(&self) -> usize {
        let drained: Vec<SessionHandle> = self
            .sessions
            .write()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect();

        join_all(drained.iter().map(|s| s.disconnect())).await;
        if !drained.is_empty() {
            info!("Released {} sessions", drained.len());
        }
        drained.len()
    }
}
