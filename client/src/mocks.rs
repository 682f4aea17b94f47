//! In-process fabric implementations for development and tests.
//!
//! `MemoryStore` behaves like the shared versioned store: cloning it hands
//! another simulated node a handle onto the same state, leases included.
//! `MemoryTransport` fans published payloads out to every subscriber of a
//! topic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use walletbridge_types::WalletProfile;

use crate::store::{StoreError, VersionedProfile, WalletStore};
use crate::transport::{Subscription, Transport, TransportError};

struct Lease {
    node_id: String,
    expires_at: Instant,
}

#[derive(Default)]
struct MemoryStoreState {
    profiles: HashMap<String, (WalletProfile, u64)>,
    leases: HashMap<String, Lease>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreState>>,
}

impl WalletStore for MemoryStore {
    async fn read_profile(&self, user_id: &str) -> Result<VersionedProfile, StoreError> {
        let state = self.inner.lock().unwrap();
        Ok(match state.profiles.get(user_id) {
            Some((profile, version)) => VersionedProfile {
                profile: Some(profile.clone()),
                version: Some(*version),
            },
            None => VersionedProfile::default(),
        })
    }

    async fn write_profile(
        &self,
        user_id: &str,
        profile: &WalletProfile,
        expect: Option<u64>,
    ) -> Result<u64, StoreError> {
        let mut state = self.inner.lock().unwrap();
        let current = state.profiles.get(user_id).map(|(_, version)| *version);
        if current != expect {
            return Err(StoreError::VersionConflict);
        }
        let next = current.unwrap_or(0) + 1;
        state
            .profiles
            .insert(user_id.to_string(), (profile.clone(), next));
        Ok(next)
    }

    async fn acquire_session(
        &self,
        user_id: &str,
        node_id: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut state = self.inner.lock().unwrap();
        let now = Instant::now();
        match state.leases.get(user_id) {
            Some(lease) if lease.expires_at > now && lease.node_id != node_id => Ok(false),
            _ => {
                state.leases.insert(
                    user_id.to_string(),
                    Lease {
                        node_id: node_id.to_string(),
                        expires_at: now + ttl,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn renew_session(
        &self,
        user_id: &str,
        node_id: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut state = self.inner.lock().unwrap();
        let now = Instant::now();
        match state.leases.get_mut(user_id) {
            Some(lease) if lease.expires_at > now && lease.node_id == node_id => {
                lease.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_session(&self, user_id: &str, node_id: &str) -> Result<(), StoreError> {
        let mut state = self.inner.lock().unwrap();
        if let Some(lease) = state.leases.get(user_id) {
            if lease.node_id == node_id {
                state.leases.remove(user_id);
            }
        }
        Ok(())
    }
}

impl MemoryStore {
    /// Current lease holder, if any. Test-inspection helper.
    pub fn lease_holder(&self, user_id: &str) -> Option<String> {
        let state = self.inner.lock().unwrap();
        state
            .leases
            .get(user_id)
            .filter(|lease| lease.expires_at > Instant::now())
            .map(|lease| lease.node_id.clone())
    }
}

#[derive(Default)]
struct MemoryTransportState {
    subscribers: HashMap<String, Vec<mpsc::Sender<String>>>,
}

#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Mutex<MemoryTransportState>>,
}

impl Transport for MemoryTransport {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), TransportError> {
        let senders = {
            let state = self.inner.lock().unwrap();
            state.subscribers.get(topic).cloned().unwrap_or_default()
        };
        for sender in senders {
            let _ = sender.send(payload.clone()).await;
        }
        let mut state = self.inner.lock().unwrap();
        if let Some(list) = state.subscribers.get_mut(topic) {
            list.retain(|sender| !sender.is_closed());
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError> {
        let (tx, rx) = mpsc::channel(1_024);
        let mut state = self.inner.lock().unwrap();
        state
            .subscribers
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        Ok(Subscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn conditional_writes_enforce_versions() {
        let store = MemoryStore::default();
        let profile = WalletProfile::default();

        let v1 = store.write_profile("u-1", &profile, None).await.unwrap();
        assert_eq!(v1, 1);
        // Stale expectation loses.
        assert!(matches!(
            store.write_profile("u-1", &profile, None).await,
            Err(StoreError::VersionConflict)
        ));
        let v2 = store.write_profile("u-1", &profile, Some(v1)).await.unwrap();
        assert_eq!(v2, 2);
    }

    #[tokio::test]
    async fn leases_are_exclusive_until_released_or_expired() {
        let store = MemoryStore::default();
        let ttl = Duration::from_millis(40);

        assert!(store.acquire_session("u-1", "node-a", ttl).await.unwrap());
        assert!(!store.acquire_session("u-1", "node-b", ttl).await.unwrap());
        // The holder may re-acquire and renew.
        assert!(store.acquire_session("u-1", "node-a", ttl).await.unwrap());
        assert!(store.renew_session("u-1", "node-a", ttl).await.unwrap());

        store.release_session("u-1", "node-a").await.unwrap();
        assert!(store.acquire_session("u-1", "node-b", ttl).await.unwrap());

        tokio::time::sleep(Duration::from_millis(60)).await;
        // Expired lease falls to the next claimant.
        assert!(store.acquire_session("u-1", "node-a", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn transport_fans_out_to_all_subscribers() {
        let transport = MemoryTransport::default();
        let mut first = transport.subscribe("commands").await.unwrap();
        let mut second = transport.subscribe("commands").await.unwrap();

        transport
            .publish("commands", "payload".to_string())
            .await
            .unwrap();

        assert_eq!(first.recv().await.unwrap(), "payload");
        assert_eq!(second.recv().await.unwrap(), "payload");
    }
}
