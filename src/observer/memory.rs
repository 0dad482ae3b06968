use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc::Sender};

use super::{Observer, ObserverValue, Subscription, next_sequence};
use crate::resource::{Resource, Snapshot};

#[derive(Debug)]
struct Registration {
    subscription: Subscription,
    sender: Arc<Sender<ObserverValue>>,
    sequence: u32,
}

/// A memory-based observer registry.
///
/// Registrations are keyed by path and then by peer, so a client holds at
/// most one observation per resource.
#[derive(Clone, Debug, Default)]
pub struct MemObserver {
    channels: Arc<RwLock<HashMap<String, HashMap<SocketAddr, Registration>>>>,
}

impl MemObserver {
    /// Creates a new instance of `MemObserver`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of observations across all paths
    pub async fn len(&self) -> usize {
        self.channels.read().await.values().map(HashMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MemObserverError {
    #[error("notification channel for {0} is closed")]
    ChannelClosed(SocketAddr),
}

#[async_trait]
impl Observer for MemObserver {
    type Error = MemObserverError;

    async fn register(
        &mut self,
        path: &str,
        subscription: Subscription,
        sender: Arc<Sender<ObserverValue>>,
    ) -> Result<u32, Self::Error> {
        if sender.is_closed() {
            return Err(MemObserverError::ChannelClosed(subscription.peer));
        }

        tracing::info!("Registering observer {} for /{}", subscription.peer, path);

        let peer = subscription.peer;
        self.channels
            .write()
            .await
            .entry(path.to_string())
            .or_default()
            .insert(
                peer,
                Registration {
                    subscription,
                    sender,
                    sequence: 0,
                },
            );

        Ok(0)
    }

    async fn unregister(&mut self, path: &str, peer: SocketAddr) -> Result<(), Self::Error> {
        let mut channels = self.channels.write().await;
        if let Some(observers) = channels.get_mut(path) {
            if observers.remove(&peer).is_some() {
                tracing::info!("Unregistered observer {} from /{}", peer, path);
            }
            if observers.is_empty() {
                channels.remove(path);
            }
        }

        Ok(())
    }

    async fn unregister_peer(&mut self, peer: SocketAddr) -> Result<(), Self::Error> {
        let mut channels = self.channels.write().await;
        for observers in channels.values_mut() {
            observers.remove(&peer);
        }
        channels.retain(|_, observers| !observers.is_empty());

        tracing::info!("Unregistered observer {} from all resources", peer);
        Ok(())
    }

    async fn unregister_all(&mut self) -> Result<(), Self::Error> {
        self.channels.write().await.clear();
        Ok(())
    }

    async fn subscriptions(&self, path: &str) -> Result<Vec<Subscription>, Self::Error> {
        Ok(self
            .channels
            .read()
            .await
            .get(path)
            .map(|observers| {
                observers
                    .values()
                    .map(|registration| registration.subscription.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn notify(
        &mut self,
        path: &str,
        resource: &(dyn Resource + 'static),
        snapshot: &Snapshot,
    ) -> Result<usize, Self::Error> {
        // Render and bump sequences under the lock, send after releasing it so a
        // full channel never blocks (de)registration.
        let pending: Vec<_> = {
            let mut channels = self.channels.write().await;
            let Some(observers) = channels.get_mut(path) else {
                return Ok(0);
            };

            observers
                .values_mut()
                .map(|registration| {
                    registration.sequence = next_sequence(registration.sequence);
                    let value = ObserverValue {
                        path: path.to_string(),
                        peer: registration.subscription.peer,
                        token: registration.subscription.token.clone(),
                        sequence: registration.sequence,
                        representation: resource
                            .render(snapshot, registration.subscription.accept),
                    };
                    (registration.sender.clone(), value)
                })
                .collect()
        };

        let mut delivered = 0;
        for (sender, value) in pending {
            let peer = value.peer;
            if sender.send(value).await.is_ok() {
                delivered += 1;
            } else {
                tracing::warn!("Dropping observer {} of /{}: channel closed", peer, path);
                self.unregister(path, peer).await?;
            }
        }

        tracing::debug!("Queued {} notifications for /{}", delivered, path);
        Ok(delivered)
    }
}
