use std::{fmt::Debug, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use coap_lite::ContentFormat;
use tokio::sync::mpsc::Sender;

use crate::resource::{Representation, Resource, Snapshot};

pub mod memory;

/// Largest Observe option value, the option is 24 bits wide
pub const OBSERVE_SEQUENCE_MASK: u32 = 0x00FF_FFFF;

/// A rendered notification owed to one observer.
#[derive(Debug, Clone)]
pub struct ObserverValue {
    pub path: String,
    pub peer: SocketAddr,
    pub token: Vec<u8>,
    pub sequence: u32,
    pub representation: Representation,
}

/// What a GET with Observe=0 asked for
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub peer: SocketAddr,
    pub token: Vec<u8>,
    pub accept: Option<ContentFormat>,
}

/// A trait representing an observer registry.
#[async_trait]
pub trait Observer: Clone + Debug {
    type Error: Debug;

    /// Registers `subscription` for `path`, replacing an earlier registration
    /// of the same peer. Returns the Observe value for the registration
    /// response.
    async fn register(
        &mut self,
        path: &str,
        subscription: Subscription,
        sender: Arc<Sender<ObserverValue>>,
    ) -> Result<u32, Self::Error>;
    /// Unregisters one peer from a path.
    async fn unregister(&mut self, path: &str, peer: SocketAddr) -> Result<(), Self::Error>;
    /// Unregisters a peer from every path, used when it answers with RST.
    async fn unregister_peer(&mut self, peer: SocketAddr) -> Result<(), Self::Error>;
    /// Unregisters everything.
    async fn unregister_all(&mut self) -> Result<(), Self::Error>;
    /// Current subscriptions of a path.
    async fn subscriptions(&self, path: &str) -> Result<Vec<Subscription>, Self::Error>;
    /// Renders `snapshot` once per subscription of `path` and queues the
    /// notifications. Returns how many were queued.
    async fn notify(
        &mut self,
        path: &str,
        resource: &(dyn Resource + 'static),
        snapshot: &Snapshot,
    ) -> Result<usize, Self::Error>;
}

#[async_trait]
impl Observer for () {
    type Error = ();

    async fn register(
        &mut self,
        _path: &str,
        _subscription: Subscription,
        _sender: Arc<Sender<ObserverValue>>,
    ) -> Result<u32, Self::Error> {
        Ok(0)
    }
    async fn unregister(&mut self, _path: &str, _peer: SocketAddr) -> Result<(), Self::Error> {
        Ok(())
    }
    async fn unregister_peer(&mut self, _peer: SocketAddr) -> Result<(), Self::Error> {
        Ok(())
    }
    async fn unregister_all(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
    async fn subscriptions(&self, _path: &str) -> Result<Vec<Subscription>, Self::Error> {
        Ok(Vec::new())
    }
    async fn notify(
        &mut self,
        _path: &str,
        _resource: &(dyn Resource + 'static),
        _snapshot: &Snapshot,
    ) -> Result<usize, Self::Error> {
        Ok(0)
    }
}

/// Next Observe value after `sequence`, wrapping within 24 bits
pub fn next_sequence(sequence: u32) -> u32 {
    sequence.wrapping_add(1) & OBSERVE_SEQUENCE_MASK
}
