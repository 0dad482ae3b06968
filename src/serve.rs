//! UDP server loop
//!
//! Requests are dispatched through the [`CoapRouter`] on their own task.
//! Observe notifications arrive on an mpsc channel and go out as confirmable
//! messages; an RST from a peer cancels its observations.

use std::{future::Future, net::SocketAddr, sync::Arc};

use coap_lite::{CoapRequest, MessageClass, MessageType, Packet};
use tokio::{
    net::{ToSocketAddrs, UdpSocket},
    sync::mpsc,
};
use tower::Service;

use crate::extract::IntoResponse;
use crate::observer::{Observer, ObserverValue};
use crate::registry::SmartObject;
use crate::router::CoapRouter;

const BUF_SIZE: usize = 8192;

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unable to encode packet: {0}")]
    Encode(String),
}

pub struct Server<O>
where
    O: Observer,
{
    socket: Arc<UdpSocket>,
    router: CoapRouter<O>,
    notifications: mpsc::Receiver<ObserverValue>,
    next_message_id: u16,
}

impl<O> Server<O>
where
    O: Observer + Send + Sync + 'static,
{
    /// Bind the socket and build the router for `root`.
    ///
    /// `notification_buffer` bounds how many notifications may wait for the
    /// socket before observers are slowed down.
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        root: &SmartObject,
        db: O,
        notification_buffer: usize,
    ) -> Result<Self, ServeError> {
        let socket = UdpSocket::bind(addr).await?;
        let (tx, rx) = mpsc::channel(notification_buffer.max(1));
        let router = CoapRouter::new(root, db).with_notifications(tx);

        tracing::info!("Listening on {}", socket.local_addr()?);

        Ok(Self {
            socket: Arc::new(socket),
            router,
            notifications: rx,
            next_message_id: rand::random(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServeError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn router(&self) -> &CoapRouter<O> {
        &self.router
    }

    /// Serve until `shutdown` resolves.
    pub async fn run<F>(mut self, shutdown: F) -> Result<(), ServeError>
    where
        F: Future<Output = ()>,
    {
        let forwarders = self.router.start_change_forwarding();
        let mut buf = vec![0u8; BUF_SIZE];

        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    tracing::info!("Shutting down server");
                    break Ok(());
                }

                Some(value) = self.notifications.recv() => {
                    if let Err(e) = self.send_notification(value).await {
                        tracing::warn!("Unable to send notification: {}", e);
                    }
                }

                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((n, peer)) => self.handle_datagram(&buf[..n], peer).await,
                        Err(e) => {
                            tracing::error!("Error receiving: {}", e);
                            break Err(ServeError::Io(e));
                        }
                    }
                }
            }
        };

        for forwarder in forwarders {
            forwarder.abort();
        }
        self.router.forget_all().await;

        result
    }

    async fn handle_datagram(&mut self, bytes: &[u8], peer: SocketAddr) {
        let packet = match Packet::from_bytes(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!("Dropping malformed datagram from {}: {:?}", peer, e);
                return;
            }
        };

        match (packet.header.get_type(), packet.header.code) {
            (MessageType::Reset, _) => {
                tracing::info!("RST from {}, cancelling its observations", peer);
                self.router.forget_peer(peer).await;
            }
            (MessageType::Acknowledgement, _) => {
                tracing::trace!("ACK {} from {}", packet.header.message_id, peer);
            }
            (MessageType::Confirmable, MessageClass::Empty) => {
                // CoAP ping
                if let Err(e) = self.send_reset(packet.header.message_id, peer).await {
                    tracing::warn!("Unable to answer ping from {}: {}", peer, e);
                }
            }
            (_, MessageClass::Request(_)) => {
                self.spawn_request(packet, peer);
            }
            (kind, code) => {
                tracing::debug!("Ignoring {:?} {:?} from {}", kind, code, peer);
            }
        }
    }

    fn spawn_request(&mut self, packet: Packet, peer: SocketAddr) {
        let socket = self.socket.clone();
        let request = CoapRequest::from_packet(packet, peer);
        let fut = self.router.call(request.into());

        tokio::spawn(async move {
            let response = match fut.await {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!("Router failed for {}: {}", peer, e);
                    return;
                }
            };

            match response.message.to_bytes() {
                Ok(bytes) => {
                    if let Err(e) = socket.send_to(&bytes, peer).await {
                        tracing::warn!("Unable to reply to {}: {}", peer, e);
                    }
                }
                Err(e) => tracing::error!("Unable to encode response: {:?}", e),
            }
        });
    }

    async fn send_notification(&mut self, value: ObserverValue) -> Result<(), ServeError> {
        let mut response = value
            .representation
            .into_response()
            .map_err(|e| ServeError::Encode(e.to_string()))?;

        let message = &mut response.message;
        message.header.set_type(MessageType::Confirmable);
        message.header.message_id = self.message_id();
        message.set_token(value.token);
        message.set_observe_value(value.sequence);

        let bytes = message
            .to_bytes()
            .map_err(|e| ServeError::Encode(format!("{:?}", e)))?;
        self.socket.send_to(&bytes, value.peer).await?;

        tracing::debug!(
            "Notified {} of /{} (seq {})",
            value.peer,
            value.path,
            value.sequence
        );
        Ok(())
    }

    async fn send_reset(&mut self, message_id: u16, peer: SocketAddr) -> Result<(), ServeError> {
        let mut packet = Packet::new();
        packet.header.set_type(MessageType::Reset);
        packet.header.code = MessageClass::Empty;
        packet.header.message_id = message_id;

        let bytes = packet
            .to_bytes()
            .map_err(|e| ServeError::Encode(format!("{:?}", e)))?;
        self.socket.send_to(&bytes, peer).await?;
        Ok(())
    }

    fn message_id(&mut self) -> u16 {
        self.next_message_id = self.next_message_id.wrapping_add(1);
        self.next_message_id
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::device::DeviceId;
    use crate::observer::memory::MemObserver;
    use crate::resource::SwitchResource;

    async fn server() -> (Server<MemObserver>, UdpSocket) {
        let mut root = SmartObject::new(DeviceId::from("dev"));
        root.add(Arc::new(SwitchResource::new(DeviceId::from("dev"), "switch")))
            .unwrap();

        let server = Server::bind("127.0.0.1:0", &root, MemObserver::new(), 8)
            .await
            .unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        (server, client)
    }

    #[tokio::test]
    async fn test_ping_is_answered_with_reset() {
        let (server, client) = server().await;
        let addr = server.local_addr().unwrap();
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(server.run(async {
            let _ = stopped.await;
        }));

        let mut ping = Packet::new();
        ping.header.set_type(MessageType::Confirmable);
        ping.header.code = MessageClass::Empty;
        ping.header.message_id = 4242;
        client
            .send_to(&ping.to_bytes().unwrap(), addr)
            .await
            .unwrap();

        let mut buf = [0u8; 64];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let pong = Packet::from_bytes(&buf[..n]).unwrap();
        assert_eq!(pong.header.get_type(), MessageType::Reset);
        assert_eq!(pong.header.message_id, 4242);

        stop.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_malformed_datagram_is_ignored() {
        let (server, client) = server().await;
        let addr = server.local_addr().unwrap();
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(server.run(async {
            let _ = stopped.await;
        }));

        client.send_to(&[0xff], addr).await.unwrap();

        let mut buf = [0u8; 64];
        let reply =
            tokio::time::timeout(Duration::from_millis(200), client.recv_from(&mut buf)).await;
        assert!(reply.is_err());

        stop.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
