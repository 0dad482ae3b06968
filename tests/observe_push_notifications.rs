//! Push notification tests over a real UDP socket
//!
//! A client registers interest in the switch, another request changes it,
//! and the server must push exactly one confirmable notification carrying
//! the new value.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{net::UdpSocket, sync::oneshot, task::JoinHandle, time::timeout};

use coap_smartobject::{
    CoapOption, CoapRequest, ContentFormat, MessageClass, MessageType, Packet, RequestType,
    ResponseType, Server, SmartObject, SwitchResource,
    content::accept_option,
    device::DeviceId,
    observer::memory::MemObserver,
};

struct Running {
    addr: SocketAddr,
    db: MemObserver,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), coap_smartobject::ServeError>>,
}

async fn start_server() -> Running {
    let device_id = DeviceId::from("dipi:iot:test");
    let mut root = SmartObject::new(device_id.clone());
    root.add(Arc::new(SwitchResource::new(device_id, "switch")))
        .unwrap();

    let db = MemObserver::new();
    let server = Server::bind("127.0.0.1:0", &root, db.clone(), 16)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();

    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.run(async {
        let _ = stopped.await;
    }));

    Running {
        addr,
        db,
        stop,
        handle,
    }
}

fn request(method: RequestType, message_id: u16, token: &[u8]) -> CoapRequest<SocketAddr> {
    let mut request: CoapRequest<SocketAddr> = CoapRequest::new();
    request.set_method(method);
    request.set_path("switch");
    request.message.header.set_type(MessageType::Confirmable);
    request.message.header.message_id = message_id;
    request.message.set_token(token.to_vec());
    request
}

async fn recv_packet(socket: &UdpSocket) -> Packet {
    let mut buf = [0u8; 1024];
    let (n, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("timed out waiting for packet")
        .unwrap();
    Packet::from_bytes(&buf[..n]).unwrap()
}

async fn observe(
    client: &UdpSocket,
    addr: SocketAddr,
    token: &[u8],
    accept: Option<ContentFormat>,
) -> Packet {
    let mut register = request(RequestType::Get, 100, token);
    register.message.set_observe_value(0);
    if let Some(accept) = accept {
        register
            .message
            .add_option_as(CoapOption::Accept, accept_option(accept));
    }
    client
        .send_to(&register.message.to_bytes().unwrap(), addr)
        .await
        .unwrap();
    recv_packet(client).await
}

#[tokio::test]
async fn test_observe_switch_receives_new_value() {
    let server = start_server().await;
    let observer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let writer = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let response = observe(&observer, server.addr, b"obs1", None).await;
    assert_eq!(
        response.header.code,
        MessageClass::Response(ResponseType::Content)
    );
    assert_eq!(response.header.get_type(), MessageType::Acknowledgement);
    assert_eq!(response.header.message_id, 100);
    assert_eq!(response.payload, b"0".to_vec());
    assert!(response.get_observe_value().is_some());

    // Nothing is pushed before a change
    let mut buf = [0u8; 64];
    assert!(
        timeout(Duration::from_millis(100), observer.recv_from(&mut buf))
            .await
            .is_err()
    );

    let mut put = request(RequestType::Put, 200, b"w1");
    put.message.payload = b"1".to_vec();
    writer
        .send_to(&put.message.to_bytes().unwrap(), server.addr)
        .await
        .unwrap();
    let changed = recv_packet(&writer).await;
    assert_eq!(
        changed.header.code,
        MessageClass::Response(ResponseType::Changed)
    );

    let notification = recv_packet(&observer).await;
    assert_eq!(notification.header.get_type(), MessageType::Confirmable);
    assert_eq!(notification.get_token(), b"obs1");
    assert_eq!(notification.payload, b"1".to_vec());
    assert!(notification.get_observe_value().is_some());

    // Exactly one
    assert!(
        timeout(Duration::from_millis(100), observer.recv_from(&mut buf))
            .await
            .is_err()
    );

    server.stop.send(()).unwrap();
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_notification_honours_registered_accept() {
    let server = start_server().await;
    let observer = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let response = observe(
        &observer,
        server.addr,
        b"senml",
        Some(ContentFormat::ApplicationSenmlJSON),
    )
    .await;
    let body = String::from_utf8(response.payload).unwrap();
    assert!(body.contains("\"vb\":false"));

    let toggle = request(RequestType::Post, 300, b"t1");
    observer
        .send_to(&toggle.message.to_bytes().unwrap(), server.addr)
        .await
        .unwrap();

    // The ACK to the toggle and the notification may arrive in either order
    let first = recv_packet(&observer).await;
    let second = recv_packet(&observer).await;
    let notification = [first, second]
        .into_iter()
        .find(|packet| packet.get_token() == b"senml")
        .expect("no notification");

    let body = String::from_utf8(notification.payload).unwrap();
    assert!(body.contains("\"bn\":\"dipi:iot:test:switch\""));
    assert!(body.contains("\"vb\":true"));

    server.stop.send(()).unwrap();
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_reset_cancels_observation() {
    let server = start_server().await;
    let observer = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    observe(&observer, server.addr, b"obs2", None).await;
    assert_eq!(server.db.len().await, 1);

    let mut reset = Packet::new();
    reset.header.set_type(MessageType::Reset);
    reset.header.code = MessageClass::Empty;
    reset.header.message_id = 1;
    observer
        .send_to(&reset.to_bytes().unwrap(), server.addr)
        .await
        .unwrap();

    let mut cleared = false;
    for _ in 0..20 {
        if server.db.is_empty().await {
            cleared = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(cleared);

    server.stop.send(()).unwrap();
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_deregister_stops_notifications() {
    let server = start_server().await;
    let observer = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    observe(&observer, server.addr, b"obs3", None).await;

    let mut deregister = request(RequestType::Get, 101, b"obs3");
    deregister.message.set_observe_value(1);
    observer
        .send_to(&deregister.message.to_bytes().unwrap(), server.addr)
        .await
        .unwrap();
    let response = recv_packet(&observer).await;
    assert!(response.get_observe_value().is_none());
    assert!(server.db.is_empty().await);

    server.stop.send(()).unwrap();
    server.handle.await.unwrap().unwrap();
}
