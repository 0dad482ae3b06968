//! Test utilities for creating test requests
//!
//! This module provides helper functions for creating requests that can be
//! fed straight into the router from unit tests, integration tests and the
//! benchmark.

use crate::content::accept_option;
use crate::router::CoapumRequest;
use crate::{CoapOption, CoapRequest, ContentFormat, Packet, RequestType};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

fn test_source() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 40000))
}

/// Create a test GET request for the given path
pub fn create_test_request(path: &str) -> CoapumRequest<SocketAddr> {
    let mut request = CoapRequest::from_packet(Packet::new(), test_source());
    request.set_path(path);
    request.set_method(RequestType::Get);
    request.into()
}

/// Create a test GET request with an Accept option
pub fn create_test_request_with_accept(
    path: &str,
    accept: ContentFormat,
) -> CoapumRequest<SocketAddr> {
    let mut request = CoapRequest::from_packet(Packet::new(), test_source());
    request.set_path(path);
    request.set_method(RequestType::Get);
    request
        .message
        .add_option_as(CoapOption::Accept, accept_option(accept));
    request.into()
}

/// Create a test request with a custom method and payload
pub fn create_test_request_with_payload(
    path: &str,
    method: RequestType,
    payload: Vec<u8>,
) -> CoapumRequest<SocketAddr> {
    let mut request = CoapRequest::from_packet(Packet::new(), test_source());
    request.set_path(path);
    request.set_method(method);
    request.message.payload = payload;
    request.into()
}

/// Create a GET carrying an Observe option (0 registers, 1 deregisters)
pub fn create_observe_request(
    path: &str,
    observe: u32,
    token: Vec<u8>,
    accept: Option<ContentFormat>,
) -> CoapumRequest<SocketAddr> {
    let mut request = CoapRequest::from_packet(Packet::new(), test_source());
    request.set_path(path);
    request.set_method(RequestType::Get);
    request.message.set_token(token);
    request.message.set_observe_value(observe);
    if let Some(accept) = accept {
        request
            .message
            .add_option_as(CoapOption::Accept, accept_option(accept));
    }
    request.into()
}
