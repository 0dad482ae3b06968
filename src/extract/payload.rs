//! Payload extraction for CoAP requests

use super::FromRequest;
use crate::router::CoapumRequest;
use async_trait::async_trait;
use std::{fmt, net::SocketAddr};

/// Extract raw bytes from the request payload
///
/// The switch write bodies are tiny ASCII literals, so the resources receive
/// the bytes untouched and validate them themselves.
pub struct Bytes(pub Vec<u8>);

impl fmt::Debug for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Bytes")
            .field(&format!("{} bytes", self.0.len()))
            .finish()
    }
}

impl Clone for Bytes {
    fn clone(&self) -> Self {
        Bytes(self.0.clone())
    }
}

impl std::ops::Deref for Bytes {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(bytes: Vec<u8>) -> Self {
        Bytes(bytes)
    }
}

#[async_trait]
impl FromRequest for Bytes {
    type Rejection = std::convert::Infallible;

    async fn from_request(req: &CoapumRequest<SocketAddr>) -> Result<Self, Self::Rejection> {
        Ok(Bytes(req.message.payload.clone()))
    }
}
