//! Request extraction and response conversion
//!
//! Resource handlers never see raw packets: the router pulls the pieces a
//! handler needs (payload, Accept option, Observe flag, peer address) out of
//! the request through [`FromRequest`], and turns whatever the handler
//! produced back into a packet through [`IntoResponse`].

use async_trait::async_trait;
use coap_lite::option_value::OptionValueU32;
use coap_lite::{CoapOption, ResponseType};
use std::{convert::Infallible, fmt, net::SocketAddr};

use crate::resource::Representation;
use crate::router::CoapumRequest;

pub mod payload;
pub mod state;

pub use payload::Bytes;
pub use state::{Accept, ObserveFlag, Source};

/// Trait for extracting data from CoAP requests
#[async_trait]
pub trait FromRequest: Sized {
    /// The error type returned when extraction fails
    type Rejection: IntoResponse;

    /// Extract this type from the request
    async fn from_request(req: &CoapumRequest<SocketAddr>) -> Result<Self, Self::Rejection>;
}

/// Trait for converting values into CoAP responses
pub trait IntoResponse {
    /// Convert this value into a CoAP response
    fn into_response(self) -> Result<crate::CoapResponse, ResponseError>;
}

/// Error types for response conversion
#[derive(Debug)]
pub enum ResponseError {
    InvalidResponse(String),
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
        }
    }
}

impl std::error::Error for ResponseError {}

/// CoAP status codes produced by the smart object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Changed,
    Content,
    BadRequest,
    NotFound,
    MethodNotAllowed,
    InternalServerError,
    ServiceUnavailable,
}

impl From<StatusCode> for ResponseType {
    fn from(status: StatusCode) -> Self {
        match status {
            StatusCode::Changed => ResponseType::Changed,
            StatusCode::Content => ResponseType::Content,
            StatusCode::BadRequest => ResponseType::BadRequest,
            StatusCode::NotFound => ResponseType::NotFound,
            StatusCode::MethodNotAllowed => ResponseType::MethodNotAllowed,
            StatusCode::InternalServerError => ResponseType::InternalServerError,
            StatusCode::ServiceUnavailable => ResponseType::ServiceUnavailable,
        }
    }
}

fn empty_response() -> Result<crate::CoapResponse, ResponseError> {
    let packet = crate::Packet::new();
    crate::CoapResponse::new(&packet)
        .ok_or_else(|| ResponseError::InvalidResponse("Failed to create response".to_string()))
}

impl IntoResponse for StatusCode {
    fn into_response(self) -> Result<crate::CoapResponse, ResponseError> {
        let mut response = empty_response()?;
        response.set_status(self.into());
        Ok(response)
    }
}

impl IntoResponse for Infallible {
    fn into_response(self) -> Result<crate::CoapResponse, ResponseError> {
        match self {}
    }
}

impl IntoResponse for Representation {
    fn into_response(self) -> Result<crate::CoapResponse, ResponseError> {
        let mut response = empty_response()?;
        response.set_status(self.status.into());

        if let Some(format) = self.content_format {
            response.message.set_content_format(format);
        }
        if let Some(max_age) = self.max_age {
            response
                .message
                .add_option_as(CoapOption::MaxAge, OptionValueU32(max_age));
        }
        response.message.payload = self.payload;
        Ok(response)
    }
}
