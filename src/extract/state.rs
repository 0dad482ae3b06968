//! Request metadata extraction
//!
//! Extractors for the options and addressing information a resource handler
//! or the observe machinery needs: the negotiated Accept format, the Observe
//! flag and the peer address.

use super::FromRequest;
use crate::router::CoapumRequest;
use async_trait::async_trait;
use coap_lite::option_value::OptionValueU16;
use coap_lite::{CoapOption, ContentFormat, ObserveOption};
use std::{fmt, net::SocketAddr};

/// Extract the Accept option as a content format
///
/// `None` when the client sent no Accept option or one coap-lite does not
/// know, in which case the resources answer with text/plain.
#[derive(Clone, Copy, PartialEq)]
pub struct Accept(pub Option<ContentFormat>);

impl fmt::Debug for Accept {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Accept").field(&self.0).finish()
    }
}

impl std::ops::Deref for Accept {
    type Target = Option<ContentFormat>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl FromRequest for Accept {
    type Rejection = std::convert::Infallible;

    async fn from_request(req: &CoapumRequest<SocketAddr>) -> Result<Self, Self::Rejection> {
        let accept = req
            .message
            .get_first_option_as::<OptionValueU16>(CoapOption::Accept)
            .and_then(Result::ok)
            .and_then(|value| ContentFormat::try_from(usize::from(value.0)).ok());
        Ok(Accept(accept))
    }
}

/// Extract the source address from the request
pub struct Source(pub SocketAddr);

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Source").field(&self.0).finish()
    }
}

impl Clone for Source {
    fn clone(&self) -> Self {
        *self
    }
}

impl Copy for Source {}

impl std::ops::Deref for Source {
    type Target = SocketAddr;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl FromRequest for Source {
    type Rejection = std::convert::Infallible;

    async fn from_request(req: &CoapumRequest<SocketAddr>) -> Result<Self, Self::Rejection> {
        let addr = req
            .source
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));
        Ok(Source(addr))
    }
}

/// Extract the CoAP observe flag from the request
///
/// # Example
///
/// ```rust
/// use coap_smartobject::extract::ObserveFlag;
/// use coap_lite::ObserveOption;
///
/// fn describe(ObserveFlag(observe): ObserveFlag) -> &'static str {
///     match observe {
///         Some(ObserveOption::Register) => "register",
///         Some(ObserveOption::Deregister) => "deregister",
///         None => "plain request",
///     }
/// }
/// ```
pub struct ObserveFlag(pub Option<ObserveOption>);

impl fmt::Debug for ObserveFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObserveFlag").field(&self.0).finish()
    }
}

impl Clone for ObserveFlag {
    fn clone(&self) -> Self {
        *self
    }
}

impl Copy for ObserveFlag {}

impl std::ops::Deref for ObserveFlag {
    type Target = Option<ObserveOption>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl FromRequest for ObserveFlag {
    type Rejection = std::convert::Infallible;

    async fn from_request(req: &CoapumRequest<SocketAddr>) -> Result<Self, Self::Rejection> {
        Ok(ObserveFlag(*req.get_observe_flag()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::accept_option;
    use crate::{CoapRequest, Packet};

    fn request_from(packet: Packet) -> CoapumRequest<SocketAddr> {
        CoapRequest::from_packet(packet, SocketAddr::from(([127, 0, 0, 1], 40000))).into()
    }

    #[tokio::test]
    async fn test_accept_extraction() {
        let mut packet = Packet::new();
        packet.add_option_as(
            CoapOption::Accept,
            accept_option(ContentFormat::ApplicationSenmlJSON),
        );

        let Accept(accept) = Accept::from_request(&request_from(packet)).await.unwrap();
        assert_eq!(accept, Some(ContentFormat::ApplicationSenmlJSON));

        // Not a registered content format
        let mut packet = Packet::new();
        packet.add_option_as(CoapOption::Accept, OptionValueU16(9999));
        let Accept(accept) = Accept::from_request(&request_from(packet)).await.unwrap();
        assert_eq!(accept, None);

        let Accept(accept) = Accept::from_request(&request_from(Packet::new()))
            .await
            .unwrap();
        assert_eq!(accept, None);
    }

    #[tokio::test]
    async fn test_source_extraction() {
        let Source(addr) = Source::from_request(&request_from(Packet::new()))
            .await
            .unwrap();
        assert_eq!(addr.port(), 40000);
    }

    #[tokio::test]
    async fn test_observe_flag_extraction() {
        let mut packet = Packet::new();
        packet.set_observe_value(0);

        let ObserveFlag(flag) = ObserveFlag::from_request(&request_from(packet))
            .await
            .unwrap();
        assert_eq!(flag, Some(ObserveOption::Register));
    }
}
