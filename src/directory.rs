//! Resource Directory registration
//!
//! One confirmable POST of the link-format description to the directory's
//! registration interface:
//!
//! ```text
//! POST coap://<directory>/rd?ep=<endpoint>&base=coap://<host>:<port>
//! Content-Format: 40
//!
//! </temperature>;obs;rt="...";if="core.s";title="TemperatureSensor",...
//! ```
//!
//! Failures are reported to the caller and never affect local serving.

use std::{
    fmt,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    time::Duration,
};

use coap_lite::{
    CoapOption, ContentFormat, MessageClass, MessageType, Packet, RequestType, ResponseType,
};
use tokio::net::{UdpSocket, lookup_host};

use crate::config::Config;

/// Default CoAP port when the directory URL names none
pub const DEFAULT_COAP_PORT: u16 = 5683;

/// Pause between registration attempts when retries are enabled
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

const BUF_SIZE: usize = 1152;

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("invalid directory url {0:?}")]
    InvalidUrl(String),

    #[error("unable to resolve directory host {0}")]
    Resolve(String),

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no response from directory within {0:?}")]
    Timeout(Duration),

    #[error("directory reset the registration request")]
    Reset,

    #[error("directory rejected registration with {status:?}")]
    Rejected { status: ResponseType, payload: String },

    #[error("malformed directory response: {0}")]
    Malformed(String),
}

impl RegistrationError {
    /// Whether another attempt could succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RegistrationError::Resolve(_) | RegistrationError::Io(_) | RegistrationError::Timeout(_)
        )
    }
}

/// A `coap://host[:port]/path` directory address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryUrl {
    host: String,
    port: u16,
    path: Vec<String>,
}

impl DirectoryUrl {
    pub fn parse(url: &str) -> Result<Self, RegistrationError> {
        let invalid = || RegistrationError::InvalidUrl(url.to_string());

        let rest = url.strip_prefix("coap://").ok_or_else(invalid)?;
        if rest.contains(['?', '#']) {
            return Err(invalid());
        }

        let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, after) = bracketed.split_once(']').ok_or_else(invalid)?;
            let port = match after {
                "" => None,
                other => Some(other.strip_prefix(':').ok_or_else(invalid)?),
            };
            (host, port)
        } else {
            match authority.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };

        if host.is_empty() {
            return Err(invalid());
        }

        let port = match port {
            Some(port) => port.parse::<u16>().map_err(|_| invalid())?,
            None => DEFAULT_COAP_PORT,
        };

        Ok(Self {
            host: host.to_string(),
            port,
            path: path
                .split('/')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }
}

impl fmt::Display for DirectoryUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "coap://{}:{}/{}", host_literal(&self.host), self.port, self.path.join("/"))
    }
}

fn host_literal(host: &str) -> String {
    if host.contains(':') {
        format!("[{}]", host)
    } else {
        host.to_string()
    }
}

/// What gets advertised to the directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub endpoint_name: String,
    pub advertise_host: String,
    pub advertise_port: u16,
    pub link_format: String,
}

impl Registration {
    pub fn new(config: &Config, link_format: String) -> Self {
        Self {
            endpoint_name: config.endpoint_name.clone(),
            advertise_host: config.advertise_host.clone(),
            advertise_port: config.advertise_port,
            link_format,
        }
    }

    /// `base=` parameter value
    pub fn base(&self) -> String {
        format!(
            "coap://{}:{}",
            host_literal(&self.advertise_host),
            self.advertise_port
        )
    }

    /// Uri-Query options, in order
    pub fn query(&self) -> Vec<String> {
        vec![format!("ep={}", self.endpoint_name), format!("base={}", self.base())]
    }
}

/// The directory's answer to a registration
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationAck {
    pub status: ResponseType,
    /// Location-Path of the created registration, e.g. `rd/4521`
    pub location: String,
    pub message_id: u16,
    pub token: Vec<u8>,
    pub payload: String,
}

/// Whether a response code is in the 2.xx class
pub fn is_success(status: ResponseType) -> bool {
    matches!(
        status,
        ResponseType::Created
            | ResponseType::Deleted
            | ResponseType::Valid
            | ResponseType::Changed
            | ResponseType::Content
            | ResponseType::Continue
    )
}

/// Client for one directory
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    url: DirectoryUrl,
    timeout: Duration,
    attempts: u32,
    retry_delay: Duration,
}

impl DirectoryClient {
    /// A client making a single attempt bounded by `timeout`
    pub fn new(url: DirectoryUrl, timeout: Duration) -> Self {
        Self {
            url,
            timeout,
            attempts: 1,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, RegistrationError> {
        let url = DirectoryUrl::parse(&config.directory_url)?;
        Ok(Self::new(url, config.registration_timeout)
            .with_retries(config.registration_attempts, DEFAULT_RETRY_DELAY))
    }

    /// Retry transport failures up to `attempts` times in total
    pub fn with_retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_delay = delay;
        self
    }

    pub fn url(&self) -> &DirectoryUrl {
        &self.url
    }

    /// Register with the directory.
    ///
    /// A rejection by the directory is final; only transport failures are
    /// retried.
    pub async fn register(
        &self,
        registration: &Registration,
    ) -> Result<RegistrationAck, RegistrationError> {
        let mut attempt = 1;

        loop {
            tracing::info!(
                "Registering {} with {} (attempt {}/{})",
                registration.endpoint_name,
                self.url,
                attempt,
                self.attempts
            );

            let result = match tokio::time::timeout(self.timeout, self.attempt(registration)).await
            {
                Ok(result) => result,
                Err(_) => Err(RegistrationError::Timeout(self.timeout)),
            };

            match result {
                Ok(ack) => {
                    tracing::info!(
                        "Registration accepted: {:?} location={:?}",
                        ack.status,
                        ack.location
                    );
                    return Ok(ack);
                }
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    tracing::warn!("Registration attempt {} failed: {}", attempt, e);
                    attempt += 1;
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(
        &self,
        registration: &Registration,
    ) -> Result<RegistrationAck, RegistrationError> {
        let target = lookup_host((self.url.host(), self.url.port()))
            .await
            .map_err(|_| RegistrationError::Resolve(self.url.host().to_string()))?
            .next()
            .ok_or_else(|| RegistrationError::Resolve(self.url.host().to_string()))?;

        let local: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(target).await?;

        let request = self.build_request(registration);
        tracing::info!("Registration request:\n{}", describe(&request));

        let bytes = request
            .to_bytes()
            .map_err(|e| RegistrationError::Malformed(format!("{:?}", e)))?;
        socket.send(&bytes).await?;

        let mut buf = vec![0u8; BUF_SIZE];
        loop {
            let n = socket.recv(&mut buf).await?;
            let response = Packet::from_bytes(&buf[..n])
                .map_err(|e| RegistrationError::Malformed(format!("{:?}", e)))?;

            let same_exchange = response.header.message_id == request.header.message_id;

            match response.header.code {
                MessageClass::Empty if same_exchange => match response.header.get_type() {
                    MessageType::Reset => return Err(RegistrationError::Reset),
                    _ => tracing::debug!("Directory acknowledged, waiting for separate response"),
                },
                MessageClass::Response(status) if response.get_token() == request.get_token() => {
                    tracing::info!("Registration response:\n{}", describe(&response));

                    if response.header.get_type() == MessageType::Confirmable {
                        socket.send(&empty_ack(&response)?).await?;
                    }

                    return acknowledgement(status, &response);
                }
                _ => tracing::debug!("Ignoring unrelated message from directory"),
            }
        }
    }

    fn build_request(&self, registration: &Registration) -> Packet {
        let mut packet = Packet::new();
        packet.header.set_type(MessageType::Confirmable);
        packet.header.code = MessageClass::Request(RequestType::Post);
        packet.header.message_id = rand::random();
        packet.set_token(rand::random::<[u8; 4]>().to_vec());

        for segment in self.url.path() {
            packet.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
        }
        for query in registration.query() {
            packet.add_option(CoapOption::UriQuery, query.into_bytes());
        }
        packet.set_content_format(ContentFormat::ApplicationLinkFormat);
        packet.payload = registration.link_format.as_bytes().to_vec();
        packet
    }
}

fn acknowledgement(
    status: ResponseType,
    response: &Packet,
) -> Result<RegistrationAck, RegistrationError> {
    let payload = String::from_utf8_lossy(&response.payload).into_owned();

    if !is_success(status) {
        return Err(RegistrationError::Rejected { status, payload });
    }

    let location = match response.get_option(CoapOption::LocationPath) {
        Some(segments) => segments
            .iter()
            .map(|segment| String::from_utf8(segment.clone()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| RegistrationError::Malformed("Location-Path is not UTF-8".to_string()))?
            .join("/"),
        None => String::new(),
    };

    Ok(RegistrationAck {
        status,
        location,
        message_id: response.header.message_id,
        token: response.get_token().to_vec(),
        payload,
    })
}

fn empty_ack(response: &Packet) -> Result<Vec<u8>, RegistrationError> {
    let mut ack = Packet::new();
    ack.header.set_type(MessageType::Acknowledgement);
    ack.header.code = MessageClass::Empty;
    ack.header.message_id = response.header.message_id;
    ack.to_bytes()
        .map_err(|e| RegistrationError::Malformed(format!("{:?}", e)))
}

/// Multi-line dump of a packet for the registration log
fn describe(packet: &Packet) -> String {
    let options = |option: CoapOption| -> Vec<String> {
        packet
            .get_option(option)
            .map(|values| {
                values
                    .iter()
                    .map(|value| String::from_utf8_lossy(value).into_owned())
                    .collect()
            })
            .unwrap_or_default()
    };

    let mut out = format!(
        "  type: {:?}\n  code: {:?}\n  message id: {}\n  token: {:02x?}\n",
        packet.header.get_type(),
        packet.header.code,
        packet.header.message_id,
        packet.get_token()
    );
    for (label, option) in [
        ("uri-path", CoapOption::UriPath),
        ("uri-query", CoapOption::UriQuery),
        ("location-path", CoapOption::LocationPath),
    ] {
        let values = options(option);
        if !values.is_empty() {
            out.push_str(&format!("  {}: {}\n", label, values.join(" ")));
        }
    }
    if let Some(format) = packet.get_content_format() {
        out.push_str(&format!("  content-format: {:?}\n", format));
    }
    out.push_str(&format!(
        "  payload: {}",
        String::from_utf8_lossy(&packet.payload)
    ));
    out
}
