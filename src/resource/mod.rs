//! Observable resources
//!
//! Every resource wraps an [`ObservableValue`]: one integer guarded by a
//! per-resource lock, the metadata advertised in link-format, and a broadcast
//! channel that carries a [`Snapshot`] each time the value changes. The
//! transport layer subscribes to that channel to drive observe notifications
//! and never looks inside the resource.
//!
//! Reads are content negotiated: an Accept of SenML-JSON or JSON yields a
//! one-record SenML pack, anything else the plain decimal value.

use std::{ops::RangeInclusive, time::Duration};

use async_trait::async_trait;
use coap_lite::ContentFormat;
use smartobject_senml::{SenMLError, SenMLValue, codec};
use tokio::sync::{Mutex, broadcast};

use crate::content::is_senml;
use crate::device::DeviceId;
use crate::extract::StatusCode;

pub mod sensor;
pub mod switch;

pub use sensor::{RandomSource, RefreshTask, SensorResource, ValueSource};
pub use switch::{SwitchResource, parse_switch_literal};

/// SenML `bver` reported by every resource
pub const SENML_VERSION: f64 = 0.1;

/// Buffered change events per subscriber before it starts lagging
const CHANGE_CHANNEL_CAPACITY: usize = 32;

/// Failures while serving a resource request
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("invalid payload: {0}")]
    Validation(String),

    #[error("failed to encode representation: {0}")]
    Encoding(#[from] SenMLError),

    #[error("internal fault: {0}")]
    Internal(String),

    #[error("resource does not accept writes")]
    NotWritable,

    #[error("no value has been produced yet")]
    Unavailable,

    #[error("refresh interval of {0} must be non-zero")]
    ZeroInterval(String),
}

impl ResourceError {
    /// CoAP status reported to the client for this failure
    pub fn status(&self) -> StatusCode {
        match self {
            ResourceError::Validation(_) => StatusCode::BadRequest,
            ResourceError::Encoding(_)
            | ResourceError::Internal(_)
            | ResourceError::ZeroInterval(_) => StatusCode::InternalServerError,
            ResourceError::NotWritable => StatusCode::MethodNotAllowed,
            ResourceError::Unavailable => StatusCode::ServiceUnavailable,
        }
    }
}

/// CoRE interface description (`if=` link attribute)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceType {
    Sensor,
    Actuator,
}

impl InterfaceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceType::Sensor => "core.s",
            InterfaceType::Actuator => "core.a",
        }
    }
}

/// Link-format attributes, fixed at construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceAttributes {
    pub title: String,
    pub resource_type: String,
    pub interface: InterfaceType,
}

impl ResourceAttributes {
    pub fn new(title: &str, resource_type: &str, interface: InterfaceType) -> Self {
        Self {
            title: title.to_string(),
            resource_type: resource_type.to_string(),
            interface,
        }
    }
}

/// How a resource's value gets refreshed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Replaced by a timer at a fixed interval
    Periodic(Duration),
    /// Replaced only by inbound writes
    EventDriven,
}

impl RefreshMode {
    /// Max-Age hint in whole seconds, never below one
    pub fn max_age(&self) -> Option<u32> {
        match self {
            RefreshMode::Periodic(interval) => {
                let millis = interval.as_millis().max(1);
                let secs = millis.div_ceil(1000);
                Some(u32::try_from(secs).unwrap_or(u32::MAX))
            }
            RefreshMode::EventDriven => None,
        }
    }
}

/// How the integer value is rendered in SenML
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueKind {
    /// `v` with an optional unit
    Numeric { unit: Option<String> },
    /// `vb`, zero is false
    Boolean,
}

/// The resource value at the moment it changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub resource: String,
    pub value: i64,
    pub timestamp_ms: i64,
}

/// A rendered response, independent of the wire packet
#[derive(Debug, Clone, PartialEq)]
pub struct Representation {
    pub status: StatusCode,
    pub payload: Vec<u8>,
    pub content_format: Option<ContentFormat>,
    pub max_age: Option<u32>,
}

impl Representation {
    /// A payload-less response
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            payload: Vec::new(),
            content_format: None,
            max_age: None,
        }
    }

    pub fn payload_str(&self) -> &str {
        std::str::from_utf8(&self.payload).unwrap_or_default()
    }
}

/// Idle until a change is accepted; Changed while the new snapshot is handed
/// to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Changed,
}

#[derive(Debug)]
struct ValueState {
    value: Option<i64>,
    timestamp_ms: i64,
    phase: Phase,
}

/// Shared core of every resource
#[derive(Debug)]
pub struct ObservableValue {
    name: String,
    device_id: DeviceId,
    attributes: ResourceAttributes,
    refresh: RefreshMode,
    kind: ValueKind,
    domain: RangeInclusive<i64>,
    state: Mutex<ValueState>,
    changes: broadcast::Sender<Snapshot>,
}

impl ObservableValue {
    pub fn new(
        device_id: DeviceId,
        name: &str,
        attributes: ResourceAttributes,
        refresh: RefreshMode,
        kind: ValueKind,
        domain: RangeInclusive<i64>,
        initial: Option<i64>,
    ) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        Self {
            name: name.to_string(),
            device_id,
            attributes,
            refresh,
            kind,
            domain,
            state: Mutex::new(ValueState {
                value: initial,
                timestamp_ms: smartobject_senml::now_millis(),
                phase: Phase::Idle,
            }),
            changes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn attributes(&self) -> &ResourceAttributes {
        &self.attributes
    }

    pub fn refresh_mode(&self) -> RefreshMode {
        self.refresh
    }

    pub fn domain(&self) -> &RangeInclusive<i64> {
        &self.domain
    }

    /// Current value, `None` until the first refresh of a sensor
    pub async fn current(&self) -> Option<i64> {
        self.state.lock().await.value
    }

    pub async fn phase(&self) -> Phase {
        self.state.lock().await.phase
    }

    pub async fn snapshot(&self) -> Option<Snapshot> {
        let state = self.state.lock().await;
        state.value.map(|value| Snapshot {
            resource: self.name.clone(),
            value,
            timestamp_ms: state.timestamp_ms,
        })
    }

    /// Receive a [`Snapshot`] for every accepted change
    pub fn subscribe(&self) -> broadcast::Receiver<Snapshot> {
        self.changes.subscribe()
    }

    /// Read-modify-publish under the resource lock.
    ///
    /// `next` sees the current value and returns the replacement or rejects
    /// the change; on rejection nothing is mutated and nothing is published.
    /// Subscribers get the new snapshot before the lock is released, so
    /// notifications arrive in the same order as the changes.
    pub async fn update<F>(&self, next: F) -> Result<Snapshot, ResourceError>
    where
        F: FnOnce(Option<i64>) -> Result<i64, ResourceError> + Send,
    {
        let mut state = self.state.lock().await;

        let value = next(state.value)?;
        if !self.domain.contains(&value) {
            return Err(ResourceError::Internal(format!(
                "value {} outside {:?} for {}",
                value, self.domain, self.name
            )));
        }

        state.value = Some(value);
        state.timestamp_ms = smartobject_senml::now_millis();
        state.phase = Phase::Changed;

        let snapshot = Snapshot {
            resource: self.name.clone(),
            value,
            timestamp_ms: state.timestamp_ms,
        };

        // No receivers is fine: nobody observes yet.
        let receivers = self.changes.send(snapshot.clone()).unwrap_or(0);
        tracing::trace!("{} changed to {} ({} subscribers)", self.name, value, receivers);

        state.phase = Phase::Idle;
        Ok(snapshot)
    }

    /// Render a snapshot for the negotiated content format
    pub fn render(
        &self,
        snapshot: Option<&Snapshot>,
        accept: Option<ContentFormat>,
    ) -> Representation {
        let mut representation = match snapshot {
            None => Representation::empty(ResourceError::Unavailable.status()),
            Some(snapshot) if is_senml(accept) => match self.encode_senml(snapshot) {
                Ok(json) => Representation {
                    status: StatusCode::Content,
                    payload: json.into_bytes(),
                    content_format: accept,
                    max_age: None,
                },
                Err(e) => {
                    tracing::error!("Error generating SenML record for {}: {}", self.name, e);
                    Representation::empty(e.status())
                }
            },
            Some(snapshot) => Representation {
                status: StatusCode::Content,
                payload: snapshot.value.to_string().into_bytes(),
                content_format: Some(ContentFormat::TextPlain),
                max_age: None,
            },
        };

        representation.max_age = self.refresh.max_age();
        representation
    }

    fn encode_senml(&self, snapshot: &Snapshot) -> Result<String, ResourceError> {
        let base_name = self.device_id.base_name(&self.name);

        let (unit, value) = match &self.kind {
            ValueKind::Numeric { unit } => (unit.as_deref(), SenMLValue::from(snapshot.value)),
            ValueKind::Boolean => (None, SenMLValue::from(snapshot.value != 0)),
        };

        Ok(codec::encode(
            &base_name,
            SENML_VERSION,
            unit,
            value,
            snapshot.timestamp_ms,
        )?)
    }
}

/// A resource the router can dispatch to
///
/// Reads are available on every resource; the write entry points default to
/// 4.05 and are overridden by actuators.
#[async_trait]
pub trait Resource: Send + Sync {
    fn value(&self) -> &ObservableValue;

    fn name(&self) -> &str {
        self.value().name()
    }

    fn attributes(&self) -> &ResourceAttributes {
        self.value().attributes()
    }

    fn is_observable(&self) -> bool {
        true
    }

    fn subscribe(&self) -> broadcast::Receiver<Snapshot> {
        self.value().subscribe()
    }

    /// Render a change snapshot, used for observe notifications
    fn render(&self, snapshot: &Snapshot, accept: Option<ContentFormat>) -> Representation {
        self.value().render(Some(snapshot), accept)
    }

    /// GET
    async fn handle_read(&self, accept: Option<ContentFormat>) -> Representation {
        let snapshot = self.value().snapshot().await;
        self.value().render(snapshot.as_ref(), accept)
    }

    /// PUT, absolute set
    async fn handle_write(&self, _payload: &[u8]) -> StatusCode {
        ResourceError::NotWritable.status()
    }

    /// POST, toggle
    async fn handle_toggle(&self, _payload: &[u8]) -> StatusCode {
        ResourceError::NotWritable.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric(refresh: RefreshMode, initial: Option<i64>) -> ObservableValue {
        ObservableValue::new(
            DeviceId::from("dev"),
            "humidity",
            ResourceAttributes::new("HumiditySensor", "sensor.humidity", InterfaceType::Sensor),
            refresh,
            ValueKind::Numeric {
                unit: Some("%RH".to_string()),
            },
            0..=100,
            initial,
        )
    }

    #[test]
    fn test_max_age_rounds_up_to_seconds() {
        assert_eq!(
            RefreshMode::Periodic(Duration::from_millis(1000)).max_age(),
            Some(1)
        );
        assert_eq!(
            RefreshMode::Periodic(Duration::from_millis(1500)).max_age(),
            Some(2)
        );
        assert_eq!(RefreshMode::Periodic(Duration::ZERO).max_age(), Some(1));
        assert_eq!(RefreshMode::EventDriven.max_age(), None);
    }

    #[tokio::test]
    async fn test_render_before_first_value_is_unavailable() {
        let value = numeric(RefreshMode::EventDriven, None);
        let representation = value.render(None, None);
        assert_eq!(representation.status, StatusCode::ServiceUnavailable);
        assert!(representation.payload.is_empty());
    }

    #[tokio::test]
    async fn test_render_plain_text_and_senml() {
        let value = numeric(RefreshMode::Periodic(Duration::from_secs(1)), Some(42));
        let snapshot = value.snapshot().await.unwrap();

        let plain = value.render(Some(&snapshot), None);
        assert_eq!(plain.status, StatusCode::Content);
        assert_eq!(plain.payload_str(), "42");
        assert_eq!(plain.content_format, Some(ContentFormat::TextPlain));
        assert_eq!(plain.max_age, Some(1));

        let senml = value.render(Some(&snapshot), Some(ContentFormat::ApplicationSenmlJSON));
        assert_eq!(
            senml.content_format,
            Some(ContentFormat::ApplicationSenmlJSON)
        );
        let record = codec::decode(senml.payload_str()).unwrap();
        assert_eq!(record.bn.as_deref(), Some("dev:humidity"));
        assert_eq!(record.bver, Some(SENML_VERSION));
        assert_eq!(record.u.as_deref(), Some("%RH"));
        assert_eq!(record.v, Some(42.0));
    }

    #[tokio::test]
    async fn test_json_accept_echoes_json_format() {
        let value = numeric(RefreshMode::EventDriven, Some(3));
        let snapshot = value.snapshot().await;
        let representation = value.render(snapshot.as_ref(), Some(ContentFormat::ApplicationJSON));
        assert_eq!(
            representation.content_format,
            Some(ContentFormat::ApplicationJSON)
        );
        assert!(representation.payload_str().starts_with("[{"));
    }

    #[tokio::test]
    async fn test_update_publishes_and_returns_to_idle() {
        let value = numeric(RefreshMode::EventDriven, Some(0));
        let mut changes = value.subscribe();

        let snapshot = value.update(|_| Ok(7)).await.unwrap();
        assert_eq!(snapshot.value, 7);
        assert_eq!(changes.recv().await.unwrap(), snapshot);
        assert_eq!(value.phase().await, Phase::Idle);
    }

    #[tokio::test]
    async fn test_rejected_update_leaves_value_untouched() {
        let value = numeric(RefreshMode::EventDriven, Some(5));
        let mut changes = value.subscribe();

        let err = value
            .update(|_| Err(ResourceError::Validation("nope".to_string())))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BadRequest);

        let err = value.update(|_| Ok(101)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::InternalServerError);

        assert_eq!(value.current().await, Some(5));
        assert!(changes.try_recv().is_err());
    }
}
