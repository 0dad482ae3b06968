//! The on/off actuator resource
//!
//! Two write semantics share the resource: PUT sets an absolute state from an
//! explicit `0`/`1` body and is idempotent, POST flips the state and demands
//! an empty body.

use async_trait::async_trait;

use super::{
    InterfaceType, ObservableValue, RefreshMode, Resource, ResourceAttributes, ResourceError,
    Snapshot, ValueKind,
};
use crate::device::DeviceId;
use crate::extract::StatusCode;

/// Parse an absolute-set body.
///
/// The accepted literals are exactly the single ASCII bytes `0` and `1`. No
/// sign, whitespace, leading zeros or trailing newline are tolerated.
pub fn parse_switch_literal(payload: &[u8]) -> Result<i64, ResourceError> {
    match payload {
        b"0" => Ok(0),
        b"1" => Ok(1),
        [] => Err(ResourceError::Validation("empty payload".to_string())),
        digits if digits.iter().all(u8::is_ascii_digit) => Err(ResourceError::Validation(
            format!("{} is not 0 or 1", String::from_utf8_lossy(digits)),
        )),
        other => Err(ResourceError::Validation(format!(
            "{:?} is not an integer literal",
            String::from_utf8_lossy(other)
        ))),
    }
}

/// An observable switch, `0` disabled and `1` enabled
#[derive(Debug)]
pub struct SwitchResource {
    value: ObservableValue,
}

impl SwitchResource {
    pub fn new(device_id: DeviceId, name: &str) -> Self {
        let value = ObservableValue::new(
            device_id,
            name,
            ResourceAttributes::new(
                "SwitchActuator",
                "com.iot.demo.actuator.switch",
                InterfaceType::Actuator,
            ),
            RefreshMode::EventDriven,
            ValueKind::Boolean,
            0..=1,
            Some(0),
        );

        Self { value }
    }

    /// Absolute set from a `0`/`1` body
    pub async fn set(&self, payload: &[u8]) -> Result<Snapshot, ResourceError> {
        let requested = parse_switch_literal(payload)?;
        self.value.update(|_| Ok(requested)).await
    }

    /// Flip the state, the body must be empty
    pub async fn toggle(&self, payload: &[u8]) -> Result<Snapshot, ResourceError> {
        if !payload.is_empty() {
            return Err(ResourceError::Validation(
                "toggle takes no payload".to_string(),
            ));
        }

        self.value
            .update(|current| match current {
                Some(1) => Ok(0),
                Some(0) => Ok(1),
                other => Err(ResourceError::Internal(format!(
                    "switch holds unexpected value {:?}",
                    other
                ))),
            })
            .await
    }

    fn write_status(&self, verb: &str, result: Result<Snapshot, ResourceError>) -> StatusCode {
        match result {
            Ok(snapshot) => {
                tracing::info!("Resource Status Updated: {}", snapshot.value);
                StatusCode::Changed
            }
            Err(e @ ResourceError::Validation(_)) => {
                tracing::warn!("Rejected {} on {}: {}", verb, self.value.name(), e);
                e.status()
            }
            Err(e) => {
                tracing::error!("Error handling {} on {}: {}", verb, self.value.name(), e);
                e.status()
            }
        }
    }
}

#[async_trait]
impl Resource for SwitchResource {
    fn value(&self) -> &ObservableValue {
        &self.value
    }

    async fn handle_write(&self, payload: &[u8]) -> StatusCode {
        tracing::info!(
            "Received PUT request with body: {:?}",
            String::from_utf8_lossy(payload)
        );
        let result = self.set(payload).await;
        self.write_status("PUT", result)
    }

    async fn handle_toggle(&self, payload: &[u8]) -> StatusCode {
        tracing::info!(
            "Received POST request with body: {:?}",
            String::from_utf8_lossy(payload)
        );
        let result = self.toggle(payload).await;
        self.write_status("POST", result)
    }
}
