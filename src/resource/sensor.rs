//! Periodically refreshed sensor resources

use std::{
    ops::RangeInclusive,
    sync::{Arc, Weak},
    time::Duration,
};

use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};

use super::{
    InterfaceType, ObservableValue, RefreshMode, Resource, ResourceAttributes, ResourceError,
    Snapshot, ValueKind,
};
use crate::device::DeviceId;

/// Range every sensor value stays within
pub const SENSOR_DOMAIN: RangeInclusive<i64> = 0..=100;

/// Produces the next reading on every refresh tick
pub trait ValueSource: Send + 'static {
    fn next_value(&mut self) -> i64;
}

impl<F> ValueSource for F
where
    F: FnMut() -> i64 + Send + 'static,
{
    fn next_value(&mut self) -> i64 {
        self()
    }
}

/// Uniformly random readings, the demo behaviour of the smart object
#[derive(Debug, Clone)]
pub struct RandomSource {
    range: RangeInclusive<i64>,
}

impl RandomSource {
    pub fn new(range: RangeInclusive<i64>) -> Self {
        Self { range }
    }
}

impl Default for RandomSource {
    fn default() -> Self {
        Self::new(1..=100)
    }
}

impl ValueSource for RandomSource {
    fn next_value(&mut self) -> i64 {
        rand::random_range(self.range.clone())
    }
}

/// An observable numeric sensor
#[derive(Debug)]
pub struct SensorResource {
    value: ObservableValue,
    interval: Duration,
}

impl SensorResource {
    pub fn new(
        device_id: DeviceId,
        name: &str,
        attributes: ResourceAttributes,
        unit: Option<&str>,
        interval: Duration,
    ) -> Self {
        let value = ObservableValue::new(
            device_id,
            name,
            attributes,
            RefreshMode::Periodic(interval),
            ValueKind::Numeric {
                unit: unit.map(str::to_string),
            },
            SENSOR_DOMAIN,
            None,
        );

        Self { value, interval }
    }

    pub fn temperature(device_id: DeviceId, interval: Duration) -> Self {
        Self::new(
            device_id,
            "temperature",
            ResourceAttributes::new(
                "TemperatureSensor",
                "com.iot.demo.sensor.temperature",
                InterfaceType::Sensor,
            ),
            Some("Cel"),
            interval,
        )
    }

    pub fn humidity(device_id: DeviceId, interval: Duration) -> Self {
        Self::new(
            device_id,
            "humidity",
            ResourceAttributes::new(
                "HumiditySensor",
                "com.iot.demo.sensor.humidity",
                InterfaceType::Sensor,
            ),
            Some("%RH"),
            interval,
        )
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Replace the reading, as one refresh tick does
    pub async fn refresh(&self, reading: i64) -> Result<Snapshot, ResourceError> {
        self.value.update(|_| Ok(reading)).await
    }

    /// Spawn the recurring refresh task
    ///
    /// The first tick fires immediately. The task only holds a weak reference,
    /// so it ends on its own once the resource is dropped; [`RefreshTask`]
    /// aborts it on shutdown. A zero interval is rejected.
    pub fn start_refresh<V: ValueSource>(
        self: &Arc<Self>,
        mut source: V,
    ) -> Result<RefreshTask, ResourceError> {
        let name = self.value.name().to_string();
        let period = self.interval;
        if period.is_zero() {
            return Err(ResourceError::ZeroInterval(name));
        }

        let sensor: Weak<SensorResource> = Arc::downgrade(self);

        tracing::debug!("Starting refresh of {} every {:?}", name, period);

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let Some(sensor) = sensor.upgrade() else {
                    break;
                };

                let reading = source.next_value();
                if let Err(e) = sensor.refresh(reading).await {
                    tracing::warn!("Refresh of {} rejected: {}", sensor.name(), e);
                }
            }
        });

        Ok(RefreshTask { name, handle })
    }
}

impl Resource for SensorResource {
    fn value(&self) -> &ObservableValue {
        &self.value
    }
}

/// Handle on a running refresh task, aborted when dropped
#[derive(Debug)]
pub struct RefreshTask {
    name: String,
    handle: JoinHandle<()>,
}

impl RefreshTask {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl Drop for RefreshTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::StatusCode;

    fn sensor() -> Arc<SensorResource> {
        Arc::new(SensorResource::humidity(
            DeviceId::from("dev"),
            Duration::from_secs(1),
        ))
    }

    #[test]
    fn test_random_source_stays_in_range() {
        let mut source = RandomSource::default();
        for _ in 0..1000 {
            let value = source.next_value();
            assert!((1..=100).contains(&value));
        }
    }

    #[tokio::test]
    async fn test_read_before_first_tick_is_unavailable() {
        let sensor = sensor();
        let representation = sensor.handle_read(None).await;
        assert_eq!(representation.status, StatusCode::ServiceUnavailable);
        assert_eq!(representation.max_age, Some(1));
    }

    #[tokio::test]
    async fn test_sensor_rejects_writes() {
        let sensor = sensor();
        assert_eq!(sensor.handle_write(b"1").await, StatusCode::MethodNotAllowed);
        assert_eq!(sensor.handle_toggle(b"").await, StatusCode::MethodNotAllowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_task_replaces_value_every_interval() {
        let sensor = sensor();
        let mut next = 0;
        let task = sensor
            .start_refresh(move || {
                next += 1;
                next
            })
            .unwrap();

        // First tick is immediate.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sensor.value().current().await, Some(1));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sensor.value().current().await, Some(2));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(sensor.value().current().await, Some(5));

        task.abort();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sensor.value().current().await, Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_domain_reading_is_dropped() {
        let sensor = sensor();
        let _task = sensor.start_refresh(|| 250).unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sensor.value().current().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_task_ends_when_sensor_dropped() {
        let sensor = sensor();
        let task = sensor.start_refresh(RandomSource::default()).unwrap();
        drop(sensor);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(task.is_finished());
    }

    #[tokio::test]
    async fn test_zero_interval_is_rejected() {
        let sensor = Arc::new(SensorResource::temperature(
            DeviceId::from("dev"),
            Duration::ZERO,
        ));

        let err = sensor.start_refresh(RandomSource::default()).unwrap_err();
        assert!(matches!(err, ResourceError::ZeroInterval(name) if name == "temperature"));
    }
}
