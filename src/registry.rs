//! The server root: one device identity and its ordered resource set.

use std::{sync::Arc, time::Duration};

use crate::device::DeviceId;
use crate::resource::{
    RandomSource, RefreshTask, Resource, ResourceError, SensorResource, SwitchResource,
    ValueSource,
};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("a resource named {0} is already registered")]
    DuplicateResource(String),

    #[error("unable to start refresh: {0}")]
    Refresh(#[from] ResourceError),
}

/// Resources hosted under one device identity, in insertion order
pub struct SmartObject {
    device_id: DeviceId,
    resources: Vec<Arc<dyn Resource>>,
    refresh_tasks: Vec<RefreshTask>,
}

impl SmartObject {
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            resources: Vec::new(),
            refresh_tasks: Vec::new(),
        }
    }

    /// The demo device: temperature and humidity refreshed from random
    /// readings every `interval`, plus a switch starting off.
    ///
    /// Must be called inside a tokio runtime since it spawns the refresh tasks.
    pub fn demo(device_id: DeviceId, interval: Duration) -> Result<Self, RegistryError> {
        let mut root = Self::new(device_id.clone());

        tracing::info!("Defining and adding resources ...");

        let temperature = Arc::new(SensorResource::temperature(device_id.clone(), interval));
        root.add_sensor(temperature, RandomSource::default())?;

        let humidity = Arc::new(SensorResource::humidity(device_id.clone(), interval));
        root.add_sensor(humidity, RandomSource::default())?;

        root.add(Arc::new(SwitchResource::new(device_id, "switch")))?;

        Ok(root)
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Add a resource; names must be unique among siblings
    pub fn add(&mut self, resource: Arc<dyn Resource>) -> Result<(), RegistryError> {
        if self.get(resource.name()).is_some() {
            return Err(RegistryError::DuplicateResource(resource.name().to_string()));
        }

        tracing::debug!("Adding resource {}", resource.name());
        self.resources.push(resource);
        Ok(())
    }

    /// Add a sensor and start its refresh task, owned by this root
    ///
    /// Nothing is added when the refresh cannot start.
    pub fn add_sensor<V: ValueSource>(
        &mut self,
        sensor: Arc<SensorResource>,
        source: V,
    ) -> Result<(), RegistryError> {
        if self.get(sensor.name()).is_some() {
            return Err(RegistryError::DuplicateResource(sensor.name().to_string()));
        }

        let task = sensor.start_refresh(source)?;
        self.add(sensor)?;
        self.refresh_tasks.push(task);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Resource>> {
        self.resources.iter().find(|r| r.name() == name)
    }

    pub fn resources(&self) -> impl Iterator<Item = &Arc<dyn Resource>> {
        self.resources.iter()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// CoRE link-format description of every resource
    ///
    /// `</name>;obs;rt="...";if="...";title="..."`, joined with `,`.
    pub fn link_format(&self) -> String {
        self.resources
            .iter()
            .map(|resource| link_entry(resource.as_ref()))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Stop every refresh task; values stay readable but no longer change
    pub fn shutdown(&mut self) {
        for task in self.refresh_tasks.drain(..) {
            tracing::debug!("Stopping refresh of {}", task.name());
            task.abort();
        }
    }
}

impl std::fmt::Debug for SmartObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartObject")
            .field("device_id", &self.device_id)
            .field(
                "resources",
                &self.resources.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

fn link_entry(resource: &dyn Resource) -> String {
    let attributes = resource.attributes();
    let mut entry = format!("</{}>", resource.name());

    if resource.is_observable() {
        entry.push_str(";obs");
    }
    entry.push_str(&format!(
        ";rt=\"{}\";if=\"{}\";title=\"{}\"",
        attributes.resource_type,
        attributes.interface.as_str(),
        attributes.title
    ));
    entry
}
