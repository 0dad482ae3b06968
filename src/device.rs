use std::fmt;

use uuid::Uuid;

/// Opaque identity shared by every resource hosted by one process.
///
/// Generated once at construction as `<prefix>:<uuid-v4>` and never changed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn generate(prefix: &str) -> Self {
        DeviceId(format!("{}:{}", prefix, Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// SenML base name of a resource owned by this device
    pub fn base_name(&self, resource: &str) -> String {
        format!("{}:{}", self.0, resource)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        DeviceId(id.to_string())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_uses_prefix_and_uuid() {
        let id = DeviceId::generate("dipi:iot");
        let uuid = id.as_str().strip_prefix("dipi:iot:").unwrap();
        assert!(Uuid::parse_str(uuid).is_ok());
    }

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(DeviceId::generate("dev"), DeviceId::generate("dev"));
    }

    #[test]
    fn test_base_name() {
        let id = DeviceId::from("dev");
        assert_eq!(id.base_name("switch"), "dev:switch");
    }
}
