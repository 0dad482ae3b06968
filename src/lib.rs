pub mod config;
pub mod content;
pub mod device;
pub mod directory;
pub mod extract;
pub mod observer;
pub mod registry;
pub mod resource;
pub mod router;
pub mod serve;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::Config;
pub use device::DeviceId;
pub use directory::{
    DirectoryClient, DirectoryUrl, Registration, RegistrationAck, RegistrationError,
};
pub use extract::{Accept, Bytes, FromRequest, IntoResponse, ObserveFlag, Source, StatusCode};
pub use registry::{RegistryError, SmartObject};
pub use resource::{
    ObservableValue, RefreshMode, Representation, Resource, ResourceError, SensorResource,
    Snapshot, SwitchResource,
};
pub use router::CoapRouter;
pub use serve::{ServeError, Server};

// Re-export CoAP types
pub use coap_lite::{
    CoapOption, CoapRequest, CoapResponse, ContentFormat, MessageClass, MessageType, Packet,
    RequestType, ResponseType,
};
