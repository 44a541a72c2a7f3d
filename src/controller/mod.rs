//! Tracer SC controller access: transport, discovery and the point registry.
//!
//! The controller exposes equipment ("devices") and their attributes
//! ("points") as XML documents over HTTPS. This module discovers which
//! devices and points exist, keeps their latest values, and polls them.

pub mod admission;
pub mod device;
pub mod digest;
pub mod point;
pub mod session;
pub mod transport;
pub mod value;
pub mod xml;

pub use admission::is_admitted;
pub use device::{Device, DeviceIdentity, DeviceSnapshot};
pub use point::{Point, PointReading};
pub use session::{Controller, ControllerIdentity, PollLimits, PollSummary};
pub use transport::{Credentials, HttpTransport, TransportSettings, XmlTransport};
pub use value::{PointType, TypedValue, normalize};
