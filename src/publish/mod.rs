//! Publishing to the MQTT bus: topic naming, the [`Publisher`] seam, the
//! rumqttc-backed bus and Home Assistant discovery payloads.

pub mod discovery;
pub mod mqtt;

pub use discovery::HaDiscovery;
pub use mqtt::{MqttBus, MqttPublisher};

use crate::error::Result;
use async_trait::async_trait;

/// Anything messages can be published to.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<()>;
}

/// Make a display name safe for use as a topic level.
///
/// Lowercases, maps spaces and `-` to `_`, and strips `( ) / \`.
pub fn sanitize_name(name: &str) -> String {
    name.to_lowercase()
        .replace([' ', '-'], "_")
        .replace(['(', ')', '/', '\\'], "")
}

/// Topic layout under the configured base topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    base: String,
}

impl Topics {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn point(&self, controller: &str, device: &str, point: &str) -> String {
        format!(
            "{}/get/{}/{}/{}",
            self.base,
            sanitize_name(controller),
            sanitize_name(device),
            sanitize_name(point)
        )
    }

    pub fn climate(&self, controller: &str, device: &str) -> String {
        format!(
            "{}/climate/{}/{}",
            self.base,
            sanitize_name(controller),
            sanitize_name(device)
        )
    }

    /// Command topic advertised for read-only entities. Nothing subscribes to it.
    pub fn ignored(&self) -> String {
        format!("{}/ignored", self.base)
    }
}
