//! Discovery and polling for one controller.
//!
//! Discovery passes never fail the caller: an unreachable endpoint logs a
//! warning and ends only that pass, keeping every device registered so far.
//! Devices are keyed by their source URL and registered at most once.

use super::admission::is_admitted;
use super::device::{Device, DeviceIdentity};
use super::point::Point;
use super::transport::{Credentials, HttpTransport, TransportSettings, XmlTransport};
use super::xml::XmlElement;
use crate::config::TracerConfig;
use crate::error::Result;
use futures_util::StreamExt;
use futures_util::stream;
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::sync::Arc;

const DEFAULT_MAC: &str = "00:00:00:00:00:00";

/// Identity of the controller itself, filled in by [`Controller::discover_about`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerIdentity {
    pub server_name: String,
    pub serial_number: String,
    pub mac_address: String,
    pub version: String,
}

impl Default for ControllerIdentity {
    fn default() -> Self {
        Self {
            server_name: String::new(),
            serial_number: String::new(),
            mac_address: DEFAULT_MAC.to_string(),
            version: "0".to_string(),
        }
    }
}

/// Result of one poll pass over a controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub devices: usize,
    pub points: usize,
    pub points_read: usize,
}

/// Concurrency limits for one poll pass.
#[derive(Debug, Clone, Copy)]
pub struct PollLimits {
    pub devices: usize,
    pub points: usize,
}

impl Default for PollLimits {
    fn default() -> Self {
        Self {
            devices: 4,
            points: 8,
        }
    }
}

/// One building-automation controller and the devices discovered on it.
pub struct Controller {
    name: String,
    hostname: String,
    base_url: String,
    allow_list: Option<Vec<String>>,
    max_spaces: Option<usize>,
    identity: RwLock<ControllerIdentity>,
    devices: RwLock<Vec<Arc<Device>>>,
    transport: Arc<dyn XmlTransport>,
}

impl Controller {
    pub fn new(
        name: impl Into<String>,
        hostname: impl Into<String>,
        transport: Arc<dyn XmlTransport>,
    ) -> Self {
        let hostname = hostname.into();
        Self {
            name: name.into(),
            base_url: format!("https://{hostname}"),
            hostname,
            allow_list: None,
            max_spaces: None,
            identity: RwLock::new(ControllerIdentity::default()),
            devices: RwLock::new(Vec::new()),
            transport,
        }
    }

    /// Build a controller with an HTTPS transport from its configuration entry.
    pub fn from_config(config: &TracerConfig, settings: TransportSettings) -> Result<Self> {
        let credentials = match (&config.username, &config.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };
        let transport = HttpTransport::new(credentials, settings)?;

        let mut controller = Self::new(&config.name, &config.host, Arc::new(transport))
            .with_scheme(&config.scheme)
            .with_max_spaces(config.max_spaces);
        if let Some(devices) = &config.devices {
            controller = controller.with_allow_list(devices.clone());
        }
        Ok(controller)
    }

    pub fn with_scheme(mut self, scheme: &str) -> Self {
        self.base_url = format!("{scheme}://{}", self.hostname);
        self
    }

    /// Only import devices whose name is on this list.
    pub fn with_allow_list(mut self, names: Vec<String>) -> Self {
        self.allow_list = Some(names);
        self
    }

    pub fn with_max_spaces(mut self, max_spaces: Option<usize>) -> Self {
        self.max_spaces = max_spaces;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn identity(&self) -> ControllerIdentity {
        self.identity.read().clone()
    }

    /// Registered devices in discovery order.
    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.devices.read().clone()
    }

    pub fn device_by_url(&self, url: &str) -> Option<Arc<Device>> {
        self.devices.read().iter().find(|d| d.url() == url).cloned()
    }

    pub fn has_device(&self, url: &str) -> bool {
        self.device_by_url(url).is_some()
    }

    fn is_allowed(&self, device_name: &str) -> bool {
        self.allow_list
            .as_ref()
            .is_none_or(|names| names.iter().any(|n| n == device_name))
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Register a device unless one with the same URL already exists.
    fn register(&self, device: Device) -> bool {
        let mut devices = self.devices.write();
        if devices.iter().any(|d| d.url() == device.url()) {
            return false;
        }
        devices.push(Arc::new(device));
        true
    }

    /// Read the controller's own identity. Returns whether it was reachable.
    pub async fn discover_about(&self) -> bool {
        let about_url = self.url("/evox/about");
        let about = match self.transport.get_xml(&about_url).await {
            Ok(about) => about,
            Err(e) => {
                warn!(
                    "[Discovery] Failed to discover controller {} ({}): {}",
                    self.name, self.hostname, e
                );
                return false;
            }
        };

        let mac_address = match self.transport.get_xml(&self.url("/evox/config/enet/link/eth0")).await {
            Ok(eth) => eth.named_val("str", "macaddr").unwrap_or(DEFAULT_MAC).to_string(),
            Err(e) => {
                warn!(
                    "[Discovery] Failed to read ethernet info on {} ({}): {}",
                    self.name, self.hostname, e
                );
                DEFAULT_MAC.to_string()
            }
        };

        let mut identity = self.identity.write();
        identity.server_name = about.named_val("str", "serverName").unwrap_or_default().to_string();
        identity.version = about
            .named_val("str", "productVersion")
            .unwrap_or("0")
            .to_string();
        identity.serial_number = about
            .named_val("str", "hardwareSerialNumber")
            .unwrap_or_default()
            .to_string();
        identity.mac_address = mac_address;

        info!(
            "[Discovery] Controller {} is {} (serial {}, version {})",
            self.name, identity.server_name, identity.serial_number, identity.version
        );
        true
    }

    /// Import installed equipment. Returns the number of newly registered devices.
    pub async fn discover_devices(&self) -> usize {
        info!(
            "[Discovery] Attempting device discovery on {} ({})",
            self.name, self.hostname
        );

        let summary_url = self.url("/evox/equipment/installedSummary");
        let summary = match self.transport.get_xml(&summary_url).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(
                    "[Discovery] Failed to discover devices on {} ({}): {}",
                    self.name, self.hostname, e
                );
                return 0;
            }
        };

        let mut added = 0;
        for entry in summary.children_tagged("obj") {
            let Some(equipment_uri) = entry.named_val("uri", "equipmentUri") else {
                debug!("[Discovery] Skipping summary entry without an equipment URI");
                continue;
            };

            let name = match entry.named_val("str", "displayName") {
                Some(name) => name.to_string(),
                None => format!(
                    "Unnamed Device on {}",
                    entry.named_val("str", "addressOnLink").unwrap_or("unknown")
                ),
            };
            let family = entry
                .named_val("str", "equipmentFamily")
                .unwrap_or_default()
                .to_string();

            if family.eq_ignore_ascii_case("space") {
                continue;
            }
            if !self.is_allowed(&name) {
                debug!("[Discovery] Skipping {} (not on the device list)", name);
                continue;
            }

            let equipment_url = self.url(&format!("/evox{}", ensure_leading_slash(equipment_uri)));
            if self.has_device(&equipment_url) {
                continue;
            }

            if let Some(device) = self.discover_device(name, family, equipment_url).await
                && self.register(device)
            {
                added += 1;
            }
        }

        added
    }

    /// Import spaces as devices of family `Space`. Returns the number newly registered.
    pub async fn discover_spaces(&self) -> usize {
        info!(
            "[Discovery] Attempting space discovery on {} ({})",
            self.name, self.hostname
        );

        let spaces_url = self.url("/evox/equipment/spaces");
        let spaces = match self.transport.get_xml(&spaces_url).await {
            Ok(spaces) => spaces,
            Err(e) => {
                warn!(
                    "[Discovery] Failed to discover spaces on {} ({}): {}",
                    self.name, self.hostname, e
                );
                return 0;
            }
        };

        let mut added = 0;
        for entry in spaces.children_tagged("ref") {
            if let Some(max) = self.max_spaces
                && self.space_count() >= max
            {
                info!("[Discovery] Reached the limit of {} spaces on {}", max, self.name);
                break;
            }

            let Some(href) = entry.attr("href") else {
                continue;
            };
            let space_url = self.url(href);
            if self.has_device(&space_url) {
                continue;
            }

            let name = match self.transport.get_xml(&space_url).await {
                Ok(space) => match space.named_val("str", "name") {
                    Some(name) => name.to_string(),
                    None => {
                        warn!("[Discovery] Space {} has no name, skipping", space_url);
                        continue;
                    }
                },
                Err(e) => {
                    warn!("[Discovery] Unable to read space {}: {}", space_url, e);
                    continue;
                }
            };

            if !self.is_allowed(&name) {
                debug!("[Discovery] Skipping {} (not on the device list)", name);
                continue;
            }

            if let Some(device) = self.discover_device(name, "Space".to_string(), space_url).await
                && self.register(device)
            {
                added += 1;
            }
        }

        added
    }

    fn space_count(&self) -> usize {
        self.devices
            .read()
            .iter()
            .filter(|d| d.family() == "Space")
            .count()
    }

    /// Read a device's attribute list into identity fields and admitted points.
    ///
    /// Returns `None` when the attribute list cannot be read, so a later
    /// discovery pass can retry the device.
    async fn discover_device(&self, name: String, family: String, url: String) -> Option<Device> {
        info!("[Discovery] Discovering {} ({})", name, url);

        let attributes_url = format!("{url}/attributes");
        let attributes = match self.transport.get_xml(&attributes_url).await {
            Ok(attributes) => attributes,
            Err(e) => {
                warn!(
                    "[Discovery] Unable to discover device {} ({}): {}",
                    name, url, e
                );
                return None;
            }
        };

        let mut identity = DeviceIdentity::default();
        let mut points = Vec::new();

        for attribute in attributes.children_tagged("obj") {
            let Some((key, href)) = attribute_reference(attribute) else {
                continue;
            };
            let attribute_url = self.url(href);

            match key {
                "ModelName" | "VendorName" | "FirmwareRevision" => {
                    let value_url = format!("{attribute_url}/value");
                    match self.transport.get_value(&value_url).await {
                        Ok(Some(value)) => match key {
                            "ModelName" => identity.model = value,
                            "VendorName" => identity.manufacturer = value,
                            _ => identity.firmware_version = value,
                        },
                        Ok(None) => debug!("[Discovery] {} on {} has no value", key, name),
                        Err(e) => warn!("[Discovery] Unable to read {} on {}: {}", key, name, e),
                    }
                }
                _ if is_admitted(key) => points.push(Point::new(key, attribute_url)),
                _ => debug!("[Discovery] Skipping ignored point name {}", key),
            }
        }

        info!(
            "[Discovery] Finished discovering {} of type {}, found {} valid points",
            name,
            family,
            points.len()
        );

        Some(
            Device::new(name, family, url)
                .with_identity(identity)
                .with_points(points),
        )
    }

    /// Refresh every point on every registered device.
    pub async fn poll(&self, limits: PollLimits) -> PollSummary {
        let devices = self.devices();
        let transport = self.transport.as_ref();

        let polls: Vec<_> = devices
            .iter()
            .map(|device| device.poll(transport, limits.points))
            .collect();

        let points_read = stream::iter(polls)
            .buffer_unordered(limits.devices.max(1))
            .fold(0, |total, read| async move { total + read })
            .await;

        PollSummary {
            devices: devices.len(),
            points: devices.iter().map(|d| d.points().len()).sum(),
            points_read,
        }
    }
}

fn attribute_reference(attribute: &XmlElement) -> Option<(&str, &str)> {
    let key = attribute.named_val("str", "key")?;
    let href = attribute
        .named_child("ref", "attributeReference")
        .and_then(|r| r.attr("href"))?;
    Some((key, href))
}

fn ensure_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}
