//! Home Assistant MQTT discovery payloads.
//!
//! Keys use Home Assistant's abbreviated discovery schema.

use super::{Topics, sanitize_name};
use crate::climate::ClimateState;
use crate::controller::{Controller, Device};
use crate::error::Result;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    #[serde(rename = "cu")]
    pub configuration_url: String,
    #[serde(rename = "ids")]
    pub identifiers: Vec<String>,
    #[serde(rename = "cns", skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<(String, String)>,
    #[serde(rename = "mf")]
    pub manufacturer: String,
    #[serde(rename = "mdl")]
    pub model: String,
    pub name: String,
    #[serde(rename = "sw")]
    pub sw_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via_device: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BinarySensorConfig {
    #[serde(rename = "dev")]
    pub device: DeviceInfo,
    #[serde(rename = "dev_cla")]
    pub device_class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_category: Option<String>,
    pub name: String,
    #[serde(rename = "uniq_id")]
    pub unique_id: String,
    #[serde(rename = "stat_t")]
    pub state_topic: String,
    #[serde(rename = "pl_on")]
    pub payload_on: String,
    #[serde(rename = "pl_off")]
    pub payload_off: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClimateConfig {
    #[serde(rename = "dev")]
    pub device: DeviceInfo,
    pub name: String,
    #[serde(rename = "uniq_id")]
    pub unique_id: String,
    #[serde(rename = "act_t")]
    pub action_topic: String,
    #[serde(rename = "act_tpl")]
    pub action_template: String,
    #[serde(rename = "curr_temp_t")]
    pub current_temperature_topic: String,
    #[serde(rename = "curr_temp_tpl")]
    pub current_temperature_template: String,
    #[serde(rename = "fan_mode_stat_t")]
    pub fan_mode_state_topic: String,
    #[serde(rename = "fan_mode_stat_tpl")]
    pub fan_mode_state_template: String,
    pub fan_modes: Vec<String>,
    #[serde(rename = "mode_stat_t")]
    pub mode_state_topic: String,
    #[serde(rename = "mode_stat_tpl")]
    pub mode_state_template: String,
    pub modes: Vec<String>,
    #[serde(rename = "temp_stat_t")]
    pub temperature_state_topic: String,
    #[serde(rename = "temp_stat_tpl")]
    pub temperature_state_template: String,
    #[serde(rename = "init")]
    pub initial: f64,
    pub precision: f64,
    pub temp_step: f64,
    #[serde(rename = "fan_mode_cmd_t")]
    pub fan_mode_command_topic: String,
    #[serde(rename = "mode_cmd_t")]
    pub mode_command_topic: String,
    #[serde(rename = "temp_cmd_t")]
    pub temperature_command_topic: String,
}

/// A serialized discovery config and where to publish it (retained).
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryMessage {
    pub topic: String,
    pub payload: String,
}

/// Builds discovery messages under one prefix.
#[derive(Debug, Clone)]
pub struct HaDiscovery {
    prefix: String,
    topics: Topics,
}

impl HaDiscovery {
    pub fn new(prefix: impl Into<String>, topics: Topics) -> Self {
        Self {
            prefix: prefix.into(),
            topics,
        }
    }

    fn config_topic(&self, component: &str, controller: &Controller, object_id: &str) -> String {
        format!(
            "{}/{}/{}/{}/config",
            self.prefix,
            component,
            sanitize_name(controller.name()),
            object_id
        )
    }

    fn object_id(controller: &Controller, device: &Device) -> String {
        format!("{}_{}", sanitize_name(controller.name()), sanitize_name(device.name()))
    }

    pub fn controller_info(controller: &Controller) -> DeviceInfo {
        let identity = controller.identity();
        DeviceInfo {
            configuration_url: controller.base_url().to_string(),
            identifiers: vec![identity.serial_number.clone()],
            connections: vec![("mac".to_string(), identity.mac_address.clone())],
            manufacturer: "Trane".to_string(),
            model: "Tracer SC+".to_string(),
            name: controller.name().to_string(),
            sw_version: identity.version,
            via_device: None,
        }
    }

    pub fn device_info(controller: &Controller, device: &Device) -> DeviceInfo {
        let path = device
            .url()
            .strip_prefix(controller.base_url())
            .unwrap_or(device.url());
        let identity = device.identity();
        DeviceInfo {
            configuration_url: format!(
                "{}/hui/hui.html#app=spaces&view=STATUS&obj={}&tab=idStatusPanel",
                controller.base_url(),
                path
            ),
            identifiers: vec![device.id().to_string()],
            connections: Vec::new(),
            manufacturer: identity.manufacturer.clone(),
            model: identity.model.clone(),
            name: format!("{} on {}", device.name(), controller.name()),
            sw_version: identity.firmware_version.clone(),
            via_device: Some(controller.identity().serial_number),
        }
    }

    /// Connectivity sensor for devices with a `CommunicationStatus` point,
    /// attached to the controller.
    pub fn communication_sensor(
        &self,
        controller: &Controller,
        device: &Device,
    ) -> Result<Option<DiscoveryMessage>> {
        if !device.has_point("CommunicationStatus") {
            return Ok(None);
        }

        let object_id = format!("{}_comm", Self::object_id(controller, device));
        let config = BinarySensorConfig {
            device: Self::controller_info(controller),
            device_class: "connectivity".to_string(),
            entity_category: Some("diagnostic".to_string()),
            name: format!("{} Comm Status", device.name()),
            unique_id: object_id.clone(),
            state_topic: self
                .topics
                .point(controller.name(), device.name(), "CommunicationStatus"),
            payload_on: "True".to_string(),
            payload_off: "False".to_string(),
        };

        Ok(Some(DiscoveryMessage {
            topic: self.config_topic("binary_sensor", controller, &object_id),
            payload: serde_json::to_string(&config)?,
        }))
    }

    /// Occupancy sensor for devices with an `OccupancyStatus` point.
    pub fn occupancy_sensor(
        &self,
        controller: &Controller,
        device: &Device,
    ) -> Result<Option<DiscoveryMessage>> {
        if !device.has_point("OccupancyStatus") {
            return Ok(None);
        }

        let object_id = format!("{}_occ", Self::object_id(controller, device));
        let config = BinarySensorConfig {
            device: Self::device_info(controller, device),
            device_class: "occupancy".to_string(),
            entity_category: None,
            name: format!("{} Occupancy", device.name()),
            unique_id: object_id.clone(),
            state_topic: self
                .topics
                .point(controller.name(), device.name(), "OccupancyStatus"),
            payload_on: "True".to_string(),
            payload_off: "False".to_string(),
        };

        Ok(Some(DiscoveryMessage {
            topic: self.config_topic("binary_sensor", controller, &object_id),
            payload: serde_json::to_string(&config)?,
        }))
    }

    /// Climate entity reading every field from the device's climate topic.
    pub fn climate(
        &self,
        controller: &Controller,
        device: &Device,
        state: &ClimateState,
    ) -> Result<DiscoveryMessage> {
        let object_id = Self::object_id(controller, device);
        let topic = self.topics.climate(controller.name(), device.name());
        let ignored = self.topics.ignored();

        let config = ClimateConfig {
            device: Self::device_info(controller, device),
            name: format!("{} ({})", device.name(), controller.name()),
            unique_id: object_id.clone(),
            action_topic: topic.clone(),
            action_template: "{{value_json.action}}".to_string(),
            current_temperature_topic: topic.clone(),
            current_temperature_template: "{{value_json.temp}}".to_string(),
            fan_mode_state_topic: topic.clone(),
            fan_mode_state_template: "{{value_json.fan}}".to_string(),
            fan_modes: vec!["off".to_string(), "on".to_string()],
            mode_state_topic: topic.clone(),
            mode_state_template: "{{value_json.mode}}".to_string(),
            // Every label a decoded mode code can take, after heating variants collapse.
            modes: ["off", "heat", "cool", "auto"].map(String::from).to_vec(),
            temperature_state_topic: topic,
            temperature_state_template: "{{value_json.set}}".to_string(),
            initial: state.set,
            precision: 0.1,
            temp_step: 0.5,
            fan_mode_command_topic: ignored.clone(),
            mode_command_topic: ignored.clone(),
            temperature_command_topic: ignored,
        };

        Ok(DiscoveryMessage {
            topic: self.config_topic("climate", controller, &object_id),
            payload: serde_json::to_string(&config)?,
        })
    }
}
