//! Devices (equipment and spaces) and their per-cycle snapshots.

use super::point::{Point, PointReading};
use super::transport::XmlTransport;
use super::value::TypedValue;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::stream;
use uuid::Uuid;

/// Manufacturer/model/firmware as reported by the device's own attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub manufacturer: String,
    pub model: String,
    pub firmware_version: String,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            manufacturer: "Trane".to_string(),
            model: "Unknown".to_string(),
            firmware_version: "0".to_string(),
        }
    }
}

/// One piece of equipment or space under a controller.
///
/// The point list is fixed once the device is registered; only point values change.
#[derive(Debug)]
pub struct Device {
    name: String,
    family: String,
    url: String,
    id: String,
    identity: DeviceIdentity,
    points: Vec<Point>,
}

impl Device {
    pub fn new(name: impl Into<String>, family: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            name: name.into(),
            family: family.into(),
            id: device_id(&url),
            url,
            identity: DeviceIdentity::default(),
            points: Vec::new(),
        }
    }

    pub fn with_identity(mut self, identity: DeviceIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_points(mut self, points: Vec<Point>) -> Self {
        self.points = points;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Stable identifier derived from the device URL.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Points in discovery order.
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn point(&self, name: &str) -> Option<&Point> {
        self.points.iter().find(|p| p.name() == name)
    }

    pub fn has_point(&self, name: &str) -> bool {
        self.point(name).is_some()
    }

    /// Refresh every point, at most `concurrency` requests in flight.
    ///
    /// Returns the number of points that were read successfully.
    pub async fn poll(&self, transport: &dyn XmlTransport, concurrency: usize) -> usize {
        let refreshes: Vec<_> = self
            .points
            .iter()
            .map(|point| point.refresh(transport))
            .collect();

        stream::iter(refreshes)
            .buffer_unordered(concurrency.max(1))
            .fold(0, |read, ok| async move { read + usize::from(ok) })
            .await
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            device_name: self.name.clone(),
            readings: self.points.iter().map(Point::reading).collect(),
        }
    }
}

/// UUIDv5 of the device URL in the URL namespace.
pub fn device_id(url: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes())
        .simple()
        .to_string()
}

/// Point readings of one device, copied once per cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    pub device_name: String,
    pub readings: Vec<PointReading>,
}

impl DeviceSnapshot {
    pub fn new(device_name: impl Into<String>, readings: Vec<PointReading>) -> Self {
        Self {
            device_name: device_name.into(),
            readings,
        }
    }

    pub fn reading(&self, name: &str) -> Option<&PointReading> {
        self.readings.iter().find(|r| r.name == name)
    }

    /// Whether the device exposes a point with this name.
    pub fn has(&self, name: &str) -> bool {
        self.reading(name).is_some()
    }

    pub fn value(&self, name: &str) -> Option<&TypedValue> {
        self.reading(name).and_then(|r| r.value.as_ref())
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.value(name).and_then(TypedValue::as_number)
    }

    /// Readings refreshed after `since`; every read point when `since` is `None`.
    pub fn changed_since(&self, since: Option<DateTime<Utc>>) -> impl Iterator<Item = &PointReading> {
        self.readings.iter().filter(move |r| match (r.last_updated, since) {
            (Some(updated), Some(since)) => updated > since,
            (Some(_), None) => true,
            (None, _) => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::value::PointType;

    fn device_with(points: &[&str]) -> Device {
        Device::new("RTU-1", "Rooftop Unit", "https://sc/evox/equipment/rtu/1").with_points(
            points
                .iter()
                .enumerate()
                .map(|(i, name)| Point::new(*name, format!("https://sc/evox/p/{i}")))
                .collect(),
        )
    }

    #[test]
    fn test_device_id_is_stable_hash_of_url() {
        let a = Device::new("A", "RTU", "https://sc/evox/equipment/1");
        let b = Device::new("B", "VAV", "https://sc/evox/equipment/1");
        let c = Device::new("A", "RTU", "https://sc/evox/equipment/2");
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert_eq!(a.id().len(), 32);
    }

    #[test]
    fn test_points_keep_discovery_order() {
        let device = device_with(&["SpaceTempActive", "CoolingCapacityStatus", "FanSpeed"]);
        let names: Vec<_> = device.points().iter().map(Point::name).collect();
        assert_eq!(names, ["SpaceTempActive", "CoolingCapacityStatus", "FanSpeed"]);
        assert!(device.has_point("FanSpeed"));
        assert!(!device.has_point("Missing"));
    }

    #[test]
    fn test_snapshot_is_detached_from_later_updates() {
        let device = device_with(&["SpaceTempActive"]);
        device.points()[0].update_value("70", PointType::String);
        let snapshot = device.snapshot();

        device.points()[0].update_value("75", PointType::String);

        assert_eq!(snapshot.number("SpaceTempActive"), Some(70.0));
        assert_eq!(device.snapshot().number("SpaceTempActive"), Some(75.0));
    }

    #[test]
    fn test_changed_since_excludes_stale_points() {
        let device = device_with(&["SpaceTempActive", "SupplyFanSpeed", "OccupancyStatus"]);
        device.points()[0].update_value("70", PointType::String);
        device.points()[1].update_value("50", PointType::String);

        let first: Vec<_> = device
            .snapshot()
            .changed_since(None)
            .map(|r| r.name.clone())
            .collect();
        assert_eq!(first, ["SpaceTempActive", "SupplyFanSpeed"]);

        let mark = Utc::now();
        std::thread::sleep(std::time::Duration::from_millis(2));
        device.points()[0].update_value("71", PointType::String);
        device.points()[1].mark_unavailable();

        let second: Vec<_> = device
            .snapshot()
            .changed_since(Some(mark))
            .map(|r| r.name.clone())
            .collect();
        assert_eq!(second, ["SpaceTempActive"]);
    }
}
