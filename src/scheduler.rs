//! Discovery passes and poll cycles: refresh, publish changed points, publish climate sets.

use crate::climate::ClimateSet;
use crate::config::Config;
use crate::controller::{Controller, Device, DeviceSnapshot, PollLimits};
use crate::error::Result;
use crate::publish::discovery::DiscoveryMessage;
use crate::publish::{HaDiscovery, Publisher, Topics};
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub poll_interval: Duration,
    pub limits: PollLimits,
    pub topics: Topics,
    /// Home Assistant discovery; `None` disables it.
    pub discovery: Option<HaDiscovery>,
    pub discover_devices: bool,
    pub discover_spaces: bool,
    /// Cycles between full discovery passes; `0` disables them.
    pub rediscover_interval: u32,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        let topics = Topics::new(&config.mqtt.base_topic);
        Self {
            poll_interval: config.bridge.poll_interval(),
            limits: config.bridge.poll_limits(),
            discovery: config
                .bridge
                .ha_discovery
                .then(|| HaDiscovery::new(&config.bridge.ha_discovery_prefix, topics.clone())),
            topics,
            discover_devices: config.bridge.discover_devices,
            discover_spaces: config.bridge.discover_spaces,
            rediscover_interval: config.bridge.rediscover_interval,
        }
    }
}

/// Counts for one completed cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub points_read: usize,
    pub points_published: usize,
    pub climate_published: usize,
}

pub struct PollScheduler {
    controllers: Vec<Arc<Controller>>,
    publisher: Arc<dyn Publisher>,
    settings: SchedulerSettings,
    /// End of the previous cycle. `None` before the first.
    last_poll: Option<DateTime<Utc>>,
    /// Controllers (by index) that could not be identified on the last attempt.
    unreachable: HashSet<usize>,
    discovered: bool,
    cycles_since_discovery: u32,
    /// Devices whose status sensors have been announced.
    sensors_announced: HashSet<String>,
    /// Devices whose climate config has been announced.
    climate_announced: HashSet<String>,
}

impl PollScheduler {
    pub fn new(
        controllers: Vec<Arc<Controller>>,
        publisher: Arc<dyn Publisher>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            controllers,
            publisher,
            settings,
            last_poll: None,
            unreachable: HashSet::new(),
            discovered: false,
            cycles_since_discovery: 0,
            sensors_announced: HashSet::new(),
            climate_announced: HashSet::new(),
        }
    }

    pub fn last_poll(&self) -> Option<DateTime<Utc>> {
        self.last_poll
    }

    /// Controllers whose identity could not be read on the last attempt.
    pub fn unreachable(&self) -> usize {
        self.unreachable.len()
    }

    /// Full discovery pass over every controller.
    pub async fn discover(&mut self) {
        for (index, controller) in self.controllers.clone().iter().enumerate() {
            self.discover_controller(index, controller).await;
        }
        self.discovered = true;
        self.cycles_since_discovery = 0;
    }

    /// Discovery due before the next cycle: a full pass when none has run yet
    /// or the interval has elapsed, otherwise only unreachable controllers.
    pub async fn rediscover(&mut self) {
        let interval = self.settings.rediscover_interval;
        if !self.discovered || (interval > 0 && self.cycles_since_discovery >= interval) {
            info!("[Discovery] Starting discovery pass on {} controllers", self.controllers.len());
            self.discover().await;
            return;
        }

        let mut pending: Vec<usize> = self.unreachable.iter().copied().collect();
        pending.sort_unstable();
        for index in pending {
            let controller = self.controllers[index].clone();
            info!("[Discovery] Retrying unreachable controller {}", controller.name());
            self.discover_controller(index, &controller).await;
        }
    }

    /// Identify one controller, then import devices and spaces as enabled.
    /// Registration is idempotent, so repeated passes only add what is new.
    async fn discover_controller(&mut self, index: usize, controller: &Controller) {
        if controller.discover_about().await {
            self.unreachable.remove(&index);
        } else {
            self.unreachable.insert(index);
        }
        if self.settings.discover_devices {
            let added = controller.discover_devices().await;
            info!("[Discovery] Registered {} devices on {}", added, controller.name());
        }
        if self.settings.discover_spaces {
            let added = controller.discover_spaces().await;
            info!("[Discovery] Registered {} spaces on {}", added, controller.name());
        }
    }

    /// Run one poll cycle.
    ///
    /// Only publish errors abort the cycle; controller failures degrade points.
    pub async fn run_cycle(&mut self) -> Result<CycleSummary> {
        let mut summary = CycleSummary::default();
        let mut polled: Vec<(Arc<Controller>, Arc<Device>, DeviceSnapshot)> = Vec::new();

        for controller in &self.controllers {
            info!("[Poll] Poll request started on {}", controller.name());
            let result = controller.poll(self.settings.limits).await;
            summary.points_read += result.points_read;
            info!(
                "[Poll] Polling finished on {} ({} of {} points read on {} devices), now exporting to MQTT",
                controller.name(),
                result.points_read,
                result.points,
                result.devices
            );

            for device in controller.devices() {
                let snapshot = device.snapshot();
                summary.points_published += self.publish_points(controller, &snapshot).await?;
                polled.push((controller.clone(), device, snapshot));
            }
        }

        if let Some(discovery) = &self.settings.discovery {
            for (controller, device, _) in &polled {
                if self.sensors_announced.contains(device.id()) {
                    continue;
                }
                info!(
                    "[MQTT] Announcing status sensors for {} ({})",
                    device.name(),
                    controller.name()
                );
                if let Some(message) = discovery.communication_sensor(controller, device)? {
                    self.publish_retained(message).await?;
                }
                if let Some(message) = discovery.occupancy_sensor(controller, device)? {
                    self.publish_retained(message).await?;
                }
                self.sensors_announced.insert(device.id().to_string());
            }
        }

        for (controller, device, snapshot) in &polled {
            if self.publish_climate(controller, device, snapshot).await? {
                summary.climate_published += 1;
            }
        }

        self.last_poll = Some(Utc::now());
        self.cycles_since_discovery = self.cycles_since_discovery.saturating_add(1);
        Ok(summary)
    }

    async fn publish_points(&self, controller: &Controller, snapshot: &DeviceSnapshot) -> Result<usize> {
        let mut published = 0;
        for reading in snapshot.changed_since(self.last_poll) {
            let Some(value) = &reading.value else {
                continue;
            };
            let topic = self
                .settings
                .topics
                .point(controller.name(), &snapshot.device_name, &reading.name);
            self.publisher.publish(&topic, value.to_string(), false).await?;
            published += 1;
        }
        Ok(published)
    }

    /// Publish the device's climate state if it has an evaluable climate set.
    async fn publish_climate(
        &mut self,
        controller: &Controller,
        device: &Device,
        snapshot: &DeviceSnapshot,
    ) -> Result<bool> {
        let Some(set) = ClimateSet::for_device(device) else {
            return Ok(false);
        };
        let Some(state) = set.evaluate(snapshot) else {
            debug!(
                "[Climate] {} on {} has no evaluable climate state this cycle",
                device.name(),
                controller.name()
            );
            return Ok(false);
        };

        if let Some(discovery) = &self.settings.discovery
            && !self.climate_announced.contains(device.id())
        {
            let message = discovery.climate(controller, device, &state)?;
            self.publish_retained(message).await?;
            self.climate_announced.insert(device.id().to_string());
        }

        let topic = self.settings.topics.climate(controller.name(), device.name());
        self.publisher
            .publish(&topic, serde_json::to_string(&state)?, false)
            .await?;
        Ok(true)
    }

    async fn publish_retained(&self, message: DiscoveryMessage) -> Result<()> {
        self.publisher.publish(&message.topic, message.payload, true).await
    }

    /// Cycle until `shutdown` is cancelled, sleeping the poll interval between cycles.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        loop {
            if shutdown.is_cancelled() {
                break;
            }

            self.rediscover().await;
            let summary = self.run_cycle().await?;
            debug!("[Poll] Cycle complete: {:?}", summary);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }

        info!("[Poll] Scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::session::tests::FakeTransport;
    use crate::publish::tests::RecordingPublisher;

    const BASE: &str = "https://sc";

    fn attributes(keys: &[&str]) -> String {
        let objs: String = keys
            .iter()
            .map(|key| {
                format!(
                    r#"<obj><str name="key" val="{key}"/><ref name="attributeReference" href="/evox/rtu/1/a/{key}"/></obj>"#
                )
            })
            .collect();
        format!("<list>{objs}</list>")
    }

    fn value(transport: &FakeTransport, point: &str, raw: &str) {
        transport.set(
            &format!("{BASE}/evox/rtu/1/a/{point}/value"),
            &format!(r#"<real val="{raw}"/>"#),
        );
    }

    /// Serve RTU-1 with its points, then the controller identity.
    fn serve(transport: &FakeTransport) {
        transport.set(
            &format!("{BASE}/evox/equipment/installedSummary"),
            r#"<list><obj><uri name="equipmentUri" val="/equipment/rtu/1"/><str name="displayName" val="RTU-1"/><str name="equipmentFamily" val="Rooftop Unit"/></obj></list>"#,
        );
        transport.set(
            &format!("{BASE}/evox/equipment/rtu/1/attributes"),
            &attributes(&[
                "CoolingCapacityStatus",
                "HeatingCapacityPrimary",
                "SpaceTempActive",
                "SpaceTempSetpointActive",
                "CommunicationStatus",
                "OccupancyStatus",
            ]),
        );
        value(transport, "CoolingCapacityStatus", "0");
        value(transport, "HeatingCapacityPrimary", "60");
        value(transport, "SpaceTempActive", "6.8e+01");
        value(transport, "SpaceTempSetpointActive", "7.2e+01");
        value(transport, "CommunicationStatus", "3");
        value(transport, "OccupancyStatus", "1");
        transport.set(
            &format!("{BASE}/evox/about"),
            r#"<obj><str name="serverName" val="SC-East"/><str name="productVersion" val="5.2"/><str name="hardwareSerialNumber" val="E123"/></obj>"#,
        );
    }

    fn transport() -> Arc<FakeTransport> {
        let transport = FakeTransport::default();
        serve(&transport);
        Arc::new(transport)
    }

    fn settings(discovery: bool) -> SchedulerSettings {
        let topics = Topics::new("tracer");
        SchedulerSettings {
            poll_interval: Duration::from_millis(10),
            limits: PollLimits::default(),
            discovery: discovery.then(|| HaDiscovery::new("homeassistant", topics.clone())),
            topics,
            discover_devices: true,
            discover_spaces: false,
            rediscover_interval: 0,
        }
    }

    async fn scheduler(
        transport: Arc<FakeTransport>,
        discovery: bool,
    ) -> (PollScheduler, Arc<RecordingPublisher>) {
        let controller = Arc::new(Controller::new("Main Building", "sc", transport));
        let publisher = Arc::new(RecordingPublisher::default());
        let mut scheduler = PollScheduler::new(vec![controller], publisher.clone(), settings(discovery));
        scheduler.discover().await;
        (scheduler, publisher)
    }

    fn topics(messages: &[(String, String, bool)]) -> Vec<&str> {
        messages.iter().map(|(t, _, _)| t.as_str()).collect()
    }

    #[tokio::test]
    async fn test_first_cycle_publishes_every_read_point_and_climate() {
        let (mut scheduler, publisher) = scheduler(transport(), false).await;

        let summary = scheduler.run_cycle().await.unwrap();
        assert_eq!(summary.points_read, 6);
        assert_eq!(summary.points_published, 6);
        assert_eq!(summary.climate_published, 1);

        let messages = publisher.take();
        assert_eq!(
            topics(&messages),
            [
                "tracer/get/main_building/rtu_1/coolingcapacitystatus",
                "tracer/get/main_building/rtu_1/heatingcapacityprimary",
                "tracer/get/main_building/rtu_1/spacetempactive",
                "tracer/get/main_building/rtu_1/spacetempsetpointactive",
                "tracer/get/main_building/rtu_1/communicationstatus",
                "tracer/get/main_building/rtu_1/occupancystatus",
                "tracer/climate/main_building/rtu_1",
            ]
        );
        assert_eq!(messages[2].1, "68.0");
        assert_eq!(messages[4].1, "True");
        assert!(messages.iter().all(|(_, _, retain)| !retain));

        let climate: serde_json::Value = serde_json::from_str(&messages[6].1).unwrap();
        assert_eq!(
            climate,
            serde_json::json!({"action": "heating", "temp": 68.0, "fan": "on", "mode": "heat", "set": 72.0})
        );
    }

    #[tokio::test]
    async fn test_failed_points_are_not_republished() {
        let transport = transport();
        let (mut scheduler, publisher) = scheduler(transport.clone(), false).await;
        scheduler.run_cycle().await.unwrap();
        publisher.take();

        transport.remove(&format!("{BASE}/evox/rtu/1/a/HeatingCapacityPrimary/value"));
        transport.remove(&format!("{BASE}/evox/rtu/1/a/OccupancyStatus/value"));

        let summary = scheduler.run_cycle().await.unwrap();
        assert_eq!(summary.points_read, 4);
        assert_eq!(summary.points_published, 4);

        let messages = publisher.take();
        let published = topics(&messages);
        assert!(!published.contains(&"tracer/get/main_building/rtu_1/heatingcapacityprimary"));
        assert!(!published.contains(&"tracer/get/main_building/rtu_1/occupancystatus"));
        // The last good values still evaluate, so the climate set is republished.
        assert_eq!(published.last(), Some(&"tracer/climate/main_building/rtu_1"));
    }

    #[tokio::test]
    async fn test_climate_is_republished_every_cycle() {
        let (mut scheduler, publisher) = scheduler(transport(), false).await;
        for _ in 0..3 {
            let summary = scheduler.run_cycle().await.unwrap();
            assert_eq!(summary.climate_published, 1);
        }
        let climate = publisher
            .messages()
            .iter()
            .filter(|(t, _, _)| t == "tracer/climate/main_building/rtu_1")
            .count();
        assert_eq!(climate, 3);
    }

    #[tokio::test]
    async fn test_discovery_configs_are_announced_once() {
        let (mut scheduler, publisher) = scheduler(transport(), true).await;

        scheduler.run_cycle().await.unwrap();
        let first = publisher.take();
        let retained: Vec<_> = first
            .iter()
            .filter(|(_, _, retain)| *retain)
            .map(|(t, _, _)| t.as_str())
            .collect();
        assert_eq!(
            retained,
            [
                "homeassistant/binary_sensor/main_building/main_building_rtu_1_comm/config",
                "homeassistant/binary_sensor/main_building/main_building_rtu_1_occ/config",
                "homeassistant/climate/main_building/main_building_rtu_1/config",
            ]
        );

        scheduler.run_cycle().await.unwrap();
        let second = publisher.take();
        assert!(second.iter().all(|(_, _, retain)| !retain));
        assert_eq!(topics(&second).last(), Some(&"tracer/climate/main_building/rtu_1"));
    }

    #[tokio::test]
    async fn test_unreachable_controller_publishes_nothing() {
        let controller = Arc::new(Controller::new(
            "Main Building",
            "sc",
            Arc::new(FakeTransport::default()),
        ));
        let publisher = Arc::new(RecordingPublisher::default());
        let mut scheduler = PollScheduler::new(vec![controller], publisher.clone(), settings(true));
        scheduler.discover().await;
        assert_eq!(scheduler.unreachable(), 1);

        let summary = scheduler.run_cycle().await.unwrap();
        assert_eq!(summary, CycleSummary::default());
        assert!(publisher.messages().is_empty());
        assert!(scheduler.last_poll().is_some());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancellation() {
        let (scheduler, publisher) = scheduler(transport(), false).await;
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        handle.await.unwrap().unwrap();
        assert!(!publisher.messages().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_controller_is_retried_next_cycle() {
        let transport = Arc::new(FakeTransport::default());
        let controller = Arc::new(Controller::new("Main Building", "sc", transport.clone()));
        let publisher = Arc::new(RecordingPublisher::default());
        let mut scheduler =
            PollScheduler::new(vec![controller.clone()], publisher.clone(), settings(true));

        scheduler.discover().await;
        assert_eq!(scheduler.unreachable(), 1);
        scheduler.run_cycle().await.unwrap();
        assert!(publisher.messages().is_empty());

        serve(&transport);
        scheduler.rediscover().await;
        assert_eq!(scheduler.unreachable(), 0);
        assert_eq!(controller.identity().server_name, "SC-East");
        assert_eq!(controller.devices().len(), 1);

        let summary = scheduler.run_cycle().await.unwrap();
        assert_eq!(summary.points_published, 6);
        assert_eq!(summary.climate_published, 1);
        let retained = publisher
            .messages()
            .iter()
            .filter(|(_, _, retain)| *retain)
            .count();
        assert_eq!(retained, 3);
    }

    #[tokio::test]
    async fn test_periodic_rediscovery_registers_late_devices() {
        let transport = transport();
        transport.remove(&format!("{BASE}/evox/equipment/rtu/1/attributes"));
        let controller = Arc::new(Controller::new("Main Building", "sc", transport.clone()));
        let publisher = Arc::new(RecordingPublisher::default());
        let mut scheduler = PollScheduler::new(
            vec![controller.clone()],
            publisher.clone(),
            SchedulerSettings {
                rediscover_interval: 2,
                ..settings(true)
            },
        );

        scheduler.rediscover().await;
        assert_eq!(scheduler.unreachable(), 0);
        assert!(controller.devices().is_empty());
        scheduler.run_cycle().await.unwrap();

        serve(&transport);
        // One cycle since the last pass: the controller is reachable, so nothing is due.
        scheduler.rediscover().await;
        assert!(controller.devices().is_empty());
        scheduler.run_cycle().await.unwrap();
        assert!(publisher.messages().is_empty());

        scheduler.rediscover().await;
        assert_eq!(controller.devices().len(), 1);

        let summary = scheduler.run_cycle().await.unwrap();
        assert_eq!(summary.points_published, 6);
        let messages = publisher.take();
        let retained: Vec<_> = messages
            .iter()
            .filter(|(_, _, retain)| *retain)
            .map(|(t, _, _)| t.as_str())
            .collect();
        assert_eq!(
            retained,
            [
                "homeassistant/binary_sensor/main_building/main_building_rtu_1_comm/config",
                "homeassistant/binary_sensor/main_building/main_building_rtu_1_occ/config",
                "homeassistant/climate/main_building/main_building_rtu_1/config",
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_spawned_run_picks_up_controller_coming_online() {
        let transport = Arc::new(FakeTransport::default());
        let controller = Arc::new(Controller::new("Main Building", "sc", transport.clone()));
        let publisher = Arc::new(RecordingPublisher::default());
        let scheduler = PollScheduler::new(vec![controller.clone()], publisher.clone(), settings(false));

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(controller.devices().is_empty());
        serve(&transport);

        let climate = "tracer/climate/main_building/rtu_1";
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !publisher.messages().iter().any(|(t, _, _)| t == climate) {
            assert!(tokio::time::Instant::now() < deadline, "controller was never picked up");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(controller.identity().server_name, "SC-East");
        assert!(
            publisher
                .messages()
                .iter()
                .any(|(t, p, _)| t == "tracer/get/main_building/rtu_1/spacetempactive" && p == "68.0")
        );
    }
}
