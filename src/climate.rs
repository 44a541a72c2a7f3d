//! Climate set synthesis.
//!
//! Devices expose heating/cooling state through several naming conventions.
//! A [`ClimateSet`] records, per logical field, which point backs it or
//! whether it is derived from the other fields. Evaluating a set against a
//! [`DeviceSnapshot`] yields the [`ClimateState`] that is published.
//!
//! Derived fields depend on each other: derived capacities need the setpoint,
//! a derived setpoint needs the mode, and a derived mode needs the
//! capacities. [`ClimateSet::resolve`] never produces a set where all three
//! are derived, so evaluation always has a starting point:
//!
//! - setpoint read from a point: setpoint → capacities → mode
//! - setpoint derived, mode read from a point: mode → setpoint → capacities
//! - setpoint and mode derived: capacities (read from points) → mode → setpoint

use crate::controller::{Device, DeviceSnapshot, TypedValue};
use log::debug;
use serde::Serialize;
use strum::Display;

/// Point names the synthesizer recognises.
pub mod points {
    pub const COOLING_CAPACITY: &str = "CoolingCapacityStatus";
    pub const HEATING_CAPACITY: &str = "HeatingCapacityPrimary";
    pub const ACTIVE_TEMPERATURE: &str = "SpaceTempActive";
    pub const MODE_STATUS: &str = "HeatCoolModeStatus";
    pub const MODE_REQUEST: &str = "HeatCoolModeRequest";
    pub const ACTIVE_SETPOINT: &str = "SpaceTempSetpointActive";
    pub const BAS_SETPOINT: &str = "SpaceTempSetpointBAS";
    pub const OCCUPIED_HEAT_SETPOINT: &str = "OccupiedHeatSetpoint";
    pub const OCCUPIED_COOL_SETPOINT: &str = "OccupiedCoolSetpoint";
    pub const UNOCCUPIED_HEAT_SETPOINT: &str = "UnoccupiedHeatSetpoint";
    pub const UNOCCUPIED_COOL_SETPOINT: &str = "UnoccupiedCoolSetpoint";
    pub const OCCUPANCY: &str = "OccupancyStatus";
    pub const SUPPLY_FAN_SPEED: &str = "SupplyFanSpeed";

    pub const OCCUPANCY_SETPOINTS: [&str; 4] = [
        OCCUPIED_HEAT_SETPOINT,
        OCCUPIED_COOL_SETPOINT,
        UNOCCUPIED_HEAT_SETPOINT,
        UNOCCUPIED_COOL_SETPOINT,
    ];
}

use points::*;

/// Where a climate field's value comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSource {
    /// Read from the named point.
    Direct(String),
    /// Computed from the other fields.
    Derived,
    /// No value; the field's fallback rule applies.
    Absent,
}

impl FieldSource {
    fn direct(name: &str) -> Self {
        FieldSource::Direct(name.to_string())
    }

    pub fn is_derived(&self) -> bool {
        matches!(self, FieldSource::Derived)
    }
}

/// What the equipment is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Cooling,
    Heating,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FanState {
    On,
    Off,
}

/// Evaluated climate values. Serializes to the published `{action, temp, fan, mode, set}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClimateState {
    pub action: RunMode,
    pub temp: f64,
    pub fan: FanState,
    pub mode: String,
    pub set: f64,
    #[serde(skip)]
    pub cooling_capacity: f64,
    #[serde(skip)]
    pub heating_capacity: f64,
    #[serde(skip)]
    pub fan_speed: f64,
}

/// Field sources for one climate-controllable device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClimateSet {
    pub mode: FieldSource,
    pub cooling_capacity: FieldSource,
    pub heating_capacity: FieldSource,
    pub active_temperature: String,
    pub setpoint: FieldSource,
    pub fan_speed: FieldSource,
}

impl ClimateSet {
    pub fn for_device(device: &Device) -> Option<Self> {
        Self::resolve(|name| device.has_point(name))
    }

    pub fn for_snapshot(snapshot: &DeviceSnapshot) -> Option<Self> {
        Self::resolve(|name| snapshot.has(name))
    }

    /// Pick the field sources for a device exposing the points `has` accepts.
    ///
    /// Returns `None` when the device is not climate-controllable.
    pub fn resolve(has: impl Fn(&str) -> bool) -> Option<Self> {
        if !has(ACTIVE_TEMPERATURE) {
            return None;
        }

        let occupancy_group = OCCUPANCY_SETPOINTS.iter().all(|name| has(name)) && has(OCCUPANCY);
        let explicit_capacities = has(COOLING_CAPACITY) && has(HEATING_CAPACITY);
        let bas_setpoint = has(BAS_SETPOINT) || occupancy_group;
        if !explicit_capacities && !bas_setpoint {
            return None;
        }

        let setpoint = if has(ACTIVE_SETPOINT) {
            FieldSource::direct(ACTIVE_SETPOINT)
        } else if has(BAS_SETPOINT) {
            FieldSource::direct(BAS_SETPOINT)
        } else if occupancy_group {
            FieldSource::Derived
        } else {
            return None;
        };

        let direct_or_derived = |name: &str| {
            if has(name) {
                FieldSource::direct(name)
            } else {
                FieldSource::Derived
            }
        };

        let mode = if has(MODE_STATUS) {
            FieldSource::direct(MODE_STATUS)
        } else if has(MODE_REQUEST) {
            FieldSource::direct(MODE_REQUEST)
        } else {
            FieldSource::Derived
        };

        let set = Self {
            mode,
            cooling_capacity: direct_or_derived(COOLING_CAPACITY),
            heating_capacity: direct_or_derived(HEATING_CAPACITY),
            active_temperature: ACTIVE_TEMPERATURE.to_string(),
            setpoint,
            fan_speed: if has(SUPPLY_FAN_SPEED) {
                FieldSource::direct(SUPPLY_FAN_SPEED)
            } else {
                FieldSource::Absent
            },
        };

        if set.is_circular() {
            debug!("[Climate] Rejecting climate set with no evaluable starting field");
            return None;
        }

        Some(set)
    }

    /// Setpoint, mode and at least one capacity all derived from each other.
    pub fn is_circular(&self) -> bool {
        self.setpoint.is_derived()
            && self.mode.is_derived()
            && (self.cooling_capacity.is_derived() || self.heating_capacity.is_derived())
    }

    /// Evaluate against a snapshot. `None` when a needed reading is missing
    /// or not numeric.
    pub fn evaluate(&self, snapshot: &DeviceSnapshot) -> Option<ClimateState> {
        let temp = snapshot.number(&self.active_temperature)?;
        Evaluator {
            set: self,
            snapshot,
            temp,
        }
        .run()
    }
}

#[derive(Debug, Clone, Copy)]
struct Capacities {
    cooling: f64,
    heating: f64,
}

enum CapacityKind {
    Cooling,
    Heating,
}

struct Evaluator<'a> {
    set: &'a ClimateSet,
    snapshot: &'a DeviceSnapshot,
    temp: f64,
}

impl Evaluator<'_> {
    fn run(&self) -> Option<ClimateState> {
        let (setpoint, capacities, mode) = match &self.set.setpoint {
            FieldSource::Direct(name) => {
                let setpoint = self.snapshot.number(name)?;
                let capacities = self.capacities(setpoint)?;
                let mode = self.mode(capacities)?;
                (setpoint, capacities, mode)
            }
            FieldSource::Derived => {
                let mode = match &self.set.mode {
                    FieldSource::Direct(name) => self.reported_mode(name)?,
                    _ => derive_mode(self.point_capacities()?).to_string(),
                };
                let setpoint = self.derived_setpoint(&mode)?;
                let capacities = self.capacities(setpoint)?;
                (setpoint, capacities, mode)
            }
            FieldSource::Absent => return None,
        };

        let action = if capacities.cooling > 0.0 {
            RunMode::Cooling
        } else if capacities.heating > 0.0 {
            RunMode::Heating
        } else {
            RunMode::Idle
        };

        let fan_speed = match &self.set.fan_speed {
            FieldSource::Direct(name) => self.snapshot.number(name)?,
            _ if action != RunMode::Idle => 100.0,
            _ => 0.0,
        };

        Some(ClimateState {
            action,
            temp: self.temp,
            fan: if fan_speed > 0.0 {
                FanState::On
            } else {
                FanState::Off
            },
            mode,
            set: setpoint,
            cooling_capacity: capacities.cooling,
            heating_capacity: capacities.heating,
            fan_speed,
        })
    }

    fn capacities(&self, setpoint: f64) -> Option<Capacities> {
        Some(Capacities {
            cooling: self.capacity(&self.set.cooling_capacity, setpoint, CapacityKind::Cooling)?,
            heating: self.capacity(&self.set.heating_capacity, setpoint, CapacityKind::Heating)?,
        })
    }

    fn capacity(&self, source: &FieldSource, setpoint: f64, kind: CapacityKind) -> Option<f64> {
        match source {
            FieldSource::Direct(name) => self.snapshot.number(name),
            _ => {
                let demand = match kind {
                    CapacityKind::Cooling => self.temp > setpoint,
                    CapacityKind::Heating => self.temp < setpoint,
                };
                Some(if demand { 100.0 } else { 0.0 })
            }
        }
    }

    /// Capacities that do not depend on the setpoint.
    fn point_capacities(&self) -> Option<Capacities> {
        match (&self.set.cooling_capacity, &self.set.heating_capacity) {
            (FieldSource::Direct(cooling), FieldSource::Direct(heating)) => Some(Capacities {
                cooling: self.snapshot.number(cooling)?,
                heating: self.snapshot.number(heating)?,
            }),
            _ => None,
        }
    }

    fn mode(&self, capacities: Capacities) -> Option<String> {
        match &self.set.mode {
            FieldSource::Direct(name) => self.reported_mode(name),
            _ => Some(derive_mode(capacities).to_string()),
        }
    }

    /// A mode point's value, with every heating variant collapsed to `heat`.
    fn reported_mode(&self, name: &str) -> Option<String> {
        let value = self.snapshot.value(name)?.to_string().to_lowercase();
        if value.contains("heat") {
            Some("heat".to_string())
        } else {
            Some(value)
        }
    }

    fn derived_setpoint(&self, mode: &str) -> Option<f64> {
        let occupied = self.snapshot.value(OCCUPANCY).and_then(TypedValue::as_bool)?;
        let (heat, cool) = if occupied {
            (OCCUPIED_HEAT_SETPOINT, OCCUPIED_COOL_SETPOINT)
        } else {
            (UNOCCUPIED_HEAT_SETPOINT, UNOCCUPIED_COOL_SETPOINT)
        };

        match mode {
            "heat" => self.snapshot.number(heat),
            "cool" => self.snapshot.number(cool),
            _ => Some(self.temp),
        }
    }
}

fn derive_mode(capacities: Capacities) -> &'static str {
    if capacities.heating > 0.0 {
        "heat"
    } else if capacities.cooling > 0.0 {
        "cool"
    } else {
        "off"
    }
}
