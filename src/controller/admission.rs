//! Point admission filter.
//!
//! Decides which discovered attributes become registered points. A
//! controller-specific attribute whose name matches none of the inclusion
//! fragments is never registered, so that telemetry channel stays invisible
//! for the device. Extend [`INCLUDED_FRAGMENTS`] when a site uses naming this
//! list does not cover.

/// Lowercase fragments; a point is included when its lowercased name contains one.
pub const INCLUDED_FRAGMENTS: &[&str] = &[
    "communication",
    "humidity",
    "temp",
    "air",
    "pressure",
    "speed",
    "startstop",
    "capacity",
    "heatcoolmode",
    "occupancy",
    "occupied",
    "setpoint",
    "fan",
    "command",
];

/// Exact, case-sensitive names that are never admitted.
pub const EXCLUDED_NAMES: &[&str] = &[
    "LowTemperatureAlarm",
    "DiagOutdoorAirTempSourceFailure",
    "DiagSpaceTempSourceFailure",
    "SupplyFanFailureReset",
    "SupplyFanFailure",
];

/// Whether a point with this name should be registered.
///
/// Exclusion is checked first and wins over any inclusion match.
pub fn is_admitted(name: &str) -> bool {
    if EXCLUDED_NAMES.contains(&name) {
        return false;
    }

    let lowered = name.to_lowercase();
    INCLUDED_FRAGMENTS
        .iter()
        .any(|fragment| lowered.contains(fragment))
}
