//! Points: named telemetry values on a device.

use super::transport::XmlTransport;
use super::value::{PointType, TypedValue, normalize};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, warn};
use parking_lot::RwLock;

/// Mutable state of a point. Always replaced as a whole under the point's lock.
#[derive(Debug, Clone, Default)]
pub struct PointState {
    pub value: String,
    pub kind: PointType,
    pub available: bool,
    pub last_updated: Option<DateTime<Utc>>,
}

/// One named point on a device.
#[derive(Debug)]
pub struct Point {
    name: String,
    url: String,
    state: RwLock<PointState>,
}

/// Copy of a point's state taken for one poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct PointReading {
    pub name: String,
    /// `None` until the first successful read.
    pub value: Option<TypedValue>,
    pub available: bool,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Point {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            state: RwLock::new(PointState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> PointState {
        self.state.read().clone()
    }

    pub fn is_available(&self) -> bool {
        self.state.read().available
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.state.read().last_updated
    }

    /// Typed projection of the current value, if one has ever been read.
    pub fn valid_value(&self) -> Option<TypedValue> {
        let state = self.state.read();
        state
            .last_updated
            .map(|_| TypedValue::project(&state.value, state.kind))
    }

    pub fn reading(&self) -> PointReading {
        let state = self.state.read();
        PointReading {
            name: self.name.clone(),
            value: state
                .last_updated
                .map(|_| TypedValue::project(&state.value, state.kind)),
            available: state.available,
            last_updated: state.last_updated,
        }
    }

    /// Store a freshly read raw value.
    ///
    /// The timestamp is kept strictly increasing even if the wall clock steps back.
    pub fn update_value(&self, raw: &str, hint: PointType) {
        let normalized = normalize(&self.name, raw, hint);
        let mut state = self.state.write();

        let mut now = Utc::now();
        if let Some(previous) = state.last_updated
            && now <= previous
        {
            now = previous + ChronoDuration::microseconds(1);
        }

        *state = PointState {
            value: normalized.value,
            kind: normalized.kind,
            available: true,
            last_updated: Some(now),
        };
    }

    /// Record a failed read. Value and timestamp are left untouched.
    pub fn mark_unavailable(&self) {
        self.state.write().available = false;
    }

    /// Query the point's current value from the controller.
    ///
    /// Returns whether a value was stored.
    pub async fn refresh(&self, transport: &dyn XmlTransport) -> bool {
        let value_url = format!("{}/value", self.url);
        match transport.get_value(&value_url).await {
            Ok(Some(raw)) => {
                self.update_value(&raw, PointType::String);
                debug!("[Poll] {} = {}", self.name, raw);
                true
            }
            Ok(None) => {
                warn!(
                    "[Poll] Unable to poll value of point {} ({}): response has no value",
                    self.name, self.url
                );
                self.mark_unavailable();
                false
            }
            Err(e) => {
                warn!(
                    "[Poll] Unable to poll value of point {} ({}): {}",
                    self.name, self.url, e
                );
                self.mark_unavailable();
                false
            }
        }
    }
}
