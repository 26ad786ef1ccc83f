//! Decides whether an update request reaches upstream, and serializes
//! concurrent updates of the same location.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{Credentials, RuntimeConfig};
use crate::error::FeedError;
use crate::feeds::owm;
use crate::location::Coordinates;
use crate::model::{ForecastSet, Units};
use crate::providers::{FeedFetcher, openweathermap};
use crate::registry::LocationRegistry;

pub const MISSING_COORDINATES: &str = "Latitude and Longitude or a valid location are required";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdatePolicy {
    pub interval_secs: u64,
    pub upstream_ttl_secs: u64,
}

impl UpdatePolicy {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            interval_secs: config.update_interval_secs,
            upstream_ttl_secs: config.upstream_ttl_secs,
        }
    }

    fn fresh_for_secs(self) -> u64 {
        self.upstream_ttl_secs.max(self.interval_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpdateOutcome {
    Updated,
    /// Checked less than one interval ago.
    NotDue,
    /// Data is newer than the upstream refresh period.
    Fresh,
    Disallowed,
    Failed,
    /// Units or coordinates changed while the fetch was in flight.
    Superseded,
    UnknownLocation,
}

impl UpdateOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateOutcome::Updated => "updated",
            UpdateOutcome::NotDue => "not_due",
            UpdateOutcome::Fresh => "fresh",
            UpdateOutcome::Disallowed => "disallowed",
            UpdateOutcome::Failed => "failed",
            UpdateOutcome::Superseded => "superseded",
            UpdateOutcome::UnknownLocation => "unknown_location",
        }
    }
}

/// `true` once a full interval has passed since `last`, or when there was
/// no previous check at all.
pub fn interval_elapsed(last: Option<DateTime<Utc>>, now: DateTime<Utc>, interval_secs: u64) -> bool {
    match last {
        None => true,
        Some(last) => {
            let elapsed = now.signed_duration_since(last).num_seconds();
            elapsed < 0 || elapsed as u64 >= interval_secs
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct FetchPlan {
    coordinates: Coordinates,
    units: Units,
}

pub struct WeatherService<F> {
    registry: Mutex<LocationRegistry>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    fetcher: F,
    credentials: Credentials,
    policy: UpdatePolicy,
}

impl<F: FeedFetcher> WeatherService<F> {
    pub fn new(
        registry: LocationRegistry,
        fetcher: F,
        credentials: Credentials,
        policy: UpdatePolicy,
    ) -> Self {
        Self {
            registry: Mutex::new(registry),
            locks: Mutex::new(HashMap::new()),
            fetcher,
            credentials,
            policy,
        }
    }

    pub fn registry(&self) -> MutexGuard<'_, LocationRegistry> {
        self.registry.lock()
    }

    pub fn into_registry(self) -> LocationRegistry {
        self.registry.into_inner()
    }

    fn location_lock(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    /// Runs the governed update for one location. Failures land in the
    /// location's error slot; prior data is kept.
    pub fn update(&self, id: &str, now: DateTime<Utc>) -> UpdateOutcome {
        let outcome = {
            let lock = self.location_lock(id);
            let _serialized = lock.lock();
            self.update_locked(id, now)
        };
        self.locks.lock().retain(|_, lock| Arc::strong_count(lock) > 1);
        outcome
    }

    fn update_locked(&self, id: &str, now: DateTime<Utc>) -> UpdateOutcome {
        let plan = match self.admit(id, now) {
            Ok(plan) => plan,
            Err(outcome) => return outcome,
        };

        let result = self.fetch(&plan).map(|mut set| {
            set.fetched_at = Some(now);
            set
        });
        self.commit(id, &plan, now, result)
    }

    /// Gate steps run under the registry lock; the lock is released before
    /// any fetch.
    fn admit(&self, id: &str, now: DateTime<Utc>) -> Result<FetchPlan, UpdateOutcome> {
        let mut registry = self.registry.lock();
        let Some(location) = registry.get_mut(id) else {
            return Err(UpdateOutcome::UnknownLocation);
        };

        if !interval_elapsed(location.last_checked, now, self.policy.interval_secs) {
            debug!(location = id, "update skipped: checked within interval");
            return Err(UpdateOutcome::NotDue);
        }
        location.last_checked = Some(now);
        location.error = None;

        if self.credentials.has_user_key() {
            location.updates_disallowed = false;
        }
        if location.updates_disallowed {
            debug!(location = id, "update skipped: updates disallowed");
            return Err(UpdateOutcome::Disallowed);
        }

        let Some(coordinates) = location.coordinates() else {
            warn!(location = id, "update rejected: no coordinates");
            location.error = Some(MISSING_COORDINATES.to_string());
            return Err(UpdateOutcome::Failed);
        };

        if !interval_elapsed(location.last_updated, now, self.policy.fresh_for_secs()) {
            debug!(location = id, "update skipped: data still fresh");
            return Err(UpdateOutcome::Fresh);
        }

        Ok(FetchPlan {
            coordinates,
            units: location.units(),
        })
    }

    fn fetch(&self, plan: &FetchPlan) -> Result<ForecastSet, FeedError> {
        let key = self
            .credentials
            .effective_key()
            .ok_or_else(|| FeedError::Configuration("an API key is required".to_string()))?;
        let url = openweathermap::onecall_url(plan.coordinates, plan.units, key)?;
        let document = self.fetcher.fetch(&url)?;
        owm::parse(&document, plan.units)
    }

    /// A result fetched for units or coordinates the location no longer has
    /// is dropped, leaving the location due for a refetch.
    fn commit(
        &self,
        id: &str,
        plan: &FetchPlan,
        now: DateTime<Utc>,
        result: Result<ForecastSet, FeedError>,
    ) -> UpdateOutcome {
        let mut registry = self.registry.lock();
        let Some(location) = registry.get_mut(id) else {
            return UpdateOutcome::UnknownLocation;
        };

        let current = location.coordinates().map(|coordinates| FetchPlan {
            coordinates,
            units: location.units(),
        });
        if current.as_ref() != Some(plan) {
            debug!(location = id, "fetch result dropped: location changed during fetch");
            return UpdateOutcome::Superseded;
        }

        match result {
            Ok(set) => {
                info!(location = id, periods = set.forecasts.len(), "forecast refreshed");
                location.forecast = Some(set);
                location.last_updated = Some(now);
                location.error = None;
                if !self.credentials.has_user_key() && !self.credentials.testing {
                    location.updates_disallowed = true;
                }
                UpdateOutcome::Updated
            }
            Err(error) => {
                warn!(location = id, %error, "forecast update failed");
                location.error = Some(format!("update failed: {error}"));
                UpdateOutcome::Failed
            }
        }
    }

    /// Updates every location in name order once the oldest check is a full
    /// interval old. Returns whether any location was refreshed.
    pub fn update_all(&self, now: DateTime<Utc>) -> bool {
        let ids = {
            let registry = self.registry.lock();
            let oldest = registry.oldest_check();
            if oldest.is_some() && !interval_elapsed(oldest, now, self.policy.interval_secs) {
                debug!("update_all skipped: every location checked within interval");
                return false;
            }
            registry.sorted_ids()
        };

        let mut any_updated = false;
        for id in ids {
            if self.update(&id, now) == UpdateOutcome::Updated {
                any_updated = true;
            }
        }
        any_updated
    }
}
