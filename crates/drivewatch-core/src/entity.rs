//! Local driver and vehicle cache
//!
//! Driver records must be usable while the link is down, so an unknown badge
//! yields a placeholder that later refreshes fill in.

use chrono::{DateTime, Utc};
use drivewatch_api::{
    Driver, DriverPayload, PLACEHOLDER_BADGE_PREFIX, PLACEHOLDER_NAME_PREFIX, Vehicle,
    VehiclePayload,
};
use drivewatch_host_api::HostResult;
use drivewatch_store::Store;
use drivewatch_util::{AgentError, AgentResult, DriverId};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a conditional refresh. All variants carry the current record.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// Cached record is fresh; nothing was fetched
    Fresh(Driver),
    /// Remote data was fetched and stored
    Refreshed { driver: Driver, changed: bool },
    /// Fetch failed; the cached record is unchanged
    NotRefreshed { driver: Driver, reason: String },
}

impl RefreshOutcome {
    pub fn driver(&self) -> &Driver {
        match self {
            RefreshOutcome::Fresh(driver)
            | RefreshOutcome::Refreshed { driver, .. }
            | RefreshOutcome::NotRefreshed { driver, .. } => driver,
        }
    }

    pub fn into_driver(self) -> Driver {
        match self {
            RefreshOutcome::Fresh(driver)
            | RefreshOutcome::Refreshed { driver, .. }
            | RefreshOutcome::NotRefreshed { driver, .. } => driver,
        }
    }
}

/// What a provisioning write did with a remote record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectiveWrite {
    Created,
    Updated,
    /// Existing record was fresh and the write was not forced
    Skipped,
}

/// Driver/vehicle cache on top of the local store
pub struct DriverRegistry {
    store: Arc<dyn Store>,
    max_age: chrono::Duration,
}

impl DriverRegistry {
    pub fn new(store: Arc<dyn Store>, max_age: std::time::Duration) -> Self {
        Self {
            store,
            max_age: chrono::Duration::from_std(max_age)
                .unwrap_or_else(|_| chrono::Duration::days(36_500)),
        }
    }

    /// Cached driver, or a freshly stored placeholder
    pub fn ensure_driver(&self, id: DriverId) -> AgentResult<Driver> {
        if let Some(driver) = self.store.get_driver(&id)? {
            return Ok(driver);
        }

        let driver = Driver::placeholder(id);
        self.store.save_driver(&driver)?;
        info!(driver_id = %id, "Unknown driver, created placeholder record");
        Ok(driver)
    }

    /// Record still carries placeholder data
    pub fn is_minimal(driver: &Driver) -> bool {
        driver.minimal
            || driver.display_name.starts_with(PLACEHOLDER_NAME_PREFIX)
            || driver.badge_hash.starts_with(PLACEHOLDER_BADGE_PREFIX)
    }

    pub fn needs_refresh(driver: &Driver, max_age: chrono::Duration, now: DateTime<Utc>) -> bool {
        if Self::is_minimal(driver) || driver.embedding.is_none() {
            return true;
        }
        match driver.last_refreshed {
            Some(at) => now - at > max_age,
            None => true,
        }
    }

    /// Refresh a driver from the central service when stale (or when forced).
    ///
    /// A failed fetch is a soft failure: the cached record is returned as
    /// [`RefreshOutcome::NotRefreshed`]. Only local persistence errors are `Err`.
    pub async fn refresh_conditionally<F, Fut>(
        &self,
        driver: Driver,
        fetch: F,
        force: bool,
        now: DateTime<Utc>,
    ) -> AgentResult<RefreshOutcome>
    where
        F: FnOnce(DriverId) -> Fut,
        Fut: Future<Output = HostResult<DriverPayload>>,
    {
        if !force && !Self::needs_refresh(&driver, self.max_age, now) {
            return Ok(RefreshOutcome::Fresh(driver));
        }

        let payload = match fetch(driver.id).await {
            Ok(payload) if payload.id == driver.id => payload,
            Ok(payload) => {
                warn!(driver_id = %driver.id, returned = %payload.id, "Remote returned a different driver");
                return Ok(RefreshOutcome::NotRefreshed {
                    driver,
                    reason: "mismatched driver id".into(),
                });
            }
            Err(e) => {
                warn!(driver_id = %driver.id, error = %e, "Driver refresh failed");
                return Ok(RefreshOutcome::NotRefreshed {
                    driver,
                    reason: e.to_string(),
                });
            }
        };

        let mut driver = driver;
        let mut changed = apply_payload(&mut driver, &payload);
        if driver.minimal && payload.is_complete() {
            driver.minimal = false;
            changed = true;
        }
        driver.last_refreshed = Some(now);
        self.store.save_driver(&driver)?;

        debug!(driver_id = %driver.id, changed, minimal = driver.minimal, "Driver refreshed");
        Ok(RefreshOutcome::Refreshed { driver, changed })
    }

    /// Provisioning write: create unknown drivers, update stale ones,
    /// leave fresh ones alone unless `force`.
    ///
    /// An existing placeholder keeps its minimal marker; only a conditional
    /// refresh clears it.
    pub fn create_or_update_selective(
        &self,
        payload: &DriverPayload,
        force: bool,
        now: DateTime<Utc>,
    ) -> AgentResult<SelectiveWrite> {
        match self.store.get_driver(&payload.id)? {
            None => {
                let mut driver = Driver::placeholder(payload.id);
                apply_payload(&mut driver, payload);
                driver.minimal = !payload.is_complete();
                driver.last_refreshed = Some(now);
                self.store.save_driver(&driver)?;
                Ok(SelectiveWrite::Created)
            }
            Some(existing) if !force && !Self::needs_refresh(&existing, self.max_age, now) => {
                Ok(SelectiveWrite::Skipped)
            }
            Some(mut existing) => {
                apply_payload(&mut existing, payload);
                existing.last_refreshed = Some(now);
                self.store.save_driver(&existing)?;
                Ok(SelectiveWrite::Updated)
            }
        }
    }

    /// Provisioning write for the vehicle record
    pub fn upsert_vehicle(&self, payload: &VehiclePayload, now: DateTime<Utc>) -> AgentResult<Vehicle> {
        if payload.plate.trim().is_empty() {
            return Err(AgentError::validation(format!(
                "vehicle {} has an empty plate",
                payload.id
            )));
        }

        let existing = self.store.get_vehicle(&payload.id)?;
        let internal_number = payload
            .internal_number
            .clone()
            .or_else(|| existing.map(|v| v.internal_number))
            .unwrap_or_default();

        let vehicle = Vehicle {
            id: payload.id,
            plate: payload.plate.clone(),
            internal_number,
            updated_at: now,
        };
        self.store.upsert_vehicle(&vehicle)?;
        Ok(vehicle)
    }
}

/// Overwrite only the fields the remote supplied and that differ.
/// Returns whether anything changed.
fn apply_payload(driver: &mut Driver, payload: &DriverPayload) -> bool {
    let mut changed = false;

    if let Some(badge_hash) = payload.badge_hash.as_ref().filter(|s| !s.is_empty())
        && *badge_hash != driver.badge_hash
    {
        driver.badge_hash = badge_hash.clone();
        changed = true;
    }
    if let Some(name) = payload.display_name.as_ref().filter(|s| !s.is_empty())
        && *name != driver.display_name
    {
        driver.display_name = name.clone();
        changed = true;
    }
    if let Some(active) = payload.active
        && active != driver.active
    {
        driver.active = active;
        changed = true;
    }
    if let Some(embedding) = &payload.embedding
        && driver.embedding.as_ref() != Some(embedding)
    {
        driver.embedding = Some(embedding.clone());
        changed = true;
    }

    changed
}
