//! [`DeviceRegistry`] – cached device mirror and action dispatcher.
//!
//! # Caching
//!
//! The registry keeps a local copy of the gateway inventory.  A read that
//! finds the copy older than [`DEVICE_CACHE_TTL`] (or never filled) first
//! replaces it wholesale from [`Gateway::list_devices`].  A failed refresh
//! leaves a non-empty cache untouched; stale data is served and the failure
//! is only logged.  With an empty cache the failure is returned.  After a
//! failure, stale reads skip the gateway for [`REFRESH_BACKOFF`].
//!
//! The network call is made with no lock held.  The write lock is taken
//! only to swap in the new map.
//!
//! # Dispatch
//!
//! [`DeviceRegistry::execute`] runs, in order:
//!
//! 1. resolve the device (cache, then a single point lookup on a miss),
//! 2. [`SafetyValidator::validate_action`],
//! 3. [`service_map::map_action`] on the *sanitized* action,
//! 4. [`Gateway::call_service`], wrapping failures as
//!    [`HearthError::Execution`].
//!
//! A rejected or unsupported action never reaches the gateway.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hearth_kernel::SafetyValidator;
use hearth_types::{Device, DeviceAction, DeviceType, HearthError, Parameters};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::gateway::Gateway;
use crate::service_map;

/// Quiet period after a failed refresh while stale data is being served.
pub const REFRESH_BACKOFF: Duration = Duration::from_secs(5);

/// Freshness window of the device cache.
pub const DEVICE_CACHE_TTL: Duration = Duration::from_secs(30);

/// Evidence that a gateway call was made.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReceipt {
    pub device_id: String,
    pub domain: String,
    pub service: String,
    pub params: Parameters,
    /// Non-blocking advisory from the safety validator, if any.
    pub warning: Option<String>,
}

#[derive(Default)]
struct DeviceCache {
    devices: HashMap<String, Device>,
    last_refresh: Option<Instant>,
    last_failure: Option<Instant>,
}

/// Freshness-cached mirror of the gateway's devices.
pub struct DeviceRegistry {
    gateway: Arc<dyn Gateway>,
    validator: SafetyValidator,
    cache: RwLock<DeviceCache>,
    ttl: Duration,
}

impl DeviceRegistry {
    /// A registry over `gateway` that validates with `validator`.
    pub fn new(gateway: Arc<dyn Gateway>, validator: SafetyValidator) -> Self {
        Self {
            gateway,
            validator,
            cache: RwLock::new(DeviceCache::default()),
            ttl: DEVICE_CACHE_TTL,
        }
    }

    /// Override the freshness window.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn validator(&self) -> &SafetyValidator {
        &self.validator
    }

    // -------------------------------------------------------------------------
    // Cache maintenance
    // -------------------------------------------------------------------------

    /// `true` when the cache was never filled or is at least one TTL old.
    pub fn is_stale(&self) -> bool {
        self.cache
            .read()
            .last_refresh
            .is_none_or(|at| at.elapsed() >= self.ttl)
    }

    /// Replace the cache with the gateway's full inventory and return the
    /// number of devices now cached.
    ///
    /// # Errors
    ///
    /// Returns the gateway failure.  The existing cache is left untouched.
    pub async fn refresh(&self) -> Result<usize, HearthError> {
        let devices = self.gateway.list_devices().await?;
        let fresh: HashMap<String, Device> =
            devices.into_iter().map(|d| (d.id.clone(), d)).collect();
        let count = fresh.len();
        {
            let mut cache = self.cache.write();
            cache.devices = fresh;
            cache.last_refresh = Some(Instant::now());
            cache.last_failure = None;
        }
        info!(count, "device cache refreshed");
        Ok(count)
    }

    /// Refresh if stale, tolerating failure while cached data exists.
    async fn ensure_fresh(&self) -> Result<(), HearthError> {
        if !self.is_stale() || self.backing_off() {
            return Ok(());
        }
        let Err(e) = self.refresh().await else {
            return Ok(());
        };
        let mut cache = self.cache.write();
        if cache.devices.is_empty() {
            return Err(e);
        }
        cache.last_failure = Some(Instant::now());
        warn!(
            error = %e,
            backoff_secs = REFRESH_BACKOFF.as_secs(),
            "device refresh failed; serving stale cache"
        );
        Ok(())
    }

    /// `true` while stale data is cached and a refresh failed within
    /// [`REFRESH_BACKOFF`].
    fn backing_off(&self) -> bool {
        let cache = self.cache.read();
        !cache.devices.is_empty()
            && cache
                .last_failure
                .is_some_and(|at| at.elapsed() < REFRESH_BACKOFF)
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    /// All devices, refreshing first if the cache is stale.
    ///
    /// # Errors
    ///
    /// Returns the refresh failure when the cache is empty.
    pub async fn devices(&self) -> Result<Vec<Device>, HearthError> {
        self.ensure_fresh().await?;
        Ok(self.snapshot())
    }

    /// One device by id.  A cache miss triggers a single point lookup whose
    /// result is merged into the cache.
    ///
    /// # Errors
    ///
    /// Returns [`HearthError::NotFound`] when the point lookup fails too.
    pub async fn get_device(&self, id: &str) -> Result<Device, HearthError> {
        if let Err(e) = self.ensure_fresh().await {
            debug!(error = %e, "refresh before lookup failed; trying point lookup");
        }
        let cached = self.cache.read().devices.get(id).cloned();
        if let Some(device) = cached {
            return Ok(device);
        }
        match self.gateway.get_device(id).await {
            Ok(device) => {
                self.cache
                    .write()
                    .devices
                    .insert(device.id.clone(), device.clone());
                debug!(device_id = id, "cache miss healed by point lookup");
                Ok(device)
            }
            Err(e) => {
                debug!(device_id = id, error = %e, "point lookup failed");
                Err(HearthError::not_found("device", id))
            }
        }
    }

    /// Current cache contents, no refresh.
    pub fn snapshot(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.cache.read().devices.values().cloned().collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    /// Devices whose display name contains `name`, case-insensitively.
    /// Operates on the current snapshot without refreshing.
    pub fn find_by_name(&self, name: &str) -> Vec<Device> {
        let needle = name.to_lowercase();
        self.snapshot()
            .into_iter()
            .filter(|d| d.name.to_lowercase().contains(&needle))
            .collect()
    }

    /// Devices of exactly `device_type`.  Operates on the current snapshot
    /// without refreshing.
    pub fn find_by_type(&self, device_type: DeviceType) -> Vec<Device> {
        self.snapshot()
            .into_iter()
            .filter(|d| d.device_type == device_type)
            .collect()
    }

    /// `true` when the gateway answers its reachability probe.
    pub async fn test_connection(&self) -> bool {
        match self.gateway.test_connection().await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "gateway connection test failed");
                false
            }
        }
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    /// Validate `action` and forward it to `device_id`.
    ///
    /// # Errors
    ///
    /// - [`HearthError::NotFound`] – the device is unknown to the gateway.
    /// - [`HearthError::Validation`] – the safety validator rejected it.
    /// - [`HearthError::UnsupportedAction`] – no service for this device type.
    /// - [`HearthError::Execution`] – the gateway call failed.
    pub async fn execute(
        &self,
        device_id: &str,
        action: &DeviceAction,
    ) -> Result<DispatchReceipt, HearthError> {
        let device = self.get_device(device_id).await?;

        let verdict = self.validator.validate_action(action);
        let warning = verdict.warning().map(str::to_string);
        let safe = verdict.into_safe_action()?;
        if let Some(w) = &warning {
            warn!(device_id, action = %safe.action, warning = %w, "dispatching with safety warning");
        }

        let plan = service_map::map_action(device.device_type, &safe)?;
        if plan.service.is_empty() {
            return Err(HearthError::UnsupportedAction {
                action: safe.action,
                device_type: device.device_type.to_string(),
            });
        }

        self.gateway
            .call_service(plan.domain, plan.service, &device.id, &plan.params)
            .await
            .map_err(|e| HearthError::Execution {
                domain: plan.domain.to_string(),
                service: plan.service.to_string(),
                target: device.id.clone(),
                reason: e.to_string(),
            })?;

        info!(
            device_id = %device.id,
            service = %format!("{}.{}", plan.domain, plan.service),
            "service call dispatched"
        );
        Ok(DispatchReceipt {
            device_id: device.id,
            domain: plan.domain.to_string(),
            service: plan.service.to_string(),
            params: plan.params,
            warning,
        })
    }
}
