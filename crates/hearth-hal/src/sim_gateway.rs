//! [`SimGateway`] – In-process gateway for tests and offline runs.
//!
//! Holds a fixed device inventory, records every service call, and applies a
//! simple effect model so the inventory reflects what was asked of it.
//!
//! # Stub behaviour
//!
//! | Service | Effect on the target device |
//! |---|---|
//! | `turn_on` | state `"on"`, parameters merged into attributes |
//! | `turn_off` | state `"off"` |
//! | `open_cover` / `close_cover` | state `"open"` / `"closed"` |
//! | anything else | parameters merged into attributes |
//!
//! Failures can be switched on to exercise error paths: [`set_offline`]
//! makes inventory reads fail, [`set_service_failure`] makes service calls
//! fail.
//!
//! [`set_offline`]: SimGateway::set_offline
//! [`set_service_failure`]: SimGateway::set_service_failure
//!
//! # Example
//!
//! ```rust
//! use hearth_hal::SimGateway;
//!
//! let gateway = SimGateway::builder()
//!     .with_device("light.bedroom", "Bedroom Light")
//!     .with_device("climate.hall", "Hall Thermostat")
//!     .build();
//! assert_eq!(gateway.device_count(), 2);
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use hearth_types::{Device, DeviceType, Parameters};
use parking_lot::{Mutex, RwLock};

use crate::gateway::{Gateway, GatewayError};

/// A service call recorded by [`SimGateway`].
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceCall {
    pub domain: String,
    pub service: String,
    pub target_id: String,
    pub params: Parameters,
}

/// Gateway stand-in backed by an in-memory device list.
#[derive(Default)]
pub struct SimGateway {
    devices: RwLock<Vec<Device>>,
    calls: Mutex<Vec<ServiceCall>>,
    list_calls: AtomicUsize,
    offline: AtomicBool,
    service_failure: AtomicBool,
}

impl SimGateway {
    /// Begin building a gateway with a custom inventory.
    pub fn builder() -> SimGatewayBuilder {
        SimGatewayBuilder::default()
    }

    /// Add or replace a device after construction.
    pub fn add_device(&self, device: Device) {
        let mut devices = self.devices.write();
        devices.retain(|d| d.id != device.id);
        devices.push(device);
    }

    pub fn remove_device(&self, id: &str) {
        self.devices.write().retain(|d| d.id != id);
    }

    pub fn device_count(&self) -> usize {
        self.devices.read().len()
    }

    /// Current state of one simulated device.
    pub fn device(&self, id: &str) -> Option<Device> {
        self.devices.read().iter().find(|d| d.id == id).cloned()
    }

    /// Every service call received so far, oldest first.
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().clone()
    }

    /// How many times the full inventory was requested.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// While `true`, inventory reads and connection checks fail.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// While `true`, service calls fail with an upstream status.
    pub fn set_service_failure(&self, fail: bool) {
        self.service_failure.store(fail, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<(), GatewayError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("simulated gateway offline".into()));
        }
        Ok(())
    }
}

/// Build a simulated device the way the Home Assistant client would see it.
pub fn sim_device(id: &str, name: &str) -> Device {
    let domain = id.split_once('.').map(|(d, _)| d).unwrap_or(id).to_string();
    Device {
        id: id.to_string(),
        name: name.to_string(),
        device_type: DeviceType::from_domain(&domain),
        state: "off".to_string(),
        attributes: Parameters::new(),
        domain,
        last_updated: Utc::now(),
    }
}

/// Builder for [`SimGateway`].
#[derive(Default)]
pub struct SimGatewayBuilder {
    devices: Vec<Device>,
}

impl SimGatewayBuilder {
    /// Add a device; its type is derived from the entity id's domain.
    pub fn with_device(mut self, id: &str, name: &str) -> Self {
        self.devices.push(sim_device(id, name));
        self
    }

    pub fn build(self) -> SimGateway {
        SimGateway {
            devices: RwLock::new(self.devices),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Gateway for SimGateway {
    async fn list_devices(&self) -> Result<Vec<Device>, GatewayError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;
        Ok(self.devices.read().clone())
    }

    async fn get_device(&self, id: &str) -> Result<Device, GatewayError> {
        self.ensure_online()?;
        self.device(id)
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))
    }

    async fn call_service(
        &self,
        domain: &str,
        service: &str,
        target_id: &str,
        params: &Parameters,
    ) -> Result<(), GatewayError> {
        self.calls.lock().push(ServiceCall {
            domain: domain.to_string(),
            service: service.to_string(),
            target_id: target_id.to_string(),
            params: params.clone(),
        });
        if self.service_failure.load(Ordering::SeqCst) {
            return Err(GatewayError::Status {
                status: 500,
                body: "simulated service failure".into(),
            });
        }

        let mut devices = self.devices.write();
        let device = devices
            .iter_mut()
            .find(|d| d.id == target_id)
            .ok_or_else(|| GatewayError::NotFound(target_id.to_string()))?;
        match service {
            "turn_on" => device.state = "on".into(),
            "turn_off" => device.state = "off".into(),
            "open_cover" => device.state = "open".into(),
            "close_cover" => device.state = "closed".into(),
            _ => {}
        }
        for (key, value) in params {
            device.attributes.insert(key.clone(), value.clone());
        }
        device.last_updated = Utc::now();
        Ok(())
    }

    async fn test_connection(&self) -> Result<(), GatewayError> {
        self.ensure_online()
    }
}
