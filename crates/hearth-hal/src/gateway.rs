//! The gateway seam.
//!
//! Hearth never owns device state.  A [`Gateway`] is the external home
//! automation service that does; the [`DeviceRegistry`][crate::DeviceRegistry]
//! mirrors it and forwards validated service calls to it.
//!
//! # Overview
//!
//! - [`HomeAssistantGateway`][crate::home_assistant::HomeAssistantGateway]
//!   – a real Home Assistant instance over REST.
//! - [`SimGateway`][crate::sim_gateway::SimGateway] – an in-process stand-in.

use async_trait::async_trait;
use hearth_types::{Device, HearthError, Parameters};
use thiserror::Error;

/// Errors a [`Gateway`] may return.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Transport failure (connection refused, timeout, TLS, ...).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The gateway answered with a non-success status.
    #[error("Gateway returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    /// The requested entity does not exist.
    #[error("Entity not found: {0}")]
    NotFound(String),
    /// The response body did not have the expected shape.
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
    /// The gateway refused the request for another reason.
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),
}

impl From<GatewayError> for HearthError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound(id) => HearthError::not_found("device", id),
            GatewayError::Http(e) if e.is_timeout() => HearthError::Timeout(e.to_string()),
            GatewayError::Http(e) => HearthError::Connection(e.to_string()),
            GatewayError::Unavailable(reason) => HearthError::Connection(reason),
            GatewayError::BadResponse(reason) => HearthError::Decode(reason),
            e @ GatewayError::Status { .. } => HearthError::Upstream(e.to_string()),
        }
    }
}

/// Every home automation backend must implement this trait.
///
/// # Contract
///
/// * `list_devices` – full inventory; the registry replaces its cache with it.
/// * `get_device` – point lookup used to heal a cache miss.
/// * `call_service` – invoke `domain.service` against `target_id`; `params`
///   have already been validated and mapped.
/// * `test_connection` – cheap reachability probe.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<Device>, GatewayError>;

    async fn get_device(&self, id: &str) -> Result<Device, GatewayError>;

    async fn call_service(
        &self,
        domain: &str,
        service: &str,
        target_id: &str,
        params: &Parameters,
    ) -> Result<(), GatewayError>;

    async fn test_connection(&self) -> Result<(), GatewayError>;
}
