//! `hearth-hal` – Home automation abstraction layer.
//!
//! Everything that touches real devices lives here.
//!
//! # Modules
//!
//! - [`gateway`] – the [`Gateway`][gateway::Gateway] trait every home
//!   automation backend implements, plus [`GatewayError`][gateway::GatewayError].
//! - [`home_assistant`] – [`HomeAssistantGateway`][home_assistant::HomeAssistantGateway]:
//!   REST client for a Home Assistant instance.
//! - [`sim_gateway`] – [`SimGateway`][sim_gateway::SimGateway]: in-process
//!   gateway that records service calls, for tests and offline runs.
//! - [`service_map`] – static `(device type, action) → domain.service`
//!   lookup table.
//! - [`registry`] – [`DeviceRegistry`][registry::DeviceRegistry]: freshness
//!   cached device mirror and the validate-map-call dispatcher.

pub mod gateway;
pub mod home_assistant;
pub mod registry;
pub mod service_map;
pub mod sim_gateway;

pub use gateway::{Gateway, GatewayError};
pub use home_assistant::HomeAssistantGateway;
pub use registry::{DEVICE_CACHE_TTL, DeviceRegistry, DispatchReceipt, REFRESH_BACKOFF};
pub use sim_gateway::{ServiceCall, SimGateway, sim_device};
