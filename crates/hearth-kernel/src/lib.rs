//! `hearth-kernel` – Safety gate.
//!
//! Nothing the language model proposes reaches a real device without first
//! passing through this crate.  It performs no I/O and holds no state beyond
//! its rule table.
//!
//! # Modules
//!
//! - [`validation`] – [`ValidationResult`][validation::ValidationResult]:
//!   the verdict for one action.  A sanitized action is present if and only
//!   if the verdict is valid.
//! - [`safety_validator`] – [`SafetyValidator`][safety_validator::SafetyValidator]:
//!   dispatches an action by name to the [`ActionRule`][safety_validator::ActionRule]
//!   registered for it.
//! - [`rules`] – the built-in rules (toggles, brightness, temperature, colour
//!   temperature, humidity, covers).

pub mod rules;
pub mod safety_validator;
pub mod validation;

pub use rules::{
    BrightnessRule, ColorTempRule, CoverRule, HumidityRule, TemperatureRule, ToggleRule,
};
pub use safety_validator::{ActionRule, SafetyValidator};
pub use validation::ValidationResult;
