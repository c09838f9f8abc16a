//! Built-in [`ActionRule`]s.
//!
//! | Rule | Actions | Bounds |
//! |---|---|---|
//! | [`ToggleRule`] | `turn_on`, `turn_off` | none |
//! | [`BrightnessRule`] | `set_brightness` | `brightness` in 0–255, truncated to an integer |
//! | [`TemperatureRule`] | `set_temperature` | `temperature` in 10–40 °C, advisory outside 16–28 °C |
//! | [`ColorTempRule`] | `set_color_temp` | `color_temp` in 2700–6500 K |
//! | [`HumidityRule`] | `set_humidity` | `humidity` in 0–100 % |
//! | [`CoverRule`] | `open`, `close` | none |
//!
//! Out-of-range values are rejected, never clamped.

use hearth_types::DeviceAction;
use serde_json::Value;

use crate::safety_validator::ActionRule;
use crate::validation::ValidationResult;

/// Fetch a required numeric parameter or produce the rejection to return.
fn required_number(action: &DeviceAction, key: &str) -> Result<f64, ValidationResult> {
    match action.parameters.get(key) {
        None | Some(Value::Null) => Err(ValidationResult::reject(format!(
            "{} action requires '{key}' parameter",
            action.action
        ))),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| ValidationResult::reject(format!("'{key}' must be a number"))),
    }
}

/// Sanitized copy holding only the bounded parameter.
fn single_param(action: &DeviceAction, key: &str, value: impl Into<Value>) -> DeviceAction {
    DeviceAction::new(action.action.clone()).with_param(key, value)
}

// ────────────────────────────────────────────────────────────────────────────
// Toggles
// ────────────────────────────────────────────────────────────────────────────

/// `turn_on` / `turn_off` carry no bounded parameters and always pass.
pub struct ToggleRule;

impl ActionRule for ToggleRule {
    fn actions(&self) -> &[&'static str] {
        &["turn_on", "turn_off"]
    }

    fn check(&self, action: &DeviceAction) -> ValidationResult {
        ValidationResult::accept(action.clone())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Brightness
// ────────────────────────────────────────────────────────────────────────────

/// Bounds `set_brightness` to `[min, max]`.
pub struct BrightnessRule {
    pub min: f64,
    pub max: f64,
}

impl Default for BrightnessRule {
    fn default() -> Self {
        Self { min: 0.0, max: 255.0 }
    }
}

impl ActionRule for BrightnessRule {
    fn actions(&self) -> &[&'static str] {
        &["set_brightness"]
    }

    fn check(&self, action: &DeviceAction) -> ValidationResult {
        let value = match required_number(action, "brightness") {
            Ok(v) => v,
            Err(rejection) => return rejection,
        };
        if value < self.min {
            return ValidationResult::reject_with_warning(
                "brightness cannot be negative",
                format!("requested brightness was negative, would clamp to {}", self.min),
            );
        }
        if value > self.max {
            return ValidationResult::reject_with_warning(
                format!("brightness cannot exceed {}", self.max),
                format!("requested brightness {value} would clamp to {}", self.max),
            );
        }
        ValidationResult::accept(single_param(action, "brightness", value.trunc() as u64))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Temperature
// ────────────────────────────────────────────────────────────────────────────

/// Hard safety band plus a softer comfort band for `set_temperature` (°C).
pub struct TemperatureRule {
    pub safe_min: f64,
    pub safe_max: f64,
    pub comfort_min: f64,
    pub comfort_max: f64,
}

impl Default for TemperatureRule {
    fn default() -> Self {
        Self {
            safe_min: 10.0,
            safe_max: 40.0,
            comfort_min: 16.0,
            comfort_max: 28.0,
        }
    }
}

impl ActionRule for TemperatureRule {
    fn actions(&self) -> &[&'static str] {
        &["set_temperature"]
    }

    fn check(&self, action: &DeviceAction) -> ValidationResult {
        let t = match required_number(action, "temperature") {
            Ok(v) => v,
            Err(rejection) => return rejection,
        };
        if t < self.safe_min || t > self.safe_max {
            return ValidationResult::reject(format!(
                "temperature {t:.1}°C is outside safe range ({}-{}°C)",
                self.safe_min, self.safe_max
            ));
        }
        let safe = single_param(action, "temperature", t);
        if t < self.comfort_min {
            ValidationResult::accept_with_warning(
                safe,
                "temperature is very cold - ensure this is intentional",
            )
        } else if t > self.comfort_max {
            ValidationResult::accept_with_warning(
                safe,
                "temperature is very warm - ensure this is intentional",
            )
        } else {
            ValidationResult::accept(safe)
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Colour temperature
// ────────────────────────────────────────────────────────────────────────────

/// Bounds `set_color_temp` (Kelvin).
pub struct ColorTempRule {
    pub min_kelvin: f64,
    pub max_kelvin: f64,
}

impl Default for ColorTempRule {
    fn default() -> Self {
        Self {
            min_kelvin: 2700.0,
            max_kelvin: 6500.0,
        }
    }
}

impl ActionRule for ColorTempRule {
    fn actions(&self) -> &[&'static str] {
        &["set_color_temp"]
    }

    fn check(&self, action: &DeviceAction) -> ValidationResult {
        let kelvin = match required_number(action, "color_temp") {
            Ok(v) => v,
            Err(rejection) => return rejection,
        };
        if kelvin < self.min_kelvin || kelvin > self.max_kelvin {
            return ValidationResult::reject(format!(
                "color temperature {kelvin:.0}K is outside typical range ({}-{}K)",
                self.min_kelvin, self.max_kelvin
            ));
        }
        ValidationResult::accept(single_param(action, "color_temp", kelvin.round() as u64))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Humidity
// ────────────────────────────────────────────────────────────────────────────

/// Bounds `set_humidity` to a percentage.
pub struct HumidityRule;

impl ActionRule for HumidityRule {
    fn actions(&self) -> &[&'static str] {
        &["set_humidity"]
    }

    fn check(&self, action: &DeviceAction) -> ValidationResult {
        let humidity = match required_number(action, "humidity") {
            Ok(v) => v,
            Err(rejection) => return rejection,
        };
        if !(0.0..=100.0).contains(&humidity) {
            return ValidationResult::reject("humidity must be between 0 and 100");
        }
        ValidationResult::accept(single_param(action, "humidity", humidity))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Covers
// ────────────────────────────────────────────────────────────────────────────

/// `open` / `close` for blinds, garage doors and the like.
pub struct CoverRule;

impl ActionRule for CoverRule {
    fn actions(&self) -> &[&'static str] {
        &["open", "close"]
    }

    fn check(&self, action: &DeviceAction) -> ValidationResult {
        match action.action.as_str() {
            "open" | "close" => ValidationResult::accept(action.clone()),
            _ => ValidationResult::reject("cover action must be 'open' or 'close'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cover_rule_checked_directly_rejects_other_names() {
        let result = CoverRule.check(&DeviceAction::new("stop"));
        assert_eq!(result.error(), Some("cover action must be 'open' or 'close'"));
    }

    #[test]
    fn brightness_sanitized_copy_drops_extra_parameters() {
        let action = DeviceAction::new("set_brightness")
            .with_param("brightness", 99.9)
            .with_param("entity_id", "light.hall");
        let result = BrightnessRule::default().check(&action);
        let safe = result.safe_action().unwrap();
        assert_eq!(safe.parameters.len(), 1);
        assert_eq!(safe.number_param("brightness"), Some(99.0));
    }

    #[test]
    fn temperature_error_states_the_range() {
        let action = DeviceAction::new("set_temperature").with_param("temperature", 45);
        let result = TemperatureRule::default().check(&action);
        assert_eq!(
            result.error(),
            Some("temperature 45.0°C is outside safe range (10-40°C)")
        );
    }

    #[test]
    fn null_parameter_counts_as_missing() {
        let action = DeviceAction::new("set_humidity").with_param("humidity", Value::Null);
        let result = HumidityRule.check(&action);
        assert_eq!(
            result.error(),
            Some("set_humidity action requires 'humidity' parameter")
        );
    }
}
