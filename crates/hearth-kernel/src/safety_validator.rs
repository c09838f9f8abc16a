//! [`SafetyValidator`] – per-action parameter bounds.
//!
//! Every action the language model proposes is passed through
//! [`SafetyValidator::validate_action`] before it may be mapped to a gateway
//! service call.  The validator looks up the [`ActionRule`] registered for
//! the action name and returns its [`ValidationResult`].  Unknown action
//! names are rejected.
//!
//! # Example
//!
//! ```
//! use hearth_kernel::SafetyValidator;
//! use hearth_types::DeviceAction;
//!
//! let validator = SafetyValidator::new();
//!
//! let dim = DeviceAction::new("set_brightness").with_param("brightness", 128);
//! assert!(validator.validate_action(&dim).is_valid());
//!
//! let blinding = DeviceAction::new("set_brightness").with_param("brightness", 300);
//! assert!(!validator.validate_action(&blinding).is_valid());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use hearth_types::DeviceAction;
use tracing::debug;

use crate::rules::{
    BrightnessRule, ColorTempRule, CoverRule, HumidityRule, TemperatureRule, ToggleRule,
};
use crate::validation::ValidationResult;

// ────────────────────────────────────────────────────────────────────────────
// ActionRule trait
// ────────────────────────────────────────────────────────────────────────────

/// Bounds check for one family of actions.
///
/// Implement this trait to add custom actions and register them with
/// [`SafetyValidator::add_rule`].
pub trait ActionRule: Send + Sync {
    /// Action names this rule is responsible for.
    fn actions(&self) -> &[&'static str];

    /// Validate `action`.  Only called for names listed in
    /// [`actions`][ActionRule::actions].
    fn check(&self, action: &DeviceAction) -> ValidationResult;
}

// ────────────────────────────────────────────────────────────────────────────
// SafetyValidator
// ────────────────────────────────────────────────────────────────────────────

/// Table of [`ActionRule`]s keyed by action name.
pub struct SafetyValidator {
    rules: HashMap<&'static str, Arc<dyn ActionRule>>,
}

impl SafetyValidator {
    /// A validator loaded with the built-in rules.
    pub fn new() -> Self {
        let mut validator = Self::empty();
        validator.add_rule(Arc::new(ToggleRule));
        validator.add_rule(Arc::new(BrightnessRule::default()));
        validator.add_rule(Arc::new(TemperatureRule::default()));
        validator.add_rule(Arc::new(ColorTempRule::default()));
        validator.add_rule(Arc::new(HumidityRule));
        validator.add_rule(Arc::new(CoverRule));
        validator
    }

    /// A validator that rejects everything until rules are added.
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// Register `rule` for each of its action names, replacing any rule
    /// previously registered for the same name.
    pub fn add_rule(&mut self, rule: Arc<dyn ActionRule>) {
        for name in rule.actions() {
            self.rules.insert(name, Arc::clone(&rule));
        }
    }

    /// `true` if a rule is registered for `action`.
    pub fn knows(&self, action: &str) -> bool {
        self.rules.contains_key(action)
    }

    /// Validate a single action.  Never panics and performs no I/O.
    pub fn validate_action(&self, action: &DeviceAction) -> ValidationResult {
        let result = match self.rules.get(action.action.as_str()) {
            Some(rule) => rule.check(action),
            None => ValidationResult::reject(format!("unknown action: {}", action.action)),
        };
        if !result.is_valid() {
            debug!(
                action = %action.action,
                error = result.error().unwrap_or_default(),
                "action rejected by safety validator"
            );
        }
        result
    }
}

impl Default for SafetyValidator {
    fn default() -> Self {
        Self::new()
    }
}
