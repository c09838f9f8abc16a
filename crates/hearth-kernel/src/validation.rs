//! [`ValidationResult`] – verdict returned by the safety gate.

use hearth_types::{DeviceAction, HearthError};

/// Outcome of validating one [`DeviceAction`].
///
/// Fields are private so that the only way to obtain a valid result is
/// through [`ValidationResult::accept`] or
/// [`ValidationResult::accept_with_warning`], both of which require the
/// sanitized action.  A rejected result never carries one.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    valid: bool,
    error: Option<String>,
    warning: Option<String>,
    safe_action: Option<DeviceAction>,
}

impl ValidationResult {
    /// A passing verdict carrying the action that may be dispatched.
    pub fn accept(safe_action: DeviceAction) -> Self {
        Self {
            valid: true,
            error: None,
            warning: None,
            safe_action: Some(safe_action),
        }
    }

    /// A passing verdict with a non-blocking advisory.
    pub fn accept_with_warning(safe_action: DeviceAction, warning: impl Into<String>) -> Self {
        Self {
            warning: Some(warning.into()),
            ..Self::accept(safe_action)
        }
    }

    /// A failing verdict.
    pub fn reject(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
            warning: None,
            safe_action: None,
        }
    }

    /// A failing verdict with an advisory, e.g. the value the request would
    /// have been clamped to.
    pub fn reject_with_warning(error: impl Into<String>, warning: impl Into<String>) -> Self {
        Self {
            warning: Some(warning.into()),
            ..Self::reject(error)
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn warning(&self) -> Option<&str> {
        self.warning.as_deref()
    }

    /// The sanitized action; `Some` exactly when [`is_valid`][Self::is_valid].
    pub fn safe_action(&self) -> Option<&DeviceAction> {
        self.safe_action.as_ref()
    }

    /// Consume the verdict and return the sanitized action.
    ///
    /// # Errors
    ///
    /// Returns [`HearthError::Validation`] carrying the rejection reason
    /// when the verdict is not valid.
    pub fn into_safe_action(self) -> Result<DeviceAction, HearthError> {
        match self.safe_action {
            Some(action) => Ok(action),
            None => Err(HearthError::Validation(
                self.error.unwrap_or_else(|| "action rejected".to_string()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_carries_safe_action() {
        let result = ValidationResult::accept(DeviceAction::new("turn_on"));
        assert!(result.is_valid());
        assert!(result.error().is_none());
        assert_eq!(result.safe_action().map(|a| a.action.as_str()), Some("turn_on"));
    }

    #[test]
    fn reject_never_carries_safe_action() {
        let result = ValidationResult::reject_with_warning("too bright", "would clamp to 255");
        assert!(!result.is_valid());
        assert!(result.safe_action().is_none());
        assert_eq!(result.warning(), Some("would clamp to 255"));
    }

    #[test]
    fn into_safe_action_surfaces_reason() {
        let err = ValidationResult::reject("brightness cannot exceed 255")
            .into_safe_action()
            .unwrap_err();
        assert_eq!(
            err,
            HearthError::Validation("brightness cannot exceed 255".to_string())
        );
    }
}
