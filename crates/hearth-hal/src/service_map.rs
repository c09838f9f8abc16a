//! Action-to-service mapping.
//!
//! A static table keyed by `(device type, action)` yields the gateway
//! `domain.service` to call and a pure transform applied to the validated
//! parameters.  Parameters are copied verbatim unless the entry renames a
//! key.  Pairs absent from the table are unsupported and never reach the
//! gateway.
//!
//! | Type | Action | Service | Transform |
//! |---|---|---|---|
//! | light | `turn_on` / `turn_off` | `light.turn_on` / `light.turn_off` | verbatim |
//! | light | `set_brightness` | `light.turn_on` | verbatim |
//! | light | `set_color_temp` | `light.turn_on` | `color_temp` → `color_temp_kelvin` |
//! | switch, fan, media_player | `turn_on` / `turn_off` | `<domain>.turn_on` / `<domain>.turn_off` | verbatim |
//! | climate | `turn_on` / `turn_off` | `climate.turn_on` / `climate.turn_off` | verbatim |
//! | climate | `set_temperature` | `climate.set_temperature` | verbatim |
//! | climate | `set_humidity` | `climate.set_humidity` | verbatim |
//! | cover | `open` / `close` | `cover.open_cover` / `cover.close_cover` | verbatim |

use hearth_types::{DeviceAction, DeviceType, HearthError, Parameters};

/// One row of the mapping table.
pub struct ServiceMapping {
    pub device_type: DeviceType,
    pub action: &'static str,
    pub domain: &'static str,
    pub service: &'static str,
    transform: fn(&Parameters) -> Parameters,
}

/// A resolved gateway call, ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct ServicePlan {
    pub domain: &'static str,
    pub service: &'static str,
    pub params: Parameters,
}

fn verbatim(params: &Parameters) -> Parameters {
    params.clone()
}

fn kelvin(params: &Parameters) -> Parameters {
    params
        .iter()
        .map(|(k, v)| {
            let key = if k == "color_temp" { "color_temp_kelvin".to_string() } else { k.clone() };
            (key, v.clone())
        })
        .collect()
}

const fn row(
    device_type: DeviceType,
    action: &'static str,
    domain: &'static str,
    service: &'static str,
    transform: fn(&Parameters) -> Parameters,
) -> ServiceMapping {
    ServiceMapping {
        device_type,
        action,
        domain,
        service,
        transform,
    }
}

static TABLE: &[ServiceMapping] = &[
    row(DeviceType::Light, "turn_on", "light", "turn_on", verbatim),
    row(DeviceType::Light, "turn_off", "light", "turn_off", verbatim),
    row(DeviceType::Light, "set_brightness", "light", "turn_on", verbatim),
    row(DeviceType::Light, "set_color_temp", "light", "turn_on", kelvin),
    row(DeviceType::Switch, "turn_on", "switch", "turn_on", verbatim),
    row(DeviceType::Switch, "turn_off", "switch", "turn_off", verbatim),
    row(DeviceType::Fan, "turn_on", "fan", "turn_on", verbatim),
    row(DeviceType::Fan, "turn_off", "fan", "turn_off", verbatim),
    row(DeviceType::MediaPlayer, "turn_on", "media_player", "turn_on", verbatim),
    row(DeviceType::MediaPlayer, "turn_off", "media_player", "turn_off", verbatim),
    row(DeviceType::Climate, "turn_on", "climate", "turn_on", verbatim),
    row(DeviceType::Climate, "turn_off", "climate", "turn_off", verbatim),
    row(DeviceType::Climate, "set_temperature", "climate", "set_temperature", verbatim),
    row(DeviceType::Climate, "set_humidity", "climate", "set_humidity", verbatim),
    row(DeviceType::Cover, "open", "cover", "open_cover", verbatim),
    row(DeviceType::Cover, "close", "cover", "close_cover", verbatim),
];

fn lookup(device_type: DeviceType, action: &str) -> Option<&'static ServiceMapping> {
    TABLE
        .iter()
        .find(|m| m.device_type == device_type && m.action == action)
}

/// `true` if `action` can be dispatched to a device of `device_type`.
pub fn supports(device_type: DeviceType, action: &str) -> bool {
    lookup(device_type, action).is_some()
}

/// Action names dispatchable to `device_type`, in table order.
pub fn supported_actions(device_type: DeviceType) -> impl Iterator<Item = &'static str> {
    TABLE
        .iter()
        .filter(move |m| m.device_type == device_type)
        .map(|m| m.action)
}

/// Resolve `action` against a device of `device_type`.
///
/// # Errors
///
/// Returns [`HearthError::UnsupportedAction`] when the pair is not in the
/// table.
pub fn map_action(device_type: DeviceType, action: &DeviceAction) -> Result<ServicePlan, HearthError> {
    let mapping = lookup(device_type, &action.action).ok_or_else(|| {
        HearthError::UnsupportedAction {
            action: action.action.clone(),
            device_type: device_type.to_string(),
        }
    })?;
    Ok(ServicePlan {
        domain: mapping.domain,
        service: mapping.service,
        params: (mapping.transform)(&action.parameters),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brightness_maps_to_light_turn_on_verbatim() {
        let action = DeviceAction::new("set_brightness").with_param("brightness", 128);
        let plan = map_action(DeviceType::Light, &action).unwrap();
        assert_eq!((plan.domain, plan.service), ("light", "turn_on"));
        assert_eq!(plan.params, action.parameters);
    }

    #[test]
    fn color_temp_is_renamed_to_kelvin() {
        let action = DeviceAction::new("set_color_temp").with_param("color_temp", 3000);
        let plan = map_action(DeviceType::Light, &action).unwrap();
        assert!(!plan.params.contains_key("color_temp"));
        assert_eq!(plan.params["color_temp_kelvin"], 3000);
    }

    #[test]
    fn cover_actions_map_to_cover_services() {
        let open = map_action(DeviceType::Cover, &DeviceAction::new("open")).unwrap();
        assert_eq!(open.service, "open_cover");
        let close = map_action(DeviceType::Cover, &DeviceAction::new("close")).unwrap();
        assert_eq!(close.service, "close_cover");
    }

    #[test]
    fn unsupported_pairs_are_rejected() {
        for (ty, action) in [
            (DeviceType::Sensor, "turn_on"),
            (DeviceType::Switch, "set_brightness"),
            (DeviceType::Light, "open"),
            (DeviceType::Cover, "set_temperature"),
        ] {
            let err = map_action(ty, &DeviceAction::new(action)).unwrap_err();
            assert!(matches!(err, HearthError::UnsupportedAction { .. }), "{ty} {action}");
            assert!(!supports(ty, action));
        }
    }

    #[test]
    fn every_table_domain_matches_its_device_type() {
        for m in TABLE {
            assert_eq!(m.domain, m.device_type.as_str());
            assert!(!m.service.is_empty());
        }
    }

    #[test]
    fn supported_actions_lists_light_vocabulary() {
        let actions: Vec<_> = supported_actions(DeviceType::Light).collect();
        assert_eq!(actions, ["turn_on", "turn_off", "set_brightness", "set_color_temp"]);
    }
}
