//! Per-type default values
//!
//! One [`TypedParameter`] slot per wire type, initialised with the type's
//! canonical zero value. Data sources merge overrides from configuration, for
//! example `{"Int32": -1, "String": "n/a"}`.

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tracing::debug;
use wirebridge_common::Result;

use crate::param::{ParamValue, TypedParameter};
use crate::types::WireType;

/// Default value for every wire type
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultValues {
    slots: HashMap<WireType, TypedParameter>,
}

impl Default for DefaultValues {
    fn default() -> Self {
        let slots = WireType::ALL
            .iter()
            .map(|ty| (*ty, TypedParameter::new(ty.name(), *ty)))
            .collect();
        Self { slots }
    }
}

impl DefaultValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with overrides applied from a JSON object
    pub fn from_config(config: &JsonValue) -> Result<Self> {
        let mut defaults = Self::default();
        defaults.merge(config)?;
        Ok(defaults)
    }

    /// Slot of a wire type
    pub fn get(&self, wire_type: WireType) -> &TypedParameter {
        // every type gets a slot in Default::default
        &self.slots[&wire_type]
    }

    /// Current default of a wire type
    pub fn value_of(&self, wire_type: WireType) -> &ParamValue {
        self.get(wire_type).value()
    }

    /// Merge every entry whose key names a wire type. Unknown keys are ignored.
    pub fn merge(&mut self, config: &JsonValue) -> Result<()> {
        let Some(object) = config.as_object() else {
            return Ok(());
        };
        for (key, value) in object {
            match WireType::lookup(key).and_then(|ty| self.slots.get_mut(&ty)) {
                Some(slot) => slot.merge_json_value(value)?,
                None => debug!(key = %key, "ignoring default value for unknown type"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_defaults() {
        let defaults = DefaultValues::new();
        assert_eq!(defaults.value_of(WireType::Int32), &ParamValue::Int(0));
        assert_eq!(defaults.value_of(WireType::DateTime), &ParamValue::Long(1));
        assert_eq!(defaults.value_of(WireType::String), &ParamValue::Str(String::new()));
        assert_eq!(defaults.get(WireType::UUID).name(), "UUID");
    }

    #[test]
    fn test_merge_known_types_only() {
        let defaults = DefaultValues::from_config(&json!({
            "Int32": -1,
            "string": "n/a",
            "NotAType": 5
        }))
        .unwrap();
        assert_eq!(defaults.value_of(WireType::Int32), &ParamValue::Int(-1));
        assert_eq!(defaults.value_of(WireType::String), &ParamValue::Str("n/a".into()));
        assert_eq!(defaults.value_of(WireType::Int64), &ParamValue::Long(0));
    }

    #[test]
    fn test_merge_malformed_numeric_fails() {
        let mut defaults = DefaultValues::new();
        assert!(defaults.merge(&json!({"UInt8": "lots"})).is_err());
    }

    #[test]
    fn test_merge_non_object_is_noop() {
        let mut defaults = DefaultValues::new();
        defaults.merge(&json!([1, 2, 3])).unwrap();
        assert_eq!(defaults, DefaultValues::new());
    }
}
