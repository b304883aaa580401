//! Typed device views computed from register caches
//!
//! Views are projections: every field is `None` until the registers backing it
//! have been observed, and one missing register never hides the others.

pub mod battery;
pub mod convert;
pub mod inverter;

pub use battery::Battery;
pub use convert::{StampRegister, TimeSlot};
pub use inverter::{BatteryPowerMode, Inverter, Model};

use serde::Serialize;
use serde_json::Value;

use crate::error::{ModbusError, Result};

/// Unwrap a decoded field or report which one is missing
pub fn require<T>(value: Option<T>, field: &'static str) -> Result<T> {
    value.ok_or(ModbusError::partial(field))
}

/// Names of fields that serialize to `null`; array slots are reported as `name[i]`
pub(crate) fn null_fields<T: Serialize>(view: &T) -> Vec<String> {
    let Ok(Value::Object(fields)) = serde_json::to_value(view) else {
        return Vec::new();
    };
    let mut missing = Vec::new();
    for (name, value) in fields {
        match value {
            Value::Null => missing.push(name),
            Value::Array(items) => missing.extend(
                items
                    .iter()
                    .enumerate()
                    .filter(|(_, item)| item.is_null())
                    .map(|(i, _)| format!("{}[{}]", name, i)),
            ),
            _ => {},
        }
    }
    missing
}
