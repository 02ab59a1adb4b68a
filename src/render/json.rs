use serde::Serialize;

use crate::error::RxScreenError;

pub fn to_pretty<T: Serialize>(value: &T) -> Result<String, RxScreenError> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// One compact JSON document per line.
pub fn to_json_line<T: Serialize>(value: &T) -> Result<String, RxScreenError> {
    Ok(serde_json::to_string(value)?)
}
