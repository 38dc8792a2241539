//! Deserialization of REST payloads.
//!
//! With the `tracing` feature enabled, fields the target type does not know about are logged
//! as warnings instead of being dropped silently, and a failed decode logs the JSON path and
//! value it choked on.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Deserializes `value` into `T`, warning about every field `T` ignores.
#[cfg(feature = "tracing")]
pub(crate) fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    use std::any::type_name;

    tracing::trace!(type_name = %type_name::<T>(), json = %value, "deserializing JSON");

    let mut ignored: Vec<String> = Vec::new();
    let result = serde_ignored::deserialize(&value, |path| ignored.push(path.to_string()));

    let decoded: T = match result {
        Ok(decoded) => decoded,
        Err(e) => {
            let json = value.to_string();
            let de = &mut serde_json::Deserializer::from_str(&json);
            if let Err(located) = serde_path_to_error::deserialize::<_, T>(de) {
                let path = located.path().to_string();
                tracing::error!(
                    type_name = %type_name::<T>(),
                    path = %path,
                    value = %format_value(lookup_value(&value, &path)),
                    error = %located.inner(),
                    "deserialization failed"
                );
            }
            return Err(e.into());
        }
    };

    for path in ignored {
        tracing::warn!(
            type_name = %type_name::<T>(),
            field = %path,
            value = %format_value(lookup_value(&value, &path)),
            "unknown field in API response"
        );
    }

    Ok(decoded)
}

/// Pass-through deserialization when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub(crate) fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    Ok(serde_json::from_value(value)?)
}

/// Finds the value at a `serde_ignored` or `serde_path_to_error` path such as `user.?.roles[2]`.
///
/// `?` segments mark `Option` layers and are skipped.
#[cfg(feature = "tracing")]
fn lookup_value<'value>(value: &'value Value, path: &str) -> Option<&'value Value> {
    path.split(['.', '[', ']'])
        .filter(|segment| !segment.is_empty() && *segment != "?")
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?),
            _ => None,
        })
}

#[cfg(feature = "tracing")]
fn format_value(value: Option<&Value>) -> String {
    value.map_or_else(|| "<unable to retrieve>".to_owned(), Value::to_string)
}
