//! Index configuration cleanup

use serde_json::Value;

/// Settings generated by the source cluster that a new index must not carry
const SOURCE_ONLY_SETTINGS: &[&str] = &["uuid", "creation_date", "version", "provided_name"];

/// Strip source-only fields from an index configuration
///
/// Handles both nested (`settings.index.uuid`) and flat (`settings."index.uuid"`)
/// settings layouts.
pub fn clean_index_config(mut config: Value) -> Value {
    if let Some(settings) = config.get_mut("settings").and_then(Value::as_object_mut) {
        if let Some(index) = settings.get_mut("index").and_then(Value::as_object_mut) {
            for key in SOURCE_ONLY_SETTINGS {
                index.remove(*key);
            }
        }
        for key in SOURCE_ONLY_SETTINGS {
            settings.remove(&format!("index.{}", key));
        }
    }
    config
}
