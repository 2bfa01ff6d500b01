use crate::value::Value;
use std::collections::BTreeMap;

/// An opaque envelope produced by an event source adapter.
///
/// Owned by the worker for the duration of one process/collect cycle and
/// explicitly closed (by the adapter's `close`) after extraction.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Event {
    pub payload: Vec<u8>,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    /// Source-specific metadata (index within a multi-frame file, stream
    /// name, ...).
    pub extra: BTreeMap<String, String>,
}

impl Event {
    pub fn new(payload: Vec<u8>, timestamp: f64) -> Self {
        Self {
            payload,
            timestamp,
            extra: BTreeMap::new(),
        }
    }
}

/// Mapping from source-name to source-specific value, produced by an event
/// source adapter's `extract` step.
///
/// Always contains a `"timestamp"` key; other keys are declared by the
/// user's `required_data` list at startup. Feedback delivered to a worker
/// before its next `process_data` call is merged in via `merge`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExtractedData {
    fields: BTreeMap<String, Value>,
}

impl ExtractedData {
    pub fn new(timestamp: f64) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert("timestamp".to_string(), Value::Float(timestamp));
        Self { fields }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn timestamp(&self) -> f64 {
        self.fields
            .get("timestamp")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }

    /// Merges feedback delivered from the collector into this event's data,
    /// overwriting any existing keys of the same name. Called once per
    /// worker iteration before `Processor::process_data`.
    pub fn merge(&mut self, feedback: BTreeMap<String, Value>) {
        self.fields.extend(feedback);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracted_data_carries_timestamp() {
        let data = ExtractedData::new(123.5);
        assert_eq!(data.timestamp(), 123.5);
    }

    #[test]
    fn merge_overwrites_existing_keys() {
        let mut data = ExtractedData::new(1.0);
        data.insert("gain_mode", Value::Str("fixed".into()));
        let mut feedback = BTreeMap::new();
        feedback.insert("gain_mode".to_string(), Value::Str("auto".into()));
        data.merge(feedback);
        assert_eq!(data.get("gain_mode"), Some(&Value::Str("auto".into())));
    }
}
