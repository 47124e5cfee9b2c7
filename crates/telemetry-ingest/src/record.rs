// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Telemetry records
//!
//! A [`PendingRecord`] accumulates fields while a sensor is sending lines.
//! When the terminator arrives it is consumed into an immutable [`Record`]
//! that carries the server reception timestamp.

use crate::value::Value;
use chrono::NaiveDateTime;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Field key injected into every finalized record.
///
/// The spelling matches the payloads already written by deployed servers
/// and read by existing consumers.
pub const RECEIVED_TIMESTAMP_FIELD: &str = "recieved_timestamp";

/// Textual form of reception timestamps (ISO 8601, no offset).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// A named field value.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub value: Value,
}

/// Fields in first-insertion order with last-write-wins updates.
///
/// Sensor records carry a handful of fields, so a linear scan beats hashing.
#[derive(Debug, Clone, Default, PartialEq)]
struct Fields(Vec<Field>);

impl Fields {
    fn upsert(&mut self, name: String, value: Value) {
        match self.0.iter_mut().find(|f| f.name == name) {
            Some(field) => field.value = value,
            None => self.0.push(Field { name, value }),
        }
    }

    fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|f| f.name == name).map(|f| &f.value)
    }
}

/// In-progress record owned by a session.
#[derive(Debug, Clone, Default)]
pub struct PendingRecord {
    fields: Fields,
}

impl PendingRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a field.
    pub fn upsert(&mut self, name: impl Into<String>, value: Value) {
        self.fields.upsert(name.into(), value);
    }

    /// Look up a field by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Number of fields accumulated so far.
    pub fn len(&self) -> usize {
        self.fields.0.len()
    }

    /// True if no field has been received yet.
    pub fn is_empty(&self) -> bool {
        self.fields.0.is_empty()
    }

    /// Finalize into an immutable record stamped with `received_at`.
    ///
    /// A sensor-sent field named [`RECEIVED_TIMESTAMP_FIELD`] is overwritten.
    pub fn finalize(mut self, received_at: NaiveDateTime) -> Record {
        self.fields.upsert(
            RECEIVED_TIMESTAMP_FIELD.to_string(),
            Value::Text(format_timestamp(&received_at)),
        );

        Record {
            received_at,
            fields: self.fields,
        }
    }
}

/// A finalized telemetry record.
///
/// Serializes as a flat JSON object of its fields, which is the stored
/// payload format.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    received_at: NaiveDateTime,
    fields: Fields,
}

impl Record {
    /// Server reception time.
    pub fn received_at(&self) -> NaiveDateTime {
        self.received_at
    }

    /// Look up a field by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// All fields, including the reception timestamp.
    pub fn fields(&self) -> &[Field] {
        &self.fields.0
    }

    /// Number of fields, including the reception timestamp.
    pub fn len(&self) -> usize {
        self.fields.0.len()
    }

    /// True if the record holds no fields. A finalized record carries at
    /// least its timestamp field, so this only holds for an empty map.
    pub fn is_empty(&self) -> bool {
        self.fields.0.is_empty()
    }

    /// Serialize to the JSON payload stored alongside the reading.
    pub fn to_payload(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.0.len()))?;
        for field in &self.fields.0 {
            map.serialize_entry(&field.name, &field.value)?;
        }
        map.end()
    }
}

/// Render a timestamp in [`TIMESTAMP_FORMAT`].
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a timestamp rendered by [`format_timestamp`].
pub fn parse_timestamp(text: &str) -> chrono::ParseResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 14)
            .unwrap()
            .and_hms_micro_opt(15, 9, 26, 535_897)
            .unwrap()
    }

    #[test]
    fn test_last_write_wins() {
        let mut pending = PendingRecord::new();
        pending.upsert("temp", Value::Int(20));
        pending.upsert("unit", Value::Text("C".into()));
        pending.upsert("temp", Value::Float(21.5));

        assert_eq!(pending.len(), 2);
        assert_eq!(pending.get("temp"), Some(&Value::Float(21.5)));
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut pending = PendingRecord::new();
        pending.upsert("b", Value::Int(1));
        pending.upsert("a", Value::Int(2));
        pending.upsert("b", Value::Int(3));

        let record = pending.finalize(ts());
        let names: Vec<_> = record.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a", RECEIVED_TIMESTAMP_FIELD]);
    }

    #[test]
    fn test_finalize_injects_timestamp() {
        let record = PendingRecord::new().finalize(ts());

        assert_eq!(record.len(), 1);
        assert_eq!(record.received_at(), ts());
        assert_eq!(
            record.get(RECEIVED_TIMESTAMP_FIELD),
            Some(&Value::Text("2025-03-14T15:09:26.535897".into()))
        );
    }

    #[test]
    fn test_finalize_overrides_sensor_timestamp_field() {
        let mut pending = PendingRecord::new();
        pending.upsert(RECEIVED_TIMESTAMP_FIELD, Value::Int(0));

        let record = pending.finalize(ts());
        assert_eq!(record.len(), 1);
        assert!(record.get(RECEIVED_TIMESTAMP_FIELD).unwrap().as_text().is_some());
    }

    #[test]
    fn test_payload_is_flat_json_object() {
        let mut pending = PendingRecord::new();
        pending.upsert("temp", Value::Int(21));
        pending.upsert("unit", Value::Text("C".into()));

        let payload = pending.finalize(ts()).to_payload().unwrap();
        let decoded: serde_json::Value = serde_json::from_str(&payload).unwrap();

        assert_eq!(decoded["temp"], serde_json::json!(21));
        assert!(decoded["temp"].is_i64());
        assert_eq!(decoded["unit"], serde_json::json!("C"));
        assert_eq!(
            decoded[RECEIVED_TIMESTAMP_FIELD],
            serde_json::json!("2025-03-14T15:09:26.535897")
        );
    }

    #[test]
    fn test_timestamp_text_round_trip() {
        let text = format_timestamp(&ts());
        assert_eq!(parse_timestamp(&text).unwrap(), ts());
    }

    #[test]
    fn test_finalized_empty_record_is_not_empty() {
        let pending = PendingRecord::new();
        assert!(pending.is_empty());

        let record = pending.finalize(ts());
        assert!(!record.is_empty());
        assert_eq!(record.len(), 1);
    }
}
