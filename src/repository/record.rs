//! Versioned record envelope.
//!
//! Every persisted entity is wrapped as
//! `{schema_version, app_version, kind, saved_at, entity}`. Schema version 1
//! records had no `entity` key: the entity fields sat next to the envelope
//! fields. Older records are migrated on load; newer ones are refused.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::component::ComponentKind;
use crate::error::{DepotError, Result};

/// Current record schema.
pub const SCHEMA_VERSION: u32 = 2;

/// Application version stamped into new records.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

const ENVELOPE_KEYS: [&str; 4] = ["schema_version", "app_version", "kind", "saved_at"];

/// Persisted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEnvelope {
    /// Schema the record was written with.
    pub schema_version: u32,
    /// Application version that wrote it.
    pub app_version: String,
    /// Entity kind.
    pub kind: ComponentKind,
    /// RFC 3339 save time.
    pub saved_at: String,
    /// Serialized entity.
    pub entity: Value,
}

/// Encodes `entity` as a current-schema record.
///
/// # Errors
/// Returns a JSON error.
pub fn encode<T: Serialize>(kind: ComponentKind, entity: &T) -> Result<String> {
    let envelope = RecordEnvelope {
        schema_version: SCHEMA_VERSION,
        app_version: APP_VERSION.to_string(),
        kind,
        saved_at: chrono::Utc::now().to_rfc3339(),
        entity: serde_json::to_value(entity)?,
    };
    Ok(serde_json::to_string_pretty(&envelope)?)
}

/// Decodes a record of `expected` kind, migrating older schemas.
///
/// # Errors
/// Returns `Format` for newer schemas or the wrong kind, or a JSON error.
pub fn decode<T: DeserializeOwned>(text: &str, expected: ComponentKind) -> Result<T> {
    let raw: Value = serde_json::from_str(text)?;
    let envelope = migrate_record(raw)?;
    if envelope.kind != expected {
        return Err(DepotError::Format(format!(
            "record holds {}, expected {}",
            envelope.kind, expected
        )));
    }
    if envelope.app_version != APP_VERSION {
        tracing::debug!(
            "Record written by version {}, running {}",
            envelope.app_version,
            APP_VERSION
        );
    }
    Ok(serde_json::from_value(envelope.entity)?)
}

/// Brings a raw record up to [`SCHEMA_VERSION`].
///
/// # Errors
/// Returns `Format` for records from a newer schema or without an object body.
pub fn migrate_record(raw: Value) -> Result<RecordEnvelope> {
    let Value::Object(mut object) = raw else {
        return Err(DepotError::Format("record is not a JSON object".to_string()));
    };
    let version = object
        .get("schema_version")
        .and_then(Value::as_u64)
        .map_or(1, |v| u32::try_from(v).unwrap_or(u32::MAX));

    if version > SCHEMA_VERSION {
        tracing::warn!(
            "Record schema {} is newer than supported {}",
            version,
            SCHEMA_VERSION
        );
        return Err(DepotError::Format(format!(
            "record schema {} is newer than supported {}",
            version, SCHEMA_VERSION
        )));
    }

    if version < 2 {
        let mut entity = Map::new();
        let keys: Vec<String> = object
            .keys()
            .filter(|k| !ENVELOPE_KEYS.contains(&k.as_str()))
            .cloned()
            .collect();
        for key in keys {
            if let Some(value) = object.remove(&key) {
                entity.insert(key, value);
            }
        }
        object.insert("entity".to_string(), Value::Object(entity));
        object
            .entry("saved_at")
            .or_insert_with(|| Value::String(String::new()));
        object
            .entry("app_version")
            .or_insert_with(|| Value::String("unknown".to_string()));
        tracing::debug!("Migrated record from schema {}", version);
    }
    object.insert("schema_version".to_string(), Value::from(SCHEMA_VERSION));

    Ok(serde_json::from_value(Value::Object(object))?)
}
