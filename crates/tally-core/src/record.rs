//! Tagged provider records.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field appended to every record with the owning tenant's id.
pub const TENANT_ID_FIELD: &str = "tenantId";
/// Field appended to every record with the extraction timestamp (RFC 3339).
pub const EXTRACTED_AT_FIELD: &str = "extractedAt";

/// One provider object plus the `tenantId` and `extractedAt` tags.
///
/// Records are immutable once emitted: there is no mutable access to the
/// fields, only conversion into the underlying map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    /// Tag a raw provider item.
    ///
    /// Non-object items are wrapped as `{"value": item}`. Provider fields named
    /// like the tags are overwritten by the tags.
    #[must_use]
    pub fn tag(raw: Value, tenant_id: &str, extracted_at: DateTime<Utc>) -> Self {
        let mut fields = match raw {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        fields.insert(TENANT_ID_FIELD.to_string(), Value::String(tenant_id.to_string()));
        fields.insert(
            EXTRACTED_AT_FIELD.to_string(),
            Value::String(extracted_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        Self { fields }
    }

    #[must_use]
    pub fn tenant_id(&self) -> Option<&str> {
        self.fields.get(TENANT_ID_FIELD).and_then(Value::as_str)
    }

    #[must_use]
    pub fn extracted_at(&self) -> Option<&str> {
        self.fields.get(EXTRACTED_AT_FIELD).and_then(Value::as_str)
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    #[must_use]
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    #[must_use]
    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }
}
