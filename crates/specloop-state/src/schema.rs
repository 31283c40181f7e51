//! SurrealDB row types.
//!
//! Whole specs and records are stored as JSON documents next to a few
//! indexed scalar columns; conversion to the model types happens at the
//! store boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::model::{IterationRecord, Specification};

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Row in the `specs` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecRow {
    /// SurrealDB record ID
    pub id: Option<surrealdb::sql::Thing>,
    pub spec_id: String,
    /// SHA-256 of the document content
    pub digest: String,
    pub object_count: u64,
    /// Full `Specification` as JSON
    pub document: serde_json::Value,
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl SpecRow {
    pub fn from_spec(spec_id: &str, spec: &Specification) -> Result<Self, StorageError> {
        Ok(SpecRow {
            id: None,
            spec_id: spec_id.to_string(),
            digest: spec.digest().as_str().to_string(),
            object_count: spec.objects.len() as u64,
            document: serde_json::to_value(spec)?,
            updated_at: spec.updated_at,
        })
    }

    pub fn into_spec(self) -> Result<Specification, StorageError> {
        Ok(serde_json::from_value(self.document)?)
    }
}

/// Row in the `iterations` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRow {
    /// SurrealDB record ID
    pub id: Option<surrealdb::sql::Thing>,
    pub iter_id: String,
    pub spec_id: String,
    /// Append sequence within the spec (0-based)
    pub seq: u64,
    pub round_index: Option<u32>,
    pub score: Option<f64>,
    pub degraded: bool,
    /// Full `IterationRecord` as JSON
    pub record: serde_json::Value,
    #[serde(with = "surreal_datetime")]
    pub timestamp: DateTime<Utc>,
}

impl IterationRow {
    pub fn from_record(seq: u64, record: &IterationRecord) -> Result<Self, StorageError> {
        Ok(IterationRow {
            id: None,
            iter_id: record.iter_id.0.clone(),
            spec_id: record.spec_id.0.clone(),
            seq,
            round_index: record.round_index,
            score: record.score,
            degraded: record.degraded,
            record: serde_json::to_value(record)?,
            timestamp: record.timestamp,
        })
    }

    pub fn into_record(self) -> Result<IterationRecord, StorageError> {
        Ok(serde_json::from_value(self.record)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IterationKind, SpecId};

    #[test]
    fn spec_row_round_trips_document() {
        let spec = Specification::new(SpecId::from("spec_row"));
        let row = SpecRow::from_spec("spec_row", &spec).unwrap();
        assert_eq!(row.digest, spec.digest().as_str());
        assert_eq!(row.object_count, 0);
        assert_eq!(row.into_spec().unwrap(), spec);
    }

    #[test]
    fn iteration_row_copies_indexed_columns() {
        let spec = Specification::new(SpecId::from("spec_row"));
        let record =
            IterationRecord::new(IterationKind::Refinement, Some(2), None, spec, "fb", Some(0.7));
        let row = IterationRow::from_record(4, &record).unwrap();
        assert_eq!(row.seq, 4);
        assert_eq!(row.round_index, Some(2));
        assert_eq!(row.score, Some(0.7));
        assert_eq!(row.into_record().unwrap(), record);
    }
}
