//! SurrealDB schema initialization
//!
//! Defines the `specs` and `iterations` tables with their unique
//! constraints. Safe to call on every connection (idempotent).

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::storage_traits::StorageResult;

/// Initialize all specloop tables.
pub async fn init_schema(db: &Surreal<Any>) -> StorageResult<()> {
    info!("Initializing specloop SurrealDB schema");
    init_specs_table(db).await?;
    init_iterations_table(db).await?;
    Ok(())
}

/// Schema:
/// ```text
/// TABLE specs {
///   spec_id:      STRING (unique)
///   digest:       STRING
///   object_count: INT
///   document:     OBJECT (full specification)
///   updated_at:   DATETIME
/// }
/// ```
async fn init_specs_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing specs table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS specs SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_spec_id ON TABLE specs COLUMNS spec_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_spec_updated_at ON TABLE specs COLUMNS updated_at;
    "#;

    db.query(sql).await?.check()?;
    Ok(())
}

/// Schema:
/// ```text
/// TABLE iterations {
///   iter_id:     STRING (unique)
///   spec_id:     STRING (indexed)
///   seq:         INT (append order within spec_id)
///   round_index: INT?
///   score:       FLOAT?
///   degraded:    BOOL
///   record:      OBJECT (full iteration record)
///   timestamp:   DATETIME
/// }
/// ```
///
/// `(spec_id, seq)` is unique: two writers racing for the same slot make
/// one of them fail instead of interleaving.
async fn init_iterations_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing iterations table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS iterations SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update NONE
                FOR delete NONE;
        DEFINE INDEX IF NOT EXISTS idx_iter_id ON TABLE iterations COLUMNS iter_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_iter_spec_seq ON TABLE iterations COLUMNS spec_id, seq UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_iter_spec_ts ON TABLE iterations COLUMNS spec_id, timestamp;
    "#;

    db.query(sql).await?.check()?;
    Ok(())
}
