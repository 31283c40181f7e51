//! specloop-state: specification model and persistence for specloop
//!
//! This crate owns the durable side of the refinement engine: the
//! per-object [`Specification`] document, the immutable [`IterationRecord`]
//! audit trail, and the [`SpecStore`] contract the core consumes.
//!
//! ## Backends
//!
//! - [`fakes::MemorySpecStore`]: in-memory, for tests
//! - [`FsSpecStore`]: JSON files with atomic writes (local fallback)
//! - [`SurrealSpecStore`]: SurrealDB (`mem://`, `surrealkv://` or remote)

mod error;
pub mod fakes;
pub mod fs_store;
mod migrations;
pub mod model;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::StorageError;
pub use fs_store::FsSpecStore;
pub use model::{
    DesignObject, Dimensions, IterationId, IterationKind, IterationRecord, MaterialProperties,
    Position, Rotation, SpecDigest, SpecId, Specification, DEGRADED_KEY,
};
pub use schema::{IterationRow, SpecRow};
pub use storage_traits::{SpecStore, StorageResult};
pub use surreal_store::{SurrealConfig, SurrealSpecStore};
