//! # Reinhardt Nested ORM
//!
//! Storage layer underneath writable nested serializers.
//!
//! ## Features
//!
//! - **Relation metadata**: [`Schema`] resolves model declarations into
//!   tagged [`RelationDescriptor`]s (cardinality, direction, storage mechanism)
//! - **Storage collaborator**: the [`Storage`] trait, with the in-memory
//!   [`MemoryStorage`] backend
//! - **Explicit transactions**: [`Transaction`] and [`atomic`], with
//!   rollback-only marking
//! - **Referential actions**: deletes honor `on_delete`
//!   ([`CascadeAction`]) and refuse protected references
//! - **Batched related loading**: [`Query::select_related`] and
//!   [`Query::prefetch_related`]

pub mod error;
pub mod filter;
pub mod memory;
pub mod query;
pub mod record;
pub mod schema;
pub mod storage;
pub mod transaction;

pub use error::{OrmError, OrmResult};
pub use filter::{Condition, Filter};
pub use memory::MemoryStorage;
pub use query::{Prefetched, Query, load_related};
pub use record::{Attributes, Pk, Record, as_pk};
pub use schema::{
	Cardinality, CascadeAction, Direction, ForeignKey, GenericRelation, LinkTable, ManyToMany,
	ModelMeta, ModelSchema, Reference, RelationDescriptor, RelationKind, Schema, SchemaBuilder,
	StorageMechanism,
};
pub use storage::{LinkSide, Storage};
pub use transaction::{Transaction, TransactionState, atomic};
