//! # Reinhardt Nested Serializers
//!
//! Writable nested serializers: one create or update call on a root entity
//! creates, updates and deletes the entities related to it, inside a single
//! transaction.
//!
//! ## Save order
//!
//! 1. Nested fields are classified into direct relations (the root stores the
//!    key) and reverse relations (the other side or a link table does)
//! 2. Direct relations are written first and their keys stored on the root
//! 3. The root entity is written
//! 4. Reverse relations are reconciled: matching items update, others create,
//!    the back-reference to the root is injected
//! 5. On update, related entities no longer listed are deleted (or unlinked
//!    for many-to-many), in reverse declaration order
//!
//! Any failure rolls the whole transaction back.
//!
//! ## Deferred uniqueness
//!
//! [`UniqueTogetherValidator::deferred`] skips its check while one of its
//! fields is missing. Children validated before their parent exists pass, and
//! the check runs once the reconciler has supplied the back-reference.

pub mod classifier;
pub mod direct;
pub mod eager;
pub mod error;
pub mod exception;
pub mod fields;
pub mod orchestrator;
pub mod reverse;
pub mod serializer;
pub mod settings;
pub mod validators;

pub use classifier::{Classification, RelationField, classify, storage_attrs};
pub use direct::resolve_direct;
pub use eager::EagerLoading;
pub use error::{
	NON_FIELD_ERRORS, SerializerError, SerializerResult, ValidationErrors, ValidatorError,
};
pub use exception::{ErrorResponse, handle_exception};
pub use fields::{Field, FieldKind};
pub use orchestrator::{NestedSaveContext, create_in, update_in};
pub use reverse::{delete_stale, reconcile_reverse};
pub use serializer::{BoundSerializer, NestedSerializer, NestedSerializerBuilder};
pub use settings::{DEFAULT_PROTECTED_ERROR_MESSAGE, NestedSettings};
pub use validators::UniqueTogetherValidator;
