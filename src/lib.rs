//! # Reinhardt Writable Nested
//!
//! Writable nested serializers for Reinhardt.
//!
//! A single create or update call on a root entity writes the related entities
//! described in its payload: forward relations are resolved before the root is
//! saved, reverse relations (reverse foreign keys, reverse one-to-one,
//! many-to-many and generic relations) are reconciled after it, and on update
//! related entities no longer listed are deleted or unlinked. Everything runs
//! inside one transaction.
//!
//! ## Crates
//!
//! - [`orm`]: relation metadata, the storage interface, transactions and an
//!   in-memory backend
//! - [`serializers`]: nested serializers, the save orchestration and error
//!   translation
//!
//! ## Quick Start
//!
//! ```rust
//! use reinhardt_writable_nested::prelude::*;
//! use serde_json::json;
//!
//! let schema = Schema::builder()
//! 	.model(ModelSchema::new("person"))
//! 	.model(
//! 		ModelSchema::new("child").foreign_key(
//! 			ForeignKey::new("parent", "person")
//! 				.related_name("children")
//! 				.on_delete(CascadeAction::Cascade),
//! 		),
//! 	)
//! 	.build()
//! 	.unwrap();
//! let storage = MemoryStorage::new(schema);
//!
//! let child = NestedSerializer::builder("child")
//! 	.field(Field::id())
//! 	.field(Field::char("name"))
//! 	.unique_together(UniqueTogetherValidator::deferred(vec!["name", "parent"]))
//! 	.build();
//! let person = NestedSerializer::builder("person")
//! 	.field(Field::id())
//! 	.field(Field::char("name"))
//! 	.field(Field::nested_many("children", child).optional())
//! 	.build();
//!
//! let fred = person
//! 	.create(&storage, json!({"name": "Fred", "children": [{"name": "Bobby"}]}))
//! 	.unwrap();
//! assert_eq!(storage.row_count("child"), 1);
//!
//! person
//! 	.update(&storage, fred, json!({"name": "Fred", "children": []}))
//! 	.unwrap();
//! assert_eq!(storage.row_count("child"), 0);
//! ```

pub use reinhardt_nested_orm as orm;
pub use reinhardt_nested_serializers as serializers;

// Re-export the storage side
pub use reinhardt_nested_orm::{
	CascadeAction, Filter, ForeignKey, GenericRelation, ManyToMany, MemoryStorage, ModelSchema,
	OrmError, OrmResult, Pk, Query, Record, Schema, Storage, Transaction, atomic,
};

// Re-export serializers
pub use reinhardt_nested_serializers::{
	BoundSerializer, EagerLoading, ErrorResponse, Field, NestedSerializer, NestedSettings,
	SerializerError, SerializerResult, UniqueTogetherValidator, ValidationErrors,
	handle_exception,
};

/// Prelude module for convenient imports
pub mod prelude {
	pub use crate::{
		BoundSerializer, CascadeAction, EagerLoading, Field, Filter, ForeignKey, GenericRelation,
		ManyToMany, MemoryStorage, ModelSchema, NestedSerializer, NestedSettings, Record, Schema,
		SerializerError, Storage, Transaction, UniqueTogetherValidator, handle_exception,
	};
}
