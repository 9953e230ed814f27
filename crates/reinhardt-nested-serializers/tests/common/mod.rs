//! Shared models, serializers and fixtures for nested write tests
//!
//! ```text
//! person --1:1--> profile        person --fk--> school
//! person <--fk-- child <--fk-- toy           child <--fk(restrict)-- pet
//! person <--m2m-- club           person --generic--> note
//! person --m2m(custom through)--> tag
//! ```

#![allow(dead_code)]

use reinhardt_nested_orm::{
	CascadeAction, Filter, ForeignKey, GenericRelation, LinkSide, ManyToMany, MemoryStorage,
	ModelSchema, Pk, Record, RelationKind, Schema, Storage, Transaction,
};
use reinhardt_nested_serializers::{Field, NestedSerializer, UniqueTogetherValidator};
use rstest::fixture;
use serde_json::Value;
use std::sync::Arc;

pub fn schema() -> Schema {
	Schema::builder()
		.model(
			ModelSchema::new("person")
				.foreign_key(
					ForeignKey::one_to_one("profile", "profile")
						.related_name("person")
						.on_delete(CascadeAction::SetNull)
						.null(true),
				)
				.foreign_key(
					ForeignKey::new("school", "school")
						.related_name("students")
						.null(true),
				)
				.many_to_many(ManyToMany::new("tags", "tag").through_model("person_tag"))
				.generic_relation(GenericRelation::new("notes", "note")),
		)
		.model(ModelSchema::new("profile"))
		.model(ModelSchema::new("school"))
		.model(
			ModelSchema::new("child").foreign_key(
				ForeignKey::new("parent", "person")
					.related_name("children")
					.on_delete(CascadeAction::Cascade),
			),
		)
		.model(
			ModelSchema::new("toy").foreign_key(
				ForeignKey::new("owner", "child")
					.related_name("toys")
					.on_delete(CascadeAction::Cascade),
			),
		)
		.model(
			ModelSchema::new("pet").foreign_key(
				ForeignKey::new("owner", "child")
					.related_name("pets")
					.on_delete(CascadeAction::Restrict),
			),
		)
		.model(
			ModelSchema::new("club")
				.many_to_many(ManyToMany::new("members", "person").related_name("clubs")),
		)
		.model(ModelSchema::new("note"))
		.model(ModelSchema::new("tag"))
		.build()
		.expect("test schema is valid")
}

#[fixture]
pub fn storage() -> MemoryStorage {
	MemoryStorage::new(schema())
}

pub fn toy_serializer() -> Arc<NestedSerializer> {
	NestedSerializer::builder("toy")
		.field(Field::id())
		.field(Field::char("name").max_length(50))
		.build()
}

pub fn child_serializer() -> Arc<NestedSerializer> {
	NestedSerializer::builder("child")
		.field(Field::id())
		.field(Field::char("name").max_length(50))
		.field(Field::nested_many("toys", toy_serializer()).optional())
		.unique_together(UniqueTogetherValidator::deferred(vec!["name", "parent"]))
		.build()
}

pub fn profile_serializer() -> Arc<NestedSerializer> {
	NestedSerializer::builder("profile")
		.field(Field::id())
		.field(Field::char("bio"))
		.build()
}

/// Profile serializer writing its person through the reverse one-to-one
pub fn profile_with_person() -> Arc<NestedSerializer> {
	let person = NestedSerializer::builder("person")
		.field(Field::id())
		.field(Field::char("name"))
		.build();
	NestedSerializer::builder("profile")
		.field(Field::id())
		.field(Field::char("bio"))
		.field(Field::nested("person", person).optional().allow_null())
		.build()
}

pub fn club_serializer() -> Arc<NestedSerializer> {
	NestedSerializer::builder("club")
		.field(Field::id())
		.field(Field::char("name"))
		.build()
}

pub fn note_serializer() -> Arc<NestedSerializer> {
	NestedSerializer::builder("note")
		.field(Field::id())
		.field(Field::char("text"))
		.build()
}

pub fn tag_serializer() -> Arc<NestedSerializer> {
	NestedSerializer::builder("tag")
		.field(Field::id())
		.field(Field::char("label"))
		.build()
}

/// Person serializer with the given children serializer
pub fn person_serializer_with(children: Arc<NestedSerializer>) -> Arc<NestedSerializer> {
	NestedSerializer::builder("person")
		.field(Field::id())
		.field(Field::char("name"))
		.field(Field::nested("profile", profile_serializer()).optional().allow_null())
		.field(Field::primary_key_related("school", "school").optional().allow_null())
		.field(Field::nested_many("children", children).optional())
		.field(Field::nested_many("clubs", club_serializer()).optional())
		.field(Field::nested_many("notes", note_serializer()).optional())
		.field(Field::nested_many("tags", tag_serializer()).optional())
		.select_related(&["profile"])
		.prefetch_related(&["children", "clubs"])
		.build()
}

#[fixture]
pub fn person() -> Arc<NestedSerializer> {
	person_serializer_with(child_serializer())
}

/// All rows of a model, ordered by primary key
pub fn rows(storage: &MemoryStorage, model: &str) -> Vec<Record> {
	storage.filter(model, &Filter::new()).unwrap()
}

pub fn pks(storage: &MemoryStorage, model: &str) -> Vec<Pk> {
	rows(storage, model).into_iter().map(|r| r.pk).collect()
}

/// Number of link rows behind a many-to-many field
pub fn link_count(storage: &MemoryStorage, model: &str, field: &str) -> usize {
	let descriptor = storage.schema().relation(model, field).unwrap();
	let RelationKind::ManyToMany { link, .. } = &descriptor.kind else {
		panic!("{model}.{field} is not a many-to-many relation");
	};
	let sources = pks(storage, &link.source_model);
	storage.links(link, LinkSide::Source, &sources).unwrap().len()
}

/// Render a stored row through a serializer
pub fn represent(storage: &MemoryStorage, serializer: &NestedSerializer, record: &Record) -> Value {
	let tx = Transaction::begin(storage).unwrap();
	let value = serializer.to_representation(&tx, record).unwrap();
	tx.rollback().unwrap();
	value
}
