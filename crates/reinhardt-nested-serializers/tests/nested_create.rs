//! Nested create

mod common;

use assert_json_diff::assert_json_eq;
use common::*;
use reinhardt_nested_orm::{MemoryStorage, Storage};
use reinhardt_nested_serializers::{
	Field, NestedSerializer, NestedSettings, SerializerError, UniqueTogetherValidator,
};
use rstest::*;
use serde_json::{Value, json};
use std::sync::Arc;

#[rstest]
fn test_create_with_nested_children(storage: MemoryStorage, person: Arc<NestedSerializer>) {
	let payload = json!({
		"name": "Fred Smith",
		"children": [{"name": "Bobby"}, {"name": "Steve"}]
	});

	let parent = person.create(&storage, payload).unwrap();

	assert_eq!(storage.row_count("person"), 1);
	let children = rows(&storage, "child");
	assert_eq!(children.len(), 2);
	for child in &children {
		assert_eq!(child.get_pk("parent_id"), Some(parent.pk));
	}
	assert_eq!(children[0].get("name"), Some(&json!("Bobby")));
	assert_eq!(children[1].get("name"), Some(&json!("Steve")));
}

#[rstest]
fn test_create_resolves_direct_relation_first(storage: MemoryStorage, person: Arc<NestedSerializer>) {
	let payload = json!({"name": "Fred", "profile": {"bio": "Quarry worker"}});

	let parent = person.create(&storage, payload).unwrap();

	let profiles = rows(&storage, "profile");
	assert_eq!(profiles.len(), 1);
	assert_eq!(profiles[0].get("bio"), Some(&json!("Quarry worker")));
	assert_eq!(parent.get_pk("profile_id"), Some(profiles[0].pk));
}

#[rstest]
fn test_create_writes_primary_key_related_through_attname(storage: MemoryStorage, person: Arc<NestedSerializer>) {
	let school = storage
		.create("school", json!({"name": "Bedrock High"}).as_object().cloned().unwrap())
		.unwrap();

	let parent = person
		.create(&storage, json!({"name": "Fred", "school": school.pk}))
		.unwrap();

	assert_eq!(parent.get_pk("school_id"), Some(school.pk));
	assert!(parent.get("school").is_none());
}

#[rstest]
fn test_create_rejects_unknown_primary_key(storage: MemoryStorage, person: Arc<NestedSerializer>) {
	let err = person
		.create(&storage, json!({"name": "Fred", "school": 99}))
		.unwrap_err();

	assert_json_eq!(
		err.validation_errors().unwrap().clone().into_value(),
		json!({"school": ["Invalid pk \"99\" - object does not exist."]})
	);
	assert_eq!(storage.row_count("person"), 0);
}

#[rstest]
fn test_create_multi_level(storage: MemoryStorage, person: Arc<NestedSerializer>) {
	let payload = json!({
		"name": "Fred",
		"children": [
			{"name": "Pebbles", "toys": [{"name": "Rattle"}, {"name": "Ball"}]},
			{"name": "Bam-Bam", "toys": []}
		]
	});

	person.create(&storage, payload).unwrap();

	let children = rows(&storage, "child");
	let toys = rows(&storage, "toy");
	assert_eq!(children.len(), 2);
	assert_eq!(toys.len(), 2);
	for toy in &toys {
		assert_eq!(toy.get_pk("owner_id"), Some(children[0].pk));
	}
}

#[rstest]
fn test_create_generic_relation(storage: MemoryStorage, person: Arc<NestedSerializer>) {
	let parent = person
		.create(
			&storage,
			json!({"name": "Fred", "notes": [{"text": "likes bowling"}, {"text": "works at the quarry"}]}),
		)
		.unwrap();

	let notes = rows(&storage, "note");
	assert_eq!(notes.len(), 2);
	for note in &notes {
		assert_eq!(note.get("content_type"), Some(&json!("person")));
		assert_eq!(note.get_pk("object_id"), Some(parent.pk));
	}
}

#[rstest]
fn test_create_many_to_many_links_every_item(storage: MemoryStorage, person: Arc<NestedSerializer>) {
	person
		.create(
			&storage,
			json!({"name": "Fred", "clubs": [{"name": "Water Buffaloes"}, {"name": "Bowling"}]}),
		)
		.unwrap();

	assert_eq!(storage.row_count("club"), 2);
	assert_eq!(link_count(&storage, "club", "members"), 2);
}

#[rstest]
fn test_create_custom_through_does_not_link(storage: MemoryStorage, person: Arc<NestedSerializer>) {
	person
		.create(&storage, json!({"name": "Fred", "tags": [{"label": "caveman"}]}))
		.unwrap();

	assert_eq!(storage.row_count("tag"), 1);
	assert_eq!(link_count(&storage, "person", "tags"), 0);
}

#[rstest]
fn test_create_skips_null_items(storage: MemoryStorage, person: Arc<NestedSerializer>) {
	person
		.create(&storage, json!({"name": "Fred", "children": [null, {"name": "Bobby"}, null]}))
		.unwrap();

	assert_eq!(storage.row_count("child"), 1);
}

#[rstest]
fn test_failed_child_commits_nothing(storage: MemoryStorage, person: Arc<NestedSerializer>) {
	let payload = json!({
		"name": "Fred",
		"profile": {"bio": "Quarry worker"},
		"children": [{"name": "Bobby"}, {}, {"name": "x".repeat(51)}]
	});

	let err = person.create(&storage, payload).unwrap_err();

	assert_json_eq!(
		err.validation_errors().unwrap().clone().into_value(),
		json!({
			"children": [
				{},
				{"name": ["This field is required."]},
				{"name": ["Ensure this field has no more than 50 characters."]}
			]
		})
	);
	for model in ["person", "profile", "child"] {
		assert_eq!(storage.row_count(model), 0, "{model} rows were committed");
	}
	assert!(!storage.in_transaction());
}

#[rstest]
fn test_records_primary_keys_into_payload(storage: MemoryStorage, person: Arc<NestedSerializer>) {
	let mut tx = reinhardt_nested_orm::Transaction::begin(&storage).unwrap();
	let mut bound = person.bind(
		None,
		json!({"name": "Fred", "profile": {"bio": "Quarry"}, "children": [{"name": "Bobby", "toys": [{"name": "Ball"}]}]}),
	);
	assert!(bound.is_valid(&tx).unwrap());
	bound.save(&mut tx, Default::default()).unwrap();
	tx.commit().unwrap();

	let data = bound.data();
	assert_eq!(data["profile"]["id"], json!(1));
	assert_eq!(data["children"][0]["id"], json!(1));
	assert_eq!(data["children"][0]["toys"][0]["id"], json!(1));
	assert_eq!(bound.instance().map(|r| r.pk), Some(1));
}

#[rstest]
fn test_save_kwargs_are_forwarded(storage: MemoryStorage) {
	let person = NestedSerializer::builder("person")
		.field(Field::id())
		.field(Field::char("name"))
		.field(Field::nested_many("children", child_serializer()).optional())
		.save_kwargs("children", json!({"nickname": "kid"}))
		.build();

	person
		.create(&storage, json!({"name": "Fred", "children": [{"name": "Bobby"}]}))
		.unwrap();

	assert_eq!(rows(&storage, "child")[0].get("nickname"), Some(&json!("kid")));
}

#[rstest]
#[case(json!("kid"))]
#[case(json!(["kid"]))]
fn test_save_kwargs_must_be_a_mapping(storage: MemoryStorage, #[case] kwargs: Value) {
	let person = NestedSerializer::builder("person")
		.field(Field::id())
		.field(Field::char("name"))
		.field(Field::nested_many("children", child_serializer()).optional())
		.save_kwargs("children", kwargs)
		.build();

	let err = person
		.create(&storage, json!({"name": "Fred", "children": [{"name": "Bobby"}]}))
		.unwrap_err();

	assert!(matches!(err, SerializerError::ImproperlyConfigured(_)));
	assert_eq!(storage.row_count("person"), 0);
}

#[rstest]
fn test_immediate_unique_together_requires_back_reference(storage: MemoryStorage) {
	let child = NestedSerializer::builder("child")
		.field(Field::id())
		.field(Field::char("name"))
		.unique_together(UniqueTogetherValidator::new(vec!["name", "parent"]))
		.build();
	let person = person_serializer_with(child);

	let err = person
		.create(&storage, json!({"name": "Fred", "children": [{"name": "Bobby"}]}))
		.unwrap_err();

	assert_json_eq!(
		err.validation_errors().unwrap().clone().into_value(),
		json!({"children": [{"parent": ["This field is required."]}]})
	);
}

#[rstest]
fn test_nesting_deeper_than_max_depth_is_rejected(storage: MemoryStorage) {
	let person = NestedSerializer::builder("person")
		.field(Field::id())
		.field(Field::char("name"))
		.field(Field::nested_many("children", child_serializer()).optional())
		.settings(NestedSettings::default().with_max_depth(1))
		.build();

	let err = person
		.create(
			&storage,
			json!({"name": "Fred", "children": [{"name": "Pebbles", "toys": [{"name": "Rattle"}]}]}),
		)
		.unwrap_err();

	assert_json_eq!(
		err.validation_errors().unwrap().clone().into_value(),
		json!({"children": [{"toys": [{"non_field_errors": ["Maximum nesting depth of 1 exceeded."]}]}]})
	);
	assert_eq!(storage.row_count("person"), 0);
}

#[rstest]
fn test_create_reverse_one_to_one(storage: MemoryStorage) {
	let profile = profile_with_person()
		.create(&storage, json!({"bio": "Quarry worker", "person": {"name": "Fred"}}))
		.unwrap();

	let people = rows(&storage, "person");
	assert_eq!(people.len(), 1);
	assert_eq!(people[0].get("name"), Some(&json!("Fred")));
	assert_eq!(people[0].get_pk("profile_id"), Some(profile.pk));
	assert_eq!(storage.row_count("profile"), 1);
}
