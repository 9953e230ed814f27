//! Relation classification
//!
//! Splits the nested fields of a save into relations that must be written
//! before the root entity (the root holds their key) and relations written
//! after it (the other side or a link table holds the key).

use crate::error::{SerializerError, SerializerResult};
use crate::fields::{Field, FieldKind};
use crate::serializer::NestedSerializer;
use reinhardt_nested_orm::{Attributes, Cardinality, RelationDescriptor, Schema};
use std::sync::Arc;

/// A nested field paired with its relation metadata
#[derive(Debug, Clone)]
pub struct RelationField {
	pub field_name: String,
	pub descriptor: RelationDescriptor,
	pub serializer: Arc<NestedSerializer>,
}

/// Nested fields of one save, in declaration order
#[derive(Debug, Clone, Default)]
pub struct Classification {
	/// Resolved before the root entity is saved
	pub direct: Vec<RelationField>,
	/// Reconciled after the root entity is saved
	pub reverse: Vec<RelationField>,
}

/// Classify the nested fields present in `pending`
///
/// Classified fields are removed from `pending` so that they are not written
/// as columns of the root entity. Fields absent from `pending` are left alone,
/// as are direct relations set to null: those are a plain assignment of a null
/// key.
///
/// # Errors
///
/// Returns [`SerializerError::ImproperlyConfigured`] when a field's `many`
/// flag contradicts the cardinality of its relation.
pub fn classify<'f>(
	fields: impl IntoIterator<Item = &'f Field>,
	pending: &mut Attributes,
	model: &str,
	schema: &Schema,
) -> SerializerResult<Classification> {
	let mut classification = Classification::default();
	for field in fields {
		if field.read_only {
			continue;
		}
		let FieldKind::Nested { serializer, many } = &field.kind else {
			continue;
		};
		let Some(descriptor) = schema.relation(model, &field.name) else {
			continue;
		};
		let Some(value) = pending.get(&field.name) else {
			continue;
		};
		if *many != (descriptor.cardinality() == Cardinality::Many) {
			return Err(SerializerError::ImproperlyConfigured(format!(
				"Field '{}' of '{}' is declared with many={} but the relation is {:?}",
				field.name,
				model,
				many,
				descriptor.cardinality()
			)));
		}

		let relation = RelationField {
			field_name: field.name.clone(),
			descriptor: descriptor.clone(),
			serializer: Arc::clone(serializer),
		};
		if descriptor.is_direct() {
			if value.is_null() {
				continue;
			}
			classification.direct.push(relation);
		} else {
			classification.reverse.push(relation);
		}
		pending.remove(&field.name);
	}
	tracing::trace!(
		model,
		direct = classification.direct.len(),
		reverse = classification.reverse.len(),
		"relations classified"
	);
	Ok(classification)
}

/// Map field names of direct relations to their storage attribute
pub fn storage_attrs(schema: &Schema, model: &str, pending: Attributes) -> Attributes {
	pending
		.into_iter()
		.map(|(name, value)| {
			let attname = schema
				.relation(model, &name)
				.and_then(|r| r.attname())
				.map(str::to_string)
				.unwrap_or(name);
			(attname, value)
		})
		.collect()
}
