//! Direct relation resolution
//!
//! Direct relations are written before the root entity so that the key the
//! root stores already exists when the root is saved.

use crate::classifier::RelationField;
use crate::error::SerializerResult;
use crate::orchestrator::NestedSaveContext;
use crate::serializer::NestedSerializer;
use reinhardt_nested_orm::{Attributes, Transaction, as_pk};
use serde_json::Value;

/// Find-or-create the entity of each direct relation and store its key in
/// `pending` under the relation's storage attribute
///
/// An item carrying the primary key of an existing entity updates it; any
/// other item creates one. The saved key is also recorded into the item in
/// `raw`.
///
/// # Errors
///
/// Validation errors of a related entity are returned nested under its field.
/// Nothing of the root entity has been written at that point.
pub fn resolve_direct(
	tx: &mut Transaction<'_>,
	parent: &NestedSerializer,
	pending: &mut Attributes,
	direct: &[RelationField],
	raw: &mut Attributes,
	ctx: &NestedSaveContext,
) -> SerializerResult<()> {
	let schema = tx.schema();
	for relation in direct {
		let Some(Value::Object(item)) = raw.get_mut(&relation.field_name) else {
			continue;
		};
		let related_model = relation.descriptor.related_model.as_str();
		let pk_name = schema.pk_name(related_model)?;
		let kwargs = ctx.kwargs_for(parent, &relation.field_name)?;

		let existing = match item.get(pk_name).and_then(as_pk) {
			Some(pk) => tx.get(related_model, pk)?,
			None => None,
		};
		tracing::trace!(
			field = %relation.field_name,
			existing = existing.as_ref().map(|r| r.pk),
			"resolving direct relation"
		);

		let mut child = relation
			.serializer
			.bind(existing, Value::Object(item.clone()))
			.within(ctx);
		let saved = child
			.is_valid_or_raise(tx)
			.and_then(|()| child.save(tx, kwargs))
			.map_err(|e| e.nested_under(&relation.field_name, None))?;

		if let Value::Object(written) = child.data() {
			*item = written.clone();
		}
		item.insert(pk_name.to_string(), Value::from(saved.pk));

		let attname = relation
			.descriptor
			.attname()
			.unwrap_or(relation.field_name.as_str());
		pending.insert(attname.to_string(), Value::from(saved.pk));
	}
	Ok(())
}
