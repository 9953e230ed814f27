//! Transactional nested save
//!
//! Every level of a nested payload is written through the same two steps:
//! [`create_in`] and [`update_in`]. Each classifies the nested fields,
//! resolves direct relations, writes the root entity and reconciles reverse
//! relations; updates then delete stale related entities. The public entry
//! points wrap a whole save in one transaction.

use crate::classifier::{classify, storage_attrs};
use crate::direct::resolve_direct;
use crate::error::{SerializerError, SerializerResult};
use crate::reverse::{delete_stale, reconcile_reverse};
use crate::serializer::NestedSerializer;
use crate::settings::NestedSettings;
use reinhardt_nested_orm::{Attributes, Record, Storage, Transaction, atomic};
use serde_json::{Map, Value};
use std::sync::Arc;

/// State carried down a nested save
#[derive(Debug, Clone)]
pub struct NestedSaveContext {
	/// Depth of the entity being saved; the root is 0
	pub depth: usize,
	/// Propagated to nested validation
	pub partial: bool,
	pub settings: Arc<NestedSettings>,
	save_kwargs: Map<String, Value>,
}

impl NestedSaveContext {
	pub fn new(settings: Arc<NestedSettings>) -> Self {
		Self {
			depth: 0,
			partial: false,
			settings,
			save_kwargs: Map::new(),
		}
	}

	pub fn with_depth(mut self, depth: usize) -> Self {
		self.depth = depth;
		self
	}

	pub fn with_partial(mut self, partial: bool) -> Self {
		self.partial = partial;
		self
	}

	/// Kwargs passed by the caller for the nested saves of one relation field
	pub fn with_save_kwargs(mut self, field: impl Into<String>, kwargs: Value) -> Self {
		self.save_kwargs.insert(field.into(), kwargs);
		self
	}

	/// Save kwargs of a relation field: caller kwargs over configured ones
	///
	/// # Errors
	///
	/// Returns [`SerializerError::ImproperlyConfigured`] when the kwargs are
	/// not a JSON object.
	pub fn kwargs_for(&self, serializer: &NestedSerializer, field: &str) -> SerializerResult<Attributes> {
		let Some(kwargs) = self
			.save_kwargs
			.get(field)
			.or_else(|| serializer.configured_save_kwargs(field))
		else {
			return Ok(Attributes::new());
		};
		match kwargs {
			Value::Object(map) => Ok(map.clone()),
			other => Err(SerializerError::ImproperlyConfigured(format!(
				"Arguments to the nested save of '{}.{}' must be a mapping, got {}",
				serializer.model(),
				field,
				other
			))),
		}
	}
}

/// Create the root entity of `serializer` and everything nested in `raw`
///
/// `pending` are the validated attributes (plus save kwargs). `raw` is the
/// incoming payload of this level; primary keys of written entities are
/// recorded into it.
pub fn create_in(
	tx: &mut Transaction<'_>,
	serializer: &NestedSerializer,
	mut pending: Attributes,
	raw: &mut Attributes,
	ctx: &NestedSaveContext,
) -> SerializerResult<Record> {
	let schema = tx.schema();
	let model = serializer.model();
	let relations = classify(serializer.fields(), &mut pending, model, schema)?;

	resolve_direct(tx, serializer, &mut pending, &relations.direct, raw, ctx)?;
	let record = tx.create(model, storage_attrs(schema, model, pending))?;
	tracing::debug!(model, pk = record.pk, depth = ctx.depth, "entity created");

	reconcile_reverse(tx, serializer, &record, &relations.reverse, raw, ctx)?;
	Ok(record)
}

/// Update `instance` and reconcile everything nested in `raw`
///
/// Related entities stored against `instance` but absent from a reverse
/// relation given in `raw` are deleted (or unlinked) last.
pub fn update_in(
	tx: &mut Transaction<'_>,
	serializer: &NestedSerializer,
	instance: &Record,
	mut pending: Attributes,
	raw: &mut Attributes,
	ctx: &NestedSaveContext,
) -> SerializerResult<Record> {
	let schema = tx.schema();
	let model = serializer.model();
	let relations = classify(serializer.fields(), &mut pending, model, schema)?;

	resolve_direct(tx, serializer, &mut pending, &relations.direct, raw, ctx)?;
	let record = tx.update(model, instance.pk, storage_attrs(schema, model, pending))?;
	tracing::debug!(model, pk = record.pk, depth = ctx.depth, "entity updated");

	reconcile_reverse(tx, serializer, &record, &relations.reverse, raw, ctx)?;
	delete_stale(tx, &record, &relations.reverse, raw)?;
	Ok(record)
}

impl NestedSerializer {
	/// Validate `payload` and create the entity it describes, atomically
	///
	/// # Examples
	///
	/// ```
	/// use reinhardt_nested_orm::{MemoryStorage, ModelSchema, Schema};
	/// use reinhardt_nested_serializers::{Field, NestedSerializer};
	/// use serde_json::json;
	///
	/// let storage = MemoryStorage::new(
	/// 	Schema::builder().model(ModelSchema::new("person")).build().unwrap(),
	/// );
	/// let person = NestedSerializer::builder("person")
	/// 	.field(Field::id())
	/// 	.field(Field::char("name"))
	/// 	.build();
	///
	/// let record = person.create(&storage, json!({"name": "Fred"})).unwrap();
	/// assert_eq!(record.get("name"), Some(&json!("Fred")));
	/// ```
	pub fn create(self: &Arc<Self>, storage: &dyn Storage, payload: Value) -> SerializerResult<Record> {
		self.save_atomic(storage, None, payload, false)
	}

	/// Validate `payload` and apply it to `instance`, atomically
	pub fn update(
		self: &Arc<Self>,
		storage: &dyn Storage,
		instance: Record,
		payload: Value,
	) -> SerializerResult<Record> {
		self.save_atomic(storage, Some(instance), payload, false)
	}

	/// Like [`update`](Self::update), without requiring absent fields
	pub fn partial_update(
		self: &Arc<Self>,
		storage: &dyn Storage,
		instance: Record,
		payload: Value,
	) -> SerializerResult<Record> {
		self.save_atomic(storage, Some(instance), payload, true)
	}

	fn save_atomic(
		self: &Arc<Self>,
		storage: &dyn Storage,
		instance: Option<Record>,
		payload: Value,
		partial: bool,
	) -> SerializerResult<Record> {
		let result = atomic(storage, |tx| {
			let mut bound = self.bind(instance, payload).partial(partial);
			bound.is_valid_or_raise(tx)?;
			bound.save(tx, Attributes::new())
		});
		if let Err(e) = &result {
			tracing::debug!(model = %self.model(), error = %e, "nested save rolled back");
		}
		result
	}
}
