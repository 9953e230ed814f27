//! Nested serializer definitions and bound instances
//!
//! A [`NestedSerializer`] is declared once per model and shared behind an
//! `Arc`; nested fields hold the child serializer the same way, so any depth
//! of nesting is described by the same type. Binding it to an instance and a
//! payload gives a [`BoundSerializer`], which validates and saves one request.

use crate::error::{SerializerError, SerializerResult, ValidationErrors};
use crate::fields::{Field, FieldKind, type_name};
use crate::orchestrator::{NestedSaveContext, create_in, update_in};
use crate::settings::NestedSettings;
use crate::validators::UniqueTogetherValidator;
use indexmap::IndexMap;
use reinhardt_nested_orm::{Attributes, Record, Transaction, as_pk, load_related};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Serializer for one model, including how its relations are written
#[derive(Debug, Clone)]
pub struct NestedSerializer {
	model: String,
	fields: IndexMap<String, Field>,
	unique_together: Vec<UniqueTogetherValidator>,
	save_kwargs: IndexMap<String, Value>,
	select_related: Vec<String>,
	prefetch_related: Vec<String>,
	settings: Arc<NestedSettings>,
}

/// Builder for [`NestedSerializer`]
///
/// # Examples
///
/// ```
/// use reinhardt_nested_serializers::{Field, NestedSerializer, UniqueTogetherValidator};
///
/// let child = NestedSerializer::builder("child")
/// 	.field(Field::id())
/// 	.field(Field::char("name"))
/// 	.unique_together(UniqueTogetherValidator::deferred(vec!["name", "parent"]))
/// 	.build();
/// let person = NestedSerializer::builder("person")
/// 	.field(Field::id())
/// 	.field(Field::char("name"))
/// 	.field(Field::nested_many("children", child).optional())
/// 	.prefetch_related(&["children"])
/// 	.build();
/// assert_eq!(person.model(), "person");
/// assert!(person.field("children").unwrap().is_nested());
/// ```
#[derive(Debug)]
pub struct NestedSerializerBuilder {
	inner: NestedSerializer,
}

impl NestedSerializerBuilder {
	pub fn field(mut self, field: Field) -> Self {
		self.inner.fields.insert(field.name.clone(), field);
		self
	}

	pub fn unique_together(mut self, validator: UniqueTogetherValidator) -> Self {
		self.inner.unique_together.push(validator);
		self
	}

	/// Extra attributes passed to the nested save of a relation field
	///
	/// The value must be a JSON object; anything else is reported as
	/// [`SerializerError::ImproperlyConfigured`] when the field is saved.
	pub fn save_kwargs(mut self, field: impl Into<String>, kwargs: Value) -> Self {
		self.inner.save_kwargs.insert(field.into(), kwargs);
		self
	}

	pub fn select_related(mut self, fields: &[&str]) -> Self {
		self.inner
			.select_related
			.extend(fields.iter().map(|f| (*f).to_string()));
		self
	}

	pub fn prefetch_related(mut self, fields: &[&str]) -> Self {
		self.inner
			.prefetch_related
			.extend(fields.iter().map(|f| (*f).to_string()));
		self
	}

	pub fn settings(mut self, settings: NestedSettings) -> Self {
		self.inner.settings = Arc::new(settings);
		self
	}

	pub fn build(self) -> Arc<NestedSerializer> {
		Arc::new(self.inner)
	}
}

/// Options of one validation pass
#[derive(Debug, Clone, Copy)]
pub(crate) struct ValidationPass<'a> {
	pub partial: bool,
	pub depth: usize,
	pub settings: &'a NestedSettings,
}

impl ValidationPass<'_> {
	fn deeper(self) -> Self {
		Self {
			depth: self.depth + 1,
			..self
		}
	}
}

impl NestedSerializer {
	pub fn builder(model: impl Into<String>) -> NestedSerializerBuilder {
		NestedSerializerBuilder {
			inner: NestedSerializer {
				model: model.into(),
				fields: IndexMap::new(),
				unique_together: Vec::new(),
				save_kwargs: IndexMap::new(),
				select_related: Vec::new(),
				prefetch_related: Vec::new(),
				settings: Arc::new(NestedSettings::default()),
			},
		}
	}

	pub fn model(&self) -> &str {
		&self.model
	}

	pub fn field(&self, name: &str) -> Option<&Field> {
		self.fields.get(name)
	}

	/// Declared fields in declaration order
	pub fn fields(&self) -> impl Iterator<Item = &Field> {
		self.fields.values()
	}

	pub fn unique_together_validators(&self) -> &[UniqueTogetherValidator] {
		&self.unique_together
	}

	pub fn select_related_fields(&self) -> &[String] {
		&self.select_related
	}

	pub fn prefetch_related_fields(&self) -> &[String] {
		&self.prefetch_related
	}

	pub fn settings(&self) -> &Arc<NestedSettings> {
		&self.settings
	}

	/// Configured save kwargs of a relation field
	pub(crate) fn configured_save_kwargs(&self, field: &str) -> Option<&Value> {
		self.save_kwargs.get(field)
	}

	/// Bind to an instance (`None` to create) and an incoming payload
	pub fn bind(self: &Arc<Self>, instance: Option<Record>, data: Value) -> BoundSerializer {
		BoundSerializer {
			serializer: Arc::clone(self),
			instance,
			data,
			partial: false,
			depth: 0,
			settings: Arc::clone(&self.settings),
			supplementary: Vec::new(),
			validated: None,
			errors: ValidationErrors::new(),
		}
	}

	/// Validate `data` and return the validated attributes keyed by field name
	pub(crate) fn run_validation(
		&self,
		tx: &Transaction<'_>,
		data: &Value,
		instance: Option<&Record>,
		supplementary: &[Field],
		pass: ValidationPass<'_>,
	) -> SerializerResult<Attributes> {
		let mut errors = ValidationErrors::new();
		if pass.depth > pass.settings.max_depth {
			errors.add_non_field(format!(
				"Maximum nesting depth of {} exceeded.",
				pass.settings.max_depth
			));
			return Err(errors.into());
		}
		let Value::Object(input) = data else {
			errors.add_non_field(format!(
				"Invalid data. Expected a dictionary, but got {}.",
				type_name(data)
			));
			return Err(errors.into());
		};

		let mut validated = Attributes::new();
		for field in self.fields.values().chain(supplementary) {
			if field.read_only {
				continue;
			}
			if let FieldKind::Hidden { value } = &field.kind {
				validated.insert(field.name.clone(), value.clone());
				continue;
			}
			let Some(value) = input.get(&field.name) else {
				if field.required && !pass.partial {
					errors.add(&field.name, "This field is required.");
				}
				continue;
			};
			if value.is_null() {
				if field.allow_null {
					validated.insert(field.name.clone(), Value::Null);
				} else {
					errors.add(&field.name, "This field may not be null.");
				}
				continue;
			}

			match &field.kind {
				FieldKind::Nested {
					serializer,
					many: false,
				} => match serializer.run_validation(tx, value, None, &[], pass.deeper()) {
					Ok(child) => {
						validated.insert(field.name.clone(), Value::Object(child));
					}
					Err(SerializerError::Validation(e)) => {
						errors.insert_nested(&field.name, e.into_value());
					}
					Err(other) => return Err(other),
				},
				FieldKind::Nested {
					serializer,
					many: true,
				} => {
					let Value::Array(items) = value else {
						errors.add(
							&field.name,
							format!(
								"Expected a list of items but got type \"{}\".",
								type_name(value)
							),
						);
						continue;
					};
					let mut children = Vec::with_capacity(items.len());
					let mut item_errors = Vec::with_capacity(items.len());
					let mut failed = false;
					for item in items {
						if item.is_null() {
							item_errors.push(Value::Object(Map::new()));
							continue;
						}
						match serializer.run_validation(tx, item, None, &[], pass.deeper()) {
							Ok(child) => {
								children.push(Value::Object(child));
								item_errors.push(Value::Object(Map::new()));
							}
							Err(SerializerError::Validation(e)) => {
								failed = true;
								item_errors.push(e.into_value());
							}
							Err(other) => return Err(other),
						}
					}
					if failed {
						errors.insert_nested(&field.name, Value::Array(item_errors));
					} else {
						validated.insert(field.name.clone(), Value::Array(children));
					}
				}
				FieldKind::PrimaryKeyRelated { model } => match as_pk(value) {
					Some(pk) => {
						if tx.get(model, pk)?.is_some() {
							validated.insert(field.name.clone(), Value::from(pk));
						} else {
							errors.add(
								&field.name,
								format!("Invalid pk \"{}\" - object does not exist.", pk),
							);
						}
					}
					None => {
						errors.add(
							&field.name,
							format!(
								"Incorrect type. Expected pk value, received {}.",
								type_name(value)
							),
						);
					}
				},
				_ => match field.to_internal_value(value) {
					Ok(coerced) => {
						validated.insert(field.name.clone(), coerced);
					}
					Err(e) => errors.push(e)?,
				},
			}
		}
		if !errors.is_empty() {
			return Err(errors.into());
		}

		for validator in &self.unique_together {
			if let Err(e) = validator.validate(tx, &self.model, &validated, instance) {
				errors.push(e)?;
			}
		}
		if !errors.is_empty() {
			return Err(errors.into());
		}
		Ok(validated)
	}

	/// Render a stored row through the declared fields
	pub fn to_representation(&self, tx: &Transaction<'_>, record: &Record) -> SerializerResult<Value> {
		Ok(self
			.represent_many(tx, std::slice::from_ref(record))?
			.pop()
			.unwrap_or(Value::Null))
	}

	/// Render rows, loading each nested relation once for all of them
	///
	/// Nested lists are ordered by primary key.
	pub fn represent_many(&self, tx: &Transaction<'_>, records: &[Record]) -> SerializerResult<Vec<Value>> {
		let schema = tx.schema();
		let pk_name = schema.pk_name(&self.model)?;
		let mut rows: Vec<Map<String, Value>> = records.iter().map(|_| Map::new()).collect();

		for field in self.fields.values() {
			match &field.kind {
				FieldKind::Hidden { .. } => {}
				FieldKind::Nested { serializer, many } => {
					let descriptor = schema.require_relation(&self.model, &field.name)?;
					let mut grouped = load_related(tx, &self.model, descriptor, records)?;
					let mut related = Vec::new();
					let mut counts = Vec::with_capacity(records.len());
					for record in records {
						let mut rows_for_record = grouped.remove(&record.pk).unwrap_or_default();
						rows_for_record.sort_by_key(|r| r.pk);
						counts.push(rows_for_record.len());
						related.extend(rows_for_record);
					}
					let mut rendered = serializer.represent_many(tx, &related)?.into_iter();
					for (row, count) in rows.iter_mut().zip(counts) {
						let items: Vec<Value> = rendered.by_ref().take(count).collect();
						let value = if *many {
							Value::Array(items)
						} else {
							items.into_iter().next().unwrap_or(Value::Null)
						};
						row.insert(field.name.clone(), value);
					}
				}
				FieldKind::PrimaryKeyRelated { .. } => {
					let attname = schema
						.relation(&self.model, &field.name)
						.and_then(|r| r.attname())
						.unwrap_or(&field.name);
					for (row, record) in rows.iter_mut().zip(records) {
						row.insert(
							field.name.clone(),
							record.get(attname).cloned().unwrap_or(Value::Null),
						);
					}
				}
				_ => {
					for (row, record) in rows.iter_mut().zip(records) {
						let value = if field.name == pk_name {
							Value::from(record.pk)
						} else {
							record.get(&field.name).cloned().unwrap_or(Value::Null)
						};
						row.insert(field.name.clone(), value);
					}
				}
			}
		}
		Ok(rows.into_iter().map(Value::Object).collect())
	}
}

/// A serializer bound to one instance and payload
#[derive(Debug)]
pub struct BoundSerializer {
	serializer: Arc<NestedSerializer>,
	instance: Option<Record>,
	data: Value,
	partial: bool,
	depth: usize,
	settings: Arc<NestedSettings>,
	supplementary: Vec<Field>,
	validated: Option<Attributes>,
	errors: ValidationErrors,
}

impl BoundSerializer {
	/// Do not require fields that are absent from the payload
	pub fn partial(mut self, partial: bool) -> Self {
		self.partial = partial;
		self
	}

	/// Attach a field for this invocation only
	///
	/// Used to expose values that are injected at save time (such as the
	/// back-reference to a parent) to validation, without touching the shared
	/// serializer definition. A supplementary field replaces an earlier one of
	/// the same name.
	pub fn with_supplementary_field(mut self, field: Field) -> Self {
		self.supplementary.retain(|f| f.name != field.name);
		self.supplementary.push(field);
		self
	}

	/// Run as a child of a nested save
	pub(crate) fn within(mut self, ctx: &NestedSaveContext) -> Self {
		self.depth = ctx.depth + 1;
		self.partial = ctx.partial;
		self.settings = Arc::clone(&ctx.settings);
		self
	}

	pub fn serializer(&self) -> &Arc<NestedSerializer> {
		&self.serializer
	}

	pub fn instance(&self) -> Option<&Record> {
		self.instance.as_ref()
	}

	/// Incoming payload; after `save` it carries the primary keys of every
	/// entity written
	pub fn data(&self) -> &Value {
		&self.data
	}

	pub fn supplementary_fields(&self) -> &[Field] {
		&self.supplementary
	}

	/// Validate the payload
	///
	/// Returns `Ok(false)` with [`errors`](Self::errors) populated when the
	/// payload is invalid; storage failures are returned as errors.
	pub fn is_valid(&mut self, tx: &Transaction<'_>) -> SerializerResult<bool> {
		let pass = ValidationPass {
			partial: self.partial,
			depth: self.depth,
			settings: &self.settings,
		};
		match self.serializer.run_validation(
			tx,
			&self.data,
			self.instance.as_ref(),
			&self.supplementary,
			pass,
		) {
			Ok(validated) => {
				self.validated = Some(validated);
				self.errors = ValidationErrors::new();
				Ok(true)
			}
			Err(SerializerError::Validation(errors)) => {
				tracing::trace!(model = %self.serializer.model, %errors, "validation failed");
				self.validated = None;
				self.errors = errors;
				Ok(false)
			}
			Err(other) => Err(other),
		}
	}

	/// Validate the payload, returning the validation errors as an error
	pub fn is_valid_or_raise(&mut self, tx: &Transaction<'_>) -> SerializerResult<()> {
		if self.is_valid(tx)? {
			Ok(())
		} else {
			Err(SerializerError::Validation(self.errors.clone()))
		}
	}

	pub fn errors(&self) -> &ValidationErrors {
		&self.errors
	}

	pub fn validated_data(&self) -> SerializerResult<&Attributes> {
		self.validated.as_ref().ok_or(SerializerError::NotValidated)
	}

	/// Persist the validated payload, creating or updating the bound instance
	///
	/// `kwargs` keyed by a nested field are passed to that field's nested
	/// saves and must be JSON objects; every other key is written to the root
	/// entity over the validated value.
	pub fn save(&mut self, tx: &mut Transaction<'_>, kwargs: Attributes) -> SerializerResult<Record> {
		let validated = self.validated.as_ref().ok_or(SerializerError::NotValidated)?;
		let mut ctx = NestedSaveContext::new(Arc::clone(&self.settings))
			.with_depth(self.depth)
			.with_partial(self.partial);
		let mut pending = validated.clone();
		for (key, value) in kwargs {
			if self.serializer.field(&key).is_some_and(Field::is_nested) {
				ctx = ctx.with_save_kwargs(key, value);
			} else {
				pending.insert(key, value);
			}
		}

		let mut raw = match &self.data {
			Value::Object(map) => map.clone(),
			_ => Attributes::new(),
		};
		let record = match &self.instance {
			Some(instance) => update_in(tx, &self.serializer, instance, pending, &mut raw, &ctx)?,
			None => create_in(tx, &self.serializer, pending, &mut raw, &ctx)?,
		};
		self.data = Value::Object(raw);
		self.instance = Some(record.clone());
		Ok(record)
	}
}
