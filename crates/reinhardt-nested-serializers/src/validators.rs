//! Uniqueness validators
//!
//! [`UniqueTogetherValidator`] checks that a combination of field values is not
//! already stored. Built with [`UniqueTogetherValidator::deferred`] it becomes
//! the deferred gate used by nested children: while any of its fields is
//! absent (typically the back-reference to a parent that does not exist yet)
//! the check passes, and it runs in full once the reconciler has injected the
//! missing value and validates the child again.

use crate::error::ValidatorError;
use reinhardt_nested_orm::{Attributes, Filter, Record, Transaction};
use serde_json::Value;

/// Validator for a uniqueness constraint spanning several fields
///
/// # Examples
///
/// ```
/// use reinhardt_nested_serializers::UniqueTogetherValidator;
///
/// let validator = UniqueTogetherValidator::deferred(vec!["name", "parent"]);
/// assert!(validator.is_deferred());
/// assert_eq!(validator.message(), "The fields name, parent must make a unique set.");
/// ```
#[derive(Debug, Clone)]
pub struct UniqueTogetherValidator {
	field_names: Vec<String>,
	message: Option<String>,
	deferred: bool,
}

impl UniqueTogetherValidator {
	/// Check on every validation pass; missing fields are required on create
	pub fn new(field_names: Vec<impl Into<String>>) -> Self {
		Self {
			field_names: field_names.into_iter().map(Into::into).collect(),
			message: None,
			deferred: false,
		}
	}

	/// Skip the check until every field has a value
	pub fn deferred(field_names: Vec<impl Into<String>>) -> Self {
		Self {
			deferred: true,
			..Self::new(field_names)
		}
	}

	pub fn with_message(mut self, message: impl Into<String>) -> Self {
		self.message = Some(message.into());
		self
	}

	pub fn field_names(&self) -> &[String] {
		&self.field_names
	}

	pub fn is_deferred(&self) -> bool {
		self.deferred
	}

	pub fn message(&self) -> String {
		self.message.clone().unwrap_or_else(|| {
			format!(
				"The fields {} must make a unique set.",
				self.field_names.join(", ")
			)
		})
	}

	/// Run the check for a row of `model`
	///
	/// `attrs` are validated values keyed by field name. Values missing from
	/// `attrs` are taken from `instance`, which is also excluded from the
	/// lookup. The check is skipped when any value is null.
	///
	/// # Errors
	///
	/// - [`ValidatorError::MissingFields`] when a field is still missing on
	///   create and the validator is not deferred
	/// - [`ValidatorError::UniqueTogetherViolation`] when another row holds the
	///   same combination
	pub fn validate(
		&self,
		tx: &Transaction<'_>,
		model: &str,
		attrs: &Attributes,
		instance: Option<&Record>,
	) -> Result<(), ValidatorError> {
		let schema = tx.schema();
		let mut filter = Filter::new();
		let mut missing = Vec::new();

		for field_name in &self.field_names {
			let attname = schema
				.relation(model, field_name)
				.and_then(|r| r.attname())
				.unwrap_or(field_name);
			let value = attrs
				.get(field_name)
				.or_else(|| attrs.get(attname))
				.or_else(|| instance.and_then(|i| i.get(attname)));
			match value {
				None => missing.push(field_name.clone()),
				Some(Value::Null) => {
					tracing::trace!(model, field = %field_name, "unique together skipped for null value");
					return Ok(());
				}
				Some(value) => filter = filter.eq(attname, value.clone()),
			}
		}

		if !missing.is_empty() {
			if self.deferred || instance.is_some() {
				tracing::trace!(model, ?missing, "unique together check deferred");
				return Ok(());
			}
			return Err(ValidatorError::MissingFields {
				field_names: missing,
				message: "This field is required.".to_string(),
			});
		}

		if let Some(instance) = instance {
			filter = filter.exclude_pks(vec![instance.pk]);
		}
		if tx.count(model, &filter)? > 0 {
			return Err(ValidatorError::UniqueTogetherViolation {
				field_names: self.field_names.clone(),
				message: self.message(),
			});
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use reinhardt_nested_orm::{ForeignKey, MemoryStorage, ModelSchema, Schema, Storage};
	use rstest::*;
	use serde_json::json;

	fn attrs(value: Value) -> Attributes {
		value.as_object().cloned().unwrap()
	}

	#[fixture]
	fn storage() -> MemoryStorage {
		let schema = Schema::builder()
			.model(ModelSchema::new("person"))
			.model(
				ModelSchema::new("child")
					.foreign_key(ForeignKey::new("parent", "person").related_name("children")),
			)
			.build()
			.unwrap();
		let storage = MemoryStorage::new(schema);
		storage.create("person", attrs(json!({"name": "Fred"}))).unwrap();
		storage
			.create("child", attrs(json!({"name": "Pebbles", "parent_id": 1})))
			.unwrap();
		storage
	}

	#[rstest]
	fn test_deferred_validator_skips_missing_fields(storage: MemoryStorage) {
		let tx = Transaction::begin(&storage).unwrap();
		let validator = UniqueTogetherValidator::deferred(vec!["name", "parent"]);
		let result = validator.validate(&tx, "child", &attrs(json!({"name": "Pebbles"})), None);
		assert_eq!(result, Ok(()));
	}

	#[rstest]
	fn test_immediate_validator_requires_missing_fields(storage: MemoryStorage) {
		let tx = Transaction::begin(&storage).unwrap();
		let validator = UniqueTogetherValidator::new(vec!["name", "parent"]);
		let result = validator.validate(&tx, "child", &attrs(json!({"name": "Pebbles"})), None);
		assert_eq!(
			result,
			Err(ValidatorError::MissingFields {
				field_names: vec!["parent".to_string()],
				message: "This field is required.".to_string(),
			})
		);
	}

	#[rstest]
	#[case(json!({"name": "Pebbles", "parent": 1}))]
	#[case(json!({"name": "Pebbles", "parent_id": 1}))]
	fn test_conflict_is_reported(storage: MemoryStorage, #[case] input: Value) {
		let tx = Transaction::begin(&storage).unwrap();
		let validator = UniqueTogetherValidator::deferred(vec!["name", "parent"]);
		let err = validator.validate(&tx, "child", &attrs(input), None).unwrap_err();
		assert!(err.is_uniqueness_violation());
		assert_eq!(err.to_string(), "The fields name, parent must make a unique set.");
	}

	#[rstest]
	fn test_instance_is_excluded_and_completes_values(storage: MemoryStorage) {
		let tx = Transaction::begin(&storage).unwrap();
		let instance = tx.get("child", 1).unwrap().unwrap();
		let validator = UniqueTogetherValidator::new(vec!["name", "parent"]);
		let result = validator.validate(&tx, "child", &attrs(json!({"name": "Pebbles"})), Some(&instance));
		assert_eq!(result, Ok(()));
	}

	#[rstest]
	fn test_null_value_skips_check(storage: MemoryStorage) {
		let tx = Transaction::begin(&storage).unwrap();
		let validator = UniqueTogetherValidator::new(vec!["name", "parent"])
			.with_message("Duplicate child.");
		let result = validator.validate(
			&tx,
			"child",
			&attrs(json!({"name": "Pebbles", "parent": null})),
			None,
		);
		assert_eq!(result, Ok(()));
		assert_eq!(validator.message(), "Duplicate child.");
	}
}
