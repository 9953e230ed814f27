//! Error types for nested serialization

use reinhardt_nested_orm::OrmError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Key under which errors that belong to no single field are reported
pub const NON_FIELD_ERRORS: &str = "non_field_errors";

/// Result alias used throughout this crate
pub type SerializerResult<T> = Result<T, SerializerError>;

/// Field-keyed validation messages
///
/// Each key maps to a list of messages or, for nested fields, to the nested
/// serializer's own error object (or a list of them for `many` fields).
///
/// # Examples
///
/// ```
/// use reinhardt_nested_serializers::ValidationErrors;
/// use serde_json::json;
///
/// let mut errors = ValidationErrors::new();
/// errors.add("name", "This field is required.");
/// errors.add_non_field("Something is off.");
/// assert_eq!(
/// 	serde_json::to_value(&errors).unwrap(),
/// 	json!({
/// 		"name": ["This field is required."],
/// 		"non_field_errors": ["Something is off."]
/// 	})
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors(Map<String, Value>);

impl ValidationErrors {
	pub fn new() -> Self {
		Self::default()
	}

	/// Append a message to a field
	pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
		let message = Value::String(message.into());
		match self.0.entry(field.into()).or_insert_with(|| Value::Array(Vec::new())) {
			Value::Array(messages) => messages.push(message),
			other => *other = Value::Array(vec![message]),
		}
	}

	pub fn add_non_field(&mut self, message: impl Into<String>) {
		self.add(NON_FIELD_ERRORS, message);
	}

	/// Record the error of a nested serializer under a field
	pub fn insert_nested(&mut self, field: impl Into<String>, errors: Value) {
		self.0.insert(field.into(), errors);
	}

	/// Fold a validator failure into the map
	///
	/// Database failures are not validation messages and are returned back.
	pub fn push(&mut self, error: ValidatorError) -> Result<(), OrmError> {
		match error {
			ValidatorError::UniqueTogetherViolation { message, .. } => self.add_non_field(message),
			ValidatorError::MissingFields {
				field_names,
				message,
			} => {
				for field in field_names {
					self.add(field, message.clone());
				}
			}
			ValidatorError::FieldValidation {
				field_name,
				message,
			} => self.add(field_name, message),
			ValidatorError::Database(e) => return Err(e),
		}
		Ok(())
	}

	/// Nest these errors under `field`; `index` places them in a list at that position
	pub fn wrap(self, field: &str, index: Option<usize>) -> Self {
		let inner = Value::Object(self.0);
		let value = match index {
			Some(index) => {
				let mut items = vec![Value::Object(Map::new()); index];
				items.push(inner);
				Value::Array(items)
			}
			None => inner,
		};
		let mut wrapped = Map::new();
		wrapped.insert(field.to_string(), value);
		Self(wrapped)
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn get(&self, field: &str) -> Option<&Value> {
		self.0.get(field)
	}

	/// Plain messages recorded for a field
	pub fn messages(&self, field: &str) -> Vec<&str> {
		match self.0.get(field) {
			Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
			_ => Vec::new(),
		}
	}

	pub fn as_map(&self) -> &Map<String, Value> {
		&self.0
	}

	pub fn into_value(self) -> Value {
		Value::Object(self.0)
	}
}

impl fmt::Display for ValidationErrors {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", Value::Object(self.0.clone()))
	}
}

/// Failure reported by a single validation check
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidatorError {
	/// A combination of field values already exists
	#[error("{message}")]
	UniqueTogetherViolation {
		field_names: Vec<String>,
		message: String,
	},

	/// Fields needed by a check are absent
	#[error("{}: {message}", .field_names.join(", "))]
	MissingFields {
		field_names: Vec<String>,
		message: String,
	},

	/// A value could not be coerced or failed a constraint
	#[error("{field_name}: {message}")]
	FieldValidation { field_name: String, message: String },

	/// Storage failed while validating
	#[error(transparent)]
	Database(#[from] OrmError),
}

impl ValidatorError {
	/// Field names involved in the error
	pub fn field_names(&self) -> Vec<&str> {
		match self {
			ValidatorError::UniqueTogetherViolation { field_names, .. }
			| ValidatorError::MissingFields { field_names, .. } => {
				field_names.iter().map(String::as_str).collect()
			}
			ValidatorError::FieldValidation { field_name, .. } => vec![field_name.as_str()],
			ValidatorError::Database(_) => vec![],
		}
	}

	pub fn is_uniqueness_violation(&self) -> bool {
		matches!(self, ValidatorError::UniqueTogetherViolation { .. })
	}
}

/// Errors raised by nested create and update
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SerializerError {
	/// Input failed validation
	#[error("Validation failed: {0}")]
	Validation(ValidationErrors),

	/// A stale related entity could not be deleted because it is still referenced
	#[error("Cannot delete {model}: still referenced through {referenced_by}.{attname}")]
	ProtectedReference {
		model: String,
		referenced_by: String,
		attname: String,
	},

	/// The serializer is set up wrongly; this is a programming error
	#[error("Improperly configured: {0}")]
	ImproperlyConfigured(String),

	/// `save` or `validated_data` was used before a successful `is_valid`
	#[error("You must call `is_valid()` before accessing validated data or saving")]
	NotValidated,

	/// Storage failure
	#[error(transparent)]
	Database(OrmError),
}

impl SerializerError {
	/// Re-home validation errors of a nested serializer under its field
	///
	/// Other errors are returned unchanged.
	pub fn nested_under(self, field: &str, index: Option<usize>) -> Self {
		match self {
			SerializerError::Validation(errors) => {
				SerializerError::Validation(errors.wrap(field, index))
			}
			other => other,
		}
	}

	pub fn validation_errors(&self) -> Option<&ValidationErrors> {
		match self {
			SerializerError::Validation(errors) => Some(errors),
			_ => None,
		}
	}

	pub fn is_validation(&self) -> bool {
		matches!(self, SerializerError::Validation(_))
	}
}

impl From<ValidationErrors> for SerializerError {
	fn from(errors: ValidationErrors) -> Self {
		SerializerError::Validation(errors)
	}
}

impl From<OrmError> for SerializerError {
	fn from(error: OrmError) -> Self {
		match error {
			OrmError::ProtectedReference {
				model,
				referenced_by,
				attname,
				..
			} => SerializerError::ProtectedReference {
				model,
				referenced_by,
				attname,
			},
			other => SerializerError::Database(other),
		}
	}
}
