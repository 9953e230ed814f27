//! Field declarations and value coercion

use crate::error::ValidatorError;
use crate::serializer::NestedSerializer;
use serde_json::Value;
use std::sync::Arc;

/// What a field holds and how incoming values are coerced
#[derive(Debug, Clone)]
pub enum FieldKind {
	Char { max_length: Option<usize> },
	Integer,
	Float,
	Boolean,
	/// Any JSON value, stored as-is
	Json,
	/// Primary key of a row of `model`
	PrimaryKeyRelated { model: String },
	/// Related entity (or entities when `many`) written through another serializer
	Nested {
		serializer: Arc<NestedSerializer>,
		many: bool,
	},
	/// Not read from input; always validates to `value`
	Hidden { value: Value },
}

/// A declared serializer field
///
/// # Examples
///
/// ```
/// use reinhardt_nested_serializers::Field;
///
/// let name = Field::char("name").max_length(100);
/// assert!(name.required);
/// let nickname = Field::char("nickname").optional().allow_null();
/// assert!(!nickname.required && nickname.allow_null);
/// ```
#[derive(Debug, Clone)]
pub struct Field {
	pub name: String,
	pub kind: FieldKind,
	pub required: bool,
	pub read_only: bool,
	pub allow_null: bool,
}

impl Field {
	pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
		Self {
			name: name.into(),
			kind,
			required: true,
			read_only: false,
			allow_null: false,
		}
	}

	/// Read-only integer primary key field named `id`
	pub fn id() -> Self {
		Self::new("id", FieldKind::Integer).read_only()
	}

	pub fn char(name: impl Into<String>) -> Self {
		Self::new(name, FieldKind::Char { max_length: None })
	}

	pub fn integer(name: impl Into<String>) -> Self {
		Self::new(name, FieldKind::Integer)
	}

	pub fn float(name: impl Into<String>) -> Self {
		Self::new(name, FieldKind::Float)
	}

	pub fn boolean(name: impl Into<String>) -> Self {
		Self::new(name, FieldKind::Boolean)
	}

	pub fn json(name: impl Into<String>) -> Self {
		Self::new(name, FieldKind::Json)
	}

	pub fn primary_key_related(name: impl Into<String>, model: impl Into<String>) -> Self {
		Self::new(
			name,
			FieldKind::PrimaryKeyRelated {
				model: model.into(),
			},
		)
	}

	/// Single related entity written through `serializer`
	pub fn nested(name: impl Into<String>, serializer: Arc<NestedSerializer>) -> Self {
		Self::new(
			name,
			FieldKind::Nested {
				serializer,
				many: false,
			},
		)
	}

	/// Collection of related entities written through `serializer`
	pub fn nested_many(name: impl Into<String>, serializer: Arc<NestedSerializer>) -> Self {
		Self::new(
			name,
			FieldKind::Nested {
				serializer,
				many: true,
			},
		)
	}

	/// Field carrying a back-reference injected at save time
	pub fn back_reference(name: impl Into<String>, value: Value) -> Self {
		Self::new(name, FieldKind::Hidden { value }).optional()
	}

	pub fn max_length(mut self, max_length: usize) -> Self {
		if let FieldKind::Char { max_length: limit } = &mut self.kind {
			*limit = Some(max_length);
		}
		self
	}

	pub fn optional(mut self) -> Self {
		self.required = false;
		self
	}

	pub fn read_only(mut self) -> Self {
		self.read_only = true;
		self.required = false;
		self
	}

	pub fn allow_null(mut self) -> Self {
		self.allow_null = true;
		self
	}

	pub fn is_nested(&self) -> bool {
		matches!(self.kind, FieldKind::Nested { .. })
	}

	/// Nested serializer behind this field, if any
	pub fn nested_serializer(&self) -> Option<&Arc<NestedSerializer>> {
		match &self.kind {
			FieldKind::Nested { serializer, .. } => Some(serializer),
			_ => None,
		}
	}

	/// Coerce a non-null scalar input value
	///
	/// Relation and nested kinds are validated by the serializer and pass
	/// through unchanged here.
	pub fn to_internal_value(&self, value: &Value) -> Result<Value, ValidatorError> {
		let invalid = |message: String| ValidatorError::FieldValidation {
			field_name: self.name.clone(),
			message,
		};
		match &self.kind {
			FieldKind::Char { max_length } => {
				let text = match value {
					Value::String(s) => s.clone(),
					Value::Number(n) => n.to_string(),
					_ => return Err(invalid("Not a valid string.".to_string())),
				};
				if let Some(limit) = max_length
					&& text.chars().count() > *limit
				{
					return Err(invalid(format!(
						"Ensure this field has no more than {} characters.",
						limit
					)));
				}
				Ok(Value::String(text))
			}
			FieldKind::Integer => match value {
				Value::Number(n) if n.is_i64() => Ok(value.clone()),
				Value::Number(n)
					if n.as_f64().is_some_and(|f| {
						f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64
					}) =>
				{
					Ok(Value::from(n.as_f64().unwrap_or_default() as i64))
				}
				Value::String(s) => s
					.trim()
					.parse::<i64>()
					.map(Value::from)
					.map_err(|_| invalid("A valid integer is required.".to_string())),
				_ => Err(invalid("A valid integer is required.".to_string())),
			},
			FieldKind::Float => match value {
				Value::Number(_) => Ok(value.clone()),
				Value::String(s) => s
					.trim()
					.parse::<f64>()
					.ok()
					.and_then(serde_json::Number::from_f64)
					.map(Value::Number)
					.ok_or_else(|| invalid("A valid number is required.".to_string())),
				_ => Err(invalid("A valid number is required.".to_string())),
			},
			FieldKind::Boolean => match value {
				Value::Bool(_) => Ok(value.clone()),
				Value::Number(n) if n.as_i64() == Some(1) => Ok(Value::Bool(true)),
				Value::Number(n) if n.as_i64() == Some(0) => Ok(Value::Bool(false)),
				Value::String(s) => match s.to_lowercase().as_str() {
					"true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
					"false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
					_ => Err(invalid("Must be a valid boolean.".to_string())),
				},
				_ => Err(invalid("Must be a valid boolean.".to_string())),
			},
			FieldKind::Json
			| FieldKind::PrimaryKeyRelated { .. }
			| FieldKind::Nested { .. } => Ok(value.clone()),
			FieldKind::Hidden { value: hidden } => Ok(hidden.clone()),
		}
	}
}

/// JSON type name used in error messages
pub(crate) fn type_name(value: &Value) -> &'static str {
	match value {
		Value::Null => "null",
		Value::Bool(_) => "bool",
		Value::Number(_) => "number",
		Value::String(_) => "str",
		Value::Array(_) => "list",
		Value::Object(_) => "dict",
	}
}
