//! Persisted rows

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Primary key type used by every model
pub type Pk = i64;

/// Attribute map of a row, keyed by storage attribute name
pub type Attributes = Map<String, Value>;

/// A persisted entity
///
/// `attrs` never contains the primary key; it is carried in `pk`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
	/// Model name as registered in the schema
	pub model: String,
	/// Primary key
	pub pk: Pk,
	/// Stored attributes
	pub attrs: Attributes,
}

impl Record {
	/// Create a record
	///
	/// # Examples
	///
	/// ```
	/// use reinhardt_nested_orm::Record;
	/// use serde_json::json;
	///
	/// let mut attrs = serde_json::Map::new();
	/// attrs.insert("name".to_string(), json!("Fred"));
	/// let record = Record::new("person", 1, attrs);
	/// assert_eq!(record.get("name"), Some(&json!("Fred")));
	/// ```
	pub fn new(model: impl Into<String>, pk: Pk, attrs: Attributes) -> Self {
		Self {
			model: model.into(),
			pk,
			attrs,
		}
	}

	/// Get a stored attribute
	pub fn get(&self, attname: &str) -> Option<&Value> {
		self.attrs.get(attname)
	}

	/// Read an attribute as a primary key reference
	pub fn get_pk(&self, attname: &str) -> Option<Pk> {
		self.attrs.get(attname).and_then(as_pk)
	}
}

/// Interpret a JSON value as a primary key
///
/// Integers and integral strings are accepted, everything else is `None`.
pub fn as_pk(value: &Value) -> Option<Pk> {
	match value {
		Value::Number(n) => n.as_i64(),
		Value::String(s) => s.trim().parse().ok(),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_as_pk_accepts_integers_and_numeric_strings() {
		assert_eq!(as_pk(&json!(7)), Some(7));
		assert_eq!(as_pk(&json!("12")), Some(12));
		assert_eq!(as_pk(&json!(1.5)), None);
		assert_eq!(as_pk(&json!(null)), None);
		assert_eq!(as_pk(&json!("abc")), None);
	}

	#[test]
	fn test_record_get_pk() {
		let mut attrs = Attributes::new();
		attrs.insert("parent_id".to_string(), json!(3));
		attrs.insert("school_id".to_string(), Value::Null);
		let record = Record::new("child", 1, attrs);
		assert_eq!(record.get_pk("parent_id"), Some(3));
		assert_eq!(record.get_pk("school_id"), None);
		assert_eq!(record.get_pk("missing"), None);
	}
}
