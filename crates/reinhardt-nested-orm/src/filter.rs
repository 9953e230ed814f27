//! Row filters

use crate::record::{Attributes, Pk, as_pk};
use serde_json::Value;

/// A single predicate on a row
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
	/// Attribute equals the value
	Eq(String, Value),
	/// Attribute is one of the values
	In(String, Vec<Value>),
	/// Primary key is one of the values
	PkIn(Vec<Pk>),
	/// Primary key is none of the values
	PkNotIn(Vec<Pk>),
}

impl Condition {
	fn matches(&self, pk: Pk, attrs: &Attributes) -> bool {
		match self {
			Condition::Eq(attname, value) => attr_eq(attrs.get(attname), value),
			Condition::In(attname, values) => {
				values.iter().any(|v| attr_eq(attrs.get(attname), v))
			}
			Condition::PkIn(pks) => pks.contains(&pk),
			Condition::PkNotIn(pks) => !pks.contains(&pk),
		}
	}
}

/// Conjunction of conditions; an empty filter matches every row
///
/// # Examples
///
/// ```
/// use reinhardt_nested_orm::Filter;
/// use serde_json::json;
///
/// let filter = Filter::new().eq("parent_id", json!(1)).exclude_pks(vec![3, 4]);
/// let mut attrs = serde_json::Map::new();
/// attrs.insert("parent_id".to_string(), json!(1));
/// assert!(filter.matches(2, &attrs));
/// assert!(!filter.matches(3, &attrs));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
	conditions: Vec<Condition>,
}

impl Filter {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn eq(mut self, attname: impl Into<String>, value: Value) -> Self {
		self.conditions.push(Condition::Eq(attname.into(), value));
		self
	}

	pub fn is_in(mut self, attname: impl Into<String>, values: Vec<Value>) -> Self {
		self.conditions.push(Condition::In(attname.into(), values));
		self
	}

	pub fn pk_in(mut self, pks: Vec<Pk>) -> Self {
		self.conditions.push(Condition::PkIn(pks));
		self
	}

	pub fn exclude_pks(mut self, pks: Vec<Pk>) -> Self {
		self.conditions.push(Condition::PkNotIn(pks));
		self
	}

	pub fn conditions(&self) -> &[Condition] {
		&self.conditions
	}

	pub fn matches(&self, pk: Pk, attrs: &Attributes) -> bool {
		self.conditions.iter().all(|c| c.matches(pk, attrs))
	}
}

// References may be stored as numbers while filters are built from request
// strings (or the other way round); compare them as keys in that case.
fn attr_eq(stored: Option<&Value>, expected: &Value) -> bool {
	let stored = stored.unwrap_or(&Value::Null);
	if stored == expected {
		return true;
	}
	match (as_pk(stored), as_pk(expected)) {
		(Some(a), Some(b)) => {
			a == b && (stored.is_number() || expected.is_number())
		}
		_ => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;
	use serde_json::json;

	fn attrs(value: Value) -> Attributes {
		value.as_object().cloned().unwrap()
	}

	#[rstest]
	#[case(Filter::new(), true)]
	#[case(Filter::new().eq("name", json!("Fred")), true)]
	#[case(Filter::new().eq("name", json!("Wilma")), false)]
	#[case(Filter::new().eq("parent_id", json!("1")), true)]
	#[case(Filter::new().eq("nickname", Value::Null), true)]
	#[case(Filter::new().is_in("name", vec![json!("Wilma"), json!("Fred")]), true)]
	#[case(Filter::new().pk_in(vec![5]), true)]
	#[case(Filter::new().exclude_pks(vec![5]), false)]
	#[case(Filter::new().eq("name", json!("Fred")).pk_in(vec![6]), false)]
	fn test_filter_matches(#[case] filter: Filter, #[case] expected: bool) {
		let row = attrs(json!({"name": "Fred", "parent_id": 1}));
		assert_eq!(filter.matches(5, &row), expected);
	}
}
