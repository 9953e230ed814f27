//! Eager loading of serializer relations

use crate::serializer::NestedSerializer;
use reinhardt_nested_orm::Query;

/// Types that know which relations to load together with their rows
pub trait EagerLoading {
	/// Add the relation loading directives to `query`
	fn setup_eager_loading(&self, query: Query) -> Query;
}

impl EagerLoading for NestedSerializer {
	fn setup_eager_loading(&self, query: Query) -> Query {
		let select: Vec<&str> = self.select_related_fields().iter().map(String::as_str).collect();
		let prefetch: Vec<&str> = self
			.prefetch_related_fields()
			.iter()
			.map(String::as_str)
			.collect();
		query.select_related(&select).prefetch_related(&prefetch)
	}
}

impl NestedSerializer {
	/// Query over this serializer's model with its eager loading applied
	///
	/// # Examples
	///
	/// ```
	/// use reinhardt_nested_serializers::{Field, NestedSerializer};
	///
	/// let person = NestedSerializer::builder("person")
	/// 	.field(Field::id())
	/// 	.select_related(&["profile"])
	/// 	.prefetch_related(&["children"])
	/// 	.build();
	/// let query = person.eager_query();
	/// assert_eq!(query.related_fields().collect::<Vec<_>>(), vec!["profile", "children"]);
	/// ```
	pub fn eager_query(&self) -> Query {
		self.setup_eager_loading(Query::new(self.model()))
	}
}
