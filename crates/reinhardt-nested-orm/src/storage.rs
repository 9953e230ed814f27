//! Storage collaborator
//!
//! The nested writer only needs a handful of row and link operations from the
//! database. [`Storage`] names them; [`MemoryStorage`](crate::MemoryStorage)
//! is the bundled implementation.
//!
//! Calls made through a [`Transaction`](crate::Transaction) are bracketed by
//! `begin` / `commit` / `rollback`. Implementations must make every write
//! between `begin` and `rollback` invisible after the rollback.

use crate::error::OrmResult;
use crate::filter::Filter;
use crate::record::{Attributes, Pk, Record};
use crate::schema::{LinkTable, Schema};

/// Side of a link table used to look up link rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSide {
	/// The model that declared the many-to-many
	Source,
	/// The related model
	Target,
}

/// Row and link persistence
pub trait Storage: Send + Sync {
	/// Metadata of every model this storage holds
	fn schema(&self) -> &Schema;

	/// Open a transaction
	fn begin(&self) -> OrmResult<()>;

	/// Make every write since `begin` durable
	fn commit(&self) -> OrmResult<()>;

	/// Discard every write since `begin`
	fn rollback(&self) -> OrmResult<()>;

	/// Fetch one row by primary key
	fn get(&self, model: &str, pk: Pk) -> OrmResult<Option<Record>>;

	/// Fetch rows matching `filter`, ordered by primary key
	fn filter(&self, model: &str, filter: &Filter) -> OrmResult<Vec<Record>>;

	/// Count rows matching `filter`
	fn count(&self, model: &str, filter: &Filter) -> OrmResult<usize> {
		Ok(self.filter(model, filter)?.len())
	}

	/// Insert a row
	///
	/// When `attrs` carries the model's primary key attribute that value is
	/// used, otherwise one is allocated.
	fn create(&self, model: &str, attrs: Attributes) -> OrmResult<Record>;

	/// Merge `attrs` into an existing row
	fn update(&self, model: &str, pk: Pk, attrs: Attributes) -> OrmResult<Record>;

	/// Delete rows matching `filter`, applying the `on_delete` action of every
	/// reference to them; returns the number of rows of `model` removed
	fn delete(&self, model: &str, filter: &Filter) -> OrmResult<usize>;

	/// Insert link rows; existing pairs are left untouched
	fn add_links(&self, link: &LinkTable, pairs: &[(Pk, Pk)]) -> OrmResult<()>;

	/// Remove link rows; missing pairs are ignored
	fn remove_links(&self, link: &LinkTable, pairs: &[(Pk, Pk)]) -> OrmResult<()>;

	/// Link rows whose `side` column is one of `pks`, as `(source, target)` pairs
	fn links(&self, link: &LinkTable, side: LinkSide, pks: &[Pk]) -> OrmResult<Vec<(Pk, Pk)>>;
}
