//! # Transaction Management
//!
//! Every nested write runs inside one [`Transaction`]. The transaction is an
//! explicit value handed to whoever performs reads and writes; nothing is kept
//! in ambient state.
//!
//! - [`atomic()`] runs a closure and commits on `Ok`, rolls back on `Err`
//! - [`Transaction::abort`] marks the transaction rollback-only, so that a
//!   later commit rolls back instead
//! - dropping an active transaction rolls it back
//!
//! ## Example
//!
//! ```rust
//! use reinhardt_nested_orm::transaction::atomic;
//! use reinhardt_nested_orm::{MemoryStorage, ModelSchema, OrmError, Schema};
//! use serde_json::json;
//!
//! let schema = Schema::builder().model(ModelSchema::new("person")).build().unwrap();
//! let storage = MemoryStorage::new(schema);
//!
//! let pk = atomic(&storage, |tx| {
//! 	let attrs = json!({"name": "Fred"}).as_object().cloned().unwrap();
//! 	Ok::<_, OrmError>(tx.create("person", attrs)?.pk)
//! })
//! .unwrap();
//! assert_eq!(storage.row_count("person"), 1);
//! # let _ = pk;
//! ```

use crate::error::{OrmError, OrmResult};
use crate::filter::Filter;
use crate::record::{Attributes, Pk, Record};
use crate::schema::{LinkTable, Schema};
use crate::storage::{LinkSide, Storage};

/// Transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
	NotStarted,
	Active,
	Committed,
	RolledBack,
}

/// An open unit of work against a [`Storage`]
pub struct Transaction<'s> {
	storage: &'s dyn Storage,
	state: TransactionState,
	rollback_only: bool,
}

impl<'s> Transaction<'s> {
	/// Begin a transaction
	///
	/// # Errors
	///
	/// Fails with [`OrmError::TransactionActive`] when the storage already has
	/// an open transaction.
	pub fn begin(storage: &'s dyn Storage) -> OrmResult<Self> {
		storage.begin()?;
		tracing::debug!("transaction started");
		Ok(Self {
			storage,
			state: TransactionState::Active,
			rollback_only: false,
		})
	}

	pub fn state(&self) -> TransactionState {
		self.state
	}

	pub fn is_active(&self) -> bool {
		self.state == TransactionState::Active
	}

	/// Mark the transaction rollback-only
	///
	/// Further reads and writes fail with [`OrmError::TransactionAborted`] and
	/// [`commit`](Self::commit) rolls back.
	pub fn abort(&mut self) {
		if !self.rollback_only {
			tracing::warn!("transaction marked for rollback");
		}
		self.rollback_only = true;
	}

	pub fn is_aborted(&self) -> bool {
		self.rollback_only
	}

	/// Schema of the underlying storage
	pub fn schema(&self) -> &'s Schema {
		self.storage.schema()
	}

	/// Commit the transaction
	///
	/// An aborted transaction is rolled back instead and
	/// [`OrmError::TransactionAborted`] is returned.
	pub fn commit(mut self) -> OrmResult<()> {
		self.ensure_active()?;
		if self.rollback_only {
			self.state = TransactionState::RolledBack;
			self.storage.rollback()?;
			tracing::debug!("aborted transaction rolled back on commit");
			return Err(OrmError::TransactionAborted);
		}
		self.state = TransactionState::Committed;
		self.storage.commit()?;
		tracing::debug!("transaction committed");
		Ok(())
	}

	/// Roll back the transaction
	pub fn rollback(mut self) -> OrmResult<()> {
		self.ensure_active()?;
		self.state = TransactionState::RolledBack;
		self.storage.rollback()?;
		tracing::debug!("transaction rolled back");
		Ok(())
	}

	pub fn get(&self, model: &str, pk: Pk) -> OrmResult<Option<Record>> {
		self.ensure_usable()?;
		self.storage.get(model, pk)
	}

	pub fn filter(&self, model: &str, filter: &Filter) -> OrmResult<Vec<Record>> {
		self.ensure_usable()?;
		self.storage.filter(model, filter)
	}

	pub fn count(&self, model: &str, filter: &Filter) -> OrmResult<usize> {
		self.ensure_usable()?;
		self.storage.count(model, filter)
	}

	pub fn links(&self, link: &LinkTable, side: LinkSide, pks: &[Pk]) -> OrmResult<Vec<(Pk, Pk)>> {
		self.ensure_usable()?;
		self.storage.links(link, side, pks)
	}

	pub fn create(&mut self, model: &str, attrs: Attributes) -> OrmResult<Record> {
		self.ensure_usable()?;
		self.storage.create(model, attrs)
	}

	pub fn update(&mut self, model: &str, pk: Pk, attrs: Attributes) -> OrmResult<Record> {
		self.ensure_usable()?;
		self.storage.update(model, pk, attrs)
	}

	pub fn delete(&mut self, model: &str, filter: &Filter) -> OrmResult<usize> {
		self.ensure_usable()?;
		self.storage.delete(model, filter)
	}

	pub fn add_links(&mut self, link: &LinkTable, pairs: &[(Pk, Pk)]) -> OrmResult<()> {
		self.ensure_usable()?;
		self.storage.add_links(link, pairs)
	}

	pub fn remove_links(&mut self, link: &LinkTable, pairs: &[(Pk, Pk)]) -> OrmResult<()> {
		self.ensure_usable()?;
		self.storage.remove_links(link, pairs)
	}

	fn ensure_active(&self) -> OrmResult<()> {
		if self.is_active() {
			Ok(())
		} else {
			Err(OrmError::NoActiveTransaction)
		}
	}

	fn ensure_usable(&self) -> OrmResult<()> {
		self.ensure_active()?;
		if self.rollback_only {
			return Err(OrmError::TransactionAborted);
		}
		Ok(())
	}
}

impl Drop for Transaction<'_> {
	fn drop(&mut self) {
		if self.is_active() {
			self.state = TransactionState::RolledBack;
			if let Err(e) = self.storage.rollback() {
				tracing::error!(error = %e, "rollback of dropped transaction failed");
			} else {
				tracing::debug!("dropped transaction rolled back");
			}
		}
	}
}

/// Run `f` inside a transaction
///
/// Commits when `f` returns `Ok` and the transaction was not aborted, rolls
/// back otherwise. A commit of an aborted transaction surfaces as
/// [`OrmError::TransactionAborted`].
pub fn atomic<'s, T, E, F>(storage: &'s dyn Storage, f: F) -> Result<T, E>
where
	F: FnOnce(&mut Transaction<'s>) -> Result<T, E>,
	E: From<OrmError>,
{
	let mut tx = Transaction::begin(storage)?;
	match f(&mut tx) {
		Ok(value) => {
			tx.commit()?;
			Ok(value)
		}
		Err(e) => {
			if let Err(rollback_error) = tx.rollback() {
				tracing::warn!(error = %rollback_error, "rollback after failed atomic block failed");
			}
			Err(e)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::memory::MemoryStorage;
	use crate::schema::ModelSchema;
	use rstest::*;
	use serde_json::json;

	#[fixture]
	fn storage() -> MemoryStorage {
		MemoryStorage::new(
			Schema::builder()
				.model(ModelSchema::new("person"))
				.build()
				.unwrap(),
		)
	}

	fn fred() -> Attributes {
		json!({"name": "Fred"}).as_object().cloned().unwrap()
	}

	#[rstest]
	fn test_transaction_begin(storage: MemoryStorage) {
		let tx = Transaction::begin(&storage).unwrap();
		assert_eq!(tx.state(), TransactionState::Active);
		assert!(tx.is_active());
		assert!(!tx.is_aborted());
	}

	#[rstest]
	fn test_transaction_commit(storage: MemoryStorage) {
		let mut tx = Transaction::begin(&storage).unwrap();
		tx.create("person", fred()).unwrap();
		tx.commit().unwrap();
		assert_eq!(storage.row_count("person"), 1);
		assert!(!storage.in_transaction());
	}

	#[rstest]
	fn test_transaction_rollback(storage: MemoryStorage) {
		let mut tx = Transaction::begin(&storage).unwrap();
		tx.create("person", fred()).unwrap();
		tx.rollback().unwrap();
		assert_eq!(storage.row_count("person"), 0);
	}

	#[rstest]
	fn test_dropped_transaction_rolls_back(storage: MemoryStorage) {
		{
			let mut tx = Transaction::begin(&storage).unwrap();
			tx.create("person", fred()).unwrap();
		}
		assert_eq!(storage.row_count("person"), 0);
		assert!(!storage.in_transaction());
	}

	#[rstest]
	fn test_aborted_transaction_refuses_work_and_rolls_back(storage: MemoryStorage) {
		let mut tx = Transaction::begin(&storage).unwrap();
		tx.create("person", fred()).unwrap();
		tx.abort();
		assert!(tx.is_aborted());
		assert_eq!(tx.create("person", fred()), Err(OrmError::TransactionAborted));
		assert_eq!(tx.commit(), Err(OrmError::TransactionAborted));
		assert_eq!(storage.row_count("person"), 0);
	}

	#[rstest]
	fn test_atomic_helper(storage: MemoryStorage) {
		let pk = atomic(&storage, |tx| tx.create("person", fred()).map(|r| r.pk)).unwrap();
		assert_eq!(pk, 1);
		assert_eq!(storage.row_count("person"), 1);
	}

	#[rstest]
	fn test_atomic_helper_with_error(storage: MemoryStorage) {
		let result: OrmResult<()> = atomic(&storage, |tx| {
			tx.create("person", fred())?;
			Err(OrmError::Integrity("boom".to_string()))
		});
		assert_eq!(result, Err(OrmError::Integrity("boom".to_string())));
		assert_eq!(storage.row_count("person"), 0);
	}

	#[rstest]
	fn test_atomic_helper_keeps_original_error_when_rollback_fails(storage: MemoryStorage) {
		let result: OrmResult<()> = atomic(&storage, |tx| {
			tx.create("person", fred())?;
			storage.rollback()?;
			Err(OrmError::Integrity("boom".to_string()))
		});
		assert_eq!(result, Err(OrmError::Integrity("boom".to_string())));
		assert_eq!(storage.row_count("person"), 0);
	}
}
