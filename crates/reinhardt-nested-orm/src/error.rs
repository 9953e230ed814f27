//! Errors raised by the storage layer

use crate::record::Pk;
use thiserror::Error;

/// Result alias used throughout the storage layer
pub type OrmResult<T> = Result<T, OrmError>;

/// Errors that can occur while reading or writing through a [`Storage`](crate::Storage)
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OrmError {
	/// The model is not registered in the schema
	#[error("Unknown model '{0}'")]
	UnknownModel(String),

	/// The model has no relation with the given field name
	#[error("Model '{model}' has no relation named '{field}'")]
	UnknownRelation {
		/// Model that was inspected
		model: String,
		/// Field name that was looked up
		field: String,
	},

	/// A row addressed by primary key does not exist
	#[error("{model} with pk {pk} does not exist")]
	NotFound {
		/// Model of the missing row
		model: String,
		/// Primary key that was requested
		pk: Pk,
	},

	/// A delete was refused because other rows still reference the targets
	#[error(
		"Cannot delete {model} {pks:?}: still referenced through {referenced_by}.{attname}"
	)]
	ProtectedReference {
		/// Model whose rows were being deleted
		model: String,
		/// Primary keys that could not be deleted
		pks: Vec<Pk>,
		/// Model holding the reference
		referenced_by: String,
		/// Attribute on `referenced_by` that holds the reference
		attname: String,
	},

	/// A write would leave a dangling foreign key
	#[error("Integrity error: {0}")]
	Integrity(String),

	/// `begin` was called while a transaction is already open
	#[error("A transaction is already active on this storage")]
	TransactionActive,

	/// A transactional operation was attempted outside of a transaction
	#[error("No active transaction")]
	NoActiveTransaction,

	/// The transaction was marked rollback-only
	#[error("Transaction was marked for rollback")]
	TransactionAborted,

	/// Schema declarations are inconsistent
	#[error("Invalid schema: {0}")]
	InvalidSchema(String),
}

impl OrmError {
	/// Check if this error is a referential-integrity violation raised by a delete
	pub fn is_protected_reference(&self) -> bool {
		matches!(self, OrmError::ProtectedReference { .. })
	}
}
