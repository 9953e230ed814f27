//! In-memory storage backend
//!
//! Rows live in ordered maps keyed by model name and primary key. A
//! transaction snapshots the whole table set on `begin` and restores it on
//! `rollback`, so rolled-back writes leave no trace.
//!
//! Writes enforce the constraints a relational backend would: references must
//! point at existing rows, non-nullable references must be set, one-to-one
//! references must be unique, and deletes honor each reference's
//! [`CascadeAction`].

use crate::error::{OrmError, OrmResult};
use crate::filter::Filter;
use crate::record::{Attributes, Pk, Record, as_pk};
use crate::schema::{CascadeAction, LinkTable, ModelMeta, RelationKind, Schema};
use crate::storage::{LinkSide, Storage};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
struct Tables {
	rows: BTreeMap<String, BTreeMap<Pk, Attributes>>,
	links: BTreeMap<String, BTreeSet<(Pk, Pk)>>,
	sequences: BTreeMap<String, Pk>,
}

#[derive(Debug, Default)]
struct Inner {
	tables: Tables,
	snapshot: Option<Tables>,
}

/// [`Storage`] kept entirely in memory
///
/// # Examples
///
/// ```
/// use reinhardt_nested_orm::{MemoryStorage, ModelSchema, Schema, Storage};
/// use serde_json::json;
///
/// let schema = Schema::builder().model(ModelSchema::new("person")).build().unwrap();
/// let storage = MemoryStorage::new(schema);
/// let attrs = json!({"name": "Fred"}).as_object().cloned().unwrap();
/// let record = storage.create("person", attrs).unwrap();
/// assert_eq!(record.pk, 1);
/// ```
#[derive(Debug)]
pub struct MemoryStorage {
	schema: Schema,
	inner: Mutex<Inner>,
}

impl MemoryStorage {
	pub fn new(schema: Schema) -> Self {
		Self {
			schema,
			inner: Mutex::new(Inner::default()),
		}
	}

	/// Number of rows stored for `model`
	pub fn row_count(&self, model: &str) -> usize {
		self.inner
			.lock()
			.tables
			.rows
			.get(model)
			.map_or(0, BTreeMap::len)
	}

	/// Check whether a transaction is open
	pub fn in_transaction(&self) -> bool {
		self.inner.lock().snapshot.is_some()
	}

	fn check_references(&self, tables: &Tables, meta: &ModelMeta, pk: Pk, attrs: &Attributes) -> OrmResult<()> {
		for relation in meta.relations() {
			let (attname, null, unique) = match &relation.kind {
				RelationKind::ForeignKey { attname, null, .. } => (attname, *null, false),
				RelationKind::OneToOne { attname, null, .. } => (attname, *null, true),
				_ => continue,
			};
			let value = attrs.get(attname).unwrap_or(&Value::Null);
			if value.is_null() {
				if !null {
					return Err(OrmError::Integrity(format!(
						"NOT NULL constraint failed: {}.{}",
						meta.name(),
						attname
					)));
				}
				continue;
			}
			let target = as_pk(value).ok_or_else(|| {
				OrmError::Integrity(format!(
					"{}.{} holds a non-key value {}",
					meta.name(),
					attname,
					value
				))
			})?;
			let exists = tables
				.rows
				.get(&relation.related_model)
				.is_some_and(|rows| rows.contains_key(&target));
			if !exists {
				return Err(OrmError::Integrity(format!(
					"{}.{} references missing {} {}",
					meta.name(),
					attname,
					relation.related_model,
					target
				)));
			}
			if unique {
				let taken = tables.rows.get(meta.name()).is_some_and(|rows| {
					rows.iter().any(|(other, other_attrs)| {
						*other != pk && other_attrs.get(attname).and_then(as_pk) == Some(target)
					})
				});
				if taken {
					return Err(OrmError::Integrity(format!(
						"UNIQUE constraint failed: {}.{}",
						meta.name(),
						attname
					)));
				}
			}
		}
		Ok(())
	}
}

impl Storage for MemoryStorage {
	fn schema(&self) -> &Schema {
		&self.schema
	}

	fn begin(&self) -> OrmResult<()> {
		let mut inner = self.inner.lock();
		if inner.snapshot.is_some() {
			return Err(OrmError::TransactionActive);
		}
		inner.snapshot = Some(inner.tables.clone());
		tracing::trace!("memory storage: begin");
		Ok(())
	}

	fn commit(&self) -> OrmResult<()> {
		let mut inner = self.inner.lock();
		inner
			.snapshot
			.take()
			.ok_or(OrmError::NoActiveTransaction)?;
		tracing::trace!("memory storage: commit");
		Ok(())
	}

	fn rollback(&self) -> OrmResult<()> {
		let mut inner = self.inner.lock();
		let snapshot = inner
			.snapshot
			.take()
			.ok_or(OrmError::NoActiveTransaction)?;
		inner.tables = snapshot;
		tracing::trace!("memory storage: rollback");
		Ok(())
	}

	fn get(&self, model: &str, pk: Pk) -> OrmResult<Option<Record>> {
		self.schema.require_model(model)?;
		let inner = self.inner.lock();
		Ok(inner
			.tables
			.rows
			.get(model)
			.and_then(|rows| rows.get(&pk))
			.map(|attrs| Record::new(model, pk, attrs.clone())))
	}

	fn filter(&self, model: &str, filter: &Filter) -> OrmResult<Vec<Record>> {
		self.schema.require_model(model)?;
		let inner = self.inner.lock();
		Ok(inner
			.tables
			.rows
			.get(model)
			.map(|rows| {
				rows.iter()
					.filter(|(pk, attrs)| filter.matches(**pk, attrs))
					.map(|(pk, attrs)| Record::new(model, *pk, attrs.clone()))
					.collect()
			})
			.unwrap_or_default())
	}

	fn create(&self, model: &str, mut attrs: Attributes) -> OrmResult<Record> {
		let meta = self.schema.require_model(model)?;
		let explicit = attrs.remove(meta.pk_name()).filter(|v| !v.is_null());
		let mut inner = self.inner.lock();
		let tables = &mut inner.tables;

		let pk = match explicit {
			Some(value) => {
				let pk = as_pk(&value).ok_or_else(|| {
					OrmError::Integrity(format!("{}.{} holds a non-key value {}", model, meta.pk_name(), value))
				})?;
				if tables.rows.get(model).is_some_and(|rows| rows.contains_key(&pk)) {
					return Err(OrmError::Integrity(format!(
						"UNIQUE constraint failed: {}.{}",
						model,
						meta.pk_name()
					)));
				}
				pk
			}
			None => tables.sequences.get(model).copied().unwrap_or(0) + 1,
		};

		self.check_references(tables, meta, pk, &attrs)?;

		let sequence = tables.sequences.entry(model.to_string()).or_insert(0);
		*sequence = (*sequence).max(pk);
		tables
			.rows
			.entry(model.to_string())
			.or_default()
			.insert(pk, attrs.clone());
		tracing::debug!(model, pk, "row created");
		Ok(Record::new(model, pk, attrs))
	}

	fn update(&self, model: &str, pk: Pk, mut attrs: Attributes) -> OrmResult<Record> {
		let meta = self.schema.require_model(model)?;
		attrs.remove(meta.pk_name());
		let mut inner = self.inner.lock();
		let tables = &mut inner.tables;

		let mut merged = tables
			.rows
			.get(model)
			.and_then(|rows| rows.get(&pk))
			.cloned()
			.ok_or_else(|| OrmError::NotFound {
				model: model.to_string(),
				pk,
			})?;
		merged.extend(attrs);
		self.check_references(tables, meta, pk, &merged)?;

		tables
			.rows
			.entry(model.to_string())
			.or_default()
			.insert(pk, merged.clone());
		tracing::debug!(model, pk, "row updated");
		Ok(Record::new(model, pk, merged))
	}

	fn delete(&self, model: &str, filter: &Filter) -> OrmResult<usize> {
		self.schema.require_model(model)?;
		let mut inner = self.inner.lock();
		let mut working = inner.tables.clone();
		let pks: Vec<Pk> = working
			.rows
			.get(model)
			.map(|rows| {
				rows.iter()
					.filter(|(pk, attrs)| filter.matches(**pk, attrs))
					.map(|(pk, _)| *pk)
					.collect()
			})
			.unwrap_or_default();
		let removed = delete_rows(&self.schema, &mut working, model, &pks)?;
		inner.tables = working;
		if removed > 0 {
			tracing::debug!(model, removed, "rows deleted");
		}
		Ok(removed)
	}

	fn add_links(&self, link: &LinkTable, pairs: &[(Pk, Pk)]) -> OrmResult<()> {
		let mut inner = self.inner.lock();
		for (source, target) in pairs {
			for (model, pk) in [(&link.source_model, source), (&link.target_model, target)] {
				if !inner.tables.rows.get(model).is_some_and(|rows| rows.contains_key(pk)) {
					return Err(OrmError::Integrity(format!(
						"{} references missing {} {}",
						link.name, model, pk
					)));
				}
			}
		}
		let rows = inner.tables.links.entry(link.name.clone()).or_default();
		rows.extend(pairs.iter().copied());
		tracing::trace!(
			table = %link.name,
			source_column = %link.source_column,
			target_column = %link.target_column,
			count = pairs.len(),
			"links added"
		);
		Ok(())
	}

	fn remove_links(&self, link: &LinkTable, pairs: &[(Pk, Pk)]) -> OrmResult<()> {
		let mut inner = self.inner.lock();
		if let Some(rows) = inner.tables.links.get_mut(&link.name) {
			for pair in pairs {
				rows.remove(pair);
			}
		}
		tracing::trace!(table = %link.name, count = pairs.len(), "links removed");
		Ok(())
	}

	fn links(&self, link: &LinkTable, side: LinkSide, pks: &[Pk]) -> OrmResult<Vec<(Pk, Pk)>> {
		let inner = self.inner.lock();
		Ok(inner
			.tables
			.links
			.get(&link.name)
			.map(|rows| {
				rows.iter()
					.filter(|(source, target)| match side {
						LinkSide::Source => pks.contains(source),
						LinkSide::Target => pks.contains(target),
					})
					.copied()
					.collect()
			})
			.unwrap_or_default())
	}
}

/// Remove `pks` of `model` from `tables` and apply every reference's
/// `on_delete` action, recursively
fn delete_rows(schema: &Schema, tables: &mut Tables, model: &str, pks: &[Pk]) -> OrmResult<usize> {
	let meta = schema.require_model(model)?;
	let removed: Vec<Pk> = match tables.rows.get_mut(model) {
		Some(rows) => pks
			.iter()
			.copied()
			.filter(|pk| rows.remove(pk).is_some())
			.collect(),
		None => Vec::new(),
	};
	if removed.is_empty() {
		return Ok(0);
	}

	for reference in meta.referenced_by() {
		let mut referencing = Vec::new();
		let mut still_referenced = BTreeSet::new();
		if let Some(rows) = tables.rows.get(&reference.model) {
			for (pk, attrs) in rows {
				if let Some(target) = attrs.get(&reference.attname).and_then(as_pk)
					&& removed.contains(&target)
				{
					referencing.push(*pk);
					still_referenced.insert(target);
				}
			}
		}
		if referencing.is_empty() {
			continue;
		}
		match reference.on_delete {
			CascadeAction::NoAction | CascadeAction::Restrict => {
				tracing::warn!(
					model,
					referenced_by = %reference.model,
					attname = %reference.attname,
					"delete refused by protected reference"
				);
				return Err(OrmError::ProtectedReference {
					model: model.to_string(),
					pks: still_referenced.into_iter().collect(),
					referenced_by: reference.model.clone(),
					attname: reference.attname.clone(),
				});
			}
			CascadeAction::SetNull => {
				if let Some(rows) = tables.rows.get_mut(&reference.model) {
					for pk in &referencing {
						if let Some(attrs) = rows.get_mut(pk) {
							attrs.insert(reference.attname.clone(), Value::Null);
						}
					}
				}
			}
			CascadeAction::Cascade => {
				delete_rows(schema, tables, &reference.model, &referencing)?;
			}
		}
	}

	for owner in schema.models() {
		for relation in owner.relations() {
			match &relation.kind {
				RelationKind::ManyToMany {
					link,
					declared_here: true,
					..
				} => {
					if let Some(rows) = tables.links.get_mut(&link.name) {
						rows.retain(|(source, target)| {
							!(link.source_model == model && removed.contains(source))
								&& !(link.target_model == model && removed.contains(target))
						});
					}
				}
				RelationKind::GenericRelation {
					content_type_attname,
					object_id_attname,
				} if owner.name() == model => {
					let dependents: Vec<Pk> = tables
						.rows
						.get(&relation.related_model)
						.map(|rows| {
							rows.iter()
								.filter(|(_, attrs)| {
									attrs.get(content_type_attname).and_then(Value::as_str) == Some(model)
										&& attrs
											.get(object_id_attname)
											.and_then(as_pk)
											.is_some_and(|pk| removed.contains(&pk))
								})
								.map(|(pk, _)| *pk)
								.collect()
						})
						.unwrap_or_default();
					delete_rows(schema, tables, &relation.related_model, &dependents)?;
				}
				_ => {}
			}
		}
	}

	Ok(removed.len())
}
