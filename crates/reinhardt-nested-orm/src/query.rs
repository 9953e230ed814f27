//! Querying with related-object loading
//!
//! [`Query::select_related`] and [`Query::prefetch_related`] name relations to
//! load together with the main rows. Each named relation costs one batched
//! storage call regardless of how many rows were fetched.

use crate::error::{OrmError, OrmResult};
use crate::filter::Filter;
use crate::record::{Pk, Record};
use crate::schema::{Cardinality, RelationDescriptor, RelationKind};
use crate::storage::LinkSide;
use crate::transaction::Transaction;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// A row together with its loaded relations
#[derive(Debug, Clone, PartialEq)]
pub struct Prefetched {
	pub record: Record,
	pub related: BTreeMap<String, Vec<Record>>,
}

impl Prefetched {
	/// Loaded rows of a relation; empty if the relation was not requested
	pub fn related(&self, field_name: &str) -> &[Record] {
		self.related
			.get(field_name)
			.map(Vec::as_slice)
			.unwrap_or(&[])
	}

	/// Loaded row of a single-valued relation
	pub fn one(&self, field_name: &str) -> Option<&Record> {
		self.related(field_name).first()
	}
}

/// Query over one model
///
/// # Examples
///
/// ```
/// use reinhardt_nested_orm::{Filter, Query};
/// use serde_json::json;
///
/// let query = Query::new("person")
/// 	.filter(Filter::new().eq("name", json!("Fred")))
/// 	.select_related(&["profile"])
/// 	.prefetch_related(&["children", "clubs"]);
/// assert_eq!(query.related_fields().count(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
	model: String,
	filter: Filter,
	select_related: Vec<String>,
	prefetch_related: Vec<String>,
}

impl Query {
	pub fn new(model: impl Into<String>) -> Self {
		Self {
			model: model.into(),
			..Default::default()
		}
	}

	pub fn model(&self) -> &str {
		&self.model
	}

	pub fn filter(mut self, filter: Filter) -> Self {
		self.filter = filter;
		self
	}

	/// Load single-valued relations along with the rows
	pub fn select_related(mut self, fields: &[&str]) -> Self {
		for field in fields {
			if !self.select_related.iter().any(|f| f == field) {
				self.select_related.push((*field).to_string());
			}
		}
		self
	}

	/// Load multi-valued relations along with the rows
	pub fn prefetch_related(mut self, fields: &[&str]) -> Self {
		for field in fields {
			if !self.prefetch_related.iter().any(|f| f == field) {
				self.prefetch_related.push((*field).to_string());
			}
		}
		self
	}

	pub fn related_fields(&self) -> impl Iterator<Item = &str> {
		self.select_related
			.iter()
			.chain(self.prefetch_related.iter())
			.map(String::as_str)
	}

	/// Run the query
	///
	/// # Errors
	///
	/// Unknown relation names fail with [`OrmError::UnknownRelation`];
	/// multi-valued relations passed to `select_related` fail with
	/// [`OrmError::InvalidSchema`].
	pub fn fetch(&self, tx: &Transaction<'_>) -> OrmResult<Vec<Prefetched>> {
		let schema = tx.schema();
		for field in &self.select_related {
			let descriptor = schema.require_relation(&self.model, field)?;
			if descriptor.cardinality() == Cardinality::Many {
				return Err(OrmError::InvalidSchema(format!(
					"'{}.{}' is multi-valued, use prefetch_related",
					self.model, field
				)));
			}
		}

		let records = tx.filter(&self.model, &self.filter)?;
		let mut rows: Vec<Prefetched> = records
			.into_iter()
			.map(|record| Prefetched {
				record,
				related: BTreeMap::new(),
			})
			.collect();

		for field in self.related_fields() {
			let descriptor = schema.require_relation(&self.model, field)?;
			let owners: Vec<Record> = rows.iter().map(|r| r.record.clone()).collect();
			let mut loaded = load_related(tx, &self.model, descriptor, &owners)?;
			for row in &mut rows {
				let related = loaded.remove(&row.record.pk).unwrap_or_default();
				row.related.insert(field.to_string(), related);
			}
		}

		tracing::debug!(
			model = %self.model,
			rows = rows.len(),
			relations = self.select_related.len() + self.prefetch_related.len(),
			"query fetched"
		);
		Ok(rows)
	}
}

/// Load one relation for many owner rows with a single batched read
///
/// Returns related rows keyed by owner primary key. Owners without related
/// rows are absent from the map.
pub fn load_related(
	tx: &Transaction<'_>,
	model: &str,
	descriptor: &RelationDescriptor,
	owners: &[Record],
) -> OrmResult<HashMap<Pk, Vec<Record>>> {
	let mut grouped: HashMap<Pk, Vec<Record>> = HashMap::new();
	if owners.is_empty() {
		return Ok(grouped);
	}
	let owner_pks: Vec<Pk> = owners.iter().map(|r| r.pk).collect();
	let related_model = descriptor.related_model.as_str();

	match &descriptor.kind {
		RelationKind::ForeignKey { attname, .. } | RelationKind::OneToOne { attname, .. } => {
			let targets: Vec<Pk> = owners.iter().filter_map(|r| r.get_pk(attname)).collect();
			if targets.is_empty() {
				return Ok(grouped);
			}
			let by_pk: HashMap<Pk, Record> = tx
				.filter(related_model, &Filter::new().pk_in(targets))?
				.into_iter()
				.map(|r| (r.pk, r))
				.collect();
			for owner in owners {
				if let Some(target) = owner.get_pk(attname).and_then(|pk| by_pk.get(&pk)) {
					grouped.entry(owner.pk).or_default().push(target.clone());
				}
			}
		}
		RelationKind::ReverseForeignKey { remote_attname }
		| RelationKind::ReverseOneToOne { remote_attname } => {
			let values = owner_pks.iter().map(|pk| Value::from(*pk)).collect();
			for row in tx.filter(related_model, &Filter::new().is_in(remote_attname.clone(), values))? {
				if let Some(owner) = row.get_pk(remote_attname) {
					grouped.entry(owner).or_default().push(row);
				}
			}
		}
		RelationKind::ManyToMany {
			link,
			declared_here,
			..
		} => {
			let side = if *declared_here {
				LinkSide::Source
			} else {
				LinkSide::Target
			};
			let pairs: Vec<(Pk, Pk)> = tx
				.links(link, side, &owner_pks)?
				.into_iter()
				.map(|(source, target)| if *declared_here { (source, target) } else { (target, source) })
				.collect();
			let others: Vec<Pk> = pairs.iter().map(|(_, other)| *other).collect();
			let by_pk: HashMap<Pk, Record> = tx
				.filter(related_model, &Filter::new().pk_in(others))?
				.into_iter()
				.map(|r| (r.pk, r))
				.collect();
			for (owner, other) in pairs {
				if let Some(row) = by_pk.get(&other) {
					grouped.entry(owner).or_default().push(row.clone());
				}
			}
			for rows in grouped.values_mut() {
				rows.sort_by_key(|r| r.pk);
			}
		}
		RelationKind::GenericRelation {
			content_type_attname,
			object_id_attname,
		} => {
			let values = owner_pks.iter().map(|pk| Value::from(*pk)).collect();
			let filter = Filter::new()
				.eq(content_type_attname.clone(), Value::from(model))
				.is_in(object_id_attname.clone(), values);
			for row in tx.filter(related_model, &filter)? {
				if let Some(owner) = row.get_pk(object_id_attname) {
					grouped.entry(owner).or_default().push(row);
				}
			}
		}
	}

	tracing::trace!(
		model,
		relation = %descriptor.field_name,
		owners = owners.len(),
		"related rows loaded"
	);
	Ok(grouped)
}
