//! Reverse relation reconciliation
//!
//! After the root entity is saved, each reverse relation given in the payload
//! is brought in line with it: items carrying the key of an existing entity
//! update it, other items create one, and the back-reference to the root is
//! injected into every save. Many-to-many links are only added here.
//! [`delete_stale`] then removes (or unlinks) what the payload no longer
//! lists.

use crate::classifier::RelationField;
use crate::error::SerializerResult;
use crate::fields::Field;
use crate::orchestrator::NestedSaveContext;
use crate::serializer::NestedSerializer;
use reinhardt_nested_orm::{
	Attributes, Cardinality, Filter, LinkSide, Pk, Record, RelationKind, Schema, Transaction,
	as_pk,
};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// Create or update the related entities of every reverse relation in `raw`
///
/// The primary key of each written entity is recorded into its item in `raw`,
/// which [`delete_stale`] relies on.
///
/// # Errors
///
/// The first item failing validation aborts reconciliation; its errors are
/// returned nested under the relation field (at the item's position for
/// lists).
pub fn reconcile_reverse(
	tx: &mut Transaction<'_>,
	parent: &NestedSerializer,
	root: &Record,
	reverse: &[RelationField],
	raw: &mut Attributes,
	ctx: &NestedSaveContext,
) -> SerializerResult<()> {
	for relation in reverse {
		reconcile_field(tx, parent, root, relation, raw, ctx)?;
	}
	Ok(())
}

fn reconcile_field(
	tx: &mut Transaction<'_>,
	parent: &NestedSerializer,
	root: &Record,
	relation: &RelationField,
	raw: &mut Attributes,
	ctx: &NestedSaveContext,
) -> SerializerResult<()> {
	let field_name = relation.field_name.as_str();
	let Some(incoming) = raw.get_mut(field_name) else {
		return Ok(());
	};
	let schema = tx.schema();
	let descriptor = &relation.descriptor;
	let related_model = descriptor.related_model.as_str();
	let pk_name = schema.pk_name(related_model)?;

	let single = descriptor.cardinality() == Cardinality::One;
	let mut items = incoming_items(incoming);

	let ids: Vec<Pk> = items
		.iter()
		.filter_map(|(_, item)| item.get(pk_name).and_then(as_pk))
		.collect();
	let existing: HashMap<Pk, Record> = if ids.is_empty() {
		HashMap::new()
	} else {
		tx.filter(related_model, &Filter::new().pk_in(ids))?
			.into_iter()
			.map(|r| (r.pk, r))
			.collect()
	};

	let mut save_kwargs = ctx.kwargs_for(parent, field_name)?;
	match &descriptor.kind {
		RelationKind::ReverseForeignKey { remote_attname }
		| RelationKind::ReverseOneToOne { remote_attname } => {
			save_kwargs.insert(remote_attname.clone(), Value::from(root.pk));
		}
		RelationKind::GenericRelation {
			content_type_attname,
			object_id_attname,
		} => {
			save_kwargs.insert(content_type_attname.clone(), Value::from(root.model.as_str()));
			save_kwargs.insert(object_id_attname.clone(), Value::from(root.pk));
		}
		_ => {}
	}
	let back_references = BackReferences::for_child(&relation.serializer, schema, &save_kwargs);

	let mut saved_pks = Vec::with_capacity(items.len());
	for (index, item) in items.iter_mut() {
		// Items repeating an identifier all resolve to the same entity
		let target = item
			.get(pk_name)
			.and_then(as_pk)
			.and_then(|pk| existing.get(&pk).cloned());
		tracing::trace!(
			field = field_name,
			index = *index,
			existing = target.as_ref().map(|r| r.pk),
			"reconciling item"
		);

		let mut data = item.clone();
		for (name, value) in &back_references.declared {
			data.entry(name.clone()).or_insert_with(|| value.clone());
		}
		let mut child = relation.serializer.bind(target, Value::Object(data)).within(ctx);
		for field in &back_references.supplementary {
			child = child.with_supplementary_field(field.clone());
		}

		let position = if single { None } else { Some(*index) };
		let saved = child
			.is_valid_or_raise(tx)
			.and_then(|()| child.save(tx, save_kwargs.clone()))
			.map_err(|e| e.nested_under(field_name, position))?;

		if let Value::Object(written) = child.data() {
			**item = written.clone();
		}
		item.insert(pk_name.to_string(), Value::from(saved.pk));
		saved_pks.push(saved.pk);
	}

	if let RelationKind::ManyToMany {
		link,
		declared_here,
		custom_through,
	} = &descriptor.kind
		&& !custom_through
		&& !saved_pks.is_empty()
	{
		let pairs: Vec<(Pk, Pk)> = saved_pks
			.iter()
			.map(|pk| if *declared_here { (root.pk, *pk) } else { (*pk, root.pk) })
			.collect();
		tx.add_links(link, &pairs)?;
	}
	tracing::debug!(
		model = %root.model,
		field = field_name,
		saved = saved_pks.len(),
		"reverse relation reconciled"
	);
	Ok(())
}

/// Delete or unlink related entities no longer listed in `raw`
///
/// Relations are processed in reverse declaration order. Relations absent from
/// `raw` are left untouched; a relation given as an empty list loses all its
/// entities. Many-to-many relations only lose links, and those owned by a
/// custom through model are left alone.
///
/// # Errors
///
/// A delete refused because the stale entity is still referenced elsewhere
/// surfaces as [`SerializerError::ProtectedReference`](crate::SerializerError::ProtectedReference).
pub fn delete_stale(
	tx: &mut Transaction<'_>,
	root: &Record,
	reverse: &[RelationField],
	raw: &Attributes,
) -> SerializerResult<()> {
	let schema = tx.schema();
	for relation in reverse.iter().rev() {
		let Some(incoming) = raw.get(&relation.field_name) else {
			continue;
		};
		let related_model = relation.descriptor.related_model.as_str();
		let pk_name = schema.pk_name(related_model)?;
		let keep: Vec<Pk> = match incoming {
			Value::Array(items) => items
				.iter()
				.filter_map(|item| item.get(pk_name).and_then(as_pk))
				.collect(),
			Value::Object(item) => item.get(pk_name).and_then(as_pk).into_iter().collect(),
			_ => Vec::new(),
		};

		let removed = match &relation.descriptor.kind {
			RelationKind::ReverseForeignKey { remote_attname }
			| RelationKind::ReverseOneToOne { remote_attname } => {
				let filter = Filter::new()
					.eq(remote_attname.clone(), Value::from(root.pk))
					.exclude_pks(keep);
				tx.delete(related_model, &filter)?
			}
			RelationKind::GenericRelation {
				content_type_attname,
				object_id_attname,
			} => {
				let filter = Filter::new()
					.eq(content_type_attname.clone(), Value::from(root.model.as_str()))
					.eq(object_id_attname.clone(), Value::from(root.pk))
					.exclude_pks(keep);
				tx.delete(related_model, &filter)?
			}
			RelationKind::ManyToMany {
				link,
				declared_here,
				custom_through: false,
			} => {
				let side = if *declared_here {
					LinkSide::Source
				} else {
					LinkSide::Target
				};
				let keep: BTreeSet<Pk> = keep.into_iter().collect();
				let stale: Vec<(Pk, Pk)> = tx
					.links(link, side, &[root.pk])?
					.into_iter()
					.filter(|(source, target)| {
						let other = if *declared_here { target } else { source };
						!keep.contains(other)
					})
					.collect();
				tx.remove_links(link, &stale)?;
				stale.len()
			}
			_ => 0,
		};
		if removed > 0 {
			tracing::debug!(
				model = %root.model,
				field = %relation.field_name,
				removed,
				"stale related entities removed"
			);
		}
	}
	Ok(())
}

/// Items of a relation value with their position in the payload
///
/// A single object is one item; null entries of a list are dropped.
fn incoming_items(incoming: &mut Value) -> Vec<(usize, &mut Attributes)> {
	match incoming {
		Value::Object(item) => vec![(0, item)],
		Value::Array(items) => items
			.iter_mut()
			.enumerate()
			.filter_map(|(index, item)| item.as_object_mut().map(|item| (index, item)))
			.collect(),
		_ => Vec::new(),
	}
}

/// Back-reference values a child's deferred uniqueness checks need to see
#[derive(Debug, Default)]
struct BackReferences {
	/// Fields not declared on the child, attached for this save only
	supplementary: Vec<Field>,
	/// Values for declared fields, used when the item does not carry them
	declared: Vec<(String, Value)>,
}

impl BackReferences {
	fn for_child(child: &NestedSerializer, schema: &Schema, injected: &Attributes) -> Self {
		let mut refs = Self::default();
		let mut seen = BTreeSet::new();
		for validator in child.unique_together_validators() {
			if !validator.is_deferred() {
				continue;
			}
			for name in validator.field_names() {
				if !seen.insert(name.clone()) {
					continue;
				}
				let attname = schema
					.relation(child.model(), name)
					.and_then(|r| r.attname())
					.unwrap_or(name);
				let Some(value) = injected.get(attname).or_else(|| injected.get(name)) else {
					continue;
				};
				match child.field(name) {
					Some(field) if !field.read_only => {
						refs.declared.push((name.clone(), value.clone()));
					}
					Some(_) => {}
					None => refs
						.supplementary
						.push(Field::back_reference(name.clone(), value.clone())),
				}
			}
		}
		refs
	}
}
