//! Relation metadata
//!
//! Models are declared with [`ModelSchema`] and the association builders
//! ([`ForeignKey`], [`ManyToMany`], [`GenericRelation`]). [`Schema::builder`]
//! turns those declarations into one [`RelationDescriptor`] per relation field,
//! including the reverse accessors implied by `related_name`, so that callers
//! never have to re-derive relation shape at request time.
//!
//! # Examples
//!
//! ```
//! use reinhardt_nested_orm::schema::{
//! 	CascadeAction, Cardinality, Direction, ForeignKey, ModelSchema, Schema,
//! };
//!
//! let schema = Schema::builder()
//! 	.model(ModelSchema::new("person"))
//! 	.model(
//! 		ModelSchema::new("child").foreign_key(
//! 			ForeignKey::new("parent", "person")
//! 				.related_name("children")
//! 				.on_delete(CascadeAction::Cascade),
//! 		),
//! 	)
//! 	.build()
//! 	.unwrap();
//!
//! let children = schema.relation("person", "children").unwrap();
//! assert_eq!(children.cardinality(), Cardinality::Many);
//! assert_eq!(children.direction(), Direction::Reverse);
//! ```

use crate::error::{OrmError, OrmResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Action to take on referencing rows when the referenced row is deleted
///
/// `NoAction` and `Restrict` both refuse the delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CascadeAction {
	/// Refuse the delete (database default)
	#[default]
	NoAction,
	/// Refuse the delete
	Restrict,
	/// Set the referencing attribute to null
	SetNull,
	/// Delete referencing rows as well
	Cascade,
}

/// How many related entities a relation field holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
	One,
	Many,
}

/// Which side of the relation stores the reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
	/// The reference is stored on the model declaring the field
	Direct,
	/// The reference is stored on the related model or in a link table
	Reverse,
}

/// Physical representation of the relation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMechanism {
	ForeignKey,
	ManyToMany,
	Generic,
}

/// Junction table of a many-to-many relation
///
/// Link rows are stored as `(source_pk, target_pk)` where the source is the
/// model that declared the relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTable {
	pub name: String,
	pub source_model: String,
	pub target_model: String,
	pub source_column: String,
	pub target_column: String,
}

/// Shape of a relation field
#[derive(Debug, Clone, PartialEq)]
pub enum RelationKind {
	/// Many-to-one, reference stored in `attname` on the declaring model
	ForeignKey {
		attname: String,
		on_delete: CascadeAction,
		null: bool,
	},
	/// One-to-one, reference stored in `attname` on the declaring model
	OneToOne {
		attname: String,
		on_delete: CascadeAction,
		null: bool,
	},
	/// Reverse accessor of a foreign key; `remote_attname` lives on the related model
	ReverseForeignKey { remote_attname: String },
	/// Reverse accessor of a one-to-one; `remote_attname` lives on the related model
	ReverseOneToOne { remote_attname: String },
	/// Many-to-many through `link`
	ManyToMany {
		link: LinkTable,
		/// `false` on the reverse accessor of a relation declared on the other model
		declared_here: bool,
		/// Links are owned by a custom through model
		custom_through: bool,
	},
	/// Related rows point back with a (model name, object id) pair
	GenericRelation {
		content_type_attname: String,
		object_id_attname: String,
	},
}

/// Static metadata of one relation field
#[derive(Debug, Clone, PartialEq)]
pub struct RelationDescriptor {
	pub field_name: String,
	pub related_model: String,
	pub kind: RelationKind,
}

impl RelationDescriptor {
	pub fn cardinality(&self) -> Cardinality {
		match self.kind {
			RelationKind::ForeignKey { .. }
			| RelationKind::OneToOne { .. }
			| RelationKind::ReverseOneToOne { .. } => Cardinality::One,
			RelationKind::ReverseForeignKey { .. }
			| RelationKind::ManyToMany { .. }
			| RelationKind::GenericRelation { .. } => Cardinality::Many,
		}
	}

	pub fn direction(&self) -> Direction {
		match &self.kind {
			RelationKind::ForeignKey { .. } | RelationKind::OneToOne { .. } => Direction::Direct,
			RelationKind::ManyToMany { declared_here, .. } if *declared_here => Direction::Direct,
			_ => Direction::Reverse,
		}
	}

	pub fn storage_mechanism(&self) -> StorageMechanism {
		match self.kind {
			RelationKind::ManyToMany { .. } => StorageMechanism::ManyToMany,
			RelationKind::GenericRelation { .. } => StorageMechanism::Generic,
			_ => StorageMechanism::ForeignKey,
		}
	}

	pub fn through_model_present(&self) -> bool {
		matches!(
			self.kind,
			RelationKind::ManyToMany {
				custom_through: true,
				..
			}
		)
	}

	/// Relation whose reference must exist before the declaring row is saved
	///
	/// Reverse one-to-one accessors look like single-valued relations but the
	/// reference lives on the other row, so they are not direct.
	pub fn is_direct(&self) -> bool {
		self.cardinality() == Cardinality::One && self.direction() == Direction::Direct
	}

	/// Storage attribute on the declaring model for direct relations
	pub fn attname(&self) -> Option<&str> {
		match &self.kind {
			RelationKind::ForeignKey { attname, .. } | RelationKind::OneToOne { attname, .. } => {
				Some(attname)
			}
			_ => None,
		}
	}
}

/// Foreign key (or one-to-one) declaration
///
/// # Examples
///
/// ```
/// use reinhardt_nested_orm::schema::{CascadeAction, ForeignKey};
///
/// let fk = ForeignKey::new("author", "user")
/// 	.related_name("posts")
/// 	.on_delete(CascadeAction::Cascade);
/// assert_eq!(fk.get_attname(), "author_id");
/// ```
#[derive(Debug, Clone)]
pub struct ForeignKey {
	field_name: String,
	to: String,
	attname: Option<String>,
	related_name: Option<String>,
	on_delete: CascadeAction,
	null: bool,
	one_to_one: bool,
}

impl ForeignKey {
	pub fn new(field_name: impl Into<String>, to: impl Into<String>) -> Self {
		Self {
			field_name: field_name.into(),
			to: to.into(),
			attname: None,
			related_name: None,
			on_delete: CascadeAction::default(),
			null: false,
			one_to_one: false,
		}
	}

	/// Declare a one-to-one relation
	pub fn one_to_one(field_name: impl Into<String>, to: impl Into<String>) -> Self {
		Self {
			one_to_one: true,
			..Self::new(field_name, to)
		}
	}

	/// Override the storage attribute (defaults to `{field_name}_id`)
	pub fn attname(mut self, attname: impl Into<String>) -> Self {
		self.attname = Some(attname.into());
		self
	}

	/// Name of the reverse accessor on the target model
	pub fn related_name(mut self, related_name: impl Into<String>) -> Self {
		self.related_name = Some(related_name.into());
		self
	}

	pub fn on_delete(mut self, action: CascadeAction) -> Self {
		self.on_delete = action;
		self
	}

	/// Allow the reference to be null
	pub fn null(mut self, null: bool) -> Self {
		self.null = null;
		self
	}

	pub fn get_attname(&self) -> String {
		self.attname
			.clone()
			.unwrap_or_else(|| format!("{}_id", self.field_name))
	}
}

/// Many-to-many declaration
#[derive(Debug, Clone)]
pub struct ManyToMany {
	field_name: String,
	to: String,
	related_name: Option<String>,
	through: Option<String>,
	custom_through: bool,
}

impl ManyToMany {
	pub fn new(field_name: impl Into<String>, to: impl Into<String>) -> Self {
		Self {
			field_name: field_name.into(),
			to: to.into(),
			related_name: None,
			through: None,
			custom_through: false,
		}
	}

	pub fn related_name(mut self, related_name: impl Into<String>) -> Self {
		self.related_name = Some(related_name.into());
		self
	}

	/// Name the auto-created junction table (defaults to `{model}_{field}`)
	pub fn through(mut self, table: impl Into<String>) -> Self {
		self.through = Some(table.into());
		self
	}

	/// Declare that links are owned by a custom through model
	pub fn through_model(mut self, table: impl Into<String>) -> Self {
		self.through = Some(table.into());
		self.custom_through = true;
		self
	}
}

/// Generic relation declaration: rows of `to` point back with a
/// (model name, object id) pair
#[derive(Debug, Clone)]
pub struct GenericRelation {
	field_name: String,
	to: String,
	content_type_attname: String,
	object_id_attname: String,
}

impl GenericRelation {
	pub fn new(field_name: impl Into<String>, to: impl Into<String>) -> Self {
		Self {
			field_name: field_name.into(),
			to: to.into(),
			content_type_attname: "content_type".to_string(),
			object_id_attname: "object_id".to_string(),
		}
	}

	pub fn content_type_attname(mut self, attname: impl Into<String>) -> Self {
		self.content_type_attname = attname.into();
		self
	}

	pub fn object_id_attname(mut self, attname: impl Into<String>) -> Self {
		self.object_id_attname = attname.into();
		self
	}
}

/// Declaration of one model and the relations it owns
#[derive(Debug, Clone)]
pub struct ModelSchema {
	name: String,
	pk_name: String,
	foreign_keys: Vec<ForeignKey>,
	many_to_many: Vec<ManyToMany>,
	generic_relations: Vec<GenericRelation>,
}

impl ModelSchema {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			pk_name: "id".to_string(),
			foreign_keys: Vec::new(),
			many_to_many: Vec::new(),
			generic_relations: Vec::new(),
		}
	}

	pub fn pk_name(mut self, pk_name: impl Into<String>) -> Self {
		self.pk_name = pk_name.into();
		self
	}

	pub fn foreign_key(mut self, fk: ForeignKey) -> Self {
		self.foreign_keys.push(fk);
		self
	}

	pub fn many_to_many(mut self, m2m: ManyToMany) -> Self {
		self.many_to_many.push(m2m);
		self
	}

	pub fn generic_relation(mut self, relation: GenericRelation) -> Self {
		self.generic_relations.push(relation);
		self
	}
}

/// A foreign key pointing at a model, seen from the referenced side
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
	/// Model holding the reference
	pub model: String,
	/// Attribute holding the referenced primary key
	pub attname: String,
	pub on_delete: CascadeAction,
}

/// Resolved metadata of one model
#[derive(Debug, Clone)]
pub struct ModelMeta {
	name: String,
	pk_name: String,
	relations: IndexMap<String, RelationDescriptor>,
	referenced_by: Vec<Reference>,
}

impl ModelMeta {
	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn pk_name(&self) -> &str {
		&self.pk_name
	}

	pub fn relation(&self, field_name: &str) -> Option<&RelationDescriptor> {
		self.relations.get(field_name)
	}

	/// All relation descriptors in declaration order
	pub fn relations(&self) -> impl Iterator<Item = &RelationDescriptor> {
		self.relations.values()
	}

	/// Foreign keys of other models pointing at this one
	pub fn referenced_by(&self) -> &[Reference] {
		&self.referenced_by
	}
}

/// Registry of model metadata, built once and read-only afterwards
#[derive(Debug, Clone, Default)]
pub struct Schema {
	models: IndexMap<String, ModelMeta>,
}

impl Schema {
	pub fn builder() -> SchemaBuilder {
		SchemaBuilder::default()
	}

	pub fn model(&self, name: &str) -> Option<&ModelMeta> {
		self.models.get(name)
	}

	pub fn require_model(&self, name: &str) -> OrmResult<&ModelMeta> {
		self.models
			.get(name)
			.ok_or_else(|| OrmError::UnknownModel(name.to_string()))
	}

	pub fn relation(&self, model: &str, field_name: &str) -> Option<&RelationDescriptor> {
		self.models.get(model).and_then(|m| m.relation(field_name))
	}

	pub fn require_relation(&self, model: &str, field_name: &str) -> OrmResult<&RelationDescriptor> {
		self.require_model(model)?
			.relation(field_name)
			.ok_or_else(|| OrmError::UnknownRelation {
				model: model.to_string(),
				field: field_name.to_string(),
			})
	}

	pub fn pk_name(&self, model: &str) -> OrmResult<&str> {
		Ok(self.require_model(model)?.pk_name())
	}

	pub fn models(&self) -> impl Iterator<Item = &ModelMeta> {
		self.models.values()
	}
}

/// Collects [`ModelSchema`] declarations and resolves them into a [`Schema`]
#[derive(Debug, Default)]
pub struct SchemaBuilder {
	models: Vec<ModelSchema>,
}

impl SchemaBuilder {
	pub fn model(mut self, model: ModelSchema) -> Self {
		self.models.push(model);
		self
	}

	/// Resolve declarations
	///
	/// # Errors
	///
	/// Returns [`OrmError::InvalidSchema`] for duplicate models, relations to
	/// undeclared models, or relation names that collide on a model.
	pub fn build(self) -> OrmResult<Schema> {
		let mut models: IndexMap<String, ModelMeta> = IndexMap::new();
		for declaration in &self.models {
			if models.contains_key(&declaration.name) {
				return Err(OrmError::InvalidSchema(format!(
					"model '{}' is declared twice",
					declaration.name
				)));
			}
			models.insert(
				declaration.name.clone(),
				ModelMeta {
					name: declaration.name.clone(),
					pk_name: declaration.pk_name.clone(),
					relations: IndexMap::new(),
					referenced_by: Vec::new(),
				},
			);
		}

		for declaration in &self.models {
			let model = declaration.name.as_str();

			for fk in &declaration.foreign_keys {
				ensure_declared(&models, model, &fk.to)?;
				let attname = fk.get_attname();
				let kind = if fk.one_to_one {
					RelationKind::OneToOne {
						attname: attname.clone(),
						on_delete: fk.on_delete,
						null: fk.null,
					}
				} else {
					RelationKind::ForeignKey {
						attname: attname.clone(),
						on_delete: fk.on_delete,
						null: fk.null,
					}
				};
				add_relation(
					&mut models,
					model,
					RelationDescriptor {
						field_name: fk.field_name.clone(),
						related_model: fk.to.clone(),
						kind,
					},
				)?;

				if let Some(related_name) = &fk.related_name {
					let kind = if fk.one_to_one {
						RelationKind::ReverseOneToOne {
							remote_attname: attname.clone(),
						}
					} else {
						RelationKind::ReverseForeignKey {
							remote_attname: attname.clone(),
						}
					};
					add_relation(
						&mut models,
						&fk.to,
						RelationDescriptor {
							field_name: related_name.clone(),
							related_model: model.to_string(),
							kind,
						},
					)?;
				}

				if let Some(target) = models.get_mut(&fk.to) {
					target.referenced_by.push(Reference {
						model: model.to_string(),
						attname,
						on_delete: fk.on_delete,
					});
				}
			}

			for m2m in &declaration.many_to_many {
				ensure_declared(&models, model, &m2m.to)?;
				let (source_column, target_column) = if model == m2m.to {
					(format!("from_{}_id", model), format!("to_{}_id", model))
				} else {
					(format!("{}_id", model), format!("{}_id", m2m.to))
				};
				let link = LinkTable {
					name: m2m
						.through
						.clone()
						.unwrap_or_else(|| format!("{}_{}", model, m2m.field_name)),
					source_model: model.to_string(),
					target_model: m2m.to.clone(),
					source_column,
					target_column,
				};
				add_relation(
					&mut models,
					model,
					RelationDescriptor {
						field_name: m2m.field_name.clone(),
						related_model: m2m.to.clone(),
						kind: RelationKind::ManyToMany {
							link: link.clone(),
							declared_here: true,
							custom_through: m2m.custom_through,
						},
					},
				)?;
				if let Some(related_name) = &m2m.related_name {
					add_relation(
						&mut models,
						&m2m.to,
						RelationDescriptor {
							field_name: related_name.clone(),
							related_model: model.to_string(),
							kind: RelationKind::ManyToMany {
								link,
								declared_here: false,
								custom_through: m2m.custom_through,
							},
						},
					)?;
				}
			}

			for generic in &declaration.generic_relations {
				ensure_declared(&models, model, &generic.to)?;
				add_relation(
					&mut models,
					model,
					RelationDescriptor {
						field_name: generic.field_name.clone(),
						related_model: generic.to.clone(),
						kind: RelationKind::GenericRelation {
							content_type_attname: generic.content_type_attname.clone(),
							object_id_attname: generic.object_id_attname.clone(),
						},
					},
				)?;
			}
		}

		tracing::debug!(models = models.len(), "schema resolved");
		Ok(Schema { models })
	}
}

fn ensure_declared(models: &IndexMap<String, ModelMeta>, from: &str, to: &str) -> OrmResult<()> {
	if models.contains_key(to) {
		Ok(())
	} else {
		Err(OrmError::InvalidSchema(format!(
			"model '{}' declares a relation to undeclared model '{}'",
			from, to
		)))
	}
}

fn add_relation(
	models: &mut IndexMap<String, ModelMeta>,
	model: &str,
	descriptor: RelationDescriptor,
) -> OrmResult<()> {
	let meta = models
		.get_mut(model)
		.ok_or_else(|| OrmError::UnknownModel(model.to_string()))?;
	if meta.relations.contains_key(&descriptor.field_name) {
		return Err(OrmError::InvalidSchema(format!(
			"relation '{}' is declared twice on model '{}'",
			descriptor.field_name, model
		)));
	}
	meta.relations
		.insert(descriptor.field_name.clone(), descriptor);
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::*;

	#[fixture]
	fn schema() -> Schema {
		Schema::builder()
			.model(ModelSchema::new("person").foreign_key(
				ForeignKey::one_to_one("profile", "profile")
					.related_name("person")
					.null(true),
			))
			.model(ModelSchema::new("profile"))
			.model(
				ModelSchema::new("child").foreign_key(
					ForeignKey::new("parent", "person")
						.related_name("children")
						.on_delete(CascadeAction::Cascade),
				),
			)
			.model(
				ModelSchema::new("club")
					.many_to_many(ManyToMany::new("members", "person").related_name("clubs")),
			)
			.model(ModelSchema::new("note"))
			.model(ModelSchema::new("tagged").generic_relation(GenericRelation::new("notes", "note")))
			.build()
			.unwrap()
	}

	#[rstest]
	fn test_direct_foreign_key_descriptor(schema: Schema) {
		let profile = schema.relation("person", "profile").unwrap();
		assert_eq!(profile.cardinality(), Cardinality::One);
		assert_eq!(profile.direction(), Direction::Direct);
		assert!(profile.is_direct());
		assert_eq!(profile.attname(), Some("profile_id"));
	}

	#[rstest]
	fn test_reverse_one_to_one_is_not_direct(schema: Schema) {
		let person = schema.relation("profile", "person").unwrap();
		assert_eq!(person.cardinality(), Cardinality::One);
		assert_eq!(person.direction(), Direction::Reverse);
		assert!(!person.is_direct());
		assert_eq!(
			person.kind,
			RelationKind::ReverseOneToOne {
				remote_attname: "profile_id".to_string()
			}
		);
	}

	#[rstest]
	fn test_reverse_foreign_key_derived_from_related_name(schema: Schema) {
		let children = schema.relation("person", "children").unwrap();
		assert_eq!(children.related_model, "child");
		assert_eq!(children.cardinality(), Cardinality::Many);
		assert_eq!(children.storage_mechanism(), StorageMechanism::ForeignKey);
		assert_eq!(
			schema.model("person").unwrap().referenced_by(),
			&[Reference {
				model: "child".to_string(),
				attname: "parent_id".to_string(),
				on_delete: CascadeAction::Cascade,
			}]
		);
	}

	#[rstest]
	fn test_many_to_many_both_sides_share_link(schema: Schema) {
		let members = schema.relation("club", "members").unwrap();
		let clubs = schema.relation("person", "clubs").unwrap();
		let (
			RelationKind::ManyToMany {
				link: forward,
				declared_here: true,
				..
			},
			RelationKind::ManyToMany {
				link: backward,
				declared_here: false,
				..
			},
		) = (&members.kind, &clubs.kind)
		else {
			panic!("expected many-to-many descriptors");
		};
		assert_eq!(forward, backward);
		assert_eq!(forward.name, "club_members");
		assert_eq!(members.direction(), Direction::Direct);
		assert_eq!(clubs.direction(), Direction::Reverse);
		assert!(!members.through_model_present());
	}

	#[rstest]
	fn test_generic_relation_descriptor(schema: Schema) {
		let notes = schema.relation("tagged", "notes").unwrap();
		assert_eq!(notes.storage_mechanism(), StorageMechanism::Generic);
		assert_eq!(notes.cardinality(), Cardinality::Many);
	}

	#[test]
	fn test_relation_to_undeclared_model_is_rejected() {
		let result = Schema::builder()
			.model(ModelSchema::new("child").foreign_key(ForeignKey::new("parent", "person")))
			.build();
		assert!(matches!(result, Err(OrmError::InvalidSchema(_))));
	}

	#[test]
	fn test_colliding_related_name_is_rejected() {
		let result = Schema::builder()
			.model(ModelSchema::new("person"))
			.model(
				ModelSchema::new("child")
					.foreign_key(ForeignKey::new("mother", "person").related_name("children"))
					.foreign_key(ForeignKey::new("father", "person").related_name("children")),
			)
			.build();
		assert!(matches!(result, Err(OrmError::InvalidSchema(_))));
	}
}
