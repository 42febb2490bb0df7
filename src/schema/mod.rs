//! Schema metadata for relkv
//!
//! Schemas describe the entities the engine serves:
//! - Scalar fields with kinds and flags
//! - Primary key (one or more `id` fields) and unique groups
//! - Relations, with one owning side per relation
//!
//! A schema can be built in code or loaded from YAML, one file per entity:
//!
//! ```yaml
//! name: Post
//! fields:
//!   - { name: id, type: int, id: true, default: autoincrement() }
//!   - { name: title, type: string, required: true }
//!   - { name: authorId, type: int }
//! relations:
//!   - name: author
//!     target: User
//!     kind: one
//!     fields: [authorId]
//!     references: [id]
//!     on_delete: cascade
//! ```
//!
//! Everything is validated once, in [`Schema::new`]; the engine trusts it
//! afterwards.

mod kind;
mod relation;

pub use kind::{Capabilities, DefaultValue, ScalarKind};
pub use relation::{Cardinality, Dependent, OnDelete, Relation, RelationDef, RelationKind};

use crate::storage::{Fields, IndexDef, Key, TableDef};
use crate::validation::{validate_entity_name, validate_field_name};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Definition of a single scalar field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ScalarKind,
    /// List of `kind` values
    #[serde(default)]
    pub list: bool,
    /// Part of the primary key
    #[serde(default)]
    pub id: bool,
    #[serde(default)]
    pub unique: bool,
    /// Must be present and non-null on create
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    /// Stamped with the current time on every create and update
    #[serde(default)]
    pub updated_at: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: ScalarKind) -> Self {
        Self {
            name: name.into(),
            kind,
            list: false,
            id: false,
            unique: false,
            required: false,
            default: None,
            updated_at: false,
        }
    }

    pub fn id(mut self) -> Self {
        self.id = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn list(mut self) -> Self {
        self.list = true;
        self
    }

    pub fn default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn updated_at(mut self) -> Self {
        self.updated_at = true;
        self
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some() || self.updated_at
    }
}

/// An entity as declared
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDef {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub relations: Vec<RelationDef>,
    /// Composite unique groups
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unique: Vec<Vec<String>>,
}

impl EntityDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            relations: Vec::new(),
            unique: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn unique_together(mut self, fields: &[&str]) -> Self {
        self.unique.push(fields.iter().map(|f| f.to_string()).collect());
        self
    }
}

/// Name of the index over `fields`
pub fn index_name(fields: &[String]) -> String {
    format!("{}Index", fields.join("_"))
}

/// An entity with its relations resolved
#[derive(Debug, Clone)]
pub struct EntityMeta {
    pub name: String,
    pub fields: Vec<FieldDef>,
    pub relations: Vec<Relation>,
    /// Primary-key fields, in declaration order
    pub id_fields: Vec<String>,
    /// Unique selectors other than the primary key
    pub unique_groups: Vec<Vec<String>>,
    /// Owning relations elsewhere that point at this entity
    pub dependents: Vec<Dependent>,
}

impl EntityMeta {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Look up a scalar field, failing with `UnknownField`
    pub fn require_field(&self, name: &str) -> Result<&FieldDef> {
        self.field(name).ok_or_else(|| Error::UnknownField {
            entity: self.name.clone(),
            field: name.to_string(),
        })
    }

    pub fn require_relation(&self, name: &str) -> Result<&Relation> {
        self.relation(name).ok_or_else(|| Error::UnknownField {
            entity: self.name.clone(),
            field: name.to_string(),
        })
    }

    /// Fields of a compound selector such as `email_tenant`
    pub fn compound(&self, name: &str) -> Option<&[String]> {
        std::iter::once(&self.id_fields)
            .chain(self.unique_groups.iter())
            .filter(|group| group.len() > 1)
            .find(|group| group.join("_") == name)
            .map(Vec::as_slice)
    }

    /// Primary key and every unique group
    pub fn unique_selectors(&self) -> impl Iterator<Item = &[String]> {
        std::iter::once(self.id_fields.as_slice()).chain(self.unique_groups.iter().map(Vec::as_slice))
    }

    /// Whether the id field generates its own value when omitted
    pub fn key_is_generated(&self) -> bool {
        self.id_fields
            .iter()
            .filter_map(|name| self.field(name))
            .all(|f| f.default.as_ref().is_some_and(DefaultValue::is_generated))
    }

    pub fn key_of(&self, fields: &Fields) -> Key {
        Key::from_fields(&self.id_fields, fields)
    }

    /// Table declaration: primary key plus unique and foreign-key indexes
    pub fn table_def(&self) -> TableDef {
        let mut indexes: Vec<IndexDef> = self
            .unique_groups
            .iter()
            .map(|fields| IndexDef {
                name: index_name(fields),
                fields: fields.clone(),
                unique: true,
            })
            .collect();
        for relation in self.relations.iter().filter(|r| r.is_owning()) {
            if relation.local == self.id_fields || indexes.iter().any(|idx| idx.fields == relation.local) {
                continue;
            }
            indexes.push(IndexDef {
                name: index_name(&relation.local),
                fields: relation.local.clone(),
                unique: false,
            });
        }
        TableDef {
            name: self.name.clone(),
            key_path: self.id_fields.clone(),
            indexes,
        }
    }
}

/// Every entity of an application, validated and resolved
#[derive(Debug, Clone, Default)]
pub struct Schema {
    entities: BTreeMap<String, EntityMeta>,
}

impl Schema {
    /// Validate entity definitions and resolve their relations
    pub fn new(defs: Vec<EntityDef>) -> Result<Self> {
        let by_name: BTreeMap<&str, &EntityDef> = defs.iter().map(|d| (d.name.as_str(), d)).collect();
        if by_name.len() != defs.len() {
            return Err(schema_error("<schema>", "entity names must be unique"));
        }

        let mut entities = BTreeMap::new();
        for def in &defs {
            let meta = resolve_entity(def, &by_name)?;
            entities.insert(def.name.clone(), meta);
        }

        let mut dependents: BTreeMap<String, Vec<Dependent>> = BTreeMap::new();
        for meta in entities.values() {
            for relation in meta.relations.iter().filter(|r| r.is_owning()) {
                let nullable = relation
                    .local
                    .iter()
                    .filter_map(|f| meta.field(f))
                    .all(|f| !f.required && !f.id);
                dependents.entry(relation.target.clone()).or_default().push(Dependent {
                    entity: meta.name.clone(),
                    relation: relation.name.clone(),
                    fields: relation.local.clone(),
                    references: relation.foreign.clone(),
                    on_delete: relation.on_delete,
                    nullable,
                });
            }
        }
        for (name, deps) in dependents {
            if let Some(meta) = entities.get_mut(&name) {
                for dep in &deps {
                    if dep.on_delete == OnDelete::SetNull && !dep.nullable {
                        return Err(schema_error(
                            &dep.entity,
                            format!("relation '{}' uses set_null on required fields", dep.relation),
                        ));
                    }
                }
                meta.dependents = deps;
            }
        }

        Ok(Self { entities })
    }

    /// Parse a YAML sequence of entity definitions
    pub fn from_yaml(content: &str) -> Result<Self> {
        let defs: Vec<EntityDef> = serde_yaml::from_str(content)?;
        Self::new(defs)
    }

    /// Load one entity per `.yaml` file in `dir`
    pub fn load(dir: &Path) -> Result<Self> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "yaml" || e == "yml").unwrap_or(false) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut defs = Vec::new();
        for path in paths {
            let content = std::fs::read_to_string(&path)?;
            defs.push(serde_yaml::from_str::<EntityDef>(&content)?);
        }
        Self::new(defs)
    }

    pub fn entity(&self, name: &str) -> Option<&EntityMeta> {
        self.entities.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&EntityMeta> {
        self.entity(name).ok_or_else(|| Error::UnknownEntity {
            name: name.to_string(),
        })
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityMeta> {
        self.entities.values()
    }
}

fn schema_error(entity: &str, message: impl Into<String>) -> Error {
    Error::Schema {
        entity: entity.to_string(),
        message: message.into(),
    }
}

fn resolve_entity(def: &EntityDef, all: &BTreeMap<&str, &EntityDef>) -> Result<EntityMeta> {
    validate_entity_name(&def.name)?;

    let mut names = BTreeSet::new();
    for field in &def.fields {
        validate_field_name(&field.name)?;
        if !names.insert(field.name.as_str()) {
            return Err(schema_error(&def.name, format!("duplicate field '{}'", field.name)));
        }
        if field.id && field.list {
            return Err(schema_error(&def.name, format!("id field '{}' cannot be a list", field.name)));
        }
        if matches!(field.default, Some(DefaultValue::AutoIncrement)) && field.kind != ScalarKind::Int {
            return Err(schema_error(
                &def.name,
                format!("autoincrement() requires an int field, '{}' is {}", field.name, field.kind.name()),
            ));
        }
        if let Some(DefaultValue::Value(json)) = &field.default {
            let check = if field.list {
                json.as_array()
                    .ok_or_else(|| "expected a list".to_string())
                    .and_then(|items| items.iter().try_for_each(|i| field.kind.coerce(i).map(drop)))
            } else {
                field.kind.coerce(json).map(drop)
            };
            check.map_err(|reason| schema_error(&def.name, format!("default of '{}': {}", field.name, reason)))?;
        }
    }
    for relation in &def.relations {
        validate_field_name(&relation.name)?;
        if !names.insert(relation.name.as_str()) {
            return Err(schema_error(&def.name, format!("duplicate field '{}'", relation.name)));
        }
    }

    let id_fields: Vec<String> = def.fields.iter().filter(|f| f.id).map(|f| f.name.clone()).collect();
    if id_fields.is_empty() {
        return Err(schema_error(&def.name, "entity has no id field"));
    }

    let mut unique_groups: Vec<Vec<String>> = def
        .fields
        .iter()
        .filter(|f| f.unique && !(f.id && id_fields.len() == 1))
        .map(|f| vec![f.name.clone()])
        .collect();
    for group in &def.unique {
        if let Some(missing) = group.iter().find(|f| !names.contains(f.as_str())) {
            return Err(schema_error(&def.name, format!("unique group names unknown field '{}'", missing)));
        }
        if !unique_groups.contains(group) {
            unique_groups.push(group.clone());
        }
    }

    let fields_of = |entity: &EntityDef, wanted: &[String]| -> Option<String> {
        wanted
            .iter()
            .find(|w| !entity.fields.iter().any(|f| &f.name == *w))
            .cloned()
    };

    let mut relations = Vec::new();
    for rel in &def.relations {
        let target = all.get(rel.target.as_str()).ok_or_else(|| {
            schema_error(&def.name, format!("relation '{}' targets unknown entity '{}'", rel.name, rel.target))
        })?;

        let resolved = if rel.is_owning() {
            if rel.kind == RelationKind::Many {
                return Err(schema_error(&def.name, format!("to-many relation '{}' cannot own a key", rel.name)));
            }
            if rel.fields.len() != rel.references.len() {
                return Err(schema_error(
                    &def.name,
                    format!("relation '{}' has {} fields but {} references", rel.name, rel.fields.len(), rel.references.len()),
                ));
            }
            if let Some(missing) = fields_of(def, &rel.fields) {
                return Err(schema_error(&def.name, format!("relation '{}' names unknown field '{}'", rel.name, missing)));
            }
            if let Some(missing) = fields_of(target, &rel.references) {
                return Err(schema_error(
                    &def.name,
                    format!("relation '{}' references unknown field '{}.{}'", rel.name, rel.target, missing),
                ));
            }
            if !is_unique_selector(target, &rel.references) {
                return Err(schema_error(
                    &def.name,
                    format!("relation '{}' must reference the id or a unique field of '{}'", rel.name, rel.target),
                ));
            }
            Relation {
                name: rel.name.clone(),
                target: rel.target.clone(),
                cardinality: Cardinality::OneOwning,
                local: rel.fields.clone(),
                foreign: rel.references.clone(),
                on_delete: rel.on_delete,
            }
        } else {
            let owners: Vec<&RelationDef> = target
                .relations
                .iter()
                .filter(|r| r.target == def.name && r.is_owning())
                .filter(|r| rel.opposite.as_ref().map_or(true, |o| &r.name == o))
                .filter(|r| def.name != target.name || r.name != rel.name)
                .collect();
            let owner = match owners.as_slice() {
                [owner] => *owner,
                [] => {
                    return Err(schema_error(
                        &def.name,
                        format!("relation '{}' has no owning side on '{}'", rel.name, rel.target),
                    ))
                }
                _ => {
                    return Err(schema_error(
                        &def.name,
                        format!("relation '{}' is ambiguous; set 'opposite'", rel.name),
                    ))
                }
            };
            Relation {
                name: rel.name.clone(),
                target: rel.target.clone(),
                cardinality: match rel.kind {
                    RelationKind::One => Cardinality::OneReferenced,
                    RelationKind::Many => Cardinality::Many,
                },
                local: owner.references.clone(),
                foreign: owner.fields.clone(),
                on_delete: OnDelete::NoAction,
            }
        };
        relations.push(resolved);
    }

    Ok(EntityMeta {
        name: def.name.clone(),
        fields: def.fields.clone(),
        relations,
        id_fields,
        unique_groups,
        dependents: Vec::new(),
    })
}

fn is_unique_selector(entity: &EntityDef, fields: &[String]) -> bool {
    let ids: Vec<&String> = entity.fields.iter().filter(|f| f.id).map(|f| &f.name).collect();
    if ids.len() == fields.len() && ids.iter().zip(fields).all(|(a, b)| *a == b) {
        return true;
    }
    if let [single] = fields {
        if entity.fields.iter().any(|f| &f.name == single && (f.unique || (f.id && ids.len() == 1))) {
            return true;
        }
    }
    entity.unique.iter().any(|group| group.as_slice() == fields)
}
