//! Relation declarations and their resolved form

use serde::{Deserialize, Serialize};

/// How many records sit on the other side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    One,
    Many,
}

/// What happens to owning records when the record they reference is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
    /// Delete the owning records through their own delete path
    Cascade,
    /// Clear the foreign key
    SetNull,
    /// Refuse the delete while owning records exist
    Restrict,
    /// Leave the owning records dangling
    #[default]
    NoAction,
}

/// A relation as declared in a schema file
///
/// The owning side lists `fields` (foreign-key fields on this entity) and
/// `references` (the target fields they point at). The other side lists
/// neither and is resolved by reverse lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDef {
    pub name: String,
    pub target: String,
    pub kind: RelationKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
    #[serde(default)]
    pub on_delete: OnDelete,
    /// Name of the matching relation on the target, when more than one
    /// relation links the same two entities
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opposite: Option<String>,
}

impl RelationDef {
    /// Owning to-one relation
    pub fn owning(
        name: impl Into<String>,
        target: impl Into<String>,
        fields: &[&str],
        references: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            kind: RelationKind::One,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            references: references.iter().map(|f| f.to_string()).collect(),
            on_delete: OnDelete::default(),
            opposite: None,
        }
    }

    /// Referenced side of a one-to-one relation
    pub fn one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::referenced(name, target, RelationKind::One)
    }

    /// Referenced side of a one-to-many relation
    pub fn many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::referenced(name, target, RelationKind::Many)
    }

    fn referenced(name: impl Into<String>, target: impl Into<String>, kind: RelationKind) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            kind,
            fields: Vec::new(),
            references: Vec::new(),
            on_delete: OnDelete::default(),
            opposite: None,
        }
    }

    pub fn on_delete(mut self, action: OnDelete) -> Self {
        self.on_delete = action;
        self
    }

    pub fn opposite(mut self, name: impl Into<String>) -> Self {
        self.opposite = Some(name.into());
        self
    }

    pub fn is_owning(&self) -> bool {
        !self.fields.is_empty()
    }
}

/// Resolved cardinality, seen from the declaring entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// This entity stores the foreign key
    OneOwning,
    /// The target stores the foreign key; at most one target record
    OneReferenced,
    /// The target stores the foreign key
    Many,
}

/// A relation with both sides of its key equality spelled out
///
/// Related records are the `target` rows whose `foreign` fields equal this
/// record's `local` fields, whichever side owns the key.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub name: String,
    pub target: String,
    pub cardinality: Cardinality,
    pub local: Vec<String>,
    pub foreign: Vec<String>,
    pub on_delete: OnDelete,
}

impl Relation {
    pub fn is_owning(&self) -> bool {
        self.cardinality == Cardinality::OneOwning
    }

    pub fn is_to_many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }
}

/// An owning relation, seen from the entity it points at
#[derive(Debug, Clone, PartialEq)]
pub struct Dependent {
    /// Entity holding the foreign key
    pub entity: String,
    /// Relation name on that entity
    pub relation: String,
    /// Foreign-key fields on the dependent entity
    pub fields: Vec<String>,
    /// Referenced fields on the parent
    pub references: Vec<String>,
    pub on_delete: OnDelete,
    /// Whether every foreign-key field may be cleared
    pub nullable: bool,
}
