//! Nested writes and referential actions
//!
//! Creates resolve owning relations first (the row needs the parent key),
//! persist the row, then write children that point back at it. Updates patch
//! scalars in place under the unchanged key. Deletes apply every dependent's
//! `on_delete` action before removing the row.
//!
//! Everything here runs inside the operation's transaction; an error leaves
//! partial writes behind for the caller to roll back.

use super::relations::{related_rows, rows_where};
use super::{defaults, find_unique_row, Ctx};
use crate::notify::EventKind;
use crate::schema::{EntityMeta, FieldDef, OnDelete, Relation};
use crate::storage::{Fields, Key, Value};
use crate::{Error, Result};
use num_bigint::BigInt;
use relql::{Disconnect, FieldWrite, Literal, NestedWrite, UpdateOp, WriteData};
use std::collections::BTreeSet;
use tracing::debug;

/// Fail on `connectOrCreate` anywhere in `data`, before anything is written
pub(crate) fn check_supported(ctx: &Ctx, meta: &EntityMeta, data: &WriteData) -> Result<()> {
    for (name, write) in &data.fields {
        let FieldWrite::Relation(nested) = write else { continue };
        if !nested.connect_or_create.is_empty() {
            return Err(Error::UnsupportedOperation {
                operation: "connectOrCreate",
                entity: meta.name.clone(),
                relation: name.clone(),
            });
        }
        let Some(target) = meta.relation(name).and_then(|r| ctx.schema().entity(&r.target)) else {
            continue;
        };
        for child in nested.create.iter().chain(nested.create_many.iter().flat_map(|m| &m.data)) {
            check_supported(ctx, target, child)?;
        }
    }
    Ok(())
}

/// Whether `data` writes through any relation
pub fn has_relation_writes(data: &WriteData) -> bool {
    data.fields.iter().any(|(_, w)| matches!(w, FieldWrite::Relation(_)))
}

// =============================================================================
// Create
// =============================================================================

/// Create one row of `meta` from `data`, with `link` (the foreign key to a
/// parent being written) applied on top. Returns the stored row.
pub(crate) fn create(ctx: &Ctx, meta: &EntityMeta, data: &WriteData, link: &Fields) -> Result<Fields> {
    let mut row = Fields::new();
    let mut raw: BTreeSet<String> = link.keys().cloned().collect();
    let mut children = Vec::new();

    for (name, write) in &data.fields {
        if let Some(field) = meta.field(name) {
            let literal = match write {
                FieldWrite::Value(lit) | FieldWrite::Op(UpdateOp::Set(lit)) => lit,
                FieldWrite::Op(_) => {
                    return Err(Error::invalid_query(format!(
                        "'{}.{}': only a value or 'set' is valid in create",
                        meta.name, name
                    )))
                }
                FieldWrite::Relation(_) => return Err(scalar_expected(meta, name)),
            };
            row.insert(name.clone(), defaults::coerce(meta, field, literal)?);
            raw.insert(name.clone());
            continue;
        }

        let relation = meta.require_relation(name)?;
        let FieldWrite::Relation(nested) = write else {
            return Err(relation_expected(meta, name));
        };
        if relation.is_owning() {
            if nested.disconnect.is_some() || nested.create_many.is_some() {
                return Err(Error::invalid_query(format!(
                    "'{}.{}' accepts only create or connect here",
                    meta.name, name
                )));
            }
            let parent = resolve_parent(ctx, relation, nested)?;
            link_to(relation, &parent, &mut row);
        } else {
            children.push((relation, nested));
        }
    }

    row.extend(link.iter().map(|(k, v)| (k.clone(), v.clone())));
    check_foreign_keys(ctx, meta, &row, &raw)?;

    let row = defaults::fill_defaults(ctx, meta, row)?;
    let key = ctx.tx.add(&meta.name, row.clone())?;
    ctx.record_event(&meta.name, EventKind::Create, key.clone());

    for (relation, nested) in children {
        write_children(ctx, meta, relation, &row, nested)?;
    }

    reread(ctx, meta, &key)
}

/// Parent row for an owning relation: created or connected
fn resolve_parent(ctx: &Ctx, relation: &Relation, nested: &NestedWrite) -> Result<Fields> {
    let target = ctx.entity(&relation.target)?;
    match (nested.create.as_slice(), nested.connect.as_slice()) {
        ([data], []) => create(ctx, target, data, &Fields::new()),
        ([], [selector]) => find_unique_row(ctx, target, selector)?.ok_or_else(|| Error::RelatedRecordNotFound {
            entity: target.name.clone(),
            relation: relation.name.clone(),
        }),
        _ => Err(Error::invalid_query(format!(
            "to-one relation '{}' takes exactly one create or connect",
            relation.name
        ))),
    }
}

/// Copy the parent's referenced values into the owning row's key fields
fn link_to(relation: &Relation, parent: &Fields, row: &mut Fields) {
    for (local, foreign) in relation.local.iter().zip(&relation.foreign) {
        row.insert(local.clone(), parent.get(foreign).cloned().unwrap_or(Value::Null));
    }
}

/// Foreign key values a child of `parent` must carry
fn child_link(relation: &Relation, parent: &Fields) -> Fields {
    relation
        .foreign
        .iter()
        .zip(&relation.local)
        .map(|(foreign, local)| (foreign.clone(), parent.get(local).cloned().unwrap_or(Value::Null)))
        .collect()
}

/// Raw foreign-key values must reference an existing row
fn check_foreign_keys(ctx: &Ctx, meta: &EntityMeta, row: &Fields, written: &BTreeSet<String>) -> Result<()> {
    for relation in meta.relations.iter().filter(|r| r.is_owning()) {
        if !relation.local.iter().any(|f| written.contains(f)) {
            continue;
        }
        let key = Key::from_fields(&relation.local, row);
        if key.has_null() {
            continue;
        }
        let target = ctx.entity(&relation.target)?;
        if rows_where(ctx, target, &relation.foreign, &key)?.is_empty() {
            return Err(Error::ForeignKeyViolation {
                entity: meta.name.clone(),
                field: relation.local.join(", "),
                target: target.name.clone(),
            });
        }
    }
    Ok(())
}

/// create / connect / createMany / disconnect on the non-owning side
fn write_children(ctx: &Ctx, meta: &EntityMeta, relation: &Relation, parent: &Fields, nested: &NestedWrite) -> Result<()> {
    let target = ctx.entity(&relation.target)?;
    let link = child_link(relation, parent);

    if !relation.is_to_many() && nested.create.len() + nested.connect.len() > 1 {
        return Err(Error::invalid_query(format!(
            "to-one relation '{}.{}' takes a single create or connect",
            meta.name, relation.name
        )));
    }

    if let Some(disconnect) = &nested.disconnect {
        match (disconnect, relation.is_to_many()) {
            (Disconnect::Flag(false), _) => {}
            (Disconnect::Flag(true), false) => {
                for child in related_rows(ctx, relation, parent)? {
                    unlink(ctx, target, relation, child)?;
                }
            }
            (Disconnect::Records(selectors), true) => {
                let parent_key = Key::from_fields(&relation.local, parent);
                for selector in selectors {
                    let Some(child) = find_unique_row(ctx, target, selector)? else { continue };
                    if Key::from_fields(&relation.foreign, &child) == parent_key {
                        unlink(ctx, target, relation, child)?;
                    }
                }
            }
            _ => {
                return Err(Error::invalid_query(format!(
                    "disconnect on '{}.{}' takes {}",
                    meta.name,
                    relation.name,
                    if relation.is_to_many() { "a list of selectors" } else { "true" }
                )))
            }
        }
    }

    for data in &nested.create {
        create(ctx, target, data, &link)?;
    }

    for selector in &nested.connect {
        let mut child = find_unique_row(ctx, target, selector)?.ok_or_else(|| Error::RelatedRecordNotFound {
            entity: target.name.clone(),
            relation: relation.name.clone(),
        })?;
        if !relation.is_to_many() {
            let incoming = target.key_of(&child);
            for current in related_rows(ctx, relation, parent)? {
                if target.key_of(&current) != incoming {
                    unlink(ctx, target, relation, current)?;
                }
            }
        }
        child.extend(link.iter().map(|(k, v)| (k.clone(), v.clone())));
        defaults::touch(target, &mut child);
        let key = ctx.tx.put(&target.name, child)?;
        ctx.record_event(&target.name, EventKind::Update, key);
    }

    if let Some(many) = &nested.create_many {
        if !relation.is_to_many() {
            return Err(Error::invalid_query(format!(
                "createMany needs a to-many relation, '{}.{}' is to-one",
                meta.name, relation.name
            )));
        }
        for data in &many.data {
            if has_relation_writes(data) {
                return Err(Error::invalid_query("createMany does not accept nested relation writes"));
            }
            match create(ctx, target, data, &link) {
                Err(Error::UniqueViolation { .. }) if many.skip_duplicates => continue,
                other => other?,
            };
        }
    }
    Ok(())
}

/// Clear a child's foreign key
fn unlink(ctx: &Ctx, target: &EntityMeta, relation: &Relation, mut child: Fields) -> Result<()> {
    for name in &relation.foreign {
        if target.field(name).is_some_and(|f| f.required || f.id) {
            return Err(Error::invalid_value(
                &target.name,
                name,
                format!("cannot disconnect '{}': the foreign key is required", relation.name),
            ));
        }
        child.insert(name.clone(), Value::Null);
    }
    defaults::touch(target, &mut child);
    let key = ctx.tx.put(&target.name, child)?;
    ctx.record_event(&target.name, EventKind::Update, key);
    Ok(())
}

fn reread(ctx: &Ctx, meta: &EntityMeta, key: &Key) -> Result<Fields> {
    ctx.tx.get(&meta.name, key)?.ok_or_else(|| Error::RecordNotFound {
        entity: meta.name.clone(),
    })
}

// =============================================================================
// Update
// =============================================================================

/// Apply `data` to an existing row. Returns the stored row.
pub(crate) fn update(ctx: &Ctx, meta: &EntityMeta, row: Fields, data: &WriteData) -> Result<Fields> {
    let key = meta.key_of(&row);
    let mut next = row;
    let mut written = BTreeSet::new();
    let mut children = Vec::new();

    for (name, write) in &data.fields {
        if let Some(field) = meta.field(name) {
            if field.id {
                return Err(Error::ImmutablePrimaryKey {
                    entity: meta.name.clone(),
                    field: name.clone(),
                });
            }
            let current = next.get(name).cloned().unwrap_or(Value::Null);
            let value = patch(meta, field, current, write)?;
            if value.is_null() && field.required {
                return Err(Error::MissingRequiredField {
                    entity: meta.name.clone(),
                    field: name.clone(),
                });
            }
            next.insert(name.clone(), value);
            written.insert(name.clone());
            continue;
        }

        let relation = meta.require_relation(name)?;
        let FieldWrite::Relation(nested) = write else {
            return Err(relation_expected(meta, name));
        };
        if !relation.is_owning() {
            children.push((relation, nested));
            continue;
        }
        if nested.create_many.is_some() {
            return Err(Error::invalid_query(format!("createMany needs a to-many relation, '{}.{}' is to-one", meta.name, name)));
        }
        match &nested.disconnect {
            Some(Disconnect::Flag(true)) => {
                for local in &relation.local {
                    if meta.field(local).is_some_and(|f| f.required) {
                        return Err(Error::invalid_value(
                            &meta.name,
                            local,
                            format!("cannot disconnect '{}': the foreign key is required", name),
                        ));
                    }
                    next.insert(local.clone(), Value::Null);
                }
            }
            Some(Disconnect::Records(_)) => {
                return Err(Error::invalid_query(format!("disconnect on '{}.{}' takes true", meta.name, name)))
            }
            Some(Disconnect::Flag(false)) | None if nested.create.is_empty() && nested.connect.is_empty() => continue,
            Some(Disconnect::Flag(false)) | None => {
                let parent = resolve_parent(ctx, relation, nested)?;
                link_to(relation, &parent, &mut next);
            }
        }
        written.extend(relation.local.iter().cloned());
    }

    check_foreign_keys(ctx, meta, &next, &written)?;

    let explicit: Vec<String> = meta
        .fields
        .iter()
        .filter(|f| f.updated_at && written.contains(&f.name))
        .map(|f| f.name.clone())
        .collect();
    let kept: Vec<(String, Value)> = explicit
        .iter()
        .filter_map(|name| next.get(name).map(|v| (name.clone(), v.clone())))
        .collect();
    defaults::touch(meta, &mut next);
    next.extend(kept);

    ctx.tx.put(&meta.name, next.clone())?;
    ctx.record_event(&meta.name, EventKind::Update, key.clone());

    for (relation, nested) in children {
        write_children(ctx, meta, relation, &next, nested)?;
    }

    reread(ctx, meta, &key)
}

#[derive(Debug, Clone, Copy)]
enum Arith {
    Add,
    Sub,
    Mul,
    Div,
}

/// New value of one scalar field
fn patch(meta: &EntityMeta, field: &FieldDef, current: Value, write: &FieldWrite) -> Result<Value> {
    let op = match write {
        FieldWrite::Value(lit) => return defaults::coerce(meta, field, lit),
        FieldWrite::Relation(_) => return Err(scalar_expected(meta, &field.name)),
        FieldWrite::Op(op) => op,
    };
    let (arith, operand): (Arith, &Literal) = match op {
        UpdateOp::Set(lit) => return defaults::coerce(meta, field, lit),
        UpdateOp::Unset => return Ok(Value::Null),
        UpdateOp::Push(lit) => {
            if !field.list {
                return Err(unsupported_op(meta, field, "push"));
            }
            let mut items = current.as_list().map(<[Value]>::to_vec).unwrap_or_default();
            match lit {
                Literal::Array(values) => {
                    for value in values {
                        items.push(defaults::coerce_scalar(meta, field, value)?);
                    }
                }
                value => items.push(defaults::coerce_scalar(meta, field, value)?),
            }
            return Ok(Value::List(items));
        }
        UpdateOp::Increment(lit) => (Arith::Add, lit),
        UpdateOp::Decrement(lit) => (Arith::Sub, lit),
        UpdateOp::Multiply(lit) => (Arith::Mul, lit),
        UpdateOp::Divide(lit) => (Arith::Div, lit),
    };

    if !field.kind.capabilities().arithmetic || field.list {
        return Err(unsupported_op(meta, field, "arithmetic"));
    }
    let operand = defaults::coerce_scalar(meta, field, operand)?;
    arithmetic(meta, field, arith, &current, &operand)
}

fn arithmetic(meta: &EntityMeta, field: &FieldDef, op: Arith, current: &Value, operand: &Value) -> Result<Value> {
    if current.is_null() || operand.is_null() {
        return Ok(Value::Null);
    }
    let fail = |reason: &str| Error::invalid_value(&meta.name, &field.name, reason);

    let zero_divisor = match operand {
        Value::Int(b) => *b == 0,
        Value::Float(b) => *b == 0.0,
        Value::BigInt(b) => *b == BigInt::from(0),
        Value::Decimal(b) => b.is_zero(),
        _ => false,
    };
    if matches!(op, Arith::Div) && zero_divisor {
        return Err(fail("division by zero"));
    }

    match (current, operand) {
        (Value::Int(a), Value::Int(b)) => match op {
            Arith::Add => a.checked_add(*b),
            Arith::Sub => a.checked_sub(*b),
            Arith::Mul => a.checked_mul(*b),
            Arith::Div => a.checked_div(*b),
        }
        .map(Value::Int)
        .ok_or_else(|| fail("integer overflow")),
        (Value::Float(a), Value::Float(b)) => {
            let result = match op {
                Arith::Add => a + b,
                Arith::Sub => a - b,
                Arith::Mul => a * b,
                Arith::Div => a / b,
            };
            // Non-finite floats have no JSON form.
            if result.is_finite() {
                Ok(Value::Float(result))
            } else {
                Err(fail("float overflow"))
            }
        }
        (Value::BigInt(a), Value::BigInt(b)) => Ok(Value::BigInt(match op {
            Arith::Add => a + b,
            Arith::Sub => a - b,
            Arith::Mul => a * b,
            Arith::Div => a / b,
        })),
        (Value::Decimal(a), Value::Decimal(b)) => match op {
            Arith::Add => a.checked_add(*b),
            Arith::Sub => a.checked_sub(*b),
            Arith::Mul => a.checked_mul(*b),
            Arith::Div => a.checked_div(*b),
        }
        .map(Value::Decimal)
        .ok_or_else(|| fail("decimal overflow")),
        (a, b) => Err(fail(&format!("cannot combine {} with {}", a.type_name(), b.type_name()))),
    }
}

fn unsupported_op(meta: &EntityMeta, field: &FieldDef, op: &str) -> Error {
    Error::invalid_query(format!(
        "'{}' is not supported on {}{} field '{}.{}'",
        op,
        field.kind.name(),
        if field.list { " list" } else { "" },
        meta.name,
        field.name
    ))
}

fn scalar_expected(meta: &EntityMeta, name: &str) -> Error {
    Error::invalid_query(format!("'{}.{}' is a scalar field, not a relation", meta.name, name))
}

fn relation_expected(meta: &EntityMeta, name: &str) -> Error {
    Error::invalid_query(format!(
        "relation '{}.{}' expects create, connect, createMany or disconnect",
        meta.name, name
    ))
}

// =============================================================================
// Delete
// =============================================================================

/// Remove a row after applying every dependent's referential action
pub(crate) fn delete(ctx: &Ctx, meta: &EntityMeta, row: &Fields) -> Result<()> {
    let key = meta.key_of(row);
    if !ctx.begin_delete(&meta.name, &key) {
        return Ok(());
    }

    for dep in &meta.dependents {
        if dep.on_delete == OnDelete::NoAction {
            continue;
        }
        let link = Key::from_fields(&dep.references, row);
        if link.has_null() {
            continue;
        }
        let child_meta = ctx.entity(&dep.entity)?;
        let children = rows_where(ctx, child_meta, &dep.fields, &link)?;
        if children.is_empty() {
            continue;
        }

        match dep.on_delete {
            OnDelete::Restrict => {
                return Err(Error::RestrictViolation {
                    entity: meta.name.clone(),
                    dependent: dep.entity.clone(),
                    relation: dep.relation.clone(),
                })
            }
            OnDelete::Cascade => {
                debug!(entity = %meta.name, %key, dependent = %dep.entity, count = children.len(), "Cascading delete");
                for child in children {
                    // An earlier cascade may already have removed it.
                    let child_key = child_meta.key_of(&child);
                    if let Some(current) = ctx.tx.get(&child_meta.name, &child_key)? {
                        delete(ctx, child_meta, &current)?;
                    }
                }
            }
            OnDelete::SetNull => {
                debug!(entity = %meta.name, %key, dependent = %dep.entity, count = children.len(), "Clearing foreign keys");
                for child in children {
                    let child_key = child_meta.key_of(&child);
                    let Some(mut current) = ctx.tx.get(&child_meta.name, &child_key)? else { continue };
                    for field in &dep.fields {
                        current.insert(field.clone(), Value::Null);
                    }
                    defaults::touch(child_meta, &mut current);
                    ctx.tx.put(&child_meta.name, current)?;
                    ctx.record_event(&child_meta.name, EventKind::Update, child_key);
                }
            }
            OnDelete::NoAction => {}
        }
    }

    ctx.tx.delete(&meta.name, &key)?;
    ctx.record_event(&meta.name, EventKind::Delete, key);
    Ok(())
}
