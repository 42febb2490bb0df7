//! Where-tree evaluation
//!
//! A where tree is evaluated per row. AND, OR and NOT over a row sequence are
//! then intersection, union and complement of the matches, and the output
//! keeps the input order.
//!
//! Relation conditions run a sub-query against the related table, scoped by
//! foreign-key equality with the current row (see [`relations::related_rows`]).

use super::relations::related_rows;
use super::{defaults, Ctx};
use crate::schema::{EntityMeta, FieldDef, Relation};
use crate::storage::{Fields, Value};
use crate::{Error, Result};
use relql::{Condition, Literal, NotFilter, QueryMode, RelationFilter, RelationTarget, ScalarFilter, WhereClause};
use std::cmp::Ordering;

/// Keep the rows matching `clause`, in order
pub(crate) fn evaluate(ctx: &Ctx, meta: &EntityMeta, rows: Vec<Fields>, clause: &WhereClause) -> Result<Vec<Fields>> {
    let mut kept = Vec::with_capacity(rows.len());
    for row in rows {
        if matches(ctx, meta, &row, clause)? {
            kept.push(row);
        }
    }
    Ok(kept)
}

/// Whether one row satisfies `clause`
pub(crate) fn matches(ctx: &Ctx, meta: &EntityMeta, row: &Fields, clause: &WhereClause) -> Result<bool> {
    for cond in &clause.fields {
        if !matches_condition(ctx, meta, row, &cond.field, &cond.condition)? {
            return Ok(false);
        }
    }
    for sub in &clause.and {
        if !matches(ctx, meta, row, sub)? {
            return Ok(false);
        }
    }
    if let Some(any) = &clause.or {
        let mut hit = false;
        for sub in any {
            if matches(ctx, meta, row, sub)? {
                hit = true;
                break;
            }
        }
        if !hit {
            return Ok(false);
        }
    }
    for sub in &clause.not {
        if matches(ctx, meta, row, sub)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matches_condition(ctx: &Ctx, meta: &EntityMeta, row: &Fields, name: &str, cond: &Condition) -> Result<bool> {
    if let Some(field) = meta.field(name) {
        let value = row.get(name).unwrap_or(&Value::Null);
        return matches_scalar(meta, field, value, cond);
    }
    if let Some(relation) = meta.relation(name) {
        return matches_relation(ctx, meta, relation, row, cond);
    }
    if meta.compound(name).is_some() {
        return match cond {
            Condition::Where(inner) => matches(ctx, meta, row, inner),
            _ => Err(Error::invalid_query(format!("'{}' expects an object of its fields", name))),
        };
    }
    Err(Error::UnknownField {
        entity: meta.name.clone(),
        field: name.to_string(),
    })
}

// =============================================================================
// Scalar conditions
// =============================================================================

fn matches_scalar(meta: &EntityMeta, field: &FieldDef, value: &Value, cond: &Condition) -> Result<bool> {
    match cond {
        Condition::Null => Ok(value.is_null()),
        Condition::Equals(lit) => equals(meta, field, value, lit, QueryMode::Default),
        Condition::Scalar(filter) => matches_filter(meta, field, value, filter),
        Condition::Relation(_) | Condition::Where(_) => Err(Error::invalid_query(format!(
            "'{}.{}' is a scalar field; use equals for object values",
            meta.name, field.name
        ))),
    }
}

fn matches_filter(meta: &EntityMeta, field: &FieldDef, value: &Value, filter: &ScalarFilter) -> Result<bool> {
    let caps = field.kind.capabilities();
    let require = |ok: bool, op: &str| -> Result<()> {
        if ok {
            Ok(())
        } else {
            Err(Error::invalid_query(format!(
                "operator '{}' is not supported on {}{} field '{}.{}'",
                op,
                field.kind.name(),
                if field.list { " list" } else { "" },
                meta.name,
                field.name
            )))
        }
    };
    let mode = filter.mode;

    if mode == QueryMode::Insensitive {
        require(caps.textual && !field.list, "mode")?;
    }

    if let Some(lit) = &filter.equals {
        if !equals(meta, field, value, lit, mode)? {
            return Ok(false);
        }
    }

    if let Some(not) = &filter.not {
        let inner = match not.as_ref() {
            NotFilter::Value(lit) => equals(meta, field, value, lit, mode)?,
            NotFilter::Filter(inner) => matches_filter(meta, field, value, inner)?,
        };
        if inner {
            return Ok(false);
        }
    }

    if let Some(list) = &filter.in_list {
        require(caps.membership && !field.list, "in")?;
        if value.is_null() || !any_equal(meta, field, value, list, mode)? {
            return Ok(false);
        }
    }

    if let Some(list) = &filter.not_in {
        require(caps.membership && !field.list, "notIn")?;
        if !value.is_null() && any_equal(meta, field, value, list, mode)? {
            return Ok(false);
        }
    }

    let bounds = [
        (&filter.lt, "lt", &[Ordering::Less][..]),
        (&filter.lte, "lte", &[Ordering::Less, Ordering::Equal][..]),
        (&filter.gt, "gt", &[Ordering::Greater][..]),
        (&filter.gte, "gte", &[Ordering::Greater, Ordering::Equal][..]),
    ];
    for (bound, op, accepted) in bounds {
        let Some(lit) = bound else { continue };
        require(caps.ordered && !field.list, op)?;
        let bound = defaults::coerce_scalar(meta, field, lit)?;
        if value.is_null() || bound.is_null() || !accepted.contains(&compare(value, &bound, mode)) {
            return Ok(false);
        }
    }

    let text_ops = [
        (&filter.contains, "contains"),
        (&filter.starts_with, "startsWith"),
        (&filter.ends_with, "endsWith"),
    ];
    for (needle, op) in text_ops {
        let Some(needle) = needle else { continue };
        require(caps.textual && !field.list, op)?;
        let Some(text) = value.as_str() else { return Ok(false) };
        let (text, needle) = fold(text, needle, mode);
        let hit = match op {
            "contains" => text.contains(needle.as_str()),
            "startsWith" => text.starts_with(needle.as_str()),
            _ => text.ends_with(needle.as_str()),
        };
        if !hit {
            return Ok(false);
        }
    }

    if filter.has.is_some() || filter.has_every.is_some() || filter.has_some.is_some() || filter.is_empty.is_some() {
        require(field.list, "has/hasEvery/hasSome/isEmpty")?;
        let items = value.as_list().unwrap_or(&[]);

        if let Some(lit) = &filter.has {
            let wanted = defaults::coerce_scalar(meta, field, lit)?;
            if !items.contains(&wanted) {
                return Ok(false);
            }
        }
        if let Some(list) = &filter.has_every {
            for lit in list {
                if !items.contains(&defaults::coerce_scalar(meta, field, lit)?) {
                    return Ok(false);
                }
            }
        }
        if let Some(list) = &filter.has_some {
            let mut hit = false;
            for lit in list {
                if items.contains(&defaults::coerce_scalar(meta, field, lit)?) {
                    hit = true;
                    break;
                }
            }
            if !hit {
                return Ok(false);
            }
        }
        if let Some(empty) = filter.is_empty {
            if items.is_empty() != empty {
                return Ok(false);
            }
        }
    }

    Ok(true)
}

/// Equality against a literal. Lists compare as multisets.
fn equals(meta: &EntityMeta, field: &FieldDef, value: &Value, lit: &Literal, mode: QueryMode) -> Result<bool> {
    let expected = defaults::coerce(meta, field, lit)?;
    if expected.is_null() || value.is_null() {
        return Ok(expected.is_null() && value.is_null());
    }
    if field.list {
        let (Some(a), Some(b)) = (value.as_list(), expected.as_list()) else {
            return Ok(false);
        };
        let (mut a, mut b) = (a.to_vec(), b.to_vec());
        a.sort();
        b.sort();
        return Ok(a == b);
    }
    Ok(compare(value, &expected, mode) == Ordering::Equal)
}

fn any_equal(meta: &EntityMeta, field: &FieldDef, value: &Value, list: &[Literal], mode: QueryMode) -> Result<bool> {
    for lit in list {
        if equals(meta, field, value, lit, mode)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn compare(a: &Value, b: &Value, mode: QueryMode) -> Ordering {
    match (a, b, mode) {
        (Value::String(x), Value::String(y), QueryMode::Insensitive) => x.to_lowercase().cmp(&y.to_lowercase()),
        _ => a.cmp(b),
    }
}

fn fold(text: &str, needle: &str, mode: QueryMode) -> (String, String) {
    match mode {
        QueryMode::Insensitive => (text.to_lowercase(), needle.to_lowercase()),
        QueryMode::Default => (text.to_string(), needle.to_string()),
    }
}

// =============================================================================
// Relation conditions
// =============================================================================

fn matches_relation(ctx: &Ctx, meta: &EntityMeta, relation: &Relation, row: &Fields, cond: &Condition) -> Result<bool> {
    let target = ctx.entity(&relation.target)?;
    let invalid = |what: &str| {
        Error::invalid_query(format!(
            "{} is not valid on {} relation '{}.{}'",
            what,
            if relation.is_to_many() { "to-many" } else { "to-one" },
            meta.name,
            relation.name
        ))
    };

    if relation.is_to_many() {
        let Condition::Relation(filter) = cond else {
            return Err(invalid("a plain condition (use some, every or none)"));
        };
        if filter.is.is_some() || filter.is_not.is_some() {
            return Err(invalid("is/isNot"));
        }
        let children = related_rows(ctx, relation, row)?;
        return quantify(ctx, target, &children, filter);
    }

    let (is, is_not) = match cond {
        Condition::Null => (Some(&RelationTarget::Null), None),
        Condition::Where(clause) => {
            let related = related_rows(ctx, relation, row)?;
            return first_match(ctx, target, &related, clause);
        }
        Condition::Relation(filter) => {
            if filter.every.is_some() || filter.some.is_some() || filter.none.is_some() {
                return Err(invalid("every/some/none"));
            }
            (filter.is.as_ref(), filter.is_not.as_ref())
        }
        Condition::Equals(_) | Condition::Scalar(_) => return Err(invalid("a scalar condition")),
    };

    let related = related_rows(ctx, relation, row)?;
    if let Some(is) = is {
        let ok = match is {
            RelationTarget::Null => related.is_empty(),
            RelationTarget::Where(clause) => first_match(ctx, target, &related, clause)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    if let Some(is_not) = is_not {
        let ok = match is_not {
            RelationTarget::Null => !related.is_empty(),
            RelationTarget::Where(clause) => !first_match(ctx, target, &related, clause)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn first_match(ctx: &Ctx, meta: &EntityMeta, rows: &[Fields], clause: &WhereClause) -> Result<bool> {
    for row in rows {
        if matches(ctx, meta, row, clause)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// every / some / none over the child rows. Empty child sets make `every`
/// and `none` true and `some` false.
fn quantify(ctx: &Ctx, meta: &EntityMeta, children: &[Fields], filter: &RelationFilter) -> Result<bool> {
    if let Some(clause) = &filter.every {
        for child in children {
            if !matches(ctx, meta, child, clause)? {
                return Ok(false);
            }
        }
    }
    if let Some(clause) = &filter.some {
        if !first_match(ctx, meta, children, clause)? {
            return Ok(false);
        }
    }
    if let Some(clause) = &filter.none {
        if first_match(ctx, meta, children, clause)? {
            return Ok(false);
        }
    }
    Ok(true)
}
