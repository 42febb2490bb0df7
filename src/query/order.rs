//! orderBy resolution
//!
//! Each row gets a list of sort keys, one per leaf clause: a scalar value, a
//! to-many `_count`, or a value reached through a to-one relation (null when
//! the related record is absent). Rows are then stably sorted on those keys,
//! so equal keys keep the incoming order.

use super::relations::related_rows;
use super::Ctx;
use crate::schema::EntityMeta;
use crate::storage::{Fields, Value};
use crate::{Error, Result};
use relql::{NullsOrder, OrderBy, OrderKind, SortOrder};
use std::cmp::Ordering;

#[derive(Debug)]
struct SortKey {
    value: Value,
    sort: SortOrder,
    nulls: Option<NullsOrder>,
}

/// Sort `rows` in place by `order_by`, first clause first
pub(crate) fn sort(ctx: &Ctx, meta: &EntityMeta, rows: &mut Vec<Fields>, order_by: &[OrderBy]) -> Result<()> {
    if order_by.is_empty() {
        return Ok(());
    }

    let mut keyed = Vec::with_capacity(rows.len());
    for row in rows.drain(..) {
        let mut keys = Vec::new();
        sort_keys(ctx, meta, Some(&row), order_by, &mut keys)?;
        keyed.push((keys, row));
    }
    keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b));
    rows.extend(keyed.into_iter().map(|(_, row)| row));
    Ok(())
}

fn sort_keys(ctx: &Ctx, meta: &EntityMeta, row: Option<&Fields>, clauses: &[OrderBy], out: &mut Vec<SortKey>) -> Result<()> {
    for clause in clauses {
        match &clause.kind {
            OrderKind::Scalar { sort, nulls } => {
                let field = meta.require_field(&clause.field)?;
                if field.list {
                    return Err(Error::invalid_query(format!(
                        "cannot order by list field '{}.{}'",
                        meta.name, field.name
                    )));
                }
                out.push(SortKey {
                    value: row.and_then(|r| r.get(&field.name)).cloned().unwrap_or(Value::Null),
                    sort: *sort,
                    nulls: *nulls,
                });
            }
            OrderKind::Count(sort) => {
                let relation = meta.require_relation(&clause.field)?;
                if !relation.is_to_many() {
                    return Err(Error::invalid_query(format!(
                        "_count ordering needs a to-many relation, '{}.{}' is to-one",
                        meta.name, relation.name
                    )));
                }
                let value = match row {
                    Some(row) => Value::Int(related_rows(ctx, relation, row)?.len() as i64),
                    None => Value::Null,
                };
                out.push(SortKey {
                    value,
                    sort: *sort,
                    nulls: None,
                });
            }
            OrderKind::Relation(inner) => {
                let relation = meta.require_relation(&clause.field)?;
                if relation.is_to_many() {
                    return Err(Error::invalid_query(format!(
                        "to-many relation '{}.{}' can only be ordered by _count",
                        meta.name, relation.name
                    )));
                }
                let target = ctx.entity(&relation.target)?;
                let related = match row {
                    Some(row) => related_rows(ctx, relation, row)?.into_iter().next(),
                    None => None,
                };
                sort_keys(ctx, target, related.as_ref(), inner, out)?;
            }
        }
    }
    Ok(())
}

fn compare_keys(a: &[SortKey], b: &[SortKey]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| compare(x, &y.value))
        .find(|ord| ord.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Nulls come first ascending and last descending unless `nulls` says otherwise
fn compare(key: &SortKey, other: &Value) -> Ordering {
    match (key.value.is_null(), other.is_null()) {
        (true, true) => Ordering::Equal,
        (false, false) => {
            let ord = key.value.cmp(other);
            match key.sort {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        }
        (self_null, _) => {
            let nulls_first = match key.nulls {
                Some(NullsOrder::First) => true,
                Some(NullsOrder::Last) => false,
                None => key.sort == SortOrder::Asc,
            };
            if self_null == nulls_first {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
    }
}
