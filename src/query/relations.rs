//! Relation sub-queries and projection
//!
//! Every relational read goes through [`related_rows`]: the target rows whose
//! `foreign` fields equal the source row's `local` fields. It uses the
//! target's primary key or an index over those fields when there is one, and
//! scans otherwise.

use super::{read_rows, Ctx};
use crate::schema::{EntityMeta, Relation};
use crate::storage::{Fields, Key, Record, Related};
use crate::{Error, Result};
use relql::{CountSelection, Query, Selected, WhereClause};

/// Rows of `relation.target` related to `row`
pub(crate) fn related_rows(ctx: &Ctx, relation: &Relation, row: &Fields) -> Result<Vec<Fields>> {
    let key = Key::from_fields(&relation.local, row);
    if key.has_null() {
        return Ok(Vec::new());
    }
    let target = ctx.entity(&relation.target)?;
    rows_where(ctx, target, &relation.foreign, &key)
}

/// Rows of `meta` whose `fields` equal `key`
pub(crate) fn rows_where(ctx: &Ctx, meta: &EntityMeta, fields: &[String], key: &Key) -> Result<Vec<Fields>> {
    if fields == meta.id_fields.as_slice() {
        return Ok(ctx.tx.get(&meta.name, key)?.into_iter().collect());
    }
    if let Some(index) = ctx.tx.index_for(&meta.name, fields)? {
        return ctx.tx.index_get_all(&meta.name, &index, key);
    }
    Ok(ctx
        .tx
        .get_all(&meta.name)?
        .into_iter()
        .filter(|row| &Key::from_fields(fields, row) == key)
        .collect())
}

/// Turn rows into records: attach the relations and counts named in
/// `select` / `include`, then apply the `select` projection
pub(crate) fn attach(ctx: &Ctx, meta: &EntityMeta, rows: Vec<Fields>, query: &Query) -> Result<Vec<Record>> {
    if query.select.is_some() && query.include.is_some() {
        return Err(Error::invalid_query("'select' and 'include' cannot be used together"));
    }

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let mut record = Record::new(row);
        for (name, selected) in query.projections() {
            if !selected.is_enabled() {
                continue;
            }
            if name == "_count" {
                let Selected::Count(counts) = selected else {
                    return Err(Error::invalid_query("'_count' expects true or { select }"));
                };
                attach_counts(ctx, meta, &mut record, counts)?;
                continue;
            }
            if let Some(field) = meta.field(name) {
                if selected.query().is_some() {
                    return Err(Error::invalid_query(format!("'{}.{}' is a scalar field", meta.name, field.name)));
                }
                continue;
            }
            let relation = meta.require_relation(name)?;
            let nested = selected.query().cloned().unwrap_or_default();
            let related = load(ctx, relation, &record.fields, &nested)?;
            record.attach(name.clone(), related);
        }
        records.push(record);
    }

    if let Some(select) = &query.select {
        for record in &mut records {
            record.fields.retain(|name, _| select.is_selected(name));
        }
    }
    Ok(records)
}

/// Load one relation for one row, honoring the nested query arguments
fn load(ctx: &Ctx, relation: &Relation, row: &Fields, nested: &Query) -> Result<Related> {
    let target = ctx.entity(&relation.target)?;

    // Owning side with a null key: nothing to look up.
    if relation.is_owning() && Key::from_fields(&relation.local, row).has_null() {
        return Ok(Related::One(None));
    }

    let rows = related_rows(ctx, relation, row)?;
    let rows = read_rows(ctx, target, rows, nested)?;
    let mut records = attach(ctx, target, rows, nested)?;

    if relation.is_to_many() {
        Ok(Related::Many(records))
    } else {
        Ok(Related::One(if records.is_empty() {
            None
        } else {
            Some(Box::new(records.swap_remove(0)))
        }))
    }
}

fn attach_counts(ctx: &Ctx, meta: &EntityMeta, record: &mut Record, counts: &CountSelection) -> Result<()> {
    let wanted: Vec<(&Relation, Option<&WhereClause>)> = match counts {
        CountSelection::All => meta.relations.iter().filter(|r| r.is_to_many()).map(|r| (r, None)).collect(),
        CountSelection::Relations(list) => list
            .iter()
            .map(|(name, filter)| Ok((meta.require_relation(name)?, filter.as_ref())))
            .collect::<Result<_>>()?,
    };

    for (relation, filter) in wanted {
        if !relation.is_to_many() {
            return Err(Error::invalid_query(format!(
                "'_count' needs a to-many relation, '{}.{}' is to-one",
                meta.name, relation.name
            )));
        }
        let mut rows = related_rows(ctx, relation, &record.fields)?;
        if let Some(clause) = filter {
            rows = super::filter::evaluate(ctx, ctx.entity(&relation.target)?, rows, clause)?;
        }
        record.counts.insert(relation.name.clone(), rows.len());
    }
    Ok(())
}
