//! Literal coercion and create-time defaults
//!
//! Payload literals arrive as JSON and are converted to stored values per the
//! field's kind. On create, every field the payload leaves out is filled:
//! generated keys, declared defaults, `[]` for lists, `null` otherwise.

use super::Ctx;
use crate::schema::{DefaultValue, EntityMeta, FieldDef, ScalarKind};
use crate::storage::{Fields, Value};
use crate::{Error, Result};
use relql::Literal;
use time::OffsetDateTime;
use ulid::Ulid;

/// Convert a literal for `field`, list-aware
pub fn coerce(meta: &EntityMeta, field: &FieldDef, literal: &Literal) -> Result<Value> {
    if !field.list || literal.is_null() {
        return coerce_scalar(meta, field, literal);
    }
    let items = literal
        .as_array()
        .ok_or_else(|| Error::invalid_value(&meta.name, &field.name, format!("expected a list, got {}", literal)))?;
    items
        .iter()
        .map(|item| coerce_scalar(meta, field, item))
        .collect::<Result<Vec<_>>>()
        .map(Value::List)
}

/// Convert a literal to the element kind of `field`
pub fn coerce_scalar(meta: &EntityMeta, field: &FieldDef, literal: &Literal) -> Result<Value> {
    field
        .kind
        .coerce(literal)
        .map_err(|reason| Error::invalid_value(&meta.name, &field.name, reason))
}

/// Complete a row about to be created
///
/// `provided` holds the coerced payload values, including foreign keys set
/// by the caller. Fields it names that the entity does not have are rejected.
pub(crate) fn fill_defaults(ctx: &Ctx, meta: &EntityMeta, mut provided: Fields) -> Result<Fields> {
    let now = OffsetDateTime::now_utc();
    let mut row = Fields::new();

    for field in &meta.fields {
        let value = match provided.remove(&field.name) {
            Some(value) if !value.is_null() => value,
            Some(_) if field.required || field.id => {
                return Err(Error::MissingRequiredField {
                    entity: meta.name.clone(),
                    field: field.name.clone(),
                })
            }
            Some(_) if !field.updated_at => Value::Null,
            _ => match &field.default {
                _ if field.updated_at => Value::DateTime(now),
                Some(default) => generate(ctx, meta, field, default, now)?,
                None if field.list => Value::List(Vec::new()),
                None if field.required || field.id => {
                    return Err(Error::MissingRequiredField {
                        entity: meta.name.clone(),
                        field: field.name.clone(),
                    })
                }
                None => Value::Null,
            },
        };
        row.insert(field.name.clone(), value);
    }

    if let Some(unknown) = provided.keys().next() {
        return Err(Error::UnknownField {
            entity: meta.name.clone(),
            field: unknown.clone(),
        });
    }
    Ok(row)
}

/// Stamp every `updated_at` field with the current time
pub fn touch(meta: &EntityMeta, row: &mut Fields) {
    let now = OffsetDateTime::now_utc();
    for field in meta.fields.iter().filter(|f| f.updated_at) {
        row.insert(field.name.clone(), Value::DateTime(now));
    }
}

fn generate(ctx: &Ctx, meta: &EntityMeta, field: &FieldDef, default: &DefaultValue, now: OffsetDateTime) -> Result<Value> {
    let expect = |kind: ScalarKind, spelled: &str| -> Result<()> {
        if field.kind == kind && !field.list {
            Ok(())
        } else {
            Err(Error::invalid_value(
                &meta.name,
                &field.name,
                format!("{} needs a {} field", spelled, kind.name()),
            ))
        }
    };

    match default {
        DefaultValue::AutoIncrement => next_increment(ctx, meta, field).map(Value::Int),
        DefaultValue::Uuid => {
            expect(ScalarKind::String, "uuid()")?;
            Ok(Value::String(uuid_text(Ulid::new())))
        }
        DefaultValue::Cuid => {
            expect(ScalarKind::String, "cuid()")?;
            Ok(Value::String(format!("c{}", Ulid::new().to_string().to_lowercase())))
        }
        DefaultValue::Now => {
            expect(ScalarKind::DateTime, "now()")?;
            Ok(Value::DateTime(now))
        }
        DefaultValue::Value(json) => coerce(meta, field, json),
    }
}

/// Largest existing value plus one. A single-field key is probed through the
/// table's last key; anything else scans.
fn next_increment(ctx: &Ctx, meta: &EntityMeta, field: &FieldDef) -> Result<i64> {
    let current = if meta.id_fields.len() == 1 && meta.id_fields[0] == field.name {
        ctx.tx
            .last_key(&meta.name)?
            .and_then(|key| key.0.first().and_then(Value::as_i64))
    } else {
        ctx.tx
            .get_all(&meta.name)?
            .iter()
            .filter_map(|row| row.get(&field.name).and_then(Value::as_i64))
            .max()
    };
    current
        .unwrap_or(0)
        .checked_add(1)
        .ok_or_else(|| Error::invalid_value(&meta.name, &field.name, "autoincrement overflow"))
}

/// A version 4 UUID built from a ULID's bits. The version nibble and the
/// RFC 4122 variant bits overwrite six bits of the random part.
fn uuid_text(id: Ulid) -> String {
    let bits = (id.0 & !(0xF_u128 << 76) & !(0x3_u128 << 62)) | (0x4_u128 << 76) | (0x2_u128 << 62);
    let hex = format!("{:032x}", bits);
    format!("{}-{}-{}-{}-{}", &hex[..8], &hex[8..12], &hex[12..16], &hex[16..20], &hex[20..])
}
