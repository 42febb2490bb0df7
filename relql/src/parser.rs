//! RelQL payload parser
//!
//! Turns a JSON payload into AST nodes. The parser knows nothing about any
//! schema: it classifies objects by their keys. An object whose keys are all
//! scalar operators becomes a [`ScalarFilter`], all relation operators a
//! [`RelationFilter`], anything else a nested [`WhereClause`].

use serde_json::{Map, Value};

use crate::ast::*;
use crate::error::ParseError;

type Result<T> = std::result::Result<T, ParseError>;

const QUERY_KEYS: &[&str] = &[
    "where",
    "orderBy",
    "select",
    "include",
    "take",
    "skip",
    "distinct",
    "data",
    "skipDuplicates",
];

const SCALAR_OPS: &[&str] = &[
    "equals",
    "not",
    "in",
    "notIn",
    "lt",
    "lte",
    "gt",
    "gte",
    "contains",
    "startsWith",
    "endsWith",
    "mode",
    "has",
    "hasEvery",
    "hasSome",
    "isEmpty",
];

const RELATION_OPS: &[&str] = &["is", "isNot", "every", "some", "none"];

const NESTED_WRITE_OPS: &[&str] = &["create", "connect", "connectOrCreate", "createMany", "disconnect"];

const UPDATE_OPS: &[&str] = &["set", "increment", "decrement", "multiply", "divide", "push", "unset"];

/// Parse a complete payload
pub fn parse_query(value: &Value) -> Result<Query> {
    parse_query_at(value, "")
}

fn parse_query_at(value: &Value, path: &str) -> Result<Query> {
    let obj = match value {
        Value::Null => return Ok(Query::default()),
        Value::Object(obj) => obj,
        _ => return Err(ParseError::new("query must be an object").at(root(path))),
    };

    let mut query = Query::default();
    for (key, val) in obj {
        let here = join(path, key);
        match key.as_str() {
            "where" => query.where_clause = Some(parse_where_at(val, &here)?),
            "orderBy" => query.order_by = parse_order_by_at(val, &here)?,
            "select" => query.select = Some(parse_selection_at(val, &here)?),
            "include" => query.include = Some(parse_selection_at(val, &here)?),
            "take" => query.take = Some(expect_usize(val, &here)?),
            "skip" => query.skip = Some(expect_usize(val, &here)?),
            "distinct" => query.distinct = expect_strings(val, &here)?,
            "data" => query.data = Some(parse_data_at(val, &here)?),
            "skipDuplicates" => query.skip_duplicates = expect_bool(val, &here)?,
            other => {
                return Err(ParseError::new(format!(
                    "unknown query key '{}' (expected one of {})",
                    other,
                    QUERY_KEYS.join(", ")
                ))
                .at(here))
            }
        }
    }
    Ok(query)
}

// ============================================================================
// WHERE
// ============================================================================

/// Parse a where tree
pub fn parse_where(value: &Value) -> Result<WhereClause> {
    parse_where_at(value, "where")
}

fn parse_where_at(value: &Value, path: &str) -> Result<WhereClause> {
    let obj = expect_object(value, path)?;
    let mut clause = WhereClause::default();

    for (key, val) in obj {
        let here = join(path, key);
        match key.as_str() {
            "AND" => clause.and.extend(parse_where_list(val, &here)?),
            "OR" => clause.or.get_or_insert_with(Vec::new).extend(parse_where_list(val, &here)?),
            "NOT" => clause.not.extend(parse_where_list(val, &here)?),
            field => clause.fields.push(FieldCondition {
                field: field.to_string(),
                condition: parse_condition(val, &here)?,
            }),
        }
    }

    Ok(clause)
}

/// Combinators accept a single clause or an array of clauses
fn parse_where_list(value: &Value, path: &str) -> Result<Vec<WhereClause>> {
    match value {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| parse_where_at(item, &format!("{}[{}]", path, i)))
            .collect(),
        _ => Ok(vec![parse_where_at(value, path)?]),
    }
}

fn parse_condition(value: &Value, path: &str) -> Result<Condition> {
    match value {
        Value::Null => Ok(Condition::Null),
        Value::Object(obj) if obj.is_empty() => Ok(Condition::Where(WhereClause::default())),
        Value::Object(obj) if keys_within(obj, RELATION_OPS) => {
            Ok(Condition::Relation(parse_relation_filter(obj, path)?))
        }
        Value::Object(obj) if keys_within(obj, SCALAR_OPS) => {
            Ok(Condition::Scalar(parse_scalar_filter(obj, path)?))
        }
        Value::Object(_) => Ok(Condition::Where(parse_where_at(value, path)?)),
        other => Ok(Condition::Equals(other.clone())),
    }
}

fn parse_scalar_filter(obj: &Map<String, Value>, path: &str) -> Result<ScalarFilter> {
    let mut filter = ScalarFilter::default();

    for (key, val) in obj {
        let here = join(path, key);
        match key.as_str() {
            "equals" => filter.equals = Some(val.clone()),
            "not" => {
                let not = match val {
                    Value::Object(inner) if !inner.is_empty() && keys_within(inner, SCALAR_OPS) => {
                        NotFilter::Filter(parse_scalar_filter(inner, &here)?)
                    }
                    other => NotFilter::Value(other.clone()),
                };
                filter.not = Some(Box::new(not));
            }
            "in" => filter.in_list = Some(expect_array(val, &here)?),
            "notIn" => filter.not_in = Some(expect_array(val, &here)?),
            "lt" => filter.lt = Some(val.clone()),
            "lte" => filter.lte = Some(val.clone()),
            "gt" => filter.gt = Some(val.clone()),
            "gte" => filter.gte = Some(val.clone()),
            "contains" => filter.contains = Some(expect_string(val, &here)?),
            "startsWith" => filter.starts_with = Some(expect_string(val, &here)?),
            "endsWith" => filter.ends_with = Some(expect_string(val, &here)?),
            "mode" => {
                filter.mode = match val.as_str() {
                    Some("insensitive") => QueryMode::Insensitive,
                    Some("default") => QueryMode::Default,
                    _ => return Err(ParseError::new("mode must be 'default' or 'insensitive'").at(here)),
                }
            }
            "has" => filter.has = Some(val.clone()),
            "hasEvery" => filter.has_every = Some(expect_array(val, &here)?),
            "hasSome" => filter.has_some = Some(expect_array(val, &here)?),
            "isEmpty" => filter.is_empty = Some(expect_bool(val, &here)?),
            _ => unreachable!("keys checked by keys_within"),
        }
    }

    Ok(filter)
}

fn parse_relation_filter(obj: &Map<String, Value>, path: &str) -> Result<RelationFilter> {
    let mut filter = RelationFilter::default();

    for (key, val) in obj {
        let here = join(path, key);
        match key.as_str() {
            "is" => filter.is = Some(parse_relation_target(val, &here)?),
            "isNot" => filter.is_not = Some(parse_relation_target(val, &here)?),
            "every" => filter.every = Some(parse_where_at(val, &here)?),
            "some" => filter.some = Some(parse_where_at(val, &here)?),
            "none" => filter.none = Some(parse_where_at(val, &here)?),
            _ => unreachable!("keys checked by keys_within"),
        }
    }

    Ok(filter)
}

fn parse_relation_target(value: &Value, path: &str) -> Result<RelationTarget> {
    match value {
        Value::Null => Ok(RelationTarget::Null),
        _ => Ok(RelationTarget::Where(parse_where_at(value, path)?)),
    }
}

// ============================================================================
// ORDER BY
// ============================================================================

/// Parse an orderBy value: one object or an array of objects
pub fn parse_order_by(value: &Value) -> Result<Vec<OrderBy>> {
    parse_order_by_at(value, "orderBy")
}

fn parse_order_by_at(value: &Value, path: &str) -> Result<Vec<OrderBy>> {
    let mut clauses = Vec::new();
    match value {
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                clauses.extend(parse_order_object(item, &format!("{}[{}]", path, i))?);
            }
        }
        _ => clauses.extend(parse_order_object(value, path)?),
    }
    Ok(clauses)
}

fn parse_order_object(value: &Value, path: &str) -> Result<Vec<OrderBy>> {
    let obj = expect_object(value, path)?;
    obj.iter()
        .map(|(field, val)| {
            let here = join(path, field);
            Ok(OrderBy {
                field: field.clone(),
                kind: parse_order_kind(val, &here)?,
            })
        })
        .collect()
}

fn parse_order_kind(value: &Value, path: &str) -> Result<OrderKind> {
    match value {
        Value::String(_) => Ok(OrderKind::Scalar {
            sort: parse_sort(value, path)?,
            nulls: None,
        }),
        Value::Object(obj) if obj.contains_key("sort") => {
            let sort = parse_sort(&obj["sort"], &join(path, "sort"))?;
            let nulls = match obj.get("nulls").and_then(Value::as_str) {
                None => None,
                Some("first") => Some(NullsOrder::First),
                Some("last") => Some(NullsOrder::Last),
                Some(other) => {
                    return Err(ParseError::new(format!("nulls must be 'first' or 'last', got '{}'", other))
                        .at(join(path, "nulls")))
                }
            };
            Ok(OrderKind::Scalar { sort, nulls })
        }
        Value::Object(obj) if obj.len() == 1 && obj.contains_key("_count") => {
            Ok(OrderKind::Count(parse_sort(&obj["_count"], &join(path, "_count"))?))
        }
        Value::Object(_) => Ok(OrderKind::Relation(parse_order_object(value, path)?)),
        _ => Err(ParseError::new("order direction must be 'asc', 'desc' or an object").at(path)),
    }
}

fn parse_sort(value: &Value, path: &str) -> Result<SortOrder> {
    match value.as_str() {
        Some("asc") => Ok(SortOrder::Asc),
        Some("desc") => Ok(SortOrder::Desc),
        _ => Err(ParseError::new("sort order must be 'asc' or 'desc'").at(path)),
    }
}

// ============================================================================
// SELECT / INCLUDE
// ============================================================================

fn parse_selection_at(value: &Value, path: &str) -> Result<Selection> {
    let obj = expect_object(value, path)?;
    let mut selection = Selection::default();

    for (key, val) in obj {
        let here = join(path, key);
        let selected = match (key.as_str(), val) {
            (_, Value::Bool(b)) if key != "_count" => Selected::Flag(*b),
            ("_count", _) => Selected::Count(parse_count_selection(val, &here)?),
            (_, Value::Object(_)) => Selected::Nested(Box::new(parse_query_at(val, &here)?)),
            _ => return Err(ParseError::new("selection must be a boolean or an object").at(here)),
        };
        selection.entries.push((key.clone(), selected));
    }

    Ok(selection)
}

fn parse_count_selection(value: &Value, path: &str) -> Result<CountSelection> {
    match value {
        Value::Bool(true) => Ok(CountSelection::All),
        Value::Object(obj) => {
            let select_path = join(path, "select");
            let select = obj
                .get("select")
                .ok_or_else(|| ParseError::new("_count object requires 'select'").at(path))?;
            let mut relations = Vec::new();
            for (name, val) in expect_object(select, &select_path)? {
                let here = join(&select_path, name);
                match val {
                    Value::Bool(true) => relations.push((name.clone(), None)),
                    Value::Bool(false) => {}
                    Value::Object(args) => {
                        let filter = match args.get("where") {
                            Some(w) => Some(parse_where_at(w, &join(&here, "where"))?),
                            None => None,
                        };
                        relations.push((name.clone(), filter));
                    }
                    _ => return Err(ParseError::new("count selection must be a boolean or an object").at(here)),
                }
            }
            Ok(CountSelection::Relations(relations))
        }
        _ => Err(ParseError::new("_count must be true or an object").at(path)),
    }
}

// ============================================================================
// DATA
// ============================================================================

fn parse_data_at(value: &Value, path: &str) -> Result<Data> {
    match value {
        Value::Array(items) => Ok(Data::Many(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| parse_write_data(item, &format!("{}[{}]", path, i)))
                .collect::<Result<_>>()?,
        )),
        _ => Ok(Data::One(parse_write_data(value, path)?)),
    }
}

/// Parse one record's write payload
pub fn parse_write_data(value: &Value, path: &str) -> Result<WriteData> {
    let obj = expect_object(value, path)?;
    let mut data = WriteData::default();

    for (key, val) in obj {
        let here = join(path, key);
        let write = match val {
            Value::Object(inner) if !inner.is_empty() && keys_within(inner, NESTED_WRITE_OPS) => {
                FieldWrite::Relation(parse_nested_write(inner, &here)?)
            }
            Value::Object(inner) if inner.len() == 1 && keys_within(inner, UPDATE_OPS) => {
                FieldWrite::Op(parse_update_op(inner, &here)?)
            }
            other => FieldWrite::Value(other.clone()),
        };
        data.fields.push((key.clone(), write));
    }

    Ok(data)
}

fn parse_update_op(obj: &Map<String, Value>, path: &str) -> Result<UpdateOp> {
    let (key, val) = obj
        .iter()
        .next()
        .ok_or_else(|| ParseError::new("empty update operation").at(path))?;
    Ok(match key.as_str() {
        "set" => UpdateOp::Set(val.clone()),
        "increment" => UpdateOp::Increment(val.clone()),
        "decrement" => UpdateOp::Decrement(val.clone()),
        "multiply" => UpdateOp::Multiply(val.clone()),
        "divide" => UpdateOp::Divide(val.clone()),
        "push" => UpdateOp::Push(val.clone()),
        "unset" => UpdateOp::Unset,
        _ => unreachable!("keys checked by keys_within"),
    })
}

fn parse_nested_write(obj: &Map<String, Value>, path: &str) -> Result<NestedWrite> {
    let mut write = NestedWrite::default();

    for (key, val) in obj {
        let here = join(path, key);
        match key.as_str() {
            "create" => write.create = one_or_many(val, &here, parse_write_data)?,
            "connect" => write.connect = one_or_many(val, &here, parse_where_at)?,
            "connectOrCreate" => {
                write.connect_or_create = match val {
                    Value::Array(items) => items.clone(),
                    other => vec![other.clone()],
                }
            }
            "createMany" => {
                let inner = expect_object(val, &here)?;
                let data_path = join(&here, "data");
                let data = inner
                    .get("data")
                    .ok_or_else(|| ParseError::new("createMany requires 'data'").at(&here))?;
                write.create_many = Some(CreateMany {
                    data: one_or_many(data, &data_path, parse_write_data)?,
                    skip_duplicates: match inner.get("skipDuplicates") {
                        Some(v) => expect_bool(v, &join(&here, "skipDuplicates"))?,
                        None => false,
                    },
                });
            }
            "disconnect" => {
                write.disconnect = Some(match val {
                    Value::Bool(b) => Disconnect::Flag(*b),
                    other => Disconnect::Records(one_or_many(other, &here, parse_where_at)?),
                })
            }
            _ => unreachable!("keys checked by keys_within"),
        }
    }

    Ok(write)
}

// ============================================================================
// Helpers
// ============================================================================

fn one_or_many<T>(value: &Value, path: &str, parse: fn(&Value, &str) -> Result<T>) -> Result<Vec<T>> {
    match value {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| parse(item, &format!("{}[{}]", path, i)))
            .collect(),
        _ => Ok(vec![parse(value, path)?]),
    }
}

fn keys_within(obj: &Map<String, Value>, allowed: &[&str]) -> bool {
    obj.keys().all(|k| allowed.contains(&k.as_str()))
}

fn expect_object<'a>(value: &'a Value, path: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| ParseError::new("expected an object").at(root(path)))
}

fn expect_array(value: &Value, path: &str) -> Result<Vec<Value>> {
    value
        .as_array()
        .cloned()
        .ok_or_else(|| ParseError::new("expected an array").at(path))
}

fn expect_string(value: &Value, path: &str) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ParseError::new("expected a string").at(path))
}

fn expect_strings(value: &Value, path: &str) -> Result<Vec<String>> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items.iter().map(|item| expect_string(item, path)).collect(),
        _ => Err(ParseError::new("expected a field name or an array of field names").at(path)),
    }
}

fn expect_bool(value: &Value, path: &str) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| ParseError::new("expected a boolean").at(path))
}

fn expect_usize(value: &Value, path: &str) -> Result<usize> {
    value
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| ParseError::new("expected a non-negative integer").at(path))
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn root(path: &str) -> &str {
    if path.is_empty() {
        "<root>"
    } else {
        path
    }
}
