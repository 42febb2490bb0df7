//! RelQL - structured query payloads
//!
//! The payload language of the relkv engine: a JSON document describing a
//! filter tree, ordering, projection and nested writes.
//!
//! # Shape Overview
//!
//! ```json
//! {
//!   "where": {
//!     "name": { "startsWith": "J" },
//!     "posts": { "some": { "title": { "contains": "rust" } } },
//!     "OR": [{ "age": { "gte": 18 } }, { "profile": null }]
//!   },
//!   "orderBy": [{ "author": { "name": "asc" } }, { "id": "desc" }],
//!   "include": { "posts": { "where": { "published": true }, "take": 5 } },
//!   "take": 10
//! }
//! ```
//!
//! Writes carry `data`:
//!
//! ```json
//! {
//!   "data": {
//!     "name": "John",
//!     "profile": { "create": { "bio": "hi" } },
//!     "posts": { "create": [{ "title": "p1" }], "connect": [{ "id": 4 }] }
//!   }
//! }
//! ```
//!
//! # Special Keys
//!
//! - `AND` / `OR` / `NOT` - logical combinators
//! - `is` / `isNot` / `every` / `some` / `none` - relation filters
//! - `_count` - relation counts in `select` / `include` / `orderBy`

mod ast;
mod error;
mod parser;

pub use ast::*;
pub use error::ParseError;
pub use parser::{parse_order_by, parse_where};

/// Parse a RelQL payload from JSON text
pub fn parse(input: &str) -> Result<Query, ParseError> {
    let value: serde_json::Value = serde_json::from_str(input)?;
    parser::parse_query(&value)
}

/// Parse a RelQL payload from an already decoded JSON value
pub fn from_value(value: &serde_json::Value) -> Result<Query, ParseError> {
    parser::parse_query(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_empty() {
        let query = parse("{}").unwrap();
        assert_eq!(query, Query::default());
        assert_eq!(from_value(&serde_json::Value::Null).unwrap(), Query::default());
    }

    #[test]
    fn test_parse_where_classification() {
        let query = from_value(&json!({
            "where": {
                "name": "John",
                "age": { "gte": 18, "lt": 65 },
                "profile": null,
                "author": { "name": "Ann" },
                "posts": { "some": { "published": true } }
            }
        }))
        .unwrap();
        let clause = query.where_clause.unwrap();

        assert_eq!(clause.condition("name"), Some(&Condition::Equals(json!("John"))));
        assert!(matches!(clause.condition("age"), Some(Condition::Scalar(f)) if f.gte == Some(json!(18))));
        assert_eq!(clause.condition("profile"), Some(&Condition::Null));
        assert!(matches!(clause.condition("author"), Some(Condition::Where(w)) if w.fields.len() == 1));
        assert!(matches!(clause.condition("posts"), Some(Condition::Relation(r)) if r.some.is_some()));
    }

    #[test]
    fn test_parse_combinators() {
        let clause = parse_where(&json!({
            "AND": { "a": 1 },
            "OR": [{ "b": 1 }, { "c": 2 }],
            "NOT": [{ "d": { "not": { "contains": "x" } } }]
        }))
        .unwrap();

        assert_eq!(clause.and.len(), 1);
        assert_eq!(clause.or.as_ref().map(Vec::len), Some(2));
        assert_eq!(clause.children().count(), 4);
        let not = &clause.not[0];
        assert!(matches!(
            not.condition("d"),
            Some(Condition::Scalar(ScalarFilter { not: Some(n), .. })) if matches!(**n, NotFilter::Filter(_))
        ));
    }

    #[test]
    fn test_parse_relation_targets() {
        let clause = parse_where(&json!({ "author": { "is": null }, "profile": { "isNot": { "bio": "x" } } })).unwrap();
        assert!(matches!(
            clause.condition("author"),
            Some(Condition::Relation(RelationFilter { is: Some(RelationTarget::Null), .. }))
        ));
        assert!(matches!(
            clause.condition("profile"),
            Some(Condition::Relation(RelationFilter { is_not: Some(RelationTarget::Where(_)), .. }))
        ));
    }

    #[test]
    fn test_parse_order_by() {
        let clauses = parse_order_by(&json!([
            { "name": "asc" },
            { "age": { "sort": "desc", "nulls": "last" } },
            { "posts": { "_count": "desc" } },
            { "author": { "name": "asc" } }
        ]))
        .unwrap();

        assert_eq!(clauses.len(), 4);
        assert_eq!(clauses[0], OrderBy::asc("name"));
        assert_eq!(
            clauses[1].kind,
            OrderKind::Scalar { sort: SortOrder::Desc, nulls: Some(NullsOrder::Last) }
        );
        assert_eq!(clauses[2].kind, OrderKind::Count(SortOrder::Desc));
        assert_eq!(clauses[3].kind, OrderKind::Relation(vec![OrderBy::asc("name")]));
        assert_eq!(clauses[3].reversed().kind, OrderKind::Relation(vec![OrderBy::desc("name")]));
    }

    #[test]
    fn test_parse_order_by_keeps_key_order() {
        let clauses = parse_order_by(&json!({ "zeta": "asc", "alpha": "desc" })).unwrap();
        assert_eq!(clauses[0].field, "zeta");
        assert_eq!(clauses[1].field, "alpha");
    }

    #[test]
    fn test_parse_selection() {
        let query = from_value(&json!({
            "select": { "id": true, "posts": { "where": { "published": true }, "take": 2 }, "_count": true }
        }))
        .unwrap();
        let select = query.select.unwrap();

        assert!(select.is_selected("id"));
        assert_eq!(select.get("posts").and_then(Selected::query).and_then(|q| q.take), Some(2));
        assert_eq!(select.get("_count"), Some(&Selected::Count(CountSelection::All)));
    }

    #[test]
    fn test_parse_nested_writes() {
        let query = from_value(&json!({
            "data": {
                "name": "John",
                "tags": { "set": ["a", "b"] },
                "views": { "increment": 1 },
                "settings": { "theme": "dark" },
                "profile": { "create": { "bio": "X" } },
                "posts": {
                    "create": [{ "title": "p1" }, { "title": "p2" }],
                    "createMany": { "data": [{ "title": "p3" }], "skipDuplicates": true }
                }
            }
        }))
        .unwrap();
        let data = match query.data.unwrap() {
            Data::One(d) => d,
            Data::Many(_) => panic!("Expected a single record")
        };

        assert_eq!(data.get("name"), Some(&FieldWrite::Value(json!("John"))));
        assert_eq!(data.get("tags"), Some(&FieldWrite::Op(UpdateOp::Set(json!(["a", "b"])))));
        assert_eq!(data.get("views"), Some(&FieldWrite::Op(UpdateOp::Increment(json!(1)))));
        assert_eq!(data.get("settings"), Some(&FieldWrite::Value(json!({ "theme": "dark" }))));
        match data.get("posts") {
            Some(FieldWrite::Relation(nested)) => {
                assert_eq!(nested.create.len(), 2);
                assert!(nested.create_many.as_ref().is_some_and(|m| m.skip_duplicates));
            }
            other => panic!("Expected nested write, got {:?}", other)
        }
    }

    #[test]
    fn test_unknown_query_key_fails() {
        let err = parse(r#"{"wher": {}}"#).unwrap_err();
        assert!(err.to_string().contains("unknown query key 'wher'"));
    }

    #[test]
    fn test_error_path() {
        let err = from_value(&json!({ "where": { "name": { "in": "x" } } })).unwrap_err();
        assert_eq!(err.path.as_deref(), Some("where.name.in"));
    }
}
