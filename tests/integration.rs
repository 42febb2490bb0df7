//! Integration tests for relkv
//!
//! Full operation flows: payload parsing, scope analysis, evaluation, nested
//! writes, referential actions and commit.

use relkv::relql::{self, Query};
use relkv::{Client, ClientConfig, CountResult, Engine, Error, EventKind, Record, Schema, TxMode, Value};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const BLOG: &str = r#"
- name: User
  fields:
    - { name: id, type: int, id: true, default: autoincrement() }
    - { name: email, type: string, unique: true }
    - { name: name, type: string, required: true }
    - { name: score, type: int }
    - { name: tags, type: string, list: true }
  relations:
    - { name: posts, target: Post, kind: many }
    - { name: profile, target: Profile, kind: one }
- name: Profile
  fields:
    - { name: id, type: int, id: true, default: autoincrement() }
    - { name: bio, type: string }
    - { name: userId, type: int, unique: true }
  relations:
    - { name: user, target: User, kind: one, fields: [userId], references: [id], on_delete: cascade }
- name: Post
  fields:
    - { name: id, type: int, id: true, default: autoincrement() }
    - { name: title, type: string, required: true }
    - { name: views, type: int, default: 0 }
    - { name: authorId, type: int }
  relations:
    - { name: author, target: User, kind: one, fields: [authorId], references: [id], on_delete: set_null }
    - { name: comments, target: Comment, kind: many }
- name: Comment
  fields:
    - { name: id, type: int, id: true, default: autoincrement() }
    - { name: body, type: string }
    - { name: postId, type: int, required: true }
  relations:
    - { name: post, target: Post, kind: one, fields: [postId], references: [id], on_delete: restrict }
- name: Sample
  fields:
    - { name: id, type: int, id: true, default: autoincrement() }
    - { name: label, type: string, required: true }
    - { name: ratio, type: float }
    - { name: blob, type: bytes }
    - { name: seenAt, type: datetime }
    - { name: big, type: bigint }
    - { name: amount, type: decimal }
    - { name: flags, type: string, list: true }
"#;

/// Helper to open an in-memory client over the blog schema
async fn setup() -> Client {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let schema = Schema::from_yaml(BLOG).expect("Failed to load schema");
    Client::open(schema, &ClientConfig::memory("blog"))
        .await
        .expect("Failed to open client")
}

/// Helper to build a payload
fn q(payload: serde_json::Value) -> Query {
    relql::from_value(&payload).unwrap_or_else(|e| panic!("Bad payload {}: {}", payload, e))
}

fn engine<'a>(client: &'a Client, name: &str) -> Engine<'a> {
    client.entity(name).expect("Unknown entity")
}

fn int(record: &Record, field: &str) -> Option<i64> {
    record.get(field).and_then(Value::as_i64)
}

fn names(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .map(|r| r.get("name").and_then(Value::as_str).unwrap_or_default().to_string())
        .collect()
}

async fn create_user(client: &Client, data: serde_json::Value) -> Record {
    engine(client, "User")
        .create(&q(json!({ "data": data })), None)
        .await
        .expect("Failed to create user")
}

// =============================================================================
// Create / Find Tests
// =============================================================================

#[tokio::test]
async fn test_find_unique_after_create() {
    let client = setup().await;
    let users = engine(&client, "User");

    let created = create_user(&client, json!({ "name": "Ada", "email": "ada@x.io", "tags": ["a", "b"] })).await;
    assert_eq!(int(&created, "id"), Some(1));
    assert_eq!(created.get("score"), Some(&Value::Null));

    let found = users
        .find_unique(&q(json!({ "where": { "id": 1 } })), None)
        .await
        .unwrap()
        .expect("User not found");
    assert_eq!(found.fields, created.fields);

    let by_email = users
        .find_unique_or_throw(&q(json!({ "where": { "email": "ada@x.io" } })), None)
        .await
        .unwrap();
    assert_eq!(int(&by_email, "id"), Some(1));

    let missing = users.find_unique_or_throw(&q(json!({ "where": { "id": 42 } })), None).await;
    assert!(matches!(missing, Err(Error::RecordNotFound { .. })));
}

#[tokio::test]
async fn test_find_unique_requires_unique_selector() {
    let client = setup().await;
    let result = engine(&client, "User")
        .find_unique(&q(json!({ "where": { "name": "Ada" } })), None)
        .await;
    assert!(matches!(result, Err(Error::InvalidQuery { .. })));
}

#[tokio::test]
async fn test_create_with_nested_profile() {
    let client = setup().await;
    create_user(&client, json!({ "name": "John Doe", "profile": { "create": { "bio": "X" } } })).await;

    let users = engine(&client, "User")
        .find_many(&q(json!({ "include": { "profile": true } })), None)
        .await
        .unwrap();
    assert_eq!(users.len(), 1);

    let profile = users[0].one("profile").expect("Profile not attached");
    assert_eq!(profile.get("bio"), Some(&Value::from("X")));
    assert_eq!(int(profile, "userId"), int(&users[0], "id"));
}

#[tokio::test]
async fn test_nested_posts_get_parent_key() {
    let client = setup().await;
    let user = create_user(
        &client,
        json!({ "name": "John", "posts": { "create": [{ "title": "p1" }, { "title": "p2" }] } }),
    )
    .await;
    let id = int(&user, "id").unwrap();

    let posts = engine(&client, "Post");
    let count = posts
        .count(&q(json!({ "where": { "authorId": id } })), None)
        .await
        .unwrap();
    assert_eq!(count, CountResult::Total(2));

    for post in posts.find_many(&Query::new(), None).await.unwrap() {
        assert_eq!(int(&post, "authorId"), Some(id));
        assert_eq!(int(&post, "views"), Some(0));
    }
}

#[tokio::test]
async fn test_create_validates_input() {
    let client = setup().await;
    let users = engine(&client, "User");

    let missing = users.create(&q(json!({ "data": { "email": "x@x.io" } })), None).await;
    assert!(matches!(missing, Err(Error::MissingRequiredField { field, .. }) if field == "name"));

    let wrong_kind = users.create(&q(json!({ "data": { "name": 7 } })), None).await;
    assert!(matches!(wrong_kind, Err(Error::InvalidValue { .. })));

    let unknown = users.create(&q(json!({ "data": { "name": "A", "nickname": "a" } })), None).await;
    assert!(matches!(unknown, Err(Error::UnknownField { .. })));

    let dangling = engine(&client, "Post")
        .create(&q(json!({ "data": { "title": "t", "authorId": 99 } })), None)
        .await;
    assert!(matches!(dangling, Err(Error::ForeignKeyViolation { .. })));
}

#[tokio::test]
async fn test_unique_violation_rolls_back() {
    let client = setup().await;
    create_user(&client, json!({ "name": "A", "email": "same@x.io" })).await;

    let second = engine(&client, "User")
        .create(
            &q(json!({ "data": { "name": "B", "email": "same@x.io", "posts": { "create": { "title": "t" } } } })),
            None,
        )
        .await;
    assert!(matches!(second, Err(Error::UniqueViolation { .. })));

    assert_eq!(engine(&client, "User").count(&Query::new(), None).await.unwrap().total(), Some(1));
    assert_eq!(engine(&client, "Post").count(&Query::new(), None).await.unwrap().total(), Some(0));
}

#[tokio::test]
async fn test_connect_owning_relation() {
    let client = setup().await;
    create_user(&client, json!({ "name": "Ada" })).await;
    let posts = engine(&client, "Post");

    let post = posts
        .create(
            &q(json!({ "data": { "title": "t", "author": { "connect": { "id": 1 } } }, "include": { "author": true } })),
            None,
        )
        .await
        .unwrap();
    assert_eq!(int(&post, "authorId"), Some(1));
    assert_eq!(post.one("author").and_then(|a| a.get("name")), Some(&Value::from("Ada")));

    let missing = posts
        .create(&q(json!({ "data": { "title": "t", "author": { "connect": { "id": 99 } } } })), None)
        .await;
    assert!(matches!(missing, Err(Error::RelatedRecordNotFound { .. })));
}

#[tokio::test]
async fn test_create_many() {
    let client = setup().await;
    let users = engine(&client, "User");

    let count = users
        .create_many(
            &q(json!({
                "data": [
                    { "name": "A", "email": "a@x.io" },
                    { "name": "B", "email": "a@x.io" },
                    { "name": "C" }
                ],
                "skipDuplicates": true
            })),
            None,
        )
        .await
        .unwrap();
    assert_eq!(count, 2);

    let created = users
        .create_many_and_return(&q(json!({ "data": [{ "name": "D" }], "select": { "name": true } })), None)
        .await
        .unwrap();
    assert_eq!(names(&created), vec!["D"]);
    assert!(created[0].get("id").is_none());

    let nested = users
        .create_many(&q(json!({ "data": [{ "name": "E", "posts": { "create": { "title": "t" } } }] })), None)
        .await;
    assert!(matches!(nested, Err(Error::InvalidQuery { .. })));
}

// =============================================================================
// Filter Tests
// =============================================================================

async fn seed_people(client: &Client) {
    create_user(client, json!({ "name": "bob", "score": 2, "email": "bob@x.io", "tags": ["admin"] })).await;
    create_user(client, json!({ "name": "alice", "score": 3, "tags": ["admin", "ops"] })).await;
    create_user(client, json!({ "name": "carol", "score": 1, "email": "carol@x.io" })).await;
    create_user(client, json!({ "name": "alice", "score": 1 })).await;
}

async fn find_names(client: &Client, payload: serde_json::Value) -> Vec<String> {
    names(&engine(client, "User").find_many(&q(payload), None).await.unwrap())
}

#[tokio::test]
async fn test_scalar_filters() {
    let client = setup().await;
    seed_people(&client).await;

    assert_eq!(find_names(&client, json!({ "where": { "score": { "gte": 2 } } })).await, vec!["bob", "alice"]);
    assert_eq!(
        find_names(&client, json!({ "where": { "name": { "startsWith": "AL", "mode": "insensitive" } } })).await,
        vec!["alice", "alice"]
    );
    assert_eq!(find_names(&client, json!({ "where": { "email": null } })).await, vec!["alice", "alice"]);
    assert_eq!(
        find_names(&client, json!({ "where": { "email": { "notIn": ["bob@x.io"] } } })).await,
        vec!["alice", "carol", "alice"]
    );
    assert_eq!(find_names(&client, json!({ "where": { "email": { "in": ["bob@x.io", "nobody@x.io"] } } })).await, vec!["bob"]);
    assert_eq!(find_names(&client, json!({ "where": { "tags": { "has": "ops" } } })).await, vec!["alice"]);
    assert_eq!(find_names(&client, json!({ "where": { "tags": { "isEmpty": true } } })).await, vec!["carol", "alice"]);
    assert_eq!(find_names(&client, json!({ "where": { "tags": { "equals": ["ops", "admin"] } } })).await, vec!["alice"]);
    assert_eq!(
        find_names(&client, json!({ "where": { "NOT": { "name": "alice" }, "score": { "not": 2 } } })).await,
        vec!["carol"]
    );
}

#[tokio::test]
async fn test_filter_operator_errors() {
    let client = setup().await;
    seed_people(&client).await;
    let users = engine(&client, "User");

    let text_on_int = users.find_many(&q(json!({ "where": { "score": { "contains": "1" } } })), None).await;
    assert!(matches!(text_on_int, Err(Error::InvalidQuery { .. })));

    let unknown = users.find_many(&q(json!({ "where": { "nickname": "x" } })), None).await;
    assert!(matches!(unknown, Err(Error::UnknownField { .. })));
}

#[tokio::test]
async fn test_filter_is_idempotent() {
    let client = setup().await;
    seed_people(&client).await;

    let clause = json!({ "OR": [{ "name": { "startsWith": "a" } }, { "score": { "gte": 2 } }] });
    let once = find_names(&client, json!({ "where": clause })).await;
    let twice = find_names(&client, json!({ "where": { "AND": [clause, clause] } })).await;
    assert_eq!(once, vec!["bob", "alice", "alice"]);
    assert_eq!(once, twice);
}

#[tokio::test]
async fn test_relation_quantifiers_on_empty_children() {
    let client = setup().await;
    create_user(&client, json!({ "name": "lonely" })).await;

    let every = find_names(&client, json!({ "where": { "posts": { "every": { "title": "zzz" } } } })).await;
    let some = find_names(&client, json!({ "where": { "posts": { "some": { "title": "zzz" } } } })).await;
    let none = find_names(&client, json!({ "where": { "posts": { "none": { "title": "zzz" } } } })).await;

    assert_eq!(every, vec!["lonely"]);
    assert!(some.is_empty());
    assert_eq!(none, vec!["lonely"]);
}

#[tokio::test]
async fn test_to_one_relation_filters() {
    let client = setup().await;
    create_user(&client, json!({ "name": "with", "profile": { "create": { "bio": "hi" } } })).await;
    create_user(&client, json!({ "name": "without" })).await;

    assert_eq!(find_names(&client, json!({ "where": { "profile": null } })).await, vec!["without"]);
    assert_eq!(find_names(&client, json!({ "where": { "profile": { "isNot": null } } })).await, vec!["with"]);
    assert_eq!(find_names(&client, json!({ "where": { "profile": { "bio": "hi" } } })).await, vec!["with"]);
    assert_eq!(
        find_names(&client, json!({ "where": { "profile": { "isNot": { "bio": "hi" } } } })).await,
        vec!["without"]
    );
}

// =============================================================================
// Ordering and Projection Tests
// =============================================================================

#[tokio::test]
async fn test_multi_clause_order_and_reversal() {
    let client = setup().await;
    seed_people(&client).await;
    let users = engine(&client, "User");

    let order = q(json!({ "orderBy": [{ "name": "asc" }, { "score": "desc" }] }));
    let sorted = users.find_many(&order, None).await.unwrap();
    let pairs: Vec<(String, Option<i64>)> = sorted
        .iter()
        .map(|r| (r.get("name").unwrap().to_string(), int(r, "score")))
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("alice".to_string(), Some(3)),
            ("alice".to_string(), Some(1)),
            ("bob".to_string(), Some(2)),
            ("carol".to_string(), Some(1)),
        ]
    );

    let reversed = Query {
        order_by: order.order_by.iter().map(|o| o.reversed()).collect(),
        ..Query::new()
    };
    let mut back = users.find_many(&reversed, None).await.unwrap();
    back.reverse();
    assert_eq!(back, sorted);
}

#[tokio::test]
async fn test_order_by_relation() {
    let client = setup().await;
    create_user(&client, json!({ "name": "zed", "posts": { "create": [{ "title": "z1" }] } })).await;
    create_user(
        &client,
        json!({ "name": "amy", "posts": { "create": [{ "title": "a1" }, { "title": "a2" }] } }),
    )
    .await;
    engine(&client, "Post")
        .create(&q(json!({ "data": { "title": "orphan" } })), None)
        .await
        .unwrap();

    let posts = engine(&client, "Post")
        .find_many(&q(json!({ "orderBy": { "author": { "name": "asc" } } })), None)
        .await
        .unwrap();
    let titles: Vec<&str> = posts.iter().filter_map(|p| p.get("title").and_then(Value::as_str)).collect();
    assert_eq!(titles, vec!["orphan", "a1", "a2", "z1"]);

    let by_count = find_names(&client, json!({ "orderBy": { "posts": { "_count": "desc" } } })).await;
    assert_eq!(by_count, vec!["amy", "zed"]);
}

#[tokio::test]
async fn test_select_include_and_count() {
    let client = setup().await;
    create_user(
        &client,
        json!({ "name": "amy", "posts": { "create": [{ "title": "a1" }, { "title": "a2", "views": 5 }] } }),
    )
    .await;

    let users = engine(&client, "User");
    let selected = users
        .find_many(
            &q(json!({
                "select": {
                    "name": true,
                    "posts": { "where": { "views": { "gt": 0 } }, "select": { "title": true } },
                    "_count": { "select": { "posts": true } }
                }
            })),
            None,
        )
        .await
        .unwrap();
    let amy = &selected[0];
    assert_eq!(amy.fields.keys().collect::<Vec<_>>(), vec!["name"]);
    assert_eq!(amy.many("posts").len(), 1);
    assert_eq!(amy.many("posts")[0].get("title"), Some(&Value::from("a2")));
    assert_eq!(amy.count("posts"), Some(2));

    let both = users
        .find_many(&q(json!({ "select": { "name": true }, "include": { "posts": true } })), None)
        .await;
    assert!(matches!(both, Err(Error::InvalidQuery { .. })));

    let counts = users
        .count(&q(json!({ "select": { "_all": true, "email": true } })), None)
        .await
        .unwrap();
    assert_eq!(counts.total(), Some(1));
    assert_eq!(counts.field("email"), Some(0));
}

#[tokio::test]
async fn test_pagination_and_distinct() {
    let client = setup().await;
    seed_people(&client).await;

    assert_eq!(
        find_names(&client, json!({ "orderBy": { "score": "asc" }, "skip": 1, "take": 2 })).await,
        vec!["alice", "bob"]
    );
    assert_eq!(
        find_names(&client, json!({ "distinct": ["name"] })).await,
        vec!["bob", "alice", "carol"]
    );
    let first = engine(&client, "User")
        .find_first(&q(json!({ "where": { "name": "alice" }, "orderBy": { "score": "asc" } })), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(int(&first, "score"), Some(1));
}

// =============================================================================
// Update Tests
// =============================================================================

#[tokio::test]
async fn test_update_scalar_operations() {
    let client = setup().await;
    create_user(&client, json!({ "name": "amy", "tags": ["a"], "posts": { "create": { "title": "t" } } })).await;
    let posts = engine(&client, "Post");

    let post = posts
        .update(&q(json!({ "where": { "id": 1 }, "data": { "views": { "increment": 5 } } })), None)
        .await
        .unwrap();
    assert_eq!(int(&post, "views"), Some(5));

    let post = posts
        .update(&q(json!({ "where": { "id": 1 }, "data": { "views": { "multiply": 3 }, "title": "new" } })), None)
        .await
        .unwrap();
    assert_eq!(int(&post, "views"), Some(15));
    assert_eq!(post.get("title"), Some(&Value::from("new")));

    let by_zero = posts
        .update(&q(json!({ "where": { "id": 1 }, "data": { "views": { "divide": 0 } } })), None)
        .await;
    assert!(matches!(by_zero, Err(Error::InvalidValue { .. })));

    let user = engine(&client, "User")
        .update(&q(json!({ "where": { "id": 1 }, "data": { "tags": { "push": "b" } } })), None)
        .await
        .unwrap();
    assert_eq!(user.get("tags"), Some(&Value::List(vec![Value::from("a"), Value::from("b")])));

    let text_math = posts
        .update(&q(json!({ "where": { "id": 1 }, "data": { "title": { "increment": 1 } } })), None)
        .await;
    assert!(matches!(text_math, Err(Error::InvalidQuery { .. })));
}

#[tokio::test]
async fn test_update_rejects_key_change_and_missing_rows() {
    let client = setup().await;
    create_user(&client, json!({ "name": "amy" })).await;
    let users = engine(&client, "User");

    let key_change = users
        .update(&q(json!({ "where": { "id": 1 }, "data": { "id": 5 } })), None)
        .await;
    assert!(matches!(key_change, Err(Error::ImmutablePrimaryKey { .. })));

    let missing = users
        .update(&q(json!({ "where": { "id": 9 }, "data": { "name": "x" } })), None)
        .await;
    assert!(matches!(missing, Err(Error::RecordNotFound { .. })));

    let cleared = users
        .update(&q(json!({ "where": { "id": 1 }, "data": { "name": { "unset": true } } })), None)
        .await;
    assert!(matches!(cleared, Err(Error::MissingRequiredField { .. })));
}

#[tokio::test]
async fn test_update_relations() {
    let client = setup().await;
    create_user(&client, json!({ "name": "amy" })).await;
    engine(&client, "Post")
        .create(&q(json!({ "data": { "title": "loose" } })), None)
        .await
        .unwrap();
    let posts = engine(&client, "Post");

    let linked = posts
        .update(&q(json!({ "where": { "id": 1 }, "data": { "author": { "connect": { "id": 1 } } } })), None)
        .await
        .unwrap();
    assert_eq!(int(&linked, "authorId"), Some(1));

    let unlinked = posts
        .update(&q(json!({ "where": { "id": 1 }, "data": { "author": { "disconnect": true } } })), None)
        .await
        .unwrap();
    assert_eq!(unlinked.get("authorId"), Some(&Value::Null));

    let user = engine(&client, "User")
        .update(
            &q(json!({
                "where": { "id": 1 },
                "data": { "posts": { "connect": [{ "id": 1 }], "create": [{ "title": "fresh" }] } },
                "include": { "posts": true }
            })),
            None,
        )
        .await
        .unwrap();
    assert_eq!(user.many("posts").len(), 2);
}

#[tokio::test]
async fn test_update_many() {
    let client = setup().await;
    seed_people(&client).await;

    let updated = engine(&client, "User")
        .update_many(&q(json!({ "where": { "score": { "lt": 2 } }, "data": { "score": 10 } })), None)
        .await
        .unwrap();
    assert_eq!(updated, 2);
    assert_eq!(
        find_names(&client, json!({ "where": { "score": 10 } })).await,
        vec!["carol", "alice"]
    );
}

// =============================================================================
// Delete Tests
// =============================================================================

#[tokio::test]
async fn test_delete_applies_referential_actions() {
    let client = setup().await;
    let user = create_user(
        &client,
        json!({
            "name": "John",
            "profile": { "create": { "bio": "X" } },
            "posts": { "create": [{ "title": "p1" }, { "title": "p2" }] }
        }),
    )
    .await;
    let id = int(&user, "id").unwrap();

    let removed = engine(&client, "User")
        .delete(&q(json!({ "where": { "id": id }, "include": { "profile": true } })), None)
        .await
        .unwrap();
    assert_eq!(removed.one("profile").and_then(|p| p.get("bio")), Some(&Value::from("X")));

    let profiles = engine(&client, "Profile")
        .find_many(&q(json!({ "where": { "userId": id } })), None)
        .await
        .unwrap();
    assert!(profiles.is_empty());

    let posts = engine(&client, "Post");
    let owned = posts
        .find_many(&q(json!({ "where": { "authorId": id } })), None)
        .await
        .unwrap();
    assert!(owned.is_empty());
    // set_null keeps the posts themselves.
    assert_eq!(posts.count(&Query::new(), None).await.unwrap().total(), Some(2));
}

#[tokio::test]
async fn test_restrict_blocks_delete() {
    let client = setup().await;
    let posts = engine(&client, "Post");
    posts
        .create(&q(json!({ "data": { "title": "t", "comments": { "create": [{ "body": "first" }] } } })), None)
        .await
        .unwrap();

    let blocked = posts.delete(&q(json!({ "where": { "id": 1 } })), None).await;
    assert!(matches!(blocked, Err(Error::RestrictViolation { .. })));
    assert_eq!(posts.count(&Query::new(), None).await.unwrap().total(), Some(1));

    engine(&client, "Comment")
        .delete_many(&q(json!({ "where": { "postId": 1 } })), None)
        .await
        .unwrap();
    posts.delete(&q(json!({ "where": { "id": 1 } })), None).await.unwrap();
    assert_eq!(posts.count(&Query::new(), None).await.unwrap().total(), Some(0));
}

#[tokio::test]
async fn test_delete_many_skips_cascaded_rows() {
    let client = setup().await;
    create_user(&client, json!({ "name": "a", "profile": { "create": { "bio": "1" } } })).await;
    create_user(&client, json!({ "name": "b", "profile": { "create": { "bio": "2" } } })).await;

    let deleted = engine(&client, "User").delete_many(&Query::new(), None).await.unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(engine(&client, "Profile").count(&Query::new(), None).await.unwrap().total(), Some(0));
}

// =============================================================================
// Transaction Tests
// =============================================================================

#[tokio::test]
async fn test_failure_aborts_supplied_transaction() {
    let client = setup().await;
    let users = engine(&client, "User");

    let tx = client.transaction(["User"], TxMode::ReadWrite).await.unwrap();
    users.create(&q(json!({ "data": { "name": "kept?" } })), Some(&tx)).await.unwrap();

    let failed = users.create(&q(json!({ "data": {} })), Some(&tx)).await;
    assert!(matches!(failed, Err(Error::MissingRequiredField { .. })));
    assert!(!tx.is_active());

    let after = users.find_many(&Query::new(), Some(&tx)).await;
    assert!(matches!(after, Err(Error::TransactionInactive)));
    drop(tx);

    assert_eq!(users.count(&Query::new(), None).await.unwrap().total(), Some(0));
}

#[tokio::test]
async fn test_supplied_transaction_commits_together() {
    let client = setup().await;
    let users = engine(&client, "User");
    let posts = engine(&client, "Post");

    let tx = client.transaction(["Post", "User"], TxMode::ReadWrite).await.unwrap();
    let user = users.create(&q(json!({ "data": { "name": "amy" } })), Some(&tx)).await.unwrap();
    posts
        .create(&q(json!({ "data": { "title": "t", "authorId": int(&user, "id") } })), Some(&tx))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(posts.count(&Query::new(), None).await.unwrap().total(), Some(1));
}

#[tokio::test]
async fn test_connect_or_create_is_rejected_before_writes() {
    let client = setup().await;
    let users = engine(&client, "User");

    let result = users
        .create(
            &q(json!({
                "data": {
                    "name": "amy",
                    "posts": { "create": [{ "title": "t", "comments": { "connectOrCreate": { "where": { "id": 1 } } } }] }
                }
            })),
            None,
        )
        .await;
    assert!(matches!(
        result,
        Err(Error::UnsupportedOperation { operation: "connectOrCreate", .. })
    ));
    assert_eq!(users.count(&Query::new(), None).await.unwrap().total(), Some(0));
}

#[tokio::test]
async fn test_out_of_scope_table() {
    let client = setup().await;
    create_user(&client, json!({ "name": "amy" })).await;

    let tx = client.transaction(["User"], TxMode::ReadOnly).await.unwrap();
    let result = engine(&client, "User")
        .find_many(&q(json!({ "include": { "posts": true } })), Some(&tx))
        .await;
    assert!(matches!(result, Err(Error::TableNotInScope { table }) if table == "Post"));
    drop(tx);

    let tx = client.transaction(["User"], TxMode::ReadOnly).await.unwrap();
    let write = engine(&client, "User")
        .create(&q(json!({ "data": { "name": "x" } })), Some(&tx))
        .await;
    assert!(matches!(write, Err(Error::ReadOnlyTransaction { .. })));
}

#[tokio::test]
async fn test_directory_store_survives_reopen() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let tmp = TempDir::new().expect("Failed to create temp dir");
    let config = ClientConfig::directory("blog", tmp.path());

    {
        let client = Client::open(Schema::from_yaml(BLOG).unwrap(), &config).await.unwrap();
        create_user(&client, json!({ "name": "amy", "posts": { "create": { "title": "kept" } } })).await;
    }
    assert!(tmp.path().join("tables/User.json").exists());

    let client = Client::open(Schema::from_yaml(BLOG).unwrap(), &config).await.unwrap();
    let users = engine(&client, "User")
        .find_many(&q(json!({ "include": { "posts": true } })), None)
        .await
        .unwrap();
    assert_eq!(names(&users), vec!["amy"]);
    assert_eq!(users[0].many("posts").len(), 1);

    let next = create_user(&client, json!({ "name": "bob" })).await;
    assert_eq!(int(&next, "id"), Some(2));
}

// =============================================================================
// Notification Tests
// =============================================================================

#[tokio::test]
async fn test_notifications_per_kind() {
    let client = setup().await;
    let seen: Arc<Mutex<Vec<(String, EventKind)>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&seen);
    let posts = engine(&client, "Post");
    posts.subscribe(
        &EventKind::ALL,
        Arc::new(move |e| sink.lock().unwrap().push((e.entity.clone(), e.kind))),
    );
    let user_updates = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&user_updates);
    let id = engine(&client, "User").subscribe(&[EventKind::Update], Arc::new(move |_| *counter.lock().unwrap() += 1));

    create_user(&client, json!({ "name": "amy", "posts": { "create": [{ "title": "a" }, { "title": "b" }] } })).await;
    posts
        .update(&q(json!({ "where": { "id": 1 }, "data": { "title": "a2" } })), None)
        .await
        .unwrap();
    engine(&client, "User")
        .delete(&q(json!({ "where": { "id": 1 } })), None)
        .await
        .unwrap();

    let kinds: Vec<EventKind> = seen.lock().unwrap().iter().map(|(_, k)| *k).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::Create,
            EventKind::Create,
            EventKind::Update,
            EventKind::Update,
            EventKind::Update
        ]
    );
    assert!(seen.lock().unwrap().iter().all(|(entity, _)| entity == "Post"));
    assert_eq!(*user_updates.lock().unwrap(), 0);

    assert!(engine(&client, "User").unsubscribe(id));
}

#[tokio::test]
async fn test_failed_operation_emits_nothing() {
    let client = setup().await;
    let seen = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&seen);
    engine(&client, "User").subscribe(&EventKind::ALL, Arc::new(move |_| *counter.lock().unwrap() += 1));

    let _ = engine(&client, "User")
        .create(&q(json!({ "data": { "name": "a", "posts": { "create": { "views": 1 } } } })), None)
        .await;
    assert_eq!(*seen.lock().unwrap(), 0);
}

// =============================================================================
// Client Tests
// =============================================================================

#[tokio::test]
async fn test_client_lookup_and_global() {
    let client = Arc::new(setup().await);
    assert!(matches!(client.entity("Invoice"), Err(Error::UnknownEntity { .. })));
    assert_eq!(client.entity("Post").unwrap().name(), "Post");

    assert!(client.install_global());
    assert!(!client.install_global());
    let global = Client::global().expect("Global client missing");
    assert!(Arc::ptr_eq(&global, &client));
}

// =============================================================================
// Scalar Kind Tests
// =============================================================================

async fn seed_samples(client: &Client) {
    let samples = engine(client, "Sample");
    for data in [
        json!({
            "label": "a",
            "blob": [1, 2, 3],
            "seenAt": "2024-01-01T00:00:00Z",
            "big": "12345678901234567890",
            "amount": "10.50",
            "flags": ["x", "y"]
        }),
        json!({ "label": "b", "blob": [9], "seenAt": 1717200000000_i64, "big": 5, "amount": 2, "flags": ["y"] }),
        json!({ "label": "c" }),
    ] {
        samples.create(&q(json!({ "data": data })), None).await.unwrap();
    }
}

async fn find_labels(client: &Client, payload: serde_json::Value) -> Vec<String> {
    engine(client, "Sample")
        .find_many(&q(payload), None)
        .await
        .unwrap()
        .iter()
        .map(|r| r.get("label").and_then(Value::as_str).unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn test_list_membership_filters() {
    let client = setup().await;
    seed_samples(&client).await;

    assert_eq!(find_labels(&client, json!({ "where": { "flags": { "hasEvery": ["x", "y"] } } })).await, vec!["a"]);
    assert_eq!(find_labels(&client, json!({ "where": { "flags": { "hasSome": ["y", "z"] } } })).await, vec!["a", "b"]);
    assert!(find_labels(&client, json!({ "where": { "flags": { "hasSome": ["z"] } } })).await.is_empty());
}

#[tokio::test]
async fn test_bytes_equality() {
    let client = setup().await;
    seed_samples(&client).await;

    assert_eq!(find_labels(&client, json!({ "where": { "blob": [9] } })).await, vec!["b"]);
    assert_eq!(find_labels(&client, json!({ "where": { "blob": { "equals": [1, 2, 3] } } })).await, vec!["a"]);
    assert!(find_labels(&client, json!({ "where": { "blob": [1, 2] } })).await.is_empty());
}

#[tokio::test]
async fn test_datetime_ranges_accept_text_and_epoch() {
    let client = setup().await;
    seed_samples(&client).await;

    assert_eq!(
        find_labels(&client, json!({ "where": { "seenAt": { "gt": "2024-03-01T00:00:00Z" } } })).await,
        vec!["b"]
    );
    assert_eq!(
        find_labels(&client, json!({ "where": { "seenAt": { "lt": 1709251200000_i64 } } })).await,
        vec!["a"]
    );
    assert_eq!(
        find_labels(
            &client,
            json!({ "where": { "seenAt": { "gte": "2024-01-01T00:00:00Z", "lte": "2024-06-01T00:00:00Z" } } })
        )
        .await,
        vec!["a", "b"]
    );
}

#[tokio::test]
async fn test_bigint_and_decimal_ranges() {
    let client = setup().await;
    seed_samples(&client).await;

    assert_eq!(find_labels(&client, json!({ "where": { "big": { "gte": "100" } } })).await, vec!["a"]);
    assert_eq!(find_labels(&client, json!({ "where": { "big": { "lt": 100 } } })).await, vec!["b"]);
    assert_eq!(find_labels(&client, json!({ "where": { "amount": { "gt": "5" } } })).await, vec!["a"]);
    assert_eq!(find_labels(&client, json!({ "where": { "amount": { "lte": 2 } } })).await, vec!["b"]);
    assert_eq!(find_labels(&client, json!({ "where": { "amount": { "equals": "10.5" } } })).await, vec!["a"]);
}

#[tokio::test]
async fn test_explicit_null_placement() {
    let client = setup().await;
    seed_samples(&client).await;

    assert_eq!(find_labels(&client, json!({ "orderBy": { "big": "asc" } })).await, vec!["c", "b", "a"]);
    assert_eq!(
        find_labels(&client, json!({ "orderBy": { "big": { "sort": "asc", "nulls": "last" } } })).await,
        vec!["b", "a", "c"]
    );
    assert_eq!(find_labels(&client, json!({ "orderBy": { "big": "desc" } })).await, vec!["a", "b", "c"]);
    assert_eq!(
        find_labels(&client, json!({ "orderBy": { "big": { "sort": "desc", "nulls": "first" } } })).await,
        vec!["c", "a", "b"]
    );
}

#[tokio::test]
async fn test_float_overflow_is_rejected() {
    let client = setup().await;
    let samples = engine(&client, "Sample");
    samples
        .create(&q(json!({ "data": { "label": "huge", "ratio": 1e308 } })), None)
        .await
        .unwrap();

    let overflow = samples
        .update(&q(json!({ "where": { "id": 1 }, "data": { "ratio": { "multiply": 10.0 } } })), None)
        .await;
    assert!(matches!(overflow, Err(Error::InvalidValue { .. })));

    let stored = samples
        .find_unique_or_throw(&q(json!({ "where": { "id": 1 } })), None)
        .await
        .unwrap();
    assert_eq!(stored.get("ratio"), Some(&Value::Float(1e308)));

    let halved = samples
        .update(&q(json!({ "where": { "id": 1 }, "data": { "ratio": { "divide": 2 } } })), None)
        .await
        .unwrap();
    assert_eq!(halved.get("ratio"), Some(&Value::Float(5e307)));
}

// =============================================================================
// Nested Write Tests
// =============================================================================

#[tokio::test]
async fn test_nested_create_many() {
    let client = setup().await;
    let user = create_user(
        &client,
        json!({ "name": "amy", "posts": { "createMany": { "data": [{ "title": "m1" }, { "title": "m2" }] } } }),
    )
    .await;
    let id = int(&user, "id");

    let posts = engine(&client, "Post").find_many(&Query::new(), None).await.unwrap();
    assert_eq!(posts.len(), 2);
    assert!(posts.iter().all(|p| int(p, "authorId") == id));

    let to_one = engine(&client, "User")
        .create(
            &q(json!({ "data": { "name": "bob", "profile": { "createMany": { "data": [{ "bio": "x" }] } } } })),
            None,
        )
        .await;
    assert!(matches!(to_one, Err(Error::InvalidQuery { .. })));
}

#[tokio::test]
async fn test_connect_replaces_linked_to_one_child() {
    let client = setup().await;
    create_user(&client, json!({ "name": "amy", "profile": { "create": { "bio": "one" } } })).await;
    create_user(&client, json!({ "name": "bob", "profile": { "create": { "bio": "two" } } })).await;

    let amy = engine(&client, "User")
        .update(
            &q(json!({
                "where": { "id": 1 },
                "data": { "profile": { "connect": { "id": 2 } } },
                "include": { "profile": true }
            })),
            None,
        )
        .await
        .unwrap();
    assert_eq!(amy.one("profile").and_then(|p| p.get("bio")), Some(&Value::from("two")));

    let profiles = engine(&client, "Profile").find_many(&Query::new(), None).await.unwrap();
    assert_eq!(profiles[0].get("userId"), Some(&Value::Null));
    assert_eq!(int(&profiles[1], "userId"), Some(1));
}

// =============================================================================
// Not Found Tests
// =============================================================================

#[tokio::test]
async fn test_or_throw_not_found_aborts_supplied_transaction() {
    let client = setup().await;
    let users = engine(&client, "User");

    let tx = client.transaction(["User"], TxMode::ReadWrite).await.unwrap();
    users.create(&q(json!({ "data": { "name": "amy" } })), Some(&tx)).await.unwrap();
    let missing = users
        .find_unique_or_throw(&q(json!({ "where": { "id": 99 } })), Some(&tx))
        .await;
    assert!(matches!(missing, Err(Error::RecordNotFound { .. })));
    assert!(!tx.is_active());
    assert!(matches!(tx.commit().await, Err(Error::TransactionInactive)));
    assert_eq!(users.count(&Query::new(), None).await.unwrap().total(), Some(0));

    let tx = client.transaction(["User"], TxMode::ReadWrite).await.unwrap();
    users.create(&q(json!({ "data": { "name": "amy" } })), Some(&tx)).await.unwrap();
    let missing = users
        .find_first_or_throw(&q(json!({ "where": { "name": "nobody" } })), Some(&tx))
        .await;
    assert!(matches!(missing, Err(Error::RecordNotFound { .. })));
    assert!(!tx.is_active());
    drop(tx);
    assert_eq!(users.count(&Query::new(), None).await.unwrap().total(), Some(0));
}

#[tokio::test]
async fn test_find_first_or_throw() {
    let client = setup().await;
    seed_people(&client).await;
    let users = engine(&client, "User");

    let top = users
        .find_first_or_throw(&q(json!({ "orderBy": { "score": "desc" } })), None)
        .await
        .unwrap();
    assert_eq!(int(&top, "score"), Some(3));

    let found = users.find_first(&q(json!({ "where": { "name": "dave" } })), None).await.unwrap();
    assert!(found.is_none());
    let missing = users
        .find_first_or_throw(&q(json!({ "where": { "name": "dave" } })), None)
        .await;
    assert!(matches!(missing, Err(Error::RecordNotFound { .. })));
}
