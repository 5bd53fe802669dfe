//! End-to-end tests of the GraphQL HTTP surface over the in-memory store

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use jsonwebtoken::{EncodingKey, Header, encode};
use mongoke::prelude::*;
use serde_json::{Value, json};

const SECRET: &str = "test-secret";

const CONFIG: &str = r#"
schema: |
  enum Role { ADMIN USER }
  type User { _id: ID, name: String, age: Int, role: Role }
  type Post { _id: ID, title: String, author_id: ID, published: Boolean }
  type Audit { _id: ID, action: String }
  type Locked { _id: ID }
jwt:
  secret: test-secret
types:
  User:
    collection: users
  Post:
    collection: posts
    permissions:
      - expression: "args.where.published.eq == true || jwt.role == 'admin'"
  Audit:
    collection: audits
    permissions:
      - expression: "jwt.role == 'admin'"
  Locked:
    collection: locked
    permissions:
      - expression: "false"
relations:
  - from: User
    to: Post
    relation_type: to_many
    field: posts
    where:
      author_id:
        eq: ${{ parent._id }}
  - from: Post
    to: User
    relation_type: to_one
    field: author
    where:
      _id:
        eq: ${{ parent.author_id }}
"#;

fn seeded_store() -> InMemoryStore {
    let store = InMemoryStore::new();
    let users = (0..10).map(|i| {
        json!({
            "_id": format!("u{}", i),
            "name": format!("user{}", i),
            "age": 20 + i,
            "role": if i == 0 { "ADMIN" } else { "USER" },
        })
    });
    store.insert_many("users", users).expect("insert users");
    store
        .insert_many(
            "posts",
            vec![
                json!({"_id": "p1", "title": "First", "author_id": "u1", "published": true}),
                json!({"_id": "p2", "title": "Second", "author_id": "u1", "published": false}),
                json!({"_id": "p3", "title": "Third", "author_id": "u2", "published": true}),
            ],
        )
        .expect("insert posts");
    store
        .insert("audits", json!({"_id": "a1", "action": "login"}))
        .expect("insert audit");
    store
        .insert("locked", json!({"_id": "l1"}))
        .expect("insert locked");
    store
}

fn create_test_server_with(config: &str, store: InMemoryStore) -> TestServer {
    let config = MongokeConfig::from_yaml_str(config).expect("config should parse");
    let app = ServerBuilder::new()
        .with_config(config)
        .with_store(store)
        .build()
        .expect("Failed to build app");
    TestServer::new(app)
}

fn create_test_server() -> TestServer {
    create_test_server_with(CONFIG, seeded_store())
}

fn token(claims: Value) -> String {
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("encode token")
}

fn bearer(token: &str) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("authorization"),
        HeaderValue::from_str(&format!("Bearer {}", token)).expect("header value"),
    )
}

async fn query(server: &TestServer, query: &str) -> Value {
    let response = server.post("/graphql").json(&json!({ "query": query })).await;
    response.assert_status_ok();
    response.json()
}

// =============================================================================
// Health and Schema
// =============================================================================

mod health_tests {
    use super::*;

    #[tokio::test]
    async fn test_health_endpoint() {
        let server = create_test_server();

        let response = server.get("/health").await;
        response.assert_status_ok();

        let body: Value = response.json();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "mongoke");
        assert_eq!(body["types"], json!(["User", "Post", "Audit", "Locked"]));
    }

    #[tokio::test]
    async fn test_schema_endpoint() {
        let server = create_test_server();

        let response = server.get("/graphql/schema").await;
        response.assert_status_ok();

        let sdl = response.text();
        assert!(sdl.contains("type UserConnection"));
        assert!(sdl.contains("input UserWhere"));
        assert!(sdl.contains("UserNodes(where: UserWhere"));
        assert!(sdl.contains("extend type User"));
    }

    #[tokio::test]
    async fn test_playground_endpoint() {
        let server = create_test_server();

        let response = server.get("/graphql/playground").await;
        response.assert_status_ok();
        assert!(response.text().contains("/graphql"));
    }
}

// =============================================================================
// Singular and Plural Fields
// =============================================================================

mod query_tests {
    use super::*;

    #[tokio::test]
    async fn test_singular_on_empty_store_is_null() {
        let server = create_test_server_with(CONFIG, InMemoryStore::new());

        let body = query(&server, "{ User { name age } }").await;
        assert_eq!(body, json!({"data": {"User": null}}));
    }

    #[tokio::test]
    async fn test_singular_with_where() {
        let server = create_test_server();

        let body = query(&server, r#"{ User(where: {name: {eq: "user3"}}) { _id age } }"#).await;
        assert_eq!(body, json!({"data": {"User": {"_id": "u3", "age": 23}}}));
    }

    #[tokio::test]
    async fn test_where_operators_and_or() {
        let server = create_test_server();

        let body = query(
            &server,
            r#"{ UserNodes(where: {or: [{age: {lt: 21}}, {age: {gte: 28}}], role: {nin: [ADMIN]}}) { nodes { _id } } }"#,
        )
        .await;
        assert_eq!(
            body["data"]["UserNodes"]["nodes"],
            json!([{"_id": "u8"}, {"_id": "u9"}])
        );
    }

    #[tokio::test]
    async fn test_unknown_where_field_is_field_error() {
        let server = create_test_server();

        let body = query(&server, r#"{ User(where: {email: {eq: "x"}}) { _id } }"#).await;
        assert_eq!(body["data"]["User"], Value::Null);
        assert_eq!(body["errors"][0]["extensions"]["code"], "UNKNOWN_FIELD");
        assert_eq!(body["errors"][0]["path"], json!(["User"]));
    }

    #[tokio::test]
    async fn test_variables() {
        let server = create_test_server();

        let response = server
            .post("/graphql")
            .json(&json!({
                "query": "query ByName($name: String!) { User(where: {name: {eq: $name}}) { _id } }",
                "variables": {"name": "user4"},
                "operationName": "ByName",
            }))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body, json!({"data": {"User": {"_id": "u4"}}}));
    }

    #[tokio::test]
    async fn test_parse_error() {
        let server = create_test_server();

        let body = query(&server, "{ User { ").await;
        assert!(body.get("data").is_none());
        assert_eq!(body["errors"][0]["extensions"]["code"], "GRAPHQL_PARSE_ERROR");
    }

    #[tokio::test]
    async fn test_cyclic_fragment_is_rejected() {
        let server = create_test_server();

        let body = query(&server, "{ User { ...A } } fragment A on User { name ...A }").await;
        assert!(body.get("data").is_none());
        assert_eq!(body["errors"][0]["extensions"]["code"], "GRAPHQL_INVALID_OPERATION");

        let body = query(&server, "{ User { _id } }").await;
        assert!(body["errors"].is_null());
    }

    #[tokio::test]
    async fn test_invalid_body() {
        let server = create_test_server();

        let response = server
            .post("/graphql")
            .json(&json!({ "variables": {} }))
            .expect_failure()
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["code"], "INVALID_BODY");
    }
}

// =============================================================================
// Pagination
// =============================================================================

mod pagination_tests {
    use super::*;

    const PAGE: &str = "edges { cursor } pageInfo { hasNextPage hasPreviousPage startCursor endCursor }";

    fn cursors(body: &Value) -> Vec<String> {
        body["data"]["UserNodes"]["edges"]
            .as_array()
            .expect("edges")
            .iter()
            .map(|edge| edge["cursor"].as_str().expect("cursor").to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_first_page_has_next() {
        let server = create_test_server();

        let body = query(&server, &format!("{{ UserNodes(first: 5) {{ {} }} }}", PAGE)).await;
        assert_eq!(cursors(&body), vec!["u0", "u1", "u2", "u3", "u4"]);
        assert_eq!(
            body["data"]["UserNodes"]["pageInfo"],
            json!({"hasNextPage": true, "hasPreviousPage": false, "startCursor": "u0", "endCursor": "u4"})
        );
    }

    #[tokio::test]
    async fn test_forward_after_cursor() {
        let server = create_test_server();

        let body = query(
            &server,
            &format!(r#"{{ UserNodes(first: 10, after: "u6") {{ {} }} }}"#, PAGE),
        )
        .await;
        assert_eq!(cursors(&body), vec!["u7", "u8", "u9"]);
        assert_eq!(body["data"]["UserNodes"]["pageInfo"]["hasNextPage"], false);
        assert_eq!(body["data"]["UserNodes"]["pageInfo"]["hasPreviousPage"], true);
    }

    #[tokio::test]
    async fn test_backward_before_cursor() {
        let server = create_test_server();

        let body = query(
            &server,
            &format!(r#"{{ UserNodes(last: 3, before: "u5") {{ {} }} }}"#, PAGE),
        )
        .await;
        assert_eq!(cursors(&body), vec!["u2", "u3", "u4"]);
        assert_eq!(body["data"]["UserNodes"]["pageInfo"]["hasPreviousPage"], true);
        assert_eq!(body["data"]["UserNodes"]["pageInfo"]["hasNextPage"], true);
    }

    #[tokio::test]
    async fn test_descending_on_int_cursor_field() {
        let server = create_test_server();

        let body = query(
            &server,
            r#"{ UserNodes(first: 2, after: "27", direction: DESC, cursorField: age) { edges { cursor node { _id } } } }"#,
        )
        .await;
        assert_eq!(
            body["data"]["UserNodes"]["edges"],
            json!([
                {"cursor": "26", "node": {"_id": "u6"}},
                {"cursor": "25", "node": {"_id": "u5"}}
            ])
        );
    }

    #[tokio::test]
    async fn test_conflicting_counts_is_field_error() {
        let server = create_test_server();

        let body = query(&server, "{ UserNodes(first: 1, last: 1) { nodes { _id } } }").await;
        assert_eq!(body["data"]["UserNodes"], Value::Null);
        assert_eq!(body["errors"][0]["extensions"]["code"], "INVALID_PAGINATION");
        assert_eq!(
            body["errors"][0]["message"],
            "cannot use `first` and `last` together"
        );
    }

    #[tokio::test]
    async fn test_page_size_is_capped() {
        let store = InMemoryStore::new();
        store
            .insert_many(
                "users",
                (0..60).map(|i| json!({"_id": format!("u{:02}", i), "age": i})),
            )
            .expect("insert");
        let server = create_test_server_with(CONFIG, store);

        let body = query(&server, "{ UserNodes(first: 100) { nodes { _id } pageInfo { hasNextPage } } }").await;
        assert_eq!(
            body["data"]["UserNodes"]["nodes"].as_array().map(Vec::len),
            Some(40)
        );
        assert_eq!(body["data"]["UserNodes"]["pageInfo"]["hasNextPage"], true);
    }
}

// =============================================================================
// Relations
// =============================================================================

mod relation_tests {
    use super::*;

    #[tokio::test]
    async fn test_to_many_and_to_one() {
        let server = create_test_server();
        let admin = token(json!({"role": "admin"}));
        let (name, value) = bearer(&admin);

        let response = server
            .post("/graphql")
            .add_header(name, value)
            .json(&json!({
                "query": r#"{ User(where: {_id: {eq: "u1"}}) { name posts { nodes { title author { name } } } } }"#
            }))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(
            body,
            json!({"data": {"User": {
                "name": "user1",
                "posts": {"nodes": [
                    {"title": "First", "author": {"name": "user1"}},
                    {"title": "Second", "author": {"name": "user1"}}
                ]}
            }}})
        );
    }

    #[tokio::test]
    async fn test_relation_arguments_narrow_results() {
        let server = create_test_server();

        let body = query(
            &server,
            r#"{ User(where: {_id: {eq: "u1"}}) { posts(where: {published: {eq: true}}) { nodes { _id } } } }"#,
        )
        .await;
        assert_eq!(
            body["data"]["User"]["posts"]["nodes"],
            json!([{"_id": "p1"}])
        );
    }

    #[tokio::test]
    async fn test_relation_guard_denial_yields_empty_connection() {
        let server = create_test_server();

        let body = query(
            &server,
            r#"{ User(where: {_id: {eq: "u1"}}) { posts { nodes { _id } pageInfo { hasNextPage } } } }"#,
        )
        .await;
        assert_eq!(
            body["data"]["User"]["posts"],
            json!({"nodes": [], "pageInfo": {"hasNextPage": false}})
        );
        assert!(body.get("errors").is_none());
    }
}

// =============================================================================
// Guards and Bearer Tokens
// =============================================================================

mod auth_tests {
    use super::*;

    #[tokio::test]
    async fn test_false_guard_is_asymmetric() {
        let server = create_test_server();

        let body = query(&server, "{ Locked { _id } LockedNodes { nodes { _id } } }").await;
        assert_eq!(body["data"]["Locked"], Value::Null);
        assert_eq!(body["data"]["LockedNodes"], json!({"nodes": []}));
        let errors = body["errors"].as_array().expect("errors");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0]["extensions"]["code"], "FORBIDDEN");
        assert_eq!(errors[0]["path"], json!(["Locked"]));
    }

    #[tokio::test]
    async fn test_claims_unlock_guarded_type() {
        let server = create_test_server();
        let admin = token(json!({"sub": "u0", "role": "admin"}));
        let (name, value) = bearer(&admin);

        let response = server
            .post("/graphql")
            .add_header(name, value)
            .json(&json!({ "query": "{ Audit { action } }" }))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body, json!({"data": {"Audit": {"action": "login"}}}));
    }

    #[tokio::test]
    async fn test_wrong_role_is_denied() {
        let server = create_test_server();
        let user = token(json!({"role": "user"}));
        let (name, value) = bearer(&user);

        let response = server
            .post("/graphql")
            .add_header(name, value)
            .json(&json!({ "query": "{ Audit { action } }" }))
            .await;
        let body: Value = response.json();
        assert_eq!(body["data"]["Audit"], Value::Null);
        assert_eq!(body["errors"][0]["extensions"]["code"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn test_guard_reads_arguments() {
        let server = create_test_server();

        let body = query(&server, "{ PostNodes(where: {published: {eq: true}}) { nodes { _id } } }").await;
        assert_eq!(
            body["data"]["PostNodes"]["nodes"],
            json!([{"_id": "p1"}, {"_id": "p3"}])
        );

        let body = query(&server, "{ PostNodes { nodes { _id } } }").await;
        assert_eq!(body["data"]["PostNodes"]["nodes"], json!([]));
    }

    #[tokio::test]
    async fn test_invalid_token_is_unauthorized() {
        let server = create_test_server();
        let (name, value) = bearer("not-a-jwt");

        let response = server
            .post("/graphql")
            .add_header(name, value)
            .json(&json!({ "query": "{ User { _id } }" }))
            .expect_failure()
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);
        let body: Value = response.json();
        assert_eq!(body["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_token_signed_with_other_secret_is_unauthorized() {
        let server = create_test_server();
        let forged = encode(
            &Header::default(),
            &json!({"role": "admin"}),
            &EncodingKey::from_secret(b"other-secret"),
        )
        .expect("encode token");
        let (name, value) = bearer(&forged);

        let response = server
            .post("/graphql")
            .add_header(name, value)
            .json(&json!({ "query": "{ Audit { _id } }" }))
            .expect_failure()
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_required_token() {
        let config = CONFIG.replace("jwt:\n  secret: test-secret", "jwt:\n  secret: test-secret\n  required: true");
        let server = create_test_server_with(&config, seeded_store());

        let response = server
            .post("/graphql")
            .json(&json!({ "query": "{ User { _id } }" }))
            .expect_failure()
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);

        let (name, value) = bearer(&token(json!({"role": "user"})));
        let response = server
            .post("/graphql")
            .add_header(name, value)
            .json(&json!({ "query": "{ User { _id } }" }))
            .await;
        response.assert_status_ok();
    }
}
