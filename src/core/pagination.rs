//! Cursor pagination engine
//!
//! A page is produced with a single bounded over-fetch: the engine asks the
//! store for one record more than the page size and uses that extra record to
//! decide whether another page exists in the traversal direction.
//!
//! Backward pages (`last`/`before`) are fetched in the inverse of the
//! requested order so that the records nearest to the cursor come first, and
//! are reversed again before the edges are built.

use crate::core::error::{ArgumentError, MongokeError};
use crate::core::filter::{Filter, Operator};
use crate::core::schema::ScalarKind;
use crate::core::store::{Deadline, Document, DocumentStore};
use serde::Serialize;
use serde_json::{Number, Value};

/// Page size used when the caller gives neither `first` nor `last`
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Hard ceiling on a page, whatever the caller asks for
pub const MAX_PAGE_SIZE: u32 = 40;

/// Ordering of the cursor field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "ASC" => Some(Direction::Asc),
            "DESC" => Some(Direction::Desc),
            _ => None,
        }
    }

    /// Store-level sort constant (1 / -1)
    pub fn as_i32(&self) -> i32 {
        match self {
            Direction::Asc => 1,
            Direction::Desc => -1,
        }
    }

    pub fn inverse(&self) -> Self {
        match self {
            Direction::Asc => Direction::Desc,
            Direction::Desc => Direction::Asc,
        }
    }
}

/// Sort key handed to the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sort {
    pub field: String,
    pub direction: Direction,
}

/// Windowing controls of a plural field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationRequest {
    pub first: Option<u32>,
    pub last: Option<u32>,
    pub after: Option<String>,
    pub before: Option<String>,
    pub direction: Direction,
    pub cursor_field: String,
}

impl PaginationRequest {
    pub fn new(cursor_field: impl Into<String>) -> Self {
        Self {
            first: None,
            last: None,
            after: None,
            before: None,
            direction: Direction::Asc,
            cursor_field: cursor_field.into(),
        }
    }

    fn first_count(&self) -> u32 {
        self.first.unwrap_or(0)
    }

    fn last_count(&self) -> u32 {
        self.last.unwrap_or(0)
    }

    /// Check the mutually exclusive argument combinations
    pub fn validate(&self) -> Result<(), ArgumentError> {
        let (first, last) = (self.first_count(), self.last_count());
        if first != 0 && last != 0 {
            return Err(ArgumentError::ConflictingCounts);
        }
        if self.after.is_some() && first == 0 && self.before.is_none() {
            return Err(ArgumentError::AfterWithoutFirstOrBefore);
        }
        if self.before.is_some() && last == 0 && self.after.is_none() {
            return Err(ArgumentError::BeforeWithoutLastOrAfter);
        }
        Ok(())
    }
}

/// Everything the engine needs to issue and post-process one fetch
#[derive(Debug, Clone, PartialEq)]
pub struct FetchPlan {
    pub filter: Filter,
    pub sort: Sort,
    /// Page size plus the existence probe
    pub limit: u64,
    pub page_size: usize,
    pub backward: bool,
    /// Whether `after` or `before` was supplied
    pub bounded: bool,
    pub cursor_field: String,
}

/// Compute the fetch window for a validated request
pub fn plan_fetch(
    mut filter: Filter,
    request: &PaginationRequest,
    cursor_kind: Option<ScalarKind>,
) -> Result<FetchPlan, ArgumentError> {
    request.validate()?;

    let (mut first, mut last) = (request.first_count(), request.last_count());
    if first == 0 && last == 0 {
        if request.after.is_some() {
            first = DEFAULT_PAGE_SIZE;
        } else if request.before.is_some() {
            last = DEFAULT_PAGE_SIZE;
        } else {
            first = DEFAULT_PAGE_SIZE;
        }
    }
    let backward = first == 0 && last != 0;

    let (after_op, before_op) = match request.direction {
        Direction::Asc => (Operator::Gt, Operator::Lt),
        Direction::Desc => (Operator::Lt, Operator::Gt),
    };
    let field = request.cursor_field.as_str();
    if let Some(after) = &request.after {
        filter = bound(filter, field, after_op, cursor_value(after, field, cursor_kind)?);
    }
    if let Some(before) = &request.before {
        filter = bound(filter, field, before_op, cursor_value(before, field, cursor_kind)?);
    }

    let sort = Sort {
        field: field.to_string(),
        direction: if backward {
            request.direction.inverse()
        } else {
            request.direction
        },
    };

    let requested = if backward { last } else { first };
    let page_size = requested.min(MAX_PAGE_SIZE);

    Ok(FetchPlan {
        filter,
        sort,
        limit: u64::from(page_size) + 1,
        page_size: page_size as usize,
        backward,
        bounded: request.after.is_some() || request.before.is_some(),
        cursor_field: field.to_string(),
    })
}

/// Add a cursor bound, keeping any bound the caller already put on the field
fn bound(mut filter: Filter, field: &str, op: Operator, value: Value) -> Filter {
    if filter.field(field).is_some_and(|ops| ops.get(op).is_some()) {
        let mut cursor = Filter::default();
        cursor.constrain(field, op, value);
        return filter.and_with(cursor);
    }
    filter.constrain(field, op, value);
    filter
}

/// Read an opaque cursor back as a value of the cursor field's type
fn cursor_value(
    cursor: &str,
    field: &str,
    kind: Option<ScalarKind>,
) -> Result<Value, ArgumentError> {
    let invalid = || ArgumentError::InvalidCursor {
        cursor: cursor.to_string(),
        cursor_field: field.to_string(),
    };
    match kind {
        Some(ScalarKind::Int) => cursor
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| invalid()),
        Some(ScalarKind::Float) => cursor
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(invalid),
        _ => Ok(Value::String(cursor.to_string())),
    }
}

/// String form of a node's cursor field
pub fn cursor_of(node: &Document, cursor_field: &str) -> String {
    match node.get(cursor_field) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Flags describing the neighbourhood of a page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

/// A cursor and the node it points to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Edge {
    pub cursor: String,
    pub node: Document,
}

/// A page of results
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub edges: Vec<Edge>,
    pub page_info: PageInfo,
}

impl Connection {
    /// Zero edges, both page flags false
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Document> {
        self.edges.iter().map(|edge| &edge.node)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Turn a raw over-fetched batch into a page
pub fn assemble(plan: &FetchPlan, mut records: Vec<Document>) -> Connection {
    let has_more = records.len() > plan.page_size;
    records.truncate(plan.page_size);
    if plan.backward {
        records.reverse();
    }

    let (has_next_page, has_previous_page) = if plan.backward {
        (plan.bounded, has_more)
    } else {
        (has_more, plan.bounded)
    };

    let edges: Vec<Edge> = records
        .into_iter()
        .map(|node| Edge {
            cursor: cursor_of(&node, &plan.cursor_field),
            node,
        })
        .collect();

    let page_info = PageInfo {
        has_next_page,
        has_previous_page,
        start_cursor: edges.first().map(|e| e.cursor.clone()),
        end_cursor: edges.last().map(|e| e.cursor.clone()),
    };

    Connection { edges, page_info }
}

/// Fetch one page of `collection`
pub async fn paginate(
    store: &dyn DocumentStore,
    collection: &str,
    filter: Filter,
    request: &PaginationRequest,
    cursor_kind: Option<ScalarKind>,
    deadline: Deadline,
) -> Result<Connection, MongokeError> {
    let plan = plan_fetch(filter, request, cursor_kind)?;
    tracing::debug!(
        collection,
        limit = plan.limit,
        sort_field = %plan.sort.field,
        sort_direction = plan.sort.direction.as_i32(),
        "fetching page"
    );

    let records = deadline
        .run(
            "find_many",
            store.find_many(collection, &plan.filter, &plan.sort, plan.limit, deadline),
        )
        .await
        .inspect_err(|e| tracing::error!(collection, error = %e, "find_many failed"))?;

    Ok(assemble(&plan, records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::QUERY_TIMEOUT;
    use crate::storage::in_memory::InMemoryStore;
    use serde_json::json;

    fn request() -> PaginationRequest {
        PaginationRequest::new("_id")
    }

    async fn store_with_ids(n: usize) -> InMemoryStore {
        let store = InMemoryStore::new();
        for i in 0..n {
            store
                .insert("users", json!({"_id": format!("{:02}", i), "age": i}))
                .expect("insert");
        }
        store
    }

    fn ids(connection: &Connection) -> Vec<String> {
        connection.edges.iter().map(|e| e.cursor.clone()).collect()
    }

    #[test]
    fn test_validate_conflicting_counts() {
        let req = PaginationRequest {
            first: Some(3),
            last: Some(2),
            ..request()
        };
        assert_eq!(req.validate(), Err(ArgumentError::ConflictingCounts));
    }

    #[test]
    fn test_validate_after_needs_first_or_before() {
        let req = PaginationRequest {
            after: Some("x".into()),
            ..request()
        };
        assert_eq!(req.validate(), Err(ArgumentError::AfterWithoutFirstOrBefore));

        let req = PaginationRequest {
            after: Some("x".into()),
            last: Some(3),
            ..request()
        };
        assert_eq!(req.validate(), Err(ArgumentError::AfterWithoutFirstOrBefore));
    }

    #[test]
    fn test_cursor_bound_keeps_caller_bound() {
        let mut filter = Filter::default();
        filter.constrain("_id", Operator::Gt, json!("05"));
        let req = PaginationRequest {
            first: Some(2),
            after: Some("02".into()),
            ..request()
        };
        let plan = plan_fetch(filter, &req, Some(ScalarKind::Id)).expect("plan");
        assert_eq!(
            serde_json::to_value(&plan.filter).expect("serialize"),
            json!({"and": [{"_id": {"gt": "05"}}, {"_id": {"gt": "02"}}]})
        );
    }

    #[test]
    fn test_validate_before_needs_last_or_after() {
        let req = PaginationRequest {
            before: Some("x".into()),
            ..request()
        };
        assert_eq!(req.validate(), Err(ArgumentError::BeforeWithoutLastOrAfter));
    }

    #[test]
    fn test_validate_zero_counts_are_absent() {
        let req = PaginationRequest {
            first: Some(0),
            last: Some(5),
            before: Some("x".into()),
            ..request()
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_plan_defaults_to_first_page() {
        let plan = plan_fetch(Filter::default(), &request(), None).expect("plan");
        assert_eq!(plan.limit, u64::from(DEFAULT_PAGE_SIZE) + 1);
        assert!(!plan.backward);
        assert!(!plan.bounded);
        assert_eq!(plan.sort.direction, Direction::Asc);
    }

    #[test]
    fn test_plan_after_and_before_defaults_forward() {
        let req = PaginationRequest {
            after: Some("a".into()),
            before: Some("z".into()),
            ..request()
        };
        let plan = plan_fetch(Filter::default(), &req, None).expect("plan");
        assert!(!plan.backward);
        assert_eq!(plan.page_size, DEFAULT_PAGE_SIZE as usize);
        let bound = plan.filter.field("_id").expect("cursor bound");
        assert_eq!(bound.gt, Some(json!("a")));
        assert_eq!(bound.lt, Some(json!("z")));
    }

    #[test]
    fn test_plan_limit_is_capped() {
        let req = PaginationRequest {
            first: Some(1000),
            ..request()
        };
        let plan = plan_fetch(Filter::default(), &req, None).expect("plan");
        assert_eq!(plan.limit, u64::from(MAX_PAGE_SIZE) + 1);
    }

    #[test]
    fn test_plan_first_after_bound() {
        let req = PaginationRequest {
            first: Some(10),
            after: Some("xxx".into()),
            ..request()
        };
        let plan = plan_fetch(Filter::default(), &req, None).expect("plan");
        assert_eq!(plan.limit, 11);
        assert_eq!(plan.filter.field("_id").and_then(|f| f.gt.clone()), Some(json!("xxx")));
    }

    #[test]
    fn test_plan_desc_flips_bounds() {
        let req = PaginationRequest {
            first: Some(5),
            after: Some("m".into()),
            direction: Direction::Desc,
            ..request()
        };
        let plan = plan_fetch(Filter::default(), &req, None).expect("plan");
        let bound = plan.filter.field("_id").expect("bound");
        assert_eq!(bound.lt, Some(json!("m")));
        assert!(bound.gt.is_none());
        assert_eq!(plan.sort.direction, Direction::Desc);
    }

    #[test]
    fn test_plan_backward_inverts_sort() {
        let req = PaginationRequest {
            last: Some(5),
            before: Some("m".into()),
            ..request()
        };
        let plan = plan_fetch(Filter::default(), &req, None).expect("plan");
        assert!(plan.backward);
        assert_eq!(plan.sort.direction, Direction::Desc);
        assert_eq!(plan.filter.field("_id").and_then(|f| f.lt.clone()), Some(json!("m")));
    }

    #[test]
    fn test_plan_typed_cursor() {
        let req = PaginationRequest {
            first: Some(5),
            after: Some("7".into()),
            cursor_field: "age".into(),
            ..request()
        };
        let plan = plan_fetch(Filter::default(), &req, Some(ScalarKind::Int)).expect("plan");
        assert_eq!(plan.filter.field("age").and_then(|f| f.gt.clone()), Some(json!(7)));

        let req = PaginationRequest {
            after: Some("seven".into()),
            ..req
        };
        let err = plan_fetch(Filter::default(), &req, Some(ScalarKind::Int)).expect_err("bad");
        assert!(matches!(err, ArgumentError::InvalidCursor { .. }));
    }

    #[tokio::test]
    async fn test_first_five_of_ten() {
        let store = store_with_ids(10).await;
        let req = PaginationRequest {
            first: Some(5),
            ..request()
        };
        let page = paginate(
            &store,
            "users",
            Filter::default(),
            &req,
            None,
            Deadline::after(QUERY_TIMEOUT),
        )
        .await
        .expect("page");

        assert_eq!(ids(&page), vec!["00", "01", "02", "03", "04"]);
        assert!(page.page_info.has_next_page);
        assert!(!page.page_info.has_previous_page);
        assert_eq!(page.page_info.start_cursor.as_deref(), Some("00"));
        assert_eq!(page.page_info.end_cursor.as_deref(), Some("04"));
    }

    #[tokio::test]
    async fn test_forward_continuation_marks_previous() {
        let store = store_with_ids(10).await;
        let req = PaginationRequest {
            first: Some(5),
            after: Some("04".into()),
            ..request()
        };
        let page = paginate(
            &store,
            "users",
            Filter::default(),
            &req,
            None,
            Deadline::after(QUERY_TIMEOUT),
        )
        .await
        .expect("page");

        assert_eq!(ids(&page), vec!["05", "06", "07", "08", "09"]);
        assert!(!page.page_info.has_next_page);
        assert!(page.page_info.has_previous_page);
    }

    #[tokio::test]
    async fn test_backward_page_restores_order() {
        let store = store_with_ids(10).await;
        let req = PaginationRequest {
            last: Some(3),
            before: Some("05".into()),
            ..request()
        };
        let page = paginate(
            &store,
            "users",
            Filter::default(),
            &req,
            None,
            Deadline::after(QUERY_TIMEOUT),
        )
        .await
        .expect("page");

        assert_eq!(ids(&page), vec!["02", "03", "04"]);
        assert!(page.page_info.has_previous_page);
        assert!(page.page_info.has_next_page);
    }

    #[tokio::test]
    async fn test_desc_direction() {
        let store = store_with_ids(4).await;
        let req = PaginationRequest {
            first: Some(2),
            direction: Direction::Desc,
            ..request()
        };
        let page = paginate(
            &store,
            "users",
            Filter::default(),
            &req,
            None,
            Deadline::after(QUERY_TIMEOUT),
        )
        .await
        .expect("page");

        assert_eq!(ids(&page), vec!["03", "02"]);
        assert!(page.page_info.has_next_page);
    }

    #[tokio::test]
    async fn test_desc_backward_page() {
        let store = store_with_ids(10).await;
        let req = PaginationRequest {
            last: Some(3),
            before: Some("05".into()),
            direction: Direction::Desc,
            ..request()
        };
        let page = paginate(
            &store,
            "users",
            Filter::default(),
            &req,
            None,
            Deadline::after(QUERY_TIMEOUT),
        )
        .await
        .expect("page");

        assert_eq!(ids(&page), vec!["08", "07", "06"]);
        assert!(page.page_info.has_previous_page);
        assert!(page.page_info.has_next_page);
    }

    #[tokio::test]
    async fn test_page_never_exceeds_ceiling() {
        let store = store_with_ids(60).await;
        let req = PaginationRequest {
            first: Some(100),
            ..request()
        };
        let page = paginate(
            &store,
            "users",
            Filter::default(),
            &req,
            None,
            Deadline::after(QUERY_TIMEOUT),
        )
        .await
        .expect("page");

        assert_eq!(page.len(), MAX_PAGE_SIZE as usize);
        assert!(page.page_info.has_next_page);
    }

    #[test]
    fn test_cursor_of_node() {
        let node = json!({"_id": "abc", "age": 4, "ok": true, "nested": {"a": 1}})
            .as_object()
            .cloned()
            .expect("object");
        assert_eq!(cursor_of(&node, "_id"), "abc");
        assert_eq!(cursor_of(&node, "age"), "4");
        assert_eq!(cursor_of(&node, "ok"), "true");
        assert_eq!(cursor_of(&node, "nested"), r#"{"a":1}"#);
        assert_eq!(cursor_of(&node, "missing"), "");
    }

    #[test]
    fn test_empty_connection_flags() {
        let empty = Connection::empty();
        assert!(empty.is_empty());
        assert!(!empty.page_info.has_next_page);
        assert!(!empty.page_info.has_previous_page);
    }
}
