use pretty_assertions::assert_eq;
use quarry::{QueryEvent, QueryInterpreter, QueryPlanNode};
use quarry_core::driver::{ColumnType, Provider, ResultSet, SqlQuery};
use quarry_core::{DriverErrorKind, Error, Value};
use serde_json::{json, Map};
use std::sync::{Arc, Mutex};
use tests::{find_user_plan, init_tracing, param, users, DriverOp, ExecLog, LoggingDriver, Target};

fn plan(value: Value) -> QueryPlanNode {
    serde_json::from_value(value).unwrap()
}

fn bindings(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("bindings must be an object"),
    }
}

fn value(value: Value) -> Value {
    json!({ "type": "value", "args": value })
}

fn get(name: &str) -> Value {
    json!({ "type": "get", "args": { "name": name } })
}

fn raw_query(sql: &str) -> Value {
    json!({ "type": "query", "args": { "type": "rawSql", "sql": sql, "args": [] } })
}

async fn run(driver: &LoggingDriver, node: Value, vars: Value) -> quarry::Result<Value> {
    init_tracing();
    let adapter = driver.adapter().await;
    QueryInterpreter::new()
        .run(&plan(node), bindings(vars), adapter.as_queryable())
        .await
}

#[tokio::test]
async fn find_unique_renders_and_binds_parameters() {
    let driver = LoggingDriver::new(Provider::Postgres);
    driver.on_query(|_: &SqlQuery| Ok(users(&[1])));
    let mut log = ExecLog::new(driver.ops_log_handle());

    let result = run(&driver, find_user_plan(param("id")), json!({ "id": 1 }))
        .await
        .unwrap();

    assert_eq!(result, json!({ "id": 1, "email": "user1@example.com" }));

    assert_eq!(log.pop(), Some(DriverOp::Connect));
    assert_eq!(
        log.pop(),
        Some(DriverOp::Query {
            on: Target::Adapter,
            sql: "SELECT id, email FROM users WHERE id = $1".into(),
            args: vec![json!(1)],
        })
    );
    assert!(log.is_empty());
}

#[tokio::test]
async fn inner_let_shadows_outer_binding() {
    let driver = LoggingDriver::new(Provider::Postgres);

    let node = json!({
        "type": "let",
        "args": {
            "bindings": [{ "name": "x", "expr": value(json!(1)) }],
            "expr": {
                "type": "seq",
                "args": [
                    {
                        "type": "let",
                        "args": {
                            "bindings": [{ "name": "x", "expr": value(json!(2)) }],
                            "expr": get("x")
                        }
                    },
                    {
                        "type": "concat",
                        "args": [get("x"), get("outer")]
                    }
                ]
            }
        }
    });

    // The inner binding is gone once its `let` finishes.
    let result = run(&driver, node, json!({ "outer": 3 })).await.unwrap();
    assert_eq!(result, json!([1, 3]));
}

#[tokio::test]
async fn later_bindings_see_earlier_ones() {
    let driver = LoggingDriver::new(Provider::Postgres);

    let node = json!({
        "type": "let",
        "args": {
            "bindings": [
                { "name": "a", "expr": value(json!([1, 2])) },
                { "name": "b", "expr": { "type": "reverse", "args": get("a") } }
            ],
            "expr": get("b")
        }
    });

    assert_eq!(run(&driver, node, json!({})).await.unwrap(), json!([2, 1]));
}

#[tokio::test]
async fn unbound_name_is_an_error() {
    let driver = LoggingDriver::new(Provider::Postgres);

    let err = run(&driver, get("missing"), json!({})).await.unwrap_err();
    assert!(err.is_expression_evaluation_failed());
    assert!(err.to_string().contains("missing"));
}

#[tokio::test]
async fn get_first_non_empty_skips_empty_values() {
    let driver = LoggingDriver::new(Provider::Postgres);

    let node = json!({ "type": "getFirstNonEmpty", "args": { "names": ["a", "b", "c"] } });
    let result = run(&driver, node.clone(), json!({ "a": [], "b": null, "c": [7] }))
        .await
        .unwrap();
    assert_eq!(result, json!([7]));

    let result = run(&driver, node, json!({ "a": [] })).await.unwrap();
    assert_eq!(result, json!([]));
}

#[tokio::test]
async fn required_fails_on_empty_value() {
    let driver = LoggingDriver::new(Provider::Postgres);

    let node = json!({ "type": "required", "args": value(json!([])) });
    let err = run(&driver, node, json!({})).await.unwrap_err();
    assert!(err.is_record_not_found());

    let node = json!({ "type": "required", "args": value(json!([1])) });
    assert_eq!(run(&driver, node, json!({})).await.unwrap(), json!([1]));
}

#[tokio::test]
async fn unique_requires_exactly_one_row() {
    let driver = LoggingDriver::new(Provider::Postgres);
    driver.on_query(|_: &SqlQuery| Ok(users(&[1, 2])));

    let node = json!({ "type": "unique", "args": raw_query("SELECT id, email FROM users") });
    let err = run(&driver, node, json!({})).await.unwrap_err();
    assert!(err.is_too_many_records());

    driver.on_query(|_: &SqlQuery| Ok(users(&[])));
    let node = json!({ "type": "unique", "args": raw_query("SELECT id, email FROM users") });
    let err = run(&driver, node, json!({})).await.unwrap_err();
    assert!(err.is_record_not_found());
}

#[tokio::test]
async fn join_attaches_children_to_parents() {
    let driver = LoggingDriver::new(Provider::Postgres);
    driver.on_query(|query: &SqlQuery| {
        if query.sql.starts_with("SELECT id, email FROM users") {
            Ok(users(&[1, 2]))
        } else {
            Ok(ResultSet::new(
                vec![("id", ColumnType::Int64), ("authorId", ColumnType::Int64)],
                vec![vec![json!(10), json!(2)], vec![json!(11), json!(2)]],
            ))
        }
    });
    let log = ExecLog::new(driver.ops_log_handle());

    let node = json!({
        "type": "let",
        "args": {
            "bindings": [
                { "name": "users", "expr": raw_query("SELECT id, email FROM users") },
                {
                    "name": "ids",
                    "expr": { "type": "mapField", "args": { "records": get("users"), "field": "id" } }
                }
            ],
            "expr": {
                "type": "join",
                "args": {
                    "parent": get("users"),
                    "children": [{
                        "child": {
                            "type": "query",
                            "args": {
                                "type": "templateSql",
                                "fragments": [
                                    { "type": "stringChunk", "chunk": "SELECT id, authorId FROM posts WHERE authorId IN " },
                                    { "type": "parameterTuple" }
                                ],
                                "placeholderFormat": { "prefix": "$", "hasNumbering": true },
                                "args": [param("ids")]
                            }
                        },
                        "on": [["id", "authorId"]],
                        "parentField": "posts"
                    }]
                }
            }
        }
    });

    let result = run(&driver, node, json!({})).await.unwrap();
    assert_eq!(
        result,
        json!([
            { "id": 1, "email": "user1@example.com", "posts": [] },
            {
                "id": 2,
                "email": "user2@example.com",
                "posts": [{ "id": 10, "authorId": 2 }, { "id": 11, "authorId": 2 }]
            }
        ])
    );

    assert!(log
        .statements()
        .contains(&"SELECT id, authorId FROM posts WHERE authorId IN ($1,$2)".to_string()));
}

fn join_posts(parent: Value) -> Value {
    json!({
        "type": "join",
        "args": {
            "parent": parent,
            "children": [{
                "child": raw_query("SELECT id, authorId FROM posts"),
                "on": [["id", "authorId"]],
                "parentField": "posts"
            }]
        }
    })
}

#[tokio::test]
async fn join_runs_children_after_parent() {
    let driver = LoggingDriver::new(Provider::Postgres);
    driver.on_query(|query: &SqlQuery| {
        if query.sql.contains("FROM users") {
            Ok(users(&[1]))
        } else {
            Ok(ResultSet::new(
                vec![("id", ColumnType::Int64), ("authorId", ColumnType::Int64)],
                vec![vec![json!(10), json!(1)]],
            ))
        }
    });
    let log = ExecLog::new(driver.ops_log_handle());

    for _ in 0..20 {
        run(&driver, join_posts(raw_query("SELECT id, email FROM users")), json!({}))
            .await
            .unwrap();
    }

    let statements = log.statements();
    assert_eq!(statements.len(), 40);
    for pair in statements.chunks(2) {
        assert_eq!(
            pair.to_vec(),
            vec!["SELECT id, email FROM users", "SELECT id, authorId FROM posts"]
        );
    }
}

#[tokio::test]
async fn join_under_null_parent_skips_children() {
    let driver = LoggingDriver::new(Provider::Postgres);
    let log = ExecLog::new(driver.ops_log_handle());

    let result = run(&driver, join_posts(value(Value::Null)), json!({}))
        .await
        .unwrap();

    assert_eq!(result, Value::Null);
    assert!(log.statements().is_empty());
}

#[tokio::test]
async fn chunkable_statement_is_split_at_bind_limit() {
    let driver = LoggingDriver::new(Provider::Postgres);
    driver.on_query(|query: &SqlQuery| {
        let ids: Vec<i64> = query.args.iter().filter_map(Value::as_i64).collect();
        Ok(users(&ids))
    });
    let log = ExecLog::new(driver.ops_log_handle());
    let adapter = driver.adapter().await;

    let node = plan(json!({
        "type": "query",
        "args": {
            "type": "templateSql",
            "fragments": [
                { "type": "stringChunk", "chunk": "SELECT id, email FROM users WHERE id IN " },
                { "type": "parameterTuple" }
            ],
            "placeholderFormat": { "prefix": "$", "hasNumbering": true },
            "args": [param("ids")],
            "chunkable": true
        }
    }));

    let result = QueryInterpreter::new()
        .max_bind_values(Some(2))
        .run(&node, bindings(json!({ "ids": [1, 2, 3] })), adapter.as_queryable())
        .await
        .unwrap();

    assert_eq!(
        result.as_array().unwrap().len(),
        3,
        "rows of every chunk are concatenated"
    );
    assert_eq!(
        log.statements(),
        vec![
            "SELECT id, email FROM users WHERE id IN ($1,$2)",
            "SELECT id, email FROM users WHERE id IN ($1)",
        ]
    );
}

#[tokio::test]
async fn sum_of_affected_rows() {
    let driver = LoggingDriver::new(Provider::Mysql);
    driver.on_execute(|_: &SqlQuery| Ok(2));

    let execute = |sql: &str| json!({ "type": "execute", "args": { "type": "rawSql", "sql": sql } });
    let node = json!({
        "type": "sum",
        "args": [execute("DELETE FROM posts"), execute("DELETE FROM users")]
    });

    assert_eq!(run(&driver, node, json!({})).await.unwrap(), json!(4));
}

#[tokio::test]
async fn driver_errors_become_known_request_errors() {
    let driver = LoggingDriver::new(Provider::Postgres);
    driver.on_execute(|_: &SqlQuery| {
        Err(Error::driver(DriverErrorKind::UniqueConstraintViolation {
            constraint: Some("users_email_key".into()),
        }))
    });

    let node = json!({
        "type": "execute",
        "args": { "type": "rawSql", "sql": "INSERT INTO users (email) VALUES ($1)", "args": ["a@b.c"] }
    });

    let err = run(&driver, node, json!({})).await.unwrap_err();
    assert!(err.is_known_request());
    assert_eq!(err.code(), Some("P2002"));
    assert!(err.to_string().contains("users_email_key"));
}

#[tokio::test]
async fn listener_sees_every_statement() {
    let driver = LoggingDriver::new(Provider::Postgres);
    driver.on_query(|_: &SqlQuery| Ok(users(&[5])));
    let adapter = driver.adapter().await;

    let events: Arc<Mutex<Vec<QueryEvent>>> = Arc::default();
    let interpreter = QueryInterpreter::new().on_query({
        let events = events.clone();
        Arc::new(move |event: &QueryEvent| events.lock().unwrap().push(event.clone()))
    });

    interpreter
        .run(
            &plan(find_user_plan(param("id"))),
            bindings(json!({ "id": 5 })),
            adapter.as_queryable(),
        )
        .await
        .unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].sql, "SELECT id, email FROM users WHERE id = $1");
    assert_eq!(events[0].params, vec![json!(5)]);
}
