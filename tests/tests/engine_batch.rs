use pretty_assertions::assert_eq;
use quarry::compiler::{CompileError, PanicReporter};
use quarry::transaction::TransactionOptions;
use quarry::{Engine, JsonBatch, RequestOptions};
use quarry_core::driver::{Provider, SqlQuery};
use quarry_core::{DriverErrorKind, Error, Value};
use serde_json::json;
use tests::{
    find_user_plan, init_tracing, param, plan_arg, users, DriverOp, ExecLog, LoggingDriver, MockCompiler,
    Target,
};

fn batch(action: &str, ids: &[i64], transaction: Option<Value>) -> JsonBatch {
    let queries: Vec<Value> = ids
        .iter()
        .map(|id| {
            json!({
                "modelName": "User",
                "action": action,
                "query": {
                    "arguments": { "where": { "id": id } },
                    "selection": { "$scalars": true }
                }
            })
        })
        .collect();

    let mut batch = json!({ "batch": queries });
    if let Some(transaction) = transaction {
        batch["transaction"] = transaction;
    }
    serde_json::from_value(batch).unwrap()
}

fn entry_id(entry: &Value) -> Value {
    plan_arg(&entry["query"]["arguments"]["where"]["id"])
}

/// One `findUnique` plan per entry.
fn multi(request: &Value, _: &PanicReporter) -> Result<Value, CompileError> {
    let plans: Vec<Value> = request["batch"]
        .as_array()
        .into_iter()
        .flatten()
        .map(|entry| find_user_plan(entry_id(entry)))
        .collect();
    Ok(json!({ "type": "multi", "plans": plans }))
}

/// All entries merged into one `IN (...)` query.
fn compacted(request: &Value, _: &PanicReporter) -> Result<Value, CompileError> {
    let entries = request["batch"].as_array().cloned().unwrap_or_default();
    let expect_non_empty = entries
        .first()
        .is_some_and(|entry| entry["action"] == "findUniqueOrThrow");
    let ids: Vec<Value> = entries.iter().map(entry_id).collect();

    Ok(json!({
        "type": "compacted",
        "plan": {
            "type": "let",
            "args": {
                "bindings": [{ "name": "ids", "expr": { "type": "value", "args": ids } }],
                "expr": {
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
                }
            }
        },
        "arguments": entries
            .iter()
            .map(|entry| json!({ "id": entry_id(entry) }))
            .collect::<Vec<_>>(),
        "nestedSelection": ["id", "email"],
        "keys": ["id"],
        "expectNonEmpty": expect_non_empty
    }))
}

/// A driver whose `users` table holds the given ids.
fn driver(provider: Provider, existing: &'static [i64]) -> LoggingDriver {
    let driver = LoggingDriver::new(provider);
    driver.on_query(move |query: &SqlQuery| {
        let ids: Vec<i64> = query
            .args
            .iter()
            .filter_map(Value::as_i64)
            .filter(|id| existing.contains(id))
            .collect();
        Ok(users(&ids))
    });
    driver
}

fn engine(driver: &LoggingDriver, compiler: &MockCompiler) -> Engine {
    init_tracing();
    Engine::builder().build(driver.clone(), compiler.loader())
}

fn user(id: i64) -> Value {
    json!({ "id": id, "email": format!("user{id}@example.com") })
}

#[tokio::test]
async fn multi_batch_runs_in_one_implicit_transaction() {
    let driver = driver(Provider::Postgres, &[1, 2]);
    let compiler = MockCompiler::new(|_: &Value, _: &PanicReporter| {
        Err(CompileError::new("single queries are not expected"))
    });
    compiler.on_compile_batch(multi);
    let engine = engine(&driver, &compiler);
    let log = ExecLog::new(driver.ops_log_handle());

    let results = engine
        .request_batch(&batch("findUnique", &[1, 2], None), RequestOptions::default())
        .await
        .unwrap();

    let results: Vec<Value> = results.into_iter().map(Result::unwrap).collect();
    assert_eq!(
        results,
        vec![
            json!({ "data": { "findUnique": user(1) } }),
            json!({ "data": { "findUnique": user(2) } }),
        ]
    );

    assert_eq!(
        log.statements_on(Target::Transaction),
        vec![
            "BEGIN",
            "SELECT id, email FROM users WHERE id = $1",
            "SELECT id, email FROM users WHERE id = $1",
            "COMMIT",
        ]
    );
    assert!(log.statements_on(Target::Adapter).is_empty());
}

#[tokio::test]
async fn failing_entry_rolls_back_the_whole_batch() {
    let driver = LoggingDriver::new(Provider::Postgres);
    driver.on_query(|query: &SqlQuery| {
        if query.args == vec![json!(2)] {
            return Err(Error::driver(DriverErrorKind::TableDoesNotExist {
                table: Some("users".into()),
            }));
        }
        Ok(users(&[1]))
    });
    let compiler = MockCompiler::new(|_: &Value, _: &PanicReporter| {
        Err(CompileError::new("single queries are not expected"))
    });
    compiler.on_compile_batch(multi);
    let engine = engine(&driver, &compiler);
    let log = ExecLog::new(driver.ops_log_handle());

    let err = engine
        .request_batch(&batch("findUnique", &[1, 2, 3], None), RequestOptions::default())
        .await
        .unwrap_err();

    assert!(err.is_known_request());
    assert_eq!(err.code(), Some("P2021"));

    // The third entry never ran.
    assert_eq!(
        log.statements_on(Target::Transaction),
        vec![
            "BEGIN",
            "SELECT id, email FROM users WHERE id = $1",
            "SELECT id, email FROM users WHERE id = $1",
            "ROLLBACK",
        ]
    );
    assert!(log.has_rollback());
    assert!(!log.has_commit());
}

#[tokio::test]
async fn batch_isolation_level_applies_to_implicit_transaction() {
    let driver = driver(Provider::Mysql, &[1]);
    let compiler = MockCompiler::new(|_: &Value, _: &PanicReporter| {
        Err(CompileError::new("single queries are not expected"))
    });
    compiler.on_compile_batch(multi);
    let engine = engine(&driver, &compiler);
    let log = ExecLog::new(driver.ops_log_handle());

    engine
        .request_batch(
            &batch(
                "findUnique",
                &[1],
                Some(json!({ "isolationLevel": "Serializable" })),
            ),
            RequestOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(
        log.statements_on(Target::Context),
        vec!["SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"]
    );
}

#[tokio::test]
async fn batch_inside_interactive_transaction_uses_it() {
    let driver = driver(Provider::Postgres, &[1, 2]);
    let compiler = MockCompiler::new(|_: &Value, _: &PanicReporter| {
        Err(CompileError::new("single queries are not expected"))
    });
    compiler.on_compile_batch(multi);
    let engine = engine(&driver, &compiler);
    let log = ExecLog::new(driver.ops_log_handle());

    let info = engine
        .start_transaction(TransactionOptions::default())
        .await
        .unwrap();

    engine
        .request_batch(
            &batch("findUnique", &[1, 2], None),
            RequestOptions::in_transaction(info.clone()),
        )
        .await
        .unwrap();

    // No transaction of its own: one BEGIN, and nothing committed yet.
    assert_eq!(
        log.statements_on(Target::Transaction),
        vec![
            "BEGIN",
            "SELECT id, email FROM users WHERE id = $1",
            "SELECT id, email FROM users WHERE id = $1",
        ]
    );

    engine.rollback_transaction(&info).await.unwrap();
    assert!(log.has_rollback());
    assert!(!log.has_commit());
}

#[tokio::test]
async fn compacted_batch_distributes_rows_to_entries() {
    let driver = driver(Provider::Postgres, &[1, 3]);
    let compiler = MockCompiler::new(|_: &Value, _: &PanicReporter| {
        Err(CompileError::new("single queries are not expected"))
    });
    compiler.on_compile_batch(compacted);
    let engine = engine(&driver, &compiler);
    let log = ExecLog::new(driver.ops_log_handle());

    let results = engine
        .request_batch(&batch("findUnique", &[3, 2, 1], None), RequestOptions::default())
        .await
        .unwrap();

    let results: Vec<Value> = results.into_iter().map(Result::unwrap).collect();
    assert_eq!(
        results,
        vec![
            json!({ "data": { "findUnique": user(3) } }),
            json!({ "data": { "findUnique": null } }),
            json!({ "data": { "findUnique": user(1) } }),
        ]
    );

    // One statement for the whole batch, outside of any transaction.
    assert_eq!(
        log.statements(),
        vec!["SELECT id, email FROM users WHERE id IN ($1,$2,$3)"]
    );
    assert!(!log.any(|op| matches!(op, DriverOp::StartTransaction)));
}

#[tokio::test]
async fn compacted_or_throw_fails_only_missing_entries() {
    let driver = driver(Provider::Postgres, &[1]);
    let compiler = MockCompiler::new(|_: &Value, _: &PanicReporter| {
        Err(CompileError::new("single queries are not expected"))
    });
    compiler.on_compile_batch(compacted);
    let engine = engine(&driver, &compiler);

    let mut results = engine
        .request_batch(&batch("findUniqueOrThrow", &[1, 2], None), RequestOptions::default())
        .await
        .unwrap()
        .into_iter();

    assert_eq!(
        results.next().unwrap().unwrap(),
        json!({ "data": { "findUniqueOrThrow": user(1) } })
    );

    let err = results.next().unwrap().unwrap_err();
    assert!(err.is_known_request());
    assert_eq!(err.code(), Some("P2025"));

    assert!(results.next().is_none());
}

#[tokio::test]
async fn plan_count_mismatch_is_an_invalid_result() {
    let driver = driver(Provider::Postgres, &[1]);
    let compiler = MockCompiler::new(|_: &Value, _: &PanicReporter| {
        Err(CompileError::new("single queries are not expected"))
    });
    compiler.on_compile_batch(|_: &Value, _: &PanicReporter| {
        Ok(json!({ "type": "multi", "plans": [] }))
    });
    let engine = engine(&driver, &compiler);

    let err = engine
        .request_batch(&batch("findUnique", &[1], None), RequestOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_invalid_result());
}
