use pretty_assertions::assert_eq;
use quarry::compiler::{CompileError, PanicReporter};
use quarry::transaction::TransactionOptions;
use quarry::{Engine, JsonQuery, QueryEvent, RequestOptions};
use quarry_core::driver::{Provider, SqlQuery};
use quarry_core::{DriverErrorKind, Error, Value};
use serde_json::json;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;
use tests::{
    find_user_plan, init_tracing, plan_arg, users, DriverOp, ExecLog, LoggingDriver, MockCompiler,
    Target,
};

const DATAMODEL: &str = "model User {\n  id    Int    @id\n  email String @unique\n}";

fn find_unique(id: i64) -> JsonQuery {
    serde_json::from_value(json!({
        "modelName": "User",
        "action": "findUnique",
        "query": {
            "arguments": { "where": { "id": id } },
            "selection": { "$scalars": true }
        }
    }))
    .unwrap()
}

fn respond_with_find_user(request: &Value, _: &PanicReporter) -> Result<Value, CompileError> {
    Ok(find_user_plan(plan_arg(
        &request["query"]["arguments"]["where"]["id"],
    )))
}

/// A driver whose `users` table holds every id it is asked for.
fn driver(provider: Provider) -> LoggingDriver {
    let driver = LoggingDriver::new(provider);
    driver.on_query(|query: &SqlQuery| {
        let ids: Vec<i64> = query.args.iter().filter_map(Value::as_i64).collect();
        Ok(users(&ids))
    });
    driver
}

fn engine(driver: &LoggingDriver, compiler: &MockCompiler) -> Engine {
    init_tracing();
    Engine::builder()
        .datamodel(DATAMODEL)
        .build(driver.clone(), compiler.loader())
}

#[tokio::test]
async fn request_returns_data_keyed_by_action() {
    let driver = driver(Provider::Postgres);
    let compiler = MockCompiler::new(respond_with_find_user);
    let engine = engine(&driver, &compiler);

    let response = engine
        .request(&find_unique(1), RequestOptions::default())
        .await
        .unwrap();

    assert_eq!(
        response,
        json!({ "data": { "findUnique": { "id": 1, "email": "user1@example.com" } } })
    );

    // Without plan reuse the compiler sees the literal query.
    assert_eq!(
        compiler.requests(),
        vec![serde_json::to_value(find_unique(1)).unwrap()]
    );
}

#[tokio::test]
async fn connects_on_first_request() {
    let driver = driver(Provider::Mysql);
    let compiler = MockCompiler::new(respond_with_find_user);
    let engine = engine(&driver, &compiler);

    assert!(!engine.is_connected());
    assert_eq!(driver.connects(), 0);
    assert_eq!(compiler.loads(), 0);

    engine
        .request(&find_unique(1), RequestOptions::default())
        .await
        .unwrap();

    assert!(engine.is_connected());
    assert_eq!(driver.connects(), 1);
    assert_eq!(compiler.loads(), 1);
    assert_eq!(compiler.creates(), 1);

    let params = compiler.params();
    assert_eq!(params.len(), 1);
    assert_eq!(params[0].provider, Provider::Mysql);
    assert_eq!(params[0].datamodel, DATAMODEL);
}

#[tokio::test]
async fn start_is_idempotent() {
    let driver = driver(Provider::Postgres);
    let compiler = MockCompiler::new(respond_with_find_user);
    let engine = engine(&driver, &compiler);

    engine.start().await.unwrap();
    engine.start().await.unwrap();

    assert!(engine.is_connected());
    assert_eq!(driver.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_requests_share_one_connect() {
    let driver = LoggingDriver::builder(Provider::Postgres)
        .connect_latency(Duration::from_millis(50))
        .build();
    driver.on_query(|query: &SqlQuery| {
        let ids: Vec<i64> = query.args.iter().filter_map(Value::as_i64).collect();
        Ok(users(&ids))
    });
    let compiler = MockCompiler::new(respond_with_find_user);
    let engine = engine(&driver, &compiler);

    let (q1, q2) = (find_unique(1), find_unique(2));
    let (first, second, third) = tokio::join!(
        engine.request(&q1, RequestOptions::default()),
        engine.request(&q2, RequestOptions::default()),
        engine.start(),
    );

    assert_eq!(first.unwrap()["data"]["findUnique"]["id"], json!(1));
    assert_eq!(second.unwrap()["data"]["findUnique"]["id"], json!(2));
    third.unwrap();

    assert_eq!(driver.connects(), 1);
    assert_eq!(compiler.loads(), 1);
    assert_eq!(compiler.creates(), 1);
}

#[tokio::test]
async fn stop_releases_everything_and_next_request_reconnects() {
    let driver = driver(Provider::Postgres);
    let compiler = MockCompiler::new(respond_with_find_user);
    let engine = engine(&driver, &compiler);
    let log = ExecLog::new(driver.ops_log_handle());

    engine
        .request(&find_unique(1), RequestOptions::default())
        .await
        .unwrap();
    engine.stop().await.unwrap();

    assert!(!engine.is_connected());
    assert_eq!(compiler.frees(), 1);
    assert!(log.any(|op| matches!(op, DriverOp::Dispose)));

    // Stopping twice is harmless.
    engine.stop().await.unwrap();
    assert_eq!(log.count(|op| matches!(op, DriverOp::Dispose)), 1);

    engine
        .request(&find_unique(2), RequestOptions::default())
        .await
        .unwrap();

    assert!(engine.is_connected());
    assert_eq!(driver.connects(), 2);
    assert_eq!(compiler.creates(), 2);
    // The compiler module is loaded once for the engine's lifetime.
    assert_eq!(compiler.loads(), 1);
}

#[tokio::test]
async fn compiler_panic_discards_instance_and_disconnects() {
    let driver = driver(Provider::Postgres);
    let compiler = MockCompiler::new(|_: &Value, _: &PanicReporter| -> Result<Value, CompileError> {
        panic!("unreachable code in query graph builder")
    });
    let engine = engine(&driver, &compiler);
    let log = ExecLog::new(driver.ops_log_handle());

    let err = engine
        .request(&find_unique(1), RequestOptions::default())
        .await
        .unwrap_err();

    assert!(err.is_panic());
    assert!(err.to_string().contains("unreachable code in query graph builder"));
    assert!(!engine.is_connected());
    // A panicked instance is never freed.
    assert_eq!(compiler.frees(), 0);
    assert!(log.any(|op| matches!(op, DriverOp::Dispose)));

    compiler.on_compile(respond_with_find_user);
    let response = engine
        .request(&find_unique(1), RequestOptions::default())
        .await
        .unwrap();

    assert_eq!(response["data"]["findUnique"]["id"], json!(1));
    assert_eq!(driver.connects(), 2);
    assert_eq!(compiler.creates(), 2);
}

#[tokio::test]
async fn reported_panic_is_treated_like_an_unwind() {
    let driver = driver(Provider::Postgres);
    let compiler = MockCompiler::new(|_: &Value, panics: &PanicReporter| {
        panics.report("RuntimeError: unreachable");
        Err(CompileError::new("aborted"))
    });
    let engine = engine(&driver, &compiler);

    let err = engine
        .request(&find_unique(1), RequestOptions::default())
        .await
        .unwrap_err();

    assert!(err.is_panic());
    assert!(err.to_string().contains("RuntimeError: unreachable"));
    assert!(!engine.is_connected());
    assert_eq!(compiler.frees(), 0);
}

#[tokio::test]
async fn compile_errors_keep_the_connection() {
    let driver = driver(Provider::Postgres);
    let compiler = MockCompiler::new(|_: &Value, _: &PanicReporter| {
        Err(CompileError::new("Argument `where` of type UserWhereUniqueInput needs at least one argument.").with_code("P2009"))
    });
    let engine = engine(&driver, &compiler);

    let err = engine
        .request(&find_unique(1), RequestOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_known_request());
    assert_eq!(err.code(), Some("P2009"));
    assert!(engine.is_connected());

    compiler.on_compile(|_: &Value, _: &PanicReporter| Err(CompileError::new("unsupported")));
    let err = engine
        .request(&find_unique(1), RequestOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_unknown_request());
    assert_eq!(compiler.creates(), 1);
}

#[tokio::test]
async fn invalid_plan_is_an_invalid_result() {
    let driver = driver(Provider::Postgres);
    let compiler = MockCompiler::new(|_: &Value, _: &PanicReporter| Ok(json!({ "type": "teleport" })));
    let engine = engine(&driver, &compiler);

    let err = engine
        .request(&find_unique(1), RequestOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_invalid_result());
}

#[tokio::test]
async fn failed_load_is_retried_on_next_request() {
    let driver = driver(Provider::Postgres);
    let compiler = MockCompiler::new(respond_with_find_user);
    let engine = engine(&driver, &compiler);

    compiler.fail_next_load();
    let err = engine
        .request(&find_unique(1), RequestOptions::default())
        .await
        .unwrap_err();

    assert!(err.is_initialization());
    assert_eq!(err.code(), Some("P1001"));
    assert!(!engine.is_connected());
    assert_eq!(driver.connects(), 0);

    engine
        .request(&find_unique(1), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(compiler.loads(), 2);
}

#[tokio::test]
async fn failed_connect_is_an_initialization_error() {
    let driver = driver(Provider::Postgres);
    let compiler = MockCompiler::new(respond_with_find_user);
    let engine = engine(&driver, &compiler);

    driver.fail_next_connect(Error::driver(DriverErrorKind::Other {
        message: "connection refused".into(),
    }));
    let err = engine.start().await.unwrap_err();

    assert!(err.is_initialization());
    assert!(err.to_string().contains("connection refused"));
    assert!(!engine.is_connected());
    assert_eq!(compiler.creates(), 0);

    engine.start().await.unwrap();
    assert!(engine.is_connected());
    // The factory loaded by the failed attempt is reused.
    assert_eq!(compiler.loads(), 1);
}

#[tokio::test]
async fn requests_run_inside_an_interactive_transaction() {
    let driver = driver(Provider::Postgres);
    let compiler = MockCompiler::new(respond_with_find_user);
    let engine = engine(&driver, &compiler);
    let log = ExecLog::new(driver.ops_log_handle());

    let info = engine
        .start_transaction(TransactionOptions::default())
        .await
        .unwrap();

    engine
        .request(&find_unique(3), RequestOptions::in_transaction(info.clone()))
        .await
        .unwrap();
    engine.commit_transaction(&info).await.unwrap();

    assert_eq!(
        log.statements_on(Target::Transaction),
        vec![
            "BEGIN",
            "SELECT id, email FROM users WHERE id = $1",
            "COMMIT"
        ]
    );
    assert!(log.statements_on(Target::Adapter).is_empty());

    let err = engine
        .request(&find_unique(3), RequestOptions::in_transaction(info))
        .await
        .unwrap_err();
    assert!(err.is_transaction_closed());
}

#[tokio::test]
async fn stop_rolls_back_open_transactions() {
    let driver = driver(Provider::Postgres);
    let compiler = MockCompiler::new(respond_with_find_user);
    let engine = engine(&driver, &compiler);
    let log = ExecLog::new(driver.ops_log_handle());

    let info = engine
        .start_transaction(TransactionOptions::default())
        .await
        .unwrap();
    engine.stop().await.unwrap();

    assert!(log.has_rollback());
    assert!(!log.has_commit());

    let err = engine.commit_transaction(&info).await.unwrap_err();
    assert!(err.is_transaction_not_found());
}

#[tokio::test]
async fn query_listener_is_called_for_every_statement() {
    let driver = driver(Provider::Postgres);
    let compiler = MockCompiler::new(respond_with_find_user);

    let count = Arc::new(AtomicUsize::new(0));
    init_tracing();
    let engine = Engine::builder()
        .datamodel(DATAMODEL)
        .on_query({
            let count = count.clone();
            move |event: &QueryEvent| {
                assert_eq!(event.sql, "SELECT id, email FROM users WHERE id = $1");
                count.fetch_add(1, Ordering::SeqCst);
            }
        })
        .build(driver.clone(), compiler.loader());

    for id in 1..=3 {
        engine
            .request(&find_unique(id), RequestOptions::default())
            .await
            .unwrap();
    }

    assert_eq!(count.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn builder_defaults_apply_to_unset_transaction_options() {
    let driver = driver(Provider::Postgres);
    let compiler = MockCompiler::new(respond_with_find_user);
    init_tracing();
    let engine = Engine::builder()
        .max_wait(Duration::from_millis(100))
        .timeout(Duration::from_millis(300))
        .build(driver.clone(), compiler.loader());

    let info = engine
        .start_transaction(TransactionOptions::default())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    let err = engine.commit_transaction(&info).await.unwrap_err();
    assert!(err.is_transaction_execution_timeout());
    assert!(err.to_string().contains("300 ms"));

    // Explicit options win over the defaults.
    let info = engine
        .start_transaction(TransactionOptions {
            timeout: Some(Duration::from_secs(10)),
            ..Default::default()
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    engine.commit_transaction(&info).await.unwrap();
}
