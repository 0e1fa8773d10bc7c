//! Evaluates query plans against a driver.

mod join;
mod render;
mod scope;
mod serialize;

pub use scope::{FrameId, Scope};

use crate::plan::{DbQuery, QueryPlanNode};

use async_recursion::async_recursion;
use quarry_core::driver::{Queryable, SqlQuery};
use quarry_core::{Error, Result, Value};
use serde_json::Map;
use std::{
    fmt,
    pin::Pin,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio_stream::{Stream, StreamExt, StreamMap};

/// A statement sent to the driver.
#[derive(Debug, Clone)]
pub struct QueryEvent {
    pub sql: String,
    pub params: Vec<Value>,
    pub duration: Duration,
}

/// Callback invoked after every statement.
pub type QueryEventListener = Arc<dyn Fn(&QueryEvent) + Send + Sync>;

#[derive(Clone, Default)]
pub struct QueryInterpreter {
    on_query: Option<QueryEventListener>,
    max_bind_values: Option<usize>,
}

impl fmt::Debug for QueryInterpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryInterpreter")
            .field("on_query", &self.on_query.is_some())
            .field("max_bind_values", &self.max_bind_values)
            .finish()
    }
}

impl QueryInterpreter {
    pub fn new() -> QueryInterpreter {
        QueryInterpreter::default()
    }

    pub fn on_query(mut self, listener: QueryEventListener) -> QueryInterpreter {
        self.on_query = Some(listener);
        self
    }

    /// Overrides the provider's bind parameter limit used to split chunkable
    /// statements.
    pub fn max_bind_values(mut self, max: Option<usize>) -> QueryInterpreter {
        self.max_bind_values = max;
        self
    }

    /// Evaluates `plan` with `bindings` as the outermost frame.
    pub async fn run(
        &self,
        plan: &QueryPlanNode,
        bindings: Map<String, Value>,
        queryable: &dyn Queryable,
    ) -> Result<Value> {
        let scope = Scope::new(bindings);
        let max_bind_values = self
            .max_bind_values
            .unwrap_or_else(|| queryable.provider().max_bind_values());

        let exec = Exec {
            interpreter: self,
            scope: &scope,
            queryable,
            max_bind_values,
        };

        exec.eval(plan, Scope::ROOT).await
    }
}

/// State of a single plan evaluation.
struct Exec<'a> {
    interpreter: &'a QueryInterpreter,
    scope: &'a Scope,
    queryable: &'a dyn Queryable,
    max_bind_values: usize,
}

type EvalStream<'a> = Pin<Box<dyn Stream<Item = Result<Value>> + Send + 'a>>;

impl<'a> Exec<'a> {
    #[async_recursion]
    async fn eval(&self, node: &QueryPlanNode, frame: FrameId) -> Result<Value> {
        match node {
            QueryPlanNode::Value(value) => self.resolve(value, frame),
            QueryPlanNode::Seq(nodes) => {
                let mut last = Value::Null;
                for node in nodes {
                    last = self.eval(node, frame).await?;
                }
                Ok(last)
            }
            QueryPlanNode::Get { name } => self.lookup(frame, name),
            QueryPlanNode::Let { bindings, expr } => {
                let mut frame = frame;
                for binding in bindings {
                    let value = self.eval(&binding.expr, frame).await?;
                    frame = self.scope.bind(frame, binding.name.clone(), value);
                }
                self.eval(expr, frame).await
            }
            QueryPlanNode::GetFirstNonEmpty { names } => Ok(names
                .iter()
                .filter_map(|name| self.scope.get(frame, name))
                .find(|value| !is_empty(value))
                .unwrap_or(Value::Array(vec![]))),
            QueryPlanNode::Concat(parts) => {
                let values = self.eval_all(parts.iter(), frame).await?;
                Ok(Value::Array(values.into_iter().flat_map(into_list).collect()))
            }
            QueryPlanNode::Sum(parts) => {
                let values = self.eval_all(parts.iter(), frame).await?;
                sum(values)
            }
            QueryPlanNode::Execute(query) => {
                let mut affected = 0;
                for statement in self.render(query, frame)? {
                    affected += self.execute(&statement).await?;
                }
                Ok(Value::from(affected))
            }
            QueryPlanNode::Query(query) => {
                let mut records = vec![];
                for statement in self.render(query, frame)? {
                    records.extend(self.query(&statement).await?);
                }
                Ok(Value::Array(records))
            }
            QueryPlanNode::Reverse(node) => match self.eval(node, frame).await? {
                Value::Array(mut items) => {
                    items.reverse();
                    Ok(Value::Array(items))
                }
                other => Ok(other),
            },
            QueryPlanNode::Unique(node) => match self.eval(node, frame).await? {
                Value::Array(mut items) if items.len() == 1 => Ok(items.remove(0)),
                Value::Array(items) if items.is_empty() => Err(Error::record_not_found(
                    "expected exactly one element, got 0",
                )),
                Value::Array(items) => Err(Error::too_many_records(format!(
                    "expected exactly one element, got {}",
                    items.len()
                ))),
                other => Ok(other),
            },
            QueryPlanNode::Required(node) => {
                let value = self.eval(node, frame).await?;
                if is_empty(&value) {
                    return Err(Error::record_not_found("required value is empty"));
                }
                Ok(value)
            }
            QueryPlanNode::MapField { records, field } => {
                map_field(self.eval(records, frame).await?, field)
            }
            QueryPlanNode::Join { parent, children } => {
                // Children only run once the parent rows are in.
                let parent = self.eval(parent, frame).await?;
                if parent.is_null() {
                    return Ok(Value::Null);
                }

                let values = self
                    .eval_all(children.iter().map(|c| &c.child), frame)
                    .await?;
                join::attach_children(parent, children.iter().zip(values).collect())
            }
        }
    }

    /// Evaluates `nodes` concurrently, failing on the first error.
    async fn eval_all<'n>(
        &self,
        nodes: impl Iterator<Item = &'n QueryPlanNode>,
        frame: FrameId,
    ) -> Result<Vec<Value>> {
        let mut pending: StreamMap<usize, EvalStream<'_>> = StreamMap::new();

        for (i, node) in nodes.enumerate() {
            let eval = self.eval(node, frame);
            pending.insert(i, Box::pin(async_stream::stream! { yield eval.await; }));
        }

        let mut results = vec![None; pending.len()];
        while let Some((i, result)) = pending.next().await {
            results[i] = Some(result?);
        }

        results
            .into_iter()
            .map(|result| {
                result.ok_or_else(|| Error::expression_evaluation_failed("branch produced no value"))
            })
            .collect()
    }

    fn lookup(&self, frame: FrameId, name: &str) -> Result<Value> {
        self.scope.get(frame, name).ok_or_else(|| {
            Error::expression_evaluation_failed(format!("missing value for query variable {name}"))
        })
    }

    /// Replaces `prisma__type: param` placeholders with their bound values.
    fn resolve(&self, value: &Value, frame: FrameId) -> Result<Value> {
        match value {
            Value::Object(map) => match placeholder_name(map) {
                Some(name) => self.lookup(frame, name),
                None => map
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), self.resolve(value, frame)?)))
                    .collect::<Result<Map<_, _>>>()
                    .map(Value::Object),
            },
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve(item, frame))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }

    fn render(&self, query: &DbQuery, frame: FrameId) -> Result<Vec<SqlQuery>> {
        let args = match query {
            DbQuery::RawSql { args, .. } | DbQuery::TemplateSql { args, .. } => args,
        };
        let args = args
            .iter()
            .map(|arg| self.resolve(arg, frame))
            .collect::<Result<Vec<_>>>()?;

        render::render_query(query, args, self.max_bind_values)
    }

    async fn execute(&self, statement: &SqlQuery) -> Result<u64> {
        let start = Instant::now();
        let result = self.queryable.execute_raw(statement).await;
        self.emit(statement, start.elapsed());
        result.map_err(Error::into_user_facing)
    }

    async fn query(&self, statement: &SqlQuery) -> Result<Vec<Value>> {
        let start = Instant::now();
        let result = self.queryable.query_raw(statement).await;
        self.emit(statement, start.elapsed());
        Ok(serialize::serialize_rows(
            result.map_err(Error::into_user_facing)?,
        ))
    }

    fn emit(&self, statement: &SqlQuery, duration: Duration) {
        tracing::debug!(
            target: "quarry::query",
            sql = %statement.sql,
            params = statement.args.len(),
            duration_ms = duration.as_secs_f64() * 1000.0,
            "query"
        );

        if let Some(listener) = &self.interpreter.on_query {
            listener(&QueryEvent {
                sql: statement.sql.clone(),
                params: statement.args.clone(),
                duration,
            });
        }
    }
}

pub(crate) fn placeholder_name(map: &Map<String, Value>) -> Option<&str> {
    if map.get("prisma__type").and_then(Value::as_str) != Some("param") {
        return None;
    }
    map.get("prisma__value")?.get("name")?.as_str()
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn into_list(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}

fn sum(values: Vec<Value>) -> Result<Value> {
    let mut int_total: Option<i64> = Some(0);
    let mut float_total = 0.0;

    for value in values {
        let number = match &value {
            Value::Number(n) => n.clone(),
            Value::String(s) => s.parse::<serde_json::Number>().map_err(|_| {
                Error::invalid_result(format!("expected a number in sum, got {value}"))
            })?,
            other => {
                return Err(Error::invalid_result(format!(
                    "expected a number in sum, got {other}"
                )))
            }
        };

        int_total = match (int_total, number.as_i64()) {
            (Some(total), Some(i)) => total.checked_add(i),
            _ => None,
        };
        float_total += number.as_f64().unwrap_or(0.0);
    }

    match int_total {
        Some(total) => Ok(Value::from(total)),
        None => serde_json::Number::from_f64(float_total)
            .map(Value::Number)
            .ok_or_else(|| Error::invalid_result("sum is not a finite number")),
    }
}

fn map_field(value: Value, field: &str) -> Result<Value> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| map_field(item, field))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(mut record) => Ok(record.remove(field).unwrap_or(Value::Null)),
        Value::Null => Ok(Value::Null),
        other => Err(Error::invalid_result(format!(
            "expected a record to read `{field}` from, got {other}"
        ))),
    }
}
