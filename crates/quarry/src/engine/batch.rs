use crate::interpreter::placeholder_name;

use quarry_core::{Error, Result, Value};
use serde_json::Map;

/// How the rows of a compacted batch are matched back to its entries.
pub(super) struct Compacted<'a> {
    pub(super) arguments: &'a [Map<String, Value>],
    pub(super) keys: &'a [String],
    pub(super) nested_selection: &'a [String],
    pub(super) expect_non_empty: bool,
}

impl Compacted<'_> {
    /// Returns one result per batch entry, in entry order.
    ///
    /// `arguments` may still hold placeholders when the plan was compiled
    /// from a parameterized shape; they are resolved against `bindings`.
    pub(super) fn distribute(
        &self,
        rows: Value,
        bindings: &Map<String, Value>,
    ) -> Result<Vec<Result<Value>>> {
        let rows = match rows {
            Value::Array(rows) => rows,
            Value::Null => vec![],
            row @ Value::Object(_) => vec![row],
            other => {
                return Err(Error::invalid_result(format!(
                    "expected rows from a compacted batch, got {other}"
                )))
            }
        };

        self.arguments
            .iter()
            .map(|arguments| {
                let arguments = resolve(&Value::Object(arguments.clone()), bindings)?;
                let found = rows.iter().find(|row| self.matches(row, &arguments));

                Ok(match found {
                    Some(row) => Ok(self.project(row)),
                    None if self.expect_non_empty => Err(required_record_not_found()),
                    None => Ok(Value::Null),
                })
            })
            .collect()
    }

    fn matches(&self, row: &Value, arguments: &Value) -> bool {
        self.keys.iter().all(|key| match (row.get(key), arguments.get(key)) {
            (Some(left), Some(right)) => loosely_equal(left, right),
            _ => false,
        })
    }

    fn project(&self, row: &Value) -> Value {
        match row {
            Value::Object(record) if !self.nested_selection.is_empty() => Value::Object(
                record
                    .iter()
                    .filter(|(field, _)| self.nested_selection.contains(field))
                    .map(|(field, value)| (field.clone(), value.clone()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

pub(super) fn required_record_not_found() -> Error {
    Error::known_request(
        "P2025",
        "An operation failed because it depends on one or more records that were required but not found.",
        None,
    )
}

/// Drivers may return large integers as strings.
fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            n.to_string() == *s
        }
        _ => left == right,
    }
}

fn resolve(value: &Value, bindings: &Map<String, Value>) -> Result<Value> {
    match value {
        Value::Object(map) => match placeholder_name(map) {
            Some(name) => bindings.get(name).cloned().ok_or_else(|| {
                Error::expression_evaluation_failed(format!(
                    "missing value for query variable {name}"
                ))
            }),
            None => map
                .iter()
                .map(|(key, value)| Ok((key.clone(), resolve(value, bindings)?)))
                .collect::<Result<Map<_, _>>>()
                .map(Value::Object),
        },
        Value::Array(items) => items
            .iter()
            .map(|item| resolve(item, bindings))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}
