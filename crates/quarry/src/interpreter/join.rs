use crate::plan::JoinExpression;

use quarry_core::{Error, Result, Value};
use serde_json::Map;
use std::collections::HashMap;

/// Attaches each child's rows to the matching parent records.
///
/// `parent` is a record or a list of records; `children` holds the already
/// evaluated rows of every join expression, in the same order.
pub(crate) fn attach_children(
    parent: Value,
    children: Vec<(&JoinExpression, Value)>,
) -> Result<Value> {
    let (mut records, single) = match parent {
        Value::Array(items) => (items, false),
        record @ Value::Object(_) => (vec![record], true),
        other => {
            return Err(Error::invalid_result(format!(
                "expected a record or a list of records as join parent, got {other}"
            )))
        }
    };

    for (join, rows) in children {
        let mut by_key: HashMap<String, Vec<Value>> = HashMap::new();
        for row in child_rows(rows)? {
            let key = record_key(expect_record(&row)?, join.on.iter().map(|(_, child)| child));
            by_key.entry(key).or_default().push(row);
        }

        for record in &mut records {
            let Value::Object(record) = record else {
                return Err(Error::invalid_result(format!(
                    "expected join parent to be a record, got {record}"
                )));
            };

            let key = record_key(record, join.on.iter().map(|(parent, _)| parent));
            let matches = by_key.get(&key);

            let value = if join.is_relation_unique {
                matches
                    .and_then(|rows| rows.first().cloned())
                    .unwrap_or(Value::Null)
            } else {
                Value::Array(matches.cloned().unwrap_or_default())
            };

            record.insert(join.parent_field.clone(), value);
        }
    }

    Ok(if single {
        records.pop().unwrap_or(Value::Null)
    } else {
        Value::Array(records)
    })
}

fn child_rows(rows: Value) -> Result<Vec<Value>> {
    match rows {
        Value::Null => Ok(vec![]),
        Value::Array(rows) => Ok(rows.into_iter().filter(|row| !row.is_null()).collect()),
        row @ Value::Object(_) => Ok(vec![row]),
        other => Err(Error::invalid_result(format!(
            "expected child records in join, got {other}"
        ))),
    }
}

fn expect_record(value: &Value) -> Result<&Map<String, Value>> {
    value.as_object().ok_or_else(|| {
        Error::invalid_result(format!("expected join child to be a record, got {value}"))
    })
}

/// Serializes the join fields of `record` into a lookup key. Missing fields
/// count as `null`.
fn record_key<'a>(record: &Map<String, Value>, fields: impl Iterator<Item = &'a String>) -> String {
    let values: Vec<&Value> = fields
        .map(|field| record.get(field).unwrap_or(&Value::Null))
        .collect();
    serde_json::to_string(&values).unwrap_or_default()
}
