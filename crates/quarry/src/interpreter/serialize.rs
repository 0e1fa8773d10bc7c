use quarry_core::driver::{ColumnType, ResultSet};
use quarry_core::Value;
use serde_json::Map;

/// Turns columnar driver rows into field-named records.
pub(crate) fn serialize_rows(result: ResultSet) -> Vec<Value> {
    let ResultSet {
        column_names,
        column_types,
        rows,
        ..
    } = result;

    rows.into_iter()
        .map(|row| {
            let mut record = Map::with_capacity(column_names.len());
            for (i, value) in row.into_iter().enumerate() {
                let Some(name) = column_names.get(i) else {
                    continue;
                };
                let ty = column_types.get(i).copied().unwrap_or(ColumnType::Unknown);
                record.insert(name.clone(), convert(value, ty));
            }
            Value::Object(record)
        })
        .collect()
}

fn convert(value: Value, ty: ColumnType) -> Value {
    match (ty, value) {
        (ColumnType::Boolean, Value::Number(n)) => match n.as_i64() {
            Some(i) => Value::Bool(i != 0),
            None => Value::Number(n),
        },
        (ColumnType::Boolean, Value::String(s)) => match s.as_str() {
            "1" | "t" | "true" => Value::Bool(true),
            "0" | "f" | "false" => Value::Bool(false),
            _ => Value::String(s),
        },
        (ColumnType::Json, Value::String(s)) => {
            serde_json::from_str(&s).unwrap_or(Value::String(s))
        }
        (_, value) => value,
    }
}
