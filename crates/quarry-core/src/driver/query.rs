use crate::Value;

/// A fully rendered statement ready to be sent to a driver.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub sql: String,
    pub args: Vec<Value>,
    pub arg_types: Vec<ArgType>,
}

impl SqlQuery {
    /// A statement without bind parameters.
    pub fn raw(sql: impl Into<String>) -> SqlQuery {
        SqlQuery {
            sql: sql.into(),
            args: vec![],
            arg_types: vec![],
        }
    }

    pub fn new(sql: impl Into<String>, args: Vec<Value>) -> SqlQuery {
        let arg_types = args.iter().map(ArgType::of).collect();
        SqlQuery {
            sql: sql.into(),
            args,
            arg_types,
        }
    }
}

/// Coarse type hint for a bind parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Null,
    Boolean,
    Int,
    Numeric,
    Text,
    Array,
    Json,
}

impl ArgType {
    pub fn of(value: &Value) -> ArgType {
        match value {
            Value::Null => ArgType::Null,
            Value::Bool(_) => ArgType::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => ArgType::Int,
            Value::Number(_) => ArgType::Numeric,
            Value::String(_) => ArgType::Text,
            Value::Array(_) => ArgType::Array,
            Value::Object(_) => ArgType::Json,
        }
    }
}
