use crate::Value;

/// Rows returned by [`Queryable::query_raw`](super::Queryable::query_raw),
/// in columnar form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub column_names: Vec<String>,
    pub column_types: Vec<ColumnType>,
    pub rows: Vec<Vec<Value>>,
    pub last_insert_id: Option<String>,
}

impl ResultSet {
    pub fn new(columns: Vec<(&str, ColumnType)>, rows: Vec<Vec<Value>>) -> ResultSet {
        let (column_names, column_types) = columns
            .into_iter()
            .map(|(name, ty)| (name.to_string(), ty))
            .unzip();

        ResultSet {
            column_names,
            column_types,
            rows,
            last_insert_id: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int32,
    Int64,
    Float,
    Double,
    Numeric,
    Boolean,
    Text,
    Date,
    DateTime,
    Json,
    Uuid,
    Bytes,
    Unknown,
}
