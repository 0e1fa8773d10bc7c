use serde::{Deserialize, Serialize};

/// Database flavor behind an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Postgres,
    Mysql,
    Sqlite,
    Sqlserver,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Postgres => "postgres",
            Provider::Mysql => "mysql",
            Provider::Sqlite => "sqlite",
            Provider::Sqlserver => "sqlserver",
        }
    }

    /// Statement that opens a transaction.
    pub fn begin_statement(&self) -> &'static str {
        match self {
            Provider::Sqlserver => "BEGIN TRAN",
            _ => "BEGIN",
        }
    }

    /// MySQL only applies `SET TRANSACTION ISOLATION LEVEL` to the next
    /// transaction, so it has to be sent before `BEGIN`.
    pub fn sets_isolation_before_begin(&self) -> bool {
        matches!(self, Provider::Mysql)
    }

    /// Maximum number of bind parameters in a single statement.
    pub fn max_bind_values(&self) -> usize {
        match self {
            Provider::Postgres => 32766,
            Provider::Mysql => 65535,
            Provider::Sqlite => 999,
            Provider::Sqlserver => 2098,
        }
    }
}

impl core::fmt::Display for Provider {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection details an adapter reports after connecting. Forwarded to the
/// query compiler and used to size chunked statements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_bind_values: Option<usize>,

    #[serde(default)]
    pub supports_relation_joins: bool,
}
