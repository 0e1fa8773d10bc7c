//! JSON request and response documents exchanged with callers.

use crate::transaction::TransactionInfo;

use quarry_core::driver::IsolationLevel;
use quarry_core::Value;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};

/// A single query, e.g.
/// `{ "modelName": "User", "action": "findUnique", "query": { .. } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,

    pub action: Action,

    pub query: FieldQuery,
}

/// Arguments and selection of a query or a nested relation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldQuery {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub arguments: Map<String, Value>,

    pub selection: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    FindUnique,
    FindUniqueOrThrow,
    FindFirst,
    FindFirstOrThrow,
    FindMany,
    CreateOne,
    CreateMany,
    CreateManyAndReturn,
    UpdateOne,
    UpdateMany,
    UpdateManyAndReturn,
    DeleteOne,
    DeleteMany,
    UpsertOne,
    Aggregate,
    GroupBy,
    ExecuteRaw,
    QueryRaw,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::FindUnique => "findUnique",
            Action::FindUniqueOrThrow => "findUniqueOrThrow",
            Action::FindFirst => "findFirst",
            Action::FindFirstOrThrow => "findFirstOrThrow",
            Action::FindMany => "findMany",
            Action::CreateOne => "createOne",
            Action::CreateMany => "createMany",
            Action::CreateManyAndReturn => "createManyAndReturn",
            Action::UpdateOne => "updateOne",
            Action::UpdateMany => "updateMany",
            Action::UpdateManyAndReturn => "updateManyAndReturn",
            Action::DeleteOne => "deleteOne",
            Action::DeleteMany => "deleteMany",
            Action::UpsertOne => "upsertOne",
            Action::Aggregate => "aggregate",
            Action::GroupBy => "groupBy",
            Action::ExecuteRaw => "executeRaw",
            Action::QueryRaw => "queryRaw",
        }
    }
}

impl core::fmt::Display for Action {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Several queries sent together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonBatch {
    pub batch: Vec<JsonQuery>,

    /// Present when the batch must run atomically.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<BatchTransaction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchTransaction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolation_level: Option<IsolationLevel>,
}

/// Per-request options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
    /// Runs the request inside this interactive transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionInfo>,
}

impl RequestOptions {
    pub fn in_transaction(info: TransactionInfo) -> RequestOptions {
        RequestOptions {
            transaction: Some(info),
        }
    }
}

/// Wraps a result as `{ "data": { <action>: <result> } }`.
pub fn response(action: Action, result: Value) -> Value {
    json!({ "data": { action.as_str(): result } })
}
