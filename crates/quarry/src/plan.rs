//! Query plans produced by the query compiler.
//!
//! Plans arrive as JSON and are deserialized into [`QueryPlanNode`] trees,
//! which the [`interpreter`](crate::interpreter) evaluates.

use quarry_core::Value;
use serde::{Deserialize, Serialize};
use serde_json::Map;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "args", rename_all = "camelCase")]
pub enum QueryPlanNode {
    /// A literal. Placeholders inside it are resolved against the scope.
    Value(Value),

    /// Evaluates each node in order and yields the last result.
    Seq(Vec<QueryPlanNode>),

    /// Reads a bound name.
    Get { name: String },

    /// Binds names for the evaluation of `expr`.
    Let {
        bindings: Vec<Binding>,
        expr: Box<QueryPlanNode>,
    },

    /// The first bound name whose value is neither null nor an empty list.
    GetFirstNonEmpty { names: Vec<String> },

    /// Flattens the results of all parts into one list.
    Concat(Vec<QueryPlanNode>),

    /// Adds the results of all parts.
    Sum(Vec<QueryPlanNode>),

    /// Runs a statement and yields the number of affected rows.
    Execute(DbQuery),

    /// Runs a statement and yields its rows as records.
    Query(DbQuery),

    Reverse(Box<QueryPlanNode>),

    /// Asserts the list holds exactly one element and yields it.
    Unique(Box<QueryPlanNode>),

    /// Fails when the value is null or an empty list.
    Required(Box<QueryPlanNode>),

    /// Projects one field out of a record or a list of records.
    MapField {
        records: Box<QueryPlanNode>,
        field: String,
    },

    /// Attaches child records to their parent records.
    Join {
        parent: Box<QueryPlanNode>,
        children: Vec<JoinExpression>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub name: String,
    pub expr: QueryPlanNode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinExpression {
    pub child: QueryPlanNode,

    /// `(parent field, child field)` pairs that must be equal.
    pub on: Vec<(String, String)>,

    /// Field of the parent record the matching children are stored under.
    pub parent_field: String,

    /// When `true` the parent gets a single child (or `null`) instead of a
    /// list.
    #[serde(default)]
    pub is_relation_unique: bool,
}

/// A statement, either complete or still to be rendered from fragments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DbQuery {
    RawSql {
        sql: String,
        #[serde(default, alias = "params")]
        args: Vec<Value>,
    },

    #[serde(rename_all = "camelCase")]
    TemplateSql {
        fragments: Vec<Fragment>,
        placeholder_format: PlaceholderFormat,
        #[serde(default, alias = "params")]
        args: Vec<Value>,
        /// The statement may be split into several when it has more bind
        /// parameters than the database accepts.
        #[serde(default)]
        chunkable: bool,
    },
}

/// One piece of a statement template. Every fragment except
/// [`Fragment::StringChunk`] consumes the next argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Fragment {
    StringChunk {
        chunk: String,
    },

    /// A single bind parameter.
    Parameter,

    /// A list argument rendered as `(p1,p2,...)`.
    ParameterTuple,

    /// A list of lists rendered as a list of tuples, e.g. for multi-row
    /// `VALUES`.
    #[serde(rename_all = "camelCase")]
    ParameterTupleList {
        item_prefix: String,
        item_separator: String,
        item_suffix: String,
        group_separator: String,
    },
}

/// How bind parameters are written: `$1`, `@P1`, `?`, ...
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceholderFormat {
    pub prefix: String,
    pub has_numbering: bool,
}

/// Plans compiled for a batch request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BatchResponse {
    /// One plan per batch entry.
    Multi { plans: Vec<QueryPlanNode> },

    /// All entries are the same `findUnique` and were merged into one plan.
    /// The plan's rows are distributed back to the entries by `keys`.
    #[serde(rename_all = "camelCase")]
    Compacted {
        plan: QueryPlanNode,
        arguments: Vec<Map<String, Value>>,
        nested_selection: Vec<String>,
        keys: Vec<String>,
        #[serde(default)]
        expect_non_empty: bool,
    },
}
