//! Replaces user data in a JSON query with named placeholders.
//!
//! The result keeps every structural part of the query (selection flags, sort
//! directions, pagination counts, relation operations) and is therefore the
//! same for every query that differs only in its literal values. The hash of
//! that shape is computed while the shape is built.

use crate::hash::{self, combine, hash_str, hash_value, index_hash, key_hash, token};

use indexmap::IndexMap;
use quarry_core::Value;
use serde_json::{json, Map};

/// Keys whose primitive values are always structural.
const STRUCTURAL_VALUE_KEYS: &[&str] = &[
    "take",
    "skip",
    "sort",
    "nulls",
    "mode",
    "relationLoadStrategy",
    "distinct",
];

/// Keys inside `data` that lead back to filter / selection arguments.
const STRUCTURAL_KEYS_IN_DATA: &[&str] = &[
    "where", "select", "include", "omit", "_count", "_sum", "_avg", "_min", "_max",
];

/// Nested relation writes inside `data`.
const RELATION_OPERATION_KEYS: &[&str] = &[
    "connect",
    "connectOrCreate",
    "disconnect",
    "set",
    "create",
    "createMany",
    "update",
    "updateMany",
    "upsert",
    "delete",
    "deleteMany",
];

/// Selection markers, kept verbatim wherever they appear.
const SELECTION_MARKERS: &[&str] = &["$scalars", "$composites"];

/// Keys at the root of a query that identify the operation.
const TOP_LEVEL_STRUCTURAL_KEYS: &[&str] = &["modelName", "action"];

/// Tagged value that refers to another column rather than carrying data.
const FIELD_REF_TAG: &str = "FieldRef";

/// A query with its user data extracted.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameterized {
    /// The query with every user-data leaf replaced by
    /// `{ "$type": "Param", "value": <path> }`.
    pub shape: Value,

    /// Extracted values, keyed by placeholder path, in traversal order.
    pub placeholder_values: IndexMap<String, Value>,

    /// Structural hash of `shape`.
    pub hash: u32,
}

impl Parameterized {
    /// Placeholder paths in traversal order.
    pub fn placeholder_paths(&self) -> Vec<String> {
        self.placeholder_values.keys().cloned().collect()
    }

    /// The serialized shape. Two shapes with the same hash are only the same
    /// plan when these strings are equal.
    pub fn shape_key(&self) -> String {
        self.shape.to_string()
    }

    /// Placeholder values as a JSON object, ready to seed an interpreter
    /// scope.
    pub fn bindings(&self) -> Map<String, Value> {
        self.placeholder_values
            .iter()
            .map(|(path, value)| (path.clone(), value.clone()))
            .collect()
    }
}

/// Parameterizes a single JSON query.
pub fn parameterize_query(query: &Value) -> Parameterized {
    let mut walker = Walker::new();
    let shape = walker.walk_root(query, "");
    walker.finish(shape)
}

/// Parameterizes a JSON batch `{ batch: [query, ..], transaction? }`.
///
/// Placeholder paths are prefixed with the query's position, e.g.
/// `batch[1].query.arguments.where.id`. Everything outside `batch` is
/// structural.
pub fn parameterize_batch(batch: &Value) -> Parameterized {
    let mut walker = Walker::new();

    let shape = match batch {
        Value::Object(map) => {
            walker.mix(token::OBJECT_OPEN);
            let mut out = Map::with_capacity(map.len());

            for (key, value) in hash::sorted_entries(map) {
                walker.mix(key_hash(key));

                let value = match value {
                    Value::Array(queries) if key == "batch" => {
                        walker.mix(token::ARRAY_OPEN);
                        let queries = queries
                            .iter()
                            .enumerate()
                            .map(|(i, query)| {
                                walker.hash = index_hash(i, walker.hash);
                                walker.walk_root(query, &format!("batch[{i}]"))
                            })
                            .collect();
                        walker.mix(token::ARRAY_CLOSE);
                        Value::Array(queries)
                    }
                    other => {
                        walker.hash = hash_value(other, walker.hash);
                        other.clone()
                    }
                };

                out.insert(key.clone(), value);
            }

            walker.mix(token::OBJECT_CLOSE);
            Value::Object(out)
        }
        other => walker.walk(other, Context::Default, "", None),
    };

    walker.finish(shape)
}

/// What the current subtree of the query describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    Default,
    Selection,
    OrderBy,
    Data,
}

impl Context {
    fn child(self, key: &str) -> Context {
        match key {
            "arguments" => Context::Default,
            "selection" => Context::Selection,
            "orderBy" => Context::OrderBy,
            "data" => Context::Data,
            _ if self == Context::Data
                && (RELATION_OPERATION_KEYS.contains(&key)
                    || STRUCTURAL_KEYS_IN_DATA.contains(&key)) =>
            {
                Context::Default
            }
            _ => self,
        }
    }
}

struct Walker {
    hash: u32,
    values: IndexMap<String, Value>,
}

impl Walker {
    fn new() -> Walker {
        Walker {
            hash: hash::FNV_OFFSET_BASIS,
            values: IndexMap::new(),
        }
    }

    fn finish(self, shape: Value) -> Parameterized {
        Parameterized {
            shape,
            placeholder_values: self.values,
            hash: self.hash,
        }
    }

    fn mix(&mut self, value: u32) {
        self.hash = combine(self.hash, value);
    }

    /// Walks a query root, where `modelName` and `action` are kept verbatim.
    fn walk_root(&mut self, query: &Value, path: &str) -> Value {
        match query {
            Value::Object(map) if !is_tagged(map) => {
                self.walk_object(map, Context::Default, path, true)
            }
            other => self.walk(other, Context::Default, path, None),
        }
    }

    fn walk(&mut self, value: &Value, cx: Context, path: &str, key: Option<&str>) -> Value {
        let structural_key = key.is_some_and(|key| STRUCTURAL_VALUE_KEYS.contains(&key));

        match value {
            Value::Null => {
                self.mix(token::NULL);
                Value::Null
            }
            Value::String(s) if structural_key => {
                self.hash = hash_str(s, self.hash);
                value.clone()
            }
            Value::String(s) if cx == Context::OrderBy && (s == "asc" || s == "desc") => {
                self.mix(if s == "asc" { token::ASC } else { token::DESC });
                value.clone()
            }
            Value::Number(n) if structural_key => {
                self.hash = hash_str(&n.to_string(), self.hash);
                value.clone()
            }
            Value::Bool(b) if structural_key || cx == Context::Selection => {
                self.mix(if *b { token::TRUE } else { token::FALSE });
                value.clone()
            }
            Value::String(_) | Value::Number(_) | Value::Bool(_) => {
                self.placeholder(path, value.clone())
            }
            Value::Array(items) => {
                self.mix(token::ARRAY_OPEN);
                let items = items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        self.hash = index_hash(i, self.hash);
                        self.walk(item, cx, &format!("{path}[{i}]"), key)
                    })
                    .collect();
                self.mix(token::ARRAY_CLOSE);
                Value::Array(items)
            }
            Value::Object(map) => match tag(map) {
                Some(FIELD_REF_TAG) => {
                    self.hash_field_ref(map);
                    value.clone()
                }
                Some(_) => self.placeholder(path, value.clone()),
                None => self.walk_object(map, cx, path, false),
            },
        }
    }

    fn walk_object(
        &mut self,
        map: &Map<String, Value>,
        cx: Context,
        path: &str,
        is_root: bool,
    ) -> Value {
        self.mix(token::OBJECT_OPEN);
        let mut out = Map::with_capacity(map.len());

        for (key, value) in hash::sorted_entries(map) {
            self.mix(key_hash(key));

            let verbatim = SELECTION_MARKERS.contains(&key.as_str())
                || (is_root && TOP_LEVEL_STRUCTURAL_KEYS.contains(&key.as_str()));

            let value = if verbatim {
                self.hash = hash_value(value, self.hash);
                value.clone()
            } else {
                let path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                self.walk(value, cx.child(key), &path, Some(key.as_str()))
            };

            out.insert(key.clone(), value);
        }

        self.mix(token::OBJECT_CLOSE);
        Value::Object(out)
    }

    fn hash_field_ref(&mut self, map: &Map<String, Value>) {
        self.hash = hash_str("FieldRef:", self.hash);
        let field = map.get("value").and_then(Value::as_object);
        for part in ["_ref", "_container"] {
            if let Some(s) = field.and_then(|f| f.get(part)).and_then(Value::as_str) {
                self.hash = hash_str(s, self.hash);
            }
        }
    }

    fn placeholder(&mut self, path: &str, value: Value) -> Value {
        self.values.insert(path.to_string(), value);
        self.mix(token::PARAM);
        self.hash = hash_str(path, self.hash);
        json!({ "$type": "Param", "value": path })
    }
}

fn tag(map: &Map<String, Value>) -> Option<&str> {
    map.get("$type").and_then(Value::as_str)
}

fn is_tagged(map: &Map<String, Value>) -> bool {
    tag(map).is_some()
}
