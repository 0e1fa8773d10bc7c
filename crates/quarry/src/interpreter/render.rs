use crate::plan::{DbQuery, Fragment, PlaceholderFormat};

use quarry_core::driver::SqlQuery;
use quarry_core::{Error, Result, Value};
use std::fmt::Write;

/// Renders `query` with already resolved `args` into one or more statements.
///
/// Only `chunkable` templates are ever split, and only when they carry more
/// than `max_bind_values` parameters.
pub(crate) fn render_query(
    query: &DbQuery,
    args: Vec<Value>,
    max_bind_values: usize,
) -> Result<Vec<SqlQuery>> {
    match query {
        DbQuery::RawSql { sql, .. } => Ok(vec![SqlQuery::new(sql.clone(), args)]),
        DbQuery::TemplateSql {
            fragments,
            placeholder_format,
            chunkable,
            ..
        } => {
            let template = Template {
                fragments,
                format: placeholder_format,
            };

            if *chunkable {
                template.render_chunked(args, max_bind_values)
            } else {
                Ok(vec![template.render(&args)?])
            }
        }
    }
}

struct Template<'a> {
    fragments: &'a [Fragment],
    format: &'a PlaceholderFormat,
}

impl Template<'_> {
    fn render(&self, args: &[Value]) -> Result<SqlQuery> {
        let mut sql = String::new();
        let mut params = Vec::with_capacity(args.len());
        let mut args = args.iter();

        for fragment in self.fragments {
            match fragment {
                Fragment::StringChunk { chunk } => sql.push_str(chunk),
                Fragment::Parameter => {
                    let arg = next_arg(&mut args)?;
                    self.push_param(&mut sql, &mut params, arg.clone());
                }
                Fragment::ParameterTuple => {
                    let items = as_list(next_arg(&mut args)?)?;
                    if items.is_empty() {
                        sql.push_str("(NULL)");
                        continue;
                    }
                    sql.push('(');
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            sql.push(',');
                        }
                        self.push_param(&mut sql, &mut params, item.clone());
                    }
                    sql.push(')');
                }
                Fragment::ParameterTupleList {
                    item_prefix,
                    item_separator,
                    item_suffix,
                    group_separator,
                } => {
                    let rows = as_list(next_arg(&mut args)?)?;
                    for (r, row) in rows.iter().enumerate() {
                        if r > 0 {
                            sql.push_str(group_separator);
                        }
                        sql.push_str(item_prefix);
                        for (i, item) in as_list(row)?.iter().enumerate() {
                            if i > 0 {
                                sql.push_str(item_separator);
                            }
                            self.push_param(&mut sql, &mut params, item.clone());
                        }
                        sql.push_str(item_suffix);
                    }
                }
            }
        }

        Ok(SqlQuery::new(sql, params))
    }

    fn push_param(&self, sql: &mut String, params: &mut Vec<Value>, value: Value) {
        params.push(value);
        sql.push_str(&self.format.prefix);
        if self.format.has_numbering {
            let _ = write!(sql, "{}", params.len());
        }
    }

    fn render_chunked(&self, args: Vec<Value>, max: usize) -> Result<Vec<SqlQuery>> {
        let slots: Vec<&Fragment> = self
            .fragments
            .iter()
            .filter(|fragment| !matches!(fragment, Fragment::StringChunk { .. }))
            .collect();

        let counts = slots
            .iter()
            .zip(&args)
            .map(|(fragment, arg)| param_count(fragment, arg))
            .collect::<Result<Vec<_>>>()?;
        let total: usize = counts.iter().sum();

        if total <= max {
            return Ok(vec![self.render(&args)?]);
        }

        // Split the list argument contributing the most parameters.
        let Some(index) = (0..counts.len())
            .filter(|&i| {
                matches!(
                    slots[i],
                    Fragment::ParameterTuple | Fragment::ParameterTupleList { .. }
                )
            })
            .max_by_key(|&i| counts[i])
        else {
            return Err(bind_limit_exceeded(max));
        };

        let fixed = total - counts[index];
        if fixed >= max {
            return Err(bind_limit_exceeded(max));
        }
        let budget = max - fixed;
        let is_tuple_list = matches!(slots[index], Fragment::ParameterTupleList { .. });

        let mut chunks = vec![];
        let mut current = vec![];
        let mut used = 0;

        for item in as_list(&args[index])? {
            let width = if is_tuple_list { as_list(item)?.len() } else { 1 };
            if width > budget {
                return Err(bind_limit_exceeded(max));
            }
            if used + width > budget {
                chunks.push(std::mem::take(&mut current));
                used = 0;
            }
            current.push(item.clone());
            used += width;
        }
        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
            .into_iter()
            .map(|chunk| {
                let mut args = args.clone();
                args[index] = Value::Array(chunk);
                self.render(&args)
            })
            .collect()
    }
}

fn param_count(fragment: &Fragment, arg: &Value) -> Result<usize> {
    Ok(match fragment {
        Fragment::StringChunk { .. } => 0,
        Fragment::Parameter => 1,
        Fragment::ParameterTuple => as_list(arg)?.len(),
        Fragment::ParameterTupleList { .. } => as_list(arg)?
            .iter()
            .map(|row| as_list(row).map(Vec::len))
            .sum::<Result<usize>>()?,
    })
}

fn next_arg<'a>(args: &mut impl Iterator<Item = &'a Value>) -> Result<&'a Value> {
    args.next().ok_or_else(|| {
        Error::expression_evaluation_failed("statement template has more parameters than arguments")
    })
}

fn as_list(value: &Value) -> Result<&Vec<Value>> {
    value.as_array().ok_or_else(|| {
        Error::invalid_result(format!("expected a list of parameters, got {value}"))
    })
}

fn bind_limit_exceeded(max: usize) -> Error {
    Error::known_request(
        "P2029",
        format!("The query parameter limit supported by your database is exceeded: {max}."),
        None,
    )
}
