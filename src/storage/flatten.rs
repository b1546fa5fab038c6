//! Flattening of nested objects into one-level rows

use super::{Record, Row};
use crate::etl::Transformer;

use eyre::Result;
use serde_json::Value;

/// Separator placed between a parent object key and its child keys
pub const CHILD_SEPARATOR: &str = "__";

/// Flattens nested objects into `parent__child` columns
///
/// Arrays that were not declared as child collections are left as-is and end
/// up as JSON text cells once the row is rendered.
///
/// # Example
/// ```
/// use shopify_extractor::etl::Transformer;
/// use shopify_extractor::storage::RowFlattener;
/// use serde_json::json;
///
/// let record = json!({"id": 1, "billing_address": {"city": "Prague"}});
/// let row = RowFlattener::default()
///     .transform(record.as_object().unwrap().clone())
///     .unwrap();
///
/// assert_eq!(row["billing_address__city"], "Prague");
/// ```
#[derive(Debug, Clone)]
pub struct RowFlattener {
    separator: String,
}

impl Default for RowFlattener {
    fn default() -> Self {
        Self::new(CHILD_SEPARATOR)
    }
}

impl RowFlattener {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }

    fn flatten_into(&self, prefix: Option<&str>, record: Record, row: &mut Row) {
        for (key, value) in record {
            let column = match prefix {
                Some(prefix) => format!("{}{}{}", prefix, self.separator, key),
                None => key,
            };

            match value {
                Value::Object(nested) if !nested.is_empty() => {
                    self.flatten_into(Some(&column), nested, row);
                }
                Value::Object(_) => {
                    row.insert(column, Value::Null);
                }
                other => {
                    row.insert(column, other);
                }
            }
        }
    }
}

impl Transformer for RowFlattener {
    type Input = Record;
    type Output = Row;

    fn transform(&self, input: Self::Input) -> Result<Self::Output> {
        let mut row = Row::new();
        self.flatten_into(None, input, &mut row);
        Ok(row)
    }
}
