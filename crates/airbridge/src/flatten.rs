//! JSON-path style flattening
//!
//! Turns a nested JSON document into `(path, scalar)` pairs, depth-first and
//! pre-order. Object members append `.key`, array elements append `[index]`,
//! starting from the root marker `$`:
//!
//! ```text
//! {"indoor": {"A": {"t": 70}}, "tags": ["x"]}
//!   -> ("$.indoor.A.t", 70), ("$.tags[0]", "x")
//! ```

use serde_json::{Map, Value};

/// Root marker every path starts with
pub const ROOT: &str = "$";

/// Path carrying the timezone offset, in seconds east of UTC
pub const TIMEZONE_PATH: &str = "$.timezone";

/// Lazy traversal over the leaves of a document. Empty objects and arrays
/// produce no pairs.
pub struct Flatten<'a> {
    stack: Vec<(String, &'a Value)>,
}

/// Flatten `value`; calling again restarts the traversal from scratch.
pub fn flatten(value: &Value) -> Flatten<'_> {
    Flatten {
        stack: vec![(ROOT.to_string(), value)],
    }
}

impl<'a> Iterator for Flatten<'a> {
    type Item = (String, &'a Value);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((prefix, value)) = self.stack.pop() {
            match value {
                Value::Object(map) => {
                    // Reversed so the first member is popped first.
                    for (key, child) in map.iter().rev() {
                        self.stack.push((format!("{}.{}", prefix, key), child));
                    }
                }
                Value::Array(items) => {
                    for (i, child) in items.iter().enumerate().rev() {
                        self.stack.push((format!("{}[{}]", prefix, i), child));
                    }
                }
                scalar => return Some((prefix, scalar)),
            }
        }
        None
    }
}

/// Flattened document for one cycle, in traversal order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatRecord {
    entries: Vec<(String, Value)>,
}

impl FlatRecord {
    pub fn from_document(document: &Value) -> Self {
        Self {
            entries: flatten(document)
                .map(|(path, value)| (path, value.clone()))
                .collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(path, value)| (path.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Value at an exact path
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, value)| value)
    }

    /// Timezone offset carried by the record, if any
    pub fn timezone_offset(&self) -> Option<i64> {
        let value = self.get(TIMEZONE_PATH)?;
        value.as_i64().or_else(|| value.as_f64().map(|v| v as i64))
    }

    /// Path-to-value object, for diagnostics
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .cloned()
                .collect::<Map<String, Value>>(),
        )
    }
}

impl FromIterator<(String, Value)> for FlatRecord {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
