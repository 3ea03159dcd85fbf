use serde_json::Value;

/// Predicate over a top-level field of a JSON document.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Eq(String, Value),
    EqIgnoreCase(String, String),
    /// Field is missing or explicitly null.
    IsNull(String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(field.to_string(), value.into())
    }

    pub fn eq_ignore_case(field: &str, value: &str) -> Self {
        Filter::EqIgnoreCase(field.to_string(), value.to_string())
    }

    pub fn is_null(field: &str) -> Self {
        Filter::IsNull(field.to_string())
    }

    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, expected) => doc.get(field).is_some_and(|v| v == expected),
            Filter::EqIgnoreCase(field, expected) => doc
                .get(field)
                .and_then(Value::as_str)
                .is_some_and(|v| v.to_lowercase() == expected.to_lowercase()),
            Filter::IsNull(field) => doc.get(field).map_or(true, Value::is_null),
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(doc)),
        }
    }
}
