//! Typed query answers.
//!
//! The server tags every terminal query payload with an answer category;
//! the driver surfaces it as a closed enum so callers match exhaustively
//! instead of probing with runtime casts. The row and document contents
//! themselves stay opaque and are relayed verbatim.

use serde_json::Value;

use crate::error::{DriverError, DriverResult};

/// One row of concepts keyed by output column name.
#[derive(Debug, Clone, PartialEq)]
pub struct ConceptRow(Value);

impl ConceptRow {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

/// The terminal answer to a query.
#[derive(Debug, Clone)]
pub enum QueryAnswer {
    /// The query succeeded and produced no data (e.g. schema definition).
    Ok,
    /// Rows of concepts.
    ConceptRows(Vec<ConceptRow>),
    /// Concept documents (fetch-style queries).
    ConceptDocuments(Vec<Value>),
}

impl QueryAnswer {
    /// Classifies a result payload. An unrecognised shape is a defect in
    /// the result envelope, not a recoverable condition.
    pub fn from_value(payload: Value) -> DriverResult<QueryAnswer> {
        let answer_type = payload
            .get("answer_type")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();
        match answer_type.as_str() {
            "ok" => Ok(QueryAnswer::Ok),
            "concept_rows" => {
                let rows = payload
                    .get("rows")
                    .and_then(|r| r.as_array())
                    .cloned()
                    .unwrap_or_default();
                Ok(QueryAnswer::ConceptRows(
                    rows.into_iter().map(ConceptRow).collect(),
                ))
            }
            "concept_documents" => {
                let documents = payload
                    .get("documents")
                    .and_then(|d| d.as_array())
                    .cloned()
                    .unwrap_or_default();
                Ok(QueryAnswer::ConceptDocuments(documents))
            }
            other => Err(DriverError::IllegalState(format!(
                "unknown answer type: {:?}",
                other
            ))),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, QueryAnswer::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ok_answer() {
        let answer = QueryAnswer::from_value(json!({"answer_type": "ok"})).unwrap();
        assert!(answer.is_ok());
    }

    #[test]
    fn test_concept_rows_answer() {
        let answer = QueryAnswer::from_value(json!({
            "answer_type": "concept_rows",
            "rows": [{"x": {"label": "person"}}, {"x": {"label": "company"}}],
        }))
        .unwrap();
        match answer {
            QueryAnswer::ConceptRows(rows) => {
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[0].get("x"), Some(&json!({"label": "person"})));
                assert_eq!(rows[1].get("y"), None);
            }
            other => panic!("unexpected answer: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_answer_shape_is_illegal_state() {
        let result = QueryAnswer::from_value(json!({"answer_type": "mystery"}));
        assert!(matches!(result, Err(DriverError::IllegalState(_))));
    }
}
