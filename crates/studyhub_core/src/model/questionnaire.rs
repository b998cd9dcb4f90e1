//! Questionnaire definitions in the external collection.
//!
//! The core only needs existence checks; the catalog write path exists for
//! imports and local setups.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct Questionnaire {
    /// Uppercased id.
    pub id: String,
    pub name: String,
    pub definition: Value,
    pub updated_at: String,
    pub updated_by: String,
}

/// Import/put request.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionnaireDraft {
    pub id: String,
    pub name: String,
    pub definition: Value,
}

impl QuestionnaireDraft {
    pub fn new(id: impl Into<String>, name: impl Into<String>, definition: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            definition,
        }
    }
}
