//! Persona and session isolation of memories.

use serde::{Deserialize, Serialize};

use super::record::{PERSONALITY_ID_FIELD, SESSION_ID_FIELD};
use crate::types::Filter;

/// Which memories a conversation may see.
///
/// Memories are always partitioned by persona when one is given; narrowing
/// to a session keeps parallel conversations of the same persona apart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryScope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personality_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl MemoryScope {
    /// Every memory in the collection.
    pub fn all() -> Self {
        Self::default()
    }

    /// Memories of one persona across sessions.
    pub fn persona(personality_id: impl Into<String>) -> Self {
        Self {
            personality_id: Some(personality_id.into()),
            session_id: None,
        }
    }

    /// Memories of one persona in one session.
    pub fn session(personality_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            personality_id: Some(personality_id.into()),
            session_id: Some(session_id.into()),
        }
    }

    /// Filter selecting this scope, or `None` when unscoped.
    pub fn to_filter(&self) -> Option<Filter> {
        let mut conditions = Vec::new();
        if let Some(p) = &self.personality_id {
            conditions.push(Filter::eq(PERSONALITY_ID_FIELD, p.as_str()));
        }
        if let Some(s) = &self.session_id {
            conditions.push(Filter::eq(SESSION_ID_FIELD, s.as_str()));
        }

        match conditions.len() {
            0 => None,
            1 => conditions.pop(),
            _ => Some(Filter::and(conditions)),
        }
    }

    /// Expression selecting this scope, or `None` when unscoped.
    pub fn to_expr(&self) -> Option<String> {
        self.to_filter().map(|f| f.to_expr())
    }
}
