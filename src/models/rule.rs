use serde::{Deserialize, Serialize};

/// A followed account resolved to its provider-side ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    pub name: String,
    pub entity_id: String,
}

impl Subscription {
    pub fn new(name: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_id: entity_id.into(),
        }
    }

    /// The server-side rule that makes the stream deliver this account's posts.
    pub fn rule_spec(&self) -> RuleSpec {
        RuleSpec {
            expression: format!("from:{}", self.entity_id),
            tag: format!("follow @{}", self.name),
        }
    }
}

/// A filter rule as stored by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    pub id: String,
    #[serde(rename = "value")]
    pub expression: String,
    #[serde(default)]
    pub tag: Option<String>,
}

/// A rule to be created (the provider assigns the ID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleSpec {
    #[serde(rename = "value")]
    pub expression: String,
    pub tag: String,
}
