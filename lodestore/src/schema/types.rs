use crate::codec::PropKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level schema definition parsed from YAML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDefinition {
    #[serde(default)]
    pub contexts: HashMap<String, ContextDefinition>,
}

/// The attribute table for one element type ("context").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextDefinition {
    #[serde(default)]
    pub attributes: HashMap<String, AttributeDef>,
}

/// A single typed attribute declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeDef {
    #[serde(rename = "type")]
    pub kind: PropKind,
    /// Display name; the attribute id doubles as the display name if absent.
    #[serde(default)]
    pub name: Option<String>,
    /// Unconditional ("always") choice list for options attributes.
    /// Takes priority over `branches` when both are declared.
    #[serde(default)]
    pub choices: Option<Vec<ChoiceDef>>,
    /// Source property for conditional choices.
    #[serde(default)]
    pub depends_on: Option<String>,
    /// Per-value branches for conditional choices.
    #[serde(default)]
    pub branches: Vec<BranchDef>,
}

/// One choice in an options list: a bare value, or a value with its own
/// display label.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChoiceDef {
    Simple(String),
    Labeled { value: String, name: String },
}

impl ChoiceDef {
    pub fn value(&self) -> &str {
        match self {
            ChoiceDef::Simple(v) => v,
            ChoiceDef::Labeled { value, .. } => value,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            ChoiceDef::Simple(v) => v,
            ChoiceDef::Labeled { name, .. } => name,
        }
    }
}

/// A branch of a `depends_on` rule: applies when the source property's
/// current string value equals `when`. Branches may declare nested
/// attributes, so which properties are relevant can itself depend on
/// another property's value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchDef {
    pub when: String,
    #[serde(default)]
    pub choices: Vec<ChoiceDef>,
    #[serde(default)]
    pub attributes: HashMap<String, AttributeDef>,
}
