use serde::{Deserialize, Serialize};

/// Session mode carried inside every bearer token.
///
/// A device switched into child mode holds a `Child` token scoped to one child;
/// returning to parent mode means exchanging it for a fresh `Parent` token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Parent,
    Child,
}
