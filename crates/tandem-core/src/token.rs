//! Authenticated caller identity.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::WorkspaceId;

/// Operating mode when the token does not name one.
pub const DEFAULT_MODE: &str = "normal";

/// Identity carried by a verified client token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Caller email.
    pub email: String,
    /// Workspace the token grants access to.
    pub workspace: WorkspaceId,
    /// Extra claims (`admin`, `model`, `mode`, ...).
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl Token {
    /// Token without extra claims.
    pub fn new(email: impl Into<String>, workspace: impl Into<WorkspaceId>) -> Self {
        Self {
            email: email.into(),
            workspace: workspace.into(),
            extra: HashMap::new(),
        }
    }

    /// Add an extra claim.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.extra.insert(key.into(), value.into());
        self
    }

    /// Whether the caller holds admin privilege (`extra.admin == "true"`).
    pub fn is_admin(&self) -> bool {
        self.extra.get("admin").is_some_and(|v| v == "true")
    }

    /// Whether the caller is a model-upgrade client (`extra.model == "upgrade"`).
    pub fn is_upgrade_client(&self) -> bool {
        self.extra.get("model").is_some_and(|v| v == "upgrade")
    }

    /// Operating mode, `"normal"` unless the token says otherwise.
    pub fn mode(&self) -> &str {
        self.extra.get("mode").map_or(DEFAULT_MODE, String::as_str)
    }
}
