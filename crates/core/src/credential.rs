// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Credential types. Material never appears in an [`crate::event::Event`]
//! or in a log line; only the [`CredentialName`] does.

use serde::{Deserialize, Serialize};

/// The name a playbook references a credential by, e.g. `db-prod`. Safe to
/// log and to place in `credential_resolved` audit events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialName(pub String);

impl std::fmt::Display for CredentialName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CredentialName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CredentialName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Resolved secret material. `Debug` and `Serialize` are both redacting:
/// this type must never leak a real value into a log line or an event.
#[derive(Clone)]
pub struct CredentialMaterial(String);

impl CredentialMaterial {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Explicit opt-in accessor; callers reaching for this must be the
    /// exact call site handing the value to a tool backend.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for CredentialMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CredentialMaterial(\"<redacted>\")")
    }
}

impl Serialize for CredentialMaterial {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str("<redacted>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn material_debug_is_redacted() {
        let material = CredentialMaterial::new("super-secret");
        assert_eq!(format!("{:?}", material), "CredentialMaterial(\"<redacted>\")");
    }

    #[test]
    fn material_serializes_redacted() {
        let material = CredentialMaterial::new("super-secret");
        let json = serde_json::to_string(&material).unwrap();
        assert_eq!(json, "\"<redacted>\"");
    }

    #[test]
    fn expose_returns_real_value() {
        let material = CredentialMaterial::new("super-secret");
        assert_eq!(material.expose(), "super-secret");
    }
}
