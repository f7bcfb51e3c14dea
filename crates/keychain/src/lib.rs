// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Credential/keychain resolution collaborator (§4.6.1 step 4, §9
//! "Credential/keychain"): resolves a [`CredentialName`] to its
//! [`CredentialMaterial`] server-side. Material enters the worker only
//! for the duration of a task and is never serialized into events — the
//! worker emits a [`noetl_core::EventBody::CredentialResolved`] audit
//! event carrying the name alone (SPEC_FULL.md §C.4).

use async_trait::async_trait;
use noetl_core::{CredentialMaterial, CredentialName};
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum KeychainError {
    #[error("credential {0:?} not found")]
    NotFound(CredentialName),
    #[error("keychain backend error: {0}")]
    Backend(String),
}

/// Per-task credential resolution. Resolution is scoped to the task that
/// names the credential; a nested playbook's sub-execution does not
/// inherit a parent's resolved material unless its own task references
/// the same credential name (SPEC_FULL.md §E.3).
#[async_trait]
pub trait Keychain: Send + Sync {
    async fn resolve(&self, name: &CredentialName) -> Result<CredentialMaterial, KeychainError>;
}

/// Static in-process keychain, backing both tests and any deployment
/// that provisions credentials out of band (e.g. mounted secrets synced
/// into process memory at startup).
#[derive(Default)]
pub struct StaticKeychain {
    entries: HashMap<CredentialName, CredentialMaterial>,
}

impl StaticKeychain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: CredentialName, material: CredentialMaterial) -> Self {
        self.entries.insert(name, material);
        self
    }
}

#[async_trait]
impl Keychain for StaticKeychain {
    async fn resolve(&self, name: &CredentialName) -> Result<CredentialMaterial, KeychainError> {
        self.entries.get(name).cloned().ok_or_else(|| KeychainError::NotFound(name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_registered_credential() {
        let keychain = StaticKeychain::new()
            .with(CredentialName::from("db-prod"), CredentialMaterial::new("s3cr3t"));
        let material = keychain.resolve(&CredentialName::from("db-prod")).await.unwrap();
        assert_eq!(material.expose(), "s3cr3t");
    }

    #[tokio::test]
    async fn missing_credential_is_an_error() {
        let keychain = StaticKeychain::new();
        let err = keychain.resolve(&CredentialName::from("missing")).await.unwrap_err();
        assert!(matches!(err, KeychainError::NotFound(_)));
    }

    #[test]
    fn material_debug_is_redacted() {
        let material = CredentialMaterial::new("s3cr3t".to_string());
        let debug = format!("{:?}", material);
        assert!(!debug.contains("s3cr3t"));
    }
}
