// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Bearer token lookup for authenticated model hosts.

use std::collections::HashMap;

/// Key the download manager looks tokens up under.
pub const HF_TOKEN_KEY: &str = "hf_token";

/// Environment variable that overrides the persisted token.
pub const HF_TOKEN_ENV: &str = "HF_TOKEN";

/// Source of bearer tokens, looked up by key on every request.
pub trait CredentialStore: Send + Sync {
    fn token(&self, key: &str) -> Option<String>;
}

/// Fixed in-memory tokens.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    tokens: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience for the common single-token case.
    pub fn with_hf_token(token: impl Into<String>) -> Self {
        let mut creds = Self::new();
        creds.insert(HF_TOKEN_KEY, token);
        creds
    }

    pub fn insert(&mut self, key: impl Into<String>, token: impl Into<String>) {
        self.tokens.insert(key.into(), token.into());
    }
}

impl CredentialStore for StaticCredentials {
    fn token(&self, key: &str) -> Option<String> {
        self.tokens.get(key).cloned()
    }
}

/// Token persisted in the config file, with `HF_TOKEN` taking precedence.
#[derive(Debug, Clone, Default)]
pub struct ConfigCredentials {
    persisted: Option<String>,
}

impl ConfigCredentials {
    pub fn new(persisted: Option<String>) -> Self {
        Self { persisted }
    }
}

impl CredentialStore for ConfigCredentials {
    fn token(&self, key: &str) -> Option<String> {
        if key != HF_TOKEN_KEY {
            return None;
        }
        std::env::var(HF_TOKEN_ENV)
            .ok()
            .or_else(|| self.persisted.clone())
            .filter(|t| !t.trim().is_empty())
    }
}
