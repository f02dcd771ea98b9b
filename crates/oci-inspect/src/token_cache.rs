use crate::reference::ImageRef;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

/// A token granted during the OAuth2-like workflow for OCI registries.
#[derive(Deserialize, Clone)]
#[serde(untagged)]
#[serde(rename_all = "snake_case")]
pub(crate) enum RegistryToken {
    Token { token: String },
    AccessToken { access_token: String },
}

pub(crate) enum RegistryTokenType {
    Bearer(RegistryToken),
    Basic(String, String),
}

impl RegistryToken {
    pub fn bearer_token(&self) -> String {
        format!("Bearer {}", self.token())
    }

    pub fn token(&self) -> &str {
        match self {
            RegistryToken::Token { token } => token,
            RegistryToken::AccessToken { access_token } => access_token,
        }
    }
}

/// Pull tokens already obtained during this process, keyed by registry and
/// repository. Tokens are scoped to one short-lived CLI invocation, so
/// expiry is not tracked.
#[derive(Default)]
pub(crate) struct TokenCache {
    tokens: BTreeMap<(String, String), RegistryTokenType>,
}

impl TokenCache {
    pub(crate) fn new() -> Self {
        TokenCache {
            tokens: BTreeMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, reference: &ImageRef, token: RegistryTokenType) {
        let registry = reference.registry().to_string();
        let repository = reference.repository().to_string();
        debug!(%registry, %repository, "Inserting token");
        self.tokens.insert((registry, repository), token);
    }

    pub(crate) fn get(&self, reference: &ImageRef) -> Option<&RegistryTokenType> {
        let key = (
            reference.registry().to_string(),
            reference.repository().to_string(),
        );
        let token = self.tokens.get(&key);
        debug!(registry = %key.0, repository = %key.1, miss = token.is_none(), "Fetching token");
        token
    }

    pub(crate) fn contains_key(&self, reference: &ImageRef) -> bool {
        self.get(reference).is_some()
    }
}
