//! Credential lookup for provider API keys
//!
//! Lookup order used by the CLI:
//! 1. Environment variable (`ANTHROPIC_API_KEY`, `OPENAI_API_KEY`)
//! 2. OS keychain (requires the `keyring-fallback` feature)

use crate::error::{ApertureError, Result};
use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use tracing::debug;

/// Service name for keyring storage
#[cfg(feature = "keyring-fallback")]
const KEYRING_SERVICE: &str = "aperture-photo-evaluator";

/// Source of provider secrets
pub trait CredentialStore: Send + Sync {
    /// Fetch the secret for a provider, failing with a configuration error if absent
    fn get_credential(&self, provider_id: &str) -> Result<SecretString>;

    /// Whether a credential is available without surfacing the error
    fn has_credential(&self, provider_id: &str) -> bool {
        self.get_credential(provider_id).is_ok()
    }
}

fn missing(provider_id: &str) -> ApertureError {
    ApertureError::Configuration(format!(
        "Missing credential for provider '{}'. Set {} or store it with 'aperture key set'",
        provider_id,
        env_var_for(provider_id)
    ))
}

/// Environment variable consulted for a provider
pub fn env_var_for(provider_id: &str) -> String {
    format!("{}_API_KEY", provider_id.to_ascii_uppercase())
}

/// Reads `<PROVIDER>_API_KEY` from the environment
#[derive(Debug, Default, Clone)]
pub struct EnvCredentialStore;

impl CredentialStore for EnvCredentialStore {
    fn get_credential(&self, provider_id: &str) -> Result<SecretString> {
        match env::var(env_var_for(provider_id)) {
            Ok(key) if !key.trim().is_empty() => {
                debug!("Using {} credential from environment", provider_id);
                Ok(SecretString::from(key))
            }
            _ => Err(missing(provider_id)),
        }
    }
}

/// Fixed credentials, for embedding and tests
#[derive(Default)]
pub struct StaticCredentialStore {
    keys: HashMap<String, String>,
}

impl StaticCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider_id: &str, key: &str) -> Self {
        self.keys.insert(provider_id.to_string(), key.to_string());
        self
    }
}

impl CredentialStore for StaticCredentialStore {
    fn get_credential(&self, provider_id: &str) -> Result<SecretString> {
        self.keys
            .get(provider_id)
            .map(|k| SecretString::from(k.clone()))
            .ok_or_else(|| missing(provider_id))
    }
}

/// OS keychain (macOS Keychain, Windows Credential Manager, Secret Service)
#[cfg(feature = "keyring-fallback")]
#[derive(Debug, Default, Clone)]
pub struct KeyringCredentialStore;

#[cfg(feature = "keyring-fallback")]
impl KeyringCredentialStore {
    fn entry(provider_id: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(KEYRING_SERVICE, provider_id)
            .map_err(|e| ApertureError::Configuration(format!("Failed to access keyring: {}", e)))
    }

    /// Store a key in the OS keychain
    pub fn set_credential(&self, provider_id: &str, key: &str) -> Result<()> {
        if key.trim().is_empty() {
            return Err(ApertureError::Configuration(
                "API key cannot be empty".to_string(),
            ));
        }
        Self::entry(provider_id)?
            .set_password(key)
            .map_err(|e| ApertureError::Configuration(format!("Failed to store API key: {}", e)))?;
        tracing::info!("API key for {} stored in OS keychain", provider_id);
        Ok(())
    }

    /// Remove a key from the OS keychain; absent keys are not an error
    pub fn delete_credential(&self, provider_id: &str) -> Result<()> {
        match Self::entry(provider_id)?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => {
                tracing::warn!("No API key for {} found to delete", provider_id);
                Ok(())
            }
            Err(e) => Err(ApertureError::Configuration(format!(
                "Failed to delete API key: {}",
                e
            ))),
        }
    }
}

#[cfg(feature = "keyring-fallback")]
impl CredentialStore for KeyringCredentialStore {
    fn get_credential(&self, provider_id: &str) -> Result<SecretString> {
        match Self::entry(provider_id)?.get_password() {
            Ok(key) => {
                debug!("Retrieved {} credential from OS keychain", provider_id);
                Ok(SecretString::from(key))
            }
            Err(keyring::Error::NoEntry) => Err(missing(provider_id)),
            Err(e) => Err(ApertureError::Configuration(format!(
                "Failed to retrieve API key: {}",
                e
            ))),
        }
    }
}

/// Tries each store in order and returns the first hit
pub struct ChainedCredentialStore {
    stores: Vec<Box<dyn CredentialStore>>,
}

impl ChainedCredentialStore {
    pub fn new(stores: Vec<Box<dyn CredentialStore>>) -> Self {
        Self { stores }
    }

    /// Environment first, then the OS keychain when compiled in
    pub fn system_default() -> Self {
        #[allow(unused_mut)]
        let mut stores: Vec<Box<dyn CredentialStore>> = vec![Box::new(EnvCredentialStore)];
        #[cfg(feature = "keyring-fallback")]
        stores.push(Box::new(KeyringCredentialStore));
        Self::new(stores)
    }
}

impl CredentialStore for ChainedCredentialStore {
    fn get_credential(&self, provider_id: &str) -> Result<SecretString> {
        let mut last_err = None;
        for store in &self.stores {
            match store.get_credential(provider_id) {
                Ok(secret) => return Ok(secret),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| missing(provider_id)))
    }
}
