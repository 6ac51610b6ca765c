//! GitHub token lookup.
//!
//! The token is read once at startup from a chain of [`SecretStore`]s and
//! handed to the executor as an immutable [`Credential`].

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument};

/// Keyring service the token is stored under.
pub const KEYRING_SERVICE: &str = "github-read-org";

/// Keyring account the token is stored under.
pub const KEYRING_ACCOUNT: &str = "may-read-org";

/// Environment variable that overrides the keyring.
pub const TOKEN_ENV: &str = "ORGSTATS_GITHUB_TOKEN";

/// Errors raised while obtaining a credential.
#[derive(Error, Debug)]
pub enum CredentialError {
    /// No store had a token.
    #[error(
        "no GitHub credential found for service `{service}`, account `{account}`. \
         Store a token with read:org scope, e.g. `keyring set {service} {account}`, \
         or export ORGSTATS_GITHUB_TOKEN"
    )]
    Missing {
        /// Keyring service searched.
        service: String,
        /// Keyring account searched.
        account: String,
    },

    /// A store exists but could not be read.
    #[error("failed to read credential from {store}: {message}")]
    Store {
        /// Which store failed.
        store: &'static str,
        /// Underlying error text.
        message: String,
    },
}

/// An API token. `Debug` output is redacted.
#[derive(Clone)]
pub struct Credential(Arc<str>);

impl Credential {
    /// Wrap a raw token.
    pub fn new(token: impl Into<Arc<str>>) -> Self {
        Self(token.into())
    }

    /// The raw token, for the `Authorization` header.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// A place a secret can be fetched from by `(service, account)`.
pub trait SecretStore {
    /// Short name for logs and errors.
    fn name(&self) -> &'static str;

    /// Fetch the secret, `Ok(None)` when the store has no entry.
    fn fetch(&self, service: &str, account: &str) -> Result<Option<String>, CredentialError>;
}

/// The platform keyring (Keychain, Credential Manager, kernel keyutils).
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringStore;

impl SecretStore for KeyringStore {
    fn name(&self) -> &'static str {
        "keyring"
    }

    fn fetch(&self, service: &str, account: &str) -> Result<Option<String>, CredentialError> {
        let store_error = |e: keyring::Error| CredentialError::Store {
            store: self.name(),
            message: e.to_string(),
        };
        let entry = keyring::Entry::new(service, account).map_err(store_error)?;
        match entry.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(store_error(e)),
        }
    }
}

/// A token taken verbatim from an environment variable.
///
/// Ignores `service` and `account`; the variable itself is the key.
#[derive(Debug, Clone)]
pub struct EnvStore {
    var: String,
}

impl EnvStore {
    /// Read from the given variable.
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvStore {
    fn default() -> Self {
        Self::new(TOKEN_ENV)
    }
}

impl SecretStore for EnvStore {
    fn name(&self) -> &'static str {
        "environment"
    }

    fn fetch(&self, _service: &str, _account: &str) -> Result<Option<String>, CredentialError> {
        Ok(std::env::var(&self.var).ok())
    }
}

/// Fetch the token from the first store that has a non-blank one.
///
/// # Errors
///
/// [`CredentialError::Missing`] when no store has a token, or the first
/// store error encountered.
#[instrument(skip_all)]
pub fn load_credential(stores: &[&dyn SecretStore]) -> Result<Credential, CredentialError> {
    for store in stores {
        match store.fetch(KEYRING_SERVICE, KEYRING_ACCOUNT)? {
            Some(secret) if !secret.trim().is_empty() => {
                debug!(store = store.name(), "credential found");
                return Ok(Credential::new(secret.trim()));
            }
            _ => debug!(store = store.name(), "no credential in store"),
        }
    }
    Err(CredentialError::Missing {
        service: KEYRING_SERVICE.to_string(),
        account: KEYRING_ACCOUNT.to_string(),
    })
}
