use keyring::Entry;
use rand_core::{OsRng, RngCore};
use thiserror::Error;

const SERVICE_NAME: &str = "run.cadence.sync";
const TOKEN_KEY: &str = "api_token";
const TELEMETRY_SECRET_KEY: &str = "telemetry_secret";
const SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),
    #[error("token not found")]
    TokenNotFound,
}

/// OS keyring entries used by the daemon: the API bearer token and the
/// secret the telemetry file key is derived from.
pub struct CredentialStore {
    token: Entry,
    telemetry_secret: Entry,
}

impl CredentialStore {
    pub fn new() -> Result<Self, CredentialError> {
        Ok(Self {
            token: Entry::new(SERVICE_NAME, TOKEN_KEY)?,
            telemetry_secret: Entry::new(SERVICE_NAME, TELEMETRY_SECRET_KEY)?,
        })
    }

    pub fn save_token(&self, token: &str) -> Result<(), CredentialError> {
        self.token.set_password(token)?;
        Ok(())
    }

    pub fn get_token(&self) -> Result<String, CredentialError> {
        match self.token.get_password() {
            Ok(token) => Ok(token),
            Err(keyring::Error::NoEntry) => Err(CredentialError::TokenNotFound),
            Err(err) => Err(CredentialError::Keyring(err)),
        }
    }

    pub fn delete_token(&self) -> Result<(), CredentialError> {
        delete_entry(&self.token)
    }

    /// Returns the telemetry secret, generating and storing one on first use.
    pub fn telemetry_secret(&self) -> Result<Vec<u8>, CredentialError> {
        match self.telemetry_secret.get_secret() {
            Ok(secret) if secret.len() == SECRET_LEN => return Ok(secret),
            Ok(_) | Err(keyring::Error::NoEntry) => {}
            Err(err) => return Err(err.into()),
        }

        let mut secret = vec![0u8; SECRET_LEN];
        OsRng.fill_bytes(&mut secret);
        self.telemetry_secret.set_secret(&secret)?;
        Ok(secret)
    }

    pub fn delete_telemetry_secret(&self) -> Result<(), CredentialError> {
        delete_entry(&self.telemetry_secret)
    }
}

fn delete_entry(entry: &Entry) -> Result<(), CredentialError> {
    match entry.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(err) => Err(CredentialError::Keyring(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_store() -> CredentialStore {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
        CredentialStore::new().unwrap()
    }

    #[test]
    fn saves_and_deletes_token() {
        let store = mock_store();
        assert!(matches!(
            store.get_token(),
            Err(CredentialError::TokenNotFound)
        ));

        store.save_token("secret-token").unwrap();
        assert_eq!(store.get_token().unwrap(), "secret-token");

        store.delete_token().unwrap();
        assert!(matches!(
            store.get_token(),
            Err(CredentialError::TokenNotFound)
        ));
        store.delete_token().unwrap();
    }

    #[test]
    fn telemetry_secret_is_generated_once() {
        let store = mock_store();
        let first = store.telemetry_secret().unwrap();
        let second = store.telemetry_secret().unwrap();

        assert_eq!(first.len(), SECRET_LEN);
        assert_eq!(first, second);

        store.delete_telemetry_secret().unwrap();
        assert_ne!(store.telemetry_secret().unwrap(), first);
    }
}
