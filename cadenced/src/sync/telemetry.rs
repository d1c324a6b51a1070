use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    io::{ErrorKind, Read, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce, aead::Aead};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::now_millis;

const FILE_MAGIC: &[u8; 4] = b"CDTM";
const FILE_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = FILE_MAGIC.len() + 1 + NONCE_LEN + std::mem::size_of::<u32>();

const LAST_SYNC_TIME: &str = "last_sync_time";
const LAST_CONFLICT_COUNT: &str = "last_conflict_count";
const LAST_CONFLICT_TIMESTAMP: &str = "last_conflict_timestamp";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encryption error")]
    Encryption,
    #[error("decryption error")]
    Decryption,
    #[error("telemetry payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Small encrypted key-value file holding sync telemetry.
///
/// Layout: magic, version byte, 12-byte nonce, big-endian `u32` ciphertext
/// length, then the ChaCha20-Poly1305 ciphertext of a JSON object.
pub struct TelemetryStore {
    key: [u8; 32],
    path: PathBuf,
    lock: Mutex<()>,
}

impl TelemetryStore {
    pub fn open(path: impl Into<PathBuf>, secret: &[u8]) -> Result<Self, TelemetryError> {
        let path = path.into();
        ensure_parent(&path)?;
        Ok(Self {
            key: derive_key(secret),
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_last_sync_time(&self) -> Result<(), TelemetryError> {
        self.record_last_sync_time_at(now_millis())
    }

    pub fn record_last_sync_time_at(&self, at: i64) -> Result<(), TelemetryError> {
        self.update(|values| {
            values.insert(LAST_SYNC_TIME.into(), at);
        })
    }

    pub fn last_sync_time_millis(&self) -> Result<Option<i64>, TelemetryError> {
        self.read_value(LAST_SYNC_TIME)
    }

    pub fn record_conflicts_resolved(&self, count: u32) -> Result<(), TelemetryError> {
        self.record_conflicts_resolved_at(count, now_millis())
    }

    /// Overwrites the previous conflict record. A zero count writes nothing.
    pub fn record_conflicts_resolved_at(&self, count: u32, at: i64) -> Result<(), TelemetryError> {
        if count == 0 {
            return Ok(());
        }
        self.update(|values| {
            values.insert(LAST_CONFLICT_COUNT.into(), i64::from(count));
            values.insert(LAST_CONFLICT_TIMESTAMP.into(), at);
        })
    }

    pub fn last_conflict_count(&self) -> Result<i64, TelemetryError> {
        Ok(self.read_value(LAST_CONFLICT_COUNT)?.unwrap_or(0))
    }

    pub fn last_conflict_timestamp(&self) -> Result<Option<i64>, TelemetryError> {
        self.read_value(LAST_CONFLICT_TIMESTAMP)
    }

    pub fn clear_conflict_records(&self) -> Result<(), TelemetryError> {
        self.update(|values| {
            values.remove(LAST_CONFLICT_COUNT);
            values.remove(LAST_CONFLICT_TIMESTAMP);
        })
    }

    /// Removes the file entirely.
    pub fn clear(&self) -> Result<(), TelemetryError> {
        let _guard = self.guard();
        Self::remove(&self.path)
    }

    /// Deletes a telemetry file without needing its key.
    pub fn remove(path: &Path) -> Result<(), TelemetryError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn read_value(&self, key: &str) -> Result<Option<i64>, TelemetryError> {
        let _guard = self.guard();
        Ok(self.load()?.get(key).copied())
    }

    fn update(&self, apply: impl FnOnce(&mut BTreeMap<String, i64>)) -> Result<(), TelemetryError> {
        let _guard = self.guard();
        let mut values = self.load()?;
        apply(&mut values);
        self.persist(&values)
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load(&self) -> Result<BTreeMap<String, i64>, TelemetryError> {
        let mut data = Vec::new();
        match OpenOptions::new().read(true).open(&self.path) {
            Ok(mut file) => {
                file.read_to_end(&mut data)?;
            }
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(err.into()),
        }

        if data.len() < HEADER_LEN
            || &data[..FILE_MAGIC.len()] != FILE_MAGIC
            || data[FILE_MAGIC.len()] != FILE_VERSION
        {
            return Err(TelemetryError::Decryption);
        }

        let nonce_start = FILE_MAGIC.len() + 1;
        let nonce_end = nonce_start + NONCE_LEN;
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&data[nonce_end..HEADER_LEN]);
        let ciphertext_len = u32::from_be_bytes(len_bytes) as usize;
        if data.len() < HEADER_LEN + ciphertext_len {
            return Err(TelemetryError::Decryption);
        }

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&data[nonce_start..nonce_end]),
                &data[HEADER_LEN..HEADER_LEN + ciphertext_len],
            )
            .map_err(|_| TelemetryError::Decryption)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    fn persist(&self, values: &BTreeMap<String, i64>) -> Result<(), TelemetryError> {
        ensure_parent(&self.path)?;
        let plaintext = serde_json::to_vec(values)?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| TelemetryError::Encryption)?;

        let mut payload = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        payload.extend_from_slice(FILE_MAGIC);
        payload.push(FILE_VERSION);
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&(ciphertext.len() as u32).to_be_bytes());
        payload.extend_from_slice(&ciphertext);

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&self.path)?;
        file.write_all(&payload)?;
        file.sync_all()?;
        drop(file);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }
}

fn derive_key(secret: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    key.copy_from_slice(&Sha256::digest(secret));
    key
}

fn ensure_parent(path: &Path) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> TelemetryStore {
        TelemetryStore::open(dir.path().join("telemetry.bin"), &[7u8; 32]).unwrap()
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.last_sync_time_millis().unwrap(), None);
        assert_eq!(store.last_conflict_count().unwrap(), 0);
        assert_eq!(store.last_conflict_timestamp().unwrap(), None);
    }

    #[test]
    fn records_last_sync_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.record_last_sync_time_at(1_700_000_000_000).unwrap();
        assert_eq!(
            store.last_sync_time_millis().unwrap(),
            Some(1_700_000_000_000)
        );
    }

    #[test]
    fn zero_conflicts_write_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.record_conflicts_resolved_at(0, 10).unwrap();
        assert!(!store.path().exists());

        store.record_conflicts_resolved_at(2, 10).unwrap();
        store.record_conflicts_resolved_at(0, 20).unwrap();
        assert_eq!(store.last_conflict_count().unwrap(), 2);
        assert_eq!(store.last_conflict_timestamp().unwrap(), Some(10));
    }

    #[test]
    fn conflict_records_overwrite_instead_of_accumulating() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.record_conflicts_resolved_at(3, 100).unwrap();
        store.record_conflicts_resolved_at(1, 200).unwrap();
        assert_eq!(store.last_conflict_count().unwrap(), 1);
        assert_eq!(store.last_conflict_timestamp().unwrap(), Some(200));
    }

    #[test]
    fn clearing_conflicts_keeps_last_sync_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.record_last_sync_time_at(50).unwrap();
        store.record_conflicts_resolved_at(4, 60).unwrap();

        store.clear_conflict_records().unwrap();

        assert_eq!(store.last_conflict_count().unwrap(), 0);
        assert_eq!(store.last_conflict_timestamp().unwrap(), None);
        assert_eq!(store.last_sync_time_millis().unwrap(), Some(50));
    }

    #[test]
    fn values_survive_reopen_and_are_not_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        store_in(&dir).record_last_sync_time_at(123_456).unwrap();

        let raw = fs::read(dir.path().join("telemetry.bin")).unwrap();
        assert_eq!(&raw[..4], FILE_MAGIC);
        assert!(!String::from_utf8_lossy(&raw).contains(LAST_SYNC_TIME));
        assert_eq!(store_in(&dir).last_sync_time_millis().unwrap(), Some(123_456));
    }

    #[test]
    fn wrong_secret_fails_to_decrypt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.bin");
        store_in(&dir).record_last_sync_time_at(1).unwrap();

        let other = TelemetryStore::open(&path, &[8u8; 32]).unwrap();
        assert!(matches!(
            other.last_sync_time_millis(),
            Err(TelemetryError::Decryption)
        ));
    }

    #[test]
    fn clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.record_last_sync_time_at(1).unwrap();
        store.clear().unwrap();
        assert!(!store.path().exists());
        store.clear().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn file_is_private_to_owner() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.record_last_sync_time_at(1).unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
