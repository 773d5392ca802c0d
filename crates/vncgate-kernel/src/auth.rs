//! Credential store for dashboard logins.
//!
//! The store is a colon-delimited text file with one `user:SALT:HASH` line per
//! user, salt and hash hex-encoded (either case). Hashes are
//! PBKDF2-HMAC-SHA256. The file is re-read on every lookup so edits take
//! effect without a restart.

use rand::RngCore;
use sha2::Sha256;
use std::io::Write;
use std::path::{Path, PathBuf};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use vncgate_types::error::{GatewayError, GatewayResult};
use zeroize::Zeroize;

/// PBKDF2 iteration count.
pub const PBKDF2_ROUNDS: u32 = 4096;

const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

/// A salted password hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordHash {
    pub salt: Vec<u8>,
    pub hash: Vec<u8>,
}

impl PasswordHash {
    /// Hash `password` with a fresh random salt.
    pub fn generate(password: &str) -> Self {
        let mut salt = vec![0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let hash = derive(password, &salt);
        Self { salt, hash }
    }

    /// Constant-time check of `password` against this hash.
    pub fn matches(&self, password: &str) -> bool {
        if self.hash.is_empty() {
            return false;
        }
        let mut candidate = derive(password, &self.salt);
        let ok: bool = candidate.ct_eq(&self.hash).into();
        candidate.zeroize();
        ok
    }

    fn to_line(&self, username: &str) -> String {
        format!(
            "{}:{}:{}",
            username,
            hex::encode_upper(&self.salt),
            hex::encode_upper(&self.hash)
        )
    }
}

fn derive(password: &str, salt: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; HASH_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ROUNDS, &mut out);
    out
}

/// File-backed username/password store.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `username` / `password` is a valid login.
    ///
    /// Any problem reading the store is logged and treated as a failed login.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cannot read credential store");
                return false;
            }
        };

        match lookup(&contents, username) {
            Some(hash) => {
                let ok = hash.matches(password);
                debug!(username, ok, "Credential check");
                ok
            }
            None => {
                // Burn the same work so unknown users are not distinguishable by timing.
                let _ = derive(password, &[0u8; SALT_LEN]);
                debug!(username, "Unknown user");
                false
            }
        }
    }

    /// Create or replace the entry for `username`.
    pub fn set_password(&self, username: &str, password: &str) -> GatewayResult<()> {
        if username.is_empty() || username.contains(':') || username.contains('\n') {
            return Err(GatewayError::Auth(format!(
                "invalid username '{username}'"
            )));
        }

        let existing = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let entry = PasswordHash::generate(password).to_line(username);
        let mut found = false;
        let mut lines: Vec<String> = existing
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|line| {
                if line.split(':').next() == Some(username) {
                    found = true;
                    entry.clone()
                } else {
                    line.to_string()
                }
            })
            .collect();
        if !found {
            lines.push(entry);
        }

        let mut file = open_private(&self.path)?;
        file.write_all(lines.join("\n").as_bytes())?;
        file.write_all(b"\n")?;
        info!(path = %self.path.display(), username, updated = found, "Stored credentials");
        Ok(())
    }
}

fn lookup(contents: &str, username: &str) -> Option<PasswordHash> {
    contents
        .lines()
        .map(|line| line.split(':').collect::<Vec<_>>())
        .find(|fields| fields.len() >= 3 && fields[0] == username)
        .map(|fields| PasswordHash {
            salt: hex::decode(fields[1].trim()).unwrap_or_default(),
            hash: hex::decode(fields[2].trim()).unwrap_or_default(),
        })
}

fn open_private(path: &Path) -> std::io::Result<std::fs::File> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> CredentialStore {
        CredentialStore::new(dir.path().join("vncgate.passwd"))
    }

    #[test]
    fn test_set_then_verify() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.set_password("alice", "correct horse").unwrap();

        assert!(store.verify("alice", "correct horse"));
        assert!(!store.verify("alice", "wrong"));
        assert!(!store.verify("bob", "correct horse"));
    }

    #[test]
    fn test_update_keeps_other_users() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.set_password("alice", "one").unwrap();
        store.set_password("bob", "two").unwrap();
        store.set_password("alice", "three").unwrap();

        assert!(!store.verify("alice", "one"));
        assert!(store.verify("alice", "three"));
        assert!(store.verify("bob", "two"));
        let contents = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn test_lowercase_hex_accepted() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let hash = PasswordHash::generate("pw");
        std::fs::write(
            store.path(),
            format!("carol:{}:{}\n", hex::encode(&hash.salt), hex::encode(&hash.hash)),
        )
        .unwrap();
        assert!(store.verify("carol", "pw"));
    }

    #[test]
    fn test_missing_or_garbled_store_denies() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(!store.verify("alice", "pw"));

        std::fs::write(store.path(), "alice:zz:zz\nbob\n").unwrap();
        assert!(!store.verify("alice", "pw"));
        assert!(!store.verify("bob", ""));
    }

    #[test]
    fn test_rejects_invalid_username() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir).set_password("a:b", "pw").is_err());
        assert!(store(&dir).set_password("", "pw").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_store_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.set_password("alice", "pw").unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
