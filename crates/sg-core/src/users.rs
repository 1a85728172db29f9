//! Credential store
//!
//! TOML-backed table of SRP verifier records. Only verifier material is at
//! rest, never a password. Lookups always produce challenge material: for
//! unknown usernames a record is synthesized from a keyed PRF over the
//! username, so the challenge a prober sees is deterministic per username
//! and shape-identical to a real one.

use std::collections::HashMap;
use std::path::Path;

use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use sg_protocol::SessionKind;

use crate::error::ConfigError;
use crate::srp::{self, GROUP_BYTES};

type HmacSha256 = Hmac<Sha256>;

/// Size of verifier salts in bytes
pub const SALT_BYTES: usize = 16;

/// Access group of an account, gating which session kinds it may open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserGroup {
    /// Full access
    Admin,
    /// Full access, non-administrative
    User,
    /// View-only desktop access
    Viewer,
}

impl UserGroup {
    /// Whether this group may open the given session kind
    pub fn may_open(&self, kind: SessionKind) -> bool {
        match self {
            UserGroup::Admin | UserGroup::User => true,
            UserGroup::Viewer => matches!(kind, SessionKind::DesktopView),
        }
    }
}

/// One account as stored in the users file (hex-encoded material)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Account name
    pub username: String,
    /// Access group
    pub group: UserGroup,
    /// Verifier salt, hex
    pub salt: String,
    /// SRP verifier, hex
    pub verifier: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct UserFile {
    #[serde(default)]
    users: Vec<CredentialRecord>,
}

/// Challenge material resolved for one handshake
pub struct Credential {
    /// Verifier salt
    pub salt: Vec<u8>,
    /// SRP verifier
    pub verifier: Vec<u8>,
    /// Access group; `None` for synthesized (unknown-username) records
    pub group: Option<UserGroup>,
}

struct StoredUser {
    group: UserGroup,
    salt: Vec<u8>,
    verifier: Vec<u8>,
}

/// In-memory credential store, read-only after load
pub struct UserStore {
    users: HashMap<String, StoredUser>,
    /// Keys the fake-verifier PRF; fresh per process
    probe_secret: [u8; 32],
}

impl UserStore {
    /// Create an empty store
    pub fn new() -> Self {
        let mut probe_secret = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut probe_secret);
        Self {
            users: HashMap::new(),
            probe_secret,
        }
    }

    /// Load a store from a TOML users file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Invalid(format!("Failed to read users file: {}", e)))?;
        let file: UserFile = toml::from_str(&content)?;

        let mut store = Self::new();
        for record in file.users {
            let salt = hex::decode(&record.salt).map_err(|e| {
                ConfigError::Invalid(format!("Bad salt for {}: {}", record.username, e))
            })?;
            let verifier = hex::decode(&record.verifier).map_err(|e| {
                ConfigError::Invalid(format!("Bad verifier for {}: {}", record.username, e))
            })?;
            store.users.insert(
                record.username,
                StoredUser {
                    group: record.group,
                    salt,
                    verifier,
                },
            );
        }
        tracing::debug!("Loaded {} credential records from {:?}", store.len(), path);
        Ok(store)
    }

    /// Save the store to a TOML users file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let mut users: Vec<CredentialRecord> = self
            .users
            .iter()
            .map(|(username, user)| CredentialRecord {
                username: username.clone(),
                group: user.group,
                salt: hex::encode(&user.salt),
                verifier: hex::encode(&user.verifier),
            })
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));

        crate::config::save_config(path, &UserFile { users })
    }

    /// Add an account, deriving verifier material from the password
    pub fn insert(&mut self, username: &str, password: &str, group: UserGroup) {
        let mut salt = vec![0u8; SALT_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        let verifier = srp::compute_verifier(username, password, &salt);
        self.users.insert(
            username.to_string(),
            StoredUser {
                group,
                salt,
                verifier,
            },
        );
    }

    /// Number of accounts
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Check if the store has no accounts
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Resolve challenge material for a username.
    ///
    /// Always succeeds; unknown usernames get a synthesized record so the
    /// reply does not reveal account existence. The proof can never verify
    /// against a synthesized verifier.
    pub fn lookup(&self, username: &str) -> Credential {
        match self.users.get(username) {
            Some(user) => Credential {
                salt: user.salt.clone(),
                verifier: user.verifier.clone(),
                group: Some(user.group),
            },
            None => self.synthesize(username),
        }
    }

    fn prf(&self, label: &str, username: &str) -> [u8; 32] {
        let mut mac =
            HmacSha256::new_from_slice(&self.probe_secret).expect("HMAC accepts any key length");
        mac.update(label.as_bytes());
        mac.update(b"\0");
        mac.update(username.as_bytes());
        mac.finalize().into_bytes().into()
    }

    fn synthesize(&self, username: &str) -> Credential {
        let salt = self.prf("salt", username)[..SALT_BYTES].to_vec();

        let mut verifier = Vec::with_capacity(GROUP_BYTES);
        let mut block = 0u32;
        while verifier.len() < GROUP_BYTES {
            let chunk = self.prf(&format!("verifier.{}", block), username);
            verifier.extend_from_slice(&chunk);
            block += 1;
        }
        verifier.truncate(GROUP_BYTES);

        Credential {
            salt,
            verifier,
            group: None,
        }
    }
}

impl Default for UserStore {
    fn default() -> Self {
        Self::new()
    }
}
