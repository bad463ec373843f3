//! Password logins and signed session tokens.
//!
//! Users live in a JSON store holding salted, iterated password hashes. A
//! successful login yields a token that carries the subject and role and is
//! signed with a key derived from the deployment secret. Commands take their
//! [`Identity`] from a verified token, never from a bare role name.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use deckforge_types::{DeckError, Result};

use crate::roles::{Identity, Role};

/// Environment variable holding the token signing secret.
pub const AUTH_SECRET_VAR: &str = "DECKFORGE_AUTH_SECRET";
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 4 * 60 * 60;
pub const MIN_SECRET_CHARS: usize = 16;
pub const MIN_PASSWORD_CHARS: usize = 8;

pub const INVALID_CREDENTIALS: &str = "Invalid credentials";
pub const INVALID_TOKEN: &str = "Invalid authentication credentials";
pub const EXPIRED_TOKEN: &str = "Session expired, log in again";

const SALT_LEN: usize = 32;
const PASSWORD_ROUNDS: u32 = 50_000;
const TOKEN_KEY_CONTEXT: &str = "deckforge session token signing key v1";

// ---------------------------------------------------------------------------
// Password hashing
// ---------------------------------------------------------------------------

fn hash_password(password: &str, salt: &[u8; SALT_LEN]) -> blake3::Hash {
    let mut digest = blake3::keyed_hash(salt, password.as_bytes());
    for _ in 1..PASSWORD_ROUNDS {
        digest = blake3::keyed_hash(salt, digest.as_bytes());
    }
    digest
}

fn decode_32(encoded: &str, engine: &impl Engine) -> Option<[u8; 32]> {
    engine.decode(encoded).ok()?.try_into().ok()
}

fn unauthenticated(reason: &str) -> DeckError {
    DeckError::Unauthenticated {
        reason: reason.to_string(),
    }
}

/// One login. The password itself is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub role: Role,
    salt: String,
    password_hash: String,
}

impl UserRecord {
    fn new(username: String, password: &str, role: Role) -> Self {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        Self {
            username,
            role,
            salt: STANDARD.encode(salt),
            password_hash: STANDARD.encode(hash_password(password, &salt).as_bytes()),
        }
    }

    /// Constant-time comparison; a record with a damaged hash never matches.
    fn check_password(&self, password: &str) -> bool {
        let (Some(salt), Some(expected)) = (
            decode_32(&self.salt, &STANDARD),
            decode_32(&self.password_hash, &STANDARD),
        ) else {
            return false;
        };
        hash_password(password, &salt) == blake3::Hash::from(expected)
    }
}

// ---------------------------------------------------------------------------
// UserStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
struct UsersFile {
    #[serde(default)]
    users: Vec<UserRecord>,
}

/// User accounts persisted to a JSON file after every change.
#[derive(Debug)]
pub struct UserStore {
    path: PathBuf,
    users: Vec<UserRecord>,
}

impl UserStore {
    /// Load the store. A missing file starts empty; a corrupt one is an error
    /// rather than an empty store.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let users = if tokio::fs::try_exists(&path).await? {
            let raw = tokio::fs::read_to_string(&path).await?;
            serde_json::from_str::<UsersFile>(&raw)
                .map_err(|e| {
                    DeckError::ConfigError(format!("user store {} is unreadable: {e}", path.display()))
                })?
                .users
        } else {
            Vec::new()
        };
        Ok(Self { path, users })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn users(&self) -> &[UserRecord] {
        &self.users
    }

    /// Create a user, or replace the password and role of an existing one.
    /// Usernames compare case-insensitively.
    pub async fn upsert(&mut self, username: &str, password: &str, role: Role) -> Result<()> {
        let username = normalize_username(username)?;
        if password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(DeckError::ConfigError(format!(
                "password must be at least {MIN_PASSWORD_CHARS} characters"
            )));
        }
        let record = UserRecord::new(username, password, role);
        match self.users.iter_mut().find(|u| u.username == record.username) {
            Some(existing) => *existing = record,
            None => self.users.push(record),
        }
        self.persist().await
    }

    /// Returns whether a user was removed.
    pub async fn remove(&mut self, username: &str) -> Result<bool> {
        let username = normalize_username(username)?;
        let before = self.users.len();
        self.users.retain(|u| u.username != username);
        if self.users.len() == before {
            return Ok(false);
        }
        self.persist().await?;
        Ok(true)
    }

    /// Check a username and password. Unknown users and wrong passwords fail
    /// with the same error.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<Identity> {
        let username = username.trim().to_lowercase();
        let Some(user) = self.users.iter().find(|u| u.username == username) else {
            // Same work as a real check so lookups do not reveal which users exist.
            let _ = hash_password(password, &[0u8; SALT_LEN]);
            tracing::warn!(user = %username, "login for unknown user");
            return Err(unauthenticated(INVALID_CREDENTIALS));
        };
        if !user.check_password(password) {
            tracing::warn!(user = %username, "login with wrong password");
            return Err(unauthenticated(INVALID_CREDENTIALS));
        }
        Identity::new(&user.username, user.role)
    }

    async fn persist(&self) -> Result<()> {
        #[derive(Serialize)]
        struct UsersFileRef<'a> {
            users: &'a [UserRecord],
        }

        let json = serde_json::to_string_pretty(&UsersFileRef { users: &self.users })?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}

fn normalize_username(username: &str) -> Result<String> {
    let username = username.trim().to_lowercase();
    if username.is_empty() {
        return Err(DeckError::ConfigError("username must not be empty".into()));
    }
    Ok(username)
}

// ---------------------------------------------------------------------------
// TokenSigner
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    role: Role,
    iat: i64,
    exp: i64,
}

/// Issues and verifies session tokens of the form `payload.signature`, both
/// parts unpadded URL-safe base64. The payload is JSON claims; the signature
/// is a keyed BLAKE3 MAC over the encoded payload.
pub struct TokenSigner {
    key: [u8; 32],
    ttl: Duration,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(secret: &str) -> Result<Self> {
        if secret.trim().chars().count() < MIN_SECRET_CHARS {
            return Err(DeckError::ConfigError(format!(
                "{AUTH_SECRET_VAR} must be at least {MIN_SECRET_CHARS} characters"
            )));
        }
        Ok(Self {
            key: blake3::derive_key(TOKEN_KEY_CONTEXT, secret.as_bytes()),
            ttl: Duration::seconds(DEFAULT_TOKEN_TTL_SECS),
        })
    }

    pub fn from_env() -> Result<Self> {
        let secret = std::env::var(AUTH_SECRET_VAR)
            .map_err(|_| DeckError::ConfigError(format!("{AUTH_SECRET_VAR} is not set")))?;
        Self::new(&secret)
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn issue(&self, identity: &Identity) -> Result<String> {
        self.issue_at(identity, Utc::now().timestamp())
    }

    /// The identity a token was issued for, if its signature holds and it has
    /// not expired.
    pub fn verify(&self, token: &str) -> Result<Identity> {
        self.verify_at(token, Utc::now().timestamp())
    }

    fn sign(&self, encoded_payload: &str) -> blake3::Hash {
        blake3::keyed_hash(&self.key, encoded_payload.as_bytes())
    }

    fn issue_at(&self, identity: &Identity, now: i64) -> Result<String> {
        let claims = Claims {
            sub: identity.subject.clone(),
            role: identity.role,
            iat: now,
            exp: now + self.ttl.num_seconds(),
        };
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
        let signature = URL_SAFE_NO_PAD.encode(self.sign(&payload).as_bytes());
        Ok(format!("{payload}.{signature}"))
    }

    fn verify_at(&self, token: &str, now: i64) -> Result<Identity> {
        let (payload, signature) = token
            .trim()
            .split_once('.')
            .ok_or_else(|| unauthenticated(INVALID_TOKEN))?;
        let signature =
            decode_32(signature, &URL_SAFE_NO_PAD).ok_or_else(|| unauthenticated(INVALID_TOKEN))?;
        if self.sign(payload) != blake3::Hash::from(signature) {
            tracing::warn!("rejected token with a bad signature");
            return Err(unauthenticated(INVALID_TOKEN));
        }

        let claims: Claims = URL_SAFE_NO_PAD
            .decode(payload)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or_else(|| unauthenticated(INVALID_TOKEN))?;
        if claims.exp <= now {
            return Err(unauthenticated(EXPIRED_TOKEN));
        }
        Identity::new(claims.sub, claims.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SECRET: &str = "correct horse battery staple";

    fn signer() -> TokenSigner {
        TokenSigner::new(SECRET).unwrap()
    }

    fn reason(err: DeckError) -> String {
        match err {
            DeckError::Unauthenticated { reason } => reason,
            other => panic!("expected Unauthenticated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn login_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config").join("users.json");

        let mut store = UserStore::open(&path).await.unwrap();
        assert!(store.is_empty());
        store
            .upsert("Analyst@Example.com", "s3cret-pass", Role::Analyst)
            .await
            .unwrap();

        let reopened = UserStore::open(&path).await.unwrap();
        let identity = reopened
            .authenticate(" analyst@example.com ", "s3cret-pass")
            .unwrap();
        assert_eq!(identity.subject, "analyst@example.com");
        assert_eq!(identity.role, Role::Analyst);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("s3cret-pass"));
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_look_the_same() {
        let dir = TempDir::new().unwrap();
        let mut store = UserStore::open(dir.path().join("users.json")).await.unwrap();
        store
            .upsert("exec@example.com", "boardroom-42", Role::Executive)
            .await
            .unwrap();

        let wrong = store.authenticate("exec@example.com", "boardroom-43").unwrap_err();
        let unknown = store.authenticate("ghost@example.com", "boardroom-42").unwrap_err();
        assert_eq!(reason(wrong), INVALID_CREDENTIALS);
        assert_eq!(reason(unknown), INVALID_CREDENTIALS);
    }

    #[tokio::test]
    async fn upsert_replaces_role_and_password() {
        let dir = TempDir::new().unwrap();
        let mut store = UserStore::open(dir.path().join("users.json")).await.unwrap();
        store.upsert("a@example.com", "first-password", Role::JuniorStaff).await.unwrap();
        store.upsert("A@example.com", "second-password", Role::Analyst).await.unwrap();

        assert_eq!(store.users().len(), 1);
        assert!(store.authenticate("a@example.com", "first-password").is_err());
        let identity = store.authenticate("a@example.com", "second-password").unwrap();
        assert_eq!(identity.role, Role::Analyst);

        assert!(store.remove("a@example.com").await.unwrap());
        assert!(!store.remove("a@example.com").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn rejects_short_password_and_blank_username() {
        let dir = TempDir::new().unwrap();
        let mut store = UserStore::open(dir.path().join("users.json")).await.unwrap();
        assert!(matches!(
            store.upsert("a@example.com", "short", Role::Analyst).await,
            Err(DeckError::ConfigError(_))
        ));
        assert!(store.upsert("  ", "long-enough", Role::Analyst).await.is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn corrupt_store_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(&path, "{ users: oops").unwrap();
        assert!(matches!(
            UserStore::open(&path).await,
            Err(DeckError::ConfigError(_))
        ));
    }

    #[test]
    fn token_carries_subject_and_role() {
        let identity = Identity::new("senior@example.com", Role::SeniorManager).unwrap();
        let token = signer().issue(&identity).unwrap();
        assert_eq!(token.matches('.').count(), 1);
        assert_eq!(signer().verify(&token).unwrap(), identity);
    }

    #[test]
    fn edited_role_is_rejected() {
        let junior = Identity::new("junior@example.com", Role::JuniorStaff).unwrap();
        let token = signer().issue(&junior).unwrap();
        let (payload, signature) = token.split_once('.').unwrap();

        let mut claims: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap();
        claims["role"] = serde_json::json!("Executive");
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
        let forged = format!("{forged_payload}.{signature}");

        assert_eq!(reason(signer().verify(&forged).unwrap_err()), INVALID_TOKEN);
    }

    #[test]
    fn token_from_another_secret_is_rejected() {
        let exec = Identity::new("exec@example.com", Role::Executive).unwrap();
        let other = TokenSigner::new("a different deployment secret").unwrap();
        let token = other.issue(&exec).unwrap();
        assert_eq!(reason(signer().verify(&token).unwrap_err()), INVALID_TOKEN);
    }

    #[test]
    fn expired_token_is_rejected() {
        let analyst = Identity::new("analyst@example.com", Role::Analyst).unwrap();
        let signer = signer().with_ttl(Duration::minutes(30));
        let issued = Utc::now().timestamp() - 3600;
        let token = signer.issue_at(&analyst, issued).unwrap();

        assert_eq!(reason(signer.verify(&token).unwrap_err()), EXPIRED_TOKEN);
        assert!(signer.verify_at(&token, issued + 60).is_ok());
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        for token in ["", "no-dot", "a.b", "Executive.xyz", "...."] {
            assert_eq!(
                reason(signer().verify(token).unwrap_err()),
                INVALID_TOKEN,
                "{token:?}"
            );
        }
    }

    #[test]
    fn short_secret_is_a_config_error() {
        assert!(matches!(
            TokenSigner::new("tiny"),
            Err(DeckError::ConfigError(_))
        ));
    }
}
