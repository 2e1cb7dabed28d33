//! On-disk cache of login tokens
//!
//! Tokens live in a single TOML file with one table per account, so several
//! accounts can share the file without reading each other's tokens.

use crate::error::{AuthFailure, Result};
use crate::protocol::LoginData;
use chrono::{Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Timestamp format of `token_exp`
pub const EXPIRY_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A cached token is dropped this long before it really expires
const CLOCK_SKEW_MINUTES: i64 = 15;

/// Seconds cut from the server-announced token lifetime
const EXPIRY_SAFETY_MARGIN_SECS: i64 = 60;

/// Auth material returned by a successful login
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    /// Account the token was issued to
    pub user: String,
    pub jwt_token: String,
    /// Expiry as UTC, formatted with [`EXPIRY_FORMAT`]
    pub token_exp: String,
    pub api_url: String,
    pub wss_url: String,
    /// Region routing name sent along with the token
    pub region_name: String,
}

impl Credential {
    /// Build a credential from a login response received at `now`
    ///
    /// Fails when the announced lifetime does not yield a representable
    /// expiry.
    pub fn from_login(user: impl Into<String>, data: LoginData, now: NaiveDateTime) -> Result<Self> {
        let expiry = Duration::try_seconds(data.expired_time.saturating_sub(EXPIRY_SAFETY_MARGIN_SECS))
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                AuthFailure::Service(format!("token lifetime {} is out of range", data.expired_time))
            })?;
        Ok(Self {
            user: user.into(),
            jwt_token: data.jwt_token,
            token_exp: expiry.format(EXPIRY_FORMAT).to_string(),
            api_url: data.api_url,
            wss_url: data.wss_url,
            region_name: data.region_name,
        })
    }

    /// Parsed expiry, `None` if the stored value is not a valid timestamp
    pub fn expires_at(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.token_exp, EXPIRY_FORMAT).ok()
    }

    /// Token is usable by `account` at `now`
    ///
    /// Fails closed: an unparseable expiry is never valid.
    pub fn is_valid(&self, account: &str, now: NaiveDateTime) -> bool {
        if self.user != account || self.jwt_token.is_empty() || self.region_name.is_empty() {
            return false;
        }
        match self.expires_at() {
            Some(expiry) => expiry
                .checked_sub_signed(Duration::minutes(CLOCK_SKEW_MINUTES))
                .is_some_and(|deadline| now < deadline),
            None => {
                tracing::debug!("Cached token expiry {:?} is not parseable", self.token_exp);
                false
            }
        }
    }

    /// Token is usable by `account` right now
    pub fn is_valid_now(&self, account: &str) -> bool {
        self.is_valid(account, Utc::now().naive_utc())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user", &self.user)
            .field("jwt_token", &"<redacted>")
            .field("token_exp", &self.token_exp)
            .field("api_url", &self.api_url)
            .field("wss_url", &self.wss_url)
            .field("region_name", &self.region_name)
            .finish()
    }
}

/// Token cache file shared by every session of the process
pub struct CredentialStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cached credential of `account`
    ///
    /// A missing, unreadable or corrupt file reads as "nothing cached".
    pub fn load(&self, account: &str) -> Option<Credential> {
        let table = self.read_table()?;
        let section = table.get(account)?.clone();
        match section.try_into::<Credential>() {
            Ok(credential) => Some(credential),
            Err(e) => {
                tracing::debug!("Ignoring invalid cached credential for {}: {}", account, e);
                None
            }
        }
    }

    /// Cached credential of `account`, only if it is still valid now
    pub fn load_valid(&self, account: &str) -> Option<Credential> {
        self.load(account)
            .filter(|credential| credential.is_valid_now(account))
    }

    /// Store `credential` under its account, leaving other accounts untouched
    pub fn save(&self, credential: &Credential) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let mut table = self.read_table().unwrap_or_default();
        let section = toml::Value::try_from(credential)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        table.insert(credential.user.clone(), section);

        let text = toml::to_string(&table)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &self.path)?;

        tracing::debug!("Saved credential for {} to {}", credential.user, self.path.display());
        Ok(())
    }

    fn read_table(&self) -> Option<toml::Table> {
        let text = std::fs::read_to_string(&self.path).ok()?;
        match toml::from_str::<toml::Table>(&text) {
            Ok(table) => Some(table),
            Err(e) => {
                tracing::debug!("Credential file {} is invalid: {}", self.path.display(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn credential(user: &str, exp: NaiveDateTime) -> Credential {
        Credential {
            user: user.into(),
            jwt_token: format!("token-{user}"),
            token_exp: exp.format(EXPIRY_FORMAT).to_string(),
            api_url: "https://api.example".into(),
            wss_url: "wss://ws.example".into(),
            region_name: "eu".into(),
        }
    }

    #[test]
    fn valid_until_skew_margin_before_expiry() {
        let cred = credential("a@x", at(12, 0));
        assert!(cred.is_valid("a@x", at(11, 44)));
        assert!(!cred.is_valid("a@x", at(11, 45)));
        assert!(!cred.is_valid("a@x", at(12, 30)));
    }

    #[test]
    fn other_account_is_never_valid() {
        let cred = credential("a@x", at(12, 0));
        assert!(!cred.is_valid("b@x", at(8, 0)));
    }

    #[test]
    fn tampered_expiry_fails_closed() {
        let mut cred = credential("a@x", at(12, 0));
        cred.token_exp = "tomorrow-ish".into();
        assert!(!cred.is_valid("a@x", at(8, 0)));
        assert_eq!(cred.expires_at(), None);
    }

    #[test]
    fn login_expiry_drops_safety_margin() {
        let data = LoginData {
            jwt_token: "jwt".into(),
            region_name: "eu".into(),
            wss_url: "wss://ws".into(),
            api_url: "https://api".into(),
            expired_time: 3660,
        };
        let cred = Credential::from_login("a@x", data, at(10, 0)).unwrap();
        assert_eq!(cred.expires_at(), Some(at(11, 0)));
    }

    #[test]
    fn absurd_login_lifetime_is_an_error() {
        for expired_time in [i64::MAX / 2, i64::MAX, i64::MIN] {
            let data = LoginData {
                jwt_token: "jwt".into(),
                region_name: "eu".into(),
                wss_url: "wss://ws".into(),
                api_url: "https://api".into(),
                expired_time,
            };
            let result = Credential::from_login("a@x", data, at(10, 0));
            assert!(
                matches!(result, Err(crate::error::WebackError::Auth(AuthFailure::Service(_)))),
                "expected Service error for {expired_time}, got: {result:?}"
            );
        }
    }

    #[test]
    fn accounts_keep_separate_sections() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("creds.toml"));

        store.save(&credential("a@x", at(12, 0))).unwrap();
        store.save(&credential("b@x", at(13, 0))).unwrap();
        store.save(&credential("a@x", at(14, 0))).unwrap();

        let a = store.load("a@x").unwrap();
        let b = store.load("b@x").unwrap();
        assert_eq!(a.jwt_token, "token-a@x");
        assert_eq!(a.expires_at(), Some(at(14, 0)));
        assert_eq!(b.jwt_token, "token-b@x");
        assert!(store.load("c@x").is_none());
    }

    #[test]
    fn missing_or_corrupt_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.toml");
        let store = CredentialStore::new(&path);
        assert!(store.load("a@x").is_none());

        std::fs::write(&path, "[[[ not toml").unwrap();
        assert!(store.load("a@x").is_none());

        store.save(&credential("a@x", at(12, 0))).unwrap();
        assert!(store.load("a@x").is_some());
    }
}
