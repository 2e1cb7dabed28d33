use crate::error::Result;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};

/// Default OAuth endpoint of the WeBack cloud
pub const DEFAULT_AUTH_URL: &str = "https://user.grit-cloud.com/prod/oauth";

/// WeBack account used to log in
#[derive(Debug, Deserialize)]
pub struct AccountConfig {
    /// Account login (email or phone number)
    pub username: String,

    #[serde(deserialize_with = "secret_string")]
    pub password: SecretString,

    /// Phone calling code of the account's country, without leading zeros (e.g. `33`)
    pub region: String,

    #[serde(default = "default_language")]
    pub language: String,

    /// Application name, case sensitive
    #[serde(default = "default_application")]
    pub application: String,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default = "default_api_version")]
    pub api_version: String,
}

impl AccountConfig {
    /// Create an account with the default language, application and client id
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
            region: region.into(),
            language: default_language(),
            application: default_application(),
            client_id: default_client_id(),
            api_version: default_api_version(),
        }
    }

    /// Password digest sent to the auth server (hex MD5)
    pub fn password_digest(&self) -> String {
        use md5::{Digest, Md5};

        hex::encode(Md5::digest(self.password.expose_secret().as_bytes()))
    }

    /// Calling code as the auth server expects it (`00` prefix)
    pub fn calling_code(&self) -> String {
        format!("00{}", self.region)
    }
}

/// Complete session configuration
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    pub account: AccountConfig,

    /// File holding cached tokens, one section per account
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,

    #[serde(default = "default_auth_url")]
    pub auth_url: String,

    /// Close the socket once the robot is docked instead of waiting for the
    /// server to drop it
    #[serde(default = "default_true")]
    pub close_when_idle: bool,
}

impl SessionConfig {
    /// Configuration with defaults for everything but the account
    pub fn new(account: AccountConfig) -> Self {
        Self {
            account,
            credentials_path: default_credentials_path(),
            auth_url: default_auth_url(),
            close_when_idle: true,
        }
    }

    /// Parse a TOML document
    ///
    /// ```
    /// use weback_vacuum::SessionConfig;
    ///
    /// let config = SessionConfig::from_toml_str(r#"
    ///     [account]
    ///     username = "me@example.com"
    ///     password = "hunter2"
    ///     region = "33"
    /// "#).unwrap();
    /// assert_eq!(config.account.application, "WeBack");
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

fn secret_string<'de, D>(deserializer: D) -> std::result::Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

fn default_language() -> String {
    "en".into()
}

fn default_application() -> String {
    "WeBack".into()
}

fn default_client_id() -> String {
    "yugong_app".into()
}

fn default_api_version() -> String {
    "1.0".into()
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("weback_creds.toml")
}

fn default_auth_url() -> String {
    DEFAULT_AUTH_URL.into()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_digest_is_hex_md5() {
        let account = AccountConfig::new("me@example.com", "password", "33");
        assert_eq!(account.password_digest(), "5f4dcc3b5aa765d61d8327deb882cf99");
        assert_eq!(account.calling_code(), "0033");
    }

    #[test]
    fn overrides_and_defaults() {
        let config = SessionConfig::from_toml_str(
            r#"
            credentials_path = "/var/lib/weback/creds.toml"
            close_when_idle = false

            [account]
            username = "me@example.com"
            password = "hunter2"
            region = "1"
            language = "fr"
            "#,
        )
        .unwrap();

        assert_eq!(config.account.language, "fr");
        assert_eq!(config.account.client_id, "yugong_app");
        assert_eq!(config.account.api_version, "1.0");
        assert_eq!(config.auth_url, DEFAULT_AUTH_URL);
        assert_eq!(config.credentials_path, PathBuf::from("/var/lib/weback/creds.toml"));
        assert!(!config.close_when_idle);
    }

    #[test]
    fn missing_account_is_an_error() {
        assert!(SessionConfig::from_toml_str("auth_url = \"http://x\"").is_err());
    }
}
