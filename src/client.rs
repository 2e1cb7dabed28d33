use crate::auth::AuthClient;
use crate::config::SessionConfig;
use crate::credentials::CredentialStore;
use crate::device::VacuumDevice;
use crate::error::Result;
use std::sync::Arc;

/// Client for a WeBack cloud account
///
/// The `WebackClient` logs in once and hands out one [`VacuumDevice`] per
/// robot registered on the account. All devices share the client's login.
pub struct WebackClient {
    auth: Arc<AuthClient>,
    close_when_idle: bool,
}

impl WebackClient {
    /// Log in with the given configuration
    ///
    /// A cached token from `credentials_path` is reused when it is still
    /// valid for the same account.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use weback_vacuum::{AccountConfig, SessionConfig, WebackClient};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let config = SessionConfig::new(AccountConfig::new("me@example.com", "secret", "33"));
    ///     let client = WebackClient::new(config).await?;
    ///     for device in client.devices().await? {
    ///         println!("{} ({})", device.nickname(), device.thing_name());
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub async fn new(config: SessionConfig) -> Result<Self> {
        let store = Arc::new(CredentialStore::new(config.credentials_path));
        let auth = AuthClient::new(config.account, config.auth_url, store)?;
        auth.login().await?;

        Ok(Self {
            auth: Arc::new(auth),
            close_when_idle: config.close_when_idle,
        })
    }

    pub fn auth(&self) -> &Arc<AuthClient> {
        &self.auth
    }

    /// Robots registered on the account
    ///
    /// Each call creates fresh devices with their own, disconnected socket.
    pub async fn devices(&self) -> Result<Vec<VacuumDevice>> {
        let descriptors = self.auth.list_devices().await?;
        Ok(descriptors
            .into_iter()
            .map(|descriptor| VacuumDevice::new(descriptor, self.auth.clone(), self.close_when_idle))
            .collect())
    }
}
