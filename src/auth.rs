//! WeBack HTTP API client
//!
//! Login against the OAuth endpoint, then list robots and fetch saved maps
//! from the account's regional API. Every call goes through `send_http`,
//! which retries a fixed number of times and never leaks a transport error
//! type to callers.

use crate::config::AccountConfig;
use crate::credentials::{Credential, CredentialStore};
use crate::error::{AuthFailure, Result, WebackError};
use crate::protocol::{ApiResponse, LoginData, LoginHeader, LoginPayload, LoginRequest, ReuseMap, ThingList};
use crate::types::DeviceDescriptor;
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Attempts made for each HTTP request
pub const HTTP_RETRIES: u32 = 8;
const HTTP_TIMEOUT: Duration = Duration::from_secs(5);
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Authenticated access to the WeBack HTTP API
///
/// Holds the current credential in memory and mirrors every fresh login
/// into the shared [`CredentialStore`].
pub struct AuthClient {
    http: reqwest::Client,
    account: AccountConfig,
    auth_url: String,
    store: Arc<CredentialStore>,
    credential: RwLock<Option<Credential>>,
}

impl AuthClient {
    /// Create a client, reloading any cached credential for the account
    pub fn new(account: AccountConfig, auth_url: impl Into<String>, store: Arc<CredentialStore>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| WebackError::Transport(e.to_string()))?;

        let cached = store.load_valid(&account.username);
        if cached.is_some() {
            tracing::debug!("Reloaded cached credential for {}", account.username);
        }

        Ok(Self {
            http,
            account,
            auth_url: auth_url.into(),
            store,
            credential: RwLock::new(cached),
        })
    }

    /// Account login this client authenticates
    pub fn account(&self) -> &str {
        &self.account.username
    }

    /// Current in-memory credential, valid or not
    pub fn credential(&self) -> Option<Credential> {
        self.credential
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn install(&self, credential: Credential) {
        *self
            .credential
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(credential);
    }

    /// Log in, reusing the cached token when it is still valid for this account
    pub async fn login(&self) -> Result<Credential> {
        let account = self.account.username.clone();

        if let Some(cached) = self.store.load_valid(&account) {
            tracing::debug!("Using cached credential for {}", account);
            self.install(cached.clone());
            return Ok(cached);
        }

        tracing::debug!("No valid cached credential for {}, logging in", account);
        let request = LoginRequest {
            payload: LoginPayload {
                opt: "login",
                pwd: self.account.password_digest(),
            },
            header: LoginHeader {
                language: self.account.language.clone(),
                app_name: self.account.application.clone(),
                calling_code: self.account.calling_code(),
                api_version: self.account.api_version.clone(),
                account: account.clone(),
                client_id: self.account.client_id.clone(),
            },
        };

        let response = self.send_http(&self.auth_url, &request, None).await?;
        if !response.is_success() {
            let failure = AuthFailure::from_msg(&response.msg);
            tracing::error!("Login failed for {}: {}", account, failure);
            return Err(failure.into());
        }

        let data: LoginData = response.data()?;
        let credential = Credential::from_login(&account, data, chrono::Utc::now().naive_utc())?;
        tracing::debug!("Login successful for {}, token valid until {}", account, credential.token_exp);

        if let Err(e) = self.store.save(&credential) {
            tracing::warn!("Failed to save credential for {}: {}", account, e);
        }
        self.install(credential.clone());
        Ok(credential)
    }

    /// Return a usable credential, logging in again if it expired
    pub async fn ensure_credentials(&self) -> Result<Credential> {
        if let Some(current) = self.credential() {
            if current.is_valid_now(&self.account.username) {
                return Ok(current);
            }
        }
        tracing::debug!("Credential for {} needs renewal", self.account.username);
        self.login().await
    }

    /// Robots registered on the account
    pub async fn list_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        tracing::debug!("Requesting robot list");
        let response = self.api_call(&json!({ "opt": "user_thing_list_get" })).await?;
        let list: ThingList = response.data()?;
        tracing::debug!("Robot list contains {} robots", list.thing_list.len());
        Ok(list.thing_list)
    }

    /// Compressed payload of a saved ("reuse") map
    pub async fn fetch_reuse_map(&self, map_id: &str, sub_type: &str, thing_name: &str) -> Result<String> {
        tracing::debug!("Requesting reuse map {} for {}", map_id, thing_name);
        let response = self
            .api_call(&json!({
                "opt": "reuse_map_get",
                "map_id": map_id,
                "sub_type": sub_type,
                "thing_name": thing_name,
            }))
            .await?;
        let map: ReuseMap = response.data()?;
        Ok(map.map_data)
    }

    async fn api_call(&self, body: &serde_json::Value) -> Result<ApiResponse> {
        let credential = self.ensure_credentials().await?;
        let response = self.send_http(&credential.api_url, body, Some(&credential)).await?;
        if response.is_success() {
            Ok(response)
        } else {
            let failure = AuthFailure::from_msg(&response.msg);
            tracing::error!("API call {} failed: {}", body["opt"], failure);
            Err(failure.into())
        }
    }

    /// POST `body` as JSON, retrying on transport errors and non-200 answers
    async fn send_http(
        &self,
        url: &str,
        body: &(impl Serialize + Sync),
        credential: Option<&Credential>,
    ) -> Result<ApiResponse> {
        tracing::debug!("POST {}", url);

        for attempt in 1..=HTTP_RETRIES {
            let mut request = self.http.post(url).json(body);
            if let Some(credential) = credential {
                request = request
                    .header("Token", &credential.jwt_token)
                    .header("Region", &credential.region_name);
            }

            match request.send().await {
                Ok(resp) if resp.status() == reqwest::StatusCode::OK => match resp.json::<ApiResponse>().await {
                    Ok(response) => {
                        tracing::debug!("POST {} answered msg={}", url, response.msg);
                        return Ok(response);
                    }
                    Err(e) => tracing::warn!("Unreadable response from {} ({}/{}): {}", url, attempt, HTTP_RETRIES, e),
                },
                Ok(resp) => tracing::warn!(
                    "Bad server response from {} (status={}) ({}/{})",
                    url,
                    resp.status(),
                    attempt,
                    HTTP_RETRIES
                ),
                Err(e) => tracing::debug!("POST {} failed ({}/{}): {}", url, attempt, HTTP_RETRIES, e),
            }
        }

        tracing::error!("HTTP request to {} failed after {} attempts", url, HTTP_RETRIES);
        Err(WebackError::Transport(format!(
            "request to {url} failed after {HTTP_RETRIES} attempts"
        )))
    }
}
