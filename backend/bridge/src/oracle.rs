//! # Session Oracle Client
//!
//! Asks the remote authority whether the visitor is signed in.
//!
//! ## Contract
//!
//! - Credentialed GET with `sync=1&t=<cache-buster>` and no-cache headers
//! - Primary endpoint first, legacy endpoint once if the primary fails
//! - Failure means a transport error, a non-2xx status, a body that does not
//!   parse, or `success: false`
//! - Both failing yields [`OracleResult::Unknown`], never a logout
//!
//! ## Response shape
//!
//! `{ success: bool, authenticated: bool, user: {...} | null, error?: string }`
//!
//! The legacy endpoint spells the same fields differently (`isLoggedIn`,
//! `userData`, `user_id`, `username`, ...). Both are folded into one model here.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{
    Client, Url,
    cookie::Jar,
    header::{ACCEPT, CACHE_CONTROL, PRAGMA},
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    error::OracleError,
    models::{OracleResult, UserRecord},
    utils::cache_buster,
};

#[derive(Debug, Deserialize)]
pub struct OracleResponse {
    #[serde(default = "default_success")]
    pub success: bool,

    #[serde(
        alias = "isLoggedIn",
        alias = "is_logged_in",
        alias = "loggedIn",
        alias = "logged_in"
    )]
    pub authenticated: bool,

    #[serde(default, alias = "userData", alias = "user_data")]
    pub user: Option<Value>,

    #[serde(default)]
    pub error: Option<String>,
}

fn default_success() -> bool {
    true
}

impl OracleResponse {
    /// Authenticated payloads without a usable user id count as signed out.
    pub fn normalize(self) -> OracleResult {
        if !self.authenticated {
            return OracleResult::Unauthenticated;
        }

        match self.user.and_then(UserRecord::from_value) {
            Some(user) => OracleResult::Authenticated(user),
            None => {
                warn!("Oracle claimed authenticated without a user id, treating as signed out");
                OracleResult::Unauthenticated
            }
        }
    }
}

/// How requests reach the authority. Implementations do not retry; fallback
/// between endpoints is the client's job.
#[async_trait]
pub trait OracleTransport: Send + Sync {
    async fn fetch_session(&self, endpoint: &Url) -> Result<OracleResponse, OracleError>;

    async fn logout(&self, endpoint: &Url) -> Result<(), OracleError>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// `session_cookie` is a `name=value` pair seeded into the jar for `origin`.
    /// Cookies the authority sets later are kept by the jar as well.
    pub fn new(
        timeout: Duration,
        origin: &Url,
        session_cookie: Option<&str>,
    ) -> Result<Self, OracleError> {
        let jar = Arc::new(Jar::default());

        if let Some(cookie) = session_cookie {
            let mut root = origin.clone();
            root.set_path("/");
            root.set_query(None);
            jar.add_cookie_str(&format!("{cookie}; Path=/"), &root);
        }

        let client = Client::builder()
            .cookie_provider(jar)
            .timeout(timeout)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl OracleTransport for HttpTransport {
    async fn fetch_session(&self, endpoint: &Url) -> Result<OracleResponse, OracleError> {
        let buster = cache_buster();

        let response = self
            .client
            .get(endpoint.clone())
            .query(&[("sync", "1"), ("t", buster.as_str())])
            .header(CACHE_CONTROL, "no-cache, no-store")
            .header(PRAGMA, "no-cache")
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Status(status.as_u16()));
        }

        let body = response.text().await?;

        Ok(serde_json::from_str(&body)?)
    }

    async fn logout(&self, endpoint: &Url) -> Result<(), OracleError> {
        let response = self
            .client
            .post(endpoint.clone())
            .header(CACHE_CONTROL, "no-cache, no-store")
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Status(status.as_u16()));
        }

        Ok(())
    }
}

pub struct OracleClient {
    transport: Arc<dyn OracleTransport>,
    primary: Url,
    legacy: Url,
    logout: Url,
}

impl OracleClient {
    pub fn new(transport: Arc<dyn OracleTransport>, primary: Url, legacy: Url, logout: Url) -> Self {
        Self {
            transport,
            primary,
            legacy,
            logout,
        }
    }

    pub async fn check(&self) -> OracleResult {
        for (label, endpoint) in [("primary", &self.primary), ("legacy", &self.legacy)] {
            match self.query(endpoint).await {
                Ok(result) => {
                    debug!("Session check via {label} endpoint: {result:?}");
                    return result;
                }
                Err(e) => warn!("{label} session endpoint {endpoint} failed: {e}"),
            }
        }

        warn!("Session oracle unreachable, keeping last known state");
        OracleResult::Unknown
    }

    pub async fn logout(&self) -> Result<(), OracleError> {
        self.transport.logout(&self.logout).await
    }

    async fn query(&self, endpoint: &Url) -> Result<OracleResult, OracleError> {
        let response = self.transport.fetch_session(endpoint).await?;

        if !response.success {
            let reason = response
                .error
                .unwrap_or_else(|| "success=false".to_string());
            return Err(OracleError::Rejected(reason));
        }

        if let Some(error) = &response.error {
            debug!("Oracle attached an error to a successful response: {error}");
        }

        Ok(response.normalize())
    }
}

#[cfg(test)]
pub(crate) mod scripted {
    use std::{
        collections::VecDeque,
        sync::{
            Mutex,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
    };

    use super::*;

    pub enum Reply {
        Json(Value),
        Status(u16),
    }

    /// Replays canned replies in FIFO order. An empty script answers with a 503.
    pub struct ScriptedTransport {
        replies: Mutex<VecDeque<Reply>>,
        calls: Mutex<Vec<Url>>,
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        logout_ok: AtomicBool,
    }

    impl ScriptedTransport {
        pub fn new(replies: Vec<Reply>) -> Self {
            Self::with_delay(replies, Duration::ZERO)
        }

        pub fn with_delay(replies: Vec<Reply>, delay: Duration) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
                delay,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                logout_ok: AtomicBool::new(true),
            }
        }

        pub fn push(&self, reply: Reply) {
            self.replies.lock().unwrap().push_back(reply);
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|url| url.path().to_string())
                .collect()
        }

        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }

        pub fn fail_logout(&self) {
            self.logout_ok.store(false, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl OracleTransport for ScriptedTransport {
        async fn fetch_session(&self, endpoint: &Url) -> Result<OracleResponse, OracleError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.calls.lock().unwrap().push(endpoint.clone());

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let reply = self.replies.lock().unwrap().pop_front();
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match reply {
                Some(Reply::Json(value)) => Ok(serde_json::from_value(value)?),
                Some(Reply::Status(code)) => Err(OracleError::Status(code)),
                None => Err(OracleError::Status(503)),
            }
        }

        async fn logout(&self, _endpoint: &Url) -> Result<(), OracleError> {
            if self.logout_ok.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(OracleError::Status(502))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        scripted::{Reply, ScriptedTransport},
        *,
    };

    fn url(path: &str) -> Url {
        Url::parse(&format!("http://auth.test{path}")).unwrap()
    }

    fn client(transport: Arc<ScriptedTransport>) -> OracleClient {
        OracleClient::new(transport, url("/primary"), url("/legacy"), url("/logout"))
    }

    #[tokio::test]
    async fn test_primary_authenticated() {
        let transport = Arc::new(ScriptedTransport::new(vec![Reply::Json(json!({
            "success": true,
            "authenticated": true,
            "user": { "id": 42, "name": "Ada" }
        }))]));

        let result = client(transport.clone()).check().await;

        assert_eq!(result, OracleResult::Authenticated(UserRecord::new("42", "Ada")));
        assert_eq!(transport.calls(), vec!["/primary"]);
    }

    #[tokio::test]
    async fn test_falls_back_on_status() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Reply::Status(500),
            Reply::Json(json!({ "isLoggedIn": false, "userData": null })),
        ]));

        let result = client(transport.clone()).check().await;

        assert_eq!(result, OracleResult::Unauthenticated);
        assert_eq!(transport.calls(), vec!["/primary", "/legacy"]);
    }

    #[tokio::test]
    async fn test_falls_back_on_malformed_body() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Reply::Json(json!({ "success": true })),
            Reply::Json(json!({
                "logged_in": true,
                "user_data": { "user_id": "7", "username": "grace" }
            })),
        ]));

        let result = client(transport).check().await;

        assert_eq!(result, OracleResult::Authenticated(UserRecord::new("7", "grace")));
    }

    #[tokio::test]
    async fn test_success_false_is_failure() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Reply::Json(json!({ "success": false, "authenticated": false, "error": "db down" })),
            Reply::Status(502),
        ]));

        assert_eq!(client(transport).check().await, OracleResult::Unknown);
    }

    #[tokio::test]
    async fn test_both_unreachable_is_unknown() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));

        assert_eq!(client(transport.clone()).check().await, OracleResult::Unknown);
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_id_is_unauthenticated() {
        let transport = Arc::new(ScriptedTransport::new(vec![Reply::Json(json!({
            "success": true,
            "authenticated": true,
            "user": { "name": "NoId" }
        }))]));

        assert_eq!(client(transport).check().await, OracleResult::Unauthenticated);
    }

    #[tokio::test]
    async fn test_logout_error_propagates() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        transport.fail_logout();

        assert!(matches!(
            client(transport).logout().await,
            Err(OracleError::Status(502))
        ));
    }
}
