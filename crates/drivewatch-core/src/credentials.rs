// # Credential Manager
//
// Wraps a remote call that needs a bearer credential. On an authorization
// failure the access credential is refreshed once and the call retried; a
// second authorization failure, or an unusable refresh credential, is fatal
// for the current check.
//
// Every outbound call made through the manager is bounded by the configured
// request timeout; an elapsed timeout is reported as a connectivity failure.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, RemoteError, Result};
use crate::traits::TokenRefresher;

pub struct CredentialManager {
    refresher: Arc<dyn TokenRefresher>,
    timeout: Duration,
}

impl CredentialManager {
    pub fn new(refresher: Arc<dyn TokenRefresher>, timeout: Duration) -> Self {
        Self { refresher, timeout }
    }

    /// Run `operation` with `access_token`, refreshing it at most once
    ///
    /// On return `access_token` holds the credential that should be cached
    /// for the next cycle, refreshed or not.
    ///
    /// # Errors
    ///
    /// - `Error::Unrecoverable`: the refresh credential was rejected, or the
    ///   call was still unauthorized after a refresh
    /// - `Error::Remote`: any other failure of the call or of the refresh
    pub async fn acquire_and_call<T, F, Fut>(
        &self,
        access_token: &mut String,
        refresh_token: &str,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = std::result::Result<T, RemoteError>>,
    {
        match self.bounded(operation(access_token.clone())).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_unauthorized() => {
                debug!("Access credential rejected, refreshing: {}", e);
            }
            Err(e) => return Err(e.into()),
        }

        let refreshed = match self
            .bounded(self.refresher.refresh_access_token(refresh_token))
            .await
        {
            Ok(token) => token,
            Err(e) if e.is_auth_failure() => {
                return Err(Error::unrecoverable(format!(
                    "refresh credential rejected: {}",
                    e
                )));
            }
            Err(e) => {
                warn!("Credential refresh failed: {}", e);
                return Err(e.into());
            }
        };
        *access_token = refreshed;

        match self.bounded(operation(access_token.clone())).await {
            Ok(value) => Ok(value),
            Err(e) if e.is_unauthorized() => Err(Error::unrecoverable(format!(
                "unauthorized after credential refresh: {}",
                e
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn bounded<T, Fut>(&self, fut: Fut) -> std::result::Result<T, RemoteError>
    where
        Fut: Future<Output = std::result::Result<T, RemoteError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Connectivity(format!(
                "no response within {:?}",
                self.timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedRefresher {
        calls: AtomicUsize,
        result: std::result::Result<String, RemoteError>,
    }

    impl ScriptedRefresher {
        fn new(result: std::result::Result<String, RemoteError>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                result,
            })
        }
    }

    #[async_trait]
    impl TokenRefresher for ScriptedRefresher {
        async fn refresh_access_token(
            &self,
            _refresh_token: &str,
        ) -> std::result::Result<String, RemoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn manager(refresher: Arc<ScriptedRefresher>) -> CredentialManager {
        CredentialManager::new(refresher, Duration::from_secs(5))
    }

    fn unauthorized() -> RemoteError {
        RemoteError::Unauthorized("401".to_string())
    }

    /// Operation that replays `script` and records the tokens it was given
    fn scripted(
        script: Vec<std::result::Result<u32, RemoteError>>,
        seen: Arc<Mutex<Vec<String>>>,
    ) -> impl FnMut(String) -> std::future::Ready<std::result::Result<u32, RemoteError>> {
        let mut script = script.into_iter();
        move |token| {
            seen.lock().unwrap().push(token);
            std::future::ready(script.next().unwrap_or(Ok(0)))
        }
    }

    #[tokio::test]
    async fn test_ok_without_refresh() {
        let refresher = ScriptedRefresher::new(Ok("new".to_string()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut token = "old".to_string();

        let value = manager(refresher.clone())
            .acquire_and_call(&mut token, "refresh", scripted(vec![Ok(7)], seen.clone()))
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(token, "old");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unauthorized_once_refreshes_exactly_once() {
        let refresher = ScriptedRefresher::new(Ok("new".to_string()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut token = "old".to_string();

        let value = manager(refresher.clone())
            .acquire_and_call(
                &mut token,
                "refresh",
                scripted(vec![Err(unauthorized()), Ok(7)], seen.clone()),
            )
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(token, "new");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["old".to_string(), "new".to_string()]);
    }

    #[tokio::test]
    async fn test_unauthorized_twice_is_fatal_without_third_call() {
        let refresher = ScriptedRefresher::new(Ok("new".to_string()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut token = "old".to_string();

        let err = manager(refresher.clone())
            .acquire_and_call(
                &mut token,
                "refresh",
                scripted(
                    vec![Err(unauthorized()), Err(unauthorized()), Ok(7)],
                    seen.clone(),
                ),
            )
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_refresh_credential_is_fatal() {
        let refresher =
            ScriptedRefresher::new(Err(RemoteError::InvalidGrant("invalid_grant".to_string())));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut token = "old".to_string();

        let err = manager(refresher)
            .acquire_and_call(&mut token, "refresh", scripted(vec![Err(unauthorized())], seen.clone()))
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(token, "old");
    }

    #[tokio::test]
    async fn test_refresh_server_error_is_soft_and_not_retried() {
        let refresher = ScriptedRefresher::new(Err(RemoteError::Server("503".to_string())));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut token = "old".to_string();

        let err = manager(refresher)
            .acquire_and_call(&mut token, "refresh", scripted(vec![Err(unauthorized())], seen.clone()))
            .await
            .unwrap_err();

        assert!(!err.is_fatal());
        assert!(matches!(err, Error::Remote(RemoteError::Server(_))));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_other_errors_pass_through() {
        let refresher = ScriptedRefresher::new(Ok("new".to_string()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut token = "old".to_string();

        let err = manager(refresher.clone())
            .acquire_and_call(
                &mut token,
                "refresh",
                scripted(vec![Err(RemoteError::Malformed("eof".to_string()))], seen),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Remote(RemoteError::Malformed(_))));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeout_is_connectivity_failure() {
        let refresher = ScriptedRefresher::new(Ok("new".to_string()));
        let mut token = "old".to_string();

        let err = CredentialManager::new(refresher, Duration::from_millis(50))
            .acquire_and_call(&mut token, "refresh", |_token| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<u32, RemoteError>(1)
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Remote(RemoteError::Connectivity(_))));
    }
}
