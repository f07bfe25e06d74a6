use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::api::{ApiClient, ApiError, RequestOptions};

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access: String,
    #[serde(default)]
    user: Option<Value>,
}

/// Login and logout on top of an [`ApiClient`].
///
/// Login sets the access token and the backend sets the renewal cookie on the
/// same response. Logout always clears local credentials, whatever the
/// backend says.
#[derive(Clone)]
pub struct Session {
    api: ApiClient,
}

impl Session {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Authenticate and store the returned token and user identity.
    /// Returns the user object, if the backend sent one.
    pub async fn login(&self, username: &str, password: &str) -> Result<Option<Value>, ApiError> {
        let options = RequestOptions::post()
            .json(&LoginRequest { username, password })
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        let login_url = self.api.endpoints().login.clone();

        let response = self.api.request_anonymous(&login_url, options).await?;
        if matches!(
            response.status,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED
        ) {
            warn!(username, status = %response.status, "Login rejected");
            return Err(ApiError::InvalidCredentials);
        }
        let response = ApiClient::check_response(response)?;

        let login: LoginResponse = response
            .json()
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse login response: {}", e)))?;
        if login.access.is_empty() {
            return Err(ApiError::InvalidResponse(
                "Login response did not contain an access token".into(),
            ));
        }

        let credentials = self.api.credentials();
        credentials.set(login.access);
        if let Some(ref user) = login.user {
            credentials.set_user(user.clone());
        }
        info!(username, "Logged in");
        Ok(login.user)
    }

    /// Invalidate the renewal cookie server-side and clear local credentials.
    /// Local state is cleared even when the backend call fails; the error is
    /// still returned so the caller can report it.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let logout_url = self.api.endpoints().logout.clone();
        let result = self
            .api
            .request_with_retry(&logout_url, RequestOptions::post(), false)
            .await
            .and_then(ApiClient::check_response);

        self.api.credentials().clear();

        match result {
            Ok(_) => {
                info!("Logged out");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Logout request failed, local credentials cleared anyway");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{Harness, ScriptedTransport};
    use crate::auth::MemoryStore;
    use reqwest::header;
    use serde_json::json;

    const LOGIN_PATH: &str = "/ai_chat/auth/login/";
    const LOGOUT_PATH: &str = "/ai_chat/auth/logout/";

    #[tokio::test]
    async fn test_login_stores_token_and_user() {
        let transport = ScriptedTransport::accepting("T1").with_route(
            LOGIN_PATH,
            StatusCode::OK,
            r#"{"access":"T1","user":{"id":4,"username":"koliakova"}}"#,
        );
        let harness = Harness::new(transport);
        harness.client.credentials().set("old");
        let session = Session::new(harness.client.clone());

        let user = session.login("koliakova", "secret").await.unwrap();

        assert_eq!(user, Some(json!({"id": 4, "username": "koliakova"})));
        assert_eq!(harness.client.credentials().get().as_deref(), Some("T1"));
        assert_eq!(harness.stored_access().as_deref(), Some("T1"));

        let sent = harness.transport.route_requests();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].headers.get(header::AUTHORIZATION).is_none());
        let body: Value = serde_json::from_slice(sent[0].body.as_ref().unwrap()).unwrap();
        assert_eq!(body, json!({"username": "koliakova", "password": "secret"}));

        // The stored token now works for data requests
        let response = harness
            .client
            .request("chats", RequestOptions::get())
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rejected_login_does_not_renew() {
        let transport = ScriptedTransport::accepting("T1")
            .with_route(LOGIN_PATH, StatusCode::UNAUTHORIZED, r#"{"detail":"bad"}"#)
            .with_renewal(StatusCode::OK, r#"{"access":"T9"}"#);
        let harness = Harness::new(transport);
        let session = Session::new(harness.client.clone());

        let result = session.login("koliakova", "wrong").await;

        assert!(matches!(result, Err(ApiError::InvalidCredentials)));
        assert_eq!(harness.transport.renewal_calls(), 0);
        assert_eq!(harness.client.credentials().get(), None);
    }

    #[tokio::test]
    async fn test_login_server_error_is_reported() {
        let transport = ScriptedTransport::accepting("T1").with_route(
            LOGIN_PATH,
            StatusCode::INTERNAL_SERVER_ERROR,
            "boom",
        );
        let harness = Harness::new(transport);
        let session = Session::new(harness.client.clone());

        let result = session.login("koliakova", "secret").await;
        assert!(matches!(result, Err(ApiError::ServerError(_))));
    }

    #[tokio::test]
    async fn test_logout_clears_credentials() {
        let durable = MemoryStore::new();
        let transport =
            ScriptedTransport::accepting("T1").with_route(LOGOUT_PATH, StatusCode::OK, "{}");
        let harness = Harness::with_durable(transport, durable.clone());
        harness.client.credentials().set("T1");
        harness.client.credentials().set_user(json!({"id": 4}));
        let session = Session::new(harness.client.clone());

        session.logout().await.unwrap();

        assert_eq!(harness.client.credentials().get(), None);
        assert_eq!(harness.client.credentials().user(), None);
        assert!(!durable.contains("access"));
        assert!(!durable.contains("user"));
        let sent = harness.transport.route_requests();
        assert_eq!(sent[0].bearer_token(), Some("T1"));
    }

    #[tokio::test]
    async fn test_logout_clears_credentials_even_on_failure() {
        let transport = ScriptedTransport::accepting("T1").with_route(
            LOGOUT_PATH,
            StatusCode::BAD_GATEWAY,
            "upstream down",
        );
        let harness = Harness::new(transport);
        harness.client.credentials().set("T1");
        let session = Session::new(harness.client.clone());

        let result = session.logout().await;

        assert!(matches!(result, Err(ApiError::ServerError(_))));
        assert_eq!(harness.client.credentials().get(), None);
        assert_eq!(harness.stored_access(), None);
    }

    #[tokio::test]
    async fn test_logout_unauthorized_does_not_renew() {
        let transport = ScriptedTransport::accepting("T1")
            .with_route(LOGOUT_PATH, StatusCode::UNAUTHORIZED, "")
            .with_renewal(StatusCode::OK, r#"{"access":"T2"}"#);
        let harness = Harness::new(transport);
        harness.client.credentials().set("expired");
        let session = Session::new(harness.client.clone());

        let result = session.logout().await;

        assert!(matches!(result, Err(ApiError::Unauthorized)));
        assert_eq!(harness.transport.renewal_calls(), 0);
        assert_eq!(harness.client.credentials().get(), None);
    }
}
