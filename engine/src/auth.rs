//! Admin authentication against the shop server.
//!
//! The server checks the admin code and hands back a short-lived token. When
//! the server cannot be reached at all, the code is compared against one the
//! client already knows; any answer from the server, including a refusal,
//! is final.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::session::AdminSession;
use crate::store::remote::{status_error, transport_error};
use crate::wire::ErrorBody;
use crate::Timestamp;

/// Body of `POST /api/admin/verify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub code: String,
}

/// Answer to `POST /api/admin/verify`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Token lifetime in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerifyResponse {
    pub fn granted(token: impl Into<String>, expires_in: u64) -> Self {
        Self {
            success: true,
            token: Some(token.into()),
            expires_in: Some(expires_in),
            error: None,
        }
    }

    pub fn denied(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// A token issued by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminGrant {
    pub token: String,
    pub expires_in: u64,
}

/// How a login was granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LoginMethod {
    /// The server verified the code and issued a token
    Verified,
    /// The server was unreachable and the code matched the known one
    Fallback,
}

#[async_trait]
pub trait AuthGateway: Send + Sync {
    /// Store connection details and, if exposed, the admin code.
    async fn fetch_config(&self) -> Result<RemoteConfig>;

    /// Ask the server to verify `code`. Refusals are `AuthDenied`, transport
    /// failures are `Unreachable`.
    async fn verify_admin(&self, code: &str) -> Result<AdminGrant>;
}

/// [`AuthGateway`] over the server's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpAuthGateway {
    base_url: String,
    http: reqwest::Client,
}

impl HttpAuthGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }
}

#[async_trait]
impl AuthGateway for HttpAuthGateway {
    async fn fetch_config(&self) -> Result<RemoteConfig> {
        let response = self
            .http
            .get(self.url("config"))
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, ErrorBody::message_from(&body)));
        }
        response
            .json::<RemoteConfig>()
            .await
            .map_err(|e| Error::Protocol(e.to_string()))
    }

    async fn verify_admin(&self, code: &str) -> Result<AdminGrant> {
        let response = self
            .http
            .post(self.url("admin/verify"))
            .json(&VerifyRequest {
                code: code.to_string(),
            })
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        // Refusals come back as 401 with the same body shape.
        let verdict: VerifyResponse = serde_json::from_str(&body).unwrap_or_else(|_| {
            VerifyResponse::denied(format!("{}: {}", status, ErrorBody::message_from(&body)))
        });
        match verdict {
            VerifyResponse {
                success: true,
                token: Some(token),
                expires_in,
                ..
            } if status.is_success() => Ok(AdminGrant {
                token,
                expires_in: expires_in.unwrap_or(0),
            }),
            VerifyResponse { error, .. } => Err(Error::AuthDenied(
                error.unwrap_or_else(|| "invalid admin code".to_string()),
            )),
        }
    }
}

/// Log in with `code`.
///
/// The server decides whenever it answers. Only when it cannot be reached
/// is `code` compared to `fallback_code`, which yields a session without a
/// token.
pub async fn login(
    gateway: &dyn AuthGateway,
    code: &str,
    fallback_code: Option<&str>,
    now: Timestamp,
) -> Result<(AdminSession, LoginMethod)> {
    if code.trim().is_empty() {
        return Err(Error::AuthDenied("admin code required".into()));
    }

    match gateway.verify_admin(code).await {
        Ok(grant) => {
            tracing::info!(expires_in = grant.expires_in, "admin login verified");
            let expires_at = now.saturating_add(grant.expires_in);
            Ok((
                AdminSession::with_token(grant.token, expires_at),
                LoginMethod::Verified,
            ))
        }
        Err(Error::Unreachable(reason)) => match fallback_code {
            Some(known) if known == code => {
                tracing::warn!(reason = %reason, "auth server unreachable, admin code matched locally");
                Ok((AdminSession::basic(), LoginMethod::Fallback))
            }
            _ => Err(Error::AuthDenied(format!(
                "server unreachable and code not recognised ({})",
                reason
            ))),
        },
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreEndpoint;
    use crate::session::SessionStatus;

    struct StubGateway {
        answer: Result<AdminGrant>,
    }

    #[async_trait]
    impl AuthGateway for StubGateway {
        async fn fetch_config(&self) -> Result<RemoteConfig> {
            Ok(RemoteConfig {
                store: StoreEndpoint {
                    url: "http://store".into(),
                    token: None,
                },
                admin_code: Some("1234".into()),
            })
        }

        async fn verify_admin(&self, _code: &str) -> Result<AdminGrant> {
            self.answer.clone()
        }
    }

    fn gateway(answer: Result<AdminGrant>) -> StubGateway {
        StubGateway { answer }
    }

    #[tokio::test]
    async fn verified_login_issues_expiring_session() {
        let gw = gateway(Ok(AdminGrant {
            token: "tok".into(),
            expires_in: 3_600_000,
        }));
        let (mut session, method) = login(&gw, "1234", None, 1_000).await.unwrap();
        assert_eq!(method, LoginMethod::Verified);
        assert_eq!(session.token.as_deref(), Some("tok"));
        assert_eq!(session.expires_at, Some(3_601_000));
        assert_eq!(session.check(2_000), SessionStatus::Active);
    }

    #[tokio::test]
    async fn refusal_is_final_even_with_matching_fallback() {
        let gw = gateway(Err(Error::AuthDenied("Code incorrect".into())));
        let err = login(&gw, "1234", Some("1234"), 0).await.unwrap_err();
        assert_eq!(err, Error::AuthDenied("Code incorrect".into()));
    }

    #[tokio::test]
    async fn unreachable_server_falls_back_to_known_code() {
        let gw = gateway(Err(Error::Unreachable("connection refused".into())));
        let (mut session, method) = login(&gw, "1234", Some("1234"), 0).await.unwrap();
        assert_eq!(method, LoginMethod::Fallback);
        assert_eq!(session.check(u64::MAX), SessionStatus::Basic);

        let err = login(&gw, "9999", Some("1234"), 0).await.unwrap_err();
        assert!(matches!(err, Error::AuthDenied(_)));

        let err = login(&gw, "1234", None, 0).await.unwrap_err();
        assert!(matches!(err, Error::AuthDenied(_)));
    }

    #[tokio::test]
    async fn empty_code_is_refused_without_asking() {
        let gw = gateway(Err(Error::Unreachable("unused".into())));
        assert!(matches!(
            login(&gw, "  ", Some("  "), 0).await,
            Err(Error::AuthDenied(_))
        ));
    }

    #[test]
    fn verify_response_wire_shape() {
        let json = serde_json::to_value(VerifyResponse::granted("t", 3_600_000)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"success": true, "token": "t", "expiresIn": 3600000})
        );
        let json = serde_json::to_value(VerifyResponse::denied("Code incorrect")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"success": false, "error": "Code incorrect"})
        );
    }

    #[tokio::test]
    async fn http_gateway_reports_unreachable_server() {
        let gw = HttpAuthGateway::new("http://127.0.0.1:9/");
        assert!(matches!(
            gw.verify_admin("1234").await,
            Err(Error::Unreachable(_))
        ));
        assert!(matches!(gw.fetch_config().await, Err(Error::Unreachable(_))));
    }
}
