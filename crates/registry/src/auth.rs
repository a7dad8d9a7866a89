//! Token acquisition against the registry's auth realm.

use crate::http::{self, HttpClient};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use wharf_core::{Challenge, Credentials, Deadline, Error, Result};

/// Cap on the token endpoint response body.
const TOKEN_BODY_LIMIT: usize = 16 * 1024;

/// Token endpoint response. Some registries answer with `token`, others
/// with `access_token`; the first present wins.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

impl TokenResponse {
    fn into_token(self) -> Option<String> {
        self.token.or(self.access_token)
    }
}

/// `Authorization: Basic …` header value for the given credentials.
pub(crate) fn basic_header(credentials: &Credentials) -> String {
    let userpass = format!("{}:{}", credentials.username, credentials.password);
    format!("Basic {}", BASE64.encode(userpass))
}

/// GET the composed realm URL and extract a bearer token from the JSON
/// body. Anonymous when the username is empty; no redirect follow, no
/// retries. Invalidation is the caller's poison-release plus its retry.
pub(crate) async fn fetch_token(
    http: &HttpClient,
    challenge: &Challenge,
    credentials: &Credentials,
    deadline: Deadline,
) -> Result<String> {
    let url = challenge.auth_url();
    let mut req = http.get(&url);
    if !credentials.is_anonymous() {
        req = req.header(reqwest::header::AUTHORIZATION, basic_header(credentials));
    }
    let resp = http.send(req, &url, deadline).await?;
    let status = resp.status();
    if status != reqwest::StatusCode::OK {
        tracing::error!(url = %url, status = status.as_u16(), "token request refused");
        return Err(Error::PermissionDenied(format!(
            "token endpoint {url} answered {}",
            status.as_u16()
        )));
    }
    let body = http::read_body_capped(resp, TOKEN_BODY_LIMIT, &url).await?;
    let parsed: TokenResponse = serde_json::from_slice(&body)
        .map_err(|e| Error::Protocol(format!("token endpoint {url} returned invalid JSON: {e}")))?;
    parsed.into_token().ok_or_else(|| {
        Error::Protocol(format!(
            "token endpoint {url} returned neither token nor access_token"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_header() {
        assert_eq!(basic_header(&Credentials::basic("u", "p")), "Basic dTpw");
    }

    #[test]
    fn test_token_field_preferred() {
        let parsed: TokenResponse =
            serde_json::from_str(r#"{"token":"T","access_token":"A"}"#).unwrap();
        assert_eq!(parsed.into_token().as_deref(), Some("T"));
    }

    #[test]
    fn test_access_token_fallback() {
        let parsed: TokenResponse = serde_json::from_str(r#"{"access_token":"A"}"#).unwrap();
        assert_eq!(parsed.into_token().as_deref(), Some("A"));
    }

    #[test]
    fn test_tokenless_body() {
        let parsed: TokenResponse = serde_json::from_str(r#"{"expires_in":300}"#).unwrap();
        assert_eq!(parsed.into_token(), None);
    }
}
