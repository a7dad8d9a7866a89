//! Docker Registry V2 bearer challenge parsing.
//!
//! A registry that wants authentication answers the first blob request with
//! 401/403 and a `WWW-Authenticate` header of the form
//! `Bearer realm="…",service="…",scope="…"`. [`Challenge`] holds the three
//! required fields and composes the token endpoint URL from them.

use crate::error::{Error, Result};
use std::fmt;

const BEARER_PREFIX: &str = "Bearer ";

/// A parsed `WWW-Authenticate: Bearer …` challenge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Challenge {
    /// URL of the token service.
    pub realm: String,
    /// Service identifier, echoed back to the token endpoint.
    pub service: String,
    /// Credential context (e.g. `repository:library/alpine:pull`). Tokens
    /// are cached under this string verbatim.
    pub scope: String,
}

impl Challenge {
    /// Parse the raw value of a `www-authenticate` response header.
    ///
    /// The `Bearer ` prefix is matched case-insensitively. Parameters are
    /// split on commas outside double quotes, so a scope like
    /// `repository:foo:pull,push` survives. Keys other than `realm`,
    /// `service` and `scope` are ignored; all three are required.
    pub fn parse(header: &str) -> Result<Self> {
        let header = header.trim();
        if header.len() < BEARER_PREFIX.len()
            || !header[..BEARER_PREFIX.len()].eq_ignore_ascii_case(BEARER_PREFIX)
        {
            return Err(Error::Protocol(format!(
                "not a bearer challenge: {header}"
            )));
        }

        let mut realm = None;
        let mut service = None;
        let mut scope = None;
        for item in split_outside_quotes(&header[BEARER_PREFIX.len()..]) {
            let Some((key, value)) = item.split_once('=') else {
                continue;
            };
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            match key.trim() {
                "realm" => realm = Some(value.to_string()),
                "service" => service = Some(value.to_string()),
                "scope" => scope = Some(value.to_string()),
                _ => {}
            }
        }

        match (realm, service, scope) {
            (Some(realm), Some(service), Some(scope)) => Ok(Self {
                realm,
                service,
                scope,
            }),
            _ => Err(Error::Protocol(format!(
                "challenge missing realm, service or scope: {header}"
            ))),
        }
    }

    /// The token endpoint URL: `{realm}?service={service}&scope={scope}`.
    ///
    /// Values are inserted verbatim, without additional URL-encoding; the
    /// registry composed them for exactly this round trip.
    pub fn auth_url(&self) -> String {
        format!(
            "{}?service={}&scope={}",
            self.realm, self.service, self.scope
        )
    }
}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bearer realm=\"{}\",service=\"{}\",scope=\"{}\"",
            self.realm, self.service, self.scope
        )
    }
}

/// Split on commas that are not inside double quotes.
fn split_outside_quotes(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}
