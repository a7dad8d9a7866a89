//! Resolved blob endpoints.

/// How reads against a blob URL must be issued once resolved.
///
/// The two variants are mutually exclusive by construction: a redirect
/// target never carries a bearer token, and the origin never carries a
/// foreign location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UrlInfo {
    /// The registry redirected to a foreign URL (CDN, object store).
    /// Subsequent GETs target `location` directly, with no auth header.
    Redirect { location: String },
    /// The registry serves the blob itself. Subsequent GETs target the
    /// original URL and carry `Authorization: Bearer <token>` when present.
    Origin { bearer: Option<String> },
}

impl UrlInfo {
    /// The URL reads must target: the redirect location, or the original.
    pub fn effective_url<'a>(&'a self, original: &'a str) -> &'a str {
        match self {
            UrlInfo::Redirect { location } => location,
            UrlInfo::Origin { .. } => original,
        }
    }

    /// Bearer token to attach, if any. Always `None` in redirect mode.
    pub fn bearer(&self) -> Option<&str> {
        match self {
            UrlInfo::Redirect { .. } => None,
            UrlInfo::Origin { bearer } => bearer.as_deref().filter(|t| !t.is_empty()),
        }
    }

    /// Whether reads go to a foreign location.
    pub fn is_redirect(&self) -> bool {
        matches!(self, UrlInfo::Redirect { .. })
    }
}
