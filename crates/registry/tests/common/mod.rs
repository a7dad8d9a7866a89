use std::net::TcpListener;
use wharf_core::{Credentials, RegistryConfig};
use wharf_registry::RegistryFs;

/// Sandboxed CI environments sometimes forbid binding sockets; skip the
/// httpmock tests there instead of failing them.
pub fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

/// A filesystem whose credential callback always returns `credentials`.
#[allow(dead_code)]
pub fn registry_fs(credentials: Credentials) -> RegistryFs {
    RegistryFs::new(
        &RegistryConfig::default(),
        Box::new(move |_url| credentials.clone()),
    )
    .unwrap()
}

#[allow(dead_code)]
pub fn anonymous_fs() -> RegistryFs {
    registry_fs(Credentials::anonymous())
}

/// A bearer challenge pointing at `token_url`.
#[allow(dead_code)]
pub fn challenge_header(token_url: &str, scope: &str) -> String {
    format!(r#"Bearer realm="{token_url}",service="reg",scope="{scope}""#)
}
