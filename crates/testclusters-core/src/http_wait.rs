//! TLS hints for whatever polls the node's HTTP endpoint.

use std::path::{Path, PathBuf};

use crate::spec::FrozenSpec;

/// Receives the CA, trust store and trust store password an HTTP readiness
/// check needs to talk to a node with TLS enabled.
pub trait HttpWaitConfigurer {
    fn set_certificate_authorities(&mut self, path: PathBuf);
    fn set_trust_store(&mut self, path: PathBuf);
    fn set_trust_store_password(&mut self, password: String);
}

/// `xpack.security.http.ssl.enabled` is `true`.
#[must_use]
pub fn is_http_ssl_enabled(spec: &FrozenSpec) -> bool {
    spec.settings()
        .get("xpack.security.http.ssl.enabled")
        .is_some_and(|v| v.resolve().eq_ignore_ascii_case("true"))
}

/// Pass TLS settings to `wait`. File settings are resolved against the
/// node's config directory.
pub fn configure_http_wait(spec: &FrozenSpec, config_dir: &Path, wait: &mut dyn HttpWaitConfigurer) {
    let settings = spec.settings();
    let resolve = |key: &str| settings.get(key).map(|v| config_dir.join(v.resolve()));

    if let Some(ca) = resolve("xpack.security.http.ssl.certificate_authorities") {
        wait.set_certificate_authorities(ca);
    }
    if let Some(cert) = resolve("xpack.security.http.ssl.certificate") {
        wait.set_certificate_authorities(cert);
    }
    if let Some(store) = resolve("xpack.security.http.ssl.keystore.path") {
        wait.set_trust_store(store);
    }
    if let Some(password) = spec
        .secure_settings()
        .get("xpack.security.http.ssl.keystore.secure_password")
    {
        wait.set_trust_store_password(password.resolve());
    }
}
