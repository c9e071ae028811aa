//! Property-based tests for settings generation.
//!
//! Verifies:
//! - user settings always precede defaults, in declaration order
//! - every default survives unless an allowed key replaces it
//! - redefining any protected default is rejected and names the key
//! - the transport port key follows the 6.7.0 rename

use proptest::prelude::*;

use testclusters_core::Error;
use testclusters_core::error::ConfigError;
use testclusters_core::paths::WorkingPaths;
use testclusters_core::settings::{OVERRIDABLE_SETTINGS, default_settings, merge};
use testclusters_core::version::{TRANSPORT_PORT_RENAME, Version};

// ────────────────────────────────────────────────────────────────────
// Strategies
// ────────────────────────────────────────────────────────────────────

fn arb_version() -> impl Strategy<Value = Version> {
    (5u32..=9, 0u32..=10, 0u32..=3).prop_map(|(major, minor, revision)| {
        Version::new(major, minor, revision)
    })
}

/// Keys no default uses, with distinct names.
fn arb_user_settings() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::btree_map("user\\.[a-z]{1,8}", "[a-z0-9]{1,8}", 0..8)
        .prop_map(|m| m.into_iter().collect())
}

fn paths() -> WorkingPaths {
    WorkingPaths::new(std::path::Path::new("/tmp/clusters"), "node-0")
}

fn defaults(version: &Version) -> Vec<(String, String)> {
    default_settings("node-0", &paths(), version, false)
}

// ────────────────────────────────────────────────────────────────────
// Merge
// ────────────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn user_settings_come_first(version in arb_version(), user in arb_user_settings()) {
        let defaults = defaults(&version);
        let merged = merge("node{:p}", user.clone(), defaults.clone()).unwrap();

        prop_assert_eq!(merged.len(), user.len() + defaults.len());
        prop_assert_eq!(&merged[..user.len()], &user[..]);
        prop_assert_eq!(&merged[user.len()..], &defaults[..]);
    }

    #[test]
    fn allowed_overrides_replace_defaults(
        version in arb_version(),
        user in arb_user_settings(),
        repo in "/[a-z]{1,12}",
    ) {
        let mut user = user;
        user.push((OVERRIDABLE_SETTINGS[0].to_string(), repo.clone()));
        let merged = merge("node{:p}", user, defaults(&version)).unwrap();

        let repos: Vec<&String> = merged
            .iter()
            .filter(|(k, _)| k == OVERRIDABLE_SETTINGS[0])
            .map(|(_, v)| v)
            .collect();
        prop_assert_eq!(repos, vec![&repo]);
    }

    #[test]
    fn protected_defaults_cannot_be_redefined(
        version in arb_version(),
        user in arb_user_settings(),
        pick in any::<prop::sample::Index>(),
    ) {
        let defaults = defaults(&version);
        let protected: Vec<&String> = defaults
            .iter()
            .map(|(k, _)| k)
            .filter(|k| !OVERRIDABLE_SETTINGS.contains(&k.as_str()))
            .collect();
        let key = pick.get(&protected).to_string();

        let mut user = user;
        user.push((key.clone(), "mine".to_string()));
        let err = merge("node{:p}", user, defaults.clone()).unwrap_err();
        match err {
            Error::Config(ConfigError::IllegalOverride { keys, .. }) => {
                prop_assert_eq!(keys, vec![key]);
            }
            other => prop_assert!(false, "unexpected error: {}", other),
        }
    }

    #[test]
    fn transport_key_follows_version(version in arb_version()) {
        let defaults = defaults(&version);
        let has = |key: &str| defaults.iter().any(|(k, _)| k == key);
        let renamed = version.on_or_after(&TRANSPORT_PORT_RENAME);
        prop_assert_eq!(has("transport.port"), renamed);
        prop_assert_eq!(has("transport.tcp.port"), !renamed);
        prop_assert_eq!(
            has("indices.breaker.total.use_real_memory"),
            version.major >= 7
        );
    }
}

#[test]
fn upgraded_marker_is_last_default() {
    let defaults = default_settings("node-0", &paths(), &Version::new(7, 5, 0), true);
    assert_eq!(
        defaults.last().unwrap(),
        &("node.attr.upgraded".to_string(), "true".to_string())
    );
}
