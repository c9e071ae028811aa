//! End-to-end node lifecycle against a stub distribution whose start script
//! publishes port files and then either sleeps until it is killed or exits.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use testclusters_core::config::{FixtureConfig, TimeoutsConfig};
use testclusters_core::http_wait::HttpWaitConfigurer;
use testclusters_core::process_tree::pid_alive;
use testclusters_core::reaper::PidFileReaper;
use testclusters_core::value::DeferredValue;
use testclusters_core::{Error, ExtractedDistribution, LifecycleError, Node, NodeSpec, ToolError, Version};

const START_SCRIPT: &str = r#"#!/bin/sh
echo "[2019-11-04T10:00:00,000][INFO ][o.e.n.Node] [$HOSTNAME] starting"
echo "[2019-11-04T10:00:01,000][WARN ][o.e.b.BootstrapChecks] max file descriptors [4096] is too low"
echo "$ES_JAVA_OPTS" > logs/java_opts
sleep 300 &
echo $! > logs/child.pid
echo "127.0.0.1:9300" > logs/transport.ports
printf '127.0.0.1:9200\n[::1]:9200\n' > logs/http.ports
wait
"#;

/// Publishes its ports and exits successfully right away.
const EXITING_START_SCRIPT: &str = r#"#!/bin/sh
echo "127.0.0.1:9300" > logs/transport.ports
echo "127.0.0.1:9200" > logs/http.ports
exit 0
"#;

const USERS_SCRIPT: &str = r#"#!/bin/sh
echo "$@" >> users.log
"#;

/// Records every value piped to `add`.
const KEYSTORE_SCRIPT: &str = r#"#!/bin/sh
if [ "$1" = "add" ]; then
    cat >> keystore.log
    echo >> keystore.log
fi
"#;

fn write_script(path: &Path, body: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// `<root>/<version>/elasticsearch-<version>/{bin,config}` like an unpacked archive.
fn stub_distribution(root: &Path, version: &str, with_users: bool, start_script: &str) -> PathBuf {
    let extracted = root.join(version);
    let home = extracted.join(format!("elasticsearch-{version}"));
    write_script(&home.join("bin/elasticsearch"), start_script);
    write_script(&home.join("bin/elasticsearch-keystore"), KEYSTORE_SCRIPT);
    if with_users {
        write_script(&home.join("bin/elasticsearch-users"), USERS_SCRIPT);
    }
    std::fs::create_dir_all(home.join("config")).unwrap();
    std::fs::write(home.join("config/jvm.options"), "-Xss1m\n").unwrap();
    extracted
}

fn fast_config() -> FixtureConfig {
    FixtureConfig {
        timeouts: TimeoutsConfig {
            graceful_stop_secs: 5,
            readiness_base_secs: 20,
            per_setup_unit_secs: 1,
            poll_interval_ms: 50,
        },
        jvm_argline: Some("-XX:+HeapDumpOnOutOfMemoryError".to_string()),
        ..FixtureConfig::default()
    }
}

fn node_with(root: &Path, distributions: &[(&str, bool)]) -> Node {
    node_running(root, distributions, START_SCRIPT)
}

fn node_running(root: &Path, distributions: &[(&str, bool)], start_script: &str) -> Node {
    let mut spec = NodeSpec::new(":qa:rolling", "node-0");
    spec.java_home("/usr/lib/jvm/default")
        .environment("PATH", "/usr/bin:/bin")
        .system_property("es.transport.cname_in_publish_address", "true");
    for (version, with_users) in distributions {
        let extracted = stub_distribution(root, version, *with_users, start_script);
        spec.distribution(ExtractedDistribution::new(
            extracted,
            version.parse::<Version>().unwrap(),
        ));
    }
    Node::new(spec, &root.join("clusters"), fast_config())
}

fn child_pid(node: &Node) -> u32 {
    std::fs::read_to_string(node.paths().logs_dir.join("child.pid"))
        .unwrap()
        .trim()
        .parse()
        .unwrap()
}

#[tokio::test]
async fn start_wait_and_stop() {
    let dir = tempfile::tempdir().unwrap();
    let node = node_with(dir.path(), &[("7.5.0", true)]);
    node.freeze().unwrap();

    node.start().await.unwrap();
    node.wait_for_ready().await.unwrap();
    assert!(node.is_process_alive().await.unwrap());

    assert_eq!(node.http_socket_uri().unwrap(), "127.0.0.1:9200");
    assert_eq!(node.all_http_socket_uri().unwrap().len(), 2);
    assert_eq!(node.transport_port_uri().unwrap(), "127.0.0.1:9300");

    let paths = node.paths().clone();
    let config = std::fs::read_to_string(&paths.config_file).unwrap();
    assert!(config.starts_with("node.name: node-0\n"));
    assert!(config.contains("transport.port: 0"));
    assert!(!config.contains("node.attr.upgraded"));
    assert!(paths.config_dir().join("jvm.options").exists());

    let java_opts = std::fs::read_to_string(paths.logs_dir.join("java_opts")).unwrap();
    assert_eq!(
        java_opts.trim(),
        "-Xms512m -Xmx512m -ea -esa -Des.transport.cname_in_publish_address=true -XX:+HeapDumpOnOutOfMemoryError"
    );

    let users = std::fs::read_to_string(paths.distro_dir.join("users.log")).unwrap();
    assert_eq!(users.trim(), "useradd test_user -p x-pack-test-password -r superuser");

    let child = child_pid(&node);
    assert!(pid_alive(child));

    node.stop(true).await.unwrap();
    assert!(!pid_alive(child));
    assert!(!paths.http_ports_file.exists());
    assert!(!paths.transport_ports_file.exists());

    let lines = node.log_lines().unwrap();
    assert!(lines.iter().any(|l| l.ends_with("[BUILD] Starting Elasticsearch process")));
    assert!(lines.iter().any(|l| l.ends_with("[BUILD] Stopping node")));
    assert!(lines.iter().any(|l| l.contains("[LinuxDarwinHostname] starting")));

    let summaries = node.summarize_logs();
    let (description, stdout) = &summaries[0];
    assert_eq!(*description, "Standard output of node");
    assert_eq!(stdout.errors_and_warnings.len(), 1);
    assert!(stdout.errors_and_warnings[0].0.starts_with("WARN ][o.e.b.BootstrapChecks]"));

    // Stopping again only clears port files.
    node.stop(false).await.unwrap();
}

#[tokio::test]
async fn double_start_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let node = node_with(dir.path(), &[("7.5.0", true)]);
    node.freeze().unwrap();
    node.start().await.unwrap();

    let err = node.start().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Lifecycle(LifecycleError::AlreadyRunning { .. })
    ));
    node.stop(false).await.unwrap();
}

#[tokio::test]
async fn restart_keeps_data_and_logs() {
    let dir = tempfile::tempdir().unwrap();
    let node = node_with(dir.path(), &[("7.5.0", true)]);
    node.freeze().unwrap();
    node.start().await.unwrap();
    node.wait_for_ready().await.unwrap();

    let marker = node.paths().data_dir.join("marker");
    std::fs::write(&marker, "keep me").unwrap();

    node.restart().await.unwrap();
    node.wait_for_ready().await.unwrap();
    assert!(marker.exists());
    let starts = node
        .log_lines()
        .unwrap()
        .iter()
        .filter(|l| l.ends_with("[BUILD] Starting Elasticsearch process"))
        .count();
    assert_eq!(starts, 2);
    node.stop(false).await.unwrap();
}

#[tokio::test]
async fn upgrade_moves_to_next_distribution() {
    let dir = tempfile::tempdir().unwrap();
    let node = node_with(dir.path(), &[("6.5.0", true), ("7.5.0", true)]);
    node.freeze().unwrap();

    node.start().await.unwrap();
    node.wait_for_ready().await.unwrap();
    let config = std::fs::read_to_string(&node.paths().config_file).unwrap();
    assert!(config.contains("transport.tcp.port: 0"));
    assert_eq!(node.version().await.unwrap(), Version::new(6, 5, 0));
    let old_child = child_pid(&node);

    node.upgrade().await.unwrap();
    node.wait_for_ready().await.unwrap();
    assert!(!pid_alive(old_child));
    assert_eq!(node.version().await.unwrap(), Version::new(7, 5, 0));
    let config = std::fs::read_to_string(&node.paths().config_file).unwrap();
    assert!(config.contains("transport.port: 0"));
    assert!(config.contains("node.attr.upgraded: true"));
    assert!(
        node.log_lines()
            .unwrap()
            .iter()
            .any(|l| l.ends_with("[BUILD] Switch version from 6.5.0 to 7.5.0"))
    );

    let err = node.upgrade().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Lifecycle(LifecycleError::NoMoreVersions { .. })
    ));
    // The failed upgrade leaves the node running on the last version.
    assert!(node.is_process_alive().await.unwrap());
    node.stop(false).await.unwrap();
}

#[tokio::test]
async fn stop_after_failed_start_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    // No elasticsearch-users script while security is on.
    let node = node_with(dir.path(), &[("7.5.0", false)]);
    node.freeze().unwrap();

    let err = node.start().await.unwrap_err();
    assert!(matches!(err, Error::Tool(ToolError::NotFound { .. })));
    node.stop(true).await.unwrap();
    assert!(node.is_process_alive().await.is_err());
}

#[tokio::test]
async fn security_disabled_skips_users() {
    let dir = tempfile::tempdir().unwrap();
    let node = node_with(dir.path(), &[("7.5.0", false)]);
    node.configure(|spec| {
        spec.setting("xpack.security.enabled", "false");
    })
    .unwrap();
    node.freeze().unwrap();

    node.start().await.unwrap();
    node.wait_for_ready().await.unwrap();
    node.stop(false).await.unwrap();
}

#[tokio::test]
async fn extra_config_files_are_copied_and_validated() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("roles.yml");
    std::fs::write(&source, "admin: {}\n").unwrap();

    let node = node_with(dir.path(), &[("7.5.0", true)]);
    node.configure(|spec| {
        spec.extra_config_file("security/roles.yml", &source);
    })
    .unwrap();
    node.freeze().unwrap();
    node.start().await.unwrap();
    let copied = node.paths().config_dir().join("security/roles.yml");
    assert_eq!(std::fs::read_to_string(copied).unwrap(), "admin: {}\n");
    node.stop(false).await.unwrap();

    let escaping = node_with(&dir.path().join("other"), &[("7.5.0", true)]);
    escaping
        .configure(|spec| {
            spec.extra_config_file("../outside.yml", &source);
        })
        .unwrap();
    escaping.freeze().unwrap();
    let err = escaping.start().await.unwrap_err();
    assert!(err.to_string().contains("../outside.yml"));
    escaping.stop(true).await.unwrap();
}

#[tokio::test]
async fn reaper_tracks_running_process() {
    let dir = tempfile::tempdir().unwrap();
    let reaper_dir = dir.path().join("reaper");
    let node = node_with(dir.path(), &[("7.5.0", true)])
        .with_reaper(Arc::new(PidFileReaper::new(&reaper_dir)));
    node.freeze().unwrap();

    node.start().await.unwrap();
    let pid_files: Vec<_> = std::fs::read_dir(&reaper_dir).unwrap().collect();
    assert_eq!(pid_files.len(), 1);

    node.stop(false).await.unwrap();
    assert_eq!(std::fs::read_dir(&reaper_dir).unwrap().count(), 0);
}

#[tokio::test]
async fn stop_after_process_exited_removes_ports_files() {
    let dir = tempfile::tempdir().unwrap();
    let node = node_running(dir.path(), &[("7.5.0", true)], EXITING_START_SCRIPT);
    node.freeze().unwrap();

    node.start().await.unwrap();
    node.wait_for_ready().await.unwrap();
    for _ in 0..200 {
        if !node.is_process_alive().await.unwrap() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(!node.is_process_alive().await.unwrap());

    node.stop(false).await.unwrap();
    assert!(!node.paths().http_ports_file.exists());
    assert!(!node.paths().transport_ports_file.exists());
    assert!(node.is_process_alive().await.is_err());
}

#[derive(Default)]
struct TrustStore {
    password: Option<String>,
}

impl HttpWaitConfigurer for TrustStore {
    fn set_certificate_authorities(&mut self, _path: PathBuf) {}

    fn set_trust_store(&mut self, _path: PathBuf) {}

    fn set_trust_store_password(&mut self, password: String) {
        self.password = Some(password);
    }
}

#[tokio::test]
async fn deferred_secret_is_resolved_once_per_node() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let node = node_with(dir.path(), &[("7.5.0", true)]);
    node.configure(move |spec| {
        spec.keystore(
            "xpack.security.http.ssl.keystore.secure_password",
            DeferredValue::deferred(move || {
                format!("pw-{}", counter.fetch_add(1, Ordering::SeqCst))
            }),
        );
    })
    .unwrap();
    assert!(node.is_http_ssl_enabled().is_err());
    node.freeze().unwrap();
    assert!(!node.is_http_ssl_enabled().unwrap());
    node.start().await.unwrap();
    node.wait_for_ready().await.unwrap();

    let mut trust_store = TrustStore::default();
    node.configure_http_wait(&mut trust_store).unwrap();
    node.restart().await.unwrap();
    node.stop(false).await.unwrap();

    assert_eq!(trust_store.password.as_deref(), Some("pw-0"));
    let piped = std::fs::read_to_string(node.paths().distro_dir.join("keystore.log")).unwrap();
    assert!(piped.contains("pw-0"), "{piped}");
    assert!(piped.lines().all(|line| line == "pw-0"), "{piped}");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
