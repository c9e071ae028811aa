//! Node configuration: the mutable [`NodeSpec`] builder and the immutable
//! [`FrozenSpec`] it turns into once the node is about to run.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::paths::safe_name;
use crate::value::{DeferredValue, PropertyMap};
use crate::version::Version;

/// An extracted server distribution. Extraction itself happens elsewhere;
/// the node only reads from [`Distribution::extracted`] and never writes to it.
pub trait Distribution: Send + Sync + fmt::Debug {
    /// Directory holding the single top-level folder of the unpacked archive.
    fn extracted(&self) -> PathBuf;
    fn version(&self) -> Version;
}

/// A distribution that is already unpacked on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDistribution {
    pub path: PathBuf,
    pub version: Version,
}

impl ExtractedDistribution {
    pub fn new(path: impl Into<PathBuf>, version: Version) -> Self {
        Self {
            path: path.into(),
            version,
        }
    }
}

impl Distribution for ExtractedDistribution {
    fn extracted(&self) -> PathBuf {
        self.path.clone()
    }

    fn version(&self) -> Version {
        self.version.clone()
    }
}

/// Which flavor of distribution the node runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestDistribution {
    /// Minimal distribution; bundled modules are installed explicitly.
    #[default]
    IntegTest,
    Default,
    Oss,
}

/// A user created with the `elasticsearch-users` tool before start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSpec {
    pub username: String,
    pub password: String,
    pub role: String,
}

impl Default for UserSpec {
    fn default() -> Self {
        Self {
            username: "test_user".to_string(),
            password: "x-pack-test-password".to_string(),
            role: "superuser".to_string(),
        }
    }
}

/// Transform applied to the sanitized node name to produce `node.name`.
pub type NameCustomization = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Everything configurable about a node before it is frozen.
#[derive(Clone)]
pub struct NodeSpec {
    path: String,
    name: String,
    distributions: Vec<Arc<dyn Distribution>>,
    java_home: Option<PathBuf>,
    settings: PropertyMap<DeferredValue>,
    secure_settings: PropertyMap<DeferredValue>,
    secure_files: PropertyMap<PathBuf>,
    system_properties: PropertyMap<DeferredValue>,
    environment: PropertyMap<DeferredValue>,
    jvm_args: Vec<String>,
    extra_config_files: PropertyMap<PathBuf>,
    plugins: Vec<String>,
    modules: Vec<PathBuf>,
    users: Vec<UserSpec>,
    name_customization: Option<NameCustomization>,
    flavor: TestDistribution,
}

impl NodeSpec {
    /// `path` identifies the owner (for example a build project path) and
    /// `name` the node within it.
    pub fn new(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            distributions: Vec::new(),
            java_home: None,
            settings: PropertyMap::new(),
            secure_settings: PropertyMap::new(),
            secure_files: PropertyMap::new(),
            system_properties: PropertyMap::new(),
            environment: PropertyMap::new(),
            jvm_args: Vec::new(),
            extra_config_files: PropertyMap::new(),
            plugins: Vec::new(),
            modules: Vec::new(),
            users: Vec::new(),
            name_customization: None,
            flavor: TestDistribution::default(),
        }
    }

    #[must_use]
    pub fn id(&self) -> String {
        node_id(&self.path, &self.name)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a distribution; the first one is used until an upgrade.
    pub fn distribution(&mut self, distribution: impl Distribution + 'static) -> &mut Self {
        self.distributions.push(Arc::new(distribution));
        self
    }

    pub fn java_home(&mut self, java_home: impl Into<PathBuf>) -> &mut Self {
        self.java_home = Some(java_home.into());
        self
    }

    pub fn setting(&mut self, key: impl Into<String>, value: impl Into<DeferredValue>) -> &mut Self {
        self.settings.put(key, value);
        self
    }

    pub fn keystore(&mut self, key: impl Into<String>, value: impl Into<DeferredValue>) -> &mut Self {
        self.secure_settings.put(key, value);
        self
    }

    pub fn keystore_file(&mut self, key: impl Into<String>, file: impl Into<PathBuf>) -> &mut Self {
        self.secure_files.put(key, file.into());
        self
    }

    pub fn system_property(
        &mut self,
        key: impl Into<String>,
        value: impl Into<DeferredValue>,
    ) -> &mut Self {
        self.system_properties.put(key, value);
        self
    }

    pub fn environment(&mut self, key: impl Into<String>, value: impl Into<DeferredValue>) -> &mut Self {
        self.environment.put(key, value);
        self
    }

    /// Space separated JVM arguments, appended to those already declared.
    pub fn jvm_args(&mut self, args: &str) -> &mut Self {
        self.jvm_args
            .extend(args.split_whitespace().map(str::to_string));
        self
    }

    /// Copy `source` to `destination` (relative to the node's config
    /// directory) before the node starts.
    pub fn extra_config_file(
        &mut self,
        destination: impl Into<String>,
        source: impl Into<PathBuf>,
    ) -> &mut Self {
        self.extra_config_files.put(destination, source.into());
        self
    }

    /// Install a plugin from a URI or path with `elasticsearch-plugin`.
    pub fn plugin(&mut self, plugin: impl Into<String>) -> Result<&mut Self> {
        let plugin = plugin.into();
        if self.plugins.contains(&plugin) {
            return Err(ConfigError::DuplicatePlugin {
                node: self.id(),
                plugin,
            }
            .into());
        }
        self.plugins.push(plugin);
        Ok(self)
    }

    /// Install an extracted module directory into the distribution.
    pub fn module(&mut self, module: impl Into<PathBuf>) -> &mut Self {
        self.modules.push(module.into());
        self
    }

    pub fn user(&mut self, user: UserSpec) -> &mut Self {
        self.users.push(user);
        self
    }

    pub fn name_customization<F>(&mut self, customize: F) -> &mut Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.name_customization = Some(Arc::new(customize));
        self
    }

    pub fn flavor(&mut self, flavor: TestDistribution) -> &mut Self {
        self.flavor = flavor;
        self
    }

    /// Lock the configuration. Requires a java home and at least one
    /// distribution.
    pub fn freeze(self) -> Result<FrozenSpec> {
        if self.java_home.is_none() {
            return Err(ConfigError::MissingJavaHome { node: self.id() }.into());
        }
        if self.distributions.is_empty() {
            return Err(ConfigError::NoDistributions { node: self.id() }.into());
        }
        tracing::debug!(node = %self.id(), "Locking configuration");
        Ok(FrozenSpec { inner: self })
    }
}

impl fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSpec")
            .field("path", &self.path)
            .field("name", &self.name)
            .field("distributions", &self.distributions)
            .field("java_home", &self.java_home)
            .field("settings", &self.settings)
            .field("plugins", &self.plugins)
            .field("modules", &self.modules)
            .field("flavor", &self.flavor)
            .finish_non_exhaustive()
    }
}

fn node_id(path: &str, name: &str) -> String {
    format!("node{{{path}:{name}}}")
}

/// Read-only node configuration. There is no way back to a [`NodeSpec`].
#[derive(Debug, Clone)]
pub struct FrozenSpec {
    inner: NodeSpec,
}

impl FrozenSpec {
    /// `node{<path>:<name>}`, used in logs, errors and reaper registrations.
    #[must_use]
    pub fn id(&self) -> String {
        self.inner.id()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Value written as `node.name`.
    #[must_use]
    pub fn node_name(&self) -> String {
        let safe = safe_name(&self.inner.name);
        match &self.inner.name_customization {
            Some(customize) => customize(&safe),
            None => safe,
        }
    }

    #[must_use]
    pub fn distributions(&self) -> &[Arc<dyn Distribution>] {
        &self.inner.distributions
    }

    /// Java home, guaranteed present by [`NodeSpec::freeze`].
    #[must_use]
    pub fn java_home(&self) -> &Path {
        self.inner.java_home.as_deref().unwrap_or(Path::new(""))
    }

    #[must_use]
    pub fn settings(&self) -> &PropertyMap<DeferredValue> {
        &self.inner.settings
    }

    #[must_use]
    pub fn secure_settings(&self) -> &PropertyMap<DeferredValue> {
        &self.inner.secure_settings
    }

    #[must_use]
    pub fn secure_files(&self) -> &PropertyMap<PathBuf> {
        &self.inner.secure_files
    }

    #[must_use]
    pub fn system_properties(&self) -> &PropertyMap<DeferredValue> {
        &self.inner.system_properties
    }

    #[must_use]
    pub fn environment(&self) -> &PropertyMap<DeferredValue> {
        &self.inner.environment
    }

    #[must_use]
    pub fn jvm_args(&self) -> &[String] {
        &self.inner.jvm_args
    }

    #[must_use]
    pub fn extra_config_files(&self) -> &PropertyMap<PathBuf> {
        &self.inner.extra_config_files
    }

    #[must_use]
    pub fn plugins(&self) -> &[String] {
        &self.inner.plugins
    }

    #[must_use]
    pub fn modules(&self) -> &[PathBuf] {
        &self.inner.modules
    }

    /// Declared users, or the default superuser when none were declared.
    #[must_use]
    pub fn users(&self) -> Vec<UserSpec> {
        if self.inner.users.is_empty() {
            vec![UserSpec::default()]
        } else {
            self.inner.users.clone()
        }
    }

    #[must_use]
    pub fn flavor(&self) -> TestDistribution {
        self.inner.flavor
    }

    /// Security is on unless `xpack.security.enabled` is literally `false`.
    #[must_use]
    pub fn security_enabled(&self) -> bool {
        self.inner
            .settings
            .get("xpack.security.enabled")
            .is_none_or(|v| v.resolve() != "false")
    }

    /// Pieces of setup work that each slow the node's boot down.
    #[must_use]
    pub fn setup_units(&self) -> usize {
        self.inner.plugins.len()
            + self.inner.secure_files.len()
            + self.inner.secure_settings.len()
            + self.inner.users.len()
    }
}
