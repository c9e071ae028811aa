//! One-shot setup tools shipped in the distribution's `bin` directory:
//! plugin installation, the secure settings keystore and file-realm users.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{LifecycleError, Result, ToolError};
use crate::spec::{FrozenSpec, TestDistribution, UserSpec};
use crate::version::Version;
use crate::workdir::copy_tree;

/// Runs scripts from `<distro>/bin` with the node's environment.
#[derive(Debug)]
pub struct BinScripts<'a> {
    distro_dir: &'a Path,
    env: &'a [(String, String)],
    node: &'a str,
}

impl<'a> BinScripts<'a> {
    #[must_use]
    pub fn new(distro_dir: &'a Path, env: &'a [(String, String)], node: &'a str) -> Self {
        Self {
            distro_dir,
            env,
            node,
        }
    }

    fn ensure_exists(&self, tool: &str) -> Result<()> {
        let bin = self.distro_dir.join("bin");
        if bin.join(tool).exists() || bin.join(format!("{tool}.bat")).exists() {
            Ok(())
        } else {
            Err(ToolError::NotFound {
                tool: tool.to_string(),
            }
            .into())
        }
    }

    pub async fn run(&self, tool: &str, args: &[&str]) -> Result<()> {
        self.run_with_input("", tool, args).await
    }

    /// Run `tool`, feeding `input` on stdin. Non-zero exit is an error
    /// carrying the tool's stderr.
    pub async fn run_with_input(&self, input: &str, tool: &str, args: &[&str]) -> Result<()> {
        self.ensure_exists(tool)?;

        let mut command = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/c").arg(format!("bin\\{tool}.bat"));
            c
        } else {
            Command::new(self.distro_dir.join("bin").join(tool))
        };
        command
            .args(args)
            .env_clear()
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(self.distro_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(node = self.node, tool, ?args, "Running bin script");
        let spawn_failed = |e: std::io::Error| ToolError::Failed {
            tool: tool.to_string(),
            status: "spawn failure".to_string(),
            stderr: e.to_string(),
        };
        let mut child = command.spawn().map_err(spawn_failed)?;
        if let Some(mut stdin) = child.stdin.take() {
            if !input.is_empty() {
                stdin.write_all(input.as_bytes()).await.map_err(spawn_failed)?;
            }
            drop(stdin);
        }
        let output = child.wait_with_output().await.map_err(spawn_failed)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!(node = self.node, tool, stdout = %stdout.trim(), "Bin script output");
        }
        if output.status.success() {
            Ok(())
        } else {
            Err(ToolError::Failed {
                tool: tool.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into())
        }
    }
}

pub async fn install_plugins(scripts: &BinScripts<'_>, plugins: &[String]) -> Result<()> {
    for plugin in plugins {
        info!(node = scripts.node, plugin = %plugin, "Installing plugin");
        scripts
            .run("elasticsearch-plugin", &["install", "--batch", plugin.as_str()])
            .await?;
    }
    Ok(())
}

/// Create the keystore and add every secure setting and secure file.
/// Does nothing when the node declares neither.
pub async fn setup_keystore(scripts: &BinScripts<'_>, spec: &FrozenSpec) -> Result<()> {
    if spec.secure_settings().is_empty() && spec.secure_files().is_empty() {
        return Ok(());
    }
    scripts.run("elasticsearch-keystore", &["create"]).await?;

    for (key, value) in spec.secure_settings().resolve_all() {
        scripts
            .run_with_input(&value, "elasticsearch-keystore", &["add", "-x", key.as_str()])
            .await?;
    }
    for (key, file) in spec.secure_files().iter() {
        if !file.exists() {
            return Err(LifecycleError::MissingSourceFile {
                node: spec.id(),
                path: file.clone(),
            }
            .into());
        }
        let file = std::path::absolute(file).unwrap_or_else(|_| file.clone());
        let file = file.display().to_string();
        scripts
            .run("elasticsearch-keystore", &["add-file", key, file.as_str()])
            .await?;
    }
    Ok(())
}

pub async fn setup_users(scripts: &BinScripts<'_>, users: &[UserSpec]) -> Result<()> {
    for user in users {
        info!(node = scripts.node, user = %user.username, role = %user.role, "Adding user");
        scripts
            .run(
                "elasticsearch-users",
                &[
                    "useradd",
                    user.username.as_str(),
                    "-p",
                    user.password.as_str(),
                    "-r",
                    user.role.as_str(),
                ],
            )
            .await?;
    }
    Ok(())
}

/// Puts a plugin or module artifact into a directory.
pub trait ArtifactInstaller: Send + Sync {
    fn install(&self, artifact: &Path, destination: &Path) -> Result<()>;
}

/// Installs artifacts that are already extracted directories.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectoryCopyInstaller;

impl ArtifactInstaller for DirectoryCopyInstaller {
    fn install(&self, artifact: &Path, destination: &Path) -> Result<()> {
        if !artifact.is_dir() {
            return Err(ToolError::InvalidArtifact {
                path: artifact.to_path_buf(),
            }
            .into());
        }
        copy_tree(artifact, destination)
    }
}

/// Directory under `distro/modules` a module artifact is installed to.
#[must_use]
pub fn module_destination(distro_dir: &Path, module: &Path, version: &Version) -> PathBuf {
    let file_name = module
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let triple = format!("-{}.{}.{}", version.major, version.minor, version.revision);
    let name = file_name
        .replace(".zip", "")
        .replace(&triple, "")
        .replace("-SNAPSHOT", "");
    distro_dir.join("modules").join(name)
}

/// Install modules into the integ-test distribution, skipping any that the
/// distribution already bundles. Other flavors ship all modules.
pub fn install_modules(
    spec: &FrozenSpec,
    distro_dir: &Path,
    version: &Version,
    installer: &dyn ArtifactInstaller,
) -> Result<usize> {
    if spec.flavor() != TestDistribution::IntegTest {
        info!(
            node = %spec.id(),
            modules = spec.modules().len(),
            flavor = ?spec.flavor(),
            "Not installing modules, the distribution already has them"
        );
        return Ok(0);
    }
    let mut installed = 0;
    for module in spec.modules() {
        let destination = module_destination(distro_dir, module, version);
        if destination.exists() {
            continue;
        }
        installer.install(module, &destination)?;
        installed += 1;
    }
    Ok(installed)
}
