//! Installation of key material and interface configs
//!
//! Artifacts are written to a private staging file first and then copied
//! into the install directory with the configured (usually `sudo`) copy
//! command. A multi-file install that fails part way puts the install
//! directory back the way it found it: files that replaced an earlier
//! install are restored from a `.wgprov-bak` copy, new files are removed.

use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigPaths, ToolsConfig};
use crate::error::{InstallError, ToolError};
use crate::tool::{ToolCommand, ToolRunner};
use crate::validation;

const BACKUP_SUFFIX: &str = ".wgprov-bak";

/// One of the three files that make up a provisioned interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    PrivateKey,
    PublicKey,
    Config,
}

impl ArtifactKind {
    /// File name inside the install directory
    pub fn file_name(self, interface: &str) -> String {
        match self {
            ArtifactKind::PrivateKey => format!("{}_private.key", interface),
            ArtifactKind::PublicKey => format!("{}_public.key", interface),
            ArtifactKind::Config => format!("{}.conf", interface),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ArtifactKind::PrivateKey => "private_key",
            ArtifactKind::PublicKey => "public_key",
            ArtifactKind::Config => "config",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::PrivateKey => write!(f, "private key"),
            ArtifactKind::PublicKey => write!(f, "public key"),
            ArtifactKind::Config => write!(f, "config"),
        }
    }
}

/// Step of [`Installer::install_artifact`] that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStage {
    /// Writing the staging file
    Staging,
    /// Copying the staging file into the install directory
    ElevatedCopy,
}

impl InstallStage {
    pub fn label(self) -> &'static str {
        match self {
            InstallStage::Staging => "staging",
            InstallStage::ElevatedCopy => "elevated_copy",
        }
    }
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallStage::Staging => write!(f, "staging"),
            InstallStage::ElevatedCopy => write!(f, "elevated copy"),
        }
    }
}

/// Outcome of undoing a partial install
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    /// Artifacts that had no earlier version and were deleted
    pub removed: Vec<ArtifactKind>,
    /// Artifacts put back from the backup of the previous install
    pub restored: Vec<ArtifactKind>,
    pub failed: Vec<ArtifactKind>,
}

/// Artifact copied by [`Installer::full_install`]
///
/// `backup` holds the previous version of the file when one existed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedArtifact {
    pub kind: ArtifactKind,
    pub backup: Option<PathBuf>,
}

/// Final paths of a complete install
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledArtifacts {
    pub private_key: PathBuf,
    pub public_key: PathBuf,
    pub config: PathBuf,
}

/// Copies artifacts into the install directory
pub struct Installer {
    runner: Arc<dyn ToolRunner>,
    staging_dir: PathBuf,
    install_dir: PathBuf,
    copy: ToolCommand,
    remove: ToolCommand,
}

impl Installer {
    pub fn new(runner: Arc<dyn ToolRunner>, paths: &ConfigPaths, tools: &ToolsConfig) -> Self {
        Self {
            runner,
            staging_dir: paths.staging_dir.clone(),
            install_dir: paths.install_dir.clone(),
            copy: tools.copy.clone(),
            remove: tools.remove.clone(),
        }
    }

    /// Where `kind` ends up for `interface`
    pub fn final_path(&self, interface: &str, kind: ArtifactKind) -> PathBuf {
        self.install_dir.join(kind.file_name(interface))
    }

    /// Stage `contents` and copy it to its final location
    ///
    /// The staging file is only readable by the current user and is removed
    /// before this returns, whether or not the copy succeeded.
    pub async fn install_artifact(
        &self,
        interface: &str,
        kind: ArtifactKind,
        contents: &[u8],
    ) -> Result<PathBuf, InstallError> {
        validation::validate_interface_name(interface)
            .map_err(|e| InstallError::new(interface, kind, InstallStage::Staging, e))?;

        let file_name = kind.file_name(interface);
        let staged = self
            .stage(&file_name, contents)
            .map_err(|e| InstallError::new(interface, kind, InstallStage::Staging, e))?;

        let destination = self.install_dir.join(&file_name);
        let args = vec![
            staged.path().to_string_lossy().into_owned(),
            destination.to_string_lossy().into_owned(),
        ];
        debug!("Copying {} for {} to {}", kind, interface, destination.display());

        self.runner
            .run(&self.copy, &args, None)
            .await
            .map_err(|e| InstallError::new(interface, kind, InstallStage::ElevatedCopy, e))?;

        // Dropping the handle deletes the staging file
        drop(staged);
        Ok(destination)
    }

    fn stage(&self, file_name: &str, contents: &[u8]) -> std::io::Result<tempfile::NamedTempFile> {
        let mut staged = tempfile::Builder::new()
            .prefix(&format!("{}.", file_name))
            .tempfile_in(&self.staging_dir)?;
        staged.write_all(contents)?;
        staged.flush()?;
        Ok(staged)
    }

    /// Where the previous version of `kind` is kept during [`Self::full_install`]
    pub fn backup_path(&self, interface: &str, kind: ArtifactKind) -> PathBuf {
        self.install_dir
            .join(format!("{}{}", kind.file_name(interface), BACKUP_SUFFIX))
    }

    /// Copy the current target aside; `None` when there is nothing to keep
    async fn back_up(&self, interface: &str, kind: ArtifactKind) -> Option<PathBuf> {
        let target = self.final_path(interface, kind);
        let backup = self.backup_path(interface, kind);
        let args = vec![
            target.to_string_lossy().into_owned(),
            backup.to_string_lossy().into_owned(),
        ];
        match self.runner.run(&self.copy, &args, None).await {
            Ok(_) => {
                debug!("Saved previous {} for {} to {}", kind, interface, backup.display());
                Some(backup)
            }
            Err(e) => {
                debug!("No previous {} for {}: {}", kind, interface, e);
                None
            }
        }
    }

    async fn discard_backup(&self, backup: &Path) {
        let args = vec![backup.to_string_lossy().into_owned()];
        if let Err(e) = self.runner.run(&self.remove, &args, None).await {
            warn!("Failed to remove backup {}: {}", backup.display(), e);
        }
    }

    async fn restore(&self, backup: &Path, target: &Path) -> Result<(), ToolError> {
        let args = vec![
            backup.to_string_lossy().into_owned(),
            target.to_string_lossy().into_owned(),
        ];
        self.runner.run(&self.copy, &args, None).await?;
        self.discard_backup(backup).await;
        Ok(())
    }

    /// Install private key, public key and config, in that order
    ///
    /// Each existing target is backed up before it is overwritten. Stops at
    /// the first failure and rolls back what this call changed; the outcome
    /// is recorded in the returned error. Backups are deleted on success.
    pub async fn full_install(
        &self,
        interface: &str,
        private_key: &[u8],
        public_key: &[u8],
        config: &[u8],
    ) -> Result<InstalledArtifacts, InstallError> {
        validation::validate_interface_name(interface).map_err(|e| {
            InstallError::new(interface, ArtifactKind::PrivateKey, InstallStage::Staging, e)
        })?;

        let steps = [
            (ArtifactKind::PrivateKey, private_key),
            (ArtifactKind::PublicKey, public_key),
            (ArtifactKind::Config, config),
        ];

        let mut applied: Vec<AppliedArtifact> = Vec::with_capacity(steps.len());
        for (kind, contents) in steps {
            let backup = self.back_up(interface, kind).await;
            let mut err = match self.install_artifact(interface, kind, contents).await {
                Ok(_) => {
                    applied.push(AppliedArtifact { kind, backup });
                    continue;
                }
                Err(err) => err,
            };

            error!("Installing {} for {} failed: {}", kind, interface, err);
            err.installed = applied.iter().map(|a| a.kind).collect();
            // The failed target was not replaced, its backup is not needed
            if let Some(backup) = backup {
                self.discard_backup(&backup).await;
            }
            if !applied.is_empty() {
                err.rollback = Some(self.rollback(interface, &applied).await);
            }
            return Err(err);
        }

        for backup in applied.iter().filter_map(|a| a.backup.as_deref()) {
            self.discard_backup(backup).await;
        }

        info!("Installed artifacts for {} in {}", interface, self.install_dir.display());
        Ok(InstalledArtifacts {
            private_key: self.final_path(interface, ArtifactKind::PrivateKey),
            public_key: self.final_path(interface, ArtifactKind::PublicKey),
            config: self.final_path(interface, ArtifactKind::Config),
        })
    }

    /// Undo applied artifacts, most recent first
    ///
    /// An artifact with a backup gets its previous contents back; one
    /// without is removed.
    pub async fn rollback(&self, interface: &str, applied: &[AppliedArtifact]) -> RollbackReport {
        let mut report = RollbackReport::default();
        for artifact in applied.iter().rev() {
            let kind = artifact.kind;
            let path = self.final_path(interface, kind);
            let result = match &artifact.backup {
                Some(backup) => self.restore(backup, &path).await.map(|()| true),
                None => {
                    let args = vec![path.to_string_lossy().into_owned()];
                    self.runner.run(&self.remove, &args, None).await.map(|_| false)
                }
            };
            match result {
                Ok(true) => {
                    debug!("Restored {}", path.display());
                    report.restored.push(kind);
                }
                Ok(false) => {
                    debug!("Removed {}", path.display());
                    report.removed.push(kind);
                }
                Err(e) => {
                    warn!("Failed to roll back {}: {}", path.display(), e);
                    report.failed.push(kind);
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{InstallCause, ToolError};
    use crate::tool::{MockToolRunner, ProcessRunner, ToolOutput};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Dirs {
        staging: TempDir,
        install: TempDir,
    }

    impl Dirs {
        fn new() -> Self {
            Self {
                staging: TempDir::new().unwrap(),
                install: TempDir::new().unwrap(),
            }
        }

        fn paths(&self) -> ConfigPaths {
            ConfigPaths {
                staging_dir: self.staging.path().to_path_buf(),
                install_dir: self.install.path().to_path_buf(),
            }
        }
    }

    fn local_tools() -> ToolsConfig {
        ToolsConfig {
            copy: ToolCommand::new(["cp"]),
            remove: ToolCommand::new(["rm", "-f"]),
            ..ToolsConfig::default()
        }
    }

    fn process_installer(dirs: &Dirs) -> Installer {
        Installer::new(
            Arc::new(ProcessRunner::new(Duration::from_secs(10))),
            &dirs.paths(),
            &local_tools(),
        )
    }

    #[test]
    fn test_file_names() {
        assert_eq!(ArtifactKind::PrivateKey.file_name("wg0"), "wg0_private.key");
        assert_eq!(ArtifactKind::PublicKey.file_name("wg0"), "wg0_public.key");
        assert_eq!(ArtifactKind::Config.file_name("wg0"), "wg0.conf");
    }

    #[tokio::test]
    async fn test_full_install() {
        let dirs = Dirs::new();
        let installer = process_installer(&dirs);

        let paths = installer
            .full_install("wg0", b"priv\n", b"pub\n", b"[Interface]\n")
            .await
            .unwrap();

        assert_eq!(paths.config, dirs.install.path().join("wg0.conf"));
        assert_eq!(std::fs::read(&paths.private_key).unwrap(), b"priv\n");
        assert_eq!(std::fs::read(&paths.public_key).unwrap(), b"pub\n");
        assert_eq!(std::fs::read(&paths.config).unwrap(), b"[Interface]\n");

        // Staging files are gone
        assert_eq!(std::fs::read_dir(dirs.staging.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_reinstall_overwrites() {
        let dirs = Dirs::new();
        let installer = process_installer(&dirs);

        installer.full_install("wg0", b"old\n", b"old\n", b"old\n").await.unwrap();
        let paths = installer.full_install("wg0", b"new\n", b"new\n", b"new\n").await.unwrap();
        assert_eq!(std::fs::read(&paths.private_key).unwrap(), b"new\n");
        assert_no_backups(&dirs);
    }

    fn assert_no_backups(dirs: &Dirs) {
        let leftovers: Vec<_> = std::fs::read_dir(dirs.install.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(BACKUP_SUFFIX))
            .collect();
        assert!(leftovers.is_empty(), "{:?}", leftovers);
    }

    fn no_such_file(line: String) -> ToolError {
        ToolError::Failed {
            command: line,
            code: Some(1),
            stderr: "cp: cannot stat: No such file or directory".to_string(),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_reinstall_restores_previous_install() {
        let dirs = Dirs::new();
        process_installer(&dirs)
            .full_install("wg1", b"old-priv\n", b"old-pub\n", b"old-cfg\n")
            .await
            .unwrap();

        // Copy that refuses to write the public key
        let tools = ToolsConfig {
            copy: ToolCommand::new([
                "sh",
                "-c",
                "case \"$2\" in *_public.key) exit 1;; esac; exec cp \"$1\" \"$2\"",
                "sh",
            ]),
            ..local_tools()
        };
        let installer = Installer::new(
            Arc::new(ProcessRunner::new(Duration::from_secs(10))),
            &dirs.paths(),
            &tools,
        );

        let err = installer
            .full_install("wg1", b"new-priv\n", b"new-pub\n", b"new-cfg\n")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ArtifactKind::PublicKey);
        assert_eq!(err.installed, vec![ArtifactKind::PrivateKey]);
        let report = err.rollback.clone().unwrap();
        assert_eq!(report.restored, vec![ArtifactKind::PrivateKey]);
        assert!(report.removed.is_empty());
        assert!(err.is_clean());

        let install = dirs.install.path();
        assert_eq!(std::fs::read(install.join("wg1_private.key")).unwrap(), b"old-priv\n");
        assert_eq!(std::fs::read(install.join("wg1_public.key")).unwrap(), b"old-pub\n");
        assert_eq!(std::fs::read(install.join("wg1.conf")).unwrap(), b"old-cfg\n");
        assert_no_backups(&dirs);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_first_install_leaves_nothing() {
        let dirs = Dirs::new();
        let tools = ToolsConfig {
            copy: ToolCommand::new([
                "sh",
                "-c",
                "case \"$2\" in *.conf) exit 1;; esac; exec cp \"$1\" \"$2\"",
                "sh",
            ]),
            ..local_tools()
        };
        let installer = Installer::new(
            Arc::new(ProcessRunner::new(Duration::from_secs(10))),
            &dirs.paths(),
            &tools,
        );

        let err = installer
            .full_install("wg1", b"priv\n", b"pub\n", b"cfg\n")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ArtifactKind::Config);
        let report = err.rollback.clone().unwrap();
        assert_eq!(report.removed, vec![ArtifactKind::PublicKey, ArtifactKind::PrivateKey]);
        assert!(err.is_clean());
        assert_eq!(std::fs::read_dir(dirs.install.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_staging_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dirs = Dirs::new();
        let installer = process_installer(&dirs);
        let staged = installer.stage("wg0_private.key", b"priv\n").unwrap();
        let mode = staged.as_file().metadata().unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
        assert!(staged
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("wg0_private.key."));
    }

    #[tokio::test]
    async fn test_staging_failure_installs_nothing() {
        let dirs = Dirs::new();
        let mut paths = dirs.paths();
        paths.staging_dir = dirs.staging.path().join("missing");

        // Only the backup of a previous private key is attempted
        let mut runner = MockToolRunner::new();
        runner
            .expect_run()
            .withf(|_, args, _| args[1].ends_with(BACKUP_SUFFIX))
            .times(1)
            .returning(|cmd, args, _| Err(no_such_file(cmd.describe(args))));
        let installer = Installer::new(Arc::new(runner), &paths, &local_tools());

        let err = installer
            .full_install("wg0", b"priv\n", b"pub\n", b"cfg\n")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ArtifactKind::PrivateKey);
        assert_eq!(err.stage, InstallStage::Staging);
        assert!(err.installed.is_empty());
        assert!(err.rollback.is_none());
        assert!(err.is_clean());
    }

    #[tokio::test]
    async fn test_invalid_name_is_rejected() {
        let dirs = Dirs::new();
        let mut runner = MockToolRunner::new();
        runner.expect_run().never();
        let installer = Installer::new(Arc::new(runner), &dirs.paths(), &local_tools());

        let err = installer
            .install_artifact("../etc", ArtifactKind::Config, b"cfg\n")
            .await
            .unwrap_err();
        assert!(matches!(err.cause, InstallCause::InvalidName(_)));
    }

    #[tokio::test]
    async fn test_public_key_copy_failure_rolls_back() {
        let dirs = Dirs::new();
        let calls = Arc::new(Mutex::new(Vec::<String>::new()));
        let recorded = Arc::clone(&calls);

        let mut runner = MockToolRunner::new();
        runner.expect_run().returning(move |cmd, args, _| {
            let line = cmd.describe(args);
            recorded.lock().unwrap().push(line.clone());
            if line.ends_with(BACKUP_SUFFIX) {
                return Err(no_such_file(line));
            }
            if cmd.program() == Some("cp") && line.ends_with("_public.key") {
                return Err(ToolError::Failed {
                    command: line,
                    code: Some(1),
                    stderr: "cp: permission denied".to_string(),
                });
            }
            Ok(ToolOutput::default())
        });
        let installer = Installer::new(Arc::new(runner), &dirs.paths(), &local_tools());

        let err = installer
            .full_install("wg0", b"priv\n", b"pub\n", b"cfg\n")
            .await
            .unwrap_err();

        assert_eq!(err.kind, ArtifactKind::PublicKey);
        assert_eq!(err.stage, InstallStage::ElevatedCopy);
        assert_eq!(err.installed, vec![ArtifactKind::PrivateKey]);
        assert_eq!(
            err.rollback,
            Some(RollbackReport {
                removed: vec![ArtifactKind::PrivateKey],
                ..Default::default()
            })
        );
        assert!(err.is_clean());

        // backup, copy, backup, failed copy, cleanup
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 5);
        assert!(calls.iter().all(|c| !c.contains("wg0.conf")));
        let private = dirs.install.path().join("wg0_private.key");
        assert_eq!(calls[4], format!("rm -f {}", private.display()));
    }

    #[tokio::test]
    async fn test_failed_rollback_is_reported() {
        let dirs = Dirs::new();
        let mut runner = MockToolRunner::new();
        runner.expect_run().returning(|cmd, args, _| {
            let line = cmd.describe(args);
            if line.ends_with(BACKUP_SUFFIX) {
                return Err(no_such_file(line));
            }
            if line.ends_with(".conf") || cmd.program() == Some("rm") {
                return Err(ToolError::Failed {
                    command: line,
                    code: Some(1),
                    stderr: String::new(),
                });
            }
            Ok(ToolOutput::default())
        });
        let installer = Installer::new(Arc::new(runner), &dirs.paths(), &local_tools());

        let err = installer
            .full_install("wg0", b"priv\n", b"pub\n", b"cfg\n")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ArtifactKind::Config);
        assert_eq!(err.installed, vec![ArtifactKind::PrivateKey, ArtifactKind::PublicKey]);
        let report = err.rollback.clone().unwrap();
        assert_eq!(report.failed, vec![ArtifactKind::PublicKey, ArtifactKind::PrivateKey]);
        assert!(!err.is_clean());
    }
}
