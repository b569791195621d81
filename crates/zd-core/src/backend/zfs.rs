//! Command-line ZFS backend
//!
//! Runs `zfs` and `zpool` locally, or through `ssh <host>` for remote
//! destinations. Transfers are `zfs send | zfs receive` pipelines executed by
//! `sh -c`.

use super::{DatasetKind, StorageBackend};
use crate::error::{BackendError, BackendResult};
use crate::label::SnapshotName;
use crate::target::{is_descendant, ReplicationTarget};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, trace};

/// Backend that executes the ZFS command-line tools.
#[derive(Debug, Clone)]
pub struct ZfsBackend {
    /// Path to zfs command (default: "zfs")
    zfs_path: String,
    /// Path to zpool command (default: "zpool")
    zpool_path: String,
    /// Path to ssh command (default: "ssh")
    ssh_path: String,
    /// Shell used for send/receive pipelines (default: "sh")
    shell_path: String,
}

impl ZfsBackend {
    /// Create a backend using the tools found on `PATH`.
    pub fn new() -> Self {
        Self {
            zfs_path: "zfs".to_string(),
            zpool_path: "zpool".to_string(),
            ssh_path: "ssh".to_string(),
            shell_path: "sh".to_string(),
        }
    }

    /// Create with custom command paths
    pub fn with_paths(zfs_path: String, zpool_path: String, ssh_path: String) -> Self {
        Self {
            zfs_path,
            zpool_path,
            ssh_path,
            shell_path: "sh".to_string(),
        }
    }

    /// Program and arguments for `program args...`, prefixed with
    /// `ssh <host>` when `host` is set.
    fn argv(&self, host: Option<&str>, program: &str, args: &[&str]) -> Vec<String> {
        let mut argv = Vec::with_capacity(args.len() + 3);
        let words = std::iter::once(program).chain(args.iter().copied());
        match host {
            // ssh hands the words to the remote shell joined by spaces
            Some(host) => {
                argv.push(self.ssh_path.clone());
                argv.push(host.to_string());
                argv.extend(words.map(shell_quote));
            }
            None => argv.extend(words.map(str::to_string)),
        }
        argv
    }

    /// Execute a command and return stdout
    async fn exec(&self, argv: &[String]) -> BackendResult<String> {
        let command = argv.join(" ");
        trace!(command = %command, "Executing command");

        let (program, args) = argv.split_first().ok_or_else(|| BackendError::Command {
            command: command.clone(),
            diagnostic: "empty command line".to_string(),
        })?;

        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|source| BackendError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            let mut diagnostic = String::from_utf8_lossy(&output.stdout).trim().to_string();
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.trim().is_empty() {
                if !diagnostic.is_empty() {
                    diagnostic.push(' ');
                }
                diagnostic.push_str(stderr.trim());
            }
            debug!(command = %command, status = %output.status, "Command failed");
            return Err(BackendError::Command {
                command,
                diagnostic,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn exec_shell(&self, pipeline: String) -> BackendResult<String> {
        let argv = vec![self.shell_path.clone(), "-c".to_string(), pipeline];
        self.exec(&argv).await
    }

    /// `zfs send ... | [ssh host] zfs receive -F <dataset>`
    fn send_pipeline(
        &self,
        base: Option<&SnapshotName>,
        snapshot: &SnapshotName,
        destination: &ReplicationTarget,
        raw: bool,
    ) -> String {
        let mut send = vec![self.zfs_path.clone(), "send".to_string()];
        if raw {
            send.push("--raw".to_string());
        }
        send.push("--large-block".to_string());
        if let Some(base) = base {
            send.push("-i".to_string());
            send.push(shell_quote(&base.to_string()));
        }
        send.push(shell_quote(&snapshot.to_string()));

        let receive = format!(
            "{} receive -F {}",
            shell_quote(&self.zfs_path),
            shell_quote(destination.dataset())
        );
        let receive = match destination.host() {
            // quoted once more for the local sh, the remote shell sees the
            // words above
            Some(host) => format!(
                "{} {} {}",
                self.ssh_path,
                shell_quote(host),
                shell_quote(&receive)
            ),
            None => receive,
        };

        format!("{} | {}", send.join(" "), receive)
    }
}

impl Default for ZfsBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for ZfsBackend {
    async fn exists(&self, host: Option<&str>, kind: DatasetKind, name: &str) -> bool {
        let program = match kind {
            DatasetKind::Pool => &self.zpool_path,
            DatasetKind::Dataset => &self.zfs_path,
        };
        let argv = self.argv(host, program, &["list", "-H", "-o", "name", name]);
        match self.exec(&argv).await {
            Ok(out) => out.trim() == name,
            Err(e) => {
                debug!(%kind, name, error = %e, "Existence check failed");
                false
            }
        }
    }

    async fn list_snapshots(
        &self,
        host: Option<&str>,
        dataset: &str,
    ) -> BackendResult<Vec<SnapshotName>> {
        let argv = self.argv(
            host,
            &self.zfs_path,
            &["list", "-H", "-t", "snapshot", "-o", "name", dataset],
        );
        let out = self.exec(&argv).await?;
        Ok(parse_snapshot_listing(&out))
    }

    async fn list_children(&self, dataset: &str) -> BackendResult<Vec<String>> {
        let argv = self.argv(
            None,
            &self.zfs_path,
            &["list", "-H", "-r", "-t", "filesystem,volume", "-o", "name", dataset],
        );
        let out = self.exec(&argv).await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| is_descendant(dataset, line))
            .map(str::to_string)
            .collect())
    }

    async fn create_snapshot(&self, dataset: &str, label: &str) -> BackendResult<()> {
        let name = format!("{}@{}", dataset, label);
        let argv = self.argv(None, &self.zfs_path, &["snapshot", name.as_str()]);
        self.exec(&argv).await.map(|_| ())
    }

    async fn destroy_snapshot(&self, snapshot: &SnapshotName) -> BackendResult<()> {
        let name = snapshot.to_string();
        let argv = self.argv(None, &self.zfs_path, &["destroy", name.as_str()]);
        self.exec(&argv).await.map(|_| ())
    }

    async fn scrub_pool(&self, pool: &str) -> BackendResult<()> {
        let argv = self.argv(None, &self.zpool_path, &["scrub", pool]);
        self.exec(&argv).await.map(|_| ())
    }

    async fn send_full(
        &self,
        snapshot: &SnapshotName,
        destination: &ReplicationTarget,
        raw: bool,
    ) -> BackendResult<()> {
        let pipeline = self.send_pipeline(None, snapshot, destination, raw);
        self.exec_shell(pipeline).await.map(|_| ())
    }

    async fn send_incremental(
        &self,
        from: &SnapshotName,
        to: &SnapshotName,
        destination: &ReplicationTarget,
        raw: bool,
    ) -> BackendResult<()> {
        let pipeline = self.send_pipeline(Some(from), to, destination, raw);
        self.exec_shell(pipeline).await.map(|_| ())
    }
}

/// Parse `zfs list -H -o name` output, skipping blank or foreign lines.
fn parse_snapshot_listing(output: &str) -> Vec<SnapshotName> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| SnapshotName::parse(line).ok())
        .collect()
}

/// Quote `s` for `sh` unless it only holds characters that are safe bare.
fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '@' | ':' | '+'));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}
