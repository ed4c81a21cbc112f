use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use tokio::process::Command;

use crate::{config::SshConfig, error::Error};

/// Runs commands on, and copies files to, hosts addressed by an SSH alias.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Runs `args` on `host` and returns its standard output.
    async fn exec(&self, host: &str, args: &[&str]) -> eyre::Result<String>;

    /// Copies `local` to `remote_path` on `host`.
    async fn upload(&self, local: &Path, host: &str, remote_path: &str) -> eyre::Result<()>;
}

/// [`RemoteShell`] backed by the system `ssh` and `scp` binaries in batch mode.
///
/// Host aliases resolve through the invoking user's SSH configuration.
#[derive(Debug, Clone, Default)]
pub struct OpenSsh {
    known_hosts: Option<PathBuf>,
}

impl OpenSsh {
    pub fn new() -> Self {
        OpenSsh::default()
    }

    pub fn from_config(config: &SshConfig) -> Self {
        OpenSsh {
            known_hosts: config.known_hosts_path.clone(),
        }
    }

    /// Use `path` as the known hosts file instead of the user's default.
    pub fn known_hosts(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts = Some(path.into());
        self
    }

    fn options(&self) -> Vec<OsString> {
        let mut opts = vec![OsString::from("-oBatchMode=yes")];

        if let Some(path) = &self.known_hosts {
            let mut opt = OsString::from("-oUserKnownHostsFile=");
            opt.push(path);
            opts.push(opt);
        }

        opts
    }
}

#[async_trait]
impl RemoteShell for OpenSsh {
    async fn exec(&self, host: &str, args: &[&str]) -> eyre::Result<String> {
        let mut cmd_args = self.options();
        cmd_args.push(host.into());
        cmd_args.extend(args.iter().map(OsString::from));

        run("ssh", cmd_args).await
    }

    async fn upload(&self, local: &Path, host: &str, remote_path: &str) -> eyre::Result<()> {
        let mut cmd_args = self.options();
        cmd_args.push(local.into());
        cmd_args.push(format!("{host}:{remote_path}").into());

        run("scp", cmd_args).await.map(|_stdout| ())
    }
}

async fn run(program: &str, args: Vec<OsString>) -> eyre::Result<String> {
    let command = format!(
        "{program} {}",
        args.iter()
            .map(|arg| arg.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    );
    log::debug!("Run: {command}");

    let output = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|err| Error::Remote {
            command: command.clone(),
            detail: err.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Remote {
            command,
            detail: format!("{} {}", output.status, stderr.trim()),
        }
        .into());
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_mode_options() {
        assert_eq!(OpenSsh::new().options(), ["-oBatchMode=yes"]);

        let ssh = OpenSsh::from_config(&SshConfig {
            known_hosts_path: Some("/etc/letsrenew/known_hosts".into()),
        });
        assert_eq!(
            ssh.options(),
            [
                "-oBatchMode=yes",
                "-oUserKnownHostsFile=/etc/letsrenew/known_hosts"
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_remote_error() {
        let err = run("/nonexistent/letsrenew-ssh", vec![]).await.unwrap_err();
        assert!(matches!(
            crate::error::classify(&err),
            Some(Error::Remote { .. })
        ));
    }
}
