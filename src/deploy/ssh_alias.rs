use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use serde::Deserialize;
use tempfile::TempPath;
use tokio::{fs, io::AsyncWriteExt as _};

use crate::{
    config::{Chore, DomainSpec, Params},
    deploy::{Challenge, DeploymentHandler, RegistryEntry},
    error::Error,
    ssh::RemoteShell,
};

pub(crate) const HANDLER_TYPE: &str = "ssh-alias";

const DEFAULT_TARGET_PATH: &str = ".well-known/acme-challenge";
const TOKEN_PLACEHOLDER: &str = "{{token}}";

/// Parameters of the `ssh-alias` handler.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshAliasParams {
    /// Host alias as understood by `ssh`/`scp`.
    pub ssh_host_alias: String,

    /// Remote web root; the chore's docroot when absent or empty.
    #[serde(default)]
    pub docroot: Option<String>,

    /// Challenge directory relative to the web root.
    #[serde(default = "default_target_path")]
    pub target_path: String,

    /// Remote file name; `{{token}}` is replaced by the challenge token.
    #[serde(default = "default_file_name_template")]
    pub file_name_template: String,

    /// `chmod` mode applied to the uploaded file.
    #[serde(default)]
    pub permissions: Option<String>,
}

fn default_target_path() -> String {
    DEFAULT_TARGET_PATH.to_owned()
}

fn default_file_name_template() -> String {
    TOKEN_PLACEHOLDER.to_owned()
}

impl SshAliasParams {
    pub fn from_params(params: &Params) -> eyre::Result<Self> {
        match params.get("sshHostAlias") {
            Some(serde_json::Value::String(alias)) if !alias.is_empty() => {}
            _ => {
                return Err(Error::Param(
                    "ssh-alias params.sshHostAlias must be a non-empty string".to_owned(),
                )
                .into())
            }
        }

        serde_json::from_value(serde_json::Value::Object(params.clone()))
            .map_err(|err| Error::Param(format!("invalid ssh-alias params: {err}")).into())
    }
}

/// Pushes challenge responses to a web root over SSH.
///
/// `deploy` runs `mkdir -p`, uploads the response with `scp` and optionally `chmod`s it.
/// `cleanup` runs `rm -f`, so removing an absent response succeeds.
pub struct SshAliasHandler {
    params: SshAliasParams,
    shell: Arc<dyn RemoteShell>,
    scratch_dir: PathBuf,
}

impl SshAliasHandler {
    pub fn new(params: &Params, shell: Arc<dyn RemoteShell>) -> eyre::Result<Self> {
        Ok(SshAliasHandler {
            params: SshAliasParams::from_params(params)?,
            shell,
            scratch_dir: std::env::temp_dir(),
        })
    }

    /// Local directory for the short-lived response file handed to `scp`.
    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn params(&self) -> &SshAliasParams {
        &self.params
    }

    fn remote_dir(&self, chore: &Chore) -> String {
        let docroot = self
            .params
            .docroot
            .as_deref()
            .filter(|docroot| !docroot.is_empty())
            .unwrap_or(&chore.docroot);

        format!(
            "{}/{}",
            docroot.trim_end_matches('/'),
            self.params.target_path.trim_start_matches('/')
        )
    }

    fn file_name(&self, challenge: &Challenge) -> String {
        self.params
            .file_name_template
            .replacen(TOKEN_PLACEHOLDER, &challenge.token, 1)
    }

    async fn push(&self, scratch: &Path, remote_dir: &str, remote_file: &str) -> eyre::Result<()> {
        let host = &self.params.ssh_host_alias;

        self.shell.exec(host, &["mkdir", "-p", remote_dir]).await?;
        self.shell.upload(scratch, host, remote_file).await?;

        if let Some(mode) = &self.params.permissions {
            self.shell.exec(host, &["chmod", mode.as_str(), remote_file]).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl DeploymentHandler for SshAliasHandler {
    fn validate_params(&self, params: &Params) -> eyre::Result<()> {
        SshAliasParams::from_params(params).map(|_| ())
    }

    async fn deploy(
        &self,
        chore: &Chore,
        domain: &DomainSpec,
        challenge: &Challenge,
    ) -> eyre::Result<()> {
        let remote_dir = self.remote_dir(chore);
        let file_name = self.file_name(challenge);
        let remote_file = format!("{remote_dir}/{file_name}");

        let scratch = write_scratch(&self.scratch_dir, &challenge.key_authorization).await?;

        let res = self.push(&scratch, &remote_dir, &remote_file).await;

        let scratch_path = scratch.to_path_buf();
        if let Err(err) = scratch.close() {
            log::debug!("could not remove {}: {err}", scratch_path.display());
        }

        res?;

        log::info!(
            "deployed challenge for {} to {}:{remote_file}",
            domain.name,
            self.params.ssh_host_alias
        );
        Ok(())
    }

    async fn cleanup(
        &self,
        chore: &Chore,
        domain: &DomainSpec,
        challenge: &Challenge,
    ) -> eyre::Result<()> {
        let remote_file = format!("{}/{}", self.remote_dir(chore), self.file_name(challenge));

        self.shell
            .exec(&self.params.ssh_host_alias, &["rm", "-f", remote_file.as_str()])
            .await?;

        log::debug!("removed challenge for {} at {remote_file}", domain.name);
        Ok(())
    }
}

/// Writes the response to a new, owner-only file in `dir`.
///
/// The file gets a random name and is created exclusively, so nothing already sitting in `dir` is
/// ever opened. It is removed when the returned path is dropped.
async fn write_scratch(dir: &Path, contents: &str) -> eyre::Result<TempPath> {
    let (file, path) = tempfile::Builder::new()
        .prefix("letsrenew-")
        .tempfile_in(dir)
        .map_err(|source| Error::storage(dir, source))?
        .into_parts();

    let mut file = fs::File::from_std(file);
    file.write_all(contents.as_bytes())
        .await
        .map_err(|source| Error::storage(&*path, source))?;
    file.flush()
        .await
        .map_err(|source| Error::storage(&*path, source))?;

    Ok(path)
}

pub(crate) fn entry(shell: Arc<dyn RemoteShell>) -> RegistryEntry {
    RegistryEntry::new(move |params| {
        let handler = SshAliasHandler::new(params, Arc::clone(&shell))?;
        Ok(Box::new(handler))
    })
}
