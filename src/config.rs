//! Typed configuration for chores and their deployments.
//!
//! Parsing a concrete file format is left to the embedding program; everything here derives
//! [`Deserialize`] with the camelCase keys used in configuration files. Call [`Config::validate`]
//! once handlers are registered to fail fast on bad deployment mappings.

use std::path::{Path, PathBuf};

use eyre::WrapErr as _;
use serde::{Deserialize, Serialize};

use crate::{deploy::Registry, error::Error};

/// Handler specific parameters, opaque to everything but the handler.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// Selects a registered deployment handler and carries its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentDescriptor {
    #[serde(rename = "type")]
    pub handler_type: String,

    #[serde(default, skip_serializing_if = "Params::is_empty")]
    pub params: Params,
}

impl DeploymentDescriptor {
    pub fn new(handler_type: impl Into<String>, params: Params) -> Self {
        DeploymentDescriptor {
            handler_type: handler_type.into(),
            params,
        }
    }
}

/// One domain of a chore, optionally overriding the chore's deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainSpec {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentDescriptor>,
}

impl DomainSpec {
    pub fn new(name: impl Into<String>) -> Self {
        DomainSpec {
            name: name.into(),
            deployment: None,
        }
    }
}

/// A unit of certificate responsibility.
///
/// The `id` doubles as the storage key, so it must be usable as a single directory name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chore {
    pub id: String,
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub domains: Vec<DomainSpec>,

    /// Web root used by deployments that do not configure their own.
    pub docroot: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentDescriptor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_path: Option<PathBuf>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Operator addresses alerted when manual action is needed.
    #[serde(default)]
    pub notify_on_failure: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_acme_account: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge_type: Option<String>,

    /// Existing certificate location (`/local/dir` or `host:/remote/dir`) to import from instead
    /// of issuing a new certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_from: Option<String>,
}

impl Chore {
    /// The deployment that applies to `domain`: its own, else the chore's.
    pub fn deployment_for<'a>(
        &'a self,
        domain: &'a DomainSpec,
    ) -> Option<&'a DeploymentDescriptor> {
        domain.deployment.as_ref().or(self.deployment.as_ref())
    }

    pub fn domain_names(&self) -> impl Iterator<Item = &str> {
        self.domains.iter().map(|domain| domain.name.as_str())
    }

    /// Checks every domain's effective deployment against `registry`.
    pub fn validate(&self, registry: &Registry) -> eyre::Result<()> {
        validate_chore_id(&self.id)?;

        if self.domains.is_empty() {
            return Err(Error::Config(format!("chore {} has no domains", self.id)).into());
        }

        for domain in &self.domains {
            let descriptor = self.deployment_for(domain).ok_or_else(|| {
                Error::Config(format!(
                    "no deployment configured for domain {} of chore {}",
                    domain.name, self.id
                ))
            })?;

            validate_descriptor(registry, descriptor)
                .wrap_err_with(|| format!("chore {} domain {}", self.id, domain.name))?;
        }

        Ok(())
    }
}

fn default_enabled() -> bool {
    true
}

fn validate_descriptor(registry: &Registry, descriptor: &DeploymentDescriptor) -> eyre::Result<()> {
    let entry = registry.get(&descriptor.handler_type).ok_or_else(|| {
        Error::Config(format!(
            "unknown deployment handler type: {}",
            descriptor.handler_type
        ))
    })?;

    entry.validate_schema(&descriptor.params)?;

    let handler = entry.build(&descriptor.params)?;
    handler.validate_params(&descriptor.params)
}

/// Chore ids name a directory under the store, so they must be one plain path component.
pub(crate) fn validate_chore_id(id: &str) -> Result<(), Error> {
    let plain = !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\', '\0'])
        && id.trim() == id;

    if plain {
        Ok(())
    } else {
        Err(Error::Config(format!("invalid chore id: {id:?}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcmeConfig {
    pub directory_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_mode: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_hosts_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    #[serde(default)]
    pub json: bool,
}

/// Top level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,

    #[serde(default = "default_expiry_threshold_days")]
    pub expiry_threshold_days: u32,

    #[serde(default = "default_status_port")]
    pub status_port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_digest_user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_digest_password_hash: Option<String>,

    pub cert_storage_dir: PathBuf,

    pub acme: AcmeConfig,

    #[serde(default)]
    pub ssh: SshConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    pub chores: Vec<Chore>,
}

fn default_version() -> u32 {
    1
}

fn default_interval_minutes() -> u64 {
    720
}

fn default_expiry_threshold_days() -> u32 {
    30
}

fn default_status_port() -> u16 {
    8080
}

impl Config {
    /// Validates every chore against the registered handlers.
    ///
    /// Any error here is fatal: the process must not start renewal work with an invalid
    /// chore/domain deployment mapping.
    pub fn validate(&self, registry: &Registry) -> eyre::Result<()> {
        let mut seen = std::collections::HashSet::new();

        for chore in &self.chores {
            if !seen.insert(chore.id.as_str()) {
                return Err(Error::Config(format!("duplicate chore id: {}", chore.id)).into());
            }

            chore.validate(registry)?;
        }

        log::debug!("validated {} chores", self.chores.len());
        Ok(())
    }

    pub fn chore(&self, id: &str) -> Option<&Chore> {
        self.chores.iter().find(|chore| chore.id == id)
    }

    pub fn cert_storage_dir(&self) -> &Path {
        &self.cert_storage_dir
    }
}
