//! Challenge deployment handlers.
//!
//! A handler makes an HTTP-01 challenge response reachable at the domain's origin and removes it
//! again once the ACME server has looked at it. Handlers are built from a
//! [`DeploymentDescriptor`](crate::config::DeploymentDescriptor) by the [`Registry`], so callers
//! never branch on the concrete mechanism:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use letsrenew::{config::Chore, deploy::{Challenge, Registry}, OpenSsh};
//!
//! async fn publish(chore: &Chore, challenge: &Challenge) -> eyre::Result<()> {
//!     let registry = Registry::with_builtin_handlers(Arc::new(OpenSsh::new()));
//!
//!     for domain in &chore.domains {
//!         let descriptor = chore.deployment_for(domain).expect("validated config");
//!         let handler = registry.resolve(descriptor)?;
//!         handler.deploy(chore, domain, challenge).await?;
//!     }
//!
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{Chore, DomainSpec, Params};

mod registry;
mod ssh_alias;

pub use self::{
    registry::{HandlerFactory, Registry, RegistryEntry, SchemaValidator},
    ssh_alias::{SshAliasHandler, SshAliasParams},
};

/// An HTTP-01 challenge as handed out by the ACME server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    /// File name the ACME server requests under `/.well-known/acme-challenge/`.
    pub token: String,

    /// Content the ACME server expects to receive.
    pub key_authorization: String,
}

impl Challenge {
    pub fn new(token: impl Into<String>, key_authorization: impl Into<String>) -> Self {
        Challenge {
            token: token.into(),
            key_authorization: key_authorization.into(),
        }
    }
}

/// Places and removes challenge responses at a target origin.
///
/// `deploy` must be safe to repeat (it overwrites the same response) and `cleanup` must succeed
/// when the response is already gone. Neither retries internally.
#[async_trait]
pub trait DeploymentHandler: Send + Sync {
    /// Checks `params` without touching the network.
    fn validate_params(&self, params: &Params) -> eyre::Result<()>;

    async fn deploy(
        &self,
        chore: &Chore,
        domain: &DomainSpec,
        challenge: &Challenge,
    ) -> eyre::Result<()>;

    async fn cleanup(
        &self,
        chore: &Chore,
        domain: &DomainSpec,
        challenge: &Challenge,
    ) -> eyre::Result<()>;
}
