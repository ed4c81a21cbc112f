//! Certificate lifecycle chores: deciding when a certificate is needed, publishing ACME
//! challenge responses, and keeping certificate material on disk.
//!
//! The crate covers everything around the ACME protocol itself. Issuance is left to an ACME
//! client; this crate tells the scheduler when to run it and gives it the pieces it needs.
//!
//! # Chores
//!
//! A [`Chore`] is one certificate's worth of responsibility: a set of domains, where to publish
//! challenge responses for them, and who to tell when a person has to step in. Chores come from
//! [`Config`], which deserializes from any serde format and must be validated against a
//! [`Registry`] before any renewal work starts:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use letsrenew::{Config, OpenSsh, Registry};
//!
//! fn load(raw: &str) -> eyre::Result<(Config, Registry)> {
//!     let config: Config = serde_json::from_str(raw)?;
//!     let registry = Registry::with_builtin_handlers(Arc::new(OpenSsh::from_config(&config.ssh)));
//!     config.validate(&registry)?;
//!     Ok((config, registry))
//! }
//! ```
//!
//! # Deciding
//!
//! [`renewal::evaluate`] inspects the [`store`] for one chore and returns an [`Outcome`]: the
//! certificate is there, operators were notified to import one, an import is needed but nobody
//! can be told, or a new certificate should be requested.
//!
//! # Deploying challenges
//!
//! HTTP-01 responses are published through [`DeploymentHandler`]s resolved from the registry by
//! type id. The built-in `ssh-alias` handler copies the response to a web root over SSH.
//!
//! # Storing certificates
//!
//! The [`store`] keeps one directory per chore under `<base>/chores/<chore-id>/`. Every file is
//! replaced atomically, and existing certificates can be brought in with [`import`].

#![deny(rust_2018_idioms, nonstandard_style, future_incompatible)]

mod cert;
mod error;
mod ssh;

pub mod config;
pub mod deploy;
pub mod import;
pub mod notify;
pub mod renewal;
pub mod store;


pub use crate::{
    cert::CertInfo,
    config::{Chore, Config, DeploymentDescriptor, DomainSpec},
    deploy::{Challenge, DeploymentHandler, Registry, RegistryEntry},
    error::{classify, Error},
    notify::{Delivery, Mail, MailTransport, Notifier},
    renewal::{Outcome, Status},
    ssh::{OpenSsh, RemoteShell},
    store::{CertFiles, CertMeta, CertRecord},
};
