//! Per-chore renewal decisions.
//!
//! [`evaluate`] looks at the certificate store and answers "what must happen now?" for one chore.
//! It never talks ACME itself: when a certificate has to be issued it returns
//! [`Status::RequestNewCertificate`] and leaves issuance to the caller. Each call is a single
//! read-and-decide pass, safe to repeat on every scheduler tick.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    config::{Chore, Config},
    notify::{Mail, Notifier},
    store,
};

/// What the caller should do about a chore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// A usable certificate is stored.
    Ok,

    /// No certificate; operators were asked to import one.
    Notified,

    /// No certificate and nobody to tell; someone has to import one.
    NeedsImport,

    /// No certificate; the ACME client should issue one for the chore's domains.
    RequestNewCertificate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub status: Status,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_from: Option<String>,
}

impl Outcome {
    fn new(status: Status, message: &str) -> Self {
        Outcome {
            status,
            message: message.to_owned(),
            import_from: None,
        }
    }

    fn with_import_from(mut self, import_from: &str) -> Self {
        self.import_from = Some(import_from.to_owned());
        self
    }
}

/// Decides what must happen for `chore`, whose record lives under `base`.
///
/// Sends at most one notification. Notification trouble is logged by the [`Notifier`] and never
/// turns into an error; only store failures do.
pub async fn evaluate(
    base: &Path,
    config: &Config,
    chore: &Chore,
    notifier: &Notifier,
) -> eyre::Result<Outcome> {
    if store::read(base, &chore.id).await?.is_some() {
        return Ok(Outcome::new(Status::Ok, "certificate present"));
    }

    let Some(import_from) = chore.import_from.as_deref() else {
        log::info!("chore {} has no certificate; requesting a new one", chore.id);
        return Ok(Outcome::new(
            Status::RequestNewCertificate,
            "no existing cert; should request new certificate via ACME",
        ));
    };

    let mail = import_request(config, chore, import_from);

    if chore.notify_on_failure.is_empty() {
        log::warn!(
            "no notifyOnFailure recipients configured for chore {}; cannot send \"{}\"",
            chore.id,
            mail.subject
        );
        return Ok(
            Outcome::new(Status::NeedsImport, "no recipients configured")
                .with_import_from(import_from),
        );
    }

    notifier.notify(&mail).await;

    Ok(Outcome::new(Status::Notified, "admins notified to import").with_import_from(import_from))
}

/// Evaluates every enabled chore of `config`.
///
/// Chores are independent: one chore's error is returned in its slot and the rest still run.
pub async fn evaluate_all(
    base: &Path,
    config: &Config,
    notifier: &Notifier,
) -> Vec<(String, eyre::Result<Outcome>)> {
    let mut outcomes = Vec::with_capacity(config.chores.len());

    for chore in &config.chores {
        if !chore.enabled {
            log::debug!("skipping disabled chore {}", chore.id);
            continue;
        }

        let outcome = evaluate(base, config, chore, notifier).await;

        if let Err(err) = &outcome {
            log::error!("chore {} failed: {err:#}", chore.id);
        }

        outcomes.push((chore.id.clone(), outcome));
    }

    outcomes
}

fn import_request(config: &Config, chore: &Chore, import_from: &str) -> Mail {
    let domains = chore.domain_names().collect::<Vec<_>>().join(", ");

    Mail {
        recipients: chore.notify_on_failure.clone(),
        subject: format!("letsrenew: manual import required for chore {}", chore.id),
        body: format!(
            "No certificate files were found for chore {id} (domains: {domains}).\n\
             This chore has importFrom set to: {import_from}\n\
             Please run the importer: import-certbot {import_from} {id} {storage}\n",
            id = chore.id,
            storage = config.cert_storage_dir().display(),
        ),
    }
}
