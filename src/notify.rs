//! Operator alerts.
//!
//! A [`Notifier`] tries its transports in order and stops at the first one that reports success.
//! When all of them fail the message is written to the log instead, so every alert ends up
//! somewhere an operator can see it and [`Notifier::notify`] itself never fails.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use eyre::{eyre, WrapErr as _};
use tokio::{fs, io::AsyncWriteExt as _, process::Command};

const SENDMAIL_PATH: &str = "/usr/sbin/sendmail";
const MAIL_PROGRAM: &str = "mail";

/// An alert addressed to one or more operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// One way of delivering a [`Mail`].
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Short name used in logs and [`Delivery`].
    fn name(&self) -> &str;

    async fn send(&self, mail: &Mail) -> eyre::Result<()>;
}

/// Pipes the message into a sendmail compatible MTA.
#[derive(Debug, Clone)]
pub struct Sendmail {
    path: PathBuf,
}

impl Sendmail {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Sendmail { path: path.into() }
    }
}

impl Default for Sendmail {
    fn default() -> Self {
        Sendmail::new(SENDMAIL_PATH)
    }
}

#[async_trait]
impl MailTransport for Sendmail {
    fn name(&self) -> &str {
        "sendmail"
    }

    async fn send(&self, mail: &Mail) -> eyre::Result<()> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            return Err(eyre!("{} not found", self.path.display()));
        }

        let mut args = vec!["-oi".to_owned()];
        args.extend(mail.recipients.iter().cloned());

        let message = format!("Subject: {}\n\n{}", mail.subject, mail.body);
        pipe_to(&self.path, &args, &message).await
    }
}

/// Hands the message to a `mail`/`mailx` style client.
#[derive(Debug, Clone)]
pub struct MailClient {
    program: PathBuf,
}

impl MailClient {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        MailClient {
            program: program.into(),
        }
    }
}

impl Default for MailClient {
    fn default() -> Self {
        MailClient::new(MAIL_PROGRAM)
    }
}

#[async_trait]
impl MailTransport for MailClient {
    fn name(&self) -> &str {
        "mail"
    }

    async fn send(&self, mail: &Mail) -> eyre::Result<()> {
        let mut args = vec!["-s".to_owned(), mail.subject.clone()];
        args.extend(mail.recipients.iter().cloned());

        pipe_to(&self.program, &args, &mail.body).await
    }
}

async fn pipe_to(program: &Path, args: &[String], input: &str) -> eyre::Result<()> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .wrap_err_with(|| format!("spawn {}", program.display()))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(input.as_bytes())
            .await
            .wrap_err_with(|| format!("write message to {}", program.display()))?;
    }

    let output = child.wait_with_output().await?;

    if !output.status.success() {
        return Err(eyre!(
            "{} exited with {}: {}",
            program.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }

    Ok(())
}

/// Where a notification ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Accepted by the named transport.
    Transport(String),

    /// Every transport failed; the message was logged.
    Logged,
}

/// Ordered list of mail transports with a log record as the last resort.
pub struct Notifier {
    transports: Vec<Box<dyn MailTransport>>,
}

impl Notifier {
    pub fn new(transports: Vec<Box<dyn MailTransport>>) -> Self {
        Notifier { transports }
    }

    /// Local MTA first, then the `mail` client.
    pub fn system() -> Self {
        Notifier::new(vec![
            Box::new(Sendmail::default()),
            Box::new(MailClient::default()),
        ])
    }

    /// Only writes alerts to the log.
    pub fn log_only() -> Self {
        Notifier::new(Vec::new())
    }

    pub async fn notify(&self, mail: &Mail) -> Delivery {
        for transport in &self.transports {
            match transport.send(mail).await {
                Ok(()) => {
                    log::info!(
                        "sent \"{}\" to {} via {}",
                        mail.subject,
                        mail.recipients.join(","),
                        transport.name()
                    );
                    return Delivery::Transport(transport.name().to_owned());
                }
                Err(err) => log::warn!(
                    "{} could not send \"{}\": {err:#}",
                    transport.name(),
                    mail.subject
                ),
            }
        }

        log::warn!(
            "mail to {} subject: {}\n{}",
            mail.recipients.join(","),
            mail.subject,
            mail.body
        );
        Delivery::Logged
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Notifier::system()
    }
}
