//! Importing existing certificates (e.g. a certbot `live/<domain>` directory) into the store.
//!
//! Imported records are written through [`store::write`] and are indistinguishable from renewed
//! ones.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use time::OffsetDateTime;

use crate::{
    cert::CertInfo,
    config::Config,
    error::Error,
    ssh::RemoteShell,
    store::{self, CertFiles, CertMeta, LastResult},
};

/// Where an existing certificate lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportSource {
    /// Directory on this machine.
    Local(PathBuf),

    /// Directory on a host reachable through an SSH alias.
    Remote { host: String, path: String },
}

impl ImportSource {
    /// Parses `host:/absolute/path` as remote and everything else as a local directory.
    pub fn parse(spec: &str) -> Self {
        match spec.split_once(':') {
            Some((host, path)) if !host.is_empty() && path.starts_with('/') => {
                ImportSource::Remote {
                    host: host.to_owned(),
                    path: path.to_owned(),
                }
            }
            _ => ImportSource::Local(PathBuf::from(spec)),
        }
    }

    /// The import source for `chore_id`: `explicit` when given, else the chore's `importFrom`.
    pub fn for_chore(
        explicit: Option<&str>,
        config: &Config,
        chore_id: &str,
    ) -> eyre::Result<Self> {
        if let Some(spec) = explicit {
            return Ok(ImportSource::parse(spec));
        }

        let chore = config
            .chore(chore_id)
            .ok_or_else(|| Error::Config(format!("unknown chore: {chore_id}")))?;

        match &chore.import_from {
            Some(spec) => {
                log::info!("using importFrom of chore {chore_id}: {spec}");
                Ok(ImportSource::parse(spec))
            }
            None => Err(Error::Config(format!(
                "no import source given and chore {chore_id} has no importFrom"
            ))
            .into()),
        }
    }

    /// Reads `name` from the source; unreadable or empty files count as absent.
    async fn read(&self, shell: &dyn RemoteShell, name: &str) -> Option<String> {
        let res = match self {
            ImportSource::Local(dir) => tokio::fs::read_to_string(dir.join(name))
                .await
                .map_err(eyre::Report::from),
            ImportSource::Remote { host, path } => {
                let remote_file = format!("{}/{name}", path.trim_end_matches('/'));
                shell.exec(host, &["cat", remote_file.as_str()]).await
            }
        };

        match res {
            Ok(contents) if !contents.is_empty() => Some(contents),
            Ok(_) => None,
            Err(err) => {
                log::debug!("cannot read {name} from {self}: {err:#}");
                None
            }
        }
    }
}

impl fmt::Display for ImportSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportSource::Local(dir) => write!(f, "{}", dir.display()),
            ImportSource::Remote { host, path } => write!(f, "{host}:{path}"),
        }
    }
}

/// Copies the certificate at `source` into the record of `chore_id` under `base`.
///
/// `privkey.pem` and `cert.pem` are required. The chain falls back to `fullchain.pem` and the
/// fullchain to the certificate followed by the chain. Returns the metadata that was written.
pub async fn import_certificate(
    source: &ImportSource,
    shell: &dyn RemoteShell,
    base: &Path,
    chore_id: &str,
) -> eyre::Result<CertMeta> {
    let privkey = source.read(shell, store::PRIVKEY_FILE).await;
    let cert = source.read(shell, store::CERT_FILE).await;

    let (Some(privkey), Some(cert)) = (privkey, cert) else {
        return Err(Error::Config(format!(
            "{source} does not contain {} and {}",
            store::PRIVKEY_FILE,
            store::CERT_FILE
        ))
        .into());
    };

    let fullchain = source.read(shell, store::FULLCHAIN_FILE).await;
    let chain = match source.read(shell, store::CHAIN_FILE).await {
        Some(chain) => Some(chain),
        None => fullchain.clone(),
    };
    let fullchain = fullchain.or_else(|| chain.as_ref().map(|chain| format!("{cert}\n{chain}")));

    let now = OffsetDateTime::now_utc();
    let mut meta = CertMeta {
        issued_at: Some(now),
        last_result: Some(LastResult {
            success: true,
            ts: now,
            message: Some(format!("imported from {source}")),
        }),
        ..CertMeta::default()
    };

    match CertInfo::from_pem(&cert) {
        Ok(info) => {
            meta.domains = info.domains().iter().cloned().collect();
            meta.expires_at = Some(info.not_after());
        }
        Err(err) => log::warn!("cannot inspect certificate from {source}: {err:#}"),
    }

    let mut files = CertFiles::new(privkey, cert);
    files.chain_pem = chain;
    files.fullchain_pem = fullchain;

    store::write(base, chore_id, &files, &meta).await?;

    log::info!(
        "imported certificate from {source} to {}",
        store::chore_dir(base, chore_id).display()
    );
    Ok(meta)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{error::classify, test::FakeShell};

    #[test]
    fn test_parse_source() {
        assert_eq!(
            ImportSource::parse("web1:/etc/letsencrypt/live/example.com"),
            ImportSource::Remote {
                host: "web1".to_owned(),
                path: "/etc/letsencrypt/live/example.com".to_owned(),
            }
        );
        assert_eq!(
            ImportSource::parse("/etc/letsencrypt/live/example.com"),
            ImportSource::Local("/etc/letsencrypt/live/example.com".into())
        );
        assert_eq!(
            ImportSource::parse("relative:dir"),
            ImportSource::Local("relative:dir".into())
        );
        assert_eq!(
            ImportSource::parse("web1:/srv").to_string(),
            "web1:/srv"
        );
    }

    #[test]
    fn test_source_from_config() {
        let cfg = crate::test::config(json!([{
            "id": "site-example",
            "name": "Example",
            "domains": [{ "name": "example.com" }],
            "docroot": "/var/www/example",
            "importFrom": "web1:/etc/letsencrypt/live/example.com",
        }]));

        let source = ImportSource::for_chore(None, &cfg, "site-example").unwrap();
        assert_eq!(source.to_string(), "web1:/etc/letsencrypt/live/example.com");

        let source = ImportSource::for_chore(Some("/tmp/certs"), &cfg, "site-example").unwrap();
        assert_eq!(source, ImportSource::Local("/tmp/certs".into()));

        let err = ImportSource::for_chore(None, &cfg, "unknown").unwrap_err();
        assert!(classify(&err).unwrap().is_config());
    }

    #[tokio::test]
    async fn test_import_local_directory() {
        let (cert_pem, key_pem) = crate::test::self_signed(&["example.com", "www.example.com"]);
        let (chain_pem, _) = crate::test::self_signed(&["issuer.example.com"]);

        let live = tempfile::tempdir().unwrap();
        std::fs::write(live.path().join("privkey.pem"), &key_pem).unwrap();
        std::fs::write(live.path().join("cert.pem"), &cert_pem).unwrap();
        std::fs::write(live.path().join("chain.pem"), &chain_pem).unwrap();

        let base = tempfile::tempdir().unwrap();
        let source = ImportSource::Local(live.path().to_owned());
        let meta = import_certificate(&source, &FakeShell::default(), base.path(), "site-example")
            .await
            .unwrap();

        assert_eq!(
            meta.domains.iter().collect::<Vec<_>>(),
            ["example.com", "www.example.com"]
        );
        assert!(meta.expires_at.is_some());
        assert!(meta.last_result.as_ref().unwrap().success);

        let record = store::read(base.path(), "site-example").await.unwrap().unwrap();
        assert_eq!(*record.files.privkey_pem, key_pem);
        assert_eq!(record.files.cert_pem, cert_pem);
        assert_eq!(record.files.chain_pem.as_deref(), Some(chain_pem.as_str()));
        assert_eq!(
            record.files.fullchain_pem,
            Some(format!("{cert_pem}\n{chain_pem}"))
        );
        assert_eq!(record.meta, Some(meta));
    }

    #[tokio::test]
    async fn test_import_remote_fullchain_only() {
        let (cert_pem, key_pem) = crate::test::self_signed(&["example.com"]);
        let fullchain = format!("{cert_pem}\nISSUER");

        let shell = FakeShell::default();
        shell.put_remote_file("web1", "/etc/letsencrypt/live/example.com/privkey.pem", &key_pem);
        shell.put_remote_file("web1", "/etc/letsencrypt/live/example.com/cert.pem", &cert_pem);
        shell.put_remote_file(
            "web1",
            "/etc/letsencrypt/live/example.com/fullchain.pem",
            &fullchain,
        );

        let base = tempfile::tempdir().unwrap();
        let source = ImportSource::parse("web1:/etc/letsencrypt/live/example.com/");
        import_certificate(&source, &shell, base.path(), "site-example")
            .await
            .unwrap();

        let record = store::read(base.path(), "site-example").await.unwrap().unwrap();
        assert_eq!(record.files.chain_pem.as_deref(), Some(fullchain.as_str()));
        assert_eq!(record.files.fullchain_pem.as_deref(), Some(fullchain.as_str()));
        assert!(shell
            .calls()
            .contains(&"web1: cat /etc/letsencrypt/live/example.com/cert.pem".to_owned()));
    }

    #[tokio::test]
    async fn test_import_requires_key_and_cert() {
        let live = tempfile::tempdir().unwrap();
        std::fs::write(live.path().join("cert.pem"), "CERT").unwrap();

        let base = tempfile::tempdir().unwrap();
        let source = ImportSource::Local(live.path().to_owned());
        let err = import_certificate(&source, &FakeShell::default(), base.path(), "site-example")
            .await
            .unwrap_err();

        assert!(classify(&err).unwrap().is_config());
        assert!(store::read(base.path(), "site-example").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_import_uninspectable_certificate() {
        let live = tempfile::tempdir().unwrap();
        std::fs::write(live.path().join("privkey.pem"), "KEY").unwrap();
        std::fs::write(live.path().join("cert.pem"), "CERT").unwrap();

        let base = tempfile::tempdir().unwrap();
        let source = ImportSource::Local(live.path().to_owned());
        let meta = import_certificate(&source, &FakeShell::default(), base.path(), "site-example")
            .await
            .unwrap();

        assert!(meta.domains.is_empty());
        assert_eq!(meta.expires_at, None);

        let record = store::read(base.path(), "site-example").await.unwrap().unwrap();
        assert_eq!(record.files.chain_pem, None);
        assert_eq!(record.files.fullchain_pem, None);
    }
}
