//! On-disk certificate records, one directory per chore.
//!
//! ```text
//! <base>/chores/<chore-id>/privkey.pem    0600
//! <base>/chores/<chore-id>/cert.pem       0644
//! <base>/chores/<chore-id>/chain.pem      0644 (optional)
//! <base>/chores/<chore-id>/fullchain.pem  0644 (optional)
//! <base>/chores/<chore-id>/meta.json      0644
//! ```
//!
//! Every file is replaced by writing a uniquely named sibling `.<name>.<random>.tmp` and renaming
//! it into place, so a reader sees either the old or the new content of each file and concurrent
//! writers never share a temporary file. The record as a whole is not
//! transactional; `meta.json` is always written last and a record only counts as present when both
//! `privkey.pem` and `cert.pem` are non-empty.

use std::{
    collections::BTreeSet,
    io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::{fs, io::AsyncWriteExt as _};
use zeroize::Zeroizing;

use crate::{config::validate_chore_id, error::Error};

pub const PRIVKEY_FILE: &str = "privkey.pem";
pub const CERT_FILE: &str = "cert.pem";
pub const CHAIN_FILE: &str = "chain.pem";
pub const FULLCHAIN_FILE: &str = "fullchain.pem";
pub const META_FILE: &str = "meta.json";

const PRIVATE_MODE: u32 = 0o600;
const PUBLIC_MODE: u32 = 0o644;

/// PEM encoded certificate material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertFiles {
    pub privkey_pem: Zeroizing<String>,
    pub cert_pem: String,
    pub chain_pem: Option<String>,
    pub fullchain_pem: Option<String>,
}

impl CertFiles {
    pub fn new(privkey_pem: impl Into<String>, cert_pem: impl Into<String>) -> Self {
        CertFiles {
            privkey_pem: Zeroizing::new(privkey_pem.into()),
            cert_pem: cert_pem.into(),
            chain_pem: None,
            fullchain_pem: None,
        }
    }
}

/// Outcome of the most recent renewal or import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastResult {
    pub success: bool,

    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Contents of `meta.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertMeta {
    #[serde(default)]
    pub domains: BTreeSet<String>,

    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub issued_at: Option<OffsetDateTime>,

    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<OffsetDateTime>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acme_account: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<LastResult>,
}

/// A usable certificate record read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertRecord {
    pub files: CertFiles,

    /// `None` when the record has no `meta.json`.
    pub meta: Option<CertMeta>,
}

/// Directory holding the record of `chore_id`.
pub fn chore_dir(base: &Path, chore_id: &str) -> PathBuf {
    base.join("chores").join(chore_id)
}

/// Writes (or replaces) the record of `chore_id`.
///
/// Material files are renamed into place before `meta.json` is written. Optional files that are
/// not part of `files` are removed so the old chain never pairs with a new certificate.
pub async fn write(
    base: &Path,
    chore_id: &str,
    files: &CertFiles,
    meta: &CertMeta,
) -> eyre::Result<()> {
    validate_chore_id(chore_id)?;

    let dir = chore_dir(base, chore_id);
    fs::create_dir_all(&dir)
        .await
        .map_err(|source| Error::storage(&dir, source))?;

    write_atomic(&dir, PRIVKEY_FILE, files.privkey_pem.as_bytes(), PRIVATE_MODE).await?;
    write_atomic(&dir, CERT_FILE, files.cert_pem.as_bytes(), PUBLIC_MODE).await?;

    for (name, contents) in [
        (CHAIN_FILE, &files.chain_pem),
        (FULLCHAIN_FILE, &files.fullchain_pem),
    ] {
        match contents {
            Some(pem) => write_atomic(&dir, name, pem.as_bytes(), PUBLIC_MODE).await?,
            None => remove_if_exists(&dir.join(name)).await?,
        }
    }

    let meta_json = serde_json::to_vec_pretty(meta)?;
    write_atomic(&dir, META_FILE, &meta_json, PUBLIC_MODE).await?;

    log::debug!("wrote certificate record to {}", dir.display());
    Ok(())
}

/// Reads the record of `chore_id`.
///
/// Returns `None` unless both the private key and the certificate are present and non-empty.
pub async fn read(base: &Path, chore_id: &str) -> eyre::Result<Option<CertRecord>> {
    validate_chore_id(chore_id)?;

    let dir = chore_dir(base, chore_id);

    let privkey = read_if_exists(&dir.join(PRIVKEY_FILE)).await?.map(Zeroizing::new);
    let cert = read_if_exists(&dir.join(CERT_FILE)).await?;

    let (Some(privkey_pem), Some(cert_pem)) = (
        privkey.filter(|pem| !pem.is_empty()),
        cert.filter(|pem| !pem.is_empty()),
    ) else {
        log::debug!("no usable certificate record in {}", dir.display());
        return Ok(None);
    };

    let files = CertFiles {
        privkey_pem,
        cert_pem,
        chain_pem: read_if_exists(&dir.join(CHAIN_FILE)).await?,
        fullchain_pem: read_if_exists(&dir.join(FULLCHAIN_FILE)).await?,
    };

    let meta_path = dir.join(META_FILE);
    let meta = match read_if_exists(&meta_path).await? {
        Some(raw) => Some(
            serde_json::from_str(&raw).map_err(|source| Error::Parse {
                path: meta_path,
                source,
            })?,
        ),
        None => None,
    };

    Ok(Some(CertRecord { files, meta }))
}

/// Writes `contents` to a fresh temporary file in `dir`, syncs it and renames it onto
/// `<dir>/<name>`.
///
/// The temporary file is removed when anything before the rename fails.
async fn write_atomic(dir: &Path, name: &str, contents: &[u8], mode: u32) -> eyre::Result<()> {
    let dest = dir.join(name);

    let (file, tmp) = tempfile::Builder::new()
        .prefix(&format!(".{name}."))
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|source| Error::storage(dir, source))?
        .into_parts();

    let mut file = fs::File::from_std(file);
    file.write_all(contents)
        .await
        .map_err(|source| Error::storage(&*tmp, source))?;
    file.sync_all()
        .await
        .map_err(|source| Error::storage(&*tmp, source))?;
    drop(file);

    // temporary files start out as 0600
    set_mode(&tmp, mode).await?;

    tmp.persist(&dest).map_err(|err| Error::storage(&dest, err.error))?;

    Ok(())
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> eyre::Result<()> {
    use std::os::unix::fs::PermissionsExt as _;

    fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|source| Error::storage(path, source))?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> eyre::Result<()> {
    Ok(())
}

async fn remove_if_exists(path: &Path) -> eyre::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(Error::storage(path, source).into()),
    }
}

async fn read_if_exists(path: &Path) -> eyre::Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(Error::storage(path, source).into()),
    }
}
