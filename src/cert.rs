use std::io::{BufReader, Cursor};

use der::Decode as _;
use eyre::{eyre, WrapErr as _};
use time::OffsetDateTime;
use x509_cert::{
    ext::pkix::{name::GeneralName, SubjectAltName},
    time::Time,
};

/// Facts read from a PEM encoded certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    domains: Vec<String>,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
}

impl CertInfo {
    /// Inspects the leaf (first) certificate of `pem`.
    ///
    /// A chain or fullchain file works too; only the end-entity certificate is looked at.
    pub fn from_pem(pem: &str) -> eyre::Result<Self> {
        let chain = certificate_chain(pem)?;
        let leaf = chain
            .first() // EE cert is first
            .ok_or_else(|| eyre!("no certificates in PEM input"))?;

        let cert = x509_cert::Certificate::from_der(leaf).wrap_err("decode leaf certificate")?;
        let tbs = &cert.tbs_certificate;

        let domains = match tbs
            .get::<SubjectAltName>()
            .wrap_err("decode subject alt names")?
        {
            Some((_critical, san)) => san
                .0
                .iter()
                .filter_map(|name| match name {
                    GeneralName::DnsName(dns) => Some(dns.to_string()),
                    _ => None,
                })
                .collect(),
            None => Vec::new(),
        };

        Ok(CertInfo {
            domains,
            not_before: offset_date_time(tbs.validity.not_before)?,
            not_after: offset_date_time(tbs.validity.not_after)?,
        })
    }

    /// DNS names from the subject alternative name extension.
    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    pub fn not_before(&self) -> OffsetDateTime {
        self.not_before
    }

    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    /// Counts the number of (whole) valid days left.
    ///
    /// Let's Encrypt issues certificates valid for 90 days, which reports 89 right after issuance
    /// since only _whole_ days count. Expired certificates give negative numbers.
    pub fn valid_days_left(&self) -> i64 {
        (self.not_after - OffsetDateTime::now_utc()).whole_days()
    }
}

/// Splits PEM text into DER certificates.
fn certificate_chain(pem: &str) -> eyre::Result<Vec<Vec<u8>>> {
    let mut rdr = BufReader::new(Cursor::new(pem));

    rustls_pemfile::certs(&mut rdr)
        .map(|res| res.map(|cert| cert.to_vec()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(Into::into)
}

fn offset_date_time(time: Time) -> eyre::Result<OffsetDateTime> {
    let secs = i64::try_from(time.to_unix_duration().as_secs())?;
    Ok(OffsetDateTime::from_unix_timestamp(secs)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspect_self_signed() {
        let (cert_pem, _key_pem) = crate::test::self_signed(&["example.com", "www.example.com"]);

        let info = CertInfo::from_pem(&cert_pem).unwrap();
        assert_eq!(info.domains(), ["example.com", "www.example.com"]);
        assert!(info.not_before() < info.not_after());
        assert!(info.valid_days_left() > 0);
    }

    #[test]
    fn test_leaf_of_chain() {
        let (leaf, _) = crate::test::self_signed(&["leaf.example.com"]);
        let (issuer, _) = crate::test::self_signed(&["issuer.example.com"]);
        let fullchain = format!("{leaf}\n{issuer}");

        let info = CertInfo::from_pem(&fullchain).unwrap();
        assert_eq!(info.domains(), ["leaf.example.com"]);
    }

    #[test]
    fn test_no_certificate() {
        CertInfo::from_pem("").unwrap_err();
        CertInfo::from_pem("not a certificate").unwrap_err();
    }
}
