use std::io::BufReader;

use config::shared::TlsConfig;
use etl::error::{ErrorKind, EtlResult};
use etl::etl_error;
use rustls::pki_types::CertificateDer;

/// Parses the PEM encoded root certificates trusted for destination connections.
pub(crate) fn trusted_root_certs(tls: &TlsConfig) -> EtlResult<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(tls.trusted_root_certs.as_bytes());

    let mut certs = Vec::new();
    for cert in rustls_pemfile::certs(&mut reader) {
        certs.push(cert?);
    }

    if certs.is_empty() {
        return Err(etl_error!(
            ErrorKind::ConfigError,
            "No trusted root certificate found in the TLS configuration"
        ));
    }

    Ok(certs)
}

/// Builds the rustls client configuration trusting the configured roots.
pub(crate) fn client_config(tls: &TlsConfig) -> EtlResult<rustls::ClientConfig> {
    let mut root_store = rustls::RootCertStore::empty();
    for cert in trusted_root_certs(tls)? {
        root_store.add(cert).map_err(|err| {
            etl_error!(
                ErrorKind::ConfigError,
                "Invalid trusted root certificate",
                source: err
            )
        })?;
    }

    Ok(rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_certificates_are_rejected() {
        let tls = TlsConfig {
            trusted_root_certs: "not a certificate".to_owned(),
            enabled: true,
        };

        let err = client_config(&tls).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }
}
