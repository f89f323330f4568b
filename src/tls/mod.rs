pub mod cert_verifier;

use crate::config::TransportConfig;
use crate::tls::cert_verifier::CertVerifier;
use anyhow::Context;
use rustls::crypto::ring::{default_provider, DEFAULT_CIPHER_SUITES};
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;

/// Builds the rustls client configuration used for `https` connections.
pub fn client_config(config: &TransportConfig) -> Result<Arc<ClientConfig>, anyhow::Error> {
    let mut root_store = RootCertStore::empty();
    if let Some(file_path) = config.certificate_path.as_ref() {
        let f = std::fs::File::open(file_path)
            .with_context(|| format!("Failed to open certificate file: {}", file_path.display()))?;
        let mut rd = std::io::BufReader::new(f);
        for cert in rustls_pemfile::certs(&mut rd) {
            root_store.add(cert?)?;
        }
    } else {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    };

    let provider = Arc::new(rustls::crypto::CryptoProvider {
        cipher_suites: DEFAULT_CIPHER_SUITES.to_vec(),
        ..default_provider()
    });

    let verifier = CertVerifier::new(
        config.skip_certificate_validate,
        provider.clone(),
        &root_store,
    )?;

    let mut tls_config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(rustls::DEFAULT_VERSIONS)?
        .with_root_certificates(root_store)
        .with_no_client_auth();

    tls_config
        .dangerous()
        .set_certificate_verifier(Arc::new(verifier));
    tls_config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(tls_config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_roots() {
        let tls = client_config(&TransportConfig::default()).unwrap();
        assert_eq!(tls.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn test_insecure_config_builds() {
        let config = TransportConfig::default().with_skip_certificate_validate(true);
        assert!(client_config(&config).is_ok());
    }

    #[test]
    fn test_missing_certificate_file() {
        let config = TransportConfig::default().with_certificate_path("/nonexistent/roots.pem");
        let err = client_config(&config).unwrap_err();
        assert!(err.to_string().contains("Failed to open certificate file"));
    }
}
