//! TLS connector construction for `stomp+ssl://` brokers.

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{CertificateError, DigitallySignedStruct, RootCertStore};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::config::TlsOptions;
use crate::error::ConnError;

/// Run the TLS handshake over an established TCP stream.
pub async fn wrap(
    stream: TcpStream,
    options: &TlsOptions,
    host: &str,
) -> Result<TlsStream<TcpStream>, ConnError> {
    let (connector, server_name) = create_connector(options, host)?;
    connector
        .connect(server_name, stream)
        .await
        .map_err(|e| ConnError::Tls(format!("handshake with {} failed: {}", host, e)))
}

/// Build a connector and the SNI name for `host`.
pub fn create_connector(
    options: &TlsOptions,
    host: &str,
) -> Result<(TlsConnector, ServerName<'static>), ConnError> {
    let verifier: Arc<dyn ServerCertVerifier> = if options.verify {
        let roots = Arc::new(root_store(options)?);
        let webpki = WebPkiServerVerifier::builder(roots)
            .build()
            .map_err(|e| ConnError::Tls(format!("cannot build verifier: {}", e)))?;
        if options.check_hostname {
            webpki as Arc<dyn ServerCertVerifier>
        } else {
            Arc::new(NoHostnameCheck { inner: webpki })
        }
    } else {
        Arc::new(InsecureVerifier)
    };

    let builder = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(verifier);

    let config = match (&options.client_cert, &options.client_key) {
        (Some(cert), Some(key)) => builder
            .with_client_auth_cert(load_certs(cert)?, load_private_key(key)?)
            .map_err(|e| ConnError::Tls(format!("invalid client cert/key: {}", e)))?,
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(ConnError::Tls(
                "client_cert and client_key must be given together".to_string(),
            ));
        }
    };

    let name = options.server_name.as_deref().unwrap_or(host);
    let server_name = ServerName::try_from(name.to_string())
        .map_err(|_| ConnError::Tls(format!("invalid server name: {}", name)))?;

    Ok((TlsConnector::from(Arc::new(config)), server_name))
}

fn root_store(options: &TlsOptions) -> Result<RootCertStore, ConnError> {
    let mut store = RootCertStore::empty();
    let mut custom = false;
    if let Some(path) = &options.ca_file {
        add_certs(&mut store, load_certs(path)?)?;
        custom = true;
    }
    if let Some(dir) = &options.ca_dir {
        let entries = fs::read_dir(dir)
            .map_err(|e| ConnError::Tls(format!("cannot read CA directory {:?}: {}", dir, e)))?;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_pem = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| matches!(e, "pem" | "crt" | "cer"));
            if is_pem {
                add_certs(&mut store, load_certs(&path)?)?;
            }
        }
        custom = true;
    }
    if !custom {
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    Ok(store)
}

fn add_certs(store: &mut RootCertStore, certs: Vec<CertificateDer<'static>>) -> Result<(), ConnError> {
    for cert in certs {
        store
            .add(cert)
            .map_err(|e| ConnError::Tls(format!("invalid CA cert: {}", e)))?;
    }
    Ok(())
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConnError> {
    let file = File::open(path)
        .map_err(|e| ConnError::Tls(format!("cannot open cert file {:?}: {}", path, e)))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConnError::Tls(format!("invalid cert file {:?}: {}", path, e)))
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConnError> {
    let file = File::open(path)
        .map_err(|e| ConnError::Tls(format!("cannot open key file {:?}: {}", path, e)))?;
    let mut reader = BufReader::new(file);
    loop {
        match rustls_pemfile::read_one(&mut reader)
            .map_err(|e| ConnError::Tls(format!("invalid key file {:?}: {}", path, e)))?
        {
            Some(rustls_pemfile::Item::Pkcs1Key(key)) => return Ok(key.into()),
            Some(rustls_pemfile::Item::Pkcs8Key(key)) => return Ok(key.into()),
            Some(rustls_pemfile::Item::Sec1Key(key)) => return Ok(key.into()),
            None => {
                return Err(ConnError::Tls(format!("no private key found in {:?}", path)));
            }
            _ => continue,
        }
    }
}

/// Full chain verification, but a certificate issued for another name is
/// accepted.
#[derive(Debug)]
struct NoHostnameCheck {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for NoHostnameCheck {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Err(rustls::Error::InvalidCertificate(
                CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. },
            )) => Ok(ServerCertVerified::assertion()),
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

#[derive(Debug)]
struct InsecureVerifier;

impl ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _: &CertificateDer<'_>,
        _: &[CertificateDer<'_>],
        _: &ServerName<'_>,
        _: &[u8],
        _: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _: &[u8],
        _: &CertificateDer<'_>,
        _: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _: &[u8],
        _: &CertificateDer<'_>,
        _: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
