//! TLS configuration and blocking handshakes for both sides of a connection.

use std::io;
use std::net::TcpStream;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::ParsedCertificate;
use rustls::{
    CertificateError, ClientConnection, ConnectionCommon, DigitallySignedStruct, RootCertStore,
    ServerConnection, SideData, SignatureScheme,
};
use tracing::{debug, warn};

use crate::error::TlsError;
use crate::transport::TlsTransport;

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Client-side TLS options.
#[derive(Debug, Clone)]
pub struct ClientTlsConfig {
    /// Name the server certificate must be valid for.
    pub server_name: String,
    /// Accept certificates whose only problem is an untrusted issuer (self-signed servers).
    pub allow_chain_errors: bool,
    /// Trust anchors added on top of the platform roots.
    pub extra_roots: Vec<CertificateDer<'static>>,
}

impl ClientTlsConfig {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            allow_chain_errors: false,
            extra_roots: Vec::new(),
        }
    }

    pub fn allow_chain_errors(mut self, allow: bool) -> Self {
        self.allow_chain_errors = allow;
        self
    }

    pub fn with_root(mut self, cert: CertificateDer<'static>) -> Self {
        self.extra_roots.push(cert);
        self
    }

    pub(crate) fn build(&self) -> Result<ClientTls, TlsError> {
        let server_name = ServerName::try_from(self.server_name.clone())
            .map_err(|_| TlsError::InvalidServerName(self.server_name.clone()))?;

        let mut roots = RootCertStore::empty();
        let native = rustls_native_certs::load_native_certs();
        if !native.errors.is_empty() {
            debug!(
                errors = native.errors.len(),
                "Failed to load some native root certs"
            );
        }
        let (added, ignored) = roots.add_parsable_certificates(native.certs);
        debug!(added, ignored, "Loaded native root certs");
        for cert in &self.extra_roots {
            roots.add(cert.clone())?;
        }

        let provider = provider();
        let webpki = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .build()?;
        let verifier: Arc<dyn ServerCertVerifier> = if self.allow_chain_errors {
            Arc::new(ChainTolerantVerifier { inner: webpki })
        } else {
            webpki
        };

        let config = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();

        Ok(ClientTls {
            config: Arc::new(config),
            server_name,
        })
    }
}

/// A built client config, shared by every reconnect attempt.
#[derive(Clone)]
pub(crate) struct ClientTls {
    config: Arc<rustls::ClientConfig>,
    server_name: ServerName<'static>,
}

impl ClientTls {
    pub(crate) fn handshake(
        &self,
        sock: TcpStream,
        timeout: Duration,
    ) -> io::Result<TlsTransport<ClientConnection>> {
        let conn = ClientConnection::new(Arc::clone(&self.config), self.server_name.clone())
            .map_err(io::Error::other)?;
        complete_handshake(conn, sock, timeout)
    }
}

/// Server certificate and key.
#[derive(Debug)]
pub struct ServerTlsConfig {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

impl Clone for ServerTlsConfig {
    fn clone(&self) -> Self {
        Self {
            cert_chain: self.cert_chain.clone(),
            key: self.key.clone_key(),
        }
    }
}

impl ServerTlsConfig {
    pub fn new(cert_chain: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Self {
        Self { cert_chain, key }
    }

    /// Load a PEM certificate chain and private key.
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self, TlsError> {
        let cert_chain = CertificateDer::pem_file_iter(cert_path)
            .and_then(|certs| certs.collect::<Result<Vec<_>, _>>())
            .map_err(|source| TlsError::Pem {
                path: cert_path.display().to_string(),
                source,
            })?;
        if cert_chain.is_empty() {
            return Err(TlsError::MissingCertificates(
                cert_path.display().to_string(),
            ));
        }
        let key = PrivateKeyDer::from_pem_file(key_path).map_err(|source| match source {
            rustls::pki_types::pem::Error::NoItemsFound => {
                TlsError::MissingKey(key_path.display().to_string())
            }
            source => TlsError::Pem {
                path: key_path.display().to_string(),
                source,
            },
        })?;
        Ok(Self { cert_chain, key })
    }

    pub(crate) fn build(&self) -> Result<ServerTls, TlsError> {
        let config = rustls::ServerConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(self.cert_chain.clone(), self.key.clone_key())?;
        Ok(ServerTls {
            config: Arc::new(config),
        })
    }
}

pub(crate) struct ServerTls {
    config: Arc<rustls::ServerConfig>,
}

impl ServerTls {
    pub(crate) fn handshake(
        &self,
        sock: TcpStream,
        timeout: Duration,
    ) -> io::Result<TlsTransport<ServerConnection>> {
        let conn = ServerConnection::new(Arc::clone(&self.config)).map_err(io::Error::other)?;
        complete_handshake(conn, sock, timeout)
    }
}

/// Drive a handshake to completion on a blocking socket, bounded by `timeout`.
fn complete_handshake<C, S>(
    mut conn: C,
    mut sock: TcpStream,
    timeout: Duration,
) -> io::Result<TlsTransport<C>>
where
    C: std::ops::DerefMut + std::ops::Deref<Target = ConnectionCommon<S>>,
    S: SideData,
{
    let deadline = Instant::now() + timeout;
    sock.set_nonblocking(false)?;

    while conn.is_handshaking() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "TLS handshake timed out",
            ));
        }
        sock.set_read_timeout(Some(remaining))?;
        sock.set_write_timeout(Some(remaining))?;
        let (read, written) = conn.complete_io(&mut sock)?;
        if read == 0 && written == 0 && conn.is_handshaking() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed during TLS handshake",
            ));
        }
    }

    // Push out anything queued behind the final handshake flight.
    while conn.wants_write() {
        conn.write_tls(&mut sock)?;
    }

    TlsTransport::new(conn, sock)
}

/// Accepts certificates signed by an unknown issuer, but still enforces everything else.
#[derive(Debug)]
struct ChainTolerantVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for ChainTolerantVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Err(rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer)) => {
                // The chain check runs first, so the name has not been checked yet.
                let cert = ParsedCertificate::try_from(end_entity)?;
                rustls::client::verify_server_name(&cert, server_name)?;
                warn!(?server_name, "Accepting server certificate with untrusted issuer");
                Ok(ServerCertVerified::assertion())
            }
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

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
