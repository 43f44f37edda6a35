// ── TLS transport for LEAP connections ──
//
// Lutron bridges present a self-signed leaf whose CN never matches the
// address you dial, and some firmwares swap certificates when SNI is
// offered. The client config built here therefore verifies the peer
// against the pairing CA only (no hostname check) and never sends SNI.

use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, Error as TlsError, RootCertStore,
    SignatureScheme,
};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error::Error;

/// Default port for LEAP operations.
pub const LEAP_PORT: u16 = 8081;

/// Port for the LAP pairing endpoint.
pub const LAP_PORT: u16 = 8083;

// ── TlsCredentials ──────────────────────────────────────────────────

/// The PEM material for a mutually-authenticated LEAP session, held in
/// memory so that no file I/O happens on the event loop after load time.
#[derive(Clone)]
pub struct TlsCredentials {
    ca_pem: String,
    cert_pem: String,
    key_pem: SecretString,
}

impl TlsCredentials {
    pub fn new(
        ca_pem: impl Into<String>,
        cert_pem: impl Into<String>,
        key_pem: impl Into<String>,
    ) -> Self {
        Self {
            ca_pem: ca_pem.into(),
            cert_pem: cert_pem.into(),
            key_pem: SecretString::from(key_pem.into()),
        }
    }

    /// Read the three PEM files produced by pairing.
    pub async fn load(
        ca_path: impl AsRef<std::path::Path>,
        cert_path: impl AsRef<std::path::Path>,
        key_path: impl AsRef<std::path::Path>,
    ) -> Result<Self, Error> {
        let ca_pem = tokio::fs::read_to_string(ca_path).await?;
        let cert_pem = tokio::fs::read_to_string(cert_path).await?;
        let key_pem = tokio::fs::read_to_string(key_path).await?;
        Ok(Self::new(ca_pem, cert_pem, key_pem))
    }

    /// The CA certificate PEM returned by the bridge during pairing.
    pub fn ca_pem(&self) -> &str {
        &self.ca_pem
    }

    /// Build the rustls client configuration: client auth from our
    /// cert/key, server verification against the CA only, SNI suppressed.
    pub(crate) fn client_config(&self) -> Result<ClientConfig, Error> {
        let mut roots = RootCertStore::empty();
        for cert in parse_certs(&self.ca_pem)? {
            roots
                .add(cert)
                .map_err(|e| Error::Tls(format!("invalid CA certificate: {e}")))?;
        }

        let verifier = WebPkiServerVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| Error::Tls(format!("failed to build verifier: {e}")))?;

        let client_certs = parse_certs(&self.cert_pem)?;
        let client_key = parse_key(self.key_pem.expose_secret())?;

        let mut config = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(CaOnlyVerifier { inner: verifier }))
            .with_client_auth_cert(client_certs, client_key)
            .map_err(|e| Error::Tls(format!("invalid client certificate/key: {e}")))?;

        config.enable_sni = false;
        Ok(config)
    }
}

impl std::fmt::Debug for TlsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsCredentials")
            .field("ca_pem", &"..")
            .field("cert_pem", &"..")
            .field("key_pem", &"[redacted]")
            .finish()
    }
}

// ── Connecting ──────────────────────────────────────────────────────

/// Open a TCP connection and complete the TLS handshake.
///
/// The `ClientConfig` is built on a blocking worker so PEM parsing never
/// stalls the event loop.
pub(crate) async fn connect_tls(
    host: &str,
    port: u16,
    credentials: &TlsCredentials,
    timeout: Duration,
) -> Result<TlsStream<TcpStream>, Error> {
    let credentials = credentials.clone();
    let config = tokio::task::spawn_blocking(move || credentials.client_config())
        .await
        .map_err(|e| Error::Tls(format!("config task failed: {e}")))??;

    let tcp = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| Error::Timeout {
            url: format!("{host}:{port}"),
        })??;

    // With enable_sni off this name is only used for certificate checks,
    // which CaOnlyVerifier ignores.
    let server_name = ServerName::try_from(host.to_owned())
        .map_err(|e| Error::Tls(format!("invalid server name {host:?}: {e}")))?;

    let connector = TlsConnector::from(Arc::new(config));
    let stream = tokio::time::timeout(timeout, connector.connect(server_name, tcp))
        .await
        .map_err(|_| Error::Timeout {
            url: format!("{host}:{port}"),
        })??;

    Ok(stream)
}

fn parse_certs(pem: &str) -> Result<Vec<CertificateDer<'static>>, Error> {
    let certs: Vec<_> = rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<Result<_, _>>()
        .map_err(|e| Error::Tls(format!("failed to parse certificate PEM: {e}")))?;
    if certs.is_empty() {
        return Err(Error::Tls("no certificates found in PEM".into()));
    }
    Ok(certs)
}

fn parse_key(pem: &str) -> Result<PrivateKeyDer<'static>, Error> {
    rustls_pemfile::private_key(&mut pem.as_bytes())
        .map_err(|e| Error::Tls(format!("failed to parse key PEM: {e}")))?
        .ok_or_else(|| Error::Tls("no private key found in PEM".into()))
}

// ── Certificate-only verification ───────────────────────────────────

/// Verifies the server chain against the pairing CA while accepting any
/// hostname. All other validation is delegated to webpki.
#[derive(Debug)]
struct CaOnlyVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for CaOnlyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Ok(verified) => Ok(verified),
            Err(TlsError::InvalidCertificate(
                CertificateError::NotValidForName
                | CertificateError::NotValidForNameContext { .. },
            )) => Ok(ServerCertVerified::assertion()),
            Err(e) => Err(e),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
