// ── LAP pairing ──
//
// One-shot protocol that binds this client to a bridge. We connect to
// the pairing endpoint with the shared LAP bootstrap credentials, wait
// for the user to press the physical button, submit a CSR, and receive a
// signed certificate plus the bridge's CA. A final connect on the
// operational port with the new credentials confirms they work and
// reports the bridge firmware version.

use std::time::Duration;

use secrecy::SecretString;
use serde_json::{json, Value};
use tokio::time::timeout;
use tracing::{debug, info};
use uuid::Uuid;

use crate::connection::{Connection, ConnectionReader};
use crate::error::Error;
use crate::lap_certs::{LAP_CA_PEM, LAP_CERT_PEM, LAP_KEY_PEM, LUTRON_ROOT_CA_PEM};
use crate::transport::{TlsCredentials, LAP_PORT, LEAP_PORT};

const CERT_COMMON_NAME: &str = "pylutron_caseta";

const SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the user has to press the pairing button. Bridges keep the
/// pairing window open for a few minutes.
pub const BUTTON_PRESS_TIMEOUT: Duration = Duration::from_secs(180);

/// The credentials produced by a successful pairing, plus the bridge's
/// reported LEAP version.
#[derive(Debug, Clone)]
pub struct PairingData {
    pub ca: String,
    pub cert: String,
    pub key: SecretString,
    pub version: String,
}

/// Pair with a bridge at `host`.
///
/// `ready` is invoked exactly once, when the bridge is reachable and
/// waiting for its physical button to be pressed.
pub async fn pair(host: &str, ready: impl FnOnce() + Send) -> Result<PairingData, Error> {
    let (csr_pem, key_pem) = tokio::task::spawn_blocking(generate_csr)
        .await
        .map_err(|e| Error::Tls(format!("keygen task failed: {e}")))??;

    // Caseta-generation bridges chain to the LAP CA; RA3/QSX processors
    // to the Lutron root. Try LAP first and fall back.
    let lap = TlsCredentials::new(LAP_CA_PEM, LAP_CERT_PEM, LAP_KEY_PEM);
    let mut ca_pem = LAP_CA_PEM;
    let connection = match Connection::open(host, LAP_PORT, &lap, SOCKET_TIMEOUT).await {
        Ok(connection) => connection,
        Err(first_err) => {
            debug!(error = %first_err, "LAP CA handshake failed, retrying with lutron-root");
            let root = TlsCredentials::new(LUTRON_ROOT_CA_PEM, LAP_CERT_PEM, LAP_KEY_PEM);
            ca_pem = LUTRON_ROOT_CA_PEM;
            Connection::open(host, LAP_PORT, &root, SOCKET_TIMEOUT)
                .await
                .map_err(pairing_transport)?
        }
    };

    info!("press the small black button on the back of the bridge");
    ready();

    let (cert, signed_ca) = exchange_certificate(connection, &csr_pem, BUTTON_PRESS_TIMEOUT).await?;
    // Processors sign against lutron-root but return the Caseta chain in
    // SigningResult; keep the CA that actually verified the peer.
    let ca = if ca_pem == LUTRON_ROOT_CA_PEM {
        ca_pem.to_owned()
    } else {
        signed_ca
    };

    let signed = TlsCredentials::new(ca.clone(), cert.clone(), key_pem.clone());
    let connection = Connection::open(host, LEAP_PORT, &signed, SOCKET_TIMEOUT)
        .await
        .map_err(pairing_transport)?;
    let version = verify_credentials(connection).await?;
    debug!(version, "pairing verified against the LEAP server");

    Ok(PairingData {
        ca,
        cert,
        key: SecretString::from(key_pem),
        version,
    })
}

fn generate_csr() -> Result<(String, String), Error> {
    let key_pair =
        rcgen::KeyPair::generate().map_err(|e| Error::Tls(format!("key generation: {e}")))?;

    let mut params = rcgen::CertificateParams::default();
    params.distinguished_name = rcgen::DistinguishedName::new();
    params.distinguished_name.push(
        rcgen::DnType::CommonName,
        format!("{CERT_COMMON_NAME}-{}", Uuid::new_v4().simple()),
    );

    let csr = params
        .serialize_request(&key_pair)
        .map_err(|e| Error::Tls(format!("CSR generation: {e}")))?;
    let csr_pem = csr
        .pem()
        .map_err(|e| Error::Tls(format!("CSR encoding: {e}")))?;

    Ok((csr_pem, key_pair.serialize_pem()))
}

/// Run the LAP exchange on an open pairing connection: wait for the
/// physical-access grant, submit the CSR, and return the signed
/// certificate and root certificate.
pub(crate) async fn exchange_certificate(
    connection: Connection,
    csr_pem: &str,
    button_timeout: Duration,
) -> Result<(String, String), Error> {
    let (mut reader, mut writer) = connection.into_split();

    timeout(button_timeout, wait_for_physical_access(&mut reader))
        .await
        .map_err(|_| Error::PairingTimeout)??;

    debug!("physical access granted, requesting certificate");
    writer
        .write_json(&json!({
            "Header": {
                "RequestType": "Execute",
                "Url": "/pair",
                "ClientTag": "get-cert",
            },
            "Body": {
                "CommandType": "CSR",
                "Parameters": {
                    "CSR": csr_pem,
                    "DisplayName": CERT_COMMON_NAME,
                    "DeviceUID": "000000000000",
                    "Role": "Admin",
                },
            },
        }))
        .await
        .map_err(pairing_transport)?;

    let reply = timeout(SOCKET_TIMEOUT, wait_for_tag(&mut reader, "get-cert"))
        .await
        .map_err(|_| Error::PairingTimeout)??;

    let signing_result = &reply["Body"]["SigningResult"];
    match (
        signing_result["Certificate"].as_str(),
        signing_result["RootCertificate"].as_str(),
    ) {
        (Some(cert), Some(root)) => Ok((cert.to_owned(), root.to_owned())),
        _ => Err(Error::PairingRejected),
    }
}

async fn wait_for_physical_access(reader: &mut ConnectionReader) -> Result<(), Error> {
    loop {
        let message = reader
            .read_value()
            .await
            .map_err(pairing_transport)?
            .ok_or_else(|| pairing_transport(Error::ConnectionClosed))?;

        let is_status = message["Header"]["ContentType"]
            .as_str()
            .is_some_and(|t| t.starts_with("status;"));
        let has_physical_access = message["Body"]["Status"]["Permissions"]
            .as_array()
            .is_some_and(|p| p.iter().any(|v| v == "PhysicalAccess"));

        if is_status && has_physical_access {
            return Ok(());
        }
        debug!("ignoring pairing message while waiting for button press");
    }
}

async fn wait_for_tag(reader: &mut ConnectionReader, tag: &str) -> Result<Value, Error> {
    loop {
        let message = reader
            .read_value()
            .await
            .map_err(pairing_transport)?
            .ok_or_else(|| pairing_transport(Error::ConnectionClosed))?;

        if message["Header"]["ClientTag"].as_str() == Some(tag) {
            return Ok(message);
        }
    }
}

/// Confirm the signed credentials against the LEAP server and return the
/// reported firmware version.
pub(crate) async fn verify_credentials(connection: Connection) -> Result<String, Error> {
    let (mut reader, mut writer) = connection.into_split();

    writer
        .write_json(&json!({
            "CommuniqueType": "ReadRequest",
            "Header": {"Url": "/server/1/status/ping"},
        }))
        .await
        .map_err(pairing_transport)?;

    let reply = timeout(SOCKET_TIMEOUT, async {
        loop {
            let message = reader
                .read_value()
                .await
                .map_err(pairing_transport)?
                .ok_or_else(|| pairing_transport(Error::ConnectionClosed))?;
            if message["CommuniqueType"].as_str() == Some("ReadResponse") {
                return Ok::<Value, Error>(message);
            }
        }
    })
    .await
    .map_err(|_| Error::PairingTimeout)??;

    let version = &reply["Body"]["PingResponse"]["LEAPVersion"];
    match version {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(Error::PairingRejected),
    }
}

fn pairing_transport(err: Error) -> Error {
    match err {
        Error::PairingTimeout | Error::PairingRejected => err,
        other => Error::PairingTransport(other.to_string()),
    }
}
