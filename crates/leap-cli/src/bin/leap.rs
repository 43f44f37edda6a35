//! `leap` — one-shot LEAP request for debugging.
//!
//! ```text
//! leap 192.168.1.40/device
//! leap -X CreateRequest -d '{"Command":{"CommandType":"GoToLevel",...}}' \
//!     192.168.1.40/zone/1/commandprocessor
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;

use leap_api::{CommuniqueType, Connection, Requester, TlsCredentials, LEAP_PORT};
use leap_cli::paths;

#[derive(Debug, Parser)]
#[command(
    name = "leap",
    version,
    about = "Send a single LEAP request and print the response body"
)]
struct Args {
    /// Target, as `<host>/<path>` (e.g. `192.168.1.40/device`).
    resource: String,

    /// The CommuniqueType to send.
    #[arg(long, short = 'X', default_value = "ReadRequest")]
    request: String,

    /// JSON body to send with the request.
    #[arg(long, short = 'd')]
    data: Option<String>,

    /// Directory holding the credential files.
    #[arg(long)]
    cert_dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv).
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    leap_cli::init_tracing(args.verbose);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let (host, path) = args
        .resource
        .split_once('/')
        .ok_or("resource must look like <host>/<path>")?;
    let url = format!("/{path}");

    let communique_type = CommuniqueType::from_str(&args.request)
        .map_err(|_| format!("unknown CommuniqueType {:?}", args.request))?;
    let body = args
        .data
        .as_deref()
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()
        .map_err(|e| format!("invalid JSON body: {e}"))?;

    let dir = paths::cert_dir(args.cert_dir);
    let credentials = TlsCredentials::load(
        paths::ca_path(&dir, host),
        paths::cert_path(&dir, host),
        paths::key_path(&dir, host),
    )
    .await
    .map_err(|e| format!("failed to load credentials for {host} from {}: {e}", dir.display()))?;

    let connection =
        Connection::open(host, LEAP_PORT, &credentials, Duration::from_secs(10)).await?;
    let requester = Requester::new(connection);
    let run_loop = {
        let requester = requester.clone();
        tokio::spawn(async move { requester.run().await })
    };

    let response = requester.request_raw(communique_type, &url, body).await?;
    requester.close().await;
    let _ = run_loop.await;

    println!(
        "{}",
        serde_json::to_string_pretty(&response.body.unwrap_or(serde_json::Value::Null))?
    );

    match &response.header.status {
        Some(status) if status.is_successful() => Ok(()),
        Some(status) => Err(format!("bridge returned {status}").into()),
        None => Ok(()),
    }
}
