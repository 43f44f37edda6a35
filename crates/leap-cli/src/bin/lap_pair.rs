//! `lap-pair` — pair with a bridge and save the credential files.
//!
//! Exit codes: 0 success, 1 button-press timeout, 2 CSR rejected,
//! 3 transport failure.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use secrecy::ExposeSecret;

use leap_api::Error;
use leap_cli::paths;

#[derive(Debug, Parser)]
#[command(
    name = "lap-pair",
    version,
    about = "Pair with a Lutron bridge and save the client credentials"
)]
struct Args {
    /// Bridge address (IP or hostname).
    host: String,

    /// Directory for the credential files (defaults to the XDG config
    /// directory).
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

    let data = match leap_api::pair(&args.host, || {
        eprintln!("Press the small black button on the back of the bridge...");
    })
    .await
    {
        Ok(data) => data,
        Err(e) => {
            eprintln!("pairing failed: {e}");
            return match e {
                Error::PairingTimeout => ExitCode::from(1),
                Error::PairingRejected => ExitCode::from(2),
                _ => ExitCode::from(3),
            };
        }
    };

    let dir = paths::cert_dir(args.cert_dir);
    if let Err(e) = write_credentials(&dir, &args.host, &data) {
        eprintln!("failed to write credentials to {}: {e}", dir.display());
        return ExitCode::from(3);
    }

    println!(
        "Paired with bridge at {} (LEAP version {})",
        args.host, data.version
    );
    println!("Credentials written to {}", dir.display());
    ExitCode::SUCCESS
}

fn write_credentials(
    dir: &std::path::Path,
    host: &str,
    data: &leap_api::PairingData,
) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(paths::ca_path(dir, host), &data.ca)?;
    std::fs::write(paths::cert_path(dir, host), &data.cert)?;

    let key_file = paths::key_path(dir, host);
    std::fs::write(&key_file, data.key.expose_secret())?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_file, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
