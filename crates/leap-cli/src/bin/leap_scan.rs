//! `leap-scan` — list LEAP bridges on the local network via mDNS.

use std::collections::BTreeMap;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use mdns_sd::{ServiceDaemon, ServiceEvent};

const SERVICE_TYPE: &str = "_lutron._tcp.local.";

#[derive(Debug, Parser)]
#[command(
    name = "leap-scan",
    version,
    about = "Discover Lutron bridges on the local network"
)]
struct Args {
    /// How long to browse, in seconds.
    #[arg(long, default_value_t = 5)]
    timeout: u64,

    /// Increase verbosity (-v, -vv, -vvv).
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();
    leap_cli::init_tracing(args.verbose);

    let daemon = match ServiceDaemon::new() {
        Ok(daemon) => daemon,
        Err(e) => {
            eprintln!("failed to start mDNS daemon: {e}");
            return ExitCode::FAILURE;
        }
    };
    let receiver = match daemon.browse(SERVICE_TYPE) {
        Ok(receiver) => receiver,
        Err(e) => {
            eprintln!("failed to browse {SERVICE_TYPE}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let deadline = Instant::now() + Duration::from_secs(args.timeout);
    let mut found: BTreeMap<String, Vec<String>> = BTreeMap::new();

    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        let event = match receiver.recv_timeout(remaining) {
            Ok(event) => event,
            Err(_) => break,
        };
        if let ServiceEvent::ServiceResolved(info) = event {
            let addresses: Vec<String> =
                info.get_addresses().iter().map(|a| a.to_string()).collect();
            found.insert(info.get_fullname().to_owned(), addresses);
        }
    }
    let _ = daemon.shutdown();

    if found.is_empty() {
        eprintln!("no bridges found");
        return ExitCode::FAILURE;
    }
    for (name, addresses) in found {
        println!("{name}\t{}", addresses.join(", "));
    }
    ExitCode::SUCCESS
}
