use clap::Parser;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process;
use tokio::net::UdpSocket;
use tracing_subscriber::EnvFilter;

use referred::resolver::{trace, Resolver, UPSTREAM_PORT};
use referred::server::Server;
use referred::zones::ZoneStore;

// the doc comments for this struct turn into the CLI help text
#[derive(Debug, Parser)]
/// A teaching-grade hybrid authoritative/recursive DNS server.
///
/// Queries for names in the zone file are answered authoritatively.
/// Everything else is resolved iteratively, starting from the given
/// root name server, with the results cached.
///
/// Server diagnostics go to stderr (RUST_LOG controls the level);
/// each recursive client query additionally gets its own
/// log-<id>.txt trace file in the working directory.
struct Args {
    /// IPv4 address of the root name server to seed recursion
    root_ip: Ipv4Addr,

    /// Path to the zone file to serve authoritatively
    zone: PathBuf,

    /// UDP port to bind (0 = OS-assigned)
    #[clap(long, value_parser, default_value_t = 0)]
    port: u16,
}

fn begin_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();

    begin_logging();

    trace::remove_stale_logs(Path::new("."));

    let zone = match ZoneStore::from_file(&args.zone) {
        Ok(zone) => zone,
        Err(error) => {
            tracing::error!(path = ?args.zone, %error, "could not load zone");
            process::exit(1);
        }
    };
    tracing::info!(
        records = zone.all_records().len(),
        names = zone.local_names().len(),
        "loaded zone"
    );

    let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, args.port)).await {
        Ok(socket) => socket,
        Err(error) => {
            tracing::error!(port = args.port, ?error, "could not bind UDP socket");
            process::exit(1);
        }
    };

    let resolver = Resolver::new(
        zone,
        args.root_ip,
        UPSTREAM_PORT,
        trace::QueryTrace::new(Some(PathBuf::from("."))),
    );
    let server = Server::new(socket, resolver);

    match server.local_addr() {
        Ok(address) => tracing::info!(%address, root = %args.root_ip, "listening"),
        Err(error) => tracing::warn!(?error, "could not read bound address"),
    }

    tokio::select! {
        () = server.run() => unreachable!("server loop exited"),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down");
        }
    }
}
