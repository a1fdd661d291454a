//! # jtagd
//!
//! Daemon entry point: opens one debug adapter, then serves it to remote
//! clients over the framed binary protocol and, optionally, the Xilinx
//! Virtual Cable dialect on a second port.
//!
//! Hardware drivers live out of tree; this build ships the simulated
//! loopback backend, which is enough to bring up clients, exercise the
//! protocol and smoke-test tooling without an adapter on the bench.

use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::thread;

use clap::Parser;
use env_logger::Env;
use jtagd_adapter::{loopback::LoopbackAdapter, Adapter};
use jtagd_server::{Config, Server};
use nix::sys::signal::{signal, SigHandler, Signal};

#[derive(Parser, Clone)]
enum AdapterKind {
    /// Simulated adapter with TDI looped straight back to TDO
    Loopback {
        #[arg(long, default_value = "SIM0000")]
        serial: String,

        #[arg(long, default_value = "10000000", help = "TCK frequency in Hz")]
        frequency: u32,

        #[arg(long, default_value = "0", help = "Number of simulated GPIO pins")]
        gpio_pins: usize,
    },
}

#[derive(Parser)]
#[command(about = "Remote test-access daemon: serves one debug adapter over TCP", long_about = None)]
struct Args {
    #[arg(short, long, default_value_t = jtagd_protocol::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value = "127.0.0.1")]
    ip: IpAddr,

    /// Also speak the Xilinx Virtual Cable dialect on this port
    #[arg(long)]
    xvc_port: Option<u16>,

    /// List the adapter backends in this build and exit
    #[arg(long)]
    list: bool,

    #[clap(subcommand)]
    adapter: Option<AdapterKind>,
}

fn list_backends() {
    println!("Adapter backends in this build:");
    println!("    loopback    Simulated adapter (TDI echoed to TDO, optional GPIO bank)");
    println!();
    println!("Hardware backends are provided by out-of-tree driver crates.");
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    log::info!("starting jtagd");

    let args = Args::parse();
    if args.list {
        list_backends();
        return Ok(());
    }

    // A client that vanishes mid-reply must surface as a write error on the
    // session thread, not kill the whole daemon.
    unsafe {
        signal(Signal::SIGPIPE, SigHandler::SigIgn)?;
    }

    let adapter = match args.adapter.unwrap_or(AdapterKind::Loopback {
        serial: "SIM0000".to_string(),
        frequency: 10_000_000,
        gpio_pins: 0,
    }) {
        AdapterKind::Loopback {
            serial,
            frequency,
            gpio_pins,
        } => LoopbackAdapter::new()
            .with_serial(serial)
            .with_frequency(frequency)
            .with_gpio_pins(gpio_pins),
    };
    log::info!(
        "opened adapter \"{}\" (serial \"{}\", {:.2} MHz)",
        adapter.name(),
        adapter.serial(),
        adapter.frequency() as f64 / 1e6
    );

    let server = Arc::new(Server::new(adapter, Config::default()));

    if let Some(xvc_port) = args.xvc_port {
        let xvc_addr = SocketAddr::new(args.ip, xvc_port);
        let xvc_server = Arc::clone(&server);
        thread::spawn(move || {
            if let Err(e) = xvc_server.listen_xvc(xvc_addr) {
                log::error!("XVC listener failed: {}", e);
            }
        });
    }

    server.listen(SocketAddr::new(args.ip, args.port))?;
    Ok(())
}
