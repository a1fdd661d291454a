//! Diagnostic command-line client for the `jtagd` daemon: connects, prints
//! what is on the other end, and optionally dumps counters and GPIO state.

use std::error::Error;

use clap::Parser;
use env_logger::Env;
use jtagd_adapter::{Adapter, GpioInterface, JtagInterface};
use jtagd_client::RemoteAdapter;
use jtagd_protocol::DEFAULT_PORT;

#[derive(Parser)]
#[command(about = "Command-line client for the jtagd remote test-access daemon", long_about = None)]
struct Args {
    /// Hostname of the daemon to connect to
    #[arg(short, long, default_value = "localhost")]
    server: String,

    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Dump the adapter's performance counters
    #[arg(long)]
    perf: bool,

    /// Dump the adapter's GPIO bank
    #[arg(long)]
    gpio: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut adapter = RemoteAdapter::connect((args.server.as_str(), args.port))?;
    println!("Connected to jtagd at {}:{}", args.server, args.port);
    println!(
        "    Remote adapter is a {} (serial \"{}\", userid \"{}\", frequency {:.2} MHz, {} transport)",
        adapter.name(),
        adapter.serial(),
        adapter.user_id(),
        adapter.frequency() as f64 / 1e6,
        adapter.transport(),
    );

    if args.perf {
        match adapter.jtag() {
            Some(jtag) => {
                println!("Performance counters:");
                println!("    Shift operations: {}", jtag.shift_op_count()?);
                println!("    Data bits:        {}", jtag.data_bit_count()?);
                println!("    Mode bits:        {}", jtag.mode_bit_count()?);
                println!("    Dummy clocks:     {}", jtag.dummy_clock_count()?);
            }
            None => println!("Adapter has no JTAG capability, skipping counters"),
        }
    }

    if args.gpio {
        match adapter.gpio() {
            Some(gpio) => {
                gpio.read_gpio_state()?;
                println!("GPIO bank ({} pins):", gpio.gpio_count());
                for pin in 0..gpio.gpio_count() {
                    println!(
                        "    Pin {:2}: {} ({})",
                        pin,
                        if gpio.value_cached(pin) { "high" } else { "low" },
                        if gpio.direction(pin) { "output" } else { "input" },
                    );
                }
            }
            None => println!("Adapter has no GPIO bank"),
        }
    }

    Ok(())
}
