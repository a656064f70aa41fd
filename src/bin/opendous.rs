//! Command line access to an Opendous JTAG adapter.
use std::error::Error;
use std::time::Duration;

use clap::Parser;
use clap_num::maybe_hex;
use env_logger::Env;
use opendous_jtag::cable::opendous::Opendous;
use opendous_jtag::cable::{Cable, FlushAmount};
use opendous_jtag::queue::{Completed, Operation, OperationRing};
use opendous_jtag::usb::{Builder, PRODUCT_ID, VENDOR_ID};

const QUEUE_DEPTH: usize = 64;

#[derive(Parser, Eq, PartialEq, Clone)]
enum Command {
    /// Drive the reset lines of the target
    Reset {
        #[arg(long, help = "Assert TRST instead of releasing it")]
        trst: bool,
        #[arg(long, help = "Assert SRST instead of releasing it")]
        srst: bool,
    },
    /// Read the IDCODE of every TAP on the chain
    Idcode {
        #[arg(short, long, default_value = "1", help = "Number of TAPs on the chain")]
        taps: usize,
    },
    /// Clock TCK with fixed TMS and TDI levels
    Clock {
        count: usize,
        #[arg(long)]
        tms: bool,
        #[arg(long)]
        tdi: bool,
    },
    /// Read the adapter's input pins
    Input,
}

#[derive(Parser)]
#[command(about = "Talk to a JTAG scan chain through an Opendous adapter", long_about=None)]
struct Args {
    #[arg(long, value_parser = maybe_hex::<u16>, default_value_t = VENDOR_ID)]
    vid: u16,

    #[arg(long, value_parser = maybe_hex::<u16>, default_value_t = PRODUCT_ID)]
    pid: u16,

    #[arg(short, long, default_value = "4000000", help = "TCK frequency in hertz")]
    frequency: u32,

    #[arg(long, default_value = "1000", help = "USB timeout in milliseconds")]
    timeout_ms: u64,

    #[clap(subcommand)]
    command: Command,
}

/// Queue the path from any state to Shift-DR and one 32 bit capture per TAP.  After
/// Test-Logic-Reset every TAP has IDCODE (or BYPASS) selected.
fn queue_idcode(
    pending: &mut OperationRing<Operation>,
    taps: usize,
) -> Result<(), Box<dyn Error>> {
    pending.push_back(Operation::Clock {
        tms: true,
        tdi: false,
        count: 5,
    })?;
    for tms in [false, true, false, false] {
        pending.push_back(Operation::Clock {
            tms,
            tdi: false,
            count: 1,
        })?;
    }
    for _ in 0..taps {
        pending.push_back(Operation::Transfer {
            input: vec![1; 32],
            capture: true,
        })?;
    }
    // Exit1-DR, Update-DR, Run-Test/Idle
    pending.push_back(Operation::Clock {
        tms: true,
        tdi: false,
        count: 2,
    })?;
    pending.push_back(Operation::Clock {
        tms: false,
        tdi: false,
        count: 1,
    })?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = Builder::new()
        .vendor_id(args.vid)
        .product_id(args.pid)
        .timeout(Duration::from_millis(args.timeout_ms))
        .build();
    log::debug!("Adapter config: {:?}", config);

    let mut cable = Opendous::open(&config)?;
    cable.set_frequency(args.frequency);

    match args.command {
        Command::Reset { trst, srst } => {
            cable.reset(Some(trst), Some(srst))?;
            log::info!("TRST {}, SRST {}", state(trst), state(srst));
        }
        Command::Idcode { taps } => {
            let mut pending = OperationRing::new(QUEUE_DEPTH);
            let mut done = OperationRing::<Completed>::new(QUEUE_DEPTH);
            queue_idcode(&mut pending, taps)?;
            cable.flush(FlushAmount::Complete, &mut pending, &mut done)?;

            let mut index = 0;
            while let Some(result) = done.pop_front() {
                if let Completed::Transfer { output } = result {
                    let idcode = output
                        .iter()
                        .rev()
                        .fold(0u32, |acc, bit| acc << 1 | *bit as u32);
                    println!("tap {}: {:#010x}", index, idcode);
                    index += 1;
                }
            }
        }
        Command::Clock { count, tms, tdi } => {
            cable.clock(tms, tdi, count)?;
            println!("tdo: {}", cable.get_tdo() as u8);
        }
        Command::Input => {
            println!("input: {:#04x}", cable.read_input()?);
        }
    }

    let stats = cable.stats();
    log::debug!(
        "{} messages, {} steps, {} flushes",
        stats.messages,
        stats.steps,
        stats.flushes
    );
    Ok(())
}

fn state(asserted: bool) -> &'static str {
    if asserted {
        "asserted"
    } else {
        "released"
    }
}
