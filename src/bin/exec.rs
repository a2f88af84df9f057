use std::io::{stdin, stdout, IsTerminal};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use lc3vm::emulator::*;
use lc3vm::io::StopSignal;
use lc3vm::loader::Image;
use lc3vm::terminal::{stop_on_interrupt, RawMode, TerminalKeyboard, TerminalOutput};

/// Run a program image on the virtual machine.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Program image: big-endian words, the first being the load origin
    image: PathBuf,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    log: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&args.log))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let image = Image::open(&args.image)
        .with_context(|| format!("failed to load {}", args.image.display()))?;

    let interactive = stdin().is_terminal();
    let _raw_mode = if interactive {
        Some(RawMode::enable().context("failed to enable raw terminal mode")?)
    } else {
        None
    };

    let stop = StopSignal::new();
    stop_on_interrupt(stop.clone()).context("failed to install interrupt handler")?;
    let keyboard = TerminalKeyboard::spawn(interactive, stop.clone())?;
    let output = TerminalOutput::new(stdout(), interactive);

    let mut cpu = Cpu::new(keyboard, output).with_stop_signal(stop);
    cpu.load_image(&image)?;

    match cpu.run().context("machine fault")? {
        RunOutcome::Halted => tracing::info!("program halted"),
        RunOutcome::Stopped => tracing::info!("program interrupted"),
    }

    Ok(())
}
