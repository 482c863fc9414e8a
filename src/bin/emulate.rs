use std::fs;
use std::process::ExitCode;

use clap::Parser;
use clap_num::maybe_hex;

use lc3emu::console::Terminal;
use lc3emu::obj::Image;
use lc3emu::vm::Vm;

/// Run an LC-3 object image to HALT
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
struct Args {
    /// Path to the object image
    #[arg(default_value = "./bin/out.obj")]
    image: String,

    /// Start executing from this address instead of the image origin
    /// (use 0x prefix for hexadecimal)
    #[arg(short, long, value_parser=maybe_hex::<u16>)]
    entry: Option<u16>,

    /// Print the pc, fetched word and registers on every step
    #[arg(short, long)]
    trace: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let bytes = match fs::read(&args.image) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("error: cannot read {}: {e}", args.image);
            return ExitCode::FAILURE;
        }
    };

    let image = match Image::parse(&bytes) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("error: {}: {e}", args.image);
            return ExitCode::FAILURE;
        }
    };

    let mut vm = Vm::new(Terminal::new());
    image.load_into(&mut vm);
    if let Some(entry) = args.entry {
        vm.set_pc(entry);
    }
    vm.set_trace(args.trace);

    if let Err(e) = vm.run() {
        eprintln!("error: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
