use std::process::ExitCode;

use azure_price_scanner::specs::{self, SpecMatch};
use clap::Parser;

/// Looks up vCPU and memory figures for a VM size or family.
#[derive(Debug, Parser)]
#[command(name = "vm-specs", version)]
struct Cli {
    /// Size (`Standard_D2s_v3`, `d2s`) or family (`nc`, `Dsv`, `DSv3`).
    query: String,

    /// Print matches as JSON.
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let matches = match specs::lookup(&cli.query) {
        Ok(matches) => matches,
        Err(err) => {
            eprintln!("vm-specs: {err}");
            return ExitCode::FAILURE;
        }
    };

    if cli.json {
        match serde_json::to_string_pretty(&matches) {
            Ok(out) => println!("{out}"),
            Err(err) => {
                eprintln!("vm-specs: {err}");
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }

    for m in &matches {
        println!("{}", describe(m));
    }
    ExitCode::SUCCESS
}

fn describe(m: &SpecMatch) -> String {
    let note = if m.estimated { " (estimated)" } else { "" };
    format!(
        "{:<12} {:>4} vCPU {:>8} GiB{note}",
        m.size, m.specs.vcpus, m.specs.memory_gib
    )
}
