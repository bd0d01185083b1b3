use clap::Parser;

use procqueue::app::cli::{self, Cli};

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    stderrlog::new()
        .module("procqueue")
        .verbosity((args.verbose as usize) + 1)
        .timestamp(stderrlog::Timestamp::Second)
        .init()?;

    let code = cli::run_cli(args)?;
    std::process::exit(code);
}
