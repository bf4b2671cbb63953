use clap::Parser;
use paintcore::cli::{self, CliArgs};
use paintcore::logger;

fn main() -> std::process::ExitCode {
    let args = CliArgs::parse();

    // Initialize session log (overwrites previous session log)
    logger::init();
    logger::set_echo(args.verbose);

    cli::run(args)
}
