use std::process::ExitCode;

use clap::Parser;

use automix::cli::Cli;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    log::info!("automix starting: {:?} -> {:?}", cli.input_dir, cli.output);

    match automix::run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("automix failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
