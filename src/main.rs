use std::process::ExitCode;

use clap::Parser;

use serial_tool_lib::cli::{self, Cli};
use serial_tool_lib::{logging, paths};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_file = (!cli.no_log_file).then(paths::log_file_path);
    if let Err(e) = logging::init(cli.log_level, cli.log_json, log_file.as_deref()) {
        eprintln!("{}", e);
        let _ = logging::init(cli.log_level, cli.log_json, None);
    }

    match cli::run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("{}", e.message);
            ExitCode::FAILURE
        }
    }
}
