use std::process::ExitCode;

use env_logger::{Builder, Env};

fn main() -> ExitCode {
    Builder::from_env(Env::default().default_filter_or("info")).init();

    match epi_curves::app::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(err.exit_code())
        }
    }
}
