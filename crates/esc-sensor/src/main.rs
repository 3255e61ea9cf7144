mod metrics;
mod runtime;

use std::process::ExitCode;

fn main() -> ExitCode {
    match runtime::run_from_args() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "esc-sensor failed");
            eprintln!("esc-sensor: {e}");
            ExitCode::FAILURE
        }
    }
}
