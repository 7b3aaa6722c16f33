use std::process::ExitCode;

fn main() -> ExitCode {
    rfq_cli::run()
}
