use std::process::ExitCode;

fn main() -> ExitCode {
    adminos_cli::run()
}
