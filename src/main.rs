use std::process::ExitCode;

fn main() -> ExitCode {
    match tinker::run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
