#![forbid(unsafe_code)]

fn main() -> std::process::ExitCode {
    runlens_cli::main_entry()
}
