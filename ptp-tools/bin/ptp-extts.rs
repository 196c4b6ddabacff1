#![forbid(unsafe_code)]

fn main() -> std::process::ExitCode {
    ptp_tools::extts_main()
}
