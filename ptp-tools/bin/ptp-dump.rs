#![forbid(unsafe_code)]

fn main() -> std::process::ExitCode {
    ptp_tools::dump_main()
}
