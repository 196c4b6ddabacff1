mod cli;
pub mod config;
mod dump;
mod extts;
pub mod tracing;

pub use cli::{CliArg, CommonOptions, ToolAction};
pub use dump::{main as dump_main, DeviceReport, DumpOptions};
pub use extts::{main as extts_main, subscribe, ExttsOptions};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("PTP_TOOLS_GIT_REV"),
    " ",
    env!("PTP_TOOLS_GIT_DATE"),
    ")"
);
