//! Console logging initialization for binaries and tests.

use std::io::Write;

use env_logger::{Builder, Env};

/// Initialize env_logger with the crate's defaults. Safe to call more
/// than once; later calls are no-ops.
pub fn init_logging() {
    let env = Env::default().filter_or("RUST_LOG", "warn,slidecast=info");

    let mut builder = Builder::from_env(env);
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .target(env_logger::Target::Stderr);

    let _ = builder.try_init();
}
