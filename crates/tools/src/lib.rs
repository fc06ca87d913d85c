//! Shared helpers for the dataset tools

use std::io::Write;

/// Initialize `env_logger` on stderr.
///
/// `RUST_LOG` takes precedence; otherwise `verbose` selects debug over info.
pub fn init_logger(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, level),
    )
    .format(|buf, record| writeln!(buf, "[{}] {}: {}", record.level(), record.target(), record.args()))
    .write_style(env_logger::WriteStyle::Never)
    .init();
}
