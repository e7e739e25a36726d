//! Logging setup for sync processes.

use crate::{CoreResult, Paths};
use std::str::FromStr;
use tracing::Level;

/// Install the global subscriber: JSONL to `<base>/logs/dev.jsonl`, plus a
/// compact stderr copy when `also_stderr` is set.
///
/// `RUST_LOG` wins over `level` when it is set.
pub fn init_logging(
    service_name: &str,
    level: &str,
    paths: &Paths,
    also_stderr: bool,
) -> CoreResult<()> {
    observability::init_with_config(observability::LogConfig {
        service_name: service_name.to_owned(),
        default_level: parse_level(level).as_str().to_ascii_lowercase(),
        log_path: Some(paths.log_file()),
        also_stderr,
    })?;
    Ok(())
}

/// Level named by `level`, falling back to INFO.
///
/// Accepts any casing, the numeric forms `tracing` understands, and the
/// `warning` spelling.
pub fn parse_level(level: &str) -> Level {
    let level = level.trim();
    if level.eq_ignore_ascii_case("warning") {
        return Level::WARN;
    }
    Level::from_str(level).unwrap_or(Level::INFO)
}
