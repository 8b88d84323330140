//! Logger setup for the `pdr` binary and anything else embedding the pipeline.
//!
//! Every record is written as `timestamp [LEVEL] target - message`, to stderr or appended to a file.
use log::LevelFilter;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::Result;

/// Install the global logger at `level`, appending to `log_file` when one is given.
///
/// Missing parent directories of `log_file` are created. Fails if a logger is already installed.
pub fn init_logger(level: LevelFilter, log_file: Option<&Path>) -> Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level).format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] {} - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    });
    if let Some(path) = log_file {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PdrError;
    use log::debug;

    #[test]
    fn logs_to_file_and_installs_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("pdr.log");
        init_logger(LevelFilter::Debug, Some(&path)).unwrap();
        debug!("aligned 42 samples");
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("[DEBUG] pdr::logging::tests - aligned 42 samples"));
        assert!(matches!(
            init_logger(LevelFilter::Info, None),
            Err(PdrError::Logger(_))
        ));
    }
}
