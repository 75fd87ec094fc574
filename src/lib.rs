use std::env;
use crate::error::LoggingError;

pub mod adapter;
pub mod communicator;
pub mod config;
pub mod device;
pub mod error;
pub mod ffi;
pub mod scanner;
pub mod sim;

pub use crate::adapter::Adapter;
pub use crate::error::{AdapterError, ErrorKind};
pub use crate::scanner::Scanner;

/// Logs to stderr, and to the file named by `LOG_FILE` when set.
pub fn init_logging(verbose: bool) -> Result<(), LoggingError> {
    let level = if verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(fern::log_file(log_file)?);
    }

    dispatch.apply()?;
    Ok(())
}
