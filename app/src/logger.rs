//! File logger back end for the `log` facade.
//!
//! Appends to a file inside the sandbox directory so log output survives
//! the pivot: the descriptor is opened during bootstrap and inherited by
//! the redirector and every relay and session child. Writes are serialized
//! across those processes with flock, which is why both kernel-call filter
//! roles admit flock alongside write.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::AsRawFd;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

struct FileLogger {
    file: Mutex<File>,
}

static LOGGER: OnceLock<FileLogger> = OnceLock::new();

impl log::Log for FileLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        let Ok(mut file) = self.file.lock() else {
            return;
        };

        let fd = file.as_raw_fd();
        if unsafe { libc::flock(fd, libc::LOCK_EX) } != 0 {
            return;
        }

        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let _ = writeln!(
            file,
            "[{stamp}] {:5} {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
        let _ = file.flush();

        unsafe { libc::flock(fd, libc::LOCK_UN) };
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

/// Open the log file and route the `log` macros to it.
/// Reinitialization is not supported.
pub fn init(path: &Path) -> io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;

    if LOGGER
        .set(FileLogger {
            file: Mutex::new(file),
        })
        .is_err()
    {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "logger already initialized",
        ));
    }

    match LOGGER.get() {
        Some(logger) => log::set_logger(logger)
            .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e.to_string()))?,
        None => {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "logger vanished during initialization",
            ))
        }
    }
    log::set_max_level(log::LevelFilter::Info);

    Ok(())
}
