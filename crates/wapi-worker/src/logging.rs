//! Installs a `log::Log` implementation that ships every record to the
//! front process as a JSON line on stderr, instead of writing locally.
//! Grounded in `original_source/src/whisper_api/log_setup.py`'s
//! `PipedFileHandler.emit`, which sends log records over the
//! multiprocessing pipe whenever the current process isn't `MainProcess`.

use std::io::Write;
use std::sync::Mutex;

use log::{Level, LevelFilter, Log, Metadata, Record};
use wapi_common::{WireLogRecord, mask_uuids_in};

struct StderrLineLogger {
    process_name: String,
    privacy_mode: bool,
    stderr: Mutex<std::io::Stderr>,
}

impl Log for StderrLineLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        let message = format!("{}", record.args());
        let message = if self.privacy_mode { mask_uuids_in(&message) } else { message };
        let wire = WireLogRecord {
            level: record.level().to_string(),
            target: record.target().to_string(),
            message,
            process: self.process_name.clone(),
        };
        let mut out = self.stderr.lock().expect("stderr mutex poisoned");
        let _ = writeln!(out, "{}", wire.to_json_line());
    }

    fn flush(&self) {
        let _ = self.stderr.lock().expect("stderr mutex poisoned").flush();
    }
}

/// Installs the JSON-line logger at `level`. Call once at process startup
/// in place of `env_logger::init()`. When `privacy_mode` is set, task UUIDs
/// embedded in log messages are masked before they ever leave the process,
/// matching `PrivacyAwareTaskBaseModel.__str__`'s `<task_uuid: XXXX...XXXX>`.
pub fn init(process_name: &str, level: LevelFilter, privacy_mode: bool) {
    let logger =
        StderrLineLogger { process_name: process_name.to_string(), privacy_mode, stderr: Mutex::new(std::io::stderr()) };
    log::set_boxed_logger(Box::new(logger)).expect("logger already installed");
    log::set_max_level(level);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_uuid_in_message_when_privacy_mode_is_on() {
        let logger = StderrLineLogger { process_name: "worker".to_string(), privacy_mode: true, stderr: Mutex::new(std::io::stderr()) };
        let message = format!("{}", format_args!("task d290f1ee-6c54-4b01-90e6-d701748f0851 failed"));
        let masked = mask_uuids_in(&message);
        assert_eq!(masked, "task d290...0851 failed");
        // exercised through the real Log impl too, just without capturing stderr.
        logger.log(
            &Record::builder()
                .args(format_args!("task d290f1ee-6c54-4b01-90e6-d701748f0851 failed"))
                .level(Level::Error)
                .target("wapi_worker")
                .build(),
        );
    }
}
