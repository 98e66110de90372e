//! The wire format for log records fanned in from the worker process to
//! the front's own logger.
//!
//! Grounded in `original_source/src/whisper_api/log_setup.py`'s
//! `PipedFileHandler`, which serializes a child process's log records and
//! ships them to the parent for unified output. Here the worker writes one
//! JSON object per line on its stderr instead of pickling a `LogRecord`,
//! and the front re-emits each one through its own `log` macros with the
//! originating process name substituted in, matching
//! `listen_for_logs_from_children`'s formatter substitution.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireLogRecord {
    pub level: String,
    pub target: String,
    pub message: String,
    pub process: String,
}

impl WireLogRecord {
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"level":"error","target":"logging","message":"failed to encode log record","process":"{}"}}"#, self.process)
        })
    }

    pub fn from_json_line(line: &str) -> Option<Self> {
        serde_json::from_str(line).ok()
    }
}

/// Masks all but the first/last 4 characters of a task uuid, per
/// `PrivacyAwareTaskBaseModel.__str__`'s `<task_uuid: XXXX...XXXX>` format.
pub fn privacy_mask_uuid(uuid: &str) -> String {
    if uuid.len() <= 8 {
        return "*".repeat(uuid.len());
    }
    let (head, rest) = uuid.split_at(4);
    let (_, tail) = rest.split_at(rest.len() - 4);
    format!("{head}...{tail}")
}

/// Replaces every canonical `8-4-4-4-12` hex UUID substring found in `text`
/// with its masked form. Log call sites interpolate raw task UUIDs
/// straight into format strings rather than going through a single
/// `Display` impl, so privacy mode scrubs them back out at the point
/// the message is about to leave the process.
pub fn mask_uuids_in(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        if i + 36 <= chars.len() && is_uuid_shape(&chars[i..i + 36]) {
            let candidate: String = chars[i..i + 36].iter().collect();
            out.push_str(&privacy_mask_uuid(&candidate));
            i += 36;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

fn is_uuid_shape(chars: &[char]) -> bool {
    const DASH_POSITIONS: [usize; 4] = [8, 13, 18, 23];
    chars.iter().enumerate().all(|(idx, c)| if DASH_POSITIONS.contains(&idx) { *c == '-' } else { c.is_ascii_hexdigit() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let record = WireLogRecord {
            level: "info".to_string(),
            target: "wapi_worker".to_string(),
            message: "loaded model base".to_string(),
            process: "worker".to_string(),
        };
        let line = record.to_json_line();
        let restored = WireLogRecord::from_json_line(&line).unwrap();
        assert_eq!(restored.message, record.message);
    }

    #[test]
    fn from_json_line_rejects_garbage() {
        assert!(WireLogRecord::from_json_line("not json").is_none());
    }

    #[test]
    fn privacy_mask_keeps_only_head_and_tail() {
        assert_eq!(privacy_mask_uuid("0123456789abcdef"), "0123...cdef");
    }

    #[test]
    fn privacy_mask_handles_short_uuids() {
        assert_eq!(privacy_mask_uuid("abc"), "***");
    }

    #[test]
    fn mask_uuids_in_replaces_embedded_uuid() {
        let masked = mask_uuids_in("task d290f1ee-6c54-4b01-90e6-d701748f0851 failed: timeout");
        assert_eq!(masked, "task d290...0851 failed: timeout");
    }

    #[test]
    fn mask_uuids_in_leaves_plain_text_untouched() {
        assert_eq!(mask_uuids_in("no uuids here"), "no uuids here");
    }

    #[test]
    fn mask_uuids_in_handles_multiple_occurrences() {
        let masked = mask_uuids_in("a290f1ee-6c54-4b01-90e6-d701748f0851,b290f1ee-6c54-4b01-90e6-d701748f0852");
        assert_eq!(masked, "a290...0851,b290...0852");
    }
}
