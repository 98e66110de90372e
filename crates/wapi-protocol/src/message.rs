//! The inter-process message envelope.
//!
//! Grounded in `mpv-stt-protocol::Message::encode/decode`'s use of
//! `postcard` for a compact, self-describing wire format; generalized here
//! from that crate's audio-chunk enum to the `decode/status/task_update/exit`
//! enum, carried as length-prefixed tagged frames instead of pickling
//! rich objects across the pipe.

use crate::task::{DecoderState, Task};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use wapi_common::{Result, WApiError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    Decode { task: Task },
    Status {
        state: DecoderState,
        /// `task_id -> position_in_queue`, present when the worker has a
        /// delta to report.
        queue_status: Option<HashMap<String, u32>>,
    },
    TaskUpdate { task: Task },
    Exit,
}

impl Message {
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Decode { .. } => "decode",
            Message::Status { .. } => "status",
            Message::TaskUpdate { .. } => "task_update",
            Message::Exit => "exit",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        postcard::to_allocvec(self)
            .map_err(|e| WApiError::MalformedMessage(format!("postcard encode failed: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        postcard::from_bytes(bytes)
            .map_err(|e| WApiError::MalformedMessage(format!("postcard decode failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskType;

    #[test]
    fn exit_round_trips() {
        let msg = Message::Exit;
        let bytes = msg.encode().unwrap();
        let restored = Message::decode(&bytes).unwrap();
        assert_eq!(restored.type_name(), "exit");
    }

    #[test]
    fn decode_message_round_trips_task() {
        let task = Task::new("/tmp/a.wav".to_string(), None, TaskType::Transcribe, None, None);
        let msg = Message::Decode { task: task.clone() };
        let bytes = msg.encode().unwrap();
        match Message::decode(&bytes).unwrap() {
            Message::Decode { task: restored } => assert_eq!(restored, task),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn malformed_bytes_are_rejected() {
        assert!(Message::decode(&[0xff, 0xff, 0xff]).is_err());
    }
}
