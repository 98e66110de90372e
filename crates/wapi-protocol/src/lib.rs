pub mod collaborators;
pub mod framing;
pub mod message;
pub mod task;

pub use collaborators::{AudioProbe, ModelLoader, TranscriptionOutput};
pub use message::Message;
pub use task::{DecoderState, Device, Segment, Task, TaskResponse, TaskStatus, TaskType, WhisperResult};
