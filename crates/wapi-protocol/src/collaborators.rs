//! Named-interface-only collaborators explicitly out of core scope: the
//! real ASR model and the real audio-validity probe. Production wiring
//! (e.g. `whisper-rs`, an `ffmpeg`-backed probe) lives in the binaries;
//! the core only depends on these traits.

use crate::task::{Device, TaskType};
use wapi_common::{ModelSize, Result};

#[derive(Debug, Clone)]
pub struct TranscriptionOutput {
    pub text: String,
    pub detected_language: String,
    pub segments: Vec<crate::task::Segment>,
}

/// Loads/unloads a given model size against available device memory.
/// Analogous to `decoder.py`'s `load_model`/`__try_load`/`__unload_model`.
pub trait ModelLoader: Send {
    /// Bytes of free device memory currently available.
    fn free_device_memory(&self) -> u64;

    /// The size currently resident, if any.
    fn current(&self) -> Option<ModelSize>;

    /// Attempts to load `size`; `Ok(())` on success, `Err(OutOfMemory)` if
    /// it doesn't currently fit.
    fn load(&mut self, size: ModelSize) -> Result<()>;

    fn unload(&mut self);

    fn run(
        &mut self,
        audio_path: &str,
        source_language: Option<&str>,
        task_type: TaskType,
    ) -> Result<TranscriptionOutput>;

    fn device(&self) -> Device;
}

/// Validates that a staged file actually contains a usable audio stream.
/// Analogous to `endpoints.py::is_file_audio`'s `ffmpeg.probe` call.
pub trait AudioProbe: Send + Sync {
    fn has_audio_stream(&self, path: &str) -> bool;
}
