//! The Task/WhisperResult/TaskResponse/DecoderState data model.
//!
//! Grounded in `original_source/src/whisper_api/data_models/task.py` and
//! `decoder_state.py`, expressed as closed Rust record types per the
//! expressed as closed Rust record types: `TaskResponse` is a distinct
//! projection, not a dynamic reshape of `Task`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wapi_common::ModelSize;
use wapi_queue::Keyed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Transcribe,
    Translate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Finished,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Accel,
    Cpu,
}

impl Device {
    pub fn as_str(self) -> &'static str {
        match self {
            Device::Accel => "accel",
            Device::Cpu => "cpu",
        }
    }
}

/// One timed transcript segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start_s: f64,
    pub end_s: f64,
    pub text: String,
    pub tokens: Option<Vec<i64>>,
}

/// The successful output of a transcription/translation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhisperResult {
    pub text: String,
    pub language: String,
    /// `"en"` for translate, the detected/declared source language for
    /// transcribe.
    pub output_language: String,
    pub segments: Vec<Segment>,
    pub used_model_size: ModelSize,
    pub used_device: Device,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl WhisperResult {
    pub fn processing_duration_s(&self) -> i64 {
        (self.end_time - self.start_time).num_seconds()
    }
}

/// A submitted unit of transcription/translation work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub uuid: String,
    pub audiofile_name: String,
    pub original_file_name: String,
    pub task_type: TaskType,
    pub source_language: Option<String>,
    pub target_model_size: Option<ModelSize>,
    pub status: TaskStatus,
    /// Meaningful only while `pending`/`processing`; `0` means processing.
    pub position_in_queue: Option<u32>,
    pub time_uploaded: DateTime<Utc>,
    pub whisper_result: Option<WhisperResult>,
    pub used_device: Option<Device>,
}

impl Task {
    pub fn new(
        audiofile_name: String,
        original_file_name: Option<String>,
        task_type: TaskType,
        source_language: Option<String>,
        target_model_size: Option<ModelSize>,
    ) -> Self {
        Task {
            uuid: uuid::Uuid::new_v4().simple().to_string(),
            audiofile_name,
            original_file_name: original_file_name.unwrap_or_else(|| "unknown".to_string()),
            task_type,
            source_language,
            target_model_size,
            status: TaskStatus::Pending,
            position_in_queue: None,
            time_uploaded: Utc::now(),
            whisper_result: None,
            used_device: None,
        }
    }

    /// Projects this Task into the wire-facing `TaskResponse`.
    pub fn to_response(&self) -> TaskResponse {
        match self.status {
            TaskStatus::Pending | TaskStatus::Processing | TaskStatus::Failed => TaskResponse {
                task_id: self.uuid.clone(),
                task_type: self.task_type,
                status: self.status,
                time_uploaded: self.time_uploaded,
                transcript: None,
                source_language: self.source_language.clone(),
                position_in_queue: self.position_in_queue,
                processing_duration: None,
                time_processing_finished: None,
                target_model_size: self.target_model_size,
                used_model_size: None,
                used_device: None,
            },
            TaskStatus::Finished => {
                let result = self
                    .whisper_result
                    .as_ref()
                    .expect("status=finished implies whisper_result is set");
                TaskResponse {
                    task_id: self.uuid.clone(),
                    task_type: self.task_type,
                    status: self.status,
                    time_uploaded: self.time_uploaded,
                    transcript: Some(result.text.clone()),
                    source_language: Some(result.language.clone()),
                    position_in_queue: self.position_in_queue,
                    processing_duration: Some(result.processing_duration_s()),
                    time_processing_finished: Some(result.end_time),
                    target_model_size: self.target_model_size,
                    used_model_size: Some(result.used_model_size),
                    used_device: Some(result.used_device),
                }
            }
        }
    }
}

impl Keyed for Task {
    type Id = String;
    fn id(&self) -> String {
        self.uuid.clone()
    }
}

/// The JSON shape returned across the HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    pub task_id: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub time_uploaded: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_in_queue: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_duration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_processing_finished: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_model_size: Option<ModelSize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_model_size: Option<ModelSize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_device: Option<Device>,
}

/// The front's mirror of the worker's health and queue summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecoderState {
    pub gpu_mode: Option<bool>,
    pub max_model_to_use: Option<ModelSize>,
    pub last_loaded_model_size: Option<ModelSize>,
    pub is_model_loaded: Option<bool>,
    pub currently_busy: Option<bool>,
    pub tasks_in_queue: Option<u32>,
    pub received_at: Option<DateTime<Utc>>,
}
