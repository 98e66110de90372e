//! Worker-process orchestration: the decode loop thread, the message
//! pump, model run and idle unload. Grounded in
//! `original_source/src/whisper_api/decoding/decoder.py`'s `Decoder.run`.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{error, info, warn};

use wapi_common::{ModelSize, Result, WApiError};
use wapi_protocol::{DecoderState, Message, ModelLoader, Task, TaskStatus, WhisperResult};

use crate::model_select;
use crate::queue::{JobQueue, WaitOutcome};

/// Env-derived settings the worker needs, independent of `wapi_common::Config`
/// so this crate doesn't need to depend on every front-only field.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub use_gpu_if_available: bool,
    pub device_available: bool,
    pub cpu_fallback_model: ModelSize,
    pub develop_mode: bool,
    pub load_model_on_startup: Option<ModelSize>,
    pub unload_model_after_s: Option<u64>,
    pub queue_capacity: usize,
}

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Runs the decode loop and message dispatch against a live `ModelLoader`.
/// Owns the job queue and tracks enough state to answer `Message::Status`
/// without touching the loader.
pub struct Worker<L: ModelLoader> {
    loader: Mutex<L>,
    queue: JobQueue,
    settings: WorkerSettings,
    out_tx: Sender<Message>,
    stop: Arc<AtomicBool>,
    currently_busy: AtomicBool,
    tasks_in_queue: AtomicU32,
    last_loaded_model_size: Mutex<Option<ModelSize>>,
}

impl<L: ModelLoader> Worker<L> {
    pub fn new(loader: L, settings: WorkerSettings, out_tx: Sender<Message>) -> Arc<Self> {
        let queue = JobQueue::new(settings.queue_capacity);
        Arc::new(Self {
            loader: Mutex::new(loader),
            queue,
            settings,
            out_tx,
            stop: Arc::new(AtomicBool::new(false)),
            currently_busy: AtomicBool::new(false),
            tasks_in_queue: AtomicU32::new(0),
            last_loaded_model_size: Mutex::new(None),
        })
    }

    /// Enqueues a task and immediately pushes a status snapshot so the
    /// front's `queue_status` map reflects every other queued task's new
    /// position, not just the one that just moved.
    ///
    /// The front pre-checks capacity before ever sending a `decode`, so a
    /// `QueueFull` here means that check raced a concurrent submission.
    /// Rather than silently dropping the task, report it as failed so the
    /// front's registry doesn't leave a pending task that never updates.
    pub fn enqueue(&self, mut task: Task) -> Result<()> {
        let id = task.uuid.clone();
        task.status = TaskStatus::Pending;
        if let Err(e) = self.queue.put(task.clone()) {
            warn!("queue full, failing task {id} instead of dropping it silently: {e}");
            task.status = TaskStatus::Failed;
            task.position_in_queue = None;
            let _ = self.out_tx.send(Message::TaskUpdate { task });
            return Ok(());
        }
        self.tasks_in_queue.store(self.queue.len() as u32, Ordering::SeqCst);
        if let Some(pos) = self.queue.position(&id) {
            info!("queued task {id} at position {pos}");
        }
        let _ = self.send_status();
        Ok(())
    }

    pub fn dispatch(&self, msg: Message) -> Result<()> {
        match msg {
            Message::Decode { task } => self.enqueue(task),
            Message::Status { .. } => self.send_status(),
            Message::Exit => {
                self.stop.store(true, Ordering::SeqCst);
                Ok(())
            }
            Message::TaskUpdate { .. } => Err(WApiError::MalformedMessage(
                "TaskUpdate is worker-to-front only, never incoming".to_string(),
            )),
        }
    }

    fn send_status(&self) -> Result<()> {
        let loader = self.loader.lock().expect("loader mutex poisoned");
        let state = DecoderState {
            gpu_mode: Some(self.settings.use_gpu_if_available && self.settings.device_available),
            max_model_to_use: self.settings.load_model_on_startup.or(Some(self.settings.cpu_fallback_model)),
            last_loaded_model_size: *self.last_loaded_model_size.lock().expect("stamp mutex poisoned"),
            is_model_loaded: Some(loader.current().is_some()),
            currently_busy: Some(self.currently_busy.load(Ordering::SeqCst)),
            tasks_in_queue: Some(self.tasks_in_queue.load(Ordering::SeqCst)),
            received_at: Some(Utc::now()),
        };
        drop(loader);
        self.out_tx
            .send(Message::Status { state, queue_status: Some(self.queue_positions()) })
            .map_err(|_| WApiError::ChannelClosed)
    }

    fn queue_positions(&self) -> std::collections::HashMap<String, u32> {
        let mut out = std::collections::HashMap::new();
        for (pos, task) in self.queue.snapshot() {
            out.insert(task.uuid, pos as u32);
        }
        out
    }

    /// Runs the blocking decode loop until `Message::Exit` is dispatched.
    /// Intended to run on its own OS thread; the binary's message pump
    /// calls `dispatch` from the async side concurrently.
    pub fn run_decode_loop(self: &Arc<Self>) {
        if let Some(requested) = self.settings.load_model_on_startup {
            if let Err(e) = self.ensure_model(Some(requested)) {
                warn!("startup model load failed, will retry on first task: {e}");
            }
        }

        let mut last_activity = Instant::now();
        loop {
            match self.queue.wait_next(&self.stop, POLL_INTERVAL) {
                WaitOutcome::Stopped => {
                    info!("decode loop exiting");
                    return;
                }
                WaitOutcome::TimedOut => {
                    self.tasks_in_queue.store(self.queue.len() as u32, Ordering::SeqCst);
                    self.maybe_unload_idle(last_activity);
                }
                WaitOutcome::Got(task) => {
                    last_activity = Instant::now();
                    self.tasks_in_queue.store(self.queue.len() as u32, Ordering::SeqCst);
                    self.process_one(task);
                }
            }
        }
    }

    fn maybe_unload_idle(&self, last_activity: Instant) {
        let Some(after_s) = self.settings.unload_model_after_s else { return };
        if self.currently_busy.load(Ordering::SeqCst) {
            return;
        }
        if last_activity.elapsed() < Duration::from_secs(after_s) {
            return;
        }
        let mut loader = self.loader.lock().expect("loader mutex poisoned");
        if loader.current().is_some() {
            info!("unloading model after {after_s}s of inactivity");
            loader.unload();
        }
        drop(loader);
        let _ = self.send_status();
    }

    fn process_one(&self, mut task: Task) {
        self.currently_busy.store(true, Ordering::SeqCst);
        task.status = TaskStatus::Processing;
        task.position_in_queue = Some(0);
        // dequeuing this task shifts everyone behind it up one position;
        // push a fresh snapshot before reporting this one as processing.
        let _ = self.send_status();
        let _ = self.out_tx.send(Message::TaskUpdate { task: task.clone() });

        match self.run_model(&task) {
            Ok(result) => {
                task.used_device = Some(result.used_device);
                task.whisper_result = Some(result);
                task.status = TaskStatus::Finished;
            }
            Err(e) => {
                error!("task {} failed: {e}", task.uuid);
                task.status = TaskStatus::Failed;
            }
        }
        task.position_in_queue = None;
        if self.out_tx.send(Message::TaskUpdate { task }).is_err() {
            warn!("front channel closed while reporting task completion");
        }
        self.currently_busy.store(false, Ordering::SeqCst);
    }

    fn ensure_model(&self, requested: Option<ModelSize>) -> Result<ModelSize> {
        let mut loader = self.loader.lock().expect("loader mutex poisoned");
        let picked = model_select::load_model(
            &mut *loader,
            self.settings.use_gpu_if_available,
            self.settings.device_available,
            requested,
            self.settings.cpu_fallback_model,
            self.settings.develop_mode,
        )?;
        *self.last_loaded_model_size.lock().expect("stamp mutex poisoned") = Some(picked);
        Ok(picked)
    }

    fn run_model(&self, task: &Task) -> Result<WhisperResult> {
        let start_time = Utc::now();
        self.ensure_model(task.target_model_size)?;

        let mut loader = self.loader.lock().expect("loader mutex poisoned");
        let device = loader.device();
        let output = loader.run(&task.audiofile_name, task.source_language.as_deref(), task.task_type)?;
        drop(loader);

        let output_language = match task.task_type {
            wapi_protocol::TaskType::Translate => "en".to_string(),
            wapi_protocol::TaskType::Transcribe => output.detected_language.clone(),
        };

        Ok(WhisperResult {
            text: output.text,
            language: output.detected_language,
            output_language,
            segments: output.segments,
            used_model_size: self.last_loaded_model_size.lock().expect("stamp mutex poisoned").unwrap_or(ModelSize::Base),
            used_device: device,
            start_time,
            end_time: Utc::now(),
        })
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use wapi_protocol::{Device as Dev, Segment, TaskType, TranscriptionOutput};

    struct StubLoader {
        current: Option<ModelSize>,
    }

    impl ModelLoader for StubLoader {
        fn free_device_memory(&self) -> u64 {
            20_000_000_000
        }

        fn current(&self) -> Option<ModelSize> {
            self.current
        }

        fn load(&mut self, size: ModelSize) -> Result<()> {
            self.current = Some(size);
            Ok(())
        }

        fn unload(&mut self) {
            self.current = None;
        }

        fn run(&mut self, _: &str, _: Option<&str>, _: TaskType) -> Result<TranscriptionOutput> {
            Ok(TranscriptionOutput {
                text: "hello".to_string(),
                detected_language: "en".to_string(),
                segments: vec![Segment { start_s: 0.0, end_s: 1.0, text: "hello".to_string(), tokens: None }],
            })
        }

        fn device(&self) -> Dev {
            Dev::Accel
        }
    }

    fn settings() -> WorkerSettings {
        WorkerSettings {
            use_gpu_if_available: true,
            device_available: true,
            cpu_fallback_model: ModelSize::Base,
            develop_mode: false,
            load_model_on_startup: None,
            unload_model_after_s: None,
            queue_capacity: 4,
        }
    }

    #[test]
    fn enqueue_then_process_one_emits_processing_then_finished() {
        let (tx, rx) = mpsc::channel();
        let worker = Worker::new(StubLoader { current: None }, settings(), tx);
        let task = Task::new("/tmp/a.wav".to_string(), None, TaskType::Transcribe, None, None);
        worker.enqueue(task.clone()).unwrap();

        let outcome = worker.queue.wait_next(&worker.stop, Duration::from_millis(50));
        let dequeued = match outcome {
            WaitOutcome::Got(t) => t,
            _ => panic!("expected the enqueued task"),
        };
        worker.process_one(dequeued);

        // enqueue and process_one each push a status snapshot ahead of the
        // task_update they care about; only the task_update messages matter
        // here, so skip the status ones rather than pin exact ordering.
        let task_updates: Vec<Message> = rx.try_iter().filter(|m| matches!(m, Message::TaskUpdate { .. })).collect();
        assert_eq!(task_updates.len(), 2);
        assert!(matches!(&task_updates[0], Message::TaskUpdate { task } if task.status == TaskStatus::Processing));
        match &task_updates[1] {
            Message::TaskUpdate { task } => {
                assert_eq!(task.status, TaskStatus::Finished);
                assert_eq!(task.whisper_result.as_ref().unwrap().text, "hello");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn exit_message_sets_stop_flag() {
        let (tx, _rx) = mpsc::channel();
        let worker = Worker::new(StubLoader { current: None }, settings(), tx);
        worker.dispatch(Message::Exit).unwrap();
        assert!(worker.stop.load(Ordering::SeqCst));
    }

    #[test]
    fn status_message_reports_current_state() {
        let (tx, rx) = mpsc::channel();
        let worker = Worker::new(StubLoader { current: Some(ModelSize::Small) }, settings(), tx);
        worker.dispatch(Message::Status { state: DecoderState::default(), queue_status: None }).unwrap();
        match rx.recv().unwrap() {
            Message::Status { state, .. } => assert_eq!(state.is_model_loaded, Some(true)),
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
