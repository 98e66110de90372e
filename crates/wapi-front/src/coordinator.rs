//! Bridges the HTTP surface to the worker process: owns the child process,
//! the framed message channel to it, and the shutdown sequence.
//!
//! Grounded in `original_source/src/whisper_api/main.py`'s
//! `setup_decoder_process_and_listener_thread`/`handle_message`/
//! `listen_to_decoder`/`exit_fn`, translated from a `multiprocessing.Pipe`
//! plus a bare listener thread into an owned `tokio::process::Child` with
//! framed async I/O and a supervised listener task.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{Level, error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;

use wapi_common::{Result, WApiError, WireLogRecord};
use wapi_protocol::{DecoderState, Message, Task, TaskStatus};
use wapi_registry::TtlRegistry;

/// Tracks staged upload files so they're deleted exactly once, when the
/// owning task reaches a terminal status. Grounded in `main.py::handle_message`'s
/// `task.processed_audio_file.close()` + `os.remove` on terminal status.
#[derive(Default)]
struct StagedFiles {
    by_task: HashMap<String, PathBuf>,
}

impl StagedFiles {
    fn register(&mut self, task_id: String, path: PathBuf) {
        self.by_task.insert(task_id, path);
    }

    fn finalize(&mut self, task_id: &str) {
        if let Some(path) = self.by_task.remove(task_id) {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("failed removing staged file {}: {e}", path.display());
            }
        }
    }
}

pub struct Coordinator {
    to_worker: Mutex<mpsc::Sender<Message>>,
    registry: TtlRegistry<String, Task>,
    decoder_state: RwLock<DecoderState>,
    staged: Mutex<StagedFiles>,
    child: Mutex<Option<Child>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    log_relay: Mutex<Option<JoinHandle<()>>>,
    queue_capacity: usize,
}

impl Coordinator {
    /// Spawns the worker binary and wires up the framed channel plus the
    /// listener task that drains its status/task_update stream.
    /// `queue_capacity` mirrors the worker's own `MAX_TASK_QUEUE_SIZE` so
    /// `submit` can reject over-capacity requests synchronously instead of
    /// racing the worker's own bounded queue.
    pub async fn spawn(worker_bin: &str, registry: TtlRegistry<String, Task>, queue_capacity: usize) -> Result<Arc<Self>> {
        let mut child = Command::new(worker_bin)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(WApiError::Io)?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let (to_worker_tx, to_worker_rx) = mpsc::channel::<Message>(64);

        let coordinator = Arc::new(Self {
            to_worker: Mutex::new(to_worker_tx),
            registry,
            decoder_state: RwLock::new(DecoderState::default()),
            staged: Mutex::new(StagedFiles::default()),
            child: Mutex::new(Some(child)),
            listener: Mutex::new(None),
            writer: Mutex::new(None),
            log_relay: Mutex::new(None),
            queue_capacity,
        });

        let writer = tokio::spawn(run_writer(BufWriter::new(stdin), to_worker_rx));
        let listener_coordinator = Arc::clone(&coordinator);
        let listener = tokio::spawn(run_listener(BufReader::new(stdout), listener_coordinator));
        let log_relay = tokio::spawn(run_log_relay(BufReader::new(stderr)));

        *coordinator.writer.lock().await = Some(writer);
        *coordinator.listener.lock().await = Some(listener);
        *coordinator.log_relay.lock().await = Some(log_relay);

        Ok(coordinator)
    }

    /// Rejects the submission synchronously with `QueueFull` once the last
    /// known queue depth reaches capacity. This is the documented primary
    /// defense against an overfull queue; `Worker::enqueue` still guards the
    /// same race on its own side in case a burst of submissions slips past
    /// this check before a status snapshot catches up.
    pub async fn submit(&self, task: Task, staged_path: Option<PathBuf>) -> Result<()> {
        let in_queue = self.decoder_state.read().await.tasks_in_queue.unwrap_or(0) as usize;
        if in_queue >= self.queue_capacity {
            return Err(WApiError::QueueFull(self.queue_capacity));
        }

        if let Some(path) = staged_path {
            self.staged.lock().await.register(task.uuid.clone(), path);
        }
        self.registry.put(task.uuid.clone(), task.clone());
        self.to_worker
            .lock()
            .await
            .send(Message::Decode { task })
            .await
            .map_err(|_| WApiError::ChannelClosed)
    }

    pub fn task(&self, id: &str) -> Option<Task> {
        self.registry.get(&id.to_string())
    }

    pub async fn decoder_state(&self) -> DecoderState {
        self.decoder_state.read().await.clone()
    }

    pub async fn request_status_refresh(&self) -> Result<()> {
        self.to_worker
            .lock()
            .await
            .send(Message::Status { state: DecoderState::default(), queue_status: None })
            .await
            .map_err(|_| WApiError::ChannelClosed)
    }

    /// Orchestrates shutdown in the original's order: ask nicely, wait,
    /// escalate to a kill, then stop the listener task. Grounded in
    /// `main.py::exit_fn`'s terminate -> join(5) -> kill -> join(2) ->
    /// stop listener -> join(5) sequence.
    pub async fn shutdown(&self) {
        let _ = self.to_worker.lock().await.send(Message::Exit).await;

        let mut child_slot = self.child.lock().await;
        if let Some(mut child) = child_slot.take() {
            match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
                Ok(Ok(status)) => info!("worker exited cleanly: {status}"),
                Ok(Err(e)) => warn!("error waiting for worker exit: {e}"),
                Err(_) => {
                    warn!("worker did not exit within 5s, killing");
                    if let Err(e) = child.kill().await {
                        error!("failed to kill worker process: {e}");
                    }
                    match tokio::time::timeout(Duration::from_secs(2), child.wait()).await {
                        Ok(_) => info!("worker process reaped after kill"),
                        Err(_) => error!("worker process did not reap within 2s of kill"),
                    }
                }
            }
        }
        drop(child_slot);

        if let Some(listener) = self.listener.lock().await.take() {
            listener.abort();
            let _ = tokio::time::timeout(Duration::from_secs(5), listener).await;
        }
        if let Some(writer) = self.writer.lock().await.take() {
            writer.abort();
        }
        if let Some(log_relay) = self.log_relay.lock().await.take() {
            log_relay.abort();
        }
    }
}

/// Re-emits the worker's JSON-line log records through the front's own
/// logger, substituting in the originating process name the way
/// `listen_for_logs_from_children` rewrites the formatter per child.
/// A line that fails to parse is logged and skipped rather than treated
/// as fatal (the original's bare `except: pass` around this loop is the
/// one place this redesign deliberately diverges from it).
async fn run_log_relay(mut reader: BufReader<ChildStderr>) {
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => return,
            Ok(_) => match WireLogRecord::from_json_line(line.trim_end()) {
                Some(record) => emit(&record),
                None => warn!("malformed log line from worker: {}", line.trim_end()),
            },
            Err(e) => {
                error!("failed reading worker log stream: {e}");
                return;
            }
        }
    }
}

fn emit(record: &WireLogRecord) {
    let level = record.level.parse::<Level>().unwrap_or(Level::Info);
    log::log!(target: "worker", level, "[{}] {}", record.process, record.message);
}

async fn run_writer(mut writer: BufWriter<ChildStdin>, mut rx: mpsc::Receiver<Message>) {
    use tokio::io::AsyncWriteExt;
    while let Some(msg) = rx.recv().await {
        if let Err(e) = wapi_protocol::framing::write_frame(&mut writer, &msg).await {
            error!("failed writing frame to worker: {e}");
            break;
        }
        if let Err(e) = writer.flush().await {
            error!("failed flushing frame to worker: {e}");
            break;
        }
    }
}

/// Drains status/task_update frames from the worker and applies them.
/// Unlike the original's bare `except: pass` around this loop, a malformed
/// frame is logged and the loop continues rather than silently dying.
async fn run_listener(mut reader: BufReader<ChildStdout>, coordinator: Arc<Coordinator>) {
    loop {
        match wapi_protocol::framing::read_frame(&mut reader).await {
            Ok(Some(Message::TaskUpdate { task })) => {
                let terminal = matches!(task.status, TaskStatus::Finished | TaskStatus::Failed);
                let id = task.uuid.clone();
                coordinator.registry.put(id.clone(), task);
                if terminal {
                    coordinator.staged.lock().await.finalize(&id);
                }
            }
            Ok(Some(Message::Status { state, queue_status })) => {
                *coordinator.decoder_state.write().await = state;
                if let Some(positions) = queue_status {
                    for (task_id, position) in positions {
                        if let Some(mut task) = coordinator.registry.get(&task_id) {
                            task.position_in_queue = Some(position);
                            coordinator.registry.put(task_id, task);
                        }
                    }
                }
            }
            Ok(Some(other)) => warn!("unexpected message from worker: {}", other.type_name()),
            Ok(None) => {
                info!("worker closed its stdout, listener exiting");
                return;
            }
            Err(e) => {
                error!("malformed frame from worker, continuing: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_files_finalize_is_idempotent() {
        let mut staged = StagedFiles::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        std::fs::write(&path, b"x").unwrap();
        staged.register("task-1".to_string(), path.clone());
        staged.finalize("task-1");
        assert!(!path.exists());
        // second call must not panic even though the entry is gone.
        staged.finalize("task-1");
    }
}
