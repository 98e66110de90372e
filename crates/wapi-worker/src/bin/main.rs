//! Worker process entry point: reads framed `Message`s from
//! stdin, dispatches them to a [`Worker`], and writes framed `Message`s
//! back to stdout. The ASR backend itself is a named-interface-only
//! collaborator wired in here as a stub; a real
//! deployment swaps `StubLoader` for a `whisper-rs`-backed implementation.

use std::sync::mpsc;

use anyhow::Context;
use log::{error, info};
use tokio::io::{stdin, stdout};

use wapi_common::{Config, ModelSize, Result as WResult};
use wapi_protocol::{Device, ModelLoader, Message, TaskType, TranscriptionOutput};
use wapi_worker::{Worker, WorkerSettings};

/// Placeholder ASR backend. Reports a fixed device/memory budget and
/// produces no real transcript; real worker binaries link a concrete
/// `ModelLoader` (e.g. a `whisper-rs` wrapper) in its place.
struct StubLoader {
    current: Option<ModelSize>,
    device: Device,
}

impl ModelLoader for StubLoader {
    fn free_device_memory(&self) -> u64 {
        match self.device {
            Device::Accel => 0,
            Device::Cpu => u64::MAX,
        }
    }

    fn current(&self) -> Option<ModelSize> {
        self.current
    }

    fn load(&mut self, size: ModelSize) -> WResult<()> {
        self.current = Some(size);
        Ok(())
    }

    fn unload(&mut self) {
        self.current = None;
    }

    fn run(&mut self, _audio_path: &str, _source_language: Option<&str>, _task_type: TaskType) -> WResult<TranscriptionOutput> {
        Err(wapi_common::WApiError::InferenceError(
            "no ASR backend linked into this worker binary".to_string(),
        ))
    }

    fn device(&self) -> Device {
        self.device
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("reading worker configuration")?;
    let level = config.log_level.parse().unwrap_or(log::LevelFilter::Info);
    wapi_worker::logging::init("worker", level, config.log_privacy_mode);

    let device_available = config.use_gpu_if_available;
    let settings = WorkerSettings {
        use_gpu_if_available: config.use_gpu_if_available,
        device_available,
        cpu_fallback_model: config.cpu_fallback_model,
        develop_mode: config.develop_mode,
        load_model_on_startup: if config.load_model_on_startup { config.max_model } else { None },
        unload_model_after_s: config.unload_model_after_s,
        queue_capacity: config.max_task_queue_size,
    };

    let loader = StubLoader { current: None, device: if device_available { Device::Accel } else { Device::Cpu } };
    let (out_tx, out_rx) = mpsc::channel::<Message>();
    let worker = Worker::new(loader, settings, out_tx);

    let decode_worker = worker.clone();
    std::thread::Builder::new()
        .name("decode-loop".to_string())
        .spawn(move || decode_worker.run_decode_loop())
        .context("spawning decode loop thread")?;

    // Bridge the decode loop's std::sync::mpsc output onto the async
    // stdout writer via a bounded tokio channel.
    let (bridge_tx, mut bridge_rx) = tokio::sync::mpsc::channel::<Message>(64);
    std::thread::Builder::new()
        .name("front-channel-bridge".to_string())
        .spawn(move || {
            while let Ok(msg) = out_rx.recv() {
                if bridge_tx.blocking_send(msg).is_err() {
                    break;
                }
            }
        })
        .context("spawning front-channel bridge thread")?;

    let mut stdout = stdout();
    let writer = tokio::spawn(async move {
        while let Some(msg) = bridge_rx.recv().await {
            if let Err(e) = wapi_protocol::framing::write_frame(&mut stdout, &msg).await {
                error!("failed writing frame to front: {e}");
                break;
            }
        }
    });

    let stop = worker.stop_flag();
    let mut stdin = stdin();
    loop {
        match wapi_protocol::framing::read_frame(&mut stdin).await {
            Ok(Some(msg)) => {
                let is_exit = matches!(msg, Message::Exit);
                if let Err(e) = worker.dispatch(msg) {
                    error!("failed dispatching message: {e}");
                }
                if is_exit {
                    break;
                }
            }
            Ok(None) => {
                info!("front closed stdin, exiting");
                stop.store(true, std::sync::atomic::Ordering::SeqCst);
                break;
            }
            Err(e) => {
                error!("failed reading frame from front: {e}");
                break;
            }
        }
    }

    let _ = writer.await;
    Ok(())
}
