//! Environment-variable configuration, read once at process startup.
//!
//! Grounded in `original_source/src/whisper_api/environment.py`, rendered
//! as a typed struct (`ServerConfig` in
//! `mpv-stt-server::server` does the same thing for its own knobs)
//! instead of Python's module-level globals.

use crate::model_size::ModelSize;
use crate::{Result, WApiError};
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_port: u16,
    pub api_listen: String,

    pub load_model_on_startup: bool,
    /// `None` disables idle eviction. `0` is also treated as disabled,
    /// matching the `UNLOAD_MODEL_AFTER_S=0` test case.
    pub unload_model_after_s: Option<u64>,
    pub use_gpu_if_available: bool,
    pub max_model: Option<ModelSize>,
    pub cpu_fallback_model: ModelSize,
    pub develop_mode: bool,

    pub delete_results_after_m: i64,
    pub refresh_expiration_time_on_usage: bool,
    pub run_result_expiry_check_m: Option<i64>,

    pub max_task_queue_size: usize,
    pub authorized_mails: Vec<String>,

    pub log_dir: Option<String>,
    pub log_file: String,
    pub log_level: String,
    pub log_privacy_mode: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let api_port = env_or("API_PORT", "3001")?;
        let api_listen = env::var("API_LISTEN").unwrap_or_else(|_| "127.0.0.1".to_string());

        let load_model_on_startup = env_bool("LOAD_MODEL_ON_STARTUP", true)?;
        let unload_model_after_s = match env::var("UNLOAD_MODEL_AFTER_S") {
            Ok(v) if v.is_empty() => None,
            Ok(v) => {
                let secs: u64 = v
                    .parse()
                    .map_err(|_| WApiError::ConfigError(format!("UNLOAD_MODEL_AFTER_S invalid: {v}")))?;
                if secs == 0 { None } else { Some(secs) }
            }
            Err(_) => None,
        };
        let use_gpu_if_available = env_bool("USE_GPU_IF_AVAILABLE", true)?;
        let max_model = match env::var("MAX_MODEL") {
            Ok(v) if v.is_empty() => None,
            Ok(v) => Some(
                v.parse::<ModelSize>()
                    .map_err(|e| WApiError::ConfigError(e.to_string()))?,
            ),
            Err(_) => None,
        };
        let cpu_fallback_model = match env::var("CPU_FALLBACK_MODEL") {
            Ok(v) if !v.is_empty() => v
                .parse::<ModelSize>()
                .map_err(|e| WApiError::ConfigError(e.to_string()))?,
            _ => ModelSize::Base,
        };
        let develop_mode = env_bool("DEVELOP_MODE", false)?;

        let delete_results_after_m: i64 = env_or("DELETE_RESULTS_AFTER_M", "30")?;
        if delete_results_after_m <= 0 {
            return Err(WApiError::ConfigError(
                "DELETE_RESULTS_AFTER_M must be > 0".to_string(),
            ));
        }
        let refresh_expiration_time_on_usage = env_bool("REFRESH_EXPIRATION_TIME_ON_USAGE", true)?;
        let run_result_expiry_check_m = match env::var("RUN_RESULT_EXPIRY_CHECK_M") {
            Ok(v) if v.is_empty() => None,
            Ok(v) => Some(
                v.parse::<i64>()
                    .map_err(|_| WApiError::ConfigError(format!("RUN_RESULT_EXPIRY_CHECK_M invalid: {v}")))?,
            ),
            Err(_) => Some(1),
        };

        let max_task_queue_size: usize = env_or("MAX_TASK_QUEUE_SIZE", "32")?;
        let authorized_mails = env::var("AUTHORIZED_MAILS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let log_dir = env::var("LOG_DIR").ok().filter(|s| !s.is_empty());
        let log_file = env::var("LOG_FILE").unwrap_or_else(|_| "events.log".to_string());
        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_privacy_mode = env_bool("LOG_PRIVACY_MODE", false)?;

        Ok(Config {
            api_port,
            api_listen,
            load_model_on_startup,
            unload_model_after_s,
            use_gpu_if_available,
            max_model,
            cpu_fallback_model,
            develop_mode,
            delete_results_after_m,
            refresh_expiration_time_on_usage,
            run_result_expiry_check_m,
            max_task_queue_size,
            authorized_mails,
            log_dir,
            log_file,
            log_level,
            log_privacy_mode,
        })
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: &str) -> Result<T> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .map_err(|_| WApiError::ConfigError(format!("{key} invalid: {raw}")))
}

fn env_bool(key: &str, default: bool) -> Result<bool> {
    match env::var(key) {
        Err(_) => Ok(default),
        Ok(v) => match v.trim() {
            "1" | "true" | "True" | "TRUE" => Ok(true),
            "0" | "false" | "False" | "FALSE" => Ok(false),
            other => Err(WApiError::ConfigError(format!("{key} invalid bool: {other}"))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_are_sane() {
        let _guard = ENV_LOCK.lock().unwrap();
        for key in [
            "API_PORT",
            "UNLOAD_MODEL_AFTER_S",
            "MAX_MODEL",
            "CPU_FALLBACK_MODEL",
            "DELETE_RESULTS_AFTER_M",
        ] {
            unsafe { env::remove_var(key) };
        }
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.api_port, 3001);
        assert!(cfg.unload_model_after_s.is_none());
        assert_eq!(cfg.cpu_fallback_model, ModelSize::Base);
    }

    #[test]
    fn zero_unload_after_s_is_disabled() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { env::set_var("UNLOAD_MODEL_AFTER_S", "0") };
        let cfg = Config::from_env().unwrap();
        assert!(cfg.unload_model_after_s.is_none());
        unsafe { env::remove_var("UNLOAD_MODEL_AFTER_S") };
    }

    #[test]
    fn non_positive_ttl_is_config_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { env::set_var("DELETE_RESULTS_AFTER_M", "0") };
        assert!(Config::from_env().is_err());
        unsafe { env::remove_var("DELETE_RESULTS_AFTER_M") };
    }
}
