//! A keyed store that evicts entries after a configurable inactivity window.
//!
//! Grounded in `original_source/src/whisper_api/data_models/temp_dict.py`'s
//! `TempDict`: a single lock serializes every access, every externally
//! visible operation sweeps first, and an
//! optional background thread sweeps on an interval in addition.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use wapi_common::{Result, WApiError};

struct Entry<V> {
    stamped_at: Instant,
    value: V,
}

struct Shared<K, V> {
    data: Mutex<HashMap<K, Entry<V>>>,
    ttl: Duration,
    refresh_on_access: bool,
    stop: AtomicBool,
}

/// TTL-backed map. Cloning shares the underlying store (it's an `Arc`
/// internally), matching how the coordinator and HTTP handlers both need a
/// handle to the same registry.
pub struct TtlRegistry<K, V> {
    shared: Arc<Shared<K, V>>,
}

impl<K, V> Clone for TtlRegistry<K, V> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<K, V> TtlRegistry<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// `ttl_m`: inactivity window in minutes, must be > 0.
    /// `gc_interval_s`: if set, spawns a background sweeper thread.
    pub fn new(ttl_m: i64, refresh_on_access: bool, gc_interval_s: Option<i64>) -> Result<Self> {
        if ttl_m <= 0 {
            return Err(WApiError::ConfigError("ttl must be > 0".to_string()));
        }

        let shared = Arc::new(Shared {
            data: Mutex::new(HashMap::new()),
            ttl: Duration::from_secs((ttl_m * 60) as u64),
            refresh_on_access,
            stop: AtomicBool::new(false),
        });

        if let Some(interval_s) = gc_interval_s {
            if interval_s > 0 {
                let bg = Arc::clone(&shared);
                thread::Builder::new()
                    .name("ttl-registry-sweeper".to_string())
                    .spawn(move || {
                        let interval = Duration::from_secs(interval_s as u64);
                        while !bg.stop.load(Ordering::Relaxed) {
                            thread::sleep(interval);
                            sweep_shared(&bg);
                        }
                    })
                    .expect("failed to spawn sweeper thread");
            }
        }

        Ok(Self { shared })
    }

    pub fn put(&self, id: K, value: V) {
        let mut data = self.shared.data.lock();
        sweep_locked(&mut data, self.shared.ttl);
        data.insert(id, Entry { stamped_at: Instant::now(), value });
    }

    /// Sweeps before reading. Refreshes the
    /// entry's stamp on a hit when configured for refresh-on-access.
    pub fn get(&self, id: &K) -> Option<V> {
        let mut data = self.shared.data.lock();
        sweep_locked(&mut data, self.shared.ttl);
        let entry = data.get_mut(id)?;
        if self.shared.refresh_on_access {
            entry.stamped_at = Instant::now();
        }
        Some(entry.value.clone())
    }

    pub fn delete(&self, id: &K) {
        let mut data = self.shared.data.lock();
        sweep_locked(&mut data, self.shared.ttl);
        data.remove(id);
    }

    pub fn sweep(&self) {
        sweep_shared(&self.shared);
    }

    pub fn len(&self) -> usize {
        let mut data = self.shared.data.lock();
        sweep_locked(&mut data, self.shared.ttl);
        data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A post-sweep copy of all live entries.
    pub fn snapshot(&self) -> HashMap<K, V> {
        let mut data = self.shared.data.lock();
        sweep_locked(&mut data, self.shared.ttl);
        data.iter().map(|(k, e)| (k.clone(), e.value.clone())).collect()
    }
}

impl<K, V> Drop for TtlRegistry<K, V> {
    fn drop(&mut self) {
        // `drop` runs before this handle's own strong count is released, so
        // a count of 1 here means this is the last live clone; stopping the
        // sweeper on any earlier clone's drop would starve the others.
        if Arc::strong_count(&self.shared) == 1 {
            self.shared.stop.store(true, Ordering::Relaxed);
        }
    }
}

fn sweep_shared<K, V>(shared: &Shared<K, V>)
where
    K: Hash + Eq + Clone,
{
    let mut data = shared.data.lock();
    sweep_locked(&mut data, shared.ttl);
}

fn sweep_locked<K, V>(data: &mut HashMap<K, Entry<V>>, ttl: Duration)
where
    K: Hash + Eq + Clone,
{
    let now = Instant::now();
    data.retain(|_, entry| now.duration_since(entry.stamped_at) <= ttl);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[test]
    fn put_then_get_before_ttl() {
        let reg: TtlRegistry<String, i32> = TtlRegistry::new(30, true, None).unwrap();
        reg.put("a".to_string(), 1);
        assert_eq!(reg.get(&"a".to_string()), Some(1));
    }

    #[test]
    fn non_positive_ttl_is_config_error() {
        let result: Result<TtlRegistry<String, i32>> = TtlRegistry::new(0, true, None);
        assert!(result.is_err());
    }

    #[test]
    fn delete_removes_entry() {
        let reg: TtlRegistry<String, i32> = TtlRegistry::new(30, true, None).unwrap();
        reg.put("a".to_string(), 1);
        reg.delete(&"a".to_string());
        assert_eq!(reg.get(&"a".to_string()), None);
    }

    #[test]
    fn sweep_evicts_expired_entries() {
        // Reach into the internals indirectly via a tiny ttl by constructing
        // with a sub-minute effective ttl isn't possible (ttl is minutes),
        // so we simulate expiry by manually invoking sweep after mutating
        // the clock isn't possible either; instead assert sweep is a no-op
        // on live data and doesn't panic.
        let reg: TtlRegistry<String, i32> = TtlRegistry::new(30, true, None).unwrap();
        reg.put("a".to_string(), 1);
        reg.sweep();
        assert_eq!(reg.len(), 1);
        let _ = StdDuration::from_secs(0);
    }

    #[test]
    fn clone_shares_storage() {
        let reg: TtlRegistry<String, i32> = TtlRegistry::new(30, true, None).unwrap();
        let reg2 = reg.clone();
        reg.put("a".to_string(), 1);
        assert_eq!(reg2.get(&"a".to_string()), Some(1));
    }

    #[test]
    fn dropping_one_clone_leaves_other_handles_usable() {
        let reg: TtlRegistry<String, i32> = TtlRegistry::new(30, true, Some(60)).unwrap();
        let reg2 = reg.clone();
        drop(reg);
        reg2.put("a".to_string(), 1);
        assert_eq!(reg2.get(&"a".to_string()), Some(1));
        assert_eq!(Arc::strong_count(&reg2.shared), 1);
    }
}
