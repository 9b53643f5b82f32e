//! Per-device module cache with single-flight loading.
//!
//! Each device id owns a slot. The map lock is held only long enough to find
//! or create the slot; the expensive compile + load then runs under the
//! slot's own lock, so loads for different devices proceed in parallel while
//! concurrent callers for the same device wait for one load and share its
//! result.
//!
//! ```text
//! absent ──get_module──▶ loading ──ok──▶ present ──clear──▶ absent
//!                           │
//!                           └──err──▶ absent (next caller retries)
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::types::DeviceId;

/// Produces the module for a device on a cache miss.
pub trait ModuleProvider: Send + Sync {
    /// Module type stored in the cache.
    type Module: Send + Sync;

    /// Number of valid device ids; ids at or above this are rejected.
    fn device_count(&self) -> Result<usize>;

    /// Compiles and loads the module for `device`.
    fn provide(&self, device: DeviceId) -> Result<Self::Module>;
}

impl<P: ModuleProvider + ?Sized> ModuleProvider for Arc<P> {
    type Module = P::Module;

    fn device_count(&self) -> Result<usize> {
        (**self).device_count()
    }

    fn provide(&self, device: DeviceId) -> Result<Self::Module> {
        (**self).provide(device)
    }
}

type Slot<M> = Arc<Mutex<Option<Arc<M>>>>;

/// Statistics for the module cache.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Lookups served from a present entry.
    pub hits: AtomicU64,
    /// Loads performed (one per absent-to-present transition).
    pub loads: AtomicU64,
    /// Loads that failed.
    pub failures: AtomicU64,
    /// Entries removed by `clear`/`clear_all`.
    pub evictions: AtomicU64,
}

impl CacheStats {
    /// Hit count.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Load count.
    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Failed load count.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Eviction count.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

/// Lazily populated map from device id to loaded module.
///
/// Modules are handed out as `Arc`s; repeated lookups return the same
/// allocation until the entry is cleared. Module resources are released when
/// the last `Arc` is dropped.
pub struct DeviceModuleCache<P: ModuleProvider> {
    provider: P,
    slots: Mutex<HashMap<DeviceId, Slot<P::Module>>>,
    stats: CacheStats,
}

impl<P: ModuleProvider> DeviceModuleCache<P> {
    /// Creates an empty cache over `provider`.
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            slots: Mutex::new(HashMap::new()),
            stats: CacheStats::default(),
        }
    }

    /// The module provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Returns the module for a raw device id, loading it on first use.
    ///
    /// Negative ids and ids beyond the provider's device count fail with
    /// [`crate::JitError::InvalidDevice`] before any load is attempted.
    pub fn get_module(&self, id: i64) -> Result<Arc<P::Module>> {
        let available = self.provider.device_count()?;
        let device = DeviceId::try_from_raw(id, available)?;
        self.get(device)
    }

    /// Returns the module for a validated device id, loading it on first use.
    pub fn get(&self, device: DeviceId) -> Result<Arc<P::Module>> {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(device).or_default())
        };

        let mut entry = slot.lock();
        if let Some(module) = entry.as_ref() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(module));
        }

        tracing::debug!(device = %device, "Module cache miss, loading");
        let module = match self.provider.provide(device) {
            Ok(module) => Arc::new(module),
            Err(e) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(device = %device, error = %e, "Module load failed");
                return Err(e);
            }
        };
        *entry = Some(Arc::clone(&module));
        self.stats.loads.fetch_add(1, Ordering::Relaxed);
        tracing::info!(device = %device, "Module loaded");

        Ok(module)
    }

    /// True when a module is present for `device`.
    pub fn contains(&self, device: DeviceId) -> bool {
        let slot = self.slots.lock().get(&device).cloned();
        slot.as_ref().is_some_and(|s| s.lock().is_some())
    }

    /// Number of present entries.
    pub fn len(&self) -> usize {
        let slots: Vec<_> = self.slots.lock().values().cloned().collect();
        slots.iter().filter(|s| s.lock().is_some()).count()
    }

    /// True when no module is present.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evicts the entry for `device`. Returns whether a module was present.
    ///
    /// A later lookup for the same device loads again. The slot itself stays
    /// in the map; a clear that races an in-flight load waits for it.
    pub fn clear(&self, device: DeviceId) -> bool {
        let slot = self.slots.lock().get(&device).cloned();
        let evicted = slot.as_ref().is_some_and(|s| s.lock().take().is_some());
        if evicted {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(device = %device, "Module evicted");
        }
        evicted
    }

    /// Evicts every entry. Returns the number of modules removed.
    pub fn clear_all(&self) -> usize {
        let slots: Vec<_> = self.slots.lock().values().cloned().collect();
        let evicted = slots.iter().filter(|s| s.lock().take().is_some()).count();
        self.stats
            .evictions
            .fetch_add(evicted as u64, Ordering::Relaxed);
        tracing::debug!(count = evicted, "Module cache cleared");
        evicted
    }
}

impl<P: ModuleProvider> fmt::Debug for DeviceModuleCache<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceModuleCache")
            .field("entries", &self.len())
            .field("loads", &self.stats.loads())
            .field("hits", &self.stats.hits())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JitError;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    /// Provider that counts loads and sleeps to widen race windows.
    struct CountingProvider {
        devices: usize,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
        fail_first: bool,
    }

    impl CountingProvider {
        fn new(devices: usize) -> Self {
            Self {
                devices,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                delay: Duration::ZERO,
                fail_first: false,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Most loads ever running at once.
        fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    impl ModuleProvider for CountingProvider {
        type Module = (DeviceId, usize);

        fn device_count(&self) -> Result<usize> {
            Ok(self.devices)
        }

        fn provide(&self, device: DeviceId) -> Result<Self::Module> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            thread::sleep(self.delay);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail_first && n == 0 {
                return Err(JitError::Backend("transient".to_string()));
            }
            Ok((device, n))
        }
    }

    #[test]
    fn test_repeated_lookup_is_reference_stable() {
        let cache = DeviceModuleCache::new(CountingProvider::new(2));
        let a = cache.get_module(0).unwrap();
        let b = cache.get_module(0).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.provider().calls(), 1);
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().loads(), 1);
    }

    #[test]
    fn test_devices_have_separate_entries() {
        let cache = DeviceModuleCache::new(CountingProvider::new(2));
        let a = cache.get_module(0).unwrap();
        let b = cache.get_module(1).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(b.0, DeviceId::new(1));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_invalid_ids_never_load() {
        let cache = DeviceModuleCache::new(CountingProvider::new(1));
        assert!(matches!(
            cache.get_module(-1),
            Err(JitError::InvalidDevice { id: -1, .. })
        ));
        assert!(matches!(
            cache.get_module(1),
            Err(JitError::InvalidDevice { id: 1, available: 1 })
        ));
        assert_eq!(cache.provider().calls(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_first_access_loads_once() {
        let mut provider = CountingProvider::new(1);
        provider.delay = Duration::from_millis(50);
        let cache = Arc::new(DeviceModuleCache::new(provider));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.get_module(0).unwrap()
                })
            })
            .collect();

        let modules: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(cache.provider().calls(), 1);
        assert!(modules.iter().all(|m| Arc::ptr_eq(m, &modules[0])));
    }

    #[test]
    fn test_clear_forces_reload() {
        let cache = DeviceModuleCache::new(CountingProvider::new(1));
        let first = cache.get_module(0).unwrap();
        assert!(cache.clear(DeviceId::new(0)));
        assert!(!cache.contains(DeviceId::new(0)));

        let second = cache.get_module(0).unwrap();
        assert_eq!(cache.provider().calls(), 2);
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.1, 1);
        assert_eq!(cache.stats().evictions(), 1);
    }

    #[test]
    fn test_clear_absent_entry() {
        let cache = DeviceModuleCache::new(CountingProvider::new(1));
        assert!(!cache.clear(DeviceId::new(0)));
        assert_eq!(cache.stats().evictions(), 0);
    }

    #[test]
    fn test_clear_all() {
        let cache = DeviceModuleCache::new(CountingProvider::new(3));
        for id in 0..3 {
            cache.get_module(id).unwrap();
        }
        assert_eq!(cache.clear_all(), 3);
        assert!(cache.is_empty());
        cache.get_module(2).unwrap();
        assert_eq!(cache.provider().calls(), 4);
    }

    #[test]
    fn test_failed_load_leaves_entry_absent() {
        let mut provider = CountingProvider::new(1);
        provider.fail_first = true;
        let cache = DeviceModuleCache::new(provider);

        assert!(cache.get_module(0).is_err());
        assert!(!cache.contains(DeviceId::new(0)));
        assert_eq!(cache.stats().failures(), 1);

        assert!(cache.get_module(0).is_ok());
        assert_eq!(cache.provider().calls(), 2);
    }

    #[test]
    fn test_clear_during_load_keeps_single_flight() {
        let mut provider = CountingProvider::new(1);
        provider.delay = Duration::from_millis(200);
        let cache = Arc::new(DeviceModuleCache::new(provider));
        let device = DeviceId::new(0);

        let loader = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get(device).unwrap())
        };
        thread::sleep(Duration::from_millis(40));

        let clearer = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.clear(device))
        };
        thread::sleep(Duration::from_millis(40));

        let late = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get(device).unwrap())
        };

        let first = loader.join().unwrap();
        assert!(clearer.join().unwrap());
        let second = late.join().unwrap();

        assert_eq!(cache.provider().peak(), 1);
        assert_eq!(first.1, 0);
        // The late lookup either shared the first module or reloaded after the clear.
        assert!(Arc::ptr_eq(&first, &second) || second.1 == 1);
        assert_eq!(cache.stats().evictions(), 1);
    }

    #[test]
    fn test_lookup_after_clear_all_reuses_slot() {
        let cache = DeviceModuleCache::new(CountingProvider::new(1));
        cache.get_module(0).unwrap();
        assert_eq!(cache.clear_all(), 1);
        assert_eq!(cache.clear_all(), 0);
        assert!(!cache.contains(DeviceId::new(0)));

        let reloaded = cache.get_module(0).unwrap();
        assert_eq!(reloaded.1, 1);
        assert_eq!(cache.len(), 1);
    }
}
