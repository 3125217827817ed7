//! Content-addressed compiled-program cache with per-entry clone pools.
//!
//! The cache maps a 64-bit fingerprint of transpiled script source to a
//! compiled base program and a pool of idle execution instances. Requests
//! with byte-identical source share one compilation for the life of the
//! entry; each request gets its own instance, so concurrent executions never
//! share mutable state.
//!
//! Locking contract: lookups of existing entries take the shared side of one
//! `RwLock`; compiling a *new* fingerprint takes the exclusive side, which
//! makes first-time compilation mutually exclusive with all other cache
//! access. The map is re-checked under the exclusive lock before compiling,
//! so N callers racing on the same unseen source compile it exactly once.
//!
//! Growth is bounded: past `capacity` entries, the least-recently-acquired
//! entry is evicted. Instances of an evicted entry that are still leased out
//! keep the entry alive through their `Arc` and drain when they are dropped.

use scriba_engine::{CompileError, Instance, Program, ScriptEngine};
use std::collections::HashMap;
use std::hash::Hasher;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use twox_hash::XxHash64;

/// Fingerprint → compiled program + idle-instance pool.
#[derive(Clone)]
pub struct ProgramCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    engine: Arc<dyn ScriptEngine>,
    /// Complete global-name set declared on every compile context: core
    /// names plus every registered extension's names. Fixed at construction
    /// because names cannot be added to an already-compiled program.
    declared: Vec<String>,
    capacity: usize,
    entries: RwLock<HashMap<u64, Arc<CacheEntry>>>,
    /// Monotonic acquire stamp used for least-recently-acquired eviction.
    clock: AtomicU64,
}

struct CacheEntry {
    program: Arc<dyn Program>,
    idle: Mutex<Vec<Box<dyn Instance>>>,
    last_used: AtomicU64,
}

impl ProgramCache {
    pub fn new(engine: Arc<dyn ScriptEngine>, declared: Vec<String>, capacity: usize) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                engine,
                declared,
                capacity: capacity.max(1),
                entries: RwLock::new(HashMap::new()),
                clock: AtomicU64::new(0),
            }),
        }
    }

    /// 64-bit content hash of script source; the cache key.
    pub fn fingerprint(source: &[u8]) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(source);
        hasher.finish()
    }

    /// Borrow an execution instance for `source`, compiling it first if this
    /// fingerprint has never been seen.
    ///
    /// Dropping the returned [`Lease`] resets the instance and returns it to
    /// its entry's pool; that is the release half of the borrow and it runs
    /// on every exit path.
    pub fn acquire(&self, source: &[u8]) -> Result<Lease, CompileError> {
        let fingerprint = Self::fingerprint(source);

        {
            let entries = self.inner.entries.read().expect("cache lock poisoned");
            if let Some(entry) = entries.get(&fingerprint) {
                let entry = Arc::clone(entry);
                drop(entries);
                return Ok(self.lease(fingerprint, entry));
            }
        }

        let mut entries = self.inner.entries.write().expect("cache lock poisoned");
        // Double-checked: someone may have compiled this fingerprint between
        // the read unlock and the write lock.
        if let Some(entry) = entries.get(&fingerprint) {
            let entry = Arc::clone(entry);
            drop(entries);
            return Ok(self.lease(fingerprint, entry));
        }

        let mut compiler = self.inner.engine.compiler();
        for name in &self.inner.declared {
            compiler.declare_global(name);
        }
        let program = compiler.compile(source)?;

        if entries.len() >= self.inner.capacity {
            evict_least_recent(&mut entries);
        }

        let entry = Arc::new(CacheEntry {
            program,
            idle: Mutex::new(Vec::new()),
            last_used: AtomicU64::new(0),
        });
        entries.insert(fingerprint, Arc::clone(&entry));
        drop(entries);

        tracing::debug!(fingerprint, "compiled and cached new program");
        Ok(self.lease(fingerprint, entry))
    }

    fn lease(&self, fingerprint: u64, entry: Arc<CacheEntry>) -> Lease {
        let stamp = self.inner.clock.fetch_add(1, Ordering::Relaxed) + 1;
        entry.last_used.store(stamp, Ordering::Relaxed);

        let pooled = entry.idle.lock().expect("pool lock poisoned").pop();
        let instance = pooled.unwrap_or_else(|| entry.program.new_instance());
        Lease {
            fingerprint,
            entry,
            instance: Some(instance),
        }
    }

    /// Number of cached fingerprints.
    pub fn len(&self) -> usize {
        self.inner.entries.read().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `fingerprint` currently has a cache entry.
    pub fn contains(&self, fingerprint: u64) -> bool {
        self.inner
            .entries
            .read()
            .expect("cache lock poisoned")
            .contains_key(&fingerprint)
    }
}

fn evict_least_recent(entries: &mut HashMap<u64, Arc<CacheEntry>>) {
    let oldest = entries
        .iter()
        .min_by_key(|(_, entry)| entry.last_used.load(Ordering::Relaxed))
        .map(|(fingerprint, _)| *fingerprint);
    if let Some(fingerprint) = oldest {
        entries.remove(&fingerprint);
        tracing::debug!(fingerprint, "evicted least-recently-used program");
    }
}

/// A borrowed execution instance.
///
/// Dereferences to the instance; dropping it returns the instance to the
/// pool it came from, reset, exactly once.
pub struct Lease {
    fingerprint: u64,
    entry: Arc<CacheEntry>,
    instance: Option<Box<dyn Instance>>,
}

impl Lease {
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }
}

impl Deref for Lease {
    type Target = dyn Instance;

    fn deref(&self) -> &Self::Target {
        self.instance
            .as_deref()
            .expect("instance present until drop")
    }
}

impl DerefMut for Lease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.instance
            .as_deref_mut()
            .expect("instance present until drop")
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(mut instance) = self.instance.take() {
            instance.reset();
            self.entry
                .idle
                .lock()
                .expect("pool lock poisoned")
                .push(instance);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriba_engine::{Compiler, Interpreter, Value};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;

    /// Engine wrapper counting compilations and instantiations.
    struct CountingEngine {
        inner: Interpreter,
        compiles: Arc<AtomicUsize>,
        instances: Arc<AtomicUsize>,
    }

    struct CountingCompiler {
        inner: Box<dyn Compiler>,
        compiles: Arc<AtomicUsize>,
        instances: Arc<AtomicUsize>,
    }

    struct CountingProgram {
        inner: Arc<dyn Program>,
        instances: Arc<AtomicUsize>,
    }

    impl CountingEngine {
        fn new() -> (Arc<Self>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
            let compiles = Arc::new(AtomicUsize::new(0));
            let instances = Arc::new(AtomicUsize::new(0));
            let engine = Arc::new(Self {
                inner: Interpreter::new(),
                compiles: Arc::clone(&compiles),
                instances: Arc::clone(&instances),
            });
            (engine, compiles, instances)
        }
    }

    impl ScriptEngine for CountingEngine {
        fn compiler(&self) -> Box<dyn Compiler> {
            Box::new(CountingCompiler {
                inner: self.inner.compiler(),
                compiles: Arc::clone(&self.compiles),
                instances: Arc::clone(&self.instances),
            })
        }
    }

    impl Compiler for CountingCompiler {
        fn declare_global(&mut self, name: &str) {
            self.inner.declare_global(name);
        }

        fn compile(
            self: Box<Self>,
            source: &[u8],
        ) -> Result<Arc<dyn Program>, CompileError> {
            self.compiles.fetch_add(1, Ordering::SeqCst);
            let inner = self.inner.compile(source)?;
            Ok(Arc::new(CountingProgram {
                inner,
                instances: self.instances,
            }))
        }
    }

    impl Program for CountingProgram {
        fn new_instance(&self) -> Box<dyn Instance> {
            self.instances.fetch_add(1, Ordering::SeqCst);
            self.inner.new_instance()
        }
    }

    fn counting_cache(capacity: usize) -> (ProgramCache, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let (engine, compiles, instances) = CountingEngine::new();
        let cache = ProgramCache::new(
            engine,
            vec!["write".to_string(), "who".to_string()],
            capacity,
        );
        (cache, compiles, instances)
    }

    #[test]
    fn identical_source_shares_one_fingerprint_and_compile() {
        let (cache, compiles, _) = counting_cache(16);
        let a = cache.acquire(b"write(\"x\")").unwrap();
        let fp = a.fingerprint();
        drop(a);
        let b = cache.acquire(b"write(\"x\")").unwrap();
        assert_eq!(b.fingerprint(), fp);
        assert_eq!(compiles.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn distinct_source_gets_distinct_fingerprints() {
        let (cache, compiles, _) = counting_cache(16);
        let a = cache.acquire(b"write(1)").unwrap();
        let b = cache.acquire(b"write(2)").unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(compiles.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_first_acquires_compile_exactly_once() {
        let (cache, compiles, _) = counting_cache(16);
        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let cache = cache.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    let lease = cache.acquire(b"write(\"race\")").unwrap();
                    lease.fingerprint()
                })
            })
            .collect();

        let fingerprints: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(fingerprints.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(compiles.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pool_reuses_released_instances() {
        let (cache, _, instances) = counting_cache(16);
        for _ in 0..5 {
            let lease = cache.acquire(b"write(\"pooled\")").unwrap();
            drop(lease);
        }
        // Serial acquire/release keeps reusing the single pooled instance.
        assert_eq!(instances.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn overlapping_leases_get_distinct_instances() {
        let (cache, _, instances) = counting_cache(16);
        let a = cache.acquire(b"write(who)").unwrap();
        let b = cache.acquire(b"write(who)").unwrap();
        assert_eq!(instances.load(Ordering::SeqCst), 2);
        drop(a);
        drop(b);
        let _c = cache.acquire(b"write(who)").unwrap();
        assert_eq!(instances.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn released_instances_carry_no_prior_bindings() {
        let (cache, _, _) = counting_cache(16);

        let mut lease = cache.acquire(b"write(\"[\", who, \"]\")").unwrap();
        lease.bind_global("who", Value::from("first")).unwrap();
        let fp = lease.fingerprint();
        drop(lease);

        // Same pooled instance; the prior binding must be gone.
        let mut lease = cache.acquire(b"write(\"[\", who, \"]\")").unwrap();
        assert_eq!(lease.fingerprint(), fp);
        let out = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&out);
        lease
            .bind_global(
                "write",
                Value::native(move |args| {
                    let mut buf = sink.lock().unwrap();
                    for arg in args {
                        buf.extend_from_slice(&arg.display_bytes());
                    }
                    Ok(Value::Null)
                }),
            )
            .unwrap();
        lease.run().unwrap();
        assert_eq!(&*out.lock().unwrap(), b"[]");
    }

    #[test]
    fn compile_failure_inserts_nothing() {
        let (cache, compiles, _) = counting_cache(16);
        assert!(cache.acquire(b"write(").is_err());
        assert!(cache.is_empty());
        // Not cached, so the same bad source compiles (and fails) again.
        assert!(cache.acquire(b"write(").is_err());
        assert_eq!(compiles.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn capacity_evicts_least_recently_acquired() {
        let (cache, compiles, _) = counting_cache(2);
        let fp_a = cache.acquire(b"write(\"a\")").unwrap().fingerprint();
        let fp_b = cache.acquire(b"write(\"b\")").unwrap().fingerprint();

        // Touch a so b becomes the eviction candidate.
        drop(cache.acquire(b"write(\"a\")").unwrap());

        let fp_c = cache.acquire(b"write(\"c\")").unwrap().fingerprint();
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(fp_a));
        assert!(!cache.contains(fp_b));
        assert!(cache.contains(fp_c));

        // Re-acquiring the evicted source recompiles it.
        let before = compiles.load(Ordering::SeqCst);
        drop(cache.acquire(b"write(\"b\")").unwrap());
        assert_eq!(compiles.load(Ordering::SeqCst), before + 1);
    }

    #[test]
    fn in_flight_lease_survives_eviction_of_its_entry() {
        let (cache, _, _) = counting_cache(1);
        let mut lease = cache.acquire(b"write(\"held\")").unwrap();

        // Evict the held entry by inserting another fingerprint.
        drop(cache.acquire(b"write(\"other\")").unwrap());
        assert!(!cache.contains(lease.fingerprint()));

        // The lease still works and dropping it is harmless.
        let out = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&out);
        lease
            .bind_global(
                "write",
                Value::native(move |args| {
                    let mut buf = sink.lock().unwrap();
                    for arg in args {
                        buf.extend_from_slice(&arg.display_bytes());
                    }
                    Ok(Value::Null)
                }),
            )
            .unwrap();
        lease.run().unwrap();
        drop(lease);
        assert_eq!(&*out.lock().unwrap(), b"held");
    }

    #[test]
    fn declared_names_reach_the_compiler() {
        // `who` is declared cache-wide, so binding it succeeds on any program.
        let (cache, _, _) = counting_cache(16);
        let mut lease = cache.acquire(b"").unwrap();
        assert!(lease.bind_global("who", Value::Int(1)).is_ok());
        assert!(lease.bind_global("undeclared", Value::Int(1)).is_err());
    }
}
