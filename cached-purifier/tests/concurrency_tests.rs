// cached-purifier/tests/concurrency_tests.rs
//! Concurrent first-time computations, with and without miss coalescing, and
//! the tokio bridge.

use anyhow::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

use cached_purifier::{
    CacheStore, CachedPurifier, MemoryStore, PurifierOptions, RegexSanitizer, RuleConfig, Sanitizer,
};

/// Slow enough that concurrent callers overlap.
#[derive(Default)]
struct SlowSanitizer {
    calls: AtomicUsize,
}

impl Sanitizer for SlowSanitizer {
    fn sanitize(&self, input: &str, config: &RuleConfig) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(100));
        RegexSanitizer.sanitize(input, config)
    }
}

fn run_concurrently(purifier: &Arc<CachedPurifier>, threads: usize, input: &'static str) -> Vec<String> {
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let purifier = Arc::clone(purifier);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                purifier.purify(input, None)
            })
        })
        .collect();

    handles
        .into_iter()
        .map(|h| h.join().expect("worker panicked").expect("purify failed"))
        .collect()
}

#[test]
fn coalesced_misses_sanitize_once() -> Result<()> {
    let dir = tempdir()?;
    let sanitizer = Arc::new(SlowSanitizer::default());
    let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
    let options = PurifierOptions {
        cache_path: Some(dir.path().to_path_buf()),
        coalesce_misses: true,
        ..Default::default()
    };
    let purifier = Arc::new(CachedPurifier::new(options, sanitizer.clone(), Some(store))?);

    let outputs = run_concurrently(&purifier, 8, "<script>alert(1)</script><b>hi</b>");
    assert!(outputs.iter().all(|o| o == "<b>hi</b>"));
    assert_eq!(sanitizer.calls.load(Ordering::SeqCst), 1);

    let stats = purifier.stats();
    assert_eq!(stats.sanitizations, 1);
    assert_eq!(stats.population_failures, 0);
    // One outcome per request.
    assert_eq!(stats.hits + stats.misses, 8);
    assert!(stats.misses >= 1);
    assert!(stats.coalesced_waits <= 7);
    Ok(())
}

/// Fails its first call, after giving other callers time to queue up.
#[derive(Default)]
struct FailsFirstSanitizer {
    calls: AtomicUsize,
}

impl Sanitizer for FailsFirstSanitizer {
    fn sanitize(&self, input: &str, config: &RuleConfig) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(100));
        if call == 0 {
            anyhow::bail!("parser crashed");
        }
        RegexSanitizer.sanitize(input, config)
    }
}

#[test]
fn waiters_take_over_when_leader_fails() -> Result<()> {
    let dir = tempdir()?;
    let sanitizer = Arc::new(FailsFirstSanitizer::default());
    let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
    let options = PurifierOptions {
        cache_path: Some(dir.path().to_path_buf()),
        coalesce_misses: true,
        ..Default::default()
    };
    let purifier = Arc::new(CachedPurifier::new(options, sanitizer.clone(), Some(store))?);

    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let purifier = Arc::clone(&purifier);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                purifier.purify("<script>x</script><p>ok</p>", None)
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().expect("worker panicked")).collect();

    let failures: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].to_string().contains("parser crashed"));
    assert!(results.iter().filter_map(|r| r.as_ref().ok()).all(|o| o == "<p>ok</p>"));

    // The failed leader plus exactly one successor.
    assert_eq!(sanitizer.calls.load(Ordering::SeqCst), 2);
    let stats = purifier.stats();
    assert_eq!(stats.sanitizations, 2);
    assert_eq!(stats.hits + stats.misses, 4);
    Ok(())
}

#[test]
fn uncoalesced_misses_may_repeat_work_but_agree() -> Result<()> {
    let dir = tempdir()?;
    let sanitizer = Arc::new(SlowSanitizer::default());
    let store = Arc::new(MemoryStore::new());
    let options = PurifierOptions {
        cache_path: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    let purifier = Arc::new(CachedPurifier::new(options, sanitizer.clone(), Some(store.clone()))?);

    let outputs = run_concurrently(&purifier, 6, "<b onclick=\"x()\">hi</b>");
    assert!(outputs.iter().all(|o| o == "<b>hi</b>"));
    let calls = sanitizer.calls.load(Ordering::SeqCst);
    assert!((1..=6).contains(&calls));
    assert_eq!(store.len(), 1);

    // Once populated, no more work.
    purifier.purify("<b onclick=\"x()\">hi</b>", None)?;
    assert_eq!(sanitizer.calls.load(Ordering::SeqCst), calls);
    Ok(())
}

#[test]
fn coalescing_is_per_key() -> Result<()> {
    let dir = tempdir()?;
    let sanitizer = Arc::new(SlowSanitizer::default());
    let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
    let options = PurifierOptions {
        cache_path: Some(dir.path().to_path_buf()),
        coalesce_misses: true,
        ..Default::default()
    };
    let purifier = Arc::new(CachedPurifier::new(options, sanitizer.clone(), Some(store))?);

    let a = {
        let purifier = Arc::clone(&purifier);
        thread::spawn(move || purifier.purify("<i>a</i>", None))
    };
    let b = {
        let purifier = Arc::clone(&purifier);
        thread::spawn(move || purifier.purify("<i>b</i>", None))
    };
    assert_eq!(a.join().expect("worker panicked")?, "<i>a</i>");
    assert_eq!(b.join().expect("worker panicked")?, "<i>b</i>");
    assert_eq!(sanitizer.calls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn spawn_purify_runs_on_blocking_pool() -> Result<()> {
    let dir = tempdir()?;
    let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
    let options = PurifierOptions {
        cache_path: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    let purifier = Arc::new(CachedPurifier::new(options, Arc::new(RegexSanitizer::new()), Some(store))?);

    let first = purifier.spawn_purify("<script>x</script>ok".to_string(), None).await??;
    let second = purifier.spawn_purify("<script>x</script>ok".to_string(), None).await??;
    assert_eq!(first, "ok");
    assert_eq!(second, "ok");
    assert_eq!(purifier.stats().hits, 1);
    Ok(())
}
