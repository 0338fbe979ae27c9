//! Per-thread context tags for the native host.
//!
//! Tags set here are read by the profiling signal handler on the same thread.
//! Writers raise a busy flag for the duration of every mutation; a sample that
//! lands inside a mutation sees the flag and skips user tags for that sample.
//!
//! ```
//! stackprof::tag::with([("request", "checkout")], || {
//!     assert_eq!(stackprof::tag::check()["request"], "checkout");
//! });
//! assert!(stackprof::tag::check().is_empty());
//! ```

use crate::host::TagLookup;
use std::cell::{Cell, UnsafeCell};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering, compiler_fence};

struct TagStore {
    busy: AtomicBool,
    entries: UnsafeCell<Vec<(String, String)>>,
}

impl TagStore {
    const fn new() -> Self {
        TagStore {
            busy: AtomicBool::new(false),
            entries: UnsafeCell::new(Vec::new()),
        }
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut Vec<(String, String)>) -> R) -> R {
        self.busy.store(true, Ordering::Relaxed);
        compiler_fence(Ordering::SeqCst);
        // SAFETY: only the owning thread mutates; the signal handler checks
        // `busy` before reading
        let out = f(unsafe { &mut *self.entries.get() });
        compiler_fence(Ordering::SeqCst);
        self.busy.store(false, Ordering::Relaxed);
        out
    }

    fn snapshot(&self) -> Vec<(String, String)> {
        // SAFETY: no mutation is in progress on this thread
        unsafe { (*self.entries.get()).clone() }
    }
}

thread_local! {
    static TAGS: TagStore = const { TagStore::new() };
    // Set once TAGS has been touched, so the handler never triggers its
    // lazy destructor registration
    static READY: Cell<bool> = const { Cell::new(false) };
}

fn with_store<R>(f: impl FnOnce(&TagStore) -> R) -> R {
    TAGS.with(|store| {
        READY.with(|ready| ready.set(true));
        f(store)
    })
}

/// Merge tags into the current thread's set
pub fn set<I, K, V>(tags: I)
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: ToString,
{
    let tags: Vec<(String, String)> = tags
        .into_iter()
        .map(|(k, v)| (k.into(), v.to_string()))
        .collect();
    with_store(|store| {
        store.mutate(|entries| {
            for (key, value) in tags {
                match entries.iter_mut().find(|(k, _)| *k == key) {
                    Some(entry) => entry.1 = value,
                    None => entries.push((key, value)),
                }
            }
        })
    });
}

/// Remove the given keys
pub fn unset(keys: &[&str]) {
    with_store(|store| store.mutate(|entries| entries.retain(|(k, _)| !keys.contains(&k.as_str()))));
}

pub fn clear() {
    with_store(|store| store.mutate(|entries| entries.clear()));
}

/// Copy of the current thread's tags
pub fn check() -> BTreeMap<String, String> {
    with_store(|store| store.snapshot().into_iter().collect())
}

/// Run `f` with extra tags set, restoring the previous tags afterwards (also
/// on unwind).
pub fn with<I, K, V, R>(tags: I, f: impl FnOnce() -> R) -> R
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: ToString,
{
    struct Restore(Option<Vec<(String, String)>>);

    impl Drop for Restore {
        fn drop(&mut self) {
            if let Some(before) = self.0.take() {
                with_store(|store| store.mutate(|entries| *entries = before));
            }
        }
    }

    let _restore = Restore(Some(with_store(TagStore::snapshot)));
    set(tags);
    f()
}

/// Copy the current thread's value for `key` into `out`.
///
/// Async-signal-safe: never allocates and never waits.
pub(crate) fn read(key: &str, out: &mut [u8]) -> TagLookup {
    if !READY.try_with(Cell::get).unwrap_or(false) {
        return TagLookup::Missing;
    }
    TAGS.try_with(|store| {
        if store.busy.load(Ordering::Relaxed) {
            return TagLookup::Unavailable;
        }
        compiler_fence(Ordering::SeqCst);
        // SAFETY: `busy` is clear, so the owning thread is not mid-mutation
        let entries = unsafe { &*store.entries.get() };
        match entries.iter().find(|(k, _)| k == key) {
            Some((_, value)) => {
                let len = value.len().min(out.len());
                out[..len].copy_from_slice(&value.as_bytes()[..len]);
                TagLookup::Value(value.len())
            }
            None => TagLookup::Missing,
        }
    })
    .unwrap_or(TagLookup::Unavailable)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_string(key: &str) -> Option<String> {
        let mut out = [0u8; 64];
        match read(key, &mut out) {
            TagLookup::Value(len) => Some(String::from_utf8_lossy(&out[..len.min(64)]).into_owned()),
            _ => None,
        }
    }

    #[test]
    fn test_set_merges_and_unset_removes() {
        std::thread::spawn(|| {
            set([("foo", "bar"), ("spam", "a lot")]);
            set([("foo", "baz")]);
            assert_eq!(read_string("foo").as_deref(), Some("baz"));
            assert_eq!(check().len(), 2);

            unset(&["spam"]);
            assert_eq!(read("spam", &mut [0u8; 8]), TagLookup::Missing);
            clear();
            assert!(check().is_empty());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_with_restores_previous() {
        std::thread::spawn(|| {
            set([("outer", 1)]);
            with([("inner", 2)], || {
                assert_eq!(check().len(), 2);
                assert_eq!(read_string("inner").as_deref(), Some("2"));
            });
            assert_eq!(check(), BTreeMap::from([("outer".to_string(), "1".to_string())]));
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_with_restores_on_unwind() {
        std::thread::spawn(|| {
            let result = std::panic::catch_unwind(|| with([("k", "v")], || panic!("boom")));
            assert!(result.is_err());
            assert!(check().is_empty());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_untouched_thread_reports_missing() {
        std::thread::spawn(|| assert_eq!(read("foo", &mut [0u8; 4]), TagLookup::Missing))
            .join()
            .unwrap();
    }

    #[test]
    fn test_busy_store_is_unavailable() {
        std::thread::spawn(|| {
            set([("foo", "bar")]);
            let seen = with_store(|store| store.mutate(|_| read("foo", &mut [0u8; 4])));
            assert_eq!(seen, TagLookup::Unavailable);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_long_value_reports_full_length() {
        std::thread::spawn(|| {
            set([("long", "x".repeat(200))]);
            let mut out = [0u8; 16];
            assert_eq!(read("long", &mut out), TagLookup::Value(200));
            assert_eq!(out, [b'x'; 16]);
        })
        .join()
        .unwrap();
    }
}
