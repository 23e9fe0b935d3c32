use crate::errors::{Error, ErrorCode};
use crate::types::TrieConfig;
use crate::MbitTrie;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::ffi::c_void;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle ID type - safer than raw pointers
pub type HandleId = u64;

/// Trie payload for foreign callers: values are opaque pointers.
pub type OpaqueTrie = MbitTrie<c_void>;

/// Live tries by handle. Lookups clone the `Arc` out, so no shard lock is
/// held while a writer waits out a grace period.
struct HandleRegistry {
    handles: DashMap<HandleId, Arc<OpaqueTrie>>,
    next_id: AtomicU64,
}

impl HandleRegistry {
    fn new() -> Self {
        Self {
            handles: DashMap::new(),
            next_id: AtomicU64::new(1), // 0 is reserved for null/invalid
        }
    }

    fn register(&self, trie: OpaqueTrie) -> HandleId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.handles.insert(id, Arc::new(trie));
        id
    }

    fn get(&self, id: HandleId) -> Result<Arc<OpaqueTrie>, ErrorCode> {
        if id == 0 {
            return Err(ErrorCode::InvalidHandle);
        }
        self.handles
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(ErrorCode::InvalidHandle)
    }

    fn unregister(&self, id: HandleId) -> Result<Arc<OpaqueTrie>, ErrorCode> {
        if id == 0 {
            return Err(ErrorCode::InvalidHandle);
        }
        self.handles
            .remove(&id)
            .map(|(_, trie)| trie)
            .ok_or(ErrorCode::InvalidHandle)
    }
}

static REGISTRY: OnceCell<HandleRegistry> = OnceCell::new();

fn get_registry() -> &'static HandleRegistry {
    REGISTRY.get_or_init(HandleRegistry::new)
}

/// Register a trie and return its handle ID
pub fn register_handle(trie: OpaqueTrie) -> HandleId {
    get_registry().register(trie)
}

/// Run `f` against the trie behind `id`.
pub fn with_handle<R, F>(id: HandleId, f: F) -> Result<R, ErrorCode>
where
    F: FnOnce(&OpaqueTrie) -> R,
{
    let trie = get_registry().get(id)?;
    Ok(f(&trie))
}

/// Forget `id`. The trie is dropped (and flushed) once the last in-flight
/// call on it returns.
pub fn unregister_handle(id: HandleId) -> Result<(), ErrorCode> {
    get_registry().unregister(id).map(drop)
}

static GLOBAL: OnceCell<OpaqueTrie> = OnceCell::new();

/// Build the process-wide trie. Fails with `AlreadyInitialized` on any call
/// after the first.
pub fn init_global(config: TrieConfig) -> Result<&'static OpaqueTrie, Error> {
    let mut built = false;
    let trie = GLOBAL.get_or_init(|| {
        built = true;
        OpaqueTrie::with_config(config)
    });
    if built {
        Ok(trie)
    } else {
        Err(Error::AlreadyInitialized)
    }
}

/// The process-wide trie, if [`init_global`] has run.
pub fn global() -> Option<&'static OpaqueTrie> {
    GLOBAL.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr::NonNull;

    #[test]
    fn test_handle_registry() {
        let registry = HandleRegistry::new();
        assert!(registry.get(0).is_err());
        assert!(registry.unregister(999).is_err());

        let a = registry.register(OpaqueTrie::new());
        let b = registry.register(OpaqueTrie::new());
        assert_eq!((a, b), (1, 2));

        let mut v = 5u32;
        let p = NonNull::from(&mut v).cast::<c_void>();
        registry.get(a).unwrap().insert(0x0A00_0001, p).unwrap();
        assert_eq!(registry.get(a).unwrap().lookup(0x0A00_0001), Some(p));
        assert!(registry.get(b).unwrap().is_empty());

        let held = registry.unregister(a).unwrap();
        assert!(registry.get(a).is_err());
        assert_eq!(held.len(), 1, "in-flight holders keep the trie alive");
    }

    #[test]
    fn global_is_built_once() {
        let first = init_global(TrieConfig::default().yield_after(32)).unwrap();
        assert_eq!(first.config().yield_after, 32);
        assert_eq!(
            init_global(TrieConfig::default()).err(),
            Some(Error::AlreadyInitialized)
        );
        assert!(std::ptr::eq(global().unwrap(), first));
    }
}
