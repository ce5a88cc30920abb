//! Process-wide map from handle tokens to open indexes.
//!
//! The lock covers only insert, lookup, and remove. Callers clone the
//! `Arc` out and release the lock before touching the index.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use spfresh_engine::Index;
use std::collections::HashMap;
use std::sync::Arc;

struct Registry {
    next: usize,
    entries: HashMap<usize, Arc<Index>>,
}

static REGISTRY: Lazy<Mutex<Registry>> = Lazy::new(|| {
    Mutex::new(Registry {
        next: 1,
        entries: HashMap::new(),
    })
});

/// Store `index` and return its token. Tokens start at 1; 0 is the null handle.
pub(crate) fn register(index: Index) -> usize {
    let index = Arc::new(index);
    let mut reg = REGISTRY.lock();
    let mut token = reg.next;
    while token == 0 || reg.entries.contains_key(&token) {
        token = token.wrapping_add(1);
    }
    reg.next = token.wrapping_add(1);
    reg.entries.insert(token, index);
    token
}

pub(crate) fn lookup(token: usize) -> Option<Arc<Index>> {
    REGISTRY.lock().entries.get(&token).cloned()
}

/// Remove a token. The index is freed once in-flight calls release it.
pub(crate) fn unregister(token: usize) -> Option<Arc<Index>> {
    REGISTRY.lock().entries.remove(&token)
}
