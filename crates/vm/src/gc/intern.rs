use std::hash::Hasher;

use fnv::{FnvHashMap, FnvHasher};

use super::Gc;
use crate::value::LoxString;

/// FNV-1a hash of string content. Computed once per string and cached in it.
pub fn hash_str(s: &str) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(s.as_bytes());
    hasher.finish()
}

/// Weak table of every live string, bucketed by content hash.
///
/// Entries never keep a string alive: the sweep removes the entry of every
/// string it frees.
#[derive(Debug, Default)]
pub(crate) struct Interner {
    buckets: FnvHashMap<u64, Vec<Gc<LoxString>>>,
    len: usize,
}

impl Interner {
    /// Strings sharing the given hash
    pub fn candidates(&self, hash: u64) -> &[Gc<LoxString>] {
        self.buckets
            .get(&hash)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn insert(&mut self, hash: u64, s: Gc<LoxString>) {
        self.buckets.entry(hash).or_default().push(s);
        self.len += 1;
    }

    pub fn remove(&mut self, hash: u64, s: Gc<LoxString>) {
        if let Some(bucket) = self.buckets.get_mut(&hash) {
            if let Some(pos) = bucket.iter().position(|x| *x == s) {
                bucket.swap_remove(pos);
                self.len -= 1;
            }
            if bucket.is_empty() {
                self.buckets.remove(&hash);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }
}
