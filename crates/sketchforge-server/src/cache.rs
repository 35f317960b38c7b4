//! Compiled-response cache.
//!
//! Identical sketches compile to identical firmware, so responses are cached
//! under a digest of the whitespace-normalized source plus board and library
//! list. Bounded and time-limited; restarts start cold.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

/// A bounded map whose entries expire after a fixed TTL. At capacity the
/// entry closest to expiry is evicted.
pub struct TtlMap<V> {
    capacity: usize,
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, V)>>,
}

impl<V: Clone> TtlMap<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock().expect("ttl map lock poisoned");
        match entries.get(key) {
            Some((deadline, value)) if *deadline > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: String, value: V) {
        let mut entries = self.entries.lock().expect("ttl map lock poisoned");
        let now = Instant::now();
        entries.retain(|_, (deadline, _)| *deadline > now);
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, (deadline, _))| *deadline)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(key, (now + self.ttl, value));
    }
}

/// Consistent cache key for a compile request: the source with spaces and
/// newlines stripped, plus board and libraries.
pub fn compile_cache_key(source_code: &str, board: &str, libraries: &[String]) -> String {
    let normalized: String = source_code
        .chars()
        .filter(|c| *c != ' ' && *c != '\n')
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.update(board.as_bytes());
    for library in libraries {
        hasher.update(library.as_bytes());
        hasher.update(b"\0");
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_ignores_formatting_only_changes() {
        let a = compile_cache_key("void loop() { x(); }", "arduino:avr:uno", &[]);
        let b = compile_cache_key("void loop()  {\nx();\n}", "arduino:avr:uno", &[]);
        assert_eq!(a, b);

        let other_board = compile_cache_key("void loop() { x(); }", "arduino:avr:nano", &[]);
        assert_ne!(a, other_board);

        let with_lib =
            compile_cache_key("void loop() { x(); }", "arduino:avr:uno", &["Servo".to_string()]);
        assert_ne!(a, with_lib);
    }

    #[test]
    fn test_ttl_map_expiry_and_capacity() {
        let map = TtlMap::new(2, Duration::from_secs(3600));
        map.insert("a".to_string(), 1);
        map.insert("b".to_string(), 2);
        assert_eq!(map.get("a"), Some(1));

        // Third entry evicts the one closest to expiry.
        map.insert("c".to_string(), 3);
        let present = ["a", "b", "c"]
            .iter()
            .filter(|k| map.get(k).is_some())
            .count();
        assert_eq!(present, 2);

        let expired = TtlMap::new(2, Duration::ZERO);
        expired.insert("a".to_string(), 1);
        assert_eq!(expired.get("a"), None);
    }
}
