//! Content-addressed cache of parse results.
//!
//! One instance is constructed per service and shared through an `Arc`; there
//! is no process-wide cache. Entries are keyed by the SHA-256 of the language
//! and file content, so the same blob seen in several commits is parsed once.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use super::code_parser::{CodeParser, StrategyUsed};
use super::language::Language;
use super::parsed::ParsedCode;

/// Hex-encoded SHA-256 of a language tag and file content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn new(language: Language, content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(language.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(content.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    parsed: ParsedCode,
    strategy: StrategyUsed,
    created_at: Instant,
    last_accessed: Instant,
}

/// Size and lifetime limits for [`ParsedCodeCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 2048,
            ttl: Duration::from_secs(3600),
        }
    }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Thread-safe LRU cache of [`ParsedCode`] snapshots.
pub struct ParsedCodeCache {
    entries: RwLock<HashMap<ContentHash, CacheEntry>>,
    config: CacheConfig,
    stats: RwLock<CacheStats>,
}

impl ParsedCodeCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
            stats: RwLock::new(CacheStats::default()),
        }
    }

    /// Returns the cached snapshot for `content` or parses and stores it.
    ///
    /// Files whose extension maps to no language are neither parsed nor cached.
    pub fn get_or_parse(
        &self,
        parser: &CodeParser,
        content: &str,
        file_path: impl AsRef<Path>,
    ) -> Option<ParsedCode> {
        self.get_or_parse_with_strategy(parser, content, file_path)
            .map(|(parsed, _)| parsed)
    }

    /// Like [`ParsedCodeCache::get_or_parse`], also reporting which strategy
    /// produced the snapshot when it was first parsed.
    pub fn get_or_parse_with_strategy(
        &self,
        parser: &CodeParser,
        content: &str,
        file_path: impl AsRef<Path>,
    ) -> Option<(ParsedCode, StrategyUsed)> {
        let file_path = file_path.as_ref();
        let language = Language::from_path(file_path)?;
        let key = ContentHash::new(language, content);

        if let Some(hit) = self.lookup(&key) {
            return Some(hit);
        }

        let (parsed, strategy) = parser.parse_with_strategy(content, file_path)?;
        self.insert(key, parsed.clone(), strategy);
        Some((parsed, strategy))
    }

    fn lookup(&self, key: &ContentHash) -> Option<(ParsedCode, StrategyUsed)> {
        let mut entries = self.entries.write().expect("cache write lock poisoned");
        let hit = match entries.get_mut(key) {
            Some(entry) if entry.created_at.elapsed() < self.config.ttl => {
                entry.last_accessed = Instant::now();
                Some((entry.parsed.clone(), entry.strategy))
            }
            Some(_) => {
                entries.remove(key);
                self.stats.write().expect("stats write lock poisoned").evictions += 1;
                None
            }
            None => None,
        };

        let mut stats = self.stats.write().expect("stats write lock poisoned");
        if hit.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        hit
    }

    fn insert(&self, key: ContentHash, parsed: ParsedCode, strategy: StrategyUsed) {
        if self.config.max_entries == 0 {
            return;
        }
        let mut entries = self.entries.write().expect("cache write lock poisoned");
        while entries.len() >= self.config.max_entries && !entries.contains_key(&key) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed)
                .map(|(hash, _)| hash.clone());
            match oldest {
                Some(hash) => {
                    entries.remove(&hash);
                    self.stats.write().expect("stats write lock poisoned").evictions += 1;
                }
                None => break,
            }
        }
        let now = Instant::now();
        entries.insert(
            key,
            CacheEntry {
                parsed,
                strategy,
                created_at: now,
                last_accessed: now,
            },
        );
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.read().expect("stats read lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("cache read lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().expect("cache write lock poisoned").clear();
    }
}

impl Default for ParsedCodeCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_depends_on_language() {
        let a = ContentHash::new(Language::JavaScript, "x");
        let b = ContentHash::new(Language::TypeScript, "x");
        assert_ne!(a, b);
        assert_eq!(a, ContentHash::new(Language::JavaScript, "x"));
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = ParsedCodeCache::default();
        let parser = CodeParser::pattern_only();
        let source = "def a():\n    return 1\n";

        let first = cache.get_or_parse(&parser, source, "a.py").expect("python");
        let second = cache.get_or_parse(&parser, source, "b.py").expect("python");
        assert_eq!(first, second);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(parser.stats().pattern, 1);
        assert!((cache.stats().hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_strategy_survives_cache_hit() {
        let cache = ParsedCodeCache::default();
        let parser = CodeParser::pattern_only();
        let source = "fn a() {}\n";
        let (_, first) = cache
            .get_or_parse_with_strategy(&parser, source, "a.rs")
            .expect("rust");
        let (_, second) = cache
            .get_or_parse_with_strategy(&parser, source, "a.rs")
            .expect("rust");
        assert_eq!(first, StrategyUsed::Pattern);
        assert_eq!(second, StrategyUsed::Pattern);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_unknown_language_not_cached() {
        let cache = ParsedCodeCache::default();
        let parser = CodeParser::pattern_only();
        assert!(cache.get_or_parse(&parser, "text", "notes.txt").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_eviction_at_capacity() {
        let cache = ParsedCodeCache::new(CacheConfig {
            max_entries: 2,
            ttl: Duration::from_secs(60),
        });
        let parser = CodeParser::pattern_only();
        for i in 0..3 {
            cache.get_or_parse(&parser, &format!("let x{i} = 1;"), "a.js");
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_expired_entries_are_reparsed() {
        let cache = ParsedCodeCache::new(CacheConfig {
            max_entries: 10,
            ttl: Duration::ZERO,
        });
        let parser = CodeParser::pattern_only();
        cache.get_or_parse(&parser, "fn a() {}", "a.rs");
        cache.get_or_parse(&parser, "fn a() {}", "a.rs");
        assert_eq!(cache.stats().hits, 0);
        assert_eq!(parser.stats().pattern, 2);
    }
}
