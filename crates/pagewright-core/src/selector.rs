//! Process-wide selector cache with reliability tracking.
//!
//! When the AI fallback rescues a failed action, the touched element's
//! fingerprint is distilled into the most survivable selector available and
//! cached under (domain, action kind, instruction digest). Later runs of the
//! same logical action try the cached selector before paying for a fallback.
//! Every dispatch outcome feeds an exponential reliability blend; entries
//! that sink below the floor stop being served until a fresh learn replaces
//! them.
//!
//! The cache is shared across every run in the process. Values are cloned on
//! read so no `DashMap` guard is ever held across an await.

use std::sync::Arc;

use dashmap::DashMap;
use pagewright_types::action::{ActionKind, ElementFingerprint};
use pagewright_types::selector::{CacheKey, SelectorCacheEntry, SelectorTier};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Weight of the running reliability in the exponential blend; the newest
/// outcome carries the remainder.
const RELIABILITY_CARRY: f64 = 0.7;

/// Entries below this reliability are not served.
pub const DEFAULT_RELIABILITY_FLOOR: f64 = 0.5;

/// Length of the truncated instruction digest in a cache key.
const CONTEXT_DIGEST_LEN: usize = 16;

// ---------------------------------------------------------------------------
// Key derivation
// ---------------------------------------------------------------------------

/// Cache key for an action dispatched against `url`.
pub fn cache_key(url: &str, kind: ActionKind, instruction: &str) -> CacheKey {
    CacheKey {
        domain: page_domain(url),
        action_kind: kind,
        context: instruction_digest(instruction),
    }
}

/// Host part of a URL, lowercased. Unparseable URLs fall back to the raw
/// string so keys stay distinct rather than colliding on a placeholder.
pub fn page_domain(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .unwrap_or_else(|| url.trim().to_lowercase())
}

/// Truncated SHA-256 of the whitespace-normalized, lowercased instruction.
/// Two spellings of the same instruction land on the same entry.
pub fn instruction_digest(instruction: &str) -> String {
    let normalized = instruction
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let digest = format!("{:x}", Sha256::digest(normalized.as_bytes()));
    digest[..CONTEXT_DIGEST_LEN].to_string()
}

// ---------------------------------------------------------------------------
// Fingerprint distillation
// ---------------------------------------------------------------------------

/// Derive the most stable selector a fingerprint supports, walking the tier
/// hierarchy from `name` down to the positional path.
pub fn selector_from_fingerprint(fp: &ElementFingerprint) -> Option<(String, SelectorTier)> {
    let tag = fp.tag.as_deref().unwrap_or("");

    if let Some(name) = non_empty(&fp.name) {
        return Some((attr_selector(tag, "name", name), SelectorTier::Name));
    }
    if let Some(id) = non_empty(&fp.id) {
        return Some((format!("#{id}"), SelectorTier::Id));
    }
    if let Some(label) = non_empty(&fp.aria_label) {
        return Some((attr_selector(tag, "aria-label", label), SelectorTier::AriaLabel));
    }
    if let Some(test_id) = non_empty(&fp.data_test) {
        return Some((attr_selector(tag, "data-test", test_id), SelectorTier::DataTest));
    }

    let stable_classes: Vec<&str> = fp
        .classes
        .iter()
        .map(String::as_str)
        .filter(|c| !c.is_empty() && !looks_generated(c))
        .collect();
    if !stable_classes.is_empty() {
        return Some((
            format!("{tag}.{}", stable_classes.join(".")),
            SelectorTier::Class,
        ));
    }

    non_empty(&fp.css_path).map(|path| (path.to_string(), SelectorTier::Path))
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}

fn attr_selector(tag: &str, attr: &str, value: &str) -> String {
    format!("{tag}[{attr}=\"{}\"]", value.replace('"', "\\\""))
}

/// Heuristic for build-generated class names: CSS-in-JS prefixes, leading
/// underscores, and multi-digit hash runs.
fn looks_generated(class: &str) -> bool {
    if class.starts_with('_') {
        return true;
    }
    for prefix in ["css-", "sc-", "jss", "emotion-"] {
        if class.starts_with(prefix) {
            return true;
        }
    }
    let mut digit_run = 0;
    for c in class.chars() {
        if c.is_ascii_digit() {
            digit_run += 1;
            if digit_run >= 2 {
                return true;
            }
        } else {
            digit_run = 0;
        }
    }
    false
}

// ---------------------------------------------------------------------------
// SelectorCache
// ---------------------------------------------------------------------------

/// Concurrent selector cache. Cloning produces a shared view of the same
/// underlying data; one instance serves every run in the process.
#[derive(Debug, Clone)]
pub struct SelectorCache {
    inner: Arc<DashMap<CacheKey, SelectorCacheEntry>>,
    floor: f64,
}

impl SelectorCache {
    pub fn new() -> Self {
        Self::with_floor(DEFAULT_RELIABILITY_FLOOR)
    }

    pub fn with_floor(floor: f64) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            floor,
        }
    }

    /// Serve the cached selector for a key, if one exists at or above the
    /// reliability floor. The entry is cloned; the guard is not held.
    pub fn lookup(&self, key: &CacheKey) -> Option<SelectorCacheEntry> {
        self.inner.get(key).and_then(|entry| {
            if entry.reliability >= self.floor {
                Some(entry.value().clone())
            } else {
                None
            }
        })
    }

    /// Learn a selector from a fallback success. A fresh observation always
    /// replaces whatever was stored, including entries sunk below the floor.
    /// Returns the stored entry, or `None` when the fingerprint has nothing
    /// usable.
    pub fn learn(&self, key: CacheKey, fp: &ElementFingerprint) -> Option<SelectorCacheEntry> {
        let (selector, tier) = selector_from_fingerprint(fp)?;
        let entry = SelectorCacheEntry::new(selector, tier);
        tracing::debug!(
            domain = %key.domain,
            kind = %key.action_kind,
            selector = %entry.selector,
            tier = %entry.tier,
            "learned selector"
        );
        self.inner.insert(key, entry.clone());
        Some(entry)
    }

    /// Blend a dispatch outcome into the entry's reliability.
    pub fn record_outcome(&self, key: &CacheKey, success: bool) {
        if let Some(mut entry) = self.inner.get_mut(key) {
            let outcome = if success { 1.0 } else { 0.0 };
            entry.reliability =
                entry.reliability * RELIABILITY_CARRY + outcome * (1.0 - RELIABILITY_CARRY);
            entry.last_used = chrono::Utc::now();
            entry.usage_count += 1;
        }
    }

    /// Snapshot of every entry, sorted by domain then context for stable
    /// display.
    pub fn entries(&self) -> Vec<(CacheKey, SelectorCacheEntry)> {
        let mut all: Vec<(CacheKey, SelectorCacheEntry)> = self
            .inner
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        all.sort_by(|(a, _), (b, _)| {
            a.domain
                .cmp(&b.domain)
                .then_with(|| a.context.cmp(&b.context))
        });
        all
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Default for SelectorCache {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
