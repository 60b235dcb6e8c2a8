//! Selector cache types.
//!
//! A selector learned from a fallback success is ranked by how survivable it
//! is across page redesigns: name attributes outlive IDs, IDs outlive ARIA
//! labels, and generated class names barely outlive the current deploy. The
//! cache keys entries by (domain, action kind, instruction digest) so a
//! logically-identical action on the same site finds its learned selector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::ActionKind;

// ---------------------------------------------------------------------------
// Stability tiers
// ---------------------------------------------------------------------------

/// Stability ranking for a learned selector. Variant order is the ranking:
/// `Name` is the most stable, `Path` the least, and `Ord` follows declaration
/// order so `tier_a < tier_b` means a is preferable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectorTier {
    /// `[name=...]` form attribute.
    Name,
    /// `#id`.
    Id,
    /// `[aria-label=...]`.
    AriaLabel,
    /// `[data-test=...]` / `[data-testid=...]`.
    DataTest,
    /// A class that does not look machine-generated.
    Class,
    /// Positional CSS path.
    Path,
}

impl SelectorTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectorTier::Name => "name",
            SelectorTier::Id => "id",
            SelectorTier::AriaLabel => "aria-label",
            SelectorTier::DataTest => "data-test",
            SelectorTier::Class => "class",
            SelectorTier::Path => "path",
        }
    }
}

impl std::fmt::Display for SelectorTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Cache key and entry
// ---------------------------------------------------------------------------

/// Scoping key for one cache entry: registrable domain, what kind of action,
/// and a digest of the normalized instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheKey {
    pub domain: String,
    pub action_kind: ActionKind,
    /// Truncated SHA-256 hex digest of the normalized instruction.
    pub context: String,
}

/// One learned selector with its reliability history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorCacheEntry {
    pub selector: String,
    pub tier: SelectorTier,
    /// Exponential blend of dispatch outcomes, in `[0, 1]`. A fresh learn
    /// starts at 1.0.
    pub reliability: f64,
    pub last_used: DateTime<Utc>,
    pub usage_count: u64,
}

impl SelectorCacheEntry {
    pub fn new(selector: impl Into<String>, tier: SelectorTier) -> Self {
        Self {
            selector: selector.into(),
            tier,
            reliability: 1.0,
            last_used: Utc::now(),
            usage_count: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
