//! Meme compatibility between successive segments
//!
//! Whether two meme sets may follow one another is a policy, not a fixed
//! rule. [`ExclusiveMemePolicy`] is the configured default; callers may plug
//! in any [`MemeCompatibility`].

use crate::content::normalize_meme;
use std::collections::HashSet;

/// Prefix marking an anti-meme: "!DARK" may not meet "DARK"
pub const ANTI_MEME_PREFIX: char = '!';

pub trait MemeCompatibility: Send + Sync {
    /// Whether a candidate carrying `candidate` memes may follow an arc carrying `required`
    fn is_compatible(&self, candidate: &[String], required: &[String]) -> bool;
}

/// Accepts every candidate
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissiveMemePolicy;

impl MemeCompatibility for PermissiveMemePolicy {
    fn is_compatible(&self, _candidate: &[String], _required: &[String]) -> bool {
        true
    }
}

/// Rejects explicit contradictions only
///
/// Two sets contradict when one holds an anti-meme of a meme in the other, or
/// when they hold different members of the same exclusive group. Sharing no
/// memes at all is not a contradiction.
#[derive(Debug, Clone, Default)]
pub struct ExclusiveMemePolicy {
    groups: Vec<HashSet<String>>,
}

impl ExclusiveMemePolicy {
    pub fn new(groups: &[Vec<String>]) -> Self {
        Self {
            groups: groups
                .iter()
                .map(|g| g.iter().map(|m| normalize_meme(m)).collect::<HashSet<_>>())
                .filter(|g| g.len() > 1)
                .collect(),
        }
    }

    fn anti_contradiction(a: &HashSet<String>, b: &HashSet<String>) -> bool {
        a.iter()
            .filter_map(|m| m.strip_prefix(ANTI_MEME_PREFIX))
            .any(|target| b.contains(target))
    }
}

impl MemeCompatibility for ExclusiveMemePolicy {
    fn is_compatible(&self, candidate: &[String], required: &[String]) -> bool {
        let candidate: HashSet<String> = candidate.iter().map(|m| normalize_meme(m)).collect();
        let required: HashSet<String> = required.iter().map(|m| normalize_meme(m)).collect();

        if Self::anti_contradiction(&candidate, &required) || Self::anti_contradiction(&required, &candidate) {
            return false;
        }

        !self.groups.iter().any(|group| {
            candidate
                .iter()
                .filter(|m| group.contains(*m))
                .any(|c| required.iter().any(|r| r != c && group.contains(r)))
        })
    }
}

/// Fraction of `required` memes present in `candidate` (0.0 when nothing is required)
pub fn meme_isometry(candidate: &[String], required: &[String]) -> f64 {
    let required: HashSet<String> = required.iter().map(|m| normalize_meme(m)).collect();
    if required.is_empty() {
        return 0.0;
    }
    let candidate: HashSet<String> = candidate.iter().map(|m| normalize_meme(m)).collect();
    required.intersection(&candidate).count() as f64 / required.len() as f64
}
