//! Seeded score-based selection

use rand::Rng;

/// Random spread added to every score, in `-ENTROPY..=ENTROPY`
pub const ENTROPY: f64 = 0.5;

/// Collects scored candidates and picks the best after adding seeded entropy
///
/// Entropy is drawn in insertion order, so callers must add candidates in a
/// stable order for the pick to be reproducible.
#[derive(Debug)]
pub struct ScoredPicker<T> {
    entries: Vec<(T, f64)>,
}

impl<T> Default for ScoredPicker<T> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<T> ScoredPicker<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, item: T, score: f64) {
        self.entries.push((item, score));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Highest score after entropy; the earliest entry wins ties
    pub fn pick<R: Rng>(self, rng: &mut R) -> Option<T> {
        let mut best: Option<(T, f64)> = None;
        for (item, score) in self.entries {
            let total = score + rng.gen_range(-ENTROPY..=ENTROPY);
            match &best {
                Some((_, best_total)) if *best_total >= total => {}
                _ => best = Some((item, total)),
            }
        }
        best.map(|(item, _)| item)
    }
}

/// Uniform seeded choice
pub fn pick_one<'a, T, R: Rng>(items: &'a [T], rng: &mut R) -> Option<&'a T> {
    if items.is_empty() {
        return None;
    }
    items.get(rng.gen_range(0..items.len()))
}
