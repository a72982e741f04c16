//! Nearest-neighbour matching of a probe descriptor against a gallery.

use crate::types::{Embedding, Gallery, MatchResult};

/// Default acceptance threshold on Euclidean descriptor distance.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Strategy for comparing a probe descriptor against a gallery.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery, threshold: f32) -> MatchResult;
}

/// Euclidean nearest-neighbour matcher.
///
/// Scans every gallery entry. On equal distances the entry inserted first wins.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery, threshold: f32) -> MatchResult {
        let mut best: Option<(usize, f32)> = None;

        for (i, entry) in gallery.entries().iter().enumerate() {
            let distance = probe.distance(&entry.descriptor);
            // NaN never compares less, so a corrupt descriptor can't win.
            let closer = match best {
                None => !distance.is_nan(),
                Some((_, best_distance)) => distance < best_distance,
            };
            if closer {
                best = Some((i, distance));
            }
        }

        match best {
            Some((idx, distance)) if distance < threshold => MatchResult {
                operator: Some(gallery.entries()[idx].operator.clone()),
                distance,
            },
            Some((_, distance)) => MatchResult::unknown(distance),
            None => MatchResult::unknown(f32::INFINITY),
        }
    }
}
