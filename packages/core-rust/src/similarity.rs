//! Local-alignment string similarity used by the scope engine.
//!
//! Smith-Waterman-Gotoh scoring with match +1.0, mismatch -0.5 and gap -0.1,
//! normalized by the best score the shorter string could achieve. The result
//! lands in [0, 1]; callers working in the engine's [0, 100] confidence space
//! scale it themselves.

const MATCH: f64 = 1.0;
const MISMATCH: f64 = -0.5;
const GAP: f64 = -0.1;

/// Normalized Smith-Waterman-Gotoh similarity between `a` and `b`.
///
/// Comparison is case-insensitive. Returns 1.0 for two empty strings and
/// 0.0 when exactly one side is empty.
#[must_use]
pub fn swg_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    match (a.is_empty(), b.is_empty()) {
        (true, true) => return 1.0,
        (true, false) | (false, true) => return 0.0,
        (false, false) => {}
    }

    // Two rolling rows keep the DP at O(min) memory; only the best local
    // score is needed, not the full traceback.
    let mut prev = vec![0.0f64; b.len() + 1];
    let mut curr = vec![0.0f64; b.len() + 1];
    let mut best = 0.0f64;

    for &ca in &a {
        for (j, &cb) in b.iter().enumerate() {
            let diag = prev[j] + if ca == cb { MATCH } else { MISMATCH };
            let up = prev[j + 1] + GAP;
            let left = curr[j] + GAP;
            let score = diag.max(up).max(left).max(0.0);
            curr[j + 1] = score;
            if score > best {
                best = score;
            }
        }
        std::mem::swap(&mut prev, &mut curr);
        curr[0] = 0.0;
    }

    #[allow(clippy::cast_precision_loss)]
    let ceiling = a.len().min(b.len()) as f64 * MATCH;
    (best / ceiling).clamp(0.0, 1.0)
}

/// [`swg_similarity`] scaled into the engine's [0, 100] accuracy space.
#[must_use]
pub fn swg_accuracy(a: &str, b: &str) -> f64 {
    swg_similarity(a, b) * 100.0
}
