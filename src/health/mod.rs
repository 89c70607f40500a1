//! Confidence and health scoring (spec.md §4.6, §6 field 27, §9).
//!
//! spec.md requires both scores to be deterministic, integer-only
//! ("restate [floating point] as fixed-point integer arithmetic... the
//! spec does not prescribe exact coefficients; it requires only that
//! scoring is deterministic and monotone in its documented inputs",
//! spec.md §9) and it fixes neither weight. We pick concrete integer
//! weights here (documented as an Open-Question resolution in
//! DESIGN.md), grounded on the teacher's fixed-point rebuild-progress
//! percentage idiom (`io-engine/src/rebuild/rebuild_state.rs` reports
//! rebuild progress as an integer percentage, not a float) rather than
//! inventing floating-point heuristics of our own.

/// Reassembly confidence score in `[0, 100]` (spec.md §4.6).
///
/// Monotone in both inputs: more valid copies, and a higher (less stale)
/// winning version counter relative to the next-best candidate, both
/// raise the score. `valid_copies` is out of the fixed `total_copies`
/// (normally [`crate::config::METADATA_COPIES`]).
pub fn confidence_score(valid_copies: usize, total_copies: usize, newest_version: u64, runner_up_version: u64) -> u8 {
    if valid_copies == 0 || total_copies == 0 {
        return 0;
    }
    // Base: fraction of copies that verified, worth up to 70 points.
    let copy_component = (valid_copies.min(total_copies) * 70 / total_copies) as u32;

    // Staleness: if only one copy is valid there is no runner-up to be
    // stale relative to, so staleness contributes its maximum (30). If
    // there are multiple valid copies, a winner far ahead of the next
    // best candidate is more trustworthy (less likely to be a stray
    // partial write) than one that barely edges it out.
    let staleness_component: u32 = if valid_copies <= 1 || newest_version <= runner_up_version {
        30
    } else {
        let gap = newest_version - runner_up_version;
        // Saturate at a 16-version gap; beyond that, confidence is
        // already maxed, matching the monotone-but-bounded requirement.
        (gap.min(16) * 30 / 16) as u32
    };

    (copy_component + staleness_component).min(100) as u8
}

/// Health score in `[0, 100]` (spec.md §6 field 27): deterministic,
/// monotonically decreasing in error count and hotspot count relative to
/// device size. `active_remaps` and `error_count` are drawn from the
/// remap index; `sector_count` is the main device's capacity.
pub fn health_score(active_remaps: u64, error_count: u64, sector_count: u64) -> u8 {
    if sector_count == 0 {
        return 100;
    }
    // Penalize one point per remap per ~0.001% of the device remapped,
    // and one point per 10 recorded errors, both saturating at 100.
    let remap_penalty = ((active_remaps.saturating_mul(100_000)) / sector_count.max(1)).min(80);
    let error_penalty = (error_count / 10).min(20);
    100u64.saturating_sub(remap_penalty).saturating_sub(error_penalty) as u8
}

/// Number of "hotspots": main-device regions with more than one recorded
/// error, a rough proxy for clustered (rather than isolated) media damage
/// (spec.md §6 field 28). Takes pre-sorted `(main_sector, error_count)`
/// pairs; deterministic purely by construction (no floats, no time-based
/// input).
pub fn hotspot_count(entries: impl Iterator<Item = (u64, u32)>) -> usize {
    entries.filter(|&(_, errors)| errors > 1).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_is_monotone_in_valid_copies() {
        let one = confidence_score(1, 5, 10, 0);
        let three = confidence_score(3, 5, 10, 0);
        let five = confidence_score(5, 5, 10, 0);
        assert!(one < three);
        assert!(three < five);
    }

    #[test]
    fn confidence_is_monotone_in_version_gap() {
        let narrow = confidence_score(3, 5, 10, 9);
        let wide = confidence_score(3, 5, 10, 1);
        assert!(narrow < wide);
    }

    #[test]
    fn confidence_zero_copies_is_zero() {
        assert_eq!(confidence_score(0, 5, 0, 0), 0);
    }

    #[test]
    fn health_score_decreases_with_errors() {
        let clean = health_score(0, 0, 1_000_000);
        let errored = health_score(0, 100, 1_000_000);
        assert!(errored < clean);
    }

    #[test]
    fn health_score_bounded() {
        assert!(health_score(1_000_000, 1_000_000, 1_000_000) <= 100);
    }
}
