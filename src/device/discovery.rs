//! Discovery and reassembly (spec.md §4.6 "Discovery / reassembly").
//!
//! Given a set of candidate block devices, attempts to load metadata from
//! each, groups the ones whose fingerprints agree on the same main
//! device, and scores each group's trustworthiness with
//! [`crate::health::confidence_score`]. Grounded on the teacher's
//! `nexus_label`/`nexus_metadata` "read every child, trust the newest
//! valid label" discovery idiom (`mayastor/src/bdev/nexus/nexus_label.rs`),
//! generalized from "reassemble a nexus from its children's labels" to
//! "reassemble a remap device from a spare's metadata."

use std::{sync::Arc, time::Duration};

use crate::{
    core::BackingDevice,
    health,
    metadata::{MainDeviceFingerprint, MetadataEngine},
};

/// A candidate spare device that yielded valid metadata during discovery.
#[derive(Debug)]
pub struct Candidate {
    pub path: String,
    pub fingerprint: MainDeviceFingerprint,
    pub version_counter: u64,
    pub valid_copies: usize,
}

/// A group of candidates whose metadata all points at the same main
/// device, ranked by confidence.
#[derive(Debug)]
pub struct ReassemblyGroup {
    pub fingerprint: MainDeviceFingerprint,
    pub winner: Candidate,
    pub confidence: u8,
}

/// Target-construction descriptor a reassembled group can be turned into
/// (spec.md §4.6 "Reassembly yields a target-construction descriptor").
#[derive(Debug, Clone)]
pub struct ReassembledTarget {
    pub main_device_path: String,
    pub spare_device_path: String,
    pub confidence: u8,
}

/// Probes each `(path, backend)` candidate for valid metadata, returning
/// one [`Candidate`] per spare that had at least one verifying copy.
pub async fn scan_candidates(
    candidates: impl IntoIterator<Item = (String, Arc<dyn BackingDevice>)>,
    persist_timeout: Duration,
) -> Vec<Candidate> {
    let mut found = Vec::new();
    for (path, backend) in candidates {
        let engine = MetadataEngine::new(backend, persist_timeout);
        match engine.load().await {
            Ok(loaded) => found.push(Candidate {
                path,
                fingerprint: loaded.header.fingerprint,
                version_counter: loaded.header.version_counter,
                valid_copies: loaded.valid_copies,
            }),
            Err(e) => debug!(path, "discovery: no valid metadata ({e})"),
        }
    }
    found
}

/// Groups candidates by fingerprint and, within each group, picks the
/// highest `version_counter` as the winner (spec.md §4.3/§4.6: "the copy
/// with the highest version_counter wins"), scoring the group's
/// confidence against the runner-up in the same group.
pub fn group_and_score(candidates: Vec<Candidate>, total_copies: usize) -> Vec<ReassemblyGroup> {
    use std::collections::HashMap;

    let mut groups: HashMap<MainDeviceFingerprint, Vec<Candidate>> = HashMap::new();
    for candidate in candidates {
        groups.entry(candidate.fingerprint).or_default().push(candidate);
    }

    groups
        .into_iter()
        .map(|(fingerprint, mut members)| {
            members.sort_by_key(|c| c.version_counter);
            let winner = members.pop().expect("group is never empty");
            let runner_up_version = members.last().map(|c| c.version_counter).unwrap_or(0);
            let confidence = health::confidence_score(
                winner.valid_copies,
                total_copies,
                winner.version_counter,
                runner_up_version,
            );
            ReassemblyGroup {
                fingerprint,
                winner,
                confidence,
            }
        })
        .collect()
}

/// Turns a scored group into a target-construction descriptor if its
/// confidence clears `threshold` (spec.md §4.6 "A reconstructor may be
/// configured to refuse reassembly below a threshold (default 70)").
pub fn reassemble(
    group: &ReassemblyGroup,
    main_device_path: String,
    threshold: u8,
) -> Option<ReassembledTarget> {
    if group.confidence < threshold {
        return None;
    }
    Some(ReassembledTarget {
        main_device_path,
        spare_device_path: group.winner.path.clone(),
        confidence: group.confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn fingerprint(id: Uuid) -> MainDeviceFingerprint {
        MainDeviceFingerprint::new(id, 1_000_000, 512, 512)
    }

    #[test]
    fn group_and_score_picks_highest_version_per_group() {
        let id_a = Uuid::from_u128(1);
        let id_b = Uuid::from_u128(2);
        let candidates = vec![
            Candidate {
                path: "spareA1".into(),
                fingerprint: fingerprint(id_a),
                version_counter: 3,
                valid_copies: 5,
            },
            Candidate {
                path: "spareA2".into(),
                fingerprint: fingerprint(id_a),
                version_counter: 7,
                valid_copies: 5,
            },
            Candidate {
                path: "spareB1".into(),
                fingerprint: fingerprint(id_b),
                version_counter: 1,
                valid_copies: 2,
            },
        ];

        let mut groups = group_and_score(candidates, 5);
        groups.sort_by_key(|g| g.winner.path.clone());

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].winner.path, "spareA2");
        assert_eq!(groups[0].winner.version_counter, 7);
        assert_eq!(groups[1].winner.path, "spareB1");
    }

    #[test]
    fn reassemble_refuses_below_threshold() {
        let group = ReassemblyGroup {
            fingerprint: fingerprint(Uuid::from_u128(1)),
            winner: Candidate {
                path: "spare".into(),
                fingerprint: fingerprint(Uuid::from_u128(1)),
                version_counter: 1,
                valid_copies: 1,
            },
            confidence: 50,
        };
        assert!(reassemble(&group, "main".into(), 70).is_none());
        assert!(reassemble(&group, "main".into(), 40).is_some());
    }
}
