//! Ordinal / delete-slot algebra (component A, §4.1).
//!
//! Grounded on `GetMaxReplicaCountAndDeleteSlots` /
//! `GetPodOrdinalsFromReplicasAndDeleteSlots` in
//! `examples/original_source/pkg/apis/apps/v1/helper/helper.go`.

use std::collections::BTreeSet;

/// Computes the desired ordinal set `D` from `(replicas, deleteSlots)`.
///
/// 1. Only delete-slots that fall inside the active range expand the range:
///    each in-range delete-slot pushes `maxCount` up by one so that exactly
///    `replicas` ordinals remain once the delete-slots are excluded.
/// 2. `D = [0, maxCount) \ d`.
///
/// `|D| == replicas` always holds. Delete-slots outside `[0, maxCount)` are
/// ignored for this computation but are never mutated by the caller — they
/// stay in the annotation verbatim so a future scale-up can still respect
/// them once they fall back in range.
pub fn desired_ordinals(replicas: i32, delete_slots: &BTreeSet<i32>) -> BTreeSet<i32> {
    let (max_count, active) = max_replica_count_and_active_delete_slots(replicas, delete_slots);
    (0..max_count).filter(|i| !active.contains(i)).collect()
}

/// Returns `(maxCount, activeDeleteSlots)` where `activeDeleteSlots` is the
/// subset of `delete_slots` that falls inside `[0, maxCount)`.
fn max_replica_count_and_active_delete_slots(
    replicas: i32,
    delete_slots: &BTreeSet<i32>,
) -> (i32, BTreeSet<i32>) {
    let mut max_count = replicas;
    let mut active = BTreeSet::new();
    for &slot in delete_slots {
        if slot < max_count {
            active.insert(slot);
            max_count += 1;
        }
        // slots >= max_count (as computed so far) stay out of range; since
        // delete_slots is iterated in ascending order and max_count only
        // grows, a slot rejected here can never become in-range later in
        // this same pass.
    }
    (max_count, active)
}

/// Smallest ordinal in `D`, or `None` if `D` is empty.
///
/// §9 flags that the upstream Go source carries a buggy sibling of this
/// function (`k = max` instead of `max = k` in the min/max helpers); this
/// implementation is the corrected semantics only.
pub fn min_ordinal(desired: &BTreeSet<i32>) -> Option<i32> {
    desired.iter().next().copied()
}

/// Largest ordinal in `D`, or `None` if `D` is empty.
pub fn max_ordinal(desired: &BTreeSet<i32>) -> Option<i32> {
    desired.iter().next_back().copied()
}

pub fn has(desired: &BTreeSet<i32>, ordinal: i32) -> bool {
    desired.contains(&ordinal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_scale_up() {
        let d = desired_ordinals(3, &BTreeSet::new());
        assert_eq!(d, BTreeSet::from([0, 1, 2]));
    }

    #[test]
    fn delete_slot_in_range() {
        let d = desired_ordinals(3, &BTreeSet::from([1]));
        assert_eq!(d, BTreeSet::from([0, 2, 3]));
    }

    #[test]
    fn delete_slot_outside_range_is_ignored() {
        let d = desired_ordinals(3, &BTreeSet::from([5]));
        assert_eq!(d, BTreeSet::from([0, 1, 2]));
    }

    #[test]
    fn zero_replicas_with_delete_slots() {
        let d = desired_ordinals(0, &BTreeSet::from([0, 1]));
        assert!(d.is_empty());
    }

    #[test]
    fn multiple_delete_slots_in_range() {
        // replicas=3, delete {0, 1} => maxCount grows to 5, D = {2,3,4}
        let d = desired_ordinals(3, &BTreeSet::from([0, 1]));
        assert_eq!(d, BTreeSet::from([2, 3, 4]));
        assert_eq!(d.len(), 3);
    }

    #[test]
    fn min_max_of_empty_set() {
        let d: BTreeSet<i32> = BTreeSet::new();
        assert_eq!(min_ordinal(&d), None);
        assert_eq!(max_ordinal(&d), None);
    }

    #[test]
    fn min_max_ordinal() {
        let d = desired_ordinals(3, &BTreeSet::from([1]));
        assert_eq!(min_ordinal(&d), Some(0));
        assert_eq!(max_ordinal(&d), Some(3));
    }

    // |desiredOrdinals(replicas, deleteSlots)| == replicas, for a broad sample
    // of inputs (property-based per spec.md §8, hand-expanded since this
    // crate does not pull in a property-testing crate the teacher didn't
    // already depend on).
    #[test]
    fn cardinality_matches_replicas_property() {
        for replicas in 0..12 {
            let candidate_slots: Vec<i32> = (0..12).collect();
            for mask in 0u32..(1 << candidate_slots.len()) {
                let slots: BTreeSet<i32> = candidate_slots
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| mask & (1 << i) != 0)
                    .map(|(_, &s)| s)
                    .collect();
                let d = desired_ordinals(replicas, &slots);
                assert_eq!(d.len() as i32, replicas, "replicas={replicas} slots={slots:?}");
            }
        }
    }

    #[test]
    fn contiguous_after_removing_in_range_delete_slots() {
        // D union active_delete_slots must be exactly [0, maxCount).
        for replicas in 0..6 {
            for a in 0..6 {
                for b in 0..6 {
                    let slots = BTreeSet::from([a, b]);
                    let (max_count, active) =
                        max_replica_count_and_active_delete_slots(replicas, &slots);
                    let d = desired_ordinals(replicas, &slots);
                    let union: BTreeSet<i32> = d.union(&active).copied().collect();
                    let full_range: BTreeSet<i32> = (0..max_count).collect();
                    assert_eq!(union, full_range);
                }
            }
        }
    }
}
