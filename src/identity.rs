//! Identity / name binder (component B, §4.2) and the annotation accessors
//! that carry `deleteSlots` / `pausedReconcile` across the built-in/extended
//! boundary (§6, §9 — the `v1` vs `v1alpha1` annotation-key ambiguity).

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

static ORDINAL_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"-(\d+)$").unwrap());

/// Builds a controller owner reference pointing at `obj`, matching §3's
/// "owner reference points to the set with controller=true,
/// blockOwnerDeletion=true" invariant. Generic over any cluster-scoped or
/// namespaced kind with a trivial `DynamicType`, so it serves pods, claims,
/// and revisions alike — grounded on the `controller_reference_to_obj`
/// helper used throughout the stackabletech operator-rs based examples.
pub fn controller_owner_ref<K>(obj: &K) -> OwnerReference
where
    K: Resource<DynamicType = ()>,
{
    OwnerReference {
        api_version: K::api_version(&()).into_owned(),
        kind: K::kind(&()).into_owned(),
        name: obj.name_any(),
        uid: obj.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Pod name for ordinal `i` of set `set_name`: `"{set_name}-{i}"`.
pub fn pod_name(set_name: &str, ordinal: i32) -> String {
    format!("{set_name}-{ordinal}")
}

/// Claim name for `(template_name, set_name, ordinal)`: `"{template}-{set}-{i}"`.
pub fn claim_name(template_name: &str, set_name: &str, ordinal: i32) -> String {
    format!("{template_name}-{set_name}-{ordinal}")
}

/// Parses the ordinal suffix from a pod/claim name, `None` if it has none.
pub fn parse_ordinal(name: &str) -> Option<i32> {
    ORDINAL_SUFFIX
        .captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// A pod owned by `set_name` whose ordinal does not fall in the desired
/// ordinal set `D` is condemned.
pub fn is_condemned(ordinal: i32, desired: &BTreeSet<i32>) -> bool {
    !desired.contains(&ordinal)
}

pub mod annotations {
    //! §6: `delete-slots` is the canonical `v1` annotation key; `deleted-slots`
    //! is accepted on read for compatibility with the `v1alpha1` surface but
    //! is never written. Parse failures of either key are treated as an empty
    //! set — they must never fail reconciliation (§7).

    use super::*;
    use tracing::warn;

    pub const DELETE_SLOTS: &str = "delete-slots";
    const DELETE_SLOTS_LEGACY: &str = "deleted-slots";
    pub const PAUSED_RECONCILE: &str = "paused-reconcile";
    pub const UPGRADE_MARKER: &str = "apps.pingcap.com/upgrade-to-asts";

    /// Reads `delete-slots`, preferring the canonical key over the legacy
    /// `v1alpha1` one if both are present. A malformed value (either key) is
    /// treated as an empty set rather than propagated as an error.
    pub fn get_delete_slots(meta: &ObjectMeta) -> BTreeSet<i32> {
        let Some(annotations) = meta.annotations.as_ref() else {
            return BTreeSet::new();
        };
        let raw = annotations
            .get(DELETE_SLOTS)
            .or_else(|| annotations.get(DELETE_SLOTS_LEGACY));
        let Some(raw) = raw else {
            return BTreeSet::new();
        };
        match serde_json::from_str::<Vec<i32>>(raw) {
            Ok(slots) => slots.into_iter().collect(),
            Err(e) => {
                warn!(error = %e, value = %raw, "failed to parse delete-slots annotation, treating as empty");
                BTreeSet::new()
            }
        }
    }

    /// Sets `delete-slots` to `slots` (clearing the annotation when empty),
    /// always on the canonical `v1` key; never writes the legacy key.
    pub fn set_delete_slots(meta: &mut ObjectMeta, slots: &BTreeSet<i32>) -> serde_json::Result<()> {
        let annotations = meta.annotations.get_or_insert_with(Default::default);
        if slots.is_empty() {
            annotations.remove(DELETE_SLOTS);
        } else {
            let encoded = serde_json::to_string(&slots.iter().copied().collect::<Vec<_>>())?;
            annotations.insert(DELETE_SLOTS.to_string(), encoded);
        }
        Ok(())
    }

    pub fn add_delete_slots(meta: &mut ObjectMeta, slots: &BTreeSet<i32>) -> serde_json::Result<()> {
        let mut current = get_delete_slots(meta);
        current.extend(slots);
        set_delete_slots(meta, &current)
    }

    pub fn is_paused_reconcile(meta: &ObjectMeta) -> bool {
        meta.annotations
            .as_ref()
            .and_then(|a| a.get(PAUSED_RECONCILE))
            .map(|v| v == "true")
            .unwrap_or(false)
    }

    pub fn set_paused_reconcile(meta: &mut ObjectMeta, paused: bool) {
        let annotations = meta.annotations.get_or_insert_with(Default::default);
        if paused {
            annotations.insert(PAUSED_RECONCILE.to_string(), "true".to_string());
        } else {
            annotations.remove(PAUSED_RECONCILE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_and_claim_naming() {
        assert_eq!(pod_name("web", 2), "web-2");
        assert_eq!(claim_name("data", "web", 2), "data-web-2");
    }

    #[test]
    fn parses_ordinal_suffix() {
        assert_eq!(parse_ordinal("web-0"), Some(0));
        assert_eq!(parse_ordinal("web-12"), Some(12));
        assert_eq!(parse_ordinal("web"), None);
        assert_eq!(parse_ordinal("web-a"), None);
    }

    #[test]
    fn condemned_pods() {
        let d = BTreeSet::from([0, 2, 3]);
        assert!(is_condemned(1, &d));
        assert!(!is_condemned(0, &d));
    }

    #[test]
    fn delete_slots_annotation_roundtrip() {
        let mut meta = ObjectMeta::default();
        let slots = BTreeSet::from([1, 4]);
        annotations::set_delete_slots(&mut meta, &slots).unwrap();
        assert_eq!(annotations::get_delete_slots(&meta), slots);
    }

    #[test]
    fn delete_slots_malformed_is_empty() {
        let mut meta = ObjectMeta::default();
        meta.annotations = Some(
            [(annotations::DELETE_SLOTS.to_string(), "not json".to_string())]
                .into_iter()
                .collect(),
        );
        assert!(annotations::get_delete_slots(&meta).is_empty());
    }

    #[test]
    fn delete_slots_legacy_key_accepted_on_read() {
        let mut meta = ObjectMeta::default();
        meta.annotations = Some(
            [("deleted-slots".to_string(), "[2,3]".to_string())]
                .into_iter()
                .collect(),
        );
        assert_eq!(annotations::get_delete_slots(&meta), BTreeSet::from([2, 3]));
    }

    #[test]
    fn canonical_key_preferred_over_legacy() {
        let mut meta = ObjectMeta::default();
        meta.annotations = Some(
            [
                (annotations::DELETE_SLOTS.to_string(), "[1]".to_string()),
                ("deleted-slots".to_string(), "[9]".to_string()),
            ]
            .into_iter()
            .collect(),
        );
        assert_eq!(annotations::get_delete_slots(&meta), BTreeSet::from([1]));
    }

    #[test]
    fn paused_reconcile_roundtrip() {
        let mut meta = ObjectMeta::default();
        assert!(!annotations::is_paused_reconcile(&meta));
        annotations::set_paused_reconcile(&mut meta, true);
        assert!(annotations::is_paused_reconcile(&meta));
        annotations::set_paused_reconcile(&mut meta, false);
        assert!(!annotations::is_paused_reconcile(&meta));
    }
}
