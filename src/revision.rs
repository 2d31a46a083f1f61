//! Revision store (component C, §4.3).
//!
//! Grounded on `examples/other_examples/.../stackabletech-operator-rs__src-history.rs`
//! (list/sort/next-revision shape) and on
//! `examples/original_source/pkg/third_party/k8s/controller_history.go`
//! (`EqualRevision`/`FindEqualRevisions`, the hash-label fast pre-filter).

use crate::crd::{AdvancedStatefulSet, AdvancedStatefulSetSpec};
use crate::error::{Error, Result};
use crate::identity::controller_owner_ref;
use k8s_openapi::api::apps::v1::ControllerRevision;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::runtime::RawExtension;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::debug;

/// Label carrying the content hash, fast pre-filter for [`equal_revision`].
pub const CONTROLLER_REVISION_HASH_LABEL: &str = "controller-revision-hash";

/// Maximum number of collision-driven rehash attempts before giving up
/// (§7: "Hash collision: bump collisionCount on set status; retry revision
/// creation").
const MAX_COLLISION_RETRIES: i32 = 10;

/// The part of a set's template that is content-hashed into a revision.
/// Mirrors what the built-in StatefulSet controller snapshots: the pod
/// template plus the volume claim templates (everything that defines a
/// replica's identity besides its ordinal).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Hash)]
struct RevisionPayload {
    template: PodTemplateSpec,
    volume_claim_templates: Vec<PersistentVolumeClaim>,
}

impl RevisionPayload {
    fn from_spec(spec: &AdvancedStatefulSetSpec) -> Self {
        RevisionPayload {
            template: spec.template.clone(),
            volume_claim_templates: spec.volume_claim_templates.clone().unwrap_or_default(),
        }
    }
}

fn hash_hex(payload: &RevisionPayload, collision_count: i32) -> String {
    let mut hasher = DefaultHasher::new();
    payload.hash(&mut hasher);
    collision_count.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

/// `"{set}-{hash}"`, matching the built-in `ControllerRevisionName` helper's
/// naming (we don't bother with its 223-char prefix trim: set names are
/// bounded by the API server's own 253-char object name limit already).
pub fn revision_name(set_name: &str, hash: &str) -> String {
    format!("{set_name}-{hash}")
}

/// Builds the in-memory candidate for the set's current template, at
/// `revision_number`, using `collision_count` to perturb the hash if needed.
/// Does not talk to the API — see [`create_or_reuse`] for that.
pub fn new_revision(
    set: &AdvancedStatefulSet,
    revision_number: i64,
    collision_count: i32,
) -> Result<ControllerRevision> {
    let payload = RevisionPayload::from_spec(&set.spec);
    let hash = hash_hex(&payload, collision_count);
    let name = revision_name(&set.name_any(), &hash);

    let mut labels: BTreeMap<String, String> = set
        .spec
        .selector
        .match_labels
        .clone()
        .unwrap_or_default();
    labels.insert(CONTROLLER_REVISION_HASH_LABEL.to_string(), hash);

    let data = serde_json::to_value(&payload)?;

    Ok(ControllerRevision {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: set.namespace(),
            labels: Some(labels),
            owner_references: Some(vec![controller_owner_ref(set)]),
            ..Default::default()
        },
        data: Some(RawExtension(data)),
        revision: revision_number,
    })
}

pub fn hash_label(revision: &ControllerRevision) -> Option<&str> {
    revision
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(CONTROLLER_REVISION_HASH_LABEL))
        .map(|s| s.as_str())
}

/// True when `lhs`/`rhs` are semantically equal: same content bytes and,
/// where both carry the hash label, matching hashes. The hash label is a
/// fast pre-filter only — a hash match with differing `data` is NOT equal
/// (that's the collision case `create_or_reuse` has to handle).
pub fn equal_revision(lhs: &ControllerRevision, rhs: &ControllerRevision) -> bool {
    if let (Some(lh), Some(rh)) = (hash_label(lhs), hash_label(rhs)) {
        if lh != rh {
            return false;
        }
    }
    match (&lhs.data, &rhs.data) {
        (Some(RawExtension(l)), Some(RawExtension(r))) => l == r,
        (None, None) => true,
        _ => false,
    }
}

/// Finds, among `revisions`, those equal to `needle`, preserving order.
pub fn find_equal_revisions<'a>(
    revisions: &'a [ControllerRevision],
    needle: &ControllerRevision,
) -> Vec<&'a ControllerRevision> {
    revisions.iter().filter(|r| equal_revision(r, needle)).collect()
}

/// Sorts `revisions` in place by `(revision asc, creationTimestamp asc, name asc)`.
pub fn sort_controller_revisions(revisions: &mut [ControllerRevision]) {
    revisions.sort_by(|a, b| {
        a.revision.cmp(&b.revision).then_with(|| {
            a.metadata
                .creation_timestamp
                .as_ref()
                .map(|t| &t.0)
                .cmp(&b.metadata.creation_timestamp.as_ref().map(|t| &t.0))
                .then_with(|| a.metadata.name.cmp(&b.metadata.name))
        })
    });
}

/// Next revision number given the sorted, owned revision list: 1 if there
/// are none, otherwise the highest existing revision + 1.
pub fn next_revision_number(sorted_revisions: &[ControllerRevision]) -> i64 {
    sorted_revisions.last().map(|r| r.revision + 1).unwrap_or(1)
}

/// Lists all `ControllerRevision`s owned (controller reference) by `set`.
pub async fn list(
    api: &Api<ControllerRevision>,
    set: &AdvancedStatefulSet,
) -> Result<Vec<ControllerRevision>> {
    let selector = label_selector_string(set);
    let lp = if selector.is_empty() {
        ListParams::default()
    } else {
        ListParams::default().labels(&selector)
    };
    let list = api.list(&lp).await?;
    let owner_uid = set.uid();
    let mut owned: Vec<ControllerRevision> = list
        .items
        .into_iter()
        .filter(|r| {
            r.metadata
                .owner_references
                .as_ref()
                .map(|refs| {
                    refs.iter()
                        .any(|o| o.controller == Some(true) && Some(&o.uid) == owner_uid.as_ref())
                })
                .unwrap_or(false)
        })
        .collect();
    sort_controller_revisions(&mut owned);
    Ok(owned)
}

fn label_selector_string(set: &AdvancedStatefulSet) -> String {
    set.spec
        .selector
        .match_labels
        .clone()
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Creates `candidate` if no equal revision exists among `owned`, otherwise
/// returns the existing equal one. On a hash collision (same hash label,
/// different data) bumps `collision_count` and rehashes, up to
/// [`MAX_COLLISION_RETRIES`] attempts.
pub async fn create_or_reuse(
    api: &Api<ControllerRevision>,
    set: &AdvancedStatefulSet,
    revision_number: i64,
    owned: &[ControllerRevision],
    collision_count: &mut i32,
) -> Result<ControllerRevision> {
    for _ in 0..MAX_COLLISION_RETRIES {
        let candidate = new_revision(set, revision_number, *collision_count)?;
        let equal = find_equal_revisions(owned, &candidate);
        if let Some(existing) = equal.into_iter().max_by_key(|r| r.revision) {
            return Ok(existing.clone());
        }

        let collides = owned
            .iter()
            .any(|r| hash_label(r) == hash_label(&candidate) && !equal_revision(r, &candidate));
        if collides {
            debug!(set = %set.name_any(), "controller revision hash collision, bumping collisionCount");
            *collision_count += 1;
            continue;
        }

        return Ok(api.create(&PostParams::default(), &candidate).await?);
    }
    Err(Error::CollisionRetryExhausted(set.name_any()))
}

/// Drops revisions beyond `revision_history_limit`, always keeping
/// `current_revision`, `update_revision`, and any revision named by
/// `live_pod_revisions` (the `controller-revision-hash` label values carried
/// by pods that still exist).
pub async fn truncate(
    api: &Api<ControllerRevision>,
    owned: &[ControllerRevision],
    revision_history_limit: i32,
    current_revision: Option<&str>,
    update_revision: Option<&str>,
    live_pod_revisions: &BTreeSet<String>,
) -> Result<()> {
    let keep_count = revision_history_limit.max(0) as usize;
    let mut sorted = owned.to_vec();
    sort_controller_revisions(&mut sorted);

    let is_protected = |r: &ControllerRevision| -> bool {
        let name = r.metadata.name.as_deref().unwrap_or_default();
        Some(name) == current_revision
            || Some(name) == update_revision
            || live_pod_revisions.contains(name)
    };

    let deletable: Vec<&ControllerRevision> = sorted.iter().filter(|r| !is_protected(r)).collect();
    if deletable.len() <= keep_count {
        return Ok(());
    }
    let to_delete = deletable.len() - keep_count;
    for revision in deletable.into_iter().take(to_delete) {
        if let Some(name) = &revision.metadata.name {
            match api.delete(name, &DeleteParams::default()).await {
                Ok(_) => {}
                Err(e) if crate::error::is_not_found(&e) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use chrono::{TimeZone, Utc};

    fn revision(name: &str, rev: i64, hash: &str, data: serde_json::Value) -> ControllerRevision {
        ControllerRevision {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    [(CONTROLLER_REVISION_HASH_LABEL.to_string(), hash.to_string())]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            },
            data: Some(RawExtension(data)),
            revision: rev,
        }
    }

    #[test]
    fn equal_revisions_same_data_same_hash() {
        let a = revision("s-abc", 1, "abc", serde_json::json!({"x": 1}));
        let b = revision("s-abc2", 2, "abc", serde_json::json!({"x": 1}));
        assert!(equal_revision(&a, &b));
    }

    #[test]
    fn hash_collision_is_not_equal() {
        let a = revision("s-abc", 1, "abc", serde_json::json!({"x": 1}));
        let b = revision("s-abc2", 2, "abc", serde_json::json!({"x": 2}));
        assert!(!equal_revision(&a, &b));
    }

    #[test]
    fn sort_by_revision_then_time_then_name() {
        let mut a = revision("b", 1, "h", serde_json::json!({}));
        let mut b = revision("a", 1, "h", serde_json::json!({}));
        let t_early = Time(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        let t_late = Time(Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap());
        a.metadata.creation_timestamp = Some(t_early);
        b.metadata.creation_timestamp = Some(t_late);
        let mut revisions = vec![b.clone(), a.clone()];
        sort_controller_revisions(&mut revisions);
        assert_eq!(revisions[0].metadata.name, a.metadata.name);
        assert_eq!(revisions[1].metadata.name, b.metadata.name);
    }

    #[test]
    fn next_revision_number_empty_is_one() {
        assert_eq!(next_revision_number(&[]), 1);
    }

    #[test]
    fn next_revision_number_increments() {
        let revisions = vec![revision("a", 3, "h", serde_json::json!({}))];
        assert_eq!(next_revision_number(&revisions), 4);
    }
}
