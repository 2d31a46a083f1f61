//! Update strategy engine (§4.5): decides which revision a newly created pod
//! should run, and drives the rolling-update deletions that push existing
//! pods toward `updateRevision`.
//!
//! Grounded on the teacher's `GratefulSetPool::reconcile` in
//! `examples/owen-d-gratefulset/src/gsp.rs` — the "Order of operations
//! should be (ScaleDown -> ScaleUp)" comment there is the same ordering
//! this module follows, generalized from whole-pool replacement down to
//! per-ordinal revision comparison.

use super::{is_running_ready, pod_ordinal};
use crate::crd::AdvancedStatefulSet;
use crate::error::Result;
use crate::podcontrol;
use crate::revision::CONTROLLER_REVISION_HASH_LABEL;
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::runtime::events::Recorder;
use kube::ResourceExt;
use std::collections::BTreeSet;
use tracing::info;

/// Picks the revision hash a *new* pod at `ordinal` should be built from.
/// `OnDelete` always uses `updateRevision` for brand-new pods (only a
/// manual delete of an existing pod triggers a revision change under that
/// strategy); `RollingUpdate{partition}` splits on the ordinal.
pub fn revision_hash_for_new_pod(
    set: &AdvancedStatefulSet,
    ordinal: i32,
    current_hash: &str,
    update_hash: &str,
) -> String {
    if set.spec.is_on_delete() {
        return update_hash.to_string();
    }
    let partition = set.spec.partition().unwrap_or(0);
    if ordinal >= partition {
        update_hash.to_string()
    } else {
        current_hash.to_string()
    }
}

/// Stage 10. Returns `Some(update_hash)` once `currentRevision` should
/// advance to `updateRevision` (every in-range pod already carries it and,
/// for `RollingUpdate`, the partition has reached zero); `None` otherwise.
pub async fn apply_update_strategy(
    set: &AdvancedStatefulSet,
    pods_api: &Api<Pod>,
    recorder: &Recorder,
    pods: &[Pod],
    desired: &BTreeSet<i32>,
    current_hash: &str,
    update_hash: &str,
    ordered_ready: bool,
) -> Result<Option<String>> {
    if set.spec.is_on_delete() {
        let any_on_current = pods.iter().any(|p| {
            pod_ordinal(p).map(|o| desired.contains(&o)).unwrap_or(false)
                && revision_label(p).as_deref() == Some(current_hash)
        });
        return Ok((!any_on_current).then(|| update_hash.to_string()));
    }

    let partition = set.spec.partition().unwrap_or(0);
    let mut stale: Vec<&Pod> = pods
        .iter()
        .filter(|p| {
            pod_ordinal(p)
                .map(|o| desired.contains(&o) && o >= partition)
                .unwrap_or(false)
                && revision_label(p).as_deref() != Some(update_hash)
        })
        .collect();
    stale.sort_by_key(|p| std::cmp::Reverse(pod_ordinal(p).unwrap_or(0)));

    for pod in stale {
        if ordered_ready && !is_running_ready(pod) {
            // Refuse to tear down a pod while a higher-ordinal one it
            // shares a rollout with isn't up yet.
            return Ok(None);
        }
        podcontrol::delete_pod(pods_api, recorder, &pod.name_any()).await?;
        info!(pod = %pod.name_any(), "rolling update: replacing stale revision");
        if ordered_ready {
            return Ok(None);
        }
    }

    if partition == 0 {
        let all_on_update = pods
            .iter()
            .filter(|p| pod_ordinal(p).map(|o| desired.contains(&o)).unwrap_or(false))
            .all(|p| revision_label(p).as_deref() == Some(update_hash));
        if all_on_update {
            return Ok(Some(update_hash.to_string()));
        }
    }
    Ok(None)
}

fn revision_label(pod: &Pod) -> Option<String> {
    pod.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(CONTROLLER_REVISION_HASH_LABEL))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::AdvancedStatefulSetSpec;
    use k8s_openapi::api::apps::v1::{StatefulSetRollingUpdateStrategy, StatefulSetUpdateStrategy};
    use k8s_openapi::api::core::v1::PodTemplateSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

    fn set_with_partition(partition: Option<i32>) -> AdvancedStatefulSet {
        AdvancedStatefulSet::new(
            "web",
            AdvancedStatefulSetSpec {
                replicas: 3,
                selector: LabelSelector::default(),
                service_name: "web".to_string(),
                template: PodTemplateSpec::default(),
                volume_claim_templates: None,
                pod_management_policy: None,
                update_strategy: Some(StatefulSetUpdateStrategy {
                    type_: Some("RollingUpdate".to_string()),
                    rolling_update: Some(StatefulSetRollingUpdateStrategy {
                        partition,
                        ..Default::default()
                    }),
                }),
                revision_history_limit: None,
                persistent_volume_claim_retention_policy: None,
                min_ready_seconds: None,
            },
        )
    }

    #[test]
    fn new_pod_below_partition_uses_current_revision() {
        let set = set_with_partition(Some(2));
        assert_eq!(revision_hash_for_new_pod(&set, 0, "cur", "upd"), "cur");
        assert_eq!(revision_hash_for_new_pod(&set, 2, "cur", "upd"), "upd");
    }

    #[test]
    fn on_delete_new_pods_always_use_update_revision() {
        let mut set = set_with_partition(None);
        set.spec.update_strategy = Some(StatefulSetUpdateStrategy {
            type_: Some("OnDelete".to_string()),
            rolling_update: None,
        });
        assert_eq!(revision_hash_for_new_pod(&set, 0, "cur", "upd"), "upd");
    }
}
