//! Reconciler core (component F, §4.4) — the 12-stage state machine that
//! drives one `AdvancedStatefulSet` toward its desired pods, claims, and
//! revisions.
//!
//! Each stage is a free function taking borrowed views of the set's owned
//! objects (an `OwnedState` snapshot fetched once at the top of the pass),
//! the way the teacher's `reconcile` in `examples/owen-d-gratefulset/src/gs.rs`
//! compares an in-memory pool snapshot rather than re-listing mid-pass.
//! Instrumentation follows
//! `examples/other_examples/.../No-bodyq-Stellar-K8s__src-controller-reconciler.rs`'s
//! `#[instrument(skip(ctx), fields(...))]` convention.

pub mod strategy;

use crate::crd::{AdvancedStatefulSet, AdvancedStatefulSetStatus, PodManagementPolicy};
use crate::error::{Error, Result};
use crate::identity::{self, annotations, controller_owner_ref};
use crate::podcontrol;
use crate::revision;
use crate::slots;

use k8s_openapi::api::apps::v1::ControllerRevision;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::runtime::events::{Recorder, Reporter};
use kube::runtime::finalizer::{self, Event as FinalizerEvent};
use kube::{Client, ResourceExt};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

pub const FINALIZER: &str = "apps.rs-operators.io/advanced-statefulset";

/// Shared, cheaply-clonable state handed to every reconciliation pass by
/// `kube::runtime::Controller::run`.
pub struct Context {
    pub client: Client,
}

/// The owned objects fetched from the cluster for one pass, post adoption.
struct OwnedState {
    pods: Vec<Pod>,
    claims: Vec<PersistentVolumeClaim>,
    revisions: Vec<ControllerRevision>,
}

#[instrument(skip(ctx), fields(namespace = %set.namespace().unwrap_or_default(), name = %set.name_any()))]
pub async fn reconcile(set: Arc<AdvancedStatefulSet>, ctx: Arc<Context>) -> Result<Action> {
    let ns = set
        .namespace()
        .ok_or_else(|| Error::MissingNamespace(set.name_any()))?;
    let sets: Api<AdvancedStatefulSet> = Api::namespaced(ctx.client.clone(), &ns);

    finalizer::finalizer(&sets, FINALIZER, set, |event| async {
        match event {
            FinalizerEvent::Apply(set) => apply(&set, &ctx).await,
            FinalizerEvent::Cleanup(_set) => {
                // Pods, claims, and revisions carry owner references; native
                // Kubernetes garbage collection reaps them once the set
                // itself is gone. No extra teardown to perform here.
                Ok(Action::await_change())
            }
        }
    })
    .await
    .map_err(Error::from)
}

pub fn error_policy(_set: Arc<AdvancedStatefulSet>, err: &Error, _ctx: Arc<Context>) -> Action {
    warn!(error = %err, "reconcile failed, requeuing");
    Action::requeue(Duration::from_secs(60))
}

async fn apply(set: &AdvancedStatefulSet, ctx: &Context) -> Result<Action> {
    if annotations::is_paused_reconcile(&set.metadata) {
        return Ok(Action::await_change());
    }

    let ns = set
        .namespace()
        .ok_or_else(|| Error::MissingNamespace(set.name_any()))?;
    let sets: Api<AdvancedStatefulSet> = Api::namespaced(ctx.client.clone(), &ns);
    let pods_api: Api<Pod> = Api::namespaced(ctx.client.clone(), &ns);
    let claims_api: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), &ns);
    let revisions_api: Api<ControllerRevision> = Api::namespaced(ctx.client.clone(), &ns);
    let recorder = Recorder::new(
        ctx.client.clone(),
        Reporter {
            controller: "advanced-statefulset-controller".to_string(),
            instance: None,
        },
        set.object_ref(&()),
    );

    // Stage 1: adopt/orphan.
    let owned = fetch_owned(set, &pods_api, &claims_api, &revisions_api).await?;

    // Stage 2: desired ordinal set.
    let delete_slots = annotations::get_delete_slots(&set.metadata);
    let desired = slots::desired_ordinals(set.spec.replicas, &delete_slots);

    // Stage 3: revision resolution.
    let mut collision_count = set
        .status
        .as_ref()
        .and_then(|s| s.collision_count)
        .unwrap_or(0);
    let update_revision = revision::create_or_reuse(
        &revisions_api,
        set,
        revision::next_revision_number(&owned.revisions),
        &owned.revisions,
        &mut collision_count,
    )
    .await?;
    let update_hash = revision::hash_label(&update_revision)
        .unwrap_or_default()
        .to_string();

    let current_revision = match set
        .status
        .as_ref()
        .and_then(|s| s.current_revision.as_deref())
    {
        Some(name) => owned
            .revisions
            .iter()
            .find(|r| r.name_any() == name)
            .cloned()
            .unwrap_or_else(|| update_revision.clone()),
        None => update_revision.clone(),
    };
    let current_hash = revision::hash_label(&current_revision)
        .unwrap_or_default()
        .to_string();

    let policy = PodManagementPolicy::from_spec(&set.spec);

    // Stage 5: identity repair.
    repair_identity(set, &pods_api, &owned, &desired).await?;

    // Stage 6: replace failed/succeeded pods.
    if replace_terminal_pods(&pods_api, &recorder, &owned).await? {
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    // Stage 7: creates, ascending ordinal.
    if let Some(action) = create_missing(
        set,
        &pods_api,
        &claims_api,
        &recorder,
        &owned,
        &desired,
        &current_hash,
        &update_hash,
        policy,
    )
    .await?
    {
        return Ok(action);
    }

    // Stage 8: wait on not-ready.
    if policy.is_ordered_ready() && !all_active_ready(&owned.pods, &desired) {
        return Ok(Action::requeue(Duration::from_secs(5)));
    }

    // Stage 9: condemned deletion, descending ordinal.
    if let Some(action) = delete_condemned(
        &pods_api,
        &claims_api,
        set,
        &recorder,
        &owned,
        &desired,
        policy,
    )
    .await?
    {
        return Ok(action);
    }

    // Stage 10: rolling update.
    let advanced_current_hash = strategy::apply_update_strategy(
        set,
        &pods_api,
        &recorder,
        &owned.pods,
        &desired,
        &current_hash,
        &update_hash,
        policy.is_ordered_ready(),
    )
    .await?;

    // Stage 11: status update.
    write_status(
        &sets,
        set,
        &owned,
        &desired,
        &current_revision,
        &update_revision,
        advanced_current_hash.as_deref(),
        collision_count,
    )
    .await?;

    // Stage 12: revision GC.
    let live_pod_revisions: BTreeSet<String> = owned
        .pods
        .iter()
        .filter_map(revision_label_of_pod)
        .collect();
    revision::truncate(
        &revisions_api,
        &owned.revisions,
        set.spec.revision_history_limit.unwrap_or(10),
        Some(current_revision.name_any().as_str()),
        Some(update_revision.name_any().as_str()),
        &live_pod_revisions,
    )
    .await?;

    Ok(Action::requeue(Duration::from_secs(300)))
}

async fn fetch_owned(
    set: &AdvancedStatefulSet,
    pods_api: &Api<Pod>,
    claims_api: &Api<PersistentVolumeClaim>,
    revisions_api: &Api<ControllerRevision>,
) -> Result<OwnedState> {
    let match_labels = set.spec.selector.match_labels.clone().unwrap_or_default();
    let mut all_pods = list_matching(pods_api, &match_labels).await?;
    let mut all_claims = list_matching(claims_api, &match_labels).await?;
    let mut all_revisions = list_matching(revisions_api, &match_labels).await?;

    for pod in all_pods.iter_mut() {
        adopt_or_release_one(pods_api, set, &mut pod.metadata).await?;
    }
    for claim in all_claims.iter_mut() {
        adopt_or_release_one(claims_api, set, &mut claim.metadata).await?;
    }
    for revision in all_revisions.iter_mut() {
        adopt_or_release_one(revisions_api, set, &mut revision.metadata).await?;
    }

    let set_uid = set.uid();
    let pods = all_pods
        .into_iter()
        .filter(|p| is_owned(&p.metadata, set_uid.as_deref()))
        .collect();
    let claims = all_claims
        .into_iter()
        .filter(|c| is_owned(&c.metadata, set_uid.as_deref()))
        .collect();
    let mut revisions: Vec<ControllerRevision> = all_revisions
        .into_iter()
        .filter(|r| is_owned(&r.metadata, set_uid.as_deref()))
        .collect();
    revision::sort_controller_revisions(&mut revisions);

    Ok(OwnedState {
        pods,
        claims,
        revisions,
    })
}

async fn list_matching<K>(api: &Api<K>, match_labels: &BTreeMap<String, String>) -> Result<Vec<K>>
where
    K: Clone + std::fmt::Debug + serde::de::DeserializeOwned,
{
    let selector = match_labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");
    let lp = if selector.is_empty() {
        ListParams::default()
    } else {
        ListParams::default().labels(&selector)
    };
    Ok(api.list(&lp).await?.items)
}

fn is_owned(meta: &ObjectMeta, set_uid: Option<&str>) -> bool {
    meta.owner_references
        .as_ref()
        .map(|refs| {
            refs.iter()
                .any(|o| o.controller == Some(true) && Some(o.uid.as_str()) == set_uid)
        })
        .unwrap_or(false)
}

fn matches_selector(labels: Option<&BTreeMap<String, String>>, match_labels: &BTreeMap<String, String>) -> bool {
    match labels {
        Some(labels) => match_labels.iter().all(|(k, v)| labels.get(k) == Some(v)),
        None => match_labels.is_empty(),
    }
}

/// Stage 1 per object: claim an unowned, selector-matching object; release
/// one this set owns but that no longer matches the selector.
async fn adopt_or_release_one<K>(api: &Api<K>, set: &AdvancedStatefulSet, meta: &mut ObjectMeta) -> Result<()>
where
    K: kube::Resource<DynamicType = ()> + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    let set_uid = set.uid();
    let owned_by_set = is_owned(meta, set_uid.as_deref());
    let matches = matches_selector(
        meta.labels.as_ref(),
        &set.spec.selector.match_labels.clone().unwrap_or_default(),
    );
    let has_other_controller = meta
        .owner_references
        .as_ref()
        .map(|refs| refs.iter().any(|o| o.controller == Some(true)))
        .unwrap_or(false);

    let Some(name) = meta.name.clone() else {
        return Ok(());
    };

    if !owned_by_set && matches && !has_other_controller {
        let mut refs = meta.owner_references.clone().unwrap_or_default();
        refs.push(controller_owner_ref(set));
        let patch = serde_json::json!({ "metadata": { "ownerReferences": refs } });
        api.patch(&name, &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        meta.owner_references = Some(refs);
        info!(object = %name, "adopted orphan into set");
    } else if owned_by_set && !matches {
        let refs: Vec<_> = meta
            .owner_references
            .clone()
            .unwrap_or_default()
            .into_iter()
            .filter(|o| Some(o.uid.as_str()) != set_uid.as_deref())
            .collect();
        let patch = serde_json::json!({ "metadata": { "ownerReferences": refs } });
        api.patch(&name, &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        meta.owner_references = Some(refs);
        info!(object = %name, "released object, no longer matches selector");
    }
    Ok(())
}

/// Stage 5. Only hostname/subdomain/owner-reference are repaired here — the
/// revision label is governed entirely by stage 7 (creates) and stage 10
/// (rolling update) and must never be touched in this stage, so that an
/// in-place repair can never downgrade a pod from `updateRevision` back to
/// `currentRevision`.
async fn repair_identity(
    set: &AdvancedStatefulSet,
    pods_api: &Api<Pod>,
    owned: &OwnedState,
    desired: &BTreeSet<i32>,
) -> Result<()> {
    for pod in &owned.pods {
        let Some(ordinal) = pod_ordinal(pod) else {
            continue;
        };
        if !desired.contains(&ordinal) {
            continue;
        }
        let expected_name = identity::pod_name(&set.name_any(), ordinal);
        let spec = pod.spec.as_ref();
        let hostname_ok = spec.and_then(|s| s.hostname.as_deref()) == Some(expected_name.as_str());
        let subdomain_ok =
            spec.and_then(|s| s.subdomain.as_deref()) == Some(set.spec.service_name.as_str());
        let owner_ok = is_owned(&pod.metadata, set.uid().as_deref());
        if hostname_ok && subdomain_ok && owner_ok {
            continue;
        }

        if !owner_ok {
            let mut refs = pod.metadata.owner_references.clone().unwrap_or_default();
            refs.push(controller_owner_ref(set));
            let patch = serde_json::json!({ "metadata": { "ownerReferences": refs } });
            pods_api
                .patch(&pod.name_any(), &PatchParams::default(), &Patch::Merge(patch))
                .await?;
        }
        if !hostname_ok || !subdomain_ok {
            let patch = serde_json::json!({
                "spec": {
                    "hostname": expected_name,
                    "subdomain": set.spec.service_name,
                },
            });
            pods_api
                .patch(&pod.name_any(), &PatchParams::default(), &Patch::Merge(patch))
                .await?;
        }
        info!(pod = %pod.name_any(), "repaired pod identity");
    }
    Ok(())
}

/// Stage 6. Returns `true` if at least one pod was deleted.
async fn replace_terminal_pods(
    pods_api: &Api<Pod>,
    recorder: &Recorder,
    owned: &OwnedState,
) -> Result<bool> {
    let mut replaced_any = false;
    for pod in &owned.pods {
        if is_failed(pod) {
            podcontrol::delete_pod(pods_api, recorder, &pod.name_any()).await?;
            replaced_any = true;
        }
    }
    Ok(replaced_any)
}

/// Stage 7.
#[allow(clippy::too_many_arguments)]
async fn create_missing(
    set: &AdvancedStatefulSet,
    pods_api: &Api<Pod>,
    claims_api: &Api<PersistentVolumeClaim>,
    recorder: &Recorder,
    owned: &OwnedState,
    desired: &BTreeSet<i32>,
    current_hash: &str,
    update_hash: &str,
    policy: PodManagementPolicy,
) -> Result<Option<Action>> {
    let existing: BTreeSet<i32> = owned.pods.iter().filter_map(pod_ordinal).collect();
    let claim_templates = set.spec.volume_claim_templates.clone().unwrap_or_default();

    for &ordinal in desired {
        if existing.contains(&ordinal) {
            continue;
        }
        for template in &claim_templates {
            let claim = podcontrol::build_claim(set, template, ordinal);
            podcontrol::create_claim_if_missing(claims_api, &claim).await?;
        }
        let hash = strategy::revision_hash_for_new_pod(set, ordinal, current_hash, update_hash);
        let pod = podcontrol::build_pod(set, ordinal, &set.spec.template, &hash, &claim_templates);
        podcontrol::create_pod(pods_api, recorder, &pod).await?;

        if policy.is_ordered_ready() {
            return Ok(Some(Action::requeue(Duration::from_secs(1))));
        }
    }
    Ok(None)
}

fn all_active_ready(pods: &[Pod], desired: &BTreeSet<i32>) -> bool {
    pods.iter()
        .filter(|p| pod_ordinal(p).map(|o| desired.contains(&o)).unwrap_or(false))
        .all(is_running_ready)
}

/// Stage 9.
#[allow(clippy::too_many_arguments)]
async fn delete_condemned(
    pods_api: &Api<Pod>,
    claims_api: &Api<PersistentVolumeClaim>,
    set: &AdvancedStatefulSet,
    recorder: &Recorder,
    owned: &OwnedState,
    desired: &BTreeSet<i32>,
    policy: PodManagementPolicy,
) -> Result<Option<Action>> {
    let mut condemned: Vec<&Pod> = owned
        .pods
        .iter()
        .filter(|p| {
            pod_ordinal(p)
                .map(|o| identity::is_condemned(o, desired))
                .unwrap_or(false)
        })
        .collect();
    condemned.sort_by_key(|p| std::cmp::Reverse(pod_ordinal(p).unwrap_or(0)));

    for pod in condemned {
        let ordinal = pod_ordinal(pod).unwrap_or(0);
        if policy.is_ordered_ready() {
            let lower_not_ready = owned.pods.iter().any(|p| {
                pod_ordinal(p)
                    .map(|o| o < ordinal && desired.contains(&o))
                    .unwrap_or(false)
                    && !is_running_ready(p)
            });
            if lower_not_ready {
                return Ok(Some(Action::requeue(Duration::from_secs(5))));
            }
        }
        podcontrol::delete_pod(pods_api, recorder, &pod.name_any()).await?;
        if set.spec.delete_claims_on_scaledown() {
            for template in set.spec.volume_claim_templates.iter().flatten() {
                let Some(template_name) = template.metadata.name.as_deref() else {
                    continue;
                };
                let claim = identity::claim_name(template_name, &set.name_any(), ordinal);
                podcontrol::delete_claim_if_present(claims_api, &claim).await?;
            }
        }
        if policy.is_ordered_ready() {
            return Ok(Some(Action::requeue(Duration::from_secs(1))));
        }
    }
    Ok(None)
}

#[allow(clippy::too_many_arguments)]
async fn write_status(
    sets: &Api<AdvancedStatefulSet>,
    set: &AdvancedStatefulSet,
    owned: &OwnedState,
    desired: &BTreeSet<i32>,
    current_revision: &ControllerRevision,
    update_revision: &ControllerRevision,
    advanced_current_hash: Option<&str>,
    collision_count: i32,
) -> Result<()> {
    let current_hash = revision::hash_label(current_revision).unwrap_or_default();
    let update_hash = revision::hash_label(update_revision).unwrap_or_default();

    let ready = owned
        .pods
        .iter()
        .filter(|p| pod_ordinal(p).map(|o| desired.contains(&o)).unwrap_or(false))
        .filter(|p| is_running_ready(p))
        .count() as i32;
    let current_replicas = owned
        .pods
        .iter()
        .filter(|p| revision_label_of_pod(p).as_deref() == Some(current_hash))
        .count() as i32;
    let updated_replicas = owned
        .pods
        .iter()
        .filter(|p| revision_label_of_pod(p).as_deref() == Some(update_hash))
        .count() as i32;

    let current_revision_name = if advanced_current_hash == Some(update_hash) {
        update_revision.name_any()
    } else {
        current_revision.name_any()
    };

    let status = AdvancedStatefulSetStatus {
        observed_generation: set.metadata.generation,
        replicas: owned.pods.len() as i32,
        ready_replicas: Some(ready),
        current_replicas: Some(current_replicas),
        updated_replicas: Some(updated_replicas),
        current_revision: Some(current_revision_name),
        update_revision: Some(update_revision.name_any()),
        collision_count: Some(collision_count),
    };

    if set.status.as_ref() == Some(&status) {
        return Ok(());
    }

    let mut patched = set.clone();
    patched.status = Some(status);
    sets.replace_status(
        &set.name_any(),
        &PostParams::default(),
        serde_json::to_vec(&patched)?,
    )
    .await?;
    Ok(())
}

fn pod_ordinal(pod: &Pod) -> Option<i32> {
    identity::parse_ordinal(&pod.name_any())
}

fn is_failed(pod: &Pod) -> bool {
    matches!(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        Some("Failed") | Some("Succeeded")
    )
}

fn is_running_ready(pod: &Pod) -> bool {
    if pod.metadata.deletion_timestamp.is_some() {
        return false;
    }
    let Some(status) = &pod.status else {
        return false;
    };
    if status.phase.as_deref() != Some("Running") {
        return false;
    }
    status
        .conditions
        .as_ref()
        .map(|conds| conds.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
        .unwrap_or(false)
}

fn revision_label_of_pod(pod: &Pod) -> Option<String> {
    pod.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(revision::CONTROLLER_REVISION_HASH_LABEL))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus};
    use std::collections::BTreeSet as Set;

    fn pod_named(name: &str, phase: &str, ready: bool) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: if ready { "True" } else { "False" }.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test_log::test]
    fn running_and_ready_pod_is_active_ready() {
        let pod = pod_named("web-0", "Running", true);
        assert!(is_running_ready(&pod));
    }

    #[test]
    fn running_but_not_ready_pod_fails_check() {
        let pod = pod_named("web-0", "Running", false);
        assert!(!is_running_ready(&pod));
    }

    #[test]
    fn failed_and_succeeded_phases_are_terminal() {
        assert!(is_failed(&pod_named("web-0", "Failed", false)));
        assert!(is_failed(&pod_named("web-0", "Succeeded", false)));
        assert!(!is_failed(&pod_named("web-0", "Running", true)));
    }

    #[test]
    fn all_active_ready_ignores_out_of_range_ordinals() {
        let desired: Set<i32> = Set::from([0, 1]);
        let pods = vec![
            pod_named("web-0", "Running", true),
            pod_named("web-1", "Running", true),
            pod_named("web-2", "Running", false),
        ];
        assert!(all_active_ready(&pods, &desired));
    }
}
