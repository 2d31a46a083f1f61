//! Pod controller side effects (component D, §4.6).
//!
//! Grounded on `RealPodControl` in
//! `examples/original_source/pkg/third_party/k8s/controller_utils.go`:
//! namespace-terminating creates suppress the failure event but still
//! surface the error for backoff; not-found deletes are successes; every
//! create/delete emits a normal/warning event on the owning set.

use crate::crd::AdvancedStatefulSet;
use crate::error::{is_namespace_terminating, is_not_found, Result};
use crate::identity::{claim_name, controller_owner_ref, pod_name};
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, Pod, PodSpec, PodTemplateSpec, Volume,
};
use kube::api::{Api, DeleteParams, PostParams};
use kube::runtime::events::{Event, EventType, Recorder};
use kube::ResourceExt;
use tracing::{info, warn};

/// Builds the pod for ordinal `i` of `set`, from the pod template carried by
/// `revision_hash`'s content (the caller picks which revision's template to
/// use — see [`crate::reconcile::strategy`]).
pub fn build_pod(
    set: &AdvancedStatefulSet,
    ordinal: i32,
    template: &PodTemplateSpec,
    revision_hash: &str,
    claim_templates: &[PersistentVolumeClaim],
) -> Pod {
    let name = pod_name(&set.name_any(), ordinal);
    let mut labels = template.metadata.labels.clone().unwrap_or_default();
    labels.insert(
        crate::revision::CONTROLLER_REVISION_HASH_LABEL.to_string(),
        revision_hash.to_string(),
    );

    let mut spec: PodSpec = template.spec.clone().unwrap_or_default();
    attach_claim_volumes(&mut spec, set, ordinal, claim_templates);

    Pod {
        metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
            name: Some(name.clone()),
            namespace: set.namespace(),
            labels: Some(labels),
            annotations: template.metadata.annotations.clone(),
            owner_references: Some(vec![controller_owner_ref(set)]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            hostname: Some(name),
            subdomain: Some(set.spec.service_name.clone()),
            ..spec
        }),
        ..Default::default()
    }
}

/// Ensures every volume claim template the set declares has a matching
/// volume entry in the pod spec, pointing at that ordinal's claim. Mirrors
/// the built-in StatefulSet controller's `updateStorage`.
fn attach_claim_volumes(
    spec: &mut PodSpec,
    set: &AdvancedStatefulSet,
    ordinal: i32,
    claim_templates: &[PersistentVolumeClaim],
) {
    let mut volumes = spec.volumes.clone().unwrap_or_default();
    for template in claim_templates {
        let Some(template_name) = template.metadata.name.clone() else {
            continue;
        };
        if volumes.iter().any(|v| v.name == template_name) {
            continue;
        }
        volumes.push(Volume {
            name: template_name.clone(),
            persistent_volume_claim: Some(
                k8s_openapi::api::core::v1::PersistentVolumeClaimVolumeSource {
                    claim_name: claim_name(&template_name, &set.name_any(), ordinal),
                    read_only: Some(false),
                },
            ),
            ..Default::default()
        });
    }
    spec.volumes = Some(volumes);
}

/// Builds the claim for `(template, ordinal)` of `set`.
pub fn build_claim(
    set: &AdvancedStatefulSet,
    template: &PersistentVolumeClaim,
    ordinal: i32,
) -> PersistentVolumeClaim {
    let template_name = template.metadata.name.clone().unwrap_or_default();
    let mut claim = template.clone();
    claim.metadata.name = Some(claim_name(&template_name, &set.name_any(), ordinal));
    claim.metadata.namespace = set.namespace();
    claim.metadata.owner_references = Some(vec![controller_owner_ref(set)]);
    let mut labels = template.metadata.labels.clone().unwrap_or_default();
    labels.insert(
        "statefulset.rs-operators.io/pod-name".to_string(),
        pod_name(&set.name_any(), ordinal),
    );
    claim.metadata.labels = Some(labels);
    claim
}

/// §7: "Already-exists on create: treat as success if the existing object is
/// owned by the set; otherwise re-enqueue and attempt adoption." Ownership
/// adoption itself happens in the reconciler's adopt/orphan stage on the
/// next pass; here we only need to know whether the object is already there.
pub async fn create_pod(api: &Api<Pod>, recorder: &Recorder, pod: &Pod) -> Result<()> {
    let err = match api.create(&PostParams::default(), pod).await {
        Ok(created) => {
            info!(pod = %created.name_any(), "created pod");
            recorder
                .publish(&Event {
                    type_: EventType::Normal,
                    reason: "SuccessfulCreate".into(),
                    note: Some(format!("Created pod: {}", created.name_any())),
                    action: "Create".into(),
                    secondary: None,
                })
                .await
                .ok();
            return Ok(());
        }
        Err(e) => e,
    };

    if crate::error::is_already_exists(&err) && api.get_opt(&pod.name_any()).await?.is_some() {
        return Ok(());
    }

    if !is_namespace_terminating(&err) {
        warn!(error = %err, pod = %pod.name_any(), "failed to create pod");
        recorder
            .publish(&Event {
                type_: EventType::Warning,
                reason: "FailedCreate".into(),
                note: Some(format!("Error creating: {err}")),
                action: "Create".into(),
                secondary: None,
            })
            .await
            .ok();
    }
    Err(err.into())
}

pub async fn delete_pod(api: &Api<Pod>, recorder: &Recorder, name: &str) -> Result<()> {
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            info!(pod = name, "deleted pod");
            recorder
                .publish(&Event {
                    type_: EventType::Normal,
                    reason: "SuccessfulDelete".into(),
                    note: Some(format!("Deleted pod: {name}")),
                    action: "Delete".into(),
                    secondary: None,
                })
                .await
                .ok();
            Ok(())
        }
        Err(e) if is_not_found(&e) => Ok(()),
        Err(e) => {
            if !is_namespace_terminating(&e) {
                warn!(error = %e, pod = name, "failed to delete pod");
                recorder
                    .publish(&Event {
                        type_: EventType::Warning,
                        reason: "FailedDelete".into(),
                        note: Some(format!("Error deleting: {e}")),
                        action: "Delete".into(),
                        secondary: None,
                    })
                    .await
                    .ok();
            }
            Err(e.into())
        }
    }
}

/// Idempotent claim create: a pre-existing claim is left untouched.
pub async fn create_claim_if_missing(
    api: &Api<PersistentVolumeClaim>,
    claim: &PersistentVolumeClaim,
) -> Result<()> {
    let name = claim.name_any();
    if api.get_opt(&name).await?.is_some() {
        return Ok(());
    }
    match api.create(&PostParams::default(), claim).await {
        Ok(_) => Ok(()),
        Err(e) if crate::error::is_already_exists(&e) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Deletes the claim named `name` if it exists; a prior delete having
/// already removed it is a success, matching [`delete_pod`]'s not-found
/// handling.
pub async fn delete_claim_if_present(api: &Api<PersistentVolumeClaim>, name: &str) -> Result<()> {
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            info!(claim = name, "deleted claim");
            Ok(())
        }
        Err(e) if is_not_found(&e) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
    use crate::crd::AdvancedStatefulSetSpec;

    fn set() -> AdvancedStatefulSet {
        let mut set = AdvancedStatefulSet::new(
            "web",
            AdvancedStatefulSetSpec {
                replicas: 1,
                selector: LabelSelector {
                    match_labels: Some([("app".to_string(), "web".to_string())].into()),
                    ..Default::default()
                },
                service_name: "web".to_string(),
                template: PodTemplateSpec {
                    metadata: ObjectMeta {
                        labels: Some([("app".to_string(), "web".to_string())].into()),
                        ..Default::default()
                    },
                    spec: Some(PodSpec::default()),
                },
                volume_claim_templates: None,
                pod_management_policy: None,
                update_strategy: None,
                revision_history_limit: None,
                persistent_volume_claim_retention_policy: None,
                min_ready_seconds: None,
            },
        );
        set.metadata.namespace = Some("default".to_string());
        set
    }

    #[test]
    fn build_pod_sets_hostname_and_owner() {
        let s = set();
        let pod = build_pod(&s, 2, &s.spec.template, "abc123", &[]);
        assert_eq!(pod.metadata.name.as_deref(), Some("web-2"));
        assert_eq!(
            pod.spec.as_ref().unwrap().hostname.as_deref(),
            Some("web-2")
        );
        assert_eq!(
            pod.spec.as_ref().unwrap().subdomain.as_deref(),
            Some("web")
        );
        assert!(pod.metadata.owner_references.unwrap()[0].controller == Some(true));
        assert_eq!(
            pod.metadata
                .labels
                .unwrap()
                .get(crate::revision::CONTROLLER_REVISION_HASH_LABEL)
                .map(|s| s.as_str()),
            Some("abc123")
        );
    }

    #[test]
    fn build_claim_names_by_ordinal() {
        let s = set();
        let template = PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some("data".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let claim = build_claim(&s, &template, 3);
        assert_eq!(claim.metadata.name.as_deref(), Some("data-web-3"));
    }
}
