//! Migration helper (component H, §4.9).
//!
//! Grounded directly on `Upgrade` in
//! `examples/original_source/pkg/apis/apps/v1/helper/upgrade.go`: strip the
//! owning set's selector labels off every revision it owns (so the revision
//! GC of the *built-in* controller can no longer reap them once the set is
//! deleted), tag them with the migration marker, create-or-update the
//! extended CR with `resourceVersion` cleared, then delete the built-in set
//! with an orphan propagation policy so pods and revisions survive.

use crate::crd::AdvancedStatefulSet;
use crate::error::{Error, Result};
use crate::hijack;
use crate::identity::annotations::UPGRADE_MARKER;
use k8s_openapi::api::apps::v1::{ControllerRevision, StatefulSet};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams, PropagationPolicy};
use kube::ResourceExt;

/// Runs the full four-step migration for `name` in `namespace`. Idempotent:
/// safe to call again after a failure at any step, since steps 1-2 re-apply
/// cleanly and step 3's delete is a no-op once the built-in set is gone.
pub async fn migrate(
    client: kube::Client,
    namespace: &str,
    name: &str,
) -> Result<()> {
    let builtin_api: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    let extended_api: Api<AdvancedStatefulSet> = Api::namespaced(client.clone(), namespace);
    let revisions_api: Api<ControllerRevision> = Api::namespaced(client.clone(), namespace);

    let builtin = builtin_api
        .get_opt(name)
        .await?
        .ok_or_else(|| Error::Migration(name.to_string(), "built-in statefulset not found".into()))?;

    let owner_uid = builtin.uid();

    // Step 1: strip selector labels from owned revisions, tag migration marker.
    let selector = builtin
        .spec
        .as_ref()
        .and_then(|s| s.selector.match_labels.clone())
        .unwrap_or_default();
    let label_selector = selector
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");
    let lp = if label_selector.is_empty() {
        ListParams::default()
    } else {
        ListParams::default().labels(&label_selector)
    };
    let owned_revisions = revisions_api.list(&lp).await?.items.into_iter().filter(|r| {
        r.metadata
            .owner_references
            .as_ref()
            .map(|refs| {
                refs.iter()
                    .any(|o| o.controller == Some(true) && Some(&o.uid) == owner_uid.as_ref())
            })
            .unwrap_or(false)
    });
    for revision in owned_revisions {
        let mut labels = revision.metadata.labels.clone().unwrap_or_default();
        for key in selector.keys() {
            labels.remove(key);
        }
        labels.insert(UPGRADE_MARKER.to_string(), name.to_string());
        let patch = serde_json::json!({ "metadata": { "labels": labels } });
        revisions_api
            .patch(&revision.name_any(), &PatchParams::default(), &Patch::Merge(patch))
            .await?;
    }

    // Step 2: create-or-update the extended CR, JSON-copying spec/status.
    let mut extended = hijack::to_extended(&builtin)?;
    extended.metadata.resource_version = None;
    match extended_api.get_opt(name).await? {
        Some(existing) => {
            extended.metadata.resource_version = existing.metadata.resource_version;
            extended_api
                .replace(name, &PostParams::default(), &extended)
                .await?;
        }
        None => {
            extended_api.create(&PostParams::default(), &extended).await?;
        }
    }

    // Step 3: delete the built-in set, orphaning pods/revisions/claims.
    builtin_api
        .delete(
            name,
            &DeleteParams {
                propagation_policy: Some(PropagationPolicy::Orphan),
                ..Default::default()
            },
        )
        .await?;

    // Step 4 (adoption of the orphaned pods/revisions by label match) happens
    // naturally on the extended set's next reconciliation pass, via stage 1.
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
    use k8s_openapi::api::core::v1::PodTemplateSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

    #[test]
    fn to_extended_clears_nothing_it_shouldnt() {
        let builtin = StatefulSet {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                resource_version: Some("123".to_string()),
                ..Default::default()
            },
            spec: Some(StatefulSetSpec {
                replicas: Some(2),
                service_name: "web".to_string(),
                selector: LabelSelector::default(),
                template: PodTemplateSpec::default(),
                ..Default::default()
            }),
            status: None,
        };
        let mut extended = hijack::to_extended(&builtin).unwrap();
        extended.metadata.resource_version = None;
        assert_eq!(extended.metadata.name.as_deref(), Some("web"));
        assert_eq!(extended.spec.replicas, 2);
        assert!(extended.metadata.resource_version.is_none());
    }
}
