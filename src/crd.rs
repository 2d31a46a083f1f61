//! The `AdvancedStatefulSet` custom resource.
//!
//! The wire schema mirrors `k8s_openapi::api::apps::v1::StatefulSet` exactly
//! (§6): the spec embeds the same nested types the built-in StatefulSet uses
//! (`PodTemplateSpec`, `LabelSelector`, volume claim templates, the update
//! strategy) so that a built-in object round-trips through [`crate::hijack`]
//! without field loss. `deleteSlots` and `pausedReconcile` are deliberately
//! NOT spec fields — they live as annotations (see
//! [`crate::identity::annotations`]) so that a `kube::Api<AdvancedStatefulSet>`
//! and a `kube::Api<k8s_openapi::api::apps::v1::StatefulSet>` can describe
//! value-equivalent objects.

use k8s_openapi::api::apps::v1::{
    StatefulSetPersistentVolumeClaimRetentionPolicy, StatefulSetUpdateStrategy,
};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const GROUP: &str = "apps.rs-operators.io";
pub const VERSION: &str = "v1";

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "apps.rs-operators.io",
    version = "v1",
    kind = "AdvancedStatefulSet",
    status = "AdvancedStatefulSetStatus",
    shortname = "asts",
    namespaced,
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Ready", "type":"integer", "jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedStatefulSetSpec {
    /// Number of slots desired, independent of which ordinals they occupy.
    /// The occupied ordinals are `desired_ordinals(replicas, delete_slots)`,
    /// see [`crate::slots`].
    #[serde(default)]
    pub replicas: i32,

    pub selector: LabelSelector,

    pub service_name: String,

    pub template: PodTemplateSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_claim_templates: Option<Vec<PersistentVolumeClaim>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_management_policy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_strategy: Option<StatefulSetUpdateStrategy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_history_limit: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim_retention_policy:
        Option<StatefulSetPersistentVolumeClaimRetentionPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_ready_seconds: Option<i32>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedStatefulSetStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default)]
    pub replicas: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_revision: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_revision: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collision_count: Option<i32>,
}

/// `spec.podManagementPolicy`, defaulted to `OrderedReady` like the built-in
/// StatefulSet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodManagementPolicy {
    OrderedReady,
    Parallel,
}

impl PodManagementPolicy {
    pub fn from_spec(spec: &AdvancedStatefulSetSpec) -> Self {
        match spec.pod_management_policy.as_deref() {
            Some("Parallel") => PodManagementPolicy::Parallel,
            _ => PodManagementPolicy::OrderedReady,
        }
    }

    pub fn is_ordered_ready(self) -> bool {
        matches!(self, PodManagementPolicy::OrderedReady)
    }
}

impl AdvancedStatefulSetSpec {
    /// `spec.updateStrategy.type`, defaulted to `RollingUpdate` with
    /// partition 0, matching the built-in StatefulSet default.
    pub fn partition(&self) -> Option<i32> {
        self.update_strategy
            .as_ref()
            .and_then(|s| s.rolling_update.as_ref())
            .and_then(|r| r.partition)
    }

    pub fn is_on_delete(&self) -> bool {
        self.update_strategy
            .as_ref()
            .map(|s| s.type_ == Some("OnDelete".to_string()))
            .unwrap_or(false)
    }

    /// `spec.persistentVolumeClaimRetentionPolicy.whenScaled == "Delete"`,
    /// the knob that governs whether a condemned ordinal's claims are
    /// deleted alongside its pod (§4.6/§4.9) rather than retained, which is
    /// the built-in StatefulSet default.
    pub fn delete_claims_on_scaledown(&self) -> bool {
        self.persistent_volume_claim_retention_policy
            .as_ref()
            .and_then(|p| p.when_scaled.as_deref())
            .map(|policy| policy == "Delete")
            .unwrap_or(false)
    }
}
