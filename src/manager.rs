//! Controller wiring (component G's enqueue-trigger registration, §4.8).
//!
//! Keeps the teacher's shape from `examples/owen-d-gratefulset/src/main.rs`/
//! `manager.rs` — a thin function that builds a `kube::Client`, wires
//! `Controller::new(...).owns(...)`, and drives it to completion — rather
//! than hand-rolling a second queue on top of what `kube::runtime::Controller`
//! already provides.

use crate::config::Config;
use crate::crd::AdvancedStatefulSet;
use crate::dispatch;
use crate::reconcile::{self, Context};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::ControllerRevision;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::runtime::watcher;
use kube::runtime::Controller;
use kube::{Api, Client};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Runs the controller to completion (forever, absent a fatal error).
/// Matches spec.md §6: the process never exits 0.
pub async fn run(config: Config) -> crate::error::Result<()> {
    let client = Client::try_default().await?;

    let sets: Api<AdvancedStatefulSet> = Api::all(client.clone());
    let pods: Api<Pod> = Api::all(client.clone());
    let claims: Api<PersistentVolumeClaim> = Api::all(client.clone());
    let revisions: Api<ControllerRevision> = Api::all(client.clone());

    let worker_count = dispatch::worker_count(config.worker_threads);
    info!(worker_count, "starting advanced-statefulset-controller");

    let context = Arc::new(Context { client });

    Controller::new(sets, watcher::Config::default())
        .owns(pods, watcher::Config::default())
        .owns(claims, watcher::Config::default())
        .owns(revisions, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile::reconcile, reconcile::error_policy, context)
        .for_each(|res| async move {
            match res {
                Ok((object, _action)) => info!(set = %object.name, "reconciled"),
                Err(e) => warn!(error = %e, "reconcile attempt failed"),
            }
        })
        .await;

    error!("controller loop exited");
    Ok(())
}
