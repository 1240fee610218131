//! Injects the configured anti-affinity term into StatefulSets pending this initializer.

use std::{future::Future, sync::Arc};

use k8s_openapi::api::core::v1::PodAffinityTerm;
use kube_client::{
    api::{Patch, PatchParams},
    Api, Client,
};
use kube_core::Resource;
use kube_runtime::reflector::ObjectRef;
use serde_json::Value;

use crate::{
    config::{Config, HeadPolicy},
    resource::StatefulSet,
    runner::{Classify, Handler, Severity},
};

pub mod patch;

/// Submits merge patches for StatefulSets.
pub trait Patcher {
    fn merge_patch(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> impl Future<Output = Result<(), kube_client::Error>> + Send;
}

impl Patcher for Client {
    async fn merge_patch(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<(), kube_client::Error> {
        Api::<StatefulSet>::namespaced(self.clone(), namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        Ok(())
    }
}

/// What [`Initializer::initialize`] did with an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The patch was accepted.
    Initialized,
    Skipped(Skip),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Skip {
    /// The object has no pending initializers.
    NotPending,
    /// Another initializer is at the head of the pending list.
    NotFirst { head: String },
}

pub struct Initializer<P> {
    name: String,
    head_policy: HeadPolicy,
    term: Arc<PodAffinityTerm>,
    patcher: P,
}

impl<P: Patcher> Initializer<P> {
    pub fn new(config: &Config, term: Arc<PodAffinityTerm>, patcher: P) -> Self {
        Self {
            name: config.initializer_name.clone(),
            head_policy: config.head_policy,
            term,
            patcher,
        }
    }

    /// Checks the pending list, then patches the object if this initializer is owed.
    ///
    /// At most one patch is submitted per call.
    pub async fn initialize(&self, sts: &StatefulSet) -> Result<Outcome, InitError> {
        let Some(head) = sts.pending_initializers().first() else {
            return Ok(Outcome::Skipped(Skip::NotPending));
        };
        let key = ObjectRef::from_obj(sts);

        if head.name != self.name {
            match self.head_policy {
                HeadPolicy::RequireFirst => {
                    log::debug!("{key} waits for initializer {} first", head.name);
                    return Ok(Outcome::Skipped(Skip::NotFirst {
                        head: head.name.clone(),
                    }));
                }
                HeadPolicy::AnyPosition => {
                    log::info!(
                        "initializing {key} although {} is first in the pending list",
                        head.name
                    );
                }
            }
        } else {
            log::info!("initializing {key}");
        }

        let name = sts.meta().name.as_deref().ok_or(InitError::MissingName)?;
        let namespace = sts
            .meta()
            .namespace
            .as_deref()
            .ok_or(InitError::MissingNamespace)?;

        let initialized = initialized_copy(sts, &self.term);
        let patch = compute_patch(sts, &initialized)?;
        self.patcher
            .merge_patch(namespace, name, &patch)
            .await
            .map_err(InitError::Patch)?;

        Ok(Outcome::Initialized)
    }
}

impl<P: Patcher + Sync> Handler<StatefulSet> for Initializer<P> {
    type Error = InitError;

    async fn on_apply(&self, sts: &StatefulSet) -> Result<(), InitError> {
        if self.initialize(sts).await? == Outcome::Initialized {
            log::info!("initialized {}", ObjectRef::from_obj(sts));
        }
        Ok(())
    }
}

/// Returns a copy of `sts` with the pending initializers removed and `term`
/// appended to the pod template's required anti-affinity terms.
pub fn initialized_copy(sts: &StatefulSet, term: &PodAffinityTerm) -> StatefulSet {
    let mut initialized = sts.clone();
    initialized.metadata.initializers = None;

    let pod_spec = initialized
        .spec
        .get_or_insert_with(Default::default)
        .template
        .spec
        .get_or_insert_with(Default::default);
    pod_spec
        .affinity
        .get_or_insert_with(Default::default)
        .pod_anti_affinity
        .get_or_insert_with(Default::default)
        .required_during_scheduling_ignored_during_execution
        .get_or_insert_with(Vec::new)
        .push(term.clone());

    initialized
}

/// The merge patch turning `original` into `initialized`.
pub fn compute_patch(original: &StatefulSet, initialized: &StatefulSet) -> Result<Value, InitError> {
    let original = serde_json::to_value(original).map_err(InitError::Serialize)?;
    let initialized = serde_json::to_value(initialized).map_err(InitError::Serialize)?;
    Ok(patch::create_merge_patch(&original, &initialized))
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("object has no name")]
    MissingName,
    #[error("object has no namespace")]
    MissingNamespace,
    #[error("failed to serialize object: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to submit patch: {0}")]
    Patch(#[source] kube_client::Error),
}

impl Classify for InitError {
    fn severity(&self) -> Severity {
        match self {
            // Credentials are shared by every object, nothing else would succeed either.
            Self::Patch(kube_client::Error::Api(resp)) if resp.code == 401 => Severity::Fatal,
            _ => Severity::Recoverable,
        }
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::{Affinity, PodAntiAffinity, PodSpec};
    use serde_json::json;

    use super::*;
    use crate::tests::{affinity_term, config, statefulset, RecordingPatcher, INITIALIZER};

    fn initializer(policy: HeadPolicy) -> Initializer<RecordingPatcher> {
        let mut config = config();
        config.head_policy = policy;
        Initializer::new(&config, Arc::new(affinity_term()), RecordingPatcher::default())
    }

    fn anti_affinity_terms(sts: &StatefulSet) -> Vec<PodAffinityTerm> {
        sts.spec
            .as_ref()
            .and_then(|spec| spec.template.spec.as_ref())
            .and_then(|pod| pod.affinity.as_ref())
            .and_then(|affinity| affinity.pod_anti_affinity.as_ref())
            .and_then(|anti| anti.required_during_scheduling_ignored_during_execution.clone())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn not_pending_is_noop() {
        let init = initializer(HeadPolicy::RequireFirst);
        let outcome = init.initialize(&statefulset("web", "1", &[])).await.unwrap();
        assert_eq!(outcome, Outcome::Skipped(Skip::NotPending));
        assert!(init.patcher.patches().is_empty());
    }

    #[tokio::test]
    async fn patches_head_object() {
        let init = initializer(HeadPolicy::RequireFirst);
        let sts = statefulset("web", "1", &[INITIALIZER]);
        assert_eq!(init.initialize(&sts).await.unwrap(), Outcome::Initialized);

        let patches = init.patcher.patches();
        assert_eq!(patches.len(), 1);
        let (namespace, name, patch) = &patches[0];
        assert_eq!((namespace.as_str(), name.as_str()), ("default", "web"));
        assert_eq!(
            patch,
            &json!({
                "metadata": {"initializers": null},
                "spec": {"template": {"spec": {"affinity": {"podAntiAffinity": {
                    "requiredDuringSchedulingIgnoredDuringExecution": [{
                        "labelSelector": {"matchLabels": {"app": "foo"}},
                        "topologyKey": "kubernetes.io/hostname",
                    }],
                }}}}},
            })
        );
    }

    #[tokio::test]
    async fn require_first_skips_other_head() {
        let init = initializer(HeadPolicy::RequireFirst);
        let sts = statefulset("web2", "1", &["other.initializer.io", INITIALIZER]);
        assert_eq!(
            init.initialize(&sts).await.unwrap(),
            Outcome::Skipped(Skip::NotFirst {
                head: "other.initializer.io".into()
            })
        );
        assert!(init.patcher.patches().is_empty());
    }

    #[tokio::test]
    async fn any_position_processes_other_head() {
        let init = initializer(HeadPolicy::AnyPosition);
        let sts = statefulset("web2", "1", &["other.initializer.io", INITIALIZER]);
        assert_eq!(init.initialize(&sts).await.unwrap(), Outcome::Initialized);

        let patches = init.patcher.patches();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].1, "web2");
        assert_eq!(patches[0].2["metadata"], json!({"initializers": null}));
    }

    #[test]
    fn copy_appends_one_term_and_clears_pending() {
        let mut sts = statefulset("web", "1", &[INITIALIZER, "other.initializer.io"]);
        let existing = PodAffinityTerm {
            topology_key: "topology.kubernetes.io/zone".into(),
            ..PodAffinityTerm::default()
        };
        sts.spec.get_or_insert_with(Default::default).template.spec = Some(PodSpec {
            affinity: Some(Affinity {
                pod_anti_affinity: Some(PodAntiAffinity {
                    required_during_scheduling_ignored_during_execution: Some(vec![existing.clone()]),
                    ..PodAntiAffinity::default()
                }),
                ..Affinity::default()
            }),
            ..PodSpec::default()
        });

        let initialized = initialized_copy(&sts, &affinity_term());
        assert!(initialized.pending_initializers().is_empty());
        assert!(initialized.metadata.initializers.is_none());
        assert_eq!(anti_affinity_terms(&initialized), vec![existing, affinity_term()]);

        // Everything outside the two touched paths is untouched.
        let mut expected = initialized.clone();
        expected.metadata.initializers = sts.metadata.initializers.clone();
        expected.spec = sts.spec.clone();
        assert_eq!(expected, sts);
    }

    #[test]
    fn patch_round_trips() {
        let sts = statefulset("web", "7", &[INITIALIZER]);
        let initialized = initialized_copy(&sts, &affinity_term());
        let patch = compute_patch(&sts, &initialized).unwrap();

        let mut patched = serde_json::to_value(&sts).unwrap();
        json_patch::merge(&mut patched, &patch);
        assert_eq!(patched, serde_json::to_value(&initialized).unwrap());
    }

    #[tokio::test]
    async fn patch_failure_is_reported() {
        let init = initializer(HeadPolicy::RequireFirst);
        init.patcher.fail_with(409);
        let err = init
            .initialize(&statefulset("web", "1", &[INITIALIZER]))
            .await
            .unwrap_err();
        assert!(matches!(err, InitError::Patch(_)), "{err}");
        assert_eq!(err.severity(), Severity::Recoverable);

        init.patcher.fail_with(401);
        let err = init
            .initialize(&statefulset("web", "1", &[INITIALIZER]))
            .await
            .unwrap_err();
        assert_eq!(err.severity(), Severity::Fatal);
    }

    #[tokio::test]
    async fn missing_namespace_is_recoverable() {
        let init = initializer(HeadPolicy::RequireFirst);
        let mut sts = statefulset("web", "1", &[INITIALIZER]);
        sts.metadata.object.namespace = None;
        let err = init.initialize(&sts).await.unwrap_err();
        assert!(matches!(err, InitError::MissingNamespace));
        assert_eq!(err.severity(), Severity::Recoverable);
        assert!(init.patcher.patches().is_empty());
    }
}
