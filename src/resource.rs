//! StatefulSet representation that keeps `metadata.initializers`.
//!
//! The `k8s-openapi` types dropped the alpha initializers field, so objects decoded
//! through them would lose the pending list this controller acts on.

use std::borrow::Cow;

use k8s_openapi::{
    api::apps::v1::{StatefulSetSpec, StatefulSetStatus},
    apimachinery::pkg::apis::meta::v1::{ObjectMeta, Status},
    NamespaceResourceScope,
};
use kube_core::Resource;
use serde::{Deserialize, Serialize};

/// An `apps/v1` StatefulSet as observed by the watcher.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatefulSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<StatefulSetSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatefulSetStatus>,
}

/// Standard object metadata plus the initializers block.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(flatten)]
    pub object: ObjectMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initializers: Option<Initializers>,
}

/// Initializers still owed to an object before it becomes visible to ordinary clients.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Initializers {
    #[serde(default)]
    pub pending: Vec<PendingInitializer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Status>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInitializer {
    pub name: String,
}

impl StatefulSet {
    /// The pending initializers in order, empty if the object is initialized.
    pub fn pending_initializers(&self) -> &[PendingInitializer] {
        match &self.metadata.initializers {
            Some(initializers) => &initializers.pending,
            None => &[],
        }
    }
}

impl Resource for StatefulSet {
    type DynamicType = ();
    type Scope = NamespaceResourceScope;

    fn kind(&(): &Self::DynamicType) -> Cow<'_, str> {
        Cow::Borrowed("StatefulSet")
    }

    fn group(&(): &Self::DynamicType) -> Cow<'_, str> {
        Cow::Borrowed("apps")
    }

    fn version(&(): &Self::DynamicType) -> Cow<'_, str> {
        Cow::Borrowed("v1")
    }

    fn plural(&(): &Self::DynamicType) -> Cow<'_, str> {
        Cow::Borrowed("statefulsets")
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata.object
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata.object
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_pending_initializers() {
        let sts: StatefulSet = serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "StatefulSet",
            "metadata": {
                "name": "web",
                "namespace": "default",
                "resourceVersion": "12",
                "initializers": {
                    "pending": [{"name": "mpp.initializer.kubernetes.io"}],
                },
            },
        }))
        .unwrap();

        assert_eq!(sts.meta().name.as_deref(), Some("web"));
        assert_eq!(sts.meta().resource_version.as_deref(), Some("12"));
        assert_eq!(
            sts.pending_initializers(),
            &[PendingInitializer {
                name: "mpp.initializer.kubernetes.io".into()
            }]
        );
    }

    #[test]
    fn initialized_object_has_no_pending() {
        let sts: StatefulSet =
            serde_json::from_value(json!({"metadata": {"name": "db"}})).unwrap();
        assert!(sts.pending_initializers().is_empty());

        let encoded = serde_json::to_value(&sts).unwrap();
        assert_eq!(encoded, json!({"metadata": {"name": "db"}}));
    }

    #[test]
    fn url_targets_apps_group() {
        assert_eq!(
            StatefulSet::url_path(&(), None),
            "/apis/apps/v1/statefulsets"
        );
        assert_eq!(
            StatefulSet::url_path(&(), Some("prod")),
            "/apis/apps/v1/namespaces/prod/statefulsets"
        );
    }
}
