//! Loads the anti-affinity term injected into new StatefulSets.

use k8s_openapi::api::core::v1::{ConfigMap, PodAffinityTerm};
use kube_client::{Api, Client};

/// The ConfigMap key holding the YAML-encoded term.
pub const CONFIG_KEY: &str = "config";

/// Fetches the ConfigMap `namespace/name` and decodes its term.
pub async fn load_affinity_term(
    client: Client,
    namespace: &str,
    name: &str,
) -> Result<PodAffinityTerm, Error> {
    let configmap = Api::<ConfigMap>::namespaced(client, namespace)
        .get(name)
        .await
        .map_err(Error::Fetch)?;
    let term = parse_affinity_term(&configmap)?;
    log::info!(
        "loaded anti-affinity term with topology key {:?} from configmap {namespace}/{name}",
        term.topology_key
    );
    Ok(term)
}

/// Decodes the term stored under [`CONFIG_KEY`].
pub fn parse_affinity_term(configmap: &ConfigMap) -> Result<PodAffinityTerm, Error> {
    let document = configmap
        .data
        .as_ref()
        .and_then(|data| data.get(CONFIG_KEY))
        .ok_or(Error::MissingKey)?;
    let term: PodAffinityTerm = serde_yaml::from_str(document).map_err(Error::Parse)?;
    if term.topology_key.is_empty() {
        return Err(Error::EmptyTopologyKey);
    }
    Ok(term)
}

/// The error type returned by [`load_affinity_term`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to fetch configmap: {0}")]
    Fetch(#[source] kube_client::Error),
    #[error("configmap has no `config` key")]
    MissingKey,
    #[error("configmap `config` is not a pod affinity term: {0}")]
    Parse(#[source] serde_yaml::Error),
    #[error("affinity term has an empty topologyKey")]
    EmptyTopologyKey,
}
