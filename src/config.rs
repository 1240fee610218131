use std::{num::ParseIntError, path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};

/// Default name this initializer is registered under.
pub const DEFAULT_INITIALIZER_NAME: &str = "mpp.initializer.kubernetes.io";
/// Default name of the ConfigMap holding the affinity term.
pub const DEFAULT_CONFIGMAP: &str = "mpp-initializer";

/// Process configuration, parsed once at startup and shared by reference.
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
pub struct Config {
    /// The initializer name to act on.
    #[arg(long, env = "INITIALIZER_NAME", default_value = DEFAULT_INITIALIZER_NAME)]
    pub initializer_name: String,

    /// The ConfigMap holding the anti-affinity term under the `config` key.
    #[arg(long, env = "INITIALIZER_CONFIGMAP", default_value = DEFAULT_CONFIGMAP)]
    pub configmap: String,

    /// The namespace of the ConfigMap.
    #[arg(long, env = "INITIALIZER_NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// Seconds between full relists of StatefulSets.
    #[arg(long, env = "INITIALIZER_RESYNC_PERIOD", default_value = "30", value_parser = parse_seconds)]
    pub resync_period: Duration,

    /// Seconds to wait after a failed list or watch before trying again.
    #[arg(long, env = "INITIALIZER_RETRY_DELAY", default_value = "5", value_parser = parse_seconds)]
    pub retry_delay: Duration,

    /// Whether this initializer must be first in the pending list before acting.
    #[arg(long, env = "INITIALIZER_HEAD_POLICY", value_enum, default_value_t = HeadPolicy::RequireFirst)]
    pub head_policy: HeadPolicy,

    /// Path to a kubeconfig file. Inferred from the environment if unset.
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,
}

/// How to treat objects whose first pending initializer is someone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HeadPolicy {
    /// Skip the object until this initializer reaches the head of the list.
    RequireFirst,
    /// Initialize the object wherever this initializer appears.
    AnyPosition,
}

fn parse_seconds(arg: &str) -> Result<Duration, ParseIntError> {
    arg.parse().map(Duration::from_secs)
}

pub mod affinity;
