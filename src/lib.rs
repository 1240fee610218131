//! statefulset-initializer injects a pod anti-affinity term into newly created StatefulSets.
//!
//! The process lists and watches StatefulSets in all namespaces, uninitialized ones included.
//! For each object whose pending-initializer list names this initializer,
//! the term loaded from a ConfigMap is appended to the pod template's
//! required anti-affinity terms, the pending list is cleared,
//! and the difference is submitted as a JSON merge patch.

pub mod config;
pub use config::Config;
pub mod initializer;
pub mod resource;
pub mod runner;
pub use runner::{run, RunError};
pub mod subscriber;
pub mod supervisor;
