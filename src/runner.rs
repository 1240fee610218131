use std::future::Future;

use futures::{Stream, StreamExt};
use kube_core::Resource;
use kube_runtime::reflector::ObjectRef;
use tokio_util::sync::CancellationToken;

use crate::subscriber::{self, Event};

/// Reacts to observed objects of type `K`.
pub trait Handler<K> {
    type Error: std::error::Error + Classify + Send + 'static;

    /// Called for every live object the subscription reports: added, modified or resynced.
    ///
    /// Modifications matter because another initializer finishing can make this one next in line.
    fn on_apply(&self, object: &K) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Whether an error should stop the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Log it, skip the object and keep watching.
    Recoverable,
    /// Stop the loop and report the error to the supervisor.
    Fatal,
}

pub trait Classify {
    fn severity(&self) -> Severity;
}

/// Feeds events from `subscription` to `handler` until `cancel` fires or the stream ends.
///
/// Events are handled one at a time. Cancellation is only observed between events,
/// so a call in flight always runs to completion.
pub async fn run<K, S, H>(
    mut subscription: S,
    handler: &H,
    cancel: CancellationToken,
) -> Result<(), RunError<H::Error>>
where
    K: Resource<DynamicType = ()>,
    S: Stream<Item = Result<Event<K>, subscriber::Error>> + Unpin,
    H: Handler<K>,
{
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                log::info!("stop requested, leaving event loop");
                return Ok(());
            }
            event = subscription.next() => event,
        };

        let object = match event {
            None => {
                log::warn!("subscription ended");
                return Ok(());
            }
            Some(Err(err)) => {
                log::warn!("subscription error: {err}");
                continue;
            }
            Some(Ok(Event::Added(object) | Event::Modified(object) | Event::Resync(object))) => object,
            Some(Ok(Event::Deleted(key))) => {
                log::debug!("ignoring deletion of {key}");
                continue;
            }
        };

        if let Err(err) = handler.on_apply(&object).await {
            let key = ObjectRef::from_obj(&object);
            match err.severity() {
                Severity::Recoverable => {
                    log::error!("failed to handle {key}, skipping until next resync: {err}");
                }
                Severity::Fatal => {
                    return Err(RunError::Handler {
                        key: key.to_string(),
                        source: err,
                    });
                }
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError<E: std::error::Error + 'static> {
    #[error("fatal error handling {key}: {source}")]
    Handler {
        key: String,
        #[source]
        source: E,
    },
}
