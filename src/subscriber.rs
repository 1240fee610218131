//! A watch subscription that restarts every resync period.

use std::{collections::HashSet, future, time::Duration};

use futures::{
    stream::{self, BoxStream},
    Stream, StreamExt,
};
use kube_core::Resource;
use kube_runtime::{reflector::ObjectRef, watcher};

pub mod objects;
pub use objects::{include_uninitialized_layer, objects};

pub use kube_runtime::watcher::Error;

/// A change observed by the subscription.
#[derive(Debug)]
pub enum Event<K: Resource<DynamicType = ()>> {
    /// The object was not known to this subscription before.
    Added(K),
    /// The watch reported a change to a known object.
    Modified(K),
    /// A relist re-delivered a known object.
    Resync(K),
    /// The object is gone, either reported by the watch or missing from a relist.
    Deleted(ObjectRef<K>),
}

/// Subscribes to the watches produced by `watch`.
///
/// Every `resync_period` the current watch is dropped and a new one is started,
/// which lists all objects again, so objects whose watch events were missed still surface.
/// A watch that ends on its own is replaced immediately.
///
/// Objects listed for the first time are reported as [`Event::Added`], known ones as
/// [`Event::Resync`], and known objects missing from a list as [`Event::Deleted`].
/// Errors are yielded as items and the stream keeps going.
pub fn subscribe<K, S, F>(mut watch: F, resync_period: Duration) -> BoxStream<'static, Result<Event<K>, Error>>
where
    K: Resource<DynamicType = ()> + Clone + Send + 'static,
    F: FnMut() -> S + Send + 'static,
    S: Stream<Item = Result<watcher::Event<K>, Error>> + Send + 'static,
{
    stream::repeat_with(move || {
        log::debug!("starting watch, next resync in {resync_period:?}");
        watch().take_until(tokio::time::sleep(resync_period))
    })
    .flatten()
    .scan(HashSet::new(), |known, item| future::ready(Some(classify(known, item))))
    .flat_map(stream::iter)
    .boxed()
}

fn classify<K>(
    known: &mut HashSet<ObjectRef<K>>,
    item: Result<watcher::Event<K>, Error>,
) -> Vec<Result<Event<K>, Error>>
where
    K: Resource<DynamicType = ()>,
{
    let event = match item {
        Err(err) => return vec![Err(err)],
        Ok(watcher::Event::Restarted(objects)) => return relisted(known, objects),
        Ok(watcher::Event::Applied(object)) => {
            if known.insert(ObjectRef::from_obj(&object)) {
                Event::Added(object)
            } else {
                Event::Modified(object)
            }
        }
        Ok(watcher::Event::Deleted(object)) => {
            let key = ObjectRef::from_obj(&object);
            known.remove(&key);
            Event::Deleted(key)
        }
    };
    vec![Ok(event)]
}

fn relisted<K>(known: &mut HashSet<ObjectRef<K>>, objects: Vec<K>) -> Vec<Result<Event<K>, Error>>
where
    K: Resource<DynamicType = ()>,
{
    let mut seen = HashSet::with_capacity(objects.len());
    let mut events = Vec::with_capacity(objects.len());
    for object in objects {
        let key = ObjectRef::from_obj(&object);
        events.push(Ok(if known.contains(&key) {
            Event::Resync(object)
        } else {
            Event::Added(object)
        }));
        seen.insert(key);
    }
    events.extend(
        known
            .difference(&seen)
            .map(|key| Ok(Event::Deleted(key.clone()))),
    );

    log::debug!("listed {} objects", seen.len());
    *known = seen;
    events
}
