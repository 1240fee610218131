use std::{fmt::Debug, time::Duration};

use backoff::backoff::Constant;
use futures::Stream;
use http::{uri::PathAndQuery, Method, Request, Uri};
use kube_client::{client::Body, Api};
use kube_core::Resource;
use kube_runtime::{watcher, WatchStreamExt};
use serde::de::DeserializeOwned;
use tower::util::MapRequestLayer;

/// Watches every object reachable through `api`, waiting `retry_delay` after each error.
///
/// The watcher relists on its own when the watch falls too far behind,
/// and resumes from the last seen version when the server closes the watch.
pub fn objects<K>(
    api: Api<K>,
    retry_delay: Duration,
) -> impl Stream<Item = Result<watcher::Event<K>, watcher::Error>> + Send
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    watcher(api, watcher::Config::default()).backoff(Constant::new(retry_delay))
}

/// A client layer that asks the apiserver to include objects with pending initializers
/// in list and watch responses for `K`, which omit them by default.
pub fn include_uninitialized_layer<K>() -> MapRequestLayer<fn(Request<Body>) -> Request<Body>>
where
    K: Resource<DynamicType = ()>,
{
    let map: fn(Request<Body>) -> Request<Body> = include_uninitialized::<K, Body>;
    MapRequestLayer::new(map)
}

fn include_uninitialized<K, B>(mut request: Request<B>) -> Request<B>
where
    K: Resource<DynamicType = ()>,
{
    let collection = format!("/{}", K::plural(&()));
    if request.method() != Method::GET || !request.uri().path().ends_with(&collection) {
        return request;
    }

    let path = request.uri().path();
    let path_and_query = match request.uri().query() {
        None | Some("") => format!("{path}?includeUninitialized=true"),
        Some(query) => format!("{path}?{query}&includeUninitialized=true"),
    };
    let mut parts = request.uri().clone().into_parts();
    let uri = path_and_query
        .parse::<PathAndQuery>()
        .map_err(http::Error::from)
        .and_then(|path_and_query| {
            parts.path_and_query = Some(path_and_query);
            Uri::from_parts(parts).map_err(http::Error::from)
        });
    match uri {
        Ok(uri) => *request.uri_mut() = uri,
        Err(err) => log::warn!("leaving {} unchanged: {err}", request.uri()),
    }
    request
}
