//! Protocol splitter.
//!
//! Partitions a logical batch into physical sub-batches: by protocol
//! family, by target site origin (REST/CSOM), and by size cap. Every
//! function works on shared request handles so result write-back stays
//! visible in the original batch. Relative order is preserved throughout;
//! a batch already within limits passes through unchanged.

use crate::model::batch::SharedRequest;
use crate::model::descriptor::ProtocolFamily;
use url::Url;

/// Group requests by protocol family, preserving order. Buckets appear in
/// the order their first request does. Graph v1.0 and beta share a bucket.
pub fn split_by_protocol(requests: &[SharedRequest]) -> Vec<(ProtocolFamily, Vec<SharedRequest>)> {
    let mut buckets: Vec<(ProtocolFamily, Vec<SharedRequest>)> = Vec::new();
    for request in requests {
        let family = request.read().expect("request lock poisoned").protocol().family();
        match buckets.iter_mut().find(|(f, _)| *f == family) {
            Some((_, bucket)) => bucket.push(request.clone()),
            None => buckets.push((family, vec![request.clone()])),
        }
    }
    buckets
}

/// Group REST/CSOM requests by the site their target lives on: one
/// sub-batch per distinct origin, in order of first occurrence.
pub fn split_by_site(requests: &[SharedRequest]) -> Vec<(String, Vec<SharedRequest>)> {
    let mut sites: Vec<(String, Vec<SharedRequest>)> = Vec::new();
    for request in requests {
        let key = site_key(request.read().expect("request lock poisoned").target_location());
        match sites.iter_mut().find(|(k, _)| *k == key) {
            Some((_, bucket)) => bucket.push(request.clone()),
            None => sites.push((key, vec![request.clone()])),
        }
    }
    sites
}

/// Walk in order and accumulate fixed-size chunks not exceeding `cap`.
/// An already-compliant batch comes back as a single chunk of the same
/// handles (no-op).
pub fn split_by_size(requests: &[SharedRequest], cap: usize) -> Vec<Vec<SharedRequest>> {
    if requests.is_empty() {
        return Vec::new();
    }
    let cap = cap.max(1);
    if requests.len() <= cap {
        return vec![requests.to_vec()];
    }
    requests.chunks(cap).map(|chunk| chunk.to_vec()).collect()
}

/// Site prefix used to key physical REST/CSOM sub-batches.
///
/// The site is everything before the service segment (`/_api/` for REST,
/// `/_vti_bin/` for CSOM); targets without one key on their URL origin.
pub fn site_key(target: &str) -> String {
    let lowered = target.to_ascii_lowercase();
    for marker in ["/_api/", "/_vti_bin/"] {
        if let Some(pos) = lowered.find(marker) {
            return lowered[..pos].trim_end_matches('/').to_string();
        }
    }
    match Url::parse(target) {
        Ok(url) => url.origin().ascii_serialization().to_ascii_lowercase(),
        Err(_) => lowered.trim_end_matches('/').to_string(),
    }
}
