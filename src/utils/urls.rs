//! Deterministic construction of the canonical resource URLs used in
//! `Location` headers. No I/O; the optional base prefix comes from
//! configuration, so behind a proxy the registry can emit absolute URLs
//! while the default stays host-relative.

use crate::digest::Digest;

#[derive(Clone, Debug, Default)]
pub struct UrlBuilder {
    base: String,
}

impl UrlBuilder {
    /// `base` is an origin like `https://registry.example.com` (no
    /// trailing slash) or empty for host-relative URLs.
    pub fn new(base: impl Into<String>) -> Self {
        let mut base = base.into();
        while base.ends_with('/') {
            base.pop();
        }
        UrlBuilder { base }
    }

    pub fn base_url(&self) -> String {
        format!("{}/v2/", self.base)
    }

    pub fn manifest_url(&self, name: &str, reference: &str) -> String {
        format!("{}/v2/{}/manifests/{}", self.base, name, reference)
    }

    pub fn tags_url(&self, name: &str) -> String {
        format!("{}/v2/{}/tags/list", self.base, name)
    }

    pub fn blob_url(&self, name: &str, digest: &Digest) -> String {
        format!("{}/v2/{}/blobs/{}", self.base, name, digest)
    }

    pub fn upload_start_url(&self, name: &str) -> String {
        format!("{}/v2/{}/blobs/uploads/", self.base, name)
    }

    pub fn upload_url(&self, name: &str, uuid: &str) -> String {
        format!("{}/v2/{}/blobs/uploads/{}", self.base, name, uuid)
    }
}
