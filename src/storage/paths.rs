// PathManager maps "object names" internal to the storage system onto
// canonical backend paths.
//
// The path layout in the storage backend is roughly as follows:
//
//	<root>/blobs
//	│   └── <algorithm>
//	│       └── <split directory content addressable storage>
//	└── repositories
//	    └── <name>
//	        ├── _uploads
//	        │   └── <uuid>
//	        │       ├── data
//	        │       └── startedat
//	        ├── _layers
//	        │   └── <algorithm>
//	        │       └── <hex>
//	        │           └── link
//	        └── _manifests
//	            ├── revisions
//	            │   └── <algorithm>
//	            │       └── <hex>
//	            │           └── link
//	            └── tags
//	                └── <tag>
//	                    └── current
//	                        └── link
//
// The backend is split into a content-addressable blob store and the
// repositories tree. Blobs are global and deduplicated; access to them from
// a repository is controlled through link files under the repository.

use std::sync::LazyLock;

use regex::Regex;

use crate::digest::Digest;

/// Every path handed to a storage driver must match this expression: an
/// absolute form of non-empty components from a restricted character set.
/// Components cannot start with a dot, which rules out `.` and `..`; empty
/// components (double slashes) and non-printable bytes cannot match at all.
pub static PATH_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(/[A-Za-z0-9_=+-][A-Za-z0-9._=+-]*)+$").unwrap());

pub fn is_valid_path(path: &str) -> bool {
    path == "/" || PATH_REGEX.is_match(path)
}

#[derive(Clone, Copy, Default, Debug)]
pub struct PathManager;

impl PathManager {
    pub fn new() -> Self {
        PathManager
    }

    /// Returns the path to the root of the repositories,
    /// (e.g. `/repositories`).
    pub fn repositories_path(&self) -> String {
        "/repositories".to_string()
    }

    /// Returns the path to a single repository,
    /// (e.g. `/repositories/<name>`).
    pub fn repository_path(&self, name: &str) -> String {
        format!("{}/{}", self.repositories_path(), name)
    }

    /// Returns the path to the root of a repository's upload sessions,
    /// (e.g. `/repositories/<name>/_uploads`).
    pub fn uploads_path(&self, name: &str) -> String {
        format!("{}/_uploads", self.repository_path(name))
    }

    /// Returns the path to a single upload session,
    /// (e.g. `/repositories/<name>/_uploads/<uuid>`).
    pub fn upload_path(&self, name: &str, uuid: &str) -> String {
        format!("{}/{}", self.uploads_path(name), uuid)
    }

    /// Returns the path to the staging bytes of an upload session,
    /// (e.g. `/repositories/<name>/_uploads/<uuid>/data`).
    pub fn upload_data_path(&self, name: &str, uuid: &str) -> String {
        format!("{}/data", self.upload_path(name, uuid))
    }

    /// Returns the path to the start-time record of an upload session,
    /// (e.g. `/repositories/<name>/_uploads/<uuid>/startedat`).
    pub fn upload_startedat_path(&self, name: &str, uuid: &str) -> String {
        format!("{}/startedat", self.upload_path(name, uuid))
    }

    /// Returns the path to a repository's layer link for a digest,
    /// (e.g. `/repositories/<name>/_layers/<algorithm>/<hex>/link`).
    pub fn layer_link_path(&self, name: &str, digest: &Digest) -> String {
        format!(
            "{}/_layers/{}/{}/link",
            self.repository_path(name),
            digest.algorithm(),
            digest.hex()
        )
    }

    /// Returns the path to the root of a repository's manifests,
    /// (e.g. `/repositories/<name>/_manifests`).
    pub fn manifests_path(&self, name: &str) -> String {
        format!("{}/_manifests", self.repository_path(name))
    }

    /// Returns the path to a manifest revision link,
    /// (e.g. `/repositories/<name>/_manifests/revisions/<algorithm>/<hex>/link`).
    pub fn manifest_revision_link_path(&self, name: &str, digest: &Digest) -> String {
        format!(
            "{}/revisions/{}/{}/link",
            self.manifests_path(name),
            digest.algorithm(),
            digest.hex()
        )
    }

    /// Returns the path to the root of a repository's manifest tags,
    /// (e.g. `/repositories/<name>/_manifests/tags`).
    pub fn manifest_tags_path(&self, name: &str) -> String {
        format!("{}/tags", self.manifests_path(name))
    }

    /// Returns the path to a single manifest tag,
    /// (e.g. `/repositories/<name>/_manifests/tags/<tag>`).
    pub fn manifest_tag_path(&self, name: &str, tag: &str) -> String {
        format!("{}/{}", self.manifest_tags_path(name), tag)
    }

    /// Returns the path to the current pointer of a manifest tag,
    /// (e.g. `/repositories/<name>/_manifests/tags/<tag>/current/link`).
    pub fn manifest_tag_link_path(&self, name: &str, tag: &str) -> String {
        format!("{}/current/link", self.manifest_tag_path(name, tag))
    }

    /// Returns the path to the root of the global blob store,
    /// (e.g. `/blobs`).
    pub fn blobs_path(&self) -> String {
        "/blobs".to_string()
    }

    /// Returns the path to a single blob's directory, sharded by the first
    /// two hex characters for directory fan-out,
    /// (e.g. `/blobs/<algorithm>/<first two hex>/<hex>`).
    pub fn blob_path(&self, digest: &Digest) -> String {
        format!(
            "{}/{}/{}/{}",
            self.blobs_path(),
            digest.algorithm(),
            digest.hex_prefix(),
            digest.hex()
        )
    }

    /// Returns the path to a blob's bytes,
    /// (e.g. `/blobs/<algorithm>/<first two hex>/<hex>/data`).
    pub fn blob_data_path(&self, digest: &Digest) -> String {
        format!("{}/data", self.blob_path(digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Algorithm;

    fn digest() -> Digest {
        Digest::from_bytes(Algorithm::Sha256, b"hello world")
    }

    #[test]
    fn upload_paths() {
        let pm = PathManager::new();
        assert_eq!(
            pm.upload_data_path("foo/bar", "some-uuid"),
            "/repositories/foo/bar/_uploads/some-uuid/data"
        );
        assert_eq!(
            pm.upload_startedat_path("foo/bar", "some-uuid"),
            "/repositories/foo/bar/_uploads/some-uuid/startedat"
        );
    }

    #[test]
    fn blob_paths_shard_on_hex_prefix() {
        let pm = PathManager::new();
        let d = digest();
        let expected = format!("/blobs/sha256/{}/{}/data", &d.hex()[..2], d.hex());
        assert_eq!(pm.blob_data_path(&d), expected);
    }

    #[test]
    fn layer_link_path() {
        let pm = PathManager::new();
        let d = digest();
        assert_eq!(
            pm.layer_link_path("library/alpine", &d),
            format!(
                "/repositories/library/alpine/_layers/sha256/{}/link",
                d.hex()
            )
        );
    }

    #[test]
    fn manifest_paths() {
        let pm = PathManager::new();
        let d = digest();
        assert_eq!(
            pm.manifest_revision_link_path("a", &d),
            format!("/repositories/a/_manifests/revisions/sha256/{}/link", d.hex())
        );
        assert_eq!(
            pm.manifest_tag_link_path("a", "v1"),
            "/repositories/a/_manifests/tags/v1/current/link"
        );
        assert_eq!(pm.manifest_tags_path("a"), "/repositories/a/_manifests/tags");
    }

    #[test]
    fn tarsum_paths_stay_valid() {
        let pm = PathManager::new();
        let d = Digest::parse(&format!("tarsum.v1+sha256:{}", digest().hex())).unwrap();
        assert!(is_valid_path(&pm.blob_data_path(&d)));
        assert!(is_valid_path(&pm.layer_link_path("foo/bar", &d)));
    }

    #[test]
    fn regex_rejects_traversal_and_junk() {
        assert!(is_valid_path("/repositories/foo/bar/_uploads"));
        assert!(is_valid_path("/"));
        assert!(!is_valid_path("relative/path"));
        assert!(!is_valid_path("/repositories//double"));
        assert!(!is_valid_path("/repositories/../escape"));
        assert!(!is_valid_path("/repositories/.hidden"));
        assert!(!is_valid_path("/with space"));
        assert!(!is_valid_path("/with\nnewline"));
        assert!(!is_valid_path("/trailing/"));
        assert!(!is_valid_path(""));
    }
}
