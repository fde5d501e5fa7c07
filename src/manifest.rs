//! Signed image manifests (schema version 1). A manifest binds a name and
//! tag to an ordered list of layer digests plus per-layer history, carrying
//! a detached JWS signature block. The registry stores manifests
//! content-addressed under the digest of their canonical payload — the
//! serialization with the signature block stripped — and never re-signs or
//! verifies signatures (clients do).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use crate::digest::{Algorithm, Digest};
use crate::error::RegistryError;

pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v1+prettyjws";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedManifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,

    pub name: String,

    pub tag: String,

    #[serde(rename = "fsLayers")]
    pub fs_layers: Vec<FsLayer>,

    pub history: Vec<HistoryEntry>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<Signature>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsLayer {
    #[serde(rename = "blobSum")]
    pub blob_sum: Digest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "v1Compatibility")]
    pub v1_compatibility: String,
}

/// One detached JWS signature. The protected header records how to
/// reconstruct the signed payload from the stored bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<serde_json::Value>,

    pub signature: String,

    pub protected: String,
}

#[derive(Debug, Deserialize)]
struct ProtectedHeader {
    #[serde(rename = "formatLength")]
    format_length: usize,

    #[serde(rename = "formatTail")]
    format_tail: String,
}

impl SignedManifest {
    /// Deserializes and structurally validates a manifest body.
    pub fn parse(raw: &[u8]) -> Result<Self, RegistryError> {
        let manifest: SignedManifest = serde_json::from_slice(raw)
            .map_err(|e| RegistryError::ManifestInvalid(e.to_string()))?;
        if manifest.schema_version != 1 {
            return Err(RegistryError::ManifestInvalid(format!(
                "unsupported schema version {}",
                manifest.schema_version
            )));
        }
        if manifest.name.is_empty() {
            return Err(RegistryError::ManifestInvalid(
                "manifest name is empty".to_string(),
            ));
        }
        if manifest.fs_layers.is_empty() {
            return Err(RegistryError::ManifestInvalid(
                "manifest has no layers".to_string(),
            ));
        }
        Ok(manifest)
    }

    pub fn layer_digests(&self) -> impl Iterator<Item = &Digest> {
        self.fs_layers.iter().map(|l| &l.blob_sum)
    }

    /// The canonical payload of `raw`: the signed byte range described by
    /// the first signature's protected header, or `raw` itself for an
    /// unsigned manifest.
    pub fn payload(&self, raw: &[u8]) -> Result<Vec<u8>, RegistryError> {
        let Some(signature) = self.signatures.first() else {
            return Ok(raw.to_vec());
        };

        let invalid = |what: &str| RegistryError::ManifestInvalid(format!("bad signature: {what}"));
        let protected = URL_SAFE_NO_PAD
            .decode(&signature.protected)
            .map_err(|_| invalid("protected header is not base64url"))?;
        let protected: ProtectedHeader =
            serde_json::from_slice(&protected).map_err(|_| invalid("malformed protected header"))?;
        if protected.format_length > raw.len() {
            return Err(invalid("format length exceeds manifest size"));
        }
        let tail = URL_SAFE_NO_PAD
            .decode(&protected.format_tail)
            .map_err(|_| invalid("format tail is not base64url"))?;

        let mut payload = raw[..protected.format_length].to_vec();
        payload.extend_from_slice(&tail);
        Ok(payload)
    }

    /// Content digest of the canonical payload.
    pub fn digest(&self, raw: &[u8]) -> Result<Digest, RegistryError> {
        Ok(Digest::from_bytes(Algorithm::Sha256, &self.payload(raw)?))
    }
}
