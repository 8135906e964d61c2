//! Content-addressed manifest storage
//!
//! Manifests are immutable documents addressed by CID. Reads go through an
//! HTTP gateway; writes pin the canonical JSON with a pinning service and hand
//! back the CID the on-chain pointer will reference.

pub mod pinata;

use async_trait::async_trait;

use crate::manifest::Manifest;
use crate::types::Result;

pub use pinata::{PinataConfig, PinataStore, DEFAULT_GATEWAY, DEFAULT_PINATA_API};

/// Reads and pins manifests
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Fetch and decode the manifest stored under `cid`. `gateway_hint` is the
    /// gateway advertised by the project, if any.
    async fn fetch_manifest(&self, cid: &str, gateway_hint: Option<&str>) -> Result<Manifest>;

    /// Pin the canonical encoding of `manifest` and return its CID
    async fn pin_manifest(&self, manifest: &Manifest, name: &str) -> Result<String>;
}

/// Check that `value` parses as a CID (v0 or v1)
pub fn validate_cid(value: &str) -> std::result::Result<cid::Cid, String> {
    cid::Cid::try_from(value).map_err(|e| format!("{} is not a valid CID: {}", value, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_cid() {
        assert!(validate_cid("QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG").is_ok());
        assert!(validate_cid("bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi").is_ok());
        assert!(validate_cid("not-a-cid").is_err());
        assert!(validate_cid("").is_err());
    }
}
