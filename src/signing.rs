use anyhow::{bail, Result};
use sha2::{Digest, Sha256};

use crate::slices::ViewId;

pub const DEFAULT_SLICE_WIDTH: u32 = 500;
pub const DEFAULT_SLICE_QUALITY: u8 = 80;
const SIGNATURE_HEX_LEN: usize = 80;

/// Shared secret handed to the viewer by its launcher.
///
/// The digest only discourages casual URL tampering. Anyone holding the viewer
/// holds the secret, so this must never be treated as access control.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningSecret(String);

impl SigningSecret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningSecret(..)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SliceRequest {
    pub view: ViewId,
    pub index: usize,
    pub width: u32,
    pub quality: u8,
}

impl SliceRequest {
    pub fn new(view: ViewId, index: usize) -> Self {
        Self {
            view,
            index,
            width: DEFAULT_SLICE_WIDTH,
            quality: DEFAULT_SLICE_QUALITY,
        }
    }

    pub fn with_size(mut self, width: u32, quality: u8) -> Self {
        self.width = width;
        self.quality = quality;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.width == 0 {
            bail!("Slice width must be greater than zero");
        }
        if !(1..=100).contains(&self.quality) {
            bail!("Slice quality must be within 1..=100 (got {})", self.quality);
        }
        Ok(())
    }

    fn canonical(&self, secret: &SigningSecret) -> String {
        format!(
            "{}-{}-{}-{}-{}",
            self.view,
            self.index,
            self.width,
            self.quality,
            secret.expose()
        )
    }
}

#[derive(Debug, Clone)]
pub struct UrlSigner {
    base_url: String,
    secret: SigningSecret,
}

impl UrlSigner {
    pub fn new(base_url: &str, secret: SigningSecret) -> Self {
        Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            secret,
        }
    }

    pub fn signature(&self, request: &SliceRequest) -> String {
        let mut hasher = Sha256::new();
        hasher.update(request.canonical(&self.secret).as_bytes());
        let mut hex = format!("{:x}", hasher.finalize());
        hex.truncate(SIGNATURE_HEX_LEN);
        hex
    }

    pub fn slice_url(&self, request: &SliceRequest) -> Result<String> {
        request.validate()?;
        Ok(format!(
            "{}/cdn-slice?view={}&index={}&w={}&q={}&s={}",
            self.base_url,
            request.view,
            request.index,
            request.width,
            request.quality,
            self.signature(request)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> UrlSigner {
        UrlSigner::new("http://localhost:5000/", SigningSecret::new("shared"))
    }

    #[test]
    fn signature_is_deterministic() {
        let request = SliceRequest::new(ViewId::Coronal, 17);
        assert_eq!(signer().signature(&request), signer().signature(&request));
        assert_eq!(signer().slice_url(&request).ok(), signer().slice_url(&request).ok());
    }

    #[test]
    fn signature_is_full_sha256_hex() {
        let signature = signer().signature(&SliceRequest::new(ViewId::Axial, 0));
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_matches_known_digest() {
        let mut hasher = Sha256::new();
        hasher.update(b"axial-3-500-80-shared");
        let expected = format!("{:x}", hasher.finalize());
        assert_eq!(
            signer().signature(&SliceRequest::new(ViewId::Axial, 3)),
            expected
        );
    }

    #[test]
    fn signature_changes_with_every_parameter() {
        let base = SliceRequest::new(ViewId::Axial, 3);
        let signer = signer();
        let reference = signer.signature(&base);
        assert_ne!(reference, signer.signature(&SliceRequest { index: 4, ..base }));
        assert_ne!(
            reference,
            signer.signature(&SliceRequest {
                view: ViewId::Sagittal,
                ..base
            })
        );
        assert_ne!(reference, signer.signature(&base.with_size(700, 80)));
        assert_ne!(reference, signer.signature(&base.with_size(500, 100)));
        let other = UrlSigner::new("http://localhost:5000", SigningSecret::new("other"));
        assert_ne!(reference, other.signature(&base));
    }

    #[test]
    fn url_embeds_parameters_and_signature() {
        let request = SliceRequest::new(ViewId::Sagittal, 12);
        let url = signer().slice_url(&request).expect("valid request");
        let signature = signer().signature(&request);
        assert_eq!(
            url,
            format!("http://localhost:5000/cdn-slice?view=sagittal&index=12&w=500&q=80&s={signature}")
        );
    }

    #[test]
    fn invalid_size_is_rejected() {
        let request = SliceRequest::new(ViewId::Axial, 0);
        assert!(signer().slice_url(&request.with_size(0, 80)).is_err());
        assert!(signer().slice_url(&request.with_size(500, 0)).is_err());
        assert!(signer().slice_url(&request.with_size(500, 101)).is_err());
        assert!(signer().slice_url(&request.with_size(1, 100)).is_ok());
    }

    #[test]
    fn secret_is_not_printed_by_debug() {
        let debug = format!("{:?}", SigningSecret::new("hunter2"));
        assert!(!debug.contains("hunter2"));
    }
}
