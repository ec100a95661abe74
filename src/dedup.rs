//! Visual duplicate detection using perceptual hashing.
//!
//! Search results often serve the same photo from several hosts or at
//! several sizes. URL deduplication cannot see that, so decoded images are
//! fingerprinted and compared by Hamming distance.

use img_hash::image::DynamicImage;
use img_hash::{HashAlg, HasherConfig, ImageHash};
use tracing::debug;

/// Side length of the hash grid.
const HASH_SIZE: u32 = 16;

/// Default maximum Hamming distance at which two images count as the same.
///
/// Tolerates recompression, resizing and light color correction.
pub const DEFAULT_SIMILARITY_THRESHOLD: u32 = 10;

/// Perceptual fingerprint of a decoded image.
#[derive(Clone)]
pub struct Fingerprint(ImageHash);

impl Fingerprint {
    #[must_use]
    pub fn of(img: &DynamicImage) -> Self {
        let hasher = HasherConfig::new()
            .hash_size(HASH_SIZE, HASH_SIZE)
            .hash_alg(HashAlg::DoubleGradient)
            .to_hasher();
        Self(hasher.hash_image(img))
    }

    /// Hamming distance; `0` means perceptually identical.
    #[must_use]
    pub fn distance(&self, other: &Self) -> u32 {
        self.0.dist(&other.0)
    }

    #[must_use]
    pub fn to_base64(&self) -> String {
        self.0.to_base64()
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Fingerprint").field(&self.to_base64()).finish()
    }
}

/// Fingerprints of the images kept so far for one entity.
#[derive(Debug)]
pub struct SimilarityIndex {
    threshold: u32,
    kept: Vec<Fingerprint>,
}

impl SimilarityIndex {
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            kept: Vec::new(),
        }
    }

    /// Record `fingerprint` unless it is within the threshold of one already
    /// kept. Returns `true` when it was new.
    pub fn insert(&mut self, fingerprint: Fingerprint) -> bool {
        if let Some(distance) = self
            .kept
            .iter()
            .map(|known| known.distance(&fingerprint))
            .find(|d| *d <= self.threshold)
        {
            debug!(distance, threshold = self.threshold, "Visual duplicate");
            return false;
        }
        self.kept.push(fingerprint);
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.kept.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
}
