// Metric-name normalization to the character set of a single-byte legacy encoding.
// The ingest pipeline only sees the `NameNormalizer` trait, so the target encoding can change.

use tracing::debug;

/// Replacement used when a character has no mapping in the target encoding.
pub const SUBSTITUTE: char = '?';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub name: String,
    /// Characters replaced by the lossy conversion. Non-zero is not an error.
    pub replaced: usize,
}

/// Reduces a metric name to the character set of a target encoding. The result is still
/// ordinary UTF-8 text: characters are restricted, bytes are not re-encoded.
pub trait NameNormalizer: Send + Sync {
    fn normalize(&self, name: &str) -> Normalized;
}

/// ISO-8859-1 character set: U+0000..=U+00FF are kept, everything else becomes `?`.
/// The returned `String` only holds characters from that range, encoded as UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct Latin1Normalizer;

impl NameNormalizer for Latin1Normalizer {
    fn normalize(&self, name: &str) -> Normalized {
        let mut replaced = 0;
        let out: String = name
            .chars()
            .map(|c| {
                if u32::from(c) <= 0xFF {
                    c
                } else {
                    replaced += 1;
                    SUBSTITUTE
                }
            })
            .collect();
        if replaced > 0 {
            debug!(
                operation = "normalize_name",
                replaced, "lossy latin-1 conversion of metric name"
            );
        }
        Normalized {
            name: out,
            replaced,
        }
    }
}
