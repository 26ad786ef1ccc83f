use crate::error::FeedError;
use crate::model::{FeedSource, ForecastSet, Units};

pub mod nws;
pub mod owm;
pub mod walker;
pub mod wu;

/// Parses one forecast document of the given feed.
pub fn parse_forecast(
    source: FeedSource,
    document: &[u8],
    units: Units,
) -> Result<ForecastSet, FeedError> {
    match source {
        FeedSource::Wu => wu::parse(document, units),
        FeedSource::Nws => nws::parse_forecast(document, units),
        FeedSource::Owm => owm::parse(document, units),
    }
}

/// Running concatenation of every alert leaf seen in a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertText {
    text: String,
    count: usize,
}

impl AlertText {
    pub fn push_leaf(&mut self, text: &str) {
        self.text.push_str(text);
    }

    pub fn count_alert(&mut self) {
        self.count += 1;
    }

    /// Change-detection identifier. The alert count is part of the hashed
    /// input, so a present-but-empty alerts section differs from a document
    /// that never had one (which carries no identifier at all).
    pub fn identifier(&self) -> i32 {
        text_hash(&format!("{}|{}", self.count, self.text))
    }
}

/// 31-multiplier polynomial hash over UTF-16 code units with 32-bit
/// wrapping, stable across runs and platforms.
pub fn text_hash(text: &str) -> i32 {
    text.encode_utf16()
        .fold(0_i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(unit)))
}
