//! FX normalization: point-in-time rates into settlement currency

pub mod http;
mod normalizer;

pub use http::HttpRateSource;
pub use normalizer::{FxNormalizer, StaticRateSource, DEFAULT_RATE_TTL};
