//! Order-book error taxonomy.

use thiserror::Error;

/// Errors raised while fetching or assembling liquidity curves.
#[derive(Debug, Error)]
pub enum CurveError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("pair {base}/{quote} is not supported by {dex}")]
    UnsupportedPair {
        dex: &'static str,
        base: String,
        quote: String,
    },

    #[error("no usable price for {0}")]
    MissingPrice(String),
}
