//! Typed errors at the two seams that benefit from structured matching:
//! SKU generation and price canonicalization. Everything else flows
//! through `anyhow::Result` with `.context(...)`, matching the rest of
//! the crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SkuError {
    #[error("no usable components to derive a SKU from (retailer={retailer})")]
    NoUsableComponents { retailer: String },

    #[error("exhausted {attempts} collision-resolution attempts for retailer={retailer}")]
    CollisionLimitExceeded { retailer: String, attempts: u32 },
}

#[derive(Debug, Error)]
pub enum PriceCanonicalizeError {
    #[error("record has no non-null price field")]
    AllPricesMissing,

    #[error("both price fields were zero or negative")]
    NonPositivePrices,
}
