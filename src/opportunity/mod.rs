//! Opportunity Detector (§4.8): margin/ROI helpers plus the detector
//! itself.

pub mod costs;
pub mod detector;

pub use detector::{DetectorConfig, OpportunityDetector, PriceSide};
