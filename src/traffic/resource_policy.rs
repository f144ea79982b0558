//! Per-request resource blocking (§4.4): drops requests to known
//! high-traffic analytics/ads/social hosts, regex-matched trackers, and
//! (per the active saver profile) whole resource types, tallying a
//! conservative `bytes_saved_estimate`.

use std::sync::atomic::{AtomicU64, Ordering};

use regex::RegexSet;

/// Static high-traffic blocklist. Not exhaustive by design — the regex
/// set below catches variants this list misses.
const HOST_BLOCKLIST: &[&str] = &[
    "google-analytics.com",
    "www.google-analytics.com",
    "googletagmanager.com",
    "googlesyndication.com",
    "googleadservices.com",
    "doubleclick.net",
    "facebook.com/tr",
    "connect.facebook.net",
    "analytics.tiktok.com",
    "hotjar.com",
    "static.hotjar.com",
    "clarity.ms",
    "segment.io",
    "cdn.segment.com",
    "mixpanel.com",
    "amplitude.com",
    "fullstory.com",
    "intercomcdn.com",
    "widget.intercom.io",
    "zendesk.com",
    "crisp.chat",
    "onesignal.com",
    "newrelic.com",
    "nr-data.net",
    "sentry.io",
    "bugsnag.com",
    "criteo.com",
    "criteo.net",
    "outbrain.com",
    "taboola.com",
    "adsrvr.org",
    "adnxs.com",
    "pubmatic.com",
    "rubiconproject.com",
    "scorecardresearch.com",
    "quantserve.com",
    "addthis.com",
    "sharethis.com",
    "disqus.com",
];

const TRACKER_PATTERNS: &[&str] = &[
    r".*analytics.*",
    r".*doubleclick.*",
    r".*tracking.*",
    r".*adservice.*",
    r".*/ads/.*",
    r".*pixel\.gif.*",
    r".*beacon.*",
    r".*telemetry.*",
];

/// Conservative average payload size saved per blocked resource type,
/// in bytes. Used to accumulate `bytes_saved_estimate`.
const BYTES_PER_TYPE: &[(ResourceType, u64)] = &[
    (ResourceType::Image, 150_000),
    (ResourceType::Script, 60_000),
    (ResourceType::Font, 40_000),
    (ResourceType::Media, 800_000),
    (ResourceType::Stylesheet, 20_000),
    (ResourceType::Document, 0),
    (ResourceType::Xhr, 0),
    (ResourceType::Other, 5_000),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Document,
    Stylesheet,
    Image,
    Script,
    Font,
    Media,
    Xhr,
    Other,
}

/// Which resource types the active saver profile drops. Defaults match
/// a "balanced" profile: images/fonts/media blocked, scripts kept
/// (many retailer SPAs need their own JS to render prices).
#[derive(Debug)]
pub struct ResourcePolicy {
    pub block_images: bool,
    pub block_scripts: bool,
    pub block_fonts: bool,
    pub block_media: bool,
    host_blocklist: std::collections::HashSet<&'static str>,
    tracker_patterns: RegexSet,
    bytes_saved_estimate: AtomicU64,
}

impl Clone for ResourcePolicy {
    fn clone(&self) -> Self {
        Self {
            block_images: self.block_images,
            block_scripts: self.block_scripts,
            block_fonts: self.block_fonts,
            block_media: self.block_media,
            host_blocklist: self.host_blocklist.clone(),
            tracker_patterns: self.tracker_patterns.clone(),
            bytes_saved_estimate: AtomicU64::new(self.bytes_saved_estimate.load(Ordering::Relaxed)),
        }
    }
}

impl Default for ResourcePolicy {
    fn default() -> Self {
        Self::new(true, false, true, true)
    }
}

impl ResourcePolicy {
    pub fn new(block_images: bool, block_scripts: bool, block_fonts: bool, block_media: bool) -> Self {
        Self {
            block_images,
            block_scripts,
            block_fonts,
            block_media,
            host_blocklist: HOST_BLOCKLIST.iter().copied().collect(),
            tracker_patterns: RegexSet::new(TRACKER_PATTERNS).expect("static tracker patterns are valid"),
            bytes_saved_estimate: AtomicU64::new(0),
        }
    }

    /// Whether a request to `host`/`url` should be dropped outright,
    /// independent of resource type.
    pub fn should_block_host(&self, host: &str, url: &str) -> bool {
        let host_lower = host.to_lowercase();
        if self.host_blocklist.contains(host_lower.as_str()) {
            return true;
        }
        self.tracker_patterns.is_match(&url.to_lowercase())
    }

    /// Whether the active saver profile drops this resource type.
    pub fn should_block_type(&self, resource_type: ResourceType) -> bool {
        match resource_type {
            ResourceType::Image => self.block_images,
            ResourceType::Script => self.block_scripts,
            ResourceType::Font => self.block_fonts,
            ResourceType::Media => self.block_media,
            _ => false,
        }
    }

    /// Evaluate whether a request should be dropped, recording the
    /// estimated bytes saved when it is.
    pub fn evaluate(&self, host: &str, url: &str, resource_type: ResourceType) -> bool {
        let blocked = self.should_block_host(host, url) || self.should_block_type(resource_type);
        if blocked {
            let estimate = BYTES_PER_TYPE
                .iter()
                .find(|(t, _)| *t == resource_type)
                .map(|(_, b)| *b)
                .unwrap_or(5_000);
            self.bytes_saved_estimate.fetch_add(estimate, Ordering::Relaxed);
        }
        blocked
    }

    pub fn bytes_saved_estimate(&self) -> u64 {
        self.bytes_saved_estimate.load(Ordering::Relaxed)
    }
}
