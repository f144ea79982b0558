//! Deterministic SKU Generator (§4.1).
//!
//! Produces a stable 10-character identifier `[RRR][HHHHHHH]`: a
//! 3-letter retailer code followed by a 7-hex-digit truncation of a
//! SHA-256 hash over ordered, normalized product components.

use std::collections::HashSet;

use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::SkuError;
use crate::models::Retailer;

const JUNK_SKU_VALUES: [&str; 3] = ["", "nan", "none"];
const TRACKING_PARAM_PREFIXES: [&str; 1] = ["utm_"];
const TRACKING_PARAM_NAMES: [&str; 4] = ["fbclid", "gclid", "ref", "source"];
const MAX_COLLISION_ATTEMPTS: u32 = 10;
const EXISTENCE_CACHE_CAPACITY: usize = 50_000;

/// Generates stable SKUs and amortizes repeated generation for the
/// same inputs via a bounded LRU cache. One instance is shared across
/// retailer workers for the lifetime of the process.
pub struct SkuGenerator {
    cache: Mutex<LruCache<CacheKey, String>>,
    seen_hashes: Mutex<HashSet<String>>,
}

type CacheKey = (Retailer, String, String, String);

impl SkuGenerator {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                std::num::NonZeroUsize::new(EXISTENCE_CACHE_CAPACITY).unwrap(),
            )),
            seen_hashes: Mutex::new(HashSet::new()),
        }
    }

    /// Generate (or retrieve from cache) the SKU for a raw product
    /// record. Deterministic across runs for identical inputs.
    pub fn generate(
        &self,
        retailer: Retailer,
        external_sku: Option<&str>,
        link: &str,
        name: &str,
        brand: Option<&str>,
    ) -> Result<String, SkuError> {
        let key = cache_key(retailer, external_sku, link, name);
        if let Some(hit) = self.cache.lock().get(&key) {
            return Ok(hit.clone());
        }

        let components = build_components(external_sku, link, name, brand);
        let joined = if components.is_empty() {
            warn!(retailer = retailer.as_str(), "no SKU components present, falling back to timestamp");
            format!("TS:{}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default())
        } else {
            components.join("|")
        };

        let code = self.hash_with_collision_retry(retailer, &joined)?;
        self.cache.lock().put(key, code.clone());
        Ok(code)
    }

    fn hash_with_collision_retry(
        &self,
        retailer: Retailer,
        joined: &str,
    ) -> Result<String, SkuError> {
        let mut attempt = 0u32;
        let mut candidate = joined.to_string();
        loop {
            let digest = Sha256::digest(candidate.as_bytes());
            let hex = hex::encode_upper(digest);
            let hash7 = &hex[..7];
            let code = format!("{}{}", retailer.code(), hash7);

            {
                let mut seen = self.seen_hashes.lock();
                if seen.insert(code.clone()) {
                    return Ok(code);
                }
            }

            attempt += 1;
            if attempt >= MAX_COLLISION_ATTEMPTS {
                warn!(
                    retailer = retailer.as_str(),
                    attempts = attempt,
                    "SKU hash collision limit exceeded"
                );
                return Err(SkuError::CollisionLimitExceeded {
                    retailer: retailer.as_str().to_string(),
                    attempts: attempt,
                });
            }
            candidate = format!("{}|#{}", joined, attempt);
        }
    }
}

impl Default for SkuGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn cache_key(retailer: Retailer, external_sku: Option<&str>, link: &str, name: &str) -> CacheKey {
    let sku_part: String = external_sku.unwrap_or("").chars().take(20).collect();
    let link_part: String = link.chars().take(50).collect();
    let name_part: String = name.chars().take(30).collect();
    (retailer, sku_part, link_part, name_part)
}

fn build_components(
    external_sku: Option<&str>,
    link: &str,
    name: &str,
    brand: Option<&str>,
) -> Vec<String> {
    let mut components = Vec::with_capacity(4);

    if let Some(sku) = external_sku {
        let trimmed = sku.trim();
        if !trimmed.is_empty() && !JUNK_SKU_VALUES.contains(&trimmed.to_lowercase().as_str()) {
            components.push(format!("SKU:{}", trimmed));
        }
    }

    let normalized_link = normalize_link(link);
    if !normalized_link.is_empty() {
        components.push(format!("LINK:{}", normalized_link));
    }

    let normalized_name = normalize_name(name);
    if !normalized_name.is_empty() {
        components.push(format!("NAME:{}", normalized_name));
    }

    if let Some(b) = brand {
        let trimmed = b.trim();
        if !trimmed.is_empty() {
            components.push(format!("BRAND:{}", trimmed.to_uppercase()));
        }
    }

    components
}

/// Strip scheme+host, strip tracking query params, trim trailing `/`.
fn normalize_link(link: &str) -> String {
    let without_scheme = link
        .trim()
        .splitn(2, "://")
        .last()
        .unwrap_or(link)
        .to_string();

    let path_and_query = match without_scheme.find('/') {
        Some(idx) => &without_scheme[idx..],
        None => "",
    };

    let (path, query) = match path_and_query.find('?') {
        Some(idx) => (&path_and_query[..idx], &path_and_query[idx + 1..]),
        None => (path_and_query, ""),
    };

    let filtered_query: Vec<&str> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter(|pair| {
            let param = pair.split('=').next().unwrap_or("");
            let lower = param.to_lowercase();
            !TRACKING_PARAM_PREFIXES
                .iter()
                .any(|prefix| lower.starts_with(prefix))
                && !TRACKING_PARAM_NAMES.contains(&lower.as_str())
        })
        .collect();

    let trimmed_path = path.trim_end_matches('/');
    let assembled = if filtered_query.is_empty() {
        trimmed_path.to_string()
    } else {
        format!("{}?{}", trimmed_path, filtered_query.join("&"))
    };

    assembled.trim_end_matches('/').to_string()
}

/// Lowercase, strip punctuation to spaces, collapse whitespace.
fn normalize_name(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut last_was_space = false;
    for ch in lowered.chars() {
        if ch.is_alphanumeric() {
            out.push(ch);
            last_was_space = false;
        } else if !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }
    out.trim().to_string()
}
