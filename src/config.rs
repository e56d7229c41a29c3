//! Environment configuration and AWS client bootstrap.

use std::env;

use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use thiserror::Error;

use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),
}

/// Radius/duration regime for one segment kind.
#[derive(Debug, Clone, Copy)]
pub struct SegmentThresholds {
    pub radius_m: f64,
    pub min_duration_s: i64,
}

impl SegmentThresholds {
    pub const STAY_DEFAULT: Self = Self {
        radius_m: 200.0,
        min_duration_s: 300,
    };
    pub const VISIT_DEFAULT: Self = Self {
        radius_m: 120.0,
        min_duration_s: 30,
    };
}

/// The enumerated environment of the pipeline; parsed once per invocation.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub raw_bucket: String,
    pub place_index: Option<String>,
    pub route_calculator: Option<String>,
    pub tracker_name: Option<String>,
    pub max_results: i32,
    pub stay: SegmentThresholds,
    pub visit: SegmentThresholds,
    pub stays_function: Option<String>,
    pub enrich_function: Option<String>,
    pub read_retry: RetryPolicy,
    pub geocode_retry: RetryPolicy,
    pub merge_retry: RetryPolicy,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw_bucket =
            env::var("RAW_BUCKET").map_err(|_| ConfigError::Missing("RAW_BUCKET"))?;

        Ok(Self {
            raw_bucket,
            place_index: optional("PLACE_INDEX"),
            route_calculator: optional("ROUTE_CALCULATOR"),
            tracker_name: optional("TRACKER_NAME"),
            max_results: parse_or("MAX_RESULTS", 1),
            stay: SegmentThresholds {
                radius_m: parse_or("STAY_RADIUS_M", SegmentThresholds::STAY_DEFAULT.radius_m),
                min_duration_s: parse_or(
                    "STAY_MIN_SEC",
                    SegmentThresholds::STAY_DEFAULT.min_duration_s,
                ),
            },
            visit: SegmentThresholds {
                radius_m: parse_or("VISIT_RADIUS_M", SegmentThresholds::VISIT_DEFAULT.radius_m),
                min_duration_s: parse_or(
                    "VISIT_MIN_SEC",
                    SegmentThresholds::VISIT_DEFAULT.min_duration_s,
                ),
            },
            stays_function: optional("STAYS_FUNCTION"),
            enrich_function: optional("ENRICH_FUNCTION"),
            read_retry: RetryPolicy::object_read(),
            geocode_retry: RetryPolicy::geocode(),
            merge_retry: RetryPolicy::merge_conflict(),
        })
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// `DEBUG_MODE` accepts the usual truthy spellings.
#[must_use]
pub fn debug_mode() -> bool {
    env::var("DEBUG_MODE").is_ok_and(|value| {
        matches!(
            value.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

/// Shared AWS client configuration with the regional fallback.
pub async fn load_aws_config() -> aws_config::SdkConfig {
    let region = RegionProviderChain::default_provider().or_else("us-east-1");
    aws_config::defaults(BehaviorVersion::latest())
        .region(region)
        .load()
        .await
}
