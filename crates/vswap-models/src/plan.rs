//! Plan configuration and quota limits.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

const MB: u64 = 1024 * 1024;
const GB: u64 = 1024 * MB;

/// Plan tier enumeration, ordered from cheapest to most expensive.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Basic,
    Advanced,
    Premium,
}

impl PlanTier {
    /// All tiers in ascending order.
    pub const ALL: [PlanTier; 3] = [PlanTier::Basic, PlanTier::Advanced, PlanTier::Premium];

    /// Parse from string (case-insensitive). Unknown names are `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "basic" | "free" => Some(PlanTier::Basic),
            "advanced" => Some(PlanTier::Advanced),
            "premium" => Some(PlanTier::Premium),
            _ => None,
        }
    }

    /// Get the plan name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Basic => "basic",
            PlanTier::Advanced => "advanced",
            PlanTier::Premium => "premium",
        }
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Feature flags attached to a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PlanFeatures {
    pub stats: bool,
    pub exchange_priority: bool,
    pub search_priority: bool,
    pub support_priority: bool,
}

/// Subscription plan. Immutable reference data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Plan {
    /// Plan tier (also the document id).
    pub name: PlanTier,
    /// Monthly price in minor currency units.
    pub monthly_price_cents: u32,
    /// Total bytes a user may keep in their library.
    pub library_storage: u64,
    /// Maximum number of videos a user may own at once.
    pub library_size: u32,
    /// Per-upload byte ceiling.
    pub video_max_size: u64,
    /// Exchange requests a user may initiate per calendar month. 0 = unlimited.
    pub exchange_limit: u32,
    #[serde(default)]
    pub features: PlanFeatures,
}

impl Default for Plan {
    fn default() -> Self {
        Self::for_tier(PlanTier::Basic)
    }
}

impl Plan {
    /// Seed values for a tier, used when the plans collection is empty.
    pub fn for_tier(tier: PlanTier) -> Self {
        match tier {
            PlanTier::Basic => Self {
                name: PlanTier::Basic,
                monthly_price_cents: 0,
                library_storage: GB,
                library_size: 10,
                video_max_size: 200 * MB,
                exchange_limit: 5,
                features: PlanFeatures::default(),
            },
            PlanTier::Advanced => Self {
                name: PlanTier::Advanced,
                monthly_price_cents: 999,
                library_storage: 10 * GB,
                library_size: 50,
                video_max_size: GB,
                exchange_limit: 20,
                features: PlanFeatures {
                    stats: true,
                    exchange_priority: false,
                    search_priority: true,
                    support_priority: false,
                },
            },
            PlanTier::Premium => Self {
                name: PlanTier::Premium,
                monthly_price_cents: 1999,
                library_storage: 50 * GB,
                library_size: 200,
                video_max_size: 4 * GB,
                exchange_limit: 0,
                features: PlanFeatures {
                    stats: true,
                    exchange_priority: true,
                    search_priority: true,
                    support_priority: true,
                },
            },
        }
    }

    /// True when the monthly exchange quota is unlimited.
    pub fn has_unlimited_exchanges(&self) -> bool {
        self.exchange_limit == 0
    }
}

/// Format bytes as human-readable string (KB, MB, GB).
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
