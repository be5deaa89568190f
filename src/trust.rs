//! Trust tiers, worker trust snapshots and plan trust policy

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ordered worker trust level.
///
/// Declaration order is the trust order: every comparison (policy
/// satisfiability, worker ranking) goes through the derived `Ord`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    /// Manual approval, full audit, sandboxed
    Untrusted = 0,
    /// Basic verification, isolated
    Sandbox = 1,
    /// Code audit, signed, organization-approved
    #[default]
    Verified = 2,
    /// Root authority signed, production-grade
    Trusted = 3,
}

impl TrustTier {
    pub const ALL: [TrustTier; 4] = [
        TrustTier::Untrusted,
        TrustTier::Sandbox,
        TrustTier::Verified,
        TrustTier::Trusted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Untrusted => "untrusted",
            Self::Sandbox => "sandbox",
            Self::Verified => "verified",
            Self::Trusted => "trusted",
        }
    }

    pub fn level(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for TrustTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrustTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "untrusted" | "0" => Ok(Self::Untrusted),
            "sandbox" | "1" => Ok(Self::Sandbox),
            "verified" | "2" => Ok(Self::Verified),
            "trusted" | "3" => Ok(Self::Trusted),
            other => Err(format!("unknown trust tier '{other}'")),
        }
    }
}

/// Outcome of the registry's trust verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pass,
    Fail,
    #[default]
    Unknown,
}

/// Trust snapshot for a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustInfo {
    /// Tier asserted by the worker
    pub declared_tier: TrustTier,
    /// Tier set by the registry's verification routine
    #[serde(default)]
    pub verified_tier: Option<TrustTier>,
    #[serde(default)]
    pub verification_status: VerificationStatus,
    /// Base64 signature, if the worker supplied one
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub verified_by: Option<String>,
}

impl TrustInfo {
    /// Trust info carrying only a declared tier
    pub fn declared(tier: TrustTier) -> Self {
        Self {
            declared_tier: tier,
            verified_tier: None,
            verification_status: VerificationStatus::Unknown,
            signature: None,
            verified_at: None,
            verified_by: None,
        }
    }

    pub fn with_verified(mut self, tier: TrustTier) -> Self {
        self.verified_tier = Some(tier);
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// Verified tier if present, otherwise the declared tier
    pub fn effective_tier(&self) -> TrustTier {
        self.verified_tier.unwrap_or(self.declared_tier)
    }

    pub fn has_signature(&self) -> bool {
        self.signature.as_deref().is_some_and(|s| !s.trim().is_empty())
    }
}

/// Trust requirements governing a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustPolicy {
    pub minimum_worker_tier: TrustTier,
    pub require_signatures: bool,
    pub allow_cross_department: bool,
}

impl Default for TrustPolicy {
    fn default() -> Self {
        Self {
            minimum_worker_tier: TrustTier::Verified,
            require_signatures: false,
            allow_cross_department: true,
        }
    }
}

impl TrustPolicy {
    pub fn with_minimum(tier: TrustTier) -> Self {
        Self {
            minimum_worker_tier: tier,
            ..Default::default()
        }
    }

    /// Tier check only
    pub fn tier_satisfied(&self, trust: &TrustInfo) -> bool {
        trust.effective_tier() >= self.minimum_worker_tier
    }

    /// Tier check plus signature requirement
    pub fn admits(&self, trust: &TrustInfo) -> bool {
        self.tier_satisfied(trust) && (!self.require_signatures || trust.has_signature())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering() {
        assert!(TrustTier::Untrusted < TrustTier::Sandbox);
        assert!(TrustTier::Sandbox < TrustTier::Verified);
        assert!(TrustTier::Verified < TrustTier::Trusted);
        assert_eq!(TrustTier::Trusted.level(), 3);

        let mut tiers = vec![TrustTier::Trusted, TrustTier::Untrusted, TrustTier::Verified];
        tiers.sort();
        assert_eq!(tiers, vec![TrustTier::Untrusted, TrustTier::Verified, TrustTier::Trusted]);
    }

    #[test]
    fn test_tier_parse() {
        assert_eq!("Sandbox".parse::<TrustTier>(), Ok(TrustTier::Sandbox));
        assert_eq!("3".parse::<TrustTier>(), Ok(TrustTier::Trusted));
        assert!("root".parse::<TrustTier>().is_err());
    }

    #[test]
    fn test_tier_serde() {
        let json = serde_json::to_string(&TrustTier::Verified).unwrap();
        assert_eq!(json, "\"verified\"");
        let tier: TrustTier = serde_json::from_str("\"untrusted\"").unwrap();
        assert_eq!(tier, TrustTier::Untrusted);
    }

    #[test]
    fn test_effective_tier() {
        let trust = TrustInfo::declared(TrustTier::Trusted);
        assert_eq!(trust.effective_tier(), TrustTier::Trusted);

        let trust = trust.with_verified(TrustTier::Sandbox);
        assert_eq!(trust.effective_tier(), TrustTier::Sandbox);
    }

    #[test]
    fn test_policy_admits() {
        let policy = TrustPolicy::default();
        assert!(policy.admits(&TrustInfo::declared(TrustTier::Verified)));
        assert!(!policy.admits(&TrustInfo::declared(TrustTier::Sandbox)));

        let signed = TrustPolicy {
            require_signatures: true,
            ..Default::default()
        };
        assert!(!signed.admits(&TrustInfo::declared(TrustTier::Trusted)));
        assert!(!signed.admits(&TrustInfo::declared(TrustTier::Trusted).with_signature("  ")));
        assert!(signed.admits(&TrustInfo::declared(TrustTier::Trusted).with_signature("c2ln")));
    }
}
