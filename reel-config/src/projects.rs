use reel_sampling::SampleRate;
use serde::{Deserialize, Serialize};

use crate::byte_size::ByteSize;

fn default_true() -> bool {
    true
}

fn default_max_session_duration() -> u64 {
    // 30 minutes
    30 * 60 * 1000
}

/// A project that may record sessions.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ProjectConfig {
    /// Numeric identifier of the project.
    pub project_id: u64,
    /// Public key that clients send to identify the project.
    pub project_key: String,
    /// Percentage of new sessions that are recorded.
    #[serde(default)]
    pub sample_rate: SampleRate,
    /// Maximum lifetime of a session token in milliseconds.
    #[serde(default = "default_max_session_duration")]
    pub max_session_duration: u64,
    /// Batch size negotiated with clients of this project.
    ///
    /// Falls back to `limits.max_beacon_size`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beacon_size_limit: Option<ByteSize>,
    /// Inactive projects reject new sessions as if they did not exist.
    #[serde(default = "default_true")]
    pub active: bool,
}

/// A variant of a multivariate feature flag.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct FlagVariant {
    /// The value reported to the client.
    pub value: String,
    /// Share of users in percent that receive this variant.
    pub rollout_percentage: u8,
    /// Optional payload attached to the variant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

/// A feature flag evaluated for sessions of a project.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct FeatureFlagConfig {
    /// The project this flag belongs to.
    pub project_id: u64,
    /// Unique key of the flag within the project.
    pub key: String,
    /// Share of users in percent that see the flag enabled.
    #[serde(default)]
    pub rollout_percentage: u8,
    /// Persistent flags keep the value a user was assigned previously.
    #[serde(default)]
    pub is_persist: bool,
    /// Disabled flags are never reported.
    #[serde(default = "default_true")]
    pub active: bool,
    /// Payload sent along with a boolean flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    /// Variants of a multivariate flag. Empty for boolean flags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<FlagVariant>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_defaults() {
        let project: ProjectConfig = serde_yaml::from_str(
            r#"
project_id: 7
project_key: "shop"
"#,
        )
        .unwrap();

        assert_eq!(project.sample_rate, SampleRate::ALL);
        assert_eq!(project.max_session_duration, 1_800_000);
        assert_eq!(project.beacon_size_limit, None);
        assert!(project.active);
    }

    #[test]
    fn test_project_invalid_sample_rate() {
        let result = serde_yaml::from_str::<ProjectConfig>(
            r#"
project_id: 7
project_key: "shop"
sample_rate: 101
"#,
        );

        assert!(result.is_err());
    }

    #[test]
    fn test_multivariate_flag() {
        let flag: FeatureFlagConfig = serde_yaml::from_str(
            r#"
project_id: 7
key: "checkout"
rollout_percentage: 100
variants:
  - value: "control"
    rollout_percentage: 50
  - value: "test"
    rollout_percentage: 50
    payload: "{\"color\":\"red\"}"
"#,
        )
        .unwrap();

        assert!(!flag.is_persist);
        assert_eq!(flag.variants.len(), 2);
        assert_eq!(flag.variants[1].payload.as_deref(), Some("{\"color\":\"red\"}"));
    }
}
