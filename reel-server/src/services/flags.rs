//! Feature flag evaluation.

use std::error::Error;
use std::fmt;

use async_trait::async_trait;
use reel_config::{Config, FeatureFlagConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// A flag value the client was assigned in an earlier session.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct PersistedFlag {
    pub key: String,
    pub value: Value,
}

/// Body of a feature flags request.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlagsRequest {
    #[serde(rename = "projectID")]
    pub project_id: u64,
    #[serde(rename = "userID", default)]
    pub user_id: String,
    #[serde(default)]
    pub persist_flags: Vec<PersistedFlag>,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub os_version: Option<String>,
    #[serde(default)]
    pub browser: Option<String>,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub referrer: Option<String>,
}

/// A flag assignment returned to the client.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FlagValue {
    pub key: String,
    pub is_persist: bool,
    /// `true` for boolean flags, the variant name for multivariate flags.
    pub value: Value,
    pub payload: Option<String>,
}

/// Flags could not be computed.
#[derive(Debug, thiserror::Error)]
#[error("failed to compute feature flags")]
pub struct FlagError(#[source] pub Box<dyn Error + Send + Sync>);

/// Computes the flags active for a session.
#[async_trait]
pub trait FlagEvaluator: Send + Sync + fmt::Debug {
    async fn compute_flags_for_session(
        &self,
        request: &FeatureFlagsRequest,
    ) -> Result<Vec<FlagValue>, FlagError>;
}

/// Returns the stable rollout bucket in `[0, 100)` of a user for a flag.
fn bucket(key: &str, user_id: &str) -> u8 {
    let digest = Sha256::new()
        .chain_update(key.as_bytes())
        .chain_update(b":")
        .chain_update(user_id.as_bytes())
        .finalize();

    let mut prefix = [0; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % 100) as u8
}

/// Evaluates the flags from the `feature_flags` config section.
#[derive(Debug, Default)]
pub struct StaticFlags {
    flags: Vec<FeatureFlagConfig>,
}

impl StaticFlags {
    pub fn new(flags: Vec<FeatureFlagConfig>) -> Self {
        Self { flags }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.feature_flags().to_vec())
    }

    fn evaluate(flag: &FeatureFlagConfig, user_id: &str) -> Option<FlagValue> {
        let bucket = bucket(&flag.key, user_id);
        if bucket >= flag.rollout_percentage {
            return None;
        }

        let (value, payload) = if flag.variants.is_empty() {
            (Value::Bool(true), flag.payload.clone())
        } else {
            let mut threshold = 0u32;
            let variant = flag.variants.iter().find(|variant| {
                threshold += u32::from(variant.rollout_percentage);
                u32::from(bucket) < threshold
            })?;
            (Value::String(variant.value.clone()), variant.payload.clone())
        };

        Some(FlagValue {
            key: flag.key.clone(),
            is_persist: flag.is_persist,
            value,
            payload,
        })
    }
}

#[async_trait]
impl FlagEvaluator for StaticFlags {
    async fn compute_flags_for_session(
        &self,
        request: &FeatureFlagsRequest,
    ) -> Result<Vec<FlagValue>, FlagError> {
        let flags = self
            .flags
            .iter()
            .filter(|flag| flag.active && flag.project_id == request.project_id)
            .filter_map(|flag| {
                let persisted = request
                    .persist_flags
                    .iter()
                    .find(|persisted| flag.is_persist && persisted.key == flag.key);

                match persisted {
                    Some(persisted) => Some(FlagValue {
                        key: flag.key.clone(),
                        is_persist: true,
                        value: persisted.value.clone(),
                        payload: None,
                    }),
                    None => Self::evaluate(flag, &request.user_id),
                }
            })
            .collect();

        Ok(flags)
    }
}

#[cfg(test)]
mod tests {
    use reel_config::FlagVariant;

    use super::*;

    fn flag(key: &str, rollout_percentage: u8) -> FeatureFlagConfig {
        FeatureFlagConfig {
            project_id: 1,
            key: key.to_owned(),
            rollout_percentage,
            is_persist: false,
            active: true,
            payload: None,
            variants: Vec::new(),
        }
    }

    fn request(user_id: &str) -> FeatureFlagsRequest {
        FeatureFlagsRequest {
            project_id: 1,
            user_id: user_id.to_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn test_bucket_is_stable() {
        assert_eq!(bucket("checkout", "alice"), bucket("checkout", "alice"));
        assert!(bucket("checkout", "alice") < 100);
    }

    #[tokio::test]
    async fn test_rollout_bounds() {
        let flags = StaticFlags::new(vec![flag("everyone", 100), flag("nobody", 0)]);

        let computed = flags
            .compute_flags_for_session(&request("alice"))
            .await
            .unwrap();

        assert_eq!(computed.len(), 1);
        assert_eq!(computed[0].key, "everyone");
        assert_eq!(computed[0].value, Value::Bool(true));
    }

    #[tokio::test]
    async fn test_other_project_and_inactive() {
        let mut inactive = flag("inactive", 100);
        inactive.active = false;
        let mut foreign = flag("foreign", 100);
        foreign.project_id = 2;

        let flags = StaticFlags::new(vec![inactive, foreign]);
        let computed = flags
            .compute_flags_for_session(&request("alice"))
            .await
            .unwrap();

        assert!(computed.is_empty());
    }

    #[tokio::test]
    async fn test_multivariate_covers_all_users() {
        let mut multi = flag("theme", 100);
        multi.variants = vec![
            FlagVariant {
                value: "dark".to_owned(),
                rollout_percentage: 50,
                payload: None,
            },
            FlagVariant {
                value: "light".to_owned(),
                rollout_percentage: 50,
                payload: Some("{}".to_owned()),
            },
        ];
        let flags = StaticFlags::new(vec![multi]);

        for user in ["alice", "bob", "carol", "dave"] {
            let computed = flags.compute_flags_for_session(&request(user)).await.unwrap();
            assert_eq!(computed.len(), 1);
            let expected = if bucket("theme", user) < 50 { "dark" } else { "light" };
            assert_eq!(computed[0].value, Value::String(expected.to_owned()));
        }
    }

    #[tokio::test]
    async fn test_persisted_value_wins() {
        let mut persistent = flag("beta", 0);
        persistent.is_persist = true;
        let flags = StaticFlags::new(vec![persistent]);

        let mut request = request("alice");
        request.persist_flags = vec![PersistedFlag {
            key: "beta".to_owned(),
            value: Value::Bool(true),
        }];

        let computed = flags.compute_flags_for_session(&request).await.unwrap();
        assert_eq!(
            computed,
            vec![FlagValue {
                key: "beta".to_owned(),
                is_persist: true,
                value: Value::Bool(true),
                payload: None,
            }]
        );
    }
}
