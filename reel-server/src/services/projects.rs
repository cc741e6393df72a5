//! The project directory.

use std::error::Error;
use std::fmt;

use async_trait::async_trait;
use hashbrown::HashMap;
use reel_config::{Config, ProjectConfig};
use reel_sampling::SampleRate;

/// Settings of a project that records sessions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProjectProfile {
    /// Numeric identifier of the project.
    pub project_id: u64,
    /// Public key sent by clients of the project.
    pub project_key: String,
    /// Share of new sessions that are recorded.
    pub sample_rate: SampleRate,
    /// Lifetime of a session token in milliseconds.
    pub max_session_duration: u64,
    /// Batch size negotiated with clients.
    pub beacon_size_limit: usize,
    /// Inactive projects do not accept new sessions.
    pub active: bool,
}

impl ProjectProfile {
    fn from_config(project: &ProjectConfig, default_beacon_size: usize) -> Self {
        Self {
            project_id: project.project_id,
            project_key: project.project_key.clone(),
            sample_rate: project.sample_rate,
            max_session_duration: project.max_session_duration,
            beacon_size_limit: project
                .beacon_size_limit
                .map_or(default_beacon_size, |size| size.as_bytes() as usize),
            active: project.active,
        }
    }
}

/// Errors of a [`ProjectDirectory`] lookup.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    /// There is no project with this key.
    #[error("project does not exist")]
    NotFound,
    /// The directory could not be queried.
    #[error("failed to look up project")]
    Unavailable(#[source] Box<dyn Error + Send + Sync>),
}

/// Looks up projects by their public key.
#[async_trait]
pub trait ProjectDirectory: Send + Sync + fmt::Debug {
    /// Returns the project with the given key.
    async fn get_project_by_key(&self, key: &str) -> Result<ProjectProfile, ProjectError>;
}

/// A project directory read from the `projects` config section.
#[derive(Debug, Default)]
pub struct StaticProjects {
    projects: HashMap<String, ProjectProfile>,
}

impl StaticProjects {
    /// Creates a directory from the given profiles.
    pub fn new(projects: impl IntoIterator<Item = ProjectProfile>) -> Self {
        let projects = projects
            .into_iter()
            .map(|project| (project.project_key.clone(), project))
            .collect();

        Self { projects }
    }

    /// Creates a directory from the configured projects.
    pub fn from_config(config: &Config) -> Self {
        let default_beacon_size = config.max_beacon_size();
        Self::new(
            config
                .projects()
                .iter()
                .map(|project| ProjectProfile::from_config(project, default_beacon_size)),
        )
    }
}

#[async_trait]
impl ProjectDirectory for StaticProjects {
    async fn get_project_by_key(&self, key: &str) -> Result<ProjectProfile, ProjectError> {
        self.projects.get(key).cloned().ok_or(ProjectError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_projects() {
        let config = Config::from_json_value(serde_json::json!({
            "limits": {"max_beacon_size": "512KiB"},
            "projects": [
                {"project_id": 1, "project_key": "one", "beacon_size_limit": 1000},
                {"project_id": 2, "project_key": "two", "sample_rate": 0, "active": false}
            ]
        }))
        .unwrap();

        let projects = StaticProjects::from_config(&config);

        let one = projects.get_project_by_key("one").await.unwrap();
        assert_eq!(one.project_id, 1);
        assert_eq!(one.beacon_size_limit, 1000);
        assert_eq!(one.sample_rate, SampleRate::ALL);

        let two = projects.get_project_by_key("two").await.unwrap();
        assert_eq!(two.beacon_size_limit, 524_288);
        assert!(!two.active);

        assert!(matches!(
            projects.get_project_by_key("three").await,
            Err(ProjectError::NotFound)
        ));
    }
}
