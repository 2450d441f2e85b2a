//! AWS Infra token onboarding: role check, account inventory, plan editing,
//! generated asset names, ingestion setup and teardown.

pub mod ai;
pub mod plan;
pub mod poller;
pub mod workflow;

use serde_json::{Map, Value};

pub use ai::{AiNamingHelper, AiQuota, GenerationOutcome};
pub use plan::{Asset, AssetType, Plan, PlanEditor, Position};
pub use poller::{JobHandle, JobKind, PollTiming, Poller};
pub use workflow::{Step, StepStatus, Workflow};

/// Credentials scoping every awsinfra call for one token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsInfraSession {
    pub canarytoken: String,
    pub auth_token: String,
}

impl AwsInfraSession {
    pub fn new(canarytoken: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            canarytoken: canarytoken.into(),
            auth_token: auth_token.into(),
        }
    }

    /// `{canarytoken, auth_token}`, ready for endpoint-specific fields.
    pub fn body(&self) -> Map<String, Value> {
        let mut body = Map::new();
        body.insert("canarytoken".into(), Value::String(self.canarytoken.clone()));
        body.insert("auth_token".into(), Value::String(self.auth_token.clone()));
        body
    }
}
