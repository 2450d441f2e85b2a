//! Access to the external canarytokens backend.
//!
//! `client` holds the reqwest-based implementation; the [`AwsInfraApi`] trait
//! is the seam the AWS Infra workflow talks through.

pub mod client;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::AppError;

pub use client::BackendClient;

/// The awsinfra endpoints, relative to the configured route prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AwsInfraEndpoint {
    CheckRole,
    Inventory,
    GenerateChildAssets,
    Teardown,
    SavePlan,
    SetupIngestion,
    ConfigStart,
    ManagementResponse,
}

impl AwsInfraEndpoint {
    pub fn path(&self) -> &'static str {
        match self {
            AwsInfraEndpoint::CheckRole => "/awsinfra/check-role",
            AwsInfraEndpoint::Inventory => "/awsinfra/inventory-customer-account",
            AwsInfraEndpoint::GenerateChildAssets => "/awsinfra/generate-child-assets",
            AwsInfraEndpoint::Teardown => "/awsinfra/teardown",
            AwsInfraEndpoint::SavePlan => "/awsinfra/save-plan",
            AwsInfraEndpoint::SetupIngestion => "/awsinfra/setup-ingestion",
            AwsInfraEndpoint::ConfigStart => "/awsinfra/config-start",
            AwsInfraEndpoint::ManagementResponse => "/awsinfra/management-response",
        }
    }
}

/// Raw HTTP status and JSON body of a backend reply.
/// Non-JSON bodies are carried as a JSON string; empty bodies as `null`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiReply {
    pub status: u16,
    pub data: Value,
}

impl ApiReply {
    pub fn new(status: u16, data: Value) -> Self {
        Self { status, data }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    /// The body's `error` field, when present and not null.
    pub fn error(&self) -> Option<&Value> {
        self.data.get("error").filter(|v| !v.is_null())
    }

    /// Status 200 without an `error` field, or the corresponding backend error.
    pub fn into_ok(self) -> Result<Value, AppError> {
        if !self.is_ok() || self.error().is_some() {
            return Err(AppError::from_body(self.status, &self.data));
        }
        Ok(self.data)
    }
}

#[async_trait]
pub trait AwsInfraApi: Send + Sync {
    async fn post(&self, endpoint: AwsInfraEndpoint, body: Value) -> Result<ApiReply, AppError>;
}

#[async_trait]
impl<T: AwsInfraApi + ?Sized> AwsInfraApi for std::sync::Arc<T> {
    async fn post(&self, endpoint: AwsInfraEndpoint, body: Value) -> Result<ApiReply, AppError> {
        (**self).post(endpoint, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_into_ok_rejects_error_field_on_200() {
        let reply = ApiReply::new(200, json!({"error": "Invalid auth"}));
        match reply.into_ok() {
            Err(AppError::Backend { status, message }) => {
                assert_eq!(status, 200);
                assert_eq!(message, "Invalid auth");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_into_ok_ignores_null_error() {
        let reply = ApiReply::new(200, json!({"error": null, "handle": "h1"}));
        assert_eq!(reply.into_ok().unwrap()["handle"], "h1");
    }
}
