//! Backend-generated decoy names for asset children (S3 objects, DynamoDB items).

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::watch;

use super::plan::{AssetType, Plan, PlanEditor};
use super::AwsInfraSession;
use crate::backend::{AwsInfraApi, AwsInfraEndpoint};
use crate::errors::{AppError, QUOTA_EXCEEDED_MESSAGE};

/// Generation quota as last reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AiQuota {
    pub total: u32,
    pub available: u32,
    /// Set once the quota-exceeded message has been surfaced.
    pub error_shown: bool,
    pub message: Option<String>,
}

impl AiQuota {
    fn record_remaining(&mut self, remaining: u32) {
        self.available = remaining;
        if remaining > self.total {
            self.total = remaining;
        }
    }

    fn record_exceeded(&mut self) {
        self.message = Some(QUOTA_EXCEEDED_MESSAGE.to_string());
        self.error_shown = true;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// Names merged into this many entries.
    Merged { updated: usize },
    QuotaExceeded,
    /// None of the requested types had entries that take generated names.
    NothingToGenerate,
}

#[derive(Debug, Deserialize)]
struct GeneratedAssets {
    #[serde(default)]
    assets: BTreeMap<AssetType, BTreeMap<String, Vec<String>>>,
    #[serde(default)]
    data_generation_remaining: Option<u32>,
}

type LoadingSet = watch::Sender<BTreeSet<AssetType>>;

/// Clears the loading flag of every type it covers when dropped.
struct LoadingGuard<'a> {
    loading: &'a LoadingSet,
    types: Vec<AssetType>,
}

impl<'a> LoadingGuard<'a> {
    fn start(loading: &'a LoadingSet, types: Vec<AssetType>) -> Self {
        loading.send_modify(|set| set.extend(types.iter().copied()));
        Self { loading, types }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let types = &self.types;
        self.loading.send_modify(|set| {
            for ty in types {
                set.remove(ty);
            }
        });
    }
}

#[derive(Debug)]
pub struct AiNamingHelper {
    quota: AiQuota,
    loading: LoadingSet,
}

impl Default for AiNamingHelper {
    fn default() -> Self {
        let (loading, _) = watch::channel(BTreeSet::new());
        Self {
            quota: AiQuota::default(),
            loading,
        }
    }
}

impl AiNamingHelper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quota(&self) -> &AiQuota {
        &self.quota
    }

    pub fn is_loading(&self, ty: AssetType) -> bool {
        self.loading.borrow().contains(&ty)
    }

    /// Asset types with a generation request in flight. Updates while
    /// [`generate`](Self::generate) runs.
    pub fn loading_watch(&self) -> watch::Receiver<BTreeSet<AssetType>> {
        self.loading.subscribe()
    }

    /// Primary names per requested type, skipping types without an
    /// AI-eligible field and types with no entries.
    pub fn build_request(plan: &Plan, types: &[AssetType]) -> BTreeMap<AssetType, Vec<String>> {
        types
            .iter()
            .copied()
            .filter(AssetType::supports_ai)
            .filter_map(|ty| {
                let names: Vec<String> = plan.assets(ty).iter().map(|a| a.name.clone()).collect();
                (!names.is_empty()).then_some((ty, names))
            })
            .collect()
    }

    /// Ask the backend for child names and merge them into `editor`.
    pub async fn generate<A: AwsInfraApi + ?Sized>(
        &mut self,
        api: &A,
        session: &AwsInfraSession,
        editor: &mut PlanEditor,
        types: &[AssetType],
    ) -> Result<GenerationOutcome, AppError> {
        let request = Self::build_request(editor.plan(), types);
        if request.is_empty() {
            return Ok(GenerationOutcome::NothingToGenerate);
        }

        let _loading = LoadingGuard::start(&self.loading, request.keys().copied().collect());

        let mut body = session.body();
        body.insert("assets".into(), json!(request));
        let reply = api
            .post(AwsInfraEndpoint::GenerateChildAssets, Value::Object(body))
            .await?;

        if reply.status == 429 {
            tracing::warn!(token = %session.canarytoken, "AI generation quota exceeded");
            self.quota.record_exceeded();
            return Ok(GenerationOutcome::QuotaExceeded);
        }
        if !reply.is_ok() {
            let message = crate::errors::body_message(&reply.data)
                .unwrap_or_else(|| "Failed to generate names. Please try again.".to_string());
            return Err(AppError::Backend { status: reply.status, message });
        }

        let generated: GeneratedAssets = serde_json::from_value(reply.into_ok()?)?;
        if let Some(remaining) = generated.data_generation_remaining {
            self.quota.record_remaining(remaining);
        }

        let updated = generated
            .assets
            .iter()
            .map(|(ty, names)| editor.merge_children(*ty, names))
            .sum();

        tracing::info!(
            token = %session.canarytoken,
            updated,
            remaining = self.quota.available,
            "merged generated asset names"
        );
        Ok(GenerationOutcome::Merged { updated })
    }
}
