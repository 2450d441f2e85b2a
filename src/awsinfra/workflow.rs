//! Step controller for AWS Infra onboarding.
//!
//! Steps run in a fixed order: role check, inventory, save plan, ingestion
//! setup. Teardown can run at any time. Each step keeps its own status; a
//! failed step stays failed until the caller invokes it again.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::{json, Value};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::ai::{AiNamingHelper, AiQuota, GenerationOutcome};
use super::plan::{AssetType, Plan, PlanEditor};
use super::poller::{JobHandle, JobKind, PollTiming, Poller};
use super::AwsInfraSession;
use crate::backend::{AwsInfraApi, AwsInfraEndpoint};
use crate::errors::{remap_role_error, AppError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Step {
    CheckRole,
    Inventory,
    SavePlan,
    SetupIngestion,
    Teardown,
}

impl Step {
    /// The onboarding sequence. Teardown sits outside it.
    pub const ORDER: [Step; 4] = [
        Step::CheckRole,
        Step::Inventory,
        Step::SavePlan,
        Step::SetupIngestion,
    ];

    pub fn next(&self) -> Option<Step> {
        let pos = Self::ORDER.iter().position(|s| s == self)?;
        Self::ORDER.get(pos + 1).copied()
    }

    fn prerequisites(&self) -> &'static [Step] {
        match self {
            Step::CheckRole | Step::Teardown => &[],
            Step::Inventory => &[Step::CheckRole],
            Step::SavePlan => &[Step::CheckRole, Step::Inventory],
            Step::SetupIngestion => &[Step::CheckRole, Step::Inventory, Step::SavePlan],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StepStatus {
    #[default]
    Idle,
    Loading,
    Error(String),
    Success,
}

/// Status of one step plus the attempt that currently owns it.
#[derive(Debug, Default)]
pub struct StepSlot {
    status: StepStatus,
    attempt: u64,
}

impl StepSlot {
    pub fn status(&self) -> &StepStatus {
        &self.status
    }

    /// Start a new attempt. Any earlier attempt can no longer settle.
    pub fn begin(&mut self) -> u64 {
        self.attempt += 1;
        self.status = StepStatus::Loading;
        self.attempt
    }

    /// Record the outcome of `attempt`. Returns false, leaving the status
    /// untouched, if the attempt was superseded or has already settled.
    pub fn settle(&mut self, attempt: u64, outcome: Result<(), String>) -> bool {
        if attempt != self.attempt || self.status != StepStatus::Loading {
            return false;
        }
        self.status = match outcome {
            Ok(()) => StepStatus::Success,
            Err(message) => StepStatus::Error(message),
        };
        true
    }
}

type Slots = Mutex<BTreeMap<Step, StepSlot>>;

fn lock_slots(steps: &Slots) -> MutexGuard<'_, BTreeMap<Step, StepSlot>> {
    steps.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One attempt of a step. If the step future is dropped before the attempt
/// settles, the slot is settled as cancelled instead of staying `Loading`.
struct StepAttempt<'a> {
    steps: &'a Slots,
    step: Step,
    attempt: u64,
    settled: bool,
}

impl<'a> StepAttempt<'a> {
    fn start(steps: &'a Slots, step: Step) -> Self {
        let attempt = lock_slots(steps).entry(step).or_default().begin();
        Self {
            steps,
            step,
            attempt,
            settled: false,
        }
    }

    /// Returns false if this attempt was superseded.
    fn settle<T>(mut self, result: &Result<T, AppError>) -> bool {
        self.settled = true;
        let outcome = match result {
            Ok(_) => Ok(()),
            Err(e) => Err(e.user_message()),
        };
        lock_slots(self.steps)
            .entry(self.step)
            .or_default()
            .settle(self.attempt, outcome)
    }
}

impl Drop for StepAttempt<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let cancelled = lock_slots(self.steps)
            .entry(self.step)
            .or_default()
            .settle(self.attempt, Err(AppError::Cancelled.to_string()));
        if cancelled {
            warn!(step = ?self.step, attempt = self.attempt, "step dropped before it finished");
        }
    }
}

pub struct Workflow<A: AwsInfraApi> {
    api: A,
    session: AwsInfraSession,
    external_id: watch::Receiver<Option<String>>,
    timing: PollTiming,
    cancel: CancellationToken,
    steps: Slots,
    current: Step,
    editor: PlanEditor,
    ai: AiNamingHelper,
}

impl<A: AwsInfraApi> Workflow<A> {
    /// `external_id` may be updated while a role check is in flight; the
    /// latest value is read when the request goes out.
    pub fn new(
        api: A,
        session: AwsInfraSession,
        external_id: watch::Receiver<Option<String>>,
    ) -> Self {
        Self {
            api,
            session,
            external_id,
            timing: PollTiming::default(),
            cancel: CancellationToken::new(),
            steps: Mutex::new(BTreeMap::new()),
            current: Step::CheckRole,
            editor: PlanEditor::new(),
            ai: AiNamingHelper::new(),
        }
    }

    /// Workflow whose external id never changes.
    pub fn with_fixed_external_id(
        api: A,
        session: AwsInfraSession,
        external_id: Option<String>,
    ) -> Self {
        let (_tx, rx) = watch::channel(external_id);
        Self::new(api, session, rx)
    }

    pub fn with_timing(mut self, timing: PollTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn session(&self) -> &AwsInfraSession {
        &self.session
    }

    pub fn current_step(&self) -> Step {
        self.current
    }

    pub fn status(&self, step: Step) -> StepStatus {
        lock_slots(&self.steps)
            .get(&step)
            .map(|s| s.status().clone())
            .unwrap_or_default()
    }

    pub fn plan(&self) -> &Plan {
        self.editor.plan()
    }

    pub fn editor_mut(&mut self) -> &mut PlanEditor {
        &mut self.editor
    }

    pub fn ai_quota(&self) -> &AiQuota {
        self.ai.quota()
    }

    /// Asset types whose names are being generated right now. Subscribe
    /// before calling [`generate_names`](Self::generate_names).
    pub fn generating(&self) -> watch::Receiver<BTreeSet<AssetType>> {
        self.ai.loading_watch()
    }

    /// Token that aborts in-flight polls when cancelled.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop any in-flight poll. The interrupted step ends in `Error`.
    pub fn abandon(&self) {
        self.cancel.cancel();
    }

    /// Ask the backend to assume the inventory role and wait until it has.
    pub async fn check_role(&mut self) -> Result<(), AppError> {
        self.prepare(Step::CheckRole)?;
        let attempt = StepAttempt::start(&self.steps, Step::CheckRole);
        let result = self.run_check_role().await;
        let settled = attempt.settle(&result);
        self.finish(Step::CheckRole, settled, result)
    }

    /// Inventory the account and load the proposed plan into the editor.
    pub async fn inventory(&mut self) -> Result<&Plan, AppError> {
        self.prepare(Step::Inventory)?;
        let attempt = StepAttempt::start(&self.steps, Step::Inventory);
        let result = self.run_inventory().await;
        let settled = attempt.settle(&result);
        let plan = self.finish(Step::Inventory, settled, result)?;
        self.editor.set_assets(plan);
        Ok(self.editor.plan())
    }

    /// Fill in generated child names for the given asset types.
    pub async fn generate_names(
        &mut self,
        types: &[AssetType],
    ) -> Result<GenerationOutcome, AppError> {
        self.ai
            .generate(&self.api, &self.session, &mut self.editor, types)
            .await
    }

    /// Persist the edited plan.
    pub async fn save_plan(&mut self) -> Result<Value, AppError> {
        self.prepare(Step::SavePlan)?;
        let attempt = StepAttempt::start(&self.steps, Step::SavePlan);
        let mut body = self.session.body();
        body.insert("plan".into(), self.editor.plan().to_wire());
        let result = self.single_shot(AwsInfraEndpoint::SavePlan, body.into()).await;
        let settled = attempt.settle(&result);
        self.finish(Step::SavePlan, settled, result)
    }

    pub async fn setup_ingestion(&mut self) -> Result<Value, AppError> {
        self.prepare(Step::SetupIngestion)?;
        let attempt = StepAttempt::start(&self.steps, Step::SetupIngestion);
        let body = self.session.body();
        let result = self.single_shot(AwsInfraEndpoint::SetupIngestion, body.into()).await;
        let settled = attempt.settle(&result);
        self.finish(Step::SetupIngestion, settled, result)
    }

    /// Fetch the role-setup instructions shown before the role check.
    pub async fn config_start(&self) -> Result<Value, AppError> {
        self.single_shot(AwsInfraEndpoint::ConfigStart, self.session.body().into())
            .await
    }

    /// Send the user's answer on how the decoys will be managed. Object
    /// fields of `response` are merged into the request body.
    pub async fn management_response(&self, response: Value) -> Result<Value, AppError> {
        let mut body = self.session.body();
        match response {
            Value::Object(fields) => body.extend(fields),
            other => {
                body.insert("response".into(), other);
            }
        }
        self.single_shot(AwsInfraEndpoint::ManagementResponse, body.into())
            .await
    }

    /// Tear the token down. Returns the Terraform snippet for removing the decoys.
    pub async fn teardown(&mut self) -> Result<String, AppError> {
        self.prepare(Step::Teardown)?;
        let attempt = StepAttempt::start(&self.steps, Step::Teardown);
        let result = self.run_job(JobKind::Teardown, self.session.body().into()).await;
        let settled = attempt.settle(&result);
        let data = self.finish(Step::Teardown, settled, result)?;
        Ok(match data.get(JobKind::Teardown.done_field()) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        })
    }

    async fn run_check_role(&self) -> Result<(), AppError> {
        let external_id = self.external_id.borrow().clone();
        let mut body = self.session.body();
        body.insert("external_id".into(), json!(external_id));
        self.run_job(JobKind::RoleCheck, body.into())
            .await
            .map(|_| ())
            .map_err(|e| match e {
                AppError::Backend { status, message } => AppError::Backend {
                    status,
                    message: remap_role_error(&message),
                },
                other => other,
            })
    }

    async fn run_inventory(&self) -> Result<Plan, AppError> {
        let data = self
            .run_job(JobKind::Inventory, self.session.body().into())
            .await?;
        let proposed = data
            .get(JobKind::Inventory.done_field())
            .cloned()
            .unwrap_or(Value::Null);
        Plan::from_wire(proposed)
    }

    /// Start a job and poll it to completion. A start reply that already
    /// carries the done field is returned as is.
    async fn run_job(&self, kind: JobKind, body: Value) -> Result<Value, AppError> {
        let data = self.api.post(kind.endpoint(), body).await?.into_ok()?;
        if data.get(kind.done_field()).is_some_and(|v| !v.is_null()) {
            return Ok(data);
        }
        let handle = JobHandle::from_reply(kind, &data)?;
        info!(token = %self.session.canarytoken, handle = handle.id(), ?kind, "job accepted");
        Poller::new(&self.api, self.timing)
            .run(&handle, &self.cancel)
            .await
    }

    async fn single_shot(&self, endpoint: AwsInfraEndpoint, body: Value) -> Result<Value, AppError> {
        self.api.post(endpoint, body).await?.into_ok()
    }

    /// Check prerequisites and arm a fresh cancellation token if the last one fired.
    fn prepare(&mut self, step: Step) -> Result<(), AppError> {
        if let Some(missing) = step
            .prerequisites()
            .iter()
            .find(|s| self.status(**s) != StepStatus::Success)
        {
            return Err(AppError::Validation(format!(
                "{:?} must succeed before {:?}",
                missing, step
            )));
        }
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        Ok(())
    }

    fn finish<T>(
        &mut self,
        step: Step,
        settled: bool,
        result: Result<T, AppError>,
    ) -> Result<T, AppError> {
        if !settled {
            warn!(?step, "ignoring outcome of a superseded attempt");
            return result;
        }

        match &result {
            Ok(_) => {
                info!(token = %self.session.canarytoken, ?step, "step succeeded");
                if let Some(next) = step.next() {
                    self.current = self.current.max(next);
                }
            }
            Err(e) => {
                warn!(token = %self.session.canarytoken, ?step, error = %e, "step failed");
            }
        }
        result
    }
}
