//! Polls a long-running backend job until it finishes, fails or times out.
//!
//! One loop per job handle. Each attempt is awaited before the next tick is
//! taken, so requests never overlap, and the loop returns exactly once.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{ApiReply, AwsInfraApi, AwsInfraEndpoint};
use crate::errors::AppError;

/// Consecutive `error` replies tolerated while waiting for a role check.
pub const ROLE_CHECK_ERROR_BUDGET: u32 = 5;

/// Backend operations that hand out a job handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    RoleCheck,
    Inventory,
    Teardown,
}

impl JobKind {
    pub fn endpoint(&self) -> AwsInfraEndpoint {
        match self {
            JobKind::RoleCheck => AwsInfraEndpoint::CheckRole,
            JobKind::Inventory => AwsInfraEndpoint::Inventory,
            JobKind::Teardown => AwsInfraEndpoint::Teardown,
        }
    }

    /// Field whose presence marks the job as finished.
    pub fn done_field(&self) -> &'static str {
        match self {
            JobKind::RoleCheck => "session_credentials_retrieved",
            JobKind::Inventory => "proposed_plan",
            JobKind::Teardown => "terraform_module_snippet",
        }
    }

    fn error_budget(&self) -> u32 {
        match self {
            JobKind::RoleCheck => ROLE_CHECK_ERROR_BUDGET,
            JobKind::Inventory | JobKind::Teardown => 0,
        }
    }
}

/// Opaque job id, bound to the operation that issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    kind: JobKind,
    id: String,
}

impl JobHandle {
    pub fn new(kind: JobKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }

    /// Read the `handle` out of the reply that accepted a job.
    pub fn from_reply(kind: JobKind, data: &Value) -> Result<Self, AppError> {
        match data.get("handle") {
            Some(Value::String(id)) if !id.is_empty() => Ok(Self::new(kind, id.clone())),
            _ => Err(AppError::InvalidResponse(format!(
                "{} reply has no job handle",
                kind.endpoint().path()
            ))),
        }
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Poll intervals and the per-operation deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    pub account_check_interval: Duration,
    pub teardown_interval: Duration,
    /// Measured from the first request of a job.
    pub timeout: Duration,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            account_check_interval: Duration::from_millis(2000),
            teardown_interval: Duration::from_millis(5000),
            timeout: Duration::from_secs(5 * 60),
        }
    }
}

impl PollTiming {
    pub fn interval_for(&self, kind: JobKind) -> Duration {
        match kind {
            JobKind::RoleCheck | JobKind::Inventory => self.account_check_interval,
            JobKind::Teardown => self.teardown_interval,
        }
    }
}

enum Progress {
    Pending,
    Tolerated(String),
    Done(Value),
    Failed(AppError),
}

pub struct Poller<'a, A: AwsInfraApi + ?Sized> {
    api: &'a A,
    timing: PollTiming,
}

impl<'a, A: AwsInfraApi + ?Sized> Poller<'a, A> {
    pub fn new(api: &'a A, timing: PollTiming) -> Self {
        Self { api, timing }
    }

    /// Poll `handle` until its done field shows up. Returns the final body.
    pub async fn run(
        &self,
        handle: &JobHandle,
        cancel: &CancellationToken,
    ) -> Result<Value, AppError> {
        let kind = handle.kind();
        let endpoint = kind.endpoint();
        let started = Instant::now();
        let mut ticker = time::interval(self.timing.interval_for(kind));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut attempt: u32 = 0;
        let mut tolerated: u32 = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(handle = handle.id(), ?kind, attempt, "poll cancelled");
                    return Err(AppError::Cancelled);
                }
                _ = ticker.tick() => {}
            }

            let elapsed = started.elapsed();
            if elapsed >= self.timing.timeout {
                warn!(handle = handle.id(), ?kind, attempt, "poll timed out");
                return Err(AppError::Timeout);
            }

            attempt += 1;
            let request = self.api.post(endpoint, json!({ "handle": handle.id() }));
            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(handle = handle.id(), ?kind, attempt, "poll cancelled mid-request");
                    return Err(AppError::Cancelled);
                }
                r = time::timeout(self.timing.timeout - elapsed, request) => match r {
                    Ok(reply) => reply?,
                    Err(_) => {
                        warn!(handle = handle.id(), ?kind, attempt, "poll request outlived the deadline");
                        return Err(AppError::Timeout);
                    }
                },
            };

            match classify(kind, reply, tolerated) {
                Progress::Pending => {
                    tolerated = 0;
                    debug!(handle = handle.id(), ?kind, attempt, "job still running");
                }
                Progress::Tolerated(message) => {
                    tolerated += 1;
                    warn!(
                        handle = handle.id(),
                        ?kind,
                        attempt,
                        tolerated,
                        budget = kind.error_budget(),
                        error = %message,
                        "job reported an error, polling again"
                    );
                }
                Progress::Done(data) => {
                    info!(handle = handle.id(), ?kind, attempt, "job finished");
                    return Ok(data);
                }
                Progress::Failed(err) => {
                    warn!(handle = handle.id(), ?kind, attempt, error = %err, "job failed");
                    return Err(err);
                }
            }
        }
    }
}

fn classify(kind: JobKind, reply: ApiReply, tolerated: u32) -> Progress {
    if !reply.is_ok() {
        return Progress::Failed(AppError::from_body(reply.status, &reply.data));
    }
    if reply.error().is_some() {
        let err = AppError::from_body(reply.status, &reply.data);
        if tolerated < kind.error_budget() {
            return Progress::Tolerated(err.to_string());
        }
        return Progress::Failed(err);
    }
    let done = reply
        .data
        .get(kind.done_field())
        .is_some_and(|v| !v.is_null());
    if done {
        Progress::Done(reply.data)
    } else {
        Progress::Pending
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays canned replies in order, then repeats `fallback`.
    pub(crate) struct ScriptedApi {
        replies: Mutex<VecDeque<ApiReply>>,
        fallback: ApiReply,
        pub(crate) calls: AtomicUsize,
        pub(crate) bodies: Mutex<Vec<(AwsInfraEndpoint, Value)>>,
    }

    impl ScriptedApi {
        pub(crate) fn new(replies: Vec<ApiReply>, fallback: ApiReply) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                fallback,
                calls: AtomicUsize::new(0),
                bodies: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AwsInfraApi for ScriptedApi {
        async fn post(&self, endpoint: AwsInfraEndpoint, body: Value) -> Result<ApiReply, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bodies.lock().unwrap().push((endpoint, body));
            let next = self.replies.lock().unwrap().pop_front();
            Ok(next.unwrap_or_else(|| self.fallback.clone()))
        }
    }

    fn pending() -> ApiReply {
        ApiReply::new(200, json!({}))
    }

    fn soft_error() -> ApiReply {
        ApiReply::new(200, json!({"error": "role not yet assumable"}))
    }

    fn role_done() -> ApiReply {
        ApiReply::new(200, json!({"session_credentials_retrieved": true}))
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_done_field() {
        let api = ScriptedApi::new(vec![pending(), pending(), role_done()], pending());
        let handle = JobHandle::new(JobKind::RoleCheck, "h-1");
        let out = Poller::new(&api, PollTiming::default())
            .run(&handle, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out["session_credentials_retrieved"], true);
        assert_eq!(api.calls(), 3);

        let bodies = api.bodies.lock().unwrap();
        assert_eq!(bodies[0], (AwsInfraEndpoint::CheckRole, json!({"handle": "h-1"})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_spacing() {
        let api = ScriptedApi::new(vec![pending(), pending()], ApiReply::new(200, json!({"terraform_module_snippet": "module {}"})));
        let handle = JobHandle::new(JobKind::Teardown, "h-td");
        let start = Instant::now();
        Poller::new(&api, PollTiming::default())
            .run(&handle, &CancellationToken::new())
            .await
            .unwrap();
        // Ticks at 0s, 5s, 10s.
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_200_fails_with_body_message() {
        let api = ScriptedApi::new(
            vec![pending(), ApiReply::new(400, json!({"message": "Unknown handle"}))],
            pending(),
        );
        let handle = JobHandle::new(JobKind::Inventory, "h-2");
        let err = Poller::new(&api, PollTiming::default())
            .run(&handle, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            AppError::Backend { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Unknown handle");
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inventory_error_is_immediately_fatal() {
        let api = ScriptedApi::new(vec![ApiReply::new(200, json!({"error": "boom"}))], pending());
        let handle = JobHandle::new(JobKind::Inventory, "h-3");
        let err = Poller::new(&api, PollTiming::default())
            .run(&handle, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(api.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_role_check_tolerates_five_errors() {
        let mut script = vec![soft_error(); 5];
        script.push(role_done());
        let api = ScriptedApi::new(script, pending());
        let handle = JobHandle::new(JobKind::RoleCheck, "h-4");
        let out = Poller::new(&api, PollTiming::default())
            .run(&handle, &CancellationToken::new())
            .await;
        assert!(out.is_ok());
        assert_eq!(api.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_role_check_sixth_consecutive_error_fails() {
        let api = ScriptedApi::new(vec![soft_error(); 6], role_done());
        let handle = JobHandle::new(JobKind::RoleCheck, "h-5");
        let err = Poller::new(&api, PollTiming::default())
            .run(&handle, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "role not yet assumable");
        assert_eq!(api.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_reply_resets_error_budget() {
        let mut script = vec![soft_error(); 5];
        script.push(pending());
        script.extend(vec![soft_error(); 5]);
        script.push(role_done());
        let api = ScriptedApi::new(script, pending());
        let handle = JobHandle::new(JobKind::RoleCheck, "h-6");
        let out = Poller::new(&api, PollTiming::default())
            .run(&handle, &CancellationToken::new())
            .await;
        assert!(out.is_ok());
        assert_eq!(api.calls(), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_five_minutes() {
        let api = ScriptedApi::new(vec![], pending());
        let handle = JobHandle::new(JobKind::Inventory, "h-7");
        let start = Instant::now();
        let err = Poller::new(&api, PollTiming::default())
            .run(&handle, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Timeout));
        assert_eq!(start.elapsed(), Duration::from_secs(300));
        // One request every 2s from t=0 up to t=298.
        assert_eq!(api.calls(), 150);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_loop() {
        let api = ScriptedApi::new(vec![], pending());
        let handle = JobHandle::new(JobKind::RoleCheck, "h-8");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });
        let err = Poller::new(&api, PollTiming::default())
            .run(&handle, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Cancelled));
        assert_eq!(api.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled_sends_nothing() {
        let api = ScriptedApi::new(vec![], role_done());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = Poller::new(&api, PollTiming::default())
            .run(&JobHandle::new(JobKind::RoleCheck, "h-9"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Cancelled));
        assert_eq!(api.calls(), 0);
    }

    #[test]
    fn test_handle_from_reply() {
        let h = JobHandle::from_reply(JobKind::Teardown, &json!({"handle": "abc"})).unwrap();
        assert_eq!(h.id(), "abc");
        assert_eq!(h.kind(), JobKind::Teardown);
        assert!(JobHandle::from_reply(JobKind::Teardown, &json!({})).is_err());
    }
}
