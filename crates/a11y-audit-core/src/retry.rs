//! Bounded retry around single completion calls.
//!
//! [`RetryMachine`] holds the policy decisions and never sleeps or talks to the
//! network. [`RetryController`] drives it: gate admission, one call, backoff.

use std::{path::Path, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::{
    gate::RateGate,
    llm::{CallFailure, CallOutcome, CompletionClient},
    scanner::ScanTask,
    wait::{pause, Wait},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per file, first call included.
    pub max_attempts: u32,
    /// Multiplied by the attempt number after a rate-limited call.
    #[serde(with = "crate::durations")]
    pub rate_limit_backoff: Duration,
    /// Multiplied by the attempt number after a timeout or transient failure.
    #[serde(with = "crate::durations")]
    pub transient_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            rate_limit_backoff: Duration::from_secs(10),
            transient_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Wait before the attempt following `attempt`; `None` for failures that are never retried.
    pub fn backoff_for(&self, failure: &CallFailure, attempt: u32) -> Option<Duration> {
        let base = match failure {
            CallFailure::RateLimited(_) => self.rate_limit_backoff,
            CallFailure::Timeout(_) | CallFailure::Transient(_) => self.transient_backoff,
            CallFailure::AuthFailure(_) | CallFailure::Cancelled => return None,
        };
        Some(base.saturating_mul(attempt.max(1)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Idle,
    Attempting { attempt: u32 },
    Succeeded,
    Exhausted,
    AuthFailed,
    Cancelled,
}

impl RetryState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Idle | Self::Attempting { .. })
    }
}

/// Final result of a retried call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    Succeeded { text: String, attempts: u32 },
    /// Every attempt failed with a retryable error. The file yields no findings.
    Exhausted { attempts: u32, last_failure: CallFailure },
    AuthFailure(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Retry { after: Duration, next_attempt: u32 },
    Finished(RetryOutcome),
}

/// Pure retry state machine: `Idle -> Attempting -> {Succeeded | Exhausted | AuthFailed | Cancelled}`.
#[derive(Debug, Clone)]
pub struct RetryMachine {
    policy: RetryPolicy,
    state: RetryState,
    settled: Option<RetryOutcome>,
}

impl RetryMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy: policy.with_max_attempts(policy.max_attempts),
            state: RetryState::Idle,
            settled: None,
        }
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    /// Enter the first attempt and return its number.
    pub fn start(&mut self) -> u32 {
        if self.state == RetryState::Idle {
            self.state = RetryState::Attempting { attempt: 1 };
        }
        match self.state {
            RetryState::Attempting { attempt } => attempt,
            _ => 0,
        }
    }

    /// Feed the result of the current attempt.
    pub fn on_result(&mut self, outcome: CallOutcome) -> Transition {
        let attempt = match self.state {
            RetryState::Attempting { attempt } => attempt,
            RetryState::Idle => self.start(),
            _ => return Transition::Finished(self.settled_outcome()),
        };

        match outcome {
            Ok(text) => self.settle(
                RetryState::Succeeded,
                RetryOutcome::Succeeded {
                    text,
                    attempts: attempt,
                },
            ),
            Err(CallFailure::AuthFailure(message)) => {
                self.settle(RetryState::AuthFailed, RetryOutcome::AuthFailure(message))
            }
            Err(CallFailure::Cancelled) => self.cancel_transition(),
            Err(failure) => match self.policy.backoff_for(&failure, attempt) {
                Some(after) if attempt < self.policy.max_attempts => {
                    let next_attempt = attempt + 1;
                    self.state = RetryState::Attempting {
                        attempt: next_attempt,
                    };
                    Transition::Retry {
                        after,
                        next_attempt,
                    }
                }
                _ => self.settle(
                    RetryState::Exhausted,
                    RetryOutcome::Exhausted {
                        attempts: attempt,
                        last_failure: failure,
                    },
                ),
            },
        }
    }

    /// Abandon the run from any non-terminal state.
    pub fn cancel(&mut self) -> RetryOutcome {
        match self.cancel_transition() {
            Transition::Finished(outcome) => outcome,
            Transition::Retry { .. } => RetryOutcome::Cancelled,
        }
    }

    fn cancel_transition(&mut self) -> Transition {
        if self.state.is_terminal() {
            return Transition::Finished(self.settled_outcome());
        }
        self.settle(RetryState::Cancelled, RetryOutcome::Cancelled)
    }

    fn settle(&mut self, state: RetryState, outcome: RetryOutcome) -> Transition {
        self.state = state;
        self.settled = Some(outcome.clone());
        Transition::Finished(outcome)
    }

    fn settled_outcome(&self) -> RetryOutcome {
        self.settled.clone().unwrap_or(RetryOutcome::Cancelled)
    }
}

/// One outbound call, alive between gate admission and the classified result.
#[derive(Debug, Clone, Copy)]
pub struct CallAttempt<'a> {
    pub task_ref: &'a Path,
    pub attempt_number: u32,
    pub started_at: Instant,
}

/// Runs a prompt through the rate gate and client until the retry machine settles.
pub struct RetryController {
    client: Arc<dyn CompletionClient>,
    gate: Arc<RateGate>,
    policy: RetryPolicy,
    call_timeout: Duration,
}

impl RetryController {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        gate: Arc<RateGate>,
        policy: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            client,
            gate,
            policy,
            call_timeout,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Each attempt holds its own gate permit; the permit is returned before any backoff.
    #[instrument(
        skip(self, task, prompt, api_key, cancel),
        fields(file = %task.file_path.display())
    )]
    pub async fn call(
        &self,
        task: &ScanTask,
        prompt: &str,
        api_key: &str,
        cancel: &CancellationToken,
    ) -> RetryOutcome {
        let mut machine = RetryMachine::new(self.policy);
        let mut attempt_number = machine.start();

        loop {
            let outcome = match self.gate.acquire(cancel).await {
                Err(_) => Err(CallFailure::Cancelled),
                Ok(permit) => {
                    let attempt = CallAttempt {
                        task_ref: &task.file_path,
                        attempt_number,
                        started_at: permit.started_at(),
                    };
                    debug!(attempt = attempt.attempt_number, "call admitted");
                    let outcome = self
                        .client
                        .send(prompt, api_key, self.call_timeout, cancel)
                        .await;
                    drop(permit);
                    debug!(
                        attempt = attempt.attempt_number,
                        elapsed_ms = attempt.started_at.elapsed().as_millis() as u64,
                        ok = outcome.is_ok(),
                        "call settled"
                    );
                    outcome
                }
            };

            match machine.on_result(outcome) {
                Transition::Retry {
                    after,
                    next_attempt,
                } => {
                    warn!(
                        attempt = attempt_number,
                        backoff = %humantime::format_duration(after),
                        "call failed; retrying"
                    );
                    if pause(after, cancel).await == Wait::Cancelled {
                        return machine.cancel();
                    }
                    attempt_number = next_attempt;
                }
                Transition::Finished(outcome) => {
                    if let RetryOutcome::Exhausted {
                        attempts,
                        last_failure,
                    } = &outcome
                    {
                        warn!(
                            attempts,
                            error = %last_failure,
                            "retries exhausted; file yields no findings"
                        );
                    }
                    return outcome;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::GateConfig;
    use async_trait::async_trait;
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    fn transient() -> CallFailure {
        CallFailure::Transient("HTTP 503".into())
    }

    #[test]
    fn machine_succeeds_on_first_attempt() {
        let mut machine = RetryMachine::new(RetryPolicy::default());
        assert_eq!(machine.start(), 1);
        assert_eq!(
            machine.on_result(Ok("[]".into())),
            Transition::Finished(RetryOutcome::Succeeded {
                text: "[]".into(),
                attempts: 1
            })
        );
        assert_eq!(machine.state(), RetryState::Succeeded);
    }

    #[test]
    fn machine_backoff_escalates_with_attempt_number() {
        let mut machine = RetryMachine::new(RetryPolicy::default());
        machine.start();
        assert_eq!(
            machine.on_result(Err(CallFailure::RateLimited("slow".into()))),
            Transition::Retry {
                after: Duration::from_secs(10),
                next_attempt: 2
            }
        );
        assert_eq!(
            machine.on_result(Err(CallFailure::Timeout(Duration::from_secs(45)))),
            Transition::Retry {
                after: Duration::from_secs(10),
                next_attempt: 3
            }
        );
        assert_eq!(
            machine.on_result(Err(transient())),
            Transition::Finished(RetryOutcome::Exhausted {
                attempts: 3,
                last_failure: transient()
            })
        );
        assert_eq!(machine.state(), RetryState::Exhausted);
    }

    #[test]
    fn machine_stops_on_auth_failure() {
        let mut machine = RetryMachine::new(RetryPolicy::default());
        machine.start();
        assert_eq!(
            machine.on_result(Err(CallFailure::AuthFailure("bad key".into()))),
            Transition::Finished(RetryOutcome::AuthFailure("bad key".into()))
        );
        assert_eq!(machine.state(), RetryState::AuthFailed);
        // further results cannot reopen a settled machine
        assert_eq!(
            machine.on_result(Ok("[]".into())),
            Transition::Finished(RetryOutcome::AuthFailure("bad key".into()))
        );
    }

    #[test]
    fn machine_cancel_is_terminal() {
        let mut machine = RetryMachine::new(RetryPolicy::default());
        machine.start();
        machine.on_result(Err(transient()));
        assert_eq!(machine.cancel(), RetryOutcome::Cancelled);
        assert_eq!(machine.state(), RetryState::Cancelled);
        assert_eq!(
            machine.on_result(Err(transient())),
            Transition::Finished(RetryOutcome::Cancelled)
        );
    }

    #[test]
    fn single_attempt_policy_never_retries() {
        let mut machine = RetryMachine::new(RetryPolicy::default().with_max_attempts(1));
        machine.start();
        assert!(matches!(
            machine.on_result(Err(transient())),
            Transition::Finished(RetryOutcome::Exhausted { attempts: 1, .. })
        ));
    }

    #[test]
    fn policy_durations_deserialize_from_text() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"max_attempts": 5, "rate_limit_backoff": "30s"}"#).unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.rate_limit_backoff, Duration::from_secs(30));
        assert_eq!(policy.transient_backoff, Duration::from_secs(5));
    }

    struct ScriptedClient {
        script: Mutex<VecDeque<CallOutcome>>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(script: Vec<CallOutcome>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn send(
            &self,
            _prompt: &str,
            _api_key: &str,
            _timeout: Duration,
            _cancel: &CancellationToken,
        ) -> CallOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(transient()))
        }
    }

    fn controller(client: Arc<ScriptedClient>) -> (RetryController, Arc<RateGate>) {
        let gate = Arc::new(RateGate::new(GateConfig {
            concurrency_cap: 3,
            min_interval: Duration::ZERO,
        }));
        let controller = RetryController::new(
            client,
            Arc::clone(&gate),
            RetryPolicy::default(),
            Duration::from_secs(45),
        );
        (controller, gate)
    }

    fn task() -> ScanTask {
        ScanTask::new("Assets/Scripts/Menu.cs", "class Menu {}", Vec::new())
    }

    #[tokio::test(start_paused = true)]
    async fn failing_service_is_called_at_most_max_attempts() {
        let client = ScriptedClient::new(vec![]);
        let (controller, gate) = controller(Arc::clone(&client));
        let started = Instant::now();
        let outcome = controller
            .call(&task(), "prompt", "key", &CancellationToken::new())
            .await;
        assert!(matches!(outcome, RetryOutcome::Exhausted { attempts: 3, .. }));
        assert_eq!(client.calls(), 3);
        assert!(started.elapsed() >= Duration::from_secs(5 + 10));
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_stops_after_one_call() {
        let client = ScriptedClient::new(vec![Err(CallFailure::AuthFailure(
            "Incorrect API key provided".into(),
        ))]);
        let (controller, gate) = controller(Arc::clone(&client));
        let outcome = controller
            .call(&task(), "prompt", "key", &CancellationToken::new())
            .await;
        assert_eq!(
            outcome,
            RetryOutcome::AuthFailure("Incorrect API key provided".into())
        );
        assert_eq!(client.calls(), 1);
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_then_success() {
        let client = ScriptedClient::new(vec![
            Err(CallFailure::RateLimited("Rate limit reached".into())),
            Ok("[]".into()),
        ]);
        let (controller, _gate) = controller(Arc::clone(&client));
        let started = Instant::now();
        let outcome = controller
            .call(&task(), "prompt", "key", &CancellationToken::new())
            .await;
        assert_eq!(
            outcome,
            RetryOutcome::Succeeded {
                text: "[]".into(),
                attempts: 2
            }
        );
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_makes_no_further_call() {
        let client = ScriptedClient::new(vec![Err(transient()), Ok("[]".into())]);
        let (controller, gate) = controller(Arc::clone(&client));
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });
        let outcome = controller.call(&task(), "prompt", "key", &token).await;
        assert_eq!(outcome, RetryOutcome::Cancelled);
        assert_eq!(client.calls(), 1);
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn pre_cancelled_token_never_reaches_the_client() {
        let client = ScriptedClient::new(vec![Ok("[]".into())]);
        let (controller, _gate) = controller(Arc::clone(&client));
        let token = CancellationToken::new();
        token.cancel();
        let outcome = controller.call(&task(), "prompt", "key", &token).await;
        assert_eq!(outcome, RetryOutcome::Cancelled);
        assert_eq!(client.calls(), 0);
    }
}
