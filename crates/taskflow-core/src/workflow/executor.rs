//! Step Executor: runs one step of one task and always hands back a
//! normalized `StepOutcome`.
//!
//! For each step the executor:
//! 1. Resolves placeholders in the prompt or the capability parameters
//! 2. Invokes the backend or capability under a per-call timeout
//! 3. Retries unexpected failures (errors, timeouts, panics) per the retry policy
//! 4. Absorbs an optional capability's failure into a `fallback` outcome
//!
//! Generation steps are never skippable: once retries are exhausted their
//! failure is fatal to the task even when the step is marked optional.

use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use crate::capabilities::{CapabilityContext, CapabilityRegistry, Parameters};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::{StepOutcome, Task};
use crate::workflow::backend::{GenerationBackend, GenerationSettings};
use crate::workflow::retry::RetryPolicy;
use crate::workflow::schema::{StepKind, StepSpec};
use crate::workflow::template::TemplateResolver;

pub struct StepExecutor {
    capabilities: Arc<CapabilityRegistry>,
    backend: Arc<dyn GenerationBackend>,
    settings: GenerationSettings,
    retry: RetryPolicy,
    timeout: Duration,
}

impl StepExecutor {
    pub fn new(
        capabilities: Arc<CapabilityRegistry>,
        backend: Arc<dyn GenerationBackend>,
        settings: GenerationSettings,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            capabilities,
            backend,
            settings,
            retry,
            timeout,
        }
    }

    pub fn from_config(
        config: &EngineConfig,
        capabilities: Arc<CapabilityRegistry>,
        backend: Arc<dyn GenerationBackend>,
    ) -> Self {
        Self::new(
            capabilities,
            backend,
            config.generation_settings(),
            config.retry_policy(),
            config.step_timeout(),
        )
    }

    pub fn capabilities(&self) -> &Arc<CapabilityRegistry> {
        &self.capabilities
    }

    /// Execute `step` against the current state of `task`.
    ///
    /// A `failed` outcome is fatal to the task; its `error` holds the
    /// task-level message.
    pub async fn execute(&self, step: &StepSpec, task: &Task) -> StepOutcome {
        let policy = match step.max_attempts {
            Some(n) => self.retry.with_max_attempts(n),
            None => self.retry.clone(),
        };
        let timeout = step
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.timeout);

        match &step.kind {
            StepKind::Generation { template } => {
                self.run_generation(step, task, template, &policy, timeout).await
            }
            StepKind::Capability {
                capability_name,
                parameters,
            } => {
                self.run_capability(step, task, capability_name, parameters, &policy, timeout)
                    .await
            }
        }
    }

    async fn run_generation(
        &self,
        step: &StepSpec,
        task: &Task,
        template: &str,
        policy: &RetryPolicy,
        timeout: Duration,
    ) -> StepOutcome {
        let resolution = TemplateResolver::resolve_detailed(template, task);
        warn_unresolved(task, step, &resolution.unresolved);

        let backend = self.backend.as_ref();
        let prompt = resolution.text.as_str();
        let settings = &self.settings;
        let (result, attempts) = attempt_with_retry(&step.name, policy, timeout, move || {
            backend.generate(prompt, settings)
        })
        .await;

        match result {
            Ok(text) => StepOutcome::ok(text).with_attempts(attempts),
            Err(message) => {
                if step.optional {
                    tracing::warn!(
                        "[Executor] Task {} step '{}': generation steps cannot be skipped",
                        task.id,
                        step.name
                    );
                }
                let err = EngineError::GenerationFailure {
                    step: step.name.clone(),
                    message,
                };
                StepOutcome::failed(err.to_string()).with_attempts(attempts)
            }
        }
    }

    async fn run_capability(
        &self,
        step: &StepSpec,
        task: &Task,
        capability_name: &str,
        parameters: &Parameters,
        policy: &RetryPolicy,
        timeout: Duration,
    ) -> StepOutcome {
        // An unregistered capability is a definition problem, never absorbed.
        let capability = match self.capabilities.lookup(capability_name) {
            Ok(c) => c,
            Err(e) => return StepOutcome::failed(e.to_string()).with_attempts(0),
        };

        let mut unresolved = Vec::new();
        let params: Parameters = parameters
            .iter()
            .map(|(k, v)| (k.clone(), TemplateResolver::resolve_value(v, task, &mut unresolved)))
            .collect();
        warn_unresolved(task, step, &unresolved);

        let ctx = CapabilityContext::new(task, &step.name);
        let capability = capability.as_ref();
        let ctx_ref = &ctx;
        let params_ref = &params;
        let (result, attempts) = attempt_with_retry(&step.name, policy, timeout, move || {
            capability.invoke(ctx_ref, params_ref)
        })
        .await;

        let failure = match result {
            Ok(outcome) if !outcome.is_failed() => return outcome.with_attempts(attempts),
            Ok(outcome) => outcome
                .error
                .unwrap_or_else(|| crate::workflow::template::render(&outcome.value)),
            Err(message) => message,
        };

        if step.optional {
            tracing::warn!(
                "[Executor] Task {} optional step '{}' failed, continuing: {}",
                task.id,
                step.name,
                failure
            );
            return StepOutcome::absorbed(failure).with_attempts(attempts);
        }

        let err = EngineError::CapabilityFailure {
            step: step.name.clone(),
            message: failure,
        };
        StepOutcome::failed(err.to_string()).with_attempts(attempts)
    }
}

fn warn_unresolved(task: &Task, step: &StepSpec, unresolved: &[String]) {
    if !unresolved.is_empty() {
        tracing::warn!(
            "[Executor] Task {} step '{}': unresolved placeholders {:?} rendered empty",
            task.id,
            step.name,
            unresolved
        );
    }
}

/// Call `op` until it succeeds or the policy gives up.
///
/// Errors, timeouts and panics all count as failed attempts. Returns the
/// final result and the number of attempts made.
async fn attempt_with_retry<F, Fut, T, E>(
    step_name: &str,
    policy: &RetryPolicy,
    timeout: Duration,
    mut op: F,
) -> (Result<T, String>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let message = match tokio::time::timeout(timeout, AssertUnwindSafe(op()).catch_unwind()).await
        {
            Ok(Ok(Ok(value))) => return (Ok(value), attempt),
            Ok(Ok(Err(e))) => e.to_string(),
            Ok(Err(panic)) => format!("panicked: {}", panic_message(panic.as_ref())),
            Err(_) => format!("timed out after {:?}", timeout),
        };

        if !policy.should_retry(attempt) {
            tracing::error!(
                "[Executor] Step '{}' failed after {} attempt(s): {}",
                step_name,
                attempt,
                message
            );
            return (Err(message), attempt);
        }

        let delay = policy.delay_after(attempt);
        tracing::warn!(
            "[Executor] Step '{}' attempt {}/{} failed: {} (retrying in {:?})",
            step_name,
            attempt,
            policy.max_attempts,
            message,
            delay
        );
        tokio::time::sleep(delay).await;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{Capability, CapabilityError};
    use crate::models::OutcomeStatus;
    use crate::workflow::backend::GenerationError;
    use crate::workflow::retry::Backoff;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct FlakyCapability {
        calls: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait]
    impl Capability for FlakyCapability {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn invoke(
            &self,
            _ctx: &CapabilityContext<'_>,
            params: &Parameters,
        ) -> Result<StepOutcome, CapabilityError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.succeed_on {
                Ok(StepOutcome::ok(params.get("echo").cloned().unwrap_or_default()))
            } else {
                Err(CapabilityError::Other(format!("attempt {} broke", n)))
            }
        }
    }

    struct PanickingCapability;

    #[async_trait]
    impl Capability for PanickingCapability {
        fn name(&self) -> &str {
            "panicky"
        }

        async fn invoke(
            &self,
            _ctx: &CapabilityContext<'_>,
            _params: &Parameters,
        ) -> Result<StepOutcome, CapabilityError> {
            panic!("capability blew up");
        }
    }

    struct VerdictCapability;

    #[async_trait]
    impl Capability for VerdictCapability {
        fn name(&self) -> &str {
            "verdict"
        }

        async fn invoke(
            &self,
            _ctx: &CapabilityContext<'_>,
            _params: &Parameters,
        ) -> Result<StepOutcome, CapabilityError> {
            Ok(StepOutcome::failed("file not found: x.txt"))
        }
    }

    #[derive(Default)]
    struct RecordingBackend {
        prompts: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl GenerationBackend for RecordingBackend {
        fn name(&self) -> &str {
            "recording"
        }

        async fn generate(
            &self,
            prompt: &str,
            _settings: &GenerationSettings,
        ) -> Result<String, GenerationError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if self.fail {
                Err(GenerationError::Http("connection refused".into()))
            } else {
                Ok(format!("generated from: {}", prompt))
            }
        }
    }

    fn task() -> Task {
        serde_json::from_value(json!({
            "id": "t1",
            "type": "demo",
            "content": "hello",
            "metadata": {"lang": "en"},
            "status": "running",
            "createdAt": "2026-01-01T00:00:00Z",
            "updatedAt": "2026-01-01T00:00:00Z"
        }))
        .unwrap()
    }

    fn executor(registry: CapabilityRegistry, backend: Arc<dyn GenerationBackend>) -> StepExecutor {
        StepExecutor::new(
            Arc::new(registry),
            backend,
            GenerationSettings::default(),
            RetryPolicy::new(3, Backoff::Fixed, Duration::ZERO),
            Duration::from_secs(5),
        )
    }

    fn capability_step(name: &str, capability: &str, optional: bool) -> StepSpec {
        StepSpec {
            name: name.into(),
            kind: StepKind::Capability {
                capability_name: capability.into(),
                parameters: json!({"echo": "{content}/{lang}"}).as_object().cloned().unwrap(),
            },
            optional,
            max_attempts: None,
            timeout_secs: None,
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let mut registry = CapabilityRegistry::new();
        registry.register_capability(Arc::new(FlakyCapability {
            calls: AtomicU32::new(0),
            succeed_on: 3,
        }));
        let exec = executor(registry, Arc::new(RecordingBackend::default()));

        let outcome = exec.execute(&capability_step("s", "flaky", false), &task()).await;
        assert_eq!(outcome.status, OutcomeStatus::Ok);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.value, "hello/en");
    }

    #[tokio::test]
    async fn test_required_step_exhausting_retries_fails() {
        let mut registry = CapabilityRegistry::new();
        registry.register_capability(Arc::new(FlakyCapability {
            calls: AtomicU32::new(0),
            succeed_on: 10,
        }));
        let exec = executor(registry, Arc::new(RecordingBackend::default()));

        let outcome = exec.execute(&capability_step("s", "flaky", false), &task()).await;
        assert!(outcome.is_failed());
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.error.unwrap().starts_with("Capability failure in step 's'"));
    }

    #[tokio::test]
    async fn test_optional_step_absorbs_panic() {
        let mut registry = CapabilityRegistry::new();
        registry.register_capability(Arc::new(PanickingCapability));
        let exec = executor(registry, Arc::new(RecordingBackend::default()));

        let outcome = exec.execute(&capability_step("s", "panicky", true), &task()).await;
        assert_eq!(outcome.status, OutcomeStatus::Fallback);
        assert!(outcome.degraded);
        assert!(outcome.error.unwrap().contains("capability blew up"));
    }

    #[tokio::test]
    async fn test_capability_verdict_is_not_retried() {
        let mut registry = CapabilityRegistry::new();
        registry.register_capability(Arc::new(VerdictCapability));
        let exec = executor(registry, Arc::new(RecordingBackend::default()));

        let outcome = exec.execute(&capability_step("s", "verdict", false), &task()).await;
        assert!(outcome.is_failed());
        assert_eq!(outcome.attempts, 1);

        let outcome = exec.execute(&capability_step("s", "verdict", true), &task()).await;
        assert_eq!(outcome.status, OutcomeStatus::Fallback);
    }

    #[tokio::test]
    async fn test_unknown_capability_is_fatal_even_when_optional() {
        let exec = executor(CapabilityRegistry::new(), Arc::new(RecordingBackend::default()));
        let outcome = exec.execute(&capability_step("s", "missing", true), &task()).await;
        assert!(outcome.is_failed());
        assert_eq!(outcome.error.as_deref(), Some("Unknown capability: missing"));
    }

    #[tokio::test]
    async fn test_generation_resolves_prompt() {
        let backend = Arc::new(RecordingBackend::default());
        let exec = executor(CapabilityRegistry::new(), backend.clone());
        let step = StepSpec {
            name: "write".into(),
            kind: StepKind::Generation {
                template: "Write about {content} in {lang}{nothing}".into(),
            },
            optional: false,
            max_attempts: None,
            timeout_secs: None,
        };

        let outcome = exec.execute(&step, &task()).await;
        assert_eq!(outcome.value, "generated from: Write about hello in en");
        assert_eq!(backend.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_optional_generation_failure_is_still_fatal() {
        let backend = Arc::new(RecordingBackend {
            fail: true,
            ..Default::default()
        });
        let exec = executor(CapabilityRegistry::new(), backend.clone());
        let step = StepSpec {
            name: "write".into(),
            kind: StepKind::Generation {
                template: "x".into(),
            },
            optional: true,
            max_attempts: Some(2),
            timeout_secs: None,
        };

        let outcome = exec.execute(&step, &task()).await;
        assert!(outcome.is_failed());
        assert_eq!(outcome.attempts, 2);
        assert!(outcome.error.unwrap().starts_with("Generation failure in step 'write'"));
        assert_eq!(backend.prompts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failed_attempt() {
        let policy = RetryPolicy::new(2, Backoff::Fixed, Duration::ZERO);
        let (result, attempts) = attempt_with_retry::<_, _, (), String>(
            "slow",
            &policy,
            Duration::from_millis(10),
            || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;
        assert!(result.unwrap_err().contains("timed out"));
        assert_eq!(attempts, 2);
    }
}
