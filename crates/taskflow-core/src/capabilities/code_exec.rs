//! `code_execution`: run a snippet through a local interpreter.
//!
//! Only languages listed in `allowed_languages` run. A disallowed language
//! or an interpreter that is not installed yields a degraded `fallback`
//! outcome; a run that exceeds the time limit is a `failed` verdict. A
//! non-zero exit code is still an `ok` result: stdout, stderr and the exit
//! code are reported so later steps can look at them.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::process::Command;

use crate::capabilities::{Capability, CapabilityContext, CapabilityError, Parameters};
use crate::models::StepOutcome;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct Interpreter {
    program: String,
    inline_flag: String,
}

pub struct CodeExecutionCapability {
    allowed_languages: Vec<String>,
    interpreters: HashMap<String, Interpreter>,
    timeout: Duration,
}

impl CodeExecutionCapability {
    pub fn new(allowed_languages: Vec<String>) -> Self {
        Self {
            allowed_languages: allowed_languages
                .into_iter()
                .map(|l| l.to_ascii_lowercase())
                .collect(),
            interpreters: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
        }
        .with_interpreter("python", "python3", "-c")
        .with_interpreter("javascript", "node", "-e")
    }

    /// Map `language` to `program <inline_flag> <code>`.
    pub fn with_interpreter(
        mut self,
        language: &str,
        program: impl Into<String>,
        inline_flag: impl Into<String>,
    ) -> Self {
        self.interpreters.insert(
            language.to_ascii_lowercase(),
            Interpreter {
                program: program.into(),
                inline_flag: inline_flag.into(),
            },
        );
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn is_allowed(&self, language: &str) -> bool {
        self.allowed_languages.iter().any(|l| l == language)
    }
}

/// Body of the first fenced block in `text`, or `text` itself.
pub(crate) fn strip_fence(text: &str) -> &str {
    let Some(start) = text.find("```") else {
        return text.trim();
    };
    let after = &text[start + 3..];
    // Skip the info string (`python`, `js`, ...) up to the end of the line.
    let body = match after.find('\n') {
        Some(nl) => &after[nl + 1..],
        None => return text.trim(),
    };
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

fn code_for(ctx: &CapabilityContext<'_>, params: &Parameters) -> String {
    if let Some(code) = ctx.setting(params, "code") {
        return code;
    }
    match ctx.step_results.last_text() {
        Some(text) => strip_fence(text).to_string(),
        None => ctx.content.trim().to_string(),
    }
}

#[async_trait]
impl Capability for CodeExecutionCapability {
    fn name(&self) -> &str {
        "code_execution"
    }

    async fn invoke(
        &self,
        ctx: &CapabilityContext<'_>,
        params: &Parameters,
    ) -> Result<StepOutcome, CapabilityError> {
        let language = ctx
            .setting(params, "language")
            .unwrap_or_else(|| "python".to_string())
            .to_ascii_lowercase();

        if !self.is_allowed(&language) {
            return Ok(StepOutcome::degraded(format!(
                "code execution unavailable: language '{}' is not allowed",
                language
            )));
        }
        let Some(interpreter) = self.interpreters.get(&language) else {
            return Ok(StepOutcome::degraded(format!(
                "code execution unavailable: no interpreter known for '{}'",
                language
            )));
        };

        let code = code_for(ctx, params);
        if code.is_empty() {
            return Err(CapabilityError::InvalidParameters("no code to run".into()));
        }

        tracing::debug!(
            "[CodeExec] Running {} snippet ({} bytes) for task {}",
            language,
            code.len(),
            ctx.task_id
        );

        let child = Command::new(&interpreter.program)
            .arg(&interpreter.inline_flag)
            .arg(&code)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("[CodeExec] Interpreter '{}' not found", interpreter.program);
                return Ok(StepOutcome::degraded(format!(
                    "code execution unavailable: '{}' is not installed",
                    interpreter.program
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Ok(StepOutcome::failed(format!(
                    "{} snippet timed out after {}s",
                    language,
                    self.timeout.as_secs()
                )))
            }
        };

        Ok(StepOutcome::ok(json!({
            "language": language,
            "exit_code": output.status.code(),
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
        })))
    }
}
