//! Template expansion: fill a repaired DOCX with request data.
//!
//! The expression language (variables, loops, conditionals) belongs to the
//! template engine, not to this crate. [`TemplateExpander`] is the seam; the
//! shipped [`CommandExpander`] drives any engine that can be started as
//!
//! ```text
//! <program> [args…] <template.docx> <context.json> <output.docx>
//! ```
//!
//! and reports failures on stderr with a non-zero exit status.

use crate::error::RenderError;
use crate::pipeline::context::ExpansionContext;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Expands a template into a finished document.
#[async_trait]
pub trait TemplateExpander: Send + Sync {
    /// Expand `template` against `context`, writing the result to `output`.
    ///
    /// # Errors
    /// [`RenderError::ExpansionFailed`] with the engine's message.
    async fn expand(
        &self,
        template: &Path,
        context: &ExpansionContext,
        output: &Path,
    ) -> Result<(), RenderError>;
}

/// Runs an external template engine as a child process.
#[derive(Debug, Clone)]
pub struct CommandExpander {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandExpander {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Arguments placed before the three positional paths.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn failed(&self, detail: impl Into<String>) -> RenderError {
        let detail = detail.into();
        RenderError::ExpansionFailed {
            hints: expansion_hints(&detail),
            detail,
        }
    }
}

#[async_trait]
impl TemplateExpander for CommandExpander {
    async fn expand(
        &self,
        template: &Path,
        context: &ExpansionContext,
        output: &Path,
    ) -> Result<(), RenderError> {
        let context_path = output.with_file_name("context.json");
        tokio::fs::write(&context_path, context.to_json()?)
            .await
            .map_err(|e| RenderError::workspace("writing expansion context", e))?;

        info!("Expanding {} with '{}'", template.display(), self.program);
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(template)
            .arg(&context_path)
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.failed(format!("cannot start '{}': {}", self.program, e)))?;

        let result = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                self.failed(format!(
                    "'{}' did not finish within {}s",
                    self.program,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| self.failed(format!("waiting for '{}': {}", self.program, e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let detail = match stderr.trim() {
                "" => format!("'{}' exited with {}", self.program, result.status),
                msg => msg.to_string(),
            };
            return Err(self.failed(detail));
        }
        if !output.is_file() {
            return Err(self.failed(format!(
                "'{}' exited successfully but wrote no {}",
                self.program,
                output.display()
            )));
        }

        debug!("Expanded document at {}", output.display());
        Ok(())
    }
}

/// Remediation hints for a template engine error message.
pub fn expansion_hints(detail: &str) -> String {
    let lower = detail.to_lowercase();
    let mut hints = Vec::new();

    if lower.contains("unexpected") || lower.contains("expected token") || lower.contains("syntax") {
        hints.push(
            "A tag is malformed. Run `offer-render repair --analyze <template.docx>` to list \
placeholders that Word split across formatting runs.",
        );
    }
    if lower.contains("undefined") || lower.contains("not found") || lower.contains("missing") {
        hints.push("The template references a name absent from `placeholders` or `products`.");
    }
    if lower.contains("endfor") || lower.contains("endif") || lower.contains("end of template") {
        hints.push("A `{% for %}` or `{% if %}` block is not closed in the same document part.");
    }
    if hints.is_empty() {
        hints.push(
            "Check that every `{{ … }}` and `{% … %}` tag in the template is complete and typed \
in one go, without formatting changes inside the braces.",
        );
    }

    hints
        .iter()
        .map(|h| format!("  hint: {h}"))
        .collect::<Vec<_>>()
        .join("\n")
}
