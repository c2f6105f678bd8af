//! Office document → PDF conversion.
//!
//! ## Why a private profile per conversion?
//!
//! LibreOffice keeps a user profile with a lock file. Two headless instances
//! sharing one profile make the second exit silently without writing a PDF.
//! Each conversion therefore points `-env:UserInstallation` at a fresh
//! directory inside the request workspace, which is deleted with it.
//!
//! ## Timeouts
//!
//! The child is spawned with `kill_on_drop`; when the timeout fires the
//! wait future is dropped and the process killed.

use crate::config::RenderConfig;
use crate::error::RenderError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Converts an office document to PDF.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    /// Convert `input`, writing the PDF into `out_dir`; returns its path.
    async fn convert(&self, input: &Path, out_dir: &Path) -> Result<PathBuf, RenderError>;

    /// Whether the converter can run at all.
    async fn probe(&self) -> bool;
}

/// LibreOffice in headless mode.
#[derive(Debug, Clone)]
pub struct SofficeConverter {
    program: String,
    timeout: Duration,
    probe_timeout: Duration,
}

impl SofficeConverter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timeout: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(5),
        }
    }

    pub fn from_config(config: &RenderConfig) -> Self {
        Self::new(config.converter_program.clone())
            .timeout(Duration::from_secs(config.conversion_timeout_secs))
            .probe_timeout(Duration::from_secs(config.probe_timeout_secs))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

/// `<out_dir>/<input stem>.pdf`
pub fn expected_pdf_path(input: &Path, out_dir: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    out_dir.join(format!("{stem}.pdf"))
}

fn profile_url(profile: &Path) -> String {
    let path = profile.to_string_lossy().replace('\\', "/");
    if path.starts_with('/') {
        format!("file://{path}")
    } else {
        format!("file:///{path}")
    }
}

#[async_trait]
impl DocumentConverter for SofficeConverter {
    async fn convert(&self, input: &Path, out_dir: &Path) -> Result<PathBuf, RenderError> {
        let profile = std::path::absolute(out_dir.join(".soffice-profile"))
            .map_err(|e| RenderError::workspace("resolving converter profile", e))?;

        info!("Converting {} to PDF", input.display());
        let child = Command::new(&self.program)
            .arg(format!("-env:UserInstallation={}", profile_url(&profile)))
            .args(["--headless", "--convert-to", "pdf", "--outdir"])
            .arg(out_dir)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                    RenderError::ConverterUnavailable {
                        program: self.program.clone(),
                        detail: e.to_string(),
                    }
                }
                _ => RenderError::ConversionFailed {
                    detail: format!("cannot start '{}': {}", self.program, e),
                },
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| RenderError::ConversionFailed {
                detail: format!("waiting for '{}': {}", self.program, e),
            })?,
            Err(_) => {
                warn!(
                    "Conversion of {} timed out after {}s",
                    input.display(),
                    self.timeout.as_secs()
                );
                return Err(RenderError::ConversionTimeout {
                    secs: self.timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            return Err(RenderError::ConversionFailed {
                detail: format!(
                    "'{}' exited with {}: {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let pdf = expected_pdf_path(input, out_dir);
        if !pdf.is_file() {
            return Err(RenderError::ConversionFailed {
                detail: format!("no PDF was produced at {}", pdf.display()),
            });
        }
        debug!("PDF written to {}", pdf.display());
        Ok(pdf)
    }

    async fn probe(&self) -> bool {
        let child = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();
        let Ok(mut child) = child else {
            return false;
        };
        matches!(
            tokio::time::timeout(self.probe_timeout, child.wait()).await,
            Ok(Ok(status)) if status.success()
        )
    }
}
