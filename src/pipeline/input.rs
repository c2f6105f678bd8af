//! Template resolution: turn a template name into a main document path.
//!
//! ## Why validate the name?
//!
//! The name arrives from a request body and is joined onto the templates
//! root. Anything other than one plain path component (`..`, `a/b`, an
//! absolute path) could reach outside the root, so it is rejected before the
//! file system is touched.
//!
//! ## Main document selection
//!
//! A template folder may hold several `.docx` files (sub-documents, older
//! versions). A `template.json` manifest names the main one explicitly;
//! without it the configured priority list is tried, then the
//! alphabetically first `.docx`.

use crate::config::{check_dpi, check_quality, RenderConfig};
use crate::error::{Missing, RenderError};
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Manifest file name inside a template folder.
pub const MANIFEST_FILE: &str = "template.json";

/// Optional per-template settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateManifest {
    /// Main document file name inside the folder.
    pub main: Option<String>,
    pub dpi: Option<u32>,
    pub jpeg_quality: Option<u8>,
}

/// A template folder resolved to its main document and effective settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTemplate {
    pub name: String,
    pub dir: PathBuf,
    pub main: PathBuf,
    pub dpi: u32,
    pub jpeg_quality: u8,
}

/// Reject anything but a single, normal path component.
pub fn validate_component(kind: &str, value: &str) -> Result<(), RenderError> {
    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !value.contains(['/', '\\']) => Ok(()),
        _ => Err(RenderError::InvalidRequest(format!(
            "{kind} must be a plain name without path separators, got '{value}'"
        ))),
    }
}

/// Resolve `name` under `config.templates_root`.
///
/// # Errors
/// [`RenderError::InvalidRequest`] for an unsafe name,
/// [`RenderError::NotFound`] for a missing folder or document, and
/// [`RenderError::InvalidConfig`] for an unreadable manifest.
pub fn resolve_template(name: &str, config: &RenderConfig) -> Result<ResolvedTemplate, RenderError> {
    validate_component("Template name", name)?;

    let dir = config.templates_root.join(name);
    if !dir.is_dir() {
        return Err(RenderError::NotFound {
            what: Missing::TemplateFolder,
            path: dir,
        });
    }

    let manifest = read_manifest(&dir)?;
    let main = match manifest.main.as_deref() {
        Some(main) => {
            validate_component("Manifest 'main'", main)?;
            let path = dir.join(main);
            if !path.is_file() {
                return Err(RenderError::NotFound {
                    what: Missing::TemplateDocument,
                    path,
                });
            }
            path
        }
        None => pick_main_document(&dir, &config.template_priority)?,
    };

    let dpi = manifest.dpi.unwrap_or(config.dpi);
    let jpeg_quality = manifest.jpeg_quality.unwrap_or(config.jpeg_quality);
    check_dpi(dpi)?;
    check_quality(jpeg_quality)?;

    info!("Template '{}' → {}", name, main.display());
    Ok(ResolvedTemplate {
        name: name.to_string(),
        dir,
        main,
        dpi,
        jpeg_quality,
    })
}

fn read_manifest(dir: &Path) -> Result<TemplateManifest, RenderError> {
    let path = dir.join(MANIFEST_FILE);
    if !path.is_file() {
        return Ok(TemplateManifest::default());
    }
    let text = std::fs::read_to_string(&path).map_err(|e| {
        RenderError::InvalidConfig(format!("Cannot read '{}': {}", path.display(), e))
    })?;
    let manifest = serde_json::from_str(&text).map_err(|e| {
        RenderError::InvalidConfig(format!("Invalid manifest '{}': {}", path.display(), e))
    })?;
    debug!("Loaded manifest {}: {:?}", path.display(), manifest);
    Ok(manifest)
}

fn pick_main_document(dir: &Path, priority: &[String]) -> Result<PathBuf, RenderError> {
    if let Some(path) = priority.iter().map(|n| dir.join(n)).find(|p| p.is_file()) {
        return Ok(path);
    }

    let entries = std::fs::read_dir(dir)
        .map_err(|e| RenderError::workspace(format!("listing {}", dir.display()), e))?;
    let mut docs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_docx(p))
        .collect();
    docs.sort();

    docs.into_iter().next().ok_or_else(|| RenderError::NotFound {
        what: Missing::TemplateDocument,
        path: dir.join("*.docx"),
    })
}

fn is_docx(path: &Path) -> bool {
    let lock_file = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("~$"));
    !lock_file
        && path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("docx"))
}
