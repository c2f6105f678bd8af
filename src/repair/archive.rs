//! Archive rewriter: repair the members of a DOCX container.
//!
//! A DOCX file is a zip container. Placeholders live in `word/document.xml`
//! (required) and, less often, in headers, footers and footnotes stored as
//! other `word/*.xml` members. Only those members are ever rewritten; every
//! other member is copied with identical bytes, in the original order.
//!
//! The input is never modified. Output goes to a temporary sibling that is
//! renamed into place once complete, so a failed run leaves no output file.

use super::scan::{has_opening_delimiter, scan, ScanReport};
use super::{repair_markup, Strategy};
use crate::error::ArchiveError;
use serde::Serialize;
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Main-content member of a WordprocessingML package.
pub const MAIN_MEMBER: &str = "word/document.xml";

/// Suffix appended to the file stem of a repaired copy.
pub const FIXED_SUFFIX: &str = "_fixed";

// ── Reports ──────────────────────────────────────────────────────────────

/// What happened to one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MemberOutcome {
    /// Rewritten by the named strategy.
    Repaired { strategy: Strategy, changes: usize },
    /// Holds no delimiters; copied unchanged.
    Untouched,
    /// Had delimiters but could not be processed; copied unchanged.
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberReport {
    pub name: String,
    #[serde(flatten)]
    pub outcome: MemberOutcome,
}

/// Per-member outcome of [`repair_archive`], main member first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveReport {
    pub members: Vec<MemberReport>,
}

impl ArchiveReport {
    /// Outcome for the main-content member.
    pub fn main(&self) -> Option<&MemberOutcome> {
        self.members
            .iter()
            .find(|m| m.name == MAIN_MEMBER)
            .map(|m| &m.outcome)
    }

    /// Members rewritten by either strategy.
    pub fn repaired(&self) -> impl Iterator<Item = &MemberReport> {
        self.members
            .iter()
            .filter(|m| matches!(m.outcome, MemberOutcome::Repaired { .. }))
    }

    /// Members skipped with a warning.
    pub fn skipped(&self) -> impl Iterator<Item = &MemberReport> {
        self.members
            .iter()
            .filter(|m| matches!(m.outcome, MemberOutcome::Skipped { .. }))
    }
}

/// Tag scan of one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberScan {
    pub name: String,
    pub report: ScanReport,
}

/// Result of [`analyze_archive`]: scans of the main member and of every
/// auxiliary member that contains a delimiter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveAnalysis {
    pub members: Vec<MemberScan>,
}

impl ArchiveAnalysis {
    pub fn contaminated_count(&self) -> usize {
        self.members
            .iter()
            .map(|m| m.report.contaminated_count())
            .sum()
    }

    /// `true` if any member has unequal opening and closing delimiter counts.
    pub fn has_unbalanced(&self) -> bool {
        self.members.iter().any(|m| !m.report.is_balanced())
    }
}

// ── Container I/O ────────────────────────────────────────────────────────

struct Member {
    name: String,
    data: Vec<u8>,
    is_dir: bool,
}

fn read_members(bytes: &[u8]) -> Result<Vec<Member>, ArchiveError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut members = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut data)
            .map_err(|e| ArchiveError::InvalidMember {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        members.push(Member {
            is_dir: entry.is_dir(),
            name,
            data,
        });
    }
    Ok(members)
}

fn write_members(members: &[Member]) -> Result<Vec<u8>, ArchiveError> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for member in members {
        if member.is_dir {
            zip.add_directory(member.name.as_str(), options)?;
        } else {
            zip.start_file(member.name.as_str(), options)?;
            zip.write_all(&member.data)
                .map_err(|e| ArchiveError::InvalidMember {
                    name: member.name.clone(),
                    reason: e.to_string(),
                })?;
        }
    }
    Ok(zip.finish()?.into_inner())
}

fn read_file(path: &Path) -> Result<Vec<u8>, ArchiveError> {
    fs::read(path).map_err(|source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// `word/<name>.xml`, directly under `word/`, other than the main member.
fn is_auxiliary(name: &str) -> bool {
    name != MAIN_MEMBER
        && name
            .strip_prefix("word/")
            .is_some_and(|rest| !rest.contains('/') && rest.ends_with(".xml"))
}

// ── Repair ───────────────────────────────────────────────────────────────

/// Repair the container in `bytes` and return the rewritten container.
///
/// # Errors
/// [`ArchiveError::InvalidContainer`] when `bytes` is not a zip container,
/// [`ArchiveError::MissingMember`] / [`ArchiveError::InvalidMember`] when the
/// main member is absent or not UTF-8. Auxiliary member problems are
/// recorded in the report, never returned.
pub fn repair_archive_bytes(bytes: &[u8]) -> Result<(Vec<u8>, ArchiveReport), ArchiveError> {
    let mut members = read_members(bytes)?;
    let mut report = ArchiveReport::default();

    let main = members
        .iter_mut()
        .find(|m| m.name == MAIN_MEMBER && !m.is_dir)
        .ok_or_else(|| ArchiveError::MissingMember {
            name: MAIN_MEMBER.to_string(),
        })?;
    let text = std::str::from_utf8(&main.data)
        .map_err(|e| ArchiveError::InvalidMember {
            name: MAIN_MEMBER.to_string(),
            reason: format!("not valid UTF-8: {e}"),
        })?
        .to_string();
    report.members.push(MemberReport {
        name: MAIN_MEMBER.to_string(),
        outcome: repair_member(&mut main.data, text),
    });

    for member in members.iter_mut().filter(|m| is_auxiliary(&m.name)) {
        let decoded = std::str::from_utf8(&member.data).map(str::to_string);
        let outcome = match decoded {
            Ok(text) => repair_member(&mut member.data, text),
            Err(e) => {
                warn!("Skipping member {}: not valid UTF-8 ({})", member.name, e);
                MemberOutcome::Skipped {
                    reason: format!("not valid UTF-8: {e}"),
                }
            }
        };
        report.members.push(MemberReport {
            name: member.name.clone(),
            outcome,
        });
    }

    Ok((write_members(&members)?, report))
}

fn repair_member(data: &mut Vec<u8>, text: String) -> MemberOutcome {
    if !has_opening_delimiter(&text) {
        return MemberOutcome::Untouched;
    }
    let repaired = repair_markup(&text);
    *data = repaired.markup.into_bytes();
    MemberOutcome::Repaired {
        strategy: repaired.strategy,
        changes: repaired.changes,
    }
}

/// Repair the DOCX at `input` and write the result to `output`.
///
/// `output` is only created once the rewritten container is complete.
pub fn repair_archive(input: &Path, output: &Path) -> Result<ArchiveReport, ArchiveError> {
    info!("Repairing {}", input.display());
    let bytes = read_file(input)?;
    let (repaired, report) = repair_archive_bytes(&bytes)?;
    write_atomic(output, &repaired)?;

    for member in &report.members {
        debug!("{}: {:?}", member.name, member.outcome);
    }
    info!(
        "Wrote {} ({} members repaired)",
        output.display(),
        report.repaired().count()
    );
    Ok(report)
}

/// Write `bytes` to a temporary sibling of `path`, then rename into place.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ArchiveError> {
    let write_err = |source| ArchiveError::Write {
        path: path.to_path_buf(),
        source,
    };
    let tmp_path = path.with_extension("docx.tmp");
    if let Err(e) = fs::write(&tmp_path, bytes) {
        let _ = fs::remove_file(&tmp_path);
        return Err(write_err(e));
    }
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        write_err(e)
    })
}

/// `<dir>/<stem>_fixed.docx` for an input `<dir>/<stem>.docx`.
pub fn fixed_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    input.with_file_name(format!("{stem}{FIXED_SUFFIX}.docx"))
}

// ── Diagnostics ──────────────────────────────────────────────────────────

/// Scan the DOCX at `path` without modifying anything.
pub fn analyze_archive(path: &Path) -> Result<ArchiveAnalysis, ArchiveError> {
    analyze_archive_bytes(&read_file(path)?)
}

pub fn analyze_archive_bytes(bytes: &[u8]) -> Result<ArchiveAnalysis, ArchiveError> {
    let members = read_members(bytes)?;
    let mut analysis = ArchiveAnalysis::default();

    let main = members
        .iter()
        .find(|m| m.name == MAIN_MEMBER && !m.is_dir)
        .ok_or_else(|| ArchiveError::MissingMember {
            name: MAIN_MEMBER.to_string(),
        })?;
    let text = std::str::from_utf8(&main.data).map_err(|e| ArchiveError::InvalidMember {
        name: MAIN_MEMBER.to_string(),
        reason: format!("not valid UTF-8: {e}"),
    })?;
    analysis.members.push(MemberScan {
        name: MAIN_MEMBER.to_string(),
        report: scan(text),
    });

    for member in members.iter().filter(|m| is_auxiliary(&m.name)) {
        if let Ok(text) = std::str::from_utf8(&member.data) {
            if has_opening_delimiter(text) {
                analysis.members.push(MemberScan {
                    name: member.name.clone(),
                    report: scan(text),
                });
            }
        }
    }
    Ok(analysis)
}

/// Every `.docx` under `dir`, recursively, sorted by path.
///
/// Word lock files (`~$name.docx`) and previously repaired copies
/// (`*_fixed.docx`) are skipped.
pub fn find_documents(dir: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    let mut found = Vec::new();
    walk(dir, &mut found)?;
    found.sort();
    Ok(found)
}

fn walk(dir: &Path, found: &mut Vec<PathBuf>) -> Result<(), ArchiveError> {
    let io_err = |source| ArchiveError::Io {
        path: dir.to_path_buf(),
        source,
    };
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_dir() {
            walk(&path, found)?;
        } else if is_template_document(&path) {
            found.push(path);
        }
    }
    Ok(())
}

fn is_template_document(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let is_docx = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("docx"));
    let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
    is_docx && !name.starts_with("~$") && !stem.to_ascii_lowercase().ends_with(FIXED_SUFFIX)
}
