//! Input format classification.
//!
//! Precedence: a simulation descriptor found in the environment archive wins
//! over everything; otherwise content sniffing for the genetic-design marker;
//! otherwise the file extension. Archives are never searched for
//! genetic-design payloads.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::archive;
use crate::error::PipelineResult;

/// Case-sensitive tag that identifies a genetic-design (SBOL) document.
pub const GENETIC_DESIGN_MARKER: &[u8] = b"<sbol";
/// Extension of simulation descriptor (SED-ML) files.
pub const SIMULATION_DESCRIPTOR_EXT: &str = "sedml";

const ARCHIVE_EXTS: &[&str] = &["omex", "zip", "sedx"];
const GENETIC_DESIGN_EXTS: &[&str] = &["sbol", "sbol2", "sbol3"];

/// The three interchangeable model formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    GeneticDesign,
    ModelExchange,
    Archive,
}

/// What the pipeline should simulate, and whether it needs converting first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Descriptor extracted from the environment archive.
    SimulationDescriptor(PathBuf),
    Model { path: PathBuf, format: ModelFormat },
}

impl Classification {
    pub fn needs_conversion(&self) -> bool {
        matches!(
            self,
            Classification::Model {
                format: ModelFormat::GeneticDesign,
                ..
            }
        )
    }

    pub fn path(&self) -> &Path {
        match self {
            Classification::SimulationDescriptor(path) => path,
            Classification::Model { path, .. } => path,
        }
    }
}

/// Classify `input`, extracting `environment` into `outputs_dir` when given.
pub async fn classify(
    input: &Path,
    environment: Option<&Path>,
    outputs_dir: &Path,
) -> PipelineResult<Classification> {
    if let Some(environment) = environment {
        let (env, dest) = (environment.to_path_buf(), outputs_dir.to_path_buf());
        tokio::task::spawn_blocking(move || archive::extract(&env, &dest)).await??;
        debug!(environment = %environment.display(), "extracted environment archive");

        if let Some(descriptor) = find_simulation_descriptor(outputs_dir).await? {
            return Ok(Classification::SimulationDescriptor(descriptor));
        }
    }

    let format = if is_genetic_design(input).await? {
        ModelFormat::GeneticDesign
    } else {
        format_from_extension(input)
    };

    Ok(Classification::Model {
        path: input.to_path_buf(),
        format,
    })
}

/// First `*.sedml` directly inside `dir`, by file name.
pub async fn find_simulation_descriptor(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut found = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_descriptor = path
            .extension()
            .map(|e| e == SIMULATION_DESCRIPTOR_EXT)
            .unwrap_or(false);
        if is_descriptor && entry.file_type().await?.is_file() {
            found.push(path);
        }
    }
    found.sort();
    Ok(found.into_iter().next())
}

/// Stream `path` line by line and stop at the first genetic-design marker.
///
/// Works on bytes so binary inputs (zip archives) do not fail decoding.
pub async fn is_genetic_design(path: &Path) -> std::io::Result<bool> {
    let mut reader = BufReader::new(tokio::fs::File::open(path).await?);
    let mut line = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(false);
        }
        if contains(&line, GENETIC_DESIGN_MARKER) {
            return Ok(true);
        }
    }
}

pub(crate) fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Fallback classification by extension; unknown extensions are model-exchange.
pub fn format_from_extension(path: &Path) -> ModelFormat {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    if ARCHIVE_EXTS.contains(&ext.as_str()) {
        ModelFormat::Archive
    } else if GENETIC_DESIGN_EXTS.contains(&ext.as_str()) {
        ModelFormat::GeneticDesign
    } else {
        ModelFormat::ModelExchange
    }
}
