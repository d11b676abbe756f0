//! Zip archive assembly and COMBINE (OMEX) packaging.
//!
//! [`ArchiveBuilder`] is the unfinished state: entries can still be appended
//! and nothing should be handed to a transport. [`ArchiveBuilder::finish`]
//! flushes the central directory and yields an [`Archive`] ready to stream.
//!
//! Everything here is blocking I/O; async callers go through
//! `tokio::task::spawn_blocking`.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::PipelineResult;

pub const MANIFEST_ENTRY: &str = "manifest.xml";
pub const METADATA_ENTRY: &str = "metadata.rdf";

const OMEX_FORMAT: &str = "http://identifiers.org/combine.specifications/omex";
const MANIFEST_FORMAT: &str = "http://identifiers.org/combine.specifications/omex-manifest";
const METADATA_FORMAT: &str = "http://identifiers.org/combine.specifications/omex-metadata";
const SBML_FORMAT: &str = "http://identifiers.org/combine.specifications/sbml.level-3.version-2.core";

const MAX_COMPRESSION: i64 = 9;

/// Which files of a directory go into an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    /// Shell-style pattern over the `/`-joined path relative to the directory
    /// root. `*` and `?` never cross a `/`; `**` spans directories.
    Glob(String),
}

impl Selection {
    fn matcher(&self) -> io::Result<Option<Pattern>> {
        match self {
            Selection::All => Ok(None),
            Selection::Glob(pattern) => Pattern::new(pattern)
                .map(Some)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e)),
        }
    }
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// An archive still open for writing.
pub struct ArchiveBuilder {
    writer: ZipWriter<File>,
    path: PathBuf,
    entries: Vec<String>,
    options: SimpleFileOptions,
}

impl ArchiveBuilder {
    /// Create the archive file at `path` with maximum deflate compression.
    pub fn create(path: impl Into<PathBuf>) -> PipelineResult<Self> {
        let path = path.into();
        let file = File::create(&path)?;
        Ok(Self {
            writer: ZipWriter::new(file),
            path,
            entries: Vec::new(),
            options: SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(MAX_COMPRESSION)),
        })
    }

    /// Add files under `dir` matching `selection`, named relative to `dir`.
    ///
    /// Returns the number of entries added.
    pub fn add_directory(&mut self, dir: &Path, selection: &Selection) -> PipelineResult<usize> {
        let matcher = selection.matcher()?;
        let mut added = 0;

        for (relative, absolute) in walk_files(dir)? {
            if absolute == self.path {
                continue;
            }
            if let Some(pattern) = &matcher {
                if !pattern.matches_with(&relative, MATCH_OPTIONS) {
                    continue;
                }
            }
            self.add_file(&absolute, &relative)?;
            added += 1;
        }

        Ok(added)
    }

    /// Copy one file from disk into the archive as `name`.
    pub fn add_file(&mut self, source: &Path, name: &str) -> PipelineResult<()> {
        self.writer.start_file(name, self.options)?;
        io::copy(&mut File::open(source)?, &mut self.writer)?;
        self.entries.push(name.to_string());
        Ok(())
    }

    /// Append a synthetic entry from memory.
    pub fn append(&mut self, name: &str, contents: &[u8]) -> PipelineResult<()> {
        self.writer.start_file(name, self.options)?;
        self.writer.write_all(contents)?;
        self.entries.push(name.to_string());
        Ok(())
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Write the central directory and close the file.
    pub fn finish(mut self) -> PipelineResult<Archive> {
        let mut file = self.writer.finish()?;
        file.flush()?;
        Ok(Archive {
            path: self.path,
            entries: self.entries,
        })
    }
}

/// A finished archive on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    path: PathBuf,
    entries: Vec<String>,
}

impl Archive {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entry names in insertion order.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }
}

/// Archive `dir` at `dest` in one step.
pub fn zip_directory(dir: &Path, selection: &Selection, dest: &Path) -> PipelineResult<Archive> {
    let mut builder = ArchiveBuilder::create(dest)?;
    builder.add_directory(dir, selection)?;
    builder.finish()
}

/// Bundle model files into a COMBINE archive with generated manifest and metadata.
pub fn build_combine_archive(models: &[PathBuf], dest: &Path) -> PipelineResult<Archive> {
    let mut builder = ArchiveBuilder::create(dest)?;
    let mut names = Vec::with_capacity(models.len());

    for model in models {
        let name = model
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "model path has no file name"))?;
        builder.add_file(model, &name)?;
        names.push(name);
    }

    builder.append(MANIFEST_ENTRY, combine_manifest(&names).as_bytes())?;
    builder.append(METADATA_ENTRY, combine_metadata().as_bytes())?;
    builder.finish()
}

/// OMEX manifest listing the archive itself, its manifest and metadata, and every model.
pub fn combine_manifest<S: AsRef<str>>(model_names: &[S]) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(
        "<omexManifest xmlns=\"http://identifiers.org/combine.specifications/omex-manifest\">\n",
    );
    push_content(&mut out, ".", OMEX_FORMAT);
    push_content(&mut out, &format!("./{MANIFEST_ENTRY}"), MANIFEST_FORMAT);
    push_content(&mut out, &format!("./{METADATA_ENTRY}"), METADATA_FORMAT);
    for name in model_names {
        push_content(&mut out, &format!("./{}", name.as_ref()), SBML_FORMAT);
    }
    out.push_str("</omexManifest>\n");
    out
}

fn push_content(out: &mut String, location: &str, format: &str) {
    out.push_str(&format!(
        "    <content location=\"{}\" format=\"{}\" />\n",
        xml_escape(location),
        format
    ));
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Structurally valid but empty RDF metadata document.
pub fn combine_metadata() -> String {
    concat!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
        "<rdf:RDF xmlns:rdf=\"http://www.w3.org/1999/02/22-rdf-syntax-ns#\" ",
        "xmlns:dcterms=\"http://purl.org/dc/terms/\" ",
        "xmlns:vCard=\"http://www.w3.org/2006/vcard/ns#\" />\n"
    )
    .to_string()
}

/// Unpack every entry of `archive` into `dest`.
pub fn extract(archive: &Path, dest: &Path) -> PipelineResult<()> {
    let mut zip = ZipArchive::new(File::open(archive)?)?;
    zip.extract(dest)?;
    Ok(())
}

/// Entry names of an archive on disk.
pub fn list_entries(archive: &Path) -> PipelineResult<Vec<String>> {
    let zip = ZipArchive::new(File::open(archive)?)?;
    Ok(zip.file_names().map(str::to_string).collect())
}

/// Regular files under `dir`, sorted, as (relative `/`-joined name, absolute path).
fn walk_files(dir: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push((name, entry.into_path()));
    }
    Ok(files)
}
