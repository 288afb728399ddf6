//! Writes the three local files of every mirrored document.
//!
//! For one [`ThreadRecord`] the writer produces `<name>.html`,
//! `<name>.md` and `<name>.<docx|xlsx|pdf>`. The three attempts run
//! concurrently and are all awaited; a failure in one never stops the
//! others and is returned as part of the [`DocumentReport`].

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{error, info};

use crate::contract::{ArtifactStore, ExportFormat, ThreadRecord, Workspace};
use crate::error::{ArtifactError, StoreError};
use crate::markdown::html_to_markdown;

/// Characters never allowed inside a single path component.
const RESERVED: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

const UNTITLED: &str = "untitled";

/// File name stem for a document title: reserved characters are removed.
pub fn sanitize_document_title(title: &str) -> String {
    sanitize_component(title, "")
}

/// Directory name for a folder title: reserved characters become `-`.
pub fn sanitize_folder_title(title: &str) -> String {
    sanitize_component(title, "-")
}

fn sanitize_component(title: &str, replacement: &str) -> String {
    let mut name = String::with_capacity(title.len());
    for c in title.chars() {
        if RESERVED.contains(&c) {
            name.push_str(replacement);
        } else if !c.is_control() {
            name.push(c);
        }
    }
    let name = name.trim();
    if name.is_empty() {
        return UNTITLED.to_string();
    }
    if name.chars().all(|c| c == '.') {
        return name.replace('.', "_");
    }
    name.to_string()
}

/// Hands out unique file stems within one directory.
///
/// A stem that is already taken gets ` (2)`, ` (3)`, ... appended. Names are
/// assigned in call order, so the same listing always yields the same names.
#[derive(Debug, Default)]
pub struct NameAllocator {
    taken: HashSet<String>,
}

impl NameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, stem: &str) -> String {
        if self.taken.insert(stem.to_string()) {
            return stem.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{stem} ({n})");
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Which of the three files an outcome refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Html,
    Markdown,
    Export(ExportFormat),
}

impl ArtifactKind {
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Html => "html",
            ArtifactKind::Markdown => "md",
            ArtifactKind::Export(format) => format.extension(),
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Result of one write attempt.
#[derive(Debug)]
pub struct ArtifactOutcome {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    /// Bytes written on success.
    pub result: Result<usize, ArtifactError>,
}

impl ArtifactOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Everything that happened to one document.
#[derive(Debug)]
pub struct DocumentReport {
    pub thread_id: String,
    pub title: String,
    pub artifacts: Vec<ArtifactOutcome>,
}

impl DocumentReport {
    pub fn failures(&self) -> impl Iterator<Item = &ArtifactOutcome> {
        self.artifacts.iter().filter(|a| !a.is_ok())
    }
}

fn artifact_path(dir: &Path, stem: &str, kind: ArtifactKind) -> PathBuf {
    dir.join(format!("{stem}.{}", kind.extension()))
}

/// Persists documents through an [`ArtifactStore`], fetching binary exports
/// from a [`Workspace`].
pub struct ExportWriter<'a, W: ?Sized, S: ?Sized> {
    workspace: &'a W,
    store: &'a S,
}

impl<'a, W, S> ExportWriter<'a, W, S>
where
    W: Workspace + ?Sized,
    S: ArtifactStore + ?Sized,
{
    pub fn new(workspace: &'a W, store: &'a S) -> Self {
        Self { workspace, store }
    }

    /// Write the three files of `record` into `dir` using `stem` as file name.
    pub async fn write_document(&self, record: &ThreadRecord, dir: &Path, stem: &str) -> DocumentReport {
        let format = record.kind.export_format();

        let html_path = artifact_path(dir, stem, ArtifactKind::Html);
        let md_path = artifact_path(dir, stem, ArtifactKind::Markdown);
        let export_path = artifact_path(dir, stem, ArtifactKind::Export(format));

        let html = async {
            let result = self.write_bytes(&html_path, record.html.as_bytes()).await;
            ArtifactOutcome {
                kind: ArtifactKind::Html,
                path: html_path.clone(),
                result,
            }
        };
        let markdown = async {
            let md = html_to_markdown(&record.html);
            let result = self.write_bytes(&md_path, md.as_bytes()).await;
            ArtifactOutcome {
                kind: ArtifactKind::Markdown,
                path: md_path.clone(),
                result,
            }
        };
        let export = async {
            let result = match self.workspace.export_thread(&record.id, format).await {
                Ok(artifact) => self.write_bytes(&export_path, &artifact.bytes).await,
                Err(e) => Err(ArtifactError::Export(e)),
            };
            ArtifactOutcome {
                kind: ArtifactKind::Export(format),
                path: export_path.clone(),
                result,
            }
        };

        let (html, markdown, export) = futures::join!(html, markdown, export);
        let artifacts = vec![html, markdown, export];

        for artifact in &artifacts {
            match &artifact.result {
                Ok(bytes) => info!(
                    path = %artifact.path.display(),
                    thread_id = %record.id,
                    bytes = *bytes,
                    "Saved artifact"
                ),
                Err(e) => error!(
                    path = %artifact.path.display(),
                    thread_id = %record.id,
                    error = %e,
                    "Failed to save artifact"
                ),
            }
        }

        DocumentReport {
            thread_id: record.id.clone(),
            title: record.title.clone(),
            artifacts,
        }
    }

    async fn write_bytes(&self, path: &Path, bytes: &[u8]) -> Result<usize, ArtifactError> {
        self.store.write(path, bytes).await?;
        Ok(bytes.len())
    }
}

/// [`ArtifactStore`] backed by the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsStore;

#[async_trait]
impl ArtifactStore for FsStore {
    async fn ensure_dir(&self, dir: &Path) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| StoreError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> Result<(), StoreError> {
        tokio::fs::write(path, contents)
            .await
            .map_err(|source| StoreError::Write {
                path: path.to_path_buf(),
                source,
            })
    }
}
