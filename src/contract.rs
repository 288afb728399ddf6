//! # contract: data model and the two seams of the mirror pipeline
//!
//! The traversal engine talks to the remote workspace through [`Workspace`]
//! and to local storage through [`ArtifactStore`]. Real implementations live
//! in [`crate::client`] and [`crate::export`]; both traits are annotated for
//! `mockall` so tests can script either side.
//!
//! The wire shapes of the remote API are decoded here as well, so that the
//! rest of the crate only sees [`FolderNode`], [`ChildRef`] and
//! [`ThreadRecord`].

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use mockall::automock;
use serde::{Deserialize, Deserializer};

use crate::error::{ApiError, StoreError};

/// A remote folder and its direct members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderNode {
    pub id: String,
    pub title: String,
    pub children: Vec<ChildRef>,
}

/// One member of a folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildRef {
    Folder { folder_id: String },
    Thread { thread_id: String },
    /// The caller may not resolve this entry; it carries no usable id.
    Restricted,
}

impl<'de> Deserialize<'de> for ChildRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawChild {
            folder_id: Option<String>,
            thread_id: Option<String>,
            restricted: Option<serde_json::Value>,
        }

        let raw = RawChild::deserialize(deserializer)?;
        let restricted = match raw.restricted {
            None | Some(serde_json::Value::Bool(false)) => false,
            Some(_) => true,
        };
        if restricted {
            return Ok(ChildRef::Restricted);
        }
        Ok(match (raw.folder_id, raw.thread_id) {
            (Some(folder_id), _) if !folder_id.is_empty() => ChildRef::Folder { folder_id },
            (_, Some(thread_id)) if !thread_id.is_empty() => ChildRef::Thread { thread_id },
            _ => ChildRef::Restricted,
        })
    }
}

/// Kind of a thread, as reported by the remote `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadKind {
    Document,
    Spreadsheet,
    Slides,
    #[serde(other)]
    Other,
}

impl ThreadKind {
    /// Binary rendering requested for this kind of thread.
    pub fn export_format(self) -> ExportFormat {
        match self {
            ThreadKind::Document => ExportFormat::Docx,
            ThreadKind::Spreadsheet => ExportFormat::Xlsx,
            ThreadKind::Slides | ThreadKind::Other => ExportFormat::Pdf,
        }
    }
}

/// Server-side export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    Docx,
    Xlsx,
    Pdf,
}

impl ExportFormat {
    /// File extension, also used as the export path segment.
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Docx => "docx",
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Pdf => "pdf",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// A document with its rendered HTML body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadRecord {
    pub id: String,
    pub title: String,
    pub kind: ThreadKind,
    pub html: String,
}

/// Binary export of one thread in one format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub thread_id: String,
    pub format: ExportFormat,
    pub bytes: Vec<u8>,
}

/// `GET /folders/{id}` response body.
#[derive(Debug, Deserialize)]
pub struct FolderResponse {
    pub folder: FolderMeta,
    #[serde(default)]
    pub children: Vec<ChildRef>,
}

#[derive(Debug, Deserialize)]
pub struct FolderMeta {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl FolderResponse {
    /// `requested_id` fills in the id when the body omits it.
    pub fn into_node(self, requested_id: &str) -> FolderNode {
        FolderNode {
            id: self
                .folder
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| requested_id.to_string()),
            title: self.folder.title.unwrap_or_default(),
            children: self.children,
        }
    }
}

/// One entry of a `GET /threads/?ids=...` response.
#[derive(Debug, Deserialize)]
pub struct ThreadEnvelope {
    pub thread: ThreadMeta,
    #[serde(default)]
    pub html: String,
}

#[derive(Debug, Deserialize)]
pub struct ThreadMeta {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: ThreadKind,
}

fn default_kind() -> ThreadKind {
    ThreadKind::Other
}

impl From<ThreadEnvelope> for ThreadRecord {
    fn from(env: ThreadEnvelope) -> Self {
        ThreadRecord {
            id: env.thread.id,
            title: env.thread.title,
            kind: env.thread.kind,
            html: env.html,
        }
    }
}

/// Outcome of a batch lookup that may span several requests.
#[derive(Debug, Default)]
pub struct ThreadBatch {
    pub records: HashMap<String, ThreadRecord>,
    pub failed: Vec<FailedChunk>,
}

/// Ids of one request that failed as a whole.
#[derive(Debug)]
pub struct FailedChunk {
    pub thread_ids: Vec<String>,
    pub error: ApiError,
}

impl ThreadBatch {
    /// A batch in which every requested id failed with `error`.
    pub fn failed(thread_ids: Vec<String>, error: ApiError) -> Self {
        Self {
            records: HashMap::new(),
            failed: vec![FailedChunk { thread_ids, error }],
        }
    }

    /// Whether `id` was part of a failed request.
    pub fn is_failed(&self, id: &str) -> bool {
        self.failed
            .iter()
            .any(|chunk| chunk.thread_ids.iter().any(|t| t == id))
    }
}

/// Decode a batch body: either `{ id: envelope }` or `{ "data": { id: envelope } }`.
pub fn parse_threads_batch(body: &[u8]) -> Result<HashMap<String, ThreadRecord>, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_slice(body)?;
    let map = match value {
        serde_json::Value::Object(mut obj) => match obj.remove("data") {
            Some(data @ serde_json::Value::Object(_)) if obj.is_empty() => data,
            Some(other) => {
                obj.insert("data".to_string(), other);
                serde_json::Value::Object(obj)
            }
            None => serde_json::Value::Object(obj),
        },
        other => other,
    };
    let envelopes: HashMap<String, ThreadEnvelope> = serde_json::from_value(map)?;
    Ok(envelopes
        .into_iter()
        .map(|(id, env)| (id, ThreadRecord::from(env)))
        .collect())
}

/// Remote document workspace.
///
/// Implemented by [`crate::client::QuipClient`] and by mocks in tests.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Fetch one folder and its direct children.
    async fn get_folder(&self, id: &str) -> Result<FolderNode, ApiError>;

    /// Fetch several threads, keyed by thread id.
    ///
    /// Implementations may split `ids` into several requests. Records from
    /// requests that succeeded are returned even when others failed; ids the
    /// server does not return are simply absent from the map.
    async fn get_threads_batch(&self, ids: &[String]) -> ThreadBatch;

    /// Download the server-side rendering of a thread.
    async fn export_thread(
        &self,
        id: &str,
        format: ExportFormat,
    ) -> Result<ExportArtifact, ApiError>;
}

/// Local destination for mirrored files.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Create `dir` and its parents. An existing directory is not an error.
    async fn ensure_dir(&self, dir: &Path) -> Result<(), StoreError>;

    /// Write `contents` to `path`, replacing any previous file.
    async fn write(&self, path: &Path, contents: &[u8]) -> Result<(), StoreError>;
}
