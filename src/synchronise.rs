//! High-level pipeline: mirrors a remote folder tree onto local disk.
//!
//! Starting from the configured root folder, the engine walks the remote
//! hierarchy with an explicit work queue, creates one local directory per
//! folder, fetches each folder's documents in a single batch and hands them
//! to the [`ExportWriter`].
//!
//! # Failure isolation
//! Only the root folder fetch is fatal. A sub-folder that is missing or
//! forbidden, or that has an empty title, is skipped; any other failure of a
//! folder, a batch or a single file is recorded in the
//! [`SynchroniseReport`] and the walk carries on with the rest of the tree.
//!
//! # Concurrency
//! At most `max_concurrent_folders` folders are processed at once, and at
//! most `max_concurrent_documents` documents of a folder are exported
//! concurrently. The number of requests actually on the wire is governed by
//! the client's rate limiter, not here.
//!
//! # Navigation
//! - Main entrypoint: [`synchronise`]
//! - Output: [`SynchroniseReport`]

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use futures::stream::{self, FuturesUnordered, StreamExt};
use tracing::{debug, error, info, warn};

use crate::config::TraversalConfig;
use crate::contract::{ArtifactStore, ChildRef, FolderNode, Workspace};
use crate::error::{ApiError, StoreError, SynchroniseError};
use crate::export::{
    sanitize_document_title, sanitize_folder_title, DocumentReport, ExportWriter, NameAllocator,
};

/// Aggregated outcome of a run, from which the caller picks an exit status.
#[derive(Debug, Default)]
pub struct SynchroniseReport {
    pub folders_mirrored: usize,
    pub restricted_skipped: usize,
    pub skipped_folders: Vec<SkippedFolder>,
    pub branch_failures: Vec<BranchFailure>,
    pub documents: Vec<DocumentReport>,
}

impl SynchroniseReport {
    pub fn artifacts_written(&self) -> usize {
        self.documents
            .iter()
            .flat_map(|d| &d.artifacts)
            .filter(|a| a.is_ok())
            .count()
    }

    pub fn artifact_failures(&self) -> usize {
        self.documents.iter().map(|d| d.failures().count()).sum()
    }

    /// True when nothing failed. Skipped folders and restricted entries do not count.
    pub fn is_clean(&self) -> bool {
        self.branch_failures.is_empty() && self.artifact_failures() == 0
    }

    fn absorb(&mut self, outcome: FolderOutcome) {
        match outcome {
            FolderOutcome::Mirrored {
                restricted,
                documents,
                failures,
                ..
            } => {
                self.folders_mirrored += 1;
                self.restricted_skipped += restricted;
                self.documents.extend(documents);
                self.branch_failures.extend(failures);
            }
            FolderOutcome::Skipped(skipped) => self.skipped_folders.push(skipped),
            FolderOutcome::Failed(failure) => self.branch_failures.push(failure),
        }
    }
}

impl fmt::Display for SynchroniseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} folders, {} documents, {} files written, {} file failures, {} branch failures, {} folders skipped, {} restricted entries skipped",
            self.folders_mirrored,
            self.documents.len(),
            self.artifacts_written(),
            self.artifact_failures(),
            self.branch_failures.len(),
            self.skipped_folders.len(),
            self.restricted_skipped,
        )
    }
}

/// A sub-folder that was deliberately not mirrored.
#[derive(Debug)]
pub struct SkippedFolder {
    pub folder_id: String,
    pub parent_dir: PathBuf,
    pub reason: SkipReason,
}

#[derive(Debug)]
pub enum SkipReason {
    EmptyTitle,
    Inaccessible(ApiError),
}

/// A folder or batch whose work could not be done.
#[derive(Debug)]
pub struct BranchFailure {
    pub folder_id: String,
    pub dir: PathBuf,
    /// Threads that were not exported because of this failure.
    pub thread_ids: Vec<String>,
    pub kind: BranchFailureKind,
}

#[derive(Debug)]
pub enum BranchFailureKind {
    FolderFetch(ApiError),
    Directory(StoreError),
    ThreadBatch(ApiError),
    /// The batch response did not include these threads.
    MissingThreads,
}

impl fmt::Display for BranchFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchFailureKind::FolderFetch(e) => write!(f, "folder fetch failed: {e}"),
            BranchFailureKind::Directory(e) => write!(f, "{e}"),
            BranchFailureKind::ThreadBatch(e) => write!(f, "thread batch failed: {e}"),
            BranchFailureKind::MissingThreads => f.write_str("threads missing from batch response"),
        }
    }
}

/// A folder waiting to be fetched.
#[derive(Debug)]
struct FolderTask {
    folder_id: String,
    parent_dir: PathBuf,
    depth: usize,
}

enum FolderOutcome {
    Mirrored {
        subfolders: Vec<FolderTask>,
        restricted: usize,
        documents: Vec<DocumentReport>,
        failures: Vec<BranchFailure>,
    },
    Skipped(SkippedFolder),
    Failed(BranchFailure),
}

/// Mirror the tree under `config.root_folder_id` into `config.output_dir`.
///
/// The root's own title is not used: its children land directly in the
/// output directory.
pub async fn synchronise<W, S>(
    config: &TraversalConfig,
    workspace: &W,
    store: &S,
) -> Result<SynchroniseReport, SynchroniseError>
where
    W: Workspace + ?Sized,
    S: ArtifactStore + ?Sized,
{
    Synchroniser::new(config, workspace, store).run().await
}

/// Traversal state for a single run.
pub struct Synchroniser<'a, W: ?Sized, S: ?Sized> {
    config: &'a TraversalConfig,
    workspace: &'a W,
    store: &'a S,
    writer: ExportWriter<'a, W, S>,
    /// File stems handed out per target directory. Folders whose titles
    /// sanitise to the same name share a directory and therefore an entry.
    names: Mutex<HashMap<PathBuf, NameAllocator>>,
}

impl<'a, W, S> Synchroniser<'a, W, S>
where
    W: Workspace + ?Sized,
    S: ArtifactStore + ?Sized,
{
    pub fn new(config: &'a TraversalConfig, workspace: &'a W, store: &'a S) -> Self {
        Self {
            config,
            workspace,
            store,
            writer: ExportWriter::new(workspace, store),
            names: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(&self) -> Result<SynchroniseReport, SynchroniseError> {
        let root_id = &self.config.root_folder_id;
        info!(root_folder_id = %root_id, output_dir = %self.config.output_dir.display(), "Starting mirror");

        let root = self.workspace.get_folder(root_id).await.map_err(|source| {
            error!(root_folder_id = %root_id, error = %source, "Failed to fetch root folder");
            SynchroniseError::RootFolder {
                id: root_id.clone(),
                source,
            }
        })?;

        let mut report = SynchroniseReport::default();
        let mut queue = VecDeque::new();
        let mut visited = HashSet::from([root_id.clone(), root.id.clone()]);

        let outcome = self
            .mirror_node(root, self.config.output_dir.clone(), 0)
            .await;
        self.collect(outcome, &mut report, &mut queue, &mut visited);

        let cap = self.config.max_concurrent_folders.max(1);
        let mut in_flight = FuturesUnordered::new();
        loop {
            while in_flight.len() < cap {
                match queue.pop_front() {
                    Some(task) => in_flight.push(self.visit_folder(task)),
                    None => break,
                }
            }
            match in_flight.next().await {
                Some(outcome) => self.collect(outcome, &mut report, &mut queue, &mut visited),
                None => break,
            }
        }

        info!(summary = %report, "Mirror finished");
        Ok(report)
    }

    /// Queue newly discovered folders and fold the outcome into the report.
    ///
    /// A folder id is visited at most once per run, so folders listed under
    /// several parents or reachable through a cycle are mirrored once.
    fn collect(
        &self,
        mut outcome: FolderOutcome,
        report: &mut SynchroniseReport,
        queue: &mut VecDeque<FolderTask>,
        visited: &mut HashSet<String>,
    ) {
        if let FolderOutcome::Mirrored { subfolders, .. } = &mut outcome {
            for task in subfolders.drain(..) {
                if visited.insert(task.folder_id.clone()) {
                    queue.push_back(task);
                } else {
                    debug!(folder_id = %task.folder_id, parent = %task.parent_dir.display(), "Folder already visited");
                }
            }
        }
        report.absorb(outcome);
    }

    /// Fetch a sub-folder and mirror it below its parent's directory.
    async fn visit_folder(&self, task: FolderTask) -> FolderOutcome {
        let node = match self.workspace.get_folder(&task.folder_id).await {
            Ok(node) => node,
            Err(e) if e.is_inaccessible() => {
                warn!(folder_id = %task.folder_id, parent = %task.parent_dir.display(), error = %e, "Skipping inaccessible folder");
                return FolderOutcome::Skipped(SkippedFolder {
                    folder_id: task.folder_id,
                    parent_dir: task.parent_dir,
                    reason: SkipReason::Inaccessible(e),
                });
            }
            Err(e) => {
                error!(folder_id = %task.folder_id, parent = %task.parent_dir.display(), error = %e, "Failed to fetch folder");
                return FolderOutcome::Failed(BranchFailure {
                    folder_id: task.folder_id,
                    dir: task.parent_dir,
                    thread_ids: Vec::new(),
                    kind: BranchFailureKind::FolderFetch(e),
                });
            }
        };

        if node.title.trim().is_empty() {
            warn!(folder_id = %node.id, parent = %task.parent_dir.display(), "Skipping folder without title");
            return FolderOutcome::Skipped(SkippedFolder {
                folder_id: task.folder_id,
                parent_dir: task.parent_dir,
                reason: SkipReason::EmptyTitle,
            });
        }

        let dir = task.parent_dir.join(sanitize_folder_title(&node.title));
        self.mirror_node(node, dir, task.depth).await
    }

    /// Create the folder's directory, export its documents and queue its sub-folders.
    async fn mirror_node(&self, node: FolderNode, dir: PathBuf, depth: usize) -> FolderOutcome {
        let (thread_ids, subfolders, restricted) = partition_children(&node.children, &dir, depth + 1);
        info!(
            folder_id = %node.id,
            path = %dir.display(),
            depth,
            threads = thread_ids.len(),
            subfolders = subfolders.len(),
            restricted,
            "Mirroring folder"
        );

        let mut documents = Vec::new();
        let mut failures = Vec::new();

        match self.store.ensure_dir(&dir).await {
            Ok(()) => {
                debug!(path = %dir.display(), "Directory ready");
                if !thread_ids.is_empty() {
                    self.export_threads(&node.id, &dir, thread_ids, &mut documents, &mut failures)
                        .await;
                }
            }
            Err(e) => {
                error!(folder_id = %node.id, path = %dir.display(), error = %e, "Failed to create directory");
                failures.push(BranchFailure {
                    folder_id: node.id.clone(),
                    dir: dir.clone(),
                    thread_ids,
                    kind: BranchFailureKind::Directory(e),
                });
            }
        }

        FolderOutcome::Mirrored {
            subfolders,
            restricted,
            documents,
            failures,
        }
    }

    async fn export_threads(
        &self,
        folder_id: &str,
        dir: &Path,
        thread_ids: Vec<String>,
        documents: &mut Vec<DocumentReport>,
        failures: &mut Vec<BranchFailure>,
    ) {
        let mut batch = self.workspace.get_threads_batch(&thread_ids).await;
        let failed: HashSet<String> = batch
            .failed
            .iter()
            .flat_map(|chunk| chunk.thread_ids.iter().cloned())
            .collect();

        for chunk in batch.failed.drain(..) {
            error!(folder_id, path = %dir.display(), threads = chunk.thread_ids.len(), error = %chunk.error, "Failed to fetch thread batch");
            failures.push(BranchFailure {
                folder_id: folder_id.to_string(),
                dir: dir.to_path_buf(),
                thread_ids: chunk.thread_ids,
                kind: BranchFailureKind::ThreadBatch(chunk.error),
            });
        }

        let mut ready = Vec::with_capacity(batch.records.len());
        let mut missing = Vec::new();
        {
            let mut names = self.names.lock().unwrap_or_else(PoisonError::into_inner);
            let names = names.entry(dir.to_path_buf()).or_default();
            for id in &thread_ids {
                match batch.records.remove(id) {
                    Some(record) => {
                        let stem = names.allocate(&sanitize_document_title(&record.title));
                        ready.push((record, stem));
                    }
                    None if failed.contains(id) => {}
                    None => missing.push(id.clone()),
                }
            }
        }

        if !missing.is_empty() {
            warn!(folder_id, path = %dir.display(), missing = ?missing, "Threads missing from batch response");
            failures.push(BranchFailure {
                folder_id: folder_id.to_string(),
                dir: dir.to_path_buf(),
                thread_ids: missing,
                kind: BranchFailureKind::MissingThreads,
            });
        }

        let cap = self.config.max_concurrent_documents.max(1);
        let written: Vec<DocumentReport> = stream::iter(&ready)
            .map(|(record, stem)| self.writer.write_document(record, dir, stem))
            .buffered(cap)
            .collect()
            .await;
        documents.extend(written);
    }
}

/// Split children into thread ids and sub-folder tasks, counting restricted entries.
///
/// Order is preserved and repeated ids are kept once.
fn partition_children(
    children: &[ChildRef],
    dir: &Path,
    depth: usize,
) -> (Vec<String>, Vec<FolderTask>, usize) {
    let mut seen_threads = HashSet::new();
    let mut seen_folders = HashSet::new();
    let mut thread_ids = Vec::new();
    let mut subfolders = Vec::new();
    let mut restricted = 0;

    for child in children {
        match child {
            ChildRef::Thread { thread_id } => {
                if seen_threads.insert(thread_id.as_str()) {
                    thread_ids.push(thread_id.clone());
                }
            }
            ChildRef::Folder { folder_id } => {
                if seen_folders.insert(folder_id.as_str()) {
                    subfolders.push(FolderTask {
                        folder_id: folder_id.clone(),
                        parent_dir: dir.to_path_buf(),
                        depth,
                    });
                }
            }
            ChildRef::Restricted => restricted += 1,
        }
    }

    (thread_ids, subfolders, restricted)
}
