//! File-backed flow history store.
//!
//! Each instance lives in its own directory under the store root:
//!
//! ```text
//! {root}/{instance_id}/meta.json      instance metadata
//! {root}/{instance_id}/history.jsonl  one snapshot per line, oldest first
//! ```
//!
//! Appends are fsynced before returning. A line torn by a crash mid-append
//! is dropped on read and cut off before the next append. Whole-file writes
//! go to a temporary file that is renamed over the target. `meta.json` is
//! written last on creation, so an instance without it never existed.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;

pub use error::FileStoreError;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};
use waypoint_core::{
    CoreError, CorrelationId, DataPacket, FlowContext, FlowHistoryRepository, FlowInstanceId,
    FlowParams, FlowStoreRecord,
};

const META_FILE: &str = "meta.json";
const META_TMP_FILE: &str = "meta.json.tmp";
const HISTORY_FILE: &str = "history.jsonl";
const HISTORY_TMP_FILE: &str = "history.jsonl.tmp";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredMeta {
    instance_id: FlowInstanceId,
    external_id: Option<CorrelationId>,
    flow_type_name: String,
    created_at: DateTime<Utc>,
}

/// Flow history repository persisting to the local filesystem
///
/// Writes to one instance are serialized; instances never wait on each other.
pub struct FileFlowHistoryRepository {
    root: PathBuf,
    write_locks: DashMap<FlowInstanceId, Arc<Mutex<()>>>,
}

impl FileFlowHistoryRepository {
    /// Open a store rooted at `root`, creating the directory if needed
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, FileStoreError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "Opened file history store");
        Ok(Self {
            root,
            write_locks: DashMap::new(),
        })
    }

    /// Store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn instance_dir(&self, id: &FlowInstanceId) -> Result<PathBuf, FileStoreError> {
        let valid = !id.0.is_empty()
            && id
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(FileStoreError::InvalidInstanceId(id.0.clone()));
        }
        Ok(self.root.join(&id.0))
    }

    async fn lock_instance(&self, id: &FlowInstanceId) -> OwnedMutexGuard<()> {
        let lock = self.write_locks.entry(id.clone()).or_default().clone();
        lock.lock_owned().await
    }

    async fn read_meta(&self, id: &FlowInstanceId) -> Result<StoredMeta, FileStoreError> {
        let path = self.instance_dir(id)?.join(META_FILE);
        let raw = fs::read(&path).await.map_err(|e| not_found_or_io(e, id))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn read_lines(&self, id: &FlowInstanceId) -> Result<Vec<FlowContext>, FileStoreError> {
        let path = self.instance_dir(id)?.join(HISTORY_FILE);
        let bytes = fs::read(&path).await.map_err(|e| not_found_or_io(e, id))?;
        // A tail torn inside a multi-byte character is not valid UTF-8
        let raw = String::from_utf8_lossy(&bytes);

        let mut history = Vec::new();
        for (n, segment) in raw.split_inclusive('\n').enumerate() {
            let line = segment.trim_end_matches('\n');
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(snapshot) => history.push(snapshot),
                // Only the final segment can lack a newline
                Err(e) if !segment.ends_with('\n') => {
                    warn!(
                        flow_instance_id = %id,
                        line = n + 1,
                        error = %e,
                        "Ignoring torn history tail"
                    );
                }
                Err(source) => {
                    return Err(FileStoreError::CorruptHistory {
                        instance_id: id.0.clone(),
                        line: n + 1,
                        source,
                    })
                }
            }
        }
        Ok(history)
    }

    async fn write_history_file(
        &self,
        dir: &Path,
        history: &[FlowContext],
    ) -> Result<(), FileStoreError> {
        let mut contents = Vec::new();
        for snapshot in history {
            contents.extend(encode_line(snapshot)?);
        }
        write_atomic(&dir.join(HISTORY_TMP_FILE), &dir.join(HISTORY_FILE), &contents).await
    }

    async fn create(
        &self,
        flow_type_name: &str,
        model: DataPacket,
        params: FlowParams,
    ) -> Result<FlowContext, FileStoreError> {
        let context = FlowContext::new(FlowInstanceId::generate(), model, params);
        let dir = self.instance_dir(&context.ref_id)?;
        let meta = StoredMeta {
            instance_id: context.ref_id.clone(),
            external_id: context.params.external_id.clone(),
            flow_type_name: flow_type_name.to_string(),
            created_at: context.recorded_at,
        };

        let _guard = self.lock_instance(&context.ref_id).await;
        fs::create_dir_all(&dir).await?;
        self.write_history_file(&dir, std::slice::from_ref(&context))
            .await?;
        write_atomic(
            &dir.join(META_TMP_FILE),
            &dir.join(META_FILE),
            &serde_json::to_vec_pretty(&meta)?,
        )
        .await?;

        debug!(flow_instance_id = %context.ref_id, flow_type = flow_type_name, "Created instance");
        Ok(context)
    }

    async fn append(&self, snapshot: &FlowContext) -> Result<(), FileStoreError> {
        let dir = self.instance_dir(&snapshot.ref_id)?;
        let line = encode_line(snapshot)?;

        let _guard = self.lock_instance(&snapshot.ref_id).await;
        if !fs::try_exists(dir.join(META_FILE)).await? {
            return Err(FileStoreError::NotFound(snapshot.ref_id.0.clone()));
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(dir.join(HISTORY_FILE))
            .await
            .map_err(|e| not_found_or_io(e, &snapshot.ref_id))?;
        repair_tail(&mut file, &snapshot.ref_id).await?;
        file.seek(SeekFrom::End(0)).await?;
        file.write_all(&line).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn find_correlated(
        &self,
        external_id: &CorrelationId,
    ) -> Result<Option<FlowInstanceId>, FileStoreError> {
        let mut best: Option<StoredMeta> = None;
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let id = FlowInstanceId(entry.file_name().to_string_lossy().into_owned());
            let meta = match self.read_meta(&id).await {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "Skipping unreadable instance");
                    continue;
                }
            };
            if meta.external_id.as_ref() != Some(external_id) {
                continue;
            }
            if !fs::try_exists(entry.path().join(HISTORY_FILE)).await? {
                warn!(path = %entry.path().display(), "Skipping instance without history");
                continue;
            }
            // First instance created for a correlation id keeps it
            if best
                .as_ref()
                .map_or(true, |current| meta.created_at < current.created_at)
            {
                best = Some(meta);
            }
        }

        Ok(best.map(|meta| meta.instance_id))
    }
}

fn encode_line(snapshot: &FlowContext) -> Result<Vec<u8>, FileStoreError> {
    let mut line = serde_json::to_vec(snapshot)?;
    line.push(b'\n');
    Ok(line)
}

/// Write `contents` to `tmp`, sync it and rename it over `target`
async fn write_atomic(tmp: &Path, target: &Path, contents: &[u8]) -> Result<(), FileStoreError> {
    let mut file = fs::File::create(tmp).await?;
    file.write_all(contents).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(tmp, target).await?;
    Ok(())
}

/// Make sure the history file ends on a line boundary before appending.
///
/// A complete snapshot missing only its newline is kept and terminated; a
/// partial one is truncated away.
async fn repair_tail(file: &mut fs::File, id: &FlowInstanceId) -> Result<(), FileStoreError> {
    let len = file.metadata().await?.len();
    if len == 0 {
        return Ok(());
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1)).await?;
    file.read_exact(&mut last).await?;
    if last[0] == b'\n' {
        return Ok(());
    }

    let mut raw = Vec::with_capacity(len as usize);
    file.seek(SeekFrom::Start(0)).await?;
    file.read_to_end(&mut raw).await?;
    let keep = raw
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |pos| pos + 1);

    if serde_json::from_slice::<FlowContext>(&raw[keep..]).is_ok() {
        file.seek(SeekFrom::End(0)).await?;
        file.write_all(b"\n").await?;
    } else {
        warn!(
            flow_instance_id = %id,
            dropped_bytes = raw.len() - keep,
            "Truncating torn history tail"
        );
        file.set_len(keep as u64).await?;
    }
    file.sync_data().await?;
    Ok(())
}

fn not_found_or_io(e: std::io::Error, id: &FlowInstanceId) -> FileStoreError {
    if e.kind() == std::io::ErrorKind::NotFound {
        FileStoreError::NotFound(id.0.clone())
    } else {
        FileStoreError::Io(e)
    }
}

#[async_trait]
impl FlowHistoryRepository for FileFlowHistoryRepository {
    async fn create_instance(
        &self,
        flow_type_name: &str,
        model: DataPacket,
        params: FlowParams,
    ) -> Result<FlowContext, CoreError> {
        Ok(self.create(flow_type_name, model, params).await?)
    }

    async fn append_snapshot(&self, snapshot: &FlowContext) -> Result<(), CoreError> {
        Ok(self.append(snapshot).await?)
    }

    async fn read_history(&self, id: &FlowInstanceId) -> Result<Vec<FlowContext>, CoreError> {
        Ok(self.read_lines(id).await?)
    }

    async fn find_by_correlation(
        &self,
        external_id: &CorrelationId,
    ) -> Result<Option<Vec<FlowContext>>, CoreError> {
        match self.find_correlated(external_id).await? {
            Some(id) => Ok(Some(self.read_lines(&id).await?)),
            None => Ok(None),
        }
    }

    async fn read_instance_metadata(
        &self,
        id: &FlowInstanceId,
    ) -> Result<FlowStoreRecord, CoreError> {
        let meta = self.read_meta(id).await?;
        let history = self.read_lines(id).await?;
        Ok(FlowStoreRecord {
            instance_id: meta.instance_id,
            external_id: meta.external_id,
            flow_type_name: meta.flow_type_name,
            history,
        })
    }

    async fn replace_history(
        &self,
        id: &FlowInstanceId,
        history: Vec<FlowContext>,
    ) -> Result<(), CoreError> {
        if let Some(stray) = history.iter().find(|ctx| &ctx.ref_id != id) {
            return Err(CoreError::StateStoreError(format!(
                "Snapshot of instance {} cannot be stored under {}",
                stray.ref_id, id
            )));
        }
        let dir = self.instance_dir(id).map_err(CoreError::from)?;

        let _guard = self.lock_instance(id).await;
        self.read_meta(id).await?;
        self.write_history_file(&dir, &history).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_rejects_path_like_instance_ids() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileFlowHistoryRepository::open(dir.path()).await.unwrap();

        let err = repo
            .read_history(&FlowInstanceId("../escape".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::StateStoreError(_)));
    }

    #[tokio::test]
    async fn test_history_file_is_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileFlowHistoryRepository::open(dir.path()).await.unwrap();
        let ctx = repo
            .create_instance("F", DataPacket::new(json!({"a": 1})), FlowParams::new())
            .await
            .unwrap();
        repo.append_snapshot(&ctx).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join(&ctx.ref_id.0).join(HISTORY_FILE))
            .unwrap();
        assert_eq!(raw.lines().count(), 2);
        for line in raw.lines() {
            let parsed: FlowContext = serde_json::from_str(line).unwrap();
            assert_eq!(parsed.ref_id, ctx.ref_id);
        }
    }

    #[tokio::test]
    async fn test_corrupt_line_reported() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileFlowHistoryRepository::open(dir.path()).await.unwrap();
        let ctx = repo
            .create_instance("F", DataPacket::null(), FlowParams::new())
            .await
            .unwrap();
        let path = dir.path().join(&ctx.ref_id.0).join(HISTORY_FILE);
        let mut raw = std::fs::read_to_string(&path).unwrap();
        raw.push_str("{not json\n");
        std::fs::write(&path, raw).unwrap();

        let err = repo.read_history(&ctx.ref_id).await.unwrap_err();
        match err {
            CoreError::StateStoreError(msg) => assert!(msg.contains("line 2")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    async fn instance_with_step(repo: &FileFlowHistoryRepository) -> FlowContext {
        let ctx = repo
            .create_instance("F", DataPacket::new(json!({"n": 0})), FlowParams::new())
            .await
            .unwrap();
        let mut step = ctx.clone();
        step.model = DataPacket::new(json!({"n": 1}));
        repo.append_snapshot(&step).await.unwrap();
        step
    }

    fn append_raw(path: &Path, bytes: &[u8]) {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(bytes).unwrap();
    }

    #[tokio::test]
    async fn test_torn_tail_dropped_and_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileFlowHistoryRepository::open(dir.path()).await.unwrap();
        let step = instance_with_step(&repo).await;
        let path = dir.path().join(&step.ref_id.0).join(HISTORY_FILE);

        let encoded = serde_json::to_vec(&step).unwrap();
        append_raw(&path, &encoded[..encoded.len() / 2]);

        let repo = FileFlowHistoryRepository::open(dir.path()).await.unwrap();
        assert_eq!(repo.read_history(&step.ref_id).await.unwrap().len(), 2);

        let mut next = step.clone();
        next.model = DataPacket::new(json!({"n": 2}));
        repo.append_snapshot(&next).await.unwrap();

        let history = repo.read_history(&step.ref_id).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].model, next.model);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.ends_with('\n'));
        assert_eq!(raw.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_complete_tail_without_newline_kept() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileFlowHistoryRepository::open(dir.path()).await.unwrap();
        let step = instance_with_step(&repo).await;
        let path = dir.path().join(&step.ref_id.0).join(HISTORY_FILE);

        append_raw(&path, &serde_json::to_vec(&step).unwrap());
        assert_eq!(repo.read_history(&step.ref_id).await.unwrap().len(), 3);

        repo.append_snapshot(&step).await.unwrap();
        assert_eq!(repo.read_history(&step.ref_id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_correlation_skips_instance_without_history() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileFlowHistoryRepository::open(dir.path()).await.unwrap();
        let ctx = repo
            .create_instance(
                "F",
                DataPacket::null(),
                FlowParams::new().with_external_id("ORD-7"),
            )
            .await
            .unwrap();

        let orphan = dir.path().join("orphan");
        std::fs::create_dir(&orphan).unwrap();
        let meta = StoredMeta {
            instance_id: FlowInstanceId("orphan".to_string()),
            external_id: Some(CorrelationId("ORD-7".to_string())),
            flow_type_name: "F".to_string(),
            created_at: ctx.recorded_at - chrono::Duration::hours(1),
        };
        std::fs::write(orphan.join(META_FILE), serde_json::to_vec(&meta).unwrap()).unwrap();

        let history = repo
            .find_by_correlation(&CorrelationId("ORD-7".to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(history[0].ref_id, ctx.ref_id);
    }

    #[tokio::test]
    async fn test_instances_do_not_share_write_lock() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileFlowHistoryRepository::open(dir.path()).await.unwrap();
        let first = instance_with_step(&repo).await;
        let second = instance_with_step(&repo).await;

        let _held = repo.lock_instance(&first.ref_id).await;
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            repo.append_snapshot(&second),
        )
        .await
        .expect("append blocked by another instance")
        .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_appends_to_one_instance() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(FileFlowHistoryRepository::open(dir.path()).await.unwrap());
        let step = instance_with_step(&repo).await;

        let mut handles = Vec::new();
        for n in 0..8 {
            let repo = repo.clone();
            let mut snapshot = step.clone();
            snapshot.model = DataPacket::new(json!({ "n": n }));
            handles.push(tokio::spawn(async move {
                repo.append_snapshot(&snapshot).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(repo.read_history(&step.ref_id).await.unwrap().len(), 10);
    }
}
