//! Periodic controller that syncs ACH files with remote destinations: on
//! each tick it downloads and processes inbound/return files while merging
//! new transfers into per-destination files and uploading any that are due.

pub mod agent;
pub mod config;
pub mod merge;
pub mod returns;

pub use agent::{AgentError, AgentFactory, FileTransferAgent, LocalDirAgent};
pub use config::{CutoffTime, FileTransferRepository, PathConfig, Protocol, RemoteHostConfig};
pub use merge::{ach_filename, ach_filename_seq, MergedFile, MAX_LINES};

use crate::ach::AchFile;
use crate::config::FileTransferConfig;
use crate::services::metrics::{FILES_DOWNLOADED, FILES_UPLOADED, TRANSFERS_MERGED};
use crate::services::{
    group_transfers, AchClient, DepositoryRepository, GroupableTransfer, TransferRepository,
};
use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Attempts per remote operation within one tick.
const REMOTE_OP_ATTEMPTS: u32 = 3;

pub struct FileTransferController {
    root_dir: PathBuf,
    interval: Duration,
    batch_size: usize,
    upload_lead_time: Duration,
    cutoff_times: Vec<CutoffTime>,
    remote_configs: Vec<RemoteHostConfig>,
    path_configs: Vec<PathConfig>,
    ach: AchClient,
    transfer_repo: TransferRepository,
    dep_repo: DepositoryRepository,
    agent_factory: AgentFactory,
}

impl FileTransferController {
    /// Loads per-destination configuration and validates the workspace.
    /// A missing or unwritable workspace is fatal.
    pub async fn new(
        cfg: &FileTransferConfig,
        ach: AchClient,
        ft_repo: &FileTransferRepository,
        transfer_repo: TransferRepository,
        dep_repo: DepositoryRepository,
    ) -> Result<Self> {
        let root_dir = PathBuf::from(&cfg.storage_dir);
        fs::create_dir_all(&root_dir)
            .with_context(|| format!("storage directory {} unusable", root_dir.display()))?;
        let root_dir = root_dir
            .canonicalize()
            .with_context(|| format!("storage directory {} unusable", root_dir.display()))?;

        let cutoff_times = ft_repo.get_cutoff_times().await?;
        let remote_configs = ft_repo.get_remote_host_configs().await?;
        let path_configs = ft_repo.get_path_configs().await?;

        info!(
            interval = ?cfg.interval,
            batch_size = cfg.batch_size,
            destinations = cutoff_times.len(),
            "starting ACH file transfer controller"
        );

        Ok(Self {
            root_dir,
            interval: cfg.interval,
            batch_size: cfg.batch_size,
            upload_lead_time: cfg.upload_lead_time,
            cutoff_times,
            remote_configs,
            path_configs,
            ach,
            transfer_repo,
            dep_repo,
            agent_factory: Arc::new(|host, paths| agent::connect(host, paths)),
        })
    }

    /// Swap the remote transport; tests use a local-directory agent.
    pub fn with_agent_factory(mut self, factory: AgentFactory) -> Self {
        self.agent_factory = factory;
        self
    }

    /// Blocks until `shutdown` signals. Each tick runs the inbound worker
    /// and the merge/upload worker concurrently and waits for both, so an
    /// overrunning tick drops subsequent ticks instead of queueing them.
    /// Cancellation is honored between ticks; an in-flight tick completes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut tick =
            tokio::time::interval_at(tokio::time::Instant::now() + self.interval, self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    info!("starting periodic file operations");
                    let (inbound, merge) = tokio::join!(
                        self.download_and_process_incoming_files(),
                        self.merge_and_upload_files(),
                    );
                    if let Err(err) = inbound {
                        error!(error = %err, "periodic file operation: inbound processing");
                    }
                    if let Err(err) = merge {
                        error!(error = %err, "periodic file operation: merge and upload");
                    }
                    info!(interval = ?self.interval, "files synced, waiting for next tick");
                }
                _ = shutdown.changed() => {
                    info!("file transfer controller shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// One tick's worth of work, exposed for tests.
    pub async fn tick_once(&self) -> Result<()> {
        let (inbound, merge) = tokio::join!(
            self.download_and_process_incoming_files(),
            self.merge_and_upload_files(),
        );
        inbound?;
        merge?;
        Ok(())
    }

    fn get_details(&self, routing_number: &str) -> Option<(&RemoteHostConfig, &PathConfig)> {
        let host = self
            .remote_configs
            .iter()
            .find(|c| c.routing_number == routing_number)?;
        let paths = self
            .path_configs
            .iter()
            .find(|c| c.routing_number == routing_number)?;
        Some((host, paths))
    }

    // --- inbound ---------------------------------------------------------

    /// Downloads inbound and return files for every configured destination
    /// into a fresh workspace, processes them, then deletes the remote
    /// copies. Destinations fan out in parallel; one destination's failure
    /// never aborts the others.
    async fn download_and_process_incoming_files(&self) -> Result<()> {
        let workspace = tempfile::Builder::new()
            .prefix("downloaded")
            .tempdir_in(&self.root_dir)?;

        let work = self.cutoff_times.iter().map(|cutoff| {
            let dest_dir = workspace.path().join(&cutoff.routing_number);
            async move {
                if let Err(err) = self.sync_destination(&cutoff.routing_number, &dest_dir).await {
                    warn!(
                        routing_number = %cutoff.routing_number,
                        error = %err,
                        "problem processing destination"
                    );
                }
            }
        });
        futures::future::join_all(work).await;
        Ok(())
    }

    async fn sync_destination(&self, routing_number: &str, dest_dir: &Path) -> Result<()> {
        let Some((host, paths)) = self.get_details(routing_number) else {
            return Err(anyhow!("missing remote host or path config for {routing_number}"));
        };
        let agent = (self.agent_factory)(host, paths)
            .map_err(|e| anyhow!("agent init for {routing_number}: {e}"))?;

        let res = self.sync_destination_with(agent.as_ref(), dest_dir, paths).await;
        agent.close().await;
        res
    }

    async fn sync_destination_with(
        &self,
        agent: &dyn FileTransferAgent,
        dest_dir: &Path,
        paths: &PathConfig,
    ) -> Result<()> {
        let (inbound, returned) = tokio::join!(
            self.save_remote_files(agent, dest_dir, &paths.inbound_path, "inbound"),
            self.save_remote_files(agent, dest_dir, &paths.return_path, "return"),
        );
        let inbound = inbound?;
        let returned = returned?;

        returns::process_inbound_files(&local_dir(dest_dir, &paths.inbound_path))?;
        returns::process_return_files(
            &local_dir(dest_dir, &paths.return_path),
            &self.transfer_repo,
            &self.dep_repo,
        )
        .await?;

        // Processing succeeded from the local copies; drop the remote ones.
        for remote_path in inbound.iter().chain(returned.iter()) {
            if let Err(err) = agent.delete(remote_path).await {
                warn!(path = %remote_path, error = %err, "problem deleting remote file");
            }
        }
        Ok(())
    }

    /// Copies every file under one remote directory into the workspace.
    /// Returns the remote paths downloaded.
    async fn save_remote_files(
        &self,
        agent: &dyn FileTransferAgent,
        dest_dir: &Path,
        remote_dir: &str,
        kind: &str,
    ) -> Result<Vec<String>> {
        let names = if kind == "inbound" {
            agent.list_inbound().await?
        } else {
            agent.list_returns().await?
        };

        let local = local_dir(dest_dir, remote_dir);
        fs::create_dir_all(&local)?;

        let mut downloaded = Vec::with_capacity(names.len());
        for name in names {
            let remote_path = format!("{}/{}", remote_dir.trim_end_matches('/'), name);
            let contents = self.download_with_retries(agent, &remote_path).await?;
            fs::write(local.join(&name), contents)?;
            FILES_DOWNLOADED.with_label_values(&[kind]).inc();
            info!(kind = kind, file = %name, "copied down remote file");
            downloaded.push(remote_path);
        }
        Ok(downloaded)
    }

    async fn download_with_retries(
        &self,
        agent: &dyn FileTransferAgent,
        remote_path: &str,
    ) -> Result<Vec<u8>> {
        let mut attempt = 1;
        loop {
            match agent.download(remote_path).await {
                Ok(contents) => return Ok(contents),
                Err(err) if err.is_transient() && attempt < REMOTE_OP_ATTEMPTS => {
                    warn!(path = %remote_path, attempt, error = %err, "retrying download");
                    attempt += 1;
                }
                Err(err) => return Err(anyhow!("downloading {remote_path}: {err}")),
            }
        }
    }

    // --- merge and upload ------------------------------------------------

    /// Pulls pending transfers through the cursor, merges them into
    /// per-destination files, and uploads files that rolled over the line
    /// limit or whose destination is inside its cutoff window.
    async fn merge_and_upload_files(&self) -> Result<()> {
        let merged_dir = self.root_dir.join("merged");
        fs::create_dir_all(&merged_dir)?;
        self.cleanup_uploaded(&merged_dir);

        info!("starting file merge and upload operations");

        let mut cursor = self
            .transfer_repo
            .transfer_cursor(self.batch_size, self.dep_repo.clone());
        // Open merged files, one per destination, live for the whole pass
        // so rollover and sequence invariants hold across cursor blocks.
        let mut open_files: HashMap<String, MergedFile> = HashMap::new();

        loop {
            let block = cursor.next().await?;
            if block.is_empty() {
                break;
            }

            let mut files_to_upload: Vec<MergedFile> = Vec::new();
            for group in group_transfers(block) {
                for xfer in group {
                    match self.merge_one(&merged_dir, &mut open_files, &xfer).await {
                        Ok(closed) => files_to_upload.extend(closed),
                        Err(err) => {
                            warn!(transfer_id = %xfer.id, error = %err, "problem merging transfer");
                        }
                    }
                }
            }

            // Files closed by rollover are full; ship them now, in the
            // ascending sequence order they were closed in.
            for file in files_to_upload {
                if let Err(err) = self.upload_file(file).await {
                    error!(error = %err, "file upload");
                }
            }
        }

        // Flush open files whose destination is within the cutoff window.
        let now = Utc::now();
        for (destination, merged) in open_files {
            if merged.file.batches.is_empty() || merged.transfers.is_empty() {
                continue;
            }
            let due = self
                .cutoff_times
                .iter()
                .find(|c| c.routing_number == destination)
                .is_some_and(|c| c.is_due(now, self.upload_lead_time));
            if due {
                info!(destination = %destination, file = %merged.filename(), "cutoff window reached, uploading");
                if let Err(err) = self.upload_file(merged).await {
                    error!(error = %err, "file upload");
                }
            }
        }
        Ok(())
    }

    async fn merge_one(
        &self,
        merged_dir: &Path,
        open_files: &mut HashMap<String, MergedFile>,
        xfer: &GroupableTransfer,
    ) -> Result<Vec<MergedFile>> {
        let Some(file) = self.load_incoming_file(xfer).await? else {
            return Ok(Vec::new());
        };

        if !open_files.contains_key(&xfer.destination) {
            let merged = merge::grab_latest_merged_file(merged_dir, &xfer.destination, &file)?;
            open_files.insert(xfer.destination.clone(), merged);
        }
        let mergable = open_files
            .get_mut(&xfer.destination)
            .expect("open file just inserted");

        let closed = merge::merge_transfer(&file, mergable, xfer)?;
        TRANSFERS_MERGED
            .with_label_values(&[xfer.destination.as_str()])
            .inc();
        Ok(closed)
    }

    /// Retrieves a transfer's ACH file contents and parses them. Transfers
    /// without a file id are skipped.
    async fn load_incoming_file(&self, xfer: &GroupableTransfer) -> Result<Option<AchFile>> {
        let file_id = self
            .transfer_repo
            .file_id_for_transfer(&xfer.id, &xfer.user_id)
            .await?;
        if file_id.is_empty() {
            return Ok(None);
        }
        let contents = self.ach.file_contents(&file_id).await?;
        let file = AchFile::parse_bytes(&contents)
            .map_err(|e| anyhow!("parsing ACH file {file_id} for transfer {}: {e}", xfer.id))?;
        Ok(Some(file))
    }

    /// Uploads one merged file, then (and only then) records the merged
    /// filename and trace number on every contained transfer, and finally
    /// moves the local copy aside so later merges start a fresh sequence.
    /// The file survives on disk until cleanup so a crash between upload
    /// and the database writes cannot double-apply batches.
    async fn upload_file(&self, merged: MergedFile) -> Result<()> {
        let (host, paths) = self
            .get_details(&merged.destination)
            .ok_or_else(|| anyhow!("missing remote host config for {}", merged.destination))?;

        let filename = merged.filename();
        let contents = fs::read(&merged.path)
            .with_context(|| format!("opening {} for upload", merged.path.display()))?;
        let remote_path = format!("{}/{}", paths.outbound_path.trim_end_matches('/'), filename);

        let agent = (self.agent_factory)(host, paths)
            .map_err(|e| anyhow!("agent init for {}: {e}", merged.destination))?;
        let mut attempt = 1;
        let upload_result = loop {
            match agent.upload(&remote_path, contents.clone()).await {
                Ok(()) => break Ok(()),
                Err(err) if err.is_transient() && attempt < REMOTE_OP_ATTEMPTS => {
                    warn!(file = %filename, attempt, error = %err, "retrying upload");
                    attempt += 1;
                }
                Err(err) => break Err(err),
            }
        };
        agent.close().await;
        upload_result.map_err(|e| anyhow!("uploading {filename}: {e}"))?;

        FILES_UPLOADED
            .with_label_values(&[merged.destination.as_str()])
            .inc();
        info!(file = %filename, destination = %merged.destination, "uploaded merged file");

        for assignment in &merged.transfers {
            self.transfer_repo
                .mark_transfer_as_merged(&assignment.id, &filename, &assignment.trace_number)
                .await?;
        }

        let uploaded_dir = merged
            .path
            .parent()
            .map(|p| p.join(merge::UPLOADED_DIR))
            .ok_or_else(|| anyhow!("merged file {} has no parent", merged.path.display()))?;
        fs::create_dir_all(&uploaded_dir)?;
        fs::rename(&merged.path, uploaded_dir.join(&filename))?;
        Ok(())
    }

    /// Deletes uploaded files from prior days. Today's uploads stay on disk
    /// so restarts inside the cutoff window keep their dedup anchor.
    fn cleanup_uploaded(&self, merged_dir: &Path) {
        let uploaded = merged_dir.join(merge::UPLOADED_DIR);
        let today = chrono::Local::now().date_naive();
        let Ok(entries) = fs::read_dir(&uploaded) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(date) = name
                .get(0..8)
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y%m%d").ok())
            else {
                continue;
            };
            if date < today {
                if let Err(err) = fs::remove_file(entry.path()) {
                    warn!(file = %name, error = %err, "problem removing uploaded file");
                } else {
                    info!(file = %name, "removed uploaded file from prior day");
                }
            }
        }
    }
}

fn local_dir(dest_dir: &Path, remote_dir: &str) -> PathBuf {
    dest_dir.join(remote_dir.trim_matches('/'))
}
