// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # File Watcher Adapter
//!
//! Directory-polling source. Existing files are processed first; in
//! continuous mode the watcher then re-scans on an interval and emits the
//! set difference against the files it already knows. The bookmark store
//! deduplicates across runs: a path is enqueued at most once per store
//! lifetime, and bookmarks are written only after a successful enqueue so
//! the next poll naturally retries transient read failures.
//!
//! The shared stop event short-circuits the scan-interval wait; an
//! in-flight scan completes its current file and exits.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use clinipipe_bootstrap::StopEvent;
use clinipipe_domain::entities::PipelineItem;
use clinipipe_domain::repositories::BookmarkStore;
use clinipipe_domain::value_objects::normalize_path;
use clinipipe_domain::PipelineError;

use crate::infrastructure::config::AdapterConfig;

/// Outcome of the initial directory sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOutcome {
    pub files_enqueued: usize,
    pub files_failed: usize,
}

/// Polls a directory and enqueues new file contents; see the module docs.
pub struct FileWatcherAdapter {
    config: AdapterConfig,
    bookmarks: Arc<dyn BookmarkStore>,
    stop_event: StopEvent,
    known_files: Mutex<HashSet<String>>,
}

impl FileWatcherAdapter {
    pub fn new(config: AdapterConfig, bookmarks: Arc<dyn BookmarkStore>, stop_event: StopEvent) -> Self {
        info!(watch_path = %config.watch_path, extensions = ?config.extensions, "initializing file watcher");
        Self {
            config,
            bookmarks,
            stop_event,
            known_files: Mutex::new(HashSet::new()),
        }
    }

    /// Signals the watcher to stop after its current file.
    pub fn stop(&self) {
        info!("stop requested on file watcher");
        self.stop_event.set();
    }

    /// Runs the adapter: initial sweep, then continuous polling when
    /// configured. Items are emitted into `tx`.
    pub async fn run(&self, tx: mpsc::Sender<PipelineItem>) -> Result<ScanOutcome, PipelineError> {
        info!(watch_path = %self.config.watch_path, "starting watcher");

        let watch_path = Path::new(&self.config.watch_path);
        if !watch_path.exists() {
            std::fs::create_dir_all(watch_path).map_err(|e| {
                PipelineError::io_error(format!(
                    "failed to create watch directory '{}': {}",
                    self.config.watch_path, e
                ))
            })?;
            info!(path = %self.config.watch_path, "created watch directory");
        }

        let outcome = self.process_existing_files(&tx).await?;
        info!(enqueued = outcome.files_enqueued, "processed existing files");

        if self.config.continuous && !self.stop_event.is_set() {
            self.watch_for_changes(&tx).await?;
        } else {
            debug!("one-time processing completed");
        }

        Ok(outcome)
    }

    /// Sweeps files already in the directory. Fails only when every
    /// candidate file failed; partial success is reported in the outcome.
    pub async fn process_existing_files(
        &self,
        tx: &mpsc::Sender<PipelineItem>,
    ) -> Result<ScanOutcome, PipelineError> {
        let mut outcome = ScanOutcome {
            files_enqueued: 0,
            files_failed: 0,
        };
        let mut failures: Vec<String> = Vec::new();

        for file_path in self.find_matching_files() {
            if self.stop_event.is_set() {
                info!("stop event observed during initial sweep");
                break;
            }

            let normalized = normalize_path(&file_path);
            self.known_files.lock().insert(normalized.clone());

            match self.bookmarks.is_processed(&normalized).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!(path = %normalized, "bookmark lookup failed: {}", e);
                    continue;
                }
            }

            match self.emit_file(&file_path, &normalized, tx).await {
                Ok(true) => outcome.files_enqueued += 1,
                Ok(false) => break, // stop event during send
                Err(e) if e.to_string().contains("No such file") => {
                    info!(path = %normalized, "file disappeared before processing");
                }
                Err(e) => {
                    error!(path = %normalized, "error reading file: {}", e);
                    failures.push(normalized);
                    outcome.files_failed += 1;
                }
            }
        }

        if outcome.files_failed > 0 && outcome.files_enqueued == 0 {
            return Err(PipelineError::io_error(format!(
                "failed to process any existing files ({} errors): {:?}",
                outcome.files_failed, failures
            )));
        }
        if outcome.files_failed > 0 {
            warn!(errors = outcome.files_failed, "some existing files failed to process");
        }
        Ok(outcome)
    }

    /// Continuous polling: emits the listing diff each interval until the
    /// stop event fires (or immediately after one pass in single-scan
    /// mode).
    async fn watch_for_changes(&self, tx: &mpsc::Sender<PipelineItem>) -> Result<(), PipelineError> {
        info!(watch_path = %self.config.watch_path, "watching for changes");

        while !self.stop_event.is_set() {
            let current_files: HashSet<String> =
                self.find_matching_files().iter().map(normalize_path).collect();

            let new_files: Vec<String> = {
                let known = self.known_files.lock();
                current_files.difference(&known).cloned().collect()
            };

            for normalized in new_files {
                if self.stop_event.is_set() {
                    break;
                }
                debug!(path = %normalized, "detected new file");

                match self.bookmarks.is_processed(&normalized).await {
                    Ok(true) => {
                        debug!(path = %normalized, "already processed");
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(path = %normalized, "bookmark lookup failed: {}", e);
                        continue;
                    }
                }

                let path = PathBuf::from(&normalized);
                match self.emit_file(&path, &normalized, tx).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) if e.to_string().contains("No such file") => {
                        info!(path = %normalized, "file disappeared before processing");
                    }
                    Err(e) => error!(path = %normalized, "error reading file: {}", e),
                }
            }

            *self.known_files.lock() = current_files;

            if self.config.single_scan_mode {
                info!("single scan mode enabled, exiting after one pass");
                return Ok(());
            }

            // The stop event short-circuits the interval wait.
            let interval = std::time::Duration::from_secs_f64(self.config.scan_interval);
            if self.stop_event.wait_timeout(interval).await {
                break;
            }
        }

        info!("file watcher loop exited");
        Ok(())
    }

    /// Reads one file and pushes it downstream; the bookmark is written
    /// only after the enqueue succeeds. Returns Ok(false) when the stop
    /// event interrupted the send.
    async fn emit_file(
        &self,
        file_path: &Path,
        normalized: &str,
        tx: &mpsc::Sender<PipelineItem>,
    ) -> Result<bool, PipelineError> {
        let body = tokio::fs::read_to_string(file_path)
            .await
            .map_err(|e| PipelineError::io_error(format!("{}: {}", normalized, e)))?;

        let item = PipelineItem::RawText {
            source_path: Some(normalized.to_string()),
            body,
        };

        tokio::select! {
            _ = self.stop_event.wait() => {
                info!(path = %normalized, "stop event interrupted enqueue");
                return Ok(false);
            }
            result = tx.send(item) => {
                result.map_err(|_| PipelineError::io_error("ingestion queue closed unexpectedly"))?;
            }
        }
        info!(path = %normalized, "enqueued");

        if let Err(e) = self.bookmarks.mark_processed(normalized, "processed").await {
            warn!(path = %normalized, "failed to record bookmark: {}", e);
        }
        Ok(true)
    }

    /// All files under the watch path whose name ends with a configured
    /// extension. Scan faults log and return an empty list.
    fn find_matching_files(&self) -> Vec<PathBuf> {
        let mut matching = Vec::new();
        let mut stack = vec![PathBuf::from(&self.config.watch_path)];

        while let Some(dir) = stack.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    error!(dir = %dir.display(), "error scanning directory: {}", e);
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if self.matches_extension(&path) {
                    matching.push(path);
                }
            }
        }

        matching.sort();
        matching
    }

    fn matches_extension(&self, path: &Path) -> bool {
        let name = path.file_name().map(|n| n.to_string_lossy().to_lowercase());
        let Some(name) = name else { return false };
        self.config
            .extensions
            .iter()
            .any(|ext| name.ends_with(&ext.to_lowercase()))
    }
}
