// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # System Metrics Collector
//!
//! Host snapshots (CPU, memory, storage, OS, GPU) bound to a pipeline
//! run. Every sub-collector is resilient: a host-API fault yields a
//! zero-valued struct instead of an error. OS information is cached after
//! the first collection since it cannot change within a run.
//!
//! GPU detection probes for a CUDA runtime library first and falls back to
//! the `nvidia-smi` CLI; with both absent the snapshot reports
//! `cuda_available = false`.
//!
//! The optional background monitor samples on its own OS thread into a
//! bounded history (cap 1000); starting it twice is a no-op with a
//! warning and `stop_monitoring` joins the sampler thread.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{Disks, System};
use tracing::{debug, warn};

use clinipipe_domain::entities::SystemMetric;

const HISTORY_CAP: usize = 1000;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CpuInfo {
    pub model: String,
    pub logical_cores: u64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryInfo {
    pub total_gb: f64,
    pub available_gb: f64,
    pub used_percent: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StorageInfo {
    pub total_gb: f64,
    pub available_gb: f64,
    pub disk_count: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OsInfo {
    pub name: String,
    pub version: String,
    pub kernel: String,
    pub hostname: String,
    pub runtime_version: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GpuInfo {
    pub cuda_available: bool,
    pub model: Option<String>,
}

/// Point-in-time host snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SystemSnapshot {
    pub cpu: CpuInfo,
    pub memory: MemoryInfo,
    pub storage: StorageInfo,
    pub os: OsInfo,
    pub gpu: GpuInfo,
    pub timestamp: DateTime<Utc>,
}

struct MonitorHandle {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Resilient host metrics collector with an optional background sampler.
pub struct SystemMetricsCollector {
    gpu_detection: bool,
    os_cache: Mutex<Option<OsInfo>>,
    history: Arc<Mutex<VecDeque<SystemSnapshot>>>,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl SystemMetricsCollector {
    pub fn new(gpu_detection: bool) -> Self {
        Self {
            gpu_detection,
            os_cache: Mutex::new(None),
            history: Arc::new(Mutex::new(VecDeque::new())),
            monitor: Mutex::new(None),
        }
    }

    /// Collects one full snapshot. Never fails; unavailable sub-systems
    /// come back zeroed.
    pub fn get_system_snapshot(&self) -> SystemSnapshot {
        let mut sys = System::new_all();
        sys.refresh_all();

        SystemSnapshot {
            cpu: Self::collect_cpu(&sys),
            memory: Self::collect_memory(&sys),
            storage: Self::collect_storage(),
            os: self.collect_os_cached(),
            gpu: if self.gpu_detection {
                Self::collect_gpu()
            } else {
                GpuInfo::default()
            },
            timestamp: Utc::now(),
        }
    }

    fn collect_cpu(sys: &System) -> CpuInfo {
        let cpus = sys.cpus();
        if cpus.is_empty() {
            return CpuInfo::default();
        }
        let usage = cpus.iter().map(|c| c.cpu_usage() as f64).sum::<f64>() / cpus.len() as f64;
        CpuInfo {
            model: cpus[0].brand().to_string(),
            logical_cores: cpus.len() as u64,
            usage_percent: usage,
        }
    }

    fn collect_memory(sys: &System) -> MemoryInfo {
        let total = sys.total_memory();
        if total == 0 {
            return MemoryInfo::default();
        }
        let available = sys.available_memory();
        let used = total.saturating_sub(available);
        MemoryInfo {
            total_gb: bytes_to_gb(total),
            available_gb: bytes_to_gb(available),
            used_percent: used as f64 / total as f64 * 100.0,
        }
    }

    fn collect_storage() -> StorageInfo {
        let disks = Disks::new_with_refreshed_list();
        let mut info = StorageInfo::default();
        for disk in disks.list() {
            info.total_gb += bytes_to_gb(disk.total_space());
            info.available_gb += bytes_to_gb(disk.available_space());
            info.disk_count += 1;
        }
        info
    }

    fn collect_os_cached(&self) -> OsInfo {
        let mut cache = self.os_cache.lock();
        if let Some(cached) = cache.as_ref() {
            return cached.clone();
        }
        let info = OsInfo {
            name: System::name().unwrap_or_default(),
            version: System::os_version().unwrap_or_default(),
            kernel: System::kernel_version().unwrap_or_default(),
            hostname: System::host_name().unwrap_or_default(),
            runtime_version: format!("clinipipe {} ({})", env!("CARGO_PKG_VERSION"), std::env::consts::ARCH),
        };
        *cache = Some(info.clone());
        info
    }

    fn collect_gpu() -> GpuInfo {
        // CUDA runtime library first; the CLI probe is the fallback.
        if let Some(model) = Self::probe_cuda_runtime().or_else(Self::probe_nvidia_smi) {
            return GpuInfo {
                cuda_available: true,
                model: Some(model),
            };
        }
        GpuInfo {
            cuda_available: false,
            model: None,
        }
    }

    fn probe_cuda_runtime() -> Option<String> {
        const CANDIDATES: [&str; 3] = [
            "/usr/lib/x86_64-linux-gnu/libcuda.so.1",
            "/usr/lib64/libcuda.so.1",
            "/usr/local/cuda/lib64/libcudart.so",
        ];
        if CANDIDATES.iter().any(|p| std::path::Path::new(p).exists()) {
            // The runtime reveals presence, not the device name; the CLI
            // fills that in when available.
            return Some(Self::probe_nvidia_smi().unwrap_or_else(|| "CUDA device".to_string()));
        }
        None
    }

    fn probe_nvidia_smi() -> Option<String> {
        let output = std::process::Command::new("nvidia-smi")
            .args(["--query-gpu=name", "--format=csv,noheader"])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let name = String::from_utf8_lossy(&output.stdout).lines().next()?.trim().to_string();
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }

    /// Converts a snapshot into the persisted entity form.
    pub fn to_system_metric(&self, pipeline_run_id: &str, snapshot: &SystemSnapshot) -> SystemMetric {
        let mut metric = SystemMetric::unavailable(pipeline_run_id);
        metric.hostname = snapshot.os.hostname.clone();
        metric.os_name = snapshot.os.name.clone();
        metric.os_version = snapshot.os.version.clone();
        metric.runtime_version = snapshot.os.runtime_version.clone();
        metric.cpu_model = snapshot.cpu.model.clone();
        metric.cpu_cores = snapshot.cpu.logical_cores as i64;
        metric.memory_total_gb = snapshot.memory.total_gb;
        metric.gpu_available = snapshot.gpu.cuda_available;
        metric.gpu_model = snapshot.gpu.model.clone();
        metric.additional_info.insert(
            "storage_total_gb".to_string(),
            serde_json::json!(snapshot.storage.total_gb),
        );
        metric
            .additional_info
            .insert("kernel".to_string(), serde_json::json!(snapshot.os.kernel));
        metric.timestamp = snapshot.timestamp;
        metric
    }

    // -- Background monitor ----------------------------------------------

    /// Starts the background sampler. A second start is a no-op with a
    /// warning.
    pub fn start_monitoring(self: &Arc<Self>, interval: Duration) {
        let mut monitor = self.monitor.lock();
        if monitor.is_some() {
            warn!("system metrics monitor already running; start ignored");
            return;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let collector = Arc::clone(self);
        let history = Arc::clone(&self.history);

        let thread = std::thread::Builder::new()
            .name("system-metrics-sampler".to_string())
            .spawn(move || {
                debug!("system metrics sampler started");
                while !stop_flag.load(Ordering::SeqCst) {
                    let snapshot = collector.get_system_snapshot();
                    {
                        let mut history = history.lock();
                        if history.len() >= HISTORY_CAP {
                            history.pop_front();
                        }
                        history.push_back(snapshot);
                    }
                    // Sleep in short slices so stop requests are prompt.
                    let mut remaining = interval;
                    while !stop_flag.load(Ordering::SeqCst) && remaining > Duration::ZERO {
                        let slice = remaining.min(Duration::from_millis(50));
                        std::thread::sleep(slice);
                        remaining = remaining.saturating_sub(slice);
                    }
                }
                debug!("system metrics sampler stopped");
            })
            .expect("sampler thread spawn");

        *monitor = Some(MonitorHandle { stop, thread });
    }

    /// Stops the sampler and joins its thread.
    pub fn stop_monitoring(&self) {
        let handle = self.monitor.lock().take();
        if let Some(handle) = handle {
            handle.stop.store(true, Ordering::SeqCst);
            if handle.thread.join().is_err() {
                warn!("system metrics sampler thread panicked");
            }
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.lock().is_some()
    }

    /// Snapshot history collected by the background monitor.
    pub fn history(&self) -> Vec<SystemSnapshot> {
        self.history.lock().iter().cloned().collect()
    }
}

impl Drop for SystemMetricsCollector {
    fn drop(&mut self) {
        // Unconditional: a leaked sampler thread would outlive the run.
        self.stop_monitoring();
    }
}

fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0 * 1024.0)
}
