//! Background daemon for periodic sync.
//!
//! Plays the host scheduler for the engine: runs a pass on an interval
//! without requiring system scheduler configuration.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use tokio::time::interval;

use crate::app::{AppContext, Result, SyncError};
use crate::domain::SyncEvent;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Sync interval in seconds (default: 3600 = 1 hour)
    pub update_interval_secs: u64,
    /// Whether to sync immediately on start
    pub update_on_start: bool,
    /// Log file path (None = stdout)
    pub log_file: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: 3600, // 1 hour
            update_on_start: true,
            log_file: None,
        }
    }
}

/// Interval suffixes, largest unit first.
const UNITS: [(char, u64); 4] = [('d', 86400), ('h', 3600), ('m', 60), ('s', 1)];

impl DaemonConfig {
    /// Parse interval string like "1h", "30m", "6h", "1d"; bare numbers are seconds.
    pub fn parse_interval(s: &str) -> std::result::Result<u64, String> {
        let s = s.trim().to_lowercase();
        let (digits, scale) = UNITS
            .iter()
            .find_map(|&(suffix, scale)| s.strip_suffix(suffix).map(|d| (d, scale)))
            .unwrap_or((s.as_str(), 1));

        digits
            .parse::<u64>()
            .ok()
            .and_then(|n| n.checked_mul(scale))
            .ok_or_else(|| format!("Invalid interval: {}. Use format like '1h', '30m', '1d'", s))
    }

    /// Format interval using the largest unit that divides it.
    pub fn format_interval(secs: u64) -> String {
        let (suffix, scale) = UNITS
            .iter()
            .copied()
            .find(|&(_, scale)| secs >= scale && secs % scale == 0)
            .unwrap_or(('s', 1));
        format!("{}{}", secs / scale, suffix)
    }
}

/// Daemon runner
pub struct Daemon {
    ctx: Arc<AppContext>,
    config: DaemonConfig,
    running: Arc<AtomicBool>,
}

impl Daemon {
    pub fn new(ctx: Arc<AppContext>, config: DaemonConfig) -> Self {
        Self {
            ctx,
            config,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Get the PID file path
    pub fn pid_file_path() -> Option<PathBuf> {
        dirs::runtime_dir()
            .or_else(dirs::cache_dir)
            .map(|d| d.join("feedsync").join("daemon.pid"))
    }

    /// Check if another daemon is already running
    pub fn is_running() -> bool {
        Self::pid_file_path()
            .and_then(|path| read_pid(&path))
            .is_some_and(Self::process_exists)
    }

    #[cfg(unix)]
    fn process_exists(pid: u32) -> bool {
        use std::process::Command;
        Command::new("kill")
            .args(["-0", &pid.to_string()])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[cfg(windows)]
    fn process_exists(pid: u32) -> bool {
        use std::process::Command;
        Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid)])
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }

    fn write_pid_file(&self) -> std::io::Result<()> {
        if let Some(pid_path) = Self::pid_file_path() {
            if let Some(parent) = pid_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = fs::File::create(&pid_path)?;
            writeln!(file, "{}", std::process::id())?;
        }
        Ok(())
    }

    fn remove_pid_file(&self) {
        if let Some(pid_path) = Self::pid_file_path() {
            let _ = fs::remove_file(pid_path);
        }
    }

    /// Log a message with timestamp
    fn log(&self, msg: &str) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let line = format!("[{}] {}", timestamp, msg);

        if let Some(ref log_path) = self.config.log_file {
            if let Ok(mut file) = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)
            {
                let _ = writeln!(file, "{}", line);
            }
        } else {
            println!("{}", line);
        }
    }

    /// Turn SIGTERM/SIGINT into a soft interrupt of the running pass.
    fn install_signal_handlers(&self) -> Result<()> {
        let running = self.running.clone();
        let engine = self.ctx.engine.clone();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = signal(SignalKind::terminate())
                .map_err(|e| SyncError::Other(format!("Failed to set up SIGTERM handler: {}", e)))?;
            let mut sigint = signal(SignalKind::interrupt())
                .map_err(|e| SyncError::Other(format!("Failed to set up SIGINT handler: {}", e)))?;
            tokio::spawn(async move {
                tokio::select! {
                    _ = sigterm.recv() => {},
                    _ = sigint.recv() => {},
                }
                running.store(false, Ordering::SeqCst);
                engine.soft_interrupt();
            });
        }

        #[cfg(windows)]
        {
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                running.store(false, Ordering::SeqCst);
                engine.soft_interrupt();
            });
        }

        Ok(())
    }

    /// Run the daemon
    pub async fn run(&self) -> Result<()> {
        if Self::is_running() {
            return Err(SyncError::Other(
                "Another daemon instance is already running".to_string(),
            ));
        }

        self.write_pid_file()
            .map_err(|e| SyncError::Other(format!("Failed to write PID file: {}", e)))?;
        self.install_signal_handlers()?;

        // Nobody is looking at the data while the daemon runs.
        self.ctx.engine.set_foreground(false);

        self.log(&format!(
            "feedsync daemon started (sync interval: {}, PID: {})",
            DaemonConfig::format_interval(self.config.update_interval_secs),
            std::process::id()
        ));

        if self.config.update_on_start {
            self.log("Running initial sync...");
            self.run_update().await;
        }

        let mut timer = interval(Duration::from_secs(self.config.update_interval_secs.max(1)));
        timer.tick().await; // Skip the first immediate tick

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = timer.tick() => {},
                _ = self.wait_for_stop() => break,
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            if self.ctx.config.reading.background_sync_enabled {
                self.log("Running scheduled sync...");
                self.run_update().await;
            }
        }

        self.log("Daemon shutting down...");
        self.remove_pid_file();

        Ok(())
    }

    async fn wait_for_stop(&self) {
        while self.running.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    /// Run one pass and wait for its workers.
    async fn run_update(&self) {
        let start = Utc::now();
        let mut events = self.ctx.engine.subscribe();

        self.ctx.engine.sync_now().await;

        let mut errors = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                SyncEvent::Error(msg) => {
                    errors += 1;
                    self.log(&format!("  Error: {}", msg));
                }
                SyncEvent::LoggedOut => self.log("  Session rejected; local data was cleared"),
                SyncEvent::Notify(hashes) => {
                    self.log(&format!("  {} stories to notify about", hashes.len()))
                }
                SyncEvent::Update(_) => {}
            }
        }

        let pending = self
            .ctx
            .store
            .call(|s| s.untried_action_count())
            .await
            .unwrap_or_default();
        let elapsed = Utc::now().signed_duration_since(start);
        self.log(&format!(
            "Sync complete: {} actions pending, {} errors ({:.1}s)",
            pending,
            errors,
            elapsed.num_milliseconds() as f64 / 1000.0
        ));
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Stop a running daemon by reading PID file and sending signal.
///
/// The daemon finishes the pass in progress before it exits.
pub fn stop_daemon() -> std::result::Result<(), String> {
    let pid_path =
        Daemon::pid_file_path().ok_or_else(|| "Could not determine PID file path".to_string())?;

    if !pid_path.exists() {
        return Err("No daemon is running (PID file not found)".to_string());
    }
    let pid = read_pid(&pid_path).ok_or_else(|| "Invalid PID in PID file".to_string())?;

    #[cfg(unix)]
    let status = std::process::Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status()
        .map_err(|e| format!("Failed to send signal: {}", e))?;

    #[cfg(windows)]
    let status = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string()])
        .status()
        .map_err(|e| format!("Failed to stop process: {}", e))?;

    if status.success() {
        Ok(())
    } else {
        Err(format!("Failed to stop daemon (PID {})", pid))
    }
}

/// Check daemon status
pub fn daemon_status() -> String {
    describe_pid_file(Daemon::pid_file_path().as_deref(), Daemon::process_exists)
}

fn describe_pid_file(pid_path: Option<&Path>, alive: impl Fn(u32) -> bool) -> String {
    match pid_path.filter(|p| p.exists()).map(read_pid) {
        Some(Some(pid)) if alive(pid) => format!("Daemon is running (PID: {})", pid),
        Some(Some(_)) => "Daemon is not running (stale PID file)".to_string(),
        _ => "Daemon is not running".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interval() {
        assert_eq!(DaemonConfig::parse_interval("1h").unwrap(), 3600);
        assert_eq!(DaemonConfig::parse_interval("30m").unwrap(), 1800);
        assert_eq!(DaemonConfig::parse_interval("1d").unwrap(), 86400);
        assert_eq!(DaemonConfig::parse_interval("60s").unwrap(), 60);
        assert_eq!(DaemonConfig::parse_interval("3600").unwrap(), 3600);
        assert_eq!(DaemonConfig::parse_interval("6h").unwrap(), 21600);
        assert!(DaemonConfig::parse_interval("invalid").is_err());
        assert!(DaemonConfig::parse_interval("99999999999999999d").is_err());
    }

    #[test]
    fn test_describe_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");

        assert_eq!(describe_pid_file(Some(&path), |_| true), "Daemon is not running");

        fs::write(&path, "4242\n").unwrap();
        assert_eq!(read_pid(&path), Some(4242));
        assert_eq!(
            describe_pid_file(Some(&path), |pid| pid == 4242),
            "Daemon is running (PID: 4242)"
        );
        assert_eq!(
            describe_pid_file(Some(&path), |_| false),
            "Daemon is not running (stale PID file)"
        );

        fs::write(&path, "garbage").unwrap();
        assert_eq!(describe_pid_file(Some(&path), |_| true), "Daemon is not running");
    }

    #[test]
    fn test_format_interval() {
        assert_eq!(DaemonConfig::format_interval(3600), "1h");
        assert_eq!(DaemonConfig::format_interval(1800), "30m");
        assert_eq!(DaemonConfig::format_interval(86400), "1d");
        assert_eq!(DaemonConfig::format_interval(90), "90s");
        assert_eq!(DaemonConfig::format_interval(7200), "2h");
    }
}
