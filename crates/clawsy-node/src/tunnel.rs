//! SSH port-forward fallback.
//!
//! When the gateway cannot be reached directly the engine forwards a fixed
//! local port to the gateway's loopback interface over SSH:
//!
//! `ssh -NT -L <local>:127.0.0.1:<remote> user@host -o ConnectTimeout=10 -o BatchMode=yes ...`
//!
//! The [`TunnelSupervisor`] makes sure only one start is in flight, and that
//! a process which dies inside its grace period is never adopted.

use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::time;

use clawsy_core::{NodeError, NodeResult};

/// What to forward, and through whom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    pub ssh_user: String,
    pub host: String,
    pub remote_port: u16,
    pub local_port: u16,
}

impl TunnelSpec {
    /// Arguments passed to `ssh`.
    pub fn args(&self) -> Vec<String> {
        vec![
            "-NT".into(),
            "-L".into(),
            format!("{}:127.0.0.1:{}", self.local_port, self.remote_port),
            format!("{}@{}", self.ssh_user, self.host),
            "-o".into(),
            "ConnectTimeout=10".into(),
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            "StrictHostKeyChecking=no".into(),
            "-o".into(),
            "ExitOnForwardFailure=yes".into(),
        ]
    }
}

/// Why a tunnel could not be brought up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelFailure {
    /// Fallback wanted but no SSH user configured.
    MissingUser,
    /// The `ssh` process could not be spawned.
    SpawnFailed(String),
    /// The process exited within the grace period.
    Exited,
}

impl fmt::Display for TunnelFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingUser => f.write_str("SSH_USER_MISSING"),
            Self::SpawnFailed(e) => write!(f, "could not start ssh: {e}"),
            Self::Exited => f.write_str("ssh tunnel exited during startup"),
        }
    }
}

/// A running tunnel process.
pub trait TunnelProcess: Send {
    fn is_alive(&mut self) -> bool;
    fn kill(&mut self);
}

/// Spawns tunnel processes. Abstracted so the engine can be tested without `ssh`.
#[async_trait]
pub trait TunnelLauncher: Send + Sync {
    /// Kill whatever holds `port` locally (a stale tunnel from an earlier run).
    async fn free_port(&self, port: u16);

    fn launch(&self, spec: &TunnelSpec) -> NodeResult<Box<dyn TunnelProcess>>;
}

/// Launches the system `ssh` binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct SshLauncher;

#[async_trait]
impl TunnelLauncher for SshLauncher {
    async fn free_port(&self, port: u16) {
        let output = Command::new("lsof")
            .arg("-t")
            .arg(format!("-i:{port}"))
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await;

        let output = match output {
            Ok(o) => o,
            Err(e) => {
                tracing::debug!(port, error = %e, "lsof unavailable, not freeing port");
                return;
            }
        };

        for pid in String::from_utf8_lossy(&output.stdout)
            .split_whitespace()
            .filter(|p| p.chars().all(|c| c.is_ascii_digit()))
        {
            tracing::debug!(port, pid, "killing stale port holder");
            let _ = Command::new("kill")
                .arg("-9")
                .arg(pid)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
        }
    }

    fn launch(&self, spec: &TunnelSpec) -> NodeResult<Box<dyn TunnelProcess>> {
        let child = Command::new("ssh")
            .args(spec.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| NodeError::Tunnel(e.to_string()))?;
        tracing::info!(
            pid = child.id(),
            host = %spec.host,
            local_port = spec.local_port,
            "ssh tunnel spawned"
        );
        Ok(Box::new(SshProcess { child }))
    }
}

struct SshProcess {
    child: Child,
}

impl TunnelProcess for SshProcess {
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn kill(&mut self) {
        let _ = self.child.start_kill();
    }
}

/// Outcome of one start, delivered back to the supervisor's owner.
pub struct TunnelReport {
    pub epoch: u64,
    pub result: Result<Box<dyn TunnelProcess>, TunnelFailure>,
}

impl fmt::Debug for TunnelReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelReport")
            .field("epoch", &self.epoch)
            .field("ok", &self.result.is_ok())
            .finish()
    }
}

/// Owns the tunnel process and serializes start attempts.
pub struct TunnelSupervisor {
    launcher: Arc<dyn TunnelLauncher>,
    process: Option<Box<dyn TunnelProcess>>,
    epoch: u64,
    starting: bool,
}

impl TunnelSupervisor {
    pub fn new(launcher: Arc<dyn TunnelLauncher>) -> Self {
        Self {
            launcher,
            process: None,
            epoch: 0,
            starting: false,
        }
    }

    pub fn is_starting(&self) -> bool {
        self.starting
    }

    #[cfg(test)]
    fn is_running(&mut self) -> bool {
        self.process.as_mut().is_some_and(|p| p.is_alive())
    }

    /// Start a tunnel in the background. `notify` receives the report after
    /// the grace period. Returns false if a start is already in flight.
    pub fn begin<F>(&mut self, spec: TunnelSpec, grace: Duration, notify: F) -> bool
    where
        F: FnOnce(TunnelReport) + Send + 'static,
    {
        if self.starting {
            return false;
        }
        self.kill_process();
        self.starting = true;
        self.epoch += 1;

        let epoch = self.epoch;
        let launcher = self.launcher.clone();
        tokio::spawn(async move {
            launcher.free_port(spec.local_port).await;
            let result = match launcher.launch(&spec) {
                Ok(mut process) => {
                    time::sleep(grace).await;
                    if process.is_alive() {
                        Ok(process)
                    } else {
                        Err(TunnelFailure::Exited)
                    }
                }
                Err(e) => Err(TunnelFailure::SpawnFailed(e.to_string())),
            };
            notify(TunnelReport { epoch, result });
        });
        true
    }

    /// Apply a report. Returns `None` for reports from a start that was
    /// stopped or superseded (their process is killed).
    pub fn settle(&mut self, report: TunnelReport) -> Option<Result<(), TunnelFailure>> {
        if report.epoch != self.epoch || !self.starting {
            if let Ok(mut process) = report.result {
                process.kill();
            }
            return None;
        }
        self.starting = false;
        match report.result {
            Ok(process) => {
                self.process = Some(process);
                Some(Ok(()))
            }
            Err(failure) => Some(Err(failure)),
        }
    }

    /// Kill the tunnel and invalidate any start in flight.
    pub fn stop(&mut self) {
        self.epoch += 1;
        self.starting = false;
        self.kill_process();
    }

    fn kill_process(&mut self) {
        if let Some(mut process) = self.process.take() {
            tracing::debug!("killing ssh tunnel");
            process.kill();
        }
    }
}

impl Drop for TunnelSupervisor {
    fn drop(&mut self) {
        self.kill_process();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Scripted launcher driven by its flags.
    #[derive(Default)]
    pub struct FakeLauncher {
        pub launches: AtomicUsize,
        pub freed: AtomicUsize,
        pub fail_spawn: AtomicBool,
        pub die_on_start: AtomicBool,
        pub killed: Arc<AtomicUsize>,
    }

    pub struct FakeProcess {
        alive: bool,
        killed: Arc<AtomicUsize>,
    }

    impl TunnelProcess for FakeProcess {
        fn is_alive(&mut self) -> bool {
            self.alive
        }

        fn kill(&mut self) {
            if self.alive {
                self.alive = false;
                self.killed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[async_trait]
    impl TunnelLauncher for FakeLauncher {
        async fn free_port(&self, _port: u16) {
            self.freed.fetch_add(1, Ordering::SeqCst);
        }

        fn launch(&self, _spec: &TunnelSpec) -> NodeResult<Box<dyn TunnelProcess>> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            if self.fail_spawn.load(Ordering::SeqCst) {
                return Err(NodeError::Tunnel("ssh not found".into()));
            }
            Ok(Box::new(FakeProcess {
                alive: !self.die_on_start.load(Ordering::SeqCst),
                killed: self.killed.clone(),
            }))
        }
    }
}
