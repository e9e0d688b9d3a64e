//! Launching, watching and tearing down the peer processes.
//!
//! The [`Supervisor`] owns every child it starts. Cleanup goes through
//! [`Supervisor::terminate_all`], which may run any number of times; whatever
//! is still tracked when the supervisor is dropped gets killed outright.

pub mod ports;
pub mod readiness;

use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PeerCommand;
use crate::error::HarnessError;
use crate::role::{Role, RoleConfig};

pub use readiness::{LogSignalProbe, OutputLines, Readiness, ReadinessProbe};

const OUTPUT_BUFFER_LINES: usize = 256;

/// A running peer and the tasks draining its output.
pub struct ManagedProcess {
    role: Role,
    pid: Option<u32>,
    child: Child,
    output: OutputLines,
    drains: Vec<JoinHandle<()>>,
}

impl ManagedProcess {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// True until the child has been observed to exit.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn await_ready(
        &mut self,
        probe: &dyn ReadinessProbe,
        timeout: Duration,
    ) -> Result<Readiness, HarnessError> {
        enum Wake {
            Signalled(String),
            Exited(std::io::Result<ExitStatus>),
            Deadline,
        }

        let role = self.role;
        let wake = {
            let output = &mut self.output;
            let signalled = async move {
                match probe.wait_for_signal(output).await {
                    Some(evidence) => evidence,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                biased;
                evidence = signalled => Wake::Signalled(evidence),
                status = self.child.wait() => Wake::Exited(status),
                _ = tokio::time::sleep(timeout) => Wake::Deadline,
            }
        };

        let readiness = match wake {
            Wake::Signalled(evidence) => Readiness::Signalled { evidence },
            Wake::Deadline => Readiness::AssumedAfterTimeout { waited: timeout },
            Wake::Exited(status) => {
                return Err(HarnessError::NotReady {
                    role,
                    reason: describe_wait(status),
                })
            }
        };

        // A process that printed its banner and then died is not ready.
        match self.child.try_wait() {
            Ok(None) => Ok(readiness),
            Ok(Some(status)) => Err(HarnessError::NotReady {
                role,
                reason: describe_wait(Ok(status)),
            }),
            Err(err) => Err(HarnessError::NotReady {
                role,
                reason: format!("unable to query process state: {err}"),
            }),
        }
    }

    /// The pid, but only while the child has not been reaped. After that the
    /// id may belong to an unrelated process group.
    fn signalable_pid(&mut self) -> Option<u32> {
        if self.is_alive() { self.pid } else { None }
    }

    fn request_shutdown(&mut self) {
        if let Some(pid) = self.signalable_pid() {
            debug!(role = %self.role, pid, "sending SIGTERM to peer process group");
            terminate_group(pid);
        }
    }

    async fn reap(mut self, grace: Duration) {
        let role = self.role;
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(%role, status = %describe_exit_status(status), "peer exited");
            }
            Ok(Err(err)) => warn!(%role, error = %err, "failed to await peer process"),
            Err(_) => {
                warn!(%role, grace = ?grace, "peer ignored SIGTERM; killing");
                if let Some(pid) = self.pid {
                    kill_group(pid);
                }
                if let Err(err) = self.child.kill().await {
                    warn!(%role, error = %err, "failed to kill peer process");
                }
            }
        }
        for drain in self.drains.drain(..) {
            drain.abort();
        }
    }
}

pub struct Supervisor {
    peer: PeerCommand,
    processes: HashMap<Role, ManagedProcess>,
    known_ports: Vec<u16>,
    reclaim_ports: bool,
    termination_grace: Duration,
}

impl Supervisor {
    pub fn new(peer: PeerCommand, termination_grace: Duration) -> Self {
        Self {
            peer,
            processes: HashMap::new(),
            known_ports: Vec::new(),
            reclaim_ports: false,
            termination_grace,
        }
    }

    /// Also kill anything still bound to `ports` during cleanup.
    pub fn with_port_reclaim(mut self, ports: Vec<u16>) -> Self {
        self.known_ports = ports;
        self.reclaim_ports = true;
        self
    }

    pub fn is_tracked(&self, role: Role) -> bool {
        self.processes.contains_key(&role)
    }

    pub fn pid(&self, role: Role) -> Option<u32> {
        self.processes.get(&role).and_then(ManagedProcess::pid)
    }

    pub fn launch(&mut self, config: &RoleConfig) -> Result<&mut ManagedProcess, HarnessError> {
        let role = config.role;
        if let Some(existing) = self.processes.get_mut(&role) {
            if existing.is_alive() {
                return Err(HarnessError::AlreadyRunning { role });
            }
            if let Some(stale) = self.processes.remove(&role) {
                for drain in stale.drains {
                    drain.abort();
                }
            }
        }

        let launch_args = config.launch_args();
        let mut command = Command::new(&self.peer.program);
        command
            .args(&self.peer.args)
            .args(&launch_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.peer.working_dir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        command.process_group(0);

        info!(
            %role,
            program = %self.peer.program,
            args = ?launch_args,
            "launching peer"
        );

        let mut child = command.spawn().map_err(|source| HarnessError::Spawn {
            role,
            program: self.peer.program.clone(),
            source,
        })?;
        let pid = child.id();

        let (lines_tx, lines_rx) = broadcast::channel(OUTPUT_BUFFER_LINES);
        let mut drains = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            drains.push(tokio::spawn(forward_child_lines(
                role,
                "stdout",
                BufReader::new(stdout),
                Some(lines_tx),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(tokio::spawn(forward_child_lines(
                role,
                "stderr",
                BufReader::new(stderr),
                None,
            )));
        }

        debug!(%role, pid = ?pid, "peer spawned");
        let process = ManagedProcess {
            role,
            pid,
            child,
            output: OutputLines::new(lines_rx),
            drains,
        };
        Ok(self.processes.entry(role).or_insert(process))
    }

    /// Waits until `probe` fires, or until `timeout` passes with the process
    /// still alive. Fails if the process exits first.
    pub async fn await_ready(
        &mut self,
        role: Role,
        probe: &dyn ReadinessProbe,
        timeout: Duration,
    ) -> Result<Readiness, HarnessError> {
        let process = self
            .processes
            .get_mut(&role)
            .ok_or(HarnessError::NotRunning { role })?;
        process.await_ready(probe, timeout).await
    }

    /// SIGTERM every tracked peer, kill the ones that linger, then reclaim the
    /// known ports. Safe to call repeatedly.
    pub async fn terminate_all(&mut self) {
        let mut processes: Vec<ManagedProcess> =
            self.processes.drain().map(|(_, process)| process).collect();
        if processes.is_empty() && !self.reclaim_ports {
            return;
        }
        info!(tracked = processes.len(), "cleaning up peer processes");

        for process in processes.iter_mut() {
            process.request_shutdown();
        }
        for process in processes {
            process.reap(self.termination_grace).await;
        }
        if self.reclaim_ports {
            ports::reclaim(&self.known_ports).await;
        }
        info!(outcome = "success", "cleanup completed");
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        for (role, process) in self.processes.iter_mut() {
            if let Some(pid) = process.signalable_pid() {
                kill_group(pid);
                if let Err(err) = process.child.start_kill() {
                    debug!(%role, error = %err, "peer already gone at drop");
                }
            }
            for drain in process.drains.drain(..) {
                drain.abort();
            }
        }
    }
}

async fn forward_child_lines<R>(
    role: Role,
    stream: &'static str,
    mut reader: BufReader<R>,
    tap: Option<broadcast::Sender<String>>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                // Peers may print arbitrary bytes; keep draining regardless.
                let line = String::from_utf8_lossy(&buf);
                let trimmed = line.trim_end_matches(['\n', '\r']);
                if trimmed.is_empty() {
                    continue;
                }
                if stream == "stderr" && (trimmed.contains("error") || trimmed.contains("Error")) {
                    warn!(target: "mesh_harness::peer", %role, stream, message = trimmed);
                } else {
                    debug!(target: "mesh_harness::peer", %role, stream, message = trimmed);
                }
                if let Some(tap) = &tap {
                    // No receivers is fine; nobody is waiting for readiness.
                    let _ = tap.send(trimmed.to_string());
                }
            }
            Err(err) => {
                warn!(target: "mesh_harness::peer", %role, stream, error = %err, "failed to read peer output");
                break;
            }
        }
    }
}

fn describe_wait(status: std::io::Result<ExitStatus>) -> String {
    match status {
        Ok(status) => format!("process exited with {}", describe_exit_status(status)),
        Err(err) => format!("failed to wait on process: {err}"),
    }
}

pub fn describe_exit_status(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {code}");
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("signal {signal}");
        }
    }

    "unknown status".to_string()
}

#[cfg(unix)]
fn terminate_group(pid: u32) {
    signal_group(pid, libc::SIGTERM);
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    signal_group(pid, libc::SIGKILL);
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // Children are spawned as group leaders, so the group id is the pid.
    // SAFETY: kill(2) has no memory-safety preconditions.
    unsafe {
        libc::kill(-pgid, signal);
    }
}

#[cfg(unix)]
pub(crate) fn force_kill_pid(pid: u32) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    unsafe {
        libc::kill(pid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn terminate_group(_pid: u32) {}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

#[cfg(not(unix))]
pub(crate) fn force_kill_pid(_pid: u32) {}
