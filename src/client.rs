//! TCPB client: job specification plus the async job protocol.
//!
//! A job moves through
//!
//! ```text
//! Idle --send_job_async--> Submitted --check_job_complete--> Pending | Complete
//! Complete --recv_job_async--> Idle
//! ```
//!
//! Only one job may be in flight. Any failure that closes the connection
//! drops the client back to `Idle`.

mod compute;

pub use compute::CiOverlap;

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{ClientConfig, PollConfig};
use crate::error::{Result, TcpbError};
use crate::ipc::{Connection, ConnectionState, DEFAULT_SOCKET_TIMEOUT};
use crate::job::JobSpec;
use crate::models::{Endpoint, JobResult};
use crate::proto::{JobInput, JobOutput, MessageType, RunType, Status, UnitType};

/// Where the client is in the submit/poll/retrieve cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// No job in flight.
    Idle,
    /// Server accepted the job; not polled yet.
    Submitted,
    /// Last poll said the job is still running.
    Pending,
    /// Job finished; its output is waiting on the socket.
    Complete,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Submitted => "submitted",
            JobState::Pending => "pending",
            JobState::Complete => "complete",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Blocking client for one TCPB server.
///
/// Owns the connection, the persistent [`JobSpec`], and the job state.
/// Not shareable across threads without external locking.
///
/// # Example
///
/// ```ignore
/// use tcpb::{Endpoint, TcpbClient};
///
/// let mut client = TcpbClient::new(Endpoint::new("localhost", 11111)?);
/// client.connect()?;
/// let spec = client.job_spec_mut();
/// spec.set_atoms(["O", "H", "H"]);
/// spec.set_charge(0);
/// spec.set_spin_mult(1);
/// spec.set_closed(true);
/// spec.set_restricted(true);
/// spec.set_method("pbe0")?;
/// spec.set_basis("6-31g")?;
///
/// let energy = client.compute_energy(&geometry, false)?;
/// ```
#[derive(Debug)]
pub struct TcpbClient {
    connection: Connection,
    spec: JobSpec,
    state: JobState,
    poll: PollConfig,
    /// Run type and atom count of the job in flight, for checking its output.
    in_flight_run: RunType,
    in_flight_atoms: usize,
}

impl TcpbClient {
    /// Unconnected client with default timeouts and polling.
    pub fn new(endpoint: Endpoint) -> Self {
        Self::with_connection(Connection::new(endpoint, DEFAULT_SOCKET_TIMEOUT))
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let endpoint = Endpoint::new(config.host.clone(), config.port)?;
        let connection = Connection::new(endpoint, config.socket_timeout());
        Ok(Self::with_connection(connection).with_poll(config.poll))
    }

    /// Wrap an existing connection, connected or not.
    pub fn with_connection(connection: Connection) -> Self {
        Self {
            connection,
            spec: JobSpec::new(),
            state: JobState::Idle,
            poll: PollConfig::default(),
            in_flight_run: RunType::Energy,
            in_flight_atoms: 0,
        }
    }

    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn connect(&mut self) -> Result<()> {
        self.state = JobState::Idle;
        self.connection.connect()
    }

    /// Drop the connection. Any job in flight is abandoned.
    pub fn disconnect(&mut self) {
        if self.state != JobState::Idle {
            warn!(state = %self.state, "Disconnecting with a job in flight");
        }
        self.state = JobState::Idle;
        self.connection.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.connection.endpoint()
    }

    pub fn job_state(&self) -> JobState {
        self.state
    }

    pub fn job_spec(&self) -> &JobSpec {
        &self.spec
    }

    /// Mutable access to the persistent job specification.
    pub fn job_spec_mut(&mut self) -> &mut JobSpec {
        &mut self.spec
    }

    /// Whether the server is idle. Does not reserve it for a later submit.
    pub fn is_available(&mut self) -> Result<bool> {
        let available = self.connection.is_available();
        self.track(available)
    }

    /// Submit a job without waiting for it to run.
    ///
    /// Returns `Ok(false)` if the server declined the job because it is busy;
    /// the client stays `Idle` and the call can be repeated.
    ///
    /// # Errors
    ///
    /// `InvalidState` if a job is already in flight, `Precondition` or
    /// `InvalidValue` if the job cannot be built (nothing is sent in either
    /// case), `NotConnected`, and any transport or protocol failure.
    pub fn send_job_async(
        &mut self,
        run: RunType,
        geometry: &[[f64; 3]],
        units: UnitType,
    ) -> Result<bool> {
        self.ensure_idle("submit a job")?;
        let input = self.spec.to_job_input(run, geometry, units)?;
        self.submit(&input, geometry.len())
    }

    /// Send a built job and read the server's acknowledgement.
    fn submit(&mut self, input: &JobInput, atoms: usize) -> Result<bool> {
        if !self.connection.is_connected() {
            return Err(TcpbError::NotConnected);
        }

        let run = input.run();
        let ack = self
            .connection
            .send_message(MessageType::JobInput, input, "SendJobAsync() job input")
            .and_then(|()| {
                self.connection
                    .recv_message::<Status>(MessageType::Status, "SendJobAsync() status")
            });
        let ack = self.track(ack)?;

        if ack.accepted() {
            info!(%run, atoms, "Job accepted by server");
            self.state = JobState::Submitted;
            self.in_flight_run = run;
            self.in_flight_atoms = atoms;
            Ok(true)
        } else {
            info!(%run, busy = ack.busy, "Job not accepted, server is busy");
            Ok(false)
        }
    }

    /// Poll the server once for completion of the submitted job.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless a job is `Submitted` or `Pending`, plus any
    /// transport or protocol failure.
    pub fn check_job_complete(&mut self) -> Result<bool> {
        match self.state {
            JobState::Submitted | JobState::Pending => {}
            JobState::Complete => return Ok(true),
            JobState::Idle => {
                return Err(TcpbError::InvalidState {
                    operation: "check job completion",
                    state: self.state,
                })
            }
        }

        let status = self.connection.request_status("CheckJobComplete() status");
        let status = self.track(status)?;

        let complete = if status.completed() {
            true
        } else if status.working() {
            false
        } else {
            !status.busy
        };
        self.state = if complete {
            JobState::Complete
        } else {
            JobState::Pending
        };
        debug!(state = %self.state, busy = status.busy, "Polled job status");
        Ok(complete)
    }

    /// Receive the results of a completed job.
    ///
    /// Orbitals reported by the server become the warm start for the next
    /// job.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless the job is `Complete`; transport or protocol
    /// failures otherwise. A result that does not fit the submitted
    /// molecule, or lacks what its run type produces, is a protocol error
    /// and closes the connection.
    pub fn recv_job_async(&mut self) -> Result<JobResult> {
        if self.state != JobState::Complete {
            return Err(TcpbError::InvalidState {
                operation: "receive job output",
                state: self.state,
            });
        }

        let output = self
            .connection
            .recv_message::<JobOutput>(MessageType::JobOutput, "RecvJobAsync() job output");
        let output = self.track(output)?;
        self.state = JobState::Idle;

        let result = JobResult::from_output(output, self.in_flight_run, self.in_flight_atoms);
        let result = match result {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Discarding unusable job output");
                self.connection.close(ConnectionState::Closed);
                return Err(e);
            }
        };

        if let Some(orbitals) = &result.orbitals {
            debug!(alpha = %orbitals.alpha, "Storing orbitals for next warm start");
            self.spec.set_orbitals(Some(orbitals.clone()));
        }
        info!(job_id = result.server_job_id, energy = %result.energy_display(), "Received job output");
        Ok(result)
    }

    /// Submit a job and block until its results arrive.
    ///
    /// A busy server is retried, and completion polled, with exponential
    /// backoff; both share one deadline of `poll.max_wait_secs`.
    ///
    /// # Errors
    ///
    /// `JobTimeout` when the deadline passes, otherwise whatever the async
    /// primitives return. After a timeout the job stays in flight.
    pub fn compute_job_sync(
        &mut self,
        run: RunType,
        geometry: &[[f64; 3]],
        units: UnitType,
    ) -> Result<JobResult> {
        self.ensure_idle("submit a job")?;
        let input = self.spec.to_job_input(run, geometry, units)?;
        self.run_job(&input, geometry.len())
    }

    /// Submit `input`, wait for it, and receive its results.
    fn run_job(&mut self, input: &JobInput, atoms: usize) -> Result<JobResult> {
        // No deadline if the wait is too long to represent.
        let deadline = Instant::now().checked_add(self.poll.max_wait());

        let mut interval = self.poll.initial_interval();
        while !self.submit(input, atoms)? {
            self.backoff(deadline, &mut interval)?;
        }

        let mut interval = self.poll.initial_interval();
        while !self.check_job_complete()? {
            self.backoff(deadline, &mut interval)?;
        }

        self.recv_job_async()
    }

    fn backoff(&self, deadline: Option<Instant>, interval: &mut Duration) -> Result<()> {
        let mut sleep = *interval;
        if let Some(deadline) = deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(state = %self.state, "Gave up waiting on server");
                return Err(TcpbError::JobTimeout(self.poll.max_wait()));
            }
            sleep = sleep.min(remaining);
        }
        thread::sleep(sleep);
        *interval = self.poll.next_interval(*interval);
        Ok(())
    }

    fn ensure_idle(&self, operation: &'static str) -> Result<()> {
        if self.state == JobState::Idle {
            Ok(())
        } else {
            Err(TcpbError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Reset the job state when a failure cost us the connection.
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() && self.state != JobState::Idle {
                debug!(state = %self.state, "Connection lost, abandoning job");
                self.state = JobState::Idle;
            }
        }
        result
    }
}
