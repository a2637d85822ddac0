//! Single-flight deployment gate
//!
//! At most one push sequence runs at a time. A build that completes while a
//! sequence is already in flight is dropped, never queued: the runtime ends
//! up with the files of whichever build last went through, and the next
//! source change produces a fresh build anyway. Pending work is never
//! accumulated.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Phase of the in-flight push sequence, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployPhase {
    /// No sequence in flight.
    Idle,
    /// Ticket issued, work not started yet.
    Accepted,
    /// Holding the gate, suspended until a client connects.
    WaitingForClient,
    /// Pushing files and computing costs.
    Pushing,
}

#[derive(Debug)]
struct QueueState {
    phase: DeployPhase,
    build_started: Option<Instant>,
}

/// Gate admitting at most one push sequence at a time.
///
/// All phase mutation goes through [`DeployQueue::try_begin_push`] and the
/// returned [`PushTicket`]; nothing else touches the state.
#[derive(Debug, Clone)]
pub struct DeployQueue {
    state: Arc<Mutex<QueueState>>,
}

impl DeployQueue {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                phase: DeployPhase::Idle,
                build_started: None,
            })),
        }
    }

    /// Try to begin a push sequence.
    ///
    /// Returns `None` while another sequence is in flight, in which case the
    /// submission must be dropped. The test-and-set happens under one lock
    /// acquisition: there is no suspension point between deciding to accept
    /// and marking the gate busy.
    pub fn try_begin_push(&self) -> Option<PushTicket> {
        let mut state = self.state.lock().unwrap();
        if state.phase != DeployPhase::Idle {
            return None;
        }
        state.phase = DeployPhase::Accepted;
        Some(PushTicket {
            state: Arc::clone(&self.state),
        })
    }

    /// Current phase snapshot.
    pub fn phase(&self) -> DeployPhase {
        self.state.lock().unwrap().phase
    }

    /// Record when the current build started, for elapsed-time reporting at
    /// cycle end.
    pub fn note_build_started(&self) {
        self.state.lock().unwrap().build_started = Some(Instant::now());
    }

    /// Time since the last recorded build start.
    pub fn build_elapsed(&self) -> Option<Duration> {
        self.state.lock().unwrap().build_started.map(|t| t.elapsed())
    }
}

impl Default for DeployQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive permission to run one push sequence.
///
/// Release is automatic: dropping the ticket returns the gate to idle, on
/// success and failure paths alike. Holders record progress through the
/// `mark_*` methods so `DeployQueue::phase` stays truthful.
#[derive(Debug)]
pub struct PushTicket {
    state: Arc<Mutex<QueueState>>,
}

impl PushTicket {
    /// Record that the sequence is suspended waiting for a client.
    pub fn mark_waiting(&self) {
        self.state.lock().unwrap().phase = DeployPhase::WaitingForClient;
    }

    /// Record that files are being pushed.
    pub fn mark_pushing(&self) {
        self.state.lock().unwrap().phase = DeployPhase::Pushing;
    }
}

impl Drop for PushTicket {
    fn drop(&mut self) {
        self.state.lock().unwrap().phase = DeployPhase::Idle;
    }
}
