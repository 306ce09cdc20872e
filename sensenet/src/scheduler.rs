//! Retransmission scheduler.
//!
//! One [`RetransmitState`] per outstanding reading:
//!
//! ```text
//! PendingSend --mark_sent--> AwaitingAck --ack--> (destroyed, Delivered)
//!      ^                    |
//!      |                timer fire
//!      |                    |
//!      +---- attempts < max_attempts
//!                           |
//!                attempts == max_attempts --> (destroyed, Failed)
//! ```
//!
//! The scheduler is a pure state machine: it never touches the radio. The
//! node asks it what to do and performs the send itself.

use hashbrown::HashMap;

use crate::time::{Duration, Timestamp};
use crate::timer::{TimerHandle, TimerKind, TimerTable};
use crate::traits::Random;
use crate::types::{Error, Message, MsgId, NodeAddr};

/// Delay before retrying a transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Same interval for every attempt, +/- `jitter_percent`.
    Fixed {
        interval: Duration,
        jitter_percent: u8,
    },
    /// `base * 2^min(attempt - 1, max_exponent)`, +/- `jitter_percent`.
    Exponential {
        base: Duration,
        max_exponent: u8,
        jitter_percent: u8,
    },
}

impl BackoffPolicy {
    /// Interval before jitter and doubling.
    pub fn base(&self) -> Duration {
        match *self {
            BackoffPolicy::Fixed { interval, .. } => interval,
            BackoffPolicy::Exponential { base, .. } => base,
        }
    }

    pub fn jitter_percent(&self) -> u8 {
        match *self {
            BackoffPolicy::Fixed { jitter_percent, .. }
            | BackoffPolicy::Exponential { jitter_percent, .. } => jitter_percent,
        }
    }

    /// Un-jittered delay after transmission number `attempt` (1-based).
    pub fn nominal(&self, attempt: u8) -> Duration {
        match *self {
            BackoffPolicy::Fixed { interval, .. } => interval,
            BackoffPolicy::Exponential {
                base, max_exponent, ..
            } => {
                let exp = attempt.saturating_sub(1).min(max_exponent).min(63);
                base.saturating_mul(1u64 << exp)
            }
        }
    }

    /// Jittered delay after transmission number `attempt`.
    pub fn delay<R: Random>(&self, attempt: u8, random: &mut R) -> Duration {
        let nominal = self.nominal(attempt);
        let jitter = nominal.percent(self.jitter_percent());
        if jitter.is_zero() {
            return nominal;
        }
        let span = jitter.as_millis().saturating_mul(2).saturating_add(1);
        let offset = Duration::from_millis(random.gen_range(0, span));
        (nominal - jitter) + offset
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetransmitPhase {
    /// Waiting to be (re)sent.
    PendingSend,
    /// Sent; retry timer running.
    AwaitingAck,
}

/// Bookkeeping for one outstanding reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetransmitState {
    pub msg_id: MsgId,
    /// Transmission slots used so far (including ones skipped for lack of a route).
    pub attempts: u8,
    pub max_attempts: u8,
    pub deadline: Option<Timestamp>,
    pub phase: RetransmitPhase,
    pub timer: Option<TimerHandle>,
    /// Message body, resent unchanged.
    pub message: Message,
    /// Next hop of the last transmission.
    pub next_hop: Option<NodeAddr>,
    pub submitted_at: Timestamp,
}

/// What the node must do after a retransmission timer fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerOutcome {
    /// Send the message again (same msg_id).
    Resend(Message),
    /// Attempts exhausted. State has been destroyed.
    Failed(RetransmitState),
    /// Handle unknown: already acknowledged, failed, or cancelled.
    Stale,
}

/// Outstanding readings of a sensor, keyed by msg_id.
#[derive(Debug)]
pub struct RetransmitScheduler {
    states: HashMap<MsgId, RetransmitState>,
    by_timer: HashMap<TimerHandle, MsgId>,
    max_pending: usize,
    max_attempts: u8,
    backoff: BackoffPolicy,
}

impl RetransmitScheduler {
    pub fn new(max_pending: usize, max_attempts: u8, backoff: BackoffPolicy) -> Self {
        Self {
            states: HashMap::new(),
            by_timer: HashMap::new(),
            max_pending: max_pending.max(1),
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn has_capacity(&self) -> bool {
        self.states.len() < self.max_pending
    }

    pub fn contains(&self, msg_id: MsgId) -> bool {
        self.states.contains_key(&msg_id)
    }

    pub fn get(&self, msg_id: MsgId) -> Option<&RetransmitState> {
        self.states.get(&msg_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RetransmitState> + '_ {
        self.states.values()
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Create state for a new message in `PendingSend`.
    pub fn submit(&mut self, message: Message, now: Timestamp) -> Result<(), Error> {
        // A wrapped msg_id still in flight counts as a full table.
        if !self.has_capacity() || self.states.contains_key(&message.msg_id) {
            return Err(Error::TooManyPending);
        }
        self.states.insert(
            message.msg_id,
            RetransmitState {
                msg_id: message.msg_id,
                attempts: 0,
                max_attempts: self.max_attempts,
                deadline: None,
                phase: RetransmitPhase::PendingSend,
                timer: None,
                message,
                next_hop: None,
                submitted_at: now,
            },
        );
        Ok(())
    }

    /// Consume one attempt and start the retry timer.
    ///
    /// `next_hop` is where the frame went, or `None` if the attempt was
    /// skipped because no route was known. Returns `(attempt, deadline)`.
    pub fn mark_sent<R: Random>(
        &mut self,
        msg_id: MsgId,
        next_hop: Option<NodeAddr>,
        now: Timestamp,
        timers: &mut TimerTable,
        random: &mut R,
    ) -> Option<(u8, Timestamp)> {
        let state = self.states.get_mut(&msg_id)?;
        if state.phase != RetransmitPhase::PendingSend {
            return None;
        }

        state.attempts = state.attempts.saturating_add(1).min(state.max_attempts);
        state.next_hop = next_hop;
        let deadline = now + self.backoff.delay(state.attempts, random);
        let handle = timers.schedule(deadline, TimerKind::Retransmit(msg_id));
        state.deadline = Some(deadline);
        state.timer = Some(handle);
        state.phase = RetransmitPhase::AwaitingAck;
        self.by_timer.insert(handle, msg_id);

        Some((state.attempts, deadline))
    }

    /// A retransmission timer fired.
    pub fn on_timer(&mut self, handle: TimerHandle) -> TimerOutcome {
        let Some(msg_id) = self.by_timer.remove(&handle) else {
            return TimerOutcome::Stale;
        };
        let Some(state) = self.states.get_mut(&msg_id) else {
            return TimerOutcome::Stale;
        };
        if state.timer != Some(handle) {
            return TimerOutcome::Stale;
        }

        state.timer = None;
        state.deadline = None;
        if state.attempts < state.max_attempts {
            state.phase = RetransmitPhase::PendingSend;
            return TimerOutcome::Resend(state.message);
        }

        match self.states.remove(&msg_id) {
            Some(state) => TimerOutcome::Failed(state),
            None => TimerOutcome::Stale,
        }
    }

    /// A matching ACK arrived: cancel the timer and destroy the state.
    ///
    /// Returns `None` for late or duplicate ACKs.
    pub fn on_ack(&mut self, msg_id: MsgId, timers: &mut TimerTable) -> Option<RetransmitState> {
        let state = self.states.remove(&msg_id)?;
        if let Some(handle) = state.timer {
            timers.cancel(handle);
            self.by_timer.remove(&handle);
        }
        Some(state)
    }
}
