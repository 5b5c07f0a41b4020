//! Microphone arbitration
//!
//! `MicArbiter` owns the single capture lease. A holder may only release its
//! lease after its capture process has exited and its stream is closed, so a
//! successful `acquire` is proof that the device is free.
//!
//! Across holders the order is always
//! Wake-released → Capture-acquired → Capture-released → Wake-acquired.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Transitions kept for inspection
const HISTORY_LIMIT: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Holder {
    /// Continuous wake-word stream
    Wake,
    /// One bounded speech capture
    Capture,
}

/// Current ownership of the microphone
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MicLease {
    pub holder: Holder,
    pub acquired_at: DateTime<Utc>,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransitionKind {
    Acquired,
    Released,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub holder: Holder,
    pub generation: u64,
    pub kind: TransitionKind,
    pub at: DateTime<Utc>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("microphone busy: held by {holder:?} (generation {generation})")]
pub struct Busy {
    pub holder: Holder,
    pub generation: u64,
}

#[derive(Debug, Default)]
struct ArbiterState {
    lease: Option<MicLease>,
    generation: u64,
    history: VecDeque<Transition>,
}

impl ArbiterState {
    fn record(&mut self, holder: Holder, generation: u64, kind: TransitionKind) {
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(Transition {
            holder,
            generation,
            kind,
            at: Utc::now(),
        });
    }
}

#[derive(Debug)]
struct Inner {
    state: Mutex<ArbiterState>,
    /// Current holder, for waiters and observers
    holder: watch::Sender<Option<Holder>>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ArbiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, holder: Holder, generation: u64) -> bool {
        let mut state = self.lock();
        match &state.lease {
            Some(lease) if lease.generation == generation => {
                state.lease = None;
                state.record(holder, generation, TransitionKind::Released);
                drop(state);
                self.holder.send_replace(None);
                info!("Mic released by {:?} (generation {})", holder, generation);
                true
            }
            _ => {
                warn!(
                    "Ignoring stale release by {:?} (generation {})",
                    holder, generation
                );
                false
            }
        }
    }
}

/// Shared handle to the microphone state cell
#[derive(Debug, Clone)]
pub struct MicArbiter {
    inner: Arc<Inner>,
}

impl Default for MicArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl MicArbiter {
    pub fn new() -> Self {
        let (holder, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ArbiterState::default()),
                holder,
            }),
        }
    }

    /// Take the lease if nobody holds it
    pub fn acquire(&self, holder: Holder) -> Result<LeaseToken, Busy> {
        let mut state = self.inner.lock();

        if let Some(lease) = &state.lease {
            return Err(Busy {
                holder: lease.holder,
                generation: lease.generation,
            });
        }

        state.generation += 1;
        let lease = MicLease {
            holder,
            acquired_at: Utc::now(),
            generation: state.generation,
        };
        state.lease = Some(lease.clone());
        state.record(holder, lease.generation, TransitionKind::Acquired);
        drop(state);

        self.inner.holder.send_replace(Some(holder));
        info!("Mic acquired by {:?} (generation {})", holder, lease.generation);

        Ok(LeaseToken {
            lease,
            inner: Arc::clone(&self.inner),
            released: false,
        })
    }

    /// Wait until the current lease is released, then take it
    pub async fn acquire_wait(&self, holder: Holder) -> LeaseToken {
        let mut changes = self.inner.holder.subscribe();
        loop {
            match self.acquire(holder) {
                Ok(token) => return token,
                Err(busy) => {
                    debug!("{:?} waiting for mic: {}", holder, busy);
                    // The sender lives in `inner`, which we hold, so this never errors
                    let _ = changes.changed().await;
                }
            }
        }
    }

    /// `acquire_wait` bounded by `timeout`
    pub async fn acquire_timeout(&self, holder: Holder, timeout: Duration) -> Result<LeaseToken, Busy> {
        match tokio::time::timeout(timeout, self.acquire_wait(holder)).await {
            Ok(token) => Ok(token),
            Err(_) => Err(self.busy_snapshot(holder)),
        }
    }

    /// Give the lease back. Releasing a stale token is a logged no-op.
    pub fn release(&self, token: LeaseToken) {
        token.release();
    }

    pub fn current(&self) -> Option<MicLease> {
        self.inner.lock().lease.clone()
    }

    /// Recent transitions, oldest first
    pub fn transitions(&self) -> Vec<Transition> {
        self.inner.lock().history.iter().cloned().collect()
    }

    fn busy_snapshot(&self, waiting: Holder) -> Busy {
        match self.current() {
            Some(lease) => Busy {
                holder: lease.holder,
                generation: lease.generation,
            },
            // Released right at the deadline; report the waiter's own view
            None => Busy {
                holder: waiting,
                generation: self.inner.lock().generation,
            },
        }
    }
}

/// Proof of holding the microphone. Released explicitly, or on drop as a fallback.
#[derive(Debug)]
pub struct LeaseToken {
    lease: MicLease,
    inner: Arc<Inner>,
    released: bool,
}

impl LeaseToken {
    pub fn holder(&self) -> Holder {
        self.lease.holder
    }

    pub fn generation(&self) -> u64 {
        self.lease.generation
    }

    pub fn release(mut self) {
        self.released = true;
        self.inner.release(self.lease.holder, self.lease.generation);
    }

    /// Keep the microphone held for good. For a holder whose process can no
    /// longer be observed, so its exit can never be confirmed.
    pub fn forfeit(mut self) {
        self.released = true;
        error!(
            "Mic stays held by {:?} (generation {}): process exit cannot be confirmed",
            self.lease.holder, self.lease.generation
        );
    }
}

impl Drop for LeaseToken {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                "Lease for {:?} (generation {}) dropped without release",
                self.lease.holder, self.lease.generation
            );
            self.inner.release(self.lease.holder, self.lease.generation);
        }
    }
}

/// Check a transition log for overlapping leases.
///
/// Returns the first acquisition that happened while another lease was live.
pub fn find_overlap(transitions: &[Transition]) -> Option<&Transition> {
    let mut live: Option<u64> = None;
    for t in transitions {
        match t.kind {
            TransitionKind::Acquired => {
                if live.is_some() {
                    return Some(t);
                }
                live = Some(t.generation);
            }
            TransitionKind::Released => {
                if live == Some(t.generation) {
                    live = None;
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_holder_is_busy() {
        let arbiter = MicArbiter::new();
        let wake = arbiter.acquire(Holder::Wake).unwrap();

        let busy = arbiter.acquire(Holder::Capture).unwrap_err();
        assert_eq!(
            busy,
            Busy {
                holder: Holder::Wake,
                generation: 1
            }
        );

        arbiter.release(wake);
        let capture = arbiter.acquire(Holder::Capture).unwrap();
        assert_eq!(capture.generation(), 2);
        assert_eq!(arbiter.current().unwrap().holder, Holder::Capture);
    }

    #[test]
    fn test_same_holder_cannot_double_acquire() {
        let arbiter = MicArbiter::new();
        let _wake = arbiter.acquire(Holder::Wake).unwrap();
        assert!(arbiter.acquire(Holder::Wake).is_err());
    }

    #[test]
    fn test_drop_releases() {
        let arbiter = MicArbiter::new();
        {
            let _token = arbiter.acquire(Holder::Capture).unwrap();
        }
        assert!(arbiter.current().is_none());
        let kinds: Vec<_> = arbiter.transitions().iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TransitionKind::Acquired, TransitionKind::Released]);
    }

    #[test]
    fn test_forfeited_lease_stays_held() {
        let arbiter = MicArbiter::new();
        arbiter.acquire(Holder::Wake).unwrap().forfeit();

        assert_eq!(arbiter.current().unwrap().holder, Holder::Wake);
        assert!(arbiter.acquire(Holder::Capture).is_err());
    }

    #[test]
    fn test_history_is_bounded() {
        let arbiter = MicArbiter::new();
        for _ in 0..HISTORY_LIMIT {
            let token = arbiter.acquire(Holder::Wake).unwrap();
            token.release();
        }
        let history = arbiter.transitions();
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history.last().unwrap().generation, HISTORY_LIMIT as u64);
    }

    #[test]
    fn test_find_overlap() {
        let at = Utc::now();
        let t = |holder, generation, kind| Transition {
            holder,
            generation,
            kind,
            at,
        };

        let clean = vec![
            t(Holder::Wake, 1, TransitionKind::Acquired),
            t(Holder::Wake, 1, TransitionKind::Released),
            t(Holder::Capture, 2, TransitionKind::Acquired),
            t(Holder::Capture, 2, TransitionKind::Released),
        ];
        assert!(find_overlap(&clean).is_none());

        let overlapping = vec![
            t(Holder::Wake, 1, TransitionKind::Acquired),
            t(Holder::Capture, 2, TransitionKind::Acquired),
        ];
        assert_eq!(find_overlap(&overlapping).unwrap().generation, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_gets_lease_after_release() {
        let arbiter = MicArbiter::new();
        let wake = arbiter.acquire(Holder::Wake).unwrap();

        let waiter = {
            let arbiter = arbiter.clone();
            tokio::spawn(async move { arbiter.acquire_wait(Holder::Capture).await })
        };

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!waiter.is_finished());

        arbiter.release(wake);
        let capture = waiter.await.unwrap();
        assert_eq!(capture.holder(), Holder::Capture);
        assert!(find_overlap(&arbiter.transitions()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_timeout_reports_holder() {
        let arbiter = MicArbiter::new();
        let _wake = arbiter.acquire(Holder::Wake).unwrap();

        let busy = arbiter
            .acquire_timeout(Holder::Capture, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert_eq!(busy.holder, Holder::Wake);
    }
}
