//! Single-flight gate for token refresh.
//!
//! Every caller that sees a 401 goes through [`RefreshGate::acquire`]. The
//! first one to find the gate idle starts the refresh; everyone arriving
//! while it runs awaits the same shared outcome.
//!
//! Each started refresh gets a generation number. [`RefreshGate::reset`]
//! (login, logout) moves to a new generation, so a refresh that was still
//! running from the previous one can no longer change the gate.

use std::future::Future;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use hamro_core::identity::TokenPair;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Outcome of one refresh, shared by every waiting caller.
pub(crate) type SharedRefresh = Shared<BoxFuture<'static, bool>>;

pub(crate) enum RefreshState {
    Idle,
    InFlight(SharedRefresh),
    /// The last refresh failed; no further attempt until the next login.
    Failed,
}

/// What a caller holding a rejected token should do next.
pub(crate) enum RefreshTicket {
    /// Await this refresh; `true` means new tokens are in place.
    Await(SharedRefresh),
    /// The token the caller sent was already replaced; retry directly.
    AlreadyRotated,
    /// No refresh possible (gate failed or no tokens held).
    Unavailable,
}

struct GateState {
    state: RefreshState,
    generation: u64,
}

pub(crate) struct RefreshGate {
    inner: Mutex<GateState>,
}

impl RefreshGate {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(GateState {
                state: RefreshState::Idle,
                generation: 0,
            }),
        }
    }

    /// Decide how to handle a 401 for a request sent with `sent_token`.
    ///
    /// `current` resolves the token pair held right now; it is only
    /// consulted while the gate is idle and the gate lock is held. `start`
    /// launches a refresh from that pair under a fresh generation and is
    /// called at most once per idle period.
    pub(crate) async fn acquire<C, S>(&self, sent_token: &str, current: C, start: S) -> RefreshTicket
    where
        C: Future<Output = Option<TokenPair>>,
        S: FnOnce(u64, TokenPair) -> BoxFuture<'static, bool>,
    {
        let mut gate = self.inner.lock().await;
        match &gate.state {
            RefreshState::Failed => RefreshTicket::Unavailable,
            RefreshState::InFlight(refresh) => RefreshTicket::Await(refresh.clone()),
            RefreshState::Idle => match current.await {
                None => RefreshTicket::Unavailable,
                Some(tokens) if tokens.access_token != sent_token => RefreshTicket::AlreadyRotated,
                Some(tokens) => {
                    gate.generation += 1;
                    let refresh = start(gate.generation, tokens).shared();
                    gate.state = RefreshState::InFlight(refresh.clone());
                    RefreshTicket::Await(refresh)
                }
            },
        }
    }

    /// Record the outcome of the refresh started under `generation`.
    /// Outcomes of superseded refreshes are ignored.
    pub(crate) async fn settle(&self, generation: u64, succeeded: bool) {
        let mut gate = self.inner.lock().await;
        if gate.generation != generation || !matches!(gate.state, RefreshState::InFlight(_)) {
            return;
        }
        gate.state = if succeeded {
            RefreshState::Idle
        } else {
            RefreshState::Failed
        };
    }

    /// Re-arm the gate and detach any in-flight refresh.
    pub(crate) async fn reset(&self) {
        let mut gate = self.inner.lock().await;
        gate.generation += 1;
        gate.state = RefreshState::Idle;
    }

    #[cfg(test)]
    pub(crate) async fn has_failed(&self) -> bool {
        matches!(self.inner.lock().await.state, RefreshState::Failed)
    }
}

/// Await a spawned refresh task. If the task panics or is cancelled,
/// `on_abort` runs and the outcome is `false`.
pub(crate) fn supervise<A>(task: JoinHandle<bool>, on_abort: A) -> BoxFuture<'static, bool>
where
    A: FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
{
    async move {
        match task.await {
            Ok(succeeded) => succeeded,
            Err(e) => {
                tracing::error!(error = %e, "Token refresh task aborted");
                on_abort().await;
                false
            }
        }
    }
    .boxed()
}
