//! One abortable operation per category.
//!
//! Starting a login while another login is still running doesn't
//! cancel the older one, it just takes over the slot, so
//! `abort_login()` reaches the newest login only.

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use tokio_util::sync::CancellationToken;

use crate::{AuthError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Login,
    Refresh,
    SetSkin,
}

/// The token of one in-flight operation, see [`CancelRegistry::begin`].
#[derive(Debug)]
pub struct CancelHandle {
    kind: OperationKind,
    id: u64,
    token: CancellationToken,
}

impl CancelHandle {
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Runs `fut` until it finishes or this operation is aborted,
    /// whichever comes first. If both are ready, the abort wins.
    ///
    /// # Errors
    /// [`AuthError::Cancelled`] if aborted, or whatever `fut` returned.
    pub async fn run<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(AuthError::Cancelled),
            out = fut => out,
        }
    }
}

#[derive(Default)]
pub struct CancelRegistry {
    next_id: AtomicU64,
    slots: Mutex<HashMap<OperationKind, (u64, CancellationToken)>>,
}

impl CancelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<OperationKind, (u64, CancellationToken)>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Installs a fresh token for `kind`. Any older operation of
    /// the same kind keeps running, but can't be aborted anymore.
    pub fn begin(&self, kind: OperationKind) -> CancelHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.slots().insert(kind, (id, token.clone()));
        CancelHandle { kind, id, token }
    }

    /// Cancels the current operation of `kind`.
    /// Returns `false` if nothing was running.
    pub fn abort(&self, kind: OperationKind) -> bool {
        match self.slots().remove(&kind) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Clears the slot, but only if it still belongs to `handle`.
    pub fn end(&self, handle: &CancelHandle) {
        let mut slots = self.slots();
        if slots.get(&handle.kind).is_some_and(|(id, _)| *id == handle.id) {
            slots.remove(&handle.kind);
        }
    }

    #[must_use]
    pub fn is_active(&self, kind: OperationKind) -> bool {
        self.slots().contains_key(&kind)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn end_only_clears_own_slot() {
        let registry = CancelRegistry::new();
        let old = registry.begin(OperationKind::Login);
        let new = registry.begin(OperationKind::Login);

        registry.end(&old);
        assert!(registry.is_active(OperationKind::Login));
        assert!(!old.token().is_cancelled());

        registry.end(&new);
        assert!(!registry.is_active(OperationKind::Login));
    }

    #[test]
    fn abort_hits_newest_only() {
        let registry = CancelRegistry::new();
        let old = registry.begin(OperationKind::Refresh);
        let new = registry.begin(OperationKind::Refresh);

        assert!(registry.abort(OperationKind::Refresh));
        assert!(new.token().is_cancelled());
        assert!(!old.token().is_cancelled());
        assert!(!registry.abort(OperationKind::Refresh));

        // Ending after an abort is harmless
        registry.end(&new);
        assert!(!registry.abort(OperationKind::SetSkin));
    }

    #[tokio::test]
    async fn run_stops_on_abort() {
        let registry = std::sync::Arc::new(CancelRegistry::new());
        let handle = registry.begin(OperationKind::SetSkin);

        let aborter = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            aborter.abort(OperationKind::SetSkin);
        });

        let out: Result<()> = handle
            .run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;
        assert!(matches!(out, Err(AuthError::Cancelled)));
    }
}
