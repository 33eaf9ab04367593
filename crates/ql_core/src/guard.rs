//! Keyed guards for async operations.
//!
//! - [`KeyedMutex`]: calls with the same key run one after another,
//!   in the order they arrived.
//! - [`SingleFlight`]: concurrent calls with the same key share
//!   one execution and all get its result.
//!
//! Neither type swallows errors: whatever the wrapped future
//! returns is handed back unchanged, and keys are released
//! once it finishes, successfully or not.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::OwnedMutexGuard;

type KeyLock = Arc<tokio::sync::Mutex<()>>;

/// Per-key mutual exclusion.
///
/// Waiters queue in FIFO order (tokio's mutex is fair),
/// so later calls observe everything earlier calls did.
#[derive(Default)]
pub struct KeyedMutex {
    locks: Mutex<HashMap<String, KeyLock>>,
}

impl KeyedMutex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, KeyLock>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits until `key` is free and holds it until the guard is dropped.
    pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let lock = self.table().entry(key.to_owned()).or_default().clone();
        let guard = lock.lock_owned().await;
        KeyGuard {
            owner: self,
            key: key.to_owned(),
            guard: Some(guard),
        }
    }

    /// Runs `fut` while holding `key`.
    pub async fn run<T>(&self, key: &str, fut: impl Future<Output = T>) -> T {
        let _guard = self.lock(key).await;
        fut.await
    }

    /// Whether someone currently holds or waits for `key`.
    #[must_use]
    pub fn is_busy(&self, key: &str) -> bool {
        self.table().contains_key(key)
    }
}

/// Held while a [`KeyedMutex`] key is locked.
pub struct KeyGuard<'a> {
    owner: &'a KeyedMutex,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut table = self.owner.table();
        // Only the table itself still references the lock: nobody is waiting.
        if table
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            table.remove(&self.key);
        }
    }
}

type Flight<T> = Shared<BoxFuture<'static, T>>;

/// Collapses concurrent calls with an equal key into one execution.
///
/// Calls with different keys don't affect each other.
/// Once a flight lands, the next call with that key starts a new one.
pub struct SingleFlight<T: Clone> {
    flights: Mutex<HashMap<String, Flight<T>>>,
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Flight<T>>> {
        self.flights.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Joins the flight for `key`, or starts one with `make` if there is none.
    ///
    /// `make` is only called by the caller that starts the flight.
    pub async fn run<F, Fut>(&self, key: &str, make: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let flight = {
            let mut table = self.table();
            if let Some(flight) = table.get(key) {
                flight.clone()
            } else {
                let flight = make().boxed().shared();
                table.insert(key.to_owned(), flight.clone());
                flight
            }
        };

        let out = flight.clone().await;

        let mut table = self.table();
        if table.get(key).is_some_and(|n| n.ptr_eq(&flight)) {
            table.remove(key);
        }
        out
    }

    #[must_use]
    pub fn in_flight(&self, key: &str) -> bool {
        self.table().contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;

    #[tokio::test]
    async fn same_key_is_serialized_in_order() {
        let mutex = Arc::new(KeyedMutex::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..3 {
            let (mutex, order, running) = (mutex.clone(), order.clone(), running.clone());
            handles.push(tokio::spawn(async move {
                mutex
                    .run("login", async {
                        assert_eq!(running.fetch_add(1, Ordering::SeqCst), 0);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        order.lock().unwrap().push(i);
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
            // Make sure the tasks queue up in a known order
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert!(!mutex.is_busy("login"));
    }

    #[tokio::test]
    async fn key_is_released_after_error() {
        let mutex = KeyedMutex::new();
        let first: Result<(), &str> = mutex.run("refresh", async { Err("boom") }).await;
        assert_eq!(first, Err("boom"));

        let second = tokio::time::timeout(
            Duration::from_millis(100),
            mutex.run("refresh", async { 1 }),
        )
        .await;
        assert_eq!(second, Ok(1));
    }

    #[tokio::test]
    async fn equal_keys_share_one_flight() {
        let flights = Arc::new(SingleFlight::<Result<u32, String>>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let start = |key: &'static str, value: u32| {
            let (flights, calls) = (flights.clone(), calls.clone());
            tokio::spawn(async move {
                flights
                    .run(key, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok(value)
                    })
                    .await
            })
        };

        let a1 = start("A", 1);
        let a2 = start("A", 2);
        let b = start("B", 3);

        assert_eq!(a1.await.unwrap(), Ok(1));
        assert_eq!(a2.await.unwrap(), Ok(1));
        assert_eq!(b.await.unwrap(), Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!flights.in_flight("A"));
    }
}
