//! Async access to the conversation store.
//!
//! `rusqlite` is synchronous, so every call hops onto the blocking pool and
//! runs under a deadline inside its own transaction. A call that misses its
//! deadline reports [`StoreError::Timeout`] and leaves nothing behind: if it
//! has not started yet it never runs, and if it is running its statement is
//! interrupted and the transaction rolled back.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

use parley_shared::UserId;
use parley_store::{Database, InterruptHandle, Profile, StoreError};

/// Progress of one store call, shared between the waiting task and the
/// blocking worker. Transitions happen under the mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallState {
    Queued,
    Running,
    Finished,
    Abandoned,
}

fn lock_state(state: &Mutex<CallState>) -> MutexGuard<'_, CallState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Database>>,
    interrupt: Arc<InterruptHandle>,
    timeout: Duration,
}

impl Store {
    pub fn new(db: Database, timeout: Duration) -> Self {
        let interrupt = Arc::new(db.interrupt_handle());
        Self {
            db: Arc::new(Mutex::new(db)),
            interrupt,
            timeout,
        }
    }

    /// Run `f` against the database on a blocking thread.
    ///
    /// Everything `f` does happens under a single lock acquisition and a
    /// single transaction, so a closure issuing several queries sees a
    /// consistent view and its writes commit together or not at all.
    pub async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
    {
        let timeout = self.timeout;
        let state = Arc::new(Mutex::new(CallState::Queued));

        let db = self.db.clone();
        let worker_state = state.clone();
        let mut task = tokio::task::spawn_blocking(move || {
            let db = db
                .lock()
                .map_err(|_| StoreError::Unavailable("database lock poisoned".into()))?;

            {
                let mut state = lock_state(&worker_state);
                if *state == CallState::Abandoned {
                    return Err(StoreError::Timeout(timeout));
                }
                *state = CallState::Running;
            }

            let tx = db.conn().unchecked_transaction()?;
            let outcome = f(&db);

            {
                let mut state = lock_state(&worker_state);
                if *state == CallState::Abandoned {
                    // Dropping `tx` rolls back.
                    return Err(StoreError::Timeout(timeout));
                }
                *state = CallState::Finished;
            }

            let value = outcome?;
            tx.commit()?;
            Ok(value)
        });

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(joined) => flatten(joined),
            Err(_) => {
                let previous = {
                    let mut current = lock_state(&state);
                    let previous = *current;
                    if previous != CallState::Finished {
                        *current = CallState::Abandoned;
                    }
                    if previous == CallState::Running {
                        self.interrupt.interrupt();
                    }
                    previous
                };

                if previous == CallState::Finished {
                    // Past the point of no return: report what happened.
                    return flatten(task.await);
                }

                debug!(?previous, ?timeout, "Store call abandoned");
                Err(StoreError::Timeout(timeout))
            }
        }
    }

    pub async fn get_profile(&self, user: UserId) -> Result<Option<Profile>, StoreError> {
        self.call(move |db| db.get_profile(&user)).await
    }
}

fn flatten<T>(
    joined: Result<Result<T, StoreError>, tokio::task::JoinError>,
) -> Result<T, StoreError> {
    joined.unwrap_or_else(|join_err| {
        Err(StoreError::Unavailable(format!(
            "store worker failed: {join_err}"
        )))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: UserId, name: &str) -> Profile {
        Profile {
            id,
            name: name.to_string(),
            email: format!("{name}@example.test"),
            profile_pic: String::new(),
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_call_runs_against_database() {
        let store = Store::new(Database::open_in_memory().unwrap(), Duration::from_secs(5));
        let missing = store.get_profile(UserId::new()).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_call_times_out() {
        let store = Store::new(
            Database::open_in_memory().unwrap(),
            Duration::from_millis(20),
        );

        let result = store
            .call(|_| {
                std::thread::sleep(Duration::from_millis(200));
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(StoreError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_timed_out_write_is_rolled_back() {
        let store = Store::new(
            Database::open_in_memory().unwrap(),
            Duration::from_millis(100),
        );
        let user = UserId::new();

        let result = store
            .call(move |db| {
                db.upsert_profile(&profile(user, "late"))?;
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(StoreError::Timeout(_))));

        // Let the worker finish and release the lock.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(store.get_profile(user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_queued_call_never_runs_after_timeout() {
        let store = Store::new(
            Database::open_in_memory().unwrap(),
            Duration::from_millis(100),
        );
        let blocker = store.clone();
        let busy = tokio::spawn(async move {
            blocker
                .call(|_| {
                    std::thread::sleep(Duration::from_millis(250));
                    Ok(())
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let user = UserId::new();
        let result = store
            .call(move |db| db.upsert_profile(&profile(user, "queued")))
            .await;
        assert!(matches!(result, Err(StoreError::Timeout(_))));

        let _ = busy.await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.get_profile(user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sql_errors_propagate() {
        let store = Store::new(Database::open_in_memory().unwrap(), Duration::from_secs(5));
        let result = store
            .call(|db| Ok(db.conn().execute_batch("SELECT * FROM nowhere")?))
            .await;
        assert!(matches!(result, Err(StoreError::Sqlite(_))));
    }
}
