//! Crash-safe schema migration runner.
//!
//! The schema version counter advances by two per step. Before a step runs
//! the counter is set to the odd value `2i + 1` as its own durable write;
//! only after the step returns is it moved to `2i + 2`. A crash inside a step
//! therefore leaves an odd counter behind, and the next open refuses the
//! store with [`StoreError::UnsafeState`] instead of guessing how much of the
//! step's DDL landed. Nothing here repairs such a store.

use std::fmt;

use tracing::{debug, info, warn};

use crate::errors::{Result, StepError, StoreError};
use crate::sqlite::Executor;

type StepFn = dyn Fn(&Executor<'_>) -> std::result::Result<(), StepError> + Send + Sync;

/// One schema change, applied at most once per store.
pub struct Migration {
    description: String,
    step: Box<StepFn>,
}

impl Migration {
    /// A step backed by arbitrary code.
    pub fn new<F>(description: impl Into<String>, step: F) -> Self
    where
        F: Fn(&Executor<'_>) -> std::result::Result<(), StepError> + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            step: Box::new(step),
        }
    }

    /// A step that executes a fixed batch of SQL.
    pub fn sql(description: impl Into<String>, sql: &'static str) -> Self {
        Self::new(description, move |exec| Ok(exec.execute_batch(sql)?))
    }

    /// Human-readable description, used in logs and errors.
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Where a stored counter sits relative to a migration list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchemaState {
    /// Every step has been applied.
    Current,
    /// Steps from `next` onwards are pending.
    Behind {
        /// Index of the first pending step.
        next: usize,
    },
    /// Step `step` was started and never confirmed.
    Interrupted {
        /// Index of the unconfirmed step.
        step: usize,
    },
    /// The store has applied more steps than the list holds.
    Ahead {
        /// Steps the store reports as applied.
        applied: usize,
    },
}

/// Classify `version` against a list of `total` steps. An odd counter is
/// always [`SchemaState::Interrupted`], even when `version / 2 == total`.
pub fn classify(version: u32, total: usize) -> SchemaState {
    let applied = (version / 2) as usize;
    if version % 2 == 1 {
        SchemaState::Interrupted { step: applied }
    } else if applied == total {
        SchemaState::Current
    } else if applied > total {
        SchemaState::Ahead { applied }
    } else {
        SchemaState::Behind { next: applied }
    }
}

/// Outcome of a migration run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Counter found on open.
    pub from_version: u32,
    /// Counter after the run.
    pub to_version: u32,
    /// Indices of the steps applied by this run, in order.
    pub applied: Vec<usize>,
}

/// Bring the counter from `version` to `2 * migrations.len()`.
///
/// Fails before touching anything when the counter is odd
/// ([`StoreError::UnsafeState`]) or ahead of the list
/// ([`StoreError::FutureSchema`]). A failing step aborts the run with
/// [`StoreError::MigrationStep`] and leaves the counter odd.
pub fn run_migrations(
    exec: &Executor<'_>,
    version: u32,
    migrations: &[Migration],
) -> Result<MigrationReport> {
    let mut report = MigrationReport {
        from_version: version,
        to_version: version,
        applied: Vec::new(),
    };

    loop {
        let current = report.to_version;
        let index = match classify(current, migrations.len()) {
            SchemaState::Current => break,
            SchemaState::Interrupted { .. } => {
                return Err(StoreError::UnsafeState { version: current });
            }
            SchemaState::Ahead { .. } => {
                return Err(StoreError::FutureSchema {
                    version: current,
                    supported: migrations.len(),
                });
            }
            SchemaState::Behind { next } => next,
        };

        let migration = &migrations[index];
        let started = current
            .checked_add(1)
            .ok_or_else(|| StoreError::InvalidMetadata("schema version overflow".into()))?;

        exec.set_user_version(started)?;
        debug!(index, version = started, "migration started");

        apply_step(exec, index, migration, started)?;

        exec.set_user_version(started + 1)?;
        info!(
            index,
            description = migration.description(),
            version = started + 1,
            "migration applied"
        );
        report.to_version = started + 1;
        report.applied.push(index);
    }

    if report.applied.is_empty() {
        debug!(version = report.to_version, "schema up to date");
    }
    Ok(report)
}

fn apply_step(
    exec: &Executor<'_>,
    index: usize,
    migration: &Migration,
    marker: u32,
) -> Result<()> {
    let fail = |source: StepError| StoreError::MigrationStep {
        index,
        description: migration.description.clone(),
        source,
    };
    let application_id = exec.application_id()?;

    (migration.step)(exec).map_err(fail)?;

    // The done-marker must be its own committed write; a step that leaves a
    // transaction open would swallow it.
    if exec.in_transaction() {
        if let Err(e) = exec.execute_batch("ROLLBACK") {
            warn!(index, error = %e, "rollback of unfinished step transaction failed");
        }
        return Err(fail("step left a transaction open".into()));
    }

    // The header belongs to the runner. Put the odd marker back so the next
    // open still sees an interrupted step.
    match exec.user_version() {
        Ok(version) if version == marker => {}
        found => {
            let found = found.map_or_else(|e| e.to_string(), |v| v.to_string());
            exec.set_user_version(marker)?;
            return Err(fail(format!("step rewrote the schema version to {found}").into()));
        }
    }
    if exec.application_id()? != application_id {
        let original = u32::try_from(application_id).map_err(|_| {
            StoreError::InvalidMetadata(format!("application id {application_id:#x}"))
        })?;
        exec.set_application_id(original)?;
        return Err(fail("step rewrote the application identifier".into()));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use rusqlite::Connection;

    use super::*;

    /// Steps that each create table `t{i}` and count their invocations.
    fn counted_steps(n: usize, calls: &Arc<Vec<AtomicUsize>>) -> Vec<Migration> {
        (0..n)
            .map(|i| {
                let calls = Arc::clone(calls);
                Migration::new(format!("create t{i}"), move |exec| {
                    let _ = calls[i].fetch_add(1, Ordering::SeqCst);
                    exec.execute_batch(&format!("CREATE TABLE t{i} (x INTEGER);"))?;
                    Ok(())
                })
            })
            .collect()
    }

    fn counters(n: usize) -> Arc<Vec<AtomicUsize>> {
        Arc::new((0..n).map(|_| AtomicUsize::new(0)).collect())
    }

    fn calls_of(calls: &Arc<Vec<AtomicUsize>>) -> Vec<usize> {
        calls.iter().map(|c| c.load(Ordering::SeqCst)).collect()
    }

    #[test]
    fn classify_covers_every_state() {
        assert_eq!(classify(0, 0), SchemaState::Current);
        assert_eq!(classify(4, 2), SchemaState::Current);
        assert_eq!(classify(2, 3), SchemaState::Behind { next: 1 });
        assert_eq!(classify(3, 3), SchemaState::Interrupted { step: 1 });
        assert_eq!(classify(5, 2), SchemaState::Interrupted { step: 2 });
        assert_eq!(classify(6, 2), SchemaState::Ahead { applied: 3 });
    }

    #[test]
    fn fresh_store_applies_every_step_in_order() {
        let conn = Connection::open_in_memory().unwrap();
        let exec = Executor::new(&conn);
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let steps: Vec<Migration> = (0..3)
            .map(|i| {
                let order = Arc::clone(&order);
                Migration::new(format!("step {i}"), move |exec| {
                    // Each step sees the odd marker for itself.
                    order.lock().push((i, exec.user_version()?));
                    Ok(())
                })
            })
            .collect();

        let report = run_migrations(&exec, 0, &steps).unwrap();
        assert_eq!(
            report,
            MigrationReport {
                from_version: 0,
                to_version: 6,
                applied: vec![0, 1, 2],
            }
        );
        assert_eq!(*order.lock(), vec![(0, 1), (1, 3), (2, 5)]);
        assert_eq!(exec.user_version().unwrap(), 6);
    }

    #[test]
    fn sql_steps_execute_their_batch() {
        let conn = Connection::open_in_memory().unwrap();
        let exec = Executor::new(&conn);
        let steps = [
            Migration::sql("accounts", "CREATE TABLE accounts (id TEXT PRIMARY KEY);"),
            Migration::sql(
                "journal",
                "CREATE TABLE journal (id INTEGER PRIMARY KEY); CREATE INDEX j_id ON journal(id);",
            ),
        ];
        let _ = run_migrations(&exec, 0, &steps).unwrap();
        assert_eq!(exec.user_table_count().unwrap(), 2);
    }

    #[test]
    fn failing_step_leaves_counter_odd_and_keeps_its_error() {
        #[derive(Debug, thiserror::Error)]
        #[error("ledger rules violated")]
        struct RuleError;

        let conn = Connection::open_in_memory().unwrap();
        let exec = Executor::new(&conn);
        let steps = [
            Migration::sql("v1", "CREATE TABLE t1 (x);"),
            Migration::new("v2 fails", |_| Err(RuleError.into())),
            Migration::sql("v3", "CREATE TABLE t3 (x);"),
        ];

        let err = run_migrations(&exec, 0, &steps).unwrap_err();
        match err {
            StoreError::MigrationStep {
                index,
                description,
                source,
            } => {
                assert_eq!(index, 1);
                assert_eq!(description, "v2 fails");
                assert!(source.downcast_ref::<RuleError>().is_some());
            }
            other => panic!("expected MigrationStep, got {other:?}"),
        }
        assert_eq!(exec.user_version().unwrap(), 3);
        assert_eq!(exec.user_table_count().unwrap(), 1);

        // The next attempt refuses the store outright.
        assert_matches!(
            run_migrations(&exec, 3, &steps),
            Err(StoreError::UnsafeState { version: 3 })
        );
    }

    #[test]
    fn step_leaving_transaction_open_fails_and_is_rolled_back() {
        let conn = Connection::open_in_memory().unwrap();
        let exec = Executor::new(&conn);
        let steps = [Migration::sql("dangling", "BEGIN; CREATE TABLE t (x);")];

        let err = run_migrations(&exec, 0, &steps).unwrap_err();
        assert_matches!(err, StoreError::MigrationStep { index: 0, .. });
        assert!(!exec.in_transaction());
        assert_eq!(exec.user_table_count().unwrap(), 0);
        assert_eq!(exec.user_version().unwrap(), 1);
    }

    #[test]
    fn step_may_manage_its_own_transaction() {
        let conn = Connection::open_in_memory().unwrap();
        let exec = Executor::new(&conn);
        let steps = [Migration::sql(
            "atomic",
            "BEGIN; CREATE TABLE a (x); CREATE TABLE b (x); COMMIT;",
        )];
        let report = run_migrations(&exec, 0, &steps).unwrap();
        assert_eq!(report.to_version, 2);
        assert_eq!(exec.user_table_count().unwrap(), 2);
    }

    #[test]
    fn step_rewriting_the_counter_fails_and_keeps_the_odd_marker() {
        let conn = Connection::open_in_memory().unwrap();
        let exec = Executor::new(&conn);
        let steps = [
            Migration::sql("v1", "CREATE TABLE t1 (x);"),
            Migration::sql("skip ahead", "CREATE TABLE t2 (x); PRAGMA user_version = 10;"),
            Migration::sql("v3", "CREATE TABLE t3 (x);"),
        ];

        let err = run_migrations(&exec, 0, &steps).unwrap_err();
        match err {
            StoreError::MigrationStep { index, source, .. } => {
                assert_eq!(index, 1);
                assert!(source.to_string().contains("schema version to 10"));
            }
            other => panic!("expected MigrationStep, got {other:?}"),
        }
        assert_eq!(exec.user_version().unwrap(), 3);
        assert_matches!(
            run_migrations(&exec, 3, &steps),
            Err(StoreError::UnsafeState { version: 3 })
        );
    }

    #[test]
    fn step_rewriting_the_identifier_fails_and_is_restored() {
        let conn = Connection::open_in_memory().unwrap();
        let exec = Executor::new(&conn);
        exec.set_application_id(0x1337_0002).unwrap();
        let steps = [Migration::sql(
            "rebrand",
            "CREATE TABLE t (x); PRAGMA application_id = 42;",
        )];

        let err = run_migrations(&exec, 0, &steps).unwrap_err();
        assert_matches!(err, StoreError::MigrationStep { index: 0, .. });
        assert_eq!(exec.application_id().unwrap(), 0x1337_0002);
        assert_eq!(exec.user_version().unwrap(), 1);
    }

    #[test]
    fn future_schema_leaves_counter_alone() {
        let conn = Connection::open_in_memory().unwrap();
        let exec = Executor::new(&conn);
        exec.set_user_version(4).unwrap();
        let calls = counters(1);

        assert_matches!(
            run_migrations(&exec, 4, &counted_steps(1, &calls)),
            Err(StoreError::FutureSchema { version: 4, supported: 1 })
        );
        assert_eq!(exec.user_version().unwrap(), 4);
        assert_eq!(calls_of(&calls), vec![0]);
    }

    proptest! {
        #[test]
        fn resumes_from_any_even_counter(n in 0usize..6, k_seed in 0usize..6) {
            let k = k_seed.min(n);
            let conn = Connection::open_in_memory().unwrap();
            let exec = Executor::new(&conn);
            let calls = counters(n);
            let steps = counted_steps(n, &calls);
            for i in 0..k {
                exec.execute_batch(&format!("CREATE TABLE t{i} (x INTEGER);")).unwrap();
            }
            let from = u32::try_from(2 * k).unwrap();
            exec.set_user_version(from).unwrap();

            let report = run_migrations(&exec, from, &steps).unwrap();

            let expected_calls: Vec<usize> = (0..n).map(|i| usize::from(i >= k)).collect();
            prop_assert_eq!(calls_of(&calls), expected_calls);
            prop_assert_eq!(report.applied, (k..n).collect::<Vec<_>>());
            prop_assert_eq!(exec.user_version().unwrap(), u32::try_from(2 * n).unwrap());

            // A second run is a no-op.
            let again = run_migrations(&exec, report.to_version, &steps).unwrap();
            prop_assert!(again.applied.is_empty());
            prop_assert_eq!(calls_of(&calls).iter().sum::<usize>(), n - k);
        }

        #[test]
        fn odd_counter_is_always_unsafe(half in 0u32..8, n in 0usize..8) {
            let version = 2 * half + 1;
            let conn = Connection::open_in_memory().unwrap();
            let exec = Executor::new(&conn);
            exec.set_user_version(version).unwrap();
            let calls = counters(n);

            let result = run_migrations(&exec, version, &counted_steps(n, &calls));
            prop_assert!(
                matches!(result, Err(StoreError::UnsafeState { version: v }) if v == version),
                "unexpected result: {:?}",
                result
            );
            prop_assert_eq!(exec.user_version().unwrap(), version);
            prop_assert!(calls_of(&calls).iter().all(|&c| c == 0));
        }

        #[test]
        fn counter_ahead_of_list_is_future_schema(k in 1usize..8, short in 0usize..8) {
            let n = short % k;
            let version = u32::try_from(2 * k).unwrap();
            let conn = Connection::open_in_memory().unwrap();
            let exec = Executor::new(&conn);
            exec.set_user_version(version).unwrap();
            let calls = counters(n);

            let result = run_migrations(&exec, version, &counted_steps(n, &calls));
            prop_assert!(
                matches!(result, Err(StoreError::FutureSchema { supported, .. }) if supported == n),
                "unexpected result: {:?}",
                result
            );
            prop_assert_eq!(exec.user_version().unwrap(), version);
        }
    }
}
