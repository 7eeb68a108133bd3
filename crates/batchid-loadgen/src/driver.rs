use crate::config::LoadConfig;
use anyhow::{Context, anyhow, bail, ensure};
use batchid::{
    IdentifierAssignmentCoordinator, InsertTemplate, MemoryPersister, MemorySession, MemoryTable,
    PersistenceSession,
};
use rand::{Rng, SeedableRng, rngs::SmallRng};
use std::{
    collections::VecDeque,
    sync::Barrier,
    thread::scope,
    time::{Duration, Instant},
};

type Columns = fn(&String) -> Vec<String>;
type Coordinator = IdentifierAssignmentCoordinator<String, u64, MemoryPersister<Columns>>;

fn columns(record: &String) -> Vec<String> {
    vec![record.clone()]
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Copy)]
pub struct Report {
    pub records: usize,
    pub batches: usize,
    pub elapsed: Duration,
}

impl Report {
    /// Wall-clock duration in milliseconds, saturating at `u64::MAX`.
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX)
    }

    pub fn records_per_sec(&self) -> f64 {
        self.records as f64 / self.elapsed.as_secs_f64().max(f64::EPSILON)
    }
}

/// Runs every session to completion on its own thread and checks that each
/// generated key was stored with the record it was handed back for.
pub fn run(config: &LoadConfig) -> anyhow::Result<Report> {
    let persister = MemoryPersister::new("id", columns as Columns);
    let coordinator: Coordinator =
        IdentifierAssignmentCoordinator::install(persister, config.batch, &config.capabilities);
    let table = MemoryTable::starting_at(config.first_key);
    let template = InsertTemplate::new("insert into load_record (payload) values (?)", "id");
    let barrier = Barrier::new(config.sessions);

    tracing::debug!(mode = ?coordinator.mode(), "coordinator installed");

    let start = Instant::now();
    let outcomes: Vec<anyhow::Result<usize>> = scope(|s| {
        let handles: Vec<_> = (0..config.sessions)
            .map(|index| {
                let coordinator = &coordinator;
                let table = table.clone();
                let template = &template;
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    drive_session(index, coordinator, table, template, config)
                })
            })
            .collect();

        handles
            .into_iter()
            .enumerate()
            .map(|(index, handle)| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow!("session {index} panicked")))
            })
            .collect()
    });
    let elapsed = start.elapsed();

    let mut assigned = 0;
    for outcome in outcomes {
        assigned += outcome?;
    }

    ensure!(
        assigned == config.total_records(),
        "assigned {assigned} keys for {} records",
        config.total_records()
    );
    ensure!(
        table.len()? == assigned,
        "table holds {} rows for {assigned} assigned keys",
        table.len()?
    );
    ensure!(
        coordinator.registry().session_count()? == 0 && coordinator.cache().session_count()? == 0,
        "coordinator still holds session state after every session closed"
    );

    Ok(Report {
        records: assigned,
        batches: table.batches()?,
        elapsed,
    })
}

/// Interleaves bursts of prepared records with bursts of key requests until
/// every record of the session has a key. Returns the number of keys
/// assigned.
fn drive_session(
    index: usize,
    coordinator: &Coordinator,
    table: MemoryTable,
    template: &InsertTemplate,
    config: &LoadConfig,
) -> anyhow::Result<usize> {
    let mut session = MemorySession::open(index as u128, table.clone());
    let key = session.session_key();
    let mut rng = SmallRng::seed_from_u64(config.seed.wrapping_add(index as u64));
    let mut unassigned = VecDeque::new();
    let mut prepared = 0;
    let mut assigned = 0;
    let mut last_key: Option<u64> = None;

    while prepared < config.records_per_session || !unassigned.is_empty() {
        let burst = rng
            .random_range(1..=config.max_burst)
            .min(config.records_per_session - prepared);
        for _ in 0..burst {
            let record = format!("session-{index}/record-{prepared}");
            coordinator.on_record_prepared(key, record.clone())?;
            unassigned.push_back(record);
            prepared += 1;
        }

        let wanted = if prepared == config.records_per_session {
            unassigned.len()
        } else {
            rng.random_range(0..=unassigned.len().min(config.max_burst))
        };

        for _ in 0..wanted {
            let Some(expected) = unassigned.pop_front() else {
                break;
            };
            let generated = coordinator
                .assign_key(&mut session, template)
                .with_context(|| format!("assigning key for {expected} in session {key}"))?;

            if last_key.is_some_and(|last| generated <= last) {
                bail!("session {key} received key {generated} after {last_key:?}");
            }
            last_key = Some(generated);

            let stored = table.row(generated)?;
            if stored.as_deref() != Some(core::slice::from_ref(&expected)) {
                bail!("key {generated} was handed to {expected} but stores {stored:?}");
            }
            assigned += 1;
        }
    }

    let residue = coordinator.on_session_closed(key)?;
    ensure!(
        residue.is_empty(),
        "session {key} closed with {} records and {} keys left",
        residue.records,
        residue.keys
    );
    ensure!(
        session.connection_ref().open_statements() == 0,
        "session {key} leaked prepared statements"
    );

    tracing::debug!(session = %key, assigned, "session finished");
    Ok(assigned)
}
