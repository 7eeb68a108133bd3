use anyhow::bail;
use batchid::{BatchConfig, BatchSize, Capabilities};
use clap::Parser;

/// Runtime configuration for the `batchid-loadgen` binary.
///
/// Every setting can come from a CLI flag or an environment variable (a
/// `.env` file is loaded first). The defaults give a short run that still
/// forces many fills per session.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "batchid-loadgen",
    version,
    about = "Drives concurrent sessions through batchid and verifies every generated key"
)]
pub struct CliArgs {
    /// Number of concurrent sessions, one thread each.
    ///
    /// Defaults to the number of logical CPUs.
    ///
    /// Environment variable: `SESSIONS`
    #[arg(long, env = "SESSIONS")]
    pub sessions: Option<usize>,

    /// Records each session prepares and assigns keys to.
    ///
    /// Environment variable: `RECORDS_PER_SESSION`
    #[arg(long, env = "RECORDS_PER_SESSION", default_value_t = 10_000)]
    pub records_per_session: usize,

    /// Default batch size: how many pending records one fill inserts.
    ///
    /// Environment variable: `BATCH_SIZE`
    #[arg(long, env = "BATCH_SIZE", default_value_t = 50)]
    pub batch_size: usize,

    /// Upper bound on how many records a session prepares, or how many keys
    /// it requests, in one burst. Burst sizes are drawn uniformly from
    /// `1..=MAX_BURST`.
    ///
    /// Environment variable: `MAX_BURST`
    #[arg(long, env = "MAX_BURST", default_value_t = 64)]
    pub max_burst: usize,

    /// First key the in-memory table generates.
    ///
    /// Environment variable: `FIRST_KEY`
    #[arg(long, env = "FIRST_KEY", default_value_t = 1)]
    pub first_key: u64,

    /// Seed for the burst size generator. Each session derives its own
    /// stream from it, so a run is reproducible per session.
    ///
    /// Environment variable: `SEED`
    #[arg(long, env = "SEED", default_value_t = 0x5eed)]
    pub seed: u64,

    /// Pretend the store cannot return keys for batch inserts, which makes
    /// the coordinator insert one row at a time.
    #[arg(long, default_value_t = false)]
    pub single_row: bool,
}

#[derive(Debug, Clone)]
pub struct LoadConfig {
    pub sessions: usize,
    pub records_per_session: usize,
    pub batch: BatchConfig,
    pub max_burst: usize,
    pub first_key: u64,
    pub seed: u64,
    pub capabilities: Capabilities,
}

impl LoadConfig {
    /// Total number of records the run prepares.
    pub const fn total_records(&self) -> usize {
        self.sessions * self.records_per_session
    }
}

impl TryFrom<CliArgs> for LoadConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let sessions = args.sessions.unwrap_or_else(num_cpus::get);
        if sessions == 0 {
            bail!("SESSIONS must be greater than 0");
        }

        if args.records_per_session == 0 {
            bail!("RECORDS_PER_SESSION must be greater than 0");
        }

        if sessions.checked_mul(args.records_per_session).is_none() {
            bail!(
                "SESSIONS ({}) * RECORDS_PER_SESSION ({}) overflows",
                sessions,
                args.records_per_session
            );
        }

        if args.max_burst == 0 {
            bail!("MAX_BURST must be greater than 0");
        }

        let Ok(batch_size) = BatchSize::try_from(args.batch_size) else {
            bail!("BATCH_SIZE must be greater than 0");
        };

        let capabilities = Capabilities {
            batch_generated_keys: !args.single_row,
            ..Capabilities::batching()
        };

        Ok(Self {
            sessions,
            records_per_session: args.records_per_session,
            batch: BatchConfig::new(batch_size),
            max_burst: args.max_burst,
            first_key: args.first_key,
            seed: args.seed,
            capabilities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchid::InsertMode;

    // Built directly rather than parsed so that `SESSIONS` and friends in the
    // test environment cannot leak in.
    fn args() -> CliArgs {
        CliArgs {
            sessions: None,
            records_per_session: 10_000,
            batch_size: 50,
            max_burst: 64,
            first_key: 1,
            seed: 0x5eed,
            single_row: false,
        }
    }

    #[test]
    fn flags_are_parsed_and_validated() {
        let args = CliArgs::try_parse_from([
            "batchid-loadgen",
            "--sessions",
            "3",
            "--records-per-session",
            "100",
            "--batch-size",
            "7",
            "--single-row",
        ])
        .unwrap();
        let config = LoadConfig::try_from(args).unwrap();
        assert_eq!(config.sessions, 3);
        assert_eq!(config.batch.default_batch_size.get(), 7);
        assert_eq!(config.capabilities.insert_mode(), InsertMode::SingleRow);
        assert_eq!(config.total_records(), 300);
    }

    #[test]
    fn zero_values_are_rejected() {
        let zero_sessions = CliArgs {
            sessions: Some(0),
            ..args()
        };
        assert!(LoadConfig::try_from(zero_sessions).is_err());
        assert!(LoadConfig::try_from(CliArgs { batch_size: 0, ..args() }).is_err());
        assert!(LoadConfig::try_from(CliArgs { max_burst: 0, ..args() }).is_err());
        assert!(LoadConfig::try_from(CliArgs { records_per_session: 0, ..args() }).is_err());
    }

    #[test]
    fn sessions_default_to_cpu_count() {
        let config = LoadConfig::try_from(args()).unwrap();
        assert_eq!(config.sessions, num_cpus::get());
        assert_eq!(config.capabilities.insert_mode(), InsertMode::Batched);
    }
}
