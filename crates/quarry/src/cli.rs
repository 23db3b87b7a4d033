use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;

use quarry_engine::MAX_WORKERS;

/// Command-line arguments for the master process.
#[derive(Debug, Clone, Parser)]
#[command(name = "quarry", version, about = "Multi-process cooperative problem solver")]
pub struct Cli {
    /// Number of worker processes to spawn.
    #[arg(
        short = 'w',
        long,
        env = "QUARRY_WORKERS",
        default_value_t = 1,
        value_parser = clap::value_parser!(u16).range(1..=MAX_WORKERS as i64)
    )]
    pub workers: u16,

    /// Total number of problems to generate.
    #[arg(short = 'p', long, env = "QUARRY_PROBLEMS", default_value_t = 0)]
    pub problems: usize,

    /// Problem kind to enable (repeatable): 1 = trivial, 2 = miner.
    #[arg(
        short = 't',
        long = "kind",
        value_parser = clap::value_parser!(u16).range(0..=31)
    )]
    pub kinds: Vec<u16>,

    /// Difficulty cap for miner problems (leading zero bits).
    #[arg(
        long,
        env = "QUARRY_DIFFICULTY",
        default_value_t = 25,
        value_parser = clap::value_parser!(u16).range(1..=256)
    )]
    pub difficulty: u16,

    /// Seed for the problem generator (random when omitted).
    #[arg(long)]
    pub seed: Option<u64>,

    /// Worker executable (default: `quarry-worker` next to this binary).
    #[arg(long, env = "QUARRY_WORKER_BIN")]
    pub worker_bin: Option<PathBuf>,

    /// Append audit events to this file as JSON lines.
    #[arg(long)]
    pub audit_log: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl Cli {
    /// Bit mask of the enabled problem kinds.
    pub fn kind_mask(&self) -> u32 {
        self.kinds.iter().fold(0, |mask, kind| mask | (1 << kind))
    }
}

pub fn default_worker_bin() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe().context("locate current executable")?;
    let dir = exe.parent().context("executable has no parent directory")?;
    Ok(dir.join("quarry-worker"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_flags_fold_into_a_mask() {
        let cli = Cli::parse_from(["quarry", "-t", "1", "-t", "2"]);
        assert_eq!(cli.kind_mask(), 0b110);

        let none = Cli::parse_from(["quarry"]);
        assert_eq!(none.kind_mask(), 0);
    }

    #[test]
    fn worker_count_is_bounded() {
        assert!(Cli::try_parse_from(["quarry", "-w", "0"]).is_err());
        assert!(Cli::try_parse_from(["quarry", "-w", "33"]).is_err());
        assert!(Cli::try_parse_from(["quarry", "-w", "32"]).is_ok());
    }
}
