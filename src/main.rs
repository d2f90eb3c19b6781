//! logicdb protocol binary
//!
//! Usage: logicdb [FILE]
//!
//! Reads SQL lines from FILE (or stdin). A blank line executes the lines
//! collected so far; the response is written to stdout. Logs go to stderr
//! and are controlled with `RUST_LOG`.

use std::{
    fs::File,
    io::{self, BufRead, BufReader, Write},
    path::PathBuf,
    process::ExitCode,
};

use clap::{Parser, ValueEnum};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use logicdb::{
    config::{DivisionByZero, EngineConfig},
    format::{BlockReader, format_response, trim_block},
    sql::{
        engine::{Engine, KVEngine, Session},
        executor::ResultSet,
    },
    storage::memory::MemoryEngine,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DivisionMode {
    Null,
    Error,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum NullsOrder {
    /// NULL is the smallest value
    First,
    /// NULL is the largest value
    Last,
}

#[derive(Parser)]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "In-memory SQL engine speaking a line-oriented text protocol")]
struct Cli {
    /// Script to run instead of reading stdin
    file: Option<PathBuf>,

    /// Text printed for NULL values
    #[arg(long, default_value = "NULL")]
    null_text: String,

    /// Decimals printed for REAL values
    #[arg(long, default_value = "3")]
    real_precision: Option<usize>,

    /// Print REAL values in their shortest exact form
    #[arg(long, conflicts_with = "real_precision")]
    shortest_reals: bool,

    /// Result of division or remainder by zero
    #[arg(long, value_enum, default_value = "null")]
    division_by_zero: DivisionMode,

    /// Where NULL sorts under ascending order
    #[arg(long, value_enum, default_value = "first")]
    nulls: NullsOrder,

    /// Maximum subquery nesting
    #[arg(long, default_value_t = 64)]
    max_subquery_depth: usize,
}

impl Cli {
    fn config(&self) -> EngineConfig {
        EngineConfig {
            null_text: self.null_text.clone(),
            real_precision: match self.shortest_reals {
                true => None,
                false => self.real_precision,
            },
            division_by_zero: match self.division_by_zero {
                DivisionMode::Null => DivisionByZero::Null,
                DivisionMode::Error => DivisionByZero::Error,
            },
            nulls_first: matches!(self.nulls, NullsOrder::First),
            max_subquery_depth: self.max_subquery_depth,
        }
    }
}

fn run<E: Engine + 'static>(
    session: &mut Session<E>,
    input: impl BufRead,
    out: &mut impl Write,
) -> io::Result<()> {
    let mut blocks = BlockReader::default();
    let mut execute = |block: String, out: &mut dyn Write| -> io::Result<()> {
        let sql = trim_block(&block);
        let result = match sql.is_empty() {
            true => Ok(ResultSet::Empty),
            false => session.execute(sql),
        };
        if let Err(err) = &result {
            debug!(%err, sql, "block failed");
        }
        out.write_all(format_response(&result, session.config()).as_bytes())?;
        out.flush()
    };

    for line in input.lines() {
        if let Some(block) = blocks.push_line(&line?) {
            execute(block, &mut *out)?;
        }
    }
    if let Some(block) = blocks.finish() {
        execute(block, &mut *out)?;
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let engine = KVEngine::new(MemoryEngine::new());
    let mut session = match engine.session_with_config(cli.config()) {
        Ok(session) => session,
        Err(err) => {
            error!(%err, "failed to start session");
            return ExitCode::FAILURE;
        }
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let result = match &cli.file {
        Some(path) => {
            info!(path = %path.display(), "running script");
            File::open(path).and_then(|f| run(&mut session, BufReader::new(f), &mut out))
        }
        None => run(&mut session, io::stdin().lock(), &mut out),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "i/o error");
            ExitCode::FAILURE
        }
    }
}
