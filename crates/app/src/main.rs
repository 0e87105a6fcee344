use std::fmt;
use std::io::Write as _;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_subscriber::EnvFilter;

use facts_core::model::FactKey;
use services::config::parse_uuid;
use services::{
    Clock, CoreConfig, Durability, PracticeServices, ResponseReceipt, SessionError,
    SessionState, SessionTracker,
};

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidDbUrl { raw: String },
    InvalidUserId { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidUserId { raw } => write!(f, "invalid --user value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- practice [--db <sqlite_url>] [--user <uuid>]");
    eprintln!("  cargo run -p app -- progress [--db <sqlite_url>]");
    eprintln!("  cargo run -p app -- seed     [--db <sqlite_url>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite:facts.sqlite3");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  FACTS_DB_URL, FACTS_USER_ID, FACTS_REMOTE_URL, FACTS_REMOTE_KEY,");
    eprintln!("  FACTS_HISTORY_LIMIT, FACTS_TARGET_SCORE, FACTS_RESPONSE_WINDOW_SECS, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Practice,
    Progress,
    Seed,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "practice" => Some(Self::Practice),
            "progress" => Some(Self::Progress),
            "seed" => Some(Self::Seed),
            _ => None,
        }
    }
}

/// Applies `--db` / `--user` on top of the environment configuration.
fn parse_overrides(
    args: &mut impl Iterator<Item = String>,
    mut config: CoreConfig,
) -> Result<CoreConfig, ArgsError> {
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--db" => {
                let value = require_value(args, "--db")?;
                if value.trim().is_empty() {
                    return Err(ArgsError::InvalidDbUrl { raw: value });
                }
                config = config.with_db_url(value);
            }
            "--user" => {
                let value = require_value(args, "--user")?;
                let user_id = parse_uuid("--user", &value)
                    .map_err(|_| ArgsError::InvalidUserId { raw: value.clone() })?;
                config = config.with_user_id(user_id);
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            _ => return Err(ArgsError::UnknownArg(arg)),
        }
    }
    let db_url = normalize_sqlite_url(config.db_url.clone());
    Ok(config.with_db_url(db_url))
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") || raw.starts_with("sqlite:file:") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let Some(path) = db_url.strip_prefix("sqlite://") else {
        // In-memory and `sqlite:file:` URLs need no file on disk.
        return Ok(());
    };
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,app=info,services=info,storage=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

//
// ─── COMMANDS ──────────────────────────────────────────────────────────────────
//

type StdinLines = Lines<BufReader<Stdin>>;

fn prompt(text: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    write!(stdout, "{text}")?;
    stdout.flush()
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn report(fact: FactKey, receipt: &ResponseReceipt) {
    let answer = fact.product();
    if receipt.response.timed_out() {
        println!("  time's up: {fact} = {answer}");
    } else if receipt.response.is_correct() {
        println!("  correct!");
    } else {
        println!("  not quite: {fact} = {answer}");
    }
    println!(
        "  score {}  (box {}, streak {})",
        receipt.score,
        receipt.record.leitner_box.value(),
        receipt.record.streak
    );
}

/// Answers the presented fact, falling back to a timeout if the alarm won.
async fn submit_or_expire(
    tracker: &mut SessionTracker,
    is_correct: bool,
    response_time_ms: u64,
) -> Result<ResponseReceipt, SessionError> {
    match tracker.submit(is_correct, response_time_ms).await {
        Err(SessionError::ResponseExpired(_)) => tracker.expire().await,
        other => other,
    }
}

/// `true` unless the learner declines or stdin is closed.
async fn ask_to_continue(lines: &mut StdinLines) -> std::io::Result<bool> {
    prompt("Continue? [Y/n] ")?;
    Ok(match lines.next_line().await? {
        Some(answer) => !matches!(answer.trim(), "n" | "N" | "q"),
        None => false,
    })
}

async fn practice(services: &PracticeServices) -> Result<(), Box<dyn std::error::Error>> {
    let mut tracker = services.open_tracker().await;
    if tracker.durability() == Durability::MemoryOnly {
        println!("Local storage is unavailable; this run will not be saved.");
    }
    if tracker.state() == SessionState::InProgress {
        println!("Resuming run with score {}.", tracker.score());
    } else {
        tracker.start().await?;
    }
    println!(
        "Reach {} points. Type the product, or q to stop.",
        tracker.settings().target_score
    );

    let engine = services.engine();
    let mut rng = rand::rng();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let fact = engine.select_next(
            tracker.records(),
            tracker.last_fact(),
            services.clock().now(),
            &mut rng,
        );
        prompt(&format!(
            "{} x {} = ",
            fact.multiplicand(),
            fact.multiplier()
        ))?;
        let expiry = tracker.present(fact)?;
        let shown = Instant::now();

        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line == "q" {
                    break;
                }
                let is_correct = line.parse::<u16>().ok() == Some(fact.product());
                let receipt = submit_or_expire(&mut tracker, is_correct, elapsed_ms(shown)).await?;
                report(fact, &receipt);
                if receipt.reached_target {
                    println!("Target reached!");
                    break;
                }
            }
            fired = expiry.wait() => {
                if !fired {
                    break;
                }
                println!();
                let receipt = tracker.expire().await?;
                report(fact, &receipt);
                if !ask_to_continue(&mut lines).await? {
                    break;
                }
            }
        }
    }

    let finished = tracker.finish().await?;
    let summary = finished.summary;
    println!(
        "Run finished: score {}, {} facts, {} correct, {} timed out.",
        finished.run.score(),
        summary.fact_count,
        summary.correct_count,
        summary.timed_out_count
    );
    if finished.durability == Durability::MemoryOnly {
        println!("Could not save progress locally; it is lost when you quit.");
    }
    if let Some(sync) = finished.sync {
        // Give the final upload a chance before the runtime shuts down.
        let _ = sync.await;
    }
    Ok(())
}

async fn progress(services: &PracticeServices) -> Result<(), Box<dyn std::error::Error>> {
    let records = services.progress().load().await;
    let now = services.clock().now();
    println!("fact     box  streak  acc   diff  due");
    for record in records.iter().filter(|r| r.attempts > 0) {
        let due = if record.is_due(now) {
            "now".to_string()
        } else {
            record.next_practice_due.format("%Y-%m-%d").to_string()
        };
        println!(
            "{:<8} {:>3}  {:>6}  {:>3.0}%  {:>4.1}  {due}",
            record.fact.to_string(),
            record.leitner_box.value(),
            record.streak,
            record.accuracy() * 100.0,
            record.difficulty_rating,
        );
    }

    let runs = services.recent_runs(10).await?;
    if !runs.is_empty() {
        println!();
        println!("recent runs:");
    }
    for run in runs {
        let summary = run.summary();
        println!(
            "  {}  score {:>4}  {}/{} correct",
            run.started_at().format("%Y-%m-%d %H:%M"),
            run.score(),
            summary.correct_count,
            summary.fact_count
        );
    }
    Ok(())
}

async fn seed(services: &PracticeServices) -> Result<(), Box<dyn std::error::Error>> {
    let records = services.progress().load().await;
    if services.progress().is_memory_only() {
        return Err("local store is unavailable; nothing was seeded".into());
    }
    println!(
        "{} fact records ready in {}",
        records.len(),
        services.config().db_url
    );
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);

    let cmd = match argv.next().as_deref() {
        None | Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    let config = parse_overrides(&mut argv, CoreConfig::from_env()?).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    tracing::info!(command = ?cmd, db_url = %config.db_url, "opening practice store");
    prepare_sqlite_file(&config.db_url)?;
    let services = PracticeServices::new_sqlite(config, Clock::system()).await?;

    match cmd {
        Command::Practice => practice(&services).await,
        Command::Progress => progress(&services).await,
        Command::Seed => seed(&services).await,
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
