//! CLI entry point for `sendersweep`.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use sendersweep::archive::ArchiveStore;
use sendersweep::config::{self, Config, SourceKind};
use sendersweep::group::SenderGroups;
use sendersweep::model::Message;
use sendersweep::pipeline::{
    CleanupResult, Decision, DecisionSet, EventSink, Pipeline, PipelineEvent, PipelineRun, Stage,
};
use sendersweep::source::gmail::GmailSource;
use sendersweep::source::maildir::MaildirSource;
use sendersweep::source::MailSource;

/// Subjects shown per sender during review.
const REVIEW_SUBJECTS: usize = 2;

#[derive(Parser)]
#[command(name = "sendersweep", version, about = "Bulk inbox cleanup by sender, archive first")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Read mail from this Maildir instead of the configured source
    #[arg(long, global = true, value_name = "DIR", conflicts_with = "gmail")]
    maildir: Option<PathBuf>,

    /// Read mail from Gmail (token taken from the configured env variable)
    #[arg(long, global = true)]
    gmail: bool,

    /// Archive directory (overrides the config file)
    #[arg(long, global = true, value_name = "DIR")]
    archive_dir: Option<PathBuf>,

    /// Apply worker threads (overrides the config file)
    #[arg(long, global = true, value_name = "N")]
    workers: Option<usize>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch recent mail and show it grouped by sender
    Scan {
        /// Messages to fetch (1-500)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
        /// Save the fetched run for a later `apply`
        #[arg(long, value_name = "FILE")]
        save_run: Option<PathBuf>,
    },
    /// Review senders and archive-then-trash the ones marked for deletion
    Clean {
        /// Messages to fetch (1-500)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Take decisions from a TOML/JSON file instead of prompting
        #[arg(short, long, value_name = "FILE")]
        decisions: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Apply a decisions file to a run saved by `scan --save-run`
    Apply {
        #[arg(long, value_name = "FILE")]
        run: PathBuf,
        #[arg(short, long, value_name = "FILE")]
        decisions: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Inspect the local archive
    Archive {
        #[command(subcommand)]
        command: ArchiveCommand,
    },
    /// Write the current configuration to the config file
    InitConfig,
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

#[derive(Subcommand)]
enum ArchiveCommand {
    /// List archived messages
    List {
        #[arg(long)]
        json: bool,
    },
    /// Print one archived record as JSON
    Show { id: String },
    /// Re-check every record's digest
    Verify {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = config::load_config();
    if let Some(dir) = &cli.archive_dir {
        config.archive.dir = Some(dir.clone());
    }
    if let Some(workers) = cli.workers {
        config.apply.workers = workers;
    }
    if let Some(dir) = &cli.maildir {
        config.source.kind = SourceKind::Maildir;
        config.source.maildir = Some(dir.clone());
    } else if cli.gmail {
        config.source.kind = SourceKind::Gmail;
    }

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Scan {
            limit,
            json,
            save_run,
        } => cmd_scan(&config, limit, json, save_run.as_deref()),
        Commands::Clean {
            limit,
            decisions,
            json,
        } => cmd_clean(&config, limit, decisions.as_deref(), json),
        Commands::Apply {
            run,
            decisions,
            json,
        } => cmd_apply(&config, &run, &decisions, json),
        Commands::Archive { command } => cmd_archive(&config, command),
        Commands::InitConfig => cmd_init_config(&config),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_path = config::log_file_path(config);
    let log_dir = log_path.parent().map(Path::to_path_buf).unwrap_or_default();
    let log_name = log_path.file_name().unwrap_or_default();
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, log_name);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Open the configured mail source.
fn open_source(config: &Config) -> anyhow::Result<Box<dyn MailSource>> {
    let source: Box<dyn MailSource> = match config.source.kind {
        SourceKind::Maildir => {
            let dir = config
                .source
                .maildir
                .as_ref()
                .context("no Maildir configured (use --maildir or set [source] maildir)")?;
            Box::new(MaildirSource::open(dir)?)
        }
        SourceKind::Gmail => Box::new(GmailSource::from_env(
            &config.source.gmail_token_env,
            &config.source.gmail_user,
            &config.source.label,
        )?),
    };
    Ok(source)
}

fn build_pipeline(
    config: &Config,
    events: EventSink,
) -> anyhow::Result<Pipeline<Box<dyn MailSource>, ArchiveStore>> {
    let source = open_source(config)?;
    let archive = ArchiveStore::open(config::archive_dir(config))?;
    Ok(Pipeline::new(source, archive)
        .with_retry(config.retry.clone())
        .with_save_attempts(config.archive.save_attempts)
        .with_workers(config.apply.workers)
        .with_events(events))
}

fn bar(message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}/{len}")
            .expect("valid template")
            .progress_chars("#>-"),
    );
    pb.set_message(message);
    pb
}

/// Drive one progress bar while fetching and another while applying.
fn progress_sink() -> EventSink {
    let fetch = bar("Fetching");
    let apply = bar("Archiving and trashing");
    Box::new(move |event: &PipelineEvent<'_>| match *event {
        PipelineEvent::FetchProgress { done, total } => {
            fetch.set_length(total as u64);
            fetch.set_position(done as u64);
        }
        PipelineEvent::GroupsReady { .. } => fetch.finish_and_clear(),
        PipelineEvent::ApplyStarted { messages, .. } => {
            apply.set_length(messages as u64);
            apply.set_position(0);
        }
        PipelineEvent::MessageApplied { .. } => apply.inc(1),
        PipelineEvent::Finished { .. } => {
            fetch.finish_and_clear();
            apply.finish_and_clear();
        }
    })
}

fn fetch_limit(config: &Config, limit: Option<usize>) -> usize {
    match limit {
        Some(n) => config::clamp_fetch(n),
        None => config.fetch.limit(),
    }
}

/// Fetch and group without changing anything.
fn cmd_scan(config: &Config, limit: Option<usize>, json: bool, save_run: Option<&Path>) -> anyhow::Result<()> {
    let pipeline = build_pipeline(config, progress_sink())?;
    let run = pipeline.fetch(fetch_limit(config, limit))?;

    if json {
        print_groups_json(&run)?;
    } else {
        print_groups_table(run.groups(), run.messages());
        if !run.missing().is_empty() {
            println!("  {} message(s) disappeared while fetching", run.missing().len());
        }
        if !run.unreadable().is_empty() {
            println!("  {} message(s) could not be read and were left in place:", run.unreadable().len());
            for failure in run.unreadable() {
                println!("    {}: {}", failure.id, failure.reason);
            }
        }
    }

    if let Some(path) = save_run {
        run.save(path)?;
        if !json {
            println!("  Saved run {} to {}", run.run_id, path.display());
        }
    }
    Ok(())
}

/// Fetch, review, and apply in one go.
fn cmd_clean(
    config: &Config,
    limit: Option<usize>,
    decisions: Option<&Path>,
    json: bool,
) -> anyhow::Result<()> {
    let pipeline = build_pipeline(config, progress_sink())?;
    let result = match decisions {
        Some(path) => {
            let mut set = DecisionSet::load(path)?;
            pipeline.run(fetch_limit(config, limit), &mut set)?
        }
        None => {
            let mut prompt = |groups: &SenderGroups, messages: &[Message]| {
                review(groups, messages, &mut std::io::stdin().lock(), &mut std::io::stdout())
            };
            pipeline.run(fetch_limit(config, limit), &mut prompt)?
        }
    };

    print_result(&result, pipeline.archive().root(), json)
}

/// Apply decisions to a saved run and write the updated run back.
fn cmd_apply(config: &Config, run_path: &Path, decisions: &Path, json: bool) -> anyhow::Result<()> {
    let mut run = PipelineRun::load(run_path)?;
    if !matches!(run.stage(), Stage::AwaitingDecisions | Stage::AbortedPartial) {
        anyhow::bail!("run {} is already {}", run.run_id, run.stage());
    }
    let decisions = DecisionSet::load(decisions)?;

    let pipeline = build_pipeline(config, progress_sink())?;
    let result = pipeline.apply(&mut run, &decisions);
    // Persist the new stage even when the apply itself failed part way.
    run.save(run_path)?;
    print_result(&result?, pipeline.archive().root(), json)
}

/// Ask about each sender, biggest groups first.
fn review(
    groups: &SenderGroups,
    messages: &[Message],
    input: &mut dyn BufRead,
    out: &mut dyn Write,
) -> sendersweep::error::Result<DecisionSet> {
    let mut decisions = DecisionSet::new();
    let ordered = groups.by_size();
    writeln!(out)?;
    writeln!(out, "  {} sender(s), {} message(s)", groups.len(), groups.message_count())?;

    for (i, group) in ordered.iter().enumerate() {
        writeln!(out)?;
        writeln!(out, "  [{}/{}] {} ({} message(s))", i + 1, ordered.len(), group.sender.display(), group.len())?;
        print_subjects(out, group.messages(messages).map(Message::subject), group.len())?;

        let decision = loop {
            write!(out, "  Delete all from {}? [k]eep / [d]elete (default keep): ", group.sender_key)?;
            out.flush()?;
            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                // EOF: everything not yet answered stays.
                writeln!(out)?;
                return Ok(decisions);
            }
            match Decision::from_answer(&line) {
                Some(d) => break d,
                None => writeln!(out, "  Please answer k or d.")?,
            }
        };
        decisions.set(group.sender_key.clone(), decision);
    }
    Ok(decisions)
}

fn print_subjects<'a>(
    out: &mut dyn Write,
    subjects: impl Iterator<Item = &'a str>,
    total: usize,
) -> std::io::Result<()> {
    for subject in subjects.take(REVIEW_SUBJECTS) {
        let trunc: String = subject.chars().take(70).collect();
        writeln!(out, "      - {trunc}")?;
    }
    if total > REVIEW_SUBJECTS {
        writeln!(out, "      … +{} more", total - REVIEW_SUBJECTS)?;
    }
    Ok(())
}

fn print_groups_table(groups: &SenderGroups, messages: &[Message]) {
    println!();
    println!("  {} sender(s), {} message(s)", groups.len(), groups.message_count());
    println!();
    if groups.is_empty() {
        return;
    }
    println!("  {:>6}  {:<40} {}", "Count", "Sender", "Latest subject");
    println!("  {}", "-".repeat(98));
    let mut stdout = std::io::stdout();
    for group in groups.by_size() {
        let sender: String = group.sender_key.chars().take(39).collect();
        println!("  {:>6}  {:<40}", group.len(), sender);
        let _ = print_subjects(&mut stdout, group.messages(messages).map(Message::subject), group.len());
    }
    println!();
}

fn print_groups_json(run: &PipelineRun) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&groups_json(run))?);
    Ok(())
}

fn groups_json(run: &PipelineRun) -> serde_json::Value {
    let groups: Vec<serde_json::Value> = run
        .groups()
        .by_size()
        .into_iter()
        .map(|g| {
            serde_json::json!({
                "sender_key": g.sender_key,
                "sender": g.sender.display(),
                "count": g.len(),
                "messages": g.messages(run.messages()).map(|m| serde_json::json!({
                    "id": m.id,
                    "subject": m.subject(),
                    "received_at": m.received_at.to_rfc3339(),
                    "preview": m.preview(),
                })).collect::<Vec<_>>(),
            })
        })
        .collect();

    serde_json::json!({
        "run_id": run.run_id,
        "stage": run.stage().as_str(),
        "message_count": run.messages().len(),
        "missing": run.missing(),
        "unreadable": run.unreadable(),
        "senders": groups,
    })
}

/// Print the end-of-run summary.
fn print_result(result: &CleanupResult, archive_root: &Path, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        let s = &result.summary;
        println!();
        println!("  {:<25} {}", "Run", result.run_id);
        println!("  {:<25} {}", "Senders", s.senders);
        println!("  {:<25} {}", "Messages", s.messages);
        println!("  {:<25} {}", "Kept", s.kept);
        println!("  {:<25} {}", "Archived", s.archived);
        println!("  {:<25} {}", "Trashed", s.trashed);
        if s.already_gone > 0 {
            println!("  {:<25} {}", "  (already gone)", s.already_gone);
        }
        println!("  {:<25} {}", "Archived, not trashed", s.archived_not_trashed);
        println!("  {:<25} {}", "Archive failed", s.archive_failed);
        if s.not_attempted > 0 {
            println!("  {:<25} {}", "Not attempted", s.not_attempted);
        }
        if s.anomalies > 0 {
            println!("  {:<25} {}", "Archive conflicts", s.anomalies);
        }
        println!("  {:<25} {}", "Archive", archive_root.display());

        let failures: Vec<_> = result
            .senders
            .values()
            .flat_map(|r| r.failures.iter().map(move |f| (&r.sender_key, f)))
            .collect();
        if !failures.is_empty() {
            println!();
            println!("  Not cleaned:");
            for (sender, failure) in failures {
                println!("    {:<30} {:<20} {}", sender, failure.id, failure.reason);
            }
        }
        if let Some(reason) = &result.aborted {
            println!();
            println!("  Stopped early: {reason}");
        }
        println!();
    }

    if let Some(reason) = &result.aborted {
        anyhow::bail!("run {} stopped early: {reason}", result.run_id);
    }
    Ok(())
}

fn cmd_archive(config: &Config, command: ArchiveCommand) -> anyhow::Result<()> {
    let store = ArchiveStore::open(config::archive_dir(config))?;
    match command {
        ArchiveCommand::List { json } => {
            let records = store.list()?;
            if json {
                let items: Vec<serde_json::Value> = records
                    .iter()
                    .map(|r| {
                        serde_json::json!({
                            "id": r.message_id,
                            "sender_key": r.sender_key,
                            "subject": r.message.subject(),
                            "archived_at": r.archived_at.to_rfc3339(),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&items)?);
                return Ok(());
            }
            println!();
            println!("  {} record(s) in {}", records.len(), store.root().display());
            println!();
            for r in &records {
                let sender: String = r.sender_key.chars().take(29).collect();
                let subject: String = r.message.subject().chars().take(40).collect();
                println!(
                    "  {:<17} {:<24} {:<30} {}",
                    r.archived_at.format("%Y-%m-%d %H:%M"),
                    r.message_id,
                    sender,
                    subject
                );
            }
            println!();
        }
        ArchiveCommand::Show { id } => {
            let record = store
                .load(&id)?
                .with_context(|| format!("no archived message with id {id}"))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        ArchiveCommand::Verify { json } => {
            use humansize::{format_size, BINARY};

            let report = store.verify()?;
            if json {
                let invalid: Vec<serde_json::Value> = report
                    .invalid
                    .iter()
                    .map(|(path, reason)| serde_json::json!({ "path": path, "reason": reason }))
                    .collect();
                let output = serde_json::json!({
                    "valid": report.valid,
                    "invalid": invalid,
                    "superseded": report.superseded,
                    "leftover_tmp": report.leftover_tmp,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                let size: u64 = std::fs::read_dir(store.root())?
                    .filter_map(|e| e.ok())
                    .filter_map(|e| e.metadata().ok())
                    .map(|m| m.len())
                    .sum();
                println!();
                println!("  {:<20} {}", "Archive", store.root().display());
                println!("  {:<20} {}", "Size", format_size(size, BINARY));
                println!("  {:<20} {}", "Valid records", report.valid);
                println!("  {:<20} {}", "Invalid records", report.invalid.len());
                println!("  {:<20} {}", "Superseded copies", report.superseded);
                println!("  {:<20} {}", "Leftover temp files", report.leftover_tmp);
                for (path, reason) in &report.invalid {
                    println!("    {}: {reason}", path.display());
                }
                println!();
            }
            if !report.invalid.is_empty() {
                anyhow::bail!("{} archive record(s) failed verification", report.invalid.len());
            }
        }
    }
    Ok(())
}

fn cmd_init_config(config: &Config) -> anyhow::Result<()> {
    let path = config::save_config(config)?;
    println!("  Wrote {}", path.display());
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "sendersweep", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use sendersweep::model::{EmailAddress, Header, MessageBody};

    fn msg(id: &str, from: &str, subject: &str) -> Message {
        Message {
            id: id.into(),
            sender: EmailAddress::parse(from),
            headers: vec![Header::new("Subject", subject)],
            body: MessageBody::default(),
            attachments: Vec::new(),
            received_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_review_reprompts_and_defaults_to_keep() {
        let messages = vec![
            msg("1", "deals@shop.com", "Sale"),
            msg("2", "deals@shop.com", "Sale again"),
            msg("3", "deals@shop.com", "Last chance"),
            msg("4", "friend@home.org", "Hi"),
        ];
        let groups = sendersweep::group::group(&messages);
        let mut input = std::io::Cursor::new("maybe\nd\n\n");
        let mut out = Vec::new();

        let decisions = review(&groups, &messages, &mut input, &mut out).unwrap();
        assert_eq!(decisions.get("deals@shop.com"), Decision::Delete);
        assert_eq!(decisions.get("friend@home.org"), Decision::Keep);

        let shown = String::from_utf8(out).unwrap();
        assert!(shown.contains("Please answer k or d."));
        assert!(shown.contains("… +1 more"));
    }

    #[test]
    fn test_review_eof_keeps_the_rest() {
        let messages = vec![msg("1", "a@x.com", "A"), msg("2", "b@y.com", "B")];
        let groups = sendersweep::group::group(&messages);
        let mut input = std::io::Cursor::new("d\n");
        let mut out = Vec::new();

        let decisions = review(&groups, &messages, &mut input, &mut out).unwrap();
        assert_eq!(decisions.delete_count(), 1);
        assert_eq!(decisions.iter().count(), 1);
    }

    #[test]
    fn test_groups_json_lists_unreadable_messages() {
        use sendersweep::source::memory::{FaultKind, MemorySource, Op};

        let dir = tempfile::tempdir().unwrap();
        let source = MemorySource::new(vec![
            msg("1", "deals@shop.com", "Sale"),
            msg("2", "deals@shop.com", "Broken"),
        ]);
        source.fail_always(Op::Fetch, Some("2"), FaultKind::Malformed);
        let pipeline = Pipeline::new(&source, ArchiveStore::open(dir.path()).unwrap());
        let run = pipeline.fetch(10).unwrap();

        let value = groups_json(&run);
        assert_eq!(value["message_count"], 1);
        assert_eq!(value["unreadable"][0]["id"], "2");
        assert!(value["unreadable"][0]["reason"].as_str().unwrap().contains("empty"));
        assert_eq!(value["senders"][0]["count"], 1);
    }

    #[test]
    fn test_fetch_limit_prefers_flag_and_clamps() {
        let mut config = Config::default();
        config.fetch.max_fetch = 1_000_000;
        assert_eq!(fetch_limit(&config, None), config.fetch.limit());
        assert_eq!(fetch_limit(&config, Some(0)), config::clamp_fetch(0));
        assert_eq!(fetch_limit(&config, Some(25)), 25);
    }

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }
}
