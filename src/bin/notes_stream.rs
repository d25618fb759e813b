//! notes-stream: 流式生成与任务监控的命令行工具
//!
//! Usage:
//!   notes-stream enhance <note_id>              Stream an AI enhancement of a note
//!   notes-stream summary <note_id>              Stream a note summary
//!   notes-stream ask <note_id> <question>       Stream an answer about a note
//!   notes-stream blog <title> <content>         Stream a multi-section blog post
//!   notes-stream quiz <note_id>                 Generate a quiz and follow its task
//!   notes-stream watch <task_id>                Print raw task-status messages

use anyhow::{anyhow, bail, Context};
use notes_stream::orchestrator::{GenerationKind, GenerationRequest, QuizOutcome};
use notes_stream::ws::{MonitorEvent, TaskMonitor};
use notes_stream::{
    api::ApiClient, ClientConfig, CookieJar, Credentials, HttpTransport, NoCredentials,
    QuizGenerator, SseStreamClient, StaticCsrf, StreamEvent, StreamOrchestrator,
};
use std::io::Write;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let result = match args[1].as_str() {
        "enhance" | "summary" | "ask" | "blog" => cmd_stream(&args[1], &args[2..]).await,
        "quiz" => cmd_quiz(&args[2..]).await,
        "watch" => cmd_watch(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("notes-stream {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn print_usage() {
    println!(
        r#"notes-stream: 流式生成与任务监控工具

USAGE:
    notes-stream <COMMAND> [ARGS] [--config <file>]

COMMANDS:
    enhance <note_id>           Stream an AI enhancement of a note
    summary <note_id>           Stream a note summary
    ask <note_id> <question>    Stream an answer to a question about a note
    blog <title> <content>      Stream a multi-section blog post
    quiz <note_id>              Generate a quiz (up to 3 attempts)
    watch <task_id>             Print task-status messages until the task ends
    version                     Show version information
    help                        Show this help message

ENVIRONMENT:
    NOTES_API_URL                   Backend base URL (default http://localhost:8010/api/v1)
    NOTES_CSRF_TOKEN                Anti-forgery token sent on non-GET requests
    NOTES_COOKIE                    Raw Cookie header (csrf_token is read from it)
    NOTES_CONNECT_TIMEOUT_SECS      HTTP connect timeout
    NOTES_STREAM_IDLE_TIMEOUT_SECS  Fail a stream idle for this long
    NOTES_STREAM_MAX_RETRIES        Reconnect attempts before any output
    RUST_LOG                        Log filter (default info)"#
    );
}

/// Split off `--config <file>` and return the remaining positional arguments.
fn load_config(args: &[String]) -> anyhow::Result<(ClientConfig, Vec<String>)> {
    let mut rest = Vec::new();
    let mut config_path = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            config_path = Some(iter.next().context("--config needs a path")?);
        } else {
            rest.push(arg.clone());
        }
    }
    let config = match config_path {
        Some(path) => ClientConfig::from_yaml_file(path)
            .with_context(|| format!("loading config from {path}"))?,
        None => ClientConfig::from_env()?,
    };
    Ok((config, rest))
}

fn credentials() -> Arc<dyn Credentials> {
    if let Ok(cookie) = std::env::var("NOTES_COOKIE") {
        return Arc::new(CookieJar::new(cookie));
    }
    match std::env::var("NOTES_CSRF_TOKEN") {
        Ok(token) => Arc::new(StaticCsrf(token)),
        Err(_) => Arc::new(NoCredentials),
    }
}

fn parse_note_id(raw: Option<&String>) -> anyhow::Result<i64> {
    let raw = raw.ok_or_else(|| anyhow!("missing <note_id>"))?;
    raw.parse()
        .with_context(|| format!("<note_id> must be an integer, got '{raw}'"))
}

async fn cmd_stream(command: &str, args: &[String]) -> anyhow::Result<()> {
    let (config, args) = load_config(args)?;
    let request = match command {
        "enhance" => GenerationRequest::Enhance {
            note_id: parse_note_id(args.first())?,
        },
        "summary" => GenerationRequest::Summary {
            note_id: parse_note_id(args.first())?,
        },
        "ask" => {
            let question = args.get(1..).unwrap_or_default().join(" ");
            if question.is_empty() {
                bail!("missing <question>");
            }
            GenerationRequest::Ask {
                note_id: parse_note_id(args.first())?,
                question,
            }
        }
        "blog" => {
            let (Some(title), Some(content)) = (args.first(), args.get(1)) else {
                bail!("missing <title> or <content>");
            };
            GenerationRequest::Blog {
                title: title.clone(),
                content: content.clone(),
            }
        }
        other => bail!("not a streaming command: {other}"),
    };

    let transport = Arc::new(HttpTransport::new(&config, credentials())?);
    let client = SseStreamClient::new(transport).with_retry(config.stream_retry.policy());
    let kind = request.kind();
    let orchestrator = Arc::new(StreamOrchestrator::new(
        kind,
        client,
        config.endpoints.clone(),
    ));

    let stopper = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.stop();
        }
    });

    let mut current_section: Option<String> = None;
    let mut print = |event: StreamEvent| {
        let mut out = std::io::stdout();
        match event {
            StreamEvent::Started { task_id } => eprintln!("[task {task_id}]"),
            StreamEvent::EntityCreated { entity_id } => eprintln!("[created {entity_id}]"),
            StreamEvent::SectionStarted { stage } => eprintln!("[{stage}]"),
            StreamEvent::Chunk { section, text } => {
                if section.is_some() && section != current_section {
                    let _ = writeln!(out, "\n== {} ==", section.as_deref().unwrap_or_default());
                    current_section = section;
                }
                let _ = write!(out, "{text}");
                let _ = out.flush();
            }
            StreamEvent::SectionComplete { .. } => {}
            StreamEvent::Completed { .. } => {
                let _ = writeln!(out);
            }
            StreamEvent::Failed { message } => eprintln!("\n[failed] {message}"),
            StreamEvent::Reconnecting { attempt, delay } => {
                eprintln!("[reconnecting, attempt {attempt}, in {delay:?}]")
            }
        }
    };

    let outcome = orchestrator.start_with(request, &mut print).await?;
    let session = outcome.session();
    if kind == GenerationKind::BlogSections && outcome.is_completed() {
        eprintln!(
            "[sections: {}]",
            session.sections().keys().collect::<Vec<_>>().join(", ")
        );
    }
    if outcome.is_cancelled() {
        eprintln!("[stopped]");
    } else if !outcome.is_completed() {
        bail!(session.last_error().unwrap_or("stream failed").to_string());
    }
    Ok(())
}

async fn cmd_quiz(args: &[String]) -> anyhow::Result<()> {
    let (config, args) = load_config(args)?;
    let note_id = args.first().ok_or_else(|| anyhow!("missing <note_id>"))?;

    let transport = Arc::new(HttpTransport::new(&config, credentials())?);
    let api = Arc::new(ApiClient::new(transport, config.endpoints.clone()));
    let generator = Arc::new(QuizGenerator::new(api, config));

    let mut view = generator.subscribe();
    tokio::spawn(async move {
        while view.changed().await.is_ok() {
            let v = view.borrow_and_update().clone();
            if let Some(p) = v.progress {
                eprintln!(
                    "[attempt {}/{}] {}% {}",
                    v.attempt,
                    v.max_attempts,
                    p,
                    v.status.as_deref().unwrap_or("")
                );
            }
        }
    });

    let stopper = generator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.stop();
        }
    });

    match generator.generate(note_id).await {
        QuizOutcome::Generated(quiz) => {
            println!("{}", serde_json::to_string_pretty(&quiz)?);
            Ok(())
        }
        QuizOutcome::Failed(message) => bail!(message),
        QuizOutcome::Cancelled => {
            eprintln!("[stopped]");
            Ok(())
        }
    }
}

async fn cmd_watch(args: &[String]) -> anyhow::Result<()> {
    let (config, args) = load_config(args)?;
    let task_id = args.first().ok_or_else(|| anyhow!("missing <task_id>"))?;

    let (monitor, mut events) = TaskMonitor::task_status(&config, task_id)?;
    eprintln!("[connecting {}]", monitor.url());
    monitor.connect();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                monitor.close(1000, "Interrupted");
                return Ok(());
            }
            event = events.recv() => match event {
                Some(MonitorEvent::Message(value)) => {
                    println!("{value}");
                    let terminal = value
                        .get("state")
                        .and_then(|s| s.as_str())
                        .map(|s| matches!(s, "SUCCESS" | "FAILURE" | "REVOKED"))
                        .unwrap_or(false);
                    if terminal {
                        monitor.close(1000, "Task finished");
                        return Ok(());
                    }
                }
                Some(MonitorEvent::Open) => eprintln!("[open]"),
                Some(MonitorEvent::Error(e)) => eprintln!("[error] {e}"),
                Some(MonitorEvent::Closed { code, reason }) => {
                    eprintln!("[closed {code}] {reason}");
                    if code == 1000 {
                        return Ok(());
                    }
                }
                Some(MonitorEvent::Reconnecting { attempt, delay }) => {
                    eprintln!("[reconnecting, attempt {attempt}, in {delay:?}]")
                }
                Some(MonitorEvent::PermanentFailure { attempts }) => {
                    bail!("gave up after {attempts} reconnect attempts")
                }
                None => return Ok(()),
            }
        }
    }
}
