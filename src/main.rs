use clap::{Parser, ValueEnum};
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

mod apply;
mod backend;
mod chat;
mod cli;
mod config;
mod errors;
mod finalize;
mod log;
mod merge;
mod prompt;
mod provider;
mod stepper;
mod store;
mod ux;
mod validate;
mod wire;
mod workflow;

use chat::TurnOutcome;
use cli::{Command, HistoryAction, Style};
use errors::{RefineError, Result};
use store::{Toggle, Toggled};
use workflow::Workflow;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    let mut cfg = config::Config::load(args.config.as_deref())?;
    args.apply_overrides(&mut cfg);
    log::init(args.debug);
    tracing::debug!(backend = %cfg.api_base(), provider = ?cfg.provider, "configuration loaded");

    let backend = backend::make_backend(&cfg)?;

    match args.command.unwrap_or(Command::Session { load: None }) {
        Command::Models => {
            ux::show_models(prompt::MODELS, &cfg.chat_model);
            Ok(())
        }
        Command::History { action } => {
            history(&backend, action).await?;
            Ok(())
        }
        Command::Session { load } => {
            let provider = provider::make_provider(cfg.provider, cfg.timeout_secs, cfg.ollama_url.clone())?;
            let validator = Arc::new(validate::LlmValidator::new(provider.clone(), cfg.validator_model.clone()));
            let mut flow = Workflow::new(backend, provider, validator, &cfg);
            if let Some(dir) = flow.artifacts().map(|a| a.dir().to_path_buf()) {
                tracing::info!(dir = %dir.display(), "saving record snapshots");
            }
            if let Some(id) = load {
                match with_spinner("loading record", flow.load(&id)).await {
                    Ok(snap) => ux::show_session(&snap),
                    Err(e) => ux::notify_err(&e),
                }
            }
            session(&mut flow).await
        }
    }
}

async fn history(backend: &backend::DynBackend, action: HistoryAction) -> Result<()> {
    match action {
        HistoryAction::List => {
            let records = with_spinner("loading history", backend.list_records()).await?;
            let records: Vec<_> = records.into_iter().map(prompt::decorate_record).collect();
            ux::show_history(&records);
        }
        HistoryAction::Show { id } => {
            let record = with_spinner("loading record", backend.get_record(&id)).await?;
            ux::show_record(&prompt::decorate_record(record));
        }
        HistoryAction::Delete { id } => {
            if !ux::confirm(&format!("Delete record {id}?")) {
                println!("Aborted by user.");
                return Ok(());
            }
            backend.delete_record(&id).await?;
            ux::notify_ok("Record deleted.");
        }
    }
    Ok(())
}

async fn with_spinner<T>(msg: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
    let pb = ux::spinner(msg);
    let out = fut.await;
    pb.finish_and_clear();
    out
}

async fn session(flow: &mut Workflow) -> anyhow::Result<()> {
    println!("Type `help` for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("refine> ");
        let _ = std::io::stdout().flush();
        let line = tokio::select! {
            l = lines.next_line() => l?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };
        match run_command(flow, line.trim()).await {
            Ok(true) => break,
            Ok(false) => {}
            Err(e) => ux::notify_err(&e),
        }
    }
    Ok(())
}

fn category_number(arg: &str) -> Result<usize> {
    match arg.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n - 1),
        _ => Err(RefineError::Validation(format!("expected a number starting at 1, got `{arg}`"))),
    }
}

fn parse_toggle(arg: &str) -> Result<(usize, Toggle)> {
    let mut parts = arg.split_whitespace();
    let n = category_number(parts.next().unwrap_or(""))?;
    let state = match parts.next().unwrap_or("") {
        "on" | "1" | "true" => Toggle::On,
        "off" | "0" | "false" => Toggle::Off,
        "?" | "-" | "mixed" => Toggle::Indeterminate,
        other => return Err(RefineError::Validation(format!("expected on, off or ?, got `{other}`"))),
    };
    Ok((n, state))
}

fn print_chunk(chunk: &str) {
    print!("{chunk}");
    let _ = std::io::stdout().flush();
}

/// Ctrl-C stops the reply instead of the process while a turn streams.
fn stop_on_ctrl_c() -> (CancellationToken, tokio::task::JoinHandle<()>) {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
    (cancel, watcher)
}

/// False when the check task died instead of landing a verdict.
async fn wait_for_check(check: tokio::task::JoinHandle<()>) -> bool {
    match check.await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "prompt check did not finish");
            false
        }
    }
}

fn report_turn(outcome: TurnOutcome) {
    println!();
    if outcome == TurnOutcome::Cancelled {
        ux::notify_ok("Generation stopped; the partial reply is kept.");
    }
}

/// Runs one line of input. `Ok(true)` ends the session.
async fn run_command(flow: &mut Workflow, line: &str) -> Result<bool> {
    let (cmd, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    match cmd {
        "" => {}
        "help" => ux::help(),
        "quit" | "exit" => return Ok(true),
        "new" => {
            ux::show_session(&flow.new_record());
        }
        "input" => {
            if let Some(check) = flow.set_input(rest) {
                let pb = ux::spinner("checking prompt");
                wait_for_check(check).await;
                pb.finish_and_clear();
            }
            ux::show_verdict(&flow.verdict(), flow.is_checking());
        }
        "style" => {
            let style = Style::from_str(rest, true)
                .map_err(|_| RefineError::Validation(format!("unknown style `{rest}`; use improve or generate")))?;
            flow.set_style(style);
            ux::notify_ok(&format!("Style set to {style:?}."));
        }
        "submit" => {
            let label = if flow.style() == Style::Generate { "generating prompt" } else { "creating record" };
            let snap = with_spinner(label, flow.submit()).await?;
            ux::notify_ok("Response created successfully!");
            ux::show_session(&snap);
        }
        "show" => ux::show_session(&flow.snapshot()),
        "goto" => ux::show_session(&*flow.goto(category_number(rest)?)?),
        "next" => ux::show_session(&*flow.next()?),
        "prev" => ux::show_session(&*flow.prev()?),
        "toggle" => {
            let (n, state) = parse_toggle(rest)?;
            match flow.toggle(n, state)? {
                Toggled::Changed => {
                    let snap = flow.snapshot();
                    if let Some(c) = snap.category(snap.step()) {
                        ux::show_category(snap.step(), c, snap.preview(snap.step()));
                    }
                }
                Toggled::Unchanged => println!("(already set)"),
                Toggled::Ignored => {}
            }
        }
        "apply" => {
            with_spinner("applying patterns", flow.apply()).await?;
            ux::notify_ok("Category applied. New preview is ready; merge the previews to view the final prompt.");
            ux::show_session(&flow.snapshot());
        }
        "merge" => {
            let snap = with_spinner("merging previews", flow.merge()).await?;
            ux::notify_ok("Previews merged.");
            ux::show_session(&snap);
        }
        "output" => {
            let snap = flow.snapshot();
            let out = snap
                .output()
                .ok_or_else(|| RefineError::Rejected("output is locked until the previews are merged".into()))?;
            println!("{out}");
        }
        "chat" => {
            let (cancel, watcher) = stop_on_ctrl_c();
            let res = flow.chat(rest, &cancel, print_chunk).await;
            watcher.abort();
            report_turn(res?);
        }
        "retry" => {
            let (cancel, watcher) = stop_on_ctrl_c();
            let res = flow.retry_chat(&cancel, print_chunk).await;
            watcher.abort();
            report_turn(res?);
        }
        "history" if rest.is_empty() => {
            let records = with_spinner("loading history", flow.history()).await?;
            ux::show_history(&records);
        }
        "history" => ux::show_record(&with_spinner("loading record", flow.show(rest)).await?),
        "conversation" => ux::show_conversation(flow.conversation()),
        "accept" => {
            flow.accept()?;
            ux::notify_ok("Final output set successfully!");
        }
        "save" => {
            with_spinner("saving", flow.save()).await?;
            ux::notify_ok("Final prompt successfully saved.");
        }
        "compare" => {
            let (input, output) = flow
                .comparison()
                .ok_or_else(|| RefineError::Rejected("nothing to compare until the output is unlocked".into()))?;
            ux::show_comparison(&input, &output);
        }
        "load" if rest.is_empty() => {
            return Err(RefineError::MissingData("which record? `history` lists them".into()));
        }
        "load" => {
            let snap = with_spinner("loading record", flow.load(rest)).await?;
            ux::show_session(&snap);
        }
        other => {
            return Err(RefineError::Rejected(format!("unknown command `{other}`; try `help`")));
        }
    }
    Ok(false)
}
