use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::time::Duration;

use crate::chat::Conversation;
use crate::errors::RefineError;
use crate::prompt::ModelInfo;
use crate::store::{Session, Stage};
use crate::wire::{Category, RefinementRecord, Role, ValidationResult};

fn stage_label(stage: Stage) -> colored::ColoredString {
    match stage {
        Stage::Empty => "[EMPTY]".dimmed(),
        Stage::Created => "[CREATED]".green().bold(),
        Stage::Stale => "[NEEDS MERGE]".yellow().bold(),
        Stage::Merged => "[MERGED]".cyan().bold(),
        Stage::Chosen => "[UNSAVED]".magenta().bold(),
        Stage::Saved => "[SAVED]".green().bold(),
    }
}

pub fn show_session(snap: &Session) {
    let Some(record) = snap.record() else {
        println!("\n(no active record; type `input <text>` then `submit`)\n");
        return;
    };
    println!("\n=== RECORD {} ===  {}", record.id.bold(), stage_label(snap.stage()));
    println!("{} {}", "input:".bold(), record.input);
    for (i, c) in record.categories.iter().enumerate() {
        let marker = if i == snap.step() { ">".cyan().bold() } else { " ".normal() };
        let stale = if snap.is_unconfirmed(&c.id) { "  (unapplied changes)".yellow() } else { "".normal() };
        println!("{marker} {}. {}{stale}", i + 1, c.name);
    }
    if let Some(category) = snap.category(snap.step()) {
        show_category(snap.step(), category, snap.preview(snap.step()));
    }
    match snap.output() {
        Some(out) => println!("\n{}\n{}\n", "Output:".bold(), out),
        None if snap.stage().needs_merge() => {
            println!("\n{}\n", "Output locked: a category changed since the last merge.".yellow())
        }
        None => println!(),
    }
}

pub fn show_category(step: usize, category: &Category, preview: Option<&str>) {
    println!("\n--- {} {} ---", format!("[{}]", step + 1).bold(), category.name.bold());
    for (i, p) in category.patterns.iter().enumerate() {
        let boxed = if p.applied { "[x]".green().bold() } else { "[ ]".normal() };
        println!("  {boxed} {}. {}", i + 1, p.name.bold());
        if !p.description.is_empty() {
            println!("        {}", p.description.dimmed());
        }
        if !p.feedback.trim().is_empty() {
            println!("        {}", p.feedback);
        }
    }
    match preview {
        Some(text) => println!("\n{}\n{}", "Preview:".bold(), text),
        None => println!("\n{}", "Preview is out of date; run `apply`.".yellow()),
    }
}

pub fn show_verdict(v: &ValidationResult, checking: bool) {
    if checking {
        println!("{}", "checking prompt...".dimmed());
    } else if v.valid {
        println!("{} {}", "[OK]".green().bold(), v.feedback);
    } else if v.reason != "pending" {
        println!("{} {}", "[INVALID]".red().bold(), if v.feedback.is_empty() { &v.reason } else { &v.feedback });
    }
}

pub fn show_conversation(convo: &Conversation) {
    for m in convo.messages() {
        let who = match m.role {
            Role::User => "you".cyan().bold(),
            Role::Assistant => "assistant".green().bold(),
            Role::System => "system".dimmed(),
        };
        println!("{who}: {}", m.content);
    }
}

fn short_diff(old: &str, new: &str, max_lines: usize) -> String {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let mut out: Vec<String> = Vec::new();
    let mut i = 0usize;
    let mut j = 0usize;

    while (i < old_lines.len() || j < new_lines.len()) && out.len() < max_lines {
        if i < old_lines.len() && j < new_lines.len() && old_lines[i] == new_lines[j] {
            i += 1;
            j += 1;
            continue;
        }
        if i < old_lines.len() {
            out.push(format!("- {}", old_lines[i]).red().to_string());
            i += 1;
        }
        if j < new_lines.len() {
            out.push(format!("+ {}", new_lines[j]).green().to_string());
            j += 1;
        }
    }

    if out.len() >= max_lines {
        out.push("... (diff truncated)".dimmed().to_string());
    }
    out.join("\n")
}

pub fn show_comparison(input: &str, output: &str) {
    println!(
        "\n{}",
        "┏━━━━━━━━━━━━━━━━━━━━━━━━ Before / After ━━━━━━━━━━━━━━━━━━━━━━━━┓".bold()
    );
    println!("{}\n{}\n", "Before:".yellow().bold(), input);
    println!("{}\n{}\n", "After:".green().bold(), output);
    println!("{}", short_diff(input, output, 40));
    println!("{}", "┗━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━┛".bold());
}

pub fn show_history(records: &[RefinementRecord]) {
    if records.is_empty() {
        println!("(no saved records)");
        return;
    }
    for r in records {
        let when = r
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".into());
        println!("{}  {}  {}", r.id.bold(), when.dimmed(), first_line(&r.input, 60));
    }
}

pub fn show_record(record: &RefinementRecord) {
    println!("\n=== {} ===", record.id.bold());
    println!("{} {}", "input:".bold(), record.input);
    println!("{} {}", "output:".bold(), record.output);
    for c in &record.categories {
        let applied: Vec<&str> = c.patterns.iter().filter(|p| p.applied).map(|p| p.name.as_str()).collect();
        println!("  {}: {}", c.name.bold(), if applied.is_empty() { "-".to_string() } else { applied.join(", ") });
    }
    println!();
}

pub fn show_models(models: &[ModelInfo], current: &str) {
    for m in models {
        let mark = if m.name.eq_ignore_ascii_case(current) { "*".green().bold() } else { " ".normal() };
        println!("{mark} {:<16} {:<12} {}", m.name.bold(), m.family, m.description.dimmed());
    }
}

fn first_line(s: &str, max: usize) -> String {
    let line = s.lines().next().unwrap_or("");
    if line.chars().count() > max {
        format!("{}...", line.chars().take(max).collect::<String>())
    } else {
        line.to_string()
    }
}

pub fn notify_ok(msg: &str) {
    println!("{} {}", "✔".green().bold(), msg);
}

/// Every failure ends up here; the session keeps going.
pub fn notify_err(err: &RefineError) {
    eprintln!("{} {}: {}", "✖".red().bold(), err.headline().bold(), err);
}

pub fn confirm(prompt: &str) -> bool {
    print!("{} [y/N]: ", prompt);
    let _ = io::stdout().flush();
    let mut s = String::new();
    if io::stdin().read_line(&mut s).is_ok() {
        let ans = s.trim().to_lowercase();
        ans == "y" || ans == "yes"
    } else {
        false
    }
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

pub fn help() {
    let rows = [
        ("new", "start over with a blank prompt"),
        ("input <text>", "set the prompt to refine"),
        ("style improve|generate", "send the text as is, or generate a prompt from it first"),
        ("submit", "create a record from the prompt"),
        ("show", "current record, category and output"),
        ("goto <n> | next | prev", "move between categories"),
        ("toggle <n> on|off|?", "flip a pattern in the current category"),
        ("apply", "apply the current category's patterns"),
        ("merge", "combine every preview (last category only)"),
        ("output", "show the merged output"),
        ("chat <message>", "refine the output in conversation (Ctrl-C stops a reply)"),
        ("retry", "ask again after a failed reply"),
        ("accept", "take the latest reply as the final output"),
        ("save", "store the final output"),
        ("compare", "before/after view"),
        ("conversation", "the conversation so far"),
        ("history [id]", "list saved records, or show one"),
        ("load <id>", "continue a saved record"),
        ("quit", "leave"),
    ];
    for (cmd, what) in rows {
        println!("  {:<26} {}", cmd.bold(), what);
    }
}
