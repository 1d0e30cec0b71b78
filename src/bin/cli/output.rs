use anyhow::Result;
use chrono::{Local, Utc};

use wordwise_lib::config::EngineConfig;
use wordwise_lib::engine::Response;
use wordwise_lib::learning::{format_interval, WordProgress};

use crate::OutputFormat;

/// ANSI color codes
pub struct Color;

impl Color {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
}

fn paint(text: &str, color: &str, use_color: bool) -> String {
    if use_color {
        format!("{}{}{}", color, text, Color::RESET)
    } else {
        text.to_string()
    }
}

fn describe_progress(progress: &WordProgress) -> String {
    let next = progress.next_review.with_timezone(&Local);
    format!(
        "{:?}, mastery {}, interval {}, next review {}",
        progress.level(),
        progress.mastery,
        format_interval(progress.interval),
        next.format("%Y-%m-%d %H:%M")
    )
}

pub fn print_response(
    response: &Response,
    config: &EngineConfig,
    format: &OutputFormat,
    use_color: bool,
) -> Result<()> {
    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(response)?);
        return Ok(());
    }

    match response {
        Response::Selection { words, degraded } => {
            if words.is_empty() {
                println!("{}", paint("No words to learn on this page.", Color::DIM, use_color));
            }
            for word in words {
                println!("{}", word);
            }
            if *degraded {
                println!(
                    "{}",
                    paint("(no language set, chosen by frequency)", Color::DIM, use_color)
                );
            }
        }
        Response::QuotaExceeded { message, .. } => {
            let message = message.as_deref().unwrap_or("Daily limit reached.");
            println!("{}", paint(message, Color::YELLOW, use_color));
        }
        Response::Progress { word, progress } => match progress {
            Some(progress) => println!(
                "{}: {}",
                paint(word, Color::BOLD, use_color),
                describe_progress(progress)
            ),
            None => println!("{}: not tracked", word),
        },
        Response::Review { items } => {
            if items.is_empty() {
                println!("{}", paint("Nothing due for review.", Color::GREEN, use_color));
            }
            let now = Utc::now();
            for item in items {
                let overdue = item.progress.overdue_by(now).num_days();
                println!(
                    "{:<20} {}",
                    item.word,
                    paint(&format!("overdue {}d", overdue), Color::DIM, use_color)
                );
            }
        }
        Response::Stats { stats } => {
            println!("{}", paint("Learning", Color::BOLD, use_color));
            println!("  Words:     {}", stats.total_words);
            println!("  Due:       {}", stats.due_words);
            println!("  New:       {}", stats.new_words);
            println!("  Learning:  {}", stats.learning_words);
            println!("  Familiar:  {}", stats.familiar_words);
            println!("  Mastered:  {}", stats.mastered_words);
            println!("  Reviews:   {}", stats.total_reviews);
            println!("  Mastery:   {:.1}", stats.average_mastery);
        }
        Response::Quota { decision } => {
            let status = if decision.allowed {
                paint("allowed", Color::GREEN, use_color)
            } else {
                paint("denied", Color::RED, use_color)
            };
            match decision.remaining {
                Some(remaining) => println!("{} ({} left today)", status, remaining),
                None => println!("{} (unlimited)", status),
            }
            if let Some(message) = &decision.message {
                println!("{}", message);
            }
        }
        Response::Usage { usage } => {
            let limits = config.quota_limits();
            println!("{}", paint(&usage.date.to_string(), Color::BOLD, use_color));
            if usage.is_plus {
                println!("  Plus:          yes (unlimited)");
                println!("  Translations:  {}", usage.words_translated);
                println!("  Explanations:  {}", usage.explanations_viewed);
            } else {
                println!(
                    "  Translations:  {}/{}",
                    usage.words_translated, limits.daily_words
                );
                println!(
                    "  Explanations:  {}/{}",
                    usage.explanations_viewed, limits.daily_explanations
                );
            }
        }
        Response::Translation { word, translation } => match translation {
            Some(translation) => println!("{} -> {}", word, translation),
            None => println!("{}: not cached", word),
        },
        Response::Settings { settings } => {
            println!(
                "language: {}",
                settings.language.as_deref().unwrap_or("(none)")
            );
            println!("words per page: {}", settings.words_per_page);
            println!("enabled: {}", settings.enabled);
        }
        Response::Cleaned { removed } => println!("Removed {} stale word(s).", removed),
        Response::Ok => println!("{}", paint("ok", Color::GREEN, use_color)),
        Response::Error { message } => {
            eprintln!("{} {}", paint("error:", Color::RED, use_color), message);
        }
    }

    Ok(())
}
