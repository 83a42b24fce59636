//! Terminal output helpers with a plain fallback for pipes and CI

use console::{style, Emoji};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::time::Duration;

pub static CHECK: Emoji<'_, '_> = Emoji("✓ ", "[OK] ");
pub static CROSS: Emoji<'_, '_> = Emoji("✗ ", "[FAIL] ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠ ", "[WARN] ");

/// Whether stdout is an interactive terminal outside CI
pub fn interactive() -> bool {
    std::io::stdout().is_terminal() && std::env::var_os("CI").is_none()
}

/// A task spinner that degrades to plain lines
pub struct TaskSpinner {
    bar: Option<ProgressBar>,
}

impl TaskSpinner {
    /// Start a spinner with a message
    pub fn start(message: &str) -> Self {
        let bar = if interactive() {
            let bar = ProgressBar::new_spinner();
            if let Ok(spinner_style) = ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}  {elapsed:.dim}")
            {
                bar.set_style(spinner_style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "));
            }
            bar.set_message(message.to_string());
            bar.enable_steady_tick(Duration::from_millis(120));
            Some(bar)
        } else {
            println!("{} {}", style("...").dim(), message);
            None
        };
        Self { bar }
    }

    /// Stop with success message
    pub fn stop(self, message: &str) {
        self.clear();
        println!("{}{}", CHECK, message);
    }

    /// Stop with error message
    pub fn stop_error(self, message: &str) {
        self.clear();
        println!("{}{}", CROSS, style(message).red());
    }

    fn clear(&self) {
        if let Some(ref bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}

/// Print a dimmed key/value line
pub fn key_value(key: &str, value: impl std::fmt::Display) {
    println!("  {}: {}", style(key).dim(), value);
}
