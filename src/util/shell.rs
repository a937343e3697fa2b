//! Centralized status output.
//!
//! Library builds report one bracketed status line each:
//!
//! ```text
//! [UP-TO-DATE] zlib
//! [OUT-OF-DATE] png
//! [SUCCESS] png in 12.40s
//! [ERROR]
//! ```
//!
//! Commands never print these lines directly; they go through [`Shell`] so
//! color, quiet mode and test capture are handled in one place.

use std::fmt::Display;
use std::io::{self, IsTerminal};
use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressStyle};

/// Output verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// errors only
    Quiet,
    #[default]
    Normal,
    /// status lines plus external tool output
    Verbose,
}

/// Color output mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorChoice {
    #[default]
    Auto,
    Always,
    Never,
}

impl std::str::FromStr for ColorChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(ColorChoice::Auto),
            "always" => Ok(ColorChoice::Always),
            "never" => Ok(ColorChoice::Never),
            _ => Err(format!(
                "invalid color choice '{}'; expected 'auto', 'always', or 'never'",
                s
            )),
        }
    }
}

/// Status types for output messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    UpToDate,
    OutOfDate,
    Success,
    Error,
    Info,
    Warning,
}

impl Status {
    /// Get the display text for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::UpToDate => "UP-TO-DATE",
            Status::OutOfDate => "OUT-OF-DATE",
            Status::Success => "SUCCESS",
            Status::Error => "ERROR",
            Status::Info => "INFO",
            Status::Warning => "WARNING",
        }
    }

    /// Get the ANSI color code for this status.
    fn color_code(&self) -> &'static str {
        match self {
            Status::UpToDate | Status::Success => "\x1b[1;32m",
            Status::OutOfDate => "\x1b[1;36m",
            Status::Info => "\x1b[1;34m",
            Status::Warning => "\x1b[1;33m",
            Status::Error => "\x1b[1;31m",
        }
    }
}

/// Central shell for all CLI output.
#[derive(Debug)]
pub struct Shell {
    verbosity: Verbosity,
    use_color: bool,
    /// Lines recorded instead of printed, for tests
    capture: Option<Mutex<Vec<String>>>,
}

impl Shell {
    /// Create a new shell writing to stderr.
    pub fn new(verbosity: Verbosity, color: ColorChoice) -> Self {
        let use_color = match color {
            ColorChoice::Auto => io::stderr().is_terminal(),
            ColorChoice::Always => true,
            ColorChoice::Never => false,
        };

        Shell {
            verbosity,
            use_color,
            capture: None,
        }
    }

    /// Create a shell that records lines instead of printing them.
    pub fn captured() -> Self {
        Shell {
            verbosity: Verbosity::Normal,
            use_color: false,
            capture: Some(Mutex::new(Vec::new())),
        }
    }

    /// Lines recorded by a captured shell.
    pub fn captured_lines(&self) -> Vec<String> {
        self.capture
            .as_ref()
            .and_then(|c| c.lock().ok().map(|lines| lines.clone()))
            .unwrap_or_default()
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn is_quiet(&self) -> bool {
        self.verbosity == Verbosity::Quiet
    }

    pub fn is_verbose(&self) -> bool {
        self.verbosity == Verbosity::Verbose
    }

    /// Print a status line: `[STATUS] message`.
    ///
    /// In quiet mode, only Error status is printed.
    pub fn status(&self, status: Status, msg: impl Display) {
        let msg = msg.to_string();
        let line = if msg.is_empty() {
            self.format_status(status)
        } else {
            format!("{} {}", self.format_status(status), msg)
        };
        self.emit(status, line);
    }

    /// Print a bare status line with no message.
    pub fn bare_status(&self, status: Status) {
        self.emit(status, self.format_status(status));
    }

    /// Print a plain line of text.
    pub fn print(&self, msg: impl Display) {
        self.emit(Status::Info, msg.to_string());
    }

    pub fn warn(&self, msg: impl Display) {
        self.status(Status::Warning, msg);
    }

    fn emit(&self, status: Status, line: String) {
        if let Some(ref capture) = self.capture {
            if let Ok(mut lines) = capture.lock() {
                lines.push(line);
            }
            return;
        }

        if self.is_quiet() && status != Status::Error {
            return;
        }

        eprintln!("{}", line);
    }

    fn format_status(&self, status: Status) -> String {
        if self.use_color {
            format!("{}[{}]\x1b[0m", status.color_code(), status.as_str())
        } else {
            format!("[{}]", status.as_str())
        }
    }

    /// Create a byte-based progress bar for downloads.
    ///
    /// Hidden when stderr is not a terminal, in quiet mode, or when captured.
    pub fn bytes_progress(&self, total_bytes: u64, msg: impl Display) -> ProgressBar {
        if self.capture.is_some() || self.is_quiet() || !io::stderr().is_terminal() {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(total_bytes);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({percent}%)")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message(msg.to_string());
        pb
    }
}

impl Default for Shell {
    fn default() -> Self {
        Shell::new(Verbosity::Normal, ColorChoice::Auto)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_format() {
        let shell = Shell::captured();
        shell.status(Status::UpToDate, "zlib");
        shell.status(Status::Success, "png in 1.00s");
        shell.bare_status(Status::Error);

        assert_eq!(
            shell.captured_lines(),
            vec![
                "[UP-TO-DATE] zlib".to_string(),
                "[SUCCESS] png in 1.00s".to_string(),
                "[ERROR]".to_string(),
            ]
        );
    }

    #[test]
    fn test_color_choice_parse() {
        assert_eq!("always".parse::<ColorChoice>().unwrap(), ColorChoice::Always);
        assert!("sometimes".parse::<ColorChoice>().is_err());
    }
}
