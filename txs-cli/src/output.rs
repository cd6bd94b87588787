// Terminal output for txs commands
// Everything here writes to stderr; stdout is reserved for the JSON response

use std::time::Duration;

use txs_engine::{OperationStatus, ResponseStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Plain,
    Muted,
    Good,
    Bad,
    Warn,
    Accent,
}

impl Tone {
    fn sgr(self) -> &'static str {
        match self {
            Tone::Plain => "0",
            Tone::Muted => "2",
            Tone::Good => "32",
            Tone::Bad => "31",
            Tone::Warn => "33",
            Tone::Accent => "1;36",
        }
    }
}

/// Wrap text in the ANSI color for `tone`
pub fn paint(tone: Tone, text: &str) -> String {
    format!("\x1b[{}m{}\x1b[0m", tone.sgr(), text)
}

pub fn tinted(tone: Tone, message: &str) {
    eprintln!("{}", paint(tone, message));
}

/// Right-aligned verb then subject, e.g. "  Validating requests/seed.yaml"
pub fn action(verb: &str, subject: &str) {
    eprintln!("{} {}", paint(Tone::Accent, &format!("{:>12}", verb)), subject);
}

pub fn passed(message: &str) {
    eprintln!("{} {}", paint(Tone::Good, "  \u{2713}"), message);
}

pub fn verdict(ok: bool, message: &str) {
    let mark = if ok {
        paint(Tone::Good, "  \u{2713}")
    } else {
        paint(Tone::Bad, "  \u{2717}")
    };
    eprintln!("{} {}", mark, message);
}

pub fn note(message: &str) {
    eprintln!("{} {}", paint(Tone::Accent, "  i"), message);
}

pub fn warn(message: &str) {
    eprintln!("{} {}", paint(Tone::Warn, "  !"), message);
}

pub fn error(message: &str) {
    eprintln!("{} {}", paint(Tone::Bad, "error:"), message);
}

pub fn request_header(message: &str) {
    eprintln!("\x1b[1m==> {}\x1b[0m", message);
}

pub fn group_header(id: &str, mode: &str, total_operations: usize) {
    eprintln!(
        "\x1b[1;34m  Group\x1b[0m '{}' ({}, {} operations)",
        id, mode, total_operations
    );
}

/// Final line of a run, colored by how many groups committed
pub fn request_summary(status: ResponseStatus, duration: Duration) {
    let secs = duration.as_secs_f64();
    match status {
        ResponseStatus::Success => verdict(true, &format!("All groups committed in {:.2}s", secs)),
        ResponseStatus::PartialFailure => warn(&format!("Some groups rolled back ({:.2}s)", secs)),
        ResponseStatus::Failed => verdict(false, &format!("No group committed ({:.2}s)", secs)),
    }
}

pub fn operation_result(op_id: &str, status: OperationStatus, duration: Duration, error: Option<&str>) {
    let secs = duration.as_secs_f64();
    if status == OperationStatus::Success {
        tinted(Tone::Good, &format!("    [{}] OK ({:.3}s)", op_id, secs));
        return;
    }
    tinted(Tone::Bad, &format!("    [{}] FAIL ({:.3}s)", op_id, secs));
    if let Some(error) = error {
        tinted(Tone::Bad, &format!("        {}", error));
    }
}
