//! Text progress bar for the optimization loop.

use bt_optimizer::{TrialRecord, TrialState};
use std::io::{self, Write};
use std::time::Instant;

const WIDTH: usize = 30;

/// Redraws a single status line after every finished trial.
pub struct ProgressBar<W: Write = io::Stderr> {
    out: W,
    total: usize,
    done: usize,
    best: Option<(usize, f64)>,
    started: Instant,
    enabled: bool,
}

impl ProgressBar<io::Stderr> {
    pub fn stderr(total: usize, enabled: bool) -> Self {
        Self::new(io::stderr(), total, enabled)
    }
}

impl<W: Write> ProgressBar<W> {
    pub fn new(out: W, total: usize, enabled: bool) -> Self {
        Self {
            out,
            total,
            done: 0,
            best: None,
            started: Instant::now(),
            enabled,
        }
    }

    pub fn done(&self) -> usize {
        self.done
    }

    /// Count a finished trial; `maximize` decides which value is best.
    pub fn update(&mut self, record: &TrialRecord, maximize: bool) {
        self.done += 1;
        if record.state == TrialState::Complete {
            if let Some(value) = record.value {
                let better = match self.best {
                    None => true,
                    Some((_, best)) if maximize => value > best,
                    Some((_, best)) => value < best,
                };
                if better {
                    self.best = Some((record.number, value));
                }
            }
        }
        self.draw();
    }

    fn line(&self) -> String {
        let total = self.total.max(1);
        let filled = (self.done.min(total) * WIDTH) / total;
        let bar = format!("{}{}", "#".repeat(filled), "-".repeat(WIDTH - filled));
        let best = match self.best {
            Some((number, value)) => format!(" best: trial {number} = {value:.6}"),
            None => String::new(),
        };
        format!(
            "[{bar}] {}/{} {:.0}s{best}",
            self.done,
            self.total,
            self.started.elapsed().as_secs_f64()
        )
    }

    fn draw(&mut self) {
        if !self.enabled {
            return;
        }
        let line = self.line();
        let _ = write!(self.out, "\r{line}");
        let _ = self.out.flush();
    }

    pub fn finish(&mut self) {
        if self.enabled && self.done > 0 {
            let _ = writeln!(self.out);
        }
    }
}
