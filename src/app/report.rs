use std::io::{self, Stderr, Write};

use crossterm::{
    queue,
    style::{Color, Print, ResetColor, SetForegroundColor},
    tty::IsTty,
};
use log::warn;

use crate::{
    manager::{Job, StatusCallback},
    models::Status,
    worker::UNKNOWN_EXIT_CODE,
};

/// The default status callback: prints every finished job with its captured
/// output, followed by a progress line.
pub struct ConsoleReporter<W: Write> {
    out: W,
    stop_on_failure: bool,
    color: bool,
}

impl ConsoleReporter<Stderr> {
    /// Reports to stderr, colored when stderr is a terminal.
    pub fn stderr(stop_on_failure: bool) -> Self {
        let out = io::stderr();
        let color = out.is_tty();
        Self::new(out, stop_on_failure).with_color(color)
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W, stop_on_failure: bool) -> Self {
        Self {
            out,
            stop_on_failure,
            color: false,
        }
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    fn tag(&mut self, text: &str, color: Color) -> io::Result<()> {
        if self.color {
            queue!(self.out, SetForegroundColor(color), Print(text), ResetColor)
        } else {
            self.out.write_all(text.as_bytes())
        }
    }

    fn render(&mut self, job: &Job, status: &Status) -> io::Result<()> {
        let exit_code = job.process().exit_code().unwrap_or(UNKNOWN_EXIT_CODE);
        let failed = exit_code != 0;

        if failed {
            self.tag("[Failed]", Color::Red)?;
            writeln!(
                self.out,
                " {} (exit code: {exit_code}, command: {})",
                job.name(),
                job.process().debug_cmdline(),
            )?;
        } else {
            self.tag("[Done]", Color::Green)?;
            writeln!(self.out, " {}", job.name())?;
        }

        let output = job.output();
        if !output.is_empty() {
            self.out.write_all(&output)?;
            if self.color {
                // the job may have left the terminal styled
                queue!(self.out, ResetColor)?;
            }
            if !output.ends_with(b"\n") {
                self.out.write_all(b"\n(missing newline at the end of output)\n")?;
            }
            if failed {
                self.tag("[Failed]", Color::Red)?;
                self.out.write_all(b" The job above has failed\n")?;
            }
        }

        writeln!(self.out, "{}", summary(status, self.stop_on_failure))?;
        self.out.flush()
    }
}

impl<W: Write> StatusCallback for ConsoleReporter<W> {
    fn job_finished(&mut self, job: &Job, status: &Status) {
        if let Err(e) = self.render(job, status) {
            warn!("failed to report status of job {}: {e}", job.name());
        }
    }
}

/// The progress line printed after each job.
pub fn summary(status: &Status, stop_on_failure: bool) -> String {
    if !status.is_finished() {
        let failed = match status.num_failed {
            0 => String::new(),
            n => format!(" (including {n} failed)"),
        };
        format!(
            "-- {}/{} done{failed}, {} still running --",
            status.num_finished, status.num_total, status.num_running,
        )
    } else if status.exit_code == 0 && status.num_finished == status.num_total {
        let plural = if status.num_total != 1 { "s" } else { "" };
        format!("-- All {} job{plural} done --", status.num_total)
    } else {
        format!(
            "-- {}/{} done, {} failed!{} --",
            status.num_finished,
            status.num_total,
            status.num_failed,
            if stop_on_failure { " Stopping." } else { "" },
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_summary_running() {
        let status = Status { num_finished: 2, num_running: 3, num_total: 10, ..Default::default() };
        assert_eq!(summary(&status, true), "-- 2/10 done, 3 still running --");

        let status = Status { num_failed: 1, ..status };
        assert_eq!(summary(&status, true), "-- 2/10 done (including 1 failed), 3 still running --");
    }

    #[test]
    fn test_summary_all_done() {
        let status = Status { num_finished: 3, num_total: 3, ..Default::default() };
        assert_eq!(summary(&status, true), "-- All 3 jobs done --");

        let status = Status { num_finished: 1, num_total: 1, ..Default::default() };
        assert_eq!(summary(&status, false), "-- All 1 job done --");
    }

    #[test]
    fn test_summary_failed() {
        let status = Status {
            exit_code: 7,
            num_finished: 2,
            num_failed: 1,
            num_total: 4,
            ..Default::default()
        };
        assert_eq!(summary(&status, true), "-- 2/4 done, 1 failed! Stopping. --");
        assert_eq!(summary(&status, false), "-- 2/4 done, 1 failed! --");
    }
}
