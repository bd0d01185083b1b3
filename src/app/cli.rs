use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use clap::Parser;
use log::info;

use crate::{
    manager::{Params, ProcessQueue},
    models::{Status, Task},
};

/// Run shell commands in parallel, a bounded number at a time.
#[derive(Debug, Parser)]
#[clap(name = "procqueue", version)]
pub struct Cli {
    /// How many commands may run at once; 0 uses every logical core.
    #[clap(short = 'j', long = "jobs", default_value = "0", env = "PROCQUEUE_JOBS")]
    pub jobs: usize,
    /// Keep starting commands after one of them fails.
    #[clap(short = 'k', long = "keep-going")]
    pub keep_going: bool,
    /// Output kept per command; anything past this is dropped.
    #[clap(long, default_value = "20000")]
    pub max_output_bytes: usize,
    /// Read commands from this file, one per line. Blank lines and lines
    /// starting with `#` are skipped.
    #[clap(short = 'f', long = "file", value_name = "PATH")]
    pub file: Option<PathBuf>,
    #[clap(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Commands to run, each through `sh -c`.
    pub commands: Vec<String>,
}

impl Cli {
    pub fn params(&self) -> Params {
        Params {
            num_jobs: self.jobs,
            stop_on_failure: !self.keep_going,
            max_output_bytes: self.max_output_bytes,
            status_callback: None,
        }
    }

    /// Commands from the file first, then the ones given as arguments.
    pub fn tasks(&self) -> anyhow::Result<Vec<Task>> {
        let mut tasks = match &self.file {
            Some(path) => load_tasks(path)?,
            None => Vec::new(),
        };
        tasks.extend(self.commands.iter().map(Task::shell));
        Ok(tasks)
    }
}

pub fn load_tasks(path: &Path) -> anyhow::Result<Vec<Task>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read commands from {}", path.display()))?;
    Ok(parse_tasks(&text))
}

fn parse_tasks(text: &str) -> Vec<Task> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(Task::shell)
        .collect()
}

/// Maps the final queue status to the exit status of this program.
pub fn exit_status(status: &Status) -> i32 {
    if status.is_success() {
        return 0;
    }
    match status.exit_code {
        code @ 1..=255 => code,
        _ => 1,
    }
}

pub fn run_cli(cli: Cli) -> anyhow::Result<i32> {
    let tasks = cli.tasks()?;
    if tasks.is_empty() {
        info!("nothing to run");
        return Ok(0);
    }
    let mut queue = ProcessQueue::new(tasks, cli.params())?;
    let status = queue.wait_until_finished()?;
    info!("finished: {status:?}");
    Ok(exit_status(&status))
}
