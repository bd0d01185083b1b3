use std::{
    cell::{Ref, RefCell},
    rc::Rc,
    thread,
    time::Duration,
    vec,
};

use log::{debug, error, info};

use crate::{
    app::report::ConsoleReporter,
    error::Result,
    models::{Status, Task},
    worker::{num_cpu_cores, BytesInput, CappedOutput, Process, Redirect, UNKNOWN_EXIT_CODE},
};

const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Called once for every job that finishes, in the order the finishes are
/// detected.
pub trait StatusCallback {
    fn job_finished(&mut self, job: &Job, status: &Status);
}

impl<F> StatusCallback for F
where
    F: FnMut(&Job, &Status),
{
    fn job_finished(&mut self, job: &Job, status: &Status) {
        self(job, status)
    }
}

pub struct Params {
    /// Maximum number of processes running at once. 0 uses the number of
    /// logical cores. Never more than the number of tasks.
    pub num_jobs: usize,
    pub stop_on_failure: bool,
    /// Output kept per job; the rest is dropped.
    pub max_output_bytes: usize,
    /// Defaults to a `ConsoleReporter` on stderr.
    pub status_callback: Option<Box<dyn StatusCallback>>,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            num_jobs: 0,
            stop_on_failure: true,
            max_output_bytes: 20000,
            status_callback: None,
        }
    }
}

/// A started task.
pub struct Job {
    name: String,
    process: Process,
    // shared with the sink inside `process`
    output: Rc<RefCell<Vec<u8>>>,
}

impl Job {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn process(&self) -> &Process {
        &self.process
    }

    /// Combined stdout and stderr captured so far, up to the output cap.
    pub fn output(&self) -> Ref<'_, [u8]> {
        Ref::map(self.output.borrow(), Vec::as_slice)
    }
}

/// Runs tasks as child processes, at most `num_jobs` at a time.
///
/// Nothing runs in the background: the caller drives the queue with
/// `wait_until_finished()` or repeated `check_status()` calls, and the status
/// callback runs inside those calls.
pub struct ProcessQueue {
    pending: vec::IntoIter<Task>,
    num_total: usize,
    next_task_index: usize,
    jobs: Vec<Job>,
    first_nonzero_exit_code: i32,
    num_failed_tasks: usize,
    stop_on_failure: bool,
    max_output_bytes: usize,
    status_callback: Box<dyn StatusCallback>,
}

impl ProcessQueue {
    /// Starts the first `num_jobs` tasks right away.
    pub fn new(tasks: Vec<Task>, params: Params) -> Result<Self> {
        let num_total = tasks.len();
        let num_jobs = match params.num_jobs {
            0 => num_cpu_cores(),
            n => n,
        }
        .min(num_total);
        let status_callback = params.status_callback.unwrap_or_else(|| {
            Box::new(ConsoleReporter::stderr(params.stop_on_failure)) as Box<dyn StatusCallback>
        });
        info!("running {num_total} task(s), {num_jobs} at a time");

        let mut queue = Self {
            pending: tasks.into_iter(),
            num_total,
            next_task_index: 0,
            jobs: Vec::with_capacity(num_jobs),
            first_nonzero_exit_code: 0,
            num_failed_tasks: 0,
            stop_on_failure: params.stop_on_failure,
            max_output_bytes: params.max_output_bytes,
            status_callback,
        };
        for _ in 0..num_jobs {
            let Some(task) = queue.next_task() else {
                break;
            };
            // on error the jobs already started get killed as `queue` drops
            let job = queue.start_job(task)?;
            queue.jobs.push(job);
        }
        Ok(queue)
    }

    /// Blocks until every task has finished or the queue stopped.
    pub fn wait_until_finished(&mut self) -> Result<Status> {
        self.check_or_wait(true)?;
        Ok(self.last_known_status())
    }

    /// Polls every running job once without blocking.
    pub fn check_status(&mut self) -> Result<Status> {
        self.check_or_wait(false)?;
        Ok(self.last_known_status())
    }

    /// The status as of the last poll. Doesn't touch any process.
    pub fn last_known_status(&self) -> Status {
        Status {
            exit_code: self.first_nonzero_exit_code,
            num_finished: self.next_task_index - self.jobs.len(),
            num_failed: self.num_failed_tasks,
            num_running: self.jobs.len(),
            num_total: self.num_total,
        }
    }

    /// The jobs currently running, in no particular order.
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Kills every running job and never starts another one. Unless a failure
    /// was already recorded, the queue then reports `UNKNOWN_EXIT_CODE`.
    pub fn kill(&mut self, force: bool) {
        for job in self.jobs.iter_mut() {
            job.process.kill(force);
            job.process.detach();
        }
        if !self.jobs.is_empty() {
            debug!("killed {} running job(s)", self.jobs.len());
        }
        self.jobs.clear();
        self.pending = Vec::new().into_iter();

        if self.first_nonzero_exit_code == 0 {
            self.first_nonzero_exit_code = UNKNOWN_EXIT_CODE;
        }
    }

    fn next_task(&mut self) -> Option<Task> {
        let task = self.pending.next()?;
        self.next_task_index += 1;
        Some(task)
    }

    fn start_job(&self, task: Task) -> Result<Job> {
        let output = Rc::new(RefCell::new(Vec::new()));
        let mut redirect = Redirect::new()
            .with_output(CappedOutput::new(Rc::clone(&output), self.max_output_bytes));
        if let Some(input) = task.input {
            redirect = redirect.with_input(BytesInput::new(input));
        }
        let process = Process::spawn(task.command.as_slice(), redirect).map_err(|e| {
            error!("failed to start task {}: {e}", task.name);
            e
        })?;
        debug!("started task {}", task.name);
        Ok(Job {
            name: task.name,
            process,
            output,
        })
    }

    fn record_failure(&mut self, exit_code: i32) {
        self.num_failed_tasks += 1;
        if self.first_nonzero_exit_code == 0 {
            self.first_nonzero_exit_code = exit_code;
        }
    }

    fn check_or_wait(&mut self, wait: bool) -> Result<()> {
        if self.last_known_status().is_finished() {
            return Ok(());
        }

        loop {
            let mut i = 0;
            while i < self.jobs.len() {
                if !self.jobs[i].process.check_if_finished()? {
                    i += 1;
                    continue;
                }

                let exit_code = self.jobs[i].process.exit_code()?;
                if exit_code != 0 {
                    self.record_failure(exit_code);
                }
                let stop_queue = self.stop_on_failure && exit_code != 0;

                // what the callback sees: this job counted as finished already
                let mut status = self.last_known_status();
                status.num_finished += 1;
                if stop_queue {
                    status.num_running = 0;
                } else if self.pending.as_slice().is_empty() {
                    status.num_running -= 1;
                }
                self.status_callback.job_finished(&self.jobs[i], &status);

                if stop_queue {
                    info!("task {} failed with exit code {exit_code}, stopping", self.jobs[i].name);
                    self.kill(false);
                    break;
                }

                let Some(task) = self.next_task() else {
                    self.jobs.swap_remove(i);
                    continue;
                };
                match self.start_job(task) {
                    Ok(job) => {
                        self.jobs[i] = job;
                        i += 1;
                    }
                    Err(e) => {
                        // the slot is gone and the task counts as failed
                        self.jobs.swap_remove(i);
                        self.record_failure(UNKNOWN_EXIT_CODE);
                        self.kill(false);
                        return Err(e);
                    }
                }
            }

            if !wait || self.jobs.is_empty() {
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}
