use std::{
    ffi::OsStr,
    os::fd::OwnedFd,
    os::unix::process::ExitStatusExt,
    process::{Child, Command, ExitStatus, Stdio},
    sync::OnceLock,
    thread,
    time::Duration,
};

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use super::{
    pipe::{self, InputPipe, OutputPipe, PipeStatus},
    stream::{InputSource, OutputSink},
};

/// Exit code reported when a process ended for a reason we can't decode.
pub const UNKNOWN_EXIT_CODE: i32 = -255;

const READ_CHUNK_SIZE: usize = 4096;
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Logical core count, computed once.
pub fn num_cpu_cores() -> usize {
    static CORES: OnceLock<usize> = OnceLock::new();
    *CORES.get_or_init(|| {
        thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    })
}

/// Which standard streams of the child get redirected, and where to.
#[derive(Default)]
pub struct Redirect {
    input: Option<Box<dyn InputSource>>,
    output: Option<Box<dyn OutputSink>>,
}

impl Redirect {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed stdin from `source`. Without this, stdin is `/dev/null`.
    pub fn with_input(mut self, source: impl InputSource + 'static) -> Self {
        self.input = Some(Box::new(source));
        self
    }

    /// Capture stdout and stderr (merged) into `sink`. Without this, both are
    /// inherited from the current process.
    pub fn with_output(mut self, sink: impl OutputSink + 'static) -> Self {
        self.output = Some(Box::new(sink));
        self
    }
}

struct InputStream {
    pipe: InputPipe,
    source: Box<dyn InputSource>,
}

struct OutputStream {
    pipe: OutputPipe,
    sink: Box<dyn OutputSink>,
}

struct State {
    child: Child,
    debug_cmdline: String,
    exit_code: Option<i32>,
    input: Option<InputStream>,
    output: Option<OutputStream>,
}

/// A running (or finished) child process whose redirected streams are serviced
/// without extra threads.
///
/// Nothing happens in the background: stdin is fed and stdout drained only
/// while `check_if_finished()` or `wait_until_finished()` runs, so a process
/// writing lots of output must be polled regularly or it will stall on a full
/// pipe.
///
/// The default instance is empty. Dropping a non-empty instance kills the
/// process and does not wait for it.
#[derive(Default)]
pub struct Process {
    state: Option<State>,
}

impl Process {
    pub fn spawn<S: AsRef<OsStr>>(argv: &[S], redirect: Redirect) -> Result<Self> {
        let (program, args) = argv.split_first().ok_or(Error::EmptyCommand)?;
        let debug_cmdline = format!(
            "{:?}",
            argv.iter()
                .map(|arg| arg.as_ref().to_string_lossy())
                .collect::<Vec<_>>()
        );

        let mut command = Command::new(program);
        command.args(args);
        command.stdin(if redirect.input.is_some() { Stdio::piped() } else { Stdio::null() });

        let output_read = if redirect.output.is_some() {
            let (read, write) = pipe::pipe()
                .map_err(|source| Error::Pipe { which: "output", source })?;
            let write_err = write.try_clone()
                .map_err(|source| Error::Pipe { which: "output", source })?;
            command
                .stdout(Stdio::from(write))
                .stderr(Stdio::from(write_err));
            Some(read)
        } else {
            None
        };

        let child = command.spawn().map_err(|source| Error::Spawn {
            cmdline: debug_cmdline.clone(),
            source,
        })?;
        // our copies of the write ends must go, or we never see end of output
        drop(command);
        debug!("started process {} {debug_cmdline}", child.id());

        let mut process = Self {
            state: Some(State {
                child,
                debug_cmdline,
                exit_code: None,
                input: None,
                output: None,
            }),
        };
        // from here on an early return drops `process`, which kills the child
        process.attach_streams(redirect.input, output_read, redirect.output)?;

        if let Some(state) = process.state.as_mut() {
            state.pump_input();
        }
        Ok(process)
    }

    fn attach_streams(
        &mut self,
        source: Option<Box<dyn InputSource>>,
        output_read: Option<OwnedFd>,
        sink: Option<Box<dyn OutputSink>>,
    ) -> Result<()> {
        let state = self.state.as_mut().ok_or(Error::NullProcess)?;
        if let Some(source) = source {
            let stdin = state.child.stdin.take().ok_or_else(|| Error::Pipe {
                which: "input",
                source: std::io::ErrorKind::NotFound.into(),
            })?;
            let pipe = InputPipe::new(stdin)
                .map_err(|source| Error::Pipe { which: "input", source })?;
            state.input = Some(InputStream { pipe, source });
        }
        if let (Some(read), Some(sink)) = (output_read, sink) {
            let pipe = OutputPipe::new(read)
                .map_err(|source| Error::Pipe { which: "output", source })?;
            state.output = Some(OutputStream { pipe, sink });
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_none()
    }

    /// The OS process id, if there is a process.
    pub fn id(&self) -> Option<u32> {
        self.state.as_ref().map(|state| state.child.id())
    }

    /// The command line this process was started with, formatted for humans
    /// only. Empty for an empty instance.
    pub fn debug_cmdline(&self) -> &str {
        self.state
            .as_ref()
            .map(|state| state.debug_cmdline.as_str())
            .unwrap_or("")
    }

    /// Asks the process to terminate: `SIGKILL` when `force`, `SIGTERM`
    /// otherwise. Does nothing on an empty instance or a process already known
    /// to have finished. Doesn't empty this instance.
    pub fn kill(&mut self, force: bool) {
        let Some(state) = self.state.as_ref() else {
            return;
        };
        if state.exit_code.is_some() {
            return;
        }
        let pid = state.child.id();
        let signal = if force { libc::SIGKILL } else { libc::SIGTERM };
        // the child is never reaped before exit_code is set, so the pid is still ours
        if unsafe { libc::kill(pid as libc::pid_t, signal) } == -1 {
            warn!(
                "failed to signal process {pid}: {}",
                std::io::Error::last_os_error(),
            );
        } else {
            debug!("sent signal {signal} to process {pid}");
        }
    }

    /// Releases the process without stopping or waiting for it, leaving this
    /// instance empty.
    pub fn detach(&mut self) {
        if let Some(state) = self.state.take() {
            trace!("detached process {}", state.child.id());
        }
    }

    /// Blocks until the process exits, servicing its streams meanwhile.
    pub fn wait_until_finished(&mut self) -> Result<()> {
        self.check_or_wait(true)
    }

    /// Polls once without blocking, returns whether the process has finished.
    pub fn check_if_finished(&mut self) -> Result<bool> {
        self.check_or_wait(false)?;
        Ok(self.known_to_be_finished())
    }

    /// Whether an earlier poll or wait has already seen the process exit.
    /// Doesn't touch the process.
    pub fn known_to_be_finished(&self) -> bool {
        self.state
            .as_ref()
            .map(|state| state.exit_code.is_some())
            .unwrap_or(false)
    }

    /// Non-negative for a normal exit, `-signal` if killed by a signal,
    /// `UNKNOWN_EXIT_CODE` otherwise.
    pub fn exit_code(&self) -> Result<i32> {
        self.state
            .as_ref()
            .ok_or(Error::NullProcess)?
            .exit_code
            .ok_or(Error::NotFinished)
    }

    fn check_or_wait(&mut self, wait: bool) -> Result<()> {
        let state = self.state.as_mut().ok_or(Error::NullProcess)?;
        if state.exit_code.is_some() {
            return Ok(());
        }

        loop {
            state.pump_input();
            state.drain_output();

            if !wait {
                state.settle(false);
                return Ok(());
            }
            if state.input.is_none() && state.output.is_none() {
                state.settle(true);
                return Ok(());
            }
            // something else may hold our pipes open past the child's exit
            if state.settle(false) {
                return Ok(());
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if self.state.is_some() {
            self.kill(true);
            self.detach();
        }
    }
}

impl State {
    fn close_input(&mut self) {
        if self.input.take().is_some() {
            trace!("closed input of process {}", self.child.id());
        }
    }

    fn close_output(&mut self) {
        if self.output.take().is_some() {
            trace!("closed output of process {}", self.child.id());
        }
    }

    fn pump_input(&mut self) {
        while let Some(input) = self.input.as_mut() {
            let Some(data) = input.source.pending() else {
                self.close_input();
                return;
            };
            if data.is_empty() {
                return;
            }

            let offered = data.len();
            let status = input.pipe.write(data);
            match status {
                PipeStatus::Transferred(n) => {
                    input.source.consume(n);
                    if n < offered {
                        // partial write, the pipe is full for now
                        return;
                    }
                }
                PipeStatus::WouldBlock => return,
                PipeStatus::Closed | PipeStatus::Errored => {
                    trace!("input of process {} failed: {status:?}", self.child.id());
                    self.close_input();
                    return;
                }
            }
        }
    }

    fn drain_output(&mut self) {
        let mut buf = [0u8; READ_CHUNK_SIZE];
        while let Some(output) = self.output.as_mut() {
            match output.pipe.read(&mut buf) {
                PipeStatus::Transferred(n) => output.sink.receive(&buf[..n]),
                PipeStatus::WouldBlock => return,
                PipeStatus::Closed | PipeStatus::Errored => {
                    self.close_output();
                    return;
                }
            }
        }
    }

    /// Queries the exit status, caching it on success. Returns whether the
    /// process is now known to have finished.
    fn settle(&mut self, block: bool) -> bool {
        let result = if block {
            self.child.wait().map(Some)
        } else {
            self.child.try_wait()
        };
        let exit_code = match result {
            Ok(Some(status)) => decode_exit_status(status),
            Ok(None) => return false,
            Err(e) => {
                warn!("failed to query status of process {}: {e}", self.child.id());
                UNKNOWN_EXIT_CODE
            }
        };
        // whatever the child wrote before exiting is still sitting in the pipe
        self.drain_output();
        self.close_input();
        debug!(
            "process {} {} exited with code {exit_code}",
            self.child.id(),
            self.debug_cmdline,
        );
        self.exit_code = Some(exit_code);
        true
    }
}

fn decode_exit_status(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| -signal))
        .unwrap_or(UNKNOWN_EXIT_CODE)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_empty_process() {
        let mut process = Process::default();
        assert!(process.is_empty());
        assert_eq!(process.debug_cmdline(), "");
        assert_eq!(process.id(), None);
        assert!(!process.known_to_be_finished());
        assert!(matches!(process.exit_code(), Err(Error::NullProcess)));
        assert!(matches!(process.check_if_finished(), Err(Error::NullProcess)));
        assert!(matches!(process.wait_until_finished(), Err(Error::NullProcess)));
        // both are no-ops on an empty instance
        process.kill(true);
        process.detach();
        assert!(process.is_empty());
    }

    #[test]
    fn test_empty_command() {
        let argv: [&str; 0] = [];
        let result = Process::spawn(&argv, Redirect::new());
        assert!(matches!(result, Err(Error::EmptyCommand)));
    }

    #[test]
    fn test_decode_exit_status() {
        assert_eq!(decode_exit_status(ExitStatus::from_raw(0)), 0);
        assert_eq!(decode_exit_status(ExitStatus::from_raw(3 << 8)), 3);
        assert_eq!(decode_exit_status(ExitStatus::from_raw(libc::SIGKILL)), -libc::SIGKILL);
    }

    #[test]
    fn test_num_cpu_cores_is_stable() {
        let cores = num_cpu_cores();
        assert!(cores >= 1);
        assert_eq!(cores, num_cpu_cores());
    }
}
