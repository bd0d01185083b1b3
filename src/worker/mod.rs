pub mod pipe;
pub mod process;
pub mod stream;

pub use pipe::PipeStatus;
pub use process::{num_cpu_cores, Process, Redirect, UNKNOWN_EXIT_CODE};
pub use stream::{BytesInput, CappedOutput, InputSource, OutputSink};
