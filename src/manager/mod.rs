pub mod process_queue;

pub use process_queue::{Job, Params, ProcessQueue, StatusCallback};
