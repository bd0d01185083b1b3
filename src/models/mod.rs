pub mod status;
pub mod task;

pub use status::Status;
pub use task::Task;
