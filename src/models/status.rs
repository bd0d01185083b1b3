/// A point-in-time snapshot of a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Status {
    /// Exit code of the first failure seen, 0 if none. Without stop on
    /// failure this can be set while other tasks are still running.
    pub exit_code: i32,
    /// Finished tasks, failed ones included.
    pub num_finished: usize,
    /// How many of the finished tasks failed.
    pub num_failed: usize,
    pub num_running: usize,
    pub num_total: usize,
}

impl Status {
    pub fn is_finished(&self) -> bool {
        self.num_running == 0
    }

    pub fn is_success(&self) -> bool {
        self.is_finished() && self.exit_code == 0 && self.num_finished == self.num_total
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_finished_flags() {
        let running = Status { num_finished: 1, num_running: 2, num_total: 3, ..Default::default() };
        assert!(!running.is_finished());
        assert!(!running.is_success());

        let done = Status { num_finished: 3, num_total: 3, ..Default::default() };
        assert!(done.is_finished());
        assert!(done.is_success());

        let failed = Status { exit_code: 2, num_finished: 2, num_failed: 1, num_total: 3, ..Default::default() };
        assert!(failed.is_finished());
        assert!(!failed.is_success());
    }
}
