use std::{cell::RefCell, rc::Rc};

/// Produces the bytes fed to a child's stdin.
///
/// The process pulls from the source whenever it is polled: it writes as much
/// of `pending()` as the pipe accepts without blocking, then reports that
/// amount through `consume()`. Returning `None` from `pending()` closes the
/// child's stdin, and the source is never asked again afterwards.
pub trait InputSource {
    /// The bytes still waiting to be written, or `None` once the source has
    /// nothing more to give. An empty slice means "nothing right now".
    fn pending(&mut self) -> Option<&[u8]>;

    fn consume(&mut self, amount: usize);
}

/// Receives a child's combined stdout and stderr, chunk by chunk, in order.
pub trait OutputSink {
    fn receive(&mut self, data: &[u8]);
}

impl<F> OutputSink for F
where
    F: FnMut(&[u8]),
{
    fn receive(&mut self, data: &[u8]) {
        self(data)
    }
}

/// A fixed byte string delivered to stdin.
#[derive(Debug, Clone, Default)]
pub struct BytesInput {
    data: Vec<u8>,
    pos: usize,
}

impl BytesInput {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }
}

impl InputSource for BytesInput {
    fn pending(&mut self) -> Option<&[u8]> {
        (self.pos < self.data.len()).then(|| &self.data[self.pos..])
    }

    fn consume(&mut self, amount: usize) {
        self.pos = (self.pos + amount).min(self.data.len());
    }
}

/// Appends output into a shared buffer, keeping at most `max_bytes` of it.
///
/// The buffer is shared so the owner of the process can read what was
/// captured while the sink stays attached to the process.
#[derive(Debug, Clone)]
pub struct CappedOutput {
    target: Rc<RefCell<Vec<u8>>>,
    remaining: usize,
}

impl CappedOutput {
    pub fn new(target: Rc<RefCell<Vec<u8>>>, max_bytes: usize) -> Self {
        Self {
            target,
            remaining: max_bytes,
        }
    }
}

impl OutputSink for CappedOutput {
    fn receive(&mut self, data: &[u8]) {
        if self.remaining == 0 {
            return;
        }
        let data = &data[..data.len().min(self.remaining)];
        self.target.borrow_mut().extend_from_slice(data);
        self.remaining -= data.len();
    }
}
