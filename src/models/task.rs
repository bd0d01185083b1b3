/// A unit of work handed to the queue before it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub name: String,
    /// Program followed by its arguments.
    pub command: Vec<String>,
    /// Sent to stdin when present, otherwise stdin is not redirected.
    pub input: Option<Vec<u8>>,
}

impl Task {
    pub fn new<N, C, S>(name: N, command: C) -> Self
    where
        N: Into<String>,
        C: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            command: command.into_iter().map(Into::into).collect(),
            input: None,
        }
    }

    /// Runs `script` through `sh -c`, named after the script itself.
    pub fn shell(script: impl Into<String>) -> Self {
        let script = script.into();
        Self::new(script.clone(), ["sh".to_string(), "-c".to_string(), script])
    }

    pub fn with_input(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.input = Some(input.into());
        self
    }
}
