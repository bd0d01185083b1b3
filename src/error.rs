use std::io;
use thiserror::Error;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot start a process without a command")]
    EmptyCommand,
    #[error("failed to start process: {cmdline}")]
    Spawn {
        cmdline: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to set up the process {which} stream")]
    Pipe {
        which: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("this process wrapper is null")]
    NullProcess,
    #[error("this process hasn't finished running yet, or its status wasn't updated")]
    NotFinished,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
