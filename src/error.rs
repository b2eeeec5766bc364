use std::num::ParseIntError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("parser error: {0}")]
    Parser(String),

    #[error("max resync size reached ({window} bytes), could not find sync byte")]
    NoSync { window: usize },

    #[error("pid {0:#06x} is already filtered")]
    AlreadyFiltered(u16),

    #[error("out of memory allocating {0} bytes")]
    OutOfMemory(usize),

    #[error("config error: {0}")]
    Config(String),

    #[error("parse int error: {0}")]
    ParseInt(#[from] ParseIntError),
}

impl TsError {
    /// Errors that only spoil the current section or PES unit.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TsError::InvalidData(_) | TsError::Parser(_))
    }
}

pub type Result<T> = std::result::Result<T, TsError>;
