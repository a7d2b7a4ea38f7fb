use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum LabError {
    #[error("invalid patient id: {0}")]
    InvalidPatientId(String),

    #[error("invalid lab technician id: {0}")]
    InvalidTechnicianId(String),

    #[error("invalid gender: {0}")]
    InvalidGender(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("no file was provided")]
    MissingUpload,

    #[error("rejected upload: {message}")]
    BadUpload { status: u16, message: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid environment override {key}: {message}")]
    ConfigEnv { key: String, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read marker file: {0}")]
    MarkerStream(String),

    #[error("record store error: {0}")]
    Store(String),

    #[error("lab technician not found: {0}")]
    TechnicianNotFound(i64),

    #[error("patient not found: {0}")]
    PatientNotFound(i64),

    #[error("email already registered: {0}")]
    DuplicateEmail(String),

    #[error("server error: {0}")]
    Server(String),
}

impl From<rusqlite::Error> for LabError {
    fn from(err: rusqlite::Error) -> Self {
        LabError::Store(err.to_string())
    }
}
