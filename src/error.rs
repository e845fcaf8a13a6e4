use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum PlotError {
    /// Invalid layout directive, caught at merge/validation time. Fatal to the plot.
    Configuration(String),
    /// A provider failed or returned an inconsistent response. Fails the whole batch.
    DataSource(String),
    /// Unknown name requested from a function registry.
    NotFound(String),
    /// A template variable could not be resolved. Caught per variable, never fatal.
    Template(String),
    Http(reqwest::Error),
    Serde(serde_json::Error),
}

impl Error for PlotError {}

impl fmt::Display for PlotError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PlotError::Configuration(msg) => write!(f, "configuration error: {msg}"),
            PlotError::DataSource(msg) => write!(f, "data source error: {msg}"),
            PlotError::NotFound(msg) => write!(f, "not found: {msg}"),
            PlotError::Template(msg) => write!(f, "template error: {msg}"),
            PlotError::Http(err) => write!(f, "http error: {err}"),
            PlotError::Serde(err) => write!(f, "serde error: {err}"),
        }
    }
}

impl From<String> for PlotError {
    fn from(err: String) -> Self {
        PlotError::DataSource(err)
    }
}

impl From<reqwest::Error> for PlotError {
    fn from(err: reqwest::Error) -> Self {
        PlotError::Http(err)
    }
}

impl From<serde_json::Error> for PlotError {
    fn from(err: serde_json::Error) -> Self {
        PlotError::Serde(err)
    }
}

pub type Result<T> = std::result::Result<T, PlotError>;
