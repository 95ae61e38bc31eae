//! Rendering of diagnostics and terminal errors.
use crate::compile::Diagnostic;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_PRINT_FIELDS: &str = "filename:line:column:message";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintField {
    Filename,
    Line,
    Column,
    Id,
    Message,
}

impl FromStr for PrintField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "filename" => Ok(Self::Filename),
            "line" => Ok(Self::Line),
            "column" => Ok(Self::Column),
            "id" => Ok(Self::Id),
            "message" => Ok(Self::Message),
            other => Err(format!(
                "Unknown print field '{other}', expected one of filename, line, column, id, message"
            )),
        }
    }
}

/// Which diagnostic fields are printed, and in what order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintFields(Vec<PrintField>);

impl FromStr for PrintFields {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields = s
            .split(':')
            .map(PrintField::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(fields))
    }
}

impl Default for PrintFields {
    fn default() -> Self {
        Self(vec![
            PrintField::Filename,
            PrintField::Line,
            PrintField::Column,
            PrintField::Message,
        ])
    }
}

impl PrintFields {
    pub fn format(&self, diagnostic: &Diagnostic) -> String {
        self.0
            .iter()
            .map(|field| match field {
                PrintField::Filename => diagnostic.filename.clone(),
                PrintField::Line => diagnostic.line.to_string(),
                PrintField::Column => diagnostic.column.to_string(),
                PrintField::Id => diagnostic.id.clone().unwrap_or_default(),
                PrintField::Message => diagnostic.message.clone(),
            })
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// The outcome of a failed command: a process exit code and a message.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ExitError {
    pub code: i32,
    pub message: String,
}

impl ExitError {
    /// Renders the error for the configured output mode.
    pub fn render(&self, json: bool) -> String {
        if json {
            serde_json::to_string(self).unwrap_or_else(|_| self.message.clone())
        } else {
            self.message.clone()
        }
    }
}

impl fmt::Display for ExitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (exit code {})", self.message, self.code)
    }
}

impl std::error::Error for ExitError {}
