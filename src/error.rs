use crate::llm::LlmError;
use std::error::Error;
use std::fmt;

/// Every way a run can end in the FAILED state.
#[derive(Debug)]
pub enum PipelineError {
    /// Missing credential or unusable configuration. Raised before the pipeline starts.
    Config(String),
    /// Database file missing, unreadable, or without user tables.
    Schema(String),
    /// Template could not be loaded, parsed, or fully resolved.
    Template(String),
    /// Network, authentication, rate-limit, or timeout failure from the model provider.
    Model(LlmError),
    /// Model response did not contain exactly one usable SQL statement.
    SqlExtraction(String),
    /// Generated SQL is not a read-only statement.
    UnsafeStatement(String),
    /// The database rejected the query.
    Execution(String),
    /// Question needs clarification before SQL can be generated.
    AmbiguousQuestion(String),
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Config(_) => "ConfigError",
            PipelineError::Schema(_) => "SchemaError",
            PipelineError::Template(_) => "TemplateError",
            PipelineError::Model(_) => "ModelError",
            PipelineError::SqlExtraction(_) => "SQLExtractionError",
            PipelineError::UnsafeStatement(_) => "UnsafeStatementError",
            PipelineError::Execution(_) => "ExecutionError",
            PipelineError::AmbiguousQuestion(_) => "AmbiguousQuestionError",
        }
    }

    /// Configuration problems exit with 2 so scripts can tell them apart from failed runs.
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::Config(_) => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Config(msg) => write!(f, "configuration error: {}", msg),
            PipelineError::Schema(msg) => write!(f, "schema introspection failed: {}", msg),
            PipelineError::Template(msg) => write!(f, "prompt template error: {}", msg),
            PipelineError::Model(e) => write!(f, "{}", e),
            PipelineError::SqlExtraction(msg) => write!(f, "could not extract SQL: {}", msg),
            PipelineError::UnsafeStatement(msg) => write!(f, "refusing to execute: {}", msg),
            PipelineError::Execution(msg) => write!(f, "query execution failed: {}", msg),
            PipelineError::AmbiguousQuestion(msg) => write!(f, "question is ambiguous: {}", msg),
        }
    }
}

impl Error for PipelineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PipelineError::Model(e) => Some(e),
            _ => None,
        }
    }
}

impl From<LlmError> for PipelineError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::ConfigError(msg) => PipelineError::Config(msg),
            other => PipelineError::Model(other),
        }
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(e: config::ConfigError) -> Self {
        PipelineError::Config(e.to_string())
    }
}

impl From<minijinja::Error> for PipelineError {
    fn from(e: minijinja::Error) -> Self {
        PipelineError::Template(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_use_a_distinct_exit_code() {
        assert_eq!(PipelineError::Config("x".into()).exit_code(), 2);
        assert_eq!(PipelineError::Execution("x".into()).exit_code(), 1);
        assert_eq!(PipelineError::SqlExtraction("x".into()).exit_code(), 1);
    }

    #[test]
    fn llm_config_errors_become_config_errors() {
        let err: PipelineError = LlmError::ConfigError("no backend".into()).into();
        assert_eq!(err.kind(), "ConfigError");

        let err: PipelineError = LlmError::RateLimited("slow down".into()).into();
        assert_eq!(err.kind(), "ModelError");
        assert!(err.source().is_some());
    }
}
