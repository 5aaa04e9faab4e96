use crate::error::PipelineError;
use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: String,
    pub sample_rows: usize,
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub backend: String, // "remote" or "ollama"
    pub model: String,
    pub api_url: Option<String>,
    /// Name of the environment variable holding the provider key.
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptConfig {
    /// Directory whose files override the built-in templates.
    pub template_dir: Option<String>,
    pub top_k: usize,
    pub max_summary_rows: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub prompts: PromptConfig,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Ask questions about a SQLite database in plain English", long_about = None)]
pub struct CliArgs {
    /// Business question to translate into SQL
    #[arg(value_parser = parse_question)]
    pub question: String,

    /// Execute the generated SQL against the database
    #[arg(short, long)]
    pub execute: bool,

    /// Ask the model to phrase the query result as an answer
    #[arg(short, long, requires = "execute")]
    pub summarize: bool,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// SQLite database to query
    #[arg(short, long, value_name = "PATH")]
    pub database: Option<String>,

    /// LLM backend ("remote" or "ollama")
    #[arg(long)]
    pub backend: Option<String>,

    /// Model name passed to the backend
    #[arg(long)]
    pub model: Option<String>,

    /// Directory containing prompt template overrides
    #[arg(long, value_name = "DIR")]
    pub templates: Option<String>,

    /// Fail instead of warning when the question looks ambiguous
    #[arg(long)]
    pub reject_ambiguous: bool,

    /// Print the outcome as JSON
    #[arg(long)]
    pub json: bool,

    /// Log pipeline progress to stderr
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

fn parse_question(raw: &str) -> Result<String, String> {
    let question = raw.trim();
    if question.is_empty() {
        return Err("question must not be empty".to_string());
    }
    Ok(question.to_string())
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config_builder = Self::defaults()?;

        // Add configuration from file if specified
        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            // Check for config in default locations
            let default_locations = ["nl-sql.toml", "config/nl-sql.toml"];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        config_builder = config_builder.add_source(
            Environment::with_prefix("NL_SQL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        // Override with command line args if provided
        if let Some(database) = &args.database {
            config.database.path = database.clone();
        }
        if let Some(backend) = &args.backend {
            config.llm.backend = backend.clone();
        }
        if let Some(model) = &args.model {
            config.llm.model = model.clone();
        }
        if let Some(templates) = &args.templates {
            config.prompts.template_dir = Some(templates.clone());
        }

        Ok(config)
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        let defaults = AppConfig::default();
        Config::builder()
            .set_default("database.path", defaults.database.path)?
            .set_default("database.sample_rows", defaults.database.sample_rows as u64)?
            .set_default("database.busy_timeout_ms", defaults.database.busy_timeout_ms)?
            .set_default("llm.backend", defaults.llm.backend)?
            .set_default("llm.model", defaults.llm.model)?
            .set_default("llm.api_key_env", defaults.llm.api_key_env)?
            .set_default("llm.temperature", defaults.llm.temperature as f64)?
            .set_default("llm.max_tokens", defaults.llm.max_tokens as u64)?
            .set_default("llm.timeout_secs", defaults.llm.timeout_secs)?
            .set_default("prompts.top_k", defaults.prompts.top_k as u64)?
            .set_default("prompts.max_summary_rows", defaults.prompts.max_summary_rows as u64)
    }
}

impl LlmConfig {
    fn requires_api_key(&self) -> bool {
        self.backend != "ollama"
    }

    /// Resolves the provider key through `lookup` (normally `std::env::var`).
    pub fn resolve_api_key<F>(&self, lookup: F) -> Result<Option<String>, PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if !self.requires_api_key() {
            return Ok(None);
        }

        match lookup(&self.api_key_env) {
            Some(key) if !key.trim().is_empty() => Ok(Some(key)),
            _ => Err(PipelineError::Config(format!(
                "environment variable {} is not set",
                self.api_key_env
            ))),
        }
    }
}

// Default implementation
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                path: "sales.db".to_string(),
                sample_rows: 3,
                busy_timeout_ms: 5_000,
            },
            llm: LlmConfig {
                backend: "remote".to_string(),
                model: "gpt-4.1".to_string(),
                api_url: None,
                api_key_env: "OPENAI_API_KEY".to_string(),
                temperature: 0.0,
                max_tokens: 2000,
                timeout_secs: 60,
            },
            prompts: PromptConfig {
                template_dir: None,
                top_k: 10,
                max_summary_rows: 50,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["nl-sql"];
        argv.extend_from_slice(extra);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_apply_without_a_config_file() {
        let config = AppConfig::new(&args(&["List all customers"])).unwrap();

        assert_eq!(config.llm.backend, "remote");
        assert_eq!(config.llm.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.prompts.top_k, 10);
    }

    #[test]
    fn file_values_are_overridden_by_cli_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nl-sql.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[database]\npath = \"from-file.db\"\n\n[llm]\nmodel = \"file-model\"\n\n[prompts]\nmax_summary_rows = 5"
        )
        .unwrap();

        let cli = args(&[
            "--config",
            path.to_str().unwrap(),
            "--database",
            "cli.db",
            "How many orders were placed in 2024?",
        ]);
        let config = AppConfig::new(&cli).unwrap();

        assert_eq!(config.database.path, "cli.db");
        assert_eq!(config.llm.model, "file-model");
        assert_eq!(config.prompts.max_summary_rows, 5);
        assert_eq!(config.database.sample_rows, 3);
    }

    #[test]
    fn summarize_requires_execute() {
        let result = CliArgs::try_parse_from(["nl-sql", "--summarize", "List all customers"]);
        assert!(result.is_err());

        let cli = args(&["--execute", "--summarize", "List all customers"]);
        assert!(cli.execute && cli.summarize);
    }

    #[test]
    fn blank_questions_are_rejected() {
        assert!(CliArgs::try_parse_from(["nl-sql", "   "]).is_err());
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        let config = AppConfig::default().llm;
        let err = config.resolve_api_key(|_| None).unwrap_err();
        assert_eq!(err.kind(), "ConfigError");

        let err = config.resolve_api_key(|_| Some("  ".to_string())).unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
    }

    #[test]
    fn api_key_is_read_from_the_configured_variable() {
        let mut config = AppConfig::default().llm;
        config.api_key_env = "MY_KEY".to_string();
        let key = config
            .resolve_api_key(|name| (name == "MY_KEY").then(|| "sk-123".to_string()))
            .unwrap();
        assert_eq!(key.as_deref(), Some("sk-123"));
    }

    #[test]
    fn ollama_skips_the_key_check() {
        let mut config = AppConfig::default().llm;
        config.backend = "ollama".to_string();
        assert_eq!(config.resolve_api_key(|_| None).unwrap(), None);
    }
}
