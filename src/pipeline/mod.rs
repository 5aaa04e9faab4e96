pub mod ambiguity;
pub mod generator;
pub mod summarizer;

use crate::config::AppConfig;
use crate::db::executor::{self, ResultSet};
use crate::db::schema::SchemaDescription;
use crate::db::Database;
use crate::error::PipelineError;
use crate::llm::{LanguageModel, LlmManager};
use crate::prompt::PromptRenderer;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where a run currently is. Stages only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Generate,
    Execute,
    Summarize,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Generate => "GENERATE",
            Stage::Execute => "EXECUTE",
            Stage::Summarize => "SUMMARIZE",
            Stage::Done => "DONE",
            Stage::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub execute: bool,
    /// Only honoured when `execute` is also set.
    pub summarize: bool,
    pub reject_ambiguous: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub sample_rows: usize,
    pub top_k: usize,
    pub max_summary_rows: usize,
}

impl From<&AppConfig> for PipelineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            sample_rows: config.database.sample_rows,
            top_k: config.prompts.top_k,
            max_summary_rows: config.prompts.max_summary_rows,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PipelineOutcome {
    pub question: String,
    pub sql: String,
    pub result: Option<ResultSet>,
    pub answer: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PipelineOutcome {
    pub fn to_text(&self) -> String {
        let mut out = format!("Generated SQL:\n{}\n", self.sql);
        if let Some(result) = &self.result {
            out.push_str("\nQuery Result:\n");
            out.push_str(&result.to_text_table());
        }
        if let Some(answer) = &self.answer {
            out.push_str("\nAnswer:\n");
            out.push_str(answer);
            out.push('\n');
        }
        out
    }
}

/// One question, answered by GENERATE → (EXECUTE) → (SUMMARIZE) → DONE.
pub struct Pipeline {
    model: Box<dyn LanguageModel>,
    renderer: PromptRenderer,
    db: Database,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        model: Box<dyn LanguageModel>,
        renderer: PromptRenderer,
        db: Database,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            model,
            renderer,
            db,
            settings,
        }
    }

    /// Wires the pipeline from configuration. The credential is checked
    /// before the model client is built or the database is opened.
    pub fn from_config<F>(config: &AppConfig, lookup_env: F) -> Result<Self, PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = config.llm.resolve_api_key(lookup_env)?;
        let model = LlmManager::new(&config.llm, api_key)?;
        let renderer = PromptRenderer::new(config.prompts.template_dir.as_ref().map(PathBuf::from));
        let db = Database::open_read_only(
            &config.database.path,
            Duration::from_millis(config.database.busy_timeout_ms),
        )?;

        Ok(Self::new(Box::new(model), renderer, db, PipelineSettings::from(config)))
    }

    pub async fn run(&self, question: &str, options: &RunOptions) -> Result<PipelineOutcome, PipelineError> {
        let mut stage = Stage::Generate;
        match self.run_stages(question, options, &mut stage).await {
            Ok(outcome) => {
                info!("Pipeline finished: {} -> {}", stage, Stage::Done);
                Ok(outcome)
            }
            Err(e) => {
                info!("Pipeline state: {} (failed in {}: {})", Stage::Failed, stage, e.kind());
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        question: &str,
        options: &RunOptions,
        stage: &mut Stage,
    ) -> Result<PipelineOutcome, PipelineError> {
        info!("Pipeline state: {}", stage);

        if let Some(reason) = ambiguity::ambiguity_reason(question) {
            if options.reject_ambiguous {
                return Err(PipelineError::AmbiguousQuestion(format!(
                    "{}; please name the metric, limit or time period you are interested in",
                    reason
                )));
            }
            warn!("Question may be ambiguous: {}", reason);
        }

        let schema = SchemaDescription::introspect(&self.db, self.settings.sample_rows)?;
        debug!("Schema tables: {:?}", schema.table_names());
        let sql = generator::generate_sql(
            self.model.as_ref(),
            &self.renderer,
            question,
            &schema,
            self.settings.top_k,
        )
        .await?;

        let mut outcome = PipelineOutcome {
            question: question.to_string(),
            sql,
            result: None,
            answer: None,
            created_at: Utc::now(),
        };

        if !options.execute {
            return Ok(outcome);
        }

        *stage = Stage::Execute;
        info!("Pipeline state: {}", stage);
        let result = executor::execute(&self.db, &outcome.sql)?;

        if options.summarize {
            *stage = Stage::Summarize;
            info!("Pipeline state: {}", stage);
            let answer = summarizer::summarize(
                self.model.as_ref(),
                &self.renderer,
                question,
                &outcome.sql,
                &result,
                self.settings.max_summary_rows,
            )
            .await?;
            outcome.answer = Some(answer);
        }

        outcome.result = Some(result);
        Ok(outcome)
    }
}
