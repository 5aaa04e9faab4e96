use crate::db::executor::ResultSet;
use crate::error::PipelineError;
use crate::llm::{LanguageModel, LlmError};
use crate::prompt::{PromptRenderer, PromptVars, SUMMARIZE_ANSWER};
use minijinja::Value;
use tracing::{debug, info};

/// Stands in for the row listing when a query matched nothing.
pub const NO_ROWS_MARKER: &str = "(no rows returned)";

/// CSV listing of at most `max_rows` rows, with a note when rows were left out.
pub fn render_results(result: &ResultSet, max_rows: usize) -> Result<String, PipelineError> {
    if result.is_empty() {
        return Ok(NO_ROWS_MARKER.to_string());
    }

    let mut listing = result
        .to_csv(max_rows)
        .map_err(|e| PipelineError::Template(format!("cannot render result rows: {}", e)))?;

    let total = result.row_count();
    if total > max_rows {
        listing.push_str(&format!(
            "(showing the first {} of {} rows; {} rows omitted)\n",
            max_rows,
            total,
            total - max_rows
        ));
    }
    Ok(listing)
}

pub fn build_prompt(
    renderer: &PromptRenderer,
    question: &str,
    sql: &str,
    result: &ResultSet,
    max_rows: usize,
) -> Result<String, PipelineError> {
    let mut vars = PromptVars::new();
    vars.insert("question", Value::from(question));
    vars.insert("sql", Value::from(sql));
    vars.insert("results", Value::from(render_results(result, max_rows)?));
    vars.insert("row_count", Value::from(result.row_count()));
    renderer.render(&SUMMARIZE_ANSWER, &vars)
}

/// Asks the model to answer `question` from the rows `sql` returned.
pub async fn summarize(
    model: &dyn LanguageModel,
    renderer: &PromptRenderer,
    question: &str,
    sql: &str,
    result: &ResultSet,
    max_rows: usize,
) -> Result<String, PipelineError> {
    let prompt = build_prompt(renderer, question, sql, result, max_rows)?;
    debug!("Prepared summary prompt: {}", prompt);

    let answer = model.complete(&prompt).await?;
    let answer = answer.trim();
    if answer.is_empty() {
        return Err(LlmError::ResponseError("model returned an empty answer".to_string()).into());
    }

    info!("Received answer ({} chars)", answer.len());
    Ok(answer.to_string())
}
