use crate::db::guard::{leading_keyword, split_statements, strip_leading_noise};
use crate::db::schema::SchemaDescription;
use crate::error::PipelineError;
use crate::llm::models::SqlGenerationOutput;
use crate::llm::LanguageModel;
use crate::prompt::{PromptRenderer, PromptVars, GENERATE_SQL};
use minijinja::Value;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, info};

pub const DIALECT: &str = "SQLite";

/// Fewer words than this and the model most likely did not understand the question.
const MIN_STATEMENT_WORDS: usize = 3;

static SQL_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(sql\s*query|sql)\s*:\s*").expect("valid regex"));

// WITH must be followed by a CTE definition and SELECT by a select list.
static READ_STATEMENT_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?ix)
          ^\s*
          (?:
              with \s+ (?:recursive\s+)?
              (?:\w+|"[^"]+"|`[^`]+`|\[[^\]]+\])
              \s* (?:\([^)]*\)\s*)?
              as \s* (?:not\s+)? (?:materialized\s+)? \(
            | select \s+ (?:distinct\s+|all\s+)? (?:\*|[\w"`\['(]|-?\d)
          )"#,
    )
    .expect("valid regex")
});

// Statements other than SELECT/WITH, used to spot a second statement hiding in trailing text.
static OTHER_STATEMENT_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(insert|update|delete|upsert|drop|alter|create|pragma|attach|detach|vacuum|reindex)\s+[\w(*'\x22`\[]",
    )
    .expect("valid regex")
});

pub fn build_prompt(
    renderer: &PromptRenderer,
    question: &str,
    schema: &SchemaDescription,
    top_k: usize,
) -> Result<String, PipelineError> {
    let mut vars = PromptVars::new();
    vars.insert("dialect", Value::from(DIALECT));
    vars.insert("top_k", Value::from(top_k));
    vars.insert("table_info", Value::from(schema.render()));
    vars.insert("input", Value::from(question));
    renderer.render(&GENERATE_SQL, &vars)
}

/// Asks the model for a query answering `question` and extracts exactly one statement from the reply.
pub async fn generate_sql(
    model: &dyn LanguageModel,
    renderer: &PromptRenderer,
    question: &str,
    schema: &SchemaDescription,
    top_k: usize,
) -> Result<String, PipelineError> {
    let prompt = build_prompt(renderer, question, schema, top_k)?;
    debug!("Prepared LLM prompt: {}", prompt);

    let raw = model.complete(&prompt).await?;
    debug!("Raw model response: {}", raw);

    let sql = extract_sql(&raw)?;
    info!("Generated SQL: {}", sql);
    Ok(sql)
}

/// Pulls a single SELECT/WITH statement out of a model reply.
///
/// Accepts a JSON object with an `SQL` field, a fenced code block, or plain
/// text with the statement on its own lines.
pub fn extract_sql(raw: &str) -> Result<String, PipelineError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(PipelineError::SqlExtraction("model returned an empty response".to_string()));
    }

    let body = strip_code_fences(text);
    let candidate = if body.starts_with('{') {
        let output: SqlGenerationOutput = serde_json::from_str(body).map_err(|e| {
            PipelineError::SqlExtraction(format!("JSON response has no usable \"SQL\" field: {}", e))
        })?;
        sql_from_output(output)
    } else if let Some(output) = embedded_json(body) {
        sql_from_output(output)
    } else {
        body.to_string()
    };

    let statement_text = from_first_statement_line(&candidate).ok_or_else(|| {
        PipelineError::SqlExtraction("response contains no SELECT or WITH statement".to_string())
    })?;

    let statements = split_statements(&statement_text);
    let Some((first, rest)) = statements.split_first() else {
        return Err(PipelineError::SqlExtraction("response contains no SQL statement".to_string()));
    };

    if let Some(extra) = rest.iter().find_map(|segment| embedded_statement(segment)) {
        return Err(PipelineError::SqlExtraction(format!(
            "response contains more than one statement (another one starts with {})",
            leading_keyword(extra)
        )));
    }
    if !rest.is_empty() {
        debug!("Ignoring commentary after the statement: {:?}", rest);
    }

    let sql = first.trim().to_string();
    if sql.split_whitespace().count() < MIN_STATEMENT_WORDS {
        return Err(PipelineError::SqlExtraction(format!(
            "statement is too short to answer the question: {}",
            sql
        )));
    }

    Ok(sql)
}

fn sql_from_output(output: SqlGenerationOutput) -> String {
    if let Some(explanation) = &output.explanation {
        debug!("Model explanation: {}", explanation);
    }
    strip_code_fences(output.sql.trim()).to_string()
}

/// A JSON object with an `SQL` field somewhere inside surrounding prose.
fn embedded_json(text: &str) -> Option<SqlGenerationOutput> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

fn opens_read_statement(text: &str) -> bool {
    READ_STATEMENT_START.is_match(strip_leading_noise(text))
}

fn opens_statement(text: &str) -> bool {
    let text = strip_leading_noise(text);
    READ_STATEMENT_START.is_match(text) || OTHER_STATEMENT_START.is_match(text)
}

/// Byte offsets at which each line of `text` begins.
fn line_starts(text: &str) -> impl Iterator<Item = usize> + '_ {
    std::iter::once(0).chain(text.match_indices('\n').map(|(i, _)| i + 1))
}

/// The first statement found at the start of any line of `segment`.
fn embedded_statement(segment: &str) -> Option<&str> {
    line_starts(segment)
        .map(|start| &segment[start..])
        .find(|tail| opens_statement(tail))
}

/// Returns the content of the first fenced block, or `text` when there is none.
fn strip_code_fences(text: &str) -> &str {
    let Some(start) = text.find("```") else {
        return text;
    };
    let after_fence = &text[start + 3..];
    // drop the language tag on the opening fence line
    let content = match after_fence.find('\n') {
        Some(newline) => &after_fence[newline + 1..],
        None => after_fence,
    };
    let content = match content.find("```") {
        Some(end) => &content[..end],
        None => content,
    };
    content.trim()
}

/// Everything from the first line that opens a SELECT/WITH statement.
fn from_first_statement_line(text: &str) -> Option<String> {
    line_starts(text).find_map(|start| {
        let tail = SQL_LABEL.replace(&text[start..], "");
        opens_read_statement(&tail).then(|| tail.trim().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::sales_db;
    use crate::db::Database;
    use crate::pipeline::test_support::ScriptedModel;
    use std::time::Duration;

    #[test]
    fn plain_statement_passes_through() {
        assert_eq!(
            extract_sql("SELECT name FROM customers;").unwrap(),
            "SELECT name FROM customers"
        );
    }

    #[test]
    fn code_fences_are_stripped() {
        let raw = "Here you go:\n```sql\nSELECT name\nFROM customers\nORDER BY name;\n```\nThis lists names.";
        assert_eq!(extract_sql(raw).unwrap(), "SELECT name\nFROM customers\nORDER BY name");
    }

    #[test]
    fn json_reply_is_understood() {
        let raw = r#"{"SQL": "SELECT COUNT(*) FROM customers", "explanation": "counts rows"}"#;
        assert_eq!(extract_sql(raw).unwrap(), "SELECT COUNT(*) FROM customers");

        let fenced = "```json\n{\"sql\": \"WITH c AS (SELECT 1 AS x) SELECT x FROM c\"}\n```";
        assert_eq!(extract_sql(fenced).unwrap(), "WITH c AS (SELECT 1 AS x) SELECT x FROM c");
    }

    #[test]
    fn json_without_sql_field_is_rejected() {
        let err = extract_sql(r#"{"answer": "SELECT * FROM customers"}"#).unwrap_err();
        assert_eq!(err.kind(), "SQLExtractionError");
    }

    #[test]
    fn prose_before_the_statement_is_skipped() {
        let raw = "Sure! The query is:\nSQLQuery: select * from customers where country = 'UK'";
        assert_eq!(
            extract_sql(raw).unwrap(),
            "select * from customers where country = 'UK'"
        );
    }

    #[test]
    fn lowercase_with_is_accepted() {
        let sql = extract_sql("with big as (select * from customers) select name from big").unwrap();
        assert!(sql.starts_with("with"));
    }

    #[test]
    fn responses_without_a_statement_are_rejected() {
        for raw in [
            "",
            "   ",
            "I'm sorry, I cannot answer that.",
            "DROP TABLE customers;",
            "```sql\nDELETE FROM customers\n```",
        ] {
            assert_eq!(extract_sql(raw).unwrap_err().kind(), "SQLExtractionError", "{:?}", raw);
        }
    }

    #[test]
    fn multiple_statements_are_rejected() {
        for raw in [
            "SELECT * FROM customers; DROP TABLE customers;",
            "SELECT * FROM customers;\nDELETE FROM customers;",
            r#"{"SQL": "SELECT 1 FROM customers; UPDATE customers SET name = 'x'"}"#,
            "```sql\nSELECT * FROM a;\nSELECT * FROM b;\n```",
        ] {
            let err = extract_sql(raw).unwrap_err();
            assert_eq!(err.kind(), "SQLExtractionError", "{:?}", raw);
            assert!(err.to_string().contains("more than one"), "{:?}", raw);
        }
    }

    #[test]
    fn prose_opening_with_a_keyword_is_not_sql() {
        let raw = "With pleasure! Here is the query:\nSELECT name FROM customers";
        assert_eq!(extract_sql(raw).unwrap(), "SELECT name FROM customers");

        let raw = "Selecting from one table is enough.\nWITH uk AS (SELECT * FROM customers WHERE country = 'UK')\nSELECT name FROM uk";
        assert!(extract_sql(raw).unwrap().starts_with("WITH uk AS"));
    }

    #[test]
    fn second_statement_after_commentary_is_rejected() {
        for raw in [
            "SELECT name FROM customers;\nAlternatively:\nSELECT id FROM customers;",
            "SELECT name FROM customers;\nTo clean up afterwards run\nDROP TABLE customers;",
        ] {
            let err = extract_sql(raw).unwrap_err();
            assert_eq!(err.kind(), "SQLExtractionError", "{:?}", raw);
            assert!(err.to_string().contains("more than one"), "{:?}", raw);
        }
    }

    #[test]
    fn json_inside_prose_is_understood() {
        let raw = r#"Here you go: {"SQL": "SELECT name FROM customers WHERE country = 'US'"}"#;
        assert_eq!(
            extract_sql(raw).unwrap(),
            "SELECT name FROM customers WHERE country = 'US'"
        );
    }

    #[test]
    fn trailing_commentary_is_not_a_second_statement() {
        let raw = "SELECT name FROM customers;\nThis returns every customer name.";
        assert_eq!(extract_sql(raw).unwrap(), "SELECT name FROM customers");
    }

    #[test]
    fn semicolons_in_literals_are_kept() {
        let raw = "SELECT name FROM customers WHERE name = 'a;b'";
        assert_eq!(extract_sql(raw).unwrap(), raw);
    }

    #[test]
    fn too_short_statement_is_rejected() {
        assert_eq!(extract_sql("SELECT 1").unwrap_err().kind(), "SQLExtractionError");
    }

    #[test]
    fn extracted_sql_always_starts_with_a_read_keyword() {
        for raw in [
            "SELECT a FROM t",
            "-- comment\nSELECT a FROM t",
            "Query:\n\nWITH x AS (SELECT 1) SELECT * FROM x",
            "{\"SQL\": \"select a from t\"}",
        ] {
            let sql = extract_sql(raw).unwrap();
            assert!(opens_read_statement(&sql), "{:?}", sql);
            assert_eq!(split_statements(&sql).len(), 1);
        }
    }

    #[tokio::test]
    async fn prompt_carries_question_schema_and_dialect() {
        let (_dir, path) = sales_db();
        let db = Database::open_read_only(&path, Duration::from_millis(100)).unwrap();
        let schema = SchemaDescription::introspect(&db, 0).unwrap();
        let model = ScriptedModel::new(vec![Ok(r#"{"SQL": "SELECT name FROM customers"}"#.into())]);
        let renderer = PromptRenderer::new(None);

        let sql = generate_sql(&model, &renderer, "List all customers", &schema, 7)
            .await
            .unwrap();
        assert_eq!(sql, "SELECT name FROM customers");

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("List all customers"));
        assert!(prompts[0].contains("### Table: customers"));
        assert!(prompts[0].contains("SQLite"));
        assert!(prompts[0].contains("at most 7 rows"));
    }

    #[tokio::test]
    async fn model_failures_surface_as_model_errors() {
        let (_dir, path) = sales_db();
        let db = Database::open_read_only(&path, Duration::from_millis(100)).unwrap();
        let schema = SchemaDescription::introspect(&db, 0).unwrap();
        let model = ScriptedModel::new(vec![Err(crate::llm::LlmError::RateLimited("429".into()))]);

        let err = generate_sql(&model, &PromptRenderer::new(None), "List all customers", &schema, 10)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ModelError");
        assert_eq!(model.prompts().len(), 1);
    }
}
