use serde::{Deserialize, Serialize};

// Structured reply the generation prompt asks the model for
#[derive(Debug, Serialize, Deserialize)]
pub struct SqlGenerationOutput {
    #[serde(rename = "SQL", alias = "sql")]
    pub sql: String,
    #[serde(default)]
    pub explanation: Option<String>,
}
