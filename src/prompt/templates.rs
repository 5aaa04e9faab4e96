/// A named prompt resource and the placeholders callers must supply.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub name: &'static str,
    pub placeholders: &'static [&'static str],
    pub(crate) builtin: &'static str,
}

pub const GENERATE_SQL: PromptTemplate = PromptTemplate {
    name: "generate_sql.txt",
    placeholders: &["dialect", "top_k", "table_info", "input"],
    builtin: include_str!("../../templates/generate_sql.txt"),
};

pub const SUMMARIZE_ANSWER: PromptTemplate = PromptTemplate {
    name: "summarize_answer.txt",
    placeholders: &["question", "sql", "results", "row_count"],
    builtin: include_str!("../../templates/summarize_answer.txt"),
};
