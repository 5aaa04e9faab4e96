pub mod templates;

use crate::error::PipelineError;
use minijinja::{Environment, UndefinedBehavior, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, warn};

pub use templates::{PromptTemplate, GENERATE_SQL, SUMMARIZE_ANSWER};

/// Variables substituted into a template, keyed by placeholder name.
pub type PromptVars = BTreeMap<&'static str, Value>;

/// Fills prompt templates. Files in `template_dir` override the built-in
/// templates of the same name and are re-read on every render.
pub struct PromptRenderer {
    template_dir: Option<PathBuf>,
}

impl PromptRenderer {
    pub fn new(template_dir: Option<PathBuf>) -> Self {
        Self { template_dir }
    }

    fn load_source(&self, template: &PromptTemplate) -> Result<String, PipelineError> {
        match &self.template_dir {
            Some(dir) => {
                let path = dir.join(template.name);
                debug!("Loading prompt template from {}", path.display());
                std::fs::read_to_string(&path).map_err(|e| {
                    PipelineError::Template(format!("cannot load {}: {}", path.display(), e))
                })
            }
            None => Ok(template.builtin.to_string()),
        }
    }

    /// Renders `template`, failing if it references anything `vars` does not supply.
    pub fn render(&self, template: &PromptTemplate, vars: &PromptVars) -> Result<String, PipelineError> {
        let source = self.load_source(template)?;

        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        env.add_template_owned(template.name, source)?;
        let tmpl = env.get_template(template.name)?;

        let referenced = tmpl.undeclared_variables(false);
        let mut missing: Vec<&str> = referenced
            .iter()
            .map(String::as_str)
            .filter(|name| !vars.contains_key(*name))
            .collect();
        if !missing.is_empty() {
            missing.sort_unstable();
            return Err(PipelineError::Template(format!(
                "unresolved placeholder(s) in {}: {}",
                template.name,
                missing.join(", ")
            )));
        }

        for declared in template.placeholders {
            if !referenced.contains(*declared) {
                warn!("Template {} never uses placeholder '{}'", template.name, declared);
            }
        }

        let prompt = tmpl.render(vars)?;
        debug!("Rendered {} ({} chars)", template.name, prompt.len());
        Ok(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars_for(template: &PromptTemplate) -> PromptVars {
        template
            .placeholders
            .iter()
            .map(|name| (*name, Value::from(format!("<{}>", name))))
            .collect()
    }

    #[test]
    fn builtin_templates_render_with_their_declared_placeholders() {
        let renderer = PromptRenderer::new(None);
        for template in [GENERATE_SQL, SUMMARIZE_ANSWER] {
            let prompt = renderer.render(&template, &vars_for(&template)).unwrap();
            assert!(!prompt.contains("{{"), "{}", template.name);
            assert!(!prompt.contains("}}"), "{}", template.name);
            for name in template.placeholders {
                assert!(prompt.contains(&format!("<{}>", name)), "{} missing {}", template.name, name);
            }
        }
    }

    #[test]
    fn missing_variable_is_a_template_error() {
        let renderer = PromptRenderer::new(None);
        let mut vars = vars_for(&GENERATE_SQL);
        vars.remove("table_info");

        let err = renderer.render(&GENERATE_SQL, &vars).unwrap_err();
        assert_eq!(err.kind(), "TemplateError");
        assert!(err.to_string().contains("table_info"));
    }

    #[test]
    fn override_directory_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(GENERATE_SQL.name),
            "Q={{ input }} D={{ dialect }} K={{ top_k }} S={{ table_info }}",
        )
        .unwrap();

        let renderer = PromptRenderer::new(Some(dir.path().to_path_buf()));
        let prompt = renderer.render(&GENERATE_SQL, &vars_for(&GENERATE_SQL)).unwrap();
        assert_eq!(prompt, "Q=<input> D=<dialect> K=<top_k> S=<table_info>");
    }

    #[test]
    fn override_with_unknown_placeholder_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SUMMARIZE_ANSWER.name), "{{ question }} {{ mood }}").unwrap();

        let renderer = PromptRenderer::new(Some(dir.path().to_path_buf()));
        let err = renderer
            .render(&SUMMARIZE_ANSWER, &vars_for(&SUMMARIZE_ANSWER))
            .unwrap_err();
        assert_eq!(err.kind(), "TemplateError");
        assert!(err.to_string().contains("mood"));
    }

    #[test]
    fn missing_override_file_is_a_template_error() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = PromptRenderer::new(Some(dir.path().to_path_buf()));
        let err = renderer
            .render(&GENERATE_SQL, &vars_for(&GENERATE_SQL))
            .unwrap_err();
        assert_eq!(err.kind(), "TemplateError");
    }

    #[test]
    fn malformed_template_is_a_template_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(GENERATE_SQL.name), "{{ input ").unwrap();

        let renderer = PromptRenderer::new(Some(dir.path().to_path_buf()));
        let err = renderer
            .render(&GENERATE_SQL, &vars_for(&GENERATE_SQL))
            .unwrap_err();
        assert_eq!(err.kind(), "TemplateError");
    }
}
