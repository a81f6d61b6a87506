//! Strict template rendering
//!
//! Templates use Jinja syntax through minijinja. Values are substituted
//! verbatim (no auto-escaping, trailing newline kept). A variable absent
//! from the mapping is an error, never an empty substitution. Literal
//! braces go through `{% raw %}...{% endraw %}` or `{{ "{{" }}`.

use std::collections::BTreeMap;

use minijinja::{Environment, ErrorKind, UndefinedBehavior};

use crate::error::TemplateError;

fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    env
}

/// Render `template` against `vars`
pub fn render(template: &str, vars: &BTreeMap<String, String>) -> Result<String, TemplateError> {
    let env = environment();
    let tmpl = env
        .template_from_str(template)
        .map_err(|e| TemplateError::Syntax {
            message: e.to_string(),
        })?;

    tmpl.render(vars).map_err(|e| {
        if e.kind() != ErrorKind::UndefinedError {
            return TemplateError::Render {
                message: e.to_string(),
            };
        }
        // Name the first top-level variable the mapping lacks
        let mut missing: Vec<String> = tmpl
            .undeclared_variables(false)
            .into_iter()
            .filter(|name| !vars.contains_key(name))
            .collect();
        missing.sort();
        match missing.into_iter().next() {
            Some(missing_key) => TemplateError::MissingKey { missing_key },
            None => TemplateError::Render {
                message: e.to_string(),
            },
        }
    })
}
