/// Command templates with `{placeholder}` expansion
use crate::config::types::{HubError, Result};
use std::collections::BTreeMap;

/// Values for a template expansion. A placeholder may expand to zero, one
/// or several arguments.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TemplateVars {
    values: BTreeMap<String, Vec<String>>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<S: Into<String>>(&mut self, name: &str, values: impl IntoIterator<Item = S>) {
        self.values
            .insert(name.to_string(), values.into_iter().map(Into::into).collect());
    }

    pub fn with<S: Into<String>>(mut self, name: &str, values: impl IntoIterator<Item = S>) -> Self {
        self.set(name, values);
        self
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.values.get(name).map(Vec::as_slice)
    }
}

/// Argument vector with placeholders.
///
/// `{tool:NAME}` names an executable (resolved later by the sandbox). Any
/// other `{name}` is looked up in [`TemplateVars`]. An argument that is
/// exactly one placeholder is replaced by all of its values, so an empty
/// list drops the argument. A placeholder inside a longer argument is
/// replaced by its values joined with spaces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandTemplate {
    parts: Vec<String>,
}

impl CommandTemplate {
    pub fn new<S: Into<String>>(parts: impl IntoIterator<Item = S>) -> Self {
        Self {
            parts: parts.into_iter().map(Into::into).collect(),
        }
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// Executables named with `{tool:NAME}`
    pub fn tools(&self) -> Vec<&str> {
        self.parts
            .iter()
            .filter_map(|p| p.strip_prefix("{tool:").and_then(|rest| rest.strip_suffix('}')))
            .collect()
    }

    pub fn expand(&self, vars: &TemplateVars) -> Result<Vec<String>> {
        let mut argv = Vec::with_capacity(self.parts.len());
        for part in &self.parts {
            if let Some(tool) = part.strip_prefix("{tool:").and_then(|r| r.strip_suffix('}')) {
                argv.push(tool.to_string());
                continue;
            }
            if let Some(name) = whole_placeholder(part) {
                argv.extend(lookup(vars, name)?.iter().cloned());
                continue;
            }
            argv.push(substitute(part, vars)?);
        }
        Ok(argv)
    }
}

fn whole_placeholder(part: &str) -> Option<&str> {
    let inner = part.strip_prefix('{')?.strip_suffix('}')?;
    if inner.is_empty() || inner.contains(['{', '}']) {
        return None;
    }
    Some(inner)
}

fn lookup<'a>(vars: &'a TemplateVars, name: &str) -> Result<&'a [String]> {
    vars.get(name)
        .ok_or_else(|| HubError::Internal(format!("unknown template placeholder {{{}}}", name)))
}

fn substitute(part: &str, vars: &TemplateVars) -> Result<String> {
    let mut out = String::with_capacity(part.len());
    let mut rest = part;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let name = &rest[start + 1..start + len];
        out.push_str(&lookup(vars, name)?.join(" "));
        rest = &rest[start + len + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> TemplateVars {
        TemplateVars::new()
            .with("source", ["main.c"])
            .with("opt", ["-O2"])
            .with("debug", Vec::<String>::new())
            .with("classes", ["classes/A.class", "classes/B.class"])
    }

    #[test]
    fn test_expansion_splices_and_drops() {
        let template = CommandTemplate::new(["{tool:clang}", "{opt}", "{debug}", "-c", "{source}"]);
        assert_eq!(
            template.expand(&vars()).unwrap(),
            vec!["clang", "-O2", "-c", "main.c"]
        );

        let javap = CommandTemplate::new(["{tool:javap}", "-c", "{classes}"]);
        assert_eq!(javap.expand(&vars()).unwrap().len(), 4);
    }

    #[test]
    fn test_inline_placeholders() {
        let template = CommandTemplate::new(["-gcflags=-S {opt}", "--out={source}.ll"]);
        assert_eq!(
            template.expand(&vars()).unwrap(),
            vec!["-gcflags=-S -O2", "--out=main.c.ll"]
        );
    }

    #[test]
    fn test_unknown_placeholder_is_internal() {
        let template = CommandTemplate::new(["{missing}"]);
        assert!(matches!(template.expand(&vars()), Err(HubError::Internal(_))));
    }

    #[test]
    fn test_tools() {
        let template = CommandTemplate::new(["{tool:go}", "build", "{source}"]);
        assert_eq!(template.tools(), vec!["go"]);
    }
}
