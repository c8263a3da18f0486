//! Command-template interpolation.
//!
//! The `loop` driver accepts a shell template with `{{ dotted.path }}`
//! placeholders resolved against a task's args. Scalar leaves substitute
//! directly; container leaves substitute as JSON. The set of queried paths
//! is returned alongside the rendered command so the driver can derive the
//! minimal `required_fields` template automatically.

use std::collections::BTreeSet;

use anyhow::Result;
use serde_json::Value;

use labtasker_core::flatten::get_path;

/// Rendered command plus every path the template queried.
#[derive(Debug, Clone, PartialEq)]
pub struct Interpolated {
    pub rendered: String,
    pub paths: BTreeSet<String>,
}

/// Extract the queried paths without needing a variable table. Used to
/// build `required_fields` before any task has been fetched.
pub fn template_paths(template: &str) -> Result<BTreeSet<String>> {
    let mut paths = BTreeSet::new();
    walk(template, |path| {
        paths.insert(path.to_string());
        Ok(String::new())
    })?;
    Ok(paths)
}

/// Render a template against a variable table.
pub fn interpolate(template: &str, variables: &Value) -> Result<Interpolated> {
    let mut paths = BTreeSet::new();
    let rendered = walk(template, |path| {
        paths.insert(path.to_string());
        let value = get_path(variables, path)
            .ok_or_else(|| anyhow::anyhow!("'{}' is not a valid key in the task args", path))?;
        Ok(render_value(value))
    })?;
    Ok(Interpolated { rendered, paths })
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        scalar @ (Value::Bool(_) | Value::Number(_)) => scalar.to_string(),
        container => container.to_string(),
    }
}

/// Scan the template, invoking `resolve` for each `{{ path }}` placeholder
/// and splicing its return value into the output.
fn walk<F>(template: &str, mut resolve: F) -> Result<String>
where
    F: FnMut(&str) -> Result<String>,
{
    let mut out = String::new();
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| anyhow::anyhow!("Unclosed '{{{{' in command template"))?;
        let path = after[..end].trim();
        if path.is_empty() {
            return Err(anyhow::anyhow!("Empty placeholder in command template"));
        }
        if !path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
        {
            return Err(anyhow::anyhow!(
                "Invalid placeholder '{}' in command template",
                path
            ));
        }
        out.push_str(&resolve(path)?);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_substitution() {
        let vars = json!({"a": {"b": "value1"}, "arg3": 7, "flag": true});
        let result =
            interpolate("python train.py --arg1 {{ a.b }} --arg2 {{arg3}} --f {{ flag }}", &vars)
                .unwrap();
        assert_eq!(result.rendered, "python train.py --arg1 value1 --arg2 7 --f true");
        assert_eq!(
            result.paths,
            BTreeSet::from(["a.b".to_string(), "arg3".to_string(), "flag".to_string()])
        );
    }

    #[test]
    fn container_substitution_uses_json() {
        let vars = json!({"e": [1, 2, 3], "m": {"k": 1}});
        let result = interpolate("x {{ e }} y {{ m }}", &vars).unwrap();
        assert_eq!(result.rendered, "x [1,2,3] y {\"k\":1}");
    }

    #[test]
    fn missing_path_is_an_error() {
        let vars = json!({"a": 1});
        assert!(interpolate("{{ b }}", &vars).is_err());
    }

    #[test]
    fn malformed_templates_rejected() {
        let vars = json!({});
        assert!(interpolate("{{ unclosed", &vars).is_err());
        assert!(interpolate("{{ }}", &vars).is_err());
        assert!(interpolate("{{ bad space }}", &vars).is_err());
    }

    #[test]
    fn template_paths_without_values() {
        let paths = template_paths("run {{ a.b }} {{ c }} {{ a.b }}").unwrap();
        assert_eq!(paths, BTreeSet::from(["a.b".to_string(), "c".to_string()]));
    }

    #[test]
    fn text_without_placeholders_passes_through() {
        let result = interpolate("plain command", &json!({})).unwrap();
        assert_eq!(result.rendered, "plain command");
        assert!(result.paths.is_empty());
    }
}
