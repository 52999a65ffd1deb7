use anyhow::Result;
use serde_json::{Map, Value};

/// Fill `{Field}` placeholders from `fields`.
///
/// Strings are inserted as-is, lists are joined with `", "`, numbers and
/// booleans use their JSON form and `null` renders empty. `{{` and `}}`
/// produce literal braces. A placeholder naming an unknown field is an error.
pub fn render(template: &str, fields: &Map<String, Value>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => name.push(ch),
                        None => anyhow::bail!("unterminated placeholder {{{}", name),
                    }
                }
                let value = fields
                    .get(name.trim())
                    .ok_or_else(|| anyhow::anyhow!("unknown template field {{{}}}", name))?;
                out.push_str(&display_value(value));
            }
            '}' => anyhow::bail!("unmatched '}}' in template"),
            other => out.push(other),
        }
    }

    Ok(out)
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(display_value)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}
