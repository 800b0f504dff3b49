//! Mount-script template rendering
//!
//! Templates are UTF-8 shell scripts with `{storageacct}`, `{sharename}`,
//! `{username}` and `{password}` placeholders. `{{` and `}}` stand for literal
//! braces, so shell expansions are written `${{VAR}}`.

use std::collections::HashMap;
use std::path::Path;

use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::errors::TemplateError;

/// Placeholders every template may use; all of them must have a value
pub const REQUIRED_KEYS: [&str; 4] = ["storageacct", "sharename", "username", "password"];

/// A rendered script, always with `\n` line endings
#[derive(Clone, PartialEq, Eq)]
pub struct RenderedScript(String);

impl RenderedScript {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

// Rendered scripts carry the storage key
impl std::fmt::Debug for RenderedScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderedScript")
            .field("len", &self.0.len())
            .finish()
    }
}

/// Typed substitution set for the mount template
pub struct MountValues {
    pub storage_account: String,
    pub share_name: String,
    pub username: String,
    pub password: SecretString,
}

impl MountValues {
    /// Convert to the placeholder map consumed by [`render`]
    pub fn to_map(&self) -> HashMap<String, String> {
        HashMap::from([
            ("storageacct".to_string(), self.storage_account.clone()),
            ("sharename".to_string(), self.share_name.clone()),
            ("username".to_string(), self.username.clone()),
            (
                "password".to_string(),
                self.password.expose_secret().to_string(),
            ),
        ])
    }
}

/// Read a template file and render it
pub async fn render(
    template_path: &Path,
    values: &HashMap<String, String>,
) -> Result<RenderedScript, TemplateError> {
    debug!("Rendering template {:?}", template_path);

    let template = tokio::fs::read_to_string(template_path)
        .await
        .map_err(|source| TemplateError::Read {
            path: template_path.to_path_buf(),
            source,
        })?;

    render_str(&template, values)
}

/// Render template text. Deterministic: same input, same bytes.
pub fn render_str(
    template: &str,
    values: &HashMap<String, String>,
) -> Result<RenderedScript, TemplateError> {
    for key in REQUIRED_KEYS {
        if !values.contains_key(key) {
            return Err(TemplateError::MissingKey(key));
        }
    }

    let mut output = String::with_capacity(template.len());

    for (index, raw_line) in template.split('\n').enumerate() {
        let line_no = index + 1;
        if index > 0 {
            output.push('\n');
        }
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
        render_line(line, line_no, values, &mut output)?;
    }

    Ok(RenderedScript(output))
}

fn render_line(
    line: &str,
    line_no: usize,
    values: &HashMap<String, String>,
    output: &mut String,
) -> Result<(), TemplateError> {
    let mut chars = line.char_indices().peekable();

    while let Some((pos, ch)) = chars.next() {
        match ch {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                output.push('{');
            }
            '{' => {
                let start = pos + 1;
                let end = loop {
                    match chars.next() {
                        Some((end, '}')) => break end,
                        Some((_, '{')) | None => {
                            return Err(TemplateError::UnbalancedBrace {
                                brace: '{',
                                line: line_no,
                                column: column_of(line, pos),
                            })
                        }
                        Some(_) => {}
                    }
                };

                let name = &line[start..end];
                match REQUIRED_KEYS.iter().find(|key| **key == name) {
                    Some(key) => output.push_str(&values[*key]),
                    None => {
                        return Err(TemplateError::UnknownPlaceholder {
                            name: name.to_string(),
                            line: line_no,
                        })
                    }
                }
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                output.push('}');
            }
            '}' => {
                return Err(TemplateError::UnbalancedBrace {
                    brace: '}',
                    line: line_no,
                    column: column_of(line, pos),
                })
            }
            other => output.push(other),
        }
    }

    Ok(())
}

fn column_of(line: &str, byte_pos: usize) -> usize {
    line[..byte_pos].chars().count() + 1
}
