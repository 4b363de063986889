//! Notification template engine.
//!
//! A [`Template`] owns two handlebars registries, one that leaves output
//! untouched (for chat markdown and plain text) and one that HTML-escapes.
//! Both are loaded with the builtin bundle and then with every file matched
//! by the configured globs. Per-call snippets are compiled without being
//! registered, so rendering never mutates the shared set.

pub mod error;
mod helpers;


use alertpush_common::types::Data;
use handlebars::Handlebars;
use serde_json::Value;
use std::path::Path;

pub use error::{Result, TemplateError};
pub use helpers::humanize_duration;

/// Builtin templates, shipped with the binary.
const BUILTIN: [(&str, &str); 8] = [
    ("default_alert_list", include_str!("templates/default_alert_list.hbs")),
    ("dingtalk_default_title", include_str!("templates/dingtalk_default_title.hbs")),
    ("dingtalk_default_content", include_str!("templates/dingtalk_default_content.hbs")),
    ("wechat_default_message", include_str!("templates/wechat_default_message.hbs")),
    ("wechat_default_to_user", include_str!("templates/wechat_default_to_user.hbs")),
    ("wechat_default_to_party", include_str!("templates/wechat_default_to_party.hbs")),
    ("wechat_default_to_tag", include_str!("templates/wechat_default_to_tag.hbs")),
    ("wechat_default_agent_id", include_str!("templates/wechat_default_agent_id.hbs")),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Text,
    Html,
}

pub struct Template {
    text: Handlebars<'static>,
    html: Handlebars<'static>,
    external_url: String,
}

fn new_registry(mode: Mode) -> Handlebars<'static> {
    let mut reg = Handlebars::new();
    if mode == Mode::Text {
        reg.register_escape_fn(handlebars::no_escape);
    }
    // Missing keys render empty.
    reg.set_strict_mode(false);
    helpers::register(&mut reg);
    reg
}

impl Template {
    /// Builds the template set from the builtin bundle plus every file
    /// matched by `patterns`, in declaration order.
    ///
    /// A file is registered under its file stem, so `ops/title.hbs` is
    /// included as `{{> title}}` and overrides any earlier `title`.
    pub fn from_globs<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut template = Self {
            text: new_registry(Mode::Text),
            html: new_registry(Mode::Html),
            external_url: String::new(),
        };

        for (name, source) in BUILTIN {
            template.register(name, source)?;
        }

        for pattern in patterns {
            let pattern = pattern.as_ref();
            let paths = glob::glob(pattern).map_err(|e| TemplateError::Pattern {
                pattern: pattern.to_string(),
                source: e,
            })?;
            for entry in paths {
                let path = entry?;
                if path.is_file() {
                    template.register_file(&path)?;
                }
            }
        }

        Ok(template)
    }

    /// Sets the URL used when a payload does not carry its own `externalURL`.
    pub fn with_external_url(mut self, url: impl Into<String>) -> Self {
        self.external_url = url.into();
        self
    }

    pub fn external_url(&self) -> &str {
        &self.external_url
    }

    fn register_file(&mut self, path: &Path) -> Result<()> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| TemplateError::Io {
                path: path.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid file name"),
            })?
            .to_string();
        let source = std::fs::read_to_string(path).map_err(|e| TemplateError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        tracing::debug!(name = %name, path = %path.display(), "Registering template file");
        self.register(&name, &source)
    }

    fn register(&mut self, name: &str, source: &str) -> Result<()> {
        let parse_err = |e| TemplateError::Parse {
            name: name.to_string(),
            source: Box::new(e),
        };
        self.text.register_template_string(name, source).map_err(parse_err)?;
        self.html.register_template_string(name, source).map_err(parse_err)?;
        Ok(())
    }

    /// Names of all registered templates, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.text.get_templates().keys().cloned().collect();
        names.sort();
        names
    }

    /// Renders `body` against `data`. An empty body yields an empty string.
    pub fn render(&self, mode: Mode, body: &str, data: &Data) -> Result<String> {
        if body.is_empty() {
            return Ok(String::new());
        }
        let context = self.context(data)?;
        self.render_value(mode, body, &context)
    }

    pub fn execute_text(&self, body: &str, data: &Data) -> Result<String> {
        self.render(Mode::Text, body, data)
    }

    pub fn execute_html(&self, body: &str, data: &Data) -> Result<String> {
        self.render(Mode::Html, body, data)
    }

    /// Binds `data` once for a series of renders.
    pub fn renderer(&self, mode: Mode, data: &Data) -> Result<Renderer<'_>> {
        Ok(Renderer {
            template: self,
            mode,
            context: self.context(data)?,
        })
    }

    fn registry(&self, mode: Mode) -> &Handlebars<'static> {
        match mode {
            Mode::Text => &self.text,
            Mode::Html => &self.html,
        }
    }

    fn render_value(&self, mode: Mode, body: &str, context: &Value) -> Result<String> {
        if body.is_empty() {
            return Ok(String::new());
        }
        Ok(self.registry(mode).render_template(body, context)?)
    }

    /// The render context: the payload under its webhook field names plus
    /// the derived `firing` and `resolved` lists.
    fn context(&self, data: &Data) -> Result<Value> {
        let mut context = serde_json::to_value(data)?;
        let firing = serde_json::to_value(data.alerts.firing())?;
        let resolved = serde_json::to_value(data.alerts.resolved())?;
        if let Value::Object(map) = &mut context {
            map.insert("firing".to_string(), firing);
            map.insert("resolved".to_string(), resolved);
            if data.external_url.is_empty() {
                map.insert(
                    "externalURL".to_string(),
                    Value::String(self.external_url.clone()),
                );
            }
        }
        Ok(context)
    }
}

/// Renders several snippets against the same payload, stopping at the first
/// failure through `?`.
pub struct Renderer<'a> {
    template: &'a Template,
    mode: Mode,
    context: Value,
}

impl Renderer<'_> {
    pub fn render(&self, body: &str) -> Result<String> {
        self.template.render_value(self.mode, body, &self.context)
    }
}
