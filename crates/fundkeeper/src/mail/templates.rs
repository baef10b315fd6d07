//! Email template catalogue.
//!
//! Templates use `{{ key }}` placeholders. Values are HTML-escaped unless the key
//! ends in `Html`, which marks a pre-rendered fragment (image galleries). Missing
//! keys render as nothing.

use std::{collections::BTreeMap, fmt, path::Path, sync::OnceLock};

use regex::{Captures, Regex};
use serde::Deserialize;
use tracing::info;

use super::MailError;
use crate::util::escape_html;

const DEFAULT_TEMPLATES: &str = include_str!("../../templates/email_templates.json");
const DEFAULT_LAYOUT: &str = include_str!("../../templates/layout.html");

pub type TemplateData = BTreeMap<String, String>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TemplateKey {
    AuthVerify,
    AuthReset,
    ContributionCreated,
    ContributionUpdated,
    ContributionDeleted,
    CauseCreated,
    CauseUpdated,
    CauseDeleted,
}

impl TemplateKey {
    pub const ALL: [TemplateKey; 8] = [
        TemplateKey::AuthVerify,
        TemplateKey::AuthReset,
        TemplateKey::ContributionCreated,
        TemplateKey::ContributionUpdated,
        TemplateKey::ContributionDeleted,
        TemplateKey::CauseCreated,
        TemplateKey::CauseUpdated,
        TemplateKey::CauseDeleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKey::AuthVerify => "auth.verify",
            TemplateKey::AuthReset => "auth.reset",
            TemplateKey::ContributionCreated => "contribution.created",
            TemplateKey::ContributionUpdated => "contribution.updated",
            TemplateKey::ContributionDeleted => "contribution.deleted",
            TemplateKey::CauseCreated => "cause.created",
            TemplateKey::CauseUpdated => "cause.updated",
            TemplateKey::CauseDeleted => "cause.deleted",
        }
    }
}

impl fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct EmailTemplate {
    pub subject: String,
    pub content: String,
}

#[derive(Clone, Debug, Deserialize)]
struct AuthTemplates {
    verify: EmailTemplate,
    reset: EmailTemplate,
}

#[derive(Clone, Debug, Deserialize)]
struct LifecycleTemplates {
    created: EmailTemplate,
    updated: EmailTemplate,
    deleted: EmailTemplate,
}

#[derive(Clone, Debug, Deserialize)]
struct Catalogue {
    auth: AuthTemplates,
    contribution: LifecycleTemplates,
    cause: LifecycleTemplates,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedMail {
    pub subject: String,
    pub html: String,
}

#[derive(Clone, Debug)]
pub struct TemplateCatalogue {
    templates: Catalogue,
    layout: String,
}

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").expect("valid regex"))
}

/// Substitute `{{ key }}` placeholders from `data`.
pub fn render_template(template: &str, data: &TemplateData) -> String {
    placeholder()
        .replace_all(template, |caps: &Captures<'_>| {
            let key = &caps[1];
            let value = data.get(key).map(String::as_str).unwrap_or_default();
            if key.ends_with("Html") {
                value.to_string()
            } else {
                escape_html(value)
            }
        })
        .into_owned()
}

fn apply_layout(layout: &str, content: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\{\{\s*content\s*\}\}").expect("valid regex"));
    re.replace_all(layout, regex::NoExpand(content)).into_owned()
}

impl TemplateCatalogue {
    pub fn from_sources(templates_json: &str, layout: &str) -> Result<Self, MailError> {
        let templates: Catalogue = serde_json::from_str(templates_json)
            .map_err(|e| MailError::Template(format!("invalid template catalogue: {e}")))?;
        Ok(Self {
            templates,
            layout: layout.to_string(),
        })
    }

    pub fn embedded() -> Result<Self, MailError> {
        Self::from_sources(DEFAULT_TEMPLATES, DEFAULT_LAYOUT)
    }

    /// Load the catalogue, reading overrides from disk where paths are given.
    pub fn load(templates_path: Option<&Path>, layout_path: Option<&Path>) -> Result<Self, MailError> {
        let read = |path: &Path| {
            info!(path = %path.display(), "Loading email template override");
            std::fs::read_to_string(path)
                .map_err(|e| MailError::Template(format!("cannot read {}: {e}", path.display())))
        };
        let templates = match templates_path {
            Some(p) => read(p)?,
            None => DEFAULT_TEMPLATES.to_string(),
        };
        let layout = match layout_path {
            Some(p) => read(p)?,
            None => DEFAULT_LAYOUT.to_string(),
        };
        Self::from_sources(&templates, &layout)
    }

    pub fn template(&self, key: TemplateKey) -> &EmailTemplate {
        let t = &self.templates;
        match key {
            TemplateKey::AuthVerify => &t.auth.verify,
            TemplateKey::AuthReset => &t.auth.reset,
            TemplateKey::ContributionCreated => &t.contribution.created,
            TemplateKey::ContributionUpdated => &t.contribution.updated,
            TemplateKey::ContributionDeleted => &t.contribution.deleted,
            TemplateKey::CauseCreated => &t.cause.created,
            TemplateKey::CauseUpdated => &t.cause.updated,
            TemplateKey::CauseDeleted => &t.cause.deleted,
        }
    }

    pub fn render(&self, key: TemplateKey, data: &TemplateData) -> RenderedMail {
        let template = self.template(key);
        let subject = render_template(&template.subject, data);
        let content = render_template(&template.content, data);
        RenderedMail {
            subject,
            html: apply_layout(&self.layout, &content),
        }
    }
}

/// Build template data from `(key, value)` pairs.
pub fn data<I, K, V>(pairs: I) -> TemplateData
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

/// Render image URLs as a small HTML gallery for `imagesHtml` slots.
pub fn image_gallery_html(urls: &[String]) -> String {
    if urls.is_empty() {
        return String::new();
    }
    let items: String = urls
        .iter()
        .map(|u| {
            let u = escape_html(u);
            format!(r#"<a href="{u}"><img src="{u}" alt="attachment" style="max-width:180px;margin:4px;border-radius:4px"/></a>"#)
        })
        .collect();
    format!(r#"<div class="gallery">{items}</div>"#)
}
