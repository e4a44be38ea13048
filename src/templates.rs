//! Direct-message templates.
//!
//! Template texts may be overridden from files in the `templates/` directory
//! or inline in `config.yml`. `{first_name}` is replaced with the recipient's
//! first name when a template is rendered.

use std::path::PathBuf;

use crate::{Error, Result};

pub const NAME_PLACEHOLDER: &str = "{first_name}";
pub const DEFAULT_FALLBACK_NAME: &str = "there";

const WELCOME_TEXT: &str = "👋 Hi {first_name}!

Your request to join the channel has been approved. Welcome aboard!

Tap the button below if you have any questions.";

const REENGAGEMENT_TEXT: &str = "📈 Hey {first_name}! You just left the channel.

Maybe it's not the right time now, no worries 🤝

Whenever you're ready to come back, tap ✅ Join Channel Now below.";

const FAREWELL_TEXT: &str = "👋 Goodbye {first_name}, sorry to see you go.

The door is always open if you change your mind.";

/// Available templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    /// Sent after a join request is approved.
    Welcome,
    /// Sent by the reconciler on the departed-member cadence.
    Reengagement,
    /// Sent immediately on a real-time leave event.
    Farewell,
}

impl TemplateKind {
    /// Label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            TemplateKind::Welcome => "welcome",
            TemplateKind::Reengagement => "reengagement",
            TemplateKind::Farewell => "farewell",
        }
    }

    fn builtin_text(&self) -> &'static str {
        match self {
            TemplateKind::Welcome => WELCOME_TEXT,
            TemplateKind::Reengagement => REENGAGEMENT_TEXT,
            TemplateKind::Farewell => FAREWELL_TEXT,
        }
    }
}

/// Telegram parse mode of a message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextFormat {
    #[default]
    Plain,
    Html,
    /// Legacy Telegram Markdown.
    Markdown,
    MarkdownV2,
}

impl TextFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "" | "plain" | "none" => Some(TextFormat::Plain),
            "html" => Some(TextFormat::Html),
            "markdown" => Some(TextFormat::Markdown),
            "markdownv2" | "markdown_v2" => Some(TextFormat::MarkdownV2),
            _ => None,
        }
    }

    /// Escape user-provided text so it renders literally in this format.
    pub fn escape(&self, text: &str) -> String {
        match self {
            TextFormat::Plain => text.to_string(),
            TextFormat::Html => text
                .replace('&', "&amp;")
                .replace('<', "&lt;")
                .replace('>', "&gt;"),
            TextFormat::Markdown => escape_with(text, "_*`["),
            TextFormat::MarkdownV2 => escape_with(text, "_*[]()~`>#+-=|{}.!\\"),
        }
    }
}

fn escape_with(text: &str, special: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if special.contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Inline keyboard button opening a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkButton {
    pub text: String,
    pub url: String,
}

impl LinkButton {
    pub fn new(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            url: url.into(),
        }
    }
}

/// A rendered direct message ready for the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub text: String,
    /// Photo URL or local file path; when set the text becomes the caption.
    pub photo: Option<String>,
    pub button: Option<LinkButton>,
    pub format: TextFormat,
}


#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    pub text: String,
    pub photo: Option<String>,
    pub button: Option<LinkButton>,
    pub format: TextFormat,
}

impl MessageTemplate {
    /// Built-in template without photo or button.
    pub fn builtin(kind: TemplateKind) -> Self {
        Self {
            text: kind.builtin_text().to_string(),
            photo: None,
            button: None,
            format: TextFormat::Plain,
        }
    }

    /// Substitute the recipient's name and produce a message.
    pub fn render(&self, first_name: &str) -> OutboundMessage {
        let name = self.format.escape(first_name);
        OutboundMessage {
            text: self.text.replace(NAME_PLACEHOLDER, &name),
            photo: self.photo.clone(),
            button: self.button.clone(),
            format: self.format,
        }
    }
}

/// The three templates the bot sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSet {
    pub welcome: MessageTemplate,
    pub reengagement: MessageTemplate,
    pub farewell: MessageTemplate,
}

impl Default for TemplateSet {
    fn default() -> Self {
        Self {
            welcome: MessageTemplate::builtin(TemplateKind::Welcome),
            reengagement: MessageTemplate::builtin(TemplateKind::Reengagement),
            farewell: MessageTemplate::builtin(TemplateKind::Farewell),
        }
    }
}

impl TemplateSet {
    pub fn get(&self, kind: TemplateKind) -> &MessageTemplate {
        match kind {
            TemplateKind::Welcome => &self.welcome,
            TemplateKind::Reengagement => &self.reengagement,
            TemplateKind::Farewell => &self.farewell,
        }
    }

    pub fn get_mut(&mut self, kind: TemplateKind) -> &mut MessageTemplate {
        match kind {
            TemplateKind::Welcome => &mut self.welcome,
            TemplateKind::Reengagement => &mut self.reengagement,
            TemplateKind::Farewell => &mut self.farewell,
        }
    }
}

/// Load a template text by file name from the templates directory.
pub fn load_template_text(filename: &str) -> Result<String> {
    let path = templates_dir().join(filename);
    std::fs::read_to_string(&path).map_err(|e| {
        Error::TemplateError(format!("Failed to load template {}: {}", filename, e))
    })
}

/// Path to the templates directory.
pub fn templates_dir() -> PathBuf {
    let candidates = [PathBuf::from("templates"), PathBuf::from("../templates")];

    for path in candidates {
        if path.exists() {
            return path;
        }
    }

    PathBuf::from("templates")
}

pub fn all_kinds() -> [TemplateKind; 3] {
    [
        TemplateKind::Welcome,
        TemplateKind::Reengagement,
        TemplateKind::Farewell,
    ]
}
