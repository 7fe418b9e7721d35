//! Prompt templates and the rendering of a conversation into backend input.

use serde::{Deserialize, Serialize};

use crate::api::ChatMessage;
use crate::core::error::TemplateNotFound;
use crate::core::message::{Role, Turn};

pub const SYSTEM_PROMPT_PLACEHOLDER: &str = "{system_prompt}";
pub const INPUT_PLACEHOLDER: &str = "{input}";
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

fn default_header() -> String {
    format!("{SYSTEM_PROMPT_PLACEHOLDER}\n")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default = "default_header")]
    pub header: String,
    pub user: String,
    pub output: String,
    /// Upper bound on the rendered history; oldest exchanges are dropped first.
    #[serde(default)]
    pub max_context_chars: Option<usize>,
}

/// How a backend wants its input: one flat prompt, or role-tagged messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStyle {
    Text,
    Messages,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptRendering {
    Text(String),
    Messages(Vec<ChatMessage>),
}

impl PromptRendering {
    pub fn into_text(self) -> String {
        match self {
            PromptRendering::Text(text) => text,
            PromptRendering::Messages(messages) => messages
                .into_iter()
                .map(|message| message.content)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn into_messages(self) -> Vec<ChatMessage> {
        match self {
            PromptRendering::Text(text) => vec![ChatMessage::new(Role::User.as_str(), text)],
            PromptRendering::Messages(messages) => messages,
        }
    }
}

/// A user turn and the assistant reply that followed it, if any.
struct Exchange<'a> {
    user: Option<&'a Turn>,
    assistant: Option<&'a Turn>,
}

fn group_exchanges(turns: &[Turn]) -> Vec<Exchange<'_>> {
    let last_index = turns.len().saturating_sub(1);
    let mut exchanges: Vec<Exchange<'_>> = Vec::new();

    for (index, turn) in turns.iter().enumerate() {
        match turn.role {
            Role::System => {}
            Role::User => exchanges.push(Exchange {
                user: Some(turn),
                assistant: None,
            }),
            Role::Assistant => {
                // Orphaned placeholders belong to turns that never completed.
                if turn.is_placeholder() && index != last_index {
                    continue;
                }
                match exchanges.last_mut() {
                    Some(exchange) if exchange.assistant.is_none() => {
                        exchange.assistant = Some(turn)
                    }
                    _ => exchanges.push(Exchange {
                        user: None,
                        assistant: Some(turn),
                    }),
                }
            }
        }
    }

    exchanges
}

/// Drop the oldest exchanges until the total fits, always keeping the newest one.
fn fit_to_budget<T>(items: &mut Vec<(usize, T)>, fixed: usize, budget: Option<usize>) {
    let Some(budget) = budget else {
        return;
    };
    let mut total = fixed + items.iter().map(|(len, _)| len).sum::<usize>();
    while total > budget && items.len() > 1 {
        let (len, _) = items.remove(0);
        total -= len;
    }
}

impl Template {
    pub fn render_header(&self, system_prompt: &str) -> String {
        self.header.replace(SYSTEM_PROMPT_PLACEHOLDER, system_prompt)
    }

    pub fn render_user(&self, input: &str) -> String {
        self.user.replace(INPUT_PLACEHOLDER, input)
    }

    pub fn render_output(&self, output: &str) -> String {
        self.output.replace(OUTPUT_PLACEHOLDER, output)
    }

    /// The output format up to its placeholder: the cue that invites the model to answer.
    pub fn output_cue(&self) -> &str {
        match self.output.find(OUTPUT_PLACEHOLDER) {
            Some(position) => &self.output[..position],
            None => &self.output,
        }
    }

    fn system_prompt_of<'a>(&'a self, turns: &'a [Turn]) -> &'a str {
        match turns.first() {
            Some(turn) if turn.role == Role::System => &turn.content,
            _ => &self.system_prompt,
        }
    }

    pub fn render(&self, turns: &[Turn], style: PromptStyle) -> PromptRendering {
        match style {
            PromptStyle::Text => PromptRendering::Text(self.render_text(turns)),
            PromptStyle::Messages => PromptRendering::Messages(self.render_messages(turns)),
        }
    }

    pub fn render_text(&self, turns: &[Turn]) -> String {
        let header = self.render_header(self.system_prompt_of(turns));

        let mut rendered: Vec<(usize, String)> = group_exchanges(turns)
            .into_iter()
            .map(|exchange| {
                let mut text = String::new();
                if let Some(user) = exchange.user {
                    text.push_str(&self.render_user(&user.content));
                }
                if let Some(assistant) = exchange.assistant {
                    if assistant.is_placeholder() {
                        text.push_str(self.output_cue());
                    } else {
                        text.push_str(&self.render_output(&assistant.content));
                    }
                }
                (text.len(), text)
            })
            .collect();
        fit_to_budget(&mut rendered, header.len(), self.max_context_chars);

        let mut prompt = header;
        for (_, text) in rendered {
            prompt.push_str(&text);
        }
        prompt
    }

    pub fn render_messages(&self, turns: &[Turn]) -> Vec<ChatMessage> {
        let system_prompt = self.system_prompt_of(turns);

        let mut grouped: Vec<(usize, Vec<ChatMessage>)> = group_exchanges(turns)
            .into_iter()
            .map(|exchange| {
                let messages: Vec<ChatMessage> = exchange
                    .user
                    .into_iter()
                    .chain(exchange.assistant)
                    .filter(|turn| !turn.is_placeholder())
                    .map(|turn| ChatMessage::new(turn.role.as_str(), turn.content.clone()))
                    .collect();
                let len = messages.iter().map(|m| m.content.len()).sum();
                (len, messages)
            })
            .filter(|(_, messages)| !messages.is_empty())
            .collect();
        fit_to_budget(&mut grouped, system_prompt.len(), self.max_context_chars);

        let mut messages = Vec::new();
        if !system_prompt.is_empty() {
            messages.push(ChatMessage::new(Role::System.as_str(), system_prompt));
        }
        messages.extend(grouped.into_iter().flat_map(|(_, group)| group));
        messages
    }
}

#[derive(Debug, Deserialize)]
struct TemplateFile {
    templates: Vec<Template>,
}

/// Named templates, looked up case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: Vec<Template>,
}

impl TemplateSet {
    pub fn builtin() -> Self {
        const CONFIG_CONTENT: &str = include_str!("../builtins/templates.toml");
        let file: TemplateFile =
            toml::from_str(CONFIG_CONTENT).expect("Failed to parse builtins/templates.toml");
        Self {
            templates: file.templates,
        }
    }

    pub fn from_templates(templates: Vec<Template>) -> Self {
        let mut set = Self::default();
        set.merge(templates);
        set
    }

    /// Add templates, replacing any existing template with the same name.
    pub fn merge(&mut self, templates: impl IntoIterator<Item = Template>) {
        for template in templates {
            self.templates
                .retain(|existing| !existing.name.eq_ignore_ascii_case(&template.name));
            self.templates.push(template);
        }
    }

    pub fn get(&self, name: &str) -> Result<&Template, TemplateNotFound> {
        self.templates
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| TemplateNotFound::new(name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.iter().map(|t| t.name.as_str())
    }
}
