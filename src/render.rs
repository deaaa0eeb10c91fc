use crate::conversation::ConversationState;
use crate::types::{ChatMessage, MessageId, Role};
use comrak::plugins::syntect::SyntectAdapter;
use comrak::{ComrakOptions, ComrakPlugins, markdown_to_html_with_plugins};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use time::{OffsetDateTime, UtcOffset, format_description::FormatItem, macros::format_description};

/// How close to the bottom (in pixels) still counts as "at the bottom".
pub const DEFAULT_FOLLOW_THRESHOLD: f32 = 48.0;

static MARKDOWN_OPTIONS: Lazy<ComrakOptions> = Lazy::new(|| {
    let mut options = ComrakOptions::default();
    options.extension.table = true;
    options.extension.footnotes = true;
    options.extension.strikethrough = true;
    options.extension.tasklist = true;
    options.render.unsafe_ = true;
    options
});

static CODE_HIGHLIGHTER: Lazy<SyntectAdapter> =
    Lazy::new(|| SyntectAdapter::new(Some("base16-ocean.dark")));

const MESSAGE_TIME_FORMAT: &[FormatItem<'static>] =
    format_description!("[hour repr:12 padding:zero]:[minute padding:zero] [period case:upper]");

pub fn markdown_to_html(md: &str) -> String {
    let mut plugins = ComrakPlugins::default();
    plugins.render.codefence_syntax_highlighter = Some(&*CODE_HIGHLIGHTER);
    markdown_to_html_with_plugins(md, &MARKDOWN_OPTIONS, &plugins)
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Local wall-clock label such as `09:41 AM`.
pub fn format_message_timestamp(timestamp: OffsetDateTime) -> Option<String> {
    let mut datetime = timestamp;
    if let Ok(offset) = UtcOffset::current_local_offset() {
        datetime = datetime.to_offset(offset);
    }
    datetime.format(MESSAGE_TIME_FORMAT).ok()
}

/// Auto-scroll policy: follow new output unless the user scrolled away.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AutoFollow {
    following: bool,
    threshold: f32,
}

impl Default for AutoFollow {
    fn default() -> Self {
        Self::new(DEFAULT_FOLLOW_THRESHOLD)
    }
}

impl AutoFollow {
    pub fn new(threshold: f32) -> Self {
        Self {
            following: true,
            threshold,
        }
    }

    /// Records a user scroll, given the remaining distance to the bottom.
    pub fn on_scroll(&mut self, distance_from_bottom: f32) {
        self.following = distance_from_bottom <= self.threshold;
    }

    pub fn on_send_started(&mut self) {
        self.following = true;
    }

    pub fn is_following(&self) -> bool {
        self.following
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RenderedMessage {
    pub id: MessageId,
    pub role: Role,
    pub html: String,
    pub timestamp: Option<String>,
    pub is_streaming: bool,
}

/// One rendered view of the transcript.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub messages: Vec<RenderedMessage>,
    /// Messages whose HTML was produced for this frame rather than reused.
    pub rendered: usize,
    pub show_typing_indicator: bool,
    pub scroll_to_bottom: bool,
    pub show_sample_questions: bool,
}

impl Frame {
    /// Standalone HTML document of the transcript.
    pub fn to_html_document(&self, title: &str) -> String {
        let mut body = String::new();
        for msg in &self.messages {
            let role = match msg.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            body.push_str(&format!("<div class=\"message-row {role}\">\n"));
            body.push_str(&format!("<div class=\"bubble {role}\">{}</div>\n", msg.html));
            if let Some(ts) = &msg.timestamp {
                body.push_str(&format!("<div class=\"message-meta\">{ts}</div>\n"));
            }
            body.push_str("</div>\n");
        }
        format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n</head>\n<body>\n<div class=\"chat-list\">\n{}</div>\n</body>\n</html>\n",
            escape_html(title),
            body
        )
    }
}

/// Renders conversation snapshots, reusing HTML of finished messages.
#[derive(Default)]
pub struct TranscriptView {
    cache: HashMap<MessageId, RenderedMessage>,
    follow: AutoFollow,
    last_in_flight: Option<MessageId>,
}

impl TranscriptView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn follow(&self) -> &AutoFollow {
        &self.follow
    }

    /// Forwards a user scroll to the auto-follow policy.
    pub fn on_scroll(&mut self, distance_from_bottom: f32) {
        self.follow.on_scroll(distance_from_bottom);
    }

    pub fn render(&mut self, state: &ConversationState) -> Frame {
        if state.in_flight.is_some() && state.in_flight != self.last_in_flight {
            self.follow.on_send_started();
        }
        self.last_in_flight = state.in_flight.clone();

        self.cache
            .retain(|id, _| state.messages.iter().any(|msg| &msg.id == id));

        let mut rendered = 0;
        let mut messages = Vec::with_capacity(state.messages.len());
        for msg in &state.messages {
            if let Some(cached) = self.cache.get(&msg.id) {
                messages.push(cached.clone());
                continue;
            }
            let view = render_message(msg);
            rendered += 1;
            if !msg.is_streaming {
                self.cache.insert(msg.id.clone(), view.clone());
            }
            messages.push(view);
        }

        let show_typing_indicator = state.is_loading()
            && state
                .messages
                .last()
                .is_some_and(|msg| msg.content.is_empty());

        Frame {
            messages,
            rendered,
            show_typing_indicator,
            scroll_to_bottom: self.follow.is_following(),
            show_sample_questions: state.messages.len() <= 1,
        }
    }
}

fn render_message(msg: &ChatMessage) -> RenderedMessage {
    let html = match msg.role {
        Role::User => format!("<p>{}</p>", escape_html(&msg.content)),
        Role::Assistant => markdown_to_html(&msg.content),
    };
    RenderedMessage {
        id: msg.id.clone(),
        role: msg.role,
        html,
        timestamp: format_message_timestamp(msg.created_at),
        is_streaming: msg.is_streaming,
    }
}
