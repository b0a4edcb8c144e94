use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::history::HistoryRecord;

/// A point in viewport coordinates (terminal cells).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    #[cfg(test)]
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned box, same shape as a DOM client rect.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self { left, top, width, height }
    }

    pub fn at(origin: Point, size: Size) -> Self {
        Self::new(origin.x, origin.y, size.width, size.height)
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    /// True when the rect has neither width nor height.
    pub fn is_collapsed(&self) -> bool {
        self.width <= 0.0 && self.height <= 0.0
    }
}

/// Layout viewport plus the visual viewport offset (pinch zoom, shifted panes).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    pub offset_left: f64,
    pub offset_top: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height, offset_left: 0.0, offset_top: 0.0 }
    }

    #[cfg(test)]
    pub fn with_offset(mut self, left: f64, top: f64) -> Self {
        self.offset_left = left;
        self.offset_top = top;
        self
    }
}

/// A qualifying text selection. Replaced wholesale, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    text: String,
    anchor_rect: Rect,
}

impl Selection {
    /// Returns `None` unless the trimmed text is non-empty and the rect has area.
    pub fn new(text: &str, anchor_rect: Rect) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() || anchor_rect.is_collapsed() {
            return None;
        }
        Some(Self { text: text.to_string(), anchor_rect })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn anchor_rect(&self) -> Rect {
        self.anchor_rect
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PopupMode {
    #[default]
    Mini,
    Full,
}

impl PopupMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PopupMode::Mini => "mini",
            PopupMode::Full => "full",
        }
    }
}

pub const RECENTLY_CLOSED_WINDOW: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Default)]
pub struct PopupState {
    pub visible: bool,
    pub mode: PopupMode,
    pub pinned: bool,
    pub dragging: bool,
    pub manual_position: Option<Point>,
    pub closed_at: Option<Instant>,
}

impl PopupState {
    pub fn recently_closed(&self, now: Instant) -> bool {
        self.closed_at
            .map(|at| now.saturating_duration_since(at) < RECENTLY_CLOSED_WINDOW)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Summarize,
    Rephrase,
    Translate,
    Discuss,
    Highlight,
}

/// Button id -> action. Delegated clicks resolve through this table.
pub const ACTION_BUTTONS: &[(&str, ActionKind)] = &[
    ("summarize-btn", ActionKind::Summarize),
    ("rephrase-btn", ActionKind::Rephrase),
    ("translate-btn", ActionKind::Translate),
    ("discuss-send-btn", ActionKind::Discuss),
    ("highlight-btn", ActionKind::Highlight),
];

impl ActionKind {
    pub const STREAMING: [ActionKind; 4] = [
        ActionKind::Summarize,
        ActionKind::Rephrase,
        ActionKind::Translate,
        ActionKind::Discuss,
    ];

    pub const ALL: [ActionKind; 5] = [
        ActionKind::Summarize,
        ActionKind::Rephrase,
        ActionKind::Translate,
        ActionKind::Discuss,
        ActionKind::Highlight,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            ActionKind::Summarize => "summarize",
            ActionKind::Rephrase => "rephrase",
            ActionKind::Translate => "translate",
            ActionKind::Discuss => "discuss",
            ActionKind::Highlight => "highlight",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.id() == id)
    }

    pub fn from_button_id(id: &str) -> Option<Self> {
        ACTION_BUTTONS
            .iter()
            .find(|(button, _)| *button == id)
            .map(|(_, kind)| *kind)
    }

    pub fn button_id(&self) -> &'static str {
        ACTION_BUTTONS
            .iter()
            .find(|(_, kind)| kind == self)
            .map(|(button, _)| *button)
            .unwrap_or("")
    }

    pub fn icon(&self) -> &'static str {
        match self {
            ActionKind::Summarize => "Σ",
            ActionKind::Rephrase => "✎",
            ActionKind::Translate => "⇄",
            ActionKind::Discuss => "💬",
            ActionKind::Highlight => "★",
        }
    }
}

/// Per-kind numbers shown next to a finished result.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DerivedMetrics {
    #[default]
    None,
    Summary { compression_percent: u32 },
    Rephrase { length_delta: i64 },
    Translation { source: String, target: String, detected: Option<String> },
    Discussion { turns: usize },
    Highlights { count: usize },
}

impl DerivedMetrics {
    pub fn to_metadata(&self) -> serde_json::Value {
        match self {
            DerivedMetrics::None => serde_json::json!({}),
            DerivedMetrics::Summary { compression_percent } => {
                serde_json::json!({ "compressionPercent": compression_percent })
            }
            DerivedMetrics::Rephrase { length_delta } => {
                serde_json::json!({ "lengthDelta": length_delta })
            }
            DerivedMetrics::Translation { source, target, detected } => serde_json::json!({
                "sourceLanguage": source,
                "targetLanguage": target,
                "detectedLanguage": detected,
            }),
            DerivedMetrics::Discussion { turns } => serde_json::json!({ "turns": turns }),
            DerivedMetrics::Highlights { count } => serde_json::json!({ "count": count }),
        }
    }
}

/// The live result of one handler invocation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OperationResult {
    pub result_text: String,
    pub original_length: usize,
    pub result_length: usize,
    pub metrics: DerivedMetrics,
    pub streaming: bool,
}

impl OperationResult {
    pub fn start(original: &str) -> Self {
        Self {
            original_length: original.chars().count(),
            streaming: true,
            ..Default::default()
        }
    }

    /// Appends a streamed delta; the text only ever grows.
    pub fn push_delta(&mut self, delta: &str) {
        self.result_text.push_str(delta);
        self.result_length = self.result_text.chars().count();
    }

    pub fn finish(&mut self, metrics: DerivedMetrics) {
        self.streaming = false;
        self.result_length = self.result_text.chars().count();
        self.metrics = metrics;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub id: Uuid,
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Local>,
    pub streaming: bool,
}

impl ChatTurn {
    fn new(role: ChatRole, content: String, streaming: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content,
            timestamp: Local::now(),
            streaming,
        }
    }
}

/// Append-only conversation, except for the newest assistant turn while it streams.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatThread {
    turns: Vec<ChatTurn>,
    max_turns: usize,
}

impl ChatThread {
    pub fn new(max_turns: usize) -> Self {
        Self { turns: Vec::new(), max_turns: max_turns.max(2) }
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn push_user(&mut self, content: &str) {
        self.turns.push(ChatTurn::new(ChatRole::User, content.to_string(), false));
        self.trim();
    }

    pub fn push_assistant_placeholder(&mut self) {
        self.turns.push(ChatTurn::new(ChatRole::Assistant, String::new(), true));
        self.trim();
    }

    pub fn append_to_assistant(&mut self, delta: &str) {
        if let Some(turn) = self.streaming_turn() {
            turn.content.push_str(delta);
        }
    }

    pub fn finish_assistant(&mut self) {
        if let Some(turn) = self.streaming_turn() {
            turn.streaming = false;
        }
    }

    /// Drops a half-written assistant turn after a failed request.
    pub fn discard_streaming(&mut self) {
        if self.turns.last().is_some_and(|t| t.role == ChatRole::Assistant && t.streaming) {
            self.turns.pop();
        }
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    fn streaming_turn(&mut self) -> Option<&mut ChatTurn> {
        self.turns
            .last_mut()
            .filter(|t| t.role == ChatRole::Assistant && t.streaming)
    }

    fn trim(&mut self) {
        if self.turns.len() > self.max_turns {
            let excess = self.turns.len() - self.max_turns;
            self.turns.drain(..excess);
        }
    }
}

/// Sentences currently highlighted in the page. One instance per process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HighlightState {
    sentences: Vec<String>,
}

impl HighlightState {
    pub fn get(&self) -> &[String] {
        &self.sentences
    }

    pub fn set(&mut self, sentences: Vec<String>) {
        self.sentences = sentences;
    }

    pub fn clear(&mut self) {
        self.sentences.clear();
    }
}

/// Notifications emitted by the popup and its components.
#[derive(Debug, Clone, PartialEq)]
pub enum PopupEvent {
    TabChanged { tab_id: String, tab_index: usize },
    PopupHidden,
    /// A handler finished; carries the record written to history.
    ResultReady(HistoryRecord),
    OpenSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_rejects_blank_text_and_collapsed_rect() {
        assert!(Selection::new("   ", Rect::new(0.0, 0.0, 4.0, 1.0)).is_none());
        assert!(Selection::new("hello", Rect::new(3.0, 3.0, 0.0, 0.0)).is_none());
        let sel = Selection::new("  hello ", Rect::new(3.0, 3.0, 5.0, 1.0)).unwrap();
        assert_eq!(sel.text(), "hello");
    }

    #[test]
    fn button_lookup_round_trips() {
        for kind in ActionKind::ALL {
            assert_eq!(ActionKind::from_button_id(kind.button_id()), Some(kind));
            assert_eq!(ActionKind::from_id(kind.id()), Some(kind));
        }
        assert_eq!(ActionKind::from_button_id("close-btn"), None);
    }

    #[test]
    fn chat_thread_trims_oldest_turns() {
        let mut thread = ChatThread::new(4);
        for i in 0..3 {
            thread.push_user(&format!("q{i}"));
            thread.push_assistant_placeholder();
            thread.append_to_assistant(&format!("a{i}"));
            thread.finish_assistant();
        }
        assert_eq!(thread.turns().len(), 4);
        assert_eq!(thread.turns()[0].content, "q1");
        assert_eq!(thread.turns()[3].content, "a2");
    }

    #[test]
    fn chat_thread_only_grows_streaming_assistant_turn() {
        let mut thread = ChatThread::new(10);
        thread.push_user("question");
        thread.append_to_assistant("ignored");
        assert_eq!(thread.turns()[0].content, "question");

        thread.push_assistant_placeholder();
        thread.append_to_assistant("Hel");
        thread.append_to_assistant("lo");
        thread.finish_assistant();
        thread.append_to_assistant("!");
        assert_eq!(thread.turns()[1].content, "Hello");
    }

    #[test]
    fn recently_closed_expires() {
        let now = Instant::now();
        let state = PopupState { closed_at: Some(now), ..Default::default() };
        assert!(state.recently_closed(now + Duration::from_millis(50)));
        assert!(!state.recently_closed(now + RECENTLY_CLOSED_WINDOW));
    }
}
