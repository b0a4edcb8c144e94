//! Per-action panel state inside the popup.
//!
//! Handlers write into panels through [`PanelRef`], a weak reference: once the
//! popup host is destroyed the panels are gone and late writes are dropped.

use std::sync::{Arc, Mutex, Weak};

use crate::i18n::Locale;
use crate::models::{ActionKind, ChatRole};
use crate::prompts::{AUTO_LANGUAGE, RephraseStyle, SummaryLength};
use crate::utils::truncate_chars;
use crate::view::{Element, View};

pub const OPEN_SETTINGS_ID: &str = "open-settings";
pub const SWAP_LANGUAGES_ID: &str = "swap-languages";
pub const SUMMARY_LENGTH_ID: &str = "summary-length";
pub const REPHRASE_STYLE_ID: &str = "rephrase-style";
pub const PRESERVE_FORMATTING_ID: &str = "preserve-formatting";
pub const SOURCE_LANGUAGE_ID: &str = "source-language";
pub const TARGET_LANGUAGE_ID: &str = "target-language";
pub const DISCUSS_INPUT_ID: &str = "discuss-input";

pub const LANGUAGES: &[&str] = &["en", "de", "fr", "es", "it", "pt", "nl", "pl", "ru", "uk", "tr", "ja", "zh", "ko"];

const PREVIEW_CHARS: usize = 120;

#[derive(Debug, Clone, PartialEq)]
pub enum ResultView {
    Empty,
    Loading(String),
    Text { text: String, streaming: bool },
    Error(String),
    NotConfigured(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ButtonState {
    pub label: String,
    pub idle_label: String,
    pub busy_label: String,
    pub disabled: bool,
}

/// Sibling controls read by prompt construction.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelControls {
    pub summary_length: SummaryLength,
    pub rephrase_style: RephraseStyle,
    pub preserve_formatting: bool,
    pub source_language: String,
    pub target_language: String,
    pub question: String,
    pub output_language: String,
}

impl PanelControls {
    pub fn new(output_language: &str, target_language: &str) -> Self {
        Self {
            summary_length: SummaryLength::default(),
            rephrase_style: RephraseStyle::default(),
            preserve_formatting: true,
            source_language: AUTO_LANGUAGE.to_string(),
            target_language: target_language.to_string(),
            question: String::new(),
            output_language: output_language.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptLine {
    pub role: ChatRole,
    pub content: String,
    pub streaming: bool,
}

#[derive(Debug)]
pub struct PanelState {
    pub kind: ActionKind,
    pub selected_preview: String,
    pub button: ButtonState,
    pub result: ResultView,
    pub controls: PanelControls,
    pub info: Option<String>,
    pub detected_language: Option<String>,
    pub swap_enabled: bool,
    pub transcript: Vec<TranscriptLine>,
    locale: Arc<Locale>,
}

pub type PanelHandle = Arc<Mutex<PanelState>>;

impl PanelState {
    pub fn new(kind: ActionKind, controls: PanelControls, locale: Arc<Locale>) -> Self {
        let idle_label = locale.t(&format!("button.{}", kind.id()));
        Self {
            kind,
            selected_preview: String::new(),
            button: ButtonState {
                label: idle_label.clone(),
                idle_label,
                busy_label: locale.t(&format!("busy.{}", kind.id())),
                disabled: false,
            },
            result: ResultView::Empty,
            controls,
            info: None,
            detected_language: None,
            swap_enabled: false,
            transcript: Vec::new(),
            locale,
        }
    }

    pub fn handle(self) -> PanelHandle {
        Arc::new(Mutex::new(self))
    }

    pub fn set_preview(&mut self, selected: &str) {
        self.selected_preview = truncate_chars(&selected.replace('\n', " "), PREVIEW_CHARS);
    }

    /// Loading state: control disabled, busy label, placeholder result.
    pub fn begin(&mut self) {
        self.button.disabled = true;
        self.button.label = self.button.busy_label.clone();
        self.result = ResultView::Loading(self.locale.t("result.loading"));
        self.info = None;
    }

    pub fn show_partial(&mut self, text: &str) {
        self.result = ResultView::Text { text: text.to_string(), streaming: true };
    }

    pub fn show_final(&mut self, text: &str) {
        self.result = ResultView::Text { text: text.to_string(), streaming: false };
    }

    pub fn show_error(&mut self, message: String) {
        self.result = ResultView::Error(message);
    }

    pub fn show_not_configured(&mut self) {
        self.result = ResultView::NotConfigured(self.locale.t("error.not_configured"));
    }

    pub fn restore_button(&mut self) {
        self.button.disabled = false;
        self.button.label = self.button.idle_label.clone();
    }

    /// Clears per-operation output; control values are kept.
    pub fn reset(&mut self) {
        self.restore_button();
        self.result = ResultView::Empty;
        self.info = None;
        self.detected_language = None;
        self.swap_enabled = false;
        self.transcript.clear();
    }

    /// Visible result text, if any.
    pub fn result_text(&self) -> Option<&str> {
        match &self.result {
            ResultView::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Swaps source and target. An `auto` source is replaced by the detected code first.
    pub fn swap_languages(&mut self) -> bool {
        if !self.swap_enabled {
            return false;
        }
        let source = if self.controls.source_language == AUTO_LANGUAGE {
            match self.detected_language.clone() {
                Some(code) => code,
                None => return false,
            }
        } else {
            self.controls.source_language.clone()
        };
        self.controls.source_language = std::mem::replace(&mut self.controls.target_language, source);
        self.detected_language = None;
        true
    }

    /// Advances a select-style control; returns false for unknown ids.
    pub fn cycle_control(&mut self, id: &str) -> bool {
        match id {
            SUMMARY_LENGTH_ID => self.controls.summary_length = self.controls.summary_length.next(),
            REPHRASE_STYLE_ID => self.controls.rephrase_style = self.controls.rephrase_style.next(),
            PRESERVE_FORMATTING_ID => self.controls.preserve_formatting = !self.controls.preserve_formatting,
            SOURCE_LANGUAGE_ID => {
                let mut options = vec![AUTO_LANGUAGE];
                options.extend_from_slice(LANGUAGES);
                self.controls.source_language = next_option(&options, &self.controls.source_language);
            }
            TARGET_LANGUAGE_ID => {
                self.controls.target_language = next_option(LANGUAGES, &self.controls.target_language);
            }
            _ => return false,
        }
        true
    }

    /// The select that the generic "option" key cycles for this panel.
    pub fn primary_control(&self) -> Option<&'static str> {
        match self.kind {
            ActionKind::Summarize => Some(SUMMARY_LENGTH_ID),
            ActionKind::Rephrase => Some(REPHRASE_STYLE_ID),
            ActionKind::Translate => Some(TARGET_LANGUAGE_ID),
            ActionKind::Discuss | ActionKind::Highlight => None,
        }
    }

    fn language_label(&self, code: &str) -> String {
        if code == AUTO_LANGUAGE {
            self.locale.t("label.auto")
        } else {
            code.to_string()
        }
    }

    fn select(&self, id: &str, label_key: &str, value: String) -> Element {
        Element::new("select")
            .with_id(id)
            .attr("aria-label", self.locale.t(label_key))
            .attr("value", value.clone())
            .text(format!("{}: {} ▾", self.locale.t(label_key), value))
    }

    fn controls_row(&self) -> Option<Element> {
        let row = Element::new("div").class("controls");
        let row = match self.kind {
            ActionKind::Summarize => row.child(self.select(
                SUMMARY_LENGTH_ID,
                "label.length",
                self.locale.t(&format!("length.{}", self.controls.summary_length.id())),
            )),
            ActionKind::Rephrase => row
                .child(self.select(
                    REPHRASE_STYLE_ID,
                    "label.style",
                    self.locale.t(&format!("style.{}", self.controls.rephrase_style.id())),
                ))
                .child(
                    Element::new("input")
                        .with_id(PRESERVE_FORMATTING_ID)
                        .attr("type", "checkbox")
                        .flag("checked", self.controls.preserve_formatting)
                        .text(format!(
                            "[{}] {}",
                            if self.controls.preserve_formatting { "x" } else { " " },
                            self.locale.t("label.preserve")
                        )),
                ),
            ActionKind::Translate => row
                .child(self.select(
                    SOURCE_LANGUAGE_ID,
                    "label.source",
                    self.language_label(&self.controls.source_language),
                ))
                .child(
                    Element::new("button")
                        .with_id(SWAP_LANGUAGES_ID)
                        .class("swap")
                        .flag("disabled", !self.swap_enabled)
                        .attr("title", self.locale.t("label.swap"))
                        .text("⇄"),
                )
                .child(self.select(
                    TARGET_LANGUAGE_ID,
                    "label.target",
                    self.language_label(&self.controls.target_language),
                )),
            ActionKind::Discuss => row.child(
                Element::new("input")
                    .with_id(DISCUSS_INPUT_ID)
                    .attr("type", "text")
                    .attr("placeholder", self.locale.t("label.ask"))
                    .text(if self.controls.question.is_empty() {
                        format!("› {}", self.locale.t("label.ask"))
                    } else {
                        format!("› {}▏", self.controls.question)
                    }),
            ),
            ActionKind::Highlight => return None,
        };
        Some(row)
    }

    fn transcript_element(&self) -> Element {
        let turns = self.transcript.iter().map(|line| {
            let (class, who) = match line.role {
                ChatRole::User => ("turn-user", self.locale.t("label.you")),
                ChatRole::Assistant => ("turn-assistant", self.locale.t("label.assistant")),
            };
            let cursor = if line.streaming { "▌" } else { "" };
            Element::new("div")
                .class("turn")
                .class(class)
                .text(format!("{who}: {}{cursor}", line.content))
        });
        Element::new("div").with_id("discuss-thread").class("thread").children(turns)
    }

    fn result_element(&self) -> Element {
        let area = Element::new("div")
            .with_id(format!("{}-result", self.kind.id()))
            .class("result")
            .attr("aria-live", "polite");
        match &self.result {
            ResultView::Empty => area.flag("hidden", true),
            ResultView::Loading(msg) => area.class("loading").text(msg.clone()),
            ResultView::Text { text, streaming } => {
                let area = if *streaming { area.class("streaming") } else { area };
                area.child(Element::new("pre").class("result-text").text(text.clone()))
            }
            ResultView::Error(msg) => area.class("error").text(msg.clone()),
            ResultView::NotConfigured(msg) => area.class("error").text(format!("{msg} ")).child(
                Element::new("a")
                    .with_id(OPEN_SETTINGS_ID)
                    .attr("role", "button")
                    .text(self.locale.t("link.open_settings")),
            ),
        }
    }
}

impl View for PanelState {
    fn render(&self) -> Element {
        let mut panel = Element::new("div")
            .with_id(format!("{}-body", self.kind.id()))
            .class("panel")
            .child(
                Element::new("p")
                    .with_id(format!("{}-preview", self.kind.id()))
                    .class("selected-text")
                    .attr("title", self.locale.t("label.selected"))
                    .text(format!("“{}”", self.selected_preview)),
            );
        if let Some(row) = self.controls_row() {
            panel = panel.child(row);
        }
        if self.kind == ActionKind::Discuss && !self.transcript.is_empty() {
            panel = panel.child(self.transcript_element());
        }
        panel = panel.child(
            Element::new("button")
                .with_id(self.kind.button_id())
                .class("primary")
                .flag("disabled", self.button.disabled)
                .text(self.button.label.clone()),
        );
        if self.kind != ActionKind::Discuss || self.transcript.is_empty() {
            panel = panel.child(self.result_element());
        } else if matches!(self.result, ResultView::Error(_) | ResultView::NotConfigured(_)) {
            panel = panel.child(self.result_element());
        }
        if let Some(info) = &self.info {
            panel = panel.child(
                Element::new("p")
                    .with_id(format!("{}-info", self.kind.id()))
                    .class("info")
                    .text(info.clone()),
            );
        }
        panel
    }
}

fn next_option(options: &[&str], current: &str) -> String {
    let idx = options.iter().position(|o| *o == current).map(|i| (i + 1) % options.len()).unwrap_or(0);
    options[idx].to_string()
}

/// Weak handle to a panel. Writes after the popup host is gone are ignored.
#[derive(Debug, Clone, Default)]
pub struct PanelRef(Weak<Mutex<PanelState>>);

impl PanelRef {
    pub fn new(handle: &PanelHandle) -> Self {
        Self(Arc::downgrade(handle))
    }

    pub fn detached() -> Self {
        Self(Weak::new())
    }

    #[cfg(test)]
    pub fn is_attached(&self) -> bool {
        self.0.strong_count() > 0
    }

    /// Applies `f` if the panel still exists.
    pub fn update(&self, f: impl FnOnce(&mut PanelState)) -> bool {
        match self.0.upgrade() {
            Some(panel) => {
                let mut guard = panel.lock().unwrap_or_else(|e| e.into_inner());
                f(&mut guard);
                true
            }
            None => false,
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&PanelState) -> R) -> Option<R> {
        let panel = self.0.upgrade()?;
        let guard = panel.lock().unwrap_or_else(|e| e.into_inner());
        Some(f(&guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn panel(kind: ActionKind) -> PanelState {
        PanelState::new(kind, PanelControls::new("en", "ru"), Arc::new(Locale::default()))
    }

    #[test]
    fn begin_and_restore_toggle_button() {
        let mut p = panel(ActionKind::Rephrase);
        p.begin();
        assert!(p.button.disabled);
        assert_eq!(p.button.label, "Rephrasing…");
        assert!(matches!(p.result, ResultView::Loading(_)));
        p.restore_button();
        assert!(!p.button.disabled);
        assert_eq!(p.button.label, "Rephrase");
    }

    #[test]
    fn swap_uses_detected_language_for_auto_source() {
        let mut p = panel(ActionKind::Translate);
        assert!(!p.swap_languages());
        p.swap_enabled = true;
        assert!(!p.swap_languages(), "auto without detection cannot be swapped");
        p.detected_language = Some("en".into());
        assert!(p.swap_languages());
        assert_eq!(p.controls.source_language, "ru");
        assert_eq!(p.controls.target_language, "en");
    }

    #[test]
    fn not_configured_renders_settings_link() {
        let mut p = panel(ActionKind::Summarize);
        p.show_not_configured();
        let tree = p.render();
        let link = tree.find_by_id(OPEN_SETTINGS_ID).unwrap();
        assert_eq!(link.text_content(), "Open settings");
    }

    #[test]
    fn render_marks_disabled_primary_button() {
        let mut p = panel(ActionKind::Translate);
        p.begin();
        let tree = p.render();
        assert!(tree.find_by_id("translate-btn").unwrap().is_disabled());
        assert!(tree.find_by_id(SWAP_LANGUAGES_ID).unwrap().is_disabled());
    }

    #[test]
    fn cycling_controls_wraps() {
        let mut p = panel(ActionKind::Translate);
        p.controls.target_language = "ko".into();
        assert!(p.cycle_control(TARGET_LANGUAGE_ID));
        assert_eq!(p.controls.target_language, "en");
        assert!(p.cycle_control(SOURCE_LANGUAGE_ID));
        assert_eq!(p.controls.source_language, "en");
        assert!(!p.cycle_control("unknown"));
    }

    #[test]
    fn weak_ref_drops_writes_after_detach() {
        let handle = panel(ActionKind::Summarize).handle();
        let r = PanelRef::new(&handle);
        assert!(r.update(|p| p.show_partial("hi")));
        drop(handle);
        assert!(!r.is_attached());
        assert!(!r.update(|p| p.show_partial("late")));
        assert_eq!(r.read(|p| p.kind), None);
    }
}
