// Contains prompt templates for the popup actions.

use crate::models::{ChatRole, ChatTurn};

/// Summaries should be faithful, so sampling stays near-deterministic.
pub const SUMMARIZE_TEMPERATURE: f32 = 0.2;
pub const REPHRASE_TEMPERATURE: f32 = 0.6;
pub const TRANSLATE_TEMPERATURE: f32 = 0.4;
pub const HIGHLIGHT_TEMPERATURE: f32 = 0.1;

pub const AUTO_LANGUAGE: &str = "auto";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SummaryLength {
    Short,
    #[default]
    Medium,
    Long,
}

impl SummaryLength {
    pub fn id(&self) -> &'static str {
        match self {
            SummaryLength::Short => "short",
            SummaryLength::Medium => "medium",
            SummaryLength::Long => "long",
        }
    }

    fn instruction(&self) -> &'static str {
        match self {
            SummaryLength::Short => "in one or two sentences",
            SummaryLength::Medium => "in a short paragraph of at most five sentences",
            SummaryLength::Long => "in a few paragraphs, keeping every important point",
        }
    }

    pub fn next(&self) -> Self {
        match self {
            SummaryLength::Short => SummaryLength::Medium,
            SummaryLength::Medium => SummaryLength::Long,
            SummaryLength::Long => SummaryLength::Short,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RephraseStyle {
    #[default]
    Formal,
    Casual,
    Concise,
    Friendly,
}

impl RephraseStyle {
    pub fn id(&self) -> &'static str {
        match self {
            RephraseStyle::Formal => "formal",
            RephraseStyle::Casual => "casual",
            RephraseStyle::Concise => "concise",
            RephraseStyle::Friendly => "friendly",
        }
    }

    fn instruction(&self) -> &'static str {
        match self {
            RephraseStyle::Formal => "a formal, professional tone",
            RephraseStyle::Casual => "a relaxed, casual tone",
            RephraseStyle::Concise => "as few words as possible without losing meaning",
            RephraseStyle::Friendly => "a warm, friendly tone",
        }
    }

    pub fn next(&self) -> Self {
        match self {
            RephraseStyle::Formal => RephraseStyle::Casual,
            RephraseStyle::Casual => RephraseStyle::Concise,
            RephraseStyle::Concise => RephraseStyle::Friendly,
            RephraseStyle::Friendly => RephraseStyle::Formal,
        }
    }
}

/// English name of an ISO 639-1 code, falling back to the code itself.
pub fn language_name(code: &str) -> String {
    isolang::Language::from_639_1(code)
        .map(|l| l.to_name().to_string())
        .unwrap_or_else(|| code.to_string())
}

pub fn summarize_prompt(text: &str, length: SummaryLength, output_lang: &str) -> String {
    format!(
        r#"Summarize the following text {length}.
Write the summary in {lang}. Reply with the summary only, without any preamble.

Text:
"""
{text}
""""#,
        length = length.instruction(),
        lang = language_name(output_lang),
        text = text,
    )
}

pub fn rephrase_prompt(text: &str, style: RephraseStyle, preserve_formatting: bool) -> String {
    let formatting = if preserve_formatting {
        "Keep the original formatting: line breaks, lists and markdown must stay as they are."
    } else {
        "You may restructure sentences freely."
    };
    format!(
        r#"Rephrase the following text using {style}. Keep the meaning and the language of the original.
{formatting}
Reply with the rephrased text only.

Text:
"""
{text}
""""#,
        style = style.instruction(),
    )
}

pub fn translate_prompt(text: &str, source: &str, target: &str) -> String {
    let source_line = if source == AUTO_LANGUAGE {
        "Detect the language of the text. Start your reply with a first line of the form `Detected: <ISO 639-1 code>`, then the translation on the following lines.".to_string()
    } else {
        format!("The text is written in {}.", language_name(source))
    };
    format!(
        r#"Translate the following text into {target}.
{source_line}
Reply with the translation only, preserving line breaks.

Text:
"""
{text}
""""#,
        target = language_name(target),
    )
}

/// The thread already contains the newest user turn. The passage leads the
/// prompt even after the opening turn was trimmed away.
pub fn discuss_prompt(passage: &str, turns: &[ChatTurn], output_lang: &str) -> String {
    let mut prompt = format!(
        "You are helping a reader understand a passage they selected. Answer in {}. Be concise.\n\nPassage:\n\"\"\"\n{passage}\n\"\"\"\n\n",
        language_name(output_lang)
    );
    for turn in turns.iter().filter(|t| !(t.role == ChatRole::Assistant && t.streaming)) {
        let speaker = match turn.role {
            ChatRole::User => "User",
            ChatRole::Assistant => "Assistant",
        };
        prompt.push_str(&format!("{speaker}: {}\n\n", turn.content));
    }
    prompt.push_str("Assistant:");
    prompt
}

pub fn highlight_prompt(text: &str, max_sentences: usize) -> String {
    format!(
        r#"From the text below, pick the {max_sentences} most important sentences.
Copy each sentence exactly as written, one per line, without numbering or commentary.

Text:
"""
{text}
""""#
    )
}
