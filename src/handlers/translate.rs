use once_cell::sync::Lazy;
use regex::Regex;

use crate::history::HistoryRecord;
use crate::models::{ActionKind, DerivedMetrics, OperationResult};
use crate::prompts::{AUTO_LANGUAGE, TRANSLATE_TEMPERATURE, translate_prompt};

use super::{HandlerContext, HandlerPhase, Outcome, ValidationError, finish};

static DETECTED_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*detected:\s*([a-z]{2,3})(?:[-_][a-z0-9]+)?[ \t]*(?:\r?\n|$)").unwrap());

const MARKER_PREFIX: &str = "detected:";

/// Splits a leading `Detected: <code>` line off a translation.
/// The code is lower-cased with any region suffix dropped.
pub fn parse_detected_language(text: &str) -> (Option<String>, String) {
    match DETECTED_MARKER.captures(text) {
        Some(caps) => {
            let code = caps[1].to_lowercase();
            let end = caps.get(0).map_or(0, |m| m.end());
            let rest = text[end..].trim_start_matches(['\r', '\n']);
            (Some(code), rest.to_string())
        }
        None => (None, text.to_string()),
    }
}

/// Text to show while streaming: hides a marker line that is still arriving.
fn visible_while_streaming(accumulated: &str) -> String {
    let head = accumulated.trim_start();
    if !head.contains('\n') {
        let lower = head.to_lowercase();
        if MARKER_PREFIX.starts_with(lower.as_str()) || lower.starts_with(MARKER_PREFIX) {
            return String::new();
        }
    }
    parse_detected_language(accumulated).1
}

#[derive(Debug, Default)]
pub struct TranslateHandler {
    phase: HandlerPhase,
    result: Option<OperationResult>,
}

impl TranslateHandler {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn phase(&self) -> HandlerPhase {
        self.phase
    }

    pub fn result(&self) -> Option<&OperationResult> {
        self.result.as_ref()
    }

    pub async fn handle(&mut self, text: &str, ctx: &HandlerContext) -> Outcome {
        let outcome = self.run(text.trim(), ctx).await;
        finish(&mut self.phase, &ctx.panel, outcome)
    }

    async fn run(&mut self, text: &str, ctx: &HandlerContext) -> Outcome {
        let client = match ctx.preflight(text) {
            Ok(client) => client,
            Err(outcome) => return outcome,
        };
        let (source, target) = ctx
            .panel
            .read(|p| (p.controls.source_language.clone(), p.controls.target_language.clone()))
            .unwrap_or_else(|| (AUTO_LANGUAGE.to_string(), String::new()));
        if target.is_empty() || target == AUTO_LANGUAGE {
            return ctx.reject(ValidationError::MissingTarget);
        }
        if source != AUTO_LANGUAGE && source == target {
            return ctx.reject(ValidationError::SameLanguages);
        }

        self.result = None;
        self.phase = HandlerPhase::Loading;
        ctx.panel.update(|p| {
            p.begin();
            p.swap_enabled = false;
            p.detected_language = None;
        });
        let auto = source == AUTO_LANGUAGE;
        let prompt = translate_prompt(text, &source, &target);
        let options = ctx.generation.with_temperature(TRANSLATE_TEMPERATURE);

        let mut result = OperationResult::start(text);
        let phase = &mut self.phase;
        let panel = ctx.panel.clone();
        let streamed = ctx
            .stream_into(client.as_ref(), &prompt, &options, &mut result, |r| {
                *phase = HandlerPhase::Streaming;
                let visible = if auto { visible_while_streaming(&r.result_text) } else { r.result_text.clone() };
                panel.update(|p| p.show_partial(&visible));
            })
            .await;
        match streamed {
            Ok(true) => {}
            Ok(false) => return Outcome::Cancelled,
            Err(e) => {
                self.phase = HandlerPhase::Errored;
                return ctx.fail(e);
            }
        }

        let (detected, clean) = if auto {
            parse_detected_language(&result.result_text)
        } else {
            (None, result.result_text.clone())
        };
        result.result_text = clean;
        let shown_source = detected.clone().unwrap_or_else(|| source.clone());
        result.finish(DerivedMetrics::Translation {
            source: shown_source.clone(),
            target: target.clone(),
            detected: detected.clone(),
        });
        self.phase = HandlerPhase::Done;

        let info = detected
            .as_deref()
            .map(|code| ctx.locale.tf("label.detected", &[("lang", code)]));
        ctx.panel.update(|p| {
            p.show_final(&result.result_text);
            if let Some(code) = &detected {
                p.controls.source_language = code.clone();
                p.detected_language = Some(code.clone());
            }
            p.swap_enabled = true;
            p.info = info;
        });
        let record = HistoryRecord::new(ActionKind::Translate, text, &result.result_text, result.metrics.to_metadata());
        self.result = Some(result);
        ctx.complete(record)
    }
}
