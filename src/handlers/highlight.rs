use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info};

use crate::history::HistoryRecord;
use crate::models::{ActionKind, DerivedMetrics, HighlightState, OperationResult};
use crate::network::{Generated, ServiceError};
use crate::prompts::{HIGHLIGHT_TEMPERATURE, highlight_prompt};

use super::{HandlerContext, HandlerPhase, Outcome, finish};

pub const HIGHLIGHT_ATTEMPTS: usize = 4;
pub const HIGHLIGHT_BACKOFF: Duration = Duration::from_secs(1);
const MAX_SENTENCES: usize = 5;

/// Keeps reply lines that occur verbatim in the source text.
pub fn extract_sentences(reply: &str, source: &str) -> Vec<String> {
    let mut sentences: Vec<String> = Vec::new();
    for line in reply.lines() {
        let bullet = line.trim().trim_start_matches(['-', '*', '•']).trim_start();
        let sentence = strip_list_number(bullet).trim().trim_matches('"');
        if sentence.is_empty() || !source.contains(sentence) || sentences.iter().any(|s| s == sentence) {
            continue;
        }
        sentences.push(sentence.to_string());
    }
    sentences
}

/// Drops a `1.` or `2)` list marker. Digits that start the sentence itself stay.
fn strip_list_number(line: &str) -> &str {
    let rest = line.trim_start_matches(|c: char| c.is_ascii_digit());
    if rest.len() == line.len() {
        return line;
    }
    match rest.strip_prefix(['.', ')']) {
        Some(after) if after.starts_with(char::is_whitespace) => after,
        _ => line,
    }
}

/// Key-sentence extraction. Not streamed; retries transient failures itself.
#[derive(Debug)]
pub struct HighlightHandler {
    phase: HandlerPhase,
    highlights: Arc<Mutex<HighlightState>>,
    result: Option<OperationResult>,
}

impl HighlightHandler {
    pub fn new(highlights: Arc<Mutex<HighlightState>>) -> Self {
        Self {
            phase: HandlerPhase::Idle,
            highlights,
            result: None,
        }
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
        self.result = None;
        self.phase = HandlerPhase::Loading;
        ctx.panel.update(|p| p.begin());

        let prompt = highlight_prompt(text, MAX_SENTENCES);
        let options = ctx.generation.with_temperature(HIGHLIGHT_TEMPERATURE);
        let mut attempt = 0;
        let generated: Result<Generated, ServiceError> = loop {
            attempt += 1;
            let response = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Outcome::Cancelled,
                response = client.generate(&prompt, &options) => response,
            };
            match response {
                Err(e) if e.is_retryable() && attempt < HIGHLIGHT_ATTEMPTS => {
                    debug!(attempt, "highlight request failed, retrying: {e}");
                    tokio::select! {
                        biased;
                        _ = ctx.cancel.cancelled() => return Outcome::Cancelled,
                        _ = tokio::time::sleep(HIGHLIGHT_BACKOFF) => {}
                    }
                }
                other => break other,
            }
        };
        let generated = match generated {
            Ok(generated) => generated,
            Err(e) => {
                self.phase = HandlerPhase::Errored;
                return ctx.fail(e);
            }
        };

        let sentences = extract_sentences(&generated.text, text);
        info!(count = sentences.len(), attempt, "highlighted key sentences");
        let mut result = OperationResult::start(text);
        result.push_delta(&sentences.join("\n"));
        result.finish(DerivedMetrics::Highlights { count: sentences.len() });
        self.phase = HandlerPhase::Done;

        let shown = sentences.iter().map(|s| format!("• {s}")).collect::<Vec<_>>().join("\n");
        let info = ctx.locale.tf("label.highlights", &[("count", &sentences.len().to_string())]);
        ctx.panel.update(|p| {
            p.show_final(&shown);
            p.info = Some(info);
        });
        self.highlights.lock().unwrap_or_else(|e| e.into_inner()).set(sentences);

        let record = HistoryRecord::new(ActionKind::Highlight, text, &result.result_text, result.metrics.to_metadata());
        self.result = Some(result);
        ctx.complete(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::*;

    const TEXT: &str = "Rust is fast. It has no garbage collector. Cats like boxes.";

    #[test]
    fn keeps_only_sentences_present_in_source() {
        let reply = "1. Rust is fast.\n- It has no garbage collector.\nInvented sentence.\n\"Rust is fast.\"";
        assert_eq!(
            extract_sentences(reply, TEXT),
            vec!["Rust is fast.".to_string(), "It has no garbage collector.".to_string()]
        );
    }

    #[test]
    fn leading_numbers_in_sentences_survive() {
        let text = "2024 was a good year. Prices rose 2.5 percent.";
        let reply = "1) 2024 was a good year.\n2024 was a good year.\n2.5 percent rose.\n3. Prices rose 2.5 percent.";
        assert_eq!(
            extract_sentences(reply, text),
            vec!["2024 was a good year.".to_string(), "Prices rose 2.5 percent.".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_then_succeeds() {
        let f = fixture(
            ActionKind::Highlight,
            vec![
                Script::Fail(ServiceError::RateLimited("slow down".into())),
                Script::Fail(ServiceError::Unknown("hiccup".into())),
                Script::Text("Rust is fast."),
            ],
        );
        let state = Arc::new(Mutex::new(HighlightState::default()));
        let mut handler = HighlightHandler::new(Arc::clone(&state));

        assert!(handler.handle(TEXT, &f.ctx).await.is_completed());
        assert_eq!(f.client.call_count(), 3);
        assert_eq!(state.lock().unwrap().get(), ["Rust is fast.".to_string()]);
        assert_eq!(f.panel.lock().unwrap().info.as_deref(), Some("1 key sentences highlighted"));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_four_attempts() {
        let f = fixture(
            ActionKind::Highlight,
            (0..5).map(|_| Script::Fail(ServiceError::ModelUnavailable("down".into()))).collect(),
        );
        let mut handler = HighlightHandler::new(Arc::new(Mutex::new(HighlightState::default())));
        let outcome = handler.handle(TEXT, &f.ctx).await;
        assert!(matches!(outcome, Outcome::Failed(ServiceError::ModelUnavailable(_))));
        assert_eq!(f.client.call_count(), HIGHLIGHT_ATTEMPTS);
    }

    #[tokio::test]
    async fn does_not_retry_bad_requests() {
        let f = fixture(
            ActionKind::Highlight,
            vec![Script::Fail(ServiceError::BadRequest("nope".into())), Script::Text("Rust is fast.")],
        );
        let mut handler = HighlightHandler::new(Arc::new(Mutex::new(HighlightState::default())));
        assert!(matches!(handler.handle(TEXT, &f.ctx).await, Outcome::Failed(ServiceError::BadRequest(_))));
        assert_eq!(f.client.call_count(), 1);
    }
}
