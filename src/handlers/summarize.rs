use crate::history::HistoryRecord;
use crate::models::{ActionKind, DerivedMetrics, OperationResult};
use crate::prompts::{SUMMARIZE_TEMPERATURE, SummaryLength, summarize_prompt};

use super::{HandlerContext, HandlerPhase, Outcome, finish};

#[derive(Debug, Default)]
pub struct SummarizeHandler {
    phase: HandlerPhase,
    result: Option<OperationResult>,
}

impl SummarizeHandler {
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
        self.result = None;
        self.phase = HandlerPhase::Loading;
        ctx.panel.update(|p| p.begin());

        let (length, lang) = ctx
            .panel
            .read(|p| (p.controls.summary_length, p.controls.output_language.clone()))
            .unwrap_or_else(|| (SummaryLength::default(), ctx.locale.lang().to_string()));
        let prompt = summarize_prompt(text, length, &lang);
        let options = ctx.generation.with_temperature(SUMMARIZE_TEMPERATURE);

        let mut result = OperationResult::start(text);
        let phase = &mut self.phase;
        let panel = ctx.panel.clone();
        let streamed = ctx
            .stream_into(client.as_ref(), &prompt, &options, &mut result, |r| {
                *phase = HandlerPhase::Streaming;
                panel.update(|p| p.show_partial(&r.result_text));
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

        let percent = compression_percent(result.original_length, result.result_text.chars().count());
        result.finish(DerivedMetrics::Summary { compression_percent: percent });
        self.phase = HandlerPhase::Done;
        let info = ctx.locale.tf("label.compression", &[("percent", &percent.to_string())]);
        ctx.panel.update(|p| {
            p.show_final(&result.result_text);
            p.info = Some(info);
        });
        let record = HistoryRecord::new(ActionKind::Summarize, text, &result.result_text, result.metrics.to_metadata());
        self.result = Some(result);
        ctx.complete(record)
    }
}

/// Summary length as a rounded percentage of the original.
pub fn compression_percent(original: usize, summary: usize) -> u32 {
    if original == 0 {
        return 0;
    }
    ((summary as f64 / original as f64) * 100.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::*;
    use crate::models::PopupEvent;
    use crate::prompts::SummaryLength;

    #[tokio::test]
    async fn streams_summary_and_reports_compression() {
        let mut f = fixture(ActionKind::Summarize, vec![Script::Stream(vec!["Foxes", " jump."])]);
        f.panel.lock().unwrap().controls.summary_length = SummaryLength::Short;
        let mut handler = SummarizeHandler::new();
        let text = "The quick brown fox jumps over the lazy dog.";

        let outcome = handler.handle(text, &f.ctx).await;

        assert!(outcome.is_completed());
        let result = handler.result().unwrap();
        assert_eq!(result.result_text, "Foxes jump.");
        assert!(!result.streaming);
        assert_eq!(
            result.metrics,
            DerivedMetrics::Summary { compression_percent: compression_percent(44, 11) }
        );
        assert!(f.client.prompts.lock().unwrap()[0].contains("in one or two sentences"));

        let state = f.panel.lock().unwrap();
        assert_eq!(state.result_text(), Some("Foxes jump."));
        assert_eq!(state.info.as_deref(), Some("25% of original"));
        drop(state);
        assert!(matches!(f.events.try_recv(), Ok(PopupEvent::ResultReady(r)) if r.kind == ActionKind::Summarize));
        assert_eq!(f.history_len(), 1);
    }

    #[test]
    fn compression_handles_empty_original() {
        assert_eq!(compression_percent(0, 5), 0);
        assert_eq!(compression_percent(200, 50), 25);
    }
}
