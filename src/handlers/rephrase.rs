use crate::history::HistoryRecord;
use crate::models::{ActionKind, DerivedMetrics, OperationResult};
use crate::prompts::{REPHRASE_TEMPERATURE, RephraseStyle, rephrase_prompt};

use super::{HandlerContext, HandlerPhase, Outcome, finish};

#[derive(Debug, Default)]
pub struct RephraseHandler {
    phase: HandlerPhase,
    result: Option<OperationResult>,
}

impl RephraseHandler {
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

        let (style, preserve) = ctx
            .panel
            .read(|p| (p.controls.rephrase_style, p.controls.preserve_formatting))
            .unwrap_or((RephraseStyle::default(), true));
        let prompt = rephrase_prompt(text, style, preserve);
        let options = ctx.generation.with_temperature(REPHRASE_TEMPERATURE);

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

        // Display only; never used for control flow.
        let length_delta = result.result_text.chars().count() as i64 - result.original_length as i64;
        result.finish(DerivedMetrics::Rephrase { length_delta });
        self.phase = HandlerPhase::Done;
        let info = ctx.locale.tf("label.length_delta", &[("delta", &format!("{length_delta:+}"))]);
        ctx.panel.update(|p| {
            p.show_final(&result.result_text);
            p.info = Some(info);
        });
        let mut metadata = result.metrics.to_metadata();
        metadata["style"] = serde_json::Value::String(style.id().to_string());
        let record = HistoryRecord::new(ActionKind::Rephrase, text, &result.result_text, metadata);
        self.result = Some(result);
        ctx.complete(record)
    }
}
