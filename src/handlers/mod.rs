//! Action handlers: one small state machine per popup action.
//!
//! Every handler walks `Idle -> Loading -> Streaming -> Done | Errored` and is
//! back in `Idle` when `handle` returns, whatever happened in between.

pub mod discuss;
pub mod highlight;
pub mod rephrase;
pub mod summarize;
pub mod translate;

use std::sync::{Arc, Mutex};

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::history::{HistoryRecord, HistoryStore};
use crate::i18n::Locale;
use crate::models::{ActionKind, HighlightState, OperationResult, PopupEvent};
use crate::network::{GenerationClient, GenerationOptions, ServiceError};
use crate::panels::PanelRef;

pub use discuss::DiscussHandler;
pub use highlight::HighlightHandler;
pub use rephrase::RephraseHandler;
pub use summarize::SummarizeHandler;
pub use translate::TranslateHandler;

/// Input problems caught before any request is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no text selected")]
    EmptySelection,
    #[error("source and target languages are the same")]
    SameLanguages,
    #[error("no target language")]
    MissingTarget,
}

impl ValidationError {
    pub fn message_key(&self) -> &'static str {
        match self {
            ValidationError::EmptySelection => "error.no_text",
            ValidationError::SameLanguages => "error.same_languages",
            ValidationError::MissingTarget => "error.missing_target",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandlerPhase {
    #[default]
    Idle,
    Loading,
    Streaming,
    Done,
    Errored,
}

#[derive(Debug)]
pub enum Outcome {
    Completed(HistoryRecord),
    Rejected(ValidationError),
    NotConfigured,
    Failed(ServiceError),
    Cancelled,
}

impl Outcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }
}

/// Everything a handler needs for one dispatch.
#[derive(Clone)]
pub struct HandlerContext {
    pub client: Option<Arc<dyn GenerationClient>>,
    pub generation: GenerationOptions,
    pub locale: Arc<Locale>,
    pub history: Arc<dyn HistoryStore>,
    pub events: Option<UnboundedSender<PopupEvent>>,
    pub panel: PanelRef,
    pub cancel: CancellationToken,
}

impl HandlerContext {
    /// Shared preflight: empty selection first, then a missing client.
    pub(crate) fn preflight(&self, text: &str) -> Result<Arc<dyn GenerationClient>, Outcome> {
        if text.trim().is_empty() {
            return Err(self.reject(ValidationError::EmptySelection));
        }
        match &self.client {
            Some(client) => Ok(Arc::clone(client)),
            None => {
                self.panel.update(|p| p.show_not_configured());
                Err(Outcome::NotConfigured)
            }
        }
    }

    pub(crate) fn reject(&self, err: ValidationError) -> Outcome {
        let message = self.locale.t(err.message_key());
        self.panel.update(|p| p.show_error(message));
        Outcome::Rejected(err)
    }

    pub(crate) fn fail(&self, err: ServiceError) -> Outcome {
        let message = self.locale.tf(err.message_key(), &[("error", &err.to_string())]);
        self.panel.update(|p| p.show_error(message));
        Outcome::Failed(err)
    }

    /// Fires "result ready" and appends to history. Storage failures are only logged.
    pub(crate) fn complete(&self, record: HistoryRecord) -> Outcome {
        if let Some(events) = &self.events {
            let _ = events.send(PopupEvent::ResultReady(record.clone()));
        }
        if let Err(e) = self.history.append(&record) {
            warn!(kind = record.kind.id(), "failed to save history entry: {e}");
        }
        Outcome::Completed(record)
    }

    /// Consumes a streamed response into `result`, calling `on_delta` after every
    /// non-empty delta. Returns `Ok(false)` when the operation was cancelled.
    pub(crate) async fn stream_into(
        &self,
        client: &dyn GenerationClient,
        prompt: &str,
        options: &GenerationOptions,
        result: &mut OperationResult,
        mut on_delta: impl FnMut(&OperationResult),
    ) -> Result<bool, ServiceError> {
        let mut stream = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(false),
            stream = client.stream_generate(prompt, options) => stream?,
        };
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(false),
                next = stream.next() => next,
            };
            match next {
                Some(Ok(delta)) => {
                    if !delta.text.is_empty() {
                        result.push_delta(&delta.text);
                        on_delta(result);
                    }
                    if delta.is_final {
                        break;
                    }
                }
                Some(Err(e)) => return Err(e),
                None => {
                    debug!("stream ended without a final marker");
                    break;
                }
            }
        }
        Ok(true)
    }
}

/// Puts the panel and phase back to idle after a handler body ran.
pub(crate) fn finish(phase: &mut HandlerPhase, panel: &PanelRef, outcome: Outcome) -> Outcome {
    debug!(end_phase = ?*phase, "handler finished");
    panel.update(|p| p.restore_button());
    *phase = HandlerPhase::Idle;
    outcome
}

/// Uniform dispatch over the concrete handlers.
pub enum ActionHandler {
    Summarize(SummarizeHandler),
    Rephrase(RephraseHandler),
    Translate(TranslateHandler),
    Discuss(DiscussHandler),
    Highlight(HighlightHandler),
}

impl ActionHandler {
    pub fn for_kind(kind: ActionKind, highlights: &Arc<Mutex<HighlightState>>, chat_max_turns: usize) -> Self {
        match kind {
            ActionKind::Summarize => ActionHandler::Summarize(SummarizeHandler::new()),
            ActionKind::Rephrase => ActionHandler::Rephrase(RephraseHandler::new()),
            ActionKind::Translate => ActionHandler::Translate(TranslateHandler::new()),
            ActionKind::Discuss => ActionHandler::Discuss(DiscussHandler::new(chat_max_turns)),
            ActionKind::Highlight => ActionHandler::Highlight(HighlightHandler::new(Arc::clone(highlights))),
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> HandlerPhase {
        match self {
            ActionHandler::Summarize(h) => h.phase(),
            ActionHandler::Rephrase(h) => h.phase(),
            ActionHandler::Translate(h) => h.phase(),
            ActionHandler::Discuss(h) => h.phase(),
            ActionHandler::Highlight(h) => h.phase(),
        }
    }

    /// Result of the last completed run.
    pub fn result(&self) -> Option<&OperationResult> {
        match self {
            ActionHandler::Summarize(h) => h.result(),
            ActionHandler::Rephrase(h) => h.result(),
            ActionHandler::Translate(h) => h.result(),
            ActionHandler::Discuss(h) => h.result(),
            ActionHandler::Highlight(h) => h.result(),
        }
    }

    pub async fn handle(&mut self, text: &str, ctx: &HandlerContext) -> Outcome {
        match self {
            ActionHandler::Summarize(h) => h.handle(text, ctx).await,
            ActionHandler::Rephrase(h) => h.handle(text, ctx).await,
            ActionHandler::Translate(h) => h.handle(text, ctx).await,
            ActionHandler::Discuss(h) => h.handle(text, ctx).await,
            ActionHandler::Highlight(h) => h.handle(text, ctx).await,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::panels::ResultView;

    #[tokio::test]
    async fn empty_selection_is_rejected_for_every_action() {
        let highlights = Arc::new(Mutex::new(HighlightState::default()));
        for kind in ActionKind::ALL {
            let f = fixture(kind, vec![Script::Stream(vec!["never"])]);
            let mut handler = ActionHandler::for_kind(kind, &highlights, 10);
            let outcome = handler.handle("   ", &f.ctx).await;
            assert!(matches!(outcome, Outcome::Rejected(ValidationError::EmptySelection)));
            assert_eq!(f.client.call_count(), 0, "{kind:?} made a request");
            assert_eq!(f.history_len(), 0);
            let state = f.panel.lock().unwrap();
            assert_eq!(state.result, ResultView::Error("No text selected. Select some text first.".into()));
            assert_eq!(handler.phase(), HandlerPhase::Idle);
        }
    }

    #[tokio::test]
    async fn missing_client_shows_configure_affordance() {
        let f = fixture_with(ActionKind::Summarize, None);
        let mut handler = SummarizeHandler::new();
        let outcome = handler.handle("Some text to summarize.", &f.ctx).await;
        assert!(matches!(outcome, Outcome::NotConfigured));
        assert!(matches!(f.panel.lock().unwrap().result, ResultView::NotConfigured(_)));
    }

    #[tokio::test]
    async fn service_errors_render_localized_message_and_skip_history() {
        let mut f = fixture(
            ActionKind::Summarize,
            vec![Script::Fail(ServiceError::RateLimited("quota exceeded".into()))],
        );
        let mut handler = SummarizeHandler::new();
        let outcome = handler.handle("Some text.", &f.ctx).await;
        assert!(matches!(outcome, Outcome::Failed(ServiceError::RateLimited(_))));
        let state = f.panel.lock().unwrap();
        assert_eq!(
            state.result,
            ResultView::Error("Too many requests, try again shortly: quota exceeded".into())
        );
        assert!(!state.button.disabled);
        assert_eq!(state.button.label, "Summarize");
        drop(state);
        assert_eq!(f.history_len(), 0);
        assert!(f.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancelled_operation_writes_nothing() {
        let f = fixture(ActionKind::Rephrase, vec![Script::Stream(vec!["late"])]);
        f.ctx.cancel.cancel();
        let mut handler = RephraseHandler::new();
        let outcome = handler.handle("Some text.", &f.ctx).await;
        assert!(matches!(outcome, Outcome::Cancelled));
        assert_eq!(f.history_len(), 0);
    }

    #[tokio::test]
    async fn history_failure_does_not_fail_the_operation() {
        let mut f = fixture(ActionKind::Summarize, vec![Script::Stream(vec!["Short."])]);
        f.ctx.history = Arc::new(crate::history::MemoryHistoryStore::read_only());
        let mut handler = SummarizeHandler::new();
        let outcome = handler.handle("A much longer original text.", &f.ctx).await;
        assert!(outcome.is_completed());
        assert_eq!(f.panel.lock().unwrap().result_text(), Some("Short."));
    }
}
