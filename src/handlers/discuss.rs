use crate::history::HistoryRecord;
use crate::models::{ActionKind, ChatRole, ChatThread, DerivedMetrics, OperationResult};
use crate::panels::TranscriptLine;
use crate::prompts::discuss_prompt;

use super::{HandlerContext, HandlerPhase, Outcome, finish};

/// Selected-text preamble of the first user turn: the first line of a
/// multi-line turn, otherwise everything up to and including the first `?`.
pub fn extract_selection_preamble(first_turn: &str) -> String {
    let trimmed = first_turn.trim();
    if let Some((first, _)) = trimmed.split_once('\n') {
        return first.trim().to_string();
    }
    match trimmed.find('?') {
        Some(idx) => trimmed[..=idx].trim().to_string(),
        None => trimmed.to_string(),
    }
}

/// Plain-text transcript persisted to history.
pub fn transcript(thread: &ChatThread) -> String {
    thread
        .turns()
        .iter()
        .map(|turn| {
            let speaker = match turn.role {
                ChatRole::User => "User",
                ChatRole::Assistant => "Assistant",
            };
            format!("{speaker}: {}", turn.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Debug)]
pub struct DiscussHandler {
    phase: HandlerPhase,
    thread: ChatThread,
    /// Selection the current thread is about; a new selection starts a new thread.
    topic: Option<String>,
    /// History prompt taken from the opening turn. Outlives trimming of that turn.
    preamble: Option<String>,
    result: Option<OperationResult>,
}

impl DiscussHandler {
    pub fn new(max_turns: usize) -> Self {
        Self {
            phase: HandlerPhase::Idle,
            thread: ChatThread::new(max_turns),
            topic: None,
            preamble: None,
            result: None,
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> HandlerPhase {
        self.phase
    }

    #[cfg(test)]
    pub fn thread(&self) -> &ChatThread {
        &self.thread
    }

    pub fn result(&self) -> Option<&OperationResult> {
        self.result.as_ref()
    }

    pub async fn handle(&mut self, text: &str, ctx: &HandlerContext) -> Outcome {
        let outcome = self.run(text.trim(), ctx).await;
        if !outcome.is_completed() {
            self.thread.discard_streaming();
        }
        let lines = transcript_lines(&self.thread);
        ctx.panel.update(|p| p.transcript = lines);
        finish(&mut self.phase, &ctx.panel, outcome)
    }

    async fn run(&mut self, text: &str, ctx: &HandlerContext) -> Outcome {
        let client = match ctx.preflight(text) {
            Ok(client) => client,
            Err(outcome) => return outcome,
        };
        if self.topic.as_deref() != Some(text) {
            self.thread.clear();
            self.topic = Some(text.to_string());
            self.preamble = None;
        }

        let (question, lang) = ctx
            .panel
            .read(|p| (p.controls.question.trim().to_string(), p.controls.output_language.clone()))
            .unwrap_or_else(|| (String::new(), ctx.locale.lang().to_string()));
        let question = if question.is_empty() { ctx.locale.t("discuss.default_question") } else { question };
        let passage = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let turn = if self.thread.is_empty() {
            format!("{passage}\n{question}")
        } else {
            question
        };
        if self.preamble.is_none() {
            self.preamble = Some(extract_selection_preamble(&turn));
        }

        self.result = None;
        self.phase = HandlerPhase::Loading;
        self.thread.push_user(&turn);
        self.thread.push_assistant_placeholder();
        let lines = transcript_lines(&self.thread);
        ctx.panel.update(|p| {
            p.begin();
            p.controls.question.clear();
            p.transcript = lines;
        });

        let prompt = discuss_prompt(&passage, self.thread.turns(), &lang);
        let mut result = OperationResult::start(&turn);
        let phase = &mut self.phase;
        let thread = &mut self.thread;
        let panel = ctx.panel.clone();
        let streamed = ctx
            .stream_into(client.as_ref(), &prompt, &ctx.generation, &mut result, |r| {
                *phase = HandlerPhase::Streaming;
                let delta = &r.result_text[streamed_len(thread)..];
                thread.append_to_assistant(delta);
                let lines = transcript_lines(thread);
                panel.update(|p| p.transcript = lines);
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

        self.thread.finish_assistant();
        let turns = self.thread.turns().len();
        result.finish(DerivedMetrics::Discussion { turns });
        self.phase = HandlerPhase::Done;
        ctx.panel.update(|p| p.show_final(&result.result_text));

        let preamble = self.preamble.clone().unwrap_or(passage);
        let record = HistoryRecord::new(
            ActionKind::Discuss,
            &preamble,
            &transcript(&self.thread),
            result.metrics.to_metadata(),
        );
        self.result = Some(result);
        ctx.complete(record)
    }
}

/// Bytes of the streaming assistant turn received so far.
fn streamed_len(thread: &ChatThread) -> usize {
    thread
        .turns()
        .last()
        .filter(|t| t.role == ChatRole::Assistant && t.streaming)
        .map_or(0, |t| t.content.len())
}

fn transcript_lines(thread: &ChatThread) -> Vec<TranscriptLine> {
    thread
        .turns()
        .iter()
        .map(|t| TranscriptLine {
            role: t.role,
            content: t.content.clone(),
            streaming: t.streaming,
        })
        .collect()
}
