//! Integration router: resolves clicked ids to actions and guards single-flight dispatch.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::handlers::{ActionHandler, HandlerContext, Outcome};
use crate::history::HistoryStore;
use crate::i18n::Locale;
use crate::models::{ActionKind, HighlightState, OperationResult, PopupEvent};
use crate::network::{GenerationClient, GenerationOptions};
use crate::panels::OPEN_SETTINGS_ID;
use crate::popup::{CLOSE_ID, PopupShell};

/// Builds a client from the current credential, or `None` if there is none yet.
pub type ClientFactory = Arc<dyn Fn() -> Option<Arc<dyn GenerationClient>> + Send + Sync>;

#[derive(Debug)]
pub enum ClickOutcome {
    /// A handler task was spawned.
    Dispatched(JoinHandle<Outcome>),
    /// Another operation is in flight; nothing happened.
    Busy,
    /// No credential; the configure affordance was rendered.
    ConfigureShown,
    OpenSettings,
    /// Popup chrome or a panel control handled the click.
    Shell,
    Unhandled,
}

/// Clears the busy flag when dropped, including when the handler task panics.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct RouterDeps {
    pub generation: GenerationOptions,
    pub locale: Arc<Locale>,
    pub history: Arc<dyn HistoryStore>,
    pub events: Option<UnboundedSender<PopupEvent>>,
    pub highlights: Arc<Mutex<HighlightState>>,
    pub chat_max_turns: usize,
}

pub struct IntegrationRouter {
    busy: Arc<AtomicBool>,
    client: RwLock<Option<Arc<dyn GenerationClient>>>,
    factory: ClientFactory,
    handlers: Arc<tokio::sync::Mutex<BTreeMap<ActionKind, ActionHandler>>>,
    generation: GenerationOptions,
    locale: Arc<Locale>,
    history: Arc<dyn HistoryStore>,
    events: Option<UnboundedSender<PopupEvent>>,
    runtime: Handle,
}

impl IntegrationRouter {
    pub fn new(deps: RouterDeps, factory: ClientFactory, runtime: Handle) -> Self {
        let handlers = ActionKind::ALL
            .into_iter()
            .map(|kind| (kind, ActionHandler::for_kind(kind, &deps.highlights, deps.chat_max_turns)))
            .collect();
        let client = factory();
        Self {
            busy: Arc::new(AtomicBool::new(false)),
            client: RwLock::new(client),
            factory,
            handlers: Arc::new(tokio::sync::Mutex::new(handlers)),
            generation: deps.generation,
            locale: deps.locale,
            history: deps.history,
            events: deps.events,
            runtime,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn is_configured(&self) -> bool {
        self.client.read().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// Drops the cached client so the next dispatch rebuilds it.
    pub fn reset_client(&self) {
        *self.client.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn resolve_client(&self) -> Option<Arc<dyn GenerationClient>> {
        if let Some(client) = self.client.read().unwrap_or_else(|e| e.into_inner()).clone() {
            return Some(client);
        }
        let fresh = (self.factory)();
        if let Some(client) = &fresh {
            info!("generation client initialised");
            *self.client.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(client));
        }
        fresh
    }

    /// Delegated click entry point for everything inside the popup.
    /// While an operation runs only close gets through; it cancels the operation.
    pub fn on_click(&self, target_id: &str, popup: &mut PopupShell) -> ClickOutcome {
        if self.is_busy() && target_id != CLOSE_ID {
            debug!(id = target_id, "ignoring click while busy");
            return ClickOutcome::Busy;
        }
        if target_id == OPEN_SETTINGS_ID {
            if let Some(events) = &self.events {
                let _ = events.send(PopupEvent::OpenSettings);
            }
            return ClickOutcome::OpenSettings;
        }
        let Some(kind) = ActionKind::from_button_id(target_id) else {
            return if popup.handle_click(target_id) { ClickOutcome::Shell } else { ClickOutcome::Unhandled };
        };
        let text = popup.selection().map(|s| s.text().to_string()).unwrap_or_default();
        self.dispatch(kind, &text, popup)
    }

    /// Runs `kind` on `text` unless another operation is in flight.
    pub fn dispatch(&self, kind: ActionKind, text: &str, popup: &PopupShell) -> ClickOutcome {
        if self.busy.swap(true, Ordering::SeqCst) {
            debug!(action = kind.id(), "ignoring click while busy");
            return ClickOutcome::Busy;
        }
        let guard = BusyGuard(Arc::clone(&self.busy));
        let panel = popup.panel(kind);

        let Some(client) = self.resolve_client() else {
            panel.update(|p| p.show_not_configured());
            return ClickOutcome::ConfigureShown;
        };

        info!(action = kind.id(), "dispatching action");
        let ctx = HandlerContext {
            client: Some(client),
            generation: self.generation.clone(),
            locale: Arc::clone(&self.locale),
            history: Arc::clone(&self.history),
            events: self.events.clone(),
            panel,
            cancel: popup.operation_token(),
        };
        let handlers = Arc::clone(&self.handlers);
        let text = text.to_string();
        let task = self.runtime.spawn(async move {
            let _guard = guard;
            let mut handlers = handlers.lock().await;
            let Some(handler) = handlers.get_mut(&kind) else {
                return Outcome::Cancelled;
            };
            let outcome = handler.handle(&text, &ctx).await;
            log_outcome(kind, &outcome, handler.result());
            outcome
        });
        ClickOutcome::Dispatched(task)
    }
}

fn log_outcome(kind: ActionKind, outcome: &Outcome, result: Option<&OperationResult>) {
    let action = kind.id();
    match outcome {
        Outcome::Completed(record) => {
            info!(action, record = %record.id, metrics = ?result.map(|r| &r.metrics), "action completed")
        }
        Outcome::Rejected(e) => debug!(action, "action rejected: {e}"),
        Outcome::NotConfigured => debug!(action, "no generation client"),
        Outcome::Failed(e) => warn!(action, "action failed: {e}"),
        Outcome::Cancelled => debug!(action, "action cancelled"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use tokio::sync::Notify;

    use super::*;
    use crate::handlers::testing::{Script, ScriptedClient};
    use crate::history::{HistoryFilter, MemoryHistoryStore};
    use crate::models::{PopupMode, Rect, Selection, Viewport};
    use crate::panels::ResultView;
    use crate::popup::{EXPAND_ID, ShellOptions};

    struct Harness {
        router: IntegrationRouter,
        popup: PopupShell,
        history: Arc<MemoryHistoryStore>,
        events: tokio::sync::mpsc::UnboundedReceiver<PopupEvent>,
    }

    fn harness(factory: ClientFactory) -> Harness {
        let locale = Arc::new(Locale::default());
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let history = Arc::new(MemoryHistoryStore::new());
        let router = IntegrationRouter::new(
            RouterDeps {
                generation: GenerationOptions::default(),
                locale: Arc::clone(&locale),
                history: history.clone(),
                events: Some(tx.clone()),
                highlights: Arc::new(Mutex::new(HighlightState::default())),
                chat_max_turns: 10,
            },
            factory,
            Handle::current(),
        );
        let mut popup = PopupShell::new(locale, ShellOptions::default(), Viewport::new(120.0, 40.0), Some(tx));
        popup.show(Selection::new("The quick brown fox jumps.", Rect::new(2.0, 2.0, 26.0, 1.0)).unwrap());
        Harness { router, popup, history, events: rx }
    }

    fn fixed(client: Arc<ScriptedClient>) -> ClientFactory {
        Arc::new(move || Some(client.clone() as Arc<dyn GenerationClient>))
    }

    #[tokio::test]
    async fn second_click_while_busy_is_a_no_op() {
        let gate = Arc::new(Notify::new());
        let client = Arc::new(
            ScriptedClient::new(vec![Script::Stream(vec!["Short."]), Script::Stream(vec!["Again."])])
                .gated(Arc::clone(&gate)),
        );
        let mut h = harness(fixed(Arc::clone(&client)));

        let ClickOutcome::Dispatched(first) = h.router.on_click("summarize-btn", &mut h.popup) else {
            panic!("first click should dispatch");
        };
        assert!(h.router.is_busy());
        assert!(matches!(h.router.on_click("rephrase-btn", &mut h.popup), ClickOutcome::Busy));
        assert_eq!(
            h.popup.panel(ActionKind::Rephrase).read(|p| p.result.clone()),
            Some(ResultView::Empty)
        );

        gate.notify_one();
        assert!(first.await.unwrap().is_completed());
        assert!(!h.router.is_busy());
        assert_eq!(client.call_count(), 1);
        assert_eq!(h.history.list(&HistoryFilter::default()).unwrap().len(), 1);

        gate.notify_one();
        let ClickOutcome::Dispatched(next) = h.router.on_click("rephrase-btn", &mut h.popup) else {
            panic!("click after completion should dispatch");
        };
        assert!(next.await.unwrap().is_completed());
    }

    #[tokio::test]
    async fn lazily_initialises_client_once_credentials_appear() {
        let configured = Arc::new(AtomicBool::new(false));
        let client = Arc::new(ScriptedClient::new(vec![Script::Stream(vec!["Done."])]));
        let factory: ClientFactory = {
            let configured = Arc::clone(&configured);
            let client = Arc::clone(&client);
            Arc::new(move || {
                configured
                    .load(Ordering::SeqCst)
                    .then(|| client.clone() as Arc<dyn GenerationClient>)
            })
        };
        let mut h = harness(factory);
        assert!(!h.router.is_configured());

        assert!(matches!(h.router.on_click("summarize-btn", &mut h.popup), ClickOutcome::ConfigureShown));
        assert!(!h.router.is_busy());
        let panel = h.popup.panel(ActionKind::Summarize);
        assert!(matches!(panel.read(|p| p.result.clone()), Some(ResultView::NotConfigured(_))));

        configured.store(true, Ordering::SeqCst);
        let ClickOutcome::Dispatched(task) = h.router.on_click("summarize-btn", &mut h.popup) else {
            panic!("should dispatch once configured");
        };
        assert!(task.await.unwrap().is_completed());
        assert!(h.router.is_configured());
    }

    #[tokio::test]
    async fn settings_affordance_and_shell_clicks() {
        let mut h = harness(Arc::new(|| None));
        assert!(matches!(h.router.on_click(OPEN_SETTINGS_ID, &mut h.popup), ClickOutcome::OpenSettings));
        assert!(matches!(h.events.try_recv(), Ok(PopupEvent::OpenSettings)));
        assert!(matches!(h.router.on_click("mini-tab-discuss", &mut h.popup), ClickOutcome::Shell));
        assert!(matches!(h.router.on_click("no-such-id", &mut h.popup), ClickOutcome::Unhandled));
    }

    #[tokio::test]
    async fn hiding_cancels_in_flight_operation() {
        let gate = Arc::new(Notify::new());
        let client = Arc::new(ScriptedClient::new(vec![Script::Stream(vec!["late"])]).gated(Arc::clone(&gate)));
        let mut h = harness(fixed(client));
        let ClickOutcome::Dispatched(task) = h.router.on_click("translate-btn", &mut h.popup) else {
            panic!("should dispatch");
        };
        tokio::task::yield_now().await;
        h.popup.destroy();
        assert!(matches!(task.await.unwrap(), Outcome::Cancelled));
        assert!(!h.router.is_busy());
        assert!(h.history.list(&HistoryFilter::default()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn busy_blocks_shell_clicks_except_close() {
        let gate = Arc::new(Notify::new());
        let client = Arc::new(ScriptedClient::new(vec![Script::Stream(vec!["late"])]).gated(Arc::clone(&gate)));
        let mut h = harness(fixed(client));
        let ClickOutcome::Dispatched(task) = h.router.on_click("summarize-btn", &mut h.popup) else {
            panic!("should dispatch");
        };

        assert!(matches!(h.router.on_click("mini-tab-discuss", &mut h.popup), ClickOutcome::Busy));
        assert_eq!(h.popup.active_kind(), Some(ActionKind::Summarize));
        assert!(matches!(h.router.on_click(EXPAND_ID, &mut h.popup), ClickOutcome::Busy));
        assert_eq!(h.popup.mode(), PopupMode::Mini);
        assert!(matches!(h.router.on_click(OPEN_SETTINGS_ID, &mut h.popup), ClickOutcome::Busy));

        assert!(matches!(h.router.on_click(CLOSE_ID, &mut h.popup), ClickOutcome::Shell));
        assert!(!h.popup.is_visible());
        assert!(matches!(task.await.unwrap(), Outcome::Cancelled));
        assert!(!h.router.is_busy());
    }

    #[test]
    fn busy_guard_resets_flag_on_drop() {
        let flag = Arc::new(AtomicBool::new(true));
        drop(BusyGuard(Arc::clone(&flag)));
        assert!(!flag.load(Ordering::SeqCst));
    }
}
