//! Wires the document, the popup, the router and the stores together.
//!
//! `input` translates terminal events into the methods here; `main` drives
//! [`App::tick`] and [`App::draw`] from its loop.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use arboard::Clipboard;
use ratatui::Frame;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use crate::config;
use crate::history::{HistoryRecord, HistoryStore};
use crate::i18n::Locale;
use crate::messaging::{self, Envelope, HostChannel, HostCommand, HostResponse};
use crate::models::{ActionKind, HighlightState, Point, PopupEvent, Rect, Selection, Viewport};
use crate::network::GenerationOptions;
use crate::page::{CursorMove, Page};
use crate::panels::SWAP_LANGUAGES_ID;
use crate::popup::{ListenerKind, PopupShell, ShellOptions, CLOSE_ID, DRAG_HANDLE_ID, EXPAND_ID, HEADER_ID, PIN_ID};
use crate::router::{ClickOutcome, ClientFactory, IntegrationRouter, RouterDeps};
use crate::selection::{capture_selection, Debouncer};
use crate::tabs::NavKey;
use crate::theme::Theme;
use crate::ui::{self, HitMap};
use crate::view::View;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Page,
    Popup,
}

pub struct AppOptions {
    pub locale: Arc<Locale>,
    pub shell: ShellOptions,
    pub generation: GenerationOptions,
    pub min_selection_length: usize,
    pub chat_max_turns: usize,
}

pub struct App {
    page: Page,
    popup: PopupShell,
    router: IntegrationRouter,
    history: Arc<dyn HistoryStore>,
    highlights: Arc<Mutex<HighlightState>>,
    locale: Arc<Locale>,
    theme: Theme,
    events: UnboundedReceiver<PopupEvent>,
    host: HostChannel,
    commands: UnboundedReceiver<Envelope>,
    replies: Vec<oneshot::Receiver<HostResponse>>,
    debouncer: Debouncer,
    min_selection_length: usize,
    last_result: Option<HistoryRecord>,
    status: Option<String>,
    focus: Focus,
    key_input: Option<String>,
    hits: HitMap,
    screen: ratatui::layout::Rect,
    result_scroll: u16,
    quit: bool,
}

impl App {
    pub fn new(
        page: Page,
        options: AppOptions,
        history: Arc<dyn HistoryStore>,
        factory: ClientFactory,
        runtime: Handle,
    ) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (host, commands) = HostChannel::new();
        let highlights = Arc::new(Mutex::new(HighlightState::default()));
        let router = IntegrationRouter::new(
            RouterDeps {
                generation: options.generation,
                locale: Arc::clone(&options.locale),
                history: Arc::clone(&history),
                events: Some(events_tx.clone()),
                highlights: Arc::clone(&highlights),
                chat_max_turns: options.chat_max_turns,
            },
            factory,
            runtime,
        );
        let popup = PopupShell::new(
            Arc::clone(&options.locale),
            options.shell,
            Viewport::new(80.0, 23.0),
            Some(events_tx),
        );
        Self {
            page,
            popup,
            router,
            history,
            highlights,
            locale: options.locale,
            theme: Theme::default(),
            events,
            host,
            commands,
            replies: Vec::new(),
            debouncer: Debouncer::default(),
            min_selection_length: options.min_selection_length,
            last_result: None,
            status: None,
            focus: Focus::Page,
            key_input: None,
            hits: HitMap::default(),
            screen: ratatui::layout::Rect::default(),
            result_scroll: 0,
            quit: false,
        }
    }

    #[cfg(test)]
    pub fn host_channel(&self) -> HostChannel {
        self.host.clone()
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    pub fn quit(&mut self) {
        self.quit = true;
        self.popup.destroy();
    }

    pub fn focus(&self) -> Focus {
        self.focus
    }

    #[cfg(test)]
    pub fn popup(&self) -> &PopupShell {
        &self.popup
    }

    #[cfg(test)]
    pub fn last_result(&self) -> Option<&HistoryRecord> {
        self.last_result.as_ref()
    }

    #[cfg(test)]
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn is_prompting_key(&self) -> bool {
        self.key_input.is_some()
    }

    /// Advances timers and drains everything the background tasks produced.
    pub fn tick(&mut self, now: Instant) {
        if self.debouncer.poll(now) {
            self.selection_settled(now);
        }
        while let Ok(event) = self.events.try_recv() {
            self.on_popup_event(event);
        }
        while let Ok((command, reply)) = self.commands.try_recv() {
            let response = self.run_host_command(command);
            messaging::respond(reply, response);
        }
        let mut failed = None;
        self.replies.retain_mut(|rx| match rx.try_recv() {
            Ok(response) => {
                if let Some(error) = response.error {
                    failed = Some(error);
                }
                false
            }
            Err(TryRecvError::Empty) => true,
            Err(TryRecvError::Closed) => false,
        });
        if failed.is_some() {
            self.status = failed;
        }
    }

    fn selection_settled(&mut self, now: Instant) {
        match capture_selection(&self.page, self.min_selection_length) {
            Some(selection) => {
                if self.popup.recently_closed(now) {
                    debug!("selection right after close, not reopening");
                    return;
                }
                self.popup.show(selection);
                self.result_scroll = 0;
            }
            None if self.popup.is_visible() && !self.popup.is_pinned() => self.popup.hide(),
            None => {}
        }
    }

    fn on_popup_event(&mut self, event: PopupEvent) {
        match event {
            PopupEvent::TabChanged { tab_id, .. } => {
                debug!(tab = %tab_id, "tab changed");
                self.result_scroll = 0;
            }
            PopupEvent::PopupHidden => self.focus = Focus::Page,
            PopupEvent::ResultReady(record) => {
                debug!(action = record.kind.id(), "result ready");
                self.last_result = Some(record);
            }
            PopupEvent::OpenSettings => self.open_key_prompt(),
        }
    }

    /// Shows the popup for the command's text and runs the action.
    fn run_host_command(&mut self, command: HostCommand) -> HostResponse {
        if self.router.is_busy() {
            debug!(action = command.action.id(), "host command while busy");
            return HostResponse::err(self.locale.t("status.busy"));
        }
        let text = command
            .selected_text
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.page.selected_text());
        let area = self.page.area();
        let anchor = self
            .page
            .selection_rects()
            .last()
            .copied()
            .unwrap_or_else(|| Rect::new(area.left, area.top, 1.0, 1.0));
        let Some(selection) = text.as_deref().and_then(|t| Selection::new(t, anchor)) else {
            return HostResponse::err(self.locale.t("error.no_text"));
        };
        let text = selection.text().to_string();

        self.popup.show(selection);
        if !self.popup.select_tab(command.action) {
            self.popup.switch_to_full_mode();
            self.popup.select_tab(command.action);
        }
        info!(action = command.action.id(), "host command");
        match self.router.dispatch(command.action, &text, &self.popup) {
            ClickOutcome::Dispatched(_) => {
                self.result_scroll = 0;
                HostResponse::ok()
            }
            ClickOutcome::Busy => HostResponse::err(self.locale.t("status.busy")),
            ClickOutcome::ConfigureShown => HostResponse::err(self.locale.t("error.not_configured")),
            other => HostResponse::err(format!("{other:?}")),
        }
    }

    /// Number keys: run an action on the page selection.
    pub fn send_host_command(&mut self, action: ActionKind) {
        self.queue_command(HostCommand { action, selected_text: None });
    }

    /// Queues a command as if it came from outside the popup.
    pub fn queue_command(&mut self, command: HostCommand) {
        match self.host.send(command) {
            Ok(rx) => self.replies.push(rx),
            Err(e) if e.is_transient() => debug!("host command dropped: {e}"),
            Err(e) => warn!("host command failed: {e}"),
        }
    }

    pub fn selection_changed(&mut self, now: Instant) {
        self.debouncer.schedule(now);
    }

    pub fn move_cursor(&mut self, movement: CursorMove, extend: bool) {
        self.page.move_cursor(movement, extend);
        self.selection_changed(Instant::now());
    }

    pub fn clear_selection(&mut self) {
        self.page.clear_selection();
        self.highlights.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.selection_changed(Instant::now());
    }

    pub fn scroll_page(&mut self, delta: i64) {
        if !self.page.scroll_by(delta) {
            return;
        }
        if self.popup.is_visible() && self.popup.listeners().listens_to(ListenerKind::Scroll) {
            if let Some(anchor) = self.page.selection_rects().last().copied() {
                self.popup.update_position(anchor);
            }
        }
    }

    pub fn resize(&mut self, width: u16, height: u16) {
        self.screen = ratatui::layout::Rect::new(0, 0, width, height);
        let (page_area, _) = ui::screen_layout(self.screen);
        let inner = ui::page_block(&self.page, true, &self.theme).inner(page_area);
        self.page.set_area(Rect::new(
            f64::from(inner.x),
            f64::from(inner.y),
            f64::from(inner.width),
            f64::from(inner.height),
        ));
        if !self.popup.is_visible() || self.popup.listeners().listens_to(ListenerKind::Resize) {
            self.popup.update_viewport(Viewport::new(f64::from(width), f64::from(page_area.bottom())));
        }
    }

    pub fn mouse_down(&mut self, x: u16, y: u16) {
        let point = Point::new(f64::from(x), f64::from(y));
        if self.popup.is_visible() {
            if let Some(id) = self.hits.hit(x, y).map(str::to_string) {
                self.focus = Focus::Popup;
                let draggable = self.popup.listeners().listens_to(ListenerKind::Drag);
                if draggable && (id == DRAG_HANDLE_ID || id == HEADER_ID) {
                    self.popup.begin_drag(point);
                } else {
                    self.click(&id);
                }
                return;
            }
        }
        self.focus = Focus::Page;
        self.page.pointer_down(point);
    }

    pub fn mouse_drag(&mut self, x: u16, y: u16) {
        let point = Point::new(f64::from(x), f64::from(y));
        if self.popup.is_dragging() {
            self.popup.drag_to(point);
        } else if self.page.is_pointer_down() {
            self.page.pointer_drag(point);
        }
    }

    pub fn mouse_up(&mut self, x: u16, y: u16) {
        let point = Point::new(f64::from(x), f64::from(y));
        if self.popup.is_dragging() {
            self.popup.end_drag();
        } else if self.page.is_pointer_down() {
            self.page.pointer_up(point);
            self.selection_changed(Instant::now());
        }
    }

    fn click(&mut self, id: &str) {
        match self.router.on_click(id, &mut self.popup) {
            ClickOutcome::Dispatched(_) => self.result_scroll = 0,
            ClickOutcome::Busy => self.status = Some(self.locale.t("status.busy")),
            ClickOutcome::Unhandled => debug!(id, "click not handled"),
            _ => {}
        }
    }

    pub fn toggle_focus(&mut self) {
        self.focus = match self.focus {
            Focus::Page if self.popup.is_visible() => Focus::Popup,
            _ => Focus::Page,
        };
        if self.focus == Focus::Page {
            self.popup.blur_tabs();
        }
    }

    pub fn run_active(&mut self) {
        if let Some(kind) = self.popup.active_kind() {
            self.click(kind.button_id());
        }
    }

    pub fn cycle_option(&mut self) {
        let control = self
            .popup
            .active_kind()
            .and_then(|kind| self.popup.panel(kind).read(|p| p.primary_control()).flatten());
        if let Some(id) = control {
            self.click(id);
        }
    }

    pub fn swap_languages(&mut self) {
        self.click(SWAP_LANGUAGES_ID);
    }

    pub fn expand(&mut self) {
        self.click(EXPAND_ID);
    }

    pub fn toggle_pin(&mut self) {
        self.click(PIN_ID);
    }

    pub fn close_popup(&mut self) {
        self.click(CLOSE_ID);
        self.focus = Focus::Page;
    }

    pub fn navigate_tabs(&mut self, key: NavKey) {
        if self.router.is_busy() {
            self.status = Some(self.locale.t("status.busy"));
            return;
        }
        self.popup.handle_tab_key(key);
    }

    pub fn scroll_result(&mut self, delta: i16) {
        self.result_scroll = self.result_scroll.saturating_add_signed(delta);
    }

    pub fn is_discuss_active(&self) -> bool {
        self.popup.active_kind() == Some(ActionKind::Discuss)
    }

    /// Edits the discuss question; `None` deletes the last character.
    pub fn edit_question(&mut self, ch: Option<char>) {
        self.popup.panel(ActionKind::Discuss).update(|p| match ch {
            Some(c) => p.controls.question.push(c),
            None => {
                p.controls.question.pop();
            }
        });
    }

    pub fn copy_result(&mut self) {
        let text = self
            .popup
            .active_kind()
            .and_then(|kind| self.popup.panel(kind).read(|p| p.result_text().map(str::to_string)).flatten());
        let Some(text) = text else {
            return;
        };
        match Clipboard::new().and_then(|mut cb| cb.set_text(text)) {
            Ok(()) => self.status = Some(self.locale.t("status.copied")),
            Err(e) => warn!("clipboard unavailable: {e}"),
        }
    }

    pub fn save_favorite(&mut self) {
        let Some(record) = &self.last_result else {
            self.status = Some(self.locale.t("status.nothing_to_save"));
            return;
        };
        match self.history.add_favorite(&record.to_favorite()) {
            Ok(true) => self.status = Some(self.locale.t("status.favorite_saved")),
            Ok(false) => self.status = Some(self.locale.t("status.favorite_duplicate")),
            Err(e) => warn!("could not save favorite: {e}"),
        }
    }

    pub fn open_key_prompt(&mut self) {
        self.key_input = Some(String::new());
    }

    pub fn edit_key(&mut self, ch: Option<char>) {
        if let Some(input) = &mut self.key_input {
            match ch {
                Some(c) => input.push(c),
                None => {
                    input.pop();
                }
            }
        }
    }

    pub fn cancel_key_prompt(&mut self) {
        self.key_input = None;
    }

    pub fn submit_key(&mut self) {
        let Some(key) = self.key_input.take().filter(|k| !k.trim().is_empty()) else {
            return;
        };
        match config::save_api_key(&key) {
            Ok(()) => {
                self.router.reset_client();
                self.status = Some(self.locale.t("status.key_saved"));
            }
            Err(e) => {
                warn!("could not save API key: {e}");
                self.status = Some(e.to_string());
            }
        }
    }

    pub fn draw(&mut self, f: &mut Frame) {
        if f.area() != self.screen {
            self.resize(f.area().width, f.area().height);
        }
        let (page_area, footer) = ui::screen_layout(f.area());
        let sentences = self.highlights.lock().unwrap_or_else(|e| e.into_inner()).get().to_vec();
        let spans = self.page.highlight_spans(&sentences);
        ui::render_page(f, page_area, &self.page, &spans, self.focus == Focus::Page, &self.theme);

        self.hits = if self.popup.is_visible() {
            let area = ui::popup_area(self.popup.rect(), f.area());
            let tree = self.popup.render();
            ui::render_popup(f, area, &tree, self.focus == Focus::Popup, self.result_scroll, &self.theme)
        } else {
            HitMap::default()
        };

        let hint = match self.focus {
            Focus::Page => self.locale.t("footer.page"),
            Focus::Popup => self.locale.t("footer.popup"),
        };
        ui::render_footer(f, footer, &hint, self.status.as_deref(), &self.theme);

        if let Some(input) = &self.key_input {
            ui::render_key_prompt(f, &self.locale.t("prompt.api_key"), input, &self.theme);
        }
    }
}
