//! Popup shell: lifecycle, placement, mini/full modes, dragging and pinning.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::i18n::Locale;
use crate::models::{ActionKind, Point, PopupEvent, PopupMode, PopupState, Rect, Selection, Size, Viewport};
use crate::panels::{PanelControls, PanelHandle, PanelRef, PanelState};
use crate::tabs::{NavKey, TabController, TabSpec, TabTarget};
use crate::utils::{POPUP_MARGIN, anchored_position, clamp_to_viewport};
use crate::view::{Element, View};

pub const POPUP_ID: &str = "selectai-popup";
pub const DRAG_HANDLE_ID: &str = "popup-drag-handle";
pub const HEADER_ID: &str = "popup-header";
pub const EXPAND_ID: &str = "expand-btn";
pub const PIN_ID: &str = "pin-btn";
pub const CLOSE_ID: &str = "close-btn";

pub const MINI_SIZE: Size = Size { width: 48.0, height: 14.0 };
pub const FULL_SIZE: Size = Size { width: 66.0, height: 22.0 };

/// Page-level events the shell subscribes to while it is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ListenerKind {
    Scroll,
    Resize,
    VisualViewport,
    Keydown,
    Drag,
}

/// The set of page listeners owned by the shell. Detaching clears them all at once.
#[derive(Debug, Default)]
pub struct ListenerScope {
    attached: BTreeSet<ListenerKind>,
}

impl ListenerScope {
    pub fn attach(&mut self, kinds: &[ListenerKind]) {
        self.attached.extend(kinds.iter().copied());
    }

    pub fn detach_all(&mut self) {
        self.attached.clear();
    }

    pub fn listens_to(&self, kind: ListenerKind) -> bool {
        self.attached.contains(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.attached.is_empty()
    }
}

/// Owns the panels. Dropping it invalidates every outstanding `PanelRef`.
#[derive(Debug)]
struct ShadowHost {
    panels: BTreeMap<ActionKind, PanelHandle>,
}

#[derive(Debug, Clone, Copy)]
struct DragSession {
    pointer_start: Point,
    popup_start: Rect,
}

/// Values read from settings when panels and tabs are built.
#[derive(Debug, Clone)]
pub struct ShellOptions {
    pub mini_tabs: Vec<ActionKind>,
    pub output_language: String,
    pub target_language: String,
}

impl Default for ShellOptions {
    fn default() -> Self {
        Self {
            mini_tabs: ActionKind::STREAMING.to_vec(),
            output_language: "en".to_string(),
            target_language: "en".to_string(),
        }
    }
}

pub struct PopupShell {
    host: Option<ShadowHost>,
    state: PopupState,
    mini_tabs: Option<TabController>,
    full_tabs: Option<TabController>,
    selection: Option<Selection>,
    anchor: Option<Rect>,
    position: Point,
    viewport: Viewport,
    drag: Option<DragSession>,
    listeners: ListenerScope,
    options: ShellOptions,
    locale: Arc<Locale>,
    events: Option<UnboundedSender<PopupEvent>>,
    cancel: CancellationToken,
}

impl PopupShell {
    pub fn new(
        locale: Arc<Locale>,
        options: ShellOptions,
        viewport: Viewport,
        events: Option<UnboundedSender<PopupEvent>>,
    ) -> Self {
        Self {
            host: None,
            state: PopupState::default(),
            mini_tabs: None,
            full_tabs: None,
            selection: None,
            anchor: None,
            position: Point::default(),
            viewport,
            drag: None,
            listeners: ListenerScope::default(),
            options,
            locale,
            events,
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_visible(&self) -> bool {
        self.state.visible
    }

    #[cfg(test)]
    pub fn is_attached(&self) -> bool {
        self.host.is_some()
    }

    #[cfg(test)]
    pub fn state(&self) -> &PopupState {
        &self.state
    }

    #[cfg(test)]
    pub fn mode(&self) -> PopupMode {
        self.state.mode
    }

    pub fn is_pinned(&self) -> bool {
        self.state.pinned
    }

    pub fn is_dragging(&self) -> bool {
        self.state.dragging
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    #[cfg(test)]
    pub fn position(&self) -> Point {
        self.position
    }

    pub fn size(&self) -> Size {
        match self.state.mode {
            PopupMode::Mini => MINI_SIZE,
            PopupMode::Full => FULL_SIZE,
        }
    }

    pub fn rect(&self) -> Rect {
        Rect::at(self.position, self.size())
    }

    pub fn listeners(&self) -> &ListenerScope {
        &self.listeners
    }

    pub fn recently_closed(&self, now: Instant) -> bool {
        self.state.recently_closed(now)
    }

    /// Token cancelled when the popup hides; handed to each dispatched operation.
    pub fn operation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn panel(&self, kind: ActionKind) -> PanelRef {
        self.host
            .as_ref()
            .and_then(|h| h.panels.get(&kind))
            .map(PanelRef::new)
            .unwrap_or_else(PanelRef::detached)
    }

    fn tabs(&self) -> Option<&TabController> {
        match self.state.mode {
            PopupMode::Mini => self.mini_tabs.as_ref(),
            PopupMode::Full => self.full_tabs.as_ref(),
        }
    }

    fn tabs_mut(&mut self) -> Option<&mut TabController> {
        match self.state.mode {
            PopupMode::Mini => self.mini_tabs.as_mut(),
            PopupMode::Full => self.full_tabs.as_mut(),
        }
    }

    /// Action of the active tab.
    pub fn active_kind(&self) -> Option<ActionKind> {
        self.tabs().and_then(|t| ActionKind::from_id(&t.current_tab().id))
    }

    #[cfg(test)]
    pub fn tab_ids(&self) -> Vec<String> {
        self.tabs()
            .map(|t| t.tabs().iter().map(|s| s.id.clone()).collect())
            .unwrap_or_default()
    }

    fn build_host(&self) -> ShadowHost {
        let panels = ActionKind::ALL
            .into_iter()
            .map(|kind| {
                let controls = PanelControls::new(&self.options.output_language, &self.options.target_language);
                (kind, PanelState::new(kind, controls, Arc::clone(&self.locale)).handle())
            })
            .collect();
        ShadowHost { panels }
    }

    fn tab_spec(&self, kind: ActionKind) -> TabSpec {
        TabSpec::new(kind.id(), self.locale.t(&format!("tab.{}", kind.id()))).with_icon(kind.icon())
    }

    fn build_mini_tabs(&self) -> TabController {
        let mut kinds: Vec<ActionKind> = self
            .options
            .mini_tabs
            .iter()
            .copied()
            .filter(|k| ActionKind::STREAMING.contains(k))
            .collect();
        if kinds.is_empty() {
            kinds = ActionKind::STREAMING.to_vec();
        }
        let specs = kinds.into_iter().map(|k| self.tab_spec(k)).collect();
        TabController::new("mini", specs, self.events.clone()).compact(true)
    }

    fn build_full_tabs(&self) -> TabController {
        let specs = ActionKind::ALL.into_iter().map(|k| self.tab_spec(k)).collect();
        TabController::new("full", specs, self.events.clone())
    }

    fn attach_listeners(&mut self) {
        let mut kinds = vec![
            ListenerKind::Scroll,
            ListenerKind::Resize,
            ListenerKind::VisualViewport,
            ListenerKind::Keydown,
        ];
        if self.state.mode == PopupMode::Full {
            kinds.push(ListenerKind::Drag);
        }
        self.listeners.attach(&kinds);
    }

    fn layout_tabs(&mut self) {
        let rect = self.rect();
        let container = Rect::new(rect.left + 1.0, rect.top + 2.0, rect.width - 2.0, 1.0);
        if let Some(tabs) = self.tabs_mut() {
            tabs.layout(container);
        }
    }

    /// Shows the popup for a selection, building the host and mini tabs on first use.
    pub fn show(&mut self, selection: Selection) {
        if self.host.is_none() {
            self.host = Some(self.build_host());
            debug!("popup host created");
        }
        if self.state.mode == PopupMode::Mini && self.mini_tabs.is_none() {
            self.mini_tabs = Some(self.build_mini_tabs());
        }
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        if self.listeners.is_empty() {
            self.attach_listeners();
        }

        if let Some(host) = &self.host {
            for panel in host.panels.values() {
                panel.lock().unwrap_or_else(|e| e.into_inner()).set_preview(selection.text());
            }
        }
        let anchor = selection.anchor_rect();
        self.selection = Some(selection);
        self.state.visible = true;
        self.state.closed_at = None;
        self.update_position(anchor);
    }

    /// Re-anchors the popup. A manual or in-progress drag position wins.
    pub fn update_position(&mut self, anchor: Rect) {
        self.anchor = Some(anchor);
        if self.state.dragging || self.state.manual_position.is_some() {
            return;
        }
        self.position = anchored_position(anchor, self.size(), &self.viewport, POPUP_MARGIN);
        self.layout_tabs();
    }

    /// Viewport resized or visually offset.
    pub fn update_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        if !self.state.visible {
            return;
        }
        match self.state.manual_position {
            Some(manual) if !self.state.dragging => {
                let clamped = clamp_to_viewport(manual, self.size(), &self.viewport, POPUP_MARGIN);
                self.state.manual_position = Some(clamped);
                self.position = clamped;
                self.layout_tabs();
            }
            _ => {
                if let Some(anchor) = self.anchor {
                    self.update_position(anchor);
                }
            }
        }
    }

    /// One-way switch from mini to full for the current show cycle.
    pub fn switch_to_full_mode(&mut self) -> bool {
        if !self.state.visible || self.state.mode == PopupMode::Full {
            return false;
        }
        let active = self.mini_tabs.take().map(|t| t.current_tab().id);
        self.state.mode = PopupMode::Full;
        let mut full = self.build_full_tabs();
        if let Some(id) = active {
            full.set_active_tab(TabTarget::Id(&id), true);
        }
        self.full_tabs = Some(full);

        self.listeners.detach_all();
        self.attach_listeners();

        match self.state.manual_position {
            Some(manual) => {
                let clamped = clamp_to_viewport(manual, self.size(), &self.viewport, POPUP_MARGIN);
                self.state.manual_position = Some(clamped);
                self.position = clamped;
            }
            None => {
                if let Some(anchor) = self.anchor {
                    self.position = anchored_position(anchor, self.size(), &self.viewport, POPUP_MARGIN);
                }
            }
        }
        self.layout_tabs();
        info!("popup expanded to full mode");
        true
    }

    /// Hides and resets for the next show. In-flight operations are cancelled.
    pub fn hide(&mut self) {
        let was_visible = self.state.visible;
        self.cancel.cancel();
        self.listeners.detach_all();
        self.mini_tabs = None;
        self.full_tabs = None;
        self.drag = None;
        if let Some(host) = &self.host {
            for panel in host.panels.values() {
                panel.lock().unwrap_or_else(|e| e.into_inner()).reset();
            }
        }
        self.state = PopupState {
            closed_at: if was_visible { Some(Instant::now()) } else { self.state.closed_at },
            ..PopupState::default()
        };
        if was_visible {
            debug!("popup hidden");
            if let Some(events) = &self.events {
                let _ = events.send(PopupEvent::PopupHidden);
            }
        }
    }

    /// Hides and drops the host. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        self.hide();
        if self.host.take().is_some() {
            debug!("popup host destroyed");
        }
        self.selection = None;
        self.anchor = None;
    }

    pub fn toggle_pin(&mut self) -> bool {
        self.state.pinned = !self.state.pinned;
        self.state.pinned
    }

    /// Starts a drag from the header. Returns false if the popup is hidden.
    pub fn begin_drag(&mut self, pointer: Point) -> bool {
        if !self.state.visible {
            return false;
        }
        self.drag = Some(DragSession { pointer_start: pointer, popup_start: self.rect() });
        self.state.dragging = true;
        true
    }

    /// Moves the popup with the pointer, clamped to the viewport.
    pub fn drag_to(&mut self, pointer: Point) -> Option<Point> {
        let session = self.drag?;
        let proposed = Point::new(
            session.popup_start.left + (pointer.x - session.pointer_start.x),
            session.popup_start.top + (pointer.y - session.pointer_start.y),
        );
        let clamped = clamp_to_viewport(proposed, self.size(), &self.viewport, POPUP_MARGIN);
        self.position = clamped;
        self.state.manual_position = Some(clamped);
        self.layout_tabs();
        Some(clamped)
    }

    /// Ends the drag; the last position overrides anchoring until the popup closes.
    pub fn end_drag(&mut self) {
        if self.drag.take().is_some() {
            self.state.dragging = false;
            self.state.manual_position = Some(self.position);
        }
    }

    pub fn handle_tab_key(&mut self, key: NavKey) -> bool {
        self.tabs_mut().is_some_and(|t| t.handle_key(key))
    }

    pub fn blur_tabs(&mut self) {
        if let Some(tabs) = self.tabs_mut() {
            tabs.blur();
        }
    }

    pub fn select_tab(&mut self, kind: ActionKind) -> bool {
        self.tabs_mut().is_some_and(|t| t.set_tab(kind.id()))
    }

    /// Handles clicks on the shell's own chrome and on panel controls.
    /// Returns false for ids it does not own.
    pub fn handle_click(&mut self, id: &str) -> bool {
        match id {
            EXPAND_ID => return self.switch_to_full_mode(),
            PIN_ID => {
                self.toggle_pin();
                return true;
            }
            CLOSE_ID => {
                self.hide();
                return true;
            }
            _ => {}
        }
        let tab = self.tabs().and_then(|t| t.tab_for_button(id)).map(str::to_string);
        if let Some(tab) = tab {
            return self.tabs_mut().is_some_and(|t| t.set_active_tab(TabTarget::Id(&tab), true));
        }
        let Some(kind) = self.active_kind() else {
            return false;
        };
        let panel = self.panel(kind);
        if id == crate::panels::SWAP_LANGUAGES_ID {
            return panel.update(|p| {
                p.swap_languages();
            });
        }
        let mut handled = false;
        panel.update(|p| handled = p.cycle_control(id));
        handled
    }

    fn header(&self) -> Element {
        let title = Element::new("span").class("title").text("SelectAI");
        let close = Element::new("button")
            .with_id(CLOSE_ID)
            .class("icon")
            .attr("aria-label", self.locale.t("label.close"))
            .text("✕");
        let header = Element::new("div").with_id(HEADER_ID).class("header");
        let header = match self.state.mode {
            PopupMode::Mini => header.child(title).child(
                Element::new("button")
                    .with_id(EXPAND_ID)
                    .class("icon")
                    .attr("aria-label", self.locale.t("label.expand"))
                    .text("⤢"),
            ),
            PopupMode::Full => {
                let pin_label = if self.state.pinned { "label.unpin" } else { "label.pin" };
                header
                    .child(
                        Element::new("span")
                            .with_id(DRAG_HANDLE_ID)
                            .class("drag-handle")
                            .attr("aria-hidden", "true")
                            .text("⠿"),
                    )
                    .child(title)
                    .child(
                        Element::new("button")
                            .with_id(PIN_ID)
                            .class("icon")
                            .flag("aria-pressed", self.state.pinned)
                            .attr("aria-label", self.locale.t(pin_label))
                            .text(if self.state.pinned { "●" } else { "○" }),
                    )
            }
        };
        header.child(close)
    }
}

impl View for PopupShell {
    fn render(&self) -> Element {
        let root = Element::new("div").with_id(POPUP_ID).class("popup");
        let (Some(host), Some(tabs), true) = (&self.host, self.tabs(), self.state.visible) else {
            return root.flag("hidden", true);
        };
        let body = tabs.render(|tab| {
            ActionKind::from_id(&tab.id)
                .and_then(|kind| host.panels.get(&kind))
                .map(|panel| panel.lock().unwrap_or_else(|e| e.into_inner()).render())
                .unwrap_or_else(|| Element::new("div"))
        });
        root.class(format!("mode-{}", self.state.mode.as_str()))
            .flag("data-pinned", self.state.pinned)
            .flag("data-dragging", self.state.dragging)
            .attr("data-x", format!("{}", self.position.x))
            .attr("data-y", format!("{}", self.position.y))
            .attr("role", "dialog")
            .child(self.header())
            .child(body)
    }
}

impl Drop for PopupShell {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panels::ResultView;

    fn shell() -> (PopupShell, tokio::sync::mpsc::UnboundedReceiver<PopupEvent>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let shell = PopupShell::new(
            Arc::new(Locale::default()),
            ShellOptions::default(),
            Viewport::new(120.0, 40.0),
            Some(tx),
        );
        (shell, rx)
    }

    fn selection(left: f64, top: f64) -> Selection {
        Selection::new("The quick brown fox", Rect::new(left, top, 19.0, 1.0)).unwrap()
    }

    #[test]
    fn show_builds_mini_tabs_and_anchors_below_selection() {
        let (mut popup, _rx) = shell();
        popup.show(selection(10.0, 5.0));
        assert!(popup.is_visible());
        assert!(popup.is_attached());
        assert_eq!(popup.mode(), PopupMode::Mini);
        assert_eq!(popup.tab_ids(), vec!["summarize", "rephrase", "translate", "discuss"]);
        assert_eq!(popup.position(), Point::new(10.0, 7.0));
        assert!(popup.listeners().listens_to(ListenerKind::Scroll));

        let tree = popup.render();
        let previews = tree.find_all(&|e| e.has_class("selected-text"));
        assert_eq!(previews.len(), 4);
        assert!(previews.iter().all(|p| p.text_content().contains("quick brown fox")));
    }

    #[test]
    fn mini_tabs_follow_enabled_setting() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let options = ShellOptions {
            mini_tabs: vec![ActionKind::Translate, ActionKind::Highlight],
            ..ShellOptions::default()
        };
        let mut popup = PopupShell::new(Arc::new(Locale::default()), options, Viewport::new(120.0, 40.0), Some(tx));
        popup.show(selection(0.0, 0.0));
        assert_eq!(popup.tab_ids(), vec!["translate"]);
    }

    #[test]
    fn flips_above_when_no_room_below() {
        let (mut popup, _rx) = shell();
        popup.show(selection(10.0, 35.0));
        assert_eq!(popup.position().y, 35.0 - MINI_SIZE.height - POPUP_MARGIN);
    }

    #[test]
    fn manual_position_wins_over_anchor_until_hidden() {
        let (mut popup, _rx) = shell();
        popup.show(selection(10.0, 5.0));
        assert!(popup.begin_drag(Point::new(12.0, 7.0)));
        popup.drag_to(Point::new(32.0, 17.0));
        // A new selection during the drag must not move the popup.
        popup.show(selection(50.0, 2.0));
        assert_eq!(popup.position(), Point::new(30.0, 17.0));
        popup.end_drag();
        assert!(!popup.is_dragging());
        popup.update_position(Rect::new(0.0, 0.0, 5.0, 1.0));
        assert_eq!(popup.state().manual_position, Some(Point::new(30.0, 17.0)));

        popup.hide();
        popup.show(selection(10.0, 5.0));
        assert_eq!(popup.position(), Point::new(10.0, 7.0));
    }

    #[test]
    fn drag_is_clamped_to_viewport() {
        let (mut popup, _rx) = shell();
        popup.show(selection(10.0, 5.0));
        popup.begin_drag(Point::new(10.0, 7.0));
        let pos = popup.drag_to(Point::new(500.0, -50.0)).unwrap();
        assert_eq!(pos, Point::new(120.0 - MINI_SIZE.width - POPUP_MARGIN, POPUP_MARGIN));
    }

    #[test]
    fn full_mode_adds_highlight_and_keeps_active_tab() {
        let (mut popup, mut rx) = shell();
        popup.show(selection(10.0, 5.0));
        assert!(popup.handle_click("mini-tab-translate"));
        assert!(!popup.listeners().listens_to(ListenerKind::Drag));
        assert!(popup.switch_to_full_mode());
        assert!(!popup.switch_to_full_mode());
        assert_eq!(popup.mode(), PopupMode::Full);
        assert_eq!(popup.tab_ids().last().map(String::as_str), Some("highlight"));
        assert_eq!(popup.active_kind(), Some(ActionKind::Translate));
        assert!(popup.listeners().listens_to(ListenerKind::Drag));
        assert!(popup.rect().bottom() <= 40.0 - POPUP_MARGIN);
        assert!(popup.render().find_by_id(DRAG_HANDLE_ID).is_some());
        assert!(matches!(rx.try_recv(), Ok(PopupEvent::TabChanged { .. })));
    }

    #[test]
    fn hide_resets_mode_and_emits_once() {
        let (mut popup, mut rx) = shell();
        popup.show(selection(10.0, 5.0));
        popup.switch_to_full_mode();
        popup.toggle_pin();
        popup.panel(ActionKind::Summarize).update(|p| p.show_final("done"));
        let token = popup.operation_token();

        popup.hide();
        assert!(token.is_cancelled());
        assert!(!popup.is_visible());
        assert_eq!(popup.mode(), PopupMode::Mini);
        assert!(!popup.is_pinned());
        assert!(popup.recently_closed(Instant::now()));
        assert!(popup.listeners().is_empty());
        assert_eq!(popup.panel(ActionKind::Summarize).read(|p| p.result.clone()), Some(ResultView::Empty));
        assert!(matches!(rx.try_recv(), Ok(PopupEvent::PopupHidden)));

        popup.hide();
        assert!(rx.try_recv().is_err());
        popup.show(selection(10.0, 5.0));
        assert!(!popup.operation_token().is_cancelled());
    }

    #[test]
    fn destroy_is_idempotent_and_detaches_panels() {
        let (mut popup, _rx) = shell();
        popup.show(selection(10.0, 5.0));
        let panel = popup.panel(ActionKind::Rephrase);
        popup.destroy();
        popup.destroy();
        assert!(!popup.is_attached());
        assert!(!panel.is_attached());
        assert!(popup.render().is_hidden());
    }

    #[test]
    fn panel_controls_are_routed_to_active_panel() {
        let (mut popup, _rx) = shell();
        popup.show(selection(10.0, 5.0));
        popup.select_tab(ActionKind::Rephrase);
        assert!(popup.handle_click(crate::panels::REPHRASE_STYLE_ID));
        let style = popup.panel(ActionKind::Rephrase).read(|p| p.controls.rephrase_style);
        assert_eq!(style, Some(crate::prompts::RephraseStyle::Casual));
        assert!(!popup.handle_click("nothing-here"));
    }

    #[test]
    fn viewport_change_repositions_against_anchor() {
        let (mut popup, _rx) = shell();
        popup.show(selection(100.0, 5.0));
        popup.update_viewport(Viewport::new(80.0, 40.0).with_offset(0.0, 3.0));
        assert_eq!(popup.position(), Point::new(80.0 - MINI_SIZE.width - POPUP_MARGIN, 10.0));
    }
}
