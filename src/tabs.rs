use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::models::{PopupEvent, Rect};
use crate::utils::display_width;
use crate::view::Element;

#[derive(Debug, Clone, PartialEq)]
pub struct TabSpec {
    pub id: String,
    pub label: String,
    pub icon: Option<String>,
}

impl TabSpec {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self { id: id.into(), label: label.into(), icon: None }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabTarget<'a> {
    Index(usize),
    Id(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavKey {
    ArrowLeft,
    ArrowRight,
    Home,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentTab {
    pub id: String,
    pub index: usize,
}

/// Accessible tab strip with one panel per tab.
///
/// All panels stay in the rendered tree; inactive ones carry `hidden` so their
/// controls keep their values across tab switches.
#[derive(Debug)]
pub struct TabController {
    prefix: String,
    tabs: Vec<TabSpec>,
    current: usize,
    compact: bool,
    focused: bool,
    container: Rect,
    indicator: Rect,
    events: Option<UnboundedSender<PopupEvent>>,
}

impl TabController {
    pub fn new(prefix: &str, tabs: Vec<TabSpec>, events: Option<UnboundedSender<PopupEvent>>) -> Self {
        let mut controller = Self {
            prefix: prefix.to_string(),
            tabs,
            current: 0,
            compact: false,
            focused: false,
            container: Rect::default(),
            indicator: Rect::default(),
            events,
        };
        controller.update_indicator();
        controller
    }

    /// Compact controllers label their buttons with icons only.
    pub fn compact(mut self, on: bool) -> Self {
        self.compact = on;
        self.update_indicator();
        self
    }

    #[cfg(test)]
    pub fn tabs(&self) -> &[TabSpec] {
        &self.tabs
    }

    /// Keyboard focus leaves the tab strip.
    pub fn blur(&mut self) {
        self.focused = false;
    }

    pub fn current_tab(&self) -> CurrentTab {
        CurrentTab {
            id: self.tabs.get(self.current).map(|t| t.id.clone()).unwrap_or_default(),
            index: self.current,
        }
    }

    pub fn tab_button_id(&self, tab_id: &str) -> String {
        format!("{}-tab-{}", self.prefix, tab_id)
    }

    pub fn panel_id(&self, tab_id: &str) -> String {
        format!("{}-panel-{}", self.prefix, tab_id)
    }

    /// Maps a clicked tab button id back to its tab id.
    pub fn tab_for_button(&self, button_id: &str) -> Option<&str> {
        self.tabs
            .iter()
            .find(|t| self.tab_button_id(&t.id) == button_id)
            .map(|t| t.id.as_str())
    }

    fn button_label(&self, tab: &TabSpec) -> String {
        match (&tab.icon, self.compact) {
            (Some(icon), true) => icon.clone(),
            (Some(icon), false) => format!("{icon} {}", tab.label),
            (None, _) => tab.label.clone(),
        }
    }

    /// Measured box of the tab button at `index`, in container coordinates.
    fn button_rect(&self, index: usize) -> Rect {
        let mut left = self.container.left;
        for tab in self.tabs.iter().take(index) {
            left += display_width(&self.button_label(tab)) as f64 + 3.0;
        }
        let width = self
            .tabs
            .get(index)
            .map(|t| display_width(&self.button_label(t)) as f64 + 2.0)
            .unwrap_or(0.0);
        Rect::new(left, self.container.top, width, 1.0)
    }

    /// Sets the box the tab strip occupies and re-measures the indicator.
    pub fn layout(&mut self, container: Rect) {
        self.container = container;
        self.update_indicator();
    }

    /// Indicator geometry relative to the tab container.
    #[cfg(test)]
    pub fn indicator(&self) -> Rect {
        self.indicator
    }

    fn update_indicator(&mut self) {
        let button = self.button_rect(self.current);
        self.indicator = Rect::new(
            button.left - self.container.left,
            button.bottom() - self.container.top,
            button.width,
            1.0,
        );
    }

    pub fn render(&self, body: impl Fn(&TabSpec) -> Element) -> Element {
        let buttons = self.tabs.iter().enumerate().map(|(i, tab)| {
            let active = i == self.current;
            let mut button = Element::new("button")
                .with_id(self.tab_button_id(&tab.id))
                .class("tab")
                .attr("role", "tab")
                .attr("aria-selected", active.to_string())
                .attr("aria-controls", self.panel_id(&tab.id))
                .attr("tabindex", if active { "0" } else { "-1" })
                .attr("title", tab.label.clone())
                .text(self.button_label(tab));
            if active {
                button = button.class("active");
                if self.focused {
                    button = button.class("focused");
                }
            }
            button
        });

        let panels = self.tabs.iter().enumerate().map(|(i, tab)| {
            Element::new("div")
                .with_id(self.panel_id(&tab.id))
                .class("tab-panel")
                .attr("role", "tabpanel")
                .attr("aria-labelledby", self.tab_button_id(&tab.id))
                .flag("hidden", i != self.current)
                .child(body(tab))
        });

        Element::new("div")
            .with_id(format!("{}-tabs", self.prefix))
            .class("tabs")
            .child(
                Element::new("div")
                    .with_id(format!("{}-tablist", self.prefix))
                    .attr("role", "tablist")
                    .children(buttons),
            )
            .child(
                Element::new("div")
                    .with_id(format!("{}-indicator", self.prefix))
                    .class("tab-indicator")
                    .attr("data-left", format!("{}", self.indicator.left))
                    .attr("data-width", format!("{}", self.indicator.width)),
            )
            .children(panels)
    }

    /// Activates a tab. Unknown ids and out-of-range indices are ignored.
    pub fn set_active_tab(&mut self, target: TabTarget<'_>, focus: bool) -> bool {
        let index = match target {
            TabTarget::Index(i) if i < self.tabs.len() => i,
            TabTarget::Id(id) => match self.tabs.iter().position(|t| t.id == id) {
                Some(i) => i,
                None => return false,
            },
            TabTarget::Index(_) => return false,
        };

        self.current = index;
        self.update_indicator();
        if focus {
            self.focused = true;
        }

        let tab_id = self.tabs[index].id.clone();
        debug!(prefix = %self.prefix, tab = %tab_id, "tab changed");
        if let Some(tx) = &self.events {
            let _ = tx.send(PopupEvent::TabChanged { tab_id, tab_index: index });
        }
        true
    }

    /// Shorthand for activating by id.
    pub fn set_tab(&mut self, id: &str) -> bool {
        self.set_active_tab(TabTarget::Id(id), false)
    }

    /// Arrow keys wrap around; Home and End jump to the ends.
    pub fn handle_key(&mut self, key: NavKey) -> bool {
        if self.tabs.is_empty() {
            return false;
        }
        let last = self.tabs.len() - 1;
        let next = match key {
            NavKey::ArrowRight => (self.current + 1) % self.tabs.len(),
            NavKey::ArrowLeft => {
                if self.current == 0 {
                    last
                } else {
                    self.current - 1
                }
            }
            NavKey::Home => 0,
            NavKey::End => last,
        };
        self.set_active_tab(TabTarget::Index(next), true)
    }
}
