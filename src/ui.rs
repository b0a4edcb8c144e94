use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Widget, Wrap},
    Frame,
};

use crate::models;
use crate::page::Page;
use crate::theme::Theme;
use crate::view::Element;

/// Screen boxes of rendered elements, used to route clicks back by id.
#[derive(Debug, Clone, Default)]
pub struct HitMap {
    regions: Vec<(String, Rect)>,
}

impl HitMap {
    fn push(&mut self, id: &str, rect: Rect) {
        if rect.width > 0 && rect.height > 0 {
            self.regions.push((id.to_string(), rect));
        }
    }

    /// Innermost element under the cell.
    pub fn hit(&self, x: u16, y: u16) -> Option<&str> {
        let pos = ratatui::layout::Position { x, y };
        self.regions
            .iter()
            .filter(|(_, rect)| rect.contains(pos))
            .min_by_key(|(_, rect)| rect.area())
            .map(|(id, _)| id.as_str())
    }

    #[cfg(test)]
    pub fn rect_of(&self, id: &str) -> Option<Rect> {
        self.regions.iter().find(|(i, _)| i == id).map(|(_, r)| *r)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// Splits the screen into the document and a one-line footer.
pub fn screen_layout(area: Rect) -> (Rect, Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(1)])
        .split(area);
    (chunks[0], chunks[1])
}

pub fn page_block<'a>(page: &'a Page, focused: bool, theme: &Theme) -> Block<'a> {
    Block::default()
        .title(Span::styled(format!(" {} ", page.title()), theme.page_title))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if focused { theme.focus_border } else { theme.blurred_border }))
}

/// Draws the document with selection, highlighted sentences and cursor.
pub fn render_page(
    f: &mut Frame,
    area: Rect,
    page: &Page,
    highlights: &[(usize, usize, usize)],
    focused: bool,
    theme: &Theme,
) {
    let block = page_block(page, focused, theme);
    let inner = block.inner(area);
    let base = Style::default().fg(theme.text).bg(theme.root_bg);
    let selected = Style::default().fg(theme.selection_fg).bg(theme.selection_bg);

    let lines: Vec<Line> = page
        .lines()
        .iter()
        .enumerate()
        .skip(page.scroll())
        .take(inner.height as usize)
        .map(|(idx, text)| {
            let selection = page.selected_cols(idx);
            let cursor = (focused && page.cursor().line == idx).then(|| page.cursor().col);
            let style_at = |col: usize| {
                if selection.is_some_and(|(from, to)| col >= from && col < to) {
                    selected
                } else if highlights.iter().any(|&(l, from, to)| l == idx && col >= from && col < to) {
                    theme.highlight
                } else {
                    base
                }
            };

            let mut spans: Vec<Span> = Vec::new();
            let mut run = String::new();
            let mut run_style = base;
            for (col, ch) in text.chars().enumerate() {
                let mut style = style_at(col);
                if cursor == Some(col) {
                    style = style.patch(theme.cursor);
                }
                if style != run_style && !run.is_empty() {
                    spans.push(Span::styled(std::mem::take(&mut run), run_style));
                }
                run_style = style;
                run.push(ch);
            }
            if !run.is_empty() {
                spans.push(Span::styled(run, run_style));
            }
            if cursor.is_some_and(|col| col >= text.chars().count()) {
                spans.push(Span::styled(" ", base.patch(theme.cursor)));
            }
            Line::from(spans)
        })
        .collect();

    f.render_widget(Paragraph::new(lines).style(base).block(block), area);
}

pub fn render_footer(f: &mut Frame, area: Rect, hint: &str, status: Option<&str>, theme: &Theme) {
    let mut spans = vec![Span::styled(hint.to_string(), theme.footer)];
    if let Some(status) = status {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(status.to_string(), theme.status));
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

/// Converts a popup box to cells, clipped to `bounds`.
pub fn popup_area(rect: models::Rect, bounds: Rect) -> Rect {
    let cell = |v: f64| v.max(0.0).round().min(f64::from(u16::MAX)) as u16;
    Rect::new(cell(rect.left), cell(rect.top), cell(rect.width), cell(rect.height)).intersection(bounds)
}

/// Draws the popup's element tree into `area` and returns where each id landed.
/// `result_scroll` skips lines of the result text.
pub fn render_popup(
    f: &mut Frame,
    area: Rect,
    tree: &Element,
    focused: bool,
    result_scroll: u16,
    theme: &Theme,
) -> HitMap {
    if tree.is_hidden() || area.is_empty() {
        return HitMap::default();
    }
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if focused { theme.focus_border } else { theme.blurred_border }))
        .style(theme.popup_border);
    let inner = block.inner(area);
    f.render_widget(Clear, area);
    f.render_widget(block, area);

    let mut painter = Painter {
        buf: f.buffer_mut(),
        inner,
        y: inner.y,
        result_scroll,
        theme,
        hits: HitMap::default(),
    };
    if let Some(id) = &tree.id {
        painter.hits.push(id, area);
    }
    for child in &tree.children {
        painter.block(child, theme.popup_text);
    }
    painter.hits
}

struct Painter<'a> {
    buf: &'a mut Buffer,
    inner: Rect,
    y: u16,
    result_scroll: u16,
    theme: &'a Theme,
    hits: HitMap,
}

impl Painter<'_> {
    fn has_room(&self) -> bool {
        self.y < self.inner.bottom()
    }

    fn style_for(&self, el: &Element) -> Option<Style> {
        let t = self.theme;
        let style = match el.tag {
            "button" if el.has_class("tab") => match (el.has_class("active"), el.has_class("focused")) {
                (true, true) => t.tab_active.add_modifier(Modifier::UNDERLINED),
                (true, false) => t.tab_active,
                _ => t.tab,
            },
            "button" if el.has_class("primary") => {
                if el.is_disabled() { t.button_disabled } else { t.button }
            }
            "button" if el.is_disabled() => t.button_disabled,
            "button" => t.control,
            "select" | "input" => t.control,
            "a" => t.link,
            _ if el.has_class("title") => t.popup_title,
            _ if el.has_class("selected-text") => t.preview,
            _ if el.has_class("error") => t.error,
            _ if el.has_class("loading") || el.has_class("streaming") => t.streaming,
            _ if el.has_class("info") => t.info,
            _ if el.has_class("turn-user") => t.user_turn,
            _ if el.has_class("turn-assistant") => t.assistant_turn,
            _ if el.has_class("result") => t.result,
            _ => return None,
        };
        Some(style)
    }

    fn block(&mut self, el: &Element, inherited: Style) {
        if el.is_hidden() || !self.has_room() {
            return;
        }
        let style = self.style_for(el).unwrap_or(inherited);
        let top = self.y;
        if el.has_class("tab-indicator") {
            self.indicator(el);
        } else if is_row(el) || (el.text.is_some() && !el.children.is_empty()) {
            self.row(el, style);
        } else if el.tag == "button" {
            self.row_of_one(el, style);
        } else if let Some(text) = &el.text {
            let skip = if el.has_class("result-text") { self.result_scroll } else { 0 };
            self.paragraph(text, skip, style);
        } else {
            for child in &el.children {
                self.block(child, style);
            }
        }
        if let Some(id) = &el.id {
            let rect = Rect::new(self.inner.x, top, self.inner.width, self.y.saturating_sub(top));
            self.hits.push(id, rect);
        }
    }

    fn paragraph(&mut self, text: &str, skip: u16, style: Style) {
        let width = usize::from(self.inner.width.max(1));
        let lines: Vec<Line> = textwrap::wrap(text, width)
            .into_iter()
            .map(|line| Line::from(line.into_owned()))
            .collect();
        let room = self.inner.bottom().saturating_sub(self.y);
        let visible = u16::try_from(lines.len()).unwrap_or(u16::MAX).saturating_sub(skip).min(room);
        if visible == 0 {
            return;
        }
        let area = Rect::new(self.inner.x, self.y, self.inner.width, visible);
        Paragraph::new(lines).style(style).scroll((skip, 0)).render(area, self.buf);
        self.y += visible;
    }

    /// Draws one inline element at `x`; returns the column after it.
    fn inline(&mut self, x: u16, el: &Element, inherited: Style) -> u16 {
        let style = self.style_for(el).unwrap_or(inherited);
        let label = el.text_content();
        let label = if el.tag == "button" { format!(" {label} ") } else { label };
        let room = self.inner.right().saturating_sub(x) as usize;
        if room == 0 {
            return x;
        }
        let (end, _) = self.buf.set_stringn(x, self.y, &label, room, style);
        if let Some(id) = &el.id {
            self.hits.push(id, Rect::new(x, self.y, end.saturating_sub(x), 1));
        }
        end
    }

    fn row(&mut self, el: &Element, style: Style) {
        let mut x = self.inner.x;
        if let Some(text) = &el.text {
            x = self.inline(x, &Element::new("span").text(text.clone()), style);
        }
        for child in el.children.iter().filter(|c| !c.is_hidden()) {
            x = self.inline(x, child, style).saturating_add(1);
        }
        self.y += 1;
    }

    fn row_of_one(&mut self, el: &Element, style: Style) {
        self.inline(self.inner.x, el, style);
        self.y += 1;
    }

    fn indicator(&mut self, el: &Element) {
        let num = |name: &str| el.get_attr(name).and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0);
        let left = self.inner.x.saturating_add(num("data-left").max(0.0) as u16);
        let width = num("data-width").max(0.0) as usize;
        let room = self.inner.right().saturating_sub(left) as usize;
        if room > 0 && width > 0 {
            let bar = "▔".repeat(width.min(room));
            self.buf.set_stringn(left, self.y, bar, room, Style::default().fg(self.theme.focus_border));
        }
        self.y += 1;
    }
}

fn is_row(el: &Element) -> bool {
    el.has_class("header") || el.has_class("controls") || el.get_attr("role") == Some("tablist")
}

/// Modal single-line input, used for entering the API key.
pub fn render_key_prompt(f: &mut Frame, title: &str, input: &str, theme: &Theme) {
    let area = centered_rect(60, 20, f.area());
    let masked = "•".repeat(input.chars().count());
    f.render_widget(Clear, area);
    let block = Block::default()
        .title(Span::styled(format!(" {title} "), theme.popup_title))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.focus_border))
        .style(theme.popup_border);
    f.render_widget(
        Paragraph::new(format!("{masked}▏")).style(theme.popup_text).wrap(Wrap { trim: false }).block(block),
        area,
    );
}

pub fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let vertical = Layout::default().direction(Direction::Vertical)
        .constraints([Constraint::Percentage((100-percent_y)/2), Constraint::Percentage(percent_y), Constraint::Percentage((100-percent_y)/2)]).split(r)[1];
    Layout::default().direction(Direction::Horizontal)
        .constraints([Constraint::Percentage((100-percent_x)/2), Constraint::Percentage(percent_x), Constraint::Percentage((100-percent_x)/2)]).split(vertical)[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::{backend::TestBackend, Terminal};

    fn row_text(buf: &Buffer, y: u16) -> String {
        (0..buf.area.width).map(|x| buf[(x, y)].symbol().to_string()).collect()
    }

    fn sample_tree() -> Element {
        Element::new("div")
            .with_id("root")
            .child(
                Element::new("div")
                    .class("header")
                    .with_id("hdr")
                    .child(Element::new("span").class("title").text("Title"))
                    .child(Element::new("button").with_id("close").text("x")),
            )
            .child(Element::new("p").with_id("hidden-p").flag("hidden", true).text("never"))
            .child(Element::new("button").with_id("go").class("primary").text("Go"))
            .child(Element::new("pre").class("result-text").text("one two three four five six"))
    }

    #[test]
    fn popup_records_hits_and_skips_hidden_elements() {
        let mut terminal = Terminal::new(TestBackend::new(20, 10)).unwrap();
        let mut hits = HitMap::default();
        terminal
            .draw(|f| {
                hits = render_popup(f, Rect::new(0, 0, 14, 8), &sample_tree(), true, 0, &Theme::default());
            })
            .unwrap();
        let buf = terminal.backend().buffer().clone();

        assert!(row_text(&buf, 1).starts_with("│Title  x "));
        assert!(row_text(&buf, 2).starts_with("│ Go "));
        assert!(row_text(&buf, 3).starts_with("│one two"));
        assert!(hits.rect_of("hidden-p").is_none());

        assert_eq!(hits.hit(2, 2), Some("go"));
        assert_eq!(hits.hit(8, 1), Some("close"));
        assert_eq!(hits.hit(2, 1), Some("hdr"));
        assert_eq!(hits.hit(5, 5), Some("root"));
        assert_eq!(hits.hit(18, 9), None);
    }

    #[test]
    fn result_scroll_skips_wrapped_lines() {
        let mut terminal = Terminal::new(TestBackend::new(20, 10)).unwrap();
        terminal
            .draw(|f| {
                render_popup(f, Rect::new(0, 0, 14, 8), &sample_tree(), false, 1, &Theme::default());
            })
            .unwrap();
        let buf = terminal.backend().buffer().clone();
        assert!(!row_text(&buf, 3).contains("one"));
    }

    #[test]
    fn result_text_wraps_wide_characters_and_keeps_blank_lines() {
        let tree = Element::new("div").child(Element::new("pre").class("result-text").text("一二三四五六七\n\nend"));
        let mut terminal = Terminal::new(TestBackend::new(20, 10)).unwrap();
        terminal
            .draw(|f| {
                render_popup(f, Rect::new(0, 0, 14, 8), &tree, false, 0, &Theme::default());
            })
            .unwrap();
        let buf = terminal.backend().buffer().clone();
        assert!(row_text(&buf, 1).starts_with("│一"));
        assert!(row_text(&buf, 2).starts_with("│七"));
        assert_eq!(row_text(&buf, 3).trim_start_matches('│').trim_end_matches(['│', ' ']), "");
        assert!(row_text(&buf, 4).starts_with("│end"));
    }

    #[test]
    fn hidden_root_draws_nothing() {
        let mut terminal = Terminal::new(TestBackend::new(10, 4)).unwrap();
        let mut hits = HitMap::default();
        terminal
            .draw(|f| {
                let area = f.area();
                hits = render_popup(f, area, &Element::new("div").flag("hidden", true), true, 0, &Theme::default());
            })
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn popup_area_clips_to_screen() {
        let area = popup_area(models::Rect::new(70.0, 20.0, 20.0, 10.0), Rect::new(0, 0, 80, 24));
        assert_eq!(area, Rect::new(70, 20, 10, 4));
    }
}
