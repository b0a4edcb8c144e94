//! The host document the popup is shown over.

use std::path::Path;

use anyhow::{Context, Result};
use unicode_width::UnicodeWidthChar;

use crate::models::{Point, Rect};
use crate::selection::SelectionSource;

/// Character position in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct TextPos {
    pub line: usize,
    pub col: usize,
}

impl TextPos {
    pub fn new(line: usize, col: usize) -> Self {
        Self { line, col }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorMove {
    Left,
    Right,
    Up,
    Down,
    LineStart,
    LineEnd,
}

#[derive(Debug, Clone)]
pub struct Page {
    title: String,
    lines: Vec<String>,
    scroll: usize,
    area: Rect,
    cursor: TextPos,
    anchor: Option<TextPos>,
    pointer_down: bool,
}

impl Page {
    pub fn from_text(title: impl Into<String>, text: &str) -> Self {
        let mut lines: Vec<String> = text.lines().map(|l| l.replace('\t', "    ")).collect();
        if lines.is_empty() {
            lines.push(String::new());
        }
        Self {
            title: title.into(),
            lines,
            scroll: 0,
            area: Rect::default(),
            cursor: TextPos::default(),
            anchor: None,
            pointer_down: false,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let title = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        Ok(Self::from_text(title, &text))
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn scroll(&self) -> usize {
        self.scroll
    }

    pub fn cursor(&self) -> TextPos {
        self.cursor
    }

    pub fn area(&self) -> Rect {
        self.area
    }

    /// Sets the on-screen box of the text area.
    pub fn set_area(&mut self, area: Rect) {
        self.area = area;
        self.clamp_scroll();
    }

    fn visible_rows(&self) -> usize {
        self.area.height.max(1.0) as usize
    }

    fn clamp_scroll(&mut self) {
        let max = self.lines.len().saturating_sub(self.visible_rows());
        self.scroll = self.scroll.min(max);
    }

    /// Scrolls by `delta` lines; returns whether the view moved.
    pub fn scroll_by(&mut self, delta: i64) -> bool {
        let before = self.scroll;
        self.scroll = if delta < 0 {
            self.scroll.saturating_sub(delta.unsigned_abs() as usize)
        } else {
            self.scroll.saturating_add(delta as usize)
        };
        self.clamp_scroll();
        before != self.scroll
    }

    fn line_len(&self, line: usize) -> usize {
        self.lines.get(line).map_or(0, |l| l.chars().count())
    }

    fn ensure_cursor_visible(&mut self) {
        let rows = self.visible_rows();
        if self.cursor.line < self.scroll {
            self.scroll = self.cursor.line;
        } else if self.cursor.line >= self.scroll + rows {
            self.scroll = self.cursor.line + 1 - rows;
        }
    }

    /// Moves the cursor. With `extend` the selection grows from the old position.
    pub fn move_cursor(&mut self, movement: CursorMove, extend: bool) {
        if extend {
            self.anchor.get_or_insert(self.cursor);
        } else {
            self.anchor = None;
        }
        let TextPos { mut line, mut col } = self.cursor;
        match movement {
            CursorMove::Left if col > 0 => col -= 1,
            CursorMove::Left if line > 0 => {
                line -= 1;
                col = self.line_len(line);
            }
            CursorMove::Right if col < self.line_len(line) => col += 1,
            CursorMove::Right if line + 1 < self.lines.len() => {
                line += 1;
                col = 0;
            }
            CursorMove::Up if line > 0 => {
                line -= 1;
                col = col.min(self.line_len(line));
            }
            CursorMove::Down if line + 1 < self.lines.len() => {
                line += 1;
                col = col.min(self.line_len(line));
            }
            CursorMove::LineStart => col = 0,
            CursorMove::LineEnd => col = self.line_len(line),
            _ => {}
        }
        self.cursor = TextPos::new(line, col);
        self.ensure_cursor_visible();
    }

    /// Document position under a screen point, clamped to the text.
    pub fn pos_at(&self, point: Point) -> TextPos {
        let row = (point.y - self.area.top).max(0.0) as usize;
        let line = (self.scroll + row).min(self.lines.len().saturating_sub(1));
        let target = (point.x - self.area.left).max(0.0) as usize;
        let mut width = 0;
        let mut col = 0;
        for ch in self.lines[line].chars() {
            let w = ch.width().unwrap_or(0);
            if width + w > target {
                break;
            }
            width += w;
            col += 1;
        }
        TextPos::new(line, col)
    }

    pub fn pointer_down(&mut self, point: Point) {
        self.cursor = self.pos_at(point);
        self.anchor = Some(self.cursor);
        self.pointer_down = true;
    }

    pub fn pointer_drag(&mut self, point: Point) {
        if self.pointer_down {
            self.cursor = self.pos_at(point);
        }
    }

    /// Ends a pointer gesture; true if it left a ranged selection.
    pub fn pointer_up(&mut self, point: Point) -> bool {
        if !self.pointer_down {
            return false;
        }
        self.pointer_down = false;
        self.cursor = self.pos_at(point);
        self.selection_range().is_some()
    }

    pub fn is_pointer_down(&self) -> bool {
        self.pointer_down
    }

    pub fn clear_selection(&mut self) {
        self.anchor = None;
    }

    /// Ordered, non-empty selection range.
    pub fn selection_range(&self) -> Option<(TextPos, TextPos)> {
        let anchor = self.anchor?;
        if anchor == self.cursor {
            return None;
        }
        Some(if anchor < self.cursor { (anchor, self.cursor) } else { (self.cursor, anchor) })
    }

    fn slice(&self, line: usize, from: usize, to: usize) -> String {
        self.lines[line].chars().skip(from).take(to.saturating_sub(from)).collect()
    }

    /// Columns of `line` covered by `range`, end exclusive.
    fn cols_in(&self, line: usize, (start, end): (TextPos, TextPos)) -> Option<(usize, usize)> {
        if line < start.line || line > end.line {
            return None;
        }
        let from = if line == start.line { start.col } else { 0 };
        let to = if line == end.line { end.col } else { self.line_len(line) };
        Some((from, to))
    }

    pub fn selected_cols(&self, line: usize) -> Option<(usize, usize)> {
        self.selection_range().and_then(|range| self.cols_in(line, range))
    }

    pub fn selected_text(&self) -> Option<String> {
        let range = self.selection_range()?;
        let parts: Vec<String> = (range.0.line..=range.1.line)
            .filter_map(|line| self.cols_in(line, range).map(|(from, to)| self.slice(line, from, to)))
            .collect();
        Some(parts.join("\n"))
    }

    fn display_offset(&self, line: usize, col: usize) -> f64 {
        self.lines[line].chars().take(col).map(|c| c.width().unwrap_or(0)).sum::<usize>() as f64
    }

    /// Screen rectangles of the selection, one per visible line segment.
    pub fn selection_rects(&self) -> Vec<Rect> {
        let Some(range) = self.selection_range() else {
            return Vec::new();
        };
        let rows = self.visible_rows();
        (range.0.line..=range.1.line)
            .filter(|line| *line >= self.scroll && *line < self.scroll + rows)
            .filter_map(|line| {
                let (from, to) = self.cols_in(line, range)?;
                let left = self.display_offset(line, from);
                let width = self.display_offset(line, to) - left;
                (width > 0.0).then(|| {
                    Rect::new(
                        self.area.left + left,
                        self.area.top + (line - self.scroll) as f64,
                        width,
                        1.0,
                    )
                })
            })
            .collect()
    }

    /// Occurrences of each sentence in the document, as per-line column spans.
    pub fn highlight_spans(&self, sentences: &[String]) -> Vec<(usize, usize, usize)> {
        let text = self.lines.join("\n");
        let mut line_starts = Vec::with_capacity(self.lines.len());
        let mut offset = 0;
        for line in &self.lines {
            line_starts.push(offset);
            offset += line.len() + 1;
        }
        let to_pos = |byte: usize| {
            let line = line_starts.partition_point(|start| *start <= byte).saturating_sub(1);
            let col = self.lines[line][..byte - line_starts[line]].chars().count();
            TextPos::new(line, col)
        };

        let mut spans = Vec::new();
        for sentence in sentences.iter().filter(|s| !s.is_empty()) {
            for (byte, matched) in text.match_indices(sentence.as_str()) {
                let range = (to_pos(byte), to_pos(byte + matched.len()));
                for line in range.0.line..=range.1.line {
                    if let Some((from, to)) = self.cols_in(line, range).filter(|(f, t)| t > f) {
                        spans.push((line, from, to));
                    }
                }
            }
        }
        spans
    }
}

impl SelectionSource for Page {
    fn ranged_text(&self) -> Option<String> {
        self.selected_text()
    }

    fn client_rects(&self) -> Vec<Rect> {
        self.selection_rects()
    }
}
