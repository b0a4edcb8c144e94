use std::time::{Duration, Instant};

use crate::models::{Rect, Selection};

/// Coalescing window for selection-change bursts while the user is still dragging.
pub const SELECTION_DEBOUNCE: Duration = Duration::from_millis(100);

/// Something that owns a text selection, like the page being viewed.
pub trait SelectionSource {
    /// The selected text, or `None` when the selection is collapsed.
    fn ranged_text(&self) -> Option<String>;

    /// One rect per visual line of the selection, in reading order.
    fn client_rects(&self) -> Vec<Rect>;
}

/// Reads the current selection.
///
/// The last client rect (bottom-most visual line) is used as the anchor.
pub fn capture_selection(source: &impl SelectionSource, min_length: usize) -> Option<Selection> {
    let text = source.ranged_text()?;
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.chars().count() < min_length {
        return None;
    }
    let anchor = source.client_rects().into_iter().last()?;
    Selection::new(trimmed, anchor)
}

/// Trailing-edge debouncer driven by the caller's clock.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    pending_since: Option<Instant>,
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(SELECTION_DEBOUNCE)
    }
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self { window, pending_since: None }
    }

    /// Records a change; restarts the window.
    pub fn schedule(&mut self, now: Instant) {
        self.pending_since = Some(now);
    }

    /// Fires once when the window has elapsed since the last change.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.pending_since {
            Some(at) if now.saturating_duration_since(at) >= self.window => {
                self.pending_since = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        text: Option<&'static str>,
        rects: Vec<Rect>,
    }

    impl SelectionSource for Fixed {
        fn ranged_text(&self) -> Option<String> {
            self.text.map(str::to_string)
        }

        fn client_rects(&self) -> Vec<Rect> {
            self.rects.clone()
        }
    }

    fn line(top: f64, width: f64) -> Rect {
        Rect::new(0.0, top, width, 1.0)
    }

    #[test]
    fn no_ranged_selection_yields_none() {
        let src = Fixed { text: None, rects: vec![line(0.0, 4.0)] };
        assert!(capture_selection(&src, 1).is_none());
    }

    #[test]
    fn short_selections_are_ignored() {
        for text in ["a", "ab", " abc  "] {
            let src = Fixed { text: Some(text), rects: vec![line(0.0, 4.0)] };
            assert!(capture_selection(&src, 4).is_none(), "{text:?} should be too short");
        }
    }

    #[test]
    fn zero_area_geometry_is_ignored() {
        let src = Fixed { text: Some("long enough text"), rects: vec![Rect::new(4.0, 4.0, 0.0, 0.0)] };
        assert!(capture_selection(&src, 3).is_none());
        let src = Fixed { text: Some("long enough text"), rects: vec![] };
        assert!(capture_selection(&src, 3).is_none());
    }

    #[test]
    fn anchors_on_last_line() {
        let src = Fixed {
            text: Some("first line\nsecond line"),
            rects: vec![line(2.0, 10.0), line(3.0, 11.0)],
        };
        let sel = capture_selection(&src, 3).unwrap();
        assert_eq!(sel.anchor_rect(), line(3.0, 11.0));
        assert_eq!(sel.text(), "first line\nsecond line");
    }

    #[test]
    fn debouncer_coalesces_bursts() {
        let start = Instant::now();
        let mut d = Debouncer::default();
        d.schedule(start);
        d.schedule(start + Duration::from_millis(60));
        assert!(!d.poll(start + Duration::from_millis(120)));
        assert!(d.poll(start + Duration::from_millis(160)));
        assert!(!d.poll(start + Duration::from_millis(400)));
    }
}
