use unicode_width::UnicodeWidthStr;

use crate::models::{Point, Rect, Size, Viewport};

/// Gap between the selection and the popup, and between the popup and the viewport edge.
pub const POPUP_MARGIN: f64 = 1.0;

/// Places a popup of `size` below the anchor's bottom-left corner.
///
/// Horizontal position is clamped into the viewport. If the popup does not fit
/// below the anchor it flips above it; the result is then clamped vertically and
/// shifted by the visual viewport offset.
pub fn anchored_position(anchor: Rect, size: Size, viewport: &Viewport, margin: f64) -> Point {
    let left = clamp_axis(anchor.left, size.width, viewport.width, margin);

    let below = anchor.bottom() + margin;
    let top = if below + size.height > viewport.height - margin {
        let above = anchor.top - size.height - margin;
        if above >= margin { above } else { below }
    } else {
        below
    };
    let top = clamp_axis(top, size.height, viewport.height, margin);

    Point::new(left + viewport.offset_left, top + viewport.offset_top)
}

/// Keeps a manually placed popup fully on screen.
pub fn clamp_to_viewport(position: Point, size: Size, viewport: &Viewport, margin: f64) -> Point {
    let x = clamp_axis(position.x - viewport.offset_left, size.width, viewport.width, margin);
    let y = clamp_axis(position.y - viewport.offset_top, size.height, viewport.height, margin);
    Point::new(x + viewport.offset_left, y + viewport.offset_top)
}

fn clamp_axis(value: f64, extent: f64, available: f64, margin: f64) -> f64 {
    let max = (available - extent - margin).max(margin);
    value.max(margin).min(max)
}

/// Display width of `text` in terminal cells.
pub fn display_width(text: &str) -> usize {
    UnicodeWidthStr::width(text)
}

/// Shortens `text` to `max` characters with an ellipsis.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewport() -> Viewport {
        Viewport::new(100.0, 40.0)
    }

    #[test]
    fn places_popup_below_selection() {
        let anchor = Rect::new(10.0, 5.0, 20.0, 1.0);
        let p = anchored_position(anchor, Size::new(30.0, 10.0), &viewport(), 1.0);
        assert_eq!(p, Point::new(10.0, 7.0));
    }

    #[test]
    fn flips_above_when_no_room_below() {
        let anchor = Rect::new(10.0, 35.0, 20.0, 1.0);
        let p = anchored_position(anchor, Size::new(30.0, 10.0), &viewport(), 1.0);
        assert_eq!(p, Point::new(10.0, 24.0));
    }

    #[test]
    fn clamps_horizontally_to_viewport() {
        let anchor = Rect::new(90.0, 5.0, 5.0, 1.0);
        let p = anchored_position(anchor, Size::new(30.0, 10.0), &viewport(), 1.0);
        assert_eq!(p.x, 69.0);
    }

    #[test]
    fn clamps_vertically_when_neither_side_fits() {
        let anchor = Rect::new(0.0, 3.0, 5.0, 1.0);
        let p = anchored_position(anchor, Size::new(30.0, 38.0), &Viewport::new(100.0, 40.0), 1.0);
        assert_eq!(p.y, 1.0);
        assert_eq!(p.x, 1.0);
    }

    #[test]
    fn applies_visual_viewport_offset() {
        let anchor = Rect::new(10.0, 5.0, 20.0, 1.0);
        let vp = viewport().with_offset(0.0, 2.0);
        let p = anchored_position(anchor, Size::new(30.0, 10.0), &vp, 1.0);
        assert_eq!(p, Point::new(10.0, 9.0));
    }

    #[test]
    fn clamp_keeps_manual_position_on_screen() {
        let p = clamp_to_viewport(Point::new(-5.0, 50.0), Size::new(30.0, 10.0), &viewport(), 1.0);
        assert_eq!(p, Point::new(1.0, 29.0));
    }
}
