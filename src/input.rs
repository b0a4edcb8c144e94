use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseButton, MouseEvent, MouseEventKind};

use crate::app::{App, Focus};
use crate::models::ActionKind;
use crate::page::CursorMove;
use crate::tabs::NavKey;

const SCROLL_STEP: i64 = 3;

/// Applies one terminal event. Returns `Ok(false)` when the app should exit.
pub fn handle_event(app: &mut App, event: Event) -> anyhow::Result<bool> {
    match event {
        Event::Key(key) if key.kind != KeyEventKind::Release => handle_key(app, key),
        Event::Mouse(mouse) => {
            handle_mouse(app, mouse);
            Ok(true)
        }
        Event::Resize(width, height) => {
            app.resize(width, height);
            Ok(true)
        }
        _ => Ok(true),
    }
}

pub fn handle_key(app: &mut App, key: KeyEvent) -> anyhow::Result<bool> {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        app.quit();
        return Ok(false);
    }
    if app.is_prompting_key() {
        match key.code {
            KeyCode::Enter => app.submit_key(),
            KeyCode::Esc => app.cancel_key_prompt(),
            KeyCode::Backspace => app.edit_key(None),
            KeyCode::Char(c) => app.edit_key(Some(c)),
            _ => {}
        }
        return Ok(true);
    }
    match app.focus() {
        Focus::Page => page_key(app, key),
        Focus::Popup => {
            popup_key(app, key);
            Ok(true)
        }
    }
}

fn page_key(app: &mut App, key: KeyEvent) -> anyhow::Result<bool> {
    let extend = key.modifiers.contains(KeyModifiers::SHIFT);
    let movement = match key.code {
        KeyCode::Left => Some(CursorMove::Left),
        KeyCode::Right => Some(CursorMove::Right),
        KeyCode::Up => Some(CursorMove::Up),
        KeyCode::Down => Some(CursorMove::Down),
        KeyCode::Home => Some(CursorMove::LineStart),
        KeyCode::End => Some(CursorMove::LineEnd),
        _ => None,
    };
    if let Some(movement) = movement {
        app.move_cursor(movement, extend);
        return Ok(true);
    }
    match key.code {
        KeyCode::Char('q') => {
            app.quit();
            return Ok(false);
        }
        KeyCode::Char(c @ '1'..='4') => {
            let index = c as usize - '1' as usize;
            app.send_host_command(ActionKind::STREAMING[index]);
        }
        KeyCode::Char('f') => app.save_favorite(),
        KeyCode::Char('k') => app.open_key_prompt(),
        KeyCode::Tab => app.toggle_focus(),
        KeyCode::PageUp => app.scroll_page(-SCROLL_STEP * 5),
        KeyCode::PageDown => app.scroll_page(SCROLL_STEP * 5),
        KeyCode::Esc => app.clear_selection(),
        _ => {}
    }
    Ok(true)
}

fn popup_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Left => app.navigate_tabs(NavKey::ArrowLeft),
        KeyCode::Right => app.navigate_tabs(NavKey::ArrowRight),
        KeyCode::Home => app.navigate_tabs(NavKey::Home),
        KeyCode::End => app.navigate_tabs(NavKey::End),
        KeyCode::Up => app.scroll_result(-1),
        KeyCode::Down => app.scroll_result(1),
        KeyCode::PageUp => app.scroll_result(-10),
        KeyCode::PageDown => app.scroll_result(10),
        KeyCode::Enter => app.run_active(),
        KeyCode::Esc => app.close_popup(),
        KeyCode::Tab => app.toggle_focus(),
        // The discuss tab takes typed text; shortcuts need Ctrl there.
        KeyCode::Backspace if app.is_discuss_active() => app.edit_question(None),
        KeyCode::Char(c) if app.is_discuss_active() && !key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.edit_question(Some(c))
        }
        KeyCode::Char('o') => app.cycle_option(),
        KeyCode::Char('s') => app.swap_languages(),
        KeyCode::Char('e') => app.expand(),
        KeyCode::Char('p') => app.toggle_pin(),
        KeyCode::Char('c') | KeyCode::Char('y') => app.copy_result(),
        KeyCode::Char('f') => app.save_favorite(),
        _ => {}
    }
}

pub fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    match mouse.kind {
        MouseEventKind::Down(MouseButton::Left) => app.mouse_down(mouse.column, mouse.row),
        MouseEventKind::Drag(MouseButton::Left) => app.mouse_drag(mouse.column, mouse.row),
        MouseEventKind::Up(MouseButton::Left) => app.mouse_up(mouse.column, mouse.row),
        MouseEventKind::ScrollUp => app.scroll_page(-SCROLL_STEP),
        MouseEventKind::ScrollDown => app.scroll_page(SCROLL_STEP),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use tokio::runtime::Handle;

    use super::*;
    use crate::app::AppOptions;
    use crate::history::MemoryHistoryStore;
    use crate::i18n::Locale;
    use crate::network::GenerationOptions;
    use crate::page::Page;
    use crate::popup::ShellOptions;

    fn app() -> App {
        let options = AppOptions {
            locale: Arc::new(Locale::default()),
            shell: ShellOptions::default(),
            generation: GenerationOptions::default(),
            min_selection_length: 3,
            chat_max_turns: 10,
        };
        let mut app = App::new(
            Page::from_text("doc", "Select this sentence please."),
            options,
            Arc::new(MemoryHistoryStore::new()),
            Arc::new(|| None),
            Handle::current(),
        );
        app.resize(80, 24);
        app
    }

    fn key(code: KeyCode, modifiers: KeyModifiers) -> Event {
        Event::Key(KeyEvent::new(code, modifiers))
    }

    #[tokio::test]
    async fn shift_arrows_select_and_tab_moves_focus() {
        let mut app = app();
        for _ in 0..6 {
            assert!(handle_event(&mut app, key(KeyCode::Right, KeyModifiers::SHIFT)).unwrap());
        }
        app.tick(Instant::now() + Duration::from_millis(150));
        assert_eq!(app.popup().selection().map(|s| s.text()), Some("Select"));

        handle_event(&mut app, key(KeyCode::Tab, KeyModifiers::NONE)).unwrap();
        assert_eq!(app.focus(), Focus::Popup);
        handle_event(&mut app, key(KeyCode::Right, KeyModifiers::NONE)).unwrap();
        assert_eq!(app.popup().active_kind(), Some(ActionKind::Rephrase));

        handle_event(&mut app, key(KeyCode::Esc, KeyModifiers::NONE)).unwrap();
        assert!(!app.popup().is_visible());
        assert_eq!(app.focus(), Focus::Page);
    }

    #[tokio::test]
    async fn typed_text_goes_to_discuss_question() {
        let mut app = app();
        for _ in 0..6 {
            handle_event(&mut app, key(KeyCode::Right, KeyModifiers::SHIFT)).unwrap();
        }
        app.tick(Instant::now() + Duration::from_millis(150));
        handle_event(&mut app, key(KeyCode::Tab, KeyModifiers::NONE)).unwrap();
        handle_event(&mut app, key(KeyCode::End, KeyModifiers::NONE)).unwrap();
        assert!(app.is_discuss_active());

        for c in "open?".chars() {
            handle_event(&mut app, key(KeyCode::Char(c), KeyModifiers::NONE)).unwrap();
        }
        assert!(app.popup().is_visible());
        let question = app.popup().panel(ActionKind::Discuss).read(|p| p.controls.question.clone());
        assert_eq!(question.as_deref(), Some("open?"));
    }

    #[tokio::test]
    async fn q_quits_from_the_page() {
        let mut app = app();
        assert!(!handle_event(&mut app, key(KeyCode::Char('q'), KeyModifiers::NONE)).unwrap());
        assert!(app.should_quit());
    }
}
