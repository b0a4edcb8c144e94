use ratatui::style::{Color, Modifier, Style};

pub struct Theme {
    pub root_bg: Color,
    pub focus_border: Color,
    pub blurred_border: Color,
    pub text: Color,
    pub selection_bg: Color,
    pub selection_fg: Color,

    // Page
    pub page_title: Style,
    pub highlight: Style,
    pub cursor: Style,
    pub footer: Style,
    pub status: Style,

    // Popup
    pub popup_title: Style,
    pub popup_border: Style,
    pub popup_text: Style,
    pub preview: Style,
    pub tab: Style,
    pub tab_active: Style,
    pub button: Style,
    pub button_disabled: Style,
    pub control: Style,
    pub link: Style,
    pub result: Style,
    pub streaming: Style,
    pub error: Style,
    pub info: Style,
    pub user_turn: Style,
    pub assistant_turn: Style,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            root_bg: Color::Black,
            focus_border: Color::Cyan,
            blurred_border: Color::DarkGray,
            text: Color::White,
            selection_bg: Color::Blue,
            selection_fg: Color::White,

            page_title: Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            highlight: Style::default().bg(Color::Yellow).fg(Color::Black),
            cursor: Style::default().add_modifier(Modifier::REVERSED),
            footer: Style::default().fg(Color::Gray).add_modifier(Modifier::DIM),
            status: Style::default().fg(Color::Green),

            popup_title: Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            popup_border: Style::default().bg(Color::Black),
            popup_text: Style::default().fg(Color::White),
            preview: Style::default().fg(Color::Gray).add_modifier(Modifier::ITALIC),
            tab: Style::default().fg(Color::Gray),
            tab_active: Style::default().fg(Color::Black).bg(Color::Cyan).add_modifier(Modifier::BOLD),
            button: Style::default().fg(Color::Black).bg(Color::Green).add_modifier(Modifier::BOLD),
            button_disabled: Style::default().fg(Color::Gray).bg(Color::DarkGray),
            control: Style::default().fg(Color::Yellow),
            link: Style::default().fg(Color::Cyan).add_modifier(Modifier::UNDERLINED),
            result: Style::default().fg(Color::White),
            streaming: Style::default().fg(Color::White).add_modifier(Modifier::DIM),
            error: Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            info: Style::default().fg(Color::Magenta),
            user_turn: Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
            assistant_turn: Style::default().fg(Color::Blue).add_modifier(Modifier::BOLD),
        }
    }
}
