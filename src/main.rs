// src/main.rs
mod app;
mod config;
mod handlers;
mod history;
mod i18n;
mod input;
mod logging;
mod messaging;
mod models;
mod network;
mod page;
mod panels;
mod popup;
mod prompts;
mod router;
mod selection;
mod tabs;
mod theme;
mod ui;
mod utils;
mod view;

use std::io::stdout;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{self, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tracing::{error, info, warn};

use crate::app::{App, AppOptions};
use crate::config::Settings;
use crate::history::{HistoryFilter, HistoryStore, JsonlHistoryStore, MemoryHistoryStore};
use crate::i18n::Locale;
use crate::models::ActionKind;
use crate::network::{GeminiClient, GenerationClient};
use crate::page::Page;
use crate::router::ClientFactory;

const TICK: Duration = Duration::from_millis(50);

const WELCOME: &str = "Welcome to selectai.

Select any part of this text with the mouse, or hold Shift and use the arrow
keys. A small popup appears next to the selection. From there you can summarize
the passage, rephrase it in another style, translate it, or ask a question
about it. Expand the popup to find the highlight action, which marks the key
sentences of the selection right here in the document.

Open your own file with `selectai path/to/file.txt`. The Gemini API key is read
from the config file, from SELECTAI_GEMINI_API_KEY or from GEMINI_API_KEY. Press
k to enter one now.";

#[derive(Parser)]
#[command(name = "selectai", version, about)]
struct Cli {
    /// Text file to open. Without one a short introduction is shown.
    file: Option<PathBuf>,

    /// UI and output language, overrides the config file.
    #[arg(long)]
    lang: Option<String>,

    /// Run an action at startup, e.g. '{"action":"summarize","selectedText":"..."}'.
    #[arg(long)]
    command: Option<String>,

    #[command(subcommand)]
    cmd: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Store the Gemini API key in the user config.
    SetKey { key: String },
    /// Print saved results as JSON lines, newest first.
    History {
        /// Show favorites instead of the full history.
        #[arg(long)]
        favorites: bool,
        /// summarize, rephrase, translate, discuss or highlight.
        #[arg(long)]
        kind: Option<String>,
        #[arg(long)]
        query: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::new().context("failed to load configuration")?;
    if let Some(lang) = &cli.lang {
        settings.lang = Some(lang.clone());
    }
    if let Some(dir) = settings.log_dir() {
        if let Err(e) = logging::init(&dir) {
            eprintln!("logging disabled: {e}");
        }
    }

    match cli.cmd {
        Some(Commands::SetKey { key }) => {
            config::save_api_key(&key)?;
            println!("API key saved to {}", config::get_user_config_path()?.display());
            Ok(())
        }
        Some(Commands::History { favorites, kind, query, limit }) => {
            let kind = kind
                .map(|k| ActionKind::from_id(&k).ok_or_else(|| anyhow::anyhow!("unknown action: {k}")))
                .transpose()?;
            let store = open_history(&settings);
            let records = if favorites {
                store.favorites()?
            } else {
                store.list(&HistoryFilter { kind, query, limit })?
            };
            for record in records {
                println!("{}", serde_json::to_string(&record)?);
            }
            Ok(())
        }
        None => run(cli.file, cli.command, &settings),
    }
}

fn open_history(settings: &Settings) -> Arc<dyn HistoryStore> {
    let dir = settings.history_dir().or_else(JsonlHistoryStore::default_dir);
    match dir.map(JsonlHistoryStore::open) {
        Some(Ok(store)) => Arc::new(store),
        Some(Err(e)) => {
            warn!("history unavailable, keeping results in memory: {e}");
            Arc::new(MemoryHistoryStore::new())
        }
        None => Arc::new(MemoryHistoryStore::new()),
    }
}

/// Reads the credential fresh each time so keys saved elsewhere are picked up.
fn client_factory() -> ClientFactory {
    Arc::new(|| {
        let key = Settings::new().ok()?.credential()?;
        match GeminiClient::new(key) {
            Ok(client) => Some(Arc::new(client) as Arc<dyn GenerationClient>),
            Err(e) => {
                error!("could not build Gemini client: {e}");
                None
            }
        }
    })
}

fn run(file: Option<PathBuf>, command: Option<String>, settings: &Settings) -> anyhow::Result<()> {
    let page = match &file {
        Some(path) => Page::load(path)?,
        None => Page::from_text("selectai", WELCOME),
    };
    let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let options = AppOptions {
        locale: Arc::new(Locale::load(&settings.language())),
        shell: settings.shell_options(),
        generation: settings.generation_config(),
        min_selection_length: settings.min_selection_length,
        chat_max_turns: settings.chat_max_turns,
    };
    let mut app = App::new(page, options, open_history(settings), client_factory(), rt.handle().clone());

    if let Some(json) = command {
        let command = messaging::parse_command(&json)?;
        app.queue_command(command);
    }

    terminal::enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    info!(file = ?file, "selectai started");

    let result = event_loop(&mut terminal, &mut app);

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;
    rt.shutdown_timeout(Duration::from_millis(200));
    if let Err(e) = &result {
        error!("exiting with error: {e:#}");
    }
    result
}

fn event_loop<B: ratatui::backend::Backend>(terminal: &mut Terminal<B>, app: &mut App) -> anyhow::Result<()> {
    let size = terminal.size()?;
    app.resize(size.width, size.height);
    loop {
        app.tick(Instant::now());
        terminal.draw(|f| app.draw(f))?;

        if event::poll(TICK)? {
            if !input::handle_event(app, event::read()?)? {
                break;
            }
        }
        if app.should_quit() {
            break;
        }
    }
    Ok(())
}
