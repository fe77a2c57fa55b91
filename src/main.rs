mod api;
mod app;
mod auth;
mod config;
mod csv_preview;
mod error;
mod loader;
mod logging;
mod models;
mod tasks;
mod template;
mod ui;
mod upload;
mod wizard;

use crate::api::ApiClient;
use crate::app::{App, Envelope};
use crate::auth::{RingStorage, TokenStore};
use crate::config::{API_URL_ENV, CliArgs, Config};
use anyhow::Context;
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::Terminal;
use ratatui::backend::{Backend, CrosstermBackend};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse(std::env::args().skip(1))?;
    let mut config = Config::load();
    config.apply_overrides(std::env::var(API_URL_ENV).ok(), &args);
    logging::init(&config.log_file, args.debug)?;
    info!("Starting MailForge against {}", config.api_url);

    let store: Arc<dyn TokenStore> = Arc::new(RingStorage);

    // Handle token reset
    if args.reset_token {
        store.clear().await.context("Failed to clear stored token")?;
        println!("Token cleared. Restart without --reset-token to sign in again.");
        return Ok(());
    }

    let api = ApiClient::new(&config.api_url).context("Invalid API URL")?;

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
    let mut app = App::new(config, api, store, tx);
    app.start(args.callback).await;

    let result = run(&mut terminal, &mut app, &mut rx).await;
    if let Err(e) = &result {
        error!("Exiting on error: {:#}", e);
    }

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

async fn run<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    rx: &mut UnboundedReceiver<Envelope>,
) -> anyhow::Result<()> {
    loop {
        while let Ok(envelope) = rx.try_recv() {
            app.handle_envelope(envelope).await;
        }

        terminal.draw(|f| ui::render(f, app))?;
        if app.should_quit {
            info!("Quitting");
            return Ok(());
        }

        if !event::poll(Duration::from_millis(100))? {
            continue;
        }
        if let Event::Key(key) = event::read()? {
            if key.kind == KeyEventKind::Press {
                app.handle_key(key).await;
            }
        }
    }
}
