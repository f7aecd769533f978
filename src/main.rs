mod backend;
mod ui;

use backend::config::Config;
use backend::navigator::{ChapterNavigator, NavigatorEvent};
use backend::positions::JsonPositionStore;
use backend::transport::HttpTransport;
use ui::ui::{App, Focus, ui};

use crossterm::{
    event::{Event, EventStream, KeyCode, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures::StreamExt;
use log::{info, warn};
use ratatui::{Terminal, backend::CrosstermBackend};
use std::{error::Error, fs, io, sync::Arc};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = Arc::new(Config::load());
    init_logging(&config);

    let transport = Arc::new(HttpTransport::new(&config.user_agent)?);
    let positions = Arc::new(JsonPositionStore::load(&config.positions_file));
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<NavigatorEvent>();
    let navigator = ChapterNavigator::new(config.clone(), transport, positions, event_tx);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new();

    // A title url on the command line is loaded straight away.
    if let Some(url) = std::env::args().nth(1) {
        app.url_input = url;
        submit_url(&mut app, &navigator);
    }

    let res = run_app(&mut terminal, &mut app, &navigator, &mut event_rx).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        eprintln!("{err}");
    }
    Ok(())
}

/// Logs go to a file next to the page cache; the terminal belongs to the UI.
fn init_logging(config: &Config) {
    let dir = config
        .cache_dir
        .parent()
        .unwrap_or(config.cache_dir.as_path())
        .to_path_buf();
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));

    let file = fs::create_dir_all(&dir).and_then(|_| {
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("reader.log"))
    });
    match file {
        Ok(file) => {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        Err(_) => {
            // Nowhere to write without corrupting the screen.
            builder.filter_level(log::LevelFilter::Off);
        }
    }
    builder.init();
}

fn submit_url(app: &mut App, navigator: &ChapterNavigator) {
    if navigator.select_catalog(&app.url_input) {
        info!("Opening {}", app.url_input.trim());
        app.title.clear();
        app.chapters.clear();
        app.page_states.clear();
        app.pages_total = 0;
        app.status = "Loading manga...".to_string();
        app.focus = Focus::Chapters;
    } else {
        app.status = "Not a MangaDex title url".to_string();
    }
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    navigator: &ChapterNavigator,
    event_rx: &mut mpsc::UnboundedReceiver<NavigatorEvent>,
) -> io::Result<()> {
    let mut event_stream = EventStream::new();

    loop {
        terminal.draw(|f| ui(f, app, navigator.state()))?;

        tokio::select! {
            // Redraw tick
            _ = tokio::time::sleep(tokio::time::Duration::from_millis(100)) => {}

            // Handle keyboard events
            Some(Ok(event)) = event_stream.next() => {
                if let Event::Key(key) = event {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    let quit = match app.focus {
                        Focus::Input => handle_input_keys(app, key.code, navigator),
                        Focus::Chapters => handle_chapter_keys(app, key.code, navigator),
                        Focus::Reader => handle_reader_keys(app, key.code, navigator),
                    };
                    if quit {
                        return Ok(());
                    }
                }
            }

            // Handle navigator progress
            Some(event) = event_rx.recv() => {
                app.on_navigator_event(event, navigator);
            }
        }
    }
}

fn handle_input_keys(app: &mut App, key: KeyCode, navigator: &ChapterNavigator) -> bool {
    match key {
        KeyCode::Char(c) => app.url_input.push(c),
        KeyCode::Backspace => {
            app.url_input.pop();
        }
        KeyCode::Enter => submit_url(app, navigator),
        KeyCode::Tab | KeyCode::Esc => app.focus = Focus::Chapters,
        _ => {}
    }
    false
}

/// Keys shared by the chapter list and the page view.
fn handle_navigation_keys(app: &mut App, key: KeyCode, navigator: &ChapterNavigator) -> bool {
    match key {
        KeyCode::Char('q') => return true,
        KeyCode::Char('n') => navigator.advance(1),
        KeyCode::Char('p') => navigator.advance(-1),
        KeyCode::Char('r') => navigator.load_selected(),
        KeyCode::Char('u') => app.focus = Focus::Input,
        _ => {}
    }
    false
}

fn handle_chapter_keys(app: &mut App, key: KeyCode, navigator: &ChapterNavigator) -> bool {
    match key {
        KeyCode::Up => app.move_highlight(-1),
        KeyCode::Down => app.move_highlight(1),
        KeyCode::Enter => match app.highlighted_chapter() {
            // Enter on the chapter already shown retries it.
            Some(index) if index == navigator.selected() => navigator.load_selected(),
            Some(index) => navigator.select_index(index as i64),
            None => warn!("No chapter highlighted"),
        },
        KeyCode::Tab => app.focus = Focus::Reader,
        _ => return handle_navigation_keys(app, key, navigator),
    }
    false
}

fn handle_reader_keys(app: &mut App, key: KeyCode, navigator: &ChapterNavigator) -> bool {
    match key {
        KeyCode::Left => app.prev_page(),
        KeyCode::Right => app.next_page(),
        KeyCode::Esc => app.focus = Focus::Chapters,
        KeyCode::Tab => app.focus = Focus::Input,
        _ => return handle_navigation_keys(app, key, navigator),
    }
    false
}
