use image::DynamicImage;
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
};
use ratatui_image::{Resize, StatefulImage, picker::Picker, protocol::StatefulProtocol};
use std::collections::HashMap;

use crate::backend::navigator::{ChapterNavigator, NavState, NavigatorEvent};

#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub enum Focus {
    #[default]
    Input,
    Chapters,
    Reader,
}

pub struct App {
    pub focus: Focus,
    pub url_input: String,
    pub status: String,
    pub title: String,
    pub chapters: Vec<String>,
    pub chapter_list_state: ListState,
    pub current_page: usize,
    pub pages_total: usize,
    pub picker: Option<Picker>,
    pub page_states: HashMap<usize, StatefulProtocol>,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        let picker = Picker::from_query_stdio().ok();

        Self {
            focus: Focus::Input,
            url_input: String::new(),
            status: "Paste a MangaDex title url and press Enter".to_string(),
            title: String::new(),
            chapters: Vec::new(),
            chapter_list_state: ListState::default(),
            current_page: 0,
            pages_total: 0,
            picker,
            page_states: HashMap::new(),
        }
    }

    pub fn add_page_image(&mut self, page: usize, image: DynamicImage) {
        if let Some(ref picker) = self.picker {
            let protocol = picker.new_resize_protocol(image);
            self.page_states.insert(page, protocol);
        }
    }

    pub fn next_page(&mut self) {
        if self.current_page + 1 < self.pages_total {
            self.current_page += 1;
        }
    }

    pub fn prev_page(&mut self) {
        self.current_page = self.current_page.saturating_sub(1);
    }

    pub fn highlighted_chapter(&self) -> Option<usize> {
        self.chapter_list_state.selected()
    }

    pub fn move_highlight(&mut self, delta: isize) {
        if self.chapters.is_empty() {
            return;
        }
        let current = self.chapter_list_state.selected().unwrap_or(0) as isize;
        let last = self.chapters.len() as isize - 1;
        let next = (current + delta).clamp(0, last) as usize;
        self.chapter_list_state.select(Some(next));
    }

    pub fn on_navigator_event(&mut self, event: NavigatorEvent, navigator: &ChapterNavigator) {
        match event {
            NavigatorEvent::CatalogLoaded {
                title,
                names,
                selected,
            } => {
                self.status = format!("{} chapters", names.len());
                self.title = title;
                self.chapters = names;
                self.chapter_list_state.select(Some(selected));
            }
            NavigatorEvent::CatalogFailed { title_id, error } => {
                self.status = format!("Failed to load manga {}: {}", title_id, error);
            }
            NavigatorEvent::ChapterStarted { index, name } => {
                self.page_states.clear();
                self.current_page = 0;
                self.pages_total = 0;
                self.chapter_list_state.select(Some(index));
                self.status = format!("Loading {}", name);
            }
            NavigatorEvent::PageLoaded { page, total } => {
                self.pages_total = total;
                let image = navigator
                    .slots()
                    .get(page)
                    .and_then(|slot| slot.lock().image.clone());
                if let Some(image) = image {
                    self.add_page_image(page, image);
                }
            }
            NavigatorEvent::ChapterReady { index } => {
                self.status = match self.chapters.get(index) {
                    Some(name) => format!("{} loaded", name),
                    None => "Chapter loaded".to_string(),
                };
            }
        }
    }
}

pub fn ui(f: &mut Frame, app: &mut App, state: NavState) {
    let area = f.area();

    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // url input
            Constraint::Min(10),   // chapters + page
            Constraint::Length(3), // footer
        ])
        .split(area);

    draw_input(f, root[0], app);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(30), Constraint::Percentage(70)])
        .split(root[1]);

    draw_chapter_list(f, body[0], app);
    draw_page(f, body[1], app);
    draw_footer(f, root[2], app, state);
}

fn focus_style(focused: bool) -> Style {
    if focused {
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::White)
    }
}

fn draw_input(f: &mut Frame, area: Rect, app: &App) {
    let focused = app.focus == Focus::Input;
    let mut text = app.url_input.clone();
    if focused {
        text.push('▏');
    }

    let input = Paragraph::new(text).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Title URL")
            .border_style(focus_style(focused)),
    );
    f.render_widget(input, area);
}

fn draw_chapter_list(f: &mut Frame, area: Rect, app: &mut App) {
    let title = if app.title.is_empty() {
        "Chapters".to_string()
    } else {
        truncate_text(&app.title, area.width.saturating_sub(4) as usize)
    };

    let items: Vec<ListItem> = app
        .chapters
        .iter()
        .map(|name| ListItem::new(name.as_str()))
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(title)
                .border_style(focus_style(app.focus == Focus::Chapters)),
        )
        .highlight_style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▶ ");

    f.render_stateful_widget(list, area, &mut app.chapter_list_state);
}

fn draw_page(f: &mut Frame, area: Rect, app: &mut App) {
    let title = if app.pages_total == 0 {
        "Page".to_string()
    } else {
        format!("Page {}/{}", app.current_page + 1, app.pages_total)
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .title(title)
        .border_style(focus_style(app.focus == Focus::Reader));
    let inner = block.inner(area);
    f.render_widget(block, area);

    if let Some(state) = app.page_states.get_mut(&app.current_page) {
        let image_widget = StatefulImage::new().resize(Resize::Scale(None));
        f.render_stateful_widget(image_widget, inner, state);
        return;
    }

    let placeholder = if app.chapters.is_empty() {
        "No chapter selected"
    } else {
        "Loading..."
    };
    let paragraph = Paragraph::new(vec![
        Line::from(""),
        Line::from(Span::styled(placeholder, Style::default().fg(Color::DarkGray))),
    ])
    .alignment(Alignment::Center);
    f.render_widget(paragraph, inner);
}

fn draw_footer(f: &mut Frame, area: Rect, app: &App, state: NavState) {
    let state = match state {
        NavState::Idle => "idle",
        NavState::CatalogLoading => "loading manga",
        NavState::CatalogReady => "manga ready",
        NavState::ChapterLoading => "loading chapter",
        NavState::ChapterReady => "chapter ready",
    };

    let text = Line::from(vec![
        Span::styled(format!("[{}] ", state), Style::default().fg(Color::Cyan)),
        Span::raw(format!("{}  ", app.status)),
        Span::styled("Tab", Style::default().fg(Color::Yellow)),
        Span::raw(": focus  "),
        Span::styled("n/p", Style::default().fg(Color::Yellow)),
        Span::raw(": chapter  "),
        Span::styled("←/→", Style::default().fg(Color::Yellow)),
        Span::raw(": page  "),
        Span::styled("r", Style::default().fg(Color::Yellow)),
        Span::raw(": reload  "),
        Span::styled("q", Style::default().fg(Color::Yellow)),
        Span::raw(": quit"),
    ]);

    let p = Paragraph::new(text)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .alignment(Alignment::Center);
    f.render_widget(p, area);
}

fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        format!(
            "{}...",
            text.chars()
                .take(max_len.saturating_sub(3))
                .collect::<String>()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_with_chapters(count: usize) -> App {
        App {
            focus: Focus::Chapters,
            url_input: String::new(),
            status: String::new(),
            title: String::new(),
            chapters: (0..count).map(|i| format!("Vol. 1 Ch. {}", i)).collect(),
            chapter_list_state: ListState::default(),
            current_page: 0,
            pages_total: 0,
            picker: None,
            page_states: HashMap::new(),
        }
    }

    #[test]
    fn highlight_stays_in_list() {
        let mut app = app_with_chapters(3);

        app.move_highlight(-1);
        assert_eq!(app.highlighted_chapter(), Some(0));
        app.move_highlight(5);
        assert_eq!(app.highlighted_chapter(), Some(2));

        let mut empty = app_with_chapters(0);
        empty.move_highlight(1);
        assert_eq!(empty.highlighted_chapter(), None);
    }

    #[test]
    fn page_cursor_stays_in_chapter() {
        let mut app = app_with_chapters(1);
        app.pages_total = 2;

        app.prev_page();
        assert_eq!(app.current_page, 0);
        app.next_page();
        app.next_page();
        assert_eq!(app.current_page, 1);
    }

    #[tokio::test]
    async fn ready_chapter_is_named_in_status() {
        use crate::backend::config::Config;
        use crate::backend::positions::JsonPositionStore;
        use crate::backend::transport::HttpTransport;
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            cache_dir: dir.path().join("pages"),
            ..Config::default()
        };
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let navigator = ChapterNavigator::new(
            Arc::new(config),
            Arc::new(HttpTransport::new("test").unwrap()),
            Arc::new(JsonPositionStore::load(dir.path().join("positions.json"))),
            tx,
        );
        let mut app = app_with_chapters(3);

        app.on_navigator_event(NavigatorEvent::ChapterReady { index: 1 }, &navigator);
        assert_eq!(app.status, "Vol. 1 Ch. 1 loaded");

        app.on_navigator_event(NavigatorEvent::PageLoaded { page: 0, total: 4 }, &navigator);
        assert_eq!(app.pages_total, 4);
        assert!(app.page_states.is_empty());
    }

    #[test]
    fn truncates_long_titles() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("a very long title", 8), "a ver...");
    }
}
