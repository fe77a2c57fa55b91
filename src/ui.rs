use crate::app::{
    App, AccountsView, CampaignView, ConnectForm, ConnectPanel, DatasetsFocus, DatasetsView,
    HOME_MENU, HomeView, LoginView, SignupView, View,
};
use crate::config::Keybindings;
use crate::models::{self, cell_text};
use crate::template;
use crate::upload::{self, UploadState};
use crate::wizard::{ScheduleType, Step};
use crossterm::event::{KeyCode, KeyEvent};
use inflections::case::to_title_case;
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Gauge, List, ListItem, Paragraph, Row, Table, Tabs, Wrap},
};
use tui_textarea::{CursorMove, TextArea};

pub struct FormField<'a> {
    pub label: &'static str,
    pub input: TextArea<'a>,
    masked: bool,
    multiline: bool,
}

/// A vertical stack of labelled text inputs with one focused field.
pub struct Form<'a> {
    pub fields: Vec<FormField<'a>>,
    pub focused: usize,
}

fn text_area<'a>(value: &str, masked: bool) -> TextArea<'a> {
    let mut input = TextArea::from(value.lines());
    // Disable cursor line highlighting for cleaner look
    input.set_cursor_line_style(Style::default());
    if masked {
        input.set_mask_char('•');
    }
    input.move_cursor(CursorMove::Bottom);
    input.move_cursor(CursorMove::End);
    input
}

impl<'a> Form<'a> {
    pub fn new(labels: &[&'static str]) -> Self {
        Self {
            fields: labels
                .iter()
                .map(|&label| FormField {
                    label,
                    input: text_area("", false),
                    masked: false,
                    multiline: false,
                })
                .collect(),
            focused: 0,
        }
    }

    pub fn masked(mut self, index: usize) -> Self {
        if let Some(field) = self.fields.get_mut(index) {
            field.masked = true;
            field.input.set_mask_char('•');
        }
        self
    }

    pub fn multiline(mut self, index: usize) -> Self {
        if let Some(field) = self.fields.get_mut(index) {
            field.multiline = true;
        }
        self
    }

    pub fn value(&self, index: usize) -> String {
        self.fields
            .get(index)
            .map(|f| f.input.lines().join("\n"))
            .unwrap_or_default()
    }

    pub fn set_value(&mut self, index: usize, value: &str) {
        if let Some(field) = self.fields.get_mut(index) {
            field.input = text_area(value, field.masked);
        }
    }

    pub fn next_field(&mut self) {
        if !self.fields.is_empty() {
            self.focused = (self.focused + 1) % self.fields.len();
        }
    }

    pub fn prev_field(&mut self) {
        if !self.fields.is_empty() {
            self.focused = (self.focused + self.fields.len() - 1) % self.fields.len();
        }
    }

    /// Feed a key to the focused input. Enter only reaches multiline fields.
    pub fn input(&mut self, key: KeyEvent) -> bool {
        let Some(field) = self.fields.get_mut(self.focused) else {
            return false;
        };
        if key.code == KeyCode::Enter && !field.multiline {
            return false;
        }
        field.input.input(key)
    }

    pub fn insert_str(&mut self, text: &str) {
        if let Some(field) = self.fields.get_mut(self.focused) {
            field.input.insert_str(text);
        }
    }
}

fn focus_style(focused: bool) -> Style {
    if focused {
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Gray)
    }
}

fn panel(title: &str, focused: bool) -> Block<'_> {
    Block::default()
        .borders(Borders::ALL)
        .title(format!(" {} ", title))
        .border_style(if focused {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::Gray)
        })
}

fn selected_style(selected: bool) -> Style {
    if selected {
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    }
}

/// Screen position of a textarea cursor inside a bordered chunk.
fn cursor_offset(origin: u16, pos: usize) -> u16 {
    origin
        .saturating_add(1)
        .saturating_add(u16::try_from(pos).unwrap_or(u16::MAX))
}

/// Render each field in its own bordered box. Multiline fields take what
/// height is left over.
fn render_form(f: &mut Frame, form: &mut Form<'_>, area: Rect, active: bool) {
    let constraints: Vec<Constraint> = form
        .fields
        .iter()
        .map(|field| {
            if field.multiline {
                Constraint::Min(5)
            } else {
                Constraint::Length(3)
            }
        })
        .collect();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(area);

    let focused = form.focused;
    for (i, field) in form.fields.iter_mut().enumerate() {
        let is_focused = active && i == focused;
        field.input.set_block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" {} ", field.label))
                .border_style(focus_style(is_focused)),
        );
        f.render_widget(&field.input, chunks[i]);

        if is_focused {
            let (row, col) = field.input.cursor();
            let chunk = chunks[i];
            let x = cursor_offset(chunk.x, col).min(chunk.right().saturating_sub(2));
            let y = cursor_offset(chunk.y, row).min(chunk.bottom().saturating_sub(2));
            f.set_cursor_position((x, y));
        }
    }
}

/// Body of a list panel with nothing to show. A failed load shows its error.
fn empty_list<'a>(error: Option<&'a str>, empty: &'a str) -> Paragraph<'a> {
    let (text, color) = match error {
        Some(error) => (error, Color::Red),
        None => (empty, Color::DarkGray),
    };
    Paragraph::new(text)
        .style(Style::default().fg(color))
        .wrap(Wrap { trim: true })
}

fn messages<'a>(error: Option<&'a str>, notice: Option<&'a str>) -> Vec<Line<'a>> {
    let mut lines = Vec::new();
    if let Some(error) = error {
        lines.push(Line::styled(error, Style::default().fg(Color::Red)));
    }
    if let Some(notice) = notice {
        lines.push(Line::styled(notice, Style::default().fg(Color::Green)));
    }
    lines
}

fn hint(kb: &Keybindings, pairs: &[(&Vec<String>, &str)]) -> String {
    pairs
        .iter()
        .filter_map(|(keys, label)| keys.first().map(|k| format!("{} {}", k, label)))
        .collect::<Vec<_>>()
        .join(" · ")
        + &format!(" · {} quit", kb.quit.first().map(String::as_str).unwrap_or("?"))
}

pub fn render(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // Header
            Constraint::Min(0),    // Screen
            Constraint::Length(1), // Key hints
        ])
        .split(f.area());

    let user = app
        .user
        .as_ref()
        .map(|u| u.email.as_str())
        .unwrap_or("not signed in");
    let header = Line::from(vec![
        Span::styled(
            " MailForge ",
            Style::default()
                .fg(Color::Black)
                .bg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(" {} ", app.screen().title())),
        Span::styled(
            format!("· {} · {}", user, app.api_url()),
            Style::default().fg(Color::DarkGray),
        ),
    ]);
    f.render_widget(Paragraph::new(header), chunks[0]);

    if app.checking_session {
        let area = centered_rect(40, 20, chunks[1]);
        f.render_widget(
            Paragraph::new("Checking session…")
                .block(panel("MailForge", true))
                .style(Style::default().fg(Color::Yellow)),
            area,
        );
        return;
    }

    let kb = app.config.keybindings.clone();
    let footer = match &mut app.view {
        View::Login(v) => {
            render_login(f, v, chunks[1]);
            hint(
                &kb,
                &[
                    (&kb.next_field, "next field"),
                    (&kb.select, "sign in"),
                    (&kb.switch_form, "create account"),
                ],
            )
        }
        View::Signup(v) => {
            render_signup(f, v, chunks[1]);
            hint(
                &kb,
                &[
                    (&kb.next_field, "next field"),
                    (&kb.select, "sign up"),
                    (&kb.back, "back to sign in"),
                ],
            )
        }
        View::Home(v) => {
            render_home(f, v, chunks[1]);
            hint(&kb, &[(&kb.move_down, "move"), (&kb.select, "open")])
        }
        View::Datasets(v) => {
            render_datasets(f, v, chunks[1]);
            match v.focus {
                DatasetsFocus::List => hint(
                    &kb,
                    &[
                        (&kb.preview, "preview"),
                        (&kb.next_field, "upload form"),
                        (&kb.upload, "upload"),
                        (&kb.reload, "reload"),
                        (&kb.back, "back"),
                    ],
                ),
                DatasetsFocus::Upload => hint(
                    &kb,
                    &[
                        (&kb.select, "load file / upload"),
                        (&kb.cycle_column, "email column"),
                        (&kb.submit, "upload"),
                        (&kb.back, "list"),
                    ],
                ),
            }
        }
        View::Accounts(v) => {
            render_accounts(f, v, chunks[1]);
            hint(
                &kb,
                &[
                    (&kb.connect_gmail, "gmail"),
                    (&kb.connect_sendgrid, "sendgrid"),
                    (&kb.rotate_key, "rotate key"),
                    (&kb.delete, "disconnect"),
                    (&kb.reload, "reload"),
                    (&kb.back, "back"),
                ],
            )
        }
        View::Campaign(v) => {
            render_campaign(f, v, chunks[1]);
            campaign_hint(&kb, v.step())
        }
    };

    f.render_widget(
        Paragraph::new(footer).style(Style::default().fg(Color::DarkGray)),
        chunks[2],
    );
}

fn campaign_hint(kb: &Keybindings, step: Step) -> String {
    let mut pairs: Vec<(&Vec<String>, &str)> = vec![
        (&kb.prev_step, "back"),
        (&kb.next_step, "next"),
    ];
    match step {
        Step::SelectData => pairs.push((&kb.select, "choose")),
        Step::EmailAccount => {
            pairs.push((&kb.select, "choose"));
            pairs.push((&kb.connect_gmail, "gmail"));
            pairs.push((&kb.connect_sendgrid, "sendgrid"));
        }
        Step::Compose => {
            pairs.push((&kb.generate, "generate"));
            pairs.push((&kb.cycle_column, "next column"));
            pairs.push((&kb.insert_column, "insert column"));
        }
        Step::Schedule => {
            pairs.push((&kb.toggle_schedule, "now/later"));
            pairs.push((&kb.toggle_throttle, "throttle"));
        }
        Step::Review => pairs.push((&kb.submit, "launch")),
    }
    pairs.push((&kb.back, "leave"));
    hint(kb, &pairs)
}

fn render_login(f: &mut Frame, v: &mut LoginView, area: Rect) {
    let area = centered_rect(60, 60, area);
    f.render_widget(Clear, area);
    let block = panel("Sign in to MailForge", true);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([Constraint::Length(6), Constraint::Min(2)])
        .split(inner);
    render_form(f, &mut v.form, chunks[0], !v.loading);

    let mut lines = messages(v.error.as_deref(), v.notice.as_deref());
    if v.loading {
        lines.push(Line::styled("Signing in…", Style::default().fg(Color::Yellow)));
    }
    f.render_widget(Paragraph::new(lines).wrap(Wrap { trim: true }), chunks[1]);
}

fn render_signup(f: &mut Frame, v: &mut SignupView, area: Rect) {
    let area = centered_rect(60, 70, area);
    f.render_widget(Clear, area);
    let block = panel("Create your account", true);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([Constraint::Length(9), Constraint::Min(2)])
        .split(inner);
    render_form(f, &mut v.form, chunks[0], !v.loading);

    let mut lines = messages(v.error.as_deref(), None);
    if v.loading {
        lines.push(Line::styled(
            "Creating account…",
            Style::default().fg(Color::Yellow),
        ));
    }
    f.render_widget(Paragraph::new(lines).wrap(Wrap { trim: true }), chunks[1]);
}

fn render_home(f: &mut Frame, v: &HomeView, area: Rect) {
    let area = centered_rect(50, 50, area);
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(6), Constraint::Length(3)])
        .split(area);

    let items: Vec<ListItem> = HOME_MENU
        .iter()
        .enumerate()
        .map(|(i, (label, _))| {
            let marker = if i == v.selected { "▶ " } else { "  " };
            ListItem::new(format!("{}{}", marker, label)).style(selected_style(i == v.selected))
        })
        .collect();
    f.render_widget(List::new(items).block(panel("What would you like to do?", true)), chunks[0]);

    if let Some(notice) = &v.notice {
        f.render_widget(
            Paragraph::new(notice.as_str())
                .style(Style::default().fg(Color::Green))
                .wrap(Wrap { trim: true }),
            chunks[1],
        );
    }
}

fn status_color(status: Option<models::DatasetStatus>) -> Color {
    match status {
        Some(models::DatasetStatus::Completed) => Color::Green,
        Some(models::DatasetStatus::Processing) => Color::Yellow,
        Some(models::DatasetStatus::Failed) => Color::Red,
        _ => Color::Gray,
    }
}

fn render_datasets(f: &mut Frame, v: &mut DatasetsView, area: Rect) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(area);
    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(9), Constraint::Min(4)])
        .split(columns[0]);

    // Recent datasets
    let title = if v.datasets.is_loading() {
        "Recent Datasets (loading…)"
    } else {
        "Recent Datasets"
    };
    let list_focused = v.focus == DatasetsFocus::List;
    if v.datasets.data().is_empty() {
        let text = if v.datasets.is_loading() {
            "Loading…"
        } else {
            "No datasets yet. Upload a CSV to get started."
        };
        f.render_widget(
            empty_list(v.datasets.error(), text).block(panel(title, list_focused)),
            left[0],
        );
    } else {
        let rows: Vec<Row> = v
            .datasets
            .data()
            .iter()
            .enumerate()
            .map(|(i, ds)| {
                let status = ds.status.map(|s| to_title_case(s.as_str())).unwrap_or_default();
                Row::new(vec![
                    Span::raw(ds.name.clone()),
                    Span::raw(ds.rows.map(|r| r.to_string()).unwrap_or_default()),
                    Span::styled(status, Style::default().fg(status_color(ds.status))),
                    Span::raw(ds.date.clone().unwrap_or_default()),
                ])
                .style(selected_style(i == v.selected))
            })
            .collect();
        let table = Table::new(
            rows,
            [
                Constraint::Percentage(40),
                Constraint::Length(8),
                Constraint::Length(12),
                Constraint::Min(10),
            ],
        )
        .header(
            Row::new(vec!["Name", "Rows", "Status", "Date"])
                .style(Style::default().add_modifier(Modifier::BOLD)),
        )
        .block(panel(title, list_focused));
        f.render_widget(table, left[0]);
    }

    // Server preview
    let preview_block = panel("Preview", false);
    match &v.preview {
        Some(preview) => {
            let title = preview.name.clone().unwrap_or_else(|| "Preview".to_string());
            render_cells(
                f,
                &preview.json_schema,
                &preview.cells(),
                left[1],
                panel(&title, false),
            );
        }
        None => {
            let text = if v.preview_loading {
                "Loading preview…"
            } else {
                "Select a dataset and press preview."
            };
            f.render_widget(
                Paragraph::new(text)
                    .style(Style::default().fg(Color::DarkGray))
                    .block(preview_block),
                left[1],
            );
        }
    }

    // Upload panel
    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(6), // Path + name
            Constraint::Length(3), // Email column
            Constraint::Length(3), // Progress
            Constraint::Length(2), // Messages
            Constraint::Min(3),    // Local preview
        ])
        .split(columns[1]);

    render_form(f, &mut v.form, right[0], v.focus == DatasetsFocus::Upload);

    let email_column = match (&v.email_column, &v.csv) {
        (Some(column), _) => column.clone(),
        (None, Some(_)) => "none detected, cycle to pick one".to_string(),
        (None, None) => "load a file first".to_string(),
    };
    let file_info = v
        .tracker
        .file()
        .map(|file| format!(" · {} ({})", file.name, upload::format_size(file.size)))
        .unwrap_or_default();
    f.render_widget(
        Paragraph::new(format!("{}{}", email_column, file_info))
            .block(panel("Email column", false)),
        right[1],
    );

    let state = v.tracker.state();
    let gauge_color = match state {
        UploadState::Complete => Color::Green,
        UploadState::Processing => Color::Yellow,
        _ => Color::Cyan,
    };
    f.render_widget(
        Gauge::default()
            .block(panel("Upload", false))
            .gauge_style(Style::default().fg(gauge_color))
            .percent(v.tracker.percent().into())
            .label(match state {
                UploadState::Uploading { percent } => format!("Uploading… {}%", percent),
                other => other.label().to_string(),
            }),
        right[2],
    );

    let mut lines = messages(v.error.as_deref(), v.notice.as_deref());
    if v.reading_file {
        lines.push(Line::styled("Reading file…", Style::default().fg(Color::Yellow)));
    }
    f.render_widget(Paragraph::new(lines).wrap(Wrap { trim: true }), right[3]);

    if let Some(csv) = &v.csv {
        render_cells(f, &csv.columns, &csv.rows, right[4], panel("File preview", false));
    }
}

fn render_cells(
    f: &mut Frame,
    columns: &[String],
    rows: &[Vec<String>],
    area: Rect,
    block: Block<'_>,
) {
    if columns.is_empty() {
        f.render_widget(Paragraph::new("No columns").block(block), area);
        return;
    }
    let widths = vec![Constraint::Min(8); columns.len()];
    let table = Table::new(
        rows.iter().map(|r| Row::new(r.clone())).collect::<Vec<_>>(),
        widths,
    )
    .header(
        Row::new(columns.to_vec()).style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
    )
    .block(block);
    f.render_widget(table, area);
}

fn account_items<'a>(
    accounts: &'a [models::EmailAccount],
    cursor: usize,
    chosen: Option<i64>,
) -> Vec<ListItem<'a>> {
    accounts
        .iter()
        .enumerate()
        .map(|(i, acc)| {
            let marker = if Some(acc.id) == chosen { "● " } else { "  " };
            let active = if acc.is_active { "active" } else { "inactive" };
            ListItem::new(format!(
                "{}{}  [{}]  {}",
                marker,
                acc.email_address,
                to_title_case(acc.provider.as_str()),
                active
            ))
            .style(selected_style(i == cursor))
        })
        .collect()
}

fn render_panel_status(f: &mut Frame, panel_state: &ConnectPanel, area: Rect) {
    let mut lines = messages(panel_state.error.as_deref(), panel_state.notice.as_deref());
    if panel_state.gmail_loading {
        lines.push(Line::styled(
            "Requesting Google sign-in link…",
            Style::default().fg(Color::Yellow),
        ));
    }
    if let Some(url) = &panel_state.gmail_url {
        lines.push(Line::raw(
            "Your browser should have opened. If not, visit this URL to authorize Gmail:",
        ));
        lines.push(Line::styled(
            url.as_str(),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::UNDERLINED),
        ));
    }
    f.render_widget(Paragraph::new(lines).wrap(Wrap { trim: false }), area);
}

fn render_connect_popup(f: &mut Frame, title: &str, form: &mut ConnectForm, area: Rect) {
    let height = (form.form.fields.len() as u16 * 3 + 4).min(area.height);
    let popup = centered_rect(60, 100, area);
    let popup = Rect {
        y: popup.y + popup.height.saturating_sub(height) / 2,
        height,
        ..popup
    };
    f.render_widget(Clear, popup);
    let block = panel(title, true);
    let inner = block.inner(popup);
    f.render_widget(block, popup);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(form.form.fields.len() as u16 * 3),
            Constraint::Min(1),
        ])
        .split(inner);
    render_form(f, &mut form.form, chunks[0], !form.busy);
    let mut lines = messages(form.error.as_deref(), None);
    if form.busy {
        lines.push(Line::styled("Saving…", Style::default().fg(Color::Yellow)));
    }
    f.render_widget(Paragraph::new(lines), chunks[1]);
}

fn render_accounts(f: &mut Frame, v: &mut AccountsView, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(5), Constraint::Length(5)])
        .split(area);

    let title = if v.accounts.is_loading() {
        "Connected Accounts (loading…)"
    } else {
        "Connected Accounts"
    };
    if v.accounts.data().is_empty() && !v.accounts.is_loading() {
        f.render_widget(
            empty_list(
                v.accounts.error(),
                "No email accounts connected yet. Connect Gmail or SendGrid.",
            )
            .block(panel(title, true)),
            chunks[0],
        );
    } else {
        let items = account_items(v.accounts.data(), v.selected, None);
        f.render_widget(List::new(items).block(panel(title, true)), chunks[0]);
    }

    let mut status_area = chunks[1];
    if let Some(id) = v.confirm_delete {
        let email = v
            .accounts
            .data()
            .iter()
            .find(|a| a.id == id)
            .map(|a| a.email_address.as_str())
            .unwrap_or("this account");
        let split = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(1), Constraint::Min(0)])
            .split(status_area);
        f.render_widget(
            Paragraph::new(format!("Press delete again to disconnect {}", email))
                .style(Style::default().fg(Color::Red)),
            split[0],
        );
        status_area = split[1];
    }
    render_panel_status(f, &v.panel, status_area);

    if let Some(form) = &mut v.panel.sendgrid {
        render_connect_popup(f, "Connect SendGrid", form, area);
    }
    if let Some(rotation) = &mut v.rotation {
        let title = format!("Rotate API key for {}", rotation.email);
        render_connect_popup(f, &title, &mut rotation.form, area);
    }
}

fn render_campaign(f: &mut Frame, v: &mut CampaignView, area: Rect) {
    if let Some(job) = &v.created_job {
        let area = centered_rect(60, 40, area);
        let mut lines = vec![
            Line::styled(
                "Campaign launched!",
                Style::default()
                    .fg(Color::Green)
                    .add_modifier(Modifier::BOLD),
            ),
            Line::raw(""),
            Line::raw(format!("Job #{}", job.job_id)),
        ];
        if let Some(status) = &job.status {
            lines.push(Line::raw(format!("Status: {}", to_title_case(status))));
        }
        if let Some(message) = &job.message {
            lines.push(Line::raw(message.clone()));
        }
        lines.push(Line::raw(""));
        lines.push(Line::styled(
            "Returning home…",
            Style::default().fg(Color::DarkGray),
        ));
        f.render_widget(
            Paragraph::new(lines)
                .block(panel("Create Campaign", true))
                .wrap(Wrap { trim: true }),
            area,
        );
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Steps
            Constraint::Min(0),    // Step body
            Constraint::Length(1), // Hint
        ])
        .split(area);

    let titles: Vec<Line> = Step::ALL
        .iter()
        .enumerate()
        .map(|(i, step)| Line::raw(format!("{}. {}", i + 1, step.title())))
        .collect();
    f.render_widget(
        Tabs::new(titles)
            .select(v.seq.current())
            .block(panel("Create Campaign", false))
            .highlight_style(
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            ),
        chunks[0],
    );

    match v.step() {
        Step::SelectData => render_select_data(f, v, chunks[1]),
        Step::EmailAccount => render_select_account(f, v, chunks[1]),
        Step::Compose => render_compose(f, v, chunks[1]),
        Step::Schedule => render_schedule(f, v, chunks[1]),
        Step::Review => render_review(f, v, chunks[1]),
    }

    if let Some(hint) = &v.hint {
        f.render_widget(
            Paragraph::new(hint.as_str()).style(Style::default().fg(Color::Red)),
            chunks[2],
        );
    }
}

fn render_select_data(f: &mut Frame, v: &CampaignView, area: Rect) {
    let title = if v.datasets.is_loading() {
        "Select Data (loading…)"
    } else {
        "Select Data"
    };
    if v.datasets.data().is_empty() && !v.datasets.is_loading() {
        f.render_widget(
            empty_list(
                v.datasets.error(),
                "No datasets found. Upload one from the Datasets screen first.",
            )
            .block(panel(title, true)),
            area,
        );
        return;
    }
    let items: Vec<ListItem> = v
        .datasets
        .data()
        .iter()
        .enumerate()
        .map(|(i, ds)| {
            let marker = if Some(ds.id) == v.draft.dataset_id { "● " } else { "  " };
            let rows = ds.rows.map(|r| format!("  {} rows", r)).unwrap_or_default();
            ListItem::new(format!("{}{}{}", marker, ds.name, rows))
                .style(selected_style(i == v.dataset_cursor))
        })
        .collect();
    f.render_widget(List::new(items).block(panel(title, true)), area);
}

fn render_select_account(f: &mut Frame, v: &mut CampaignView, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(4), Constraint::Length(4)])
        .split(area);
    let title = if v.accounts.is_loading() {
        "Email Account (loading…)"
    } else {
        "Email Account"
    };
    if v.accounts.data().is_empty() && !v.accounts.is_loading() {
        f.render_widget(
            empty_list(
                v.accounts.error(),
                "No email accounts connected. Connect Gmail or SendGrid to continue.",
            )
            .block(panel(title, true)),
            chunks[0],
        );
    } else {
        let items = account_items(v.accounts.data(), v.account_cursor, v.draft.email_account_id);
        f.render_widget(List::new(items).block(panel(title, true)), chunks[0]);
    }
    render_panel_status(f, &v.panel, chunks[1]);

    if let Some(form) = &mut v.panel.sendgrid {
        render_connect_popup(f, "Connect SendGrid", form, area);
    }
}

fn render_compose(f: &mut Frame, v: &mut CampaignView, area: Rect) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(70), Constraint::Percentage(30)])
        .split(area);
    render_form(f, &mut v.compose, columns[0], !v.generating);

    let side = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(4), Constraint::Length(4)])
        .split(columns[1]);

    let chips: Vec<ListItem> = v
        .columns
        .data()
        .iter()
        .enumerate()
        .map(|(i, c)| {
            ListItem::new(format!("{{{{{}}}}}", c)).style(selected_style(i == v.column_cursor))
        })
        .collect();
    let title = if v.columns.is_loading() {
        "Placeholders (loading…)"
    } else {
        "Placeholders"
    };
    f.render_widget(List::new(chips).block(panel(title, false)), side[0]);

    let mut lines = messages(v.llm_error.as_deref(), None);
    if v.generating {
        lines.push(Line::styled(
            "Generating template…",
            Style::default().fg(Color::Yellow),
        ));
    }
    f.render_widget(Paragraph::new(lines).wrap(Wrap { trim: true }), side[1]);
}

fn render_schedule(f: &mut Frame, v: &mut CampaignView, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(4), Constraint::Min(0)])
        .split(area);

    let check = |on: bool| if on { "[x]" } else { "[ ]" };
    let scheduled = v.draft.schedule_type == ScheduleType::Scheduled;
    let lines = vec![
        Line::raw(format!(
            "{} Send immediately   {} Schedule for later",
            check(!scheduled),
            check(scheduled)
        )),
        Line::raw(format!(
            "{} Custom throttle (default {} emails/minute)",
            check(v.draft.throttle_enabled),
            crate::wizard::DEFAULT_THROTTLE
        )),
    ];
    f.render_widget(
        Paragraph::new(lines).block(panel("Schedule & Throttling", false)),
        chunks[0],
    );

    render_form(f, &mut v.schedule, chunks[1], true);
}

fn render_review(f: &mut Frame, v: &CampaignView, area: Rect) {
    let label = |text: &'static str| {
        Span::styled(
            format!("{:<12}", text),
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::BOLD),
        )
    };

    let dataset = v
        .draft
        .dataset_id
        .and_then(|id| v.datasets.data().iter().find(|d| d.id == id))
        .map(|d| d.name.clone())
        .unwrap_or_else(|| "none selected".to_string());
    let account = v
        .draft
        .email_account_id
        .and_then(|id| v.accounts.data().iter().find(|a| a.id == id))
        .map(|a| a.email_address.clone())
        .unwrap_or_else(|| "none selected".to_string());
    let date = v.draft.scheduled_date.trim();
    let time = v.draft.scheduled_time.trim();
    let schedule = match v.draft.schedule_type {
        ScheduleType::Scheduled if !date.is_empty() && !time.is_empty() => {
            format!("{} {}", date, time)
        }
        ScheduleType::Scheduled => "Immediately (no date and time set)".to_string(),
        ScheduleType::Now => "Immediately".to_string(),
    };

    let mut lines = Vec::new();
    if !v.draft.campaign_name.trim().is_empty() {
        lines.push(Line::from(vec![
            label("Campaign"),
            Span::raw(v.draft.campaign_name.clone()),
        ]));
    }
    lines.extend([
        Line::from(vec![label("Dataset"), Span::raw(dataset)]),
        Line::from(vec![label("Send from"), Span::raw(account)]),
        Line::from(vec![label("Schedule"), Span::raw(schedule)]),
        Line::from(vec![
            label("Throttle"),
            Span::raw(format!("{} emails/minute", v.draft.throttle_per_minute())),
        ]),
        Line::from(vec![
            label("Subject"),
            Span::raw(v.draft.subject_template.clone()),
        ]),
        Line::raw(""),
    ]);

    let combined = format!("{}\n{}", v.draft.subject_template, v.draft.body_template);
    let unknown = template::unknown_placeholders(&combined, v.columns.data());
    if !unknown.is_empty() {
        lines.push(Line::styled(
            format!(
                "Warning: no dataset column for {}",
                unknown
                    .iter()
                    .map(|p| format!("{{{{{}}}}}", p))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Style::default().fg(Color::Yellow),
        ));
    }

    if let Some(sample) = &v.sample {
        let recipient = sample
            .as_object()
            .and_then(|row| {
                v.datasets
                    .data()
                    .iter()
                    .find(|d| Some(d.id) == v.draft.dataset_id)
                    .and_then(|d| d.email_column.as_ref())
                    .and_then(|col| row.get(col))
            })
            .map(cell_text);
        lines.push(Line::styled(
            match recipient {
                Some(to) => format!("Sample for {}", to),
                None => "Sample for the first row".to_string(),
            },
            Style::default().add_modifier(Modifier::BOLD),
        ));
        lines.push(Line::raw(format!(
            "Subject: {}",
            template::render(&v.draft.subject_template, sample)
        )));
        for line in template::render(&v.draft.body_template, sample).lines() {
            lines.push(Line::raw(line.to_string()));
        }
        lines.push(Line::raw(""));
    }

    if let Some(error) = &v.error {
        lines.push(Line::styled(error.as_str(), Style::default().fg(Color::Red)));
    }
    if v.submitting {
        lines.push(Line::styled(
            "Launching campaign…",
            Style::default().fg(Color::Yellow),
        ));
    } else if !v.draft.can_submit() {
        lines.push(Line::styled(
            "A dataset, an account, a subject and a body are required to launch.",
            Style::default().fg(Color::DarkGray),
        ));
    }

    f.render_widget(
        Paragraph::new(lines)
            .block(panel("Review Campaign", true))
            .wrap(Wrap { trim: false }),
        area,
    );
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiClient;
    use crate::app::{App, Screen};
    use crate::auth::MemoryStorage;
    use crate::config::Config;
    use crossterm::event::KeyModifiers;
    use ratatui::{Terminal, backend::TestBackend};
    use std::sync::Arc;

    fn screen_text(terminal: &Terminal<TestBackend>) -> String {
        let buffer = terminal.backend().buffer();
        let mut text = String::new();
        for y in 0..buffer.area.height {
            for x in 0..buffer.area.width {
                text.push_str(buffer[(x, y)].symbol());
            }
            text.push('\n');
        }
        text
    }

    fn app() -> App {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let api = ApiClient::new("http://localhost:8000").unwrap();
        App::new(
            Config::default(),
            api,
            Arc::new(MemoryStorage::default()),
            tx,
        )
    }

    #[test]
    fn test_form_focus_wraps_and_masks() {
        let mut form = Form::new(&["Email", "Password"]).masked(1);
        form.prev_field();
        assert_eq!(form.focused, 1);
        form.next_field();
        assert_eq!(form.focused, 0);

        form.set_value(1, "hunter2");
        assert_eq!(form.value(1), "hunter2");
        assert_eq!(form.fields[1].input.mask_char(), Some('•'));
    }

    #[test]
    fn test_enter_only_reaches_multiline_fields() {
        let mut form = Form::new(&["Subject", "Body"]).multiline(1);
        form.input(KeyEvent::new(KeyCode::Char('a'), KeyModifiers::NONE));
        assert!(!form.input(KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE)));
        assert_eq!(form.value(0), "a");

        form.next_field();
        form.input(KeyEvent::new(KeyCode::Char('x'), KeyModifiers::NONE));
        form.input(KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE));
        form.input(KeyEvent::new(KeyCode::Char('y'), KeyModifiers::NONE));
        assert_eq!(form.value(1), "x\ny");
    }

    #[test]
    fn test_insert_placeholder_at_cursor() {
        let mut form = Form::new(&["Subject"]);
        form.set_value(0, "Hi ");
        form.insert_str("{{first_name}}");
        assert_eq!(form.value(0), "Hi {{first_name}}");
    }

    #[tokio::test]
    async fn test_login_screen_renders() {
        let mut app = app();
        let mut terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();
        terminal.draw(|f| render(f, &mut app)).unwrap();
        let text = screen_text(&terminal);
        assert!(text.contains("Sign in to MailForge"));
        assert!(text.contains("Password"));
    }

    #[tokio::test]
    async fn test_every_signed_in_screen_renders() {
        let mut app = app();
        app.user = Some(models::User {
            id: serde_json::json!(1),
            email: "ada@example.com".into(),
        });
        let mut terminal = Terminal::new(TestBackend::new(120, 40)).unwrap();
        for (screen, expected) in [
            (Screen::Home, "Create Campaign"),
            (Screen::Datasets, "Recent Datasets"),
            (Screen::Accounts, "Connected Accounts"),
            (Screen::CreateCampaign, "Select Data"),
        ] {
            app.navigate(screen);
            terminal.draw(|f| render(f, &mut app)).unwrap();
            let text = screen_text(&terminal);
            assert!(text.contains(expected), "{:?} missing {:?}", screen, expected);
            assert!(text.contains("ada@example.com"));
        }
    }

    #[test]
    fn test_cursor_offset_saturates() {
        assert_eq!(cursor_offset(10, 5), 16);
        assert_eq!(cursor_offset(10, 70_000), u16::MAX);
        assert_eq!(cursor_offset(u16::MAX, 0), u16::MAX);
    }

    #[test]
    fn test_very_long_line_keeps_cursor_in_the_box() {
        let mut form = Form::new(&["Subject"]);
        form.set_value(0, &"x".repeat(70_000));
        let mut terminal = Terminal::new(TestBackend::new(40, 5)).unwrap();
        terminal
            .draw(|f| {
                let area = f.area();
                render_form(f, &mut form, area, true)
            })
            .unwrap();
        let cursor = terminal.get_cursor_position().unwrap();
        assert!(cursor.x <= 38);
    }

    #[test]
    fn test_centered_rect_is_inside() {
        let outer = Rect::new(0, 0, 100, 50);
        let inner = centered_rect(60, 40, outer);
        assert_eq!(inner.width, 60);
        assert_eq!(inner.height, 20);
        assert_eq!(inner.x, 20);
    }
}
