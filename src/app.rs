use crate::api::ApiClient;
use crate::auth::{TokenStore, token_from_callback};
use crate::config::{Config, Keybindings, matches_key};
use crate::csv_preview::{self, CsvPreview};
use crate::error::{ApiError, Result};
use crate::loader::Loader;
use crate::models::{
    ConnectedAccount, Dataset, DatasetPreview, EmailAccount, GeneratedTemplate, JobCreated,
    LoginResponse, Provider, RegisterRequest, RegisterResponse, SendgridAccountCreate,
    SendgridConfig, UploadedDataset, User,
};
use crate::tasks::TaskScope;
use crate::ui::Form;
use crate::upload::{self, PROCESSING_DELAY, SelectedFile, UploadTracker};
use crate::wizard::{ScheduleType, Step, StepSequencer, WizardDraft};
use crossterm::event::KeyEvent;
use serde_json::Value;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Delay between a successful launch and the redirect home.
pub const LAUNCH_REDIRECT_DELAY: Duration = Duration::from_secs(2);
pub const RECENT_DATASETS: u32 = 5;
pub const WIZARD_DATASETS: u32 = 100;

const GMAIL_ERROR: &str = "Could not start Google login.";
const SESSION_EXPIRED: &str = "Your session has expired. Please sign in again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Login,
    Signup,
    Home,
    Datasets,
    Accounts,
    CreateCampaign,
}

impl Screen {
    pub fn is_protected(&self) -> bool {
        !matches!(self, Screen::Login | Screen::Signup)
    }

    pub fn title(&self) -> &'static str {
        match self {
            Screen::Login => "Sign in",
            Screen::Signup => "Create account",
            Screen::Home => "Home",
            Screen::Datasets => "Datasets",
            Screen::Accounts => "Email Accounts",
            Screen::CreateCampaign => "Create Campaign",
        }
    }
}

/// Where a navigation request actually lands given the session.
pub fn guard(target: Screen, signed_in: bool) -> Screen {
    match (target.is_protected(), signed_in) {
        (true, false) => Screen::Login,
        (false, true) => Screen::Home,
        _ => target,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomeAction {
    Open(Screen),
    Logout,
}

pub const HOME_MENU: [(&str, HomeAction); 4] = [
    ("Datasets", HomeAction::Open(Screen::Datasets)),
    ("Email Accounts", HomeAction::Open(Screen::Accounts)),
    ("Create Campaign", HomeAction::Open(Screen::CreateCampaign)),
    ("Log out", HomeAction::Logout),
];

/// Results of background work, delivered back to the UI loop.
#[derive(Debug)]
pub enum AppEvent {
    SessionChecked(Result<User>),
    LoginFinished(Result<LoginResponse>),
    SignupFinished {
        email: String,
        result: Result<RegisterResponse>,
    },
    DatasetsLoaded {
        generation: u64,
        result: Result<Vec<Dataset>>,
    },
    PreviewLoaded(Result<DatasetPreview>),
    FilePicked(Result<(SelectedFile, CsvPreview)>),
    UploadProgress(u8),
    UploadFinished(Result<UploadedDataset>),
    UploadSettled,
    AccountsLoaded {
        generation: u64,
        result: Result<Vec<EmailAccount>>,
    },
    AccountDeleted(Result<()>),
    GmailAuthUrl(Result<Option<String>>),
    SendgridConnected(Result<ConnectedAccount>),
    CredentialsUpdated(Result<()>),
    DatasetDetailsLoaded {
        generation: u64,
        columns: Result<Vec<String>>,
        sample: Option<Value>,
    },
    TemplateGenerated(Result<GeneratedTemplate>),
    CampaignCreated(Result<JobCreated>),
    Redirect {
        to: Screen,
        notice: Option<String>,
    },
}

impl AppEvent {
    /// Any authenticated call rejected the session.
    fn is_unauthorized(&self) -> bool {
        fn check<T>(r: &Result<T>) -> bool {
            matches!(r, Err(e) if e.is_unauthorized())
        }
        match self {
            AppEvent::SessionChecked(r) => check(r),
            AppEvent::DatasetsLoaded { result, .. } => check(result),
            AppEvent::PreviewLoaded(r) => check(r),
            AppEvent::UploadFinished(r) => check(r),
            AppEvent::AccountsLoaded { result, .. } => check(result),
            AppEvent::AccountDeleted(r) => check(r),
            AppEvent::GmailAuthUrl(r) => check(r),
            AppEvent::SendgridConnected(r) => check(r),
            AppEvent::CredentialsUpdated(r) => check(r),
            AppEvent::DatasetDetailsLoaded { columns, .. } => check(columns),
            AppEvent::TemplateGenerated(r) => check(r),
            AppEvent::CampaignCreated(r) => check(r),
            AppEvent::LoginFinished(_)
            | AppEvent::SignupFinished { .. }
            | AppEvent::FilePicked(_)
            | AppEvent::UploadProgress(_)
            | AppEvent::UploadSettled
            | AppEvent::Redirect { .. } => false,
        }
    }
}

/// An event tagged with the screen epoch it was spawned under.
#[derive(Debug)]
pub struct Envelope {
    pub epoch: u64,
    pub event: AppEvent,
}

pub struct LoginView {
    pub form: Form<'static>,
    pub error: Option<String>,
    pub notice: Option<String>,
    pub loading: bool,
}

impl LoginView {
    fn new(email: &str) -> Self {
        let mut form = Form::new(&["Email", "Password"]).masked(1);
        if !email.is_empty() {
            form.set_value(0, email);
            form.focused = 1;
        }
        Self {
            form,
            error: None,
            notice: None,
            loading: false,
        }
    }
}

pub struct SignupView {
    pub form: Form<'static>,
    pub error: Option<String>,
    pub loading: bool,
}

#[derive(Default)]
pub struct HomeView {
    pub selected: usize,
    pub notice: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetsFocus {
    List,
    Upload,
}

pub struct DatasetsView {
    pub datasets: Loader<Vec<Dataset>>,
    pub selected: usize,
    pub preview: Option<DatasetPreview>,
    pub preview_loading: bool,
    pub focus: DatasetsFocus,
    /// CSV path and dataset name.
    pub form: Form<'static>,
    pub csv: Option<CsvPreview>,
    pub email_column: Option<String>,
    pub reading_file: bool,
    pub tracker: UploadTracker,
    pub error: Option<String>,
    pub notice: Option<String>,
}

pub const UPLOAD_PATH: usize = 0;
pub const UPLOAD_NAME: usize = 1;

impl DatasetsView {
    fn new() -> Self {
        Self {
            datasets: Loader::default(),
            selected: 0,
            preview: None,
            preview_loading: false,
            focus: DatasetsFocus::List,
            form: Form::new(&["CSV file path", "Dataset name"]),
            csv: None,
            email_column: None,
            reading_file: false,
            tracker: UploadTracker::default(),
            error: None,
            notice: None,
        }
    }

    fn cycle_email_column(&mut self) {
        let Some(csv) = &self.csv else { return };
        if csv.columns.is_empty() {
            return;
        }
        let next = self
            .email_column
            .as_ref()
            .and_then(|c| csv.columns.iter().position(|x| x == c))
            .map(|i| (i + 1) % csv.columns.len())
            .unwrap_or(0);
        self.email_column = Some(csv.columns[next].clone());
    }
}

pub struct ConnectForm {
    pub form: Form<'static>,
    pub busy: bool,
    pub error: Option<String>,
}

impl ConnectForm {
    pub fn sendgrid() -> Self {
        Self {
            form: Form::new(&["Sender email", "Sender name", "SendGrid API key"]).masked(2),
            busy: false,
            error: None,
        }
    }

    pub fn api_key() -> Self {
        Self {
            form: Form::new(&["New SendGrid API key"]).masked(0),
            busy: false,
            error: None,
        }
    }
}

/// Account connection controls shared by the accounts screen and the
/// wizard's account step.
#[derive(Default)]
pub struct ConnectPanel {
    pub sendgrid: Option<ConnectForm>,
    pub gmail_url: Option<String>,
    pub gmail_loading: bool,
    pub error: Option<String>,
    pub notice: Option<String>,
}

pub struct KeyRotation {
    pub account_id: i64,
    pub email: String,
    pub form: ConnectForm,
}

pub struct AccountsView {
    pub accounts: Loader<Vec<EmailAccount>>,
    pub selected: usize,
    pub panel: ConnectPanel,
    pub rotation: Option<KeyRotation>,
    pub confirm_delete: Option<i64>,
    pub deleting: bool,
}

pub const COMPOSE_NAME: usize = 0;
pub const COMPOSE_PROMPT: usize = 1;
pub const COMPOSE_SUBJECT: usize = 2;
pub const COMPOSE_BODY: usize = 3;
pub const SCHEDULE_DATE: usize = 0;
pub const SCHEDULE_TIME: usize = 1;
pub const SCHEDULE_RATE: usize = 2;

pub struct CampaignView {
    pub seq: StepSequencer,
    pub draft: WizardDraft,
    pub datasets: Loader<Vec<Dataset>>,
    pub accounts: Loader<Vec<EmailAccount>>,
    pub columns: Loader<Vec<String>>,
    /// First preview row, used to render a sample on the review step.
    pub sample: Option<Value>,
    pub dataset_cursor: usize,
    pub account_cursor: usize,
    pub column_cursor: usize,
    pub compose: Form<'static>,
    pub schedule: Form<'static>,
    pub panel: ConnectPanel,
    pub hint: Option<String>,
    pub generating: bool,
    pub llm_error: Option<String>,
    pub submitting: bool,
    pub error: Option<String>,
    pub created_job: Option<JobCreated>,
}

impl CampaignView {
    fn new() -> Self {
        let mut schedule = Form::new(&["Date (YYYY-MM-DD)", "Time (HH:MM)", "Emails per minute"]);
        schedule.set_value(SCHEDULE_RATE, &crate::wizard::DEFAULT_THROTTLE.to_string());
        Self {
            seq: StepSequencer::default(),
            draft: WizardDraft::default(),
            datasets: Loader::default(),
            accounts: Loader::default(),
            columns: Loader::default(),
            sample: None,
            dataset_cursor: 0,
            account_cursor: 0,
            column_cursor: 0,
            compose: Form::new(&["Campaign name", "AI prompt", "Subject", "Body"])
                .multiline(COMPOSE_BODY),
            schedule,
            panel: ConnectPanel::default(),
            hint: None,
            generating: false,
            llm_error: None,
            submitting: false,
            error: None,
            created_job: None,
        }
    }

    pub fn step(&self) -> Step {
        Step::ALL[self.seq.current()]
    }

    /// Copy the text inputs into the draft.
    fn sync_draft(&mut self) {
        self.draft.campaign_name = self.compose.value(COMPOSE_NAME);
        self.draft.prompt = self.compose.value(COMPOSE_PROMPT);
        self.draft.subject_template = self.compose.value(COMPOSE_SUBJECT);
        self.draft.body_template = self.compose.value(COMPOSE_BODY);
        self.draft.scheduled_date = self.schedule.value(SCHEDULE_DATE);
        self.draft.scheduled_time = self.schedule.value(SCHEDULE_TIME);
        self.draft
            .set_throttle_input(&self.schedule.value(SCHEDULE_RATE));
    }

    fn apply_generated(&mut self, generated: GeneratedTemplate) {
        self.draft.apply_generated(generated);
        let subject = self.draft.subject_template.clone();
        let body = self.draft.body_template.clone();
        self.compose.set_value(COMPOSE_SUBJECT, &subject);
        self.compose.set_value(COMPOSE_BODY, &body);
    }
}

pub enum View {
    Login(LoginView),
    Signup(SignupView),
    Home(HomeView),
    Datasets(DatasetsView),
    Accounts(AccountsView),
    Campaign(Box<CampaignView>),
}

impl View {
    pub fn screen(&self) -> Screen {
        match self {
            View::Login(_) => Screen::Login,
            View::Signup(_) => Screen::Signup,
            View::Home(_) => Screen::Home,
            View::Datasets(_) => Screen::Datasets,
            View::Accounts(_) => Screen::Accounts,
            View::Campaign(_) => Screen::CreateCampaign,
        }
    }

    fn panel_mut(&mut self) -> Option<&mut ConnectPanel> {
        match self {
            View::Accounts(v) => Some(&mut v.panel),
            View::Campaign(v) => Some(&mut v.panel),
            _ => None,
        }
    }
}

pub struct App {
    pub config: Config,
    keys: Arc<Keybindings>,
    api: ApiClient,
    store: Arc<dyn TokenStore>,
    tx: UnboundedSender<Envelope>,
    pub user: Option<User>,
    pub view: View,
    pub checking_session: bool,
    epoch: u64,
    tasks: TaskScope,
    pub should_quit: bool,
}

impl App {
    pub fn new(
        config: Config,
        api: ApiClient,
        store: Arc<dyn TokenStore>,
        tx: UnboundedSender<Envelope>,
    ) -> Self {
        let keys = Arc::new(config.keybindings.clone());
        Self {
            config,
            keys,
            api,
            store,
            tx,
            user: None,
            view: View::Login(LoginView::new("")),
            checking_session: false,
            epoch: 0,
            tasks: TaskScope::default(),
            should_quit: false,
        }
    }

    pub fn screen(&self) -> Screen {
        self.view.screen()
    }

    pub fn api_url(&self) -> &str {
        self.api.base_url()
    }

    /// Restore a session from an OAuth callback or the token store.
    pub async fn start(&mut self, callback: Option<String>) {
        let token = match callback {
            Some(url) => match token_from_callback(&url) {
                Ok(token) => {
                    if let Err(e) = self.store.save(&token).await {
                        warn!("Could not persist token: {:#}", e);
                    }
                    Some(token)
                }
                Err(e) => {
                    self.navigate(Screen::Login);
                    if let View::Login(v) = &mut self.view {
                        v.error = Some(e.to_string());
                    }
                    return;
                }
            },
            None => match self.store.load().await {
                Ok(token) => token,
                Err(e) => {
                    warn!("Could not read stored token: {:#}", e);
                    None
                }
            },
        };

        match token {
            Some(token) => {
                self.api.set_token(Some(token)).await;
                self.checking_session = true;
                self.spawn(|api| async move { AppEvent::SessionChecked(api.me().await) });
            }
            None => self.navigate(Screen::Login),
        }
    }

    fn spawn<F, Fut>(&mut self, f: F)
    where
        F: FnOnce(ApiClient) -> Fut,
        Fut: Future<Output = AppEvent> + Send + 'static,
    {
        let tx = self.tx.clone();
        let epoch = self.epoch;
        let fut = f(self.api.clone());
        self.tasks.spawn(async move {
            let event = fut.await;
            let _ = tx.send(Envelope { epoch, event });
        });
    }

    fn spawn_after(&mut self, delay: Duration, event: AppEvent) {
        let tx = self.tx.clone();
        let epoch = self.epoch;
        self.tasks.spawn_after(delay, move || {
            let _ = tx.send(Envelope { epoch, event });
        });
    }

    /// Switch screens. Work owned by the old screen is aborted and any of
    /// its results still in the channel are discarded by epoch.
    pub fn navigate(&mut self, target: Screen) {
        let screen = guard(target, self.user.is_some());
        if screen != target {
            debug!("{:?} redirected to {:?}", target, screen);
        }
        self.tasks.cancel_all();
        self.epoch += 1;
        self.view = match screen {
            Screen::Login => View::Login(LoginView::new("")),
            Screen::Signup => View::Signup(SignupView {
                form: Form::new(&["Name", "Email", "Password"]).masked(2),
                error: None,
                loading: false,
            }),
            Screen::Home => View::Home(HomeView::default()),
            Screen::Datasets => View::Datasets(DatasetsView::new()),
            Screen::Accounts => View::Accounts(AccountsView {
                accounts: Loader::default(),
                selected: 0,
                panel: ConnectPanel::default(),
                rotation: None,
                confirm_delete: None,
                deleting: false,
            }),
            Screen::CreateCampaign => View::Campaign(Box::new(CampaignView::new())),
        };

        match screen {
            Screen::Datasets => self.load_datasets(),
            Screen::Accounts => self.load_accounts(),
            Screen::CreateCampaign => {
                self.load_datasets();
                self.load_accounts();
            }
            _ => {}
        }
    }

    async fn end_session(&mut self) {
        self.api.set_token(None).await;
        if let Err(e) = self.store.clear().await {
            warn!("Could not clear stored token: {:#}", e);
        }
        self.user = None;
        self.checking_session = false;
        self.navigate(Screen::Login);
    }

    async fn expire_session(&mut self) {
        info!("Session rejected by the server, returning to login");
        self.end_session().await;
        if let View::Login(v) = &mut self.view {
            v.notice = Some(SESSION_EXPIRED.to_string());
        }
    }

    pub async fn logout(&mut self) {
        info!("Logging out");
        self.end_session().await;
    }

    // ---- loaders ----

    fn load_datasets(&mut self) {
        let (generation, page_size) = match &mut self.view {
            View::Datasets(v) => (v.datasets.begin(), RECENT_DATASETS),
            View::Campaign(v) => (v.datasets.begin(), WIZARD_DATASETS),
            _ => return,
        };
        self.spawn(move |api| async move {
            AppEvent::DatasetsLoaded {
                generation,
                result: api.list_datasets(1, page_size).await,
            }
        });
    }

    fn load_accounts(&mut self) {
        let generation = match &mut self.view {
            View::Accounts(v) => v.accounts.begin(),
            View::Campaign(v) => v.accounts.begin(),
            _ => return,
        };
        self.spawn(move |api| async move {
            AppEvent::AccountsLoaded {
                generation,
                result: api.list_email_accounts().await,
            }
        });
    }

    /// Refire the column fetch for the selected dataset. With nothing
    /// selected the columns reset without a request.
    fn load_columns(&mut self) {
        let View::Campaign(v) = &mut self.view else {
            return;
        };
        v.sample = None;
        v.column_cursor = 0;
        let Some(id) = v.draft.dataset_id else {
            v.columns.reset();
            return;
        };
        let generation = v.columns.begin();
        self.spawn(move |api| async move {
            let (detail, preview) = tokio::join!(api.get_dataset(id), api.preview_dataset(id));
            AppEvent::DatasetDetailsLoaded {
                generation,
                columns: detail.map(|d| d.json_schema),
                sample: preview.ok().and_then(|p| p.rows.into_iter().next()),
            }
        });
    }

    // ---- events ----

    pub async fn handle_envelope(&mut self, envelope: Envelope) {
        if envelope.epoch != self.epoch {
            debug!(
                "Dropping event from epoch {} (now {})",
                envelope.epoch, self.epoch
            );
            return;
        }
        self.handle_event(envelope.event).await;
    }

    async fn handle_event(&mut self, event: AppEvent) {
        if event.is_unauthorized() {
            self.expire_session().await;
            return;
        }

        match event {
            AppEvent::SessionChecked(result) => {
                self.checking_session = false;
                match result {
                    Ok(user) => {
                        info!("Signed in as {}", user.email);
                        self.user = Some(user);
                        self.navigate(Screen::Home);
                    }
                    Err(e) => {
                        warn!("Session check failed: {}", e);
                        self.end_session().await;
                        if let View::Login(v) = &mut self.view {
                            v.error = Some(e.user_message("Could not load your profile."));
                        }
                    }
                }
            }
            AppEvent::LoginFinished(result) => match result {
                Ok(login) => {
                    if let Err(e) = self.store.save(&login.access_token).await {
                        warn!("Could not persist token: {:#}", e);
                    }
                    self.api.set_token(Some(login.access_token)).await;
                    self.spawn(|api| async move { AppEvent::SessionChecked(api.me().await) });
                }
                Err(e) => {
                    if let View::Login(v) = &mut self.view {
                        v.loading = false;
                        v.error = Some(e.user_message("Invalid email or password"));
                    }
                }
            },
            AppEvent::SignupFinished { email, result } => match result {
                Ok(resp) => {
                    let email = resp.email().unwrap_or(email.as_str()).to_string();
                    self.navigate(Screen::Login);
                    self.view = View::Login(LoginView {
                        notice: Some("Account created. Please sign in.".to_string()),
                        ..LoginView::new(&email)
                    });
                }
                Err(e) => {
                    if let View::Signup(v) = &mut self.view {
                        v.loading = false;
                        v.error = Some(e.user_message("Failed to sign up. Please try again."));
                    }
                }
            },
            AppEvent::DatasetsLoaded { generation, result } => match &mut self.view {
                View::Datasets(v) => {
                    v.datasets.finish(generation, result);
                    v.selected = v.selected.min(v.datasets.data().len().saturating_sub(1));
                }
                View::Campaign(v) => {
                    v.datasets.finish(generation, result);
                    v.dataset_cursor = v
                        .dataset_cursor
                        .min(v.datasets.data().len().saturating_sub(1));
                }
                _ => {}
            },
            AppEvent::AccountsLoaded { generation, result } => match &mut self.view {
                View::Accounts(v) => {
                    v.accounts.finish(generation, result);
                    v.selected = v.selected.min(v.accounts.data().len().saturating_sub(1));
                }
                View::Campaign(v) => {
                    v.accounts.finish(generation, result);
                    v.account_cursor = v
                        .account_cursor
                        .min(v.accounts.data().len().saturating_sub(1));
                }
                _ => {}
            },
            AppEvent::PreviewLoaded(result) => {
                if let View::Datasets(v) = &mut self.view {
                    v.preview_loading = false;
                    match result {
                        Ok(preview) => v.preview = Some(preview),
                        Err(e) => v.error = Some(e.user_message("Failed to load preview")),
                    }
                }
            }
            AppEvent::FilePicked(result) => {
                if let View::Datasets(v) = &mut self.view {
                    v.reading_file = false;
                    match result {
                        Ok((file, csv)) => {
                            if v.form.value(UPLOAD_NAME).trim().is_empty() {
                                v.form.set_value(UPLOAD_NAME, &file.name);
                            }
                            v.email_column = csv.email_column.clone();
                            v.csv = Some(csv);
                            v.tracker.select_file(file);
                            v.error = None;
                            v.notice = None;
                        }
                        Err(e) => {
                            v.csv = None;
                            v.email_column = None;
                            v.tracker.clear_file();
                            v.error = Some(e.user_message("Failed to read CSV file"));
                        }
                    }
                }
            }
            AppEvent::UploadProgress(percent) => {
                if let View::Datasets(v) = &mut self.view {
                    v.tracker.on_progress(percent);
                }
            }
            AppEvent::UploadFinished(result) => {
                let View::Datasets(v) = &mut self.view else {
                    return;
                };
                match result {
                    Ok(uploaded) => {
                        info!("Uploaded dataset {}", uploaded.name);
                        v.notice = Some(upload_summary(&uploaded));
                        v.tracker.on_response();
                        self.spawn_after(PROCESSING_DELAY, AppEvent::UploadSettled);
                    }
                    Err(e) => {
                        warn!("Upload failed: {}", e);
                        v.tracker.fail();
                        v.csv = None;
                        v.email_column = None;
                        v.notice = None;
                        v.error = Some(e.user_message("Upload failed"));
                    }
                }
            }
            AppEvent::UploadSettled => {
                if let View::Datasets(v) = &mut self.view {
                    v.tracker.on_delay_elapsed();
                    self.load_datasets();
                }
            }
            AppEvent::AccountDeleted(result) => {
                let View::Accounts(v) = &mut self.view else {
                    return;
                };
                v.deleting = false;
                match result {
                    Ok(()) => {
                        v.panel.notice = Some("Account disconnected".to_string());
                        self.load_accounts();
                    }
                    Err(e) => {
                        v.panel.error = Some(e.user_message("Failed to disconnect account"))
                    }
                }
            }
            AppEvent::GmailAuthUrl(result) => {
                let url = match result {
                    Ok(url) => url,
                    Err(e) => {
                        warn!("Gmail auth url request failed: {}", e);
                        None
                    }
                };
                if let Some(url) = &url {
                    if let Err(e) = open::that(url) {
                        warn!("Could not open browser: {}", e);
                    }
                }
                if let Some(panel) = self.view.panel_mut() {
                    panel.gmail_loading = false;
                    match url {
                        Some(url) => panel.gmail_url = Some(url),
                        None => panel.error = Some(GMAIL_ERROR.to_string()),
                    }
                }
            }
            AppEvent::SendgridConnected(result) => {
                let Some(panel) = self.view.panel_mut() else {
                    return;
                };
                match result {
                    Ok(account) => {
                        info!("Connected SendGrid sender {}", account.email_address);
                        panel.sendgrid = None;
                        panel.notice = Some(if account.verified {
                            format!("Connected {}", account.email_address)
                        } else {
                            format!(
                                "Connected {}. Verify the sender in SendGrid before sending.",
                                account.email_address
                            )
                        });
                        self.load_accounts();
                    }
                    Err(e) => {
                        if let Some(form) = &mut panel.sendgrid {
                            form.busy = false;
                            form.error = Some(e.user_message("Could not connect SendGrid"));
                        }
                    }
                }
            }
            AppEvent::CredentialsUpdated(result) => {
                let View::Accounts(v) = &mut self.view else {
                    return;
                };
                match result {
                    Ok(()) => {
                        v.rotation = None;
                        v.panel.notice = Some("API key updated".to_string());
                    }
                    Err(e) => {
                        if let Some(rotation) = &mut v.rotation {
                            rotation.form.busy = false;
                            rotation.form.error =
                                Some(e.user_message("Could not update API key"));
                        }
                    }
                }
            }
            AppEvent::DatasetDetailsLoaded {
                generation,
                columns,
                sample,
            } => {
                if let View::Campaign(v) = &mut self.view {
                    if v.columns.finish(generation, columns) {
                        v.sample = sample;
                    }
                }
            }
            AppEvent::TemplateGenerated(result) => {
                if let View::Campaign(v) = &mut self.view {
                    v.generating = false;
                    match result {
                        Ok(generated) => v.apply_generated(generated),
                        Err(e) => {
                            v.llm_error = Some(e.user_message("Failed to generate template"))
                        }
                    }
                }
            }
            AppEvent::CampaignCreated(result) => {
                let View::Campaign(v) = &mut self.view else {
                    return;
                };
                v.submitting = false;
                match result {
                    Ok(job) => {
                        info!("Campaign created as job {}", job.job_id);
                        let notice = format!("Campaign launched (job #{})", job.job_id);
                        v.created_job = Some(job);
                        self.spawn_after(
                            LAUNCH_REDIRECT_DELAY,
                            AppEvent::Redirect {
                                to: Screen::Home,
                                notice: Some(notice),
                            },
                        );
                    }
                    Err(e) => v.error = Some(e.user_message("Failed to create campaign")),
                }
            }
            AppEvent::Redirect { to, notice } => {
                self.navigate(to);
                if let View::Home(v) = &mut self.view {
                    v.notice = notice;
                }
            }
        }
    }

    // ---- keys ----

    pub async fn handle_key(&mut self, key: KeyEvent) {
        let kb = self.keys.clone();
        if matches_key(key, &kb.quit) {
            self.should_quit = true;
            return;
        }
        if self.checking_session {
            return;
        }

        match self.screen() {
            Screen::Login => self.login_key(key, &kb),
            Screen::Signup => self.signup_key(key, &kb),
            Screen::Home => self.home_key(key, &kb).await,
            Screen::Datasets => self.datasets_key(key, &kb),
            Screen::Accounts => self.accounts_key(key, &kb),
            Screen::CreateCampaign => self.campaign_key(key, &kb),
        }
    }

    fn login_key(&mut self, key: KeyEvent, kb: &Keybindings) {
        if matches_key(key, &kb.switch_form) {
            self.navigate(Screen::Signup);
            return;
        }
        let View::Login(v) = &mut self.view else {
            return;
        };
        if v.loading {
            return;
        }
        if matches_key(key, &kb.next_field) {
            v.form.next_field();
        } else if matches_key(key, &kb.prev_field) {
            v.form.prev_field();
        } else if matches_key(key, &kb.select) || matches_key(key, &kb.submit) {
            self.submit_login();
        } else {
            v.error = None;
            v.form.input(key);
        }
    }

    fn submit_login(&mut self) {
        let View::Login(v) = &mut self.view else {
            return;
        };
        let email = v.form.value(0).trim().to_string();
        let password = v.form.value(1);
        if email.is_empty() || password.is_empty() {
            v.error = Some("Please enter your email and password.".to_string());
            return;
        }
        v.loading = true;
        v.error = None;
        v.notice = None;
        self.spawn(move |api| async move {
            AppEvent::LoginFinished(api.login(&email, &password).await)
        });
    }

    fn signup_key(&mut self, key: KeyEvent, kb: &Keybindings) {
        if matches_key(key, &kb.switch_form) || matches_key(key, &kb.back) {
            self.navigate(Screen::Login);
            return;
        }
        let View::Signup(v) = &mut self.view else {
            return;
        };
        if v.loading {
            return;
        }
        if matches_key(key, &kb.next_field) {
            v.form.next_field();
        } else if matches_key(key, &kb.prev_field) {
            v.form.prev_field();
        } else if matches_key(key, &kb.select) || matches_key(key, &kb.submit) {
            self.submit_signup();
        } else {
            v.error = None;
            v.form.input(key);
        }
    }

    fn submit_signup(&mut self) {
        let View::Signup(v) = &mut self.view else {
            return;
        };
        let request = RegisterRequest {
            name: v.form.value(0).trim().to_string(),
            email: v.form.value(1).trim().to_string(),
            password: v.form.value(2),
        };
        if request.name.is_empty() || request.email.is_empty() || request.password.is_empty() {
            v.error = Some("Please fill in all fields.".to_string());
            return;
        }
        v.loading = true;
        v.error = None;
        self.spawn(move |api| async move {
            let result = api.register(&request).await;
            AppEvent::SignupFinished {
                email: request.email,
                result,
            }
        });
    }

    async fn home_key(&mut self, key: KeyEvent, kb: &Keybindings) {
        let View::Home(v) = &mut self.view else {
            return;
        };
        if matches_key(key, &kb.move_up) {
            v.selected = v.selected.saturating_sub(1);
        } else if matches_key(key, &kb.move_down) {
            v.selected = (v.selected + 1).min(HOME_MENU.len() - 1);
        } else if matches_key(key, &kb.select) {
            match HOME_MENU[v.selected].1 {
                HomeAction::Open(screen) => self.navigate(screen),
                HomeAction::Logout => self.logout().await,
            }
        }
    }

    fn datasets_key(&mut self, key: KeyEvent, kb: &Keybindings) {
        let View::Datasets(v) = &mut self.view else {
            return;
        };

        if v.focus == DatasetsFocus::Upload {
            if matches_key(key, &kb.back) {
                v.focus = DatasetsFocus::List;
            } else if matches_key(key, &kb.next_field) {
                if v.form.focused == UPLOAD_NAME {
                    v.focus = DatasetsFocus::List;
                }
                v.form.next_field();
            } else if matches_key(key, &kb.prev_field) {
                if v.form.focused == UPLOAD_PATH {
                    v.focus = DatasetsFocus::List;
                }
                v.form.prev_field();
            } else if matches_key(key, &kb.cycle_column) {
                v.cycle_email_column();
            } else if matches_key(key, &kb.submit) {
                self.start_upload();
            } else if matches_key(key, &kb.select) {
                if v.form.focused == UPLOAD_PATH {
                    self.pick_file();
                } else {
                    self.start_upload();
                }
            } else if !v.tracker.is_busy() {
                v.form.input(key);
            }
            return;
        }

        if matches_key(key, &kb.back) {
            if v.preview.take().is_none() {
                self.navigate(Screen::Home);
            }
        } else if matches_key(key, &kb.move_up) {
            v.selected = v.selected.saturating_sub(1);
        } else if matches_key(key, &kb.move_down) {
            v.selected = (v.selected + 1).min(v.datasets.data().len().saturating_sub(1));
        } else if matches_key(key, &kb.next_field) {
            v.focus = DatasetsFocus::Upload;
            v.form.focused = UPLOAD_PATH;
        } else if matches_key(key, &kb.prev_field) {
            v.focus = DatasetsFocus::Upload;
            v.form.focused = UPLOAD_NAME;
        } else if matches_key(key, &kb.preview) || matches_key(key, &kb.select) {
            self.load_preview();
        } else if matches_key(key, &kb.reload) {
            self.load_datasets();
        } else if matches_key(key, &kb.upload) {
            self.start_upload();
        }
    }

    fn load_preview(&mut self) {
        let View::Datasets(v) = &mut self.view else {
            return;
        };
        let Some(id) = v.datasets.data().get(v.selected).map(|d| d.id) else {
            return;
        };
        v.preview_loading = true;
        v.error = None;
        self.spawn(move |api| async move { AppEvent::PreviewLoaded(api.preview_dataset(id).await) });
    }

    fn pick_file(&mut self) {
        let View::Datasets(v) = &mut self.view else {
            return;
        };
        if v.tracker.is_busy() {
            return;
        }
        let path = PathBuf::from(v.form.value(UPLOAD_PATH).trim());
        if path.as_os_str().is_empty() {
            v.error = Some("Enter the path of a CSV file".to_string());
            return;
        }
        v.reading_file = true;
        v.tracker.dismiss();
        self.spawn(move |_| async move { AppEvent::FilePicked(load_csv(path).await) });
    }

    fn start_upload(&mut self) {
        let View::Datasets(v) = &mut self.view else {
            return;
        };
        let name = v.form.value(UPLOAD_NAME).trim().to_string();
        let (Some(file), Some(column)) = (v.tracker.file().cloned(), v.email_column.clone()) else {
            v.error = Some("Choose a CSV file and an email column first".to_string());
            return;
        };
        if name.is_empty() {
            v.error = Some("Give the dataset a name".to_string());
            return;
        }
        if !v.tracker.start() {
            return;
        }
        v.error = None;

        let tx = self.tx.clone();
        let epoch = self.epoch;
        self.spawn(move |api| async move {
            let mut last = None;
            let result = api
                .upload_dataset(&file.path, &column, &name, move |sent, total| {
                    let Some(percent) = upload::percent(sent, total) else {
                        return;
                    };
                    if last != Some(percent) {
                        last = Some(percent);
                        let _ = tx.send(Envelope {
                            epoch,
                            event: AppEvent::UploadProgress(percent),
                        });
                    }
                })
                .await;
            AppEvent::UploadFinished(result)
        });
    }

    fn accounts_key(&mut self, key: KeyEvent, kb: &Keybindings) {
        let View::Accounts(v) = &mut self.view else {
            return;
        };

        if let Some(rotation) = &mut v.rotation {
            if matches_key(key, &kb.back) {
                v.rotation = None;
            } else if matches_key(key, &kb.select) || matches_key(key, &kb.submit) {
                self.submit_rotation();
            } else if !rotation.form.busy {
                rotation.form.form.input(key);
            }
            return;
        }
        if v.panel.sendgrid.is_some() {
            self.sendgrid_key(key, kb);
            return;
        }

        let pending_delete = v.confirm_delete.take();
        if matches_key(key, &kb.back) {
            self.navigate(Screen::Home);
        } else if matches_key(key, &kb.move_up) {
            v.selected = v.selected.saturating_sub(1);
        } else if matches_key(key, &kb.move_down) {
            v.selected = (v.selected + 1).min(v.accounts.data().len().saturating_sub(1));
        } else if matches_key(key, &kb.reload) {
            self.load_accounts();
        } else if matches_key(key, &kb.delete) {
            let Some(id) = v.accounts.data().get(v.selected).map(|a| a.id) else {
                return;
            };
            if pending_delete == Some(id) {
                self.delete_account(id);
            } else {
                v.confirm_delete = Some(id);
            }
        } else if matches_key(key, &kb.connect_gmail) {
            self.connect_gmail();
        } else if matches_key(key, &kb.connect_sendgrid) {
            open_sendgrid(&mut v.panel);
        } else if matches_key(key, &kb.rotate_key) {
            match v.accounts.data().get(v.selected) {
                Some(account) if account.provider == Provider::Sendgrid => {
                    v.rotation = Some(KeyRotation {
                        account_id: account.id,
                        email: account.email_address.clone(),
                        form: ConnectForm::api_key(),
                    });
                }
                Some(_) => {
                    v.panel.notice = Some("Only SendGrid accounts use an API key".to_string())
                }
                None => {}
            }
        }
    }

    fn delete_account(&mut self, id: i64) {
        let View::Accounts(v) = &mut self.view else {
            return;
        };
        if v.deleting {
            return;
        }
        v.deleting = true;
        v.panel.error = None;
        self.spawn(move |api| async move {
            AppEvent::AccountDeleted(api.delete_email_account(id).await)
        });
    }

    fn submit_rotation(&mut self) {
        let View::Accounts(v) = &mut self.view else {
            return;
        };
        let Some(rotation) = &mut v.rotation else {
            return;
        };
        if rotation.form.busy {
            return;
        }
        let api_key = rotation.form.form.value(0).trim().to_string();
        if api_key.is_empty() {
            rotation.form.error = Some("API key is required".to_string());
            return;
        }
        rotation.form.busy = true;
        rotation.form.error = None;
        let id = rotation.account_id;
        self.spawn(move |api| async move {
            AppEvent::CredentialsUpdated(api.update_sendgrid_credentials(id, &api_key).await)
        });
    }

    fn connect_gmail(&mut self) {
        let Some(panel) = self.view.panel_mut() else {
            return;
        };
        if panel.gmail_loading {
            return;
        }
        panel.gmail_loading = true;
        panel.error = None;
        panel.gmail_url = None;
        self.spawn(|api| async move { AppEvent::GmailAuthUrl(api.gmail_auth_url().await) });
    }

    /// Keys for the SendGrid connect form while it is open.
    fn sendgrid_key(&mut self, key: KeyEvent, kb: &Keybindings) {
        let Some(panel) = self.view.panel_mut() else {
            return;
        };
        let Some(form) = &mut panel.sendgrid else {
            return;
        };
        if matches_key(key, &kb.back) {
            panel.sendgrid = None;
            self.load_accounts();
        } else if matches_key(key, &kb.next_field) {
            form.form.next_field();
        } else if matches_key(key, &kb.prev_field) {
            form.form.prev_field();
        } else if matches_key(key, &kb.select) || matches_key(key, &kb.submit) {
            self.submit_sendgrid();
        } else if !form.busy {
            form.error = None;
            form.form.input(key);
        }
    }

    fn submit_sendgrid(&mut self) {
        let Some(panel) = self.view.panel_mut() else {
            return;
        };
        let Some(form) = &mut panel.sendgrid else {
            return;
        };
        if form.busy {
            return;
        }
        let email_address = form.form.value(0).trim().to_string();
        let name = form.form.value(1).trim().to_string();
        let api_key = form.form.value(2).trim().to_string();
        if email_address.is_empty() || api_key.is_empty() {
            form.error = Some("Email and API key are required".to_string());
            return;
        }
        form.busy = true;
        form.error = None;
        let body = SendgridAccountCreate {
            provider: Provider::Sendgrid,
            name: if name.is_empty() {
                email_address.clone()
            } else {
                name
            },
            email_address,
            config: SendgridConfig { api_key },
        };
        self.spawn(move |api| async move {
            AppEvent::SendgridConnected(api.connect_sendgrid(&body).await)
        });
    }

    fn campaign_key(&mut self, key: KeyEvent, kb: &Keybindings) {
        let View::Campaign(v) = &mut self.view else {
            return;
        };

        if v.created_job.is_some() {
            if matches_key(key, &kb.select) || matches_key(key, &kb.back) {
                self.navigate(Screen::Home);
            }
            return;
        }
        if v.panel.sendgrid.is_some() {
            self.sendgrid_key(key, kb);
            return;
        }

        if matches_key(key, &kb.back) {
            self.navigate(Screen::Home);
            return;
        }
        if matches_key(key, &kb.next_step) {
            v.sync_draft();
            let step = v.step();
            if v.draft.can_advance_from(step) {
                v.hint = None;
                v.seq.next();
            } else {
                v.hint = Some(match step {
                    Step::SelectData => "Select a dataset to continue".to_string(),
                    _ => "Select an email account to continue".to_string(),
                });
            }
            return;
        }
        if matches_key(key, &kb.prev_step) {
            v.sync_draft();
            v.hint = None;
            v.seq.prev();
            return;
        }

        match v.step() {
            Step::SelectData => {
                if matches_key(key, &kb.move_up) {
                    v.dataset_cursor = v.dataset_cursor.saturating_sub(1);
                } else if matches_key(key, &kb.move_down) {
                    v.dataset_cursor =
                        (v.dataset_cursor + 1).min(v.datasets.data().len().saturating_sub(1));
                } else if matches_key(key, &kb.reload) {
                    self.load_datasets();
                } else if matches_key(key, &kb.select) {
                    let picked = v.datasets.data().get(v.dataset_cursor).map(|d| d.id);
                    if picked.is_some() && picked != v.draft.dataset_id {
                        v.draft.dataset_id = picked;
                        v.hint = None;
                        self.load_columns();
                    }
                }
            }
            Step::EmailAccount => {
                if matches_key(key, &kb.move_up) {
                    v.account_cursor = v.account_cursor.saturating_sub(1);
                } else if matches_key(key, &kb.move_down) {
                    v.account_cursor =
                        (v.account_cursor + 1).min(v.accounts.data().len().saturating_sub(1));
                } else if matches_key(key, &kb.reload) {
                    self.load_accounts();
                } else if matches_key(key, &kb.select) {
                    if let Some(id) = v.accounts.data().get(v.account_cursor).map(|a| a.id) {
                        v.draft.email_account_id = Some(id);
                        v.hint = None;
                    }
                } else if matches_key(key, &kb.connect_gmail) {
                    self.connect_gmail();
                } else if matches_key(key, &kb.connect_sendgrid) {
                    open_sendgrid(&mut v.panel);
                }
            }
            Step::Compose => {
                if matches_key(key, &kb.generate) {
                    self.generate_template();
                } else if matches_key(key, &kb.next_field) {
                    v.compose.next_field();
                } else if matches_key(key, &kb.prev_field) {
                    v.compose.prev_field();
                } else if matches_key(key, &kb.cycle_column) {
                    let count = v.columns.data().len();
                    if count > 0 {
                        v.column_cursor = (v.column_cursor + 1) % count;
                    }
                } else if matches_key(key, &kb.insert_column) {
                    if let Some(column) = v.columns.data().get(v.column_cursor) {
                        let token = format!("{{{{{}}}}}", column);
                        v.compose.insert_str(&token);
                    }
                } else {
                    v.compose.input(key);
                }
            }
            Step::Schedule => {
                if matches_key(key, &kb.toggle_schedule) {
                    v.draft.schedule_type = match v.draft.schedule_type {
                        ScheduleType::Now => ScheduleType::Scheduled,
                        ScheduleType::Scheduled => ScheduleType::Now,
                    };
                } else if matches_key(key, &kb.toggle_throttle) {
                    v.draft.throttle_enabled = !v.draft.throttle_enabled;
                } else if matches_key(key, &kb.next_field) {
                    v.schedule.next_field();
                } else if matches_key(key, &kb.prev_field) {
                    v.schedule.prev_field();
                } else {
                    v.schedule.input(key);
                }
            }
            Step::Review => {
                if matches_key(key, &kb.submit) || matches_key(key, &kb.select) {
                    self.submit_campaign();
                }
            }
        }
    }

    fn generate_template(&mut self) {
        let View::Campaign(v) = &mut self.view else {
            return;
        };
        if v.generating {
            return;
        }
        v.sync_draft();
        let prompt = v.draft.prompt.trim().to_string();
        let columns = v.columns.data().clone();
        if prompt.is_empty() || columns.is_empty() {
            v.llm_error = Some("Please enter a prompt and select a dataset with columns".to_string());
            return;
        }
        v.generating = true;
        v.llm_error = None;
        self.spawn(move |api| async move {
            AppEvent::TemplateGenerated(api.generate_template(&prompt, &columns).await)
        });
    }

    fn submit_campaign(&mut self) {
        let View::Campaign(v) = &mut self.view else {
            return;
        };
        if v.submitting {
            return;
        }
        v.sync_draft();
        let job = match v.draft.to_payload() {
            Ok(job) => job,
            Err(e) => {
                v.error = Some(e.user_message("Failed to create campaign"));
                return;
            }
        };
        v.submitting = true;
        v.error = None;
        self.spawn(move |api| async move { AppEvent::CampaignCreated(api.create_email_job(&job).await) });
    }
}

fn upload_summary(uploaded: &UploadedDataset) -> String {
    format!(
        "Uploaded {}: {} columns, emails in \"{}\"",
        uploaded.name,
        uploaded.columns.len(),
        uploaded.email_column
    )
}

fn open_sendgrid(panel: &mut ConnectPanel) {
    panel.sendgrid = Some(ConnectForm::sendgrid());
    panel.error = None;
    panel.notice = None;
}

async fn load_csv(path: PathBuf) -> Result<(SelectedFile, CsvPreview)> {
    let meta = tokio::fs::metadata(&path).await?;
    if !meta.is_file() {
        return Err(ApiError::validation(format!(
            "{} is not a file",
            path.display()
        )));
    }
    let preview = csv_preview::read_preview(&path).await?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok((
        SelectedFile {
            path,
            name,
            size: meta.len(),
        },
        preview,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryStorage;
    use crate::upload::UploadState;
    use crossterm::event::{KeyCode, KeyModifiers};
    use serde_json::json;
    use std::io::Write;
    use tokio::sync::mpsc::{self, UnboundedReceiver};
    use wiremock::matchers::{body_json, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Harness {
        app: App,
        rx: UnboundedReceiver<Envelope>,
        store: Arc<MemoryStorage>,
    }

    impl Harness {
        async fn new(server: &MockServer, token: Option<&str>) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            let api = ApiClient::new(&server.uri()).unwrap();
            let store = Arc::new(match token {
                Some(t) => MemoryStorage::with_token(t),
                None => MemoryStorage::default(),
            });
            let app = App::new(Config::default(), api, store.clone(), tx);
            Self { app, rx, store }
        }

        /// Pretend the session check already succeeded.
        async fn signed_in(server: &MockServer) -> Self {
            let mut h = Self::new(server, Some("tok")).await;
            h.app.api.set_token(Some("tok".into())).await;
            h.app.user = Some(User {
                id: json!(1),
                email: "ada@example.com".into(),
            });
            h
        }

        async fn pump(&mut self) {
            let envelope = self.rx.recv().await.unwrap();
            self.app.handle_envelope(envelope).await;
        }

        async fn press(&mut self, code: KeyCode) {
            self.app
                .handle_key(KeyEvent::new(code, KeyModifiers::NONE))
                .await;
        }

        async fn ctrl(&mut self, c: char) {
            self.app
                .handle_key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL))
                .await;
        }

        async fn type_text(&mut self, text: &str) {
            for c in text.chars() {
                self.press(KeyCode::Char(c)).await;
            }
        }

        fn campaign(&self) -> &CampaignView {
            match &self.app.view {
                View::Campaign(v) => v,
                _ => panic!("not on the campaign screen: {:?}", self.app.screen()),
            }
        }
    }

    async fn mount_json(server: &MockServer, verb: &str, route: &str, body: Value) {
        Mock::given(method(verb))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[test]
    fn test_guard_routes_by_session() {
        assert_eq!(guard(Screen::Datasets, false), Screen::Login);
        assert_eq!(guard(Screen::CreateCampaign, false), Screen::Login);
        assert_eq!(guard(Screen::Signup, false), Screen::Signup);
        assert_eq!(guard(Screen::Login, true), Screen::Home);
        assert_eq!(guard(Screen::Accounts, true), Screen::Accounts);
    }

    #[tokio::test]
    async fn test_unauthorized_load_returns_to_login() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/email-accounts"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"detail": "Not authenticated"})),
            )
            .mount(&server)
            .await;

        let mut h = Harness::signed_in(&server).await;
        h.app.navigate(Screen::Accounts);
        assert_eq!(h.app.screen(), Screen::Accounts);

        h.pump().await;
        assert_eq!(h.app.screen(), Screen::Login);
        assert!(h.app.user.is_none());
        assert!(!h.app.api.has_token().await);
        assert_eq!(h.store.current(), None);
        match &h.app.view {
            View::Login(v) => {
                assert_eq!(v.notice.as_deref(), Some(SESSION_EXPIRED));
                assert!(v.error.is_none());
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_failed_dataset_load_shows_the_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/datasets"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(json!({"detail": "Database unavailable"})),
            )
            .mount(&server)
            .await;

        let mut h = Harness::signed_in(&server).await;
        h.app.navigate(Screen::Datasets);
        h.pump().await;
        match &h.app.view {
            View::Datasets(v) => {
                assert!(v.datasets.data().is_empty());
                assert_eq!(v.datasets.error(), Some("Database unavailable"));
            }
            _ => unreachable!(),
        }

        let mut terminal =
            ratatui::Terminal::new(ratatui::backend::TestBackend::new(120, 40)).unwrap();
        terminal.draw(|f| crate::ui::render(f, &mut h.app)).unwrap();
        let buffer = terminal.backend().buffer();
        let text: String = buffer.content().iter().map(|c| c.symbol()).collect();
        assert!(text.contains("Database unavailable"));
        assert!(!text.contains("No datasets yet"));
    }

    #[tokio::test]
    async fn test_stale_epoch_is_dropped() {
        let server = MockServer::start().await;
        let mut h = Harness::signed_in(&server).await;
        h.app.navigate(Screen::Home);
        let old_epoch = h.app.epoch;
        h.app.navigate(Screen::Home);

        h.app
            .handle_envelope(Envelope {
                epoch: old_epoch,
                event: AppEvent::Redirect {
                    to: Screen::Datasets,
                    notice: None,
                },
            })
            .await;
        assert_eq!(h.app.screen(), Screen::Home);
    }

    #[tokio::test]
    async fn test_login_stores_token_and_lands_home() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .and(body_string_contains("grant_type=password"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "fresh", "token_type": "bearer"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/me"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": 7, "email": "ada@example.com"})),
            )
            .mount(&server)
            .await;

        let mut h = Harness::new(&server, None).await;
        h.app.start(None).await;
        assert_eq!(h.app.screen(), Screen::Login);

        h.press(KeyCode::Enter).await;
        match &h.app.view {
            View::Login(v) => assert_eq!(
                v.error.as_deref(),
                Some("Please enter your email and password.")
            ),
            _ => unreachable!(),
        }

        h.type_text("ada@example.com").await;
        h.press(KeyCode::Tab).await;
        h.type_text("secret").await;
        h.press(KeyCode::Enter).await;

        h.pump().await; // login
        h.pump().await; // /me
        assert_eq!(h.app.screen(), Screen::Home);
        assert_eq!(h.store.current().as_deref(), Some("fresh"));
        assert_eq!(h.app.user.as_ref().map(|u| u.email.as_str()), Some("ada@example.com"));
    }

    #[tokio::test]
    async fn test_stored_token_rejected_at_startup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let mut h = Harness::new(&server, Some("stale")).await;
        h.app.start(None).await;
        assert!(h.app.checking_session);
        h.pump().await;
        assert!(!h.app.checking_session);
        assert_eq!(h.app.screen(), Screen::Login);
        assert_eq!(h.store.current(), None);
    }

    #[tokio::test]
    async fn test_callback_without_token_shows_error() {
        let server = MockServer::start().await;
        let mut h = Harness::new(&server, None).await;
        h.app
            .start(Some("http://localhost:5173/auth/callback".into()))
            .await;
        match &h.app.view {
            View::Login(v) => {
                assert_eq!(v.error.as_deref(), Some("No authentication token received"))
            }
            _ => panic!("expected login"),
        }
    }

    #[tokio::test]
    async fn test_wizard_generates_and_launches() {
        let server = MockServer::start().await;
        mount_json(
            &server,
            "GET",
            "/datasets",
            json!({"data": [{"id": 4, "name": "Leads", "status": "completed"}]}),
        )
        .await;
        mount_json(
            &server,
            "GET",
            "/email-accounts",
            json!([{"id": 9, "email_address": "me@x.io", "provider": "gmail"}]),
        )
        .await;
        mount_json(
            &server,
            "GET",
            "/datasets/4",
            json!({"id": 4, "name": "Leads", "json_schema": ["email", "first_name"]}),
        )
        .await;
        mount_json(
            &server,
            "GET",
            "/datasets/preview/4",
            json!({"json_schema": ["email", "first_name"], "rows": [{"email": "a@b.c", "first_name": "Ada"}]}),
        )
        .await;
        Mock::given(method("POST"))
            .and(path("/llm/generate-template"))
            .and(body_json(json!({
                "user_prompt": "Say hi",
                "columns": ["email", "first_name"]
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"subject": "S", "body": "B"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/email-jobs/"))
            .and(body_json(json!({
                "dataset_id": 4,
                "email_account_id": 9,
                "subject_template": "S",
                "prompt_template": "B",
                "scheduled_at": null,
                "throttle_per_minute": 60
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "job_id": 42, "status": "queued", "message": "ok"
            })))
            .mount(&server)
            .await;

        let mut h = Harness::signed_in(&server).await;
        h.app.navigate(Screen::CreateCampaign);
        h.pump().await;
        h.pump().await;
        assert_eq!(h.campaign().datasets.data().len(), 1);
        assert_eq!(h.campaign().accounts.data().len(), 1);

        // Cannot leave the first step without a dataset.
        h.ctrl('n').await;
        assert_eq!(h.campaign().step(), Step::SelectData);
        assert!(h.campaign().hint.is_some());

        h.press(KeyCode::Enter).await;
        h.pump().await;
        assert_eq!(h.campaign().columns.data(), &vec!["email".to_string(), "first_name".into()]);
        assert!(h.campaign().sample.is_some());

        h.ctrl('n').await;
        assert_eq!(h.campaign().step(), Step::EmailAccount);
        h.press(KeyCode::Enter).await;
        h.ctrl('n').await;
        assert_eq!(h.campaign().step(), Step::Compose);

        // Existing edits are overwritten by the generated template.
        if let View::Campaign(v) = &mut h.app.view {
            v.compose.set_value(COMPOSE_SUBJECT, "draft subject");
            v.compose.set_value(COMPOSE_PROMPT, "Say hi");
        }
        h.ctrl('g').await;
        assert!(h.campaign().generating);
        h.pump().await;
        assert_eq!(h.campaign().compose.value(COMPOSE_SUBJECT), "S");
        assert_eq!(h.campaign().compose.value(COMPOSE_BODY), "B");

        h.ctrl('n').await;
        h.ctrl('n').await;
        assert_eq!(h.campaign().step(), Step::Review);
        h.ctrl('s').await;
        assert!(h.campaign().submitting);
        h.pump().await;
        assert_eq!(h.campaign().created_job.as_ref().map(|j| j.job_id), Some(42));
    }

    #[tokio::test]
    async fn test_generate_requires_prompt_and_columns() {
        let server = MockServer::start().await;
        let mut h = Harness::signed_in(&server).await;
        h.app.navigate(Screen::CreateCampaign);
        if let View::Campaign(v) = &mut h.app.view {
            v.seq.next();
            v.seq.next();
        }
        h.ctrl('g').await;
        assert_eq!(
            h.campaign().llm_error.as_deref(),
            Some("Please enter a prompt and select a dataset with columns")
        );
        assert!(!h.campaign().generating);
    }

    #[tokio::test]
    async fn test_failed_launch_stays_on_review() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/email-jobs/"))
            .respond_with(
                ResponseTemplate::new(422).set_body_json(json!({"detail": "Dataset is still processing"})),
            )
            .mount(&server)
            .await;

        let mut h = Harness::signed_in(&server).await;
        h.app.navigate(Screen::CreateCampaign);
        if let View::Campaign(v) = &mut h.app.view {
            v.draft.dataset_id = Some(1);
            v.draft.email_account_id = Some(2);
            v.compose.set_value(COMPOSE_SUBJECT, "Hi");
            v.compose.set_value(COMPOSE_BODY, "There");
            for _ in 0..4 {
                v.seq.next();
            }
        }
        h.ctrl('s').await;
        // The two list loads come back before the submission.
        for _ in 0..3 {
            h.pump().await;
        }
        let v = h.campaign();
        assert_eq!(v.step(), Step::Review);
        assert_eq!(v.error.as_deref(), Some("Dataset is still processing"));
        assert!(v.created_job.is_none());
        assert!(!v.submitting);
    }

    #[tokio::test]
    async fn test_redirect_lands_home_with_notice() {
        let server = MockServer::start().await;
        let mut h = Harness::signed_in(&server).await;
        h.app.navigate(Screen::Home);
        let epoch = h.app.epoch;
        h.app
            .handle_envelope(Envelope {
                epoch,
                event: AppEvent::Redirect {
                    to: Screen::Home,
                    notice: Some("Campaign launched (job #42)".into()),
                },
            })
            .await;
        match &h.app.view {
            View::Home(v) => assert_eq!(v.notice.as_deref(), Some("Campaign launched (job #42)")),
            _ => panic!("expected home"),
        }
    }

    #[tokio::test]
    async fn test_upload_flow_reaches_processing() {
        let server = MockServer::start().await;
        mount_json(&server, "GET", "/datasets", json!({"data": []})).await;
        mount_json(
            &server,
            "POST",
            "/datasets/",
            json!({"columns": ["Work Email", "name"], "name": "leads.csv", "email_column": "Work Email"}),
        )
        .await;

        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        write!(file, "\u{feff}\"name\",\"Work Email\"\r\n").unwrap();
        writeln!(file, "\"Lovelace, Ada\",ada@example.com").unwrap();

        let mut h = Harness::signed_in(&server).await;
        h.app.navigate(Screen::Datasets);
        h.pump().await;

        h.press(KeyCode::Tab).await;
        h.type_text(&file.path().display().to_string()).await;
        h.press(KeyCode::Enter).await;
        h.pump().await;

        let file_name = file.path().file_name().unwrap().to_string_lossy().into_owned();
        match &h.app.view {
            View::Datasets(v) => {
                assert_eq!(v.email_column.as_deref(), Some("Work Email"));
                assert_eq!(v.form.value(UPLOAD_NAME), file_name);
                assert_eq!(v.tracker.file().map(|f| f.name.clone()), Some(file_name));
            }
            _ => unreachable!(),
        }

        h.ctrl('s').await;
        // Progress updates, then the server response.
        loop {
            let envelope = h.rx.recv().await.unwrap();
            let done = matches!(envelope.event, AppEvent::UploadFinished(_));
            h.app.handle_envelope(envelope).await;
            if done {
                break;
            }
        }
        match &h.app.view {
            View::Datasets(v) => {
                assert_eq!(v.tracker.state(), UploadState::Processing);
                assert_eq!(
                    v.notice.as_deref(),
                    Some("Uploaded leads.csv: 2 columns, emails in \"Work Email\"")
                );
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_failed_upload_clears_selection() {
        let server = MockServer::start().await;
        mount_json(&server, "GET", "/datasets", json!({"data": []})).await;
        Mock::given(method("POST"))
            .and(path("/datasets/"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"detail": "Bad CSV"})))
            .mount(&server)
            .await;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "email").unwrap();
        writeln!(file, "a@b.c").unwrap();

        let mut h = Harness::signed_in(&server).await;
        h.app.navigate(Screen::Datasets);
        h.pump().await;
        h.press(KeyCode::Tab).await;
        h.type_text(&file.path().display().to_string()).await;
        h.press(KeyCode::Enter).await;
        h.pump().await;
        h.ctrl('s').await;
        loop {
            let envelope = h.rx.recv().await.unwrap();
            let done = matches!(envelope.event, AppEvent::UploadFinished(_));
            h.app.handle_envelope(envelope).await;
            if done {
                break;
            }
        }
        match &h.app.view {
            View::Datasets(v) => {
                assert_eq!(v.tracker.state(), UploadState::Idle);
                assert!(v.tracker.file().is_none());
                assert_eq!(v.error.as_deref(), Some("Bad CSV"));
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_sendgrid_connect_requires_email_and_key() {
        let server = MockServer::start().await;
        mount_json(&server, "GET", "/email-accounts", json!([])).await;
        let mut h = Harness::signed_in(&server).await;
        h.app.navigate(Screen::Accounts);
        h.pump().await;

        h.press(KeyCode::Char('s')).await;
        h.press(KeyCode::Enter).await;
        match &h.app.view {
            View::Accounts(v) => {
                let form = v.panel.sendgrid.as_ref().unwrap();
                assert_eq!(form.error.as_deref(), Some("Email and API key are required"));
                assert!(!form.busy);
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_delete_needs_confirmation() {
        let server = MockServer::start().await;
        mount_json(
            &server,
            "GET",
            "/email-accounts",
            json!([{"id": 3, "email_address": "s@x.io", "provider": "sendgrid"}]),
        )
        .await;
        Mock::given(method("DELETE"))
            .and(path("/email-accounts/3"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let mut h = Harness::signed_in(&server).await;
        h.app.navigate(Screen::Accounts);
        h.pump().await;

        h.press(KeyCode::Char('d')).await;
        match &h.app.view {
            View::Accounts(v) => {
                assert_eq!(v.confirm_delete, Some(3));
                assert!(!v.deleting);
            }
            _ => unreachable!(),
        }
        h.press(KeyCode::Char('d')).await;
        h.pump().await;
        match &h.app.view {
            View::Accounts(v) => {
                assert_eq!(v.panel.notice.as_deref(), Some("Account disconnected"))
            }
            _ => unreachable!(),
        }
    }
}
