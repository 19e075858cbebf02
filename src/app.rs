use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use speedmeter::settings::{Settings, SettingsField};
use speedmeter::speedtest::header::TestRunHeader;
use speedmeter::speedtest::progress::{ChannelSink, EventSink, ProgressEvent, TransferProgress};
use speedmeter::speedtest::report::JsonReport;
use speedmeter::speedtest::{run_speed_test, SpeedTestResult, TestPhase};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const MAX_SAMPLES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppView {
    Main,
    Settings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Panel {
    Download,
    Upload,
    Ping,
}

impl Panel {
    pub fn next(self) -> Self {
        match self {
            Panel::Download => Panel::Upload,
            Panel::Upload => Panel::Ping,
            Panel::Ping => Panel::Download,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            Panel::Download => Panel::Ping,
            Panel::Upload => Panel::Download,
            Panel::Ping => Panel::Upload,
        }
    }
}

pub struct App {
    pub phase: TestPhase,
    pub result: SpeedTestResult,
    pub header: Option<TestRunHeader>,
    pub error: Option<String>,
    pub should_quit: bool,

    // UI state
    pub view: AppView,
    pub selected_panel: Panel,
    pub expanded: bool,

    pub settings: Settings,
    pub selected_setting: SettingsField,

    // Completion fractions reported by the engine
    pub download_progress: f64,
    pub upload_progress: f64,

    // Rates in the configured megabit unit, latencies in ms
    pub download_samples: Vec<f64>,
    pub upload_samples: Vec<f64>,
    pub ping_samples: Vec<f64>,

    cancel_tx: Option<mpsc::Sender<()>>,
}

impl App {
    pub fn new(settings: Settings) -> Self {
        Self {
            phase: TestPhase::Idle,
            result: SpeedTestResult::default(),
            header: None,
            error: None,
            should_quit: false,
            view: AppView::Main,
            selected_panel: Panel::Download,
            expanded: false,
            settings,
            selected_setting: SettingsField::PingCount,
            download_progress: 0.0,
            upload_progress: 0.0,
            download_samples: Vec::new(),
            upload_samples: Vec::new(),
            ping_samples: Vec::new(),
            cancel_tx: None,
        }
    }

    fn is_running(&self) -> bool {
        self.phase != TestPhase::Idle && self.phase != TestPhase::Complete
    }

    pub fn handle_key_event(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        if key.kind != KeyEventKind::Press {
            return None;
        }

        match self.view {
            AppView::Main => self.handle_main_key(key.code),
            AppView::Settings => self.handle_settings_key(key.code),
        }
    }

    fn handle_main_key(&mut self, code: KeyCode) -> Option<AppAction> {
        match code {
            KeyCode::Char('q') => {
                self.should_quit = true;
                Some(AppAction::Quit)
            }
            KeyCode::Char('s') => {
                if !self.is_running() {
                    self.view = AppView::Settings;
                }
                None
            }
            KeyCode::Enter => {
                if self.expanded {
                    self.expanded = false;
                    None
                } else if !self.is_running() {
                    Some(AppAction::StartTest)
                } else {
                    self.expanded = true;
                    None
                }
            }
            KeyCode::Esc => {
                if self.expanded {
                    self.expanded = false;
                    None
                } else if self.is_running() {
                    Some(AppAction::CancelTest)
                } else {
                    None
                }
            }
            KeyCode::Tab | KeyCode::Right | KeyCode::Char('j') => {
                if !self.expanded {
                    self.selected_panel = self.selected_panel.next();
                }
                None
            }
            KeyCode::BackTab | KeyCode::Left | KeyCode::Char('k') => {
                if !self.expanded {
                    self.selected_panel = self.selected_panel.prev();
                }
                None
            }
            KeyCode::Char(' ') => {
                self.expanded = !self.expanded;
                None
            }
            _ => None,
        }
    }

    fn handle_settings_key(&mut self, code: KeyCode) -> Option<AppAction> {
        match code {
            KeyCode::Char('q') | KeyCode::Esc | KeyCode::Enter => self.view = AppView::Main,
            KeyCode::Up | KeyCode::Char('k') => self.selected_setting = self.selected_setting.prev(),
            KeyCode::Down | KeyCode::Char('j') | KeyCode::Tab => {
                self.selected_setting = self.selected_setting.next()
            }
            KeyCode::Left | KeyCode::Char('h') => self.selected_setting.decrease(&mut self.settings),
            KeyCode::Right | KeyCode::Char('l') => self.selected_setting.increase(&mut self.settings),
            _ => {}
        }
        None
    }

    pub fn reset_for_new_test(&mut self) {
        self.phase = TestPhase::Idle;
        self.result = SpeedTestResult::default();
        self.header = None;
        self.error = None;
        self.download_progress = 0.0;
        self.upload_progress = 0.0;
        self.download_samples.clear();
        self.upload_samples.clear();
        self.ping_samples.clear();
        self.expanded = false;
    }

    pub fn handle_event(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::TestStart(header) => {
                self.header = Some(header);
                self.phase = TestPhase::Ping;
            }
            ProgressEvent::Ping { ping, .. } => {
                self.phase = TestPhase::Ping;
                if ping.latency > 0.0 {
                    push_sample(&mut self.ping_samples, ping.latency);
                }
                self.result.ping_ms = ping.latency;
                self.result.jitter_ms = ping.jitter;
            }
            ProgressEvent::Download { download, .. } => {
                self.phase = TestPhase::Download;
                self.download_progress = download.progress;
                let rate = self.megabits(&download);
                push_sample(&mut self.download_samples, rate);
            }
            ProgressEvent::Upload { upload, .. } => {
                self.phase = TestPhase::Upload;
                self.upload_progress = upload.progress;
                let rate = self.megabits(&upload);
                push_sample(&mut self.upload_samples, rate);
            }
        }
    }

    fn megabits(&self, progress: &TransferProgress) -> f64 {
        self.settings.unit_base.to_megabits(progress.bandwidth as f64)
    }

    pub fn complete_test(&mut self, report: &JsonReport) {
        self.result = SpeedTestResult::from_report(report, &self.settings);
        self.phase = TestPhase::Complete;
    }

    pub fn fail_test(&mut self, error: String) {
        self.error = Some(error);
        self.phase = TestPhase::Idle;
    }

    pub fn set_cancel_tx(&mut self, tx: mpsc::Sender<()>) {
        self.cancel_tx = Some(tx);
    }

    pub fn cancel_test(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.try_send(());
        }
        self.phase = TestPhase::Idle;
    }
}

fn push_sample(samples: &mut Vec<f64>, value: f64) {
    samples.push(value);
    if samples.len() > MAX_SAMPLES {
        samples.remove(0);
    }
}

#[derive(Debug, Clone, Copy)]
pub enum AppAction {
    Quit,
    StartTest,
    CancelTest,
}

pub enum TestUpdate {
    Progress(ProgressEvent),
    Complete(Box<JsonReport>),
    Failed(String),
}

/// Drives one run in the background, forwarding engine events to the UI.
pub async fn run_background_test(
    update_tx: mpsc::Sender<TestUpdate>,
    mut cancel_rx: mpsc::Receiver<()>,
    settings: Settings,
) {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let sink: Arc<dyn EventSink> = Arc::new(ChannelSink::new(event_tx));
    let mut test = tokio::spawn(run_speed_test(settings, sink));

    let outcome = loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                let _ = update_tx.send(TestUpdate::Progress(event)).await;
            }
            Some(()) = cancel_rx.recv() => {
                test.abort();
                return;
            }
            joined = &mut test => break joined,
        }
    };

    // Flush events published just before the run finished
    while let Ok(event) = event_rx.try_recv() {
        let _ = update_tx.send(TestUpdate::Progress(event)).await;
    }

    let update = match outcome {
        Ok(Ok(report)) => TestUpdate::Complete(Box::new(report)),
        Ok(Err(e)) => TestUpdate::Failed(e.to_string()),
        Err(e) => TestUpdate::Failed(format!("speed test task failed: {}", e)),
    };
    let _ = update_tx.send(update).await;
}

pub fn poll_event(timeout: Duration) -> Result<Option<Event>> {
    if event::poll(timeout)? {
        Ok(Some(event::read()?))
    } else {
        Ok(None)
    }
}
