mod app;
mod ui;

use anyhow::Result;
use app::{poll_event, run_background_test, App, AppAction, TestUpdate};
use crossterm::event::Event;
use ratatui::DefaultTerminal;
use speedmeter::speedtest::progress::{EventSink, JsonLinesSink};
use speedmeter::speedtest::{run_speed_test, TestPhase};
use speedmeter::{OutputMode, Settings};
use std::fs::File;
use std::io::IsTerminal;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use ui::draw_ui;

#[tokio::main]
async fn main() -> Result<()> {
    let mut settings = Settings::load()?;
    if !std::io::stdout().is_terminal() {
        settings.output = OutputMode::Json;
    }
    init_tracing(&settings)?;

    match settings.output {
        OutputMode::Json => run_json(settings).await,
        OutputMode::Tui => {
            let mut terminal = ratatui::init();
            terminal.clear()?;

            let result = run_app(&mut terminal, settings).await;

            ratatui::restore();
            result
        }
    }
}

/// JSON mode logs to stderr; the TUI only logs to a file so the terminal
/// stays clean.
fn init_tracing(settings: &Settings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("speedmeter=info"));

    if let Some(path) = &settings.log_file {
        let file = File::create(path)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    } else if settings.output == OutputMode::Json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

async fn run_json(settings: Settings) -> Result<()> {
    let sink: Arc<dyn EventSink> = Arc::new(JsonLinesSink::new(std::io::stdout()));
    let report_file = settings.report_file.clone();
    let report = run_speed_test(settings, sink).await?;
    println!("{}", report.to_json()?);
    if let Some(path) = report_file {
        report.save(&path)?;
    }
    Ok(())
}

async fn run_app(terminal: &mut DefaultTerminal, settings: Settings) -> Result<()> {
    let mut app = App::new(settings);
    let mut test_rx: Option<mpsc::Receiver<TestUpdate>> = None;

    loop {
        terminal.draw(|frame| draw_ui(frame, &app))?;

        // Drain pending engine updates
        while let Some(rx) = test_rx.as_mut() {
            match rx.try_recv() {
                Ok(update) => handle_update(&mut app, update),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    test_rx = None;
                }
            }
        }

        if let Some(Event::Key(key)) = poll_event(Duration::from_millis(30))? {
            if let Some(action) = app.handle_key_event(key) {
                match action {
                    AppAction::Quit => break,
                    AppAction::StartTest => {
                        app.reset_for_new_test();
                        app.phase = TestPhase::Ping;

                        let (tx, rx) = mpsc::channel(64);
                        let (cancel_tx, cancel_rx) = mpsc::channel(1);

                        app.set_cancel_tx(cancel_tx);
                        test_rx = Some(rx);

                        let settings = app.settings.clone();
                        tokio::spawn(run_background_test(tx, cancel_rx, settings));
                    }
                    AppAction::CancelTest => {
                        app.cancel_test();
                        test_rx = None;
                    }
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}

fn handle_update(app: &mut App, update: TestUpdate) {
    match update {
        TestUpdate::Progress(event) => app.handle_event(event),
        TestUpdate::Complete(report) => {
            if let Some(path) = &app.settings.report_file {
                if let Err(e) = report.save(path) {
                    tracing::warn!("could not save report to {}: {}", path.display(), e);
                }
            }
            app.complete_test(&report);
        }
        TestUpdate::Failed(error) => {
            tracing::error!("speed test failed: {}", error);
            app.fail_test(error);
        }
    }
}
