use crate::app::{App, AppView, Panel};
use ratatui::{
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph},
    Frame,
};
use speedmeter::settings::SettingsField;
use speedmeter::speedtest::TestPhase;

const ACCENT: Color = Color::Rgb(100, 149, 237);
const SUCCESS: Color = Color::Rgb(134, 194, 156);
const SUCCESS_DIM: Color = Color::Rgb(80, 120, 90);
const INFO: Color = Color::Rgb(147, 180, 220);
const INFO_DIM: Color = Color::Rgb(90, 110, 140);
const WARN: Color = Color::Rgb(220, 180, 130);
const ERROR: Color = Color::Rgb(220, 120, 120);
const TEXT_PRIMARY: Color = Color::Rgb(230, 230, 230);
const TEXT_SECONDARY: Color = Color::Rgb(160, 160, 160);
const TEXT_MUTED: Color = Color::Rgb(100, 100, 100);
const BORDER: Color = Color::Rgb(60, 60, 65);
const BORDER_ACTIVE: Color = Color::Rgb(100, 100, 110);

/// One throughput panel's worth of data.
struct Metric<'a> {
    title: &'static str,
    color: Color,
    dim_color: Color,
    speed: f64,
    progress: f64,
    samples: &'a [f64],
}

pub fn draw_ui(frame: &mut Frame, app: &App) {
    let area = frame.area();

    match app.view {
        AppView::Main => draw_main_view(frame, area, app),
        AppView::Settings => draw_settings_view(frame, area, app),
    }
}

fn draw_main_view(frame: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(8),
        Constraint::Length(1),
    ])
    .split(area);

    draw_header(frame, chunks[0], app);

    if app.expanded {
        match app.selected_panel {
            Panel::Download => draw_metric(frame, chunks[1], app, &download_metric(app), true, true),
            Panel::Upload => draw_metric(frame, chunks[1], app, &upload_metric(app), true, true),
            Panel::Ping => draw_ping(frame, chunks[1], app, true, true),
        }
    } else {
        let panels = Layout::horizontal([
            Constraint::Ratio(1, 3),
            Constraint::Ratio(1, 3),
            Constraint::Ratio(1, 3),
        ])
        .split(chunks[1]);

        let selected = app.selected_panel;
        draw_metric(frame, panels[0], app, &download_metric(app), selected == Panel::Download, false);
        draw_metric(frame, panels[1], app, &upload_metric(app), selected == Panel::Upload, false);
        draw_ping(frame, panels[2], app, selected == Panel::Ping, false);
    }

    draw_help(frame, chunks[2], app);
}

fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(Style::default().fg(BORDER));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::horizontal([
        Constraint::Length(12),
        Constraint::Min(10),
        Constraint::Length(20),
    ])
    .split(inner);

    frame.render_widget(
        Paragraph::new("speedmeter")
            .style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD)),
        chunks[0],
    );

    let (status, color) = match app.phase {
        TestPhase::Idle => ("Ready", TEXT_MUTED),
        TestPhase::Ping => ("Measuring latency...", WARN),
        TestPhase::Download => ("Testing download...", SUCCESS),
        TestPhase::Upload => ("Testing upload...", INFO),
        TestPhase::Complete => ("Complete", ACCENT),
    };

    let mut spans = vec![Span::styled(status, Style::default().fg(color))];
    if let Some(header) = &app.header {
        let location = if header.server.location.is_empty() {
            header.server.name.clone()
        } else {
            format!("{} {}", header.server.name, header.server.location)
        };
        spans.push(Span::styled("  ·  ", Style::default().fg(TEXT_MUTED)));
        spans.push(Span::styled(location, Style::default().fg(TEXT_SECONDARY)));
        if !header.isp.is_empty() {
            spans.push(Span::styled("  ·  ", Style::default().fg(TEXT_MUTED)));
            spans.push(Span::styled(header.isp.clone(), Style::default().fg(TEXT_SECONDARY)));
        }
    }
    frame.render_widget(
        Paragraph::new(Line::from(spans)).alignment(Alignment::Center),
        chunks[1],
    );

    frame.render_widget(
        Paragraph::new(phase_line(app.phase)).alignment(Alignment::Right),
        chunks[2],
    );
}

fn phase_line(phase: TestPhase) -> Line<'static> {
    let phases = [
        (TestPhase::Ping, "ping"),
        (TestPhase::Download, "down"),
        (TestPhase::Upload, "up"),
    ];
    let order = |p: TestPhase| phases.iter().position(|(q, _)| *q == p);

    let mut spans = Vec::new();
    for (i, (p, label)) in phases.iter().enumerate() {
        let is_complete = phase == TestPhase::Complete
            || matches!((order(phase), order(*p)), (Some(now), Some(this)) if this < now);

        let style = if phase == *p {
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)
        } else if is_complete {
            Style::default().fg(TEXT_SECONDARY)
        } else {
            Style::default().fg(TEXT_MUTED)
        };

        spans.push(Span::styled(*label, style));
        if i < phases.len() - 1 {
            spans.push(Span::styled(" / ", Style::default().fg(TEXT_MUTED)));
        }
    }

    Line::from(spans)
}

fn download_metric(app: &App) -> Metric<'_> {
    Metric {
        title: "Download",
        color: SUCCESS,
        dim_color: SUCCESS_DIM,
        speed: current_speed(app.result.download_mbps, &app.download_samples),
        progress: phase_progress(app.phase, TestPhase::Download, app.download_progress),
        samples: &app.download_samples,
    }
}

fn upload_metric(app: &App) -> Metric<'_> {
    Metric {
        title: "Upload",
        color: INFO,
        dim_color: INFO_DIM,
        speed: current_speed(app.result.upload_mbps, &app.upload_samples),
        progress: phase_progress(app.phase, TestPhase::Upload, app.upload_progress),
        samples: &app.upload_samples,
    }
}

fn panel_block(title: &str, color: Color, selected: bool) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if selected { BORDER_ACTIVE } else { BORDER }))
        .title(Span::styled(
            format!(" {} ", title),
            Style::default().fg(if selected { color } else { TEXT_SECONDARY }),
        ))
}

fn draw_metric(frame: &mut Frame, area: Rect, app: &App, metric: &Metric, selected: bool, expanded: bool) {
    let block = panel_block(metric.title, metric.color, selected);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::vertical([
        Constraint::Length(2),
        Constraint::Length(1),
        Constraint::Min(3),
    ])
    .split(inner);

    let label = app.settings.unit_base.rate_label();
    let headline = if expanded {
        let (avg, max, min) = get_stats(metric.samples);
        stats_line(vec![
            format_speed(metric.speed, label),
            format!("avg {}", format_speed(avg, label)),
            format!("max {}", format_speed(max, label)),
            format!("min {}", format_speed(min, label)),
        ])
    } else {
        Line::from(Span::styled(
            format_speed(metric.speed, label),
            Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD),
        ))
    };
    frame.render_widget(Paragraph::new(headline).alignment(Alignment::Center), chunks[0]);

    draw_progress_bar(frame, chunks[1], metric.progress, metric.color, metric.dim_color);
    draw_chart(frame, chunks[2], metric.samples, metric.color, expanded.then_some(label));
}

fn draw_ping(frame: &mut Frame, area: Rect, app: &App, selected: bool, expanded: bool) {
    let block = panel_block("Latency", WARN, selected);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::vertical([
        Constraint::Length(2),
        Constraint::Length(1),
        Constraint::Min(3),
    ])
    .split(inner);

    let ping = current_speed(app.result.ping_ms, &app.ping_samples);
    let value = if ping > 0.0 { format!("{:.0} ms", ping) } else { "—".to_string() };
    let jitter = if app.result.jitter_ms > 0.0 {
        format!("jitter {:.1} ms", app.result.jitter_ms)
    } else {
        "jitter —".to_string()
    };

    let headline = if expanded {
        let (avg, max, min) = get_stats(&app.ping_samples);
        stats_line(vec![
            value,
            jitter.clone(),
            format!("avg {:.0}", avg),
            format!("max {:.0}", max),
            format!("min {:.0}", min),
        ])
    } else {
        Line::from(Span::styled(
            value,
            Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD),
        ))
    };
    frame.render_widget(Paragraph::new(headline).alignment(Alignment::Center), chunks[0]);

    frame.render_widget(
        Paragraph::new(jitter)
            .style(Style::default().fg(TEXT_MUTED))
            .alignment(Alignment::Center),
        chunks[1],
    );

    draw_chart(frame, chunks[2], &app.ping_samples, WARN, expanded.then_some("ms"));
}

fn stats_line(parts: Vec<String>) -> Line<'static> {
    let mut spans = Vec::new();
    for (i, part) in parts.into_iter().enumerate() {
        if i == 0 {
            spans.push(Span::styled(
                part,
                Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD),
            ));
        } else {
            spans.push(Span::styled("  ·  ", Style::default().fg(TEXT_MUTED)));
            spans.push(Span::styled(part, Style::default().fg(TEXT_MUTED)));
        }
    }
    Line::from(spans)
}

fn draw_progress_bar(frame: &mut Frame, area: Rect, ratio: f64, color: Color, dim_color: Color) {
    if area.width < 4 {
        return;
    }

    let width = (area.width - 2) as usize;
    let filled = ((ratio.clamp(0.0, 1.0) * width as f64) as usize).min(width);
    let empty = width.saturating_sub(filled);

    let bar = Line::from(vec![
        Span::raw(" "),
        Span::styled("━".repeat(filled), Style::default().fg(color)),
        Span::styled("━".repeat(empty), Style::default().fg(dim_color)),
        Span::raw(" "),
    ]);

    frame.render_widget(Paragraph::new(bar), area);
}

/// Line chart of `data`; `unit` adds labelled axes and an average line.
fn draw_chart(frame: &mut Frame, area: Rect, data: &[f64], color: Color, unit: Option<&str>) {
    if data.is_empty() || area.width < 4 || area.height < 2 {
        return;
    }

    let (avg, max_val, min_val) = get_stats(data);
    let range = (max_val - min_val).max(0.1);
    let y_min = (min_val - range * 0.1).max(0.0);
    let y_max = max_val + range * 0.1;
    let x_max = data.len() as f64;

    let points: Vec<(f64, f64)> = data.iter().enumerate().map(|(i, &v)| (i as f64, v)).collect();
    let avg_line = [(0.0, avg), (x_max, avg)];

    let mut datasets = vec![Dataset::default()
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(&points)];

    let mut y_axis = Axis::default().bounds([y_min, y_max]);
    let mut x_axis = Axis::default().bounds([0.0, x_max]);

    if let Some(unit) = unit {
        datasets.push(
            Dataset::default()
                .marker(symbols::Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(TEXT_MUTED))
                .data(&avg_line),
        );
        y_axis = y_axis.style(Style::default().fg(BORDER)).labels(vec![
            Span::styled(format!("{:.0}", y_min), Style::default().fg(TEXT_MUTED)),
            Span::styled(format!("{:.0} {}", y_max, unit), Style::default().fg(TEXT_MUTED)),
        ]);
        x_axis = x_axis.style(Style::default().fg(BORDER));
    }

    frame.render_widget(Chart::new(datasets).x_axis(x_axis).y_axis(y_axis), area);
}

fn draw_settings_view(frame: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(10),
        Constraint::Length(1),
    ])
    .split(area);

    let header_block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(Style::default().fg(BORDER));
    let header_inner = header_block.inner(chunks[0]);
    frame.render_widget(header_block, chunks[0]);
    frame.render_widget(
        Paragraph::new("Settings")
            .style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD)),
        header_inner,
    );

    let content_area = Layout::horizontal([
        Constraint::Length(2),
        Constraint::Min(30),
        Constraint::Length(2),
    ])
    .split(chunks[1])[1];

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(BORDER));
    let inner = block.inner(content_area);
    frame.render_widget(block, content_area);

    let mut constraints: Vec<Constraint> = SettingsField::ALL.iter().map(|_| Constraint::Length(2)).collect();
    constraints.push(Constraint::Min(0));
    let rows = Layout::vertical(constraints).split(inner);

    for (row, field) in rows.iter().zip(SettingsField::ALL) {
        draw_setting_row(
            frame,
            *row,
            field.label(),
            &field.value(&app.settings),
            app.selected_setting == field,
        );
    }

    frame.render_widget(
        Paragraph::new("↑↓ select · ←→ adjust · enter done")
            .style(Style::default().fg(TEXT_MUTED))
            .alignment(Alignment::Center),
        chunks[2],
    );
}

fn draw_setting_row(frame: &mut Frame, area: Rect, label: &str, value: &str, selected: bool) {
    let chunks = Layout::horizontal([Constraint::Length(18), Constraint::Min(10)]).split(area);

    let (label_style, value_style) = if selected {
        (Style::default().fg(ACCENT), Style::default().fg(TEXT_PRIMARY))
    } else {
        (Style::default().fg(TEXT_SECONDARY), Style::default().fg(TEXT_MUTED))
    };

    frame.render_widget(Paragraph::new(format!(" {}", label)).style(label_style), chunks[0]);

    let value_text = if selected {
        format!("< {} >", value)
    } else {
        value.to_string()
    };
    frame.render_widget(Paragraph::new(value_text).style(value_style), chunks[1]);
}

fn draw_help(frame: &mut Frame, area: Rect, app: &App) {
    if let Some(error) = &app.error {
        frame.render_widget(
            Paragraph::new(format!("error: {} · enter retry · q quit", error))
                .style(Style::default().fg(ERROR))
                .alignment(Alignment::Center),
            area,
        );
        return;
    }

    let help = if app.expanded {
        "esc close · q quit"
    } else {
        match app.phase {
            TestPhase::Idle | TestPhase::Complete => "enter start · s settings · tab select · space expand · q quit",
            _ => "tab select · space expand · esc cancel · q quit",
        }
    };

    frame.render_widget(
        Paragraph::new(help)
            .style(Style::default().fg(TEXT_MUTED))
            .alignment(Alignment::Center),
        area,
    );
}

fn current_speed(final_value: f64, samples: &[f64]) -> f64 {
    if final_value > 0.0 {
        final_value
    } else {
        samples.last().copied().unwrap_or(0.0)
    }
}

fn phase_progress(phase: TestPhase, panel: TestPhase, live: f64) -> f64 {
    match (phase, panel) {
        (TestPhase::Complete, _) => 1.0,
        (TestPhase::Upload, TestPhase::Download) => 1.0,
        (current, panel) if current == panel => live,
        _ => 0.0,
    }
}

/// Returns `(avg, max, min)`.
fn get_stats(data: &[f64]) -> (f64, f64, f64) {
    if data.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let avg = data.iter().sum::<f64>() / data.len() as f64;
    let max = data.iter().cloned().fold(f64::MIN, f64::max);
    let min = data.iter().cloned().fold(f64::MAX, f64::min);
    (avg, max, min)
}

fn format_speed(mbps: f64, label: &str) -> String {
    if mbps >= 1000.0 {
        format!("{:.1} G{}", mbps / 1000.0, &label[1..])
    } else if mbps >= 1.0 {
        format!("{:.1} {}", mbps, label)
    } else if mbps > 0.0 {
        format!("{:.0} K{}", mbps * 1000.0, &label[1..])
    } else {
        "—".to_string()
    }
}
