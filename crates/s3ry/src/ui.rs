use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::Stdout;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use ratatui::Terminal;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::prelude::{Color, CrosstermBackend, Line, Modifier, Span, Style};
use ratatui::widgets::{List, ListItem, Paragraph};

use s3ry_engine::ProgressUpdate;

use crate::format::human_bytes;

const BAR_WIDTH: usize = 24;
const MAX_LOG_LINES: usize = 100;

/// Either progress front-end, behind one interface. Both are plain
/// subscribers of the engine's progress bus.
pub enum ProgressView {
    Tui(Box<Tui>),
    Legacy(LegacyBars),
}

impl ProgressView {
    pub fn apply(&mut self, update: &ProgressUpdate) {
        match self {
            ProgressView::Tui(tui) => tui.apply(update),
            ProgressView::Legacy(bars) => bars.apply(update),
        }
    }

    pub fn set_status(&mut self, msg: &str) {
        match self {
            ProgressView::Tui(tui) => tui.set_status(msg),
            ProgressView::Legacy(bars) => bars.println(msg),
        }
    }

    /// Repaint after a terminal resize. The line-based renderer reflows
    /// on its own.
    pub fn refresh(&mut self) {
        match self {
            ProgressView::Tui(tui) => tui.redraw(),
            ProgressView::Legacy(_) => {}
        }
    }

    pub fn finish(self) {
        match self {
            ProgressView::Tui(_) => {}
            ProgressView::Legacy(bars) => bars.finish(),
        }
    }
}

// ── Full-screen dashboard ───────────────────────────────────────────────

/// Live transfer board: one row per in-flight transfer, a log pane, and a
/// status line. Redrawn on every applied update; the engine's coalescing
/// window already caps the frame rate.
pub struct Tui {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    rows: BTreeMap<u64, ProgressUpdate>,
    logs: VecDeque<String>,
    status: String,
}

impl Tui {
    pub fn new() -> anyhow::Result<Self> {
        let backend = CrosstermBackend::new(std::io::stdout());
        let terminal = Terminal::new(backend)?;
        let mut ui = Self {
            terminal,
            rows: BTreeMap::new(),
            logs: VecDeque::new(),
            status: String::new(),
        };
        ui.redraw();
        Ok(ui)
    }

    fn apply(&mut self, update: &ProgressUpdate) {
        if update.finished {
            self.rows.remove(&update.transfer_id);
            let done = if update.bytes_total > 0 {
                format!("{}  {}", update.label, human_bytes(update.bytes_done))
            } else {
                format!("{}  {} item(s)", update.label, update.items_done)
            };
            self.push_log(done);
        } else {
            self.rows.insert(update.transfer_id, update.clone());
        }
        self.redraw();
    }

    fn set_status(&mut self, msg: &str) {
        self.status = msg.to_string();
        self.redraw();
    }

    fn push_log(&mut self, line: String) {
        if self.logs.len() >= MAX_LOG_LINES {
            self.logs.pop_front();
        }
        self.logs.push_back(line);
    }

    fn row_line(update: &ProgressUpdate) -> Line<'static> {
        if update.bytes_total == 0 {
            return Line::from(format!(
                "{:>4} item(s)  {}",
                update.items_done, update.label
            ));
        }

        let done = update.bytes_done.min(update.bytes_total);
        let percent = (done.saturating_mul(100) / update.bytes_total).min(100);
        let filled = (done.saturating_mul(BAR_WIDTH as u64) / update.bytes_total)
            .min(BAR_WIDTH as u64) as usize;

        let before = format!("{percent:>3}%[");
        let after = format!(
            "] {:>10} / {:<10}  {}",
            human_bytes(done),
            human_bytes(update.bytes_total),
            update.label
        );

        Line::from(vec![
            Span::raw(before),
            Span::styled("#".repeat(filled), Style::default().fg(Color::Cyan)),
            Span::styled(
                "-".repeat(BAR_WIDTH - filled),
                Style::default().fg(Color::Blue),
            ),
            Span::raw(after),
        ])
    }

    fn redraw(&mut self) {
        let title = format!("s3ry  {} transfer(s) in flight", self.rows.len());
        let rows: Vec<ListItem> = self.rows.values().map(|u| ListItem::new(Self::row_line(u))).collect();
        let logs: Vec<String> = self.logs.iter().cloned().collect();
        let status = if self.status.is_empty() {
            " ".to_string()
        } else {
            self.status.clone()
        };

        let _ = self.terminal.draw(|frame| {
            let (title_area, rows_area, log_area, status_area) = layout(frame.area());

            frame.render_widget(
                Paragraph::new(title).style(Style::default().add_modifier(Modifier::BOLD)),
                title_area,
            );
            frame.render_widget(List::new(rows), rows_area);

            let visible = log_area.height as usize;
            let start = logs.len().saturating_sub(visible);
            frame.render_widget(Paragraph::new(logs[start..].join("\n")), log_area);

            frame.render_widget(
                Paragraph::new(status).style(Style::default().fg(Color::Yellow)),
                status_area,
            );
        });
    }
}

fn layout(area: Rect) -> (Rect, Rect, Rect, Rect) {
    let outer = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Ratio(1, 2),
            Constraint::Min(1),
            Constraint::Length(1),
        ])
        .split(area);
    (outer[0], outer[1], outer[2], outer[3])
}

// ── Legacy line-based bars ──────────────────────────────────────────────

/// `--legacy-ui` rendering: one indicatif bar per transfer, printed in
/// place on the normal screen.
pub struct LegacyBars {
    multi: MultiProgress,
    bars: HashMap<u64, ProgressBar>,
}

impl LegacyBars {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
        }
    }

    fn style_bytes() -> ProgressStyle {
        ProgressStyle::with_template("{msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes}")
            .expect("static template")
            .progress_chars("#>-")
    }

    fn style_items() -> ProgressStyle {
        ProgressStyle::with_template("{msg} {pos} item(s)").expect("static template")
    }

    fn apply(&mut self, update: &ProgressUpdate) {
        let bar = self.bars.entry(update.transfer_id).or_insert_with(|| {
            let bar = if update.bytes_total > 0 {
                let bar = ProgressBar::new(update.bytes_total);
                bar.set_style(Self::style_bytes());
                bar
            } else {
                let bar = ProgressBar::new(update.items_total.max(1));
                bar.set_style(Self::style_items());
                bar
            };
            bar.set_message(update.label.clone());
            self.multi.add(bar)
        });

        if update.bytes_total > 0 {
            bar.set_position(update.bytes_done);
        } else {
            bar.set_position(update.items_done);
        }

        if update.finished {
            bar.finish();
            self.bars.remove(&update.transfer_id);
        }
    }

    fn println(&self, msg: &str) {
        let _ = self.multi.println(msg);
    }

    fn finish(self) {
        for bar in self.bars.values() {
            bar.finish_and_clear();
        }
        let _ = self.multi.clear();
    }
}
