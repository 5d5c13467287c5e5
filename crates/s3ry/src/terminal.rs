use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossterm::cursor::{Hide, Show};
use crossterm::event::{Event, KeyCode, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen};
use tokio::sync::mpsc;

use crate::shutdown::{ShutdownController, ShutdownEvent};

/// Input decoded off the raw terminal while the dashboard owns the
/// screen.
///
/// Raw mode swallows SIGINT, so the cancel affordances (Ctrl-C, `q`,
/// Esc) are recognized here and run through the same two-stage
/// escalation as the signal handler; everything else the session loop
/// needs from the terminal arrives as one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiSignal {
    /// Cancel in-flight transfers and clean up.
    Cancel,
    /// Second request: leave immediately.
    Exit,
    /// The window changed size; the dashboard should repaint.
    Resize,
}

/// RAII guard for the full-screen dashboard: raw mode and the alternate
/// screen on enter, both restored on drop. A reader thread decodes key
/// and resize events into [`UiSignal`]s on a channel owned by this
/// dashboard session.
pub struct Screen {
    stop: Arc<AtomicBool>,
    reader: Option<std::thread::JoinHandle<()>>,
}

impl Screen {
    pub fn enter(
        shutdown: Arc<ShutdownController>,
    ) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<UiSignal>)> {
        crossterm::terminal::enable_raw_mode()?;
        execute!(std::io::stdout(), EnterAlternateScreen, Hide)?;
        #[cfg(unix)]
        if let Err(err) = restore_newline_translation() {
            let _ = execute!(std::io::stdout(), Show, LeaveAlternateScreen);
            let _ = crossterm::terminal::disable_raw_mode();
            return Err(err);
        }

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_reader = stop.clone();
        let reader = std::thread::spawn(move || {
            read_input(&shutdown, &signal_tx, &stop_reader);
        });

        Ok((
            Self {
                stop,
                reader: Some(reader),
            },
            signal_rx,
        ))
    }
}

fn read_input(
    shutdown: &ShutdownController,
    signal_tx: &mpsc::UnboundedSender<UiSignal>,
    stop: &AtomicBool,
) {
    while !stop.load(Ordering::Relaxed) {
        if !crossterm::event::poll(Duration::from_millis(200)).unwrap_or(false) {
            continue;
        }
        let Ok(event) = crossterm::event::read() else {
            continue;
        };

        let signal = match event {
            Event::Resize(_, _) => UiSignal::Resize,
            Event::Key(key) => {
                let ctrl_c = key.code == KeyCode::Char('c')
                    && key.modifiers.contains(KeyModifiers::CONTROL);
                if !ctrl_c && !matches!(key.code, KeyCode::Char('q') | KeyCode::Esc) {
                    continue;
                }
                match shutdown.bump() {
                    ShutdownEvent::Cancel => UiSignal::Cancel,
                    ShutdownEvent::Exit => UiSignal::Exit,
                }
            }
            _ => continue,
        };

        let last = signal == UiSignal::Exit;
        if signal_tx.send(signal).is_err() || last {
            return;
        }
    }
}

/// Raw mode clears output post-processing, but the dashboard still wants
/// `\n` to imply a carriage return. Terminal plumbing; see DESIGN.md.
#[cfg(unix)]
fn restore_newline_translation() -> anyhow::Result<()> {
    use std::os::fd::AsRawFd as _;

    let fd = std::io::stdout().as_raw_fd();
    unsafe {
        let mut termios: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut termios) != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        termios.c_oflag |= (libc::OPOST | libc::ONLCR) as libc::tcflag_t;
        if libc::tcsetattr(fd, libc::TCSANOW, &termios) != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
    }
    Ok(())
}

impl Drop for Screen {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = execute!(std::io::stdout(), Show, LeaveAlternateScreen);
        let _ = crossterm::terminal::disable_raw_mode();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}
