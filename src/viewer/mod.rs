//! Terminal front-end: shows the presented picture with a status bar and
//! turns key presses into worker commands.

mod picker;

use std::io;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use image::DynamicImage;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame, Terminal,
};
use ratatui_image::picker::Picker;
use ratatui_image::protocol::StatefulProtocol;
use ratatui_image::StatefulImage;
use tokio::sync::{mpsc, watch};

use crate::pipeline::SessionHandle;
use crate::protocol::{WorkerCommand, WorkerEvent};
use crate::render::terminal::Presented;

pub use picker::create_picker;

/// How long a warning stays in the banner
const WARNING_TTL: Duration = Duration::from_secs(5);

/// Latest telemetry and messages from the session
#[derive(Debug, Default)]
pub struct ViewerStatus {
    pub fps: u32,
    pub decode_queue_size: usize,
    pub pending_frames: usize,
    pub codec_errors: u64,
    pub codec_type: String,
    warning: Option<(String, Instant)>,
    pub error: Option<String>,
}

impl ViewerStatus {
    pub fn apply(&mut self, event: WorkerEvent, now: Instant) {
        match event {
            WorkerEvent::Stats {
                fps,
                decode_queue_size,
                pending_frames,
                codec_errors,
                codec_type,
            } => {
                self.fps = fps;
                self.decode_queue_size = decode_queue_size;
                self.pending_frames = pending_frames;
                self.codec_errors = codec_errors;
                self.codec_type = codec_type;
            }
            WorkerEvent::Warning { warning } => self.warning = Some((warning, now)),
            WorkerEvent::Error { error } => self.error = Some(error),
        }
    }

    /// Warning still inside its display window
    pub fn warning(&self, now: Instant) -> Option<&str> {
        self.warning
            .as_ref()
            .filter(|(_, at)| now.duration_since(*at) < WARNING_TTL)
            .map(|(text, _)| text.as_str())
    }
}

pub struct Viewer {
    picker: Picker,
    protocol: Option<StatefulProtocol>,
    frames: watch::Receiver<Presented>,
    events: mpsc::UnboundedReceiver<WorkerEvent>,
    session: SessionHandle,
    status: ViewerStatus,
    night: bool,
}

impl Viewer {
    pub fn new(
        picker: Picker,
        frames: watch::Receiver<Presented>,
        events: mpsc::UnboundedReceiver<WorkerEvent>,
        session: SessionHandle,
        night: bool,
    ) -> Self {
        Self {
            picker,
            protocol: None,
            frames,
            events,
            session,
            status: ViewerStatus::default(),
            night,
        }
    }

    /// Own the terminal until `q` is pressed or the session ends.
    pub fn run(&mut self) -> Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.run_loop(&mut terminal);

        // Restore terminal
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn run_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
        loop {
            if !self.drain_events() {
                return Ok(());
            }
            self.refresh_picture();

            terminal.draw(|f| self.ui(f))?;

            if event::poll(Duration::from_millis(30))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => {
                            self.session.shutdown();
                            return Ok(());
                        }
                        KeyCode::Char('c') => {
                            self.session.command(WorkerCommand::ClearBuffers);
                        }
                        KeyCode::Char('n') => {
                            self.night = !self.night;
                            self.session.command(WorkerCommand::Night { value: self.night });
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Returns false once the session has gone away.
    fn drain_events(&mut self) -> bool {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.status.apply(event, Instant::now()),
                Err(mpsc::error::TryRecvError::Empty) => return true,
                Err(mpsc::error::TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn refresh_picture(&mut self) {
        if !matches!(self.frames.has_changed(), Ok(true)) {
            return;
        }
        let picture = self.frames.borrow_and_update().clone();
        if let Some(picture) = picture {
            let image = DynamicImage::ImageRgba8(picture.as_ref().clone());
            self.protocol = Some(self.picker.new_resize_protocol(image));
        }
    }

    fn ui(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(1),    // Picture
                Constraint::Length(1), // Warning / error line
                Constraint::Length(1), // Status bar
            ])
            .split(f.area());

        // No border around the picture: ratatui would clear the area every
        // frame and Sixel/Kitty output flickers
        if let Some(ref mut protocol) = self.protocol {
            f.render_stateful_widget(StatefulImage::default(), chunks[0], protocol);
        } else {
            let waiting = Paragraph::new("📱 waiting for the phone...")
                .style(Style::default().fg(Color::DarkGray))
                .alignment(Alignment::Center);
            f.render_widget(waiting, chunks[0]);
        }

        let now = Instant::now();
        let message = if let Some(warning) = self.status.warning(now) {
            Paragraph::new(format!(" ⚠️  {}", warning)).style(Style::default().fg(Color::Yellow))
        } else if let Some(ref error) = self.status.error {
            Paragraph::new(format!(" ❌ {}", error)).style(Style::default().fg(Color::Red))
        } else {
            Paragraph::new("")
        };
        f.render_widget(message, chunks[1]);

        let key = Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD);
        let status = Paragraph::new(Line::from(vec![
            Span::styled(
                format!(" {} fps ", self.status.fps),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
            Span::raw(format!(
                "│ {} │ queue {} │ decoder {} │ errors {} │ ",
                self.status.codec_type,
                self.status.pending_frames,
                self.status.decode_queue_size,
                self.status.codec_errors
            )),
            Span::styled("c", key),
            Span::raw(" clear │ "),
            Span::styled("n", key),
            Span::raw(if self.night { " day │ " } else { " night │ " }),
            Span::styled("q", key),
            Span::raw(" quit"),
        ]))
        .style(Style::default().bg(Color::DarkGray));
        f.render_widget(status, chunks[2]);
    }
}
