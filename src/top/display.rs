use std::io::{self, Stdout, Write};

use crossterm::{
    execute,
    terminal::{self, EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Terminal,
    backend::CrosstermBackend,
    style::{Color, Modifier, Style},
    text::{Line, Text},
    widgets::Paragraph,
};

use super::layout::{FrameLine, LineKind};
use crate::error::Result;

/// Where monitor frames go.
pub trait Display {
    /// Current width in columns.
    fn width(&mut self) -> Result<u16>;

    /// Replaces whatever is on screen with `frame`.
    fn redraw(&mut self, frame: &[FrameLine]) -> Result<()>;

    /// Draws the last frame without clearing what is on screen.
    fn finish(&mut self, frame: &[FrameLine]) -> Result<()>;
}

/// Full-screen terminal sink. Frames are drawn on the alternate screen; the
/// final frame is printed on the normal screen so it stays visible.
pub struct TerminalDisplay {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    active: bool,
}

impl TerminalDisplay {
    pub fn new() -> Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        Ok(Self {
            terminal,
            active: true,
        })
    }

    fn restore(&mut self) -> io::Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        disable_raw_mode()?;
        execute!(self.terminal.backend_mut(), LeaveAlternateScreen)?;
        self.terminal.show_cursor()
    }
}

impl Display for TerminalDisplay {
    fn width(&mut self) -> Result<u16> {
        Ok(terminal::size()?.0)
    }

    fn redraw(&mut self, frame: &[FrameLine]) -> Result<()> {
        let text = Text::from(
            frame
                .iter()
                .map(|line| Line::styled(line.text.clone(), style(line.kind)))
                .collect::<Vec<_>>(),
        );
        self.terminal
            .draw(|f| f.render_widget(Paragraph::new(text), f.area()))?;
        Ok(())
    }

    fn finish(&mut self, frame: &[FrameLine]) -> Result<()> {
        self.restore()?;
        let mut stdout = io::stdout().lock();
        for line in frame {
            writeln!(stdout, "{}", line.text)?;
        }
        stdout.flush()?;
        Ok(())
    }
}

impl Drop for TerminalDisplay {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}

fn style(kind: LineKind) -> Style {
    match kind {
        LineKind::Title | LineKind::Footer => Style::default().fg(Color::Green),
        LineKind::Header | LineKind::Summary => Style::default().add_modifier(Modifier::BOLD),
        LineKind::Down => Style::default().fg(Color::Red),
        LineKind::Server | LineKind::Blank => Style::default().fg(Color::White),
    }
}
