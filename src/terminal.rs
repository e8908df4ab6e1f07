use crate::surface::{LineStyle, LogLine, PanelFactory, PanelView};
use dialoguer::console::{measure_text_width, style, Term};
use std::io;

pub struct TerminalFactory {
    pub erase: bool,
}

pub struct TerminalView {
    term: Term,
    rows: usize,
    erase: bool,
}

impl PanelFactory for TerminalFactory {
    fn build(&self) -> Box<dyn PanelView> {
        Box::new(TerminalView {
            term: Term::stdout(),
            rows: 0,
            erase: self.erase,
        })
    }
}

// Terminal failures are logged, never propagated.
fn warn_on_error(result: io::Result<()>, action: &str) -> bool {
    match result {
        Ok(()) => true,
        Err(err) => {
            log::warn!("failed to {action} log surface: {err}");
            false
        }
    }
}

impl TerminalView {
    fn rows_for(&self, text: &str) -> usize {
        let width = usize::from(self.term.size().1).max(1);
        let cells = measure_text_width(text);
        cells.div_ceil(width).max(1)
    }

    fn erase_region(&mut self) {
        if self.erase && self.term.is_term() && self.rows > 0 {
            warn_on_error(self.term.clear_last_lines(self.rows), "clear");
        }
        self.rows = 0;
    }
}

impl PanelView for TerminalView {
    fn append(&mut self, line: &LogLine) {
        let text = line.text.strip_suffix('\n').unwrap_or(&line.text);
        for part in text.split('\n') {
            let part = part.strip_suffix('\r').unwrap_or(part);
            let rendered = match line.style {
                LineStyle::Echo => style(part).cyan().bold().to_string(),
                LineStyle::Stdout => part.to_string(),
                LineStyle::Stderr => style(part).red().to_string(),
            };
            self.rows += self.rows_for(part);
            warn_on_error(self.term.write_line(&rendered), "write to");
        }
    }

    fn clear(&mut self) {
        self.erase_region();
    }

    fn scroll_to_bottom(&mut self) {
        warn_on_error(self.term.flush(), "flush");
    }

    fn destroy(&mut self) {
        self.erase_region();
    }
}
