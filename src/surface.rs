use crate::host::{Action, Disposable, Registry, CANCEL_COMMAND, WORKSPACE_SELECTOR};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineStyle {
    Echo,
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    pub style: LineStyle,
    pub text: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("log surface is hidden; show it before appending")]
    Hidden,
}

pub trait PanelView {
    fn append(&mut self, line: &LogLine);
    fn clear(&mut self);
    fn scroll_to_bottom(&mut self);
    fn destroy(&mut self);
}

pub trait PanelFactory {
    fn build(&self) -> Box<dyn PanelView>;
}

pub struct HeadlessFactory;

struct HeadlessView;

impl PanelView for HeadlessView {
    fn append(&mut self, _line: &LogLine) {}
    fn clear(&mut self) {}
    fn scroll_to_bottom(&mut self) {}
    fn destroy(&mut self) {}
}

impl PanelFactory for HeadlessFactory {
    fn build(&self) -> Box<dyn PanelView> {
        Box::new(HeadlessView)
    }
}

struct Panel {
    view: Box<dyn PanelView>,
    lines: Vec<LogLine>,
}

pub struct LogSurface<F: PanelFactory> {
    factory: F,
    panel: Option<Panel>,
    dismiss: Option<Disposable>,
}

impl<F: PanelFactory> LogSurface<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            panel: None,
            dismiss: None,
        }
    }

    #[cfg(test)]
    pub fn is_visible(&self) -> bool {
        self.panel.is_some()
    }

    pub fn show(&mut self) {
        if self.panel.is_none() {
            log::debug!("creating log surface");
            self.panel = Some(Panel {
                view: self.factory.build(),
                lines: Vec::new(),
            });
        }
    }

    pub fn hide(&mut self) {
        if let Some(mut panel) = self.panel.take() {
            log::debug!("destroying log surface");
            panel.view.destroy();
        }
    }

    pub fn clear(&mut self) {
        if let Some(panel) = self.panel.as_mut() {
            panel.lines.clear();
            panel.view.clear();
        }
    }

    pub fn append(&mut self, text: impl Into<String>, style: LineStyle) -> Result<(), SurfaceError> {
        let panel = self.panel.as_mut().ok_or(SurfaceError::Hidden)?;
        let line = LogLine {
            style,
            text: text.into(),
        };
        panel.view.append(&line);
        panel.view.scroll_to_bottom();
        panel.lines.push(line);
        Ok(())
    }

    pub fn lines(&self) -> &[LogLine] {
        self.panel
            .as_ref()
            .map(|panel| panel.lines.as_slice())
            .unwrap_or(&[])
    }

    pub fn dismiss_armed(&self) -> bool {
        self.dismiss.is_some()
    }

    pub fn arm_dismiss(&mut self, registry: &mut Registry) {
        self.cancel_dismiss(registry);
        let handle = registry.add_command(WORKSPACE_SELECTOR, CANCEL_COMMAND, Action::DismissConsole);
        self.dismiss = Some(handle);
    }

    pub fn cancel_dismiss(&mut self, registry: &mut Registry) {
        if let Some(handle) = self.dismiss.take() {
            registry.dispose(handle);
        }
    }

    // The user's dismiss signal. Returns whether an armed trigger consumed it.
    pub fn fire_dismiss(&mut self, registry: &mut Registry) -> bool {
        if self.dismiss.is_none() {
            return false;
        }
        self.hide();
        self.cancel_dismiss(registry);
        true
    }

    pub fn destroy(&mut self, registry: &mut Registry) {
        self.cancel_dismiss(registry);
        self.hide();
    }
}
