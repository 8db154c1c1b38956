//! Main application state and event handling.

use std::sync::Arc;

use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use crate::config::DisplayConfig;
use crate::display::{DisplayError, DisplaySurface};
use crate::session::{Command, Flow, SessionController};

/// Errors that end the console.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("event loop error: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),
    #[error("window creation failed: {0}")]
    Window(#[from] winit::error::OsError),
    #[error("display error: {0}")]
    Display(#[from] DisplayError),
}

/// Key binding for the console. Unbound keys map to `None`.
pub fn command_for_key(key: KeyCode) -> Option<Command> {
    match key {
        KeyCode::Escape | KeyCode::KeyQ => Some(Command::Quit),
        KeyCode::Space => Some(Command::Capture),
        KeyCode::KeyC => Some(Command::ToggleCalibration),
        KeyCode::Enter | KeyCode::NumpadEnter => Some(Command::CommitCalibration),
        KeyCode::KeyA => Some(Command::ToggleMarkers),
        KeyCode::KeyM => Some(Command::CycleLayout),
        KeyCode::KeyF => Some(Command::ToggleFps),
        KeyCode::KeyI => Some(Command::ToggleSystemInfo),
        _ => None,
    }
}

/// Window shell around a [`SessionController`].
pub struct ConsoleApp {
    display_config: DisplayConfig,
    session: SessionController,
    window: Option<Arc<Window>>,
    display: Option<DisplaySurface>,
    /// First fatal error, reported after the event loop returns.
    failure: Option<AppError>,
}

impl ConsoleApp {
    pub fn new(display_config: DisplayConfig, session: SessionController) -> Self {
        Self {
            display_config,
            session,
            window: None,
            display: None,
            failure: None,
        }
    }

    /// Open the window and run until the operator quits.
    pub fn run(mut self) -> Result<(), AppError> {
        let event_loop = EventLoop::new()?;
        event_loop.run_app(&mut self)?;
        self.session.shutdown();
        match self.failure.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: AppError) {
        log::error!("{}", error);
        if self.failure.is_none() {
            self.failure = Some(error);
        }
        event_loop.exit();
    }

    fn open_window(&mut self, event_loop: &ActiveEventLoop) -> Result<(), AppError> {
        let attrs = Window::default_attributes()
            .with_title(self.display_config.window_title.clone())
            .with_inner_size(PhysicalSize::new(
                self.display_config.window_width,
                self.display_config.window_height,
            ));
        let window = Arc::new(event_loop.create_window(attrs)?);
        self.display = Some(DisplaySurface::new(window.clone())?);
        self.window = Some(window);
        log::info!(
            "Keys: SPACE capture, C calibrate, ENTER finish, A markers, M layout, F fps, I system info, Q quit"
        );
        Ok(())
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, key: KeyEvent) {
        if key.state != ElementState::Pressed || key.repeat {
            return;
        }
        let PhysicalKey::Code(code) = key.physical_key else {
            return;
        };
        let Some(command) = command_for_key(code) else {
            return;
        };
        if self.session.dispatch(command) == Flow::Quit {
            log::info!("Quit requested");
            event_loop.exit();
        }
    }

    fn render_frame(&mut self, event_loop: &ActiveEventLoop) {
        let frame = match self.session.process_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("Frame processing failed: {}", e);
                return;
            }
        };

        let (Some(window), Some(display)) = (&self.window, &mut self.display) else {
            return;
        };
        if let Err(e) = display.present(window, &frame) {
            self.fail(event_loop, e.into());
        }
    }
}

impl ApplicationHandler for ConsoleApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.open_window(event_loop) {
                self.fail(event_loop, e);
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        if let (Some(window), Some(display)) = (&self.window, &mut self.display) {
            if display.handle_event(window, &event) {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                if let Some(display) = &mut self.display {
                    display.resize(size.width, size.height);
                }
            }
            WindowEvent::KeyboardInput { event, .. } => self.handle_key(event_loop, event),
            WindowEvent::RedrawRequested => {
                self.render_frame(event_loop);
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.session.shutdown();
    }
}
