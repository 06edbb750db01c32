/// Terminal client for CADview sessions
use cadview_core::NodeId;
use cadview_session::{
    ChannelTransport, ClientInput, FrameHandle, SessionController, SessionError, SessionEvent,
    ViewerConfig,
};
use crossterm::{
    cursor,
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, MouseButton,
        MouseEvent, MouseEventKind,
    },
    execute, queue,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{self, ClearType},
};
use std::io::{self, stdout, Write};
use std::path::Path;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

pub mod renderer;

/// Radians per orbit key press.
const ORBIT_STEP: f32 = 0.1;
/// Fraction of the eye distance per pan key press.
const PAN_STEP: f32 = 0.05;
const ZOOM_STEP: f32 = 1.1;

/// What a key or mouse event asks for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    Input(ClientInput),
    Quit,
    /// Outline the next loaded node.
    CycleNode,
    ToggleWireframe,
    ToggleVisible,
    RemoveNode,
    ClearAll,
}

pub fn key_action(code: KeyCode) -> Option<Action> {
    let input = |i| Some(Action::Input(i));
    match code {
        KeyCode::Char('q') | KeyCode::Esc => Some(Action::Quit),
        KeyCode::Char('w') | KeyCode::Up => input(ClientInput::Orbit { yaw: 0.0, pitch: ORBIT_STEP }),
        KeyCode::Char('s') | KeyCode::Down => input(ClientInput::Orbit { yaw: 0.0, pitch: -ORBIT_STEP }),
        KeyCode::Char('a') | KeyCode::Left => input(ClientInput::Orbit { yaw: -ORBIT_STEP, pitch: 0.0 }),
        KeyCode::Char('d') | KeyCode::Right => input(ClientInput::Orbit { yaw: ORBIT_STEP, pitch: 0.0 }),
        KeyCode::Char('i') => input(ClientInput::Pan { dx: 0.0, dy: PAN_STEP }),
        KeyCode::Char('k') => input(ClientInput::Pan { dx: 0.0, dy: -PAN_STEP }),
        KeyCode::Char('j') => input(ClientInput::Pan { dx: -PAN_STEP, dy: 0.0 }),
        KeyCode::Char('l') => input(ClientInput::Pan { dx: PAN_STEP, dy: 0.0 }),
        KeyCode::Char('+') | KeyCode::Char('=') => input(ClientInput::Zoom { factor: ZOOM_STEP }),
        KeyCode::Char('-') => input(ClientInput::Zoom { factor: 1.0 / ZOOM_STEP }),
        KeyCode::Char('f') => input(ClientInput::ResetView),
        KeyCode::Char('c') => input(ClientInput::ClearSelection),
        KeyCode::Tab => Some(Action::CycleNode),
        KeyCode::Char('t') => Some(Action::ToggleWireframe),
        KeyCode::Char('v') => Some(Action::ToggleVisible),
        KeyCode::Char('x') => Some(Action::RemoveNode),
        KeyCode::Char('X') => Some(Action::ClearAll),
        _ => None,
    }
}

/// Left click picks, right click clears, the wheel zooms. `top` is the
/// first terminal row showing the frame.
pub fn mouse_action(mouse: &MouseEvent, top: u16) -> Option<Action> {
    let input = |i| Some(Action::Input(i));
    match mouse.kind {
        MouseEventKind::Down(MouseButton::Left) if mouse.row >= top => input(ClientInput::Pick {
            x: mouse.column as f32,
            y: (mouse.row - top) as f32,
        }),
        MouseEventKind::Down(MouseButton::Right) => input(ClientInput::ClearSelection),
        MouseEventKind::ScrollUp => input(ClientInput::Zoom { factor: ZOOM_STEP }),
        MouseEventKind::ScrollDown => input(ClientInput::Zoom { factor: 1.0 / ZOOM_STEP }),
        _ => None,
    }
}

/// Main application struct for the terminal viewer
pub struct TerminalApp {
    session: SessionController,
    frames: Receiver<FrameHandle>,
    events: Receiver<SessionEvent>,
    frame: Option<FrameHandle>,
    /// Node whose edges are outlined; also the target of node actions.
    focused: Option<NodeId>,
    status: String,
    running: bool,
    last_frame: Instant,
    frame_count: u32,
    fps: f32,
}

impl TerminalApp {
    /// Size the session to the terminal, leaving the top row for the overlay.
    pub fn new(mut config: ViewerConfig) -> io::Result<Self> {
        let (width, height) = terminal::size()?;
        config.render.width = width.max(1) as u32;
        config.render.height = height.saturating_sub(1).max(1) as u32;
        Ok(Self::with_config(config))
    }

    pub fn with_config(config: ViewerConfig) -> Self {
        let (transport, frames) = ChannelTransport::new();
        let session = SessionController::builder(config).build(Box::new(transport));
        let events = session.subscribe();
        Self {
            session,
            frames,
            events,
            frame: None,
            focused: None,
            status: String::new(),
            running: true,
            last_frame: Instant::now(),
            frame_count: 0,
            fps: 0.0,
        }
    }

    pub fn session(&self) -> &SessionController {
        &self.session
    }

    /// Read and upload one file.
    pub fn load_file(&mut self, path: &Path) -> io::Result<Result<NodeId, SessionError>> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let result = self.session.upload(&name, bytes);
        match &result {
            Ok(id) => log::info!("{} loaded as node {}", path.display(), id),
            Err(err) => log::warn!("{} could not be loaded: {}", path.display(), err),
        }
        self.drain_events();
        Ok(result)
    }

    pub fn run(&mut self) -> io::Result<()> {
        terminal::enable_raw_mode()?;
        execute!(stdout(), terminal::EnterAlternateScreen, EnableMouseCapture, cursor::Hide)?;

        let result = self.main_loop();

        // Cleanup
        terminal::disable_raw_mode()?;
        execute!(stdout(), DisableMouseCapture, terminal::LeaveAlternateScreen, cursor::Show)?;

        result
    }

    fn main_loop(&mut self) -> io::Result<()> {
        let target_frame_time = Duration::from_millis(1000 / 30); // 30 FPS target

        while self.running {
            let frame_start = Instant::now();

            // Everything queued before this tick becomes one input batch.
            while event::poll(Duration::from_millis(0))? {
                self.handle_event(event::read()?);
            }

            if let Err(err) = self.session.pump() {
                log::warn!("frame update failed: {}", err);
                self.status = err.to_string();
            }
            self.drain_events();

            let mut redraw = false;
            while let Ok(frame) = self.frames.try_recv() {
                self.session.acknowledge(frame.sequence);
                self.frame = Some(frame);
                redraw = true;
            }
            if redraw {
                self.frame_count += 1;
            }
            self.draw(redraw)?;

            let elapsed = frame_start.elapsed();
            if elapsed < target_frame_time {
                std::thread::sleep(target_frame_time - elapsed);
            }

            // Update FPS counter
            let now = Instant::now();
            if (now - self.last_frame).as_secs() >= 1 {
                self.fps = self.frame_count as f32 / (now - self.last_frame).as_secs_f32();
                self.frame_count = 0;
                self.last_frame = now;
            }
        }

        Ok(())
    }

    fn handle_event(&mut self, event: Event) {
        let action = match event {
            Event::Key(KeyEvent { code, .. }) => key_action(code),
            Event::Mouse(mouse) => mouse_action(&mouse, 1),
            Event::Resize(width, height) => Some(Action::Input(ClientInput::Resize {
                width: width as u32,
                height: height.saturating_sub(1) as u32,
            })),
            _ => None,
        };
        if let Some(action) = action {
            self.apply(action);
        }
    }

    pub fn apply(&mut self, action: Action) {
        let result = match action {
            Action::Quit => {
                self.running = false;
                Ok(())
            }
            Action::Input(input) => self.session.handle_input(input),
            Action::CycleNode => {
                self.focused = next_node(&self.session, self.focused);
                self.session.select_node(self.focused)
            }
            Action::ToggleWireframe => match self.focused {
                Some(id) => self.session.toggle_wireframe(id).map(|_| ()),
                None => Ok(()),
            },
            Action::ToggleVisible => match self.focused {
                Some(id) => {
                    let visible = self
                        .session
                        .loaded_files()
                        .iter()
                        .any(|n| n.id == id && n.visible);
                    self.session.set_visible(id, !visible)
                }
                None => Ok(()),
            },
            Action::RemoveNode => match self.focused.take() {
                Some(id) => self.session.remove_node(id).map(|_| ()),
                None => Ok(()),
            },
            Action::ClearAll => {
                self.focused = None;
                self.session.clear_all().map(|_| ())
            }
        };
        if let Err(err) = result {
            log::warn!("terminal action failed: {}", err);
            self.status = err.to_string();
        }
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                SessionEvent::LoadSucceeded {
                    filename, triangles, ..
                } => self.status = format!("loaded {} ({} triangles)", filename, triangles),
                SessionEvent::LoadFailed {
                    filename, message, ..
                } => self.status = format!("{}: {}", filename, message),
                SessionEvent::SelectionChanged { hit: Some(hit) } => {
                    self.status = format!("picked triangle {} of node {}", hit.triangle, hit.node)
                }
                SessionEvent::SelectionChanged { hit: None } => self.status.clear(),
                SessionEvent::Error { message, .. } => self.status = message,
                _ => {}
            }
        }
    }

    fn draw(&self, redraw: bool) -> io::Result<()> {
        let mut stdout = stdout();
        if redraw {
            if let Some(frame) = &self.frame {
                renderer::draw(frame, 1, &mut stdout)?;
            }
        }

        // Draw UI overlay
        let focus = self
            .focused
            .map_or_else(|| "-".to_string(), |id| id.to_string());
        queue!(
            stdout,
            cursor::MoveTo(0, 0),
            terminal::Clear(ClearType::CurrentLine),
            SetForegroundColor(Color::Yellow),
            Print(format!(
                "CADview | FPS: {:.1} | node {} | WASD=Orbit IJKL=Pan +/-=Zoom F=Fit Tab=Node T=Wire V=Hide X=Remove Q=Quit | {}",
                self.fps, focus, self.status
            )),
            ResetColor
        )?;

        stdout.flush()?;
        Ok(())
    }
}

/// The loaded node after `current`, wrapping around; `None` when empty.
fn next_node(session: &SessionController, current: Option<NodeId>) -> Option<NodeId> {
    let ids: Vec<NodeId> = session.loaded_files().iter().map(|n| n.id).collect();
    let next = current.and_then(|id| ids.iter().find(|other| **other > id).copied());
    next.or_else(|| ids.first().copied())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadview_core::{stl, Mesh};
    use crossterm::event::KeyModifiers;
    use std::sync::Mutex;

    /// Keeps every warning logged by the tests in this module.
    struct WarningLog(Mutex<Vec<String>>);

    impl log::Log for WarningLog {
        fn enabled(&self, metadata: &log::Metadata) -> bool {
            metadata.level() <= log::Level::Warn
        }

        fn log(&self, record: &log::Record) {
            if self.enabled(record.metadata()) {
                if let Ok(mut lines) = self.0.lock() {
                    lines.push(record.args().to_string());
                }
            }
        }

        fn flush(&self) {}
    }

    static WARNINGS: WarningLog = WarningLog(Mutex::new(Vec::new()));

    fn logged_warning(needle: &str) -> bool {
        let _ = log::set_logger(&WARNINGS);
        log::set_max_level(log::LevelFilter::Warn);
        WARNINGS.0.lock().unwrap().iter().any(|line| line.contains(needle))
    }

    fn app_with_cubes(count: usize) -> TerminalApp {
        let mut config = ViewerConfig::default();
        config.render.width = 40;
        config.render.height = 12;
        let app = TerminalApp::with_config(config);
        for i in 0..count {
            app.session
                .upload(&format!("cube{}.stl", i), stl::to_binary(&Mesh::cube(1.0), "cube"))
                .unwrap();
        }
        app
    }

    #[test]
    fn test_key_mapping() {
        assert_eq!(key_action(KeyCode::Char('q')), Some(Action::Quit));
        assert_eq!(
            key_action(KeyCode::Left),
            Some(Action::Input(ClientInput::Orbit { yaw: -ORBIT_STEP, pitch: 0.0 }))
        );
        assert_eq!(key_action(KeyCode::Char('f')), Some(Action::Input(ClientInput::ResetView)));
        assert_eq!(key_action(KeyCode::Char('z')), None);
    }

    #[test]
    fn test_mouse_mapping() {
        let click = MouseEvent {
            kind: MouseEventKind::Down(MouseButton::Left),
            column: 10,
            row: 5,
            modifiers: KeyModifiers::NONE,
        };
        assert_eq!(
            mouse_action(&click, 1),
            Some(Action::Input(ClientInput::Pick { x: 10.0, y: 4.0 }))
        );
        let overlay = MouseEvent { row: 0, ..click };
        assert_eq!(mouse_action(&overlay, 1), None);
    }

    #[test]
    fn test_cycle_wraps() {
        let mut app = app_with_cubes(2);
        let ids: Vec<NodeId> = app.session.loaded_files().iter().map(|n| n.id).collect();
        app.apply(Action::CycleNode);
        assert_eq!(app.focused, Some(ids[0]));
        app.apply(Action::CycleNode);
        assert_eq!(app.focused, Some(ids[1]));
        app.apply(Action::CycleNode);
        assert_eq!(app.focused, Some(ids[0]));
    }

    #[test]
    fn test_node_actions() {
        let mut app = app_with_cubes(1);
        app.apply(Action::CycleNode);
        app.apply(Action::ToggleVisible);
        assert!(!app.session.loaded_files()[0].visible);
        app.apply(Action::RemoveNode);
        assert!(app.session.loaded_files().is_empty());
        assert_eq!(app.focused, None);
        app.apply(Action::Quit);
        assert!(!app.running);
    }

    #[test]
    fn test_failed_action_is_logged() {
        let _ = log::set_logger(&WARNINGS);
        log::set_max_level(log::LevelFilter::Warn);
        let mut app = app_with_cubes(1);
        app.session.close();

        app.apply(Action::Input(ClientInput::ResetView));
        assert_eq!(app.status, SessionError::Closed.to_string());
        assert!(logged_warning("terminal action failed"));
    }

    #[test]
    fn test_load_failure_reaches_status() {
        let mut app = app_with_cubes(0);
        let dir = std::env::temp_dir().join(format!("cadview-status-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("notes.txt");
        std::fs::write(&path, b"hello").unwrap();

        let result = app.load_file(&path).unwrap();
        assert!(result.is_err());
        assert!(app.status.starts_with("notes.txt:"));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
