/// CADview Web - WASM facade for browser clients
///
/// The browser uploads files, forwards input events as JSON and pulls
/// frames and session events as JSON messages. [`Viewer`] holds the logic
/// with plain Rust types; [`WebViewer`] is its `wasm_bindgen` skin.

use std::sync::mpsc::Receiver;

use cadview_core::{Color, NodeId};
use cadview_session::{
    ChannelTransport, ClientInput, FrameHandle, FrameMessage, NodeSummary, ServerMessage,
    SessionController, SessionError, SessionEvent, ViewerConfig,
};
use wasm_bindgen::prelude::*;

/// Session plus the receiving ends of its frame and event channels.
pub struct Viewer {
    session: SessionController,
    frames: Receiver<FrameHandle>,
    events: Receiver<SessionEvent>,
}

impl Viewer {
    pub fn new(config: ViewerConfig) -> Self {
        let (transport, frames) = ChannelTransport::new();
        let session = SessionController::builder(config).build(Box::new(transport));
        let events = session.subscribe();
        Self {
            session,
            frames,
            events,
        }
    }

    pub fn session(&self) -> &SessionController {
        &self.session
    }

    pub fn upload(&self, filename: &str, bytes: Vec<u8>) -> Result<NodeId, SessionError> {
        self.session.upload(filename, bytes)
    }

    /// Queue one JSON-encoded [`ClientInput`].
    pub fn input_json(&self, json: &str) -> Result<(), String> {
        let input = ClientInput::from_json(json).map_err(|e| format!("bad input event: {}", e))?;
        self.session.handle_input(input).map_err(|e| e.to_string())
    }

    /// Apply queued input, then collect everything waiting for the client:
    /// events first, then frames in sequence order.
    pub fn pump(&self) -> Result<Vec<ServerMessage>, SessionError> {
        self.session.pump()?;
        let mut messages: Vec<ServerMessage> = self
            .events
            .try_iter()
            .map(|event| ServerMessage::Event { event })
            .collect();
        messages.extend(
            self.frames
                .try_iter()
                .map(|frame| ServerMessage::Frame(FrameMessage::from(frame.as_ref()))),
        );
        Ok(messages)
    }

    pub fn acknowledge(&self, sequence: u64) -> bool {
        self.session.acknowledge(sequence)
    }

    pub fn files(&self) -> Vec<NodeSummary> {
        self.session.loaded_files()
    }
}

#[wasm_bindgen]
pub struct WebViewer {
    inner: Viewer,
}

#[wasm_bindgen]
impl WebViewer {
    #[wasm_bindgen(constructor)]
    pub fn new(width: u32, height: u32) -> Result<WebViewer, JsValue> {
        let mut config = ViewerConfig::default();
        config.render.width = width;
        config.render.height = height;
        // Browser cells are drawn square.
        config.render.pixel_aspect = 1.0;
        config.validate().map_err(to_js)?;
        Ok(WebViewer {
            inner: Viewer::new(config),
        })
    }

    /// Build from a TOML config document.
    #[wasm_bindgen(js_name = fromToml)]
    pub fn from_toml(text: &str) -> Result<WebViewer, JsValue> {
        let config = ViewerConfig::from_toml_str(text).map_err(to_js)?;
        Ok(WebViewer {
            inner: Viewer::new(config),
        })
    }

    /// Upload a file; resolves to the new node id.
    pub fn upload(&self, filename: &str, bytes: Vec<u8>) -> Result<f64, JsValue> {
        self.inner
            .upload(filename, bytes)
            .map(|id| id.0 as f64)
            .map_err(to_js)
    }

    pub fn input(&self, json: &str) -> Result<(), JsValue> {
        self.inner.input_json(json).map_err(|e| JsValue::from_str(&e))
    }

    /// JSON array of pending server messages.
    pub fn pump(&self) -> Result<String, JsValue> {
        let messages = self.inner.pump().map_err(to_js)?;
        serde_json::to_string(&messages).map_err(to_js)
    }

    pub fn acknowledge(&self, sequence: f64) -> bool {
        self.inner.acknowledge(sequence as u64)
    }

    pub fn files(&self) -> Result<String, JsValue> {
        serde_json::to_string(&self.inner.files()).map_err(to_js)
    }

    #[wasm_bindgen(js_name = removeNode)]
    pub fn remove_node(&self, id: f64) -> Result<bool, JsValue> {
        self.inner.session().remove_node(node(id)).map_err(to_js)
    }

    #[wasm_bindgen(js_name = setVisible)]
    pub fn set_visible(&self, id: f64, visible: bool) -> Result<(), JsValue> {
        self.inner.session().set_visible(node(id), visible).map_err(to_js)
    }

    #[wasm_bindgen(js_name = setColor)]
    pub fn set_color(&self, id: f64, r: f32, g: f32, b: f32) -> Result<(), JsValue> {
        self.inner
            .session()
            .set_color(node(id), Color::new(r, g, b))
            .map_err(to_js)
    }

    /// Returns true when the node is now drawn as a wireframe.
    #[wasm_bindgen(js_name = toggleWireframe)]
    pub fn toggle_wireframe(&self, id: f64) -> Result<bool, JsValue> {
        self.inner
            .session()
            .toggle_wireframe(node(id))
            .map(|rep| rep == cadview_core::Representation::Wireframe)
            .map_err(to_js)
    }

    /// Outline a node's edges; a negative id clears the outline.
    #[wasm_bindgen(js_name = selectNode)]
    pub fn select_node(&self, id: f64) -> Result<(), JsValue> {
        let target = (id >= 0.0).then(|| node(id));
        self.inner.session().select_node(target).map_err(to_js)
    }

    #[wasm_bindgen(js_name = clearAll)]
    pub fn clear_all(&self) -> Result<u32, JsValue> {
        self.inner
            .session()
            .clear_all()
            .map(|n| n as u32)
            .map_err(to_js)
    }

    #[wasm_bindgen(js_name = resetView)]
    pub fn reset_view(&self) -> Result<(), JsValue> {
        self.inner.session().reset_view().map_err(to_js)
    }

    pub fn close(&self) {
        self.inner.session().close();
    }
}

fn node(id: f64) -> NodeId {
    NodeId(id as u64)
}

fn to_js(err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&err.to_string())
}

/// Forwards `log` records to the browser console.
struct ConsoleLogger;

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = JsValue::from_str(&format!("[{}] {}", record.target(), record.args()));
        match record.level() {
            log::Level::Error => web_sys::console::error_1(&line),
            log::Level::Warn => web_sys::console::warn_1(&line),
            _ => web_sys::console::log_1(&line),
        }
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;

#[wasm_bindgen(start)]
pub fn main() -> Result<(), JsValue> {
    // Already set when the module is instantiated twice.
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(log::LevelFilter::Info);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadview_core::{stl, Mesh};

    fn viewer() -> Viewer {
        let mut config = ViewerConfig::default();
        config.render.width = 32;
        config.render.height = 16;
        Viewer::new(config)
    }

    #[test]
    fn test_upload_then_pump_yields_events_and_frame() {
        let viewer = viewer();
        let id = viewer
            .upload("cube.stl", stl::to_binary(&Mesh::cube(1.0), "cube"))
            .unwrap();

        let messages = viewer.pump().unwrap();
        let json = serde_json::to_value(&messages).unwrap();
        let kinds: Vec<&str> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["type"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, vec!["event", "event", "event", "frame"]);
        assert_eq!(json[1]["event"]["node"], id.0);
        assert_eq!(json[3]["rows"].as_array().unwrap().len(), 16);
    }

    #[test]
    fn test_input_json() {
        let viewer = viewer();
        viewer.pump().unwrap();
        assert!(viewer.acknowledge(1));
        assert!(viewer.input_json(r#"{"type":"zoom","factor":1.5}"#).is_ok());
        assert!(viewer.input_json(r#"{"type":"teleport"}"#).is_err());

        let messages = viewer.pump().unwrap();
        assert!(messages
            .iter()
            .any(|m| matches!(m, ServerMessage::Frame(f) if f.sequence == 2)));
    }

    #[test]
    fn test_files_listing() {
        let viewer = viewer();
        viewer
            .upload("a.stl", stl::to_binary(&Mesh::cube(1.0), "a"))
            .unwrap();
        let files = viewer.files();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].label, "a.stl");
        assert_eq!(files[0].triangles, 12);
    }
}
