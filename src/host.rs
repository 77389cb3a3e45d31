//! The surface a host application exposes to the bridge.
//!
//! Everything here is only ever called from the host thread, inside a drained
//! task. Implementations are free to be `!Send`.

use crate::error::ReadError;
use crate::graph::LiveGraph;

/// Modifier type that carries a node graph.
pub const NODE_GRAPH_MODIFIER: &str = "NODES";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub location: [f64; 3],
    pub rotation: [f64; 3],
    pub scale: [f64; 3],
    pub dimensions: [f64; 3],
}

pub trait LiveModifier {
    fn name(&self) -> Result<String, ReadError>;
    fn modifier_type(&self) -> Result<String, ReadError>;
    fn is_active(&self) -> bool;
    fn node_group(&self) -> Option<&dyn LiveGraph>;
}

pub trait LiveObject {
    fn name(&self) -> Result<String, ReadError>;
    fn object_type(&self) -> Result<String, ReadError>;
    fn transform(&self) -> Result<Transform, ReadError>;
    fn modifiers(&self) -> Vec<Box<dyn LiveModifier + '_>>;
}

/// Output streams of one script run. Each run gets a fresh capture, so text
/// from one request never shows up in another.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScriptOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ScriptOutput {
    pub fn println(&mut self, line: &str) {
        self.stdout.push_str(line);
        self.stdout.push('\n');
    }

    pub fn eprintln(&mut self, line: &str) {
        self.stderr.push_str(line);
        self.stderr.push('\n');
    }
}

/// An encoded image of the host's viewport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewshot {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

pub trait Host: 'static {
    fn active_object(&self) -> Option<Box<dyn LiveObject + '_>>;

    /// Runs submitted code against the host's own bindings. All printed text
    /// must go to `output`, never to the process's stdio.
    fn run_script(&mut self, code: &str, output: &mut ScriptOutput) -> Result<(), String>;

    /// Asks every live viewport to repaint. Returns how many were tagged.
    fn redraw_viewports(&mut self) -> Result<usize, String>;

    /// `Ok(None)` when there is no viewport to capture.
    fn capture_viewport(&mut self) -> Result<Option<Viewshot>, String>;
}
