use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use tracing::warn;

use crate::graph::{SerializedGraph, SerializedLink, SerializedNode, round_to, serialize_graph};
use crate::host::{Host, LiveModifier, LiveObject, NODE_GRAPH_MODIFIER};

pub const NO_ACTIVE_OBJECT: &str = "No active object selected. Please select an object.";
pub const NO_GRAPH_MODIFIER: &str = "Active object has no node-graph modifier. Please create one.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModifierSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub modifier_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InspectReport {
    pub active_object: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    pub location: Option<[f64; 3]>,
    pub rotation: Option<[f64; 3]>,
    pub scale: Option<[f64; 3]>,
    pub dimensions: Option<[f64; 3]>,
    pub modifiers: Vec<ModifierSummary>,
    pub node_tree: Option<SerializedGraph>,
    pub nodes: Vec<SerializedNode>,
    pub links: Vec<SerializedLink>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn round3(v: [f64; 3]) -> [f64; 3] {
    v.map(|x| round_to(x, 3))
}

fn is_graph_modifier(modifier: &dyn LiveModifier) -> bool {
    modifier.node_group().is_some()
        && modifier
            .modifier_type()
            .map(|kind| kind == NODE_GRAPH_MODIFIER)
            .unwrap_or(false)
}

/// Describes the active object and snapshots the graph of its node-graph
/// modifier. Problems are reported in `error`; this never fails outright.
pub fn inspect_active<H: Host>(host: &H) -> InspectReport {
    let mut report = InspectReport::default();
    let Some(object) = host.active_object() else {
        report.error = Some(NO_ACTIVE_OBJECT.to_string());
        return report;
    };
    let object: &dyn LiveObject = object.as_ref();

    report.active_object = Some(object.name().unwrap_or_default());
    report.object_type = object.object_type().ok();
    if let Ok(t) = object.transform() {
        report.location = Some(round3(t.location));
        report.rotation = Some(round3(t.rotation));
        report.scale = Some(round3(t.scale));
        report.dimensions = Some(round3(t.dimensions));
    }

    let modifiers = object.modifiers();
    let mut chosen: Option<&dyn LiveModifier> = None;
    for modifier in &modifiers {
        let modifier = modifier.as_ref();
        report.modifiers.push(ModifierSummary {
            name: modifier.name().unwrap_or_default(),
            modifier_type: modifier.modifier_type().unwrap_or_default(),
        });
        let already_active = chosen.is_some_and(|m| m.is_active());
        if is_graph_modifier(modifier) && !already_active {
            chosen = Some(modifier);
        }
    }

    let Some(modifier) = chosen else {
        report.error = Some(NO_GRAPH_MODIFIER.to_string());
        return report;
    };
    match serialize_graph(modifier.node_group()) {
        Ok(Some(graph)) => {
            report.nodes = graph.nodes.clone();
            report.links = graph.links.clone();
            report.node_tree = Some(graph);
        }
        Ok(None) => {}
        Err(err) => {
            warn!("inspection of {:?} failed: {err}", report.active_object);
            report.error = Some(format!("Inspection failed: {err}"));
        }
    }
    report
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScreenshotReport {
    pub success: bool,
    pub image: Option<String>,
    pub mime_type: Option<String>,
}

impl ScreenshotReport {
    pub fn empty() -> Self {
        Self {
            success: false,
            image: None,
            mime_type: None,
        }
    }
}

/// Captures the viewport and base64-encodes it for the wire.
pub fn capture_screenshot<H: Host>(host: &mut H) -> ScreenshotReport {
    match host.capture_viewport() {
        Ok(Some(shot)) if !shot.bytes.is_empty() => ScreenshotReport {
            success: true,
            image: Some(STANDARD.encode(&shot.bytes)),
            mime_type: Some(shot.mime_type),
        },
        Ok(_) => ScreenshotReport::empty(),
        Err(err) => {
            warn!("viewport capture failed: {err}");
            ScreenshotReport::empty()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::SceneHost;

    fn run(host: &mut SceneHost, code: &str) {
        let outcome = crate::exec::execute(host, code);
        assert!(outcome.success, "{}", outcome.stderr);
    }

    #[test]
    fn reports_missing_active_object() {
        let host = SceneHost::new();
        let report = inspect_active(&host);
        assert_eq!(report.active_object, None);
        assert_eq!(report.error.as_deref(), Some(NO_ACTIVE_OBJECT));
        let wire = serde_json::to_value(&report).unwrap();
        assert!(wire.get("type").is_none());
        assert!(wire["node_tree"].is_null());
    }

    #[test]
    fn reports_missing_graph_modifier() {
        let mut host = SceneHost::new();
        run(&mut host, "add_object Cube MESH\nmodifier Cube Bevel BEVEL\nmove Cube 1.23456 0 -2");
        let report = inspect_active(&host);
        assert_eq!(report.active_object.as_deref(), Some("Cube"));
        assert_eq!(report.object_type.as_deref(), Some("MESH"));
        assert_eq!(report.location, Some([1.235, 0.0, -2.0]));
        assert_eq!(report.modifiers.len(), 1);
        assert_eq!(report.error.as_deref(), Some(NO_GRAPH_MODIFIER));
    }

    #[test]
    fn snapshots_the_active_graph_modifier() {
        let mut host = SceneHost::new();
        run(
            &mut host,
            "add_object Cube MESH\n\
             modifier Cube First NODES\n\
             modifier Cube Second NODES\n\
             activate_modifier Cube Second\n\
             modifier Cube Wire WIREFRAME\n\
             node Cube Second Grid GeometryNodeMeshGrid 0 0\n\
             node Cube Second Out NodeGroupOutput 300 0\n\
             link Cube Second Grid Mesh Out Geometry",
        );
        let report = inspect_active(&host);
        assert_eq!(report.error, None);
        assert_eq!(report.modifiers.len(), 3);
        let tree = report.node_tree.as_ref().unwrap();
        assert_eq!(tree.name, "Second");
        assert_eq!(report.nodes.len(), 2);
        assert_eq!(report.links.len(), 1);
        assert!(report.nodes[1].inputs["Geometry"].is_linked);
    }

    #[test]
    fn falls_back_to_last_graph_modifier_when_none_active() {
        let mut host = SceneHost::new();
        run(
            &mut host,
            "add_object Cube MESH\nmodifier Cube First NODES\nmodifier Cube Second NODES",
        );
        let report = inspect_active(&host);
        assert_eq!(report.node_tree.unwrap().name, "Second");
    }

    #[test]
    fn screenshot_is_base64_encoded() {
        let mut host = SceneHost::new();
        run(&mut host, "add_object Cube MESH");
        let shot = capture_screenshot(&mut host);
        assert!(shot.success);
        let bytes = STANDARD.decode(shot.image.unwrap()).unwrap();
        assert!(String::from_utf8(bytes).unwrap().starts_with("<svg"));
        assert_eq!(shot.mime_type.as_deref(), Some("image/svg+xml"));
    }

    #[test]
    fn screenshot_without_viewport_is_empty() {
        let mut host = SceneHost::new();
        host.set_viewports(0);
        assert_eq!(capture_screenshot(&mut host), ScreenshotReport::empty());
    }
}
