//! In-memory reference host.
//!
//! `SceneHost` is a tiny scene graph (objects, modifiers, node groups) with a
//! line-oriented command language as its script binding. The `serve` binary
//! runs on it, and the tests drive the full request path through it.

use std::fmt::Write as _;

use crate::error::ReadError;
use crate::graph::{HostValue, LiveGraph, LiveLink, LiveNode, LiveSocket};
use crate::host::{
    Host, LiveModifier, LiveObject, NODE_GRAPH_MODIFIER, ScriptOutput, Transform, Viewshot,
};

const DEFAULT_NODE_WIDTH: f64 = 140.0;

// ── Scene model ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Socket {
    pub identifier: String,
    pub name: String,
    pub kind: String,
    pub default: Option<HostValue>,
}

impl Socket {
    fn new(name: &str, kind: &str, default: Option<HostValue>) -> Self {
        Self {
            identifier: name.to_string(),
            name: name.to_string(),
            kind: kind.to_string(),
            default,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub kind: String,
    pub label: String,
    pub location: (f64, f64),
    pub width: f64,
    pub mute: bool,
    pub inputs: Vec<Socket>,
    pub outputs: Vec<Socket>,
}

/// Links refer to nodes by name, so removing a node leaves its links dangling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub from_node: String,
    pub from_socket: String,
    pub to_node: String,
    pub to_socket: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeGroup {
    pub name: String,
    pub nodes: Vec<Node>,
    pub links: Vec<Link>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Modifier {
    pub name: String,
    pub kind: String,
    pub active: bool,
    pub group: Option<NodeGroup>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject {
    pub name: String,
    pub kind: String,
    pub location: [f64; 3],
    pub rotation: [f64; 3],
    pub scale: [f64; 3],
    pub modifiers: Vec<Modifier>,
}

pub struct SceneHost {
    objects: Vec<SceneObject>,
    active: Option<String>,
    viewports: usize,
    redraws: u64,
}

fn sockets_for(kind: &str) -> (Vec<Socket>, Vec<Socket>) {
    let geometry = || Socket::new("Geometry", "GEOMETRY", None);
    match kind {
        "NodeGroupInput" => (vec![], vec![geometry()]),
        "NodeGroupOutput" => (vec![geometry()], vec![]),
        "GeometryNodeMeshGrid" => (
            vec![
                Socket::new("Size X", "VALUE", Some(HostValue::Float(1.0))),
                Socket::new("Size Y", "VALUE", Some(HostValue::Float(1.0))),
                Socket::new("Vertices X", "INT", Some(HostValue::Int(3))),
                Socket::new("Vertices Y", "INT", Some(HostValue::Int(3))),
            ],
            vec![Socket::new("Mesh", "GEOMETRY", None)],
        ),
        "GeometryNodeTransform" => (
            vec![
                geometry(),
                Socket::new("Translation", "VECTOR", Some(HostValue::Tuple(vec![0.0; 3]))),
                Socket::new("Rotation", "ROTATION", Some(HostValue::Tuple(vec![0.0; 3]))),
                Socket::new("Scale", "VECTOR", Some(HostValue::Tuple(vec![1.0; 3]))),
            ],
            vec![geometry()],
        ),
        "GeometryNodeSetMaterial" => (
            vec![
                geometry(),
                Socket::new("Selection", "BOOLEAN", Some(HostValue::Bool(true))),
                Socket::new("Material", "MATERIAL", Some(HostValue::Opaque("<Material None>".into()))),
            ],
            vec![geometry()],
        ),
        _ => (vec![geometry()], vec![geometry()]),
    }
}

fn parse_value(args: &[String]) -> HostValue {
    let numbers: Option<Vec<f64>> = args.iter().map(|a| a.parse::<f64>().ok()).collect();
    match (args, numbers) {
        ([single], _) if single.parse::<i64>().is_ok() => {
            HostValue::Int(single.parse::<i64>().unwrap_or_default())
        }
        ([_], Some(n)) => HostValue::Float(n[0]),
        ([single], None) if single == "true" || single == "false" => HostValue::Bool(single == "true"),
        (_, Some(n)) if n.len() > 1 => HostValue::Tuple(n),
        _ => HostValue::Text(args.join(" ")),
    }
}

fn parse_vec3(args: &[String]) -> Result<[f64; 3], String> {
    let [x, y, z] = args else {
        return Err(format!("expected 3 numbers, got {}", args.len()));
    };
    let num = |s: &String| s.parse::<f64>().map_err(|_| format!("not a number: {s}"));
    Ok([num(x)?, num(y)?, num(z)?])
}

fn escape_xml(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

impl SceneHost {
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
            active: None,
            viewports: 1,
            redraws: 0,
        }
    }

    /// A cube carrying a small grid -> transform -> output node graph.
    pub fn with_demo_scene() -> Self {
        let mut host = Self::new();
        let mut sink = ScriptOutput::default();
        let script = "add_object Cube MESH\n\
                      modifier Cube GeometryNodes NODES\n\
                      node Cube GeometryNodes Grid GeometryNodeMeshGrid -300 0\n\
                      node Cube GeometryNodes Transform GeometryNodeTransform 0 0\n\
                      node Cube GeometryNodes \"Group Output\" NodeGroupOutput 300 0\n\
                      link Cube GeometryNodes Grid Mesh Transform Geometry\n\
                      link Cube GeometryNodes Transform Geometry \"Group Output\" Geometry";
        if let Err(err) = host.run_script(script, &mut sink) {
            tracing::warn!("demo scene setup failed: {err}");
        }
        host
    }

    pub fn objects(&self) -> &[SceneObject] {
        &self.objects
    }

    pub fn set_viewports(&mut self, count: usize) {
        self.viewports = count;
    }

    pub fn redraw_count(&self) -> u64 {
        self.redraws
    }

    fn object_mut(&mut self, name: &str) -> Result<&mut SceneObject, String> {
        self.objects
            .iter_mut()
            .find(|o| o.name == name)
            .ok_or_else(|| format!("no object named {name:?}"))
    }

    fn group_mut(&mut self, object: &str, modifier: &str) -> Result<&mut NodeGroup, String> {
        self.object_mut(object)?
            .modifiers
            .iter_mut()
            .find(|m| m.name == modifier)
            .ok_or_else(|| format!("{object:?} has no modifier named {modifier:?}"))?
            .group
            .as_mut()
            .ok_or_else(|| format!("modifier {modifier:?} has no node group"))
    }

    fn node_mut(&mut self, object: &str, modifier: &str, node: &str) -> Result<&mut Node, String> {
        self.group_mut(object, modifier)?
            .nodes
            .iter_mut()
            .find(|n| n.name == node)
            .ok_or_else(|| format!("no node named {node:?}"))
    }

    fn run_command(&mut self, args: &[String], output: &mut ScriptOutput) -> Result<(), String> {
        let Some((command, rest)) = args.split_first() else {
            return Ok(());
        };
        match (command.as_str(), rest) {
            ("print", _) => output.println(&rest.join(" ")),
            ("eprint", _) => output.eprintln(&rest.join(" ")),
            ("raise", _) => return Err(rest.join(" ")),
            ("add_object", [name, kind]) => {
                if self.objects.iter().any(|o| &o.name == name) {
                    return Err(format!("object {name:?} already exists"));
                }
                self.objects.push(SceneObject {
                    name: name.clone(),
                    kind: kind.clone(),
                    location: [0.0; 3],
                    rotation: [0.0; 3],
                    scale: [1.0; 3],
                    modifiers: Vec::new(),
                });
                self.active = Some(name.clone());
            }
            ("delete_object", [name]) => {
                let before = self.objects.len();
                self.objects.retain(|o| &o.name != name);
                if self.objects.len() == before {
                    return Err(format!("no object named {name:?}"));
                }
                if self.active.as_ref() == Some(name) {
                    self.active = None;
                }
            }
            ("select", [name]) => {
                self.object_mut(name)?;
                self.active = Some(name.clone());
            }
            ("deselect", []) => self.active = None,
            ("move", [name, v @ ..]) => self.object_mut(name)?.location = parse_vec3(v)?,
            ("rotate", [name, v @ ..]) => self.object_mut(name)?.rotation = parse_vec3(v)?,
            ("scale", [name, v @ ..]) => self.object_mut(name)?.scale = parse_vec3(v)?,
            ("list", []) => {
                for object in &self.objects {
                    output.println(&format!("{} {}", object.name, object.kind));
                }
            }
            ("modifier", [object, name, kind]) => {
                let group = (kind == NODE_GRAPH_MODIFIER).then(|| NodeGroup {
                    name: name.clone(),
                    ..NodeGroup::default()
                });
                self.object_mut(object)?.modifiers.push(Modifier {
                    name: name.clone(),
                    kind: kind.clone(),
                    active: false,
                    group,
                });
            }
            ("activate_modifier", [object, name]) => {
                let target = self.object_mut(object)?;
                if !target.modifiers.iter().any(|m| &m.name == name) {
                    return Err(format!("{object:?} has no modifier named {name:?}"));
                }
                for m in &mut target.modifiers {
                    m.active = &m.name == name;
                }
            }
            ("node", [object, modifier, name, kind, x, y]) => {
                let location = (
                    x.parse::<f64>().map_err(|_| format!("not a number: {x}"))?,
                    y.parse::<f64>().map_err(|_| format!("not a number: {y}"))?,
                );
                let group = self.group_mut(object, modifier)?;
                if group.nodes.iter().any(|n| &n.name == name) {
                    return Err(format!("node {name:?} already exists"));
                }
                let (inputs, outputs) = sockets_for(kind);
                group.nodes.push(Node {
                    name: name.clone(),
                    kind: kind.clone(),
                    label: String::new(),
                    location,
                    width: DEFAULT_NODE_WIDTH,
                    mute: false,
                    inputs,
                    outputs,
                });
            }
            ("remove_node", [object, modifier, name]) => {
                let group = self.group_mut(object, modifier)?;
                group.nodes.retain(|n| &n.name != name);
            }
            ("link", [object, modifier, from_node, from_socket, to_node, to_socket]) => {
                let group = self.group_mut(object, modifier)?;
                group.links.retain(|l| !(&l.to_node == to_node && &l.to_socket == to_socket));
                group.links.push(Link {
                    from_node: from_node.clone(),
                    from_socket: from_socket.clone(),
                    to_node: to_node.clone(),
                    to_socket: to_socket.clone(),
                });
            }
            ("set", [object, modifier, node, socket, value @ ..]) if !value.is_empty() => {
                let target = self.node_mut(object, modifier, node)?;
                let input = target
                    .inputs
                    .iter_mut()
                    .find(|s| &s.identifier == socket)
                    .ok_or_else(|| format!("{node:?} has no input {socket:?}"))?;
                input.default = Some(parse_value(value));
            }
            ("mute", [object, modifier, node]) => {
                let target = self.node_mut(object, modifier, node)?;
                target.mute = !target.mute;
            }
            ("label", [object, modifier, node, text @ ..]) => {
                self.node_mut(object, modifier, node)?.label = text.join(" ");
            }
            (other, _) => return Err(format!("unknown command or bad arguments: {other}")),
        }
        Ok(())
    }

    fn render_svg(&self) -> String {
        let mut svg = String::from(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"320\" height=\"240\" viewBox=\"-8 -6 16 12\">",
        );
        svg.push_str("<rect x=\"-8\" y=\"-6\" width=\"16\" height=\"12\" fill=\"#303030\"/>");
        for object in &self.objects {
            let [x, y, _] = object.location;
            let fill = if self.active.as_deref() == Some(object.name.as_str()) {
                "#f5a623"
            } else {
                "#b0b0b0"
            };
            let _ = write!(
                svg,
                "<circle cx=\"{x}\" cy=\"{}\" r=\"0.3\" fill=\"{fill}\"/>\
                 <text x=\"{x}\" y=\"{}\" font-size=\"0.5\" fill=\"#ffffff\">{}</text>",
                -y,
                -y - 0.4,
                escape_xml(&object.name)
            );
        }
        svg.push_str("</svg>");
        svg
    }
}

impl Default for SceneHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for SceneHost {
    fn active_object(&self) -> Option<Box<dyn LiveObject + '_>> {
        let name = self.active.as_deref()?;
        let object = self.objects.iter().find(|o| o.name == name)?;
        Some(Box::new(ObjectView(object)))
    }

    fn run_script(&mut self, code: &str, output: &mut ScriptOutput) -> Result<(), String> {
        for (index, line) in code.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let args = shlex::split(trimmed)
                .ok_or_else(|| format!("line {}: unbalanced quotes", index + 1))?;
            self.run_command(&args, output)
                .map_err(|err| format!("line {}: {err}", index + 1))?;
        }
        Ok(())
    }

    fn redraw_viewports(&mut self) -> Result<usize, String> {
        self.redraws += 1;
        Ok(self.viewports)
    }

    fn capture_viewport(&mut self) -> Result<Option<Viewshot>, String> {
        if self.viewports == 0 {
            return Ok(None);
        }
        Ok(Some(Viewshot {
            bytes: self.render_svg().into_bytes(),
            mime_type: "image/svg+xml".to_string(),
        }))
    }
}

// ── Live views ──────────────────────────────────────────────────────────

struct ObjectView<'a>(&'a SceneObject);

impl LiveObject for ObjectView<'_> {
    fn name(&self) -> Result<String, ReadError> {
        Ok(self.0.name.clone())
    }

    fn object_type(&self) -> Result<String, ReadError> {
        Ok(self.0.kind.clone())
    }

    fn transform(&self) -> Result<Transform, ReadError> {
        let o = self.0;
        // Meshes are unit cubes spanning -1..1 before scaling.
        let dimensions = if o.kind == "MESH" {
            o.scale.map(|s| (2.0 * s).abs())
        } else {
            [0.0; 3]
        };
        Ok(Transform {
            location: o.location,
            rotation: o.rotation,
            scale: o.scale,
            dimensions,
        })
    }

    fn modifiers(&self) -> Vec<Box<dyn LiveModifier + '_>> {
        self.0
            .modifiers
            .iter()
            .map(|m| Box::new(ModifierView(m)) as Box<dyn LiveModifier + '_>)
            .collect()
    }
}

struct ModifierView<'a>(&'a Modifier);

impl LiveModifier for ModifierView<'_> {
    fn name(&self) -> Result<String, ReadError> {
        Ok(self.0.name.clone())
    }

    fn modifier_type(&self) -> Result<String, ReadError> {
        Ok(self.0.kind.clone())
    }

    fn is_active(&self) -> bool {
        self.0.active
    }

    fn node_group(&self) -> Option<&dyn LiveGraph> {
        self.0.group.as_ref().map(|g| g as &dyn LiveGraph)
    }
}

impl LiveGraph for NodeGroup {
    fn name(&self) -> Result<String, ReadError> {
        Ok(self.name.clone())
    }

    fn nodes(&self) -> Vec<Box<dyn LiveNode + '_>> {
        self.nodes
            .iter()
            .map(|node| Box::new(NodeView { group: self, node }) as Box<dyn LiveNode + '_>)
            .collect()
    }

    fn links(&self) -> Vec<Box<dyn LiveLink + '_>> {
        self.links
            .iter()
            .map(|link| Box::new(LinkView { group: self, link }) as Box<dyn LiveLink + '_>)
            .collect()
    }
}

struct NodeView<'a> {
    group: &'a NodeGroup,
    node: &'a Node,
}

impl NodeView<'_> {
    fn sockets(&self, output: bool) -> Vec<Box<dyn LiveSocket + '_>> {
        let sockets = if output { &self.node.outputs } else { &self.node.inputs };
        sockets
            .iter()
            .map(|socket| {
                Box::new(SocketView {
                    group: self.group,
                    node: &self.node.name,
                    socket,
                    output,
                }) as Box<dyn LiveSocket + '_>
            })
            .collect()
    }
}

impl LiveNode for NodeView<'_> {
    fn name(&self) -> Result<String, ReadError> {
        Ok(self.node.name.clone())
    }
    fn node_type(&self) -> Result<String, ReadError> {
        Ok(self.node.kind.clone())
    }
    fn label(&self) -> Result<String, ReadError> {
        Ok(self.node.label.clone())
    }
    fn location(&self) -> Result<(f64, f64), ReadError> {
        Ok(self.node.location)
    }
    fn width(&self) -> Result<f64, ReadError> {
        Ok(self.node.width)
    }
    fn mute(&self) -> Result<bool, ReadError> {
        Ok(self.node.mute)
    }
    fn inputs(&self) -> Result<Vec<Box<dyn LiveSocket + '_>>, ReadError> {
        Ok(self.sockets(false))
    }
    fn outputs(&self) -> Result<Vec<Box<dyn LiveSocket + '_>>, ReadError> {
        Ok(self.sockets(true))
    }
}

struct SocketView<'a> {
    group: &'a NodeGroup,
    node: &'a str,
    socket: &'a Socket,
    output: bool,
}

impl LiveSocket for SocketView<'_> {
    fn identifier(&self) -> Result<String, ReadError> {
        Ok(self.socket.identifier.clone())
    }
    fn name(&self) -> Result<String, ReadError> {
        Ok(self.socket.name.clone())
    }
    fn socket_type(&self) -> Result<String, ReadError> {
        Ok(self.socket.kind.clone())
    }
    fn is_linked(&self) -> Result<bool, ReadError> {
        let id = &self.socket.identifier;
        Ok(self.group.links.iter().any(|l| {
            if self.output {
                l.from_node == self.node && &l.from_socket == id
            } else {
                l.to_node == self.node && &l.to_socket == id
            }
        }))
    }
    fn default_value(&self) -> Result<Option<HostValue>, ReadError> {
        Ok(self.socket.default.clone())
    }
}

struct LinkView<'a> {
    group: &'a NodeGroup,
    link: &'a Link,
}

impl LinkView<'_> {
    fn endpoint(&self, node: &str, socket: &str, output: bool) -> Result<(), ReadError> {
        let found = self
            .group
            .nodes
            .iter()
            .find(|n| n.name == node)
            .ok_or_else(|| ReadError::Dangling {
                what: "link endpoint".to_string(),
                target: node.to_string(),
            })?;
        let sockets = if output { &found.outputs } else { &found.inputs };
        if sockets.iter().any(|s| s.identifier == socket) {
            Ok(())
        } else {
            Err(ReadError::Dangling {
                what: format!("link endpoint on {node}"),
                target: socket.to_string(),
            })
        }
    }
}

impl LiveLink for LinkView<'_> {
    fn from_node(&self) -> Result<String, ReadError> {
        self.endpoint(&self.link.from_node, &self.link.from_socket, true)?;
        Ok(self.link.from_node.clone())
    }
    fn from_socket(&self) -> Result<String, ReadError> {
        Ok(self.link.from_socket.clone())
    }
    fn to_node(&self) -> Result<String, ReadError> {
        self.endpoint(&self.link.to_node, &self.link.to_socket, false)?;
        Ok(self.link.to_node.clone())
    }
    fn to_socket(&self) -> Result<String, ReadError> {
        Ok(self.link.to_socket.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::serialize_graph;

    fn run(host: &mut SceneHost, code: &str) -> Result<ScriptOutput, String> {
        let mut output = ScriptOutput::default();
        host.run_script(code, &mut output)?;
        Ok(output)
    }

    #[test]
    fn add_object_makes_it_active() {
        let mut host = SceneHost::new();
        run(&mut host, "add_object Cube MESH\nadd_object Lamp LIGHT").unwrap();
        assert_eq!(host.active_object().unwrap().name().unwrap(), "Lamp");
        run(&mut host, "select Cube").unwrap();
        assert_eq!(host.active_object().unwrap().name().unwrap(), "Cube");
        run(&mut host, "deselect").unwrap();
        assert!(host.active_object().is_none());
    }

    #[test]
    fn errors_carry_line_numbers() {
        let mut host = SceneHost::new();
        let err = run(&mut host, "add_object Cube MESH\n\nselect Sphere").unwrap_err();
        assert_eq!(err, "line 3: no object named \"Sphere\"");
        let err = run(&mut host, "frobnicate").unwrap_err();
        assert!(err.contains("unknown command"));
    }

    #[test]
    fn quoted_names_and_comments() {
        let mut host = SceneHost::new();
        let out = run(&mut host, "# setup\nadd_object \"My Cube\" MESH\nlist").unwrap();
        assert_eq!(out.stdout, "My Cube MESH\n");
    }

    #[test]
    fn set_parses_typed_values() {
        assert_eq!(parse_value(&["3".to_string()]), HostValue::Int(3));
        assert_eq!(parse_value(&["2.5".to_string()]), HostValue::Float(2.5));
        assert_eq!(parse_value(&["true".to_string()]), HostValue::Bool(true));
        assert_eq!(
            parse_value(&["1".to_string(), "2".to_string(), "3".to_string()]),
            HostValue::Tuple(vec![1.0, 2.0, 3.0])
        );
        assert_eq!(
            parse_value(&["hello".to_string(), "there".to_string()]),
            HostValue::Text("hello there".to_string())
        );
    }

    #[test]
    fn removed_node_leaves_dangling_link_that_serializer_drops() {
        let mut host = SceneHost::with_demo_scene();
        let before = {
            let object = &host.objects()[0];
            serialize_graph(Some(object.modifiers[0].group.as_ref().unwrap() as &dyn LiveGraph))
                .unwrap()
                .unwrap()
        };
        assert_eq!(before.nodes.len(), 3);
        assert_eq!(before.links.len(), 2);

        run(&mut host, "remove_node Cube GeometryNodes Transform").unwrap();
        let object = &host.objects()[0];
        let group = object.modifiers[0].group.as_ref().unwrap();
        assert_eq!(group.links.len(), 2);
        let after = serialize_graph(Some(group as &dyn LiveGraph)).unwrap().unwrap();
        assert_eq!(after.nodes.len(), 2);
        assert!(after.links.is_empty());
    }

    #[test]
    fn demo_scene_values_survive_serialization() {
        let mut host = SceneHost::with_demo_scene();
        run(&mut host, "set Cube GeometryNodes Transform Translation 0 0 1.5").unwrap();
        let group = host.objects()[0].modifiers[0].group.as_ref().unwrap();
        let snapshot = serialize_graph(Some(group as &dyn LiveGraph)).unwrap().unwrap();
        let transform = snapshot.nodes.iter().find(|n| n.name == "Transform").unwrap();
        assert_eq!(transform.inputs["Translation"].value, serde_json::json!([0.0, 0.0, 1.5]));
        assert!(transform.inputs["Geometry"].is_linked);
        assert!(transform.inputs["Geometry"].value.is_null());
        assert!(transform.outputs["Geometry"].is_linked);
    }

    #[test]
    fn svg_escapes_object_names() {
        let mut host = SceneHost::new();
        run(&mut host, "add_object \"<Cube & Co>\" MESH").unwrap();
        let shot = host.capture_viewport().unwrap().unwrap();
        let svg = String::from_utf8(shot.bytes).unwrap();
        assert!(svg.contains("&lt;Cube &amp; Co&gt;"));
    }
}
