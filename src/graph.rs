//! Snapshotting of live node graphs into plain, acyclic wire values.
//!
//! The host exposes its graphs through the `Live*` traits. Every read can
//! fail, because host objects may be half-built or already freed. The
//! serializer turns each read into an explicit `Result` and applies one policy
//! per level:
//!
//! - a node that fails any read is skipped,
//! - a link with an unreadable endpoint is skipped,
//! - a socket default that cannot be read becomes `null`,
//! - only an unreadable graph name aborts the snapshot.

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Number, Value};
use tracing::{debug, warn};

use crate::error::ReadError;

// ── Host value model ────────────────────────────────────────────────────

/// A socket default as the host hands it over.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Fixed-size numeric aggregates: vectors, colors, euler angles.
    Tuple(Vec<f64>),
    /// Variable-length sequences of host values.
    List(Vec<HostValue>),
    /// Anything the host can only describe, such as object or material references.
    Opaque(String),
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
            Self::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(|x| x.to_string()).collect();
                write!(f, "({})", parts.join(", "))
            }
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(|x| x.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Self::Opaque(repr) => f.write_str(repr),
        }
    }
}

/// What a socket value turned into on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    Scalar(Value),
    Vector(Vec<Value>),
    Opaque(String),
}

impl From<Extracted> for Value {
    fn from(value: Extracted) -> Self {
        match value {
            Extracted::Scalar(v) => v,
            Extracted::Vector(items) => Value::Array(items),
            Extracted::Opaque(repr) => Value::String(repr),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unsupported {
    NotTuple,
    NotList,
    NotPrimitive,
    NonFinite,
}

fn finite(x: f64) -> Result<Value, Unsupported> {
    Number::from_f64(x)
        .map(Value::Number)
        .ok_or(Unsupported::NonFinite)
}

fn as_tuple(value: &HostValue) -> Result<Extracted, Unsupported> {
    let HostValue::Tuple(items) = value else {
        return Err(Unsupported::NotTuple);
    };
    let items = items.iter().map(|x| finite(*x)).collect::<Result<_, _>>()?;
    Ok(Extracted::Vector(items))
}

fn as_list(value: &HostValue) -> Result<Extracted, Unsupported> {
    let HostValue::List(items) = value else {
        return Err(Unsupported::NotList);
    };
    Ok(Extracted::Vector(
        items.iter().map(|item| Value::from(extract_value(item))).collect(),
    ))
}

fn as_primitive(value: &HostValue) -> Result<Extracted, Unsupported> {
    let scalar = match value {
        HostValue::Bool(b) => Value::Bool(*b),
        HostValue::Int(i) => Value::from(*i),
        HostValue::Float(x) => finite(*x)?,
        HostValue::Text(s) => Value::String(s.clone()),
        _ => return Err(Unsupported::NotPrimitive),
    };
    Ok(Extracted::Scalar(scalar))
}

/// Converts a host value, trying tuple, list and primitive conversions in that
/// order and falling back to the value's string form.
pub fn extract_value(value: &HostValue) -> Extracted {
    as_tuple(value)
        .or_else(|_| as_list(value))
        .or_else(|_| as_primitive(value))
        .unwrap_or_else(|_| Extracted::Opaque(value.to_string()))
}

// ── Live graph view ─────────────────────────────────────────────────────

pub trait LiveSocket {
    fn identifier(&self) -> Result<String, ReadError>;
    fn name(&self) -> Result<String, ReadError>;
    fn socket_type(&self) -> Result<String, ReadError>;
    fn is_linked(&self) -> Result<bool, ReadError>;
    /// `Ok(None)` when the socket has no default at all.
    fn default_value(&self) -> Result<Option<HostValue>, ReadError>;
}

pub trait LiveNode {
    fn name(&self) -> Result<String, ReadError>;
    fn node_type(&self) -> Result<String, ReadError>;
    fn label(&self) -> Result<String, ReadError>;
    fn location(&self) -> Result<(f64, f64), ReadError>;
    fn width(&self) -> Result<f64, ReadError>;
    fn mute(&self) -> Result<bool, ReadError>;
    fn inputs(&self) -> Result<Vec<Box<dyn LiveSocket + '_>>, ReadError>;
    fn outputs(&self) -> Result<Vec<Box<dyn LiveSocket + '_>>, ReadError>;
}

pub trait LiveLink {
    fn from_node(&self) -> Result<String, ReadError>;
    fn from_socket(&self) -> Result<String, ReadError>;
    fn to_node(&self) -> Result<String, ReadError>;
    fn to_socket(&self) -> Result<String, ReadError>;
}

pub trait LiveGraph {
    fn name(&self) -> Result<String, ReadError>;
    fn nodes(&self) -> Vec<Box<dyn LiveNode + '_>>;
    fn links(&self) -> Vec<Box<dyn LiveLink + '_>>;
}

// ── Snapshot ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SerializedInput {
    pub name: String,
    #[serde(rename = "type")]
    pub socket_type: String,
    pub is_linked: bool,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SerializedOutput {
    pub name: String,
    #[serde(rename = "type")]
    pub socket_type: String,
    pub is_linked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SerializedNode {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub label: String,
    pub location: (f64, f64),
    pub width: f64,
    pub inputs: IndexMap<String, SerializedInput>,
    pub outputs: IndexMap<String, SerializedOutput>,
    pub mute: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SerializedLink {
    pub from_node: String,
    pub from_socket: String,
    pub to_node: String,
    pub to_socket: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SerializedGraph {
    pub name: String,
    pub nodes: Vec<SerializedNode>,
    pub links: Vec<SerializedLink>,
}

pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Literal value carried by an input socket. Linked sockets never carry one.
pub fn socket_value(socket: &dyn LiveSocket) -> Value {
    match socket.is_linked() {
        Ok(false) => {}
        Ok(true) | Err(_) => return Value::Null,
    }
    match socket.default_value() {
        Ok(Some(raw)) => Value::from(extract_value(&raw)),
        Ok(None) | Err(_) => Value::Null,
    }
}

fn serialize_input(socket: &dyn LiveSocket) -> Result<(String, SerializedInput), ReadError> {
    Ok((
        socket.identifier()?,
        SerializedInput {
            name: socket.name()?,
            socket_type: socket.socket_type()?,
            is_linked: socket.is_linked()?,
            value: socket_value(socket),
        },
    ))
}

fn serialize_output(socket: &dyn LiveSocket) -> Result<(String, SerializedOutput), ReadError> {
    Ok((
        socket.identifier()?,
        SerializedOutput {
            name: socket.name()?,
            socket_type: socket.socket_type()?,
            is_linked: socket.is_linked()?,
        },
    ))
}

pub fn serialize_node(node: &dyn LiveNode) -> Result<SerializedNode, ReadError> {
    let mut inputs = IndexMap::new();
    for socket in node.inputs()? {
        let (id, input) = serialize_input(socket.as_ref())?;
        inputs.insert(id, input);
    }
    let mut outputs = IndexMap::new();
    for socket in node.outputs()? {
        let (id, output) = serialize_output(socket.as_ref())?;
        outputs.insert(id, output);
    }
    let (x, y) = node.location()?;
    Ok(SerializedNode {
        name: node.name()?,
        node_type: node.node_type()?,
        label: node.label()?,
        location: (round_to(x, 1), round_to(y, 1)),
        width: round_to(node.width()?, 1),
        inputs,
        outputs,
        mute: node.mute()?,
    })
}

pub fn serialize_link(link: &dyn LiveLink) -> Result<SerializedLink, ReadError> {
    Ok(SerializedLink {
        from_node: link.from_node()?,
        from_socket: link.from_socket()?,
        to_node: link.to_node()?,
        to_socket: link.to_socket()?,
    })
}

/// Snapshots `graph`. `Ok(None)` for an absent graph; failing nodes and links
/// are dropped from the result rather than failing it.
pub fn serialize_graph(graph: Option<&dyn LiveGraph>) -> Result<Option<SerializedGraph>, ReadError> {
    let Some(graph) = graph else {
        return Ok(None);
    };
    let name = graph.name()?;

    let mut nodes = Vec::new();
    for node in graph.nodes() {
        match serialize_node(node.as_ref()) {
            Ok(serialized) => nodes.push(serialized),
            Err(err) => {
                let label = node.name().unwrap_or_else(|_| "<unnamed>".to_string());
                warn!("skipping node {label} in graph {name}: {err}");
            }
        }
    }

    let mut links = Vec::new();
    for link in graph.links() {
        match serialize_link(link.as_ref()) {
            Ok(serialized) => links.push(serialized),
            Err(err) => debug!("skipping link in graph {name}: {err}"),
        }
    }

    Ok(Some(SerializedGraph { name, nodes, links }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Clone)]
    struct FakeSocket {
        id: &'static str,
        linked: bool,
        value: Option<HostValue>,
        broken: bool,
    }

    impl FakeSocket {
        fn new(id: &'static str, value: Option<HostValue>) -> Self {
            Self { id, linked: false, value, broken: false }
        }
    }

    impl LiveSocket for FakeSocket {
        fn identifier(&self) -> Result<String, ReadError> {
            Ok(self.id.to_string())
        }
        fn name(&self) -> Result<String, ReadError> {
            if self.broken {
                return Err(ReadError::host("socket.name", "freed"));
            }
            Ok(self.id.to_uppercase())
        }
        fn socket_type(&self) -> Result<String, ReadError> {
            Ok("VALUE".to_string())
        }
        fn is_linked(&self) -> Result<bool, ReadError> {
            Ok(self.linked)
        }
        fn default_value(&self) -> Result<Option<HostValue>, ReadError> {
            Ok(self.value.clone())
        }
    }

    struct FakeNode {
        name: &'static str,
        inputs: Vec<FakeSocket>,
        location: (f64, f64),
    }

    impl LiveNode for FakeNode {
        fn name(&self) -> Result<String, ReadError> {
            Ok(self.name.to_string())
        }
        fn node_type(&self) -> Result<String, ReadError> {
            Ok("FakeNodeType".to_string())
        }
        fn label(&self) -> Result<String, ReadError> {
            Ok(String::new())
        }
        fn location(&self) -> Result<(f64, f64), ReadError> {
            Ok(self.location)
        }
        fn width(&self) -> Result<f64, ReadError> {
            Ok(140.04)
        }
        fn mute(&self) -> Result<bool, ReadError> {
            Ok(false)
        }
        fn inputs(&self) -> Result<Vec<Box<dyn LiveSocket + '_>>, ReadError> {
            Ok(self
                .inputs
                .iter()
                .map(|s| Box::new(s.clone()) as Box<dyn LiveSocket>)
                .collect())
        }
        fn outputs(&self) -> Result<Vec<Box<dyn LiveSocket + '_>>, ReadError> {
            Ok(vec![Box::new(FakeSocket::new("Geometry", None))])
        }
    }

    struct FakeLink(Option<&'static str>);

    impl LiveLink for FakeLink {
        fn from_node(&self) -> Result<String, ReadError> {
            self.0
                .map(str::to_string)
                .ok_or_else(|| ReadError::Dangling {
                    what: "link.from_node".to_string(),
                    target: "?".to_string(),
                })
        }
        fn from_socket(&self) -> Result<String, ReadError> {
            Ok("Geometry".to_string())
        }
        fn to_node(&self) -> Result<String, ReadError> {
            Ok("Output".to_string())
        }
        fn to_socket(&self) -> Result<String, ReadError> {
            Ok("Geometry".to_string())
        }
    }

    struct FakeGraph {
        nodes: Vec<FakeNode>,
        links: Vec<FakeLink>,
    }

    impl LiveGraph for FakeGraph {
        fn name(&self) -> Result<String, ReadError> {
            Ok("Fake Tree".to_string())
        }
        fn nodes(&self) -> Vec<Box<dyn LiveNode + '_>> {
            self.nodes.iter().map(|n| Box::new(n) as Box<dyn LiveNode + '_>).collect()
        }
        fn links(&self) -> Vec<Box<dyn LiveLink + '_>> {
            self.links.iter().map(|l| Box::new(l) as Box<dyn LiveLink + '_>).collect()
        }
    }

    impl<T: LiveNode + ?Sized> LiveNode for &T {
        fn name(&self) -> Result<String, ReadError> {
            (**self).name()
        }
        fn node_type(&self) -> Result<String, ReadError> {
            (**self).node_type()
        }
        fn label(&self) -> Result<String, ReadError> {
            (**self).label()
        }
        fn location(&self) -> Result<(f64, f64), ReadError> {
            (**self).location()
        }
        fn width(&self) -> Result<f64, ReadError> {
            (**self).width()
        }
        fn mute(&self) -> Result<bool, ReadError> {
            (**self).mute()
        }
        fn inputs(&self) -> Result<Vec<Box<dyn LiveSocket + '_>>, ReadError> {
            (**self).inputs()
        }
        fn outputs(&self) -> Result<Vec<Box<dyn LiveSocket + '_>>, ReadError> {
            (**self).outputs()
        }
    }

    impl<T: LiveLink + ?Sized> LiveLink for &T {
        fn from_node(&self) -> Result<String, ReadError> {
            (**self).from_node()
        }
        fn from_socket(&self) -> Result<String, ReadError> {
            (**self).from_socket()
        }
        fn to_node(&self) -> Result<String, ReadError> {
            (**self).to_node()
        }
        fn to_socket(&self) -> Result<String, ReadError> {
            (**self).to_socket()
        }
    }

    fn node(name: &'static str, inputs: Vec<FakeSocket>) -> FakeNode {
        FakeNode { name, inputs, location: (12.345, -7.77) }
    }

    #[test]
    fn absent_graph_serializes_to_none() {
        assert_eq!(serialize_graph(None), Ok(None));
    }

    #[test]
    fn failing_node_is_skipped_and_others_survive() {
        let mut bad = FakeSocket::new("Size", Some(HostValue::Float(1.0)));
        bad.broken = true;
        let graph = FakeGraph {
            nodes: vec![
                node("Input", vec![]),
                node("Broken", vec![bad]),
                node("Output", vec![FakeSocket::new("Geometry", None)]),
            ],
            links: vec![],
        };
        let snapshot = serialize_graph(Some(&graph)).unwrap().unwrap();
        let names: Vec<&str> = snapshot.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["Input", "Output"]);
    }

    #[test]
    fn linked_inputs_never_carry_a_value() {
        let mut linked = FakeSocket::new("Offset", Some(HostValue::Tuple(vec![1.0, 2.0, 3.0])));
        linked.linked = true;
        let graph = FakeGraph {
            nodes: vec![node("Transform", vec![linked, FakeSocket::new("Scale", Some(HostValue::Float(2.0)))])],
            links: vec![],
        };
        let snapshot = serialize_graph(Some(&graph)).unwrap().unwrap();
        let inputs = &snapshot.nodes[0].inputs;
        assert!(inputs["Offset"].is_linked);
        assert_eq!(inputs["Offset"].value, Value::Null);
        assert_eq!(inputs["Scale"].value, json!(2.0));
        for node in &snapshot.nodes {
            for input in node.inputs.values() {
                if input.is_linked {
                    assert!(input.value.is_null());
                }
            }
        }
    }

    #[test]
    fn dangling_link_is_omitted() {
        let graph = FakeGraph {
            nodes: vec![node("Input", vec![]), node("Output", vec![])],
            links: vec![FakeLink(Some("Input")), FakeLink(None)],
        };
        let snapshot = serialize_graph(Some(&graph)).unwrap().unwrap();
        assert_eq!(snapshot.links.len(), 1);
        assert_eq!(snapshot.links[0].from_node, "Input");
    }

    #[test]
    fn positions_are_rounded_to_one_decimal() {
        let graph = FakeGraph { nodes: vec![node("Input", vec![])], links: vec![] };
        let snapshot = serialize_graph(Some(&graph)).unwrap().unwrap();
        assert_eq!(snapshot.nodes[0].location, (12.3, -7.8));
        assert_eq!(snapshot.nodes[0].width, 140.0);
    }

    #[test]
    fn sockets_keep_host_declaration_order() {
        let graph = FakeGraph {
            nodes: vec![node(
                "Grid",
                vec![
                    FakeSocket::new("Size X", Some(HostValue::Float(1.0))),
                    FakeSocket::new("Size Y", Some(HostValue::Float(1.0))),
                    FakeSocket::new("Vertices", Some(HostValue::Int(3))),
                    FakeSocket::new("Angle", Some(HostValue::Float(0.0))),
                ],
            )],
            links: vec![],
        };
        let snapshot = serialize_graph(Some(&graph)).unwrap().unwrap();
        let ids: Vec<&str> = snapshot.nodes[0].inputs.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["Size X", "Size Y", "Vertices", "Angle"]);

        let wire = serde_json::to_string(&snapshot).unwrap();
        let vertices = wire.find("\"Vertices\"").unwrap();
        let angle = wire.find("\"Angle\"").unwrap();
        assert!(vertices < angle);
    }

    #[test]
    fn extraction_precedence() {
        assert_eq!(
            extract_value(&HostValue::Tuple(vec![0.5, 1.0])),
            Extracted::Vector(vec![json!(0.5), json!(1.0)])
        );
        assert_eq!(
            extract_value(&HostValue::List(vec![HostValue::Int(1), HostValue::Text("a".into())])),
            Extracted::Vector(vec![json!(1), json!("a")])
        );
        assert_eq!(extract_value(&HostValue::Bool(true)), Extracted::Scalar(json!(true)));
        assert_eq!(
            extract_value(&HostValue::Opaque("<Material 'Steel'>".into())),
            Extracted::Opaque("<Material 'Steel'>".to_string())
        );
    }

    #[test]
    fn non_finite_values_fall_back_to_strings() {
        assert_eq!(
            extract_value(&HostValue::Float(f64::NAN)),
            Extracted::Opaque("NaN".to_string())
        );
        assert_eq!(
            extract_value(&HostValue::Tuple(vec![1.0, f64::INFINITY])),
            Extracted::Opaque("(1, inf)".to_string())
        );
    }

    #[test]
    fn snapshot_wire_shape() {
        let graph = FakeGraph {
            nodes: vec![node("Input", vec![FakeSocket::new("Count", Some(HostValue::Int(4)))])],
            links: vec![FakeLink(Some("Input"))],
        };
        let snapshot = serialize_graph(Some(&graph)).unwrap().unwrap();
        let wire = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(
            wire,
            json!({
                "name": "Fake Tree",
                "nodes": [{
                    "name": "Input",
                    "type": "FakeNodeType",
                    "label": "",
                    "location": [12.3, -7.8],
                    "width": 140.0,
                    "inputs": {"Count": {"name": "COUNT", "type": "VALUE", "is_linked": false, "value": 4}},
                    "outputs": {"Geometry": {"name": "GEOMETRY", "type": "VALUE", "is_linked": false}},
                    "mute": false
                }],
                "links": [{
                    "from_node": "Input",
                    "from_socket": "Geometry",
                    "to_node": "Output",
                    "to_socket": "Geometry"
                }]
            })
        );
    }
}
