use std::{collections::BTreeMap, fs, io, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Input prefix marking a control dependency rather than a data edge.
pub const CONTROL_PREFIX: char = '^';

/// Port id used for control edges in port-level queries.
pub const CONTROL_PORT: i32 = -1;

/// Op kind of inserted device-to-host copy nodes.
pub const COPY_TO_HOST_OP: &str = "_CopyFromGpuToHost";

/// Op kind of inserted host-to-device copy nodes.
pub const COPY_TO_DEVICE_OP: &str = "_CopyFromHostToGpu";

/// Attribute key carrying colocation groups.
pub const CLASS_ATTR: &str = "_class";

/// Attribute key carrying the element dtype of copy nodes.
pub const TYPE_ATTR: &str = "T";

/// Enumerates scalar element types carried by graph edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    U8,
    I8,
    I16,
    I32,
    I64,
    F16,
    Bf16,
    F32,
    F64,
    Resource,
    Variant,
}

/// Node attribute payload. Limited to simple primitives and string lists so
/// attributes stay easy to serialize, hash, and compare.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum AttrValue {
    Type(DataType),
    I64(i64),
    F64(f64),
    Bool(bool),
    String(String),
    StringList(Vec<String>),
}

/// Single node of a dataflow graph.
///
/// Inputs are `name[:port]` references into the same graph; control inputs
/// are prefixed with `^` and must follow every data input so that data input
/// `i` is addressable by its position in the list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub op: String,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub input: Vec<String>,
    /// Partition id written by the partitioner; 0 means unassigned.
    #[serde(default)]
    pub partition: i32,
    #[serde(default)]
    pub attr: BTreeMap<String, AttrValue>,
}

impl Node {
    pub fn new(name: impl Into<String>, op: impl Into<String>, device: impl Into<String>) -> Self {
        Node {
            name: name.into(),
            op: op.into(),
            device: device.into(),
            input: Vec::new(),
            partition: 0,
            attr: BTreeMap::new(),
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input.push(input.into());
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: AttrValue) -> Self {
        self.attr.insert(key.into(), value);
        self
    }

    /// Returns the dtype stored under `key`, if the attribute is a type.
    pub fn type_attr(&self, key: &str) -> Option<DataType> {
        match self.attr.get(key) {
            Some(AttrValue::Type(dtype)) => Some(*dtype),
            _ => None,
        }
    }

    /// Returns the `_class` colocation groups recorded on this node.
    pub fn colocation_groups(&self) -> &[String] {
        match self.attr.get(CLASS_ATTR) {
            Some(AttrValue::StringList(groups)) => groups.as_slice(),
            _ => &[],
        }
    }

    /// Appends a colocation group to the `_class` attribute list.
    pub fn add_colocation_group(&mut self, group: impl Into<String>) {
        match self.attr.get_mut(CLASS_ATTR) {
            Some(AttrValue::StringList(groups)) => groups.push(group.into()),
            _ => {
                self.attr.insert(
                    CLASS_ATTR.to_string(),
                    AttrValue::StringList(vec![group.into()]),
                );
            }
        }
    }
}

/// Parsed form of a `name[:port]` input reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputRef<'a> {
    pub node: &'a str,
    /// Output port on the producer; [`CONTROL_PORT`] for control inputs.
    pub port: i32,
}

impl<'a> InputRef<'a> {
    pub fn is_control(&self) -> bool {
        self.port == CONTROL_PORT
    }
}

/// Splits an input reference into producer name and output port.
pub fn parse_input(input: &str) -> InputRef<'_> {
    if let Some(name) = input.strip_prefix(CONTROL_PREFIX) {
        return InputRef {
            node: name,
            port: CONTROL_PORT,
        };
    }
    match input.rsplit_once(':') {
        Some((name, port)) => match port.parse::<i32>() {
            Ok(port) if port >= 0 => InputRef { node: name, port },
            _ => InputRef {
                node: input,
                port: 0,
            },
        },
        None => InputRef {
            node: input,
            port: 0,
        },
    }
}

/// Ordered sequence of nodes forming a dataflow graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub nodes: Vec<Node>,
}

#[derive(Debug, Error)]
pub enum GraphSerdeError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
}

#[derive(Debug, Error)]
pub enum GraphIoError {
    #[error(transparent)]
    Serialization(#[from] GraphSerdeError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl Graph {
    pub fn new(nodes: Vec<Node>) -> Self {
        Graph { nodes }
    }

    pub fn add_node(&mut self, node: Node) {
        self.nodes.push(node);
    }

    pub fn to_json_string(&self) -> Result<String, GraphSerdeError> {
        serde_json::to_string_pretty(self).map_err(GraphSerdeError::from)
    }

    pub fn from_json_str(src: &str) -> Result<Self, GraphSerdeError> {
        serde_json::from_str(src).map_err(GraphSerdeError::from)
    }

    pub fn to_bincode_bytes(&self) -> Result<Vec<u8>, GraphSerdeError> {
        bincode::serialize(self).map_err(GraphSerdeError::from)
    }

    pub fn from_bincode_slice(bytes: &[u8]) -> Result<Self, GraphSerdeError> {
        bincode::deserialize(bytes).map_err(GraphSerdeError::from)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), GraphIoError> {
        let contents = self.to_json_string()?;
        fs::write(path, contents).map_err(GraphIoError::from)
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, GraphIoError> {
        let contents = fs::read_to_string(path).map_err(GraphIoError::from)?;
        Graph::from_json_str(&contents).map_err(GraphIoError::from)
    }
}
