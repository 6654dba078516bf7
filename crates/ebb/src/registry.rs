//! Process-wide op definition registry.
//!
//! The optimizer never executes ops; it only needs their signatures to
//! resolve per-port dtypes and to recognize persistent (variable-like)
//! producers. Definitions can be registered from any crate through the
//! global registry; a default set covering the ops this crate inserts and
//! the common structural ops is seeded on first access.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use thiserror::Error;

use crate::spec::{AttrValue, DataType, Node};

/// How an argument slot obtains its dtype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSpec {
    /// The slot always carries this dtype.
    Fixed(DataType),
    /// The slot's dtype is read from the named node attribute.
    Attr(String),
}

/// One input or output argument slot of an op definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgDef {
    pub name: String,
    pub type_spec: TypeSpec,
    /// When set, the slot repeats `node.attr[number_attr]` times.
    pub number_attr: Option<String>,
    /// Reference slots alias persistent storage and must stay in device
    /// memory.
    pub is_ref: bool,
}

impl ArgDef {
    pub fn typed(name: impl Into<String>, dtype: DataType) -> Self {
        ArgDef {
            name: name.into(),
            type_spec: TypeSpec::Fixed(dtype),
            number_attr: None,
            is_ref: false,
        }
    }

    pub fn attr(name: impl Into<String>, attr: impl Into<String>) -> Self {
        ArgDef {
            name: name.into(),
            type_spec: TypeSpec::Attr(attr.into()),
            number_attr: None,
            is_ref: false,
        }
    }

    pub fn repeated(mut self, number_attr: impl Into<String>) -> Self {
        self.number_attr = Some(number_attr.into());
        self
    }

    pub fn reference(mut self) -> Self {
        self.is_ref = true;
        self
    }
}

/// Signature of one op kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpDef {
    pub name: String,
    pub inputs: Vec<ArgDef>,
    pub outputs: Vec<ArgDef>,
    /// Whether outputs are backed by long-lived storage (variables,
    /// constants). Swapping such tensors frees no memory.
    pub persistent: bool,
}

impl OpDef {
    pub fn new(name: impl Into<String>) -> Self {
        OpDef {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            persistent: false,
        }
    }

    pub fn input(mut self, arg: ArgDef) -> Self {
        self.inputs.push(arg);
        self
    }

    pub fn output(mut self, arg: ArgDef) -> Self {
        self.outputs.push(arg);
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }
}

/// Resolved dtype of a concrete port on a concrete node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortType {
    pub dtype: DataType,
    pub is_ref: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeResolveError {
    #[error("port {port} is out of range for op '{op}' on node '{node}'")]
    PortOutOfRange { node: String, op: String, port: i32 },
    #[error("node '{node}' is missing type attribute '{attr}'")]
    MissingTypeAttr { node: String, attr: String },
    #[error("attribute '{attr}' on node '{node}' is not a type")]
    AttrNotAType { node: String, attr: String },
    #[error("node '{node}' is missing count attribute '{attr}'")]
    MissingCountAttr { node: String, attr: String },
}

/// Resolves the dtype of output port `port` of `node` against `op_def`.
pub fn output_type_for_node(
    node: &Node,
    op_def: &OpDef,
    port: i32,
) -> Result<PortType, TypeResolveError> {
    type_at_port(node, op_def, &op_def.outputs, port)
}

/// Resolves the dtype of data input slot `port` of `node` against `op_def`.
pub fn input_type_for_node(
    node: &Node,
    op_def: &OpDef,
    port: i32,
) -> Result<PortType, TypeResolveError> {
    type_at_port(node, op_def, &op_def.inputs, port)
}

/// Number of output ports `node` exposes under `op_def`, after expanding
/// repeated argument slots.
pub fn num_outputs_for_node(node: &Node, op_def: &OpDef) -> Result<i32, TypeResolveError> {
    let mut total = 0i32;
    for arg in &op_def.outputs {
        total += arg_count(node, arg)?;
    }
    Ok(total)
}

fn type_at_port(
    node: &Node,
    op_def: &OpDef,
    args: &[ArgDef],
    port: i32,
) -> Result<PortType, TypeResolveError> {
    if port >= 0 {
        let mut base = 0i32;
        for arg in args {
            let count = arg_count(node, arg)?;
            if port < base + count {
                return resolve_arg(node, arg);
            }
            base += count;
        }
    }
    Err(TypeResolveError::PortOutOfRange {
        node: node.name.clone(),
        op: op_def.name.clone(),
        port,
    })
}

fn arg_count(node: &Node, arg: &ArgDef) -> Result<i32, TypeResolveError> {
    let Some(number_attr) = &arg.number_attr else {
        return Ok(1);
    };
    match node.attr.get(number_attr) {
        Some(AttrValue::I64(count)) => Ok((*count).max(0) as i32),
        _ => Err(TypeResolveError::MissingCountAttr {
            node: node.name.clone(),
            attr: number_attr.clone(),
        }),
    }
}

fn resolve_arg(node: &Node, arg: &ArgDef) -> Result<PortType, TypeResolveError> {
    let dtype = match &arg.type_spec {
        TypeSpec::Fixed(dtype) => *dtype,
        TypeSpec::Attr(attr) => match node.attr.get(attr) {
            Some(AttrValue::Type(dtype)) => *dtype,
            Some(_) => {
                return Err(TypeResolveError::AttrNotAType {
                    node: node.name.clone(),
                    attr: attr.clone(),
                })
            }
            None => {
                return Err(TypeResolveError::MissingTypeAttr {
                    node: node.name.clone(),
                    attr: attr.clone(),
                })
            }
        },
    };
    Ok(PortType {
        dtype,
        is_ref: arg.is_ref,
    })
}

/// Registry mapping op names to their definitions.
pub struct OpRegistry {
    ops: RwLock<HashMap<String, Arc<OpDef>>>,
}

impl OpRegistry {
    fn new() -> Self {
        OpRegistry {
            ops: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the process-wide registry, seeding the default op set on
    /// first access.
    pub fn global() -> &'static OpRegistry {
        static GLOBAL: OnceLock<OpRegistry> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            let registry = OpRegistry::new();
            for op in default_ops() {
                registry.register(op);
            }
            registry
        })
    }

    pub fn register(&self, op_def: OpDef) {
        self.ops
            .write()
            .unwrap()
            .insert(op_def.name.clone(), Arc::new(op_def));
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<OpDef>> {
        self.ops.read().unwrap().get(name).cloned()
    }
}

fn default_ops() -> Vec<OpDef> {
    vec![
        OpDef::new("Const")
            .output(ArgDef::attr("output", "dtype"))
            .persistent(),
        OpDef::new("Placeholder").output(ArgDef::attr("output", "dtype")),
        OpDef::new("Variable")
            .output(ArgDef::attr("ref", "dtype").reference())
            .persistent(),
        OpDef::new("VariableV2")
            .output(ArgDef::attr("ref", "dtype").reference())
            .persistent(),
        OpDef::new("VarHandleOp")
            .output(ArgDef::typed("resource", DataType::Resource))
            .persistent(),
        OpDef::new("Assign")
            .input(ArgDef::attr("ref", "T").reference())
            .input(ArgDef::attr("value", "T"))
            .output(ArgDef::attr("output_ref", "T").reference()),
        OpDef::new("Identity")
            .input(ArgDef::attr("input", "T"))
            .output(ArgDef::attr("output", "T")),
        OpDef::new("Reshape")
            .input(ArgDef::attr("tensor", "T"))
            .input(ArgDef::typed("shape", DataType::I32))
            .output(ArgDef::attr("output", "T")),
        OpDef::new("Merge")
            .input(ArgDef::attr("inputs", "T").repeated("N"))
            .output(ArgDef::attr("output", "T"))
            .output(ArgDef::typed("value_index", DataType::I32)),
        OpDef::new("NextIteration")
            .input(ArgDef::attr("data", "T"))
            .output(ArgDef::attr("output", "T")),
        OpDef::new("Enter")
            .input(ArgDef::attr("data", "T"))
            .output(ArgDef::attr("output", "T")),
        OpDef::new("Exit")
            .input(ArgDef::attr("data", "T"))
            .output(ArgDef::attr("output", "T")),
        OpDef::new("Switch")
            .input(ArgDef::attr("data", "T"))
            .input(ArgDef::typed("pred", DataType::Bool))
            .output(ArgDef::attr("output_false", "T"))
            .output(ArgDef::attr("output_true", "T")),
        OpDef::new("Add")
            .input(ArgDef::attr("x", "T"))
            .input(ArgDef::attr("y", "T"))
            .output(ArgDef::attr("z", "T")),
        OpDef::new("Sub")
            .input(ArgDef::attr("x", "T"))
            .input(ArgDef::attr("y", "T"))
            .output(ArgDef::attr("z", "T")),
        OpDef::new("Mul")
            .input(ArgDef::attr("x", "T"))
            .input(ArgDef::attr("y", "T"))
            .output(ArgDef::attr("z", "T")),
        OpDef::new("MatMul")
            .input(ArgDef::attr("a", "T"))
            .input(ArgDef::attr("b", "T"))
            .output(ArgDef::attr("product", "T")),
        OpDef::new("Relu")
            .input(ArgDef::attr("features", "T"))
            .output(ArgDef::attr("activations", "T")),
        OpDef::new("NoOp"),
        OpDef::new(crate::spec::COPY_TO_HOST_OP)
            .input(ArgDef::attr("input", "T"))
            .output(ArgDef::attr("output", "T")),
        OpDef::new(crate::spec::COPY_TO_DEVICE_OP)
            .input(ArgDef::attr("input", "T"))
            .output(ArgDef::attr("output", "T")),
    ]
}
