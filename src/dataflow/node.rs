use crate::frontend::{Instruction, RegType, Role};
use std::fmt;

/// Index of a node in the graph arena
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Stable identity of a node across graphs
///
/// Real instructions are identified by their position in the source,
/// virtual nodes by the register they stand for.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKey {
    Real(usize),
    Input(String),
    Output(String),
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Real(pos) => write!(f, "{}", pos),
            NodeKey::Input(reg) => write!(f, "input_{}", reg),
            NodeKey::Output(reg) => write!(f, "output_{}", reg),
        }
    }
}

/// Which kind of result slot a register source refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceKind {
    Out,
    InOut,
}

impl SourceKind {
    pub fn role(self) -> Role {
        match self {
            SourceKind::Out => Role::Out,
            SourceKind::InOut => Role::InOut,
        }
    }

    pub fn label(self, idx: usize) -> String {
        match self {
            SourceKind::Out => format!("out{}", idx),
            SourceKind::InOut => format!("inout{}", idx),
        }
    }
}

/// The exact result slot currently holding a register's value
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegisterSource {
    pub node: NodeId,
    pub idx: usize,
    pub kind: SourceKind,
}

impl RegisterSource {
    pub fn output(node: NodeId, idx: usize) -> Self {
        RegisterSource {
            node,
            idx,
            kind: SourceKind::Out,
        }
    }

    pub fn in_out(node: NodeId, idx: usize) -> Self {
        RegisterSource {
            node,
            idx,
            kind: SourceKind::InOut,
        }
    }
}

/// One instruction occurrence, or a virtual input/output
#[derive(Clone, Debug)]
pub struct ComputationNode {
    pub id: NodeId,
    pub key: NodeKey,
    /// Position among real instructions; `None` for virtual nodes
    pub orig_pos: Option<usize>,
    pub inst: Instruction,
    /// Index of the source entry the node was built from
    pub(crate) src_idx: Option<usize>,
    pub depth: usize,
    pub src_in: Vec<RegisterSource>,
    pub src_in_out: Vec<RegisterSource>,
    pub dst_out: Vec<Vec<NodeId>>,
    pub dst_in_out: Vec<Vec<NodeId>>,
    pub is_locked: bool,
    /// Register state right before this node's writes
    pub reg_state: im::HashMap<String, RegisterSource>,
}

impl ComputationNode {
    pub fn is_virtual_input(&self) -> bool {
        matches!(self.key, NodeKey::Input(_))
    }

    pub fn is_virtual_output(&self) -> bool {
        matches!(self.key, NodeKey::Output(_))
    }

    pub fn is_virtual(&self) -> bool {
        self.orig_pos.is_none()
    }

    /// Type of the given result slot
    pub fn result_type(&self, kind: SourceKind, idx: usize) -> Option<RegType> {
        self.inst.operands(kind.role()).get(idx).map(|op| op.ty)
    }

    pub fn result_name(&self, kind: SourceKind, idx: usize) -> Option<&str> {
        self.inst.arg(kind.role(), idx)
    }

    pub fn consumers(&self, kind: SourceKind, idx: usize) -> &[NodeId] {
        let lists = match kind {
            SourceKind::Out => &self.dst_out,
            SourceKind::InOut => &self.dst_in_out,
        };
        lists.get(idx).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_consumers(&self) -> bool {
        self.dst_out.iter().chain(&self.dst_in_out).any(|d| !d.is_empty())
    }

    /// All result slots of the node
    pub fn results(&self) -> impl Iterator<Item = (SourceKind, usize)> + '_ {
        (0..self.inst.num_out())
            .map(|i| (SourceKind::Out, i))
            .chain((0..self.inst.num_in_out()).map(|i| (SourceKind::InOut, i)))
    }
}

impl fmt::Display for ComputationNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:[{}]", self.key, self.inst)
    }
}
