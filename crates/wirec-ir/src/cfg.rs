//! Arena-indexed control-flow graphs.
//!
//! Nodes are addressed by handle, never by owning link, so loop back edges
//! and merge points cannot form ownership cycles. `prev` lists are
//! traversal aids only.

use crate::ids::ObjectId;

/// Handle into a [`Cfg`] node arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CfgNodeId(pub u32);

impl CfgNodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One basic block: a contiguous run of instruction indices.
#[derive(Clone, Debug, Default)]
pub struct CfgNode {
    /// Stream indices belonging to this block, in order.
    pub indices: Vec<usize>,
    /// Static bit-size estimate accumulated from wire ops in the block.
    pub sum_bits: u64,
    /// Successor blocks.
    pub next: Vec<CfgNodeId>,
    /// Predecessor back-references, for traversal only.
    pub prev: Vec<CfgNodeId>,
}

/// Control-flow graph of one encoder/decoder function body.
#[derive(Clone, Debug)]
pub struct Cfg {
    nodes: Vec<CfgNode>,
    /// Function this graph was built from.
    pub ident: ObjectId,
    pub entry: CfgNodeId,
    pub exit: CfgNodeId,
}

impl Cfg {
    /// Create a graph with fresh entry and exit nodes.
    pub fn new(ident: ObjectId) -> Cfg {
        let nodes = vec![CfgNode::default(), CfgNode::default()];
        Cfg {
            nodes,
            ident,
            entry: CfgNodeId(0),
            exit: CfgNodeId(1),
        }
    }

    pub fn add_node(&mut self) -> CfgNodeId {
        let id = CfgNodeId(self.nodes.len() as u32);
        self.nodes.push(CfgNode::default());
        id
    }

    pub fn node(&self, id: CfgNodeId) -> &CfgNode {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: CfgNodeId) -> &mut CfgNode {
        &mut self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CfgNodeId, &CfgNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (CfgNodeId(i as u32), n))
    }

    /// Wire `from → to`, recording the back-reference.
    pub fn add_edge(&mut self, from: CfgNodeId, to: CfgNodeId) {
        if !self.nodes[from.index()].next.contains(&to) {
            self.nodes[from.index()].next.push(to);
        }
        if !self.nodes[to.index()].prev.contains(&from) {
            self.nodes[to.index()].prev.push(from);
        }
    }

    /// Sum of block size estimates over every node.
    pub fn total_bits(&self) -> u64 {
        self.nodes.iter().map(|n| n.sum_bits).sum()
    }
}
