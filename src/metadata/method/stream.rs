//! Arena storage for the instructions of one method body.
//!
//! Instructions live in a `Vec` of nodes linked into a doubly-linked sequence. A node is
//! addressed by its [`InstrId`], which stays valid (and is never reused) for the lifetime
//! of the body, even after the node is unlinked. Link manipulation is private to the
//! `method` module: [`crate::metadata::method::MethodBody`] is the only caller and keeps
//! branch operands and handler boundaries consistent while doing so.

use std::{collections::HashMap, fmt};

use crate::assembly::Instruction;

/// Stable handle of an instruction within its method body.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(u32);

impl InstrId {
    pub(crate) fn new(index: u32) -> Self {
        InstrId(index)
    }

    /// Arena index of this handle.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstrId({})", self.0)
    }
}

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct Node {
    instr: Instruction,
    prev: Option<InstrId>,
    next: Option<InstrId>,
    live: bool,
}

/// Doubly-linked instruction sequence backed by an arena.
#[derive(Debug, Clone, Default)]
pub struct InstructionStream {
    nodes: Vec<Node>,
    head: Option<InstrId>,
    tail: Option<InstrId>,
    len: usize,
}

impl InstructionStream {
    /// Number of linked instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no instruction is linked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// First instruction.
    #[must_use]
    pub fn first(&self) -> Option<InstrId> {
        self.head
    }

    /// Last instruction.
    #[must_use]
    pub fn last(&self) -> Option<InstrId> {
        self.tail
    }

    /// Returns `true` if `id` names a linked instruction.
    #[must_use]
    pub fn contains(&self, id: InstrId) -> bool {
        self.nodes.get(id.index()).is_some_and(|node| node.live)
    }

    /// The instruction behind `id`, if it is linked.
    #[must_use]
    pub fn get(&self, id: InstrId) -> Option<&Instruction> {
        self.node(id).map(|node| &node.instr)
    }

    /// The structural successor of `id`.
    #[must_use]
    pub fn next(&self, id: InstrId) -> Option<InstrId> {
        self.node(id).and_then(|node| node.next)
    }

    /// The structural predecessor of `id`.
    #[must_use]
    pub fn prev(&self, id: InstrId) -> Option<InstrId> {
        self.node(id).and_then(|node| node.prev)
    }

    /// Handles in sequence order.
    #[must_use]
    pub fn ids(&self) -> Vec<InstrId> {
        self.iter().map(|(id, _)| id).collect()
    }

    /// Iterates `(handle, instruction)` pairs in sequence order.
    pub fn iter(&self) -> StreamIter<'_> {
        StreamIter {
            stream: self,
            cursor: self.head,
        }
    }

    /// Maps every linked handle to its ordinal position.
    #[must_use]
    pub fn positions(&self) -> HashMap<InstrId, usize> {
        self.iter()
            .enumerate()
            .map(|(position, (id, _))| (id, position))
            .collect()
    }

    fn node(&self, id: InstrId) -> Option<&Node> {
        self.nodes.get(id.index()).filter(|node| node.live)
    }

    pub(super) fn get_mut(&mut self, id: InstrId) -> Option<&mut Instruction> {
        self.nodes
            .get_mut(id.index())
            .filter(|node| node.live)
            .map(|node| &mut node.instr)
    }

    /// Mutable access to every linked instruction, in arena order.
    pub(super) fn instructions_mut(&mut self) -> impl Iterator<Item = &mut Instruction> {
        self.nodes
            .iter_mut()
            .filter(|node| node.live)
            .map(|node| &mut node.instr)
    }

    fn allocate(&mut self, instr: Instruction) -> InstrId {
        let id = InstrId::new(self.nodes.len() as u32);
        self.nodes.push(Node {
            instr,
            prev: None,
            next: None,
            live: true,
        });
        self.len += 1;
        id
    }

    pub(super) fn push_back(&mut self, instr: Instruction) -> InstrId {
        let id = self.allocate(instr);
        self.nodes[id.index()].prev = self.tail;
        match self.tail {
            Some(tail) => self.nodes[tail.index()].next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        id
    }

    /// Links a new instruction after `anchor`. `anchor` must be linked.
    pub(super) fn link_after(&mut self, anchor: InstrId, instr: Instruction) -> InstrId {
        let next = self.nodes[anchor.index()].next;
        let id = self.allocate(instr);
        self.nodes[id.index()].prev = Some(anchor);
        self.nodes[id.index()].next = next;
        self.nodes[anchor.index()].next = Some(id);
        match next {
            Some(next) => self.nodes[next.index()].prev = Some(id),
            None => self.tail = Some(id),
        }
        id
    }

    /// Links a new instruction before `anchor`. `anchor` must be linked.
    pub(super) fn link_before(&mut self, anchor: InstrId, instr: Instruction) -> InstrId {
        let prev = self.nodes[anchor.index()].prev;
        let id = self.allocate(instr);
        self.nodes[id.index()].prev = prev;
        self.nodes[id.index()].next = Some(anchor);
        self.nodes[anchor.index()].prev = Some(id);
        match prev {
            Some(prev) => self.nodes[prev.index()].next = Some(id),
            None => self.head = Some(id),
        }
        id
    }

    /// Unlinks `id`. `id` must be linked.
    pub(super) fn unlink(&mut self, id: InstrId) {
        let (prev, next) = {
            let node = &mut self.nodes[id.index()];
            node.live = false;
            (node.prev.take(), node.next.take())
        };
        match prev {
            Some(prev) => self.nodes[prev.index()].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.nodes[next.index()].prev = prev,
            None => self.tail = prev,
        }
        self.len -= 1;
    }
}

/// Iterator over a stream in sequence order.
pub struct StreamIter<'a> {
    stream: &'a InstructionStream,
    cursor: Option<InstrId>,
}

impl<'a> Iterator for StreamIter<'a> {
    type Item = (InstrId, &'a Instruction);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        let node = self.stream.node(id)?;
        self.cursor = node.next;
        Some((id, &node.instr))
    }
}
