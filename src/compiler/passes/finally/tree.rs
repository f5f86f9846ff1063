//! Containment tree of the finally regions of one method.

use crate::metadata::method::InstrId;

/// Index of the synthetic root node.
pub(crate) const ROOT: usize = 0;

/// Half-open range of instruction ordinals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn contains(&self, position: usize) -> bool {
        self.start <= position && position < self.end
    }

    pub fn encloses(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Smallest span covering both.
    pub fn hull(&self, other: &Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Boundaries of one finally region as discovered in the body.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RegionSpans {
    /// Index into the method's exception handlers
    pub region: usize,
    pub try_span: Span,
    pub handler_span: Span,
    pub handler_start: InstrId,
}

/// One finally region, or the root.
#[derive(Debug, Clone)]
pub(crate) struct HandlerNode {
    /// Index into the method's exception handlers; `None` for the root
    pub region: Option<usize>,
    pub try_span: Span,
    /// Try range and handler together; a pending state of this region never
    /// outlives it
    pub extent: Span,
    pub handler_start: Option<InstrId>,
    pub parent: usize,
    pub children: Vec<usize>,
    /// Continuations this handler dispatches to, in discovery order
    pub end_destinations: Vec<InstrId>,
    /// Some exit relays through this handler to its parent
    pub forwards_to_parent: bool,
    /// State local of this handler
    pub slot: Option<u16>,
}

impl HandlerNode {
    /// The handler takes part in at least one exit.
    pub fn is_bearing(&self) -> bool {
        !self.end_destinations.is_empty() || self.forwards_to_parent
    }

    /// Switch index of `destination`, registering it on first use.
    pub fn destination_index(&mut self, destination: InstrId) -> usize {
        match self.end_destinations.iter().position(|d| *d == destination) {
            Some(index) => index,
            None => {
                self.end_destinations.push(destination);
                self.end_destinations.len() - 1
            }
        }
    }
}

/// Arena of [`HandlerNode`]s with parent indices.
#[derive(Debug, Clone)]
pub(crate) struct HandlerTree {
    nodes: Vec<HandlerNode>,
}

impl HandlerTree {
    /// A tree with only the root, spanning `len` instructions.
    pub fn new(len: usize) -> Self {
        HandlerTree {
            nodes: vec![HandlerNode {
                region: None,
                try_span: Span { start: 0, end: len },
                extent: Span { start: 0, end: len },
                handler_start: None,
                parent: ROOT,
                children: Vec::new(),
                end_destinations: Vec::new(),
                forwards_to_parent: false,
                slot: None,
            }],
        }
    }

    /// Builds the tree; insertion order does not matter since larger spans go first.
    pub fn build(len: usize, regions: &[RegionSpans]) -> Self {
        let mut sorted: Vec<&RegionSpans> = regions.iter().collect();
        sorted.sort_by(|a, b| {
            b.try_span
                .len()
                .cmp(&a.try_span.len())
                .then(a.try_span.start.cmp(&b.try_span.start))
        });

        let mut tree = HandlerTree::new(len);
        for spans in sorted {
            tree.insert(spans);
        }
        tree
    }

    fn insert(&mut self, spans: &RegionSpans) -> usize {
        let span = spans.try_span;
        let mut parent = ROOT;
        while let Some(child) = self.nodes[parent]
            .children
            .iter()
            .copied()
            .find(|child| self.nodes[*child].try_span.encloses(&span))
        {
            parent = child;
        }

        let index = self.nodes.len();
        self.nodes.push(HandlerNode {
            region: Some(spans.region),
            try_span: span,
            extent: span.hull(&spans.handler_span),
            handler_start: Some(spans.handler_start),
            parent,
            children: Vec::new(),
            end_destinations: Vec::new(),
            forwards_to_parent: false,
            slot: None,
        });
        self.nodes[parent].children.push(index);
        index
    }

    pub fn node(&self, index: usize) -> &HandlerNode {
        &self.nodes[index]
    }

    pub fn node_mut(&mut self, index: usize) -> &mut HandlerNode {
        &mut self.nodes[index]
    }

    /// Region nodes, root excluded.
    pub fn regions(&self) -> impl Iterator<Item = usize> {
        1..self.nodes.len()
    }

    /// The innermost region whose try range contains `position`, or the root.
    pub fn innermost(&self, position: usize) -> usize {
        let mut current = ROOT;
        while let Some(child) = self.nodes[current]
            .children
            .iter()
            .copied()
            .find(|child| self.nodes[*child].try_span.contains(position))
        {
            current = child;
        }
        current
    }

    /// Regions a `leave` at `from` to `to` exits, innermost first.
    pub fn chain(&self, from: usize, to: usize) -> Vec<usize> {
        let mut chain = Vec::new();
        let mut current = self.innermost(from);
        while current != ROOT && !self.nodes[current].try_span.contains(to) {
            chain.push(current);
            current = self.nodes[current].parent;
        }
        chain
    }

    /// Assigns a slot to every bearing region and returns the number of slots needed.
    ///
    /// Two regions whose extents overlap can have pending states at the same time: an
    /// ancestor waiting for its inner handlers, or a handler running a region nested in
    /// its own body. Such regions never share a slot; disjoint regions do.
    pub fn allocate_slots(&mut self) -> u16 {
        let mut slots = 0;
        let mut assigned: Vec<usize> = Vec::new();
        for index in self.regions() {
            if !self.nodes[index].is_bearing() {
                continue;
            }
            let extent = self.nodes[index].extent;
            let taken: Vec<u16> = assigned
                .iter()
                .filter(|other| self.nodes[**other].extent.overlaps(&extent))
                .filter_map(|other| self.nodes[*other].slot)
                .collect();
            let mut slot = 0u16;
            while taken.contains(&slot) {
                slot += 1;
            }
            self.nodes[index].slot = Some(slot);
            slots = slots.max(slot + 1);
            assigned.push(index);
        }
        slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(index: u32) -> InstrId {
        InstrId::new(index)
    }

    fn region(region: usize, try_span: (usize, usize), handler_span: (usize, usize)) -> RegionSpans {
        RegionSpans {
            region,
            try_span: Span {
                start: try_span.0,
                end: try_span.1,
            },
            handler_span: Span {
                start: handler_span.0,
                end: handler_span.1,
            },
            handler_start: id(handler_span.0 as u32),
        }
    }

    #[test]
    fn test_tree_is_insertion_order_independent() {
        let outer = region(0, (0, 10), (12, 13));
        let inner = region(1, (2, 5), (6, 7));
        let sibling = region(2, (11, 14), (15, 16));

        for regions in [
            vec![outer, inner, sibling],
            vec![inner, sibling, outer],
        ] {
            let tree = HandlerTree::build(20, &regions);
            let inner_node = tree.innermost(3);
            assert_eq!(tree.node(inner_node).region, Some(1));
            let outer_node = tree.node(inner_node).parent;
            assert_eq!(tree.node(outer_node).region, Some(0));
            assert_eq!(tree.node(outer_node).parent, ROOT);
            assert_eq!(tree.node(tree.innermost(12)).region, Some(2));
            assert_eq!(tree.innermost(10), ROOT);
        }
    }

    #[test]
    fn test_chain_and_slots() {
        let regions = [
            region(0, (0, 20), (30, 32)),
            region(1, (1, 10), (25, 27)),
            region(2, (2, 5), (22, 24)),
        ];
        let mut tree = HandlerTree::build(40, &regions);

        let chain = tree.chain(3, 35);
        assert_eq!(chain.len(), 3);
        assert_eq!(tree.node(chain[0]).region, Some(2));
        assert_eq!(tree.node(chain[2]).region, Some(0));

        // leaving only the two inner regions
        assert_eq!(tree.chain(3, 15).len(), 2);
        assert!(tree.chain(3, 4).is_empty());

        tree.node_mut(chain[0]).forwards_to_parent = true;
        tree.node_mut(chain[1]).forwards_to_parent = true;
        tree.node_mut(chain[2]).destination_index(id(35));
        assert_eq!(tree.allocate_slots(), 3);
        assert_eq!(tree.node(chain[0]).slot, Some(2));
        assert_eq!(tree.node(chain[2]).slot, Some(0));
    }

    #[test]
    fn test_disjoint_siblings_share_a_slot() {
        let regions = [region(0, (0, 4), (4, 6)), region(1, (8, 12), (12, 14))];
        let mut tree = HandlerTree::build(20, &regions);
        let first = tree.innermost(1);
        let second = tree.innermost(9);
        tree.node_mut(first).destination_index(id(7));
        tree.node_mut(second).destination_index(id(15));

        assert_eq!(tree.allocate_slots(), 1);
        assert_eq!(tree.node(first).slot, Some(0));
        assert_eq!(tree.node(second).slot, Some(0));
    }

    #[test]
    fn test_region_inside_a_handler_gets_its_own_slot() {
        // outer try [0, 20) holds inner try [1, 5) whose handler [5, 15) holds a
        // region of its own; containment by try range alone makes it inner's sibling
        let regions = [
            region(0, (0, 20), (20, 22)),
            region(1, (1, 5), (5, 15)),
            region(2, (6, 8), (8, 10)),
        ];
        let mut tree = HandlerTree::build(30, &regions);
        let inner = tree.innermost(2);
        let nested = tree.innermost(7);
        let outer = tree.node(inner).parent;
        assert_eq!(tree.node(nested).parent, outer);

        tree.node_mut(outer).destination_index(id(25));
        tree.node_mut(inner).forwards_to_parent = true;
        tree.node_mut(inner).destination_index(id(15));
        tree.node_mut(nested).destination_index(id(10));

        assert_eq!(tree.allocate_slots(), 3);
        let slots = [outer, inner, nested].map(|node| tree.node(node).slot);
        assert_eq!(slots, [Some(0), Some(1), Some(2)]);
    }

    #[test]
    fn test_destination_index_reuses_slots() {
        let mut tree = HandlerTree::build(10, &[region(0, (0, 4), (5, 6))]);
        let node = tree.innermost(1);
        assert_eq!(tree.node_mut(node).destination_index(id(8)), 0);
        assert_eq!(tree.node_mut(node).destination_index(id(9)), 1);
        assert_eq!(tree.node_mut(node).destination_index(id(8)), 0);
        assert!(!Span { start: 0, end: 4 }.overlaps(&Span { start: 4, end: 6 }));
    }
}
