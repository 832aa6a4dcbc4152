use crate::jvm::code::{BlockId, BlockLabel, BlockPartition};
use crate::jvm::Error;
use petgraph::algo::connected_components;
use petgraph::graphmap::{DiGraphMap, NodeTrait};
use petgraph::Direction;
use std::cell::Cell;
use std::fmt;
use std::ops::Deref;

/// Directed graph with vertices of type `V`
///
/// Vertices and edges are kept in insertion order. Adding a vertex or edge that is already
/// present does nothing. The number of weakly connected components (needed for the complexity
/// metrics) is computed on first use and remembered until the graph changes.
#[derive(Clone, Debug)]
pub struct DirectedGraph<V: NodeTrait> {
    graph: DiGraphMap<V, ()>,
    components: Cell<Option<usize>>,
}

impl<V: NodeTrait + fmt::Debug> DirectedGraph<V> {
    pub fn new() -> DirectedGraph<V> {
        DirectedGraph {
            graph: DiGraphMap::new(),
            components: Cell::new(None),
        }
    }

    /// Add a vertex, returning whether it was new
    pub fn add_vertex(&mut self, vertex: V) -> bool {
        if self.graph.contains_node(vertex) {
            return false;
        }
        self.graph.add_node(vertex);
        self.components.set(None);
        true
    }

    /// Add an edge between two existing vertices, returning whether it was new
    pub fn add_edge(&mut self, from: &V, to: &V) -> Result<bool, Error> {
        self.check_vertex(from)?;
        self.check_vertex(to)?;
        if self.graph.contains_edge(*from, *to) {
            return Ok(false);
        }
        self.graph.add_edge(*from, *to, ());
        self.components.set(None);
        Ok(true)
    }

    /// Vertices reachable from `vertex` by one edge
    pub fn edges_from(&self, vertex: &V) -> Result<impl Iterator<Item = V> + '_, Error> {
        self.check_vertex(vertex)?;
        Ok(self.graph.neighbors_directed(*vertex, Direction::Outgoing))
    }

    /// Vertices with an edge into `vertex`
    pub fn edges_to(&self, vertex: &V) -> Result<impl Iterator<Item = V> + '_, Error> {
        self.check_vertex(vertex)?;
        Ok(self.graph.neighbors_directed(*vertex, Direction::Incoming))
    }

    pub fn in_degree(&self, vertex: &V) -> Result<usize, Error> {
        Ok(self.edges_to(vertex)?.count())
    }

    pub fn out_degree(&self, vertex: &V) -> Result<usize, Error> {
        Ok(self.edges_from(vertex)?.count())
    }

    pub fn contains(&self, vertex: &V) -> bool {
        self.graph.contains_node(*vertex)
    }

    pub fn vertices(&self) -> impl Iterator<Item = V> + '_ {
        self.graph.nodes()
    }

    /// All edges, in the order they were added
    pub fn edges(&self) -> impl Iterator<Item = (V, V)> + '_ {
        self.graph.all_edges().map(|(from, to, _)| (from, to))
    }

    pub fn vertex_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Number of weakly connected components
    pub fn components(&self) -> usize {
        if let Some(components) = self.components.get() {
            return components;
        }
        let components = connected_components(&self.graph);
        self.components.set(Some(components));
        components
    }

    /// McCabe's cyclomatic complexity: `E - V + 2P`
    pub fn cyclomatic_complexity(&self) -> isize {
        self.edge_count() as isize - self.vertex_count() as isize + 2 * self.components() as isize
    }

    /// Cyclomatic complexity counting each component once: `E - V + P`
    pub fn linear_complexity(&self) -> isize {
        self.edge_count() as isize - self.vertex_count() as isize + self.components() as isize
    }

    /// Remove all vertices and edges
    pub fn clear(&mut self) {
        self.graph.clear();
        self.components.set(None);
    }

    fn check_vertex(&self, vertex: &V) -> Result<(), Error> {
        if self.graph.contains_node(*vertex) {
            Ok(())
        } else {
            Err(Error::MissingVertex(format!("{:?}", vertex)))
        }
    }
}

impl<V: NodeTrait + fmt::Debug> Default for DirectedGraph<V> {
    fn default() -> Self {
        DirectedGraph::new()
    }
}

/// Control flow graph of a method, with one vertex per surviving basic block
#[derive(Clone, Debug)]
pub struct FlowGraph {
    graph: DirectedGraph<BlockId>,
    labels: Vec<BlockLabel>,
}

impl FlowGraph {
    /// Build the graph of a block partition
    ///
    /// Every block becomes a vertex before any edge is added. Edges go from each block to its
    /// successors: the block control falls into and every jump destination other than the block
    /// itself.
    pub fn from_partition(partition: &BlockPartition) -> Result<FlowGraph, Error> {
        let mut graph = DirectedGraph::new();
        for (id, _) in partition.iter() {
            graph.add_vertex(id);
        }
        for (id, block) in partition.iter() {
            for succ in &block.successors {
                graph.add_edge(&id, succ)?;
            }
        }
        let labels = partition.blocks().iter().map(|block| block.label).collect();

        let graph = FlowGraph { graph, labels };
        log::debug!(
            "Flow graph has {} vertices, {} edges, cyclomatic complexity {}",
            graph.vertex_count(),
            graph.edge_count(),
            graph.cyclomatic_complexity(),
        );
        Ok(graph)
    }

    pub fn label(&self, id: BlockId) -> Option<BlockLabel> {
        self.labels.get(id.0).copied()
    }

    /// Underlying graph, for mutation
    pub fn graph_mut(&mut self) -> &mut DirectedGraph<BlockId> {
        &mut self.graph
    }
}

impl Deref for FlowGraph {
    type Target = DirectedGraph<BlockId>;

    fn deref(&self) -> &DirectedGraph<BlockId> {
        &self.graph
    }
}

/// Adjacency list using block labels, one line per vertex
impl fmt::Display for FlowGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = |id: &BlockId| match self.label(*id) {
            Some(label) => label.to_string(),
            None => format!("#{}", id.0),
        };
        for vertex in self.graph.graph.nodes() {
            write!(f, "{}:", name(&vertex))?;
            for to in self.graph.graph.neighbors_directed(vertex, Direction::Outgoing) {
                write!(f, " {}", name(&to))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::{decode, InstructionList, LocalIndex, Opcode, Operand};

    #[test]
    fn vertices_and_edges_are_idempotent() {
        let mut graph: DirectedGraph<&str> = DirectedGraph::new();
        assert!(graph.add_vertex("a"));
        assert!(graph.add_vertex("b"));
        assert!(!graph.add_vertex("a"));
        assert!(graph.add_edge(&"a", &"b").unwrap());
        assert!(!graph.add_edge(&"a", &"b").unwrap());

        assert_eq!(graph.vertex_count(), 2);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.edges_from(&"a").unwrap().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(graph.edges_to(&"b").unwrap().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(graph.in_degree(&"b").unwrap(), 1);
        assert_eq!(graph.out_degree(&"a").unwrap(), 1);
        assert_eq!(graph.out_degree(&"b").unwrap(), 0);
    }

    #[test]
    fn missing_vertices_are_errors() {
        let mut graph: DirectedGraph<u32> = DirectedGraph::new();
        graph.add_vertex(1);
        assert!(matches!(graph.add_edge(&1, &2), Err(Error::MissingVertex(v)) if v == "2"));
        assert!(matches!(graph.edges_from(&7), Err(Error::MissingVertex(_))));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn complexity_tracks_mutations() {
        let mut graph: DirectedGraph<u32> = DirectedGraph::new();
        for v in 0..4 {
            graph.add_vertex(v);
        }
        // Diamond: 0 -> 1 -> 3, 0 -> 2 -> 3
        for (from, to) in [(0, 1), (0, 2), (1, 3), (2, 3)] {
            graph.add_edge(&from, &to).unwrap();
        }
        assert_eq!(graph.components(), 1);
        assert_eq!(graph.cyclomatic_complexity(), 2);
        assert_eq!(graph.linear_complexity(), 1);

        // A disconnected vertex adds a component
        graph.add_vertex(4);
        assert_eq!(graph.components(), 2);
        assert_eq!(graph.cyclomatic_complexity(), 4 - 5 + 4);

        // Back edge closes a loop
        graph.add_edge(&3, &0).unwrap();
        assert_eq!(graph.cyclomatic_complexity(), 5 - 5 + 4);

        graph.clear();
        assert_eq!(graph.vertex_count(), 0);
        assert_eq!(graph.cyclomatic_complexity(), 0);
    }

    #[test]
    fn flow_graph_edges_match_block_links() {
        let bytes = [
            0x1a, // 0: iload_0
            0x99, 0x00, 0x0a, // 1: ifeq +10
            0x1b, // 4: iload_1
            0x9a, 0x00, 0x08, // 5: ifne +8
            0xa7, 0xff, 0xf8, // 8: goto -8
            0x1b, // 11: iload_1
            0xac, // 12: ireturn
            0x03, // 13: iconst_0
            0xac, // 14: ireturn
        ];
        let instructions = decode(&bytes).unwrap();
        let partition = BlockPartition::build(&instructions).unwrap();
        let graph = FlowGraph::from_partition(&partition).unwrap();

        assert_eq!(graph.vertex_count(), partition.len());
        for (id, block) in partition.iter() {
            assert_eq!(graph.in_degree(&id).unwrap(), block.predecessors.len());
            let succs: Vec<BlockId> = graph.edges_from(&id).unwrap().collect();
            assert_eq!(succs, block.successors);
        }
        for (from, to) in graph.edges() {
            assert!(graph.contains(&from) && graph.contains(&to));
        }

        // A: 0..1, B: 4..5, C (goto) removed, D: 11..12, E: 13..14
        // B falls into the removed goto, which loops back to A
        assert_eq!(graph.to_string(), "A: D B\nB: E A\nD:\nE:\n");
        assert_eq!(graph.components(), 1);
        assert_eq!(graph.cyclomatic_complexity(), 2);
    }

    #[test]
    fn self_loops_are_not_edges() {
        let mut instructions = InstructionList::new();
        instructions
            .push(Opcode::Iload0, Operand::Local(LocalIndex::Implicit))
            .unwrap();
        instructions.push(Opcode::Ifne, Operand::Branch(-1)).unwrap();
        instructions.push(Opcode::Return, Operand::None).unwrap();

        let partition = BlockPartition::build(&instructions).unwrap();
        assert_eq!(partition.blocks()[0].target, Some(BlockId(0)));

        let graph = FlowGraph::from_partition(&partition).unwrap();
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.cyclomatic_complexity(), 1);
    }

    #[test]
    fn mutated_flow_graphs_recompute_complexity() {
        // iload_0; ifeq +5; iconst_1; ireturn; iconst_0; ireturn
        let instructions = decode(&[0x1a, 0x99, 0x00, 0x05, 0x04, 0xac, 0x03, 0xac]).unwrap();
        let partition = BlockPartition::build(&instructions).unwrap();
        let mut graph = FlowGraph::from_partition(&partition).unwrap();
        assert_eq!(graph.to_string(), "A: C B\nB:\nC:\n");
        assert_eq!(graph.cyclomatic_complexity(), 1);

        // Jump back from the second block to the first
        assert!(graph.graph_mut().add_edge(&BlockId(1), &BlockId(0)).unwrap());
        assert_eq!(graph.cyclomatic_complexity(), 2);
        assert_eq!(graph.to_string(), "A: C B\nB: A\nC:\n");

        // Vertices outside the partition print by index
        assert!(graph.graph_mut().add_vertex(BlockId(7)));
        assert_eq!(graph.components(), 2);
        assert_eq!(graph.cyclomatic_complexity(), 3 - 4 + 4);
        assert!(graph.to_string().ends_with("#7:\n"));
    }
}
