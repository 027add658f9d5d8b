//! The intermediate tree the compiler operates on.
//!
//! A program is an ordered list of sibling [`Node`]s; a [`NodeKind::Loop`]
//! owns its body as a nested list. Every node carries the 1-based source
//! position of the operator it was parsed from, which survives every
//! optimizer rewrite so the profiler can attribute samples back to source.

use std::io::{self, Write};

/// Maximum loop nesting depth the compiler accepts.
pub const MAX_NESTING: usize = 1000;

/// One operation in the intermediate tree.
///
/// All cell arithmetic is byte-wrapping. Offsets are relative to the cursor
/// *at the point of execution of the node*: after sequence rewriting they
/// generally differ from the parse-time cursor position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Advance the cursor by `count` cells (may be negative).
    MovePtr { count: i32 },
    /// Add `count` (mod 256) to the cell at `cursor + offset`.
    AddVal { count: i32, offset: i32 },
    /// Write the byte at `cursor + offset` to the console.
    Output { offset: i32 },
    /// Read one byte from the console into `cursor + offset`.
    /// On EOF the cell is left unchanged.
    Input { offset: i32 },
    /// Run `body` while the byte at `cursor` is nonzero.
    Loop { body: Vec<Node> },
    /// Store `value` (mod 256) into `cursor + offset`.
    SetConst { value: i32, offset: i32 },
    /// `tape[cursor + dst_offset] += multiplier * tape[cursor + src_offset]`,
    /// wrapping byte arithmetic.
    Mul {
        multiplier: i32,
        src_offset: i32,
        dst_offset: i32,
    },
    /// `tape[cursor + dst_offset] += tape[cursor + src_offset]`.
    ///
    /// Semantically `Mul` with multiplier 1; kept distinct because both back
    /// ends emit shorter code for it.
    CopyCell { src_offset: i32, dst_offset: i32 },
}

/// A node plus the source position of its opening character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    pub line: u32,
    pub column: u32,
}

impl Node {
    pub fn new(kind: NodeKind, line: u32, column: u32) -> Self {
        Node { kind, line, column }
    }

    /// The wire tag for this node, as used by the debug map and the folded
    /// profile output.
    pub fn tag(&self) -> NodeTag {
        match self.kind {
            NodeKind::MovePtr { .. } => NodeTag::MovePtr,
            NodeKind::AddVal { .. } => NodeTag::AddVal,
            NodeKind::Output { .. } => NodeTag::Output,
            NodeKind::Input { .. } => NodeTag::Input,
            NodeKind::Loop { .. } => NodeTag::Loop,
            NodeKind::SetConst { .. } => NodeTag::SetConst,
            NodeKind::Mul { .. } => NodeTag::Mul,
            NodeKind::CopyCell { .. } => NodeTag::CopyCell,
        }
    }

    /// The salient payload value for debug-map dumps: the count for moves and
    /// adds, the value for constants, the multiplier for `Mul`.
    pub fn payload_summary(&self) -> i32 {
        match self.kind {
            NodeKind::MovePtr { count } => count,
            NodeKind::AddVal { count, .. } => count,
            NodeKind::SetConst { value, .. } => value,
            NodeKind::Output { offset } | NodeKind::Input { offset } => offset,
            NodeKind::Mul { multiplier, .. } => multiplier,
            NodeKind::Loop { .. } | NodeKind::CopyCell { .. } => 0,
        }
    }
}

/// Wire names for the node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeTag {
    MovePtr,
    AddVal,
    Output,
    Input,
    Loop,
    SetConst,
    Mul,
    CopyCell,
}

impl NodeTag {
    pub fn name(self) -> &'static str {
        match self {
            NodeTag::MovePtr => "MOVE_PTR",
            NodeTag::AddVal => "ADD_VAL",
            NodeTag::Output => "OUTPUT",
            NodeTag::Input => "INPUT",
            NodeTag::Loop => "LOOP",
            NodeTag::SetConst => "SET_CONST",
            NodeTag::Mul => "MUL",
            NodeTag::CopyCell => "COPY_CELL",
        }
    }
}

/// Total number of nodes in the tree, loop bodies included.
pub fn count_nodes(nodes: &[Node]) -> u32 {
    let mut total = 0;
    visit_preorder(nodes, &mut |_, _| total += 1);
    total
}

/// Visit every node in depth-first pre-order, calling `f(index, node)`.
///
/// The index sequence is the canonical node numbering: the code generator
/// assigns debug-map entries with it and the profiler's folded-stack writer
/// walks it again, so both sides agree on which counter belongs to which
/// node without the tree carrying explicit ids.
pub fn visit_preorder(nodes: &[Node], f: &mut impl FnMut(u32, &Node)) {
    let mut next = 0;
    visit_inner(nodes, &mut next, f);
}

fn visit_inner(nodes: &[Node], next: &mut u32, f: &mut impl FnMut(u32, &Node)) {
    for node in nodes {
        let index = *next;
        *next += 1;
        f(index, node);
        if let NodeKind::Loop { body } = &node.kind {
            visit_inner(body, next, f);
        }
    }
}

/// Write an indented dump of the tree, one node per line.
pub fn dump_tree(nodes: &[Node], out: &mut impl Write) -> io::Result<()> {
    dump_level(nodes, 0, out)
}

fn dump_level(nodes: &[Node], indent: usize, out: &mut impl Write) -> io::Result<()> {
    for node in nodes {
        write!(out, "{:indent$}{}", "", node.tag().name(), indent = indent * 2)?;
        match &node.kind {
            NodeKind::MovePtr { count } => write!(out, " (count: {count})")?,
            NodeKind::AddVal { count, offset } => {
                write!(out, " (count: {count}, offset: {offset})")?
            }
            NodeKind::Output { offset } | NodeKind::Input { offset } => {
                write!(out, " (offset: {offset})")?
            }
            NodeKind::SetConst { value, offset } => {
                write!(out, " (value: {value}, offset: {offset})")?
            }
            NodeKind::Mul {
                multiplier,
                src_offset,
                dst_offset,
            } => write!(
                out,
                " (mult: {multiplier}, src: {src_offset}, dst: {dst_offset})"
            )?,
            NodeKind::CopyCell {
                src_offset,
                dst_offset,
            } => write!(out, " (src: {src_offset}, dst: {dst_offset})")?,
            NodeKind::Loop { .. } => {}
        }
        writeln!(out, " @{}:{}", node.line, node.column)?;
        if let NodeKind::Loop { body } = &node.kind {
            dump_level(body, indent + 1, out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(kind: NodeKind) -> Node {
        Node::new(kind, 1, 1)
    }

    #[test]
    fn preorder_numbers_loop_bodies_after_their_loop() {
        let tree = vec![
            node(NodeKind::AddVal { count: 1, offset: 0 }),
            node(NodeKind::Loop {
                body: vec![
                    node(NodeKind::Output { offset: 0 }),
                    node(NodeKind::Loop {
                        body: vec![node(NodeKind::MovePtr { count: 1 })],
                    }),
                ],
            }),
            node(NodeKind::Input { offset: 0 }),
        ];

        let mut seen = Vec::new();
        visit_preorder(&tree, &mut |idx, n| seen.push((idx, n.tag().name())));
        assert_eq!(
            seen,
            vec![
                (0, "ADD_VAL"),
                (1, "LOOP"),
                (2, "OUTPUT"),
                (3, "LOOP"),
                (4, "MOVE_PTR"),
                (5, "INPUT"),
            ]
        );
        assert_eq!(count_nodes(&tree), 6);
    }

    #[test]
    fn dump_includes_payloads_and_locations() {
        let tree = vec![Node::new(
            NodeKind::Mul {
                multiplier: 3,
                src_offset: 0,
                dst_offset: 2,
            },
            4,
            7,
        )];
        let mut out = Vec::new();
        dump_tree(&tree, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "MUL (mult: 3, src: 0, dst: 2) @4:7\n");
    }
}
