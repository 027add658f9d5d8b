//! PC-offset → IR-node mapping for the profiler and debug dumps.
//!
//! One entry is recorded per emitted node, at the instruction-stream offset
//! where its template begins. Samples taken anywhere inside a template
//! resolve to the entry with the largest offset at or before the sampled PC.

use std::io::{self, Write};

use crate::ast::{Node, NodeTag};

/// One node's span in the emitted code.
#[derive(Debug, Clone)]
pub struct DebugEntry {
    /// Monotonic debug-label number, in emission order.
    pub label_id: u32,
    /// Byte offset of the node's first instruction within the code buffer.
    pub pc_offset: usize,
    /// The node's position in the canonical pre-order numbering; indexes the
    /// profiler's per-node counters.
    pub node_index: u32,
    pub line: u32,
    pub column: u32,
    pub tag: NodeTag,
    /// Salient payload value (count / value / multiplier), for dumps.
    pub summary: i32,
}

/// Grow-only map from PC offsets to IR nodes, attached to the executable
/// region once that exists.
#[derive(Debug, Default)]
pub struct DebugMap {
    entries: Vec<DebugEntry>,
    code_start: usize,
    code_size: usize,
}

impl DebugMap {
    pub fn new() -> Self {
        DebugMap::default()
    }

    /// Append a mapping for `node`, emitted at `pc_offset`.
    pub fn add_mapping(&mut self, label_id: u32, pc_offset: usize, node_index: u32, node: &Node) {
        self.entries.push(DebugEntry {
            label_id,
            pc_offset,
            node_index,
            line: node.line,
            column: node.column,
            tag: node.tag(),
            summary: node.payload_summary(),
        });
    }

    /// Record where the code got mapped. Must happen before `find_by_pc`.
    pub fn attach_code(&mut self, code_start: usize, code_size: usize) {
        self.code_start = code_start;
        self.code_size = code_size;
    }

    pub fn code_start(&self) -> usize {
        self.code_start
    }

    pub fn code_size(&self) -> usize {
        self.code_size
    }

    pub fn entries(&self) -> &[DebugEntry] {
        &self.entries
    }

    /// The entry whose span contains `pc` (an absolute address), i.e. the
    /// one with the largest `pc_offset <= pc - code_start`.
    ///
    /// Linear scan; the profiler samples at 1 kHz so this is nowhere near a
    /// hot path, and it keeps the signal handler free of preprocessing.
    pub fn find_by_pc(&self, pc: usize) -> Option<&DebugEntry> {
        let offset = pc.checked_sub(self.code_start)?;
        if offset >= self.code_size {
            return None;
        }

        let mut best: Option<&DebugEntry> = None;
        for entry in &self.entries {
            if entry.pc_offset <= offset
                && best.is_none_or(|b| entry.pc_offset > b.pc_offset)
            {
                best = Some(entry);
            }
        }
        best
    }

    /// Human-readable dump of all mappings.
    pub fn dump(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "# Debug mappings: {} entries", self.entries.len())?;
        writeln!(out, "# Format: pc_offset node line:col [payload]")?;
        for entry in &self.entries {
            write!(
                out,
                "{:#06x} {} {}:{}",
                entry.pc_offset,
                entry.tag.name(),
                entry.line,
                entry.column
            )?;
            match entry.tag {
                NodeTag::MovePtr | NodeTag::AddVal | NodeTag::SetConst | NodeTag::Mul => {
                    write!(out, " [{}]", entry.summary)?;
                }
                _ => {}
            }
            writeln!(out)?;
        }
        Ok(())
    }

    /// Write a perf map file (`/tmp/perf-<pid>.map`) covering the compiled
    /// program, so external profilers can attribute the JIT region.
    pub fn write_perf_map(&self) {
        let path = format!("/tmp/perf-{}.map", std::process::id());
        let Ok(mut f) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
        else {
            return;
        };
        let _ = writeln!(
            f,
            "{:x} {:x} bf_jit_program",
            self.code_start, self.code_size
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::NodeKind;

    fn map_with_entries() -> DebugMap {
        let mut map = DebugMap::new();
        let nodes = [
            Node::new(NodeKind::AddVal { count: 3, offset: 0 }, 1, 1),
            Node::new(NodeKind::Loop { body: Vec::new() }, 1, 4),
            Node::new(NodeKind::Output { offset: 0 }, 1, 5),
        ];
        map.add_mapping(0, 0, 0, &nodes[0]);
        map.add_mapping(1, 8, 1, &nodes[1]);
        map.add_mapping(2, 20, 2, &nodes[2]);
        map.attach_code(0x1000, 64);
        map
    }

    #[test]
    fn find_by_pc_picks_the_enclosing_span() {
        let map = map_with_entries();
        assert_eq!(map.find_by_pc(0x1000).unwrap().label_id, 0);
        assert_eq!(map.find_by_pc(0x1007).unwrap().label_id, 0);
        assert_eq!(map.find_by_pc(0x1008).unwrap().label_id, 1);
        assert_eq!(map.find_by_pc(0x1030).unwrap().label_id, 2);
    }

    #[test]
    fn find_by_pc_rejects_addresses_outside_the_code() {
        let map = map_with_entries();
        assert!(map.find_by_pc(0x0FFF).is_none());
        assert!(map.find_by_pc(0x1000 + 64).is_none());
    }

    #[test]
    fn dump_lists_payloads_for_value_carrying_nodes() {
        let map = map_with_entries();
        let mut out = Vec::new();
        map.dump(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("ADD_VAL 1:1 [3]"));
        assert!(text.contains("LOOP 1:4\n"));
        assert!(text.contains("OUTPUT 1:5\n"));
    }
}
