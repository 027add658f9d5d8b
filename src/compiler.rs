//! Architecture-neutral emission driver.
//!
//! Walks the IR once, in order. Each `Loop` gets a start/end label pair; the
//! body is emitted between `loop_head` and `loop_tail` so the branch shape is
//! identical at every nesting level. When debug info is requested, every node
//! is recorded in the [`DebugMap`] at the offset where its template begins —
//! with dynasmrt those offsets are final the moment they are taken, and
//! `EmitCtx::finalize` consuming the assembler guarantees nothing shifts
//! afterwards.

use dynasmrt::{AssemblyOffset, ExecutableBuffer};

use crate::arch::EmitCtx;
use crate::ast::{Node, NodeKind};
use crate::debug_map::DebugMap;
use crate::runtime;
use crate::Error;

#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Elide the inline guard probes after cursor moves.
    pub unsafe_mode: bool,
    /// Record a debug-map entry per node (needed by the profiler).
    pub debug_info: bool,
}

/// A compiled program. Owns the executable buffer containing the JIT'd
/// machine code; the mapping is read-execute and immutable for its lifetime.
pub struct CompiledProgram {
    buf: ExecutableBuffer,
    entry: AssemblyOffset,
    func: unsafe extern "C" fn(*mut u8) -> i32,
    debug: Option<DebugMap>,
}

impl CompiledProgram {
    /// The raw executable code bytes.
    pub fn code(&self) -> &[u8] {
        &self.buf
    }

    /// Absolute address of the first instruction.
    pub fn code_start(&self) -> usize {
        self.buf.ptr(self.entry) as usize
    }

    pub fn debug_map(&self) -> Option<&DebugMap> {
        self.debug.as_ref()
    }

    /// Hand the debug map to the profiler.
    pub fn take_debug_map(&mut self) -> Option<DebugMap> {
        self.debug.take()
    }

    /// Run the program against `tape`. Returns the emitted code's exit value
    /// (0 on success).
    ///
    /// The only failure mode is a tape fault, delivered as a fatal signal,
    /// never as a return value.
    pub fn run(&self, tape: &mut crate::tape::Tape) -> i32 {
        unsafe { (self.func)(tape.entry_ptr()) }
    }
}

struct Emitter<'opts> {
    ectx: EmitCtx,
    opts: &'opts CompileOptions,
    debug: Option<DebugMap>,
    next_label_id: u32,
    next_node_index: u32,
}

/// Compile the IR into executable machine code for the host.
pub fn compile(program: &[Node], opts: &CompileOptions) -> Result<CompiledProgram, Error> {
    let mut emitter = Emitter {
        ectx: EmitCtx::new()?,
        opts,
        debug: opts.debug_info.then(DebugMap::new),
        next_label_id: 0,
        next_node_index: 0,
    };

    emitter.ectx.prologue();
    emitter.emit_seq(program);
    emitter.ectx.epilogue();

    let Emitter { ectx, debug, .. } = emitter;
    let buf = ectx.finalize()?;

    let entry = AssemblyOffset(0);
    // SAFETY: the buffer holds a complete function emitted for the host ABI
    // with its entry at offset 0.
    let func: unsafe extern "C" fn(*mut u8) -> i32 =
        unsafe { core::mem::transmute(buf.ptr(entry)) };

    let mut debug = debug;
    if let Some(map) = &mut debug {
        map.attach_code(buf.ptr(entry) as usize, buf.len());
    }

    log::debug!(
        "compiled {} bytes of machine code ({} debug entries)",
        buf.len(),
        debug.as_ref().map_or(0, |d| d.entries().len()),
    );

    Ok(CompiledProgram {
        buf,
        entry,
        func,
        debug,
    })
}

impl Emitter<'_> {
    fn emit_seq(&mut self, nodes: &[Node]) {
        for node in nodes {
            let node_index = self.next_node_index;
            self.next_node_index += 1;

            if let Some(map) = &mut self.debug {
                let label_id = self.next_label_id;
                self.next_label_id += 1;
                map.add_mapping(label_id, self.ectx.offset().0, node_index, node);
            }

            match &node.kind {
                NodeKind::MovePtr { count } => {
                    self.ectx.move_ptr(*count, !self.opts.unsafe_mode);
                }
                NodeKind::AddVal { count, offset } => {
                    self.ectx.add_val(*count, *offset);
                }
                NodeKind::Output { offset } => {
                    self.ectx
                        .output(*offset, runtime::bf_putchar as *const u8);
                }
                NodeKind::Input { offset } => {
                    self.ectx.input(*offset, runtime::bf_getchar as *const u8);
                }
                NodeKind::SetConst { value, offset } => {
                    self.ectx.set_const(*value, *offset);
                }
                NodeKind::Mul {
                    multiplier,
                    src_offset,
                    dst_offset,
                } => {
                    self.ectx.mul(*multiplier, *src_offset, *dst_offset);
                }
                NodeKind::CopyCell {
                    src_offset,
                    dst_offset,
                } => {
                    self.ectx.copy_cell(*src_offset, *dst_offset);
                }
                NodeKind::Loop { body } => {
                    let start = self.ectx.new_label();
                    let end = self.ectx.new_label();
                    self.ectx.loop_head(start, end);
                    self.emit_seq(body);
                    self.ectx.loop_tail(start, end);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opt::optimize;
    use crate::parse::parse;
    use crate::tape::Tape;

    fn run_program(src: &str, optimized: bool) -> Tape {
        let mut nodes = parse(src.as_bytes()).unwrap();
        if optimized {
            optimize(&mut nodes);
        }
        let program = compile(&nodes, &CompileOptions::default()).unwrap();
        let mut tape = Tape::new(65536, 4096).unwrap();
        assert_eq!(program.run(&mut tape), 0);
        tape
    }

    #[test]
    fn empty_program_produces_runnable_prologue_and_epilogue() {
        let program = compile(&[], &CompileOptions::default()).unwrap();
        assert!(!program.code().is_empty());
        let mut tape = Tape::new(4096, 0).unwrap();
        assert_eq!(program.run(&mut tape), 0);
    }

    #[test]
    fn multiplication_program_leaves_the_expected_cells() {
        let tape = run_program("+++[>++<-]", true);
        assert_eq!(tape.cell(0), 0);
        assert_eq!(tape.cell(1), 6);
        assert_eq!(tape.cell(2), 0);
    }

    #[test]
    fn offset_add_collapse_keeps_the_cursor_in_place() {
        let tape = run_program(">+<++", true);
        assert_eq!(tape.cell(0), 2);
        assert_eq!(tape.cell(1), 1);
    }

    #[test]
    fn cell_arithmetic_wraps_at_byte_range() {
        // 2 * (8 * (8 * 2)) = 256 ≡ 0 (mod 256) accumulated into cell 3.
        let tape = run_program("++[>++++++++[>++++++++[>++<-]<-]<-]", true);
        assert_eq!(tape.cell(3), 0);
        assert_eq!(tape.cell(0), 0);
    }

    #[test]
    fn optimized_and_unoptimized_runs_agree_on_tape_state() {
        for src in [
            "+++[>++<-]",
            ">+<",
            "+++++[-]",
            "++>+++<[->>+<<]",
            "-[->-<]",
            "++++[>++++[>++++<-]<-]",
        ] {
            let fast = run_program(src, true);
            let slow = run_program(src, false);
            for i in 0..32 {
                assert_eq!(fast.cell(i), slow.cell(i), "cell {i} of {src:?}");
            }
        }
    }

    #[test]
    fn unsafe_mode_matches_safe_mode_within_the_tape() {
        let mut nodes = parse(b"+++[>++<-]>>+++<<").unwrap();
        optimize(&mut nodes);

        let safe = compile(&nodes, &CompileOptions::default()).unwrap();
        let fast = compile(
            &nodes,
            &CompileOptions {
                unsafe_mode: true,
                debug_info: false,
            },
        )
        .unwrap();

        let mut tape_a = Tape::new(65536, 4096).unwrap();
        let mut tape_b = Tape::new(65536, 4096).unwrap();
        safe.run(&mut tape_a);
        fast.run(&mut tape_b);
        for i in 0..8 {
            assert_eq!(tape_a.cell(i), tape_b.cell(i));
        }
        // The unsafe build drops the probes, so it can only be smaller.
        assert!(fast.code().len() <= safe.code().len());
    }

    #[test]
    fn debug_info_records_one_entry_per_node_in_preorder() {
        let mut nodes = parse(b"+[>.<-]").unwrap();
        optimize(&mut nodes);
        let node_count = crate::ast::count_nodes(&nodes);

        let program = compile(
            &nodes,
            &CompileOptions {
                unsafe_mode: false,
                debug_info: true,
            },
        )
        .unwrap();
        let map = program.debug_map().unwrap();
        assert_eq!(map.entries().len() as u32, node_count);

        // Offsets are monotonically nondecreasing in emission order, and the
        // node indices match the canonical numbering.
        let mut last = 0;
        for (i, entry) in map.entries().iter().enumerate() {
            assert!(entry.pc_offset >= last);
            last = entry.pc_offset;
            assert_eq!(entry.node_index, i as u32);
            assert_eq!(entry.label_id, i as u32);
        }
        assert_eq!(map.code_size(), program.code().len());
    }

    #[test]
    fn deeply_nested_loops_compile() {
        let mut src = vec![b'+'; 1];
        src.extend(vec![b'['; crate::ast::MAX_NESTING]);
        src.push(b'-');
        src.extend(vec![b']'; crate::ast::MAX_NESTING]);
        let nodes = parse(&src).unwrap();
        let program = compile(&nodes, &CompileOptions::default()).unwrap();
        let mut tape = Tape::new(65536, 4096).unwrap();
        assert_eq!(program.run(&mut tape), 0);
        assert_eq!(tape.cell(0), 0);
    }
}
