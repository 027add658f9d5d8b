use dynasmrt::{dynasm, AssemblyOffset, DynamicLabel, DynasmApi, DynasmLabelApi, ExecutableBuffer};

use crate::Error;

pub type Assembler = dynasmrt::x64::Assembler;

/// Emission context — wraps the assembler plus label bookkeeping.
///
/// One instance emits one whole program: `prologue`, the node templates in
/// tree order, `epilogue`, then `finalize` to obtain the executable mapping.
pub struct EmitCtx {
    pub ops: Assembler,
}

// Register assignments (System V AMD64 ABI):
//   r12 = tape cursor (callee-saved, survives intrinsic calls)
//
// Scratch (caller-saved):
//   rax = intrinsic fn ptr loads, byte temporaries, return value
//   edi = intrinsic argument
//
// The entry convention is fn(tape_ptr: *mut u8) -> i32 with tape_ptr in rdi.
impl EmitCtx {
    /// Create a new EmitCtx. Does not emit any code.
    pub fn new() -> Result<Self, Error> {
        let ops = Assembler::new().map_err(|e| Error::Assemble(e.to_string()))?;
        Ok(EmitCtx { ops })
    }

    /// Current offset into the instruction stream. Final for already-emitted
    /// code; the debug map records these as PC offsets.
    pub fn offset(&self) -> AssemblyOffset {
        self.ops.offset()
    }

    /// Allocate a new dynamic label.
    pub fn new_label(&mut self) -> DynamicLabel {
        self.ops.new_dynamic_label()
    }

    /// Bind a dynamic label at the current position.
    pub fn bind_label(&mut self, label: DynamicLabel) {
        dynasm!(self.ops
            ; .arch x64
            ; =>label
        );
    }

    /// Emit the function prologue: save callee-saved state, move the tape
    /// pointer into the cursor register.
    pub fn prologue(&mut self) {
        // On entry rsp is 8 mod 16 (the caller's `call` pushed the return
        // address). push rbp + push r12 + an 8-byte pad realign it so every
        // intrinsic call site below sits on a 16-byte boundary.
        dynasm!(self.ops
            ; .arch x64
            ; push rbp
            ; mov rbp, rsp
            ; push r12
            ; sub rsp, 8
            ; mov r12, rdi
        );
    }

    /// Emit the epilogue: restore state and return 0.
    pub fn epilogue(&mut self) {
        dynasm!(self.ops
            ; .arch x64
            ; xor eax, eax
            ; add rsp, 8
            ; pop r12
            ; pop rbp
            ; ret
        );
    }

    /// `cursor += count`. With `probe` set, a discarded byte load through the
    /// new cursor follows, so an out-of-range cursor faults here against the
    /// guard page instead of at some later access.
    pub fn move_ptr(&mut self, count: i32, probe: bool) {
        dynasm!(self.ops
            ; .arch x64
            ; add r12, count
        );
        if probe {
            dynasm!(self.ops
                ; .arch x64
                ; movzx eax, BYTE [r12]
            );
        }
    }

    /// `tape[cursor + offset] += count` (mod 256).
    pub fn add_val(&mut self, count: i32, offset: i32) {
        dynasm!(self.ops
            ; .arch x64
            ; add BYTE [r12 + offset], count as i8
        );
    }

    /// `tape[cursor + offset] = value` (mod 256).
    pub fn set_const(&mut self, value: i32, offset: i32) {
        dynasm!(self.ops
            ; .arch x64
            ; mov BYTE [r12 + offset], value as i8
        );
    }

    /// Call `fn_ptr(tape[cursor + offset])` — the console write intrinsic.
    pub fn output(&mut self, offset: i32, fn_ptr: *const u8) {
        let ptr_val = fn_ptr as i64;
        dynasm!(self.ops
            ; .arch x64
            ; movzx edi, BYTE [r12 + offset]
            ; mov rax, QWORD ptr_val
            ; call rax
        );
    }

    /// Call `fn_ptr()` — the console read intrinsic — and store the low byte
    /// at `cursor + offset`. A negative return means EOF: the cell is left
    /// unchanged.
    pub fn input(&mut self, offset: i32, fn_ptr: *const u8) {
        let ptr_val = fn_ptr as i64;
        let eof = self.ops.new_dynamic_label();
        dynasm!(self.ops
            ; .arch x64
            ; mov rax, QWORD ptr_val
            ; call rax
            ; test eax, eax
            ; js =>eof
            ; mov BYTE [r12 + offset], al
            ; =>eof
        );
    }

    /// Loop entry: test the current cell, skip past the loop when zero, and
    /// bind the back-edge target.
    pub fn loop_head(&mut self, start: DynamicLabel, end: DynamicLabel) {
        dynasm!(self.ops
            ; .arch x64
            ; cmp BYTE [r12], 0
            ; jz =>end
            ; =>start
        );
    }

    /// Loop exit: re-test the current cell, branch back while nonzero, and
    /// bind the exit label.
    pub fn loop_tail(&mut self, start: DynamicLabel, end: DynamicLabel) {
        dynasm!(self.ops
            ; .arch x64
            ; cmp BYTE [r12], 0
            ; jnz =>start
            ; =>end
        );
    }

    /// `tape[cursor + dst] += multiplier * tape[cursor + src]` (mod 256).
    pub fn mul(&mut self, multiplier: i32, src_offset: i32, dst_offset: i32) {
        dynasm!(self.ops
            ; .arch x64
            ; movzx eax, BYTE [r12 + src_offset]
            ; imul eax, eax, multiplier
            ; add BYTE [r12 + dst_offset], al
        );
    }

    /// `tape[cursor + dst] += tape[cursor + src]` — the unit-multiplier case,
    /// one instruction shorter than `mul`.
    pub fn copy_cell(&mut self, src_offset: i32, dst_offset: i32) {
        dynasm!(self.ops
            ; .arch x64
            ; mov al, BYTE [r12 + src_offset]
            ; add BYTE [r12 + dst_offset], al
        );
    }

    /// Commit and finalize the assembler, returning the executable buffer.
    ///
    /// Consuming `self` here is what enforces the ordering rule: once the
    /// buffer exists there is no assembler left to emit into or resolve
    /// against.
    pub fn finalize(mut self) -> Result<ExecutableBuffer, Error> {
        self.ops
            .commit()
            .map_err(|e| Error::Assemble(e.to_string()))?;
        self.ops
            .finalize()
            .map_err(|_| Error::Assemble("executable buffer still referenced".into()))
    }
}
