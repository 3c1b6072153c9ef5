//! Jump Tracer (C1): observes the opcode stream of one instrumented execution
//! and records every taken jump as a [`Jump`].
use crate::path::{Jump, Path};
use crate::types::{Address, Word};

const OP_JUMP: u8 = 0x56;
const OP_JUMPI: u8 = 0x57;

/// A read-only view of the interpreter stack at the moment an opcode is about
/// to execute, with index 0 being the top of stack. Kept as a trait so the
/// tracer can be exercised without constructing a real EVM interpreter.
pub trait StackView {
    fn len(&self) -> usize;
    fn peek(&self, idx_from_top: usize) -> Word;
}

impl StackView for Vec<Word> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn peek(&self, idx_from_top: usize) -> Word {
        self[self.len() - 1 - idx_from_top]
    }
}

/// The context of an opcode about to execute: which contract is running and
/// what its operand stack currently holds.
pub struct OpcodeContext<'a> {
    pub address: Address,
    pub stack: &'a dyn StackView,
}

/// Records `(contract, pc_from, pc_to)` for every taken `JUMP`/`JUMPI`.
///
/// Owned by the EVM harness for the duration of exactly one `execute()` call:
/// construction implicitly starts recording, and [`JumpTracer::stop`] consumes
/// the tracer and freezes the accumulated [`Path`].
pub struct JumpTracer {
    path: Path,
    active: bool,
}

impl JumpTracer {
    /// Begin recording. The tracer is active immediately.
    pub fn start() -> Self {
        Self {
            path: Path::new(),
            active: true,
        }
    }

    /// The path recorded so far, without ending the trace.
    pub fn current(&self) -> &Path {
        &self.path
    }

    /// Freeze the trace and hand back the recorded [`Path`]. After this call
    /// the tracer no longer accepts opcode callbacks.
    pub fn stop(mut self) -> Path {
        self.active = false;
        self.path
    }

    /// Feed one opcode observation. Outside the `start()`..`stop()` window,
    /// or on malformed stack depth, this is a no-op rather than a fault.
    pub fn on_opcode(&mut self, pc: u64, op: u8, ctx: OpcodeContext) {
        if !self.active {
            return;
        }
        match op {
            OP_JUMP => {
                if ctx.stack.len() >= 1 {
                    let dest = as_u64(ctx.stack.peek(0));
                    self.path.push(Jump::new(ctx.address, pc, dest));
                }
            }
            OP_JUMPI => {
                if ctx.stack.len() >= 2 {
                    // Per the recording rule, the condition word is the top of
                    // stack and the destination pushed onto the path is the
                    // word immediately beneath it.
                    let cond = ctx.stack.peek(0);
                    let dest = ctx.stack.peek(1);
                    if !cond.is_zero() {
                        self.path.push(Jump::new(ctx.address, pc, as_u64(dest)));
                    }
                }
            }
            _ => {}
        }
    }

    pub fn mark_failed(&mut self) {
        self.path.ok = false;
    }

    pub fn set_gas_used(&mut self, gas_used: u64) {
        self.path.gas_used = gas_used;
    }
}

fn as_u64(w: Word) -> u64 {
    w.low_u64()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(address: Address, stack: &'a Vec<Word>) -> OpcodeContext<'a> {
        OpcodeContext { address, stack }
    }

    #[test]
    fn jump_records_top_of_stack_as_destination() {
        let mut tracer = JumpTracer::start();
        let addr = Address::repeat_byte(1);
        let stack = vec![Word::from(0x20)];
        tracer.on_opcode(10, OP_JUMP, ctx(addr, &stack));
        let path = tracer.stop();
        assert_eq!(path.len(), 1);
        assert_eq!(path.jumps()[0], Jump::new(addr, 10, 0x20));
    }

    #[test]
    fn jump_is_noop_on_empty_stack() {
        let mut tracer = JumpTracer::start();
        let stack: Vec<Word> = vec![];
        tracer.on_opcode(10, OP_JUMP, ctx(Address::zero(), &stack));
        assert!(tracer.stop().is_empty());
    }

    #[test]
    fn jumpi_records_only_when_condition_nonzero() {
        let addr = Address::repeat_byte(2);

        let mut taken = JumpTracer::start();
        // Vec-as-stack is bottom-to-top; peek(0) (condition) is the last
        // element, peek(1) (destination) is the one beneath it.
        let stack_taken = vec![Word::from(0x30), Word::from(1)];
        taken.on_opcode(5, OP_JUMPI, ctx(addr, &stack_taken));
        let path = taken.stop();
        assert_eq!(path.len(), 1);
        assert_eq!(path.jumps()[0].to_pc, 0x30);

        let mut not_taken = JumpTracer::start();
        let stack_not_taken = vec![Word::from(0x30), Word::zero()];
        not_taken.on_opcode(5, OP_JUMPI, ctx(addr, &stack_not_taken));
        assert!(not_taken.stop().is_empty());
    }

    #[test]
    fn jumpi_is_noop_on_shallow_stack() {
        let mut tracer = JumpTracer::start();
        let stack = vec![Word::from(1)];
        tracer.on_opcode(5, OP_JUMPI, ctx(Address::zero(), &stack));
        assert!(tracer.stop().is_empty());
    }

    #[test]
    fn callbacks_outside_active_window_are_ignored() {
        let tracer = JumpTracer::start();
        let path = tracer.stop();
        assert!(path.is_empty());
    }

    #[test]
    fn other_opcodes_never_affect_the_path() {
        let mut tracer = JumpTracer::start();
        let stack = vec![Word::from(1), Word::from(2), Word::from(3)];
        tracer.on_opcode(0, 0x01, ctx(Address::zero(), &stack)); // ADD
        tracer.on_opcode(1, 0x54, ctx(Address::zero(), &stack)); // SLOAD
        assert!(tracer.stop().is_empty());
    }
}
