//! Labeled instruction sequences and their assembly into code units.
//!
//! The compiler emits [`Instr`]s whose jump arguments are [`Label`]s and
//! whose exception handler is recorded per instruction. Assembly then:
//!
//! 1. picks the jump direction from label positions and grows each jump
//!    until its `EXTENDED_ARG` prefixes fit the distance (a fixpoint, since
//!    sizes only grow),
//! 2. simulates the stack along every edge, handler edges included, to find
//!    the maximum depth,
//! 3. groups consecutive instructions with the same handler into exception
//!    table ranges, and
//! 4. feeds the resolved instructions through the [`Encoder`].

use crate::bytecode::{CodeHeader, CodeUnit, Encoder, Opcode};
use shroud_core::{ShroudError, ShroudResult};

/// Upper bound on the simulated stack depth; reaching it means the
/// instruction stream leaks stack entries around a loop.
const MAX_STACK_DEPTH: i32 = 1 << 16;

/// A jump target inside one instruction sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

/// The exception handler covering an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handler {
    /// Handler entry.
    pub label: Label,
    /// Stack depth to unwind to.
    pub depth: u32,
    /// Whether the raising offset is pushed below the exception.
    pub lasti: bool,
}

/// Instruction argument before assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrArg {
    /// No argument.
    None,
    /// A resolved value.
    Value(u32),
    /// A jump to a label.
    Jump(Label),
}

/// One instruction of a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instr {
    /// Operation. For jumps the direction is fixed up during assembly.
    pub op: Opcode,
    /// Argument.
    pub arg: InstrArg,
    /// Active exception handler.
    pub handler: Option<Handler>,
}

/// An instruction list with its label bindings.
#[derive(Debug, Default, Clone)]
pub struct InstrSeq {
    instrs: Vec<Instr>,
    labels: Vec<Option<usize>>,
}

impl InstrSeq {
    /// Create an empty sequence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an unbound label.
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() as u32 - 1)
    }

    /// Bind `label` to the next instruction.
    pub fn bind(&mut self, label: Label) -> ShroudResult<()> {
        let slot = self
            .labels
            .get_mut(label.0 as usize)
            .ok_or_else(|| ShroudError::internal("unknown label"))?;
        if slot.is_some() {
            return Err(ShroudError::internal(format!("label {} bound twice", label.0)));
        }
        *slot = Some(self.instrs.len());
        Ok(())
    }

    /// Append an instruction.
    pub fn push(&mut self, instr: Instr) {
        self.instrs.push(instr);
    }

    /// Instructions so far.
    #[must_use]
    pub fn instrs(&self) -> &[Instr] {
        &self.instrs
    }

    /// Number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    /// Whether the sequence is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    /// Whether the last instruction never falls through.
    #[must_use]
    pub fn ends_with_terminator(&self) -> bool {
        self.instrs.last().is_some_and(|i| i.op.is_terminator())
    }

    fn target(&self, label: Label) -> ShroudResult<usize> {
        self.labels
            .get(label.0 as usize)
            .copied()
            .flatten()
            .ok_or_else(|| ShroudError::internal(format!("label {} never bound", label.0)))
    }
}

/// Resolved layout of a sequence.
struct Layout {
    ops: Vec<Opcode>,
    args: Vec<u32>,
    offsets: Vec<u32>,
    total: u32,
}

impl Layout {
    fn offset_of(&self, index: usize) -> u32 {
        self.offsets.get(index).copied().unwrap_or(self.total)
    }
}

fn directed(op: Opcode, backward: bool) -> ShroudResult<Opcode> {
    let wrong_way = if backward {
        op.is_forward_jump()
    } else {
        op.is_backward_jump()
    };
    if !wrong_way {
        return Ok(op);
    }
    let flipped = op.reversed_direction();
    if flipped == op {
        return Err(ShroudError::internal(format!(
            "{op} cannot jump {}",
            if backward { "backward" } else { "forward" }
        )));
    }
    Ok(flipped)
}

fn layout(seq: &InstrSeq) -> ShroudResult<Layout> {
    let n = seq.instrs.len();
    let mut ops = Vec::with_capacity(n);
    let mut args = vec![0u32; n];
    let mut targets = vec![None; n];
    for (i, instr) in seq.instrs.iter().enumerate() {
        match instr.arg {
            InstrArg::None => ops.push(instr.op),
            InstrArg::Value(v) => {
                ops.push(instr.op);
                args[i] = v;
            }
            InstrArg::Jump(label) => {
                let target = seq.target(label)?;
                ops.push(directed(instr.op, target <= i)?);
                targets[i] = Some(target);
            }
        }
    }

    let mut sizes: Vec<u32> = ops
        .iter()
        .zip(&args)
        .map(|(op, arg)| Encoder::instruction_size(*op, *arg))
        .collect();
    let mut offsets = vec![0u32; n];
    loop {
        let mut at = 0;
        for (offset, size) in offsets.iter_mut().zip(&sizes) {
            *offset = at;
            at += size;
        }
        let total = at;
        let offset_of = |j: usize| offsets.get(j).copied().unwrap_or(total);

        let mut grew = false;
        for i in 0..n {
            let Some(target) = targets[i] else { continue };
            let next = offsets[i] + sizes[i];
            let to = offset_of(target);
            args[i] = if target <= i { (next - to) / 2 } else { (to - next) / 2 };
            let size = Encoder::instruction_size(ops[i], args[i]);
            if size > sizes[i] {
                sizes[i] = size;
                grew = true;
            }
        }
        if !grew {
            return Ok(Layout {
                ops,
                args,
                offsets,
                total,
            });
        }
    }
}

fn max_stack_depth(seq: &InstrSeq, layout: &Layout) -> ShroudResult<u32> {
    let n = seq.instrs.len();
    let mut seen: Vec<Option<i32>> = vec![None; n];
    let mut work: Vec<(usize, i32)> = vec![(0, 0)];
    let mut max = 0;
    while let Some((i, depth)) = work.pop() {
        if i >= n {
            continue;
        }
        if seen[i].is_some_and(|prev| prev >= depth) {
            continue;
        }
        seen[i] = Some(depth);
        let instr = &seq.instrs[i];
        let (op, arg) = (layout.ops[i], layout.args[i]);

        let mut visit = |to: usize, d: i32| -> ShroudResult<()> {
            if d < 0 {
                return Err(ShroudError::internal(format!("stack underflow at instruction {i} ({op})")));
            }
            if d > MAX_STACK_DEPTH {
                return Err(ShroudError::internal(format!("unbounded stack growth at instruction {i} ({op})")));
            }
            max = max.max(d);
            work.push((to, d));
            Ok(())
        };

        if let Some(handler) = instr.handler {
            let d = handler.depth as i32 + i32::from(handler.lasti) + 1;
            visit(seq.target(handler.label)?, d)?;
        }
        if let InstrArg::Jump(label) = instr.arg {
            visit(seq.target(label)?, depth + op.stack_effect(arg, true))?;
        }
        if !op.is_terminator() {
            visit(i + 1, depth + op.stack_effect(arg, false))?;
        }
    }
    Ok(max as u32)
}

/// Assemble `seq` into a code unit. `encoder` carries the pools the
/// compiler filled while emitting.
pub fn assemble(seq: &InstrSeq, mut encoder: Encoder, mut header: CodeHeader) -> ShroudResult<CodeUnit> {
    let layout = layout(seq)?;
    header.stacksize = max_stack_depth(seq, &layout)?;

    let mut start = 0;
    while start < seq.instrs.len() {
        let handler = seq.instrs[start].handler;
        let mut end = start + 1;
        while end < seq.instrs.len() && seq.instrs[end].handler == handler {
            end += 1;
        }
        if let Some(h) = handler {
            encoder.add_exception_entry(
                layout.offset_of(start),
                layout.offset_of(end),
                layout.offset_of(seq.target(h.label)?),
                h.depth,
                h.lasti,
            )?;
        }
        start = end;
    }

    for i in 0..seq.instrs.len() {
        let offset = encoder.emit(layout.ops[i], layout.args[i])?;
        if offset != layout.offsets[i] {
            return Err(ShroudError::internal(format!(
                "instruction {i} landed at {offset}, expected {}",
                layout.offsets[i]
            )));
        }
    }
    tracing::trace!(
        name = %header.qualname,
        bytes = layout.total,
        stacksize = header.stacksize,
        "assembled code unit"
    );
    encoder.pack(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::decode_table;

    fn plain(op: Opcode, arg: u32) -> Instr {
        Instr {
            op,
            arg: if op.has_arg() { InstrArg::Value(arg) } else { InstrArg::None },
            handler: None,
        }
    }

    fn jump(op: Opcode, label: Label) -> Instr {
        Instr {
            op,
            arg: InstrArg::Jump(label),
            handler: None,
        }
    }

    #[test]
    fn test_forward_and_backward_jumps() {
        let mut seq = InstrSeq::new();
        let top = seq.new_label();
        let end = seq.new_label();
        seq.bind(top).unwrap();
        seq.push(plain(Opcode::LoadConst, 0));
        seq.push(jump(Opcode::PopJumpForwardIfFalse, end));
        seq.push(jump(Opcode::JumpForward, top));
        seq.bind(end).unwrap();
        seq.push(plain(Opcode::LoadConst, 0));
        seq.push(plain(Opcode::ReturnValue, 0));

        let mut encoder = Encoder::new();
        encoder.add_const(crate::bytecode::Constant::None).unwrap();
        let code = assemble(&seq, encoder, CodeHeader::default()).unwrap();
        assert_eq!(
            code.code,
            [100, 0, 114, 1, 140, 3, 100, 0, 83, 0],
            "{code}"
        );
        assert_eq!(code.stacksize, 1);
    }

    #[test]
    fn test_long_jump_gets_prefix() {
        let mut seq = InstrSeq::new();
        let end = seq.new_label();
        seq.push(jump(Opcode::JumpForward, end));
        for _ in 0..300 {
            seq.push(plain(Opcode::Nop, 0));
        }
        seq.bind(end).unwrap();
        seq.push(plain(Opcode::LoadConst, 0));
        seq.push(plain(Opcode::ReturnValue, 0));
        let code = assemble(&seq, Encoder::new(), CodeHeader::default()).unwrap();
        // 300 nops = 300 code units: EXTENDED_ARG 1, JUMP_FORWARD 44
        assert_eq!(&code.code[..4], [144, 1, 110, 44]);
    }

    #[test]
    fn test_handler_ranges_and_depth() {
        let mut seq = InstrSeq::new();
        let handler_label = seq.new_label();
        let handler = Handler {
            label: handler_label,
            depth: 0,
            lasti: true,
        };
        seq.push(plain(Opcode::Nop, 0));
        seq.push(Instr {
            handler: Some(handler),
            ..plain(Opcode::LoadConst, 0)
        });
        seq.push(Instr {
            handler: Some(handler),
            ..plain(Opcode::ReturnValue, 0)
        });
        seq.bind(handler_label).unwrap();
        seq.push(plain(Opcode::Reraise, 1));
        let code = assemble(&seq, Encoder::new(), CodeHeader::default()).unwrap();
        let entries = decode_table(&code.exceptiontable).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!((entries[0].start, entries[0].length, entries[0].target), (2, 4, 6));
        assert!(entries[0].lasti);
        assert_eq!(code.stacksize, 2);
    }

    #[test]
    fn test_unbound_label_is_an_error() {
        let mut seq = InstrSeq::new();
        let nowhere = seq.new_label();
        seq.push(jump(Opcode::JumpForward, nowhere));
        assert!(assemble(&seq, Encoder::new(), CodeHeader::default()).is_err());
    }

    #[test]
    fn test_stack_underflow_detected() {
        let mut seq = InstrSeq::new();
        seq.push(plain(Opcode::PopTop, 0));
        assert!(assemble(&seq, Encoder::new(), CodeHeader::default()).is_err());
    }
}
