//! A pure observer over a compiled [`ByteBlock`]: never mutates, never
//! drives execution. Used by the `debug_disassemble` feature and by the
//! REPL's introspection path.

use crate::common::byte_block::ByteBlock;
use crate::common::opcode::Opcode;

/// Dumps every instruction in `block`, labeled with `name`, one line per
/// instruction, through `log::trace!` (so it composes with `-v`/`--verbosity`
/// rather than writing straight to stdout).
pub fn disassemble_block(block: &ByteBlock, name: &str) {
    log::trace!("== {} ==", name);
    let mut offset = 0;
    while offset < block.len() {
        offset = disassemble_instruction(block, offset);
    }
}

/// Disassembles a single instruction at `offset`, logging it, and returns
/// the offset of the next instruction.
pub fn disassemble_instruction(block: &ByteBlock, offset: usize) -> usize {
    let mut out = format!("{:04} ", offset);

    let line = block.line_at(offset);
    if offset > 0 && line == block.line_at(offset - 1) {
        out.push_str("   | ");
    } else {
        out.push_str(&format!("{:4} ", line));
    }

    let byte = block.bytes[offset];
    let next = match Opcode::from_byte(byte) {
        Some(Opcode::PushConstant) => constant_instruction(&mut out, "PushConstant", block, offset),
        Some(Opcode::Pop) => simple_instruction(&mut out, "Pop", offset),
        Some(Opcode::Null) => simple_instruction(&mut out, "Null", offset),
        Some(Opcode::True) => simple_instruction(&mut out, "True", offset),
        Some(Opcode::False) => simple_instruction(&mut out, "False", offset),
        Some(Opcode::Equal) => simple_instruction(&mut out, "Equal", offset),
        Some(Opcode::Greater) => simple_instruction(&mut out, "Greater", offset),
        Some(Opcode::Less) => simple_instruction(&mut out, "Less", offset),
        Some(Opcode::Add) => simple_instruction(&mut out, "Add", offset),
        Some(Opcode::Sub) => simple_instruction(&mut out, "Sub", offset),
        Some(Opcode::Mul) => simple_instruction(&mut out, "Mul", offset),
        Some(Opcode::Div) => simple_instruction(&mut out, "Div", offset),
        Some(Opcode::Negate) => simple_instruction(&mut out, "Negate", offset),
        Some(Opcode::Not) => simple_instruction(&mut out, "Not", offset),
        Some(Opcode::Jmp) => jump_instruction(&mut out, "Jmp", 1, block, offset),
        Some(Opcode::Jz) => jump_instruction(&mut out, "Jz", 1, block, offset),
        Some(Opcode::Loop) => jump_instruction(&mut out, "Loop", -1, block, offset),
        Some(Opcode::DefineGlobal) => constant_instruction(&mut out, "DefineGlobal", block, offset),
        Some(Opcode::GetGlobal) => constant_instruction(&mut out, "GetGlobal", block, offset),
        Some(Opcode::SetGlobal) => constant_instruction(&mut out, "SetGlobal", block, offset),
        Some(Opcode::GetLocal) => byte_instruction(&mut out, "GetLocal", block, offset),
        Some(Opcode::SetLocal) => byte_instruction(&mut out, "SetLocal", block, offset),
        Some(Opcode::Print) => simple_instruction(&mut out, "Print", offset),
        Some(Opcode::Return) => simple_instruction(&mut out, "Return", offset),
        None => {
            out.push_str(&format!("Unknown opcode {}", byte));
            offset + 1
        }
    };

    log::trace!("{}", out);
    next
}

fn simple_instruction(out: &mut String, name: &str, offset: usize) -> usize {
    out.push_str(name);
    offset + 1
}

/// A 1-byte operand that is a constant-pool index: prints the index and the
/// constant's own display form.
fn constant_instruction(out: &mut String, name: &str, block: &ByteBlock, offset: usize) -> usize {
    let idx = block.bytes[offset + 1];
    out.push_str(&format!(
        "{:<16} {:4} '{}'",
        name,
        idx,
        block
            .constants
            .get(idx as usize)
            .map(|v| v.to_string())
            .unwrap_or_else(|| "<out of range>".to_string())
    ));
    offset + 2
}

/// A 1-byte operand that is a raw stack slot, not a constant-pool index
/// (`GetLocal`/`SetLocal`) — printed as the bare operand byte.
fn byte_instruction(out: &mut String, name: &str, block: &ByteBlock, offset: usize) -> usize {
    let slot = block.bytes[offset + 1];
    out.push_str(&format!("{:<16} {:4}", name, slot));
    offset + 2
}

/// A 2-byte big-endian jump offset, `sign` is `1` for forward jumps and `-1`
/// for `Loop`'s backward jump.
fn jump_instruction(out: &mut String, name: &str, sign: i32, block: &ByteBlock, offset: usize) -> usize {
    let hi = block.bytes[offset + 1] as u16;
    let lo = block.bytes[offset + 2] as u16;
    let jump = (hi << 8) | lo;
    let target = offset as i64 + 3 + sign as i64 * jump as i64;
    out.push_str(&format!("{:<16} {:4} -> {}", name, offset, target));
    offset + 3
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;

    #[test]
    fn walks_every_instruction_without_panicking() {
        let f = Compiler::compile("test", "let x = 1; print x + 2;").unwrap();
        disassemble_block(&f.block, "test");
    }
}
