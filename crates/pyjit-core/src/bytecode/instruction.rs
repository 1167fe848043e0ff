//! Bytecode decoding: turns the code object's raw byte stream into a dense
//! sequence of [`Instruction`]s, transparently collapsing `EXTENDED_ARG`
//! prefixes so only the terminating opcode index carries meaning.

use ahash::AHashMap;

use crate::bytecode::op::Opcode;

/// One decoded instruction.
///
/// `pc` is the byte offset of the *terminating* opcode in an
/// `EXTENDED_ARG` chain — per spec §4.2, `EXTENDED_ARG` is transparent and
/// only the terminating index carries a state entry. `oparg` is the full
/// value accumulated across any preceding `EXTENDED_ARG` units.
/// `escape` starts `false` and is set by the instruction graph.
#[derive(Debug, Clone, Copy)]
pub struct Instruction {
    pub pc: usize,
    pub opcode: Opcode,
    pub oparg: u32,
    pub escape: bool,
}

/// Decoding failed because a raw byte did not map to a known [`Opcode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownOpcode {
    pub pc: usize,
    pub byte: u8,
}

/// Decodes `bytecode` into a map from terminating pc to [`Instruction`].
///
/// Bytecode is a stream of 2-byte `(opcode, oparg)` units; any number of
/// leading `EXTENDED_ARG` units before a terminating opcode contribute
/// their oparg bytes as successively higher bytes of the final `oparg`.
/// Jump targets are required to reference the terminating opcode's `pc`
/// directly — this core does not model jumping into the middle of an
/// `EXTENDED_ARG` prefix chain, which the spec's bytecode-offset
/// guarantees don't require.
///
/// # Errors
/// Returns [`UnknownOpcode`] at the first byte that doesn't decode.
pub fn decode(bytecode: &[u8]) -> Result<AHashMap<usize, Instruction>, UnknownOpcode> {
    let mut instructions = AHashMap::default();
    let mut i = 0;
    let mut accumulated_oparg: u32 = 0;

    while i + 1 < bytecode.len() {
        let byte = bytecode[i];
        let arg_byte = bytecode[i + 1];
        let opcode = Opcode::from_u8(byte).ok_or(UnknownOpcode { pc: i, byte })?;

        if opcode == Opcode::ExtendedArg {
            accumulated_oparg = (accumulated_oparg << 8) | u32::from(arg_byte);
            i += 2;
            continue;
        }

        let oparg = (accumulated_oparg << 8) | u32::from(arg_byte);
        instructions.insert(i, Instruction { pc: i, opcode, oparg, escape: false });
        accumulated_oparg = 0;
        i += 2;
    }

    Ok(instructions)
}

/// Total byte length of the decoded stream, used to validate jump targets.
#[must_use]
pub fn byte_length(bytecode: &[u8]) -> usize {
    bytecode.len()
}

/// Scans forward from `from` in 2-byte steps until landing on a pc present
/// in `instructions` (a real instruction's terminating pc) or reaching the
/// end of the stream. A plain `+2` stride can land on an `EXTENDED_ARG`
/// unit instead, which occupies a pc of its own in the byte stream but
/// never gets an entry in `instructions` (keyed by terminating pc only), so
/// callers must skip forward rather than assume the next unit is the next
/// instruction.
fn skip_to_instruction(instructions: &AHashMap<usize, Instruction>, bytecode_len: usize, from: usize) -> usize {
    let mut candidate = from;
    while candidate < bytecode_len && !instructions.contains_key(&candidate) {
        candidate += 2;
    }
    candidate
}

/// The terminating pc of the instruction that sequentially follows `pc`'s
/// own instruction, skipping any intervening `EXTENDED_ARG` units. Returns
/// a pc at or past `bytecode_len` if `pc`'s instruction was the last one in
/// the stream.
#[must_use]
pub fn next_pc(instructions: &AHashMap<usize, Instruction>, bytecode_len: usize, pc: usize) -> usize {
    skip_to_instruction(instructions, bytecode_len, pc + 2)
}

/// The terminating pc of the first instruction in the stream, which is 0
/// unless the stream opens with one or more `EXTENDED_ARG` units.
#[must_use]
pub fn entry_pc(instructions: &AHashMap<usize, Instruction>, bytecode_len: usize) -> usize {
    skip_to_instruction(instructions, bytecode_len, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(op: Opcode, arg: u8) -> [u8; 2] {
        [op.as_u8(), arg]
    }

    #[test]
    fn decodes_a_simple_stream() {
        let mut bytes = Vec::new();
        bytes.extend(unit(Opcode::LoadConst, 0));
        bytes.extend(unit(Opcode::ReturnValue, 0));
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[&0].opcode, Opcode::LoadConst);
        assert_eq!(decoded[&2].opcode, Opcode::ReturnValue);
    }

    #[test]
    fn extended_arg_is_transparent_and_widens_oparg() {
        let mut bytes = Vec::new();
        bytes.extend(unit(Opcode::ExtendedArg, 1));
        bytes.extend(unit(Opcode::LoadConst, 0x05));
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.len(), 1);
        let inst = decoded[&2];
        assert_eq!(inst.opcode, Opcode::LoadConst);
        assert_eq!(inst.oparg, 0x0105);
    }

    #[test]
    fn unknown_opcode_byte_is_an_error() {
        let bytes = vec![0xFF, 0x00];
        assert_eq!(decode(&bytes).unwrap_err(), UnknownOpcode { pc: 0, byte: 0xFF });
    }
}
