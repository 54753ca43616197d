use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::decomp::ast::escape;
use crate::instruction::{Instruction, OpCode, PushValue, decode};
use crate::types::{InstanceType, VariableType};
use crate::{Context, GmbcError, Malformed};

/// Raw bytes of one code entry.
#[derive(Debug, Clone, Copy)]
pub struct CodeEntry<'a> {
    pub name: &'a str,
    pub bytes: &'a [u8],
    /// Declared size in bytes.
    pub size: u32,
    /// Offset of the first instruction within the container data; reference
    /// lookups are keyed by `base_offset + address`.
    pub base_offset: u32,
}

/// A disassembled code entry: instructions plus their byte addresses relative
/// to the start of the entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeInfo {
    pub name: String,
    pub base_offset: u32,
    pub size: u32,
    pub instructions: Vec<Instruction>,
    pub addresses: Vec<u32>,
}

impl CodeInfo {
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn index_of(&self, address: u32) -> Option<usize> {
        self.addresses.binary_search(&address).ok()
    }

    /// Address one past the last instruction.
    pub fn end_address(&self) -> u32 {
        match (self.addresses.last(), self.instructions.last()) {
            (Some(a), Some(i)) => a + i.word_len() as u32 * 4,
            _ => 0,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Instruction)> {
        self.addresses.iter().copied().zip(self.instructions.iter())
    }

    /// Jump target of instruction `i`, relative to the entry start.
    pub fn goto_target(&self, i: usize) -> Option<i64> {
        let g = self.instructions.get(i)?.as_goto()?;
        g.target(self.addresses[i])
    }
}

fn padded(size: u32) -> usize {
    (size as usize).div_ceil(4) * 4
}

/// Decodes a whole code entry. Jump targets must land inside the entry or
/// exactly at its end.
pub fn disassemble(entry: &CodeEntry<'_>, version: u32) -> Result<CodeInfo, GmbcError> {
    if entry.bytes.len() < entry.size as usize {
        return Err(GmbcError::MalformedInstruction {
            offset: entry.bytes.len() as u32 & !3,
            kind: Malformed::Truncated { needed: padded(entry.size) / 4, remaining: entry.bytes.len() / 4 },
        });
    }
    let limit = padded(entry.size).min(entry.bytes.len());
    let buf = &entry.bytes[..limit];

    let mut instructions = Vec::new();
    let mut addresses = Vec::new();
    let mut word = 0usize;
    while word * 4 < buf.len() {
        let (ins, len) = decode(buf, word, version)?;
        let address = (word * 4) as u32;
        if let Some(target) = ins.as_goto().and_then(|g| g.target(address)) {
            if target < 0 || target > buf.len() as i64 {
                return Err(GmbcError::MalformedInstruction {
                    offset: address,
                    kind: Malformed::JumpOutOfRange { target, len: buf.len() as u32 },
                });
            }
        }
        instructions.push(ins);
        addresses.push(address);
        word += len;
    }
    debug!(name = entry.name, instructions = instructions.len(), "disassembled");

    Ok(CodeInfo {
        name: entry.name.to_string(),
        base_offset: entry.base_offset,
        size: entry.size,
        instructions,
        addresses,
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisasmOptions {
    /// Prefix each line with its address. The output is then no longer valid
    /// assembly input.
    pub show_addresses: bool,
}

/// Renders a listing, one instruction per line, with a hex label line before
/// every jump target.
pub fn render(code: &CodeInfo, ctx: &Context<'_>, options: DisasmOptions) -> String {
    let targets: BTreeSet<i64> = (0..code.len()).filter_map(|i| code.goto_target(i)).collect();

    let mut out = String::new();
    for (address, ins) in code.iter() {
        if options.show_addresses {
            out.push_str(&format!("0x{address:08X} "));
        } else if targets.contains(&(address as i64)) {
            out.push_str(&format!("0x{address:06X}:\n"));
        }
        out.push_str(&render_instruction(code, address, ins, ctx));
        out.push('\n');
    }
    let end = code.end_address();
    if !options.show_addresses && targets.contains(&(end as i64)) {
        out.push_str(&format!("0x{end:06X}:\n"));
    }
    out
}

fn owner_text(instance: InstanceType, ctx: &Context<'_>) -> String {
    match ctx.object_name(instance) {
        Some(n) => format!("[{n}]"),
        None => instance.to_string(),
    }
}

fn variable_text(code: &CodeInfo, address: u32, instance: InstanceType, var_type: VariableType, ctx: &Context<'_>) -> String {
    let name = ctx.variable_name(code.base_offset + address);
    format!("{}:{}{}", owner_text(instance, ctx), name, var_type.suffix())
}

fn float_text<T: std::fmt::Debug>(v: T) -> String {
    format!("{v:?}")
}

pub fn render_instruction(code: &CodeInfo, address: u32, ins: &Instruction, ctx: &Context<'_>) -> String {
    let op = ins.op().name();
    match ins {
        Instruction::SingleType(i) => {
            if i.op == OpCode::Dup && i.extra != 0 {
                format!("{op} {} {}", i.ty, i.extra)
            } else {
                format!("{op} {}", i.ty)
            }
        }
        Instruction::DoubleType(i) => match i.op {
            OpCode::Cmp => {
                let sym = i.comparison.map(|c| c.symbol()).unwrap_or("?");
                format!("{op} {sym} {}:{}", i.ty1, i.ty2)
            }
            _ => format!("{op} {}:{}", i.ty1, i.ty2),
        },
        Instruction::Goto(g) => match g.target(address) {
            Some(t) => format!("{op} 0x{t:06X}"),
            None => format!("{op} !magic"),
        },
        Instruction::Set(s) => match s.dest {
            Some(r) => format!("{op} {}:{} {}", s.ty1, s.ty2, variable_text(code, address, s.instance, r.var_type, ctx)),
            None => format!("{op} {}:{} !magic", s.ty1, s.ty2),
        },
        Instruction::Push(p) => {
            let ty = p.value.data_type();
            let value = match p.value {
                PushValue::Int16(v) => v.to_string(),
                PushValue::Int32(v) => v.to_string(),
                PushValue::Int64(v) => v.to_string(),
                PushValue::Single(v) => float_text(v),
                PushValue::Double(v) => float_text(v),
                PushValue::Boolean(0) => "false".to_string(),
                PushValue::Boolean(1) => "true".to_string(),
                PushValue::Boolean(v) => v.to_string(),
                PushValue::String(idx) => match ctx.resolver.resolve_string(idx) {
                    Some(s) => format!("\"{}\"", escape(s)),
                    None => format!("<string:{idx}>"),
                },
                PushValue::Variable { instance, reference } => {
                    variable_text(code, address, instance, reference.var_type, ctx)
                }
            };
            format!("{op} {ty} {value}")
        }
        Instruction::Call(c) => {
            let name = ctx.function_name(code.base_offset + address);
            format!("{op} {}:{} {}{}", c.ret, c.argc, name, c.func.var_type.suffix())
        }
        Instruction::Break(b) => format!("{op} {} {}", b.ty, b.signal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::words_to_bytes;
    use crate::symbols::{RefData, ReferenceDef, StringTable, SymbolTables};
    use pretty_assertions::assert_eq;

    const F: u32 = 0x10;

    fn entry<'a>(bytes: &'a [u8]) -> CodeEntry<'a> {
        CodeEntry { name: "test", bytes, size: bytes.len() as u32, base_offset: 0 }
    }

    #[test]
    fn walks_variable_length_instructions() {
        let bytes = words_to_bytes(&[0x840F_0005, 0xC000_0000, 0, 0x3FF8_0000, 0x9C00_0000]);
        let code = disassemble(&entry(&bytes), F).unwrap();
        assert_eq!(code.addresses, vec![0, 4, 16]);
        assert_eq!(code.end_address(), 20);
        assert_eq!(code.index_of(16), Some(2));
        assert_eq!(code.index_of(8), None);
    }

    #[test]
    fn jump_outside_code_is_malformed() {
        let bytes = words_to_bytes(&[0xB600_0004, 0x9C00_0000]);
        let err = disassemble(&entry(&bytes), F).unwrap_err();
        assert!(matches!(
            err,
            GmbcError::MalformedInstruction { offset: 0, kind: Malformed::JumpOutOfRange { target: 16, len: 8 } }
        ));
    }

    #[test]
    fn short_buffer_is_malformed() {
        let bytes = words_to_bytes(&[0x840F_0005]);
        let e = CodeEntry { name: "t", bytes: &bytes, size: 8, base_offset: 0 };
        assert!(disassemble(&e, F).is_err());
    }

    #[test]
    fn renders_listing_with_labels() {
        let bytes = words_to_bytes(&[
            0xC006_0000, 0, // push.cst string "hi"
            0xC305_FFFF, 0xA000_0000, // push.var self:x
            0xD902_0001, 0x0000_0000, // call int32:1 show[]
            0xB800_0001, // brf +4 -> 0x1C
            0x4550_0001, 0x8000_0000, // set double:var [obj_player]:y*
            0xBBF0_0000, // popenv !magic
        ]);
        let refs = RefData::from_chains(
            &bytes,
            0,
            vec![ReferenceDef::function("x", 1, 0x08), ReferenceDef::function("y", 1, 0x1C)],
            vec![ReferenceDef::function("show", 1, 0x10)],
        )
        .unwrap();
        let syms = SymbolTables {
            strings: StringTable::from(vec!["hi".to_string()]),
            objects: vec!["obj_zero".into(), "obj_player".into()],
            ..Default::default()
        };
        let ctx = Context::new(F, &refs, &syms);
        let code = disassemble(&entry(&bytes), F).unwrap();
        let text = render(&code, &ctx, DisasmOptions::default());
        assert_eq!(
            text,
            "push.cst string \"hi\"\n\
             push.var var self:x\n\
             call int32:1 show[]\n\
             brf 0x00001C\n\
             0x00001C:\n\
             set double:var [obj_player]:y*\n\
             popenv !magic\n"
        );

        let listed = render(&code, &ctx, DisasmOptions { show_addresses: true });
        assert!(listed.starts_with("0x00000000 push.cst string \"hi\"\n0x00000008 push.var"));
    }

    #[test]
    fn renders_numbers_in_parseable_form() {
        let bytes = words_to_bytes(&[
            0xC001_0000, 0x3FC0_0000, // single 1.5
            0xC000_0000, 0, 0x4014_0000, // double 5.0
            0xC004_0000, 1, // bool true
            0xC003_0000, 0xFFFF_FFFF, 0xFFFF_FFFF, // int64 -1
            0x8602_0001, // dup int32 1
            0x1522_0300, // cmp == int32:int32
            0xFF0F_FFFF, // break int16 -1
        ]);
        let refs = RefData::default();
        let syms = SymbolTables::default();
        let ctx = Context::new(F, &refs, &syms);
        let code = disassemble(&entry(&bytes), F).unwrap();
        let lines: Vec<String> = code.iter().map(|(a, i)| render_instruction(&code, a, i, &ctx)).collect();
        assert_eq!(
            lines,
            vec![
                "push.cst single 1.5",
                "push.cst double 5.0",
                "push.cst bool true",
                "push.cst int64 -1",
                "dup int32 1",
                "cmp == int32:int32",
                "break int16 -1",
            ]
        );
    }
}
