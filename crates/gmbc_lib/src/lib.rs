use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

pub mod cfg;
pub mod decomp;
pub mod disasm;
pub mod instruction;
pub mod ir;
pub mod recomp;
pub mod symbols;
pub mod types;

pub use cfg::{Graph, GraphBranch, GraphVertex, build_graph};
pub use disasm::{CodeEntry, CodeInfo, DisasmOptions, disassemble, render};
pub use instruction::{Instruction, OpCode, decode};
pub use recomp::assembler::{AssembleOptions, AssembledCode, LabelPolicy, LinkOptions, LinkedCode, assemble, link};
pub use recomp::parser::parse;
pub use recomp::tokenizer::tokenize;
pub use symbols::{EntryRecord, Patch, RefData, ReferenceDef, Resolver, StringTable, SymbolTables};
pub use types::{BranchType, ComparisonType, DataType, InstanceType, VariableType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecompileMode {
    Pseudo,
    Ir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecompileOptions {
    pub mode: DecompileMode,
    /// Render offsets relative to the container data instead of the entry.
    pub absolute_addresses: bool,
}

impl Default for DecompileOptions {
    fn default() -> Self {
        Self { mode: DecompileMode::Pseudo, absolute_addresses: false }
    }
}

/// Why a single instruction could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Malformed {
    #[error("opcode 0x{opcode:02X} is not defined for bytecode version {version}")]
    UnknownOpcode { opcode: u8, version: u32 },

    #[error("invalid data type 0x{0:X}")]
    DataType(u8),

    #[error("invalid variable type 0x{0:02X}")]
    VariableType(u8),

    #[error("invalid comparison type {0}")]
    ComparisonType(u8),

    #[error("instruction needs {needed} words but only {remaining} remain")]
    Truncated { needed: usize, remaining: usize },

    #[error("decoded length {actual} does not match expected length {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("jump target {target} lies outside the code (0..={len})")]
    JumpOutOfRange { target: i64, len: u32 },
}

#[derive(Debug, Error)]
pub enum GmbcError {
    #[error("malformed instruction at 0x{offset:06X}: {kind}")]
    MalformedInstruction { offset: u32, kind: Malformed },

    #[error("index {index} out of range ({len} entries)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("code entry `{name}` (0x{offset:08X}, {size} bytes) lies outside the data")]
    EntryOutOfBounds { name: String, offset: u32, size: u32 },

    #[error("{message} at line {line} and column {column}")]
    Grammar { line: usize, column: usize, message: String },

    #[error("unresolved label `{label}`")]
    UnresolvedLabel { label: String },

    #[error("unknown object `{name}`")]
    UnknownObject { name: String },

    #[error("jump from 0x{from:06X} to {to:#X} cannot be encoded")]
    UnencodableJump { from: u32, to: i64 },

    #[error("opcode `{name}` does not exist in bytecode version {version}")]
    OpcodeUnavailable { name: &'static str, version: u32 },

    #[error("reference chain of `{name}` leaves the data at 0x{offset:08X}")]
    InvalidReferenceChain { name: String, offset: u32 },
}

/// Ambient inputs of every decoding operation.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub version: u32,
    pub refs: &'a RefData,
    pub resolver: &'a dyn Resolver,
}

impl<'a> Context<'a> {
    pub fn new(version: u32, refs: &'a RefData, resolver: &'a dyn Resolver) -> Self {
        Self { version, refs, resolver }
    }

    pub(crate) fn variable_name(&self, offset: u32) -> String {
        match self.refs.variable_at(offset) {
            Some(d) => d.name.clone(),
            None => {
                debug!(offset, "no variable reference at offset");
                format!("<ref@0x{offset:06X}>")
            }
        }
    }

    pub(crate) fn function_name(&self, offset: u32) -> String {
        match self.refs.function_at(offset) {
            Some(d) => d.name.clone(),
            None => {
                debug!(offset, "no function reference at offset");
                format!("<ref@0x{offset:06X}>")
            }
        }
    }

    pub(crate) fn object_name(&self, instance: InstanceType) -> Option<String> {
        match instance {
            InstanceType::Object(id) => self.resolver.resolve_object(id).map(str::to_string),
            _ => None,
        }
    }
}

/// Result of one code entry of a batch run.
#[derive(Debug)]
pub struct EntryOutput {
    pub name: String,
    pub result: Result<String, GmbcError>,
}

/// Looks up entry `index`. Asking past the end is a caller error.
pub fn code_entry(entries: &[EntryRecord], index: usize) -> Result<&EntryRecord, GmbcError> {
    entries.get(index).ok_or(GmbcError::IndexOutOfRange { index, len: entries.len() })
}

/// Slices an entry out of `data`, which starts at container offset `base_offset`.
pub fn entry_view<'a>(data: &'a [u8], base_offset: u32, rec: &'a EntryRecord) -> Result<CodeEntry<'a>, GmbcError> {
    let out_of_bounds = || GmbcError::EntryOutOfBounds { name: rec.name.clone(), offset: rec.offset, size: rec.size };
    let start = rec.offset.checked_sub(base_offset).ok_or_else(out_of_bounds)? as usize;
    let end = start.checked_add(rec.size as usize).ok_or_else(out_of_bounds)?;
    let bytes = data.get(start..end).ok_or_else(out_of_bounds)?;
    Ok(CodeEntry { name: &rec.name, bytes, size: rec.size, base_offset: rec.offset })
}

pub fn disassemble_entry(entry: &CodeEntry<'_>, ctx: &Context<'_>, options: DisasmOptions) -> Result<String, GmbcError> {
    let code = disassemble(entry, ctx.version)?;
    Ok(render(&code, ctx, options))
}

pub fn decompile_entry(entry: &CodeEntry<'_>, ctx: &Context<'_>, options: DecompileOptions) -> Result<String, GmbcError> {
    let code = disassemble(entry, ctx.version)?;
    let graph = build_graph(&code);
    Ok(match options.mode {
        DecompileMode::Pseudo => decomp::decompile_code(&code, &graph, ctx, options.absolute_addresses),
        DecompileMode::Ir => ir::emit_ir(&code, &graph, ctx),
    })
}

fn run_all(
    data: &[u8],
    base_offset: u32,
    entries: &[EntryRecord],
    what: &str,
    mut f: impl FnMut(&CodeEntry<'_>) -> Result<String, GmbcError>,
) -> Vec<EntryOutput> {
    entries
        .iter()
        .map(|rec| {
            let result = entry_view(data, base_offset, rec).and_then(|e| f(&e));
            if let Err(e) = &result {
                error!("failed to {what} {}, ignoring: {e}", rec.name);
            }
            EntryOutput { name: rec.name.clone(), result }
        })
        .collect()
}

/// Disassembles every entry; a failing entry does not stop the others.
pub fn disassemble_all(
    data: &[u8],
    base_offset: u32,
    entries: &[EntryRecord],
    ctx: &Context<'_>,
    options: DisasmOptions,
) -> Vec<EntryOutput> {
    run_all(data, base_offset, entries, "disassemble", |e| disassemble_entry(e, ctx, options))
}

/// Decompiles every entry; a failing entry does not stop the others.
pub fn decompile_all(
    data: &[u8],
    base_offset: u32,
    entries: &[EntryRecord],
    ctx: &Context<'_>,
    options: DecompileOptions,
) -> Vec<EntryOutput> {
    run_all(data, base_offset, entries, "decompile", |e| decompile_entry(e, ctx, options))
}

#[cfg(test)]
pub mod test_utils {
    /// Installs a subscriber writing to the test harness. Safe to call from
    /// several tests.
    pub fn init_test_logging() {
        use tracing_subscriber::{EnvFilter, fmt};

        let _ = fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
            .with_test_writer()
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::words_to_bytes;
    use pretty_assertions::assert_eq;

    #[test]
    fn entry_index_out_of_range() {
        let entries = vec![EntryRecord { name: "a".into(), offset: 0, size: 4 }];
        assert!(code_entry(&entries, 0).is_ok());
        assert!(matches!(code_entry(&entries, 1), Err(GmbcError::IndexOutOfRange { index: 1, len: 1 })));
    }

    #[test]
    fn batch_isolates_failures() {
        test_utils::init_test_logging();
        let data = words_to_bytes(&[
            0x840F_0005, 0x9C02_0000, // good: push.i16 5; ret int32
            0x0100_0000, // bad opcode
        ]);
        let entries = vec![
            EntryRecord { name: "good".into(), offset: 0x40, size: 8 },
            EntryRecord { name: "bad".into(), offset: 0x48, size: 4 },
            EntryRecord { name: "outside".into(), offset: 0x60, size: 4 },
            EntryRecord { name: "good_again".into(), offset: 0x40, size: 8 },
        ];
        let refs = RefData::default();
        let syms = SymbolTables::default();
        let ctx = Context::new(0x10, &refs, &syms);
        let out = decompile_all(&data, 0x40, &entries, &ctx, DecompileOptions::default());
        let ok: Vec<bool> = out.iter().map(|o| o.result.is_ok()).collect();
        assert_eq!(ok, vec![true, false, false, true]);
        assert!(matches!(out[2].result, Err(GmbcError::EntryOutOfBounds { .. })));
        assert_eq!(out[0].result.as_ref().unwrap(), "0x000000:\n    ret int32 5s\n0x000008:\n    exit\n");
    }
}
