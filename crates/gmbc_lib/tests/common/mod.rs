#![allow(dead_code)]

use gmbc_lib::{
    AssembleOptions, CodeInfo, Context, DisasmOptions, LinkOptions, LinkedCode, RefData, SymbolTables, assemble, disasm,
    entry_view, link, parse, tokenize,
};

/// First bytecode version with the F opcode table.
pub const F: u32 = 0x10;
/// Last bytecode version with the E opcode table.
pub const E: u32 = 0xE;

pub fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

/// Assembles and links `(name, source)` pairs in order.
pub fn build(sources: &[(&str, &str)], version: u32, symbols: &mut SymbolTables, link_options: &LinkOptions) -> LinkedCode {
    let codes: Vec<_> = sources
        .iter()
        .map(|(name, src)| {
            let items = parse(&tokenize(src).unwrap()).unwrap();
            assemble(name, &items, version, symbols, AssembleOptions::default()).unwrap()
        })
        .collect();
    let linked = link(&codes, &mut symbols.strings, link_options).unwrap();
    linked.update_symbols(symbols);
    linked
}

pub fn refs_of(linked: &LinkedCode, symbols: &SymbolTables, base_offset: u32) -> RefData {
    RefData::from_chains(&linked.data, base_offset, symbols.variables.clone(), symbols.functions.clone()).unwrap()
}

pub fn disassemble_entry(linked: &LinkedCode, index: usize, base_offset: u32, version: u32) -> CodeInfo {
    let entry = entry_view(&linked.data, base_offset, &linked.entries[index]).unwrap();
    disasm::disassemble(&entry, version).unwrap()
}

/// Renders every linked entry back to assembly text.
pub fn render_all(linked: &LinkedCode, symbols: &SymbolTables, base_offset: u32, version: u32) -> Vec<String> {
    let refs = refs_of(linked, symbols, base_offset);
    let ctx = Context::new(version, &refs, symbols);
    (0..linked.entries.len())
        .map(|i| {
            let code = disassemble_entry(linked, i, base_offset, version);
            disasm::render(&code, &ctx, DisasmOptions::default())
        })
        .collect()
}
