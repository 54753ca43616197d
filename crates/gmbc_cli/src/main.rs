use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser};
use gmbc_lib::{
    AssembleOptions, Context, DecompileMode, DecompileOptions, DisasmOptions, EntryOutput, EntryRecord, LabelPolicy,
    LinkOptions, RefData, SymbolTables,
};
use gmbc_lib::recomp::parser::Item;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::cli::{BytecodeArgs, Cli, DecompileModeCli, TopLevel};

mod cli;

type CliResult<T> = Result<T, Box<dyn Error>>;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn stem(path: &Path) -> String {
    path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "code".to_string())
}

fn load_symbols(path: Option<&Path>) -> CliResult<SymbolTables> {
    match path {
        Some(p) => {
            let text = fs::read_to_string(p).map_err(|e| format!("failed to read {p:?}: {e}"))?;
            Ok(serde_json::from_str(&text).map_err(|e| format!("invalid symbol file {p:?}: {e}"))?)
        }
        None => Ok(SymbolTables::default()),
    }
}

/// Loaded input of the disasm and decompile commands.
struct Input {
    data: Vec<u8>,
    base_offset: u32,
    entries: Vec<EntryRecord>,
    symbols: SymbolTables,
    refs: RefData,
}

/// Narrows `entries` to the one at `index`, if given.
fn select_entries(entries: Vec<EntryRecord>, index: Option<usize>) -> CliResult<Vec<EntryRecord>> {
    match index {
        Some(i) => Ok(vec![gmbc_lib::code_entry(&entries, i)?.clone()]),
        None => Ok(entries),
    }
}

fn load_input(path: &Path, args: &BytecodeArgs, entry: Option<usize>) -> CliResult<Input> {
    let data = fs::read(path).map_err(|e| format!("failed to read {path:?}: {e}"))?;
    let symbols = load_symbols(args.symbols.as_deref())?;
    let (base_offset, entries) = if symbols.entries.is_empty() {
        (0, vec![EntryRecord { name: stem(path), offset: 0, size: data.len() as u32 }])
    } else {
        let base = symbols.entries.iter().map(|e| e.offset).min().unwrap_or(0);
        (base, symbols.entries.clone())
    };
    let entries = select_entries(entries, entry)?;
    let refs = RefData::from_chains(&data, base_offset, symbols.variables.clone(), symbols.functions.clone())?;
    debug!(entries = entries.len(), base_offset, "input loaded");
    Ok(Input { data, base_offset, entries, symbols, refs })
}

/// Prints successful outputs, each under a comment header when there are
/// several. Returns whether every entry succeeded.
fn print_outputs(outputs: Vec<EntryOutput>, comment: &str) -> bool {
    let several = outputs.len() > 1;
    let mut all_ok = true;
    for out in outputs {
        match out.result {
            Ok(text) => {
                if several {
                    println!("{comment} {}", out.name);
                }
                print!("{text}");
            }
            Err(_) => all_ok = false,
        }
    }
    all_ok
}

/// Tokenizes and parses one assembly file, naming it in any error.
fn parse_source(path: &Path, text: &str) -> CliResult<Vec<Item>> {
    let located = |e: gmbc_lib::GmbcError| format!("{}: {e}", path.display());
    let tokens = gmbc_lib::tokenize(text).map_err(located)?;
    Ok(gmbc_lib::parse(&tokens).map_err(located)?)
}

fn assemble(
    paths: &[PathBuf],
    out: &Path,
    args: &BytecodeArgs,
    strict_labels: bool,
    base_offset: u32,
    implicit_variables: bool,
) -> CliResult<()> {
    let mut symbols = load_symbols(args.symbols.as_deref())?;
    let options = AssembleOptions {
        unresolved_labels: if strict_labels { LabelPolicy::Strict } else { LabelPolicy::Sentinel },
    };

    let mut codes = Vec::with_capacity(paths.len());
    for path in paths {
        let text = fs::read_to_string(path).map_err(|e| format!("failed to read {path:?}: {e}"))?;
        let name = stem(path);
        let items = parse_source(path, &text)?;
        codes.push(gmbc_lib::assemble(&name, &items, args.bc_version, &mut symbols, options)?);
    }

    let link_options = LinkOptions { base_offset, implicit_variables, existing_variables: symbols.variables.clone() };
    let linked = gmbc_lib::link(&codes, &mut symbols.strings, &link_options)?;
    linked.update_symbols(&mut symbols);

    fs::create_dir_all(out)?;
    fs::write(out.join("code.bin"), &linked.data)?;
    fs::write(out.join("symbols.json"), serde_json::to_string_pretty(&symbols)?)?;
    info!(entries = linked.entries.len(), bytes = linked.data.len(), "assembled");
    Ok(())
}

fn run(command: TopLevel) -> CliResult<bool> {
    match command {
        TopLevel::Disasm { path, bytecode, entry, addresses } => {
            let input = load_input(&path, &bytecode, entry)?;
            let ctx = Context::new(bytecode.bc_version, &input.refs, &input.symbols);
            let options = DisasmOptions { show_addresses: addresses };
            let outputs = gmbc_lib::disassemble_all(&input.data, input.base_offset, &input.entries, &ctx, options);
            Ok(print_outputs(outputs, ";"))
        }
        TopLevel::Decompile { path, bytecode, entry, mode, absolute } => {
            let input = load_input(&path, &bytecode, entry)?;
            let ctx = Context::new(bytecode.bc_version, &input.refs, &input.symbols);
            let mode = match mode {
                DecompileModeCli::Pseudo => DecompileMode::Pseudo,
                DecompileModeCli::Ir => DecompileMode::Ir,
            };
            let options = DecompileOptions { mode, absolute_addresses: absolute };
            let outputs = gmbc_lib::decompile_all(&input.data, input.base_offset, &input.entries, &ctx, options);
            Ok(print_outputs(outputs, "//"))
        }
        TopLevel::Assemble { paths, out, bytecode, strict_labels, base_offset, implicit_variables } => {
            assemble(&paths, &out, &bytecode, strict_labels, base_offset, implicit_variables)?;
            Ok(true)
        }
        TopLevel::Completion { shell } => {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
            Ok(true)
        }
    }
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        let _ = Cli::command().print_help();
        return;
    };
    match run(command) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Vec<EntryRecord> {
        vec![
            EntryRecord { name: "a".into(), offset: 0x100, size: 8 },
            EntryRecord { name: "b".into(), offset: 0x108, size: 4 },
        ]
    }

    #[test]
    fn source_errors_name_the_file() {
        let path = Path::new("scripts/broken.asm");
        let unterminated = parse_source(path, "push.cst string \"abc\n").unwrap_err().to_string();
        assert!(unterminated.starts_with("scripts/broken.asm: "), "{unterminated}");
        let bad_operand = parse_source(path, "add int16\n").unwrap_err().to_string();
        assert!(bad_operand.starts_with("scripts/broken.asm: "), "{bad_operand}");
        assert_eq!(parse_source(path, "exit int16\n").unwrap().len(), 1);
    }

    #[test]
    fn entry_selection() {
        assert_eq!(select_entries(records(), None).unwrap(), records());
        assert_eq!(select_entries(records(), Some(1)).unwrap(), vec![records()[1].clone()]);
        let err = select_entries(records(), Some(2)).unwrap_err();
        assert_eq!(err.to_string(), gmbc_lib::GmbcError::IndexOutOfRange { index: 2, len: 2 }.to_string());
    }
}
