use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, builder::{Styles, styling::{AnsiColor, Effects}}, crate_description, crate_name, crate_version};
use clap_complete::Shell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DecompileModeCli {
    Pseudo,
    Ir,
}

#[derive(Parser)]
#[command(name = crate_name!(),
    version = crate_version!(),
    about = crate_description!(),
    styles = Styles::styled()
        .header(AnsiColor::BrightGreen.on_default() | Effects::BOLD | Effects::UNDERLINE)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightCyan.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Cyan.on_default()))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<TopLevel>,
}

/// Accepts decimal or `0x`-prefixed hex.
fn parse_number(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number `{s}`: {e}"))
}

#[derive(Args)]
pub struct BytecodeArgs {
    /// Bytecode version; versions above 0xE use the F opcode table
    #[arg(long = "bc-version", value_parser = parse_number, default_value = "16")]
    pub bc_version: u32,

    /// JSON file with strings, objects, variables, functions and entries
    #[arg(long)]
    pub symbols: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum TopLevel {
    /// Disassembles a bytecode file
    Disasm {
        /// Raw code entry, or a blob described by the symbol file's entries
        path: PathBuf,

        #[command(flatten)]
        bytecode: BytecodeArgs,

        /// Only process the entry at this position in the symbol file
        #[arg(long)]
        entry: Option<usize>,

        /// Prefix every line with its address (output is no longer re-assemblable)
        #[arg(long, default_value_t = false)]
        addresses: bool,
    },
    /// Decompiles a bytecode file
    Decompile {
        /// Raw code entry, or a blob described by the symbol file's entries
        path: PathBuf,

        #[command(flatten)]
        bytecode: BytecodeArgs,

        /// Only process the entry at this position in the symbol file
        #[arg(long)]
        entry: Option<usize>,

        /// Output mode
        #[arg(long, value_enum, default_value_t = DecompileModeCli::Pseudo)]
        mode: DecompileModeCli,

        /// Print labels relative to the container data instead of the entry
        #[arg(long, default_value_t = false)]
        absolute: bool,
    },
    /// Assembles text files into code.bin and symbols.json
    Assemble {
        /// Assembly files, one code entry each, named after the file stem
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Output directory
        #[arg(long)]
        out: PathBuf,

        #[command(flatten)]
        bytecode: BytecodeArgs,

        /// Fail on branches to undefined labels instead of emitting a sentinel jump
        #[arg(long, default_value_t = false)]
        strict_labels: bool,

        /// Container offset of the first code entry
        #[arg(long, value_parser = parse_number, default_value = "0")]
        base_offset: u32,

        /// Add the built-in prototype, @@array@@ and arguments variables
        #[arg(long, default_value_t = false)]
        implicit_variables: bool,
    },
    /// Generate shell completion
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}
