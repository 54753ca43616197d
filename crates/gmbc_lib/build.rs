use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

fn workspace_root(crate_dir: &Path) -> PathBuf {
    crate_dir
        .parent()
        .and_then(|p| p.parent())
        .expect("crate directory should be <root>/crates/<name>")
        .to_path_buf()
}

fn take_until_paren_close(s: &str) -> Option<&str> {
    let s = s.trim();
    let j = s.find(')')?;
    Some(s[..j].trim())
}

fn parse_byte(s: &str) -> Option<u8> {
    if s == "none" {
        return None;
    }
    let hex = s.strip_prefix("0x").expect("opcode byte should be `none` or 0x-prefixed hex");
    Some(u8::from_str_radix(hex, 16).expect("opcode byte"))
}

struct OpDef {
    ident: String,
    name: String,
    e: Option<u8>,
    f: Option<u8>,
    kind: String,
    general: String,
}

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let root = workspace_root(&manifest_dir);

    let def_path = root.join("defs").join("opcodes.def");
    println!("cargo:rerun-if-changed={}", def_path.display());

    let def_src = fs::read_to_string(&def_path).expect("read opcodes.def");

    let mut ops: Vec<OpDef> = Vec::new();
    for line in def_src.lines() {
        let l = line.trim();
        let rest = match l.strip_prefix("OP(") {
            Some(v) => v,
            None => continue,
        };
        let inner = match take_until_paren_close(rest) {
            Some(v) => v,
            None => continue,
        };
        let parts: Vec<&str> = inner.split(',').map(|p| p.trim()).collect();
        if parts.len() != 6 {
            panic!("malformed opcode row: {l}");
        }
        ops.push(OpDef {
            ident: parts[0].to_string(),
            name: parts[1].trim_matches('"').to_string(),
            e: parse_byte(parts[2]),
            f: parse_byte(parts[3]),
            kind: parts[4].to_string(),
            general: parts[5].to_string(),
        });
    }

    let mut e_seen: HashMap<u8, &str> = HashMap::new();
    let mut f_seen: HashMap<u8, &str> = HashMap::new();
    for op in &ops {
        if let Some(b) = op.e {
            if let Some(prev) = e_seen.insert(b, &op.name) {
                panic!("E table: 0x{b:02X} claimed by both {prev} and {}", op.name);
            }
        }
        if let Some(b) = op.f {
            if let Some(prev) = f_seen.insert(b, &op.name) {
                panic!("F table: 0x{b:02X} claimed by both {prev} and {}", op.name);
            }
        }
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let out_path = out_dir.join("opcode_tables.rs");

    let byte_expr = |b: Option<u8>| match b {
        Some(b) => format!("Some(0x{b:02X})"),
        None => "None".to_string(),
    };

    let mut out = String::new();

    out.push_str("#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]\n");
    out.push_str("pub enum OpCode {\n");
    for op in &ops {
        out.push_str(&format!("    {},\n", op.ident));
    }
    out.push_str("}\n\n");

    out.push_str("#[derive(Debug, Clone, Copy)]\n");
    out.push_str("pub struct OpInfo {\n");
    out.push_str("    pub code: OpCode,\n");
    out.push_str("    pub name: &'static str,\n");
    out.push_str("    pub e: Option<u8>,\n");
    out.push_str("    pub f: Option<u8>,\n");
    out.push_str("    pub kind: InstructionKind,\n");
    out.push_str("    pub general: GeneralOp,\n");
    out.push_str("}\n\n");

    out.push_str("pub const OPCODE_INFO: &[OpInfo] = &[\n");
    for op in &ops {
        out.push_str(&format!(
            "    OpInfo {{ code: OpCode::{}, name: \"{}\", e: {}, f: {}, kind: InstructionKind::{}, general: GeneralOp::{} }},\n",
            op.ident,
            op.name,
            byte_expr(op.e),
            byte_expr(op.f),
            op.kind,
            op.general
        ));
    }
    out.push_str("];\n");

    fs::write(out_path, out).expect("write generated opcode tables");
}
