use std::collections::HashMap;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::GmbcError;
use crate::instruction::{
    BreakInstr, CallInstr, DoubleTypeInstr, EXIT_MAGIC_FIELD, GotoInstr, Instruction, MAGIC_SET, OpCode, PushInstr,
    PushValue, Reference, SetInstr, SingleTypeInstr, encode_offset24, uses_f_table, word_len_of, words_to_bytes,
};
use crate::recomp::parser::{Constant, Item, LabelValue, Operand, Owner, ParsedInstruction, Variable};
use crate::symbols::{EntryRecord, NO_OCCURRENCE, Patch, ReferenceDef, StringTable, SymbolTables};
use crate::types::{InstanceType, VariableType};

/// What to do with a branch to a label that is never defined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelPolicy {
    /// Log a warning and emit the `0xF00000` jump field.
    #[default]
    Sentinel,
    /// Fail with [`GmbcError::UnresolvedLabel`].
    Strict,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssembleOptions {
    pub unresolved_labels: LabelPolicy,
}

/// Identity of a variable or function occurrence, used to group occurrences
/// into chains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceSignature {
    pub name: String,
    pub instance: InstanceType,
    /// Owning code entry, for locals only.
    pub function: Option<String>,
    pub var_type: VariableType,
    /// Slot in a pre-existing variable table.
    pub slot: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub signature: ReferenceSignature,
    /// Byte offset of the instruction, relative to its code entry until
    /// linked.
    pub offset: u32,
}

/// One encoded code entry whose reference words are not chained yet.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledCode {
    pub name: String,
    pub words: Vec<u32>,
    pub variables: Vec<Occurrence>,
    pub functions: Vec<Occurrence>,
}

impl AssembledCode {
    pub fn size(&self) -> u32 {
        self.words.len() as u32 * 4
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        words_to_bytes(&self.words)
    }
}

fn sizing_len(ins: &ParsedInstruction, version: u32) -> usize {
    let magic = matches!(ins.operand, Operand::MagicSet);
    let kind = ins.op.for_version(version).kind();
    word_len_of(kind, ins.push_type(), magic).unwrap_or(1)
}

struct Encoder<'a> {
    name: &'a str,
    version: u32,
    symbols: &'a mut SymbolTables,
    options: AssembleOptions,
    labels: HashMap<String, u32>,
    out: AssembledCode,
}

impl Encoder<'_> {
    fn instance(&self, owner: &Owner) -> Result<InstanceType, GmbcError> {
        match owner {
            Owner::Instance(i) => Ok(*i),
            Owner::Object(name) => self
                .symbols
                .object_index(name)
                .map(|i| InstanceType::from(i as i16))
                .ok_or_else(|| GmbcError::UnknownObject { name: name.clone() }),
        }
    }

    fn signature(&self, name: &str, instance: InstanceType, var_type: VariableType) -> ReferenceSignature {
        ReferenceSignature {
            name: name.to_string(),
            instance,
            function: (instance == InstanceType::Local).then(|| self.name.to_string()),
            var_type,
            slot: None,
        }
    }

    fn variable(&mut self, v: &Variable, address: u32) -> Result<(InstanceType, Reference), GmbcError> {
        let instance = self.instance(&v.owner)?;
        let signature = self.signature(&v.name, instance, v.var_type);
        self.out.variables.push(Occurrence { signature, offset: address });
        Ok((instance, Reference::new(v.var_type)))
    }

    fn jump_field(&self, target: &Option<LabelValue>, address: u32) -> Result<u32, GmbcError> {
        let absolute = match target {
            None => return Ok(EXIT_MAGIC_FIELD),
            Some(LabelValue::Int(v)) => *v,
            Some(LabelValue::Name(n)) => match self.labels.get(n) {
                Some(&a) => a as i64,
                None => match self.options.unresolved_labels {
                    LabelPolicy::Strict => return Err(GmbcError::UnresolvedLabel { label: n.clone() }),
                    LabelPolicy::Sentinel => {
                        warn!(label = %n, code = self.name, "unresolved label, emitting sentinel jump");
                        return Ok(EXIT_MAGIC_FIELD);
                    }
                },
            },
        };
        encode_offset24(absolute - address as i64).ok_or(GmbcError::UnencodableJump { from: address, to: absolute })
    }

    fn encode(&mut self, ins: &ParsedInstruction, address: u32) -> Result<(), GmbcError> {
        let op = ins.op.for_version(self.version);
        let instr = match &ins.operand {
            Operand::Single { ty, extra } => Instruction::SingleType(SingleTypeInstr { op, ty: *ty, extra: *extra }),
            Operand::Double { ty1, ty2, comparison } => Instruction::DoubleType(DoubleTypeInstr {
                op,
                ty1: *ty1,
                ty2: *ty2,
                comparison: if op == OpCode::Cmp { *comparison } else { None },
            }),
            Operand::Branch(target) => Instruction::Goto(GotoInstr { op, field: self.jump_field(target, address)? }),
            Operand::MagicSet => {
                if !uses_f_table(self.version) {
                    return Err(GmbcError::Grammar {
                        line: ins.line,
                        column: ins.column,
                        message: format!("magic set does not exist in bytecode version {}", self.version),
                    });
                }
                self.out.words.push(MAGIC_SET);
                return Ok(());
            }
            Operand::Set { ty1, ty2, dest } => {
                let (instance, reference) = self.variable(dest, address)?;
                Instruction::Set(SetInstr { op, ty1: *ty1, ty2: *ty2, instance, dest: Some(reference) })
            }
            Operand::PushVariable(v) => {
                let (instance, reference) = self.variable(v, address)?;
                Instruction::Push(PushInstr { op, value: PushValue::Variable { instance, reference } })
            }
            Operand::PushString(s) => {
                let index = self.symbols.strings.intern(s);
                Instruction::Push(PushInstr { op, value: PushValue::String(index) })
            }
            Operand::PushConst(c) => {
                let value = match *c {
                    Constant::Int16(v) => PushValue::Int16(v),
                    Constant::Int32(v) => PushValue::Int32(v),
                    Constant::Int64(v) => PushValue::Int64(v),
                    Constant::Single(v) => PushValue::Single(v),
                    Constant::Double(v) => PushValue::Double(v),
                    Constant::Boolean(v) => PushValue::Boolean(v),
                };
                Instruction::Push(PushInstr { op, value })
            }
            Operand::Call { ret, argc, name, var_type } => {
                let signature = self.signature(name, InstanceType::StackTopOrGlobal, *var_type);
                self.out.functions.push(Occurrence { signature, offset: address });
                Instruction::Call(CallInstr { op, ret: *ret, argc: *argc, func: Reference::new(*var_type) })
            }
            Operand::Break { ty, signal } => Instruction::Break(BreakInstr { op, ty: *ty, signal: *signal }),
        };
        self.out.words.extend(instr.encode(self.version)?);
        Ok(())
    }
}

/// Encodes one code entry. Strings are interned into `symbols.strings`,
/// `[object]` owners are looked up in `symbols.objects`. Reference words are
/// left unchained until [`link`].
pub fn assemble(
    name: &str,
    items: &[Item],
    version: u32,
    symbols: &mut SymbolTables,
    options: AssembleOptions,
) -> Result<AssembledCode, GmbcError> {
    let mut labels = HashMap::new();
    let mut size = 0u32;
    for item in items {
        match item {
            Item::Label(LabelValue::Name(n)) => {
                if labels.insert(n.clone(), size).is_some() {
                    warn!(label = %n, code = name, "label defined twice, using the last definition");
                }
            }
            Item::Label(LabelValue::Int(v)) if *v != size as i64 => {
                debug!(label = v, address = size, code = name, "numeric label does not match its address");
            }
            Item::Label(_) => {}
            Item::Instruction(ins) => size += sizing_len(ins, version) as u32 * 4,
        }
    }

    let mut enc = Encoder {
        name,
        version,
        symbols,
        options,
        labels,
        out: AssembledCode { name: name.to_string(), words: Vec::new(), variables: Vec::new(), functions: Vec::new() },
    };
    for ins in items.iter().filter_map(|i| match i {
        Item::Instruction(ins) => Some(ins),
        Item::Label(_) => None,
    }) {
        let address = enc.out.size();
        enc.encode(ins, address)?;
    }
    debug!(name, words = enc.out.words.len(), "assembled");
    Ok(enc.out)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkOptions {
    /// Container offset the first code entry is placed at.
    pub base_offset: u32,
    /// Seed `prototype`, `@@array@@` and a local `arguments` per entry.
    pub implicit_variables: bool,
    /// Variable table the produced definitions must keep their slots in.
    pub existing_variables: Vec<ReferenceDef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedCode {
    pub data: Vec<u8>,
    pub entries: Vec<EntryRecord>,
    pub variables: Vec<ReferenceDef>,
    pub functions: Vec<ReferenceDef>,
    pub patches: Vec<Patch>,
}

impl LinkedCode {
    /// Replaces the reference and entry tables of `symbols` with the linked ones.
    pub fn update_symbols(&self, symbols: &mut SymbolTables) {
        symbols.variables = self.variables.clone();
        symbols.functions = self.functions.clone();
        symbols.entries = self.entries.clone();
        symbols.patches = self.patches.clone();
    }
}

/// Scopes tried, in order, when a dynamic owner has to be narrowed.
const WIDENING_ORDER: [InstanceType; 6] = [
    InstanceType::SelfInstance,
    InstanceType::Other,
    InstanceType::All,
    InstanceType::Noone,
    InstanceType::Global,
    InstanceType::Local,
];

/// Slot value of definitions that are neither locals nor stack-top variables.
const NO_SCOPE_SLOT: i32 = -6;

struct Chainer<'d> {
    data: &'d mut [u8],
    base_offset: u32,
    patches: Vec<Patch>,
}

impl Chainer<'_> {
    /// ORs `bits` into the reference word of the instruction at `occurrence`.
    fn or_word(&mut self, name: &str, occurrence: u32, bits: u32) -> Result<(), GmbcError> {
        let at = occurrence
            .checked_sub(self.base_offset)
            .map(|o| o as usize + 4)
            .filter(|&at| at + 4 <= self.data.len())
            .ok_or_else(|| GmbcError::InvalidReferenceChain { name: name.to_string(), offset: occurrence })?;
        let word = LittleEndian::read_u32(&self.data[at..at + 4]) | bits;
        LittleEndian::write_u32(&mut self.data[at..at + 4], word);
        self.patches.push(Patch { offset: occurrence + 4, value: word });
        Ok(())
    }
}

fn chains_with(target: &ReferenceSignature, other: &ReferenceSignature, extended: bool) -> bool {
    let scope_matches = !extended
        || target.slot.is_some()
        || other.instance.is_dynamic()
        || (other.instance == target.instance
            && (other.instance != InstanceType::Local || other.function == target.function));
    other.name == target.name && scope_matches && (target.slot.is_none() || target.slot == other.slot)
}

/// Chains every group of matching occurrences through their reference words
/// and returns one definition per group. `extended` selects variable
/// semantics (scope matching, instance type and slot on the definitions).
fn resolve_references(
    chainer: &mut Chainer<'_>,
    mut refs: Vec<Occurrence>,
    strings: &mut StringTable,
    extended: bool,
) -> Result<Vec<ReferenceDef>, GmbcError> {
    let mut defs: Vec<ReferenceDef> = Vec::new();
    let (mut local_count, mut stack_top_count) = (0i32, 0i32);

    let mut i = 0;
    while i < refs.len() {
        let mut target = refs[i].signature.clone();
        let start = refs[i].offset;

        if extended && target.slot.is_some() && target.instance.is_dynamic() {
            let later = &refs[i + 1..];
            target.instance = WIDENING_ORDER
                .into_iter()
                .find_map(|scope| {
                    later
                        .iter()
                        .find(|r| r.signature.name == target.name && r.signature.instance == scope)
                        .map(|r| r.signature.instance)
                })
                .unwrap_or(InstanceType::SelfInstance);
        }

        let mut count = 0;
        if start != NO_OCCURRENCE {
            count = 1;
            let mut last = start;
            let mut j = i + 1;
            while j < refs.len() {
                if refs[j].offset != NO_OCCURRENCE && chains_with(&target, &refs[j].signature, extended) {
                    let next = refs.remove(j);
                    chainer.or_word(&target.name, last, next.offset.wrapping_sub(last) & 0xFF_FFFF)?;
                    last = next.offset;
                    count += 1;
                } else {
                    j += 1;
                }
            }
            let name_index = strings.intern(&target.name);
            chainer.or_word(&target.name, last, name_index & 0xFF_FFFF)?;
        }

        let mut def = ReferenceDef::function(&target.name, count, start);
        if extended {
            def.instance_type = Some(target.instance);
            def.variable_type = Some(target.var_type);
            def.scope_slot = Some(if target.instance == InstanceType::Local {
                local_count
            } else if target.var_type == VariableType::StackTop {
                stack_top_count
            } else {
                NO_SCOPE_SLOT
            });
            if target.instance == InstanceType::Local {
                local_count += 1;
            } else if target.var_type == VariableType::StackTop {
                stack_top_count += 1;
            }
        }

        match target.slot {
            None => defs.push(def),
            Some(slot) => {
                let slot = slot as usize;
                if defs.len() <= slot {
                    defs.resize(slot + 1, ReferenceDef::vacant());
                }
                defs[slot] = def;
            }
        }
        i += 1;
    }

    Ok(defs)
}

fn implicit(name: &str, instance: InstanceType, function: Option<&str>, slot: Option<u32>) -> Occurrence {
    Occurrence {
        signature: ReferenceSignature {
            name: name.to_string(),
            instance,
            function: function.map(str::to_string),
            var_type: VariableType::Normal,
            slot,
        },
        offset: NO_OCCURRENCE,
    }
}

/// Slot of every distinct variable name, taken from `table` where possible.
fn assign_slots(refs: &mut [Occurrence], table: &[ReferenceDef]) {
    let mut fresh: HashMap<String, u32> = HashMap::new();
    let mut next = table.len() as u32;
    for r in refs.iter_mut().filter(|r| r.signature.slot.is_none()) {
        let sig = &r.signature;
        let found = table
            .iter()
            .position(|d| d.name == sig.name && d.instance_type == Some(sig.instance))
            .or_else(|| table.iter().position(|d| d.name == sig.name));
        let slot = match found {
            Some(p) => p as u32,
            None => *fresh.entry(sig.name.clone()).or_insert_with(|| {
                next += 1;
                next - 1
            }),
        };
        r.signature.slot = Some(slot);
    }
}

/// Concatenates assembled entries, chains their reference words and builds
/// the variable and function tables.
pub fn link(codes: &[AssembledCode], strings: &mut StringTable, options: &LinkOptions) -> Result<LinkedCode, GmbcError> {
    let mut words = Vec::new();
    let mut entries = Vec::with_capacity(codes.len());
    let mut variables = Vec::new();
    let mut functions = Vec::new();

    if options.implicit_variables {
        variables.push(implicit("prototype", InstanceType::SelfInstance, None, Some(0)));
        variables.push(implicit("@@array@@", InstanceType::SelfInstance, None, Some(1)));
    }

    for code in codes {
        let offset = options.base_offset + words.len() as u32 * 4;
        entries.push(EntryRecord { name: code.name.clone(), offset, size: code.size() });
        words.extend_from_slice(&code.words);

        let relocate = |o: &Occurrence| Occurrence { signature: o.signature.clone(), offset: o.offset + offset };
        functions.extend(code.functions.iter().map(relocate));
        if options.implicit_variables && code.variables.first().is_none_or(|v| v.signature.name != "arguments") {
            variables.push(implicit("arguments", InstanceType::Local, Some(&code.name), None));
        }
        variables.extend(code.variables.iter().map(relocate));
    }

    let table = &options.existing_variables;
    if !table.is_empty() {
        assign_slots(&mut variables, table);
    }

    let mut data = words_to_bytes(&words);
    let mut chainer = Chainer { data: &mut data, base_offset: options.base_offset, patches: Vec::new() };
    let functions = resolve_references(&mut chainer, functions, strings, false)?;
    let mut variables = resolve_references(&mut chainer, variables, strings, true)?;
    let patches = chainer.patches;

    for (i, existing) in table.iter().enumerate() {
        match variables.get_mut(i) {
            Some(def) if def.name == existing.name => {
                def.scope_slot = existing.scope_slot;
                def.instance_type = existing.instance_type;
            }
            Some(def) if def.name.is_empty() && def.occurrences == 0 => {
                *def = ReferenceDef { occurrences: 0, first_offset: NO_OCCURRENCE, ..existing.clone() };
            }
            Some(_) => {}
            None => variables.push(ReferenceDef { occurrences: 0, first_offset: NO_OCCURRENCE, ..existing.clone() }),
        }
    }

    debug!(entries = entries.len(), variables = variables.len(), functions = functions.len(), "linked");
    Ok(LinkedCode { data, entries, variables, functions, patches })
}
