use byteorder::{ByteOrder, LittleEndian};

use crate::types::{BranchType, ComparisonType, DataType, InstanceType, VariableType};
use crate::{GmbcError, Malformed};

mod tables {
    use super::{GeneralOp, InstructionKind};
    include!(concat!(env!("OUT_DIR"), "/opcode_tables.rs"));
}

pub use tables::{OPCODE_INFO, OpCode, OpInfo};

/// The one-word array-set that carries its size implicitly.
pub const MAGIC_SET: u32 = 0x455F_0006;

/// Jump field used by `popenv` when it leaves the environment without a target.
pub const EXIT_MAGIC_FIELD: u32 = 0x00F0_0000;

/// Versions above this one use the F opcode table.
pub const LAST_E_VERSION: u32 = 0xE;

pub fn uses_f_table(version: u32) -> bool {
    version > LAST_E_VERSION
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionKind {
    SingleType,
    DoubleType,
    Goto,
    Set,
    Push,
    Call,
    Break,
}

/// Operation an opcode performs, independent of the table it was encoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeneralOp {
    Conv,
    Mul,
    Div,
    Rem,
    Mod,
    Add,
    Sub,
    And,
    Or,
    Xor,
    Neg,
    Not,
    Shl,
    Shr,
    Cmp,
    Set,
    Dup,
    Ret,
    Exit,
    Pop,
    Br,
    Brt,
    Brf,
    PushEnv,
    PopEnv,
    Push,
    Call,
    Break,
}

impl OpCode {
    pub fn info(self) -> &'static OpInfo {
        &OPCODE_INFO[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn kind(self) -> InstructionKind {
        self.info().kind
    }

    pub fn general(self) -> GeneralOp {
        self.info().general
    }

    pub fn byte(self, version: u32) -> Option<u8> {
        let info = self.info();
        if uses_f_table(version) { info.f } else { info.e }
    }

    pub fn from_byte(byte: u8, version: u32) -> Option<OpCode> {
        OPCODE_INFO
            .iter()
            .find(|i| {
                let b = if uses_f_table(version) { i.f } else { i.e };
                b == Some(byte)
            })
            .map(|i| i.code)
    }

    pub fn from_name(name: &str) -> Option<OpCode> {
        OPCODE_INFO.iter().find(|i| i.name.eq_ignore_ascii_case(name)).map(|i| i.code)
    }

    /// Comparison encoded by the opcode itself (E table compare opcodes).
    pub fn implied_comparison(self) -> Option<ComparisonType> {
        Some(match self {
            OpCode::Clt => ComparisonType::LowerThan,
            OpCode::Cle => ComparisonType::LowerOrEqual,
            OpCode::Ceq => ComparisonType::Equal,
            OpCode::Cne => ComparisonType::NotEqual,
            OpCode::Cge => ComparisonType::GreaterOrEqual,
            OpCode::Cgt => ComparisonType::GreaterThan,
            _ => return None,
        })
    }

    pub fn for_comparison(c: ComparisonType) -> OpCode {
        match c {
            ComparisonType::LowerThan => OpCode::Clt,
            ComparisonType::LowerOrEqual => OpCode::Cle,
            ComparisonType::Equal => OpCode::Ceq,
            ComparisonType::NotEqual => OpCode::Cne,
            ComparisonType::GreaterOrEqual => OpCode::Cge,
            ComparisonType::GreaterThan => OpCode::Cgt,
        }
    }
}

/// A variable or function access site: a type tag in the top byte and the
/// 24-bit distance to the next occurrence of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reference {
    pub var_type: VariableType,
    pub next: u32,
}

impl Reference {
    pub fn new(var_type: VariableType) -> Self {
        Self { var_type, next: 0 }
    }

    pub fn decode(word: u32) -> Result<Self, Malformed> {
        let tag = (word >> 24) as u8;
        let var_type = VariableType::try_from(tag).map_err(|_| Malformed::VariableType(tag))?;
        Ok(Self { var_type, next: word & 0xFF_FFFF })
    }

    pub fn encode(self) -> u32 {
        (u8::from(self.var_type) as u32) << 24 | (self.next & 0xFF_FFFF)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SingleTypeInstr {
    pub op: OpCode,
    pub ty: DataType,
    /// Low 16 bits; only `dup` gives them a meaning.
    pub extra: u16,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DoubleTypeInstr {
    pub op: OpCode,
    pub ty1: DataType,
    pub ty2: DataType,
    pub comparison: Option<ComparisonType>,
}

impl DoubleTypeInstr {
    pub fn comparison_type(&self) -> Option<ComparisonType> {
        self.op.implied_comparison().or(self.comparison)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GotoInstr {
    pub op: OpCode,
    /// Raw 24-bit jump field, in words.
    pub field: u32,
}

impl GotoInstr {
    pub fn is_exit_magic(&self) -> bool {
        self.field == EXIT_MAGIC_FIELD
    }

    /// Byte distance from this instruction to its target.
    pub fn byte_offset(&self) -> Option<i32> {
        if self.is_exit_magic() {
            None
        } else {
            Some(decode_offset24(self.field))
        }
    }

    pub fn target(&self, address: u32) -> Option<i64> {
        self.byte_offset().map(|off| address as i64 + off as i64)
    }

    pub fn branch_type(&self) -> BranchType {
        match self.op.general() {
            GeneralOp::Brt => BranchType::IfTrue,
            GeneralOp::Brf => BranchType::IfFalse,
            _ => BranchType::Unconditional,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetInstr {
    pub op: OpCode,
    pub ty1: DataType,
    pub ty2: DataType,
    pub instance: InstanceType,
    /// `None` for the magic array-set, which has no reference word.
    pub dest: Option<Reference>,
}

impl SetInstr {
    pub fn is_magic(&self) -> bool {
        self.dest.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PushValue {
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Single(f32),
    Double(f64),
    /// Raw 4-byte truth value.
    Boolean(u32),
    /// String table index.
    String(u32),
    Variable { instance: InstanceType, reference: Reference },
}

impl PushValue {
    pub fn data_type(&self) -> DataType {
        match self {
            PushValue::Int16(_) => DataType::Int16,
            PushValue::Int32(_) => DataType::Int32,
            PushValue::Int64(_) => DataType::Int64,
            PushValue::Single(_) => DataType::Single,
            PushValue::Double(_) => DataType::Double,
            PushValue::Boolean(_) => DataType::Boolean,
            PushValue::String(_) => DataType::String,
            PushValue::Variable { .. } => DataType::Variable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PushInstr {
    pub op: OpCode,
    pub value: PushValue,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallInstr {
    pub op: OpCode,
    pub ret: DataType,
    pub argc: u16,
    pub func: Reference,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakInstr {
    pub op: OpCode,
    pub ty: DataType,
    pub signal: i16,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instruction {
    SingleType(SingleTypeInstr),
    DoubleType(DoubleTypeInstr),
    Goto(GotoInstr),
    Set(SetInstr),
    Push(PushInstr),
    Call(CallInstr),
    Break(BreakInstr),
}

impl Instruction {
    pub fn op(&self) -> OpCode {
        match self {
            Instruction::SingleType(i) => i.op,
            Instruction::DoubleType(i) => i.op,
            Instruction::Goto(i) => i.op,
            Instruction::Set(i) => i.op,
            Instruction::Push(i) => i.op,
            Instruction::Call(i) => i.op,
            Instruction::Break(i) => i.op,
        }
    }

    pub fn kind(&self) -> InstructionKind {
        self.op().kind()
    }

    pub fn word_len(&self) -> usize {
        let (ty, magic) = match self {
            Instruction::Push(p) => (Some(p.value.data_type()), false),
            Instruction::Set(s) => (None, s.is_magic()),
            _ => (None, false),
        };
        // Every variant carries a sized type, so this always succeeds.
        word_len_of(self.kind(), ty, magic).unwrap_or(1)
    }

    pub fn as_goto(&self) -> Option<&GotoInstr> {
        match self {
            Instruction::Goto(g) => Some(g),
            _ => None,
        }
    }

    /// Reference word carried by set, variable push and call instructions.
    pub fn reference(&self) -> Option<Reference> {
        match self {
            Instruction::Set(s) => s.dest,
            Instruction::Push(PushInstr { value: PushValue::Variable { reference, .. }, .. }) => Some(*reference),
            Instruction::Call(c) => Some(c.func),
            _ => None,
        }
    }

    pub fn encode(&self, version: u32) -> Result<Vec<u32>, GmbcError> {
        let op = self.op();
        let byte = op.byte(version).ok_or(GmbcError::OpcodeUnavailable { name: op.name(), version })?;
        let head = (byte as u32) << 24;
        let ty = |t: DataType| (u8::from(t) as u32) << 16;
        let pair = |a: DataType, b: DataType| ((u8::from(a) as u32 & 0xF) | (u8::from(b) as u32 & 0xF) << 4) << 16;

        let words = match self {
            Instruction::SingleType(i) => vec![head | ty(i.ty) | i.extra as u32],
            Instruction::DoubleType(i) => {
                let cmp = i.comparison.map(|c| u8::from(c) as u32).unwrap_or(0);
                vec![head | pair(i.ty1, i.ty2) | cmp << 8]
            }
            Instruction::Goto(i) => vec![head | (i.field & 0xFF_FFFF)],
            Instruction::Set(i) => {
                let first = head | pair(i.ty1, i.ty2) | i.instance.raw() as u16 as u32;
                match i.dest {
                    Some(r) => vec![first, r.encode()],
                    None => vec![first],
                }
            }
            Instruction::Push(i) => {
                let dt = ty(i.value.data_type());
                match i.value {
                    PushValue::Int16(v) => vec![head | dt | v as u16 as u32],
                    PushValue::Variable { instance, reference } => {
                        vec![head | dt | instance.raw() as u16 as u32, reference.encode()]
                    }
                    PushValue::Int32(v) => vec![head | dt, v as u32],
                    PushValue::Single(v) => vec![head | dt, v.to_bits()],
                    PushValue::Boolean(v) | PushValue::String(v) => vec![head | dt, v],
                    PushValue::Int64(v) => {
                        let v = v as u64;
                        vec![head | dt, v as u32, (v >> 32) as u32]
                    }
                    PushValue::Double(v) => {
                        let v = v.to_bits();
                        vec![head | dt, v as u32, (v >> 32) as u32]
                    }
                }
            }
            Instruction::Call(i) => vec![head | ty(i.ret) | i.argc as u32, i.func.encode()],
            Instruction::Break(i) => vec![head | ty(i.ty) | i.signal as u16 as u32],
        };
        debug_assert_eq!(words.len(), self.word_len());
        Ok(words)
    }
}

/// Word length of an instruction of `kind`. `data_type` is only consulted for
/// pushes, `magic` only for sets.
pub fn word_len_of(kind: InstructionKind, data_type: Option<DataType>, magic: bool) -> Option<usize> {
    match kind {
        InstructionKind::Push => match data_type? {
            DataType::Int16 => Some(1),
            DataType::Variable => Some(2),
            t => t.size().map(|s| s.div_ceil(4) as usize + 1),
        },
        InstructionKind::Set if magic => Some(1),
        InstructionKind::Set | InstructionKind::Call => Some(2),
        InstructionKind::SingleType | InstructionKind::DoubleType | InstructionKind::Goto | InstructionKind::Break => Some(1),
    }
}

/// Converts a raw 24-bit jump field (in words) into a signed byte offset.
pub fn decode_offset24(field: u32) -> i32 {
    let a = (field & 0xFF_FFFF) << 2;
    if a & 0xFF00_0000 != 0 {
        (a & 0xFF_FFFF) as i32 - 0x100_0000
    } else {
        a as i32
    }
}

/// Inverse of [`decode_offset24`]. Fails for offsets that are not word
/// aligned or do not fit the field.
pub fn encode_offset24(byte_offset: i64) -> Option<u32> {
    if byte_offset % 4 != 0 || !(-0x100_0000..=0xFF_FFFC).contains(&byte_offset) {
        return None;
    }
    let mut off = byte_offset as i32 as u32;
    if byte_offset < 0 {
        off = (off & 0xFF_FFFF) + 0x100_0000;
    }
    Some((off / 4) & 0xFF_FFFF)
}

pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    let mut out = vec![0u8; words.len() * 4];
    LittleEndian::write_u32_into(words, &mut out);
    out
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8], word_index: usize) -> Self {
        Self { buf, pos: word_index * 4 }
    }

    fn remaining_words(&self) -> usize {
        self.buf.len().saturating_sub(self.pos) / 4
    }

    fn get_u32(&mut self) -> Result<u32, Malformed> {
        if self.remaining_words() < 1 {
            return Err(Malformed::Truncated { needed: 1, remaining: 0 });
        }
        let v = LittleEndian::read_u32(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(v)
    }

    fn get_u64(&mut self) -> Result<u64, Malformed> {
        if self.remaining_words() < 2 {
            return Err(Malformed::Truncated { needed: 2, remaining: self.remaining_words() });
        }
        let v = LittleEndian::read_u64(&self.buf[self.pos..self.pos + 8]);
        self.pos += 8;
        Ok(v)
    }
}

fn data_type(byte: u8) -> Result<DataType, Malformed> {
    DataType::try_from(byte).map_err(|_| Malformed::DataType(byte))
}

fn type_pair(word: u32) -> Result<(DataType, DataType), Malformed> {
    let b = (word >> 16) as u8;
    Ok((data_type(b & 0xF)?, data_type(b >> 4)?))
}

/// Decodes the instruction starting at `word_index` and returns it with its
/// length in words.
pub fn decode(buf: &[u8], word_index: usize, version: u32) -> Result<(Instruction, usize), GmbcError> {
    let offset = (word_index * 4) as u32;
    decode_inner(buf, word_index, version).map_err(|kind| GmbcError::MalformedInstruction { offset, kind })
}

fn decode_inner(buf: &[u8], word_index: usize, version: u32) -> Result<(Instruction, usize), Malformed> {
    let mut r = Reader::new(buf, word_index);
    let word = r.get_u32()?;
    let byte = (word >> 24) as u8;
    let op = OpCode::from_byte(byte, version).ok_or(Malformed::UnknownOpcode { opcode: byte, version })?;
    let kind = op.kind();
    let type_byte = ((word >> 16) & 0xFF) as u8;
    let magic = kind == InstructionKind::Set && uses_f_table(version) && word == MAGIC_SET;

    let push_type = if kind == InstructionKind::Push { Some(data_type(type_byte)?) } else { None };
    let len = word_len_of(kind, push_type, magic).ok_or(Malformed::DataType(type_byte))?;
    let remaining = r.remaining_words() + 1;
    if len > remaining {
        return Err(Malformed::Truncated { needed: len, remaining });
    }

    let low16 = (word & 0xFFFF) as u16;
    let instr = match kind {
        InstructionKind::SingleType => Instruction::SingleType(SingleTypeInstr { op, ty: data_type(type_byte)?, extra: low16 }),
        InstructionKind::DoubleType => {
            let (ty1, ty2) = type_pair(word)?;
            let cmp_byte = ((word >> 8) & 0xFF) as u8;
            let comparison = match cmp_byte {
                0 => None,
                b => Some(ComparisonType::try_from(b).map_err(|_| Malformed::ComparisonType(b))?),
            };
            Instruction::DoubleType(DoubleTypeInstr { op, ty1, ty2, comparison })
        }
        InstructionKind::Goto => Instruction::Goto(GotoInstr { op, field: word & 0xFF_FFFF }),
        InstructionKind::Set => {
            let (ty1, ty2) = type_pair(word)?;
            let dest = if magic { None } else { Some(Reference::decode(r.get_u32()?)?) };
            Instruction::Set(SetInstr { op, ty1, ty2, instance: InstanceType::from(low16 as i16), dest })
        }
        InstructionKind::Push => {
            let value = match push_type.unwrap_or(DataType::Int16) {
                DataType::Int16 => PushValue::Int16(low16 as i16),
                DataType::Variable => PushValue::Variable {
                    instance: InstanceType::from(low16 as i16),
                    reference: Reference::decode(r.get_u32()?)?,
                },
                DataType::Int32 => PushValue::Int32(r.get_u32()? as i32),
                DataType::Single => PushValue::Single(f32::from_bits(r.get_u32()?)),
                DataType::Boolean => PushValue::Boolean(r.get_u32()?),
                DataType::String => PushValue::String(r.get_u32()?),
                DataType::Int64 => PushValue::Int64(r.get_u64()? as i64),
                DataType::Double => PushValue::Double(f64::from_bits(r.get_u64()?)),
                DataType::Instance => return Err(Malformed::DataType(type_byte)),
            };
            Instruction::Push(PushInstr { op, value })
        }
        InstructionKind::Call => Instruction::Call(CallInstr {
            op,
            ret: data_type(type_byte)?,
            argc: low16,
            func: Reference::decode(r.get_u32()?)?,
        }),
        InstructionKind::Break => Instruction::Break(BreakInstr { op, ty: data_type(type_byte)?, signal: low16 as i16 }),
    };

    if instr.word_len() != len {
        return Err(Malformed::LengthMismatch { expected: len, actual: instr.word_len() });
    }
    Ok((instr, len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const F: u32 = 0x10;
    const E: u32 = 0xE;

    fn bytes(words: &[u32]) -> Vec<u8> {
        words_to_bytes(words)
    }

    #[test]
    fn offset24_round_trip() {
        let cases = [0i64, 4, 8, -4, -8, 0x1000, -0x1000, 0xFF_FFFC, -0x100_0000];
        for rel in cases {
            let field = encode_offset24(rel).unwrap();
            assert_eq!(decode_offset24(field) as i64, rel, "Failed for input: {}", rel);
        }
        for (addr, target) in [(0x40i64, 0x10i64), (0x10, 0x40), (0, 0), (0x100, 0x1_0000)] {
            let field = encode_offset24(target - addr).unwrap();
            assert_eq!(addr + decode_offset24(field) as i64, target, "Failed for input: {}", addr);
        }
    }

    #[test]
    fn offset24_rejects_unrepresentable() {
        assert_eq!(encode_offset24(2), None);
        assert_eq!(encode_offset24(0x100_0000), None);
        assert_eq!(encode_offset24(-0x100_0004), None);
    }

    #[test]
    fn negative_fields_are_sign_normalized() {
        // 0xFFFFFE words = -2 words
        assert_eq!(decode_offset24(0xFF_FFFE), -8);
        assert_eq!(decode_offset24(0x00_0002), 8);
    }

    #[test]
    fn tables_are_disjoint_per_version() {
        assert_eq!(OpCode::from_byte(0x84, F), Some(OpCode::PushI16));
        assert_eq!(OpCode::from_byte(0x84, E), None);
        assert_eq!(OpCode::from_byte(0x11, E), Some(OpCode::Clt));
        assert_eq!(OpCode::from_byte(0x11, F), Some(OpCode::Neg));
        assert_eq!(OpCode::from_byte(0xC0, E), Some(OpCode::Push));
        assert_eq!(OpCode::from_byte(0xC0, F), Some(OpCode::PushCst));
        for info in OPCODE_INFO {
            if let Some(b) = info.e {
                assert_eq!(OpCode::from_byte(b, E), Some(info.code), "Failed for input: {}", info.name);
            }
            if let Some(b) = info.f {
                assert_eq!(OpCode::from_byte(b, F), Some(info.code), "Failed for input: {}", info.name);
            }
        }
    }

    #[test]
    fn unknown_opcode_is_malformed() {
        let buf = bytes(&[0x0100_0000]);
        let err = decode(&buf, 0, F).unwrap_err();
        assert!(matches!(
            err,
            GmbcError::MalformedInstruction { offset: 0, kind: Malformed::UnknownOpcode { opcode: 0x01, version: F } }
        ));
    }

    #[test]
    fn truncated_push_is_malformed() {
        // push.cst double needs three words
        let buf = bytes(&[0xC000_0000, 0]);
        let err = decode(&buf, 0, F).unwrap_err();
        assert!(matches!(
            err,
            GmbcError::MalformedInstruction { kind: Malformed::Truncated { needed: 3, remaining: 2 }, .. }
        ));
    }

    #[test]
    fn instance_push_is_malformed() {
        let buf = bytes(&[0xC007_0000, 0]);
        assert!(decode(&buf, 0, F).is_err());
    }

    #[test]
    fn decodes_each_shape() {
        let buf = bytes(&[
            0x840F_0005, // push.i16 5
            0xC002_0000, 42, // push.cst int32 42
            0xC000_0000, 0, 0x3FF8_0000, // push.cst double 1.5
            0xC3_05_FFFF, 0xA000_0000, // push.var self.x
            0x9C02_0000, // ret int32
            0xB6FF_FFFE, // br -8
            0x4552_FFFF, 0xA000_0000, // set int32:var self.x
            MAGIC_SET,
            0xD902_0003, 0xA000_0000, // call int32:3
            0x1522_0500, // cmp >= int32:int32
        ]);
        let mut word = 0;
        let mut got = Vec::new();
        while word * 4 < buf.len() {
            let (ins, len) = decode(&buf, word, F).unwrap();
            got.push((ins, len));
            word += len;
        }
        let lens: Vec<usize> = got.iter().map(|(_, l)| *l).collect();
        assert_eq!(lens, vec![1, 2, 3, 2, 1, 1, 2, 1, 2, 1]);
        assert_eq!(
            got[0].0,
            Instruction::Push(PushInstr { op: OpCode::PushI16, value: PushValue::Int16(5) })
        );
        assert_eq!(got[2].0, Instruction::Push(PushInstr { op: OpCode::PushCst, value: PushValue::Double(1.5) }));
        assert_eq!(
            got[3].0,
            Instruction::Push(PushInstr {
                op: OpCode::PushVar,
                value: PushValue::Variable {
                    instance: InstanceType::SelfInstance,
                    reference: Reference::new(VariableType::Normal)
                },
            })
        );
        assert_eq!(got[5].0.as_goto().unwrap().byte_offset(), Some(-8));
        match got[7].0 {
            Instruction::Set(s) => {
                assert!(s.is_magic());
                assert_eq!((s.ty1, s.ty2), (DataType::Int16, DataType::Variable));
            }
            other => panic!("expected magic set, got {other:?}"),
        }
        match got[9].0 {
            Instruction::DoubleType(d) => assert_eq!(d.comparison_type(), Some(ComparisonType::GreaterOrEqual)),
            other => panic!("expected cmp, got {other:?}"),
        }
    }

    #[test]
    fn word_len_matches_kind_and_type() {
        let buf = bytes(&[
            0xC006_0000, 3, // push string
            0xC003_0000, 1, 0, // push int64
            0xC001_0000, 0, // push single
            0xC004_0000, 1, // push bool
        ]);
        let mut word = 0;
        while word * 4 < buf.len() {
            let (ins, len) = decode(&buf, word, E).unwrap();
            let ty = match ins {
                Instruction::Push(p) => Some(p.value.data_type()),
                _ => None,
            };
            assert_eq!(Some(len), word_len_of(ins.kind(), ty, false), "Failed for input: {:?}", ins);
            word += len;
        }
    }

    #[test]
    fn encode_reproduces_decoded_words() {
        let words = [
            0x840F_FFFB, 0xC002_0000, 0x7FFF_FFFF, 0xC3_05_FFF9, 0x8000_0010, 0x4552_FFFB, 0xA000_0004,
            0xB800_0003, 0x8600_0001 | 0x02 << 16, 0xFF0F_FFFF, MAGIC_SET, 0xBB_F0_0000,
        ];
        let buf = bytes(&words);
        let mut out = Vec::new();
        let mut word = 0;
        while word * 4 < buf.len() {
            let (ins, len) = decode(&buf, word, F).unwrap();
            out.extend(ins.encode(F).unwrap());
            word += len;
        }
        assert_eq!(out, words.to_vec());
    }

    #[test]
    fn encoding_unavailable_opcode_fails() {
        let ins = Instruction::DoubleType(DoubleTypeInstr {
            op: OpCode::Clt,
            ty1: DataType::Int32,
            ty2: DataType::Int32,
            comparison: None,
        });
        assert!(matches!(ins.encode(F), Err(GmbcError::OpcodeUnavailable { name: "clt", .. })));
        assert!(ins.encode(E).is_ok());
    }
}
