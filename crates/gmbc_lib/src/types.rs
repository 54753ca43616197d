use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataType {
    Double = 0x0,
    Single = 0x1,
    Int32 = 0x2,
    Int64 = 0x3,
    Boolean = 0x4,
    Variable = 0x5,
    String = 0x6,
    Instance = 0x7,
    Int16 = 0xF,
}

impl DataType {
    /// Size in bytes of a value of this type when stored inline after a push.
    /// Strings are stored as a 4-byte string-table index.
    pub fn size(self) -> Option<u32> {
        match self {
            DataType::Double | DataType::Int64 | DataType::Variable => Some(8),
            DataType::Single | DataType::Int32 | DataType::Boolean | DataType::String => Some(4),
            DataType::Int16 => Some(2),
            DataType::Instance => None,
        }
    }

    pub fn pretty(self) -> &'static str {
        match self {
            DataType::Double => "double",
            DataType::Single => "single",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Boolean => "bool",
            DataType::Variable => "var",
            DataType::String => "string",
            DataType::Instance => "inst",
            DataType::Int16 => "int16",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.pretty())
    }
}

/// Owner of a variable access. Negative values name a scope, positive values
/// are object indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i16", into = "i16")]
pub enum InstanceType {
    StackTopOrGlobal,
    SelfInstance,
    Other,
    All,
    Noone,
    Global,
    Unknown,
    Local,
    Object(u16),
    Special(i16),
}

impl InstanceType {
    pub fn raw(self) -> i16 {
        match self {
            InstanceType::StackTopOrGlobal => 0,
            InstanceType::SelfInstance => -1,
            InstanceType::Other => -2,
            InstanceType::All => -3,
            InstanceType::Noone => -4,
            InstanceType::Global => -5,
            InstanceType::Unknown => -6,
            InstanceType::Local => -7,
            InstanceType::Object(id) => id as i16,
            InstanceType::Special(v) => v,
        }
    }

    /// True for `StackTopOrGlobal` and object indices, i.e. owners that are
    /// not one of the fixed scopes.
    pub fn is_dynamic(self) -> bool {
        self.raw() >= 0
    }

    pub fn keyword(self) -> Option<&'static str> {
        Some(match self {
            InstanceType::StackTopOrGlobal => "stog",
            InstanceType::SelfInstance => "self",
            InstanceType::Other => "other",
            InstanceType::All => "all",
            InstanceType::Noone => "noone",
            InstanceType::Global => "global",
            InstanceType::Unknown => "unknown",
            InstanceType::Local => "local",
            InstanceType::Object(_) | InstanceType::Special(_) => return None,
        })
    }
}

impl From<i16> for InstanceType {
    fn from(v: i16) -> Self {
        match v {
            0 => InstanceType::StackTopOrGlobal,
            -1 => InstanceType::SelfInstance,
            -2 => InstanceType::Other,
            -3 => InstanceType::All,
            -4 => InstanceType::Noone,
            -5 => InstanceType::Global,
            -6 => InstanceType::Unknown,
            -7 => InstanceType::Local,
            v if v > 0 => InstanceType::Object(v as u16),
            v => InstanceType::Special(v),
        }
    }
}

impl From<InstanceType> for i16 {
    fn from(v: InstanceType) -> Self {
        v.raw()
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.keyword() {
            Some(k) => f.write_str(k),
            None => write!(f, "{}", self.raw()),
        }
    }
}

/// Top byte of a reference word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize)]
#[repr(u8)]
pub enum VariableType {
    Array = 0x00,
    StackTop = 0x80,
    Normal = 0xA0,
    Unknown = 0xE0,
}

impl VariableType {
    pub fn suffix(self) -> &'static str {
        match self {
            VariableType::Array => "[]",
            VariableType::StackTop => "*",
            VariableType::Normal => "",
            VariableType::Unknown => "?",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize)]
#[repr(u8)]
pub enum ComparisonType {
    LowerThan = 1,
    LowerOrEqual = 2,
    Equal = 3,
    NotEqual = 4,
    GreaterOrEqual = 5,
    GreaterThan = 6,
}

impl ComparisonType {
    pub fn symbol(self) -> &'static str {
        match self {
            ComparisonType::LowerThan => "<",
            ComparisonType::LowerOrEqual => "<=",
            ComparisonType::Equal => "==",
            ComparisonType::NotEqual => "!=",
            ComparisonType::GreaterOrEqual => ">=",
            ComparisonType::GreaterThan => ">",
        }
    }

    pub fn from_symbol(s: &str) -> Option<Self> {
        Some(match s {
            "<" => ComparisonType::LowerThan,
            "<=" => ComparisonType::LowerOrEqual,
            "==" => ComparisonType::Equal,
            "!=" => ComparisonType::NotEqual,
            ">=" => ComparisonType::GreaterOrEqual,
            ">" => ComparisonType::GreaterThan,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BranchType {
    Unconditional,
    IfTrue,
    IfFalse,
}

impl BranchType {
    pub fn invert(self) -> Self {
        match self {
            BranchType::Unconditional => BranchType::Unconditional,
            BranchType::IfTrue => BranchType::IfFalse,
            BranchType::IfFalse => BranchType::IfTrue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn invert_is_an_involution() {
        for b in [BranchType::Unconditional, BranchType::IfTrue, BranchType::IfFalse] {
            assert_eq!(b.invert().invert(), b, "Failed for input: {:?}", b);
        }
        assert_eq!(BranchType::Unconditional.invert(), BranchType::Unconditional);
        assert_eq!(BranchType::IfTrue.invert(), BranchType::IfFalse);
    }

    #[test]
    fn data_type_sizes() {
        let cases = [
            (DataType::Double, Some(8)),
            (DataType::Int64, Some(8)),
            (DataType::Variable, Some(8)),
            (DataType::Single, Some(4)),
            (DataType::Int32, Some(4)),
            (DataType::Boolean, Some(4)),
            (DataType::String, Some(4)),
            (DataType::Int16, Some(2)),
            (DataType::Instance, None),
        ];
        for (ty, size) in cases {
            assert_eq!(ty.size(), size, "Failed for input: {:?}", ty);
        }
    }

    #[test]
    fn instance_type_raw_values() {
        for v in [-9i16, -7, -6, -5, -4, -3, -2, -1, 0, 1, 12, i16::MAX] {
            assert_eq!(InstanceType::from(v).raw(), v, "Failed for input: {}", v);
        }
        assert_eq!(InstanceType::from(3), InstanceType::Object(3));
        assert_eq!(InstanceType::from(-9), InstanceType::Special(-9));
        assert!(InstanceType::StackTopOrGlobal.is_dynamic());
        assert!(!InstanceType::Local.is_dynamic());
    }

    #[test]
    fn unknown_bytes_are_rejected() {
        assert!(DataType::try_from(0x8u8).is_err());
        assert!(VariableType::try_from(0x20u8).is_err());
        assert!(ComparisonType::try_from(0u8).is_err());
        assert_eq!(DataType::try_from(0xFu8).ok(), Some(DataType::Int16));
    }

    #[test]
    fn comparison_symbols() {
        for v in 1u8..=6 {
            let c = ComparisonType::try_from(v).unwrap();
            assert_eq!(ComparisonType::from_symbol(c.symbol()), Some(c), "Failed for input: {}", v);
        }
    }
}
