use std::collections::HashMap;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::GmbcError;
use crate::types::{InstanceType, VariableType};

/// `first_offset` of a definition that has not been referenced yet.
pub const NO_OCCURRENCE: u32 = 0xFFFF_FFFF;

/// Lookup of names the bytecode refers to by index.
pub trait Resolver {
    fn resolve_string(&self, index: u32) -> Option<&str>;
    fn resolve_object(&self, index: u16) -> Option<&str>;
}

/// Interning string table. Serializes as a plain list of strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct StringTable {
    strings: Vec<String>,
    index: HashMap<String, u32>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, index: u32) -> Option<&str> {
        self.strings.get(index as usize).map(String::as_str)
    }

    pub fn index_of(&self, s: &str) -> Option<u32> {
        self.index.get(s).copied()
    }

    pub fn intern(&mut self, s: &str) -> u32 {
        if let Some(i) = self.index_of(s) {
            return i;
        }
        let i = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), i);
        i
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.strings
    }
}

impl From<Vec<String>> for StringTable {
    fn from(strings: Vec<String>) -> Self {
        let mut index = HashMap::new();
        for (i, s) in strings.iter().enumerate() {
            index.entry(s.clone()).or_insert(i as u32);
        }
        Self { strings, index }
    }
}

impl From<StringTable> for Vec<String> {
    fn from(t: StringTable) -> Self {
        t.strings
    }
}

/// Per-name summary entry of the variable and function sections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceDef {
    pub name: String,
    pub occurrences: u32,
    pub first_offset: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<InstanceType>,
    /// Local slot for locals, stack-top slot for instance variables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_slot: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable_type: Option<VariableType>,
}

impl ReferenceDef {
    pub fn function(name: &str, occurrences: u32, first_offset: u32) -> Self {
        Self {
            name: name.to_string(),
            occurrences,
            first_offset,
            instance_type: None,
            scope_slot: None,
            variable_type: None,
        }
    }

    /// Placeholder for an unused slot of a variable table.
    pub fn vacant() -> Self {
        Self::function("", 0, NO_OCCURRENCE)
    }
}

/// A code entry inside a bytecode blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub name: String,
    pub offset: u32,
    pub size: u32,
}

/// A 32-bit word rewritten while linking occurrence chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub offset: u32,
    pub value: u32,
}

/// Everything the pipeline needs from the surrounding container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolTables {
    pub strings: StringTable,
    pub objects: Vec<String>,
    pub variables: Vec<ReferenceDef>,
    pub functions: Vec<ReferenceDef>,
    pub entries: Vec<EntryRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<Patch>,
}

impl Resolver for SymbolTables {
    fn resolve_string(&self, index: u32) -> Option<&str> {
        self.strings.get(index)
    }

    fn resolve_object(&self, index: u16) -> Option<&str> {
        self.objects.get(index as usize).map(String::as_str)
    }
}

impl SymbolTables {
    pub fn object_index(&self, name: &str) -> Option<u16> {
        self.objects.iter().position(|o| o == name).map(|i| i as u16)
    }
}

/// Variable and function definitions plus the occurrence-address maps
/// derived from their chains.
#[derive(Debug, Clone, Default)]
pub struct RefData {
    pub variables: Vec<ReferenceDef>,
    pub functions: Vec<ReferenceDef>,
    variable_at: HashMap<u32, usize>,
    function_at: HashMap<u32, usize>,
}

impl RefData {
    /// Builds the address maps by walking every chain. Definition offsets are
    /// absolute; `data` starts at `base_offset`.
    pub fn from_chains(
        data: &[u8],
        base_offset: u32,
        variables: Vec<ReferenceDef>,
        functions: Vec<ReferenceDef>,
    ) -> Result<Self, GmbcError> {
        let variable_at = walk_chains(data, base_offset, &variables)?;
        let function_at = walk_chains(data, base_offset, &functions)?;
        debug!(variables = variable_at.len(), functions = function_at.len(), "reference chains walked");
        Ok(Self { variables, functions, variable_at, function_at })
    }

    pub fn variable_at(&self, offset: u32) -> Option<&ReferenceDef> {
        self.variable_at.get(&offset).and_then(|&i| self.variables.get(i))
    }

    pub fn function_at(&self, offset: u32) -> Option<&ReferenceDef> {
        self.function_at.get(&offset).and_then(|&i| self.functions.get(i))
    }

    pub fn variable_index_at(&self, offset: u32) -> Option<usize> {
        self.variable_at.get(&offset).copied()
    }

    pub fn function_index_at(&self, offset: u32) -> Option<usize> {
        self.function_at.get(&offset).copied()
    }
}

fn walk_chains(data: &[u8], base_offset: u32, defs: &[ReferenceDef]) -> Result<HashMap<u32, usize>, GmbcError> {
    let mut map = HashMap::new();
    for (i, def) in defs.iter().enumerate() {
        if def.occurrences == 0 || def.first_offset == NO_OCCURRENCE {
            continue;
        }
        let mut addr = def.first_offset;
        for n in 0..def.occurrences {
            map.insert(addr, i);
            if n + 1 == def.occurrences {
                break;
            }
            let bad = move || GmbcError::InvalidReferenceChain { name: def.name.clone(), offset: addr };
            let word_at = addr.checked_sub(base_offset).ok_or_else(bad)? as usize + 4;
            let word = data.get(word_at..word_at + 4).ok_or_else(bad)?;
            let next = LittleEndian::read_u32(word) & 0xFF_FFFF;
            addr = addr.checked_add(next).ok_or_else(bad)?;
        }
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::words_to_bytes;
    use pretty_assertions::assert_eq;

    #[test]
    fn interning_is_stable() {
        let mut t = StringTable::from(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(t.intern("b"), 1);
        assert_eq!(t.intern("c"), 2);
        assert_eq!(t.intern("a"), 0);
        assert_eq!(t.len(), 3);
        assert_eq!(t.get(2), Some("c"));
    }

    #[test]
    fn chains_are_followed() {
        // three two-word instructions referencing the same name, then a call
        let data = words_to_bytes(&[
            0xC305_FFFF, 0xA000_0008, // 0x00 -> 0x08
            0xC305_FFFF, 0xA000_0008, // 0x08 -> 0x10
            0xC305_FFFF, 0xA000_0003, // 0x10, chain end (string 3)
            0xD902_0000, 0x0000_0001, // 0x18 call
        ]);
        let base = 0x100;
        let vars = vec![ReferenceDef::function("x", 3, base)];
        let funcs = vec![ReferenceDef::function("f", 1, base + 0x18)];
        let refs = RefData::from_chains(&data, base, vars, funcs).unwrap();
        for off in [0x00, 0x08, 0x10] {
            assert_eq!(refs.variable_index_at(base + off), Some(0), "Failed for input: {}", off);
        }
        assert_eq!(refs.variable_at(base + 0x18), None);
        assert_eq!(refs.function_at(base + 0x18).map(|d| d.name.as_str()), Some("f"));
    }

    #[test]
    fn chain_leaving_buffer_is_an_error() {
        let data = words_to_bytes(&[0xC305_FFFF, 0xA000_0100]);
        let vars = vec![ReferenceDef::function("x", 3, 0)];
        let err = RefData::from_chains(&data, 0, vars, Vec::new()).unwrap_err();
        assert!(matches!(err, GmbcError::InvalidReferenceChain { offset: 0x100, .. }));
    }

    #[test]
    fn object_lookup() {
        let t = SymbolTables { objects: vec!["obj_player".into()], ..Default::default() };
        assert_eq!(t.object_index("obj_player"), Some(0));
        assert_eq!(t.resolve_object(0), Some("obj_player"));
        assert_eq!(t.resolve_object(1), None);
    }
}
