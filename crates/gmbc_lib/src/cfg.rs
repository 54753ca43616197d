use std::collections::BTreeSet;
use std::ops::Range;

use tracing::debug;

use crate::disasm::CodeInfo;
use crate::types::BranchType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphBranch {
    /// Index of the target vertex; `None` leaves the code.
    pub target: Option<usize>,
    pub branch_type: BranchType,
}

/// A basic block: the instructions `start..end` of the code entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphVertex {
    pub start: usize,
    pub end: usize,
    pub branches: Vec<GraphBranch>,
}

impl GraphVertex {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    pub vertices: Vec<GraphVertex>,
}

impl Graph {
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

/// First instruction, every instruction after a jump and every jump target.
/// Sorted and deduplicated; may include addresses that are not instruction
/// boundaries, such as the end of the code.
pub fn jump_targets(code: &CodeInfo) -> Vec<u32> {
    let mut targets = BTreeSet::new();
    if let Some(&first) = code.addresses.first() {
        targets.insert(first);
    }
    for i in 0..code.len() {
        if code.instructions[i].as_goto().is_none() {
            continue;
        }
        if let Some(&next) = code.addresses.get(i + 1) {
            targets.insert(next);
        }
        if let Some(t) = code.goto_target(i) {
            if let Ok(t) = u32::try_from(t) {
                targets.insert(t);
            }
        }
    }
    targets.into_iter().collect()
}

pub fn build_graph(code: &CodeInfo) -> Graph {
    if code.is_empty() {
        return Graph::default();
    }

    let end_address = code.end_address();
    let mut leaders = Vec::new();
    for t in jump_targets(code) {
        match code.index_of(t) {
            Some(i) => leaders.push(i),
            None if t >= end_address => {}
            None => debug!(target = t, code = %code.name, "jump target is not an instruction boundary"),
        }
    }

    let mut vertices: Vec<GraphVertex> = leaders
        .iter()
        .enumerate()
        .map(|(n, &start)| GraphVertex {
            start,
            end: leaders.get(n + 1).copied().unwrap_or(code.len()),
            branches: Vec::new(),
        })
        .collect();

    if vertices.len() == 1 {
        return Graph { vertices };
    }

    let count = vertices.len();
    for n in 0..count {
        let last = vertices[n].end - 1;
        let next_addr = vertices.get(n + 1).map(|v| code.addresses[v.start]);

        let (branch_type, target_addr) = match code.instructions[last].as_goto() {
            Some(g) => match code.goto_target(last) {
                Some(t) => (g.branch_type(), Some(t)),
                None => (BranchType::Unconditional, next_addr.map(i64::from)),
            },
            None => (BranchType::Unconditional, next_addr.map(i64::from)),
        };

        let target = target_addr.and_then(|addr| resolve(code, &vertices, n, addr, end_address));
        let mut branches = vec![GraphBranch { target, branch_type }];
        if branch_type != BranchType::Unconditional && n + 1 < count {
            branches.push(GraphBranch { target: Some(n + 1), branch_type: branch_type.invert() });
        }
        vertices[n].branches = branches;
    }

    Graph { vertices }
}

fn resolve(code: &CodeInfo, vertices: &[GraphVertex], from: usize, addr: i64, end_address: u32) -> Option<usize> {
    if addr >= end_address as i64 {
        return None;
    }
    if let Some(j) = vertices.iter().position(|v| code.addresses[v.start] as i64 == addr) {
        return Some(j);
    }
    debug!(target = addr, from, "no vertex starts at branch target, using the next vertex");
    if from + 1 < vertices.len() { Some(from + 1) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disasm::{CodeEntry, disassemble};
    use crate::instruction::words_to_bytes;
    use pretty_assertions::assert_eq;

    const F: u32 = 0x10;

    fn code(words: &[u32]) -> CodeInfo {
        let bytes = words_to_bytes(words);
        disassemble(&CodeEntry { name: "t", bytes: &bytes, size: bytes.len() as u32, base_offset: 0 }, F).unwrap()
    }

    fn covered(g: &Graph) -> Vec<usize> {
        g.vertices.iter().flat_map(|v| v.range()).collect()
    }

    #[test]
    fn empty_code_has_empty_graph() {
        let c = code(&[]);
        assert!(build_graph(&c).is_empty());
    }

    #[test]
    fn straight_line_code_is_one_vertex() {
        let c = code(&[0x840F_0005, 0x9C02_0000]);
        let g = build_graph(&c);
        assert_eq!(g.vertices, vec![GraphVertex { start: 0, end: 2, branches: vec![] }]);
    }

    #[test]
    fn forward_jump_over_dead_code() {
        // br +8; push.i16 1; ret int32
        let c = code(&[0xB600_0002, 0x840F_0001, 0x9C02_0000]);
        let g = build_graph(&c);
        assert_eq!(g.len(), 3);
        assert_eq!(g.vertices[0].branches, vec![GraphBranch { target: Some(2), branch_type: BranchType::Unconditional }]);
        assert_eq!(g.vertices[1].branches, vec![GraphBranch { target: Some(2), branch_type: BranchType::Unconditional }]);
        assert_eq!(g.vertices[2].branches, vec![GraphBranch { target: None, branch_type: BranchType::Unconditional }]);
        assert_eq!(covered(&g), vec![0, 1, 2]);
    }

    #[test]
    fn conditional_branch_has_inverted_fallthrough() {
        // 0x00 push.i16 1; 0x04 brt 0x10; 0x08 push.i16 2; 0x0C pop; 0x10 exit
        let c = code(&[0x840F_0001, 0xB700_0003, 0x840F_0002, 0x9E0F_0000, 0x9D0F_0000]);
        let g = build_graph(&c);
        assert_eq!(g.vertices.iter().map(|v| v.range()).collect::<Vec<_>>(), vec![0..2, 2..4, 4..5]);
        assert_eq!(
            g.vertices[0].branches,
            vec![
                GraphBranch { target: Some(2), branch_type: BranchType::IfTrue },
                GraphBranch { target: Some(1), branch_type: BranchType::IfFalse },
            ]
        );
        assert_eq!(g.vertices[1].branches, vec![GraphBranch { target: Some(2), branch_type: BranchType::Unconditional }]);
    }

    #[test]
    fn backward_jump_and_jump_to_end() {
        // 0x00 push.i16 0; 0x04 brf 0x10 (end); 0x08 br 0x00; 0x0C exit
        let c = code(&[0x840F_0000, 0xB800_0003, 0xB6FF_FFFE, 0x9D0F_0000]);
        let g = build_graph(&c);
        assert_eq!(covered(&g), vec![0, 1, 2, 3]);
        assert_eq!(g.vertices[0].branches[0], GraphBranch { target: None, branch_type: BranchType::IfFalse });
        assert_eq!(g.vertices[1].branches, vec![GraphBranch { target: Some(0), branch_type: BranchType::Unconditional }]);
    }

    #[test]
    fn every_instruction_is_covered_once() {
        let cases: Vec<Vec<u32>> = vec![
            vec![0xB600_0001, 0xB600_0001, 0xB600_0001],
            vec![0x840F_0001, 0xB800_0002, 0xC002_0000, 7, 0x9E02_0000],
            vec![0xBA00_0002, 0x9E0F_0000, 0xBBF0_0000, 0x9D0F_0000],
        ];
        for words in cases {
            let c = code(&words);
            let g = build_graph(&c);
            assert_eq!(covered(&g), (0..c.len()).collect::<Vec<_>>(), "Failed for input: {:X?}", words);
            for v in &g.vertices {
                for b in &v.branches {
                    assert!(b.target.is_none_or(|t| t < g.len()), "Failed for input: {:X?}", words);
                }
            }
        }
    }
}
