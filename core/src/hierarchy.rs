//! Sponsor-network hierarchy builder.
//!
//! Turns the flat record list into a tree keyed by sponsor code.
//!
//! RULES:
//!   - Level 0 is the requested root; every child sits one level below
//!     its sponsor.
//!   - Children keep source-array order.
//!   - A code appears at most once per tree. A visited set guards against
//!     self-sponsorship and longer sponsor cycles alike.
//!   - Broken sponsor references never fail a build. They are logged and
//!     the record is left out of rooted trees (it heads its own tree in
//!     `forest`).
//!
//! Traversal uses an explicit stack so deep networks cannot exhaust the
//! call stack while building.

use crate::{record::LicenseeRecord, types::Code};
use serde::{Deserialize, Serialize};
use std::collections::{hash_map::Entry, HashMap, HashSet};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HierarchyNode {
    #[serde(flatten)]
    pub record:   LicenseeRecord,
    pub level:    usize,
    pub children: Vec<HierarchyNode>,
}

impl HierarchyNode {
    /// Nodes in this subtree, self included.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }

    /// Deepest `level` found in this subtree.
    pub fn max_level(&self) -> usize {
        let mut deepest = self.level;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            deepest = deepest.max(node.level);
            stack.extend(node.children.iter());
        }
        deepest
    }

    pub fn find(&self, code: Code) -> Option<&HierarchyNode> {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.record.code == code {
                return Some(node);
            }
            stack.extend(node.children.iter());
        }
        None
    }

    /// Codes in pre-order (parent before children, children in order).
    pub fn codes(&self) -> Vec<Code> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node.record.code);
            stack.extend(node.children.iter().rev());
        }
        out
    }

    pub fn child_codes(&self) -> Vec<Code> {
        self.children.iter().map(|c| c.record.code).collect()
    }
}

/// Every top-of-network tree plus the records no tree could reach.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Forest {
    pub trees:       Vec<HierarchyNode>,
    /// Records whose sponsor code is absent from the dataset.
    pub orphans:     Vec<Code>,
    /// Records only reachable through a sponsor cycle.
    pub unreachable: Vec<Code>,
}

pub struct HierarchyBuilder<'a> {
    records:  &'a [LicenseeRecord],
    by_code:  HashMap<Code, usize>,
    /// sponsor code → indices of sponsored records, source order.
    children: HashMap<Code, Vec<usize>>,
}

impl<'a> HierarchyBuilder<'a> {
    pub fn new(records: &'a [LicenseeRecord]) -> Self {
        let mut by_code = HashMap::with_capacity(records.len());
        let mut children: HashMap<Code, Vec<usize>> = HashMap::new();

        for (idx, record) in records.iter().enumerate() {
            match by_code.entry(record.code) {
                Entry::Vacant(slot) => {
                    slot.insert(idx);
                }
                Entry::Occupied(_) => {
                    log::warn!("hierarchy: duplicate code {} at index {idx}, ignored", record.code);
                    continue;
                }
            }
            if let Some(sponsor) = record.sponsor_code {
                children.entry(sponsor).or_default().push(idx);
            }
        }

        let builder = Self { records, by_code, children };
        let orphans = builder.orphans();
        if !orphans.is_empty() {
            log::warn!(
                "hierarchy: {} records reference a sponsor outside the dataset",
                orphans.len()
            );
            log::debug!("hierarchy: orphan codes {orphans:?}");
        }
        builder
    }

    pub fn contains(&self, code: Code) -> bool {
        self.by_code.contains_key(&code)
    }

    pub fn record(&self, code: Code) -> Option<&'a LicenseeRecord> {
        self.by_code.get(&code).map(|&idx| &self.records[idx])
    }

    /// Tree rooted at `root`, cut off below `max_depth` levels
    /// (`None` = unbounded). Unknown root → `None`.
    pub fn build(&self, root: Code, max_depth: Option<usize>) -> Option<HierarchyNode> {
        let Some(&root_idx) = self.by_code.get(&root) else {
            log::debug!("hierarchy: root {root} not found");
            return None;
        };

        let mut visited: HashSet<Code> = HashSet::new();
        visited.insert(root);

        // Pre-order walk: (record index, level).
        let mut order: Vec<(usize, usize)> = Vec::new();
        let mut kids: HashMap<usize, Vec<usize>> = HashMap::new();
        let mut stack = vec![(root_idx, 0usize)];

        while let Some((idx, level)) = stack.pop() {
            order.push((idx, level));
            if max_depth.is_some_and(|d| level >= d) {
                continue;
            }
            let code = self.records[idx].code;
            let mut accepted = Vec::new();
            for &child_idx in self.children.get(&code).map(Vec::as_slice).unwrap_or(&[]) {
                let child_code = self.records[child_idx].code;
                if !visited.insert(child_code) {
                    if child_code == code {
                        log::debug!("hierarchy: {code} sponsors itself, ignored");
                    } else {
                        log::warn!("hierarchy: sponsor cycle at {child_code} under {code}, cut");
                    }
                    continue;
                }
                accepted.push(child_idx);
            }
            for &child_idx in accepted.iter().rev() {
                stack.push((child_idx, level + 1));
            }
            kids.insert(idx, accepted);
        }

        // Children follow their parent in pre-order, so a reverse pass
        // always finds them already assembled.
        let mut built: HashMap<usize, HierarchyNode> = HashMap::with_capacity(order.len());
        for &(idx, level) in order.iter().rev() {
            let children = kids
                .remove(&idx)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|c| built.remove(&c))
                .collect();
            built.insert(
                idx,
                HierarchyNode {
                    record: self.records[idx].clone(),
                    level,
                    children,
                },
            );
        }
        built.remove(&root_idx)
    }

    /// Heads of independent trees, in source order: records with no
    /// sponsor, a sponsor outside the dataset, or themselves as sponsor.
    pub fn roots(&self) -> Vec<Code> {
        self.first_occurrences()
            .filter(|r| match r.sponsor_code {
                None => true,
                Some(s) => s == r.code || !self.by_code.contains_key(&s),
            })
            .map(|r| r.code)
            .collect()
    }

    /// Records whose sponsor code does not resolve.
    pub fn orphans(&self) -> Vec<Code> {
        self.first_occurrences()
            .filter(|r| r.sponsor_code.is_some_and(|s| !self.by_code.contains_key(&s)))
            .map(|r| r.code)
            .collect()
    }

    pub fn forest(&self, max_depth: Option<usize>) -> Forest {
        let roots = self.roots();
        let trees: Vec<HierarchyNode> = roots
            .iter()
            .filter_map(|&r| self.build(r, max_depth))
            .collect();

        let mut reachable: HashSet<Code> = roots.iter().copied().collect();
        for &root in &roots {
            reachable.extend(self.downline(root));
        }
        let unreachable: Vec<Code> = self
            .first_occurrences()
            .map(|r| r.code)
            .filter(|c| !reachable.contains(c))
            .collect();
        if !unreachable.is_empty() {
            log::warn!("hierarchy: {} records sit on sponsor cycles", unreachable.len());
        }

        Forest { trees, orphans: self.orphans(), unreachable }
    }

    /// Upline of `code`: its sponsor, the sponsor's sponsor, and so on up
    /// to the top. Stops at the first repeat or unresolvable sponsor.
    pub fn ancestors(&self, code: Code) -> Vec<Code> {
        let mut out = Vec::new();
        let mut seen: HashSet<Code> = HashSet::from([code]);
        let mut current = self.record(code);
        while let Some(record) = current {
            let Some(sponsor) = record.sponsor_code else { break };
            if !seen.insert(sponsor) || !self.contains(sponsor) {
                break;
            }
            out.push(sponsor);
            current = self.record(sponsor);
        }
        out
    }

    /// Every record below `code`, pre-order, `code` excluded.
    pub fn downline(&self, code: Code) -> Vec<Code> {
        match self.build(code, None) {
            Some(tree) => tree.codes().into_iter().skip(1).collect(),
            None => Vec::new(),
        }
    }

    /// code → number of other records naming it as sponsor.
    pub fn direct_recruit_counts(&self) -> HashMap<Code, usize> {
        direct_recruit_counts(self.records)
    }

    fn first_occurrences(&self) -> impl Iterator<Item = &'a LicenseeRecord> + '_ {
        self.records
            .iter()
            .enumerate()
            .filter(|(idx, r)| self.by_code.get(&r.code) == Some(idx))
            .map(|(_, r)| r)
    }
}

/// code → number of other records naming it as sponsor. Self-sponsorship
/// does not count as a recruit.
pub fn direct_recruit_counts(records: &[LicenseeRecord]) -> HashMap<Code, usize> {
    let mut counts: HashMap<Code, usize> = HashMap::new();
    for record in records {
        if let Some(sponsor) = record.sponsor_code {
            if sponsor != record.code {
                *counts.entry(sponsor).or_default() += 1;
            }
        }
    }
    counts
}
