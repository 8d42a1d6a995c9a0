//! Locality tree (§4.J): a hardware/topology hierarchy addressed by
//! dotted-integer tags (`"0"`, `"0.1"`, `"0.1.2"`, ...).
//!
//! Stored as a flat arena (`Vec<DomainNode>`) owned by the tree itself
//! rather than as a pointer graph with parent back-pointers -- `group`
//! and `split` reallocate a node's children freely, which would
//! invalidate borrowed sibling references under any scheme that isn't
//! arena-indexed (see the DESIGN NOTES on pointer graphs in
//! `SPEC_FULL.md`). A node's `tag` is always kept in sync with its actual
//! position in the tree; [`LocalityTree::domain_at`] parses a tag's
//! dotted components and walks `children` by index rather than
//! maintaining a separate tag→index map.

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::team::TeamId;

/// Topology level a [`DomainNode`] represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    /// The tree root, spanning every unit in the owning team.
    Global,
    Node,
    Module,
    Numa,
    Core,
    /// A synthetic node created by [`LocalityTree::group`]/`group_subdomains`.
    Group,
}

/// One node of the tree: a topology scope, the unit ids it spans, and its
/// position among the arena's other nodes.
///
/// `level`/`relative_index`/`num_nodes`/`host`/`hwinfo` mirror the fields
/// the data model (§3 "Locality domain") carries but that neither
/// `domain_at`'s tag walk nor `split`/`group`'s tree surgery actually
/// consult -- `level` and `relative_index` are recomputed from a node's
/// tag on every retag rather than independently tracked (I5: they are
/// defined *as* the node's position, so keeping a separate copy in sync
/// by hand would just be one more place for the two to drift apart).
#[derive(Clone, Debug)]
pub struct DomainNode {
    tag: String,
    scope: Scope,
    level: u16,
    relative_index: u16,
    team_id: TeamId,
    parent: Option<usize>,
    children: Vec<usize>,
    unit_ids: Vec<u16>,
    /// Count of `Scope::Node`-level descendants (or `1` for a `Node` leaf
    /// itself); the figure the end-to-end scenarios call "num_units" /
    /// "num_nodes" for a domain.
    num_nodes: u32,
    host: Option<String>,
    hwinfo: Option<String>,
}

impl DomainNode {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Depth from the root (`"0"` is level `0`).
    pub fn level(&self) -> u16 {
        self.level
    }

    /// This node's position among its parent's children (I5); `0` for the
    /// root.
    pub fn relative_index(&self) -> u16 {
        self.relative_index
    }

    pub fn team_id(&self) -> TeamId {
        self.team_id
    }

    pub fn unit_ids(&self) -> &[u16] {
        &self.unit_ids
    }

    /// Count of hardware nodes spanned by this domain.
    pub fn num_nodes(&self) -> u32 {
        self.num_nodes
    }

    /// Hostname exchanged for this domain, if this is a `Node`-scope leaf
    /// built from live hardware info (see [`LocalityTree::from_hosts`]).
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Opaque hardware-info string exchanged for this domain, if any.
    pub fn hwinfo(&self) -> Option<&str> {
        self.hwinfo.as_deref()
    }
}

/// Parse a dotted tag's level (component count minus one) and relative
/// index (its last component), matching how [`LocalityTree::resolve`]
/// walks the same string.
fn tag_level_and_index(tag: &str) -> (u16, u16) {
    let parts: Vec<&str> = tag.split('.').collect();
    let level = (parts.len() - 1) as u16;
    let relative_index = parts.last().and_then(|p| p.parse().ok()).unwrap_or(0);
    (level, relative_index)
}

/// An arena-backed locality tree. The root is always arena index `0` and
/// always carries tag `"0"`.
pub struct LocalityTree {
    nodes: Vec<DomainNode>,
}

impl LocalityTree {
    /// Build a tree whose root has one [`Scope::Node`] child per entry of
    /// `node_units`, each spanning the given unit ids. Sufficient to model
    /// the flat "N nodes of M units" topologies used by the test suite;
    /// richer topologies can be built by calling [`LocalityTree::group`]
    /// afterward.
    pub fn from_flat_nodes(team_id: TeamId, node_units: Vec<Vec<u16>>) -> Self {
        Self::from_hosts(team_id, node_units.into_iter().map(|u| (u, None, None)).collect())
    }

    /// As [`LocalityTree::from_flat_nodes`], additionally recording each
    /// node's exchanged hostname and opaque hardware-info string (§4.C:
    /// "queries the transport for which peers share memory"; the
    /// host/hwinfo exchange that seeds a real tree is the same kind of
    /// once-at-creation collective, just carrying strings instead of a
    /// co-location bitmap).
    pub fn from_hosts(
        team_id: TeamId,
        nodes: Vec<(Vec<u16>, Option<String>, Option<String>)>,
    ) -> Self {
        let mut all_units = Vec::new();
        for (units, _, _) in &nodes {
            all_units.extend(units.iter().copied());
        }
        let num_nodes = nodes.len() as u32;
        let mut tree = Self {
            nodes: vec![DomainNode {
                tag: "0".to_string(),
                scope: Scope::Global,
                level: 0,
                relative_index: 0,
                team_id,
                parent: None,
                children: Vec::new(),
                unit_ids: all_units,
                num_nodes,
                host: None,
                hwinfo: None,
            }],
        };
        for (i, (units, host, hwinfo)) in nodes.into_iter().enumerate() {
            let idx = tree.nodes.len();
            tree.nodes.push(DomainNode {
                tag: format!("0.{i}"),
                scope: Scope::Node,
                level: 1,
                relative_index: i as u16,
                team_id,
                parent: Some(0),
                children: Vec::new(),
                unit_ids: units,
                num_nodes: 1,
                host,
                hwinfo,
            });
            tree.nodes[0].children.push(idx);
        }
        tree
    }

    pub fn root_tag(&self) -> &str {
        &self.nodes[0].tag
    }

    fn resolve(&self, tag: &str) -> Result<usize> {
        let mut parts = tag.split('.');
        let first = parts
            .next()
            .ok_or_else(|| Error::not_found("empty domain tag"))?;
        if first != "0" {
            return Err(Error::not_found(format!("unknown domain tag {tag}")));
        }
        let mut idx = 0usize;
        for part in parts {
            let i: usize = part
                .parse()
                .map_err(|_| Error::not_found(format!("malformed domain tag {tag}")))?;
            idx = *self
                .nodes[idx]
                .children
                .get(i)
                .ok_or_else(|| Error::not_found(format!("domain tag {tag} walked off the tree")))?;
        }
        Ok(idx)
    }

    /// The node named by `tag`.
    pub fn domain_at(&self, tag: &str) -> Result<&DomainNode> {
        self.resolve(tag).map(|idx| &self.nodes[idx])
    }

    /// Pre-order tags of every descendant of the root whose scope is
    /// `scope`.
    pub fn scope_domains(&self, scope: Scope) -> Vec<String> {
        let mut out = Vec::new();
        self.scope_domains_rec(0, scope, &mut out, true);
        out
    }

    fn scope_domains_rec(&self, idx: usize, scope: Scope, out: &mut Vec<String>, is_root: bool) {
        if !is_root && self.nodes[idx].scope == scope {
            out.push(self.nodes[idx].tag.clone());
        }
        for &child in &self.nodes[idx].children.clone() {
            self.scope_domains_rec(child, scope, out, false);
        }
    }

    /// Partition the root's `scope`-level descendants into `num_parts`
    /// balanced groups: `ceil(n / num_parts)`-sized groups, with the last
    /// group absorbing whatever remains (`n - (num_parts - 1) * max`,
    /// never negative since `max` is the ceiling).
    pub fn split(&self, scope: Scope, num_parts: usize) -> Result<Vec<Vec<String>>> {
        if num_parts == 0 {
            return Err(Error::invalid("split requires num_parts > 0"));
        }
        let domains = self.scope_domains(scope);
        let n = domains.len();
        let max = n.div_ceil(num_parts);
        let mut groups = Vec::with_capacity(num_parts);
        let mut start = 0;
        for g in 0..num_parts {
            if g + 1 == num_parts {
                groups.push(domains[start.min(n)..].to_vec());
            } else {
                let end = (start + max).min(n);
                groups.push(domains[start..end].to_vec());
                start = end;
            }
        }
        Ok(groups)
    }

    /// The immediate-children fast path: every tag in `subset_tags` must
    /// be a direct child of `parent_tag`. Reshuffles `parent`'s children
    /// into `[pre-existing groups] ++ [remaining] ++ [new group]`,
    /// renumbering every child's tag to match its new position (a node's
    /// tag always equals its live position in the tree -- see
    /// `domain_at`'s walk-by-index -- so a stale tag for a pre-existing
    /// group would break `domain_at(tree, node.tag) == node`).
    pub fn group_subdomains(&mut self, parent_tag: &str, subset_tags: &[String]) -> Result<String> {
        let parent_idx = self.resolve(parent_tag)?;
        let mut sorted = subset_tags.to_vec();
        sorted.sort();

        let parent_children = self.nodes[parent_idx].children.clone();
        let mut chosen = Vec::with_capacity(sorted.len());
        for tag in &sorted {
            let idx = parent_children
                .iter()
                .copied()
                .find(|&c| &self.nodes[c].tag == tag)
                .ok_or_else(|| {
                    Error::not_found(format!("{tag} is not a child of {parent_tag}"))
                })?;
            chosen.push(idx);
        }
        let idx = self.group_subdomains_by_index(parent_idx, &chosen)?;
        Ok(self.nodes[idx].tag.clone())
    }

    fn group_subdomains_by_index(&mut self, parent_idx: usize, chosen: &[usize]) -> Result<usize> {
        let chosen_set: HashSet<usize> = chosen.iter().copied().collect();
        let parent_children = self.nodes[parent_idx].children.clone();

        let mut groups = Vec::new();
        let mut remaining = Vec::new();
        for &c in &parent_children {
            if chosen_set.contains(&c) {
                continue;
            }
            if self.nodes[c].scope == Scope::Group {
                groups.push(c);
            } else {
                remaining.push(c);
            }
        }

        let unit_ids = chosen
            .iter()
            .flat_map(|&c| self.nodes[c].unit_ids.clone())
            .collect();
        let num_nodes = chosen.iter().map(|&c| self.nodes[c].num_nodes).sum();
        let team_id = self.nodes[parent_idx].team_id;
        let new_idx = self.nodes.len();
        self.nodes.push(DomainNode {
            tag: String::new(),
            scope: Scope::Group,
            level: 0,
            relative_index: 0,
            team_id,
            parent: Some(parent_idx),
            children: chosen.to_vec(),
            unit_ids,
            num_nodes,
            host: None,
            hwinfo: None,
        });
        for &c in chosen {
            self.nodes[c].parent = Some(new_idx);
        }

        let mut new_children = Vec::with_capacity(groups.len() + remaining.len() + 1);
        new_children.extend(groups.iter().copied());
        new_children.extend(remaining.iter().copied());
        new_children.push(new_idx);
        self.nodes[parent_idx].children = new_children.clone();

        let parent_tag = self.nodes[parent_idx].tag.clone();
        for (i, &child) in new_children.iter().enumerate() {
            let new_tag = format!("{parent_tag}.{i}");
            self.retag_subtree(child, &new_tag);
        }
        Ok(new_idx)
    }

    /// The general case: for each spec (a list of domain tags, possibly
    /// scattered anywhere under their lowest common ancestor), create a
    /// new [`Scope::Group`] node under that ancestor containing a copy of
    /// each named subdomain, pruning everything else out of the copy. All
    /// tags across every spec are resolved against the tree as it stood
    /// before any spec in this call was applied, so later specs are
    /// unaffected by renumbering earlier specs may have caused.
    pub fn group(&mut self, specs: &[Vec<String>]) -> Result<Vec<String>> {
        let mut idx_specs = Vec::with_capacity(specs.len());
        for spec in specs {
            if spec.is_empty() {
                return Err(Error::invalid("group: a spec must name at least one domain"));
            }
            let idxs: Result<Vec<usize>> = spec.iter().map(|t| self.resolve(t)).collect();
            idx_specs.push(idxs?);
        }
        // Collect the arena index of each spec's new group node rather than
        // its tag at creation time: a later spec in this same batch can land
        // under the same parent and retag that parent's children (including
        // an earlier spec's group node), which would make a tag captured
        // mid-batch stale by the time every spec has been applied.
        let mut created_idxs = Vec::with_capacity(idx_specs.len());
        for idxs in idx_specs {
            created_idxs.push(self.group_by_index(&idxs)?);
        }
        Ok(created_idxs
            .into_iter()
            .map(|idx| self.nodes[idx].tag.clone())
            .collect())
    }

    fn group_by_index(&mut self, idxs: &[usize]) -> Result<usize> {
        let lca = self.lowest_common_ancestor(idxs)?;
        let lca_children = self.nodes[lca].children.clone();
        if idxs.iter().all(|i| lca_children.contains(i)) {
            self.group_subdomains_by_index(lca, idxs)
        } else {
            let clones: Vec<usize> = idxs.iter().map(|&i| self.clone_subtree(i)).collect();
            let unit_ids = clones
                .iter()
                .flat_map(|&c| self.nodes[c].unit_ids.clone())
                .collect();
            let num_nodes = clones.iter().map(|&c| self.nodes[c].num_nodes).sum();
            let team_id = self.nodes[lca].team_id;
            let new_idx = self.nodes.len();
            self.nodes.push(DomainNode {
                tag: String::new(),
                scope: Scope::Group,
                level: 0,
                relative_index: 0,
                team_id,
                parent: Some(lca),
                children: clones.clone(),
                unit_ids,
                num_nodes,
                host: None,
                hwinfo: None,
            });
            for &c in &clones {
                self.nodes[c].parent = Some(new_idx);
            }
            self.nodes[lca].children.push(new_idx);
            let lca_tag = self.nodes[lca].tag.clone();
            let new_tag = format!("{lca_tag}.{}", self.nodes[lca].children.len() - 1);
            self.retag_subtree(new_idx, &new_tag);
            Ok(new_idx)
        }
    }

    fn clone_subtree(&mut self, idx: usize) -> usize {
        let scope = self.nodes[idx].scope;
        let team_id = self.nodes[idx].team_id;
        let unit_ids = self.nodes[idx].unit_ids.clone();
        let num_nodes = self.nodes[idx].num_nodes;
        let host = self.nodes[idx].host.clone();
        let hwinfo = self.nodes[idx].hwinfo.clone();
        let children = self.nodes[idx].children.clone();
        let new_idx = self.nodes.len();
        self.nodes.push(DomainNode {
            tag: String::new(),
            scope,
            level: 0,
            relative_index: 0,
            team_id,
            parent: None,
            children: Vec::new(),
            unit_ids,
            num_nodes,
            host,
            hwinfo,
        });
        let mut new_children = Vec::with_capacity(children.len());
        for c in children {
            let nc = self.clone_subtree(c);
            self.nodes[nc].parent = Some(new_idx);
            new_children.push(nc);
        }
        self.nodes[new_idx].children = new_children;
        new_idx
    }

    /// Re-tag `idx` and its whole subtree under a new position, keeping
    /// `level`/`relative_index` in lockstep with the tag (see the note on
    /// [`DomainNode`]).
    fn retag_subtree(&mut self, idx: usize, tag: &str) {
        let (level, relative_index) = tag_level_and_index(tag);
        self.nodes[idx].tag = tag.to_string();
        self.nodes[idx].level = level;
        self.nodes[idx].relative_index = relative_index;
        let children = self.nodes[idx].children.clone();
        for (i, child) in children.into_iter().enumerate() {
            self.retag_subtree(child, &format!("{tag}.{i}"));
        }
    }

    /// Strict ancestor chain of `idx`, nearest first, excluding `idx`
    /// itself. A group can never be created as a child of one of the
    /// nodes it contains, so the LCA search below only ever considers
    /// proper ancestors -- for a single-domain spec this correctly yields
    /// that domain's parent rather than the domain itself.
    fn ancestors(&self, idx: usize) -> Vec<usize> {
        let mut chain = Vec::new();
        let mut cur = idx;
        while let Some(p) = self.nodes[cur].parent {
            chain.push(p);
            cur = p;
        }
        chain
    }

    fn lowest_common_ancestor(&self, idxs: &[usize]) -> Result<usize> {
        let first = *idxs
            .first()
            .ok_or_else(|| Error::invalid("lowest_common_ancestor: no domains given"))?;
        let mut common = self.ancestors(first);
        for &other in &idxs[1..] {
            let ancestors_of_other: HashSet<usize> = self.ancestors(other).into_iter().collect();
            common.retain(|c| ancestors_of_other.contains(c));
        }
        common
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found("no common ancestor"))
    }
}
