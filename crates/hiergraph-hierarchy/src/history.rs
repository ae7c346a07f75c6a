//! Audit trail for a hierarchy.
//!
//! [`VersionedHierarchy`] keeps a tree of commits, each holding a full
//! snapshot of the hierarchy, and a head per branch. Rewrites go through
//! the edit-then-propagate pipeline and are committed only if both succeed.
//! Merging a branch records a commit with two parents.

use std::collections::{HashSet, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use hiergraph_core::GraphId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::edit::GraphEdit;
use crate::error::HistoryError;
use crate::hierarchy::Hierarchy;
use crate::merge;
use crate::propagation::{PropagationEngine, PropagationOptions, PropagationReport};

/// One entry of the history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub id: Uuid,
    pub parent: Option<Uuid>,
    /// Head of the branch merged in, for merge commits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged: Option<Uuid>,
    /// Branch the commit was made on.
    pub branch: String,
    pub message: String,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    pub snapshot: Hierarchy,
}

/// A hierarchy with branches, commits and rollback.
#[derive(Debug, Clone)]
pub struct VersionedHierarchy {
    current: Hierarchy,
    commits: IndexMap<Uuid, Commit>,
    heads: IndexMap<String, Uuid>,
    current_branch: String,
    options: PropagationOptions,
}

impl VersionedHierarchy {
    /// Starts a history on `branch` with an initial commit of `hierarchy`.
    pub fn new(hierarchy: Hierarchy, branch: impl Into<String>) -> Self {
        let branch = branch.into();
        let mut versioned = VersionedHierarchy {
            current: hierarchy,
            commits: IndexMap::new(),
            heads: IndexMap::new(),
            current_branch: branch,
            options: PropagationOptions::default(),
        };
        versioned.commit("Initial commit");
        versioned
    }

    pub fn with_options(mut self, options: PropagationOptions) -> Self {
        self.options = options;
        self
    }

    /// The working hierarchy.
    pub fn hierarchy(&self) -> &Hierarchy {
        &self.current
    }

    pub fn current_branch(&self) -> &str {
        &self.current_branch
    }

    /// Branch names in creation order.
    pub fn branches(&self) -> Vec<&str> {
        self.heads.keys().map(String::as_str).collect()
    }

    pub fn head(&self) -> Result<Uuid, HistoryError> {
        self.head_of(&self.current_branch)
    }

    pub fn get_commit(&self, id: &Uuid) -> Option<&Commit> {
        self.commits.get(id)
    }

    /// Commits from the current head back to the root.
    pub fn log(&self) -> Vec<&Commit> {
        let mut log = Vec::new();
        let mut next = self.heads.get(&self.current_branch).copied();
        while let Some(id) = next {
            let Some(commit) = self.commits.get(&id) else {
                break;
            };
            log.push(commit);
            next = commit.parent;
        }
        log
    }

    // -----------------------------------------------------------------------
    // Recording
    // -----------------------------------------------------------------------

    /// Records the working hierarchy on the current branch.
    pub fn commit(&mut self, message: impl Into<String>) -> Uuid {
        let parent = self.heads.get(&self.current_branch).copied();
        self.record(parent, message.into())
    }

    /// Edits graph `graph`, propagates the edit through the hierarchy and
    /// commits the result. On failure the working hierarchy is unchanged and
    /// nothing is committed.
    pub fn rewrite(
        &mut self,
        graph: &GraphId,
        edit: &GraphEdit,
        message: impl Into<String>,
    ) -> Result<(Uuid, PropagationReport), HistoryError> {
        let mut staged = self.current.clone();
        let outcome = staged.rewrite(graph, edit)?;
        let report = PropagationEngine::propagate(&mut staged, graph, &outcome, &self.options)?;
        self.current = staged;
        let id = self.commit(message);
        Ok((id, report))
    }

    /// Creates `name` at the current head and switches to it.
    pub fn branch(&mut self, name: impl Into<String>) -> Result<Uuid, HistoryError> {
        let name = name.into();
        if self.heads.contains_key(&name) {
            return Err(HistoryError::BranchExists { name });
        }
        let parent = self.head()?;
        self.current_branch = name.clone();
        let id = self.record(Some(parent), format!("Created branch '{}'", name));
        info!(branch = %name, "created branch");
        Ok(id)
    }

    /// Makes `name` the current branch and loads its head snapshot.
    pub fn switch_branch(&mut self, name: &str) -> Result<(), HistoryError> {
        let head = self.head_of(name)?;
        self.current = self.snapshot(&head)?.clone();
        self.current_branch = name.to_string();
        debug!(branch = %name, "switched branch");
        Ok(())
    }

    /// Restores the snapshot of `id`, which must be in the history of the
    /// current branch.
    ///
    /// Every descendant of `id` is removed. The branch of `id` becomes the
    /// current branch with `id` as its head. Other branches whose head was
    /// removed are reset to their last surviving commit, or dropped if no
    /// commit of theirs survives.
    pub fn rollback(&mut self, id: &Uuid) -> Result<(), HistoryError> {
        let target = self
            .commits
            .get(id)
            .ok_or(HistoryError::UnknownCommit { id: *id })?;
        let head = self.head()?;
        if !self.ancestors(&head).contains(id) {
            return Err(HistoryError::NotOnBranch {
                id: *id,
                branch: self.current_branch.clone(),
            });
        }
        let branch = target.branch.clone();

        let removed: HashSet<Uuid> = self
            .commits
            .keys()
            .filter(|commit| **commit != *id && self.ancestors(commit).contains(id))
            .copied()
            .collect();

        let mut heads = IndexMap::new();
        for (name, head) in &self.heads {
            if !removed.contains(head) {
                heads.insert(name.clone(), *head);
                continue;
            }
            let survivor = self
                .ancestors(head)
                .into_iter()
                .find(|commit| !removed.contains(commit));
            match survivor {
                Some(commit) if self.commits.get(&commit).map(|c| &c.branch) == Some(name) => {
                    debug!(branch = %name, head = %commit, "reset branch head");
                    heads.insert(name.clone(), commit);
                }
                _ => debug!(branch = %name, "dropped branch"),
            }
        }
        heads.insert(branch.clone(), *id);

        self.commits.retain(|commit, _| !removed.contains(commit));
        self.heads = heads;
        self.current = self.snapshot(id)?.clone();
        self.current_branch = branch;
        info!(commit = %id, removed = removed.len(), "rolled back");
        Ok(())
    }

    /// Merges branch `name` into the current branch.
    ///
    /// The working hierarchy and the head of `name` are combined against
    /// their nearest common ancestor; see [`merge::three_way`]. The result is
    /// committed with the head of `name` as second parent and `name` is
    /// closed. On conflict nothing changes.
    pub fn merge_with(&mut self, name: &str, message: Option<String>) -> Result<Uuid, HistoryError> {
        if name == self.current_branch {
            return Err(HistoryError::MergeIntoSelf { name: name.to_string() });
        }
        let theirs = self.head_of(name)?;
        let ours = self.head()?;
        let base = self
            .common_ancestor(&ours, &theirs)
            .ok_or(HistoryError::UnknownCommit { id: theirs })?;

        let merged = merge::three_way(self.snapshot(&base)?, &self.current, self.snapshot(&theirs)?)?;
        self.current = merged;
        let message =
            message.unwrap_or_else(|| format!("Merged branch '{}' into '{}'", name, self.current_branch));
        let id = self.record(Some(ours), message);
        if let Some(commit) = self.commits.get_mut(&id) {
            commit.merged = Some(theirs);
        }
        self.heads.shift_remove(name);
        info!(branch = %name, into = %self.current_branch, commit = %id, "merged branch");
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn record(&mut self, parent: Option<Uuid>, message: String) -> Uuid {
        let id = Uuid::new_v4();
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.commits.insert(
            id,
            Commit {
                id,
                parent,
                merged: None,
                branch: self.current_branch.clone(),
                message,
                timestamp,
                snapshot: self.current.clone(),
            },
        );
        self.heads.insert(self.current_branch.clone(), id);
        debug!(commit = %id, branch = %self.current_branch, "committed");
        id
    }

    fn head_of(&self, branch: &str) -> Result<Uuid, HistoryError> {
        self.heads
            .get(branch)
            .copied()
            .ok_or_else(|| HistoryError::UnknownBranch {
                name: branch.to_string(),
            })
    }

    fn snapshot(&self, id: &Uuid) -> Result<&Hierarchy, HistoryError> {
        self.commits
            .get(id)
            .map(|commit| &commit.snapshot)
            .ok_or(HistoryError::UnknownCommit { id: *id })
    }

    /// `id` and its ancestors through both parents, nearest first.
    fn ancestors(&self, id: &Uuid) -> Vec<Uuid> {
        let mut seen = HashSet::from([*id]);
        let mut order = Vec::new();
        let mut queue = VecDeque::from([*id]);
        while let Some(current) = queue.pop_front() {
            order.push(current);
            let Some(commit) = self.commits.get(&current) else {
                continue;
            };
            for parent in commit.parent.into_iter().chain(commit.merged) {
                if seen.insert(parent) {
                    queue.push_back(parent);
                }
            }
        }
        order
    }

    /// Nearest commit in the history of both `ours` and `theirs`.
    fn common_ancestor(&self, ours: &Uuid, theirs: &Uuid) -> Option<Uuid> {
        let theirs: HashSet<Uuid> = self.ancestors(theirs).into_iter().collect();
        self.ancestors(ours)
            .into_iter()
            .find(|commit| theirs.contains(commit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{HierarchyDocument, LinkSpec};
    use hiergraph_core::{Attrs, NodeId, TypedGraph};

    fn g(name: &str) -> GraphId {
        GraphId::from(name)
    }

    fn small() -> Hierarchy {
        let mut meta = TypedGraph::directed();
        meta.add_node("T", None, Attrs::new()).unwrap();
        let mut model = TypedGraph::directed();
        model.add_node("a", Some(NodeId::from("T")), Attrs::new()).unwrap();
        let mut h = Hierarchy::new(true);
        h.add_graph("meta", meta).unwrap();
        h.add_graph("model", model).unwrap();
        h.add_homomorphism(&g("model"), &g("meta"), LinkSpec::typing())
            .unwrap();
        h
    }

    fn add(name: &str) -> GraphEdit {
        GraphEdit::new().add_node(name, Some(NodeId::from("T")), Attrs::new())
    }

    #[test]
    fn rewrite_commits_on_current_branch() {
        let mut v = VersionedHierarchy::new(small(), "master");
        let (id, report) = v.rewrite(&g("model"), &add("b"), "add b").unwrap();
        assert!(report.is_empty());
        assert_eq!(v.head().unwrap(), id);
        assert_eq!(v.log().len(), 2);
        assert_eq!(v.log()[0].message, "add b");
        assert_eq!(v.hierarchy().graph(&g("model")).unwrap().node_count(), 2);
    }

    #[test]
    fn failed_rewrite_commits_nothing() {
        let mut v = VersionedHierarchy::new(small(), "master");
        let err = v.rewrite(&g("model"), &GraphEdit::new().remove_node("zz"), "bad");
        assert!(matches!(err, Err(HistoryError::Hierarchy(_))));
        assert_eq!(v.log().len(), 1);
    }

    #[test]
    fn branches_hold_their_own_state() {
        let mut v = VersionedHierarchy::new(small(), "master");
        v.branch("dev").unwrap();
        v.rewrite(&g("model"), &add("b"), "add b on dev").unwrap();
        assert_eq!(v.branches(), vec!["master", "dev"]);

        v.switch_branch("master").unwrap();
        assert_eq!(v.hierarchy().graph(&g("model")).unwrap().node_count(), 1);
        v.switch_branch("dev").unwrap();
        assert_eq!(v.hierarchy().graph(&g("model")).unwrap().node_count(), 2);

        assert_eq!(
            v.branch("dev").unwrap_err(),
            HistoryError::BranchExists { name: "dev".into() }
        );
        assert_eq!(
            v.switch_branch("nope").unwrap_err(),
            HistoryError::UnknownBranch { name: "nope".into() }
        );
    }

    #[test]
    fn rollback_drops_descendants_and_orphaned_branches() {
        let mut v = VersionedHierarchy::new(small(), "master");
        let (first, _) = v.rewrite(&g("model"), &add("b"), "add b").unwrap();
        v.branch("dev").unwrap();
        v.rewrite(&g("model"), &add("c"), "add c on dev").unwrap();
        v.switch_branch("master").unwrap();
        v.rewrite(&g("model"), &add("d"), "add d").unwrap();

        v.rollback(&first).unwrap();
        assert_eq!(v.current_branch(), "master");
        assert_eq!(v.head().unwrap(), first);
        assert_eq!(v.branches(), vec!["master"]);
        assert_eq!(v.log().len(), 2);
        let model = v.hierarchy().graph(&g("model")).unwrap();
        assert!(model.has_node(&NodeId::from("b")));
        assert!(!model.has_node(&NodeId::from("d")));
    }

    #[test]
    fn rollback_on_branch_keeps_other_heads() {
        let mut v = VersionedHierarchy::new(small(), "master");
        let master_head = v.head().unwrap();
        let created = v.branch("dev").unwrap();
        v.rewrite(&g("model"), &add("b"), "add b").unwrap();

        v.rollback(&created).unwrap();
        assert_eq!(v.current_branch(), "dev");
        assert_eq!(v.branches(), vec!["master", "dev"]);
        v.switch_branch("master").unwrap();
        assert_eq!(v.head().unwrap(), master_head);
    }

    #[test]
    fn merge_combines_branches_and_closes_the_merged_one() {
        let mut v = VersionedHierarchy::new(small(), "master");
        v.branch("dev").unwrap();
        let (on_dev, _) = v.rewrite(&g("model"), &add("b"), "add b on dev").unwrap();
        v.switch_branch("master").unwrap();
        let (on_master, _) = v.rewrite(&g("model"), &add("c"), "add c").unwrap();

        let id = v.merge_with("dev", None).unwrap();
        assert_eq!(v.head().unwrap(), id);
        assert_eq!(v.branches(), vec!["master"]);
        let commit = v.get_commit(&id).unwrap();
        assert_eq!(commit.parent, Some(on_master));
        assert_eq!(commit.merged, Some(on_dev));
        assert_eq!(commit.message, "Merged branch 'dev' into 'master'");

        let model = v.hierarchy().graph(&g("model")).unwrap();
        let nodes: Vec<&NodeId> = model.nodes().collect();
        assert_eq!(nodes, vec![&NodeId::from("a"), &NodeId::from("c"), &NodeId::from("b")]);
        v.hierarchy().check().unwrap();
    }

    #[test]
    fn merge_conflict_leaves_history_unchanged() {
        let mut v = VersionedHierarchy::new(small(), "master");
        v.branch("dev").unwrap();
        let on_dev = GraphEdit::new().add_node("b", Some(NodeId::from("T")), Attrs::new().with("k", 1));
        v.rewrite(&g("model"), &on_dev, "b on dev").unwrap();
        v.switch_branch("master").unwrap();
        let on_master = GraphEdit::new().add_node("b", Some(NodeId::from("T")), Attrs::new().with("k", 2));
        let (head, _) = v.rewrite(&g("model"), &on_master, "b on master").unwrap();
        let before = HierarchyDocument::from(v.hierarchy().clone());

        assert_eq!(
            v.merge_with("dev", None).unwrap_err(),
            HistoryError::MergeConflict {
                item: "node 'b' of graph 'model'".into()
            }
        );
        assert_eq!(v.head().unwrap(), head);
        assert_eq!(v.branches(), vec!["master", "dev"]);
        assert_eq!(HierarchyDocument::from(v.hierarchy().clone()), before);
    }

    #[test]
    fn merge_rejects_self_and_unknown_branches() {
        let mut v = VersionedHierarchy::new(small(), "master");
        assert_eq!(
            v.merge_with("master", None).unwrap_err(),
            HistoryError::MergeIntoSelf { name: "master".into() }
        );
        assert_eq!(
            v.merge_with("nope", None).unwrap_err(),
            HistoryError::UnknownBranch { name: "nope".into() }
        );
    }

    #[test]
    fn rollback_past_a_merge_reopens_nothing() {
        let mut v = VersionedHierarchy::new(small(), "master");
        let root = v.head().unwrap();
        v.branch("dev").unwrap();
        v.rewrite(&g("model"), &add("b"), "add b on dev").unwrap();
        v.switch_branch("master").unwrap();
        let merge = v.merge_with("dev", Some("bring in dev".into())).unwrap();
        assert_eq!(v.get_commit(&merge).unwrap().message, "bring in dev");
        assert!(v.hierarchy().graph(&g("model")).unwrap().has_node(&NodeId::from("b")));

        v.rollback(&root).unwrap();
        assert_eq!(v.head().unwrap(), root);
        assert_eq!(v.branches(), vec!["master"]);
        assert_eq!(v.hierarchy().graph(&g("model")).unwrap().node_count(), 1);
    }

    #[test]
    fn rollback_rejects_foreign_commits() {
        let mut v = VersionedHierarchy::new(small(), "master");
        v.branch("dev").unwrap();
        let (on_dev, _) = v.rewrite(&g("model"), &add("b"), "add b").unwrap();
        v.switch_branch("master").unwrap();
        assert!(matches!(v.rollback(&on_dev), Err(HistoryError::NotOnBranch { .. })));
        let unknown = Uuid::new_v4();
        assert_eq!(
            v.rollback(&unknown).unwrap_err(),
            HistoryError::UnknownCommit { id: unknown }
        );
    }
}
