use std::collections::BTreeMap;
use std::fmt;

use time::{Duration, OffsetDateTime};

use crate::paths::PathComponents;

pub const DEFAULT_FILE_SIZE: u64 = 64;
pub const DEFAULT_CONTENT_CHAR: u8 = b'W';

/// Handle to a node slot inside its owning [`FileTree`] arena. Stable for the
/// node's lifetime; using it after the node was removed is a caller bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// One file or directory of the simulated remote store.
///
/// File content is never held verbatim: a file is a byte length plus a single
/// repeated fill byte, which is enough for round-trip equality checks.
#[derive(Debug, Clone)]
pub struct FileNode {
    pub name: String,
    pub is_dir: bool,
    pub is_shared: bool,
    pub last_modified: OffsetDateTime,
    pub etag: String,
    pub file_id: String,
    pub size: u64,
    pub content_char: u8,
    /// Materialized path of the containing directory, kept in sync with the
    /// actual tree position so full paths never require a root walk.
    pub parent_path: String,
    parent: Option<NodeId>,
    children: BTreeMap<String, NodeId>,
}

impl FileNode {
    pub fn path(&self) -> String {
        if self.parent_path.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.parent_path, self.name)
        }
    }
}

/// The mutation interface shared by the simulated remote tree and whatever
/// mirrors it (typically a disk-backed modifier owned by the test harness).
pub trait FileModifier {
    fn remove(&mut self, relative_path: &str);
    fn insert(&mut self, relative_path: &str, size: u64, content_char: u8);
    fn set_contents(&mut self, relative_path: &str, content_char: u8);
    fn append_byte(&mut self, relative_path: &str);
    fn mkdir(&mut self, relative_path: &str);
    fn rename(&mut self, from: &str, to: &str);
}

/// In-memory hierarchy of remote resources.
///
/// Nodes live in an index arena; directories map child names to node indices,
/// ordered by name so listings and tree comparison are deterministic. Every
/// mutation regenerates the etag of the touched node's ancestors up to the
/// root, which is what lets a listing on a directory observe that something
/// below it changed without enumerating the subtree.
#[derive(Clone)]
pub struct FileTree {
    slots: Vec<Option<FileNode>>,
    free: Vec<usize>,
    root: NodeId,
    etag_seq: u64,
    id_seq: u64,
}

impl FileTree {
    pub fn new() -> Self {
        let mut tree = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId(0),
            etag_seq: 0,
            id_seq: 0,
        };
        let etag = tree.next_etag();
        let file_id = tree.next_file_id();
        tree.root = tree.alloc(FileNode {
            name: String::new(),
            is_dir: true,
            is_shared: false,
            last_modified: default_last_modified(),
            etag,
            file_id,
            size: 0,
            content_char: DEFAULT_CONTENT_CHAR,
            parent_path: String::new(),
            parent: None,
            children: BTreeMap::new(),
        });
        tree
    }

    /// Canonical test layout: directories A/B/C with two files each (sizes 4,
    /// 16 and 24), plus a shared directory S with two shared 32-byte files.
    pub fn standard_fixture() -> Self {
        let mut tree = Self::new();
        for (dir, size) in [("A", 4), ("B", 16), ("C", 24)] {
            tree.create_dir(dir);
            let prefix = dir.to_ascii_lowercase();
            tree.create_file(&format!("{dir}/{prefix}1"), size, DEFAULT_CONTENT_CHAR);
            tree.create_file(&format!("{dir}/{prefix}2"), size, DEFAULT_CONTENT_CHAR);
        }
        tree.create_dir("S");
        tree.create_file("S/s1", 32, DEFAULT_CONTENT_CHAR);
        tree.create_file("S/s2", 32, DEFAULT_CONTENT_CHAR);
        for path in ["S", "S/s1", "S/s2"] {
            tree.set_shared(path, true);
        }
        tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &FileNode {
        self.slots[id.0]
            .as_ref()
            .expect("node id refers to a removed node")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut FileNode {
        self.slots[id.0]
            .as_mut()
            .expect("node id refers to a removed node")
    }

    /// Direct children of a directory, in name order.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &FileNode> + '_ {
        self.node(id).children.values().map(|child| self.node(*child))
    }

    pub fn find(&self, path: &str) -> Option<NodeId> {
        self.lookup(PathComponents::new(path).as_slice())
    }

    pub fn get(&self, path: &str) -> Option<&FileNode> {
        self.find(path).map(|id| self.node(id))
    }

    /// Walks to `path` and, on a hit, regenerates the found node's etag and
    /// propagates the fresh value to every node visited on the way down. A
    /// miss leaves all etags untouched.
    pub fn find_invalidating(&mut self, path: &str) -> Option<NodeId> {
        let chain = self.lookup_chain(PathComponents::new(path).as_slice())?;
        self.refresh_chain(&chain);
        chain.last().copied()
    }

    /// Inserts a directory under an existing parent and returns its id.
    pub fn create_dir(&mut self, path: &str) -> NodeId {
        self.create_node(path, true, 0, DEFAULT_CONTENT_CHAR)
    }

    /// Inserts a file under an existing parent and returns its id.
    pub fn create_file(&mut self, path: &str, size: u64, content_char: u8) -> NodeId {
        self.create_node(path, false, size, content_char)
    }

    /// Overwrites an existing file's size and fill byte, or creates the file
    /// if it is absent. Ancestors are invalidated either way.
    pub fn upsert_file(&mut self, path: &str, size: u64, content_char: u8) -> NodeId {
        match self.find_invalidating(path) {
            Some(id) => {
                let node = self.node_mut(id);
                node.size = size;
                node.content_char = content_char;
                id
            }
            None => self.create_file(path, size, content_char),
        }
    }

    /// Detaches the node (and its subtree) from its parent.
    pub fn remove(&mut self, path: &str) {
        let components = PathComponents::new(path);
        let Some(parent) = self.lookup(components.parent()) else {
            panic!("parent directory of {path:?} does not exist");
        };
        let Some(detached) = self
            .node_mut(parent)
            .children
            .remove(components.file_name())
        else {
            panic!("node to remove {path:?} does not exist");
        };
        self.free_subtree(detached);
        self.refresh_upward(parent);
    }

    /// Moves `from` to `to`, relabeling the node and fixing the cached parent
    /// path of its entire subtree. The node keeps its file id; ancestors of
    /// both endpoints get fresh etags.
    pub fn rename(&mut self, from: &str, to: &str) {
        let to_components = PathComponents::new(to);
        let Some(dest_parent) = self.lookup(to_components.parent()) else {
            panic!("destination parent of {to:?} does not exist");
        };
        assert!(
            self.node(dest_parent).is_dir,
            "rename destination parent must be a directory"
        );
        let from_components = PathComponents::new(from);
        let Some(src_parent) = self.lookup(from_components.parent()) else {
            panic!("source parent of {from:?} does not exist");
        };
        let Some(moved) = self
            .node_mut(src_parent)
            .children
            .remove(from_components.file_name())
        else {
            panic!("rename source {from:?} does not exist");
        };

        let parent_path = self.node(dest_parent).path();
        let node = self.node_mut(moved);
        node.name = to_components.file_name().to_string();
        node.parent = Some(dest_parent);
        node.parent_path = parent_path;
        self.fixup_parent_paths(moved);

        if let Some(previous) = self
            .node_mut(dest_parent)
            .children
            .insert(to_components.file_name().to_string(), moved)
        {
            self.free_subtree(previous);
        }

        self.refresh_upward(src_parent);
        self.refresh_upward(moved);
    }

    /// Replaces an existing file's fill byte.
    pub fn set_contents(&mut self, path: &str, content_char: u8) {
        let Some(id) = self.find_invalidating(path) else {
            panic!("file {path:?} does not exist");
        };
        self.node_mut(id).content_char = content_char;
    }

    /// Grows an existing file by one byte.
    pub fn append_byte(&mut self, path: &str) {
        let Some(id) = self.find_invalidating(path) else {
            panic!("file {path:?} does not exist");
        };
        self.node_mut(id).size += 1;
    }

    /// Fixture helper; the shared flag feeds permission strings and is never
    /// derived, so flipping it does not count as a content change.
    pub fn set_shared(&mut self, path: &str, shared: bool) {
        let Some(id) = self.find(path) else {
            panic!("node {path:?} does not exist");
        };
        self.node_mut(id).is_shared = shared;
    }

    /// Fixture helper for tests that need a specific modification time.
    pub fn set_last_modified(&mut self, path: &str, when: OffsetDateTime) {
        let Some(id) = self.find(path) else {
            panic!("node {path:?} does not exist");
        };
        self.node_mut(id).last_modified = when;
    }

    fn create_node(&mut self, path: &str, is_dir: bool, size: u64, content_char: u8) -> NodeId {
        let components = PathComponents::new(path);
        let Some(parent) = self.lookup(components.parent()) else {
            panic!("parent directory of {path:?} does not exist");
        };
        let parent_path = self.node(parent).path();
        let etag = self.next_etag();
        let file_id = self.next_file_id();
        let id = self.alloc(FileNode {
            name: components.file_name().to_string(),
            is_dir,
            is_shared: false,
            last_modified: default_last_modified(),
            etag,
            file_id,
            size,
            content_char,
            parent_path,
            parent: Some(parent),
            children: BTreeMap::new(),
        });
        if let Some(previous) = self
            .node_mut(parent)
            .children
            .insert(components.file_name().to_string(), id)
        {
            self.free_subtree(previous);
        }
        self.refresh_upward(parent);
        id
    }

    fn lookup(&self, parts: &[&str]) -> Option<NodeId> {
        let mut current = self.root;
        for part in parts {
            current = *self.node(current).children.get(*part)?;
        }
        Some(current)
    }

    fn lookup_chain(&self, parts: &[&str]) -> Option<Vec<NodeId>> {
        let mut chain = Vec::with_capacity(parts.len() + 1);
        chain.push(self.root);
        let mut current = self.root;
        for part in parts {
            current = *self.node(current).children.get(*part)?;
            chain.push(current);
        }
        Some(chain)
    }

    fn refresh_chain(&mut self, chain: &[NodeId]) {
        let etag = self.next_etag();
        for &id in chain {
            self.node_mut(id).etag = etag.clone();
        }
    }

    fn refresh_upward(&mut self, id: NodeId) {
        let etag = self.next_etag();
        let mut current = Some(id);
        while let Some(node) = current {
            self.node_mut(node).etag = etag.clone();
            current = self.node(node).parent;
        }
    }

    fn fixup_parent_paths(&mut self, id: NodeId) {
        let path = self.node(id).path();
        let children: Vec<NodeId> = self.node(id).children.values().copied().collect();
        for child in children {
            debug_assert_eq!(
                self.node(id).children.get(self.node(child).name.as_str()),
                Some(&child)
            );
            self.node_mut(child).parent_path = path.clone();
            self.fixup_parent_paths(child);
        }
    }

    fn alloc(&mut self, node: FileNode) -> NodeId {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                NodeId(slot)
            }
            None => {
                self.slots.push(Some(node));
                NodeId(self.slots.len() - 1)
            }
        }
    }

    fn free_subtree(&mut self, id: NodeId) {
        let node = self.slots[id.0]
            .take()
            .expect("node id refers to a removed node");
        for &child in node.children.values() {
            self.free_subtree(child);
        }
        self.free.push(id.0);
    }

    fn next_etag(&mut self) -> String {
        self.etag_seq += 1;
        format!("{:x}", self.etag_seq)
    }

    fn next_file_id(&mut self) -> String {
        self.id_seq += 1;
        format!("{:08x}", self.id_seq)
    }

    fn subtree_equal(&self, id: NodeId, other: &FileTree, other_id: NodeId) -> bool {
        let (a, b) = (self.node(id), other.node(other_id));
        if a.name != b.name
            || a.is_dir != b.is_dir
            || a.size != b.size
            || a.content_char != b.content_char
            || a.children.len() != b.children.len()
        {
            return false;
        }
        a.children
            .iter()
            .zip(b.children.iter())
            .all(|((name_a, child_a), (name_b, child_b))| {
                name_a == name_b && self.subtree_equal(*child_a, other, *child_b)
            })
    }

    fn describe(&self, id: NodeId, out: &mut Vec<String>) {
        let node = self.node(id);
        if node.is_dir {
            if !node.name.is_empty() {
                out.push(format!("{} - dir", node.name));
            }
            for child in self.node(id).children.values() {
                self.describe(*child, out);
            }
        } else {
            out.push(format!(
                "{} - {} {}-bytes",
                node.name, node.size, node.content_char as char
            ));
        }
    }
}

impl Default for FileTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Structural equality as a user would judge it: names, kinds, sizes, fill
/// bytes and children. Etags, file ids and timestamps are simulation
/// artifacts and are ignored.
impl PartialEq for FileTree {
    fn eq(&self, other: &Self) -> bool {
        self.subtree_equal(self.root, other, other.root)
    }
}

impl fmt::Debug for FileTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries = Vec::new();
        self.describe(self.root, &mut entries);
        write!(
            f,
            "FileTree with {} entries ({})",
            entries.len(),
            entries.join(", ")
        )
    }
}

impl FileModifier for FileTree {
    fn remove(&mut self, relative_path: &str) {
        FileTree::remove(self, relative_path);
    }

    fn insert(&mut self, relative_path: &str, size: u64, content_char: u8) {
        self.create_file(relative_path, size, content_char);
    }

    fn set_contents(&mut self, relative_path: &str, content_char: u8) {
        FileTree::set_contents(self, relative_path, content_char);
    }

    fn append_byte(&mut self, relative_path: &str) {
        FileTree::append_byte(self, relative_path);
    }

    fn mkdir(&mut self, relative_path: &str) {
        self.create_dir(relative_path);
    }

    fn rename(&mut self, from: &str, to: &str) {
        FileTree::rename(self, from, to);
    }
}

fn default_last_modified() -> OffsetDateTime {
    OffsetDateTime::now_utc() - Duration::days(7)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn etag_of(tree: &FileTree, path: &str) -> String {
        tree.get(path).expect("node exists").etag.clone()
    }

    #[test]
    fn created_nodes_are_found_at_their_path() {
        let mut tree = FileTree::new();
        tree.create_dir("A");
        tree.create_file("A/a1", 4, b'W');

        let node = tree.get("A/a1").unwrap();
        assert_eq!(node.path(), "A/a1");
        assert_eq!(node.size, 4);
        assert_eq!(node.content_char, b'W');
        assert!(!node.is_dir);
        assert!(tree.get("A").unwrap().is_dir);
    }

    #[test]
    fn mutation_refreshes_target_and_ancestors_but_not_siblings() {
        let mut tree = FileTree::standard_fixture();
        let root_before = tree.node(tree.root()).etag.clone();
        let a_before = etag_of(&tree, "A");
        let a1_before = etag_of(&tree, "A/a1");
        let b_before = etag_of(&tree, "B");
        let b1_before = etag_of(&tree, "B/b1");

        tree.append_byte("A/a1");

        assert_ne!(etag_of(&tree, "A/a1"), a1_before);
        assert_ne!(etag_of(&tree, "A"), a_before);
        assert_ne!(tree.node(tree.root()).etag, root_before);
        assert_eq!(etag_of(&tree, "B"), b_before);
        assert_eq!(etag_of(&tree, "B/b1"), b1_before);
        assert_eq!(tree.get("A/a1").unwrap().size, 5);
    }

    #[test]
    fn failed_invalidating_find_leaves_etags_alone() {
        let mut tree = FileTree::standard_fixture();
        let a_before = etag_of(&tree, "A");

        assert!(tree.find_invalidating("A/missing").is_none());

        assert_eq!(etag_of(&tree, "A"), a_before);
    }

    #[test]
    fn set_contents_changes_fill_byte_and_etag() {
        let mut tree = FileTree::standard_fixture();
        let before = etag_of(&tree, "A/a2");

        tree.set_contents("A/a2", b'Q');

        let node = tree.get("A/a2").unwrap();
        assert_eq!(node.content_char, b'Q');
        assert_ne!(node.etag, before);
    }

    #[test]
    fn rename_preserves_file_id_and_subtree_paths() {
        let mut tree = FileTree::standard_fixture();
        let file_id = tree.get("A").unwrap().file_id.clone();
        let a_child_id = tree.get("A/a1").unwrap().file_id.clone();

        tree.rename("A", "B/moved");

        assert!(tree.get("A").is_none());
        let moved = tree.get("B/moved").unwrap();
        assert_eq!(moved.file_id, file_id);
        assert_eq!(moved.parent_path, "B");
        let child = tree.get("B/moved/a1").unwrap();
        assert_eq!(child.file_id, a_child_id);
        assert_eq!(child.path(), "B/moved/a1");
    }

    #[test]
    fn rename_matches_delete_then_create_structurally() {
        let mut renamed = FileTree::new();
        renamed.create_dir("D");
        renamed.create_file("D/f", 8, b'x');
        renamed.rename("D/f", "D/g");

        let mut rebuilt = FileTree::new();
        rebuilt.create_dir("D");
        rebuilt.create_file("D/g", 8, b'x');

        assert_eq!(renamed, rebuilt);
    }

    #[test]
    fn rename_refreshes_both_endpoints() {
        let mut tree = FileTree::standard_fixture();
        let a_before = etag_of(&tree, "A");
        let b_before = etag_of(&tree, "B");
        let c_before = etag_of(&tree, "C");

        tree.rename("A/a1", "B/a1");

        assert_ne!(etag_of(&tree, "A"), a_before);
        assert_ne!(etag_of(&tree, "B"), b_before);
        assert_eq!(etag_of(&tree, "C"), c_before);
    }

    #[test]
    fn equality_ignores_etags_ids_shared_flags_and_timestamps() {
        let tree = FileTree::standard_fixture();
        let mut other = tree.clone();

        other.find_invalidating("A/a1");
        other.set_shared("B", true);
        other.set_last_modified("C/c1", OffsetDateTime::UNIX_EPOCH);

        assert_eq!(tree, other);

        other.append_byte("A/a1");
        assert_ne!(tree, other);
    }

    #[test]
    fn removed_subtree_is_gone_and_slots_are_recycled() {
        let mut tree = FileTree::standard_fixture();
        let slots_before = tree.slots.len();

        tree.remove("A");
        assert!(tree.get("A").is_none());
        assert!(tree.get("A/a1").is_none());

        tree.create_dir("A2");
        tree.create_file("A2/x", 1, b'W');
        tree.create_file("A2/y", 1, b'W');
        assert_eq!(tree.slots.len(), slots_before);
    }

    #[test]
    fn upsert_creates_then_overwrites() {
        let mut tree = FileTree::new();
        tree.create_dir("A");

        let id = tree.upsert_file("A/new", 3, b'N');
        assert_eq!(tree.node(id).size, 3);
        let file_id = tree.node(id).file_id.clone();
        let etag = tree.node(id).etag.clone();

        let again = tree.upsert_file("A/new", 9, b'M');
        assert_eq!(again, id);
        assert_eq!(tree.node(id).size, 9);
        assert_eq!(tree.node(id).content_char, b'M');
        assert_eq!(tree.node(id).file_id, file_id);
        assert_ne!(tree.node(id).etag, etag);
    }

    #[test]
    fn standard_fixture_layout() {
        let tree = FileTree::standard_fixture();
        let root_children: Vec<String> = tree
            .children(tree.root())
            .map(|child| child.name.clone())
            .collect();
        assert_eq!(root_children, ["A", "B", "C", "S"]);
        assert_eq!(tree.get("B/b2").unwrap().size, 16);
        assert!(tree.get("S/s1").unwrap().is_shared);
        assert!(!tree.get("A/a1").unwrap().is_shared);
    }

    #[test]
    #[should_panic(expected = "parent directory")]
    fn creating_under_missing_parent_panics() {
        let mut tree = FileTree::new();
        tree.create_file("missing/file", 1, b'W');
    }

    #[test]
    #[should_panic(expected = "rename source")]
    fn renaming_missing_source_panics() {
        let mut tree = FileTree::standard_fixture();
        tree.rename("A/nope", "B/nope");
    }

    #[test]
    fn file_modifier_trait_drives_mutations() {
        let mut tree = FileTree::new();
        let modifier: &mut dyn FileModifier = &mut tree;
        modifier.mkdir("A");
        modifier.insert("A/a1", DEFAULT_FILE_SIZE, DEFAULT_CONTENT_CHAR);
        modifier.append_byte("A/a1");
        modifier.set_contents("A/a1", b'Q');
        modifier.rename("A/a1", "A/a2");

        let node = tree.get("A/a2").unwrap();
        assert_eq!(node.size, DEFAULT_FILE_SIZE + 1);
        assert_eq!(node.content_char, b'Q');

        FileModifier::remove(&mut tree, "A/a2");
        assert!(tree.get("A/a2").is_none());
    }

    #[test]
    fn debug_output_lists_files() {
        let mut tree = FileTree::new();
        tree.create_dir("A");
        tree.create_file("A/a1", 4, b'W');
        let rendered = format!("{tree:?}");
        assert!(rendered.contains("A - dir"));
        assert!(rendered.contains("a1 - 4 W-bytes"));
    }
}
