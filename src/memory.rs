//! In-memory reference sink.
//!
//! [`MemorySink`] 是 [`SceneSink`] 的进程内参考实现：用 slotmap 节点池
//! 维护一棵真实的 DAG，并记录编辑会话的开合。它既可以作为 headless
//! 干跑（dry-run）后端，也是测试套件验证父子关系、删除完整性和会话
//! 纪律的依据。

use rustc_hash::{FxHashMap, FxHashSet};
use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::errors::{Result, SyncError};
use crate::sink::{NodeHandle, NodeKind, PropertyValue, SceneSink};
use crate::source::{GeometryCounts, TransformSample, TransformSamples};

/// 一个保留场景图节点的完整状态
#[derive(Debug, Clone)]
pub struct MemoryNode {
    pub name: String,
    pub kind: NodeKind,
    pub parents: SmallVec<[NodeHandle; 2]>,
    pub children: Vec<NodeHandle>,
    pub material: Option<NodeHandle>,
    pub transform: TransformSamples,
    pub properties: FxHashMap<String, PropertyValue>,
    pub counts: Option<GeometryCounts>,
    pub hidden: bool,
}

impl MemoryNode {
    fn new(kind: NodeKind, name: &str) -> Self {
        Self {
            name: name.to_owned(),
            kind,
            parents: SmallVec::new(),
            children: Vec::new(),
            material: None,
            transform: TransformSamples::new(),
            properties: FxHashMap::default(),
            counts: None,
            hidden: false,
        }
    }
}

/// 进程内保留场景图
pub struct MemorySink {
    nodes: SlotMap<NodeHandle, MemoryNode>,
    root: NodeHandle,
    open: bool,
    edits_committed: u64,
    options: FxHashMap<String, PropertyValue>,
    /// define() 会对这些名字报错，用于验证部分失败语义
    poisoned: FxHashSet<String>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(MemoryNode::new(NodeKind::Group, "root"));
        Self {
            nodes,
            root,
            open: false,
            edits_committed: 0,
            options: FxHashMap::default(),
            poisoned: FxHashSet::default(),
        }
    }

    // ========================================================================
    // 检查接口 (Inspection)
    // ========================================================================

    #[must_use]
    pub fn node(&self, handle: NodeHandle) -> Option<&MemoryNode> {
        self.nodes.get(handle)
    }

    /// 节点总数（含根节点）
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    #[must_use]
    pub fn edits_committed(&self) -> u64 {
        self.edits_committed
    }

    /// 按名字查找节点（测试用，线性扫描）
    #[must_use]
    pub fn find(&self, name: &str) -> Option<NodeHandle> {
        self.nodes.iter().find(|(_, n)| n.name == name).map(|(h, _)| h)
    }

    #[must_use]
    pub fn option(&self, name: &str) -> Option<&PropertyValue> {
        self.options.get(name)
    }

    /// 除根节点外所有没有父节点的节点。
    /// 材质和灯光滤镜按引用绑定、不入 DAG，不算孤儿。
    #[must_use]
    pub fn orphans(&self) -> Vec<NodeHandle> {
        self.nodes
            .iter()
            .filter(|(h, n)| {
                *h != self.root
                    && n.parents.is_empty()
                    && !matches!(n.kind, NodeKind::Material | NodeKind::LightFilter)
            })
            .map(|(h, _)| h)
            .collect()
    }

    #[must_use]
    pub fn has_child(&self, parent: NodeHandle, child: NodeHandle) -> bool {
        self.nodes
            .get(parent)
            .is_some_and(|n| n.children.contains(&child))
    }

    /// 是否有任何存活节点把 `handle` 当作子节点引用
    #[must_use]
    pub fn referenced_as_child(&self, handle: NodeHandle) -> bool {
        self.nodes.iter().any(|(_, n)| n.children.contains(&handle))
    }

    /// 所有存活节点的句柄
    pub fn handles(&self) -> impl Iterator<Item = NodeHandle> + '_ {
        self.nodes.keys()
    }

    /// 指向已删除节点的残留 (parent, child) 引用。
    /// 同步器先摘除后删除，正常情况下应当为空。
    #[must_use]
    pub fn dangling_refs(&self) -> Vec<(NodeHandle, NodeHandle)> {
        let mut dangling = Vec::new();
        for (handle, node) in &self.nodes {
            for child in &node.children {
                if !self.nodes.contains_key(*child) {
                    dangling.push((handle, *child));
                }
            }
        }
        dangling
    }

    /// 让 define() 对指定名字的节点报错
    pub fn poison(&mut self, name: &str) {
        self.poisoned.insert(name.to_owned());
    }

    fn assert_open(&self) {
        debug_assert!(self.open, "scene-graph mutation outside an open edit scope");
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneSink for MemorySink {
    fn root(&self) -> NodeHandle {
        self.root
    }

    fn create_node(&mut self, kind: NodeKind, name: &str) -> NodeHandle {
        self.nodes.insert(MemoryNode::new(kind, name))
    }

    fn define(&mut self, node: NodeHandle, counts: GeometryCounts) -> Result<()> {
        self.assert_open();
        let Some(n) = self.nodes.get_mut(node) else {
            return Err(SyncError::Sink {
                node: String::from("<dead handle>"),
                message: String::from("define on a deleted node"),
            });
        };
        if self.poisoned.contains(&n.name) {
            return Err(SyncError::Sink {
                node: n.name.clone(),
                message: String::from("malformed geometry"),
            });
        }
        n.counts = Some(counts);
        Ok(())
    }

    fn edit_begin(&mut self) -> Result<()> {
        if self.open {
            return Err(SyncError::SessionViolation("edit_begin while a scope is open"));
        }
        self.open = true;
        Ok(())
    }

    fn edit_end(&mut self) -> Result<()> {
        if !self.open {
            return Err(SyncError::SessionViolation("edit_end without an open scope"));
        }
        self.open = false;
        self.edits_committed += 1;
        Ok(())
    }

    fn set_transform(&mut self, node: NodeHandle, samples: &[TransformSample]) {
        self.assert_open();
        if let Some(n) = self.nodes.get_mut(node) {
            n.transform = TransformSamples::from_slice(samples);
        }
    }

    fn set_material(&mut self, node: NodeHandle, material: NodeHandle) {
        self.assert_open();
        if let Some(n) = self.nodes.get_mut(node) {
            n.material = Some(material);
        }
    }

    fn set_property(&mut self, node: NodeHandle, name: &str, value: PropertyValue) {
        self.assert_open();
        if let Some(n) = self.nodes.get_mut(node) {
            n.properties.insert(name.to_owned(), value);
        }
    }

    fn set_option(&mut self, name: &str, value: PropertyValue) {
        self.assert_open();
        self.options.insert(name.to_owned(), value);
    }

    fn set_hidden(&mut self, node: NodeHandle, hidden: bool) {
        self.assert_open();
        if let Some(n) = self.nodes.get_mut(node) {
            n.hidden = hidden;
        }
    }

    fn add_child(&mut self, parent: NodeHandle, child: NodeHandle) {
        self.assert_open();
        if parent == child {
            log::warn!("Cannot attach node to itself!");
            return;
        }
        // 双向登记父子关系
        if let Some(p) = self.nodes.get_mut(parent)
            && !p.children.contains(&child)
        {
            p.children.push(child);
        }
        if let Some(c) = self.nodes.get_mut(child)
            && !c.parents.contains(&parent)
        {
            c.parents.push(parent);
        }
    }

    fn remove_child(&mut self, parent: NodeHandle, child: NodeHandle) {
        self.assert_open();
        if let Some(p) = self.nodes.get_mut(parent)
            && let Some(i) = p.children.iter().position(|&x| x == child)
        {
            p.children.remove(i);
        }
        if let Some(c) = self.nodes.get_mut(child)
            && let Some(i) = c.parents.iter().position(|&x| x == parent)
        {
            c.parents.remove(i);
        }
    }

    fn delete_node(&mut self, node: NodeHandle) {
        self.assert_open();
        if node == self.root {
            log::error!("Attempted to delete the scene root!");
            return;
        }
        // 故意不清理残留引用：未先 detach 的删除会在图里留下悬挂句柄，
        // 由测试暴露出来。
        self.nodes.remove(node);
    }
}
