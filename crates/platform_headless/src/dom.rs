use anyhow::{Result, anyhow};
use platform::{Document, ElementId};
use std::collections::BTreeMap;
use std::sync::Mutex;

const BODY: ElementId = ElementId(0);

#[derive(Debug, Clone)]
struct Node {
    tag: String,
    attributes: BTreeMap<String, String>,
    children: Vec<ElementId>,
    parent: Option<ElementId>,
    text: String,
    size: (f64, f64),
}

impl Node {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attributes: BTreeMap::new(),
            children: Vec::new(),
            parent: None,
            text: String::new(),
            size: (0.0, 0.0),
        }
    }
}

/// Element tree with a `<body>` root. Elements are never freed; detached
/// ones simply have no parent.
pub struct HeadlessDocument {
    nodes: Mutex<Vec<Node>>,
}

impl Default for HeadlessDocument {
    fn default() -> Self {
        let mut body = Node::new("body");
        body.size = (1280.0, 720.0);
        Self {
            nodes: Mutex::new(vec![body]),
        }
    }
}

impl HeadlessDocument {
    fn with_node<T>(&self, element: ElementId, f: impl FnOnce(&mut Node) -> T) -> Result<T> {
        let mut nodes = self
            .nodes
            .lock()
            .map_err(|_| anyhow!("failed to lock headless document"))?;
        let node = nodes
            .get_mut(element.0 as usize)
            .ok_or_else(|| anyhow!("NotFoundError: no element {}", element.0))?;
        Ok(f(node))
    }

    pub fn children(&self, element: ElementId) -> Result<Vec<ElementId>> {
        self.with_node(element, |node| node.children.clone())
    }

    pub fn inner_text(&self, element: ElementId) -> Result<String> {
        self.with_node(element, |node| node.text.clone())
    }
}

impl Document for HeadlessDocument {
    fn body(&self) -> ElementId {
        BODY
    }

    fn create_element(&self, tag: &str) -> Result<ElementId> {
        if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(anyhow!("InvalidCharacterError: bad tag name {tag:?}"));
        }
        let mut nodes = self
            .nodes
            .lock()
            .map_err(|_| anyhow!("failed to lock headless document"))?;
        nodes.push(Node::new(tag));
        Ok(ElementId((nodes.len() - 1) as u32))
    }

    fn element_by_id(&self, id: &str) -> Option<ElementId> {
        let nodes = self.nodes.lock().ok()?;
        nodes
            .iter()
            .position(|node| node.attributes.get("id").map(String::as_str) == Some(id))
            .map(|index| ElementId(index as u32))
    }

    fn tag_name(&self, element: ElementId) -> Result<String> {
        self.with_node(element, |node| node.tag.to_ascii_uppercase())
    }

    fn set_attribute(&self, element: ElementId, name: &str, value: &str) -> Result<()> {
        self.with_node(element, |node| {
            node.attributes.insert(name.to_string(), value.to_string());
        })
    }

    fn attribute(&self, element: ElementId, name: &str) -> Result<Option<String>> {
        self.with_node(element, |node| node.attributes.get(name).cloned())
    }

    fn append_child(&self, parent: ElementId, child: ElementId) -> Result<()> {
        if parent == child {
            return Err(anyhow!("HierarchyRequestError: element cannot contain itself"));
        }
        let mut nodes = self
            .nodes
            .lock()
            .map_err(|_| anyhow!("failed to lock headless document"))?;
        let len = nodes.len();
        if parent.0 as usize >= len || child.0 as usize >= len {
            return Err(anyhow!("NotFoundError: unknown element"));
        }
        let mut ancestor = Some(parent);
        while let Some(current) = ancestor {
            if current == child {
                return Err(anyhow!("HierarchyRequestError: child is an ancestor of parent"));
            }
            ancestor = nodes[current.0 as usize].parent;
        }
        if let Some(old_parent) = nodes[child.0 as usize].parent.take() {
            nodes[old_parent.0 as usize]
                .children
                .retain(|existing| *existing != child);
        }
        nodes[child.0 as usize].parent = Some(parent);
        nodes[parent.0 as usize].children.push(child);
        Ok(())
    }

    fn remove_child(&self, parent: ElementId, child: ElementId) -> Result<()> {
        let mut nodes = self
            .nodes
            .lock()
            .map_err(|_| anyhow!("failed to lock headless document"))?;
        let is_child = nodes
            .get(child.0 as usize)
            .is_some_and(|node| node.parent == Some(parent));
        if !is_child {
            return Err(anyhow!("NotFoundError: element is not a child of this node"));
        }
        nodes[child.0 as usize].parent = None;
        nodes[parent.0 as usize]
            .children
            .retain(|existing| *existing != child);
        Ok(())
    }

    fn set_inner_text(&self, element: ElementId, text: &str) -> Result<()> {
        self.with_node(element, |node| node.text = text.to_string())
    }

    fn size(&self, element: ElementId) -> Result<(f64, f64)> {
        self.with_node(element, |node| node.size)
    }

    fn set_size(&self, element: ElementId, width: f64, height: f64) -> Result<()> {
        self.with_node(element, |node| node.size = (width.max(0.0), height.max(0.0)))
    }
}
