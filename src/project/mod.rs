//! In-memory model of a Polytoria project file.
//!
//! A `.poly` file is an XML document the user also edits by hand. Mosaic
//! loads it into an arena of nodes with stable [`NodeId`] indices and parent
//! links, changes only the nodes it owns, and writes everything else back
//! exactly as it was read.
//!
//! # Ownership
//!
//! Every node has a [`NodeOrigin`]:
//!
//! - [`NodeOrigin::Foreign`] - written by the user or Polytoria; never changed
//! - [`NodeOrigin::Owned`] - a module injected by Mosaic, tagged with the
//!   `mosaic-package` and `mosaic-hash` attributes
//! - [`NodeOrigin::Generated`] - structure Mosaic created to hold its modules
//!   (a `ScriptService` container marked `mosaic-generated="true"`); it is
//!   left out of the output once it holds no elements
//!
//! # Round-trip Guarantee
//!
//! Nodes keep their raw source text, so an unmodified tree serializes to the
//! input byte for byte. The whitespace in front of an owned node belongs to
//! that node, so removing a module also removes the indentation inserted with
//! it.
//!
//! ```xml
//! <Item class="ScriptService">
//!   <Item class="ModuleScript" mosaic-package="logger" mosaic-version="1.0.0" mosaic-hash="sha256:...">
//!     <Properties>
//!       <string name="Source">return {}</string>
//!       <string name="Name">logger</string>
//!     </Properties>
//!   </Item>
//! </Item>
//! ```

mod parser;

use anyhow::{Context, Result};
use semver::Version;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::constants::PROJECT_FILE_EXTENSION;
use crate::core::MosaicError;
use crate::models::{ContentHash, PackageName};
use parser::{ATTR_COLLAPSED_PARENT, ATTR_GENERATED, ATTR_HASH, ATTR_PACKAGE, ATTR_VERSION};

/// Class of the container that holds module scripts.
pub const CONTAINER_CLASS: &str = "ScriptService";

/// Class of the document's game root, preferred parent for a new container.
pub const GAME_CLASS: &str = "Game";

const DEFAULT_INDENT_UNIT: &str = "  ";

/// Stable index of a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Links an injected node to the package content that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Provenance {
    /// Package that owns the node
    pub package: PackageName,
    /// Hash of the blob the module source came from
    pub content_hash: ContentHash,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.package, self.content_hash.short())
    }
}

/// Who created a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOrigin {
    /// Authored outside Mosaic
    Foreign,
    /// Injected module
    Owned(Provenance),
    /// Container created by Mosaic
    Generated,
}

#[derive(Debug, Clone)]
enum NodeKind {
    Document,
    Element(Element),
    Text(String),
    /// Comments, processing instructions, declarations, CDATA
    Other(String),
}

#[derive(Debug, Clone)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    open_tag: String,
    close_tag: String,
    /// Original tag of an element written as `<x/>`, emitted while it has no
    /// visible content
    collapsed: Option<String>,
}

impl Element {
    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    fn is_item_of_class(&self, class: &str) -> bool {
        self.name == "Item" && self.attribute("class") == Some(class)
    }

    /// What follows the tag body in the collapsed form, e.g. `/>` or ` />`.
    fn collapsed_tail(&self) -> Option<&str> {
        let body = self.open_tag.strip_suffix('>').unwrap_or(&self.open_tag);
        self.collapsed.as_deref().and_then(|tag| tag.strip_prefix(body))
    }
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    /// `None` for the document and for detached nodes
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    origin: NodeOrigin,
    /// Whitespace emitted before the node; only managed nodes have any
    leading: String,
}

impl Node {
    const fn new(kind: NodeKind, parent: Option<NodeId>, origin: NodeOrigin) -> Self {
        Self {
            kind,
            parent,
            children: Vec::new(),
            origin,
            leading: String::new(),
        }
    }

    fn element(&self) -> Option<&Element> {
        match &self.kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    fn is_whitespace_text(&self) -> bool {
        matches!(&self.kind, NodeKind::Text(text) if text.chars().all(char::is_whitespace))
    }
}

/// An injected module found in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedNode {
    /// Arena index
    pub id: NodeId,
    /// Provenance tag
    pub provenance: Provenance,
    /// Value of `mosaic-version`, informational only
    pub version: Option<String>,
}

/// The parsed project file.
#[derive(Debug, Clone)]
pub struct ProjectTree {
    nodes: Vec<Node>,
    file: String,
    newline: &'static str,
}

impl ProjectTree {
    /// Parse project file text. `file` is only used in error messages.
    ///
    /// # Errors
    ///
    /// Returns [`MosaicError::XmlParse`] for malformed XML: mismatched or
    /// unclosed tags, bad attributes, or a missing root element.
    pub fn parse(text: &str, file: &str) -> Result<Self, MosaicError> {
        let nodes = parser::parse(text, file)?;
        Ok(Self {
            nodes,
            file: file.to_string(),
            newline: if text.contains("\r\n") { "\r\n" } else { "\n" },
        })
    }

    /// Read and parse a project file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is not well-formed.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read project file: {}", path.display()))?;
        Ok(Self::parse(&text, &path.display().to_string())?)
    }

    /// The document text.
    #[must_use]
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        self.write_node(NodeId(0), &mut out);
        out
    }

    /// Text of a single node (without its leading whitespace).
    #[must_use]
    pub fn node_text(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_content(id, &mut out);
        out
    }

    /// Origin of a node.
    #[must_use]
    pub fn origin(&self, id: NodeId) -> &NodeOrigin {
        &self.nodes[id.0].origin
    }

    /// The first `Item class="ScriptService"`, if any.
    #[must_use]
    pub fn container(&self) -> Option<NodeId> {
        self.find_element(|element| element.is_item_of_class(CONTAINER_CLASS))
    }

    /// The module container, created if the document has none.
    ///
    /// A new container goes under the `Item class="Game"` element, or under
    /// the root element when there is no game item. It is marked as generated
    /// and disappears from the output while it is empty.
    pub fn locate_or_create_container(&mut self) -> NodeId {
        if let Some(existing) = self.container() {
            return existing;
        }

        let parent = self
            .find_element(|element| element.is_item_of_class(GAME_CLASS))
            .or_else(|| self.root_element())
            .unwrap_or(NodeId(0));
        let indent = self.child_indent(parent);
        let collapsed_parent = if self.renders_collapsed(parent) {
            self.nodes[parent.0]
                .element()
                .and_then(Element::collapsed_tail)
                .map(|tail| format!(r#" {ATTR_COLLAPSED_PARENT}="{}""#, escape_attribute(tail)))
                .unwrap_or_default()
        } else {
            String::new()
        };
        let fragment = format!(
            r#"<Item class="{CONTAINER_CLASS}" {ATTR_GENERATED}="true"{collapsed_parent}></Item>"#
        );
        let id = self.graft(&fragment, parent);
        if let NodeKind::Element(element) = &mut self.nodes[id.0].kind {
            element.close_tag = format!("{}{indent}</Item>", self.newline);
        }
        self.attach(parent, id, &indent);
        id
    }

    /// Every injected module in the document, in document order.
    #[must_use]
    pub fn owned_nodes(&self) -> Vec<OwnedNode> {
        let mut owned = Vec::new();
        let mut stack = vec![NodeId(0)];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id.0];
            if let NodeOrigin::Owned(provenance) = &node.origin {
                owned.push(OwnedNode {
                    id,
                    provenance: provenance.clone(),
                    version: node
                        .element()
                        .and_then(|element| element.attribute(ATTR_VERSION))
                        .map(ToString::to_string),
                });
                continue;
            }
            stack.extend(node.children.iter().rev().copied());
        }
        owned
    }

    /// Elements in the container that Mosaic does not manage.
    #[must_use]
    pub fn foreign_nodes(&self) -> Vec<NodeId> {
        let Some(container) = self.container() else {
            return Vec::new();
        };
        self.nodes[container.0]
            .children
            .iter()
            .copied()
            .filter(|child| {
                let node = &self.nodes[child.0];
                node.element().is_some() && node.origin == NodeOrigin::Foreign
            })
            .collect()
    }

    /// Inject a module script owned by `provenance`.
    ///
    /// The module is appended to the container after its existing children,
    /// indented like its siblings. Its `Name` is `module_name` and its
    /// `Source` is `source`.
    ///
    /// # Errors
    ///
    /// Refuses a provenance tag that is already present in the document.
    pub fn insert_owned(
        &mut self,
        provenance: &Provenance,
        version: &Version,
        module_name: &str,
        source: &str,
    ) -> Result<NodeId, MosaicError> {
        if self.owned_nodes().iter().any(|owned| &owned.provenance == provenance) {
            return Err(MosaicError::Other {
                message: format!("{provenance} is already injected into {}", self.file),
            });
        }

        let container = self.locate_or_create_container();
        let indent = self.child_indent(container);
        let unit = self.indent_unit(container, &indent);
        let nl = self.newline;
        let fragment = format!(
            "<Item class=\"ModuleScript\" {ATTR_PACKAGE}=\"{package}\" {ATTR_VERSION}=\"{version}\" \
             {ATTR_HASH}=\"{hash}\">{nl}\
             {indent}{unit}<Properties>{nl}\
             {indent}{unit}{unit}<string name=\"Source\">{source}</string>{nl}\
             {indent}{unit}{unit}<string name=\"Name\">{name}</string>{nl}\
             {indent}{unit}</Properties>{nl}\
             {indent}</Item>",
            package = quick_xml::escape::escape(provenance.package.as_str()),
            hash = provenance.content_hash,
            source = quick_xml::escape::escape(source),
            name = quick_xml::escape::escape(module_name),
        );

        let id = self.graft(&fragment, container);
        self.attach(container, id, &indent);
        Ok(id)
    }

    /// Remove every module tagged with `provenance`, returning how many were removed.
    pub fn remove_owned(&mut self, provenance: &Provenance) -> usize {
        let doomed: Vec<NodeId> = self
            .owned_nodes()
            .into_iter()
            .filter(|owned| &owned.provenance == provenance)
            .map(|owned| owned.id)
            .collect();
        for id in &doomed {
            self.detach(*id);
        }
        doomed.len()
    }

    /// Remove the owned node `id`, whatever its tag.
    pub fn remove_node(&mut self, id: NodeId) -> bool {
        if matches!(self.nodes[id.0].origin, NodeOrigin::Owned(_)) {
            self.detach(id);
            true
        } else {
            false
        }
    }

    fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|child| *child != id);
        }
    }

    fn root_element(&self) -> Option<NodeId> {
        self.nodes[0].children.iter().copied().find(|child| self.nodes[child.0].element().is_some())
    }

    /// First live element, in document order, matching `predicate`.
    fn find_element(&self, predicate: impl Fn(&Element) -> bool) -> Option<NodeId> {
        let mut stack = vec![NodeId(0)];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id.0];
            if node.element().is_some_and(&predicate) {
                return Some(id);
            }
            stack.extend(node.children.iter().rev().copied());
        }
        None
    }

    /// Parse `fragment` and copy its root element into the arena under `parent`,
    /// without attaching it to the parent's children yet.
    fn graft(&mut self, fragment: &str, parent: NodeId) -> NodeId {
        let parsed = match parser::parse(fragment, "<generated>") {
            Ok(nodes) => nodes,
            Err(e) => unreachable!("generated fragment must be well-formed: {e}"),
        };
        let offset = self.nodes.len() - 1;
        let remap = |id: NodeId| NodeId(id.0 + offset);
        let mut root = None;
        for mut node in parsed.into_iter().skip(1) {
            node.parent = match node.parent {
                Some(NodeId(0)) => Some(parent),
                other => other.map(remap),
            };
            node.children = node.children.into_iter().map(remap).collect();
            let id = NodeId(self.nodes.len());
            if root.is_none() && node.element().is_some() && node.parent == Some(parent) {
                root = Some(id);
            }
            self.nodes.push(node);
        }
        root.unwrap_or(NodeId(offset + 1))
    }

    /// Insert `id` as the last child of `parent`, before the parent's trailing
    /// whitespace, with a newline and `indent` in front of it.
    fn attach(&mut self, parent: NodeId, id: NodeId, indent: &str) {
        let nl = self.newline;
        let parent_indent = self.indent_of(parent);
        let children = &self.nodes[parent.0].children;
        let was_empty = children.is_empty();
        let position = children
            .iter()
            .rposition(|child| !self.nodes[child.0].is_whitespace_text())
            .map_or(0, |last| last + 1);

        if let NodeKind::Element(element) = &mut self.nodes[parent.0].kind {
            // A collapsed `<x/>` parent needs a closing tag on its own line
            if element.collapsed.is_some() && was_empty {
                element.close_tag = format!("{nl}{parent_indent}</{}>", element.name);
            }
        }

        self.nodes[id.0].leading = format!("{nl}{indent}");
        self.nodes[id.0].parent = Some(parent);
        self.nodes[parent.0].children.insert(position, id);
    }

    /// Whitespace after the last newline in front of `id`.
    fn indent_of(&self, id: NodeId) -> String {
        let node = &self.nodes[id.0];
        let before = if node.leading.is_empty() {
            node.parent.and_then(|parent| {
                let siblings = &self.nodes[parent.0].children;
                let index = siblings.iter().position(|sibling| *sibling == id)?;
                let previous = siblings.get(index.checked_sub(1)?)?;
                match &self.nodes[previous.0].kind {
                    NodeKind::Text(text) => Some(text.clone()),
                    _ => None,
                }
            })
        } else {
            Some(node.leading.clone())
        };
        before
            .and_then(|text| text.rsplit_once('\n').map(|(_, indent)| indent.to_string()))
            .filter(|indent| indent.chars().all(char::is_whitespace))
            .unwrap_or_default()
    }

    /// Indentation of `parent`'s child elements, detected from existing
    /// children or derived from the parent's own indentation.
    fn child_indent(&self, parent: NodeId) -> String {
        let children = &self.nodes[parent.0].children;
        for (index, child) in children.iter().enumerate() {
            let node = &self.nodes[child.0];
            if node.element().is_none() {
                continue;
            }
            let before = if node.leading.is_empty() {
                index
                    .checked_sub(1)
                    .and_then(|i| children.get(i))
                    .and_then(|previous| match &self.nodes[previous.0].kind {
                        NodeKind::Text(text) => Some(text.as_str()),
                        _ => None,
                    })
            } else {
                Some(node.leading.as_str())
            };
            if let Some((_, indent)) = before.and_then(|text| text.rsplit_once('\n')) {
                return indent.to_string();
            }
        }

        let parent_indent = self.indent_of(parent);
        let unit = if parent_indent.contains('\t') { "\t" } else { DEFAULT_INDENT_UNIT };
        format!("{parent_indent}{unit}")
    }

    /// One level of indentation below `parent`.
    fn indent_unit(&self, parent: NodeId, child_indent: &str) -> String {
        let parent_indent = self.indent_of(parent);
        match child_indent.strip_prefix(parent_indent.as_str()) {
            Some(unit) if !unit.is_empty() => unit.to_string(),
            _ if child_indent.contains('\t') => "\t".to_string(),
            _ => DEFAULT_INDENT_UNIT.to_string(),
        }
    }

    /// A generated container with no elements left is not written out.
    fn is_hidden(&self, id: NodeId) -> bool {
        let node = &self.nodes[id.0];
        node.origin == NodeOrigin::Generated
            && !node.children.iter().any(|child| self.nodes[child.0].element().is_some())
    }

    /// Whether an element that was written as `<x/>` is back to holding
    /// nothing but hidden containers and the whitespace around them.
    fn renders_collapsed(&self, id: NodeId) -> bool {
        let node = &self.nodes[id.0];
        node.element().is_some_and(|element| element.collapsed.is_some())
            && node
                .children
                .iter()
                .all(|child| self.is_hidden(*child) || self.nodes[child.0].is_whitespace_text())
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        if self.is_hidden(id) {
            return;
        }
        out.push_str(&self.nodes[id.0].leading);
        self.write_content(id, out);
    }

    fn write_content(&self, id: NodeId, out: &mut String) {
        let node = &self.nodes[id.0];
        match &node.kind {
            NodeKind::Document => {
                for child in &node.children {
                    self.write_node(*child, out);
                }
            }
            NodeKind::Text(text) | NodeKind::Other(text) => out.push_str(text),
            NodeKind::Element(element) => {
                if let Some(collapsed) = &element.collapsed {
                    if self.renders_collapsed(id) {
                        out.push_str(collapsed);
                        return;
                    }
                }
                out.push_str(&element.open_tag);
                for child in &node.children {
                    self.write_node(*child, out);
                }
                out.push_str(&element.close_tag);
            }
        }
    }
}

/// Escape an attribute value, keeping whitespace characters intact on reparse.
fn escape_attribute(value: &str) -> String {
    quick_xml::escape::escape(value).replace('\t', "&#9;").replace('\n', "&#10;").replace('\r', "&#13;")
}

/// Find the project file: `configured` if given, otherwise the first
/// `*.poly` file in `dir` sorted by name.
///
/// # Errors
///
/// Returns [`MosaicError::ProjectFileNotFound`] when there is none.
pub fn find_project_file(dir: &Path, configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(configured) = configured {
        let path = if configured.is_absolute() { configured.to_path_buf() } else { dir.join(configured) };
        if path.is_file() {
            return Ok(path);
        }
        return Err(MosaicError::ProjectFileNotFound {
            dir: path.display().to_string(),
        }
        .into());
    }

    let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Cannot read directory: {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path.extension().and_then(|ext| ext.to_str()) == Some(PROJECT_FILE_EXTENSION)
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next().ok_or_else(|| {
        MosaicError::ProjectFileNotFound {
            dir: dir.display().to_string(),
        }
        .into()
    })
}
