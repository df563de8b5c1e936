//! XML to arena parsing.
//!
//! Every event's raw source slice is stored on its node, including the bytes
//! between events, so concatenating the nodes reproduces the input exactly.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use super::{Element, Node, NodeId, NodeKind, NodeOrigin, Provenance};
use crate::core::MosaicError;
use crate::models::{ContentHash, PackageName};

pub(super) const ATTR_PACKAGE: &str = "mosaic-package";
pub(super) const ATTR_HASH: &str = "mosaic-hash";
pub(super) const ATTR_VERSION: &str = "mosaic-version";
pub(super) const ATTR_GENERATED: &str = "mosaic-generated";
/// On a generated container: the tail (`/>`, ` />`) of its parent's original
/// self-closing tag, so the parent can collapse again once the container empties
pub(super) const ATTR_COLLAPSED_PARENT: &str = "mosaic-collapsed-parent";

/// Parse `text` into an arena whose node 0 is the document.
pub(super) fn parse(text: &str, file: &str) -> Result<Vec<Node>, MosaicError> {
    let error = |reason: String| MosaicError::XmlParse {
        file: file.to_string(),
        reason,
    };

    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(false);

    let mut nodes = vec![Node::new(NodeKind::Document, None, NodeOrigin::Foreign)];
    let mut open: Vec<NodeId> = vec![NodeId(0)];
    let mut cursor = 0usize;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| error(format!("{e} (near byte {})", reader.buffer_position())))?;
        let end = usize::try_from(reader.buffer_position()).unwrap_or(text.len()).min(text.len());
        let raw = text.get(cursor..end).unwrap_or_default().to_string();
        cursor = end;
        let parent = open.last().copied().unwrap_or(NodeId(0));

        match event {
            Event::Start(start) => {
                let (element, origin) = element_from(&start, raw, None, &error)?;
                let id = push(&mut nodes, NodeKind::Element(element), parent, origin);
                open.push(id);
            }
            Event::Empty(start) => {
                let (element, origin) = element_from(&start, raw.clone(), Some(raw), &error)?;
                push(&mut nodes, NodeKind::Element(element), parent, origin);
            }
            Event::End(end_tag) => {
                let name = String::from_utf8_lossy(end_tag.name().as_ref()).into_owned();
                if open.len() < 2 {
                    return Err(error(format!("closing tag </{name}> has no matching opening tag")));
                }
                let Some(NodeId(index)) = open.pop() else {
                    return Err(error(format!("closing tag </{name}> has no matching opening tag")));
                };
                match &mut nodes[index].kind {
                    NodeKind::Element(element) if element.name == name => element.close_tag = raw,
                    NodeKind::Element(element) => {
                        return Err(error(format!(
                            "closing tag </{name}> does not match <{}>",
                            element.name
                        )));
                    }
                    _ => return Err(error(format!("unexpected closing tag </{name}>"))),
                }
            }
            Event::Text(_) => {
                push(&mut nodes, NodeKind::Text(raw), parent, NodeOrigin::Foreign);
            }
            Event::Eof => break,
            _ => {
                push(&mut nodes, NodeKind::Other(raw), parent, NodeOrigin::Foreign);
            }
        }
    }

    if cursor < text.len() {
        push(&mut nodes, NodeKind::Text(text[cursor..].to_string()), NodeId(0), NodeOrigin::Foreign);
    }

    if let Some(&NodeId(index)) = open.get(1) {
        let name = match &nodes[index].kind {
            NodeKind::Element(element) => element.name.clone(),
            _ => String::new(),
        };
        return Err(error(format!("element <{name}> is never closed")));
    }

    let has_root = nodes[0]
        .children
        .iter()
        .any(|child| matches!(nodes[child.0].kind, NodeKind::Element(_)));
    if !has_root {
        return Err(error("document has no root element".to_string()));
    }

    absorb_leading_whitespace(&mut nodes);
    restore_collapsed_parents(&mut nodes);
    Ok(nodes)
}

fn push(nodes: &mut Vec<Node>, kind: NodeKind, parent: NodeId, origin: NodeOrigin) -> NodeId {
    let id = NodeId(nodes.len());
    nodes.push(Node::new(kind, Some(parent), origin));
    nodes[parent.0].children.push(id);
    id
}

fn element_from(
    start: &BytesStart<'_>,
    raw: String,
    collapsed: Option<String>,
    error: &impl Fn(String) -> MosaicError,
) -> Result<(Element, NodeOrigin), MosaicError> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();

    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| error(format!("bad attribute in <{name}>: {e}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| error(format!("bad attribute value in <{name}>: {e}")))?
            .into_owned();
        attributes.push((key, value));
    }

    let (open_tag, close_tag) = match &collapsed {
        // `<Item class="X" />` expands to `<Item class="X">` ... `</Item>`
        Some(tag) => {
            let body = tag.trim_end_matches('>').trim_end_matches('/').trim_end();
            (format!("{body}>"), format!("</{name}>"))
        }
        None => (raw, String::new()),
    };

    let element = Element {
        name,
        attributes,
        open_tag,
        close_tag,
        collapsed,
    };
    let origin = origin_of(&element);
    Ok((element, origin))
}

/// Owned when the element carries a valid provenance tag, generated when
/// Mosaic created it, foreign otherwise.
fn origin_of(element: &Element) -> NodeOrigin {
    if element.name != "Item" {
        return NodeOrigin::Foreign;
    }
    if element.attribute(ATTR_GENERATED) == Some("true") {
        return NodeOrigin::Generated;
    }
    let package = element.attribute(ATTR_PACKAGE).and_then(|v| PackageName::new(v).ok());
    let hash = element.attribute(ATTR_HASH).and_then(|v| ContentHash::parse(v).ok());
    match (package, hash) {
        (Some(package), Some(content_hash)) => NodeOrigin::Owned(Provenance {
            package,
            content_hash,
        }),
        _ => NodeOrigin::Foreign,
    }
}

/// Move the whitespace before each owned or generated element into the
/// element's `leading`, so removing the element removes its indentation too.
fn absorb_leading_whitespace(nodes: &mut [Node]) {
    for parent in 0..nodes.len() {
        let children = std::mem::take(&mut nodes[parent].children);
        let mut kept: Vec<NodeId> = Vec::with_capacity(children.len());
        for child in children {
            let managed = !matches!(nodes[child.0].origin, NodeOrigin::Foreign);
            if managed {
                if let Some(&previous) = kept.last() {
                    if let NodeKind::Text(text) = &nodes[previous.0].kind {
                        if text.chars().all(char::is_whitespace) {
                            let text = text.clone();
                            nodes[child.0].leading = text;
                            nodes[previous.0].parent = None;
                            kept.pop();
                        }
                    }
                }
            }
            kept.push(child);
        }
        nodes[parent].children = kept;
    }
}

/// Give the parent of each generated container that records a self-closing
/// parent its collapsed form back.
fn restore_collapsed_parents(nodes: &mut [Node]) {
    for index in 0..nodes.len() {
        if nodes[index].origin != NodeOrigin::Generated {
            continue;
        }
        let Some(parent) = nodes[index].parent else {
            continue;
        };
        let Some(tail) = nodes[index]
            .element()
            .and_then(|element| element.attribute(ATTR_COLLAPSED_PARENT))
            .map(ToString::to_string)
        else {
            continue;
        };
        if let NodeKind::Element(element) = &mut nodes[parent.0].kind {
            if element.collapsed.is_none() {
                let body = element.open_tag.strip_suffix('>').unwrap_or(&element.open_tag);
                element.collapsed = Some(format!("{body}{tail}"));
            }
        }
    }
}
