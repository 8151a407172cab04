//! # Document Boundary
//!
//! The binder never touches markup directly. It goes through [`Document`],
//! which the embedding page implements over its real DOM.
//!
//! [`VirtualDocument`] is an in-memory implementation used by the CLI and the
//! tests. Selector support is deliberately small: `tag`, `#id`, `.class`,
//! `[attr]`, `[attr=value]`, compounds of those (`a.btn[data-auth=login]`) and
//! comma-separated lists. No combinators.
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError},
};

use crate::error::BinderError;

pub type NodeId = usize;

pub struct ElementSpec<'a> {
    pub tag: &'a str,
    pub classes: &'a [&'a str],
    pub attributes: &'a [(&'a str, &'a str)],
    pub parent: Option<NodeId>,
    pub hidden: bool,
}

pub trait Document: Send {
    fn query_all(&self, selector: &str) -> Vec<NodeId>;

    fn set_hidden(&mut self, node: NodeId, hidden: bool) -> Result<(), BinderError>;

    fn set_text(&mut self, node: NodeId, text: &str) -> Result<(), BinderError>;

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<(), BinderError>;

    fn create_element(&mut self, spec: &ElementSpec<'_>) -> Result<NodeId, BinderError>;
}

/// Lets page code keep a handle on a document the binder also renders into.
impl<D: Document> Document for Arc<Mutex<D>> {
    fn query_all(&self, selector: &str) -> Vec<NodeId> {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .query_all(selector)
    }

    fn set_hidden(&mut self, node: NodeId, hidden: bool) -> Result<(), BinderError> {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_hidden(node, hidden)
    }

    fn set_text(&mut self, node: NodeId, text: &str) -> Result<(), BinderError> {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_text(node, text)
    }

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<(), BinderError> {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_attribute(node, name, value)
    }

    fn create_element(&mut self, spec: &ElementSpec<'_>) -> Result<NodeId, BinderError> {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .create_element(spec)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    pub text: String,
    pub hidden: bool,
    pub parent: Option<NodeId>,
}

impl Element {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_class(mut self, class: &str) -> Self {
        self.classes.push(class.to_string());
        self
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VirtualDocument {
    nodes: Vec<Element>,
    frozen: bool,
}

impl VirtualDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, element: Element) -> NodeId {
        self.nodes.push(element);
        self.nodes.len() - 1
    }

    pub fn get(&self, node: NodeId) -> Option<&Element> {
        self.nodes.get(node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Refuse element creation from now on, like a page with a locked-down DOM.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    fn node_mut(&mut self, node: NodeId) -> Result<&mut Element, BinderError> {
        self.nodes.get_mut(node).ok_or(BinderError::UnknownNode(node))
    }
}

impl Document for VirtualDocument {
    fn query_all(&self, selector: &str) -> Vec<NodeId> {
        let groups: Vec<Compound> = selector.split(',').filter_map(Compound::parse).collect();

        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, element)| groups.iter().any(|group| group.matches(element)))
            .map(|(node, _)| node)
            .collect()
    }

    fn set_hidden(&mut self, node: NodeId, hidden: bool) -> Result<(), BinderError> {
        self.node_mut(node)?.hidden = hidden;
        Ok(())
    }

    fn set_text(&mut self, node: NodeId, text: &str) -> Result<(), BinderError> {
        self.node_mut(node)?.text = text.to_string();
        Ok(())
    }

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<(), BinderError> {
        self.node_mut(node)?
            .attributes
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn create_element(&mut self, spec: &ElementSpec<'_>) -> Result<NodeId, BinderError> {
        if self.frozen {
            return Err(BinderError::CreationRefused(spec.tag.to_string()));
        }
        if let Some(parent) = spec.parent {
            self.node_mut(parent)?;
        }

        let mut element = Element::new(spec.tag);
        element.classes = spec.classes.iter().map(|c| c.to_string()).collect();
        element.attributes = spec
            .attributes
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        element.parent = spec.parent;
        element.hidden = spec.hidden;

        Ok(self.insert(element))
    }
}

#[derive(Debug, Default)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attributes: Vec<(String, Option<String>)>,
}

const MARKERS: [char; 3] = ['#', '.', '['];

impl Compound {
    /// `None` for empty or unsupported selectors, which then match nothing.
    fn parse(selector: &str) -> Option<Self> {
        let selector = selector.trim();
        if selector.is_empty() || selector.contains(char::is_whitespace) {
            return None;
        }

        let mut compound = Compound::default();

        let end = selector.find(MARKERS).unwrap_or(selector.len());
        let tag = &selector[..end];
        if !tag.is_empty() && tag != "*" {
            compound.tag = Some(tag.to_ascii_lowercase());
        }

        let mut rest = &selector[end..];
        while let Some(marker) = rest.chars().next() {
            match marker {
                '#' | '.' => {
                    let body = &rest[1..];
                    let end = body.find(MARKERS).unwrap_or(body.len());
                    let name = &body[..end];
                    if name.is_empty() {
                        return None;
                    }

                    if marker == '#' {
                        compound.id = Some(name.to_string());
                    } else {
                        compound.classes.push(name.to_string());
                    }
                    rest = &body[end..];
                }
                '[' => {
                    let close = rest.find(']')?;
                    let inner = &rest[1..close];
                    let (name, value) = match inner.split_once('=') {
                        Some((name, value)) => (
                            name.trim(),
                            Some(value.trim().trim_matches(['"', '\'']).to_string()),
                        ),
                        None => (inner.trim(), None),
                    };
                    if name.is_empty() {
                        return None;
                    }

                    compound.attributes.push((name.to_string(), value));
                    rest = &rest[close + 1..];
                }
                _ => return None,
            }
        }

        Some(compound)
    }

    fn matches(&self, element: &Element) -> bool {
        if self.tag.as_ref().is_some_and(|tag| *tag != element.tag) {
            return false;
        }
        if self.id.is_some() && self.id != element.id {
            return false;
        }
        if !self
            .classes
            .iter()
            .all(|class| element.classes.contains(class))
        {
            return false;
        }

        self.attributes
            .iter()
            .all(|(name, value)| match (element.attribute(name), value) {
                (Some(actual), Some(expected)) => actual == expected,
                (Some(_), None) => true,
                (None, _) => false,
            })
    }
}
