//! YPath: a small path language for navigating a built [`Document`].
//!
//! A path string is compiled once into a sequence of [`Component`]s and
//! then executed against a starting node, producing an ordered, deduplicated
//! list of node indices.

use std::collections::HashSet;

use crate::{Document, Node, NodeData, NodeMarks, WalkConfig, WalkError};

/// A single step of a compiled path.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Component {
    /// Reset the work set to the document root.
    StartRoot,
    /// Reset the work set to the node bound to the named anchor.
    StartAlias(String),
    /// Keep the current node(s).
    This,
    /// Move to the parent of each current node (a root's parent is itself).
    Parent,
    /// All immediate children of each current node.
    EveryChild,
    /// Each current node plus every transitive descendant.
    EveryChildRecursive,
    /// Every transitive non-collection descendant of each current node.
    EveryLeaf,
    /// Require every remaining current node to be a collection, or empty
    /// the result set.
    AssertCollection,
    /// For each current mapping, the value bound to the plain scalar key.
    SimpleMapKey(String),
    /// For each current sequence, the element at `n` (negative counts from
    /// the end).
    SimpleSeqIndex(i64),
    /// Key lookup relative to the mapping containing the current node.
    SimpleSiblingMapKey(String),
}

impl Component {
    fn is_multi(&self) -> bool {
        matches!(
            self,
            Component::EveryChild | Component::EveryChildRecursive | Component::EveryLeaf
        )
    }

    fn is_simple_result(&self) -> bool {
        matches!(
            self,
            Component::This
                | Component::Parent
                | Component::SimpleMapKey(_)
                | Component::SimpleSeqIndex(_)
                | Component::SimpleSiblingMapKey(_)
        )
    }
}

/// Compile a path string into an ordered component sequence.
///
/// The first component is always [`Component::StartRoot`] or
/// [`Component::StartAlias`]. A bare `//` (an empty segment between two
/// slashes) is rejected rather than normalized to `/`.
pub fn compile(path: &str, config: &WalkConfig) -> Result<Vec<Component>, WalkError> {
    if path.is_empty() {
        return Err(WalkError::InvalidSyntax { problem: "empty path" });
    }

    let mut components = Vec::new();
    let rest: &str;

    if let Some(alias_rest) = path.strip_prefix('*') {
        let end = alias_rest.find('/').unwrap_or(alias_rest.len());
        let (name, remainder) = alias_rest.split_at(end);
        if name.is_empty() {
            return Err(WalkError::InvalidSyntax {
                problem: "empty alias name after '*'",
            });
        }
        components.push(Component::StartAlias(name.to_string()));
        rest = remainder;
    } else if let Some(root_rest) = path.strip_prefix('/') {
        components.push(Component::StartRoot);
        rest = if let Some(caret_rest) = root_rest.strip_prefix('^') {
            caret_rest
        } else {
            root_rest
        };
    } else {
        return Err(WalkError::InvalidSyntax {
            problem: "path must start with '/' or '*'",
        });
    }

    let mut multi_seen = false;
    let mut segments = rest.split('/').peekable();
    let mut first = true;

    while let Some(segment) = segments.next() {
        let is_last = segments.peek().is_none();
        if segment.is_empty() {
            if is_last && !first {
                components.push(Component::AssertCollection);
                break;
            }
            return Err(WalkError::InvalidSyntax {
                problem: "empty path component",
            });
        }
        first = false;

        let component = parse_segment(segment)?;
        if multi_seen && component.is_simple_result() && !config.allow_simple_after_multi {
            return Err(WalkError::SimpleAfterMulti);
        }
        if component.is_multi() {
            multi_seen = true;
        }
        components.push(component);
    }

    log::debug!("compiled path {path:?} into {} component(s)", components.len());
    Ok(components)
}

fn parse_segment(segment: &str) -> Result<Component, WalkError> {
    match segment {
        "." => Ok(Component::This),
        ".." => Ok(Component::Parent),
        "*" => Ok(Component::EveryChild),
        "**" => Ok(Component::EveryChildRecursive),
        "**$" => Ok(Component::EveryLeaf),
        "^" => Err(WalkError::InvalidSyntax {
            problem: "'^' is only legal as the first path component",
        }),
        _ => {
            if let Some(name) = segment.strip_prefix('~') {
                if name.is_empty() {
                    return Err(WalkError::InvalidSyntax {
                        problem: "empty sibling key name after '~'",
                    });
                }
                return Ok(Component::SimpleSiblingMapKey(name.to_string()));
            }
            if let Some(inner) = segment.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                let n: i64 = inner.parse().map_err(|_| WalkError::InvalidSyntax {
                    problem: "expected an integer index inside '[...]'",
                })?;
                return Ok(Component::SimpleSeqIndex(n));
            }
            Ok(Component::SimpleMapKey(segment.to_string()))
        }
    }
}

fn is_collection(node: &Node) -> bool {
    matches!(node.data, NodeData::Sequence { .. } | NodeData::Mapping { .. })
}

fn walk_children(node: &Node) -> Vec<i32> {
    match &node.data {
        NodeData::Sequence { items, .. } => items.clone(),
        NodeData::Mapping { pairs, .. } => pairs.iter().map(|p| p.value).collect(),
        NodeData::Scalar { .. } | NodeData::NoNode => Vec::new(),
    }
}

fn dedup(indices: Vec<i32>) -> Vec<i32> {
    let mut seen = HashSet::with_capacity(indices.len());
    indices.into_iter().filter(|i| seen.insert(*i)).collect()
}

/// Execute a compiled path against a starting node, returning the matched
/// node indices.
///
/// After every component, the work set is deduplicated and reordered by
/// each node's start position, so the final result is always in document
/// order regardless of which component (or combination, such as a map-key
/// lookup following `/**`) produced it.
pub fn execute(
    document: &mut Document,
    start: i32,
    components: &[Component],
    config: &WalkConfig,
) -> Result<Vec<i32>, WalkError> {
    let mut current: Vec<i32> = vec![start];

    for component in components {
        log::trace!("applying {component:?} to {} current node(s)", current.len());
        current = match component {
            Component::StartRoot => document.root_index().into_iter().collect(),
            Component::StartAlias(name) => document
                .find_anchor(name)
                .map(|a| a.index)
                .into_iter()
                .collect(),
            Component::This => current,
            Component::Parent => {
                let root = document.root_index().unwrap_or(0);
                let mut out = Vec::with_capacity(current.len());
                for i in current {
                    if let Some(node) = document.get_node(i) {
                        out.push(if node.parent == 0 { root } else { node.parent });
                    }
                }
                out
            }
            Component::EveryChild => {
                let mut out = Vec::new();
                for i in current {
                    if let Some(node) = document.get_node(i) {
                        out.extend(walk_children(node));
                    }
                }
                out
            }
            Component::EveryChildRecursive => {
                expand_recursive(document, &current, config, false)?
            }
            Component::EveryLeaf => expand_recursive(document, &current, config, true)?,
            Component::AssertCollection => {
                let all_collections = current
                    .iter()
                    .all(|&i| document.get_node(i).is_some_and(is_collection));
                if all_collections {
                    current
                } else {
                    Vec::new()
                }
            }
            Component::SimpleMapKey(name) => {
                let mut out = Vec::new();
                for i in current {
                    let found = match document.get_node(i).map(|n| &n.data) {
                        Some(NodeData::Mapping { pairs, .. }) => pairs.iter().find_map(|p| {
                            match document.get_node(p.key).map(|n| &n.data) {
                                Some(NodeData::Scalar { value, .. }) if value == name => {
                                    Some(p.value)
                                }
                                _ => None,
                            }
                        }),
                        _ => None,
                    };
                    match found {
                        Some(value) => out.push(value),
                        None if config.strict => {
                            return Err(WalkError::Execution {
                                problem: "map key not found",
                            })
                        }
                        None => {}
                    }
                }
                out
            }
            Component::SimpleSeqIndex(n) => {
                let mut out = Vec::new();
                for i in current {
                    let found = match document.get_node(i).map(|node| &node.data) {
                        Some(NodeData::Sequence { items, .. }) => resolve_index(items, *n),
                        _ => None,
                    };
                    match found {
                        Some(value) => out.push(value),
                        None if config.strict => {
                            return Err(WalkError::Execution {
                                problem: "sequence index out of range",
                            })
                        }
                        None => {}
                    }
                }
                out
            }
            Component::SimpleSiblingMapKey(name) => {
                let mut out = Vec::new();
                for i in current {
                    let parent = document.get_node(i).map(|n| n.parent).filter(|&p| p != 0);
                    let found = parent.and_then(|p| match document.get_node(p).map(|n| &n.data) {
                        Some(NodeData::Mapping { pairs, .. }) => pairs.iter().find_map(|pair| {
                            match document.get_node(pair.key).map(|n| &n.data) {
                                Some(NodeData::Scalar { value, .. }) if value == name => {
                                    Some(pair.value)
                                }
                                _ => None,
                            }
                        }),
                        _ => None,
                    });
                    match found {
                        Some(value) => out.push(value),
                        None if config.strict => {
                            return Err(WalkError::Execution {
                                problem: "sibling map key not found",
                            })
                        }
                        None => {}
                    }
                }
                out
            }
        };
        current = dedup(current);
        current.sort_by_key(|&i| {
            document
                .get_node(i)
                .map(|n| n.start_mark.index)
                .unwrap_or(0)
        });
    }

    Ok(current)
}

fn resolve_index(items: &[i32], n: i64) -> Option<i32> {
    let len = items.len() as i64;
    let resolved = if n < 0 { len + n } else { n };
    if resolved < 0 || resolved >= len {
        None
    } else {
        items.get(resolved as usize).copied()
    }
}

/// Expand each current node into itself plus every transitive descendant,
/// reachable through child (and, for nodes shared via aliases, shared)
/// edges. `leaves_only` filters the result to non-collection nodes.
///
/// Uses [`NodeMarks::VISIT_MARKER`] to avoid revisiting a node already expanded
/// in this call, then clears the marks it set before returning.
fn expand_recursive(
    document: &mut Document,
    roots: &[i32],
    config: &WalkConfig,
    leaves_only: bool,
) -> Result<Vec<i32>, WalkError> {
    let mut out = Vec::new();
    let mut touched = Vec::new();
    let mut stack: Vec<(i32, u32)> = roots.iter().map(|&i| (i, 0)).collect();

    let result = (|| {
        while let Some((index, depth)) = stack.pop() {
            if depth > config.max_depth {
                return Err(WalkError::DepthExceeded {
                    max_depth: config.max_depth,
                });
            }
            let Some(node) = document.get_node_mut(index) else {
                continue;
            };
            if node.marks.contains(NodeMarks::VISIT_MARKER) {
                continue;
            }
            node.marks.insert(NodeMarks::VISIT_MARKER);
            touched.push(index);

            let is_coll = is_collection(node);
            if !leaves_only || !is_coll {
                out.push(index);
            }
            if is_coll {
                for child in walk_children(node) {
                    stack.push((child, depth + 1));
                }
            }
        }
        Ok(())
    })();

    for index in touched {
        if let Some(node) = document.get_node_mut(index) {
            node.marks.remove(NodeMarks::VISIT_MARKER);
        }
    }

    result?;
    Ok(out)
}

/// Check whether `start` (or any node transitively reachable from it
/// through mapping keys, mapping values, or sequence elements) is part of
/// a reference loop.
///
/// Uses a standard white/gray/black depth-first traversal via
/// [`NodeMarks::REF_MARKER`] (gray) and [`NodeMarks::VISIT_MARKER`] (black); a
/// back-edge into a gray node is a cycle. All marks this call sets are
/// cleared before returning, whether or not a loop was found.
pub fn check_ref_loop(
    document: &mut Document,
    start: i32,
    config: &WalkConfig,
) -> Result<bool, WalkError> {
    let mut touched = Vec::new();
    let result = check_ref_loop_inner(document, start, 0, config, &mut touched);
    for index in &touched {
        if let Some(node) = document.get_node_mut(*index) {
            node.marks.remove(NodeMarks::REF_MARKER);
            node.marks.remove(NodeMarks::VISIT_MARKER);
        }
    }
    result
}

fn check_ref_loop_inner(
    document: &mut Document,
    index: i32,
    depth: u32,
    config: &WalkConfig,
    touched: &mut Vec<i32>,
) -> Result<bool, WalkError> {
    if depth > config.max_depth {
        return Err(WalkError::DepthExceeded {
            max_depth: config.max_depth,
        });
    }
    let Some(node) = document.get_node_mut(index) else {
        return Ok(false);
    };
    if node.marks.contains(NodeMarks::REF_MARKER) {
        return Ok(true);
    }
    if node.marks.contains(NodeMarks::VISIT_MARKER) {
        return Ok(false);
    }
    node.marks.insert(NodeMarks::REF_MARKER);
    touched.push(index);

    let children = match &node.data {
        NodeData::Sequence { items, .. } => items.clone(),
        NodeData::Mapping { pairs, .. } => {
            pairs.iter().flat_map(|p| [p.key, p.value]).collect()
        }
        NodeData::Scalar { .. } | NodeData::NoNode => Vec::new(),
    };

    for child in children {
        if check_ref_loop_inner(document, child, depth + 1, config, touched)? {
            return Ok(true);
        }
    }

    if let Some(node) = document.get_node_mut(index) {
        node.marks.remove(NodeMarks::REF_MARKER);
        node.marks.insert(NodeMarks::VISIT_MARKER);
    }
    Ok(false)
}

impl Document {
    /// Compile and execute a path against `start` using the default
    /// [`WalkConfig`].
    pub fn walk(&mut self, start: i32, path: &str) -> Result<Vec<i32>, WalkError> {
        self.walk_with_config(start, path, &WalkConfig::default())
    }

    /// Compile and execute a path against `start`.
    pub fn walk_with_config(
        &mut self,
        start: i32,
        path: &str,
        config: &WalkConfig,
    ) -> Result<Vec<i32>, WalkError> {
        let components = compile(path, config)?;
        execute(self, start, &components, config)
    }

    /// Check whether `start` participates in a reference loop, using the
    /// default [`WalkConfig`].
    pub fn check_ref_loop(&mut self, start: i32) -> Result<bool, WalkError> {
        check_ref_loop(self, start, &WalkConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MappingStyle, ScalarStyle, SequenceStyle};

    fn sample_document() -> (Document, i32) {
        let mut doc = Document::new(None, &[], true, true);
        let a = doc.add_scalar(None, "a", ScalarStyle::Plain);
        let b = doc.add_scalar(None, "b", ScalarStyle::Plain);
        let seq = doc.add_sequence(None, SequenceStyle::Block);
        doc.append_sequence_item(seq, a);
        doc.append_sequence_item(seq, b);

        let key = doc.add_scalar(None, "items", ScalarStyle::Plain);
        let mapping = doc.add_mapping(None, MappingStyle::Block);
        doc.yaml_document_append_mapping_pair(mapping, key, seq);
        (doc, mapping)
    }

    #[test]
    fn compiles_and_executes_map_key_then_index() {
        let (mut doc, root) = sample_document();
        let result = doc.walk(root, "/items/[1]").unwrap();
        assert_eq!(result.len(), 1);
        let NodeData::Scalar { value, .. } = &doc.get_node(result[0]).unwrap().data else {
            panic!("expected scalar");
        };
        assert_eq!(value, "b");
    }

    #[test]
    fn negative_index_counts_from_the_end() {
        let (mut doc, root) = sample_document();
        let result = doc.walk(root, "/items/[-1]").unwrap();
        let NodeData::Scalar { value, .. } = &doc.get_node(result[0]).unwrap().data else {
            panic!("expected scalar");
        };
        assert_eq!(value, "b");
    }

    #[test]
    fn every_child_then_simple_is_allowed_by_default() {
        let config = WalkConfig::default();
        let components = compile("/items/*/[0]", &config).unwrap();
        assert!(components.len() >= 3);
    }

    #[test]
    fn every_child_then_simple_can_be_rejected() {
        let config = WalkConfig {
            allow_simple_after_multi: false,
            ..WalkConfig::default()
        };
        let err = compile("/items/*/[0]", &config).unwrap_err();
        assert!(matches!(err, WalkError::SimpleAfterMulti));
    }

    #[test]
    fn recursive_descent_then_map_key_matches_every_branch() {
        let mut parser = crate::Parser::new();
        let mut input: &[u8] = b"a:\n  b:\n    c: 1\n  c: 2\nc: 3\n";
        parser.set_input(&mut input);
        let mut doc = Document::load(&mut parser).unwrap();
        let root = doc.root_index().unwrap();

        let result = doc.walk(root, "/a/**/c").unwrap();
        assert_eq!(result.len(), 2);
        let values: Vec<_> = result
            .iter()
            .map(|&i| match &doc.get_node(i).unwrap().data {
                NodeData::Scalar { value, .. } => value.clone(),
                _ => panic!("expected scalar"),
            })
            .collect();
        assert_eq!(values, vec!["1", "2"]);
    }

    #[test]
    fn double_slash_is_a_compile_error() {
        let config = WalkConfig::default();
        let err = compile("/items//foo", &config).unwrap_err();
        assert!(matches!(err, WalkError::InvalidSyntax { .. }));
    }

    #[test]
    fn trailing_slash_asserts_collection() {
        let (mut doc, root) = sample_document();
        let result = doc.walk(root, "/items/").unwrap();
        assert_eq!(result.len(), 1);

        let empty = doc.walk(root, "/items/[0]/").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn self_referential_alias_is_a_reference_loop() {
        let mut parser = crate::Parser::new();
        let mut input: &[u8] = b"&a [1, *a]";
        parser.set_input(&mut input);
        let mut doc = Document::load(&mut parser).unwrap();
        let root = doc.root_index().unwrap();
        assert!(doc.check_ref_loop(root).unwrap());
    }

    #[test]
    fn acyclic_document_has_no_reference_loop() {
        let (mut doc, root) = sample_document();
        assert!(!doc.check_ref_loop(root).unwrap());
    }
}
