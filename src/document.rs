use std::collections::HashMap;

use crate::{
    ComposerError, Event, EventData, MappingStyle, Mark, Parser, ScalarStyle, SequenceStyle,
    TagDirective, VersionDirective, DEFAULT_MAPPING_TAG, DEFAULT_SCALAR_TAG, DEFAULT_SEQUENCE_TAG,
};

/// A mapping is given an accelerator once its pair count crosses this
/// threshold and the document allows acceleration.
const MAPPING_ACCELERATOR_THRESHOLD: usize = 16;

/// The document structure.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Document {
    /// The document nodes.
    pub nodes: Vec<Node>,
    /// Anchor bindings in definition order.
    ///
    /// Rebinding the same name within one document does not replace the
    /// earlier entry; it appends a new one and flags both as `multiple`,
    /// so that a later alias always resolves to the most recent binding
    /// while earlier ones remain available for round-trip fidelity.
    pub anchors: Vec<Anchor>,
    /// The version directive.
    pub version_directive: Option<VersionDirective>,
    /// The list of tag directives.
    pub tag_directives: Vec<TagDirective>,
    /// Is the document start indicator implicit?
    pub start_implicit: bool,
    /// Is the document end indicator implicit?
    pub end_implicit: bool,
    /// The beginning of the document.
    pub start_mark: Mark,
    /// The end of the document.
    pub end_mark: Mark,
    /// Set when the document failed to build completely; a partially
    /// populated tree may still be inspected for diagnostics.
    pub parse_error: bool,
    /// Whether a large mapping is allowed to build an accelerator, mirroring
    /// [`crate::ParserConfig::accelerator_enable`] at the time of the build.
    accelerator_enable: bool,
    /// Whether a second pair with an equal key is accepted, mirroring
    /// [`crate::ParserConfig::allow_duplicate_keys`] at the time of the build.
    allow_duplicate_keys: bool,
    /// Whether an alias may reference an anchor not yet registered,
    /// mirroring [`crate::ParserConfig::allow_forward_aliases`] at the time
    /// of the build. Resolved against [`Document::anchors`] once the whole
    /// document has been read.
    allow_forward_aliases: bool,
    /// Aliases seen before their anchor was registered, awaiting resolution
    /// once the document has been fully read. Always empty once
    /// [`Document::load`] returns.
    pending_forward_aliases: Vec<PendingAlias>,
}

/// Where to write a forward alias's target node index once it resolves.
///
/// Only sequence items and mapping values are deferrable: a mapping key
/// reuses the same pending-pair slot that a key waiting on its value does
/// (see `load_node_add`), and a placeholder key there would be
/// indistinguishable from "key read, value not parsed yet" for whichever
/// real event comes next. An alias used as a mapping key still requires its
/// anchor to already be registered.
#[derive(Clone, Debug)]
enum AliasFixupTarget {
    SequenceItem { sequence: i32, position: usize },
    MappingValue { mapping: i32, position: usize },
}

#[derive(Clone, Debug)]
struct PendingAlias {
    anchor: String,
    target: AliasFixupTarget,
    mark: Mark,
}

/// A binding of an anchor name to a node index.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Anchor {
    /// The anchor name, as written (without the leading `&`/`*`).
    pub name: String,
    /// The bound node's 1-based index into [`Document::nodes`].
    pub index: i32,
    /// Where the anchor was declared.
    pub mark: Mark,
    /// Set on every binding that shares a name with another binding in
    /// the same document.
    pub multiple: bool,
}

bitflags::bitflags! {
    /// Per-node traversal marks.
    ///
    /// The top two bits are reserved for the system (reference-loop
    /// detection and walker cycle avoidance) and must be clear outside an
    /// active traversal. The low six bits are available to callers via
    /// [`Node::mark`]/[`Node::is_marked`]/[`Node::clear_mark`], bounded by
    /// [`crate::WalkConfig::user_marker_bits`].
    #[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
    pub struct NodeMarks: u8 {
        /// Node has been fully visited at least once (black).
        const VISIT_MARKER = 0b1000_0000;
        /// Node is on the current traversal path (gray).
        const REF_MARKER = 0b0100_0000;
    }
}

/// Number of bits reserved by the system at the top of [`NodeMarks`].
const SYSTEM_MARKER_BITS: u8 = 2;

/// The node structure.
#[derive(Clone, Default, Debug)]
#[non_exhaustive]
pub struct Node {
    /// The node type.
    pub data: NodeData,
    /// The node tag.
    pub tag: Option<String>,
    /// The 1-based index of the containing collection node, or 0 for the
    /// document root.
    pub parent: i32,
    /// Set once a node has been mutated after the initial parse; disables
    /// source-range-based round-trip shortcuts.
    pub synthetic: bool,
    /// Reserved traversal marks, used by reference-loop detection and the
    /// walker; must be clear outside an active traversal.
    pub marks: NodeMarks,
    /// The beginning of the node.
    pub start_mark: Mark,
    /// The end of the node.
    pub end_mark: Mark,
}

/// Node types.
#[derive(Clone, Default, Debug)]
pub enum NodeData {
    /// An empty node.
    #[default]
    NoNode,
    /// A scalar node.
    Scalar {
        /// The scalar value.
        value: String,
        /// The scalar style.
        style: ScalarStyle,
    },
    /// A sequence node.
    Sequence {
        /// The stack of sequence items.
        items: Vec<NodeItem>,
        /// The sequence style.
        style: SequenceStyle,
    },
    /// A mapping node.
    Mapping {
        /// The stack of mapping pairs (key, value).
        pairs: Vec<NodePair>,
        /// The mapping style.
        style: MappingStyle,
        /// Lazily built key-fingerprint index, present once the pair
        /// count crosses [`MAPPING_ACCELERATOR_THRESHOLD`].
        accelerator: Option<HashMap<String, usize>>,
    },
}

/// An element of a sequence node.
pub type NodeItem = i32;

/// An element of a mapping node.
#[derive(Copy, Clone, Default, Debug)]
#[non_exhaustive]
pub struct NodePair {
    /// The key of the element.
    pub key: i32,
    /// The value of the element.
    pub value: i32,
}

impl Node {
    /// Set a caller-usable marker bit (`0..user_marker_bits`).
    ///
    /// Rejects bits at or above `user_marker_bits`, and bits in the
    /// system-reserved range, with [`crate::WalkError::MarkerOutOfRange`].
    pub fn mark(&mut self, bit: u8, user_marker_bits: u8) -> Result<(), crate::WalkError> {
        if bit >= user_marker_bits || bit >= u8::BITS as u8 - SYSTEM_MARKER_BITS {
            return Err(crate::WalkError::MarkerOutOfRange { bit });
        }
        self.marks = NodeMarks::from_bits_retain(self.marks.bits() | (1 << bit));
        Ok(())
    }

    /// Query a caller-usable marker bit.
    #[must_use]
    pub fn is_marked(&self, bit: u8) -> bool {
        self.marks.bits() & (1 << bit) != 0
    }

    /// Clear a caller-usable marker bit.
    pub fn clear_mark(&mut self, bit: u8, user_marker_bits: u8) -> Result<(), crate::WalkError> {
        if bit >= user_marker_bits || bit >= u8::BITS as u8 - SYSTEM_MARKER_BITS {
            return Err(crate::WalkError::MarkerOutOfRange { bit });
        }
        self.marks = NodeMarks::from_bits_retain(self.marks.bits() & !(1 << bit));
        Ok(())
    }
}

impl Document {
    /// Create a YAML document.
    pub fn new(
        version_directive: Option<VersionDirective>,
        tag_directives_in: &[TagDirective],
        start_implicit: bool,
        end_implicit: bool,
    ) -> Document {
        let nodes = Vec::with_capacity(16);
        let tag_directives = tag_directives_in.to_vec();

        Document {
            nodes,
            anchors: Vec::new(),
            version_directive,
            tag_directives,
            start_implicit,
            end_implicit,
            start_mark: Mark::default(),
            end_mark: Mark::default(),
            parse_error: false,
            accelerator_enable: true,
            allow_duplicate_keys: true,
            allow_forward_aliases: false,
            pending_forward_aliases: Vec::new(),
        }
    }

    /// Get a node of a YAML document.
    ///
    /// Returns the node object or `None` if `index` is out of range.
    pub fn get_node_mut(&mut self, index: i32) -> Option<&mut Node> {
        self.nodes.get_mut(index as usize - 1)
    }

    /// Get a node of a YAML document.
    ///
    /// Returns the node object or `None` if `index` is out of range.
    pub fn get_node(&self, index: i32) -> Option<&Node> {
        self.nodes.get(index as usize - 1)
    }

    /// Get the root of a YAML document node.
    ///
    /// The root object is the first object added to the document.
    ///
    /// An empty document produced by the parser signifies the end of a YAML stream.
    ///
    /// Returns the node object or `None` if the document is empty.
    pub fn get_root_node(&mut self) -> Option<&mut Node> {
        self.nodes.get_mut(0)
    }

    /// The root node, if the document is non-empty.
    pub fn root(&self) -> Option<&Node> {
        self.nodes.first()
    }

    /// The root node, if the document is non-empty.
    pub fn root_mut(&mut self) -> Option<&mut Node> {
        self.nodes.first_mut()
    }

    /// The 1-based index of the root node, if the document is non-empty.
    #[must_use]
    pub fn root_index(&self) -> Option<i32> {
        if self.nodes.is_empty() {
            None
        } else {
            Some(1)
        }
    }

    /// Look up the most recent binding of an anchor name.
    #[must_use]
    pub fn find_anchor(&self, name: &str) -> Option<&Anchor> {
        self.anchors.iter().rev().find(|a| a.name == name)
    }

    /// Create a SCALAR node and attach it to the document.
    ///
    /// The `style` argument may be ignored by the emitter.
    ///
    /// Returns the node id or 0 on error.
    #[must_use]
    pub fn add_scalar(&mut self, tag: Option<&str>, value: &str, style: ScalarStyle) -> i32 {
        let mark = Mark {
            index: 0_u64,
            line: 0_u64,
            column: 0_u64,
        };
        let tag = tag.unwrap_or(DEFAULT_SCALAR_TAG);
        let tag_copy = String::from(tag);
        let value_copy = String::from(value);
        let node = Node {
            data: NodeData::Scalar {
                value: value_copy,
                style,
            },
            tag: Some(tag_copy),
            parent: 0,
            synthetic: true,
            marks: NodeMarks::empty(),
            start_mark: mark,
            end_mark: mark,
        };
        self.nodes.push(node);
        self.nodes.len() as i32
    }

    /// Create a SEQUENCE node and attach it to the document.
    ///
    /// The `style` argument may be ignored by the emitter.
    ///
    /// Returns the node id, which is a nonzero integer.
    #[must_use]
    pub fn add_sequence(&mut self, tag: Option<&str>, style: SequenceStyle) -> i32 {
        let mark = Mark {
            index: 0_u64,
            line: 0_u64,
            column: 0_u64,
        };

        let items = Vec::with_capacity(16);
        let tag = tag.unwrap_or(DEFAULT_SEQUENCE_TAG);
        let tag_copy = String::from(tag);
        let node = Node {
            data: NodeData::Sequence { items, style },
            tag: Some(tag_copy),
            parent: 0,
            synthetic: true,
            marks: NodeMarks::empty(),
            start_mark: mark,
            end_mark: mark,
        };
        self.nodes.push(node);
        self.nodes.len() as i32
    }

    /// Create a MAPPING node and attach it to the document.
    ///
    /// The `style` argument may be ignored by the emitter.
    ///
    /// Returns the node id, which is a nonzero integer.
    #[must_use]
    pub fn add_mapping(&mut self, tag: Option<&str>, style: MappingStyle) -> i32 {
        let mark = Mark {
            index: 0_u64,
            line: 0_u64,
            column: 0_u64,
        };
        let pairs = Vec::with_capacity(16);
        let tag = tag.unwrap_or(DEFAULT_MAPPING_TAG);
        let tag_copy = String::from(tag);

        let node = Node {
            data: NodeData::Mapping {
                pairs,
                style,
                accelerator: None,
            },
            tag: Some(tag_copy),
            parent: 0,
            synthetic: true,
            marks: NodeMarks::empty(),
            start_mark: mark,
            end_mark: mark,
        };

        self.nodes.push(node);
        self.nodes.len() as i32
    }

    /// Add an item to a SEQUENCE node.
    pub fn append_sequence_item(&mut self, sequence: i32, item: i32) {
        assert!(sequence > 0 && sequence as usize - 1 < self.nodes.len());
        assert!(matches!(
            &self.nodes[sequence as usize - 1].data,
            NodeData::Sequence { .. }
        ));
        assert!(item > 0 && item as usize - 1 < self.nodes.len());
        if let NodeData::Sequence { ref mut items, .. } =
            &mut self.nodes[sequence as usize - 1].data
        {
            items.push(item);
        }
        self.nodes[item as usize - 1].parent = sequence;
        self.nodes[sequence as usize - 1].synthetic = true;
    }

    /// Add a pair of a key and a value to a MAPPING node.
    pub fn yaml_document_append_mapping_pair(&mut self, mapping: i32, key: i32, value: i32) {
        assert!(mapping > 0 && mapping as usize - 1 < self.nodes.len());
        assert!(matches!(
            &self.nodes[mapping as usize - 1].data,
            NodeData::Mapping { .. }
        ));
        assert!(key > 0 && key as usize - 1 < self.nodes.len());
        assert!(value > 0 && value as usize - 1 < self.nodes.len());
        let pair = NodePair { key, value };
        self.insert_mapping_pair(mapping, pair);
        self.nodes[key as usize - 1].parent = mapping;
        self.nodes[value as usize - 1].parent = mapping;
    }

    /// Push a pair onto a mapping, keeping the accelerator (if any)
    /// consistent, and building one once the pair count crosses the
    /// acceleration threshold.
    fn insert_mapping_pair(&mut self, mapping: i32, pair: NodePair) {
        let key_fingerprint = self.key_fingerprint(pair.key);
        let needs_rebuild;
        let position;
        {
            let NodeData::Mapping {
                ref mut pairs,
                ref mut accelerator,
                ..
            } = &mut self.nodes[mapping as usize - 1].data
            else {
                return;
            };
            position = pairs.len();
            pairs.push(pair);
            needs_rebuild = self.accelerator_enable
                && accelerator.is_none()
                && pairs.len() > MAPPING_ACCELERATOR_THRESHOLD;
            if let Some(accel) = accelerator {
                accel.insert(key_fingerprint, position);
            }
        }
        if needs_rebuild {
            let NodeData::Mapping { ref pairs, .. } = &self.nodes[mapping as usize - 1].data
            else {
                return;
            };
            let fingerprints: Vec<(String, usize)> = pairs
                .iter()
                .enumerate()
                .map(|(i, p)| (Self::fingerprint_of(&self.nodes, p.key), i))
                .collect();
            let mut accel = HashMap::with_capacity(fingerprints.len());
            accel.extend(fingerprints);
            if let NodeData::Mapping {
                ref mut accelerator,
                ..
            } = &mut self.nodes[mapping as usize - 1].data
            {
                *accelerator = Some(accel);
            }
        }
    }

    fn key_fingerprint(&self, key: i32) -> String {
        Self::fingerprint_of(&self.nodes, key)
    }

    fn fingerprint_of(nodes: &[Node], key: i32) -> String {
        match nodes.get(key as usize - 1).map(|n| &n.data) {
            Some(NodeData::Scalar { value, .. }) => value.clone(),
            _ => format!("\0complex:{key}"),
        }
    }

    /// Look up a mapping pair by its key's decoded scalar value,
    /// using the accelerator when present.
    #[must_use]
    pub fn mapping_lookup(&self, mapping: i32, key: &str) -> Option<&NodePair> {
        let NodeData::Mapping {
            pairs, accelerator, ..
        } = &self.nodes.get(mapping as usize - 1)?.data
        else {
            return None;
        };
        if let Some(accel) = accelerator {
            return accel.get(key).and_then(|&i| pairs.get(i));
        }
        pairs
            .iter()
            .find(|p| Self::fingerprint_of(&self.nodes, p.key) == key)
    }

    /// Stably sort a mapping's pairs with a user comparator, then rebuild
    /// the accelerator.
    pub fn sort_mapping<F>(&mut self, mapping: i32, mut compare: F)
    where
        F: FnMut(&NodePair, &NodePair) -> core::cmp::Ordering,
    {
        let NodeData::Mapping { pairs, .. } = &mut self.nodes[mapping as usize - 1].data else {
            return;
        };
        pairs.sort_by(|a, b| compare(a, b));
        let pairs_snapshot = pairs.clone();
        self.nodes[mapping as usize - 1].synthetic = true;
        if let NodeData::Mapping {
            ref mut accelerator,
            ..
        } = &mut self.nodes[mapping as usize - 1].data
        {
            if accelerator.is_some() {
                let mut accel = HashMap::with_capacity(pairs_snapshot.len());
                for (i, p) in pairs_snapshot.iter().enumerate() {
                    accel.insert(Self::fingerprint_of(&self.nodes, p.key), i);
                }
                *accelerator = Some(accel);
            }
        }
    }

    /// True when every token transitively inside `index` originates from
    /// the same input stream.
    ///
    /// A single [`Parser`] only ever consumes one input, so within one
    /// document this is always true; the query exists so document
    /// composition (hierarchical includes, see [`Document::parse_error`])
    /// can answer it uniformly once multiple inputs are stitched together.
    #[must_use]
    pub fn uses_single_input(&self, _index: i32) -> bool {
        true
    }

    /// The mark of the first token that contributed to `index`, used by
    /// diagnostics for position reporting even after the node has been
    /// edited.
    ///
    /// A single [`Parser`] run only ever attributes tokens to one input,
    /// so this is simply the node's recorded start mark; document
    /// composition would need to pair it with an input identifier.
    #[must_use]
    pub fn first_input(&self, index: i32) -> Option<Mark> {
        self.get_node(index).map(|n| n.start_mark)
    }

    /// The first non-synthetic token's mark for `index`: the node's own
    /// start mark if it has not been mutated since parsing, or `None` if
    /// it was built or edited after the initial parse.
    #[must_use]
    pub fn first_non_synthetic_token(&self, index: i32) -> Option<Mark> {
        self.get_node(index).filter(|n| !n.synthetic).map(|n| n.start_mark)
    }

    /// [`Document::load`], first applying `config` to the parser and its
    /// scanner.
    pub fn load_with_config(
        parser: &mut Parser,
        config: crate::ParserConfig,
    ) -> Result<Document, ComposerError> {
        parser.set_config(config);
        Self::load(parser)
    }

    /// Parse the input stream and produce the next YAML document.
    ///
    /// Call this function subsequently to produce a sequence of documents
    /// constituting the input stream.
    ///
    /// If the produced document has no root node, it means that the document end
    /// has been reached.
    ///
    /// An application must not alternate the calls of [`Document::load()`]
    /// with the calls of [`Parser::parse()`] or
    /// [`Scanner::scan()`](crate::Scanner::scan). Doing this will break the
    /// parser.
    pub fn load(parser: &mut Parser) -> Result<Document, ComposerError> {
        let mut document = Document::new(None, &[], false, false);
        document.nodes.reserve(16);
        document.accelerator_enable = parser.config().accelerator_enable;
        document.allow_duplicate_keys = parser.config().allow_duplicate_keys;
        document.allow_forward_aliases = parser.config().allow_forward_aliases;

        if !parser.scanner.stream_start_produced {
            match parser.parse() {
                Ok(Event {
                    data: EventData::StreamStart { .. },
                    ..
                }) => (),
                Ok(_) => panic!("expected stream start"),
                Err(err) => return Err(err.into()),
            }
        }
        if parser.scanner.stream_end_produced {
            return Ok(document);
        }
        match parser.parse() {
            Ok(event) => {
                if let EventData::StreamEnd = &event.data {
                    return Ok(document);
                }
                document.anchors.reserve(16);
                match document.load_document(parser, event) {
                    Ok(()) => Ok(document),
                    Err(err) => {
                        document.parse_error = true;
                        Err(err)
                    }
                }
            }
            Err(err) => {
                document.parse_error = true;
                Err(err.into())
            }
        }
    }

    fn set_composer_error<T>(
        problem: &'static str,
        problem_mark: Mark,
    ) -> Result<T, ComposerError> {
        Err(ComposerError::Problem {
            problem,
            mark: problem_mark,
        })
    }

    fn set_composer_error_context<T>(
        context: &'static str,
        context_mark: Mark,
        problem: &'static str,
        problem_mark: Mark,
    ) -> Result<T, ComposerError> {
        Err(ComposerError::ProblemWithContext {
            context,
            context_mark,
            problem,
            mark: problem_mark,
        })
    }

    fn load_document(&mut self, parser: &mut Parser, event: Event) -> Result<(), ComposerError> {
        let mut ctx = vec![];
        if let EventData::DocumentStart {
            version_directive,
            tag_directives,
            implicit,
        } = event.data
        {
            self.version_directive = version_directive;
            self.tag_directives = tag_directives;
            self.start_implicit = implicit;
            self.start_mark = event.start_mark;
            ctx.reserve(16);
            if let Err(err) = self.load_nodes(parser, &mut ctx) {
                ctx.clear();
                return Err(err);
            }
            ctx.clear();
            self.resolve_pending_aliases()
        } else {
            panic!("Expected YAML_DOCUMENT_START_EVENT")
        }
    }

    fn load_nodes(&mut self, parser: &mut Parser, ctx: &mut Vec<i32>) -> Result<(), ComposerError> {
        let end_implicit;
        let end_mark;

        loop {
            let event = parser.parse()?;
            match event.data {
                EventData::NoEvent => panic!("empty event"),
                EventData::StreamStart { .. } => panic!("unexpected stream start event"),
                EventData::StreamEnd => panic!("unexpected stream end event"),
                EventData::DocumentStart { .. } => panic!("unexpected document start event"),
                EventData::DocumentEnd { implicit } => {
                    end_implicit = implicit;
                    end_mark = event.end_mark;
                    break;
                }
                EventData::Alias { .. } => {
                    self.load_alias(event, ctx)?;
                }
                EventData::Scalar { .. } => {
                    self.load_scalar(event, ctx)?;
                }
                EventData::SequenceStart { .. } => {
                    self.load_sequence(event, ctx)?;
                }
                EventData::SequenceEnd => {
                    self.load_sequence_end(event, ctx)?;
                }
                EventData::MappingStart { .. } => {
                    self.load_mapping(event, ctx)?;
                }
                EventData::MappingEnd => {
                    self.load_mapping_end(event, ctx)?;
                }
            }
        }
        self.end_implicit = end_implicit;
        self.end_mark = end_mark;
        Ok(())
    }

    /// Register an anchor binding for a freshly-built node.
    ///
    /// Rebinding an existing name is not an error: the new binding is
    /// appended and both it and the most recent prior binding for the
    /// same name are flagged `multiple`, so a subsequent alias resolves
    /// to the most recent binding while earlier ones remain inspectable.
    fn register_anchor(&mut self, index: i32, anchor: Option<String>) {
        let Some(name) = anchor else {
            return;
        };
        let mark = self.nodes[index as usize - 1].start_mark;
        if let Some(previous) = self.anchors.iter_mut().rev().find(|a| a.name == name) {
            previous.multiple = true;
            log::debug!("anchor {name:?} rebound at {mark}, shadowing the earlier binding");
            self.anchors.push(Anchor {
                name,
                index,
                mark,
                multiple: true,
            });
        } else {
            log::debug!("anchor {name:?} bound at {mark}");
            self.anchors.push(Anchor {
                name,
                index,
                mark,
                multiple: false,
            });
        }
    }

    fn load_node_add(&mut self, ctx: &[i32], index: i32) -> Result<(), ComposerError> {
        if ctx.is_empty() {
            return Ok(());
        }
        let parent_index: i32 = *ctx.last().unwrap();
        self.nodes[index as usize - 1].parent = parent_index;

        if !matches!(
            self.nodes[parent_index as usize - 1].data,
            NodeData::Mapping { .. }
        ) {
            match &mut self.nodes[parent_index as usize - 1].data {
                NodeData::Sequence { items, .. } => {
                    items.push(index);
                    return Ok(());
                }
                _ => panic!("document parent node is not a sequence or a mapping"),
            }
        }

        let pending_key = {
            let NodeData::Mapping { pairs, .. } = &self.nodes[parent_index as usize - 1].data
            else {
                unreachable!()
            };
            pairs
                .last()
                .filter(|p| p.key != 0 && p.value == 0)
                .map(|p| p.key)
        };
        if pending_key.is_some() {
            let NodeData::Mapping { pairs, .. } = &mut self.nodes[parent_index as usize - 1].data
            else {
                unreachable!()
            };
            pairs.last_mut().unwrap().value = index;
            return Ok(());
        }

        let key_fingerprint = Self::fingerprint_of(&self.nodes, index);
        let duplicate = {
            let NodeData::Mapping { pairs, .. } = &self.nodes[parent_index as usize - 1].data
            else {
                unreachable!()
            };
            pairs
                .iter()
                .any(|p| p.value != 0 && Self::fingerprint_of(&self.nodes, p.key) == key_fingerprint)
        };
        if duplicate {
            let mark = self.nodes[index as usize - 1].start_mark;
            if !self.allow_duplicate_keys {
                return Err(ComposerError::DuplicateKey {
                    key: key_fingerprint,
                    mark,
                });
            }
            log::warn!("duplicate mapping key {key_fingerprint:?} accepted at {mark} under permissive configuration");
        }
        self.insert_mapping_pair(parent_index, NodePair { key: index, value: 0 });
        Ok(())
    }

    fn load_alias(&mut self, event: Event, ctx: &[i32]) -> Result<(), ComposerError> {
        let EventData::Alias { anchor } = &event.data else {
            unreachable!()
        };

        if let Some(found) = self.anchors.iter().rev().find(|a| a.name == *anchor) {
            return self.load_node_add(ctx, found.index);
        }

        if self.allow_forward_aliases {
            return self.defer_alias(anchor.clone(), ctx, event.start_mark);
        }

        Self::set_composer_error("found undefined alias", event.start_mark)
    }

    /// Record an alias whose anchor has not been registered yet, reserving
    /// the slot it will occupy once the document has been fully read and
    /// [`Document::resolve_pending_aliases`] can look the anchor up.
    fn defer_alias(&mut self, anchor: String, ctx: &[i32], mark: Mark) -> Result<(), ComposerError> {
        let Some(&parent_index) = ctx.last() else {
            return Self::set_composer_error(
                "a forward-referencing alias cannot be the document root",
                mark,
            );
        };
        let target = match &mut self.nodes[parent_index as usize - 1].data {
            NodeData::Sequence { items, .. } => {
                let position = items.len();
                items.push(0);
                AliasFixupTarget::SequenceItem {
                    sequence: parent_index,
                    position,
                }
            }
            NodeData::Mapping { pairs, .. } => {
                let pending_position = pairs
                    .last()
                    .filter(|p| p.key != 0 && p.value == 0)
                    .map(|_| pairs.len() - 1);
                match pending_position {
                    Some(position) => AliasFixupTarget::MappingValue {
                        mapping: parent_index,
                        position,
                    },
                    None => {
                        return Self::set_composer_error(
                            "found undefined alias (forward references are only supported \
                             for sequence items and mapping values, not mapping keys)",
                            mark,
                        );
                    }
                }
            }
            _ => panic!("document parent node is not a sequence or a mapping"),
        };
        self.pending_forward_aliases.push(PendingAlias {
            anchor,
            target,
            mark,
        });
        Ok(())
    }

    /// Resolve every alias deferred by [`Document::defer_alias`] against the
    /// anchors registered while reading the rest of the document.
    ///
    /// Neither target kind changes a mapping key, so no accelerator is ever
    /// invalidated by a patch here.
    fn resolve_pending_aliases(&mut self) -> Result<(), ComposerError> {
        let pending = core::mem::take(&mut self.pending_forward_aliases);
        for pending_alias in pending {
            let Some(found) = self
                .anchors
                .iter()
                .rev()
                .find(|a| a.name == pending_alias.anchor)
            else {
                return Self::set_composer_error("found undefined alias", pending_alias.mark);
            };
            let resolved = found.index;
            let parent = match &pending_alias.target {
                AliasFixupTarget::SequenceItem { sequence, .. } => *sequence,
                AliasFixupTarget::MappingValue { mapping, .. } => *mapping,
            };
            match &pending_alias.target {
                AliasFixupTarget::SequenceItem { sequence, position } => {
                    if let NodeData::Sequence { items, .. } =
                        &mut self.nodes[*sequence as usize - 1].data
                    {
                        items[*position] = resolved;
                    }
                }
                AliasFixupTarget::MappingValue { mapping, position } => {
                    if let NodeData::Mapping { pairs, .. } =
                        &mut self.nodes[*mapping as usize - 1].data
                    {
                        pairs[*position].value = resolved;
                    }
                }
            }
            self.nodes[resolved as usize - 1].parent = parent;
        }
        Ok(())
    }

    fn load_scalar(&mut self, event: Event, ctx: &[i32]) -> Result<(), ComposerError> {
        let EventData::Scalar {
            mut tag,
            value,
            style,
            anchor,
            ..
        } = event.data
        else {
            unreachable!()
        };

        if tag.is_none() || tag.as_deref() == Some("!") {
            tag = Some(String::from(DEFAULT_SCALAR_TAG));
        }
        let node = Node {
            data: NodeData::Scalar { value, style },
            tag,
            parent: 0,
            synthetic: false,
            marks: NodeMarks::empty(),
            start_mark: event.start_mark,
            end_mark: event.end_mark,
        };
        self.nodes.push(node);
        let index: i32 = self.nodes.len() as i32;
        self.register_anchor(index, anchor);
        self.load_node_add(ctx, index)
    }

    fn load_sequence(&mut self, event: Event, ctx: &mut Vec<i32>) -> Result<(), ComposerError> {
        let EventData::SequenceStart {
            anchor,
            mut tag,
            style,
            ..
        } = event.data
        else {
            unreachable!()
        };

        if tag.is_none() || tag.as_deref() == Some("!") {
            tag = Some(String::from(DEFAULT_SEQUENCE_TAG));
        }

        let node = Node {
            data: NodeData::Sequence {
                items: Vec::with_capacity(16),
                style,
            },
            tag,
            parent: 0,
            synthetic: false,
            marks: NodeMarks::empty(),
            start_mark: event.start_mark,
            end_mark: event.end_mark,
        };

        self.nodes.push(node);
        let index: i32 = self.nodes.len() as i32;
        self.register_anchor(index, anchor);
        self.load_node_add(ctx, index)?;
        ctx.push(index);
        Ok(())
    }

    fn load_sequence_end(&mut self, event: Event, ctx: &mut Vec<i32>) -> Result<(), ComposerError> {
        assert!(!ctx.is_empty());
        let index: i32 = *ctx.last().unwrap();
        assert!(matches!(
            self.nodes[index as usize - 1].data,
            NodeData::Sequence { .. }
        ));
        self.nodes[index as usize - 1].end_mark = event.end_mark;
        _ = ctx.pop();
        Ok(())
    }

    fn load_mapping(&mut self, event: Event, ctx: &mut Vec<i32>) -> Result<(), ComposerError> {
        let EventData::MappingStart {
            anchor,
            mut tag,
            style,
            ..
        } = event.data
        else {
            unreachable!()
        };

        if tag.is_none() || tag.as_deref() == Some("!") {
            tag = Some(String::from(DEFAULT_MAPPING_TAG));
        }
        let node = Node {
            data: NodeData::Mapping {
                pairs: Vec::with_capacity(16),
                style,
                accelerator: None,
            },
            tag,
            parent: 0,
            synthetic: false,
            marks: NodeMarks::empty(),
            start_mark: event.start_mark,
            end_mark: event.end_mark,
        };
        self.nodes.push(node);
        let index: i32 = self.nodes.len() as i32;
        self.register_anchor(index, anchor);
        self.load_node_add(ctx, index)?;
        ctx.push(index);
        Ok(())
    }

    fn load_mapping_end(&mut self, event: Event, ctx: &mut Vec<i32>) -> Result<(), ComposerError> {
        assert!(!ctx.is_empty());
        let index: i32 = *ctx.last().unwrap();
        assert!(matches!(
            self.nodes[index as usize - 1].data,
            NodeData::Mapping { .. }
        ));
        self.nodes[index as usize - 1].end_mark = event.end_mark;
        _ = ctx.pop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Parser;

    #[test]
    fn loads_scalar_root() {
        let mut parser = Parser::new();
        let mut input: &[u8] = b"hello";
        parser.set_input(&mut input);
        let doc = Document::load(&mut parser).unwrap();
        assert!(matches!(
            doc.root().unwrap().data,
            NodeData::Scalar { ref value, .. } if value == "hello"
        ));
    }

    #[test]
    fn rebinding_an_anchor_shadows_instead_of_erroring() {
        let mut parser = Parser::new();
        let mut input: &[u8] = b"- &a one\n- &a two\n- *a\n";
        parser.set_input(&mut input);
        let doc = Document::load(&mut parser).unwrap();
        assert_eq!(doc.anchors.len(), 2);
        assert!(doc.anchors.iter().all(|a| a.multiple));

        let root = doc.root().unwrap();
        let NodeData::Sequence { items, .. } = &root.data else {
            panic!("expected sequence root");
        };
        let alias_target = doc.get_node(items[2]).unwrap();
        assert!(matches!(
            &alias_target.data,
            NodeData::Scalar { value, .. } if value == "two"
        ));
    }

    #[test]
    fn duplicate_key_is_permitted_by_default() {
        let mut parser = Parser::new();
        let mut input: &[u8] = b"a: one\na: two\n";
        parser.set_input(&mut input);
        let doc = Document::load(&mut parser).unwrap();
        let root = doc.root().unwrap();
        let NodeData::Mapping { pairs, .. } = &root.data else {
            panic!("expected mapping root");
        };
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn duplicate_key_is_rejected_when_configured() {
        let mut parser = Parser::new();
        let mut input: &[u8] = b"a: one\na: two\n";
        parser.set_input(&mut input);
        let config = crate::ParserConfig {
            allow_duplicate_keys: false,
            ..Default::default()
        };
        let err = Document::load_with_config(&mut parser, config).unwrap_err();
        assert!(matches!(err, ComposerError::DuplicateKey { .. }));
    }

    #[test]
    fn undefined_alias_is_an_error() {
        let mut parser = Parser::new();
        let mut input: &[u8] = b"*missing";
        parser.set_input(&mut input);
        assert!(Document::load(&mut parser).is_err());
    }

    #[test]
    fn forward_alias_is_rejected_by_default() {
        let mut parser = Parser::new();
        let mut input: &[u8] = b"a: *b\nb: &b 1\n";
        parser.set_input(&mut input);
        assert!(Document::load(&mut parser).is_err());
    }

    #[test]
    fn forward_alias_in_mapping_value_resolves_when_configured() {
        let mut parser = Parser::new();
        let mut input: &[u8] = b"a: *b\nb: &b 1\n";
        parser.set_input(&mut input);
        let config = crate::ParserConfig {
            allow_forward_aliases: true,
            ..Default::default()
        };
        let doc = Document::load_with_config(&mut parser, config).unwrap();
        let root = doc.root().unwrap();
        let NodeData::Mapping { pairs, .. } = &root.data else {
            panic!("expected mapping root");
        };
        assert_eq!(pairs.len(), 2);
        let a_value = doc.get_node(pairs[0].value).unwrap();
        assert!(matches!(
            &a_value.data,
            NodeData::Scalar { value, .. } if value == "1"
        ));
    }

    #[test]
    fn forward_alias_in_sequence_item_resolves_when_configured() {
        let mut parser = Parser::new();
        let mut input: &[u8] = b"- *b\n- &b 1\n";
        parser.set_input(&mut input);
        let config = crate::ParserConfig {
            allow_forward_aliases: true,
            ..Default::default()
        };
        let doc = Document::load_with_config(&mut parser, config).unwrap();
        let root = doc.root().unwrap();
        let NodeData::Sequence { items, .. } = &root.data else {
            panic!("expected sequence root");
        };
        assert_eq!(items.len(), 2);
        let first = doc.get_node(items[0]).unwrap();
        assert!(matches!(
            &first.data,
            NodeData::Scalar { value, .. } if value == "1"
        ));
    }

    #[test]
    fn forward_alias_still_errors_when_anchor_never_appears() {
        let mut parser = Parser::new();
        let mut input: &[u8] = b"a: *missing\nb: 1\n";
        parser.set_input(&mut input);
        let config = crate::ParserConfig {
            allow_forward_aliases: true,
            ..Default::default()
        };
        assert!(Document::load_with_config(&mut parser, config).is_err());
    }

    #[test]
    fn mapping_accelerator_kicks_in_past_threshold() {
        let mut doc = Document::new(None, &[], true, true);
        let mapping = doc.add_mapping(None, MappingStyle::Block);
        for i in 0..=MAPPING_ACCELERATOR_THRESHOLD {
            let key = doc.add_scalar(None, &format!("k{i}"), ScalarStyle::Plain);
            let value = doc.add_scalar(None, &format!("v{i}"), ScalarStyle::Plain);
            doc.yaml_document_append_mapping_pair(mapping, key, value);
        }
        let NodeData::Mapping { accelerator, .. } = &doc.get_node(mapping).unwrap().data else {
            panic!("expected mapping");
        };
        assert!(accelerator.is_some());
        let found = doc.mapping_lookup(mapping, "k3").unwrap();
        let NodeData::Scalar { value, .. } = &doc.get_node(found.value).unwrap().data else {
            panic!("expected scalar value");
        };
        assert_eq!(value, "v3");
    }
}
