//! A small in-memory mail index loaded from a JSON message dump.
//!
//! The query language is a handful of `field:value` terms joined by
//! whitespace; every term must match. `NOT` (or a leading `-`) negates the
//! following term, `AND` and parentheses are ignored and `*` matches
//! everything. Threads are rebuilt from `in_reply_to` links.

use crate::message::{Contact, DocId, Flag, MessageRecord, ThreadDescriptor};
use crate::session::{QueryRequest, SortDirection, SortField};
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read message store: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse message store: {0}")]
    Parse(String),
    #[error("duplicate docid {0} in message store")]
    DuplicateDocId(DocId),
}

#[derive(Debug, Clone, Deserialize)]
struct StoredMessage {
    #[serde(flatten)]
    record: MessageRecord,
    #[serde(default)]
    in_reply_to: Option<String>,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Clone)]
struct Entry {
    record: MessageRecord,
    in_reply_to: Option<String>,
    body: String,
}

#[derive(Debug, Default)]
pub struct MessageStore {
    entries: BTreeMap<DocId, Entry>,
}

impl MessageStore {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, StoreError> {
        let stored: Vec<StoredMessage> =
            serde_json::from_str(contents).map_err(|e| StoreError::Parse(e.to_string()))?;
        let mut store = MessageStore::default();
        for msg in stored {
            let docid = msg.record.docid;
            let entry = Entry {
                // thread placement is recomputed per query
                record: MessageRecord {
                    thread: None,
                    ..msg.record
                },
                in_reply_to: msg.in_reply_to,
                body: msg.body.unwrap_or_default(),
            };
            if store.entries.insert(docid, entry).is_some() {
                return Err(StoreError::DuplicateDocId(docid));
            }
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, docid: DocId) -> Option<&MessageRecord> {
        self.entries.get(&docid).map(|e| &e.record)
    }

    pub fn body(&self, docid: DocId) -> Option<&str> {
        self.entries.get(&docid).map(|e| e.body.as_str())
    }

    /// Replace the flags of a message, returning the updated record.
    pub fn set_flags(&mut self, docid: DocId, flags: Vec<Flag>) -> Option<MessageRecord> {
        let entry = self.entries.get_mut(&docid)?;
        entry.record.flags = flags;
        Some(entry.record.clone())
    }

    pub fn move_to(&mut self, docid: DocId, maildir: &str) -> Option<MessageRecord> {
        let entry = self.entries.get_mut(&docid)?;
        entry.record.maildir = maildir.to_string();
        Some(entry.record.clone())
    }

    pub fn delete(&mut self, docid: DocId) -> bool {
        self.entries.remove(&docid).is_some()
    }

    /// Run a query. Results are ordered for display and, when threading is
    /// requested, carry their thread placement.
    pub fn query(&self, request: &QueryRequest) -> Vec<MessageRecord> {
        let terms = parse_query(&request.expr);
        let mut hits: Vec<&Entry> = self
            .entries
            .values()
            .filter(|e| terms.iter().all(|t| t.matches(&e.record)))
            .collect();

        if request.include_related {
            let thread_of = self.thread_roots();
            let wanted: HashSet<&str> = hits
                .iter()
                .filter_map(|e| thread_of.get(&e.record.docid).map(String::as_str))
                .collect();
            hits = self
                .entries
                .values()
                .filter(|e| {
                    thread_of
                        .get(&e.record.docid)
                        .is_some_and(|root| wanted.contains(root.as_str()))
                })
                .collect();
        }

        if request.skip_duplicates {
            let mut seen = HashSet::new();
            hits.retain(|&e| e.record.message_id.is_empty() || seen.insert(e.record.message_id.as_str()));
        }

        let mut results = if request.threaded {
            thread_results(hits, request.sort_field, request.sort_direction)
        } else {
            hits.sort_by(|a, b| {
                directed(
                    compare(&a.record, &b.record, request.sort_field),
                    request.sort_direction,
                )
            });
            hits.into_iter().map(|e| e.record.clone()).collect()
        };

        if let Some(limit) = request.limit {
            results.truncate(limit as usize);
        }
        results
    }

    /// Message id of the oldest reachable ancestor of every message.
    fn thread_roots(&self) -> HashMap<DocId, String> {
        let by_msgid: HashMap<&str, &Entry> = self
            .entries
            .values()
            .filter(|e| !e.record.message_id.is_empty())
            .map(|e| (e.record.message_id.as_str(), e))
            .collect();
        let mut roots = HashMap::with_capacity(self.entries.len());
        for entry in self.entries.values() {
            let mut current = entry;
            let mut visited = HashSet::new();
            let mut root = None;
            while let Some(parent_id) = current.in_reply_to.as_deref() {
                if !visited.insert(parent_id) {
                    break;
                }
                match by_msgid.get(parent_id) {
                    Some(parent) => current = parent,
                    None => {
                        root = Some(parent_id.to_string());
                        break;
                    }
                }
            }
            let root = root.unwrap_or_else(|| current.record.message_id.clone());
            roots.insert(entry.record.docid, root);
        }
        roots
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    All,
    Flag(String),
    From(String),
    To(String),
    Subject(String),
    Maildir(String),
    Tag(String),
    MessageId(String),
    Word(String),
    Not(Box<Term>),
}

fn parse_query(expr: &str) -> Vec<Term> {
    let mut terms = Vec::new();
    let mut negate = false;
    for raw in expr.split_whitespace() {
        let token = raw.trim_matches(|c| c == '(' || c == ')');
        if token.is_empty() || token == "AND" {
            continue;
        }
        if token == "NOT" {
            negate = !negate;
            continue;
        }
        let (token, negated) = match token.strip_prefix('-') {
            Some(rest) if !rest.is_empty() => (rest, !negate),
            _ => (token, negate),
        };
        negate = false;

        let term = match token.split_once(':') {
            _ if token == "*" => Term::All,
            Some(("flag", v)) => Term::Flag(v.to_lowercase()),
            Some(("from", v)) => Term::From(v.to_lowercase()),
            Some(("to", v)) => Term::To(v.to_lowercase()),
            Some(("subject", v)) => Term::Subject(v.to_lowercase()),
            Some(("maildir", v)) => Term::Maildir(v.to_string()),
            Some(("tag", v)) => Term::Tag(v.to_string()),
            Some(("msgid", v)) => Term::MessageId(v.trim_matches(|c| c == '<' || c == '>').to_string()),
            _ => Term::Word(token.to_lowercase()),
        };
        terms.push(if negated { Term::Not(Box::new(term)) } else { term });
    }
    terms
}

fn contact_matches(contacts: &[Contact], needle: &str) -> bool {
    contacts.iter().any(|c| {
        [c.name.as_deref(), c.email.as_deref()]
            .into_iter()
            .flatten()
            .any(|s| s.to_lowercase().contains(needle))
    })
}

impl Term {
    fn matches(&self, msg: &MessageRecord) -> bool {
        match self {
            Term::All => true,
            Term::Flag(name) if name == "unread" => msg.is_unread(),
            Term::Flag(name) => Flag::parse(name).is_some_and(|f| msg.has_flag(f)),
            Term::From(needle) => contact_matches(&msg.from, needle),
            Term::To(needle) => contact_matches(&msg.to, needle) || contact_matches(&msg.cc, needle),
            Term::Subject(needle) => msg.subject.to_lowercase().contains(needle.as_str()),
            Term::Maildir(dir) => match dir.strip_suffix('*') {
                Some(prefix) => msg.maildir.starts_with(prefix),
                None => msg.maildir == *dir,
            },
            Term::Tag(tag) => msg.tags.iter().any(|t| t == tag),
            Term::MessageId(id) => msg.message_id.trim_matches(|c| c == '<' || c == '>') == id,
            Term::Word(word) => {
                msg.subject.to_lowercase().contains(word.as_str())
                    || contact_matches(&msg.from, word)
                    || contact_matches(&msg.to, word)
            }
            Term::Not(inner) => !inner.matches(msg),
        }
    }
}

fn first_contact(list: &[Contact]) -> String {
    list.first()
        .map(|c| c.display_name().to_lowercase())
        .unwrap_or_default()
}

fn compare(a: &MessageRecord, b: &MessageRecord, field: SortField) -> Ordering {
    let ord = match field {
        SortField::Date => a.date.cmp(&b.date),
        SortField::Subject => a.subject.to_lowercase().cmp(&b.subject.to_lowercase()),
        SortField::Size => a.size.cmp(&b.size),
        SortField::From => first_contact(&a.from).cmp(&first_contact(&b.from)),
        SortField::To => first_contact(&a.to).cmp(&first_contact(&b.to)),
        SortField::Maildir => a.maildir.cmp(&b.maildir),
        SortField::MessageId => a.message_id.cmp(&b.message_id),
    };
    ord.then(a.docid.cmp(&b.docid))
}

fn directed(ord: Ordering, direction: SortDirection) -> Ordering {
    match direction {
        SortDirection::Ascending => ord,
        SortDirection::Descending => ord.reverse(),
    }
}

struct Node<'a> {
    entry: &'a Entry,
    children: Vec<usize>,
    duplicate: bool,
}

/// A top-level thread: a real message, or a missing parent whose replies
/// are in the result set.
struct Root {
    message: Option<usize>,
    children: Vec<usize>,
}

#[derive(Clone, Copy)]
struct Placement {
    depth: u32,
    first: bool,
    last: bool,
    empty_parent: bool,
}

fn thread_results(
    hits: Vec<&Entry>,
    sort_field: SortField,
    direction: SortDirection,
) -> Vec<MessageRecord> {
    let mut nodes: Vec<Node> = Vec::with_capacity(hits.len());
    let mut by_msgid: HashMap<&str, usize> = HashMap::new();
    for entry in hits {
        let msgid = entry.record.message_id.as_str();
        let duplicate = !msgid.is_empty() && by_msgid.contains_key(msgid);
        if !duplicate && !msgid.is_empty() {
            by_msgid.insert(msgid, nodes.len());
        }
        nodes.push(Node {
            entry,
            children: Vec::new(),
            duplicate,
        });
    }

    let mut roots: Vec<Root> = Vec::new();
    let mut missing: HashMap<&str, usize> = HashMap::new();
    for idx in 0..nodes.len() {
        let entry = nodes[idx].entry;
        let duplicate = nodes[idx].duplicate;
        let parent = if duplicate {
            // duplicates sit below the message they copy
            by_msgid.get(entry.record.message_id.as_str()).copied()
        } else {
            entry
                .in_reply_to
                .as_deref()
                .and_then(|p| by_msgid.get(p).copied())
        };
        match (parent, entry.in_reply_to.as_deref()) {
            (Some(parent), _) if parent != idx => nodes[parent].children.push(idx),
            (None, Some(missing_id)) if !duplicate => {
                let slot = *missing.entry(missing_id).or_insert_with(|| {
                    roots.push(Root {
                        message: None,
                        children: Vec::new(),
                    });
                    roots.len() - 1
                });
                roots[slot].children.push(idx);
            }
            _ => roots.push(Root {
                message: Some(idx),
                children: Vec::new(),
            }),
        }
    }

    // replies read oldest first whatever the thread order
    let dates: Vec<(Option<i64>, DocId)> = nodes
        .iter()
        .map(|n| (n.entry.record.date, n.entry.record.docid))
        .collect();
    for node in nodes.iter_mut() {
        node.children.sort_by_key(|&c| dates[c]);
    }
    for root in roots.iter_mut() {
        root.children.sort_by_key(|&c| dates[c]);
    }

    let root_key = |root: &Root| root.message.or_else(|| root.children.first().copied());
    roots.sort_by(|a, b| match (root_key(a), root_key(b)) {
        (Some(x), Some(y)) => directed(
            compare(&nodes[x].entry.record, &nodes[y].entry.record, sort_field),
            direction,
        ),
        _ => Ordering::Equal,
    });

    let mut emitter = Emitter {
        nodes: &nodes,
        visited: vec![false; nodes.len()],
        out: Vec::with_capacity(nodes.len()),
    };
    let root_placement = Placement {
        depth: 0,
        first: true,
        last: false,
        empty_parent: false,
    };
    let mut next_root = 0;
    for root in &roots {
        let path = format!("{:04x}", next_root);
        next_root += 1;
        match root.message {
            Some(idx) => emitter.emit(idx, path, root_placement),
            None => emitter.emit_children(&root.children, &path, 1, true),
        }
    }
    // reply cycles have no root; show each as its own thread
    for idx in 0..nodes.len() {
        if !emitter.visited[idx] {
            let path = format!("{:04x}", next_root);
            next_root += 1;
            emitter.emit(idx, path, root_placement);
        }
    }
    emitter.out
}

struct Emitter<'n, 'a> {
    nodes: &'n [Node<'a>],
    visited: Vec<bool>,
    out: Vec<MessageRecord>,
}

impl Emitter<'_, '_> {
    fn emit(&mut self, idx: usize, path: String, placement: Placement) {
        if std::mem::replace(&mut self.visited[idx], true) {
            return;
        }
        let nodes = self.nodes;
        let node = &nodes[idx];
        let mut record = node.entry.record.clone();
        record.thread = Some(ThreadDescriptor {
            depth: placement.depth,
            has_child: !node.children.is_empty(),
            is_last_child: placement.last,
            is_empty_parent: placement.empty_parent,
            is_first_child: placement.first,
            is_duplicate: node.duplicate,
            sort_path: path.clone(),
        });
        self.out.push(record);
        self.emit_children(&node.children, &path, placement.depth + 1, false);
    }

    fn emit_children(&mut self, children: &[usize], path: &str, depth: u32, empty_parent: bool) {
        let last = children.len().saturating_sub(1);
        for (i, &child) in children.iter().enumerate() {
            let placement = Placement {
                depth,
                first: i == 0,
                last: i == last,
                empty_parent,
            };
            self.emit(child, format!("{}:{:04x}", path, i), placement);
        }
    }
}
