//! Search orchestration.
//!
//! A [`SearchSession`] owns the display surface, the thread prefix engine
//! and the query history. It sends queries to an [`IndexBackend`] and feeds
//! the events that come back into the surface. Every query gets a new
//! generation number; events tagged with an older generation belong to a
//! superseded search and are dropped.

use crate::config::HeadersConfig;
use crate::error::HeadersError;
use crate::fields::{FieldId, FieldPropertiesHook, FieldRegistry, HeaderFormatter, RenderedLine};
use crate::history::{HistoryStack, QueryHistory};
use crate::message::{DocId, Mark, MessageRecord};
use crate::surface::{DisplaySurface, Row, RowRenderer};
use crate::thread::ThreadPrefixEngine;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub const SEARCHING: &str = "Searching…";
pub const NO_MATCHES: &str = "No matching messages";
pub const END_OF_RESULTS: &str = "End of search results";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortField {
    Date,
    Subject,
    Size,
    From,
    To,
    Maildir,
    MessageId,
}

impl SortField {
    pub fn parse(s: &str) -> Option<SortField> {
        let field = match s {
            "date" => SortField::Date,
            "subject" => SortField::Subject,
            "size" => SortField::Size,
            "from" => SortField::From,
            "to" => SortField::To,
            "maildir" => SortField::Maildir,
            "message-id" => SortField::MessageId,
            _ => return None,
        };
        Some(field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn parse(s: &str) -> Option<SortDirection> {
        match s {
            "ascending" | "asc" => Some(SortDirection::Ascending),
            "descending" | "desc" => Some(SortDirection::Descending),
            _ => None,
        }
    }
}

/// Parameters sent to the index with every query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryRequest {
    pub expr: String,
    pub threaded: bool,
    pub sort_field: SortField,
    pub sort_direction: SortDirection,
    pub limit: Option<u32>,
    pub skip_duplicates: bool,
    pub include_related: bool,
}

/// Per-session query settings; they persist across searches and reruns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryOptions {
    pub threaded: bool,
    pub sort_field: SortField,
    pub sort_direction: SortDirection,
    pub limit: Option<u32>,
    pub skip_duplicates: bool,
    pub include_related: bool,
}

impl QueryOptions {
    pub fn from_config(config: &HeadersConfig) -> Self {
        QueryOptions {
            threaded: config.show_threads,
            sort_field: config.sort_field,
            sort_direction: config.sort_direction,
            limit: config.results_limit,
            skip_duplicates: config.skip_duplicates,
            include_related: config.include_related,
        }
    }
}

/// Events emitted by the index for one query.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Event {
    Found { message: MessageRecord },
    Updated {
        message: MessageRecord,
        #[serde(default)]
        is_move: bool,
    },
    Removed { docid: DocId },
    Complete { count: u32 },
}

/// The mail index. Results arrive later as [`Event`]s tagged with the
/// generation passed here.
pub trait IndexBackend {
    fn run_query(&mut self, generation: u64, request: QueryRequest);
    fn fetch_body(&mut self, doc_id: DocId);
}

/// The surrounding UI: the message detail view and result notifications.
pub trait Frontend {
    /// Message currently shown in the detail view, if any.
    fn viewed_message(&self) -> Option<DocId>;
    fn view_message(&mut self, msg: &MessageRecord);
    fn close_message_view(&mut self);
    fn results_ready(&mut self, _count: u32) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Searching,
    Rendering,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Applied,
    Stale,
}

pub type QueryRewrite = Box<dyn Fn(&str) -> String>;
pub type ResultsHook = Box<dyn FnMut(u32)>;

/// Rewrite that replaces every word naming an alias with its expansion.
pub fn alias_rewrite(aliases: BTreeMap<String, String>) -> QueryRewrite {
    Box::new(move |query: &str| {
        query
            .split_whitespace()
            .map(|word| aliases.get(word).map(String::as_str).unwrap_or(word))
            .collect::<Vec<_>>()
            .join(" ")
    })
}

impl RowRenderer for HeaderFormatter {
    fn render_row(
        &self,
        msg: &MessageRecord,
        prefix: &str,
        mark: Option<Mark>,
    ) -> Result<RenderedLine, HeadersError> {
        self.render_line(msg, prefix, mark)
    }
}

pub struct SearchSession<B, F> {
    backend: B,
    frontend: F,
    formatter: HeaderFormatter,
    engine: ThreadPrefixEngine,
    surface: DisplaySurface,
    history: QueryHistory,
    options: QueryOptions,
    state: SessionState,
    generation: u64,
    current_query: Option<String>,
    prior_highlight: Option<DocId>,
    target_msgid: Option<String>,
    auto_view: bool,
    last_count: Option<u32>,
    rewrite: QueryRewrite,
    results_hook: Option<ResultsHook>,
}

impl<B: IndexBackend, F: Frontend> SearchSession<B, F> {
    pub fn new(
        config: &HeadersConfig,
        registry: FieldRegistry,
        backend: B,
        frontend: F,
    ) -> Result<Self, HeadersError> {
        let formatter = HeaderFormatter::new(config, registry)?;
        Ok(SearchSession {
            backend,
            frontend,
            engine: ThreadPrefixEngine::new(formatter.fancy()),
            formatter,
            surface: DisplaySurface::new(),
            history: QueryHistory::new(config.history_depth),
            options: QueryOptions::from_config(config),
            state: SessionState::Idle,
            generation: 0,
            current_query: None,
            prior_highlight: None,
            target_msgid: None,
            auto_view: false,
            last_count: None,
            rewrite: Box::new(|q: &str| q.to_string()),
            results_hook: None,
        })
    }

    pub fn set_query_rewrite(&mut self, rewrite: QueryRewrite) {
        self.rewrite = rewrite;
    }

    pub fn set_results_hook(&mut self, hook: ResultsHook) {
        self.results_hook = Some(hook);
    }

    /// Install a hook adding one extra style per field. Applies to rows
    /// rendered from now on.
    pub fn set_properties_hook(&mut self, hook: FieldPropertiesHook) {
        self.formatter.set_properties_hook(hook);
    }

    pub fn formatter(&self) -> &HeaderFormatter {
        &self.formatter
    }

    pub fn surface(&self) -> &DisplaySurface {
        &self.surface
    }

    pub fn history(&self) -> &QueryHistory {
        &self.history
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn current_query(&self) -> Option<&str> {
        self.current_query.as_deref()
    }

    pub fn last_count(&self) -> Option<u32> {
        self.last_count
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut QueryOptions {
        &mut self.options
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn frontend(&self) -> &F {
        &self.frontend
    }

    pub fn frontend_mut(&mut self) -> &mut F {
        &mut self.frontend
    }

    /// Start a new search. Unless `ignore_history` is set, the previous
    /// query goes onto the past stack. `target_msgid` and `auto_view` only
    /// apply to this search.
    pub fn search(
        &mut self,
        query: &str,
        ignore_history: bool,
        target_msgid: Option<&str>,
        auto_view: bool,
    ) {
        let prior = self.surface.highlighted();
        if !ignore_history {
            if let Some(previous) = self.current_query.as_deref() {
                self.history.push(previous, HistoryStack::Past);
            }
        }
        self.current_query = Some(query.to_string());

        self.generation += 1;
        self.surface.clear(Some(SEARCHING));
        self.engine.reset();
        self.prior_highlight = prior;
        self.target_msgid = target_msgid.map(str::to_string);
        self.auto_view = auto_view;
        self.last_count = None;
        self.state = SessionState::Searching;

        let request = QueryRequest {
            expr: (self.rewrite)(query),
            threaded: self.options.threaded,
            sort_field: self.options.sort_field,
            sort_direction: self.options.sort_direction,
            limit: self.options.limit,
            skip_duplicates: self.options.skip_duplicates,
            include_related: self.options.include_related,
        };
        info!(
            generation = self.generation,
            query = %query,
            expr = %request.expr,
            "starting search"
        );
        self.backend.run_query(self.generation, request);
    }

    /// Run the current query again, keeping the position.
    pub fn rerun(&mut self) -> bool {
        let Some(query) = self.current_query.clone() else {
            return false;
        };
        self.search(&query, true, None, false);
        true
    }

    /// Go back or forward through the query history and run that query.
    pub fn navigate_history(&mut self, which: HistoryStack) -> Result<String, HeadersError> {
        let query = self
            .history
            .navigate(which, self.current_query.as_deref())
            .ok_or(HeadersError::HistoryEmpty(which))?;
        self.search(&query, true, None, false);
        Ok(query)
    }

    pub fn forget_history(&mut self) {
        self.history.forget();
    }

    pub fn handle_event(
        &mut self,
        generation: u64,
        event: Event,
    ) -> Result<EventOutcome, HeadersError> {
        if generation != self.generation {
            debug!(
                generation,
                current = self.generation,
                "discarding event from superseded search"
            );
            return Ok(EventOutcome::Stale);
        }
        match event {
            Event::Found { message } => self.on_found(message)?,
            Event::Updated { message, is_move } => {
                debug!(docid = %message.docid, is_move, "update");
                self.surface.update(
                    message,
                    is_move,
                    true,
                    &self.formatter,
                    &mut self.frontend,
                )?;
            }
            Event::Removed { docid } => {
                debug!(%docid, "remove");
                self.surface.remove(docid, &mut self.frontend);
            }
            Event::Complete { count } => self.on_complete(count),
        }
        Ok(EventOutcome::Applied)
    }

    fn on_found(&mut self, message: MessageRecord) -> Result<(), HeadersError> {
        if self.state == SessionState::Searching {
            self.state = SessionState::Rendering;
        }
        let prefix = match (&message.thread, self.options.threaded) {
            (Some(thread), true) => self.engine.compute_prefix(thread),
            _ => String::new(),
        };
        let docid = message.docid;
        let row = Row::build(message, prefix, &self.formatter).map_err(|e| {
            warn!(%docid, error = %e, "failed to render header row");
            e
        })?;
        self.surface.insert(row, None);
        Ok(())
    }

    fn on_complete(&mut self, count: u32) {
        let banner = if count == 0 { NO_MATCHES } else { END_OF_RESULTS };
        self.surface.set_banner(Some(banner));

        let prior = self
            .prior_highlight
            .take()
            .filter(|id| self.surface.contains(*id));
        let target = self.target_msgid.take().and_then(|msgid| {
            self.surface
                .find_next(|m| m.message_id == msgid, None, false)
        });
        if let Some(id) = prior.or(target) {
            self.surface.set_cursor(id);
            self.surface.highlight(id);
        } else if let Some(first) = self.surface.first() {
            self.surface.set_cursor(first);
        }

        if std::mem::take(&mut self.auto_view) {
            if let Some(id) = self.surface.cursor() {
                self.request_view(id);
            }
        }

        if count > 0 && self.surface.is_empty() {
            warn!(count, "index reported matches but no rows are shown");
        }
        info!(generation = self.generation, count, "search complete");
        self.state = SessionState::Complete;
        self.last_count = Some(count);
        self.frontend.results_ready(count);
        if let Some(hook) = self.results_hook.as_mut() {
            hook(count);
        }
    }

    fn request_view(&mut self, id: DocId) {
        if let Some(row) = self.surface.get(id) {
            self.backend.fetch_body(id);
            self.frontend.view_message(row.message());
        }
    }

    /// Set or clear the mark indicator of one row.
    pub fn mark(&mut self, doc_id: DocId, mark: Option<Mark>) -> Result<(), HeadersError> {
        self.surface.set_mark(doc_id, mark, &self.formatter)
    }

    pub fn remove_header(&mut self, doc_id: DocId) -> Result<(), HeadersError> {
        self.surface.remove_header(doc_id, &mut self.frontend)
    }

    /// Mark every row whose `field` matches `pattern`. Contact fields match
    /// against each name and address separately. Returns the number of rows
    /// marked.
    pub fn mark_pattern(
        &mut self,
        field: &FieldId,
        pattern: &Regex,
        mark: Option<Mark>,
    ) -> Result<usize, HeadersError> {
        let mut matched = Vec::new();
        let mut failure = None;
        let formatter = &self.formatter;
        self.surface.for_each(|msg| {
            let contacts = match field {
                FieldId::From => Some(&msg.from),
                FieldId::To => Some(&msg.to),
                FieldId::Cc => Some(&msg.cc),
                _ => None,
            };
            let hit = match contacts {
                Some(list) => list.iter().any(|c| {
                    c.name.as_deref().is_some_and(|n| pattern.is_match(n))
                        || c.email.as_deref().is_some_and(|e| pattern.is_match(e))
                }),
                None => match formatter.field_value(field, msg, "") {
                    Ok(value) => pattern.is_match(&value),
                    Err(e) => {
                        failure.get_or_insert(e);
                        false
                    }
                },
            };
            if hit {
                matched.push(msg.docid);
            }
        });
        if let Some(e) = failure {
            return Err(e);
        }
        for id in &matched {
            self.surface.set_mark(*id, mark, &self.formatter)?;
        }
        Ok(matched.len())
    }

    /// Mark the whole thread of `doc_id`, or only the subthread rooted at it.
    pub fn mark_thread(
        &mut self,
        doc_id: DocId,
        subthread: bool,
        mark: Option<Mark>,
    ) -> Result<usize, HeadersError> {
        let row = self
            .surface
            .get(doc_id)
            .ok_or(HeadersError::NotFound(doc_id))?;
        let path = row.thread().map(|t| {
            if subthread {
                t.sort_path.clone()
            } else {
                t.root_path().to_string()
            }
        });

        let mut matched = Vec::new();
        match path {
            Some(path) if !path.is_empty() => self.surface.for_each(|msg| {
                if msg.thread.as_ref().is_some_and(|t| t.is_within(&path)) {
                    matched.push(msg.docid);
                }
            }),
            _ => matched.push(doc_id),
        }
        for id in &matched {
            self.surface.set_mark(*id, mark, &self.formatter)?;
        }
        Ok(matched.len())
    }

    /// Move the cursor and highlight the row it lands on. An open detail
    /// view follows the cursor.
    pub fn move_cursor(&mut self, delta: isize) -> Option<DocId> {
        let id = self.surface.move_cursor(delta)?;
        self.land_on(id);
        Some(id)
    }

    pub fn move_to_next_matching<P>(&mut self, pred: P, backward: bool) -> Option<DocId>
    where
        P: Fn(&MessageRecord) -> bool,
    {
        let id = self
            .surface
            .find_next(pred, self.surface.cursor(), backward)?;
        self.surface.set_cursor(id);
        self.land_on(id);
        Some(id)
    }

    pub fn move_to_next_unread(&mut self, backward: bool) -> Option<DocId> {
        self.move_to_next_matching(MessageRecord::is_unread, backward)
    }

    fn land_on(&mut self, id: DocId) {
        self.surface.highlight(id);
        if self.frontend.viewed_message().is_some() {
            self.request_view(id);
        }
    }

    pub fn current_message(&self) -> Option<&MessageRecord> {
        let id = self.surface.cursor()?;
        self.surface.get(id).map(Row::message)
    }

    /// Open the cursor row in the detail view.
    pub fn view_current(&mut self) -> Option<DocId> {
        let id = self.surface.cursor()?;
        self.surface.highlight(id);
        self.request_view(id);
        Some(id)
    }

    /// Detach the headers list; events still in flight no longer insert rows.
    pub fn teardown(&mut self) {
        self.surface.teardown();
        self.state = SessionState::Idle;
        info!(generation = self.generation, "headers list torn down");
    }

    pub fn set_sort(&mut self, field: SortField, direction: SortDirection) {
        self.options.sort_field = field;
        self.options.sort_direction = direction;
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{RecordingBackend, RecordingFrontend};
    use super::*;
    use crate::config::Config;
    use crate::message::{Contact, Flag, ThreadDescriptor};
    use std::cell::Cell;
    use std::rc::Rc;

    type Session = SearchSession<RecordingBackend, RecordingFrontend>;

    fn session_with(toml: &str) -> Session {
        let config = Config::parse(toml).unwrap().headers;
        SearchSession::new(
            &config,
            FieldRegistry::new(),
            RecordingBackend::default(),
            RecordingFrontend::default(),
        )
        .unwrap()
    }

    fn session() -> Session {
        session_with("[headers]\nfields = [{ field = \"from\", width = 6 }, { field = \"subject\" }]")
    }

    fn msg(id: u32, subject: &str) -> MessageRecord {
        let mut m = MessageRecord::new(DocId(id));
        m.subject = subject.to_string();
        m.message_id = format!("<{}@example.com>", id);
        m.from = vec![Contact {
            name: Some(format!("u{}", id)),
            email: Some(format!("u{}@example.com", id)),
        }];
        m
    }

    fn threaded(id: u32, path: &str, thread: ThreadDescriptor) -> MessageRecord {
        let mut m = msg(id, &format!("s{}", id));
        m.thread = Some(ThreadDescriptor {
            sort_path: path.to_string(),
            ..thread
        });
        m
    }

    fn found(s: &mut Session, m: MessageRecord) {
        let generation = s.generation();
        assert_eq!(
            s.handle_event(generation, Event::Found { message: m }).unwrap(),
            EventOutcome::Applied
        );
    }

    fn complete(s: &mut Session, count: u32) {
        let generation = s.generation();
        s.handle_event(generation, Event::Complete { count }).unwrap();
    }

    fn ids(s: &Session) -> Vec<u32> {
        s.surface().rows().map(|r| r.doc_id().0).collect()
    }

    #[test]
    fn test_search_flow_three_results() {
        let mut s = session_with("[headers]\nresults_limit = 500");
        s.search("flag:unread", false, None, false);
        assert_eq!(s.state(), SessionState::Searching);
        assert_eq!(s.surface().banner(), Some(SEARCHING));

        let (generation, request) = &s.backend().queries[0];
        assert_eq!(*generation, 1);
        assert_eq!(request.expr, "flag:unread");
        assert_eq!(request.limit, Some(500));

        for id in [3, 1, 2] {
            found(&mut s, msg(id, "hello"));
        }
        assert_eq!(s.state(), SessionState::Rendering);
        complete(&mut s, 3);

        assert_eq!(ids(&s), vec![3, 1, 2]);
        assert_eq!(s.state(), SessionState::Complete);
        assert_eq!(s.surface().banner(), Some(END_OF_RESULTS));
        assert_eq!(s.surface().highlighted(), None);
        assert_eq!(s.surface().cursor(), Some(DocId(3)));
        assert_eq!(s.frontend().ready, vec![3]);
    }

    #[test]
    fn test_empty_result_banner() {
        let mut s = session();
        s.search("nothing", false, None, false);
        complete(&mut s, 0);
        assert_eq!(s.surface().banner(), Some(NO_MATCHES));
        assert_eq!(s.surface().cursor(), None);
    }

    #[test]
    fn test_target_message_is_highlighted_and_viewed() {
        let mut s = session();
        s.search("x", false, Some("<2@example.com>"), true);
        for id in 1..=3 {
            found(&mut s, msg(id, "m"));
        }
        complete(&mut s, 3);
        assert_eq!(s.surface().cursor(), Some(DocId(2)));
        assert_eq!(s.surface().highlighted(), Some(DocId(2)));
        assert_eq!(s.frontend().shown, vec![DocId(2)]);
        assert_eq!(s.backend().bodies, vec![DocId(2)]);

        // target and auto-view are one-shot
        s.rerun();
        for id in 1..=3 {
            found(&mut s, msg(id, "m"));
        }
        complete(&mut s, 3);
        assert_eq!(s.frontend().shown.len(), 1);
    }

    #[test]
    fn test_rerun_restores_prior_highlight() {
        let mut s = session();
        s.search("x", false, None, false);
        for id in 1..=3 {
            found(&mut s, msg(id, "m"));
        }
        complete(&mut s, 3);
        s.move_cursor(2);
        assert_eq!(s.surface().highlighted(), Some(DocId(3)));

        assert!(s.rerun());
        assert_eq!(s.history().len(HistoryStack::Past), 0);
        for id in 1..=3 {
            found(&mut s, msg(id, "m"));
        }
        complete(&mut s, 3);
        assert_eq!(s.surface().cursor(), Some(DocId(3)));
        assert_eq!(s.surface().highlighted(), Some(DocId(3)));
    }

    #[test]
    fn test_stale_events_are_discarded() {
        let mut s = session();
        s.search("first", false, None, false);
        let old = s.generation();
        s.search("second", false, None, false);

        let outcome = s
            .handle_event(old, Event::Found { message: msg(1, "late") })
            .unwrap();
        assert_eq!(outcome, EventOutcome::Stale);
        let outcome = s.handle_event(old, Event::Complete { count: 1 }).unwrap();
        assert_eq!(outcome, EventOutcome::Stale);
        assert!(s.surface().is_empty());
        assert_eq!(s.state(), SessionState::Searching);
    }

    #[test]
    fn test_history_navigation_reruns_queries() {
        let mut s = session();
        s.search("a", false, None, false);
        s.search("b", false, None, false);
        s.search("c", false, None, false);
        assert_eq!(
            s.history().entries(HistoryStack::Past).collect::<Vec<_>>(),
            vec!["b", "a"]
        );

        assert_eq!(s.navigate_history(HistoryStack::Past).unwrap(), "b");
        assert_eq!(s.current_query(), Some("b"));
        assert_eq!(s.history().entries(HistoryStack::Future).next(), Some("c"));

        assert_eq!(s.navigate_history(HistoryStack::Future).unwrap(), "c");
        assert_eq!(s.history().entries(HistoryStack::Past).next(), Some("b"));
        assert_eq!(
            s.navigate_history(HistoryStack::Future),
            Err(HeadersError::HistoryEmpty(HistoryStack::Future))
        );

        let last = s.backend().queries.last().unwrap();
        assert_eq!(last.1.expr, "c");

        s.forget_history();
        assert_eq!(s.history().len(HistoryStack::Past), 0);
    }

    #[test]
    fn test_new_search_keeps_future_stack() {
        let mut s = session();
        s.search("a", false, None, false);
        s.search("b", false, None, false);
        s.navigate_history(HistoryStack::Past).unwrap();
        s.search("z", false, None, false);
        assert_eq!(s.history().entries(HistoryStack::Future).next(), Some("b"));
        assert_eq!(s.history().entries(HistoryStack::Past).next(), Some("a"));
    }

    #[test]
    fn test_query_rewrite_applies_to_backend_only() {
        let mut s = session();
        s.set_query_rewrite(Box::new(|q| format!("({}) AND NOT flag:trashed", q)));
        s.search("from:ann", false, None, false);
        s.search("from:bob", false, None, false);
        assert_eq!(s.backend().queries[1].1.expr, "(from:bob) AND NOT flag:trashed");
        assert_eq!(s.history().entries(HistoryStack::Past).next(), Some("from:ann"));
    }

    #[test]
    fn test_alias_rewrite_expands_whole_words() {
        let mut aliases = BTreeMap::new();
        aliases.insert("inbox".to_string(), "maildir:/inbox".to_string());
        aliases.insert("todo".to_string(), "flag:flagged NOT flag:trashed".to_string());
        let mut s = session();
        s.set_query_rewrite(alias_rewrite(aliases));
        s.search("inbox  todo inboxes", false, None, false);
        assert_eq!(
            s.backend().queries[0].1.expr,
            "maildir:/inbox flag:flagged NOT flag:trashed inboxes"
        );
        assert_eq!(s.current_query(), Some("inbox  todo inboxes"));
    }

    #[test]
    fn test_thread_prefixes_in_rows() {
        let mut s = session_with("[headers]\nfields = [{ field = \"subject\" }]");
        s.search("x", false, None, false);
        found(
            &mut s,
            threaded(
                1,
                "0000",
                ThreadDescriptor {
                    has_child: true,
                    ..Default::default()
                },
            ),
        );
        found(
            &mut s,
            threaded(
                2,
                "0000:0000",
                ThreadDescriptor {
                    depth: 1,
                    is_last_child: true,
                    ..Default::default()
                },
            ),
        );
        let lines = s.surface().lines();
        assert_eq!(lines, vec!["  s1".to_string(), "  Ls2".to_string()]);
    }

    #[test]
    fn test_unthreaded_rows_have_no_prefix() {
        let mut s = session_with(
            "[headers]\nshow_threads = false\nfields = [{ field = \"subject\" }]",
        );
        s.search("x", false, None, false);
        assert!(!s.backend().queries[0].1.threaded);
        found(
            &mut s,
            threaded(
                2,
                "0000:0000",
                ThreadDescriptor {
                    depth: 1,
                    is_last_child: true,
                    ..Default::default()
                },
            ),
        );
        assert_eq!(s.surface().lines(), vec!["  s2".to_string()]);
    }

    #[test]
    fn test_update_event_keeps_thread_prefix_and_is_idempotent() {
        let mut s = session_with("[headers]\nfields = [{ field = \"subject\" }]");
        s.search("x", false, None, false);
        found(
            &mut s,
            threaded(
                1,
                "0000",
                ThreadDescriptor {
                    has_child: true,
                    ..Default::default()
                },
            ),
        );
        let child = threaded(
            2,
            "0000:0000",
            ThreadDescriptor {
                depth: 1,
                is_last_child: true,
                ..Default::default()
            },
        );
        found(&mut s, child.clone());
        complete(&mut s, 2);
        let before = s.surface().get(DocId(2)).unwrap().rendered_text().to_string();

        let mut update = child.clone();
        update.thread = None;
        let generation = s.generation();
        s.handle_event(
            generation,
            Event::Updated {
                message: update,
                is_move: false,
            },
        )
        .unwrap();
        let after = s.surface().get(DocId(2)).unwrap();
        assert_eq!(after.rendered_text(), before);
        assert_eq!(after.thread(), child.thread.as_ref());
    }

    #[test]
    fn test_moved_update_removes_row_and_closes_view() {
        let mut s = session();
        s.search("x", false, None, false);
        for id in [5, 7, 9] {
            found(&mut s, msg(id, "m"));
        }
        complete(&mut s, 3);
        s.frontend_mut().viewed = Some(DocId(7));

        let generation = s.generation();
        s.handle_event(
            generation,
            Event::Updated {
                message: msg(7, "m"),
                is_move: true,
            },
        )
        .unwrap();
        assert_eq!(ids(&s), vec![5, 9]);
        assert_eq!(s.frontend().closed, 1);
    }

    #[test]
    fn test_removed_event_for_absent_row_is_silent() {
        let mut s = session();
        s.search("x", false, None, false);
        found(&mut s, msg(1, "m"));
        let generation = s.generation();
        let outcome = s
            .handle_event(generation, Event::Removed { docid: DocId(99) })
            .unwrap();
        assert_eq!(outcome, EventOutcome::Applied);
        assert_eq!(ids(&s), vec![1]);
        assert_eq!(s.remove_header(DocId(99)), Err(HeadersError::NotFound(DocId(99))));
    }

    #[test]
    fn test_mark_pattern_and_mark_thread() {
        let mut s = session_with("[headers]\nfields = [{ field = \"subject\" }]");
        s.search("x", false, None, false);
        found(&mut s, threaded(1, "0000", ThreadDescriptor { has_child: true, ..Default::default() }));
        found(
            &mut s,
            threaded(
                2,
                "0000:0000",
                ThreadDescriptor {
                    depth: 1,
                    has_child: true,
                    ..Default::default()
                },
            ),
        );
        found(
            &mut s,
            threaded(
                3,
                "0000:0000:0000",
                ThreadDescriptor {
                    depth: 2,
                    is_last_child: true,
                    ..Default::default()
                },
            ),
        );
        found(&mut s, threaded(4, "0001", ThreadDescriptor::default()));
        complete(&mut s, 4);

        assert_eq!(s.mark_thread(DocId(3), false, Some(Mark::Read)).unwrap(), 3);
        assert_eq!(s.mark_thread(DocId(2), true, Some(Mark::Delete)).unwrap(), 2);
        let marks: Vec<Option<Mark>> = s.surface().rows().map(|r| r.mark()).collect();
        assert_eq!(
            marks,
            vec![Some(Mark::Read), Some(Mark::Delete), Some(Mark::Delete), None]
        );
        assert!(s.surface().get(DocId(2)).unwrap().rendered_text().starts_with("D "));

        let pattern = Regex::new("^u4@").unwrap();
        assert_eq!(s.mark_pattern(&FieldId::From, &pattern, Some(Mark::Flag)).unwrap(), 1);
        assert_eq!(s.surface().get(DocId(4)).unwrap().mark(), Some(Mark::Flag));

        let subject = Regex::new("^s[12]$").unwrap();
        assert_eq!(s.mark_pattern(&FieldId::Subject, &subject, None).unwrap(), 2);
        assert_eq!(s.surface().get(DocId(1)).unwrap().mark(), None);

        assert_eq!(
            s.mark_thread(DocId(42), false, Some(Mark::Read)),
            Err(HeadersError::NotFound(DocId(42)))
        );
        assert_eq!(
            s.mark(DocId(42), Some(Mark::Read)),
            Err(HeadersError::NotFound(DocId(42)))
        );
    }

    #[test]
    fn test_next_unread_and_view_follows_cursor() {
        let mut s = session();
        s.search("x", false, None, false);
        for id in 1..=4 {
            let mut m = msg(id, "m");
            if id % 2 == 0 {
                m.flags.push(Flag::Unread);
            }
            found(&mut s, m);
        }
        complete(&mut s, 4);
        assert_eq!(s.move_to_next_unread(false), Some(DocId(2)));
        assert_eq!(s.move_to_next_unread(false), Some(DocId(4)));
        assert_eq!(s.move_to_next_unread(false), None);
        assert_eq!(s.move_to_next_unread(true), Some(DocId(2)));
        assert_eq!(s.current_message().map(|m| m.docid), Some(DocId(2)));
        assert!(s.frontend().shown.is_empty());

        assert_eq!(s.view_current(), Some(DocId(2)));
        s.move_cursor(1);
        assert_eq!(s.frontend().shown, vec![DocId(2), DocId(3)]);
        assert_eq!(s.backend().bodies, vec![DocId(2), DocId(3)]);
    }

    #[test]
    fn test_results_hook_and_options() {
        let mut s = session();
        let seen = Rc::new(Cell::new(0));
        let hook_seen = Rc::clone(&seen);
        s.set_results_hook(Box::new(move |count| hook_seen.set(count)));
        s.set_sort(SortField::Subject, SortDirection::Ascending);
        s.options_mut().skip_duplicates = false;
        s.search("x", false, None, false);
        complete(&mut s, 7);
        assert_eq!(seen.get(), 7);
        let request = &s.backend().queries[0].1;
        assert_eq!(request.sort_field, SortField::Subject);
        assert_eq!(request.sort_direction, SortDirection::Ascending);
        assert!(!request.skip_duplicates);
    }

    #[test]
    fn test_event_json_shape() {
        let event: Event = serde_json::from_str(
            r#"{"type": "updated", "message": {"docid": 7}, "is_move": true}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            Event::Updated {
                message: MessageRecord::new(DocId(7)),
                is_move: true,
            }
        );
        let event: Event = serde_json::from_str(r#"{"type": "removed", "docid": 3}"#).unwrap();
        assert_eq!(event, Event::Removed { docid: DocId(3) });
    }
}
