use crate::backend::{self, ChannelBackend, IndexCommand, IndexResponse};
use crate::config::Config;
use crate::fields::{personal_contacts_hook, FieldId, FieldRegistry};
use crate::history::HistoryStack;
use crate::message::{DocId, Flag, Mark, MessageRecord};
use crate::render::AnsiWriter;
use crate::session::{
    alias_rewrite, Event, EventOutcome, Frontend, SearchSession, SortDirection, SortField,
};
use crate::store::MessageStore;
use regex::Regex;
use serde_json::{json, Value};
use std::io::{self, BufRead, Write};
use std::sync::mpsc;
use tracing::{info, warn};

/// Detail view stand-in: remembers which message is open.
#[derive(Debug, Default)]
struct CliFrontend {
    viewed: Option<DocId>,
}

impl Frontend for CliFrontend {
    fn viewed_message(&self) -> Option<DocId> {
        self.viewed
    }

    fn view_message(&mut self, msg: &MessageRecord) {
        self.viewed = Some(msg.docid);
    }

    fn close_message_view(&mut self) {
        self.viewed = None;
    }
}

struct CliState {
    session: SearchSession<ChannelBackend, CliFrontend>,
    resp_rx: mpsc::Receiver<IndexResponse>,
    color: bool,
    last_body: Option<(DocId, String)>,
}

impl CliState {
    fn new(config: &Config, store: MessageStore, color: bool) -> Result<Self, String> {
        let headers = &config.headers;
        let registry = FieldRegistry::from_config(&headers.custom_fields);
        let my_email = Regex::new(&headers.my_email_regex)
            .map_err(|e| format!("invalid my_email_regex: {}", e))?;
        let (cmd_tx, resp_rx) = backend::spawn(store);
        let mut session = SearchSession::new(
            headers,
            registry,
            ChannelBackend::new(cmd_tx),
            CliFrontend::default(),
        )
        .map_err(|e| e.to_string())?;
        session.set_query_rewrite(alias_rewrite(headers.query_aliases.clone()));
        session.set_properties_hook(personal_contacts_hook(my_email));
        session.set_results_hook(Box::new(|count: u32| info!(count, "results ready")));
        Ok(CliState {
            session,
            resp_rx,
            color,
            last_body: None,
        })
    }

    /// Feed index responses into the session until every outstanding
    /// command has finished. Returns the errors reported on the way.
    fn pump(&mut self) -> Result<Vec<String>, String> {
        let mut errors = Vec::new();
        while self.session.backend().in_flight() > 0 {
            let resp = self
                .resp_rx
                .recv()
                .map_err(|_| "index channel closed".to_string())?;
            match resp {
                IndexResponse::Event { generation, event } => {
                    if let Err(e) = self.session.handle_event(generation, event) {
                        warn!("event not applied: {}", e);
                        errors.push(e.to_string());
                    }
                }
                IndexResponse::Body { docid, result } => match *result {
                    Ok((_, body)) => self.last_body = Some((docid, body)),
                    Err(e) => errors.push(e),
                },
                IndexResponse::Error(e) => errors.push(e),
                IndexResponse::Done => self.session.backend_mut().finish_one(),
            }
        }
        Ok(errors)
    }

    fn send_and_pump(&mut self, cmd: IndexCommand) -> Result<Vec<String>, String> {
        self.session.backend_mut().send(cmd)?;
        self.pump()
    }

    fn listing(&self) -> Value {
        let surface = self.session.surface();
        let highlighted = surface.highlighted();
        let rows: Vec<Value> = surface
            .rows()
            .map(|row| {
                json!({
                    "docid": row.doc_id(),
                    "text": row.rendered_text(),
                    "mark": row.mark(),
                    "highlighted": highlighted == Some(row.doc_id()),
                })
            })
            .collect();
        json!({
            "generation": self.session.generation(),
            "state": self.session.state(),
            "count": self.session.last_count(),
            "banner": surface.banner(),
            "cursor": surface.cursor(),
            "rows": rows,
        })
    }
}

fn ok_response(data: Value) -> Value {
    let mut obj = match data {
        Value::Object(m) => m,
        _ => {
            let mut m = serde_json::Map::new();
            m.insert("data".to_string(), data);
            m
        }
    };
    obj.insert("ok".to_string(), Value::Bool(true));
    Value::Object(obj)
}

fn err_response(msg: &str) -> Value {
    json!({"ok": false, "error": msg})
}

fn with_warnings(mut data: Value, warnings: Vec<String>) -> Value {
    if !warnings.is_empty() {
        data["warnings"] = json!(warnings);
    }
    ok_response(data)
}

fn get_docid(input: &Value) -> Result<DocId, String> {
    input
        .get("docid")
        .and_then(|v| v.as_u64())
        .and_then(|n| u32::try_from(n).ok())
        .map(DocId)
        .ok_or_else(|| "missing 'docid' field".to_string())
}

/// `"mark"` absent or null clears the mark.
fn get_mark(input: &Value) -> Result<Option<Mark>, String> {
    match input.get("mark") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(name)) => Mark::parse(name)
            .map(Some)
            .ok_or_else(|| format!("unknown mark '{}'", name)),
        Some(_) => Err("'mark' must be a string".to_string()),
    }
}

fn get_bool(input: &Value, key: &str) -> bool {
    input.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

fn dispatch(state: &mut CliState, input: &Value) -> Value {
    let command = match input.get("command").and_then(|v| v.as_str()) {
        Some(c) => c,
        None => return err_response("missing 'command' field"),
    };

    let result = match command {
        "search" => cmd_search(state, input),
        "rerun" => cmd_rerun(state),
        "back" => cmd_navigate(state, HistoryStack::Past),
        "forward" => cmd_navigate(state, HistoryStack::Future),
        "history" => Ok(cmd_history(state)),
        "forget_history" => {
            state.session.forget_history();
            Ok(ok_response(json!({})))
        }
        "inject" => cmd_inject(state, input),
        "mark" => cmd_mark(state, input),
        "mark_pattern" => cmd_mark_pattern(state, input),
        "mark_thread" => cmd_mark_thread(state, input),
        "remove_header" => cmd_remove_header(state, input),
        "set_flags" => cmd_set_flags(state, input),
        "move" => cmd_move(state, input),
        "delete" => cmd_delete(state, input),
        "move_cursor" => cmd_move_cursor(state, input),
        "next_unread" => cmd_next_unread(state, input),
        "current" => Ok(cmd_current(state)),
        "view" => cmd_view(state),
        "close_view" => {
            state.session.frontend_mut().close_message_view();
            Ok(ok_response(json!({})))
        }
        "render" => cmd_render(state, input),
        "field" => cmd_field(state, input),
        "sort" => cmd_sort(state, input),
        "toggle" => cmd_toggle(state, input),
        "limit" => cmd_limit(state, input),
        "status" => Ok(cmd_status(state)),
        _ => Err(format!("unknown command '{}'", command)),
    };
    result.unwrap_or_else(|e| err_response(&e))
}

// --- Command handlers ---

fn cmd_search(state: &mut CliState, input: &Value) -> Result<Value, String> {
    let query = input
        .get("query")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "missing 'query' field".to_string())?;
    let target = input.get("target_msgid").and_then(|v| v.as_str());
    state.session.search(
        query,
        get_bool(input, "ignore_history"),
        target,
        get_bool(input, "auto_view"),
    );
    let warnings = state.pump()?;
    let mut data = state.listing();
    data["viewed"] = json!(state.session.frontend().viewed);
    Ok(with_warnings(data, warnings))
}

fn cmd_rerun(state: &mut CliState) -> Result<Value, String> {
    if !state.session.rerun() {
        return Err("no query to rerun".to_string());
    }
    let warnings = state.pump()?;
    Ok(with_warnings(state.listing(), warnings))
}

fn cmd_navigate(state: &mut CliState, which: HistoryStack) -> Result<Value, String> {
    let query = state
        .session
        .navigate_history(which)
        .map_err(|e| e.to_string())?;
    let warnings = state.pump()?;
    let mut data = state.listing();
    data["query"] = json!(query);
    Ok(with_warnings(data, warnings))
}

fn cmd_history(state: &CliState) -> Value {
    let history = state.session.history();
    ok_response(json!({
        "current": state.session.current_query(),
        "past": history.entries(HistoryStack::Past).collect::<Vec<_>>(),
        "future": history.entries(HistoryStack::Future).collect::<Vec<_>>(),
    }))
}

fn cmd_inject(state: &mut CliState, input: &Value) -> Result<Value, String> {
    let event_json = input
        .get("event")
        .cloned()
        .ok_or_else(|| "missing 'event' field".to_string())?;
    let event: Event =
        serde_json::from_value(event_json).map_err(|e| format!("invalid event: {}", e))?;
    let generation = input
        .get("generation")
        .and_then(|v| v.as_u64())
        .unwrap_or_else(|| state.session.generation());
    let outcome = state
        .session
        .handle_event(generation, event)
        .map_err(|e| e.to_string())?;
    let mut data = state.listing();
    data["outcome"] = json!(match outcome {
        EventOutcome::Applied => "applied",
        EventOutcome::Stale => "stale",
    });
    Ok(ok_response(data))
}

fn cmd_mark(state: &mut CliState, input: &Value) -> Result<Value, String> {
    let docid = get_docid(input)?;
    let mark = get_mark(input)?;
    state.session.mark(docid, mark).map_err(|e| e.to_string())?;
    Ok(ok_response(json!({"docid": docid, "mark": mark})))
}

fn cmd_mark_pattern(state: &mut CliState, input: &Value) -> Result<Value, String> {
    let field = input
        .get("field")
        .and_then(|v| v.as_str())
        .map(FieldId::parse)
        .ok_or_else(|| "missing 'field' field".to_string())?;
    let pattern = input
        .get("regex")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "missing 'regex' field".to_string())?;
    let regex = Regex::new(pattern).map_err(|e| format!("invalid regex '{}': {}", pattern, e))?;
    let mark = get_mark(input)?;
    let marked = state
        .session
        .mark_pattern(&field, &regex, mark)
        .map_err(|e| e.to_string())?;
    Ok(ok_response(json!({"marked": marked})))
}

fn cmd_mark_thread(state: &mut CliState, input: &Value) -> Result<Value, String> {
    let docid = get_docid(input)?;
    let mark = get_mark(input)?;
    let marked = state
        .session
        .mark_thread(docid, get_bool(input, "subthread"), mark)
        .map_err(|e| e.to_string())?;
    Ok(ok_response(json!({"marked": marked})))
}

fn cmd_remove_header(state: &mut CliState, input: &Value) -> Result<Value, String> {
    let docid = get_docid(input)?;
    state
        .session
        .remove_header(docid)
        .map_err(|e| e.to_string())?;
    Ok(ok_response(state.listing()))
}

fn cmd_set_flags(state: &mut CliState, input: &Value) -> Result<Value, String> {
    let docid = get_docid(input)?;
    let names = input
        .get("flags")
        .and_then(|v| v.as_array())
        .ok_or_else(|| "missing 'flags' array".to_string())?;
    let flags = names
        .iter()
        .map(|v| {
            v.as_str()
                .and_then(Flag::parse)
                .ok_or_else(|| format!("unknown flag {}", v))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let generation = state.session.generation();
    let warnings = state.send_and_pump(IndexCommand::SetFlags {
        generation,
        docid,
        flags,
    })?;
    Ok(with_warnings(state.listing(), warnings))
}

fn cmd_move(state: &mut CliState, input: &Value) -> Result<Value, String> {
    let docid = get_docid(input)?;
    let maildir = input
        .get("maildir")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "missing 'maildir' field".to_string())?
        .to_string();
    let generation = state.session.generation();
    let warnings = state.send_and_pump(IndexCommand::Move {
        generation,
        docid,
        maildir,
    })?;
    let mut data = state.listing();
    data["viewed"] = json!(state.session.frontend().viewed);
    Ok(with_warnings(data, warnings))
}

fn cmd_delete(state: &mut CliState, input: &Value) -> Result<Value, String> {
    let docid = get_docid(input)?;
    let generation = state.session.generation();
    let warnings = state.send_and_pump(IndexCommand::Delete { generation, docid })?;
    Ok(with_warnings(state.listing(), warnings))
}

fn cmd_move_cursor(state: &mut CliState, input: &Value) -> Result<Value, String> {
    let delta = input
        .get("delta")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| "missing 'delta' field".to_string())?;
    let delta = isize::try_from(delta).map_err(|_| "delta out of range".to_string())?;
    let cursor = state.session.move_cursor(delta);
    let warnings = state.pump()?;
    Ok(with_warnings(json!({"cursor": cursor}), warnings))
}

fn cmd_next_unread(state: &mut CliState, input: &Value) -> Result<Value, String> {
    let cursor = state
        .session
        .move_to_next_unread(get_bool(input, "backward"));
    let warnings = state.pump()?;
    Ok(with_warnings(json!({"cursor": cursor}), warnings))
}

fn cmd_current(state: &CliState) -> Value {
    ok_response(json!({"message": state.session.current_message()}))
}

fn cmd_view(state: &mut CliState) -> Result<Value, String> {
    let docid = state
        .session
        .view_current()
        .ok_or_else(|| "no current message".to_string())?;
    let warnings = state.pump()?;
    let body = match &state.last_body {
        Some((id, body)) if *id == docid => Some(body.clone()),
        _ => None,
    };
    Ok(with_warnings(
        json!({
            "docid": docid,
            "message": state.session.current_message(),
            "body": body,
        }),
        warnings,
    ))
}

fn cmd_render(state: &mut CliState, input: &Value) -> Result<Value, String> {
    let color = input
        .get("color")
        .and_then(|v| v.as_bool())
        .unwrap_or(state.color);
    let text = render_surface(&state.session, color).map_err(|e| e.to_string())?;
    Ok(ok_response(json!({"text": text})))
}

fn cmd_field(state: &CliState, input: &Value) -> Result<Value, String> {
    let field = input
        .get("field")
        .and_then(|v| v.as_str())
        .map(FieldId::parse)
        .ok_or_else(|| "missing 'field' field".to_string())?;
    let width = match input.get("width") {
        None | Some(Value::Null) => None,
        Some(v) => Some(
            v.as_u64()
                .and_then(|w| usize::try_from(w).ok())
                .ok_or_else(|| "'width' must be a non-negative integer".to_string())?,
        ),
    };
    let surface = state.session.surface();
    let row = surface
        .cursor()
        .and_then(|id| surface.get(id))
        .ok_or_else(|| "no current message".to_string())?;
    let text = state
        .session
        .formatter()
        .render(&field, row.message(), row.prefix(), width)
        .map_err(|e| e.to_string())?;
    Ok(ok_response(json!({"docid": row.doc_id(), "text": text})))
}

fn cmd_sort(state: &mut CliState, input: &Value) -> Result<Value, String> {
    let options = state.session.options().clone();
    let field = match input.get("field").and_then(|v| v.as_str()) {
        Some(name) => {
            SortField::parse(name).ok_or_else(|| format!("unknown sort field '{}'", name))?
        }
        None => options.sort_field,
    };
    let direction = match input.get("direction").and_then(|v| v.as_str()) {
        Some(name) => SortDirection::parse(name)
            .ok_or_else(|| format!("unknown sort direction '{}'", name))?,
        None => options.sort_direction,
    };
    state.session.set_sort(field, direction);
    Ok(ok_response(json!({"options": state.session.options()})))
}

fn cmd_toggle(state: &mut CliState, input: &Value) -> Result<Value, String> {
    let option = input
        .get("option")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "missing 'option' field".to_string())?;
    let options = state.session.options_mut();
    let value = match option {
        "threads" => &mut options.threaded,
        "skip_duplicates" => &mut options.skip_duplicates,
        "include_related" => &mut options.include_related,
        other => return Err(format!("unknown option '{}'", other)),
    };
    *value = !*value;
    Ok(ok_response(json!({"options": state.session.options()})))
}

fn cmd_limit(state: &mut CliState, input: &Value) -> Result<Value, String> {
    let limit = input
        .get("limit")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| "missing 'limit' field".to_string())?;
    state.session.options_mut().limit = match limit {
        -1 => None,
        n if n > 0 => Some(u32::try_from(n).unwrap_or(u32::MAX)),
        n => return Err(format!("limit must be positive or -1, got {}", n)),
    };
    Ok(ok_response(json!({"options": state.session.options()})))
}

fn cmd_status(state: &CliState) -> Value {
    let surface = state.session.surface();
    ok_response(json!({
        "state": state.session.state(),
        "generation": state.session.generation(),
        "query": state.session.current_query(),
        "rows": surface.len(),
        "live": surface.is_live(),
        "count": state.session.last_count(),
        "highlighted": surface.highlighted(),
        "cursor": surface.cursor(),
        "viewed": state.session.frontend().viewed,
        "options": state.session.options(),
    }))
}

fn render_surface<B, F>(session: &SearchSession<B, F>, color: bool) -> io::Result<String>
where
    B: crate::session::IndexBackend,
    F: Frontend,
{
    let header = session.formatter().header_line();
    let mut writer = AnsiWriter::new(Vec::new(), color);
    writer.write_surface(session.surface(), Some(&header))?;
    String::from_utf8(writer.into_inner()).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Run one query and print the header list to stdout.
pub fn run_query(config: &Config, store: MessageStore, query: &str, color: bool) -> Result<(), String> {
    let mut state = CliState::new(config, store, color)?;
    state.session.search(query, false, None, false);
    for warning in state.pump()? {
        eprintln!("Warning: {}", warning);
    }
    let text = render_surface(&state.session, color).map_err(|e| e.to_string())?;
    let stdout = io::stdout();
    let mut stdout = stdout.lock();
    stdout
        .write_all(text.as_bytes())
        .and_then(|_| stdout.flush())
        .map_err(|e| format!("failed to write output: {}", e))
}

pub fn run_cli(config: Config, store: MessageStore, color: bool) -> Result<(), String> {
    let mut state = CliState::new(&config, store, color)?;

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut stdout = stdout.lock();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let input: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                let resp = err_response(&format!("JSON parse error: {}", e));
                let _ = serde_json::to_writer(&mut stdout, &resp);
                let _ = stdout.write_all(b"\n");
                let _ = stdout.flush();
                continue;
            }
        };

        let response = dispatch(&mut state, &input);
        let _ = serde_json::to_writer(&mut stdout, &response);
        let _ = stdout.write_all(b"\n");
        let _ = stdout.flush();
    }

    state.session.teardown();
    Ok(())
}

pub fn print_help_cli() {
    print!(
        r#"mhdr --cli: JSON-over-stdin/stdout CLI mode
===========================================

Protocol: Newline-Delimited JSON (NDJSON)
- Send one JSON object per line to stdin
- Receive one JSON response per line from stdout
- Responses have {{"ok": true, ...}} on success or {{"ok": false, "error": "..."}} on failure

Listings
--------
Commands that change the header list answer with a listing:
   {{"ok": true, "generation": 1, "state": "complete", "count": 2, "banner": "End of search results",
     "cursor": 3, "rows": [{{"docid": 3, "text": "...", "mark": null, "highlighted": false}}, ...]}}
Events that could not be rendered are reported in "warnings".

Search Commands
---------------
search: Run a query. Optional: ignore_history (bool), target_msgid (string), auto_view (bool)
   > {{"command": "search", "query": "flag:unread"}}
rerun: Run the current query again, keeping the position.
   > {{"command": "rerun"}}
back / forward: Walk the query history.
   > {{"command": "back"}}
   < {{"ok": true, "query": "from:ann", ...listing}}
history: Show the history stacks.
   > {{"command": "history"}}
   < {{"ok": true, "current": "flag:unread", "past": ["from:ann"], "future": []}}
forget_history: Empty both stacks.

Query terms: flag:NAME from:TEXT to:TEXT subject:TEXT maildir:PATH[*] tag:NAME msgid:ID,
bare words, *, NOT or -term to negate. Words named in [query_aliases] are expanded first.

Query Options
-------------
sort:   {{"command": "sort", "field": "subject", "direction": "ascending"}}
toggle: {{"command": "toggle", "option": "threads"}}  (threads, skip_duplicates, include_related)
limit:  {{"command": "limit", "limit": 100}}  (-1 = unlimited)
Options apply to the next search or rerun.

Marks
-----
mark:         {{"command": "mark", "docid": 3, "mark": "delete"}}  (null clears)
mark_pattern: {{"command": "mark_pattern", "field": "from", "regex": "^ann@", "mark": "read"}}
mark_thread:  {{"command": "mark_thread", "docid": 3, "subthread": false, "mark": "trash"}}
Marks: delete flag move read refile tag trash unflag unread untrash something

Index Changes
-------------
set_flags: {{"command": "set_flags", "docid": 3, "flags": ["seen", "flagged"]}}
move:      {{"command": "move", "docid": 3, "maildir": "/archive"}}
delete:    {{"command": "delete", "docid": 3}}
inject:    {{"command": "inject", "event": {{"type": "removed", "docid": 3}}, "generation": 1}}
           event types: found, updated (with is_move), removed, complete
           < {{"ok": true, "outcome": "applied" | "stale", ...listing}}
remove_header: {{"command": "remove_header", "docid": 3}}  (display only)

Navigation
----------
move_cursor: {{"command": "move_cursor", "delta": 1}}
next_unread: {{"command": "next_unread", "backward": false}}
current:     {{"command": "current"}}
view:        {{"command": "view"}}  < {{"ok": true, "docid": 3, "message": {{...}}, "body": "..."}}
close_view:  {{"command": "close_view"}}
While a message is viewed, moving the cursor views the new current message.

Output
------
render: {{"command": "render", "color": false}}  < {{"ok": true, "text": "Date ... Subject\n..."}}
field:  {{"command": "field", "field": "subject", "width": 30}}  (current message, width optional)
   < {{"ok": true, "docid": 3, "text": "LRe: Plans ..."}}
status: {{"command": "status"}}
"#
    );
}
