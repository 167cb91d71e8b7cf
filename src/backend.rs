use crate::message::{DocId, Flag, MessageRecord};
use crate::session::{Event, IndexBackend, QueryRequest};
use crate::store::MessageStore;
use std::sync::mpsc;
use std::thread;
use tracing::{debug, warn};

/// Commands sent from the UI thread to the index thread.
pub enum IndexCommand {
    RunQuery {
        generation: u64,
        request: QueryRequest,
    },
    FetchBody {
        docid: DocId,
    },
    SetFlags {
        generation: u64,
        docid: DocId,
        flags: Vec<Flag>,
    },
    Move {
        generation: u64,
        docid: DocId,
        maildir: String,
    },
    Delete {
        generation: u64,
        docid: DocId,
    },
    Shutdown,
}

/// Responses sent from the index thread to the UI thread. Every command
/// except `Shutdown` ends with a `Done`.
pub enum IndexResponse {
    Event { generation: u64, event: Event },
    Body {
        docid: DocId,
        result: Box<Result<(MessageRecord, String), String>>,
    },
    Error(String),
    Done,
}

/// Spawn the index thread. Returns the command sender and response receiver.
pub fn spawn(
    store: MessageStore,
) -> (
    mpsc::Sender<IndexCommand>,
    mpsc::Receiver<IndexResponse>,
) {
    let (cmd_tx, cmd_rx) = mpsc::channel::<IndexCommand>();
    let (resp_tx, resp_rx) = mpsc::channel::<IndexResponse>();

    thread::spawn(move || {
        index_loop(store, cmd_rx, resp_tx);
    });

    (cmd_tx, resp_rx)
}

fn index_loop(
    mut store: MessageStore,
    cmd_rx: mpsc::Receiver<IndexCommand>,
    resp_tx: mpsc::Sender<IndexResponse>,
) {
    let send_event = |generation: u64, event: Event| {
        let _ = resp_tx.send(IndexResponse::Event { generation, event });
    };

    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            IndexCommand::RunQuery {
                generation,
                request,
            } => {
                let results = store.query(&request);
                debug!(generation, expr = %request.expr, found = results.len(), "query");
                let count = results.len() as u32;
                for message in results {
                    send_event(generation, Event::Found { message });
                }
                send_event(generation, Event::Complete { count });
            }
            IndexCommand::FetchBody { docid } => {
                let result = match (store.get(docid), store.body(docid)) {
                    (Some(msg), Some(body)) => Ok((msg.clone(), body.to_string())),
                    _ => Err(format!("no message with docid {}", docid)),
                };
                let _ = resp_tx.send(IndexResponse::Body {
                    docid,
                    result: Box::new(result),
                });
            }
            IndexCommand::SetFlags {
                generation,
                docid,
                flags,
            } => match store.set_flags(docid, flags) {
                Some(message) => send_event(
                    generation,
                    Event::Updated {
                        message,
                        is_move: false,
                    },
                ),
                None => {
                    warn!(%docid, "cannot set flags: unknown message");
                    let _ = resp_tx.send(IndexResponse::Error(format!(
                        "no message with docid {}",
                        docid
                    )));
                }
            },
            IndexCommand::Move {
                generation,
                docid,
                maildir,
            } => match store.move_to(docid, &maildir) {
                Some(message) => send_event(
                    generation,
                    Event::Updated {
                        message,
                        is_move: true,
                    },
                ),
                None => {
                    warn!(%docid, maildir = %maildir, "cannot move: unknown message");
                    let _ = resp_tx.send(IndexResponse::Error(format!(
                        "no message with docid {}",
                        docid
                    )));
                }
            },
            IndexCommand::Delete { generation, docid } => {
                if store.delete(docid) {
                    send_event(generation, Event::Removed { docid });
                } else {
                    let _ = resp_tx.send(IndexResponse::Error(format!(
                        "no message with docid {}",
                        docid
                    )));
                }
            }
            IndexCommand::Shutdown => {
                break;
            }
        }
        let _ = resp_tx.send(IndexResponse::Done);
    }
}

/// [`IndexBackend`] that forwards requests to the index thread.
/// Counts commands whose `Done` has not been received yet.
pub struct ChannelBackend {
    cmd_tx: mpsc::Sender<IndexCommand>,
    in_flight: usize,
}

impl ChannelBackend {
    pub fn new(cmd_tx: mpsc::Sender<IndexCommand>) -> Self {
        ChannelBackend {
            cmd_tx,
            in_flight: 0,
        }
    }

    pub fn send(&mut self, cmd: IndexCommand) -> Result<(), String> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| "index channel closed".to_string())?;
        self.in_flight += 1;
        Ok(())
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Record one received `Done`.
    pub fn finish_one(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }
}

impl IndexBackend for ChannelBackend {
    fn run_query(&mut self, generation: u64, request: QueryRequest) {
        if let Err(e) = self.send(IndexCommand::RunQuery {
            generation,
            request,
        }) {
            warn!(generation, "failed to submit query: {}", e);
        }
    }

    fn fetch_body(&mut self, docid: DocId) {
        if let Err(e) = self.send(IndexCommand::FetchBody { docid }) {
            warn!(%docid, "failed to request message body: {}", e);
        }
    }
}

impl Drop for ChannelBackend {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(IndexCommand::Shutdown);
    }
}
