use std::collections::{BTreeSet, VecDeque};
use std::io::Cursor;

use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use logscope_logs::{
    FileContext, LineParser, StreamError, StreamEvent, StreamOutcome, collect_entry_keys,
    parse_stream,
};

use crate::error::{Result, WorkerError};
use crate::message::{Envelope, FileData, FileSource, ParseCommand, ParseEvent};

type Reader = Box<dyn AsyncRead + Unpin + Send>;

/// Handle to a running parse worker
pub struct ParseWorker {
    tx: mpsc::UnboundedSender<Envelope<ParseCommand>>,
    task: JoinHandle<()>,
}

impl ParseWorker {
    /// Spawn the worker on the current runtime. Events arrive on the returned
    /// receiver in emission order.
    pub fn spawn(chunk_size: usize) -> (Self, mpsc::UnboundedReceiver<Envelope<ParseEvent>>) {
        let (tx, inbox) = mpsc::unbounded_channel();
        let (outbox, events) = mpsc::unbounded_channel();

        let actor = ParseActor {
            chunk_size,
            session: ParseSession::default(),
            inbox,
            outbox,
            deferred: VecDeque::new(),
        };
        let task = tokio::spawn(actor.run());

        (Self { tx, task }, events)
    }

    pub fn send(&self, command: ParseCommand) -> Result<()> {
        self.tx
            .send(Envelope::new(command))
            .map_err(|_| WorkerError::Closed)
    }

    pub fn send_with_id(&self, request_id: u64, command: ParseCommand) -> Result<()> {
        self.tx
            .send(Envelope::with_id(request_id, command))
            .map_err(|_| WorkerError::Closed)
    }

    pub fn cancel(&self) -> Result<()> {
        self.send(ParseCommand::Cancel)
    }

    /// Close the inbox and wait for queued commands to drain
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.task.await;
    }
}

/// Per-session state, replaced wholesale on INIT
#[derive(Default)]
struct ParseSession {
    session_id: Option<String>,
    parser: LineParser,
    keys: BTreeSet<String>,
}

struct ParseActor {
    chunk_size: usize,
    session: ParseSession,
    inbox: mpsc::UnboundedReceiver<Envelope<ParseCommand>>,
    outbox: mpsc::UnboundedSender<Envelope<ParseEvent>>,
    /// Commands that arrived while a file was streaming
    deferred: VecDeque<Envelope<ParseCommand>>,
}

impl ParseActor {
    async fn run(mut self) {
        loop {
            let envelope = match self.deferred.pop_front() {
                Some(envelope) => envelope,
                None => match self.inbox.recv().await {
                    Some(envelope) => envelope,
                    None => break,
                },
            };

            if self.handle(envelope).await.is_err() {
                tracing::debug!("parse worker outbox closed");
                break;
            }
        }
        tracing::debug!("parse worker stopped");
    }

    async fn handle(&mut self, envelope: Envelope<ParseCommand>) -> Result<()> {
        let Envelope { request_id, body } = envelope;
        match body {
            ParseCommand::Init { session_id } => {
                tracing::info!(session = %session_id, "parse session initialised");
                self.session = ParseSession {
                    session_id: Some(session_id),
                    ..Default::default()
                };
                Ok(())
            }
            ParseCommand::ParseFile {
                file,
                file_index,
                total_files,
            } => self.parse_file(request_id, file, file_index, total_files).await,
            ParseCommand::Cancel => {
                tracing::debug!("cancel received with no parse in progress");
                Ok(())
            }
            ParseCommand::ExtractKeys => {
                let keys = self.session.keys.iter().cloned().collect();
                self.emit(request_id, ParseEvent::KeysResult { keys })
            }
        }
    }

    async fn parse_file(
        &mut self,
        request_id: Option<u64>,
        file: FileSource,
        file_index: usize,
        total_files: usize,
    ) -> Result<()> {
        let context = FileContext {
            filename: file.name.clone(),
            file_index,
            total_files,
        };

        let (reader, total_bytes) = match open_source(&file).await {
            Ok(opened) => opened,
            Err(e) => {
                tracing::warn!(file = %file.name, error = %e, "failed to open file");
                return self.emit(request_id, ParseEvent::ParseError { error: e.to_string() });
            }
        };

        tracing::debug!(
            session = self.session.session_id.as_deref().unwrap_or("-"),
            file = %file.name,
            total_bytes,
            file_index,
            total_files,
            "parsing file"
        );

        let cancel = CancellationToken::new();
        let result = {
            let stop = cancel.clone();
            let outbox = &self.outbox;
            let keys = &mut self.session.keys;
            let emit = move |event: StreamEvent| {
                let event = match event {
                    StreamEvent::Chunk(chunk) => {
                        for entry in &chunk.entries {
                            collect_entry_keys(entry, keys);
                        }
                        ParseEvent::ParseChunkResult { chunk }
                    }
                    StreamEvent::Progress(progress) => ParseEvent::ParseProgress(progress),
                };
                // Nobody is listening any more
                if outbox.send(Envelope { request_id, body: event }).is_err() {
                    stop.cancel();
                }
            };

            let parse = parse_stream(
                reader,
                total_bytes,
                &context,
                &mut self.session.parser,
                self.chunk_size,
                &cancel,
                emit,
            );
            tokio::pin!(parse);

            let mut inbox_open = true;
            loop {
                tokio::select! {
                    result = &mut parse => break result,
                    message = self.inbox.recv(), if inbox_open => match message {
                        Some(Envelope { body: ParseCommand::Cancel, .. }) => {
                            tracing::info!(file = %context.filename, "cancel requested");
                            cancel.cancel();
                        }
                        Some(other) => self.deferred.push_back(other),
                        None => inbox_open = false,
                    },
                }
            }
        };

        let event = match result {
            Ok(StreamOutcome::Completed { total_entries }) => {
                tracing::info!(file = %context.filename, total_entries, "file parsed");
                ParseEvent::ParseComplete {
                    filename: context.filename,
                    total_entries,
                    file_index,
                    total_files,
                }
            }
            Ok(StreamOutcome::Cancelled { chunks_emitted }) => ParseEvent::ParseCancelled {
                filename: context.filename,
                chunks_emitted,
            },
            Err(e) => {
                tracing::warn!(file = %context.filename, error = %e, "parse failed");
                ParseEvent::ParseError { error: e.to_string() }
            }
        };
        self.emit(request_id, event)
    }

    fn emit(&self, request_id: Option<u64>, body: ParseEvent) -> Result<()> {
        self.outbox
            .send(Envelope { request_id, body })
            .map_err(|_| WorkerError::Closed)
    }
}

async fn open_source(file: &FileSource) -> std::result::Result<(Reader, u64), StreamError> {
    match &file.data {
        FileData::Memory(bytes) => {
            let reader: Reader = Box::new(Cursor::new(bytes.clone()));
            Ok((reader, bytes.len() as u64))
        }
        FileData::Path(path) => {
            let io_error = |source| StreamError::Io {
                filename: file.name.clone(),
                source,
            };
            let handle = tokio::fs::File::open(path).await.map_err(io_error)?;
            let total = handle.metadata().await.map_err(io_error)?.len();
            let reader: Reader = Box::new(handle);
            Ok((reader, total))
        }
    }
}
