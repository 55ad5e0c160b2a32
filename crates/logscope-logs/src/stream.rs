use chrono::Utc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::decoder::Utf8StreamDecoder;
use crate::parser::LineParser;
use logscope_types::{Chunk, Entry, LogLevel, ParseProgress};

/// Default window size (4 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("I/O error while reading {filename}: {source}")]
    Io {
        filename: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Chunk size must be greater than zero")]
    InvalidChunkSize,
}

/// Splits one file's bytes into logical lines across window boundaries and
/// turns them into chunks of entries.
///
/// Continuation lines (invalid lines following an ERROR entry) are merged into
/// that entry's stack trace. An ERROR entry at the end of a window is held
/// back until the next window, so the merge never depends on where a window
/// boundary falls.
pub struct StreamParser<'a> {
    filename: String,
    parser: &'a mut LineParser,
    decoder: Utf8StreamDecoder,
    carry: String,
    /// Raw byte offset where `carry` begins
    carry_start: u64,
    error_hit: bool,
    tail: Option<Entry>,
    next_chunk: u64,
    entries_emitted: usize,
}

impl<'a> StreamParser<'a> {
    pub fn new(filename: impl Into<String>, parser: &'a mut LineParser) -> Self {
        Self {
            filename: filename.into(),
            parser,
            decoder: Utf8StreamDecoder::new(),
            carry: String::new(),
            carry_start: 0,
            error_hit: false,
            tail: None,
            next_chunk: 0,
            entries_emitted: 0,
        }
    }

    /// Entries released in chunks so far
    pub fn entries_emitted(&self) -> usize {
        self.entries_emitted
    }

    /// Chunks produced so far
    pub fn chunks_emitted(&self) -> u64 {
        self.next_chunk
    }

    /// Feed the window `[byte_start, byte_start + window.len())`.
    ///
    /// Returns a chunk when the window completed at least one line; text after
    /// the last newline is carried into the next window.
    pub fn push_window(&mut self, window: &[u8], byte_start: u64, last: bool) -> Option<Chunk> {
        let text = self.decoder.decode(window, last);
        self.carry.push_str(&text);

        let newline = self.carry.rfind('\n')?;
        let rest = self.carry.split_off(newline + 1);
        let resolved = std::mem::replace(&mut self.carry, rest);
        // A newline byte never sits inside a multi-byte sequence, so the
        // decoded newline just found is this window's last newline byte
        if let Some(pos) = window.iter().rposition(|&b| b == b'\n') {
            self.carry_start = byte_start + pos as u64 + 1;
        }

        let mut entries = Vec::new();
        for line in resolved.split('\n') {
            self.absorb(line, &mut entries);
        }
        self.release_tail(false, &mut entries);

        let byte_end = byte_start + window.len() as u64;
        Some(self.make_chunk(byte_start, byte_end, entries))
    }

    /// Parse whatever is left after the final window and release the held
    /// entry. Returns `None` when nothing remained.
    pub fn finish(&mut self, total_bytes: u64) -> Option<Chunk> {
        let flushed = self.decoder.decode(&[], true);
        self.carry.push_str(&flushed);

        let remainder = std::mem::take(&mut self.carry);
        let mut entries = Vec::new();
        if !remainder.trim().is_empty() {
            self.absorb(&remainder, &mut entries);
        }
        self.release_tail(true, &mut entries);

        if entries.is_empty() {
            return None;
        }
        let byte_start = self.carry_start.min(total_bytes);
        Some(self.make_chunk(byte_start, total_bytes, entries))
    }

    /// Release a held entry when the stream stops before its end.
    ///
    /// The chunk is empty-ranged at the end of the last completed line, since
    /// the entry's bytes were covered by an earlier chunk.
    pub fn flush_tail(&mut self) -> Option<Chunk> {
        let mut entries = Vec::new();
        self.release_tail(true, &mut entries);
        self.error_hit = false;
        if entries.is_empty() {
            return None;
        }
        Some(self.make_chunk(self.carry_start, self.carry_start, entries))
    }

    fn absorb(&mut self, line: &str, out: &mut Vec<Entry>) {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.trim().is_empty() {
            return;
        }

        let entry = self.parser.parse(line, &self.filename);
        if !entry.is_valid {
            if self.error_hit {
                if let Some(tail) = self.tail.as_mut() {
                    tail.stack_trace.push(line.to_string());
                    return;
                }
            }
        } else {
            // Only ERROR collects continuation lines; FATAL does not
            self.error_hit = entry.level == Some(LogLevel::Error);
        }

        if let Some(previous) = self.tail.replace(entry) {
            out.push(previous);
        }
    }

    /// The tail can still grow only while `error_hit` is set
    fn release_tail(&mut self, force: bool, out: &mut Vec<Entry>) {
        if force || !self.error_hit {
            if let Some(tail) = self.tail.take() {
                out.push(tail);
            }
        }
    }

    fn make_chunk(&mut self, byte_start: u64, byte_end: u64, entries: Vec<Entry>) -> Chunk {
        let chunk_index = self.next_chunk;
        self.next_chunk += 1;
        self.entries_emitted += entries.len();
        Chunk {
            filename: self.filename.clone(),
            chunk_index,
            byte_start,
            byte_end,
            entries,
            parsed_at: Utc::now(),
        }
    }
}

/// Position of a file within a multi-file parse
#[derive(Clone, Debug)]
pub struct FileContext {
    pub filename: String,
    pub file_index: usize,
    pub total_files: usize,
}

impl FileContext {
    /// Overall percent across all queued files, weighted by file index
    pub fn percent(&self, bytes_processed: u64, total_bytes: u64) -> f64 {
        let total_files = self.total_files.max(1) as f64;
        let file_fraction = if total_bytes == 0 {
            1.0
        } else {
            bytes_processed as f64 / total_bytes as f64
        };
        ((self.file_index as f64 + file_fraction) / total_files * 100.0).min(100.0)
    }
}

/// Notifications produced while streaming a file
#[derive(Clone, Debug)]
pub enum StreamEvent {
    Chunk(Chunk),
    Progress(ParseProgress),
}

/// How a stream ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed { total_entries: usize },
    Cancelled { chunks_emitted: u64 },
}

/// Stream `total_bytes` bytes from `reader` in `chunk_size` windows.
///
/// Cancellation is checked once per window, before the next window is read.
/// On cancellation or a read error any held entry is flushed in a last chunk,
/// and chunks already passed to `emit` stay valid.
pub async fn parse_stream<R, F>(
    mut reader: R,
    total_bytes: u64,
    context: &FileContext,
    parser: &mut LineParser,
    chunk_size: usize,
    cancel: &CancellationToken,
    mut emit: F,
) -> Result<StreamOutcome, StreamError>
where
    R: AsyncRead + Unpin,
    F: FnMut(StreamEvent),
{
    if chunk_size == 0 {
        return Err(StreamError::InvalidChunkSize);
    }

    let mut stream = StreamParser::new(context.filename.clone(), parser);
    let mut window = vec![0u8; chunk_size.min(total_bytes.max(1) as usize)];
    let mut offset: u64 = 0;

    while offset < total_bytes {
        if cancel.is_cancelled() {
            tracing::info!(
                file = %context.filename,
                offset,
                "parse cancelled"
            );
            if let Some(chunk) = stream.flush_tail() {
                emit(StreamEvent::Chunk(chunk));
            }
            return Ok(StreamOutcome::Cancelled {
                chunks_emitted: stream.chunks_emitted(),
            });
        }

        let len = (total_bytes - offset).min(chunk_size as u64) as usize;
        let buf = &mut window[..len];
        if let Err(source) = reader.read_exact(buf).await {
            if let Some(chunk) = stream.flush_tail() {
                emit(StreamEvent::Chunk(chunk));
            }
            return Err(StreamError::Io {
                filename: context.filename.clone(),
                source,
            });
        }

        let end = offset + len as u64;
        let last = end >= total_bytes;
        if let Some(chunk) = stream.push_window(buf, offset, last) {
            tracing::debug!(
                file = %context.filename,
                chunk = chunk.chunk_index,
                entries = chunk.entries.len(),
                "chunk parsed"
            );
            emit(StreamEvent::Chunk(chunk));
        }

        offset = end;
        emit(StreamEvent::Progress(ParseProgress {
            bytes_processed: offset,
            total_bytes,
            entries_parsed: stream.entries_emitted(),
            current_file: context.filename.clone(),
            percent: context.percent(offset, total_bytes),
        }));

        // Let the owning task observe control messages between windows
        tokio::task::yield_now().await;
    }

    if let Some(chunk) = stream.finish(total_bytes) {
        emit(StreamEvent::Chunk(chunk));
        // Recount now that the held and trailing entries are out
        emit(StreamEvent::Progress(ParseProgress {
            bytes_processed: total_bytes,
            total_bytes,
            entries_parsed: stream.entries_emitted(),
            current_file: context.filename.clone(),
            percent: context.percent(total_bytes, total_bytes),
        }));
    }

    Ok(StreamOutcome::Completed {
        total_entries: stream.entries_emitted(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SAMPLE: &str = "2024-01-15T10:30:00.000Z\tINFO\tcontrollers.vrg\tvrg.go:118\tReconciling\t{\"rid\":\"a\"}\n\
2024-01-15T10:30:01.000Z\tERROR\tcontrollers.vrg\tvrg.go:200\tFailed to sync\t{\"rid\":\"a\"}\n\
goroutine 1 [running]:\n\
\tmain.main()\n\
2024-01-15T10:30:02.000Z\tINFO\tcontrollers.drpc\tdrpc.go:10\tRecovered ─ ok\n\
orphan line without context\n\
2024-01-15T10:30:03.000Z\tFATAL\tmain\tmain.go:1\tshutting down\n\
panic: boom\n\
2024-01-15T10:30:04.000Z\tINFO\tmain.go:42\tServer started\n";

    fn parse_all(input: &[u8], chunk_size: usize) -> Vec<Entry> {
        let mut parser = LineParser::new();
        let mut stream = StreamParser::new("app.log", &mut parser);
        let mut entries = Vec::new();
        let total = input.len() as u64;
        let mut offset = 0;
        for window in input.chunks(chunk_size) {
            let end = offset + window.len() as u64;
            if let Some(chunk) = stream.push_window(window, offset, end == total) {
                entries.extend(chunk.entries);
            }
            offset = end;
        }
        if let Some(chunk) = stream.finish(total) {
            entries.extend(chunk.entries);
        }
        entries
    }

    fn without_ids(entries: Vec<Entry>) -> Vec<Entry> {
        entries.into_iter().map(|e| Entry { id: 0, ..e }).collect()
    }

    #[test]
    fn test_stack_trace_merge() {
        let entries = parse_all(SAMPLE.as_bytes(), 1 << 20);
        assert_eq!(entries.len(), 7);

        let error = &entries[1];
        assert_eq!(error.level, Some(LogLevel::Error));
        assert_eq!(
            error.stack_trace,
            vec!["goroutine 1 [running]:".to_string(), "\tmain.main()".to_string()]
        );

        // INFO resets the flag, so the orphan becomes its own invalid entry
        assert!(entries[2].is_valid);
        assert!(!entries[3].is_valid);
        assert_eq!(entries[3].raw, "orphan line without context");

        // FATAL does not collect continuation lines
        assert_eq!(entries[4].level, Some(LogLevel::Fatal));
        assert!(entries[4].stack_trace.is_empty());
        assert_eq!(entries[5].raw, "panic: boom");

        assert_eq!(entries[6].logger, "unknown logger");
    }

    #[test]
    fn test_chunk_size_invariance() {
        let expected = without_ids(parse_all(SAMPLE.as_bytes(), 1 << 20));
        for size in [1, 2, 3, 7, 64, 100, SAMPLE.len(), SAMPLE.len() + 1] {
            assert_eq!(
                without_ids(parse_all(SAMPLE.as_bytes(), size)),
                expected,
                "chunk size {size}"
            );
        }
    }

    #[test]
    fn test_utf8_boundary() {
        let expected = parse_all(SAMPLE.as_bytes(), 1 << 20);
        let pos = SAMPLE.find('─').unwrap();
        // Window boundary falls in the middle of the three-byte character
        let got = parse_all(SAMPLE.as_bytes(), pos + 1);
        assert_eq!(without_ids(got.clone()), without_ids(expected));
        assert!(got.iter().any(|e| e.message == "Recovered ─ ok"));
    }

    #[test]
    fn test_error_tail_held_across_windows() {
        let input = "2024-01-15T10:30:01.000Z\tERROR\tlog\tf.go:2\tboom\nat frame one\nat frame two\n";
        let split = input.find("at frame").unwrap();

        let mut parser = LineParser::new();
        let mut stream = StreamParser::new("f", &mut parser);
        let first = stream
            .push_window(&input.as_bytes()[..split], 0, false)
            .unwrap();
        assert!(first.entries.is_empty());

        let second = stream
            .push_window(&input.as_bytes()[split..], split as u64, true)
            .unwrap();
        assert!(second.entries.is_empty());

        let last = stream.finish(input.len() as u64).unwrap();
        assert_eq!(last.entries.len(), 1);
        assert_eq!(last.entries[0].stack_trace.len(), 2);
        assert_eq!(last.chunk_index, 2);
    }

    #[test]
    fn test_trailing_line_without_newline() {
        let input = "2024-01-15T10:30:00.000Z\tINFO\tlog\tf.go:1\tfirst\n2024-01-15T10:30:01.000Z\tINFO\tlog\tf.go:2\tsecond";
        let entries = parse_all(input.as_bytes(), 16);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].message, "second");
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        let input = "2024-01-15T10:30:00.000Z\tINFO\tlog\tf.go:1\tfirst\r\n\r\n   \n2024-01-15T10:30:01.000Z\tINFO\tlog\tf.go:2\tsecond\r\n";
        let entries = parse_all(input.as_bytes(), 5);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "first");
    }

    #[test]
    fn test_percent_across_files() {
        let context = FileContext {
            filename: "b.log".to_string(),
            file_index: 1,
            total_files: 2,
        };
        assert_eq!(context.percent(0, 100), 50.0);
        assert_eq!(context.percent(50, 100), 75.0);
        assert_eq!(context.percent(100, 100), 100.0);
    }

    #[tokio::test]
    async fn test_parse_stream_emits_chunks_and_progress() {
        let context = FileContext {
            filename: "app.log".to_string(),
            file_index: 0,
            total_files: 1,
        };
        let mut parser = LineParser::new();
        let mut chunks = Vec::new();
        let mut percents = Vec::new();

        let outcome = parse_stream(
            Cursor::new(SAMPLE.as_bytes()),
            SAMPLE.len() as u64,
            &context,
            &mut parser,
            64,
            &CancellationToken::new(),
            |event| match event {
                StreamEvent::Chunk(chunk) => chunks.push(chunk),
                StreamEvent::Progress(p) => percents.push(p.percent),
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome, StreamOutcome::Completed { total_entries: 7 });
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(percents.last().copied(), Some(100.0));
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i as u64);
        }
        assert!(chunks.windows(2).all(|w| w[0].byte_start <= w[1].byte_start));
        let total: usize = chunks.iter().map(|c| c.entries.len()).sum();
        assert_eq!(total, 7);
    }

    #[tokio::test]
    async fn test_parse_stream_cancelled_before_start() {
        let context = FileContext {
            filename: "app.log".to_string(),
            file_index: 0,
            total_files: 1,
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut events = 0;

        let outcome = parse_stream(
            Cursor::new(SAMPLE.as_bytes()),
            SAMPLE.len() as u64,
            &context,
            &mut LineParser::new(),
            64,
            &cancel,
            |_| events += 1,
        )
        .await
        .unwrap();

        assert_eq!(outcome, StreamOutcome::Cancelled { chunks_emitted: 0 });
        assert_eq!(events, 0);
    }

    #[tokio::test]
    async fn test_short_source_is_io_error() {
        let context = FileContext {
            filename: "app.log".to_string(),
            file_index: 0,
            total_files: 1,
        };
        let result = parse_stream(
            Cursor::new(b"short".to_vec()),
            100,
            &context,
            &mut LineParser::new(),
            64,
            &CancellationToken::new(),
            |_| {},
        )
        .await;

        assert!(matches!(result, Err(StreamError::Io { .. })));
    }

    const HELD: &str = "2024-01-15T10:30:00.000Z\tINFO\tlog\tf.go:1\tfirst\n\
2024-01-15T10:30:01.000Z\tERROR\tlog\tf.go:2\tboom\n\
2024-01-15T10:30:02.000Z\tINFO\tlog\tf.go:3\tthird\n";

    fn app_context() -> FileContext {
        FileContext {
            filename: "app.log".to_string(),
            file_index: 0,
            total_files: 1,
        }
    }

    /// Every line inside the emitted byte ranges must show up in some chunk
    fn assert_ranges_complete(chunks: &[Chunk]) {
        let covered = chunks.iter().map(|c| c.byte_end).max().unwrap_or(0) as usize;
        let expected: Vec<String> = parse_all(&HELD.as_bytes()[..covered], 1 << 20)
            .into_iter()
            .map(|e| e.message)
            .collect();
        let got: Vec<String> = chunks
            .iter()
            .flat_map(|c| c.entries.iter().map(|e| e.message.clone()))
            .collect();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn test_cancel_flushes_held_error_entry() {
        // First window ends right after the ERROR line
        let window = HELD.find("2024-01-15T10:30:02").unwrap();
        let cancel = CancellationToken::new();
        let mut chunks = Vec::new();

        let outcome = parse_stream(
            Cursor::new(HELD.as_bytes()),
            HELD.len() as u64,
            &app_context(),
            &mut LineParser::new(),
            window,
            &cancel,
            |event| {
                if let StreamEvent::Chunk(chunk) = event {
                    cancel.cancel();
                    chunks.push(chunk);
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome, StreamOutcome::Cancelled { chunks_emitted: 2 });
        assert_ranges_complete(&chunks);
        assert_eq!(chunks[1].entries[0].message, "boom");
        assert_eq!(chunks[1].byte_start, window as u64);
        assert_eq!(chunks[1].byte_end, window as u64);
    }

    #[tokio::test]
    async fn test_read_error_flushes_held_error_entry() {
        let window = HELD.find("2024-01-15T10:30:02").unwrap();
        let mut chunks = Vec::new();

        // The source runs dry after the first window
        let result = parse_stream(
            Cursor::new(HELD.as_bytes()[..window].to_vec()),
            HELD.len() as u64,
            &app_context(),
            &mut LineParser::new(),
            window,
            &CancellationToken::new(),
            |event| {
                if let StreamEvent::Chunk(chunk) = event {
                    chunks.push(chunk);
                }
            },
        )
        .await;

        assert!(matches!(result, Err(StreamError::Io { .. })));
        assert_eq!(chunks.len(), 2);
        assert_ranges_complete(&chunks);
    }

    #[tokio::test]
    async fn test_final_progress_counts_every_entry() {
        let input = "2024-01-15T10:30:00.000Z\tINFO\tlog\tf.go:1\tfirst\n\
2024-01-15T10:30:01.000Z\tERROR\tlog\tf.go:2\tboom\n\
at frame one\n";
        let mut last = None;

        let outcome = parse_stream(
            Cursor::new(input.as_bytes()),
            input.len() as u64,
            &app_context(),
            &mut LineParser::new(),
            32,
            &CancellationToken::new(),
            |event| {
                if let StreamEvent::Progress(progress) = event {
                    last = Some(progress);
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome, StreamOutcome::Completed { total_entries: 2 });
        let last = last.unwrap();
        assert_eq!(last.entries_parsed, 2);
        assert_eq!(last.percent, 100.0);
    }

    #[test]
    fn test_trailing_chunk_starts_at_raw_offset() {
        let mut input = b"2024-01-15T10:30:00.000Z\tINFO\tlog\tf.go:1\tfirst\n".to_vec();
        let line_end = input.len() as u64;
        // Each invalid byte decodes to a three-byte replacement character
        input.extend_from_slice(b"\xff\xfe tail");

        let mut parser = LineParser::new();
        let mut stream = StreamParser::new("app.log", &mut parser);
        let first = stream.push_window(&input, 0, true).unwrap();
        assert_eq!(first.entries.len(), 1);

        let last = stream.finish(input.len() as u64).unwrap();
        assert_eq!(last.byte_start, line_end);
        assert_eq!(last.byte_end, input.len() as u64);
        assert!(!last.entries[0].is_valid);
    }

    #[tokio::test]
    async fn test_zero_chunk_size_rejected() {
        let context = FileContext {
            filename: "app.log".to_string(),
            file_index: 0,
            total_files: 1,
        };
        let result = parse_stream(
            Cursor::new(Vec::new()),
            0,
            &context,
            &mut LineParser::new(),
            0,
            &CancellationToken::new(),
            |_| {},
        )
        .await;

        assert!(matches!(result, Err(StreamError::InvalidChunkSize)));
    }
}
