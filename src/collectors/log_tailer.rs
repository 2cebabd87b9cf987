use crate::error::TailError;
use crate::events::RawLine;
use log::{debug, info};
use std::fs::{File, Metadata};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Upper bound on bytes consumed by a single poll
const MAX_READ_PER_POLL: u64 = 8 * 1024 * 1024;

/// Where reading starts when a log file is first opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// Read the whole file
    Beginning,
    /// Skip existing content and only follow new writes
    End,
}

/// Item produced by [`LogTailer::poll`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailEvent {
    /// A complete, newline-terminated line
    Line(RawLine),
    /// The file was replaced or truncated; lines after this marker come from
    /// the new content starting at offset 0
    Rotated,
}

/// Stable identifier of the file behind a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIdentity {
    dev: u64,
    ino: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    pub fn of(metadata: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }

    #[cfg(not(unix))]
    pub fn of(_metadata: &Metadata) -> Self {
        // Without inode numbers only truncation can be detected
        Self { dev: 0, ino: 0 }
    }
}

/// Follows a growing log file by byte offset
///
/// `poll` never blocks: it reads whatever has been appended since the last
/// call and returns the complete lines. An unterminated fragment at the end
/// of the file is held back and completed by a later read. Replacement of the
/// file (identity change) or truncation below the read offset is reported as
/// [`TailEvent::Rotated`] and reading restarts at offset 0.
#[derive(Debug)]
pub struct LogTailer {
    path: PathBuf,
    file: File,
    identity: FileIdentity,
    /// Bytes consumed from the current file
    offset: u64,
    /// Offset of the first byte of `pending`
    line_start: u64,
    /// Unterminated tail fragment
    pending: Vec<u8>,
    /// Opened at end-of-file in the middle of a line; the rest of that line
    /// is skipped
    skip_to_newline: bool,
}

impl LogTailer {
    /// Open `path` for tailing
    ///
    /// # Errors
    ///
    /// Returns `TailError::LogUnavailable` if the path does not exist, is not
    /// a regular file, or cannot be opened for reading.
    pub fn open(path: impl Into<PathBuf>, start: StartPosition) -> Result<Self, TailError> {
        let path = path.into();
        let (mut file, metadata) = Self::open_file(&path)?;

        let offset = match start {
            StartPosition::Beginning => 0,
            StartPosition::End => metadata.len(),
        };
        let skip_to_newline = offset > 0 && !Self::ends_with_newline(&mut file, offset)?;
        file.seek(SeekFrom::Start(offset))?;

        debug!(
            target: "logwatch::tailer",
            "Opened log path={} offset={} mid_line={}",
            path.display(),
            offset,
            skip_to_newline
        );

        Ok(Self {
            path,
            file,
            identity: FileIdentity::of(&metadata),
            offset,
            line_start: offset,
            pending: Vec::new(),
            skip_to_newline,
        })
    }

    /// Read newly appended content
    ///
    /// Returns an empty vector when nothing new is available; waiting between
    /// polls is the caller's job.
    ///
    /// # Errors
    ///
    /// Returns `TailError::LogUnavailable` if the path has disappeared or its
    /// replacement cannot be opened. The current handle is kept, so a later
    /// poll picks up where this one left off.
    pub fn poll(&mut self) -> Result<Vec<TailEvent>, TailError> {
        let metadata = std::fs::metadata(&self.path).map_err(|e| TailError::LogUnavailable {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let mut events = Vec::new();

        if FileIdentity::of(&metadata) != self.identity {
            // Open the replacement first so a failure leaves the old state intact
            let (file, new_metadata) = Self::open_file(&self.path)?;
            while self.read_available(&mut events)? > 0 {}
            self.finish_current(&mut events);

            self.file = file;
            self.identity = FileIdentity::of(&new_metadata);
            self.reset_offsets();
            info!(
                target: "logwatch::tailer",
                "Log rotated path={} reason=replaced",
                self.path.display()
            );
        } else if metadata.len() < self.offset {
            self.finish_current(&mut events);
            self.file.seek(SeekFrom::Start(0))?;
            self.reset_offsets();
            info!(
                target: "logwatch::tailer",
                "Log rotated path={} reason=truncated size={}",
                self.path.display(),
                metadata.len()
            );
        }

        self.read_available(&mut events)?;
        Ok(events)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes consumed from the current file
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Whether an unterminated fragment is being held back
    pub fn has_pending_fragment(&self) -> bool {
        !self.pending.is_empty()
    }

    fn open_file(path: &Path) -> Result<(File, Metadata), TailError> {
        let unavailable = |reason: String| TailError::LogUnavailable {
            path: path.to_path_buf(),
            reason,
        };

        let file = File::open(path).map_err(|e| unavailable(e.to_string()))?;
        let metadata = file.metadata().map_err(|e| unavailable(e.to_string()))?;
        if !metadata.is_file() {
            return Err(unavailable("not a regular file".to_string()));
        }

        Ok((file, metadata))
    }

    /// Whether the byte just before `offset` is a newline
    fn ends_with_newline(file: &mut File, offset: u64) -> Result<bool, TailError> {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::Start(offset - 1))?;
        file.read_exact(&mut last)?;
        Ok(last[0] == b'\n')
    }

    /// Read up to `MAX_READ_PER_POLL` bytes, returning how many were read
    fn read_available(&mut self, events: &mut Vec<TailEvent>) -> Result<usize, TailError> {
        let mut chunk = Vec::new();
        let read = (&mut self.file)
            .take(MAX_READ_PER_POLL)
            .read_to_end(&mut chunk)?;
        if read == 0 {
            return Ok(0);
        }

        self.offset += read as u64;
        self.pending.extend_from_slice(&chunk);

        if self.skip_to_newline {
            match self.pending.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    self.pending.drain(..=pos);
                    self.line_start += (pos + 1) as u64;
                    self.skip_to_newline = false;
                }
                None => {
                    self.line_start += self.pending.len() as u64;
                    self.pending.clear();
                }
            }
        }

        let mut consumed = 0;
        while let Some(pos) = self.pending[consumed..].iter().position(|b| *b == b'\n') {
            let text = Self::decode(&self.pending[consumed..consumed + pos]);
            events.push(TailEvent::Line(RawLine::new(text, self.line_start)));
            self.line_start += (pos + 1) as u64;
            consumed += pos + 1;
        }
        self.pending.drain(..consumed);

        debug!(
            target: "logwatch::tailer",
            "Read bytes={} offset={} pending={}",
            read,
            self.offset,
            self.pending.len()
        );
        Ok(read)
    }

    /// Emit the held-back fragment (the old file will not grow any more)
    /// followed by the rotation marker
    fn finish_current(&mut self, events: &mut Vec<TailEvent>) {
        if !self.pending.is_empty() {
            let text = Self::decode(&self.pending);
            events.push(TailEvent::Line(RawLine::new(text, self.line_start)));
            self.pending.clear();
        }
        events.push(TailEvent::Rotated);
    }

    fn reset_offsets(&mut self) {
        self.offset = 0;
        self.line_start = 0;
        self.pending.clear();
        self.skip_to_newline = false;
    }

    fn decode(bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).trim_end().to_string()
    }
}
