use tracing::debug;

use crate::compressed::RecordBody;
use crate::context::{GroupContextTracker, ScanContext};
use crate::error::CoreError;
use crate::reader::ByteCursor;
use crate::record::{GroupHeader, Header, RecordHeader, decode_header};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupFrame {
    pub start: u64,
    pub end: u64,
    pub header: GroupHeader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordFrame {
    pub start: u64,
    pub end: u64,
    pub header: RecordHeader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    Group(GroupFrame),
    Record(RecordFrame),
}

/// Frame-by-frame walk over a plugin stream.
///
/// Every frame returned by [`Walker::next_frame`] is skipped on the following call
/// unless the caller descends into it with [`Walker::enter`]. Reading a record body
/// never has to restore the position: the next call resumes at the record's end.
pub struct Walker<'a, C: ByteCursor + ?Sized> {
    cursor: &'a mut C,
    header_width: u64,
    tracker: GroupContextTracker,
    resume_at: Option<u64>,
    seen_top_group: bool,
}

impl<'a, C: ByteCursor + ?Sized> Walker<'a, C> {
    pub fn new(cursor: &'a mut C, header_width: u64) -> Self {
        Self {
            cursor,
            header_width,
            tracker: GroupContextTracker::new(),
            resume_at: None,
            seen_top_group: false,
        }
    }

    pub fn context(&self) -> ScanContext {
        self.tracker.context()
    }

    pub fn depth(&self) -> usize {
        self.tracker.depth()
    }

    pub fn stream_len(&self) -> u64 {
        self.cursor.stream_len()
    }

    pub fn cursor(&mut self) -> &mut C {
        self.cursor
    }

    /// Decodes the next frame, or `None` at the end of the stream.
    ///
    /// At top level, fewer bytes than one header, an all-zero tag, or anything other
    /// than a group once a top-level group has been walked is treated as trailing
    /// padding.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, CoreError> {
        if let Some(pos) = self.resume_at.take() {
            self.cursor.seek_to(pos)?;
        }
        let start = self.cursor.tell()?;
        self.tracker.leave_finished(start);

        let stream_len = self.cursor.stream_len();
        let container_end = self.tracker.innermost_end().unwrap_or(stream_len);
        let top_level = self.tracker.depth() == 0;

        if top_level && stream_len.saturating_sub(start) < self.header_width {
            return Ok(None);
        }
        if container_end.saturating_sub(start) < self.header_width {
            return Err(CoreError::malformed(format!(
                "group ending at {container_end} leaves {} bytes at offset {start}, too few for a header",
                container_end.saturating_sub(start)
            )));
        }

        let header = decode_header(self.cursor, self.header_width)?;
        if top_level && header.tag().is_zeroed() {
            return Ok(None);
        }
        if top_level && self.seen_top_group && !matches!(header, Header::Group(_)) {
            debug!(
                offset = start,
                bytes = stream_len - start,
                "ignoring trailing bytes after the last top-level group"
            );
            return Ok(None);
        }

        let end = header.frame_end(start, self.header_width)?;
        if end > container_end {
            return Err(CoreError::malformed(format!(
                "{} at offset {start} ends at {end}, past its container end {container_end}",
                header.tag()
            )));
        }
        self.resume_at = Some(end);
        if top_level && matches!(header, Header::Group(_)) {
            self.seen_top_group = true;
        }

        Ok(Some(match header {
            Header::Group(header) => Frame::Group(GroupFrame { start, end, header }),
            Header::Record(header) => Frame::Record(RecordFrame { start, end, header }),
        }))
    }

    /// Walks into the children of a group frame instead of skipping it.
    pub fn enter(&mut self, group: &GroupFrame) -> Result<(), CoreError> {
        self.resume_at = None;
        self.cursor.seek_to(group.start + self.header_width)?;
        self.tracker.enter(&group.header, group.end);
        Ok(())
    }

    /// Opens the body of a record frame, inflating it when compressed.
    pub fn open_body(&mut self, record: &RecordFrame) -> Result<RecordBody<'_, C>, CoreError> {
        self.cursor.seek_to(record.start + self.header_width)?;
        RecordBody::open(&mut *self.cursor, &record.header)
    }
}
