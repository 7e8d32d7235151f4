//! Per-group record listing, the plugin's "details" view.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use crate::error::CoreError;
use crate::game::{Game, PluginFormat};
use crate::progress::{Progress, checkpoint, fraction_of};
use crate::reader::{ByteCursor, LittleEndianReader};
use crate::record::GroupType;
use crate::subrecord::read_editor_id;
use crate::types::{FormId, Tag};
use crate::walk::{Frame, Walker};

/// Top-level groups whose contents are too large to list.
const SKIPPED_GROUPS: [Tag; 3] = [Tag::CELL, Tag::WRLD, Tag::DIAL];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordSummary {
    pub fid: FormId,
    pub editor_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModDetails {
    /// Records of each top-level group, both in file order. Skipped groups are
    /// present with no records.
    pub groups: IndexMap<Tag, Vec<RecordSummary>>,
}

impl ModDetails {
    pub fn read<C, G>(
        cursor: &mut C,
        format: &PluginFormat,
        progress: &mut G,
    ) -> Result<Self, CoreError>
    where
        C: ByteCursor + ?Sized,
        G: Progress + ?Sized,
    {
        let mut details = Self::default();
        let mut current: Option<Tag> = None;

        let mut walker = Walker::new(cursor, format.header_width);
        let len = walker.stream_len();
        while let Some(frame) = walker.next_frame()? {
            match frame {
                Frame::Group(group) => {
                    // Fallout 4 reuses type 10 for quest children.
                    if format.is_fallout4()
                        && group.header.group_type == GroupType::CellVisibleDistantChildren
                    {
                        continue;
                    }
                    if walker.depth() > 0 {
                        walker.enter(&group)?;
                        continue;
                    }

                    let Some(tag) = group.header.label.top_tag() else {
                        continue;
                    };
                    checkpoint(
                        progress,
                        fraction_of(group.start, len),
                        &format!("Scanning: {tag}"),
                    )?;
                    details.groups.entry(tag).or_default();
                    current = Some(tag);
                    if !SKIPPED_GROUPS.contains(&tag) {
                        walker.enter(&group)?;
                    }
                }
                Frame::Record(record) => {
                    if walker.depth() == 0 {
                        continue;
                    }
                    let Some(tag) = current else {
                        continue;
                    };
                    let mut body = walker.open_body(&record)?;
                    let end = body.end();
                    let editor_id = read_editor_id(&mut body, end)?;
                    drop(body);
                    details.groups.entry(tag).or_default().push(RecordSummary {
                        fid: record.header.form_id,
                        editor_id,
                    });
                }
            }
        }
        Ok(details)
    }

    pub fn get(&self, tag: Tag) -> &[RecordSummary] {
        self.groups.get(&tag).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn record_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}

pub fn read_mod_details<G: Progress + ?Sized>(
    path: &Path,
    game: Option<Game>,
    progress: &mut G,
) -> Result<ModDetails, CoreError> {
    let file = File::open(path).map_err(|e| CoreError::from(e).at_path(path))?;
    let mut cursor = LittleEndianReader::new(BufReader::new(file))
        .map_err(|e| CoreError::from(e).at_path(path))?;
    let format = PluginFormat::resolve(game, &mut cursor).map_err(|e| e.at_path(path))?;
    let details =
        ModDetails::read(&mut cursor, &format, progress).map_err(|e| e.at_path(path))?;
    debug!(
        path = %path.display(),
        groups = details.groups.len(),
        records = details.record_count(),
        "details read"
    );
    Ok(details)
}
