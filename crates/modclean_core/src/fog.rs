//! Rewrites cells whose lighting triggers the zero-distance fog rendering bug.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::game::{Game, PluginFormat};
use crate::progress::{Progress, checkpoint, fraction_of};
use crate::reader::{ByteCursor, LittleEndianReader};
use crate::subrecord::{
    CellLighting, XCLL_WIDTH, find_cell_lighting, next_subrecord, patch_fog_near,
};
use crate::types::{FormId, Tag};
use crate::walk::{Frame, RecordFrame, Walker};

/// Fog-near distance written over the zero of a broken cell.
pub const FIXED_FOG_NEAR: f32 = 0.0001;

const COPY_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FogFixReport {
    pub fixed: BTreeSet<FormId>,
    /// Broken cells inside compressed records, left as they were.
    pub skipped_compressed: BTreeSet<FormId>,
    /// Copy of the original plugin, present only when something was fixed.
    pub backup: Option<PathBuf>,
}

/// Copies `cursor` to `out`, patching the fog-near distance of every broken cell.
///
/// Bytes outside patched fields are copied verbatim, so a plugin with nothing to fix
/// comes out identical.
pub fn rewrite<C, W, G>(
    cursor: &mut C,
    out: &mut W,
    format: &PluginFormat,
    progress: &mut G,
) -> Result<FogFixReport, CoreError>
where
    C: ByteCursor + ?Sized,
    W: Write + ?Sized,
    G: Progress + ?Sized,
{
    let mut report = FogFixReport::default();
    let mut copied = cursor.tell()?;

    let mut walker = Walker::new(cursor, format.header_width);
    let len = walker.stream_len();
    while let Some(frame) = walker.next_frame()? {
        match frame {
            Frame::Group(group) => {
                checkpoint(progress, fraction_of(group.start, len), "Fixing fog...")?;
                if !group.header.is_opaque_top_level() {
                    walker.enter(&group)?;
                }
            }
            Frame::Record(record) if record.header.tag == Tag::CELL => {
                if record.header.is_compressed() {
                    let mut body = walker.open_body(&record)?;
                    let end = body.end();
                    if find_cell_lighting(&mut body, end)?.is_some_and(|l| l.has_broken_fog()) {
                        warn!(
                            cell = %record.header.form_id,
                            "broken fog in a compressed cell; left unchanged"
                        );
                        report.skipped_compressed.insert(record.header.form_id);
                    }
                    continue;
                }
                if let Some(patch_at) = broken_lighting_offset(&mut walker, &record)? {
                    copy_range(walker.cursor(), out, copied, patch_at)?;
                    let mut raw = walker.cursor().read_bytes(XCLL_WIDTH)?;
                    patch_fog_near(&mut raw, FIXED_FOG_NEAR)?;
                    out.write_all(&raw)?;
                    copied = patch_at + XCLL_WIDTH as u64;
                    report.fixed.insert(record.header.form_id);
                }
            }
            Frame::Record(_) => {}
        }
    }

    copy_range(walker.cursor(), out, copied, len)?;
    out.flush()?;
    Ok(report)
}

/// Offset of the `XCLL` payload of an uncompressed cell when its fog is broken.
fn broken_lighting_offset<C: ByteCursor + ?Sized>(
    walker: &mut Walker<'_, C>,
    record: &RecordFrame,
) -> Result<Option<u64>, CoreError> {
    let mut body = walker.open_body(record)?;
    let end = body.end();
    while let Some(sub) = next_subrecord(&mut body, end)? {
        if sub.tag == Tag::XCLL {
            let lighting = CellLighting::read(&mut body, &sub)?;
            return Ok(lighting.has_broken_fog().then_some(sub.data_start));
        }
        body.seek_to(sub.data_end())?;
    }
    Ok(None)
}

fn copy_range<C, W>(cursor: &mut C, out: &mut W, from: u64, to: u64) -> Result<(), CoreError>
where
    C: ByteCursor + ?Sized,
    W: Write + ?Sized,
{
    cursor.seek_to(from)?;
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut left = to.saturating_sub(from);
    while left > 0 {
        let n = left.min(COPY_CHUNK as u64) as usize;
        cursor.read_into(&mut buf[..n])?;
        out.write_all(&buf[..n])?;
        left -= n as u64;
    }
    Ok(())
}

pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

/// Fixes `path` in place.
///
/// The fixed plugin is written to a temporary file next to the original. When at
/// least one cell was fixed the original is copied to `<path>.bak` and replaced;
/// otherwise, and on any error or cancellation, the temporary file is discarded and
/// the original is never touched.
pub fn fix_fog<G: Progress + ?Sized>(
    path: &Path,
    game: Option<Game>,
    progress: &mut G,
) -> Result<FogFixReport, CoreError> {
    let file = File::open(path).map_err(|e| CoreError::from(e).at_path(path))?;
    let mut cursor = LittleEndianReader::new(BufReader::new(file))
        .map_err(|e| CoreError::from(e).at_path(path))?;
    let format = PluginFormat::resolve(game, &mut cursor).map_err(|e| e.at_path(path))?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let temp = tempfile::Builder::new()
        .prefix(".modclean_")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| CoreError::from(e).at_path(path))?;

    let mut report = {
        let mut out = BufWriter::new(temp.as_file());
        rewrite(&mut cursor, &mut out, &format, progress).map_err(|e| e.at_path(path))?
    };
    checkpoint(progress, 1.0, "Fixing fog...")?;

    if report.fixed.is_empty() {
        debug!(path = %path.display(), "no broken fog; original left untouched");
        return Ok(report);
    }

    drop(cursor);
    let backup = backup_path(path);
    fs::copy(path, &backup).map_err(|e| CoreError::from(e).at_path(path))?;
    temp.persist(path).map_err(|e| CoreError::from(e.error).at_path(path))?;
    info!(
        path = %path.display(),
        backup = %backup.display(),
        fixed = report.fixed.len(),
        "fog fixed"
    );
    report.backup = Some(backup);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use modclean_test_utils::{PluginBuilder, edid, record, top_group, xcll};

    use super::{FIXED_FOG_NEAR, backup_path, rewrite};
    use crate::game::Game;
    use crate::progress::NoProgress;
    use crate::reader::LittleEndianReader;
    use crate::types::FormId;

    fn run(bytes: &[u8]) -> (Vec<u8>, super::FogFixReport) {
        let mut r = LittleEndianReader::new(Cursor::new(bytes.to_vec())).unwrap();
        let mut out = Vec::new();
        let report = rewrite(&mut r, &mut out, &Game::Skyrim.format(), &mut NoProgress).unwrap();
        (out, report)
    }

    #[test]
    fn patches_only_the_near_field() {
        let bytes = PluginBuilder::new()
            .node(top_group(
                b"CELL",
                vec![
                    record(b"CELL", 0x40, [edid("Broken"), xcll(0.0, 0.0, 0.0)].concat()),
                    record(b"CELL", 0x41, [edid("Fine"), xcll(0.0, 0.0, 4.0)].concat()),
                ],
            ))
            .build();
        let (out, report) = run(&bytes);

        assert_eq!(report.fixed.iter().copied().collect::<Vec<_>>(), vec![FormId(0x40)]);
        assert_eq!(out.len(), bytes.len());

        let xcll_at = bytes
            .windows(4)
            .position(|w| w == b"XCLL")
            .expect("first cell has lighting");
        let near_at = xcll_at + 6 + 12;
        let near = f32::from_le_bytes(out[near_at..near_at + 4].try_into().unwrap());
        assert_eq!(near, FIXED_FOG_NEAR);
        assert_eq!(out[..near_at], bytes[..near_at]);
        assert_eq!(out[near_at + 4..], bytes[near_at + 4..]);
    }

    #[test]
    fn nothing_to_fix_copies_verbatim() {
        let bytes = PluginBuilder::new()
            .node(top_group(b"CELL", vec![record(b"CELL", 0x41, xcll(1.0, 2.0, 3.0))]))
            .padding(16)
            .build();
        let (out, report) = run(&bytes);
        assert!(report.fixed.is_empty());
        assert_eq!(out, bytes);
    }

    #[test]
    fn backup_sits_next_to_the_plugin() {
        let path = std::path::Path::new("/data/Mods/Some Mod.esp");
        assert_eq!(
            backup_path(path),
            std::path::PathBuf::from("/data/Mods/Some Mod.esp.bak")
        );
    }
}
