//! Deleted-reference and broken-fog detection over one or many plugins.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::BufReader;
use std::ops::{BitOr, BitOrAssign};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::ScanContext;
use crate::error::CoreError;
use crate::exceptions::apply_known_exceptions;
use crate::game::{Game, PluginFormat};
use crate::plugin_header::PluginHeader;
use crate::progress::{Progress, SubProgress, checkpoint, fraction_of};
use crate::reader::{ByteCursor, LittleEndianReader};
use crate::subrecord::{find_cell_lighting, read_labels};
use crate::types::{FormId, Tag};
use crate::walk::{Frame, Walker};

/// Which detectors a scan runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetectorMask(u8);

impl DetectorMask {
    pub const NONE: DetectorMask = DetectorMask(0);
    pub const UDR: DetectorMask = DetectorMask(0x01);
    /// Accepted for compatibility; identical-to-master detection needs the masters
    /// themselves and never reports anything here.
    pub const ITM: DetectorMask = DetectorMask(0x02);
    pub const FOG: DetectorMask = DetectorMask(0x04);
    pub const ALL: DetectorMask = DetectorMask(0x07);
    pub const DEFAULT: DetectorMask = DetectorMask(0x03);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn contains(&self, other: DetectorMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether any requested detector needs the file contents.
    pub fn reads_files(&self) -> bool {
        self.contains(Self::UDR) || self.contains(Self::FOG)
    }
}

impl Default for DetectorMask {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl BitOr for DetectorMask {
    type Output = DetectorMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DetectorMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Resolve parent editor ids and grid positions in a second pass.
    pub detailed: bool,
    /// Report progress (and honour cancellation) at every group, not just per file.
    pub fine_progress: bool,
    /// Fixes the header width and deleted-reference types; detected when absent.
    pub game: Option<Game>,
}

/// A placed reference flagged deleted but still present in the plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UdrFinding {
    pub fid: FormId,
    pub record_type: Tag,
    pub parent_fid: Option<FormId>,
    pub parent_editor_id: String,
    pub parent_is_interior: bool,
    pub parent_world_fid: Option<FormId>,
    pub parent_world_editor_id: String,
    /// Grid of the owning exterior cell.
    pub position: Option<(i32, i32)>,
}

impl UdrFinding {
    fn new(fid: FormId, record_type: Tag, ctx: ScanContext) -> Self {
        Self {
            fid,
            record_type,
            parent_fid: ctx.cell,
            parent_editor_id: String::new(),
            parent_is_interior: ctx.cell_is_interior,
            parent_world_fid: ctx.world,
            parent_world_editor_id: String::new(),
            position: None,
        }
    }

    fn in_exterior_cell(&self) -> bool {
        !self.parent_is_interior && self.parent_world_fid.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub udr: Vec<UdrFinding>,
    /// Always empty: filled only by an external master-diffing pass.
    pub itm: BTreeSet<FormId>,
    pub fog: BTreeSet<FormId>,
}

impl ScanResult {
    pub fn is_clean(&self) -> bool {
        self.udr.is_empty() && self.itm.is_empty() && self.fog.is_empty()
    }
}

/// Per-file result of a batch; a failed file is reported, never silently emptied.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScanOutcome {
    Scanned(ScanResult),
    Undetermined { error: CoreError },
}

impl ScanOutcome {
    pub fn result(&self) -> Option<&ScanResult> {
        match self {
            Self::Scanned(result) => Some(result),
            Self::Undetermined { .. } => None,
        }
    }

    pub fn is_undetermined(&self) -> bool {
        matches!(self, Self::Undetermined { .. })
    }
}

/// Scans every path in order, one outcome per path.
///
/// A file that fails to read or decode is marked undetermined and the batch moves
/// on. Only cancellation through `progress` aborts the batch.
pub fn scan_many<P, G>(
    paths: &[P],
    mask: DetectorMask,
    options: &ScanOptions,
    progress: &mut G,
) -> Result<Vec<ScanOutcome>, CoreError>
where
    P: AsRef<Path>,
    G: Progress + ?Sized,
{
    if !mask.reads_files() {
        return Ok(paths
            .iter()
            .map(|_| ScanOutcome::Scanned(ScanResult::default()))
            .collect());
    }

    let total = paths.len().max(1) as f64;
    let mut outcomes = Vec::with_capacity(paths.len());
    for (i, path) in paths.iter().enumerate() {
        let path = path.as_ref();
        let start = i as f64 / total;
        let end = (i + 1) as f64 / total;
        checkpoint(progress, start, &format!("Scanning...\n{}", plugin_name(path)))?;

        let mut file_progress = SubProgress::new(&mut *progress, start, end);
        match scan_file(path, mask, options, &mut file_progress) {
            Ok(result) => outcomes.push(ScanOutcome::Scanned(result)),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(error) => {
                warn!(path = %path.display(), %error, "scan failed; result undetermined");
                outcomes.push(ScanOutcome::Undetermined { error });
            }
        }
    }
    Ok(outcomes)
}

pub fn scan_file<G: Progress + ?Sized>(
    path: &Path,
    mask: DetectorMask,
    options: &ScanOptions,
    progress: &mut G,
) -> Result<ScanResult, CoreError> {
    let file = File::open(path).map_err(|e| CoreError::from(e).at_path(path))?;
    let mut cursor = LittleEndianReader::new(BufReader::new(file))
        .map_err(|e| CoreError::from(e).at_path(path))?;
    scan_reader(&mut cursor, &plugin_name(path), mask, options, progress)
        .map_err(|e| e.at_path(path))
}

/// Scans one plugin stream from the cursor's current position.
pub fn scan_reader<C, G>(
    cursor: &mut C,
    plugin_name: &str,
    mask: DetectorMask,
    options: &ScanOptions,
    progress: &mut G,
) -> Result<ScanResult, CoreError>
where
    C: ByteCursor + ?Sized,
    G: Progress + ?Sized,
{
    let mut result = ScanResult::default();
    if !mask.reads_files() {
        return Ok(result);
    }

    let format = PluginFormat::resolve(options.game, cursor)?;
    let start = cursor.tell()?;
    if let Some(header) = PluginHeader::read(cursor, format.header_width)? {
        if header.masters.is_empty() {
            debug!(plugin = plugin_name, "no masters; nothing can be dirty");
            return Ok(result);
        }
    }
    cursor.seek_to(start)?;

    let pass1_end = if options.detailed { 0.5 } else { 1.0 };
    let mut findings = {
        let mut pass_progress = SubProgress::new(&mut *progress, 0.0, pass1_end);
        classify(
            cursor,
            &format,
            mask,
            options.fine_progress,
            &mut result.fog,
            &mut pass_progress,
        )?
    };
    debug!(
        plugin = plugin_name,
        udr = findings.len(),
        fog = result.fog.len(),
        "classification pass done"
    );

    if options.detailed {
        let worklist = parent_worklist(&findings);
        if !worklist.is_empty() {
            cursor.seek_to(start)?;
            let mut pass_progress = SubProgress::new(&mut *progress, 0.5, 1.0);
            resolve_parents(
                cursor,
                &format,
                worklist,
                &mut findings,
                options.fine_progress,
                &mut pass_progress,
            )?;
        }
    }

    result.udr = findings;
    apply_known_exceptions(plugin_name, &mut result.itm);
    Ok(result)
}

/// First pass: classify every leaf record against the requested detectors.
fn classify<C, G>(
    cursor: &mut C,
    format: &PluginFormat,
    mask: DetectorMask,
    fine_progress: bool,
    fog: &mut BTreeSet<FormId>,
    progress: &mut G,
) -> Result<Vec<UdrFinding>, CoreError>
where
    C: ByteCursor + ?Sized,
    G: Progress + ?Sized,
{
    let do_udr = mask.contains(DetectorMask::UDR);
    let do_fog = mask.contains(DetectorMask::FOG);
    let mut findings: Vec<UdrFinding> = Vec::new();
    let mut slots: HashMap<FormId, usize> = HashMap::new();

    let mut walker = Walker::new(cursor, format.header_width);
    let len = walker.stream_len();
    while let Some(frame) = walker.next_frame()? {
        match frame {
            Frame::Group(group) => {
                if fine_progress {
                    checkpoint(progress, fraction_of(group.start, len), "Scanning...")?;
                }
                if !group.header.is_opaque_top_level() {
                    walker.enter(&group)?;
                }
            }
            Frame::Record(record) => {
                let header = record.header;
                if do_udr && header.is_deleted() && format.is_udr_type(header.tag) {
                    let finding = UdrFinding::new(header.form_id, header.tag, walker.context());
                    match slots.get(&header.form_id) {
                        Some(&slot) => findings[slot] = finding,
                        None => {
                            slots.insert(header.form_id, findings.len());
                            findings.push(finding);
                        }
                    }
                }
                if do_fog && header.tag == Tag::CELL {
                    let mut body = walker.open_body(&record)?;
                    let end = body.end();
                    if let Some(lighting) = find_cell_lighting(&mut body, end)? {
                        if lighting.has_broken_fog() {
                            fog.insert(header.form_id);
                        }
                    }
                }
            }
        }
    }
    Ok(findings)
}

/// Parent cell and world ids mapped to the findings they own.
fn parent_worklist(findings: &[UdrFinding]) -> BTreeMap<FormId, Vec<usize>> {
    let mut worklist: BTreeMap<FormId, Vec<usize>> = BTreeMap::new();
    for (index, finding) in findings.iter().enumerate() {
        for parent in [finding.parent_fid, finding.parent_world_fid].into_iter().flatten() {
            worklist.entry(parent).or_default().push(index);
        }
    }
    worklist
}

/// Second pass: read editor ids and grids of the cells and worlds in `worklist`.
fn resolve_parents<C, G>(
    cursor: &mut C,
    format: &PluginFormat,
    mut worklist: BTreeMap<FormId, Vec<usize>>,
    findings: &mut [UdrFinding],
    fine_progress: bool,
    progress: &mut G,
) -> Result<(), CoreError>
where
    C: ByteCursor + ?Sized,
    G: Progress + ?Sized,
{
    let mut walker = Walker::new(cursor, format.header_width);
    let len = walker.stream_len();
    while let Some(frame) = walker.next_frame()? {
        match frame {
            Frame::Group(group) => {
                if fine_progress {
                    checkpoint(progress, fraction_of(group.start, len), "Resolving parents...")?;
                }
                if !group.header.is_opaque_top_level() {
                    walker.enter(&group)?;
                }
            }
            Frame::Record(record) => {
                let header = record.header;
                if header.tag != Tag::CELL && header.tag != Tag::WRLD {
                    continue;
                }
                let Some(owned) = worklist.remove(&header.form_id) else {
                    continue;
                };
                let mut body = walker.open_body(&record)?;
                let end = body.end();
                let labels = read_labels(&mut body, end)?;

                for index in owned {
                    let finding = &mut findings[index];
                    if header.tag == Tag::CELL && finding.parent_fid == Some(header.form_id) {
                        finding.parent_editor_id = labels.editor_id.clone();
                        if finding.in_exterior_cell() {
                            finding.position = labels.grid;
                        }
                    } else if header.tag == Tag::WRLD
                        && finding.parent_world_fid == Some(header.form_id)
                    {
                        finding.parent_world_editor_id = labels.editor_id.clone();
                    }
                }
                if worklist.is_empty() {
                    break;
                }
            }
        }
    }
    if !worklist.is_empty() {
        debug!(unresolved = worklist.len(), "parents not defined in this plugin");
    }
    Ok(())
}

fn plugin_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
