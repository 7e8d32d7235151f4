use std::fmt::Write as _;
use std::path::Path;

use modclean_core::{
    CoreError, CoreErrorCode, DetectorMask, FogFixReport, FormId, ModDetails, PluginHeader,
    ScanOutcome, ScanResult, UdrFinding,
};
use serde_json::{Map as JsonMap, Value as JsonValue};

const FID_COL_WIDTH: usize = 10;
const HEADER_LABEL_WIDTH: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JsonStyle {
    #[default]
    CanonicalV1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextRenderOptions {
    /// Adds parent cell and worldspace lines under each deleted reference.
    pub verbose: bool,
}

/// One entry per scanned file, in batch order.
pub fn render_scan_json<P: AsRef<Path>>(
    outcomes: &[(P, ScanOutcome)],
    mask: DetectorMask,
    style: JsonStyle,
) -> JsonValue {
    match style {
        JsonStyle::CanonicalV1 => JsonValue::Array(
            outcomes
                .iter()
                .map(|(path, outcome)| scan_outcome_to_json(path.as_ref(), outcome, mask))
                .collect(),
        ),
    }
}

pub fn render_scan_text<P: AsRef<Path>>(
    outcomes: &[(P, ScanOutcome)],
    mask: DetectorMask,
    options: TextRenderOptions,
) -> String {
    let mut out = String::new();
    let mut dirty = 0usize;
    let mut undetermined = 0usize;

    for (path, outcome) in outcomes {
        writeln!(&mut out, "== {}", plugin_name(path.as_ref()))
            .expect("writing to String cannot fail");
        match outcome {
            ScanOutcome::Scanned(result) => {
                if !result.is_clean() {
                    dirty += 1;
                }
                write_scan_result(&mut out, result, mask, options);
            }
            ScanOutcome::Undetermined { error } => {
                undetermined += 1;
                writeln!(&mut out, "  could not be scanned: {}", error.message)
                    .expect("writing to String cannot fail");
            }
        }
    }

    writeln!(
        &mut out,
        "{} scanned, {} dirty, {} undetermined",
        plural(outcomes.len(), "plugin"),
        dirty,
        undetermined
    )
    .expect("writing to String cannot fail");
    out
}

pub fn render_fog_json<P: AsRef<Path>>(
    results: &[(P, Result<FogFixReport, CoreError>)],
    style: JsonStyle,
) -> JsonValue {
    match style {
        JsonStyle::CanonicalV1 => JsonValue::Array(
            results
                .iter()
                .map(|(path, result)| fog_result_to_json(path.as_ref(), result))
                .collect(),
        ),
    }
}

pub fn render_fog_text<P: AsRef<Path>>(results: &[(P, Result<FogFixReport, CoreError>)]) -> String {
    let mut out = String::new();
    for (path, result) in results {
        let name = plugin_name(path.as_ref());
        match result {
            Ok(report) if report.fixed.is_empty() && report.skipped_compressed.is_empty() => {
                writeln!(&mut out, "{name}: no broken fog").expect("writing to String cannot fail");
            }
            Ok(report) => {
                writeln!(
                    &mut out,
                    "{name}: fixed {}",
                    plural(report.fixed.len(), "cell")
                )
                .expect("writing to String cannot fail");
                for fid in &report.fixed {
                    writeln!(&mut out, "  {fid}").expect("writing to String cannot fail");
                }
                if !report.skipped_compressed.is_empty() {
                    writeln!(
                        &mut out,
                        "  skipped {} stored compressed:",
                        plural(report.skipped_compressed.len(), "cell")
                    )
                    .expect("writing to String cannot fail");
                    for fid in &report.skipped_compressed {
                        writeln!(&mut out, "    {fid}").expect("writing to String cannot fail");
                    }
                }
                if let Some(backup) = &report.backup {
                    writeln!(&mut out, "  backup: {}", backup.display())
                        .expect("writing to String cannot fail");
                }
            }
            Err(error) => {
                writeln!(&mut out, "{name}: failed: {}", error.message)
                    .expect("writing to String cannot fail");
            }
        }
    }
    out
}

pub fn render_details_json(path: &Path, details: &ModDetails, style: JsonStyle) -> JsonValue {
    match style {
        JsonStyle::CanonicalV1 => {
            let mut out = JsonMap::new();
            out.insert(
                "plugin".to_string(),
                JsonValue::String(plugin_name(path)),
            );
            out.insert(
                "record_count".to_string(),
                JsonValue::from(details.record_count()),
            );

            let mut groups = JsonMap::new();
            for (tag, records) in &details.groups {
                groups.insert(
                    tag.to_string(),
                    JsonValue::Array(
                        records
                            .iter()
                            .map(|r| {
                                let mut m = JsonMap::new();
                                m.insert("fid".to_string(), fid_to_json(r.fid));
                                m.insert(
                                    "editor_id".to_string(),
                                    JsonValue::String(r.editor_id.clone()),
                                );
                                JsonValue::Object(m)
                            })
                            .collect(),
                    ),
                );
            }
            out.insert("groups".to_string(), JsonValue::Object(groups));
            JsonValue::Object(out)
        }
    }
}

pub fn render_details_text(path: &Path, details: &ModDetails) -> String {
    let mut out = String::new();
    writeln!(
        &mut out,
        "== {} ({})",
        plugin_name(path),
        plural(details.record_count(), "record")
    )
    .expect("writing to String cannot fail");
    for (tag, records) in &details.groups {
        writeln!(&mut out, "{tag} ({})", records.len()).expect("writing to String cannot fail");
        for record in records {
            if record.editor_id.is_empty() {
                writeln!(&mut out, "  {}", record.fid).expect("writing to String cannot fail");
            } else {
                writeln!(
                    &mut out,
                    "  {:<width$}{}",
                    record.fid.to_string(),
                    record.editor_id,
                    width = FID_COL_WIDTH
                )
                .expect("writing to String cannot fail");
            }
        }
    }
    out
}

pub fn render_header_json(path: &Path, header: &PluginHeader, style: JsonStyle) -> JsonValue {
    match style {
        JsonStyle::CanonicalV1 => {
            let mut out = JsonMap::new();
            out.insert(
                "plugin".to_string(),
                JsonValue::String(plugin_name(path)),
            );
            out.insert(
                "signature".to_string(),
                JsonValue::String(header.signature.to_string()),
            );
            out.insert(
                "version".to_string(),
                JsonValue::from(rounded_version(header.version)),
            );
            out.insert("master".to_string(), JsonValue::Bool(header.is_master));
            out.insert("light".to_string(), JsonValue::Bool(header.is_light));
            out.insert(
                "record_count".to_string(),
                JsonValue::from(header.record_count),
            );
            out.insert(
                "next_object_id".to_string(),
                JsonValue::String(format!("{:08X}", header.next_object_id)),
            );
            out.insert("author".to_string(), optional_string(&header.author));
            out.insert(
                "description".to_string(),
                optional_string(&header.description),
            );
            out.insert(
                "masters".to_string(),
                JsonValue::Array(
                    header
                        .masters
                        .iter()
                        .map(|m| JsonValue::String(m.clone()))
                        .collect(),
                ),
            );
            JsonValue::Object(out)
        }
    }
}

pub fn render_header_text(path: &Path, header: &PluginHeader) -> String {
    let kind = match (header.is_master, header.is_light) {
        (_, true) => "light master",
        (true, false) => "master",
        (false, false) => "plugin",
    };

    let mut out = String::new();
    writeln!(&mut out, "== {} ({kind})", plugin_name(path)).expect("writing to String cannot fail");
    header_line(&mut out, "Version", &format!("{:.2}", header.version));
    header_line(&mut out, "Records", &header.record_count.to_string());
    header_line(
        &mut out,
        "Next object",
        &format!("{:08X}", header.next_object_id),
    );
    if let Some(author) = &header.author {
        header_line(&mut out, "Author", author);
    }
    if let Some(description) = &header.description {
        header_line(&mut out, "Description", description);
    }
    if header.masters.is_empty() {
        header_line(&mut out, "Masters", "none");
    } else {
        header_line(&mut out, "Masters", &header.masters.len().to_string());
        for (index, master) in header.masters.iter().enumerate() {
            writeln!(&mut out, "  {index:02X} {master}").expect("writing to String cannot fail");
        }
    }
    out
}

fn scan_outcome_to_json(path: &Path, outcome: &ScanOutcome, mask: DetectorMask) -> JsonValue {
    let mut out = JsonMap::new();
    out.insert(
        "plugin".to_string(),
        JsonValue::String(plugin_name(path)),
    );
    out.insert(
        "path".to_string(),
        JsonValue::String(path.display().to_string()),
    );

    match outcome {
        ScanOutcome::Scanned(result) => {
            out.insert(
                "status".to_string(),
                JsonValue::String("scanned".to_string()),
            );
            out.insert("clean".to_string(), JsonValue::Bool(result.is_clean()));
            if mask.contains(DetectorMask::UDR) {
                out.insert(
                    "udr".to_string(),
                    JsonValue::Array(result.udr.iter().map(udr_to_json).collect()),
                );
            }
            if mask.contains(DetectorMask::ITM) {
                out.insert("itm".to_string(), fids_to_json(&result.itm));
            }
            if mask.contains(DetectorMask::FOG) {
                out.insert("fog".to_string(), fids_to_json(&result.fog));
            }
        }
        ScanOutcome::Undetermined { error } => {
            out.insert(
                "status".to_string(),
                JsonValue::String("undetermined".to_string()),
            );
            out.insert("error".to_string(), error_to_json(error));
        }
    }

    JsonValue::Object(out)
}

fn udr_to_json(finding: &UdrFinding) -> JsonValue {
    let mut m = JsonMap::new();
    m.insert("fid".to_string(), fid_to_json(finding.fid));
    m.insert(
        "type".to_string(),
        JsonValue::String(finding.record_type.to_string()),
    );

    let mut parent = JsonMap::new();
    parent.insert("fid".to_string(), optional_fid(finding.parent_fid));
    parent.insert(
        "editor_id".to_string(),
        JsonValue::String(finding.parent_editor_id.clone()),
    );
    parent.insert(
        "interior".to_string(),
        JsonValue::Bool(finding.parent_is_interior),
    );
    parent.insert(
        "grid".to_string(),
        match finding.position {
            Some((x, y)) => JsonValue::Array(vec![JsonValue::from(x), JsonValue::from(y)]),
            None => JsonValue::Null,
        },
    );
    m.insert("parent".to_string(), JsonValue::Object(parent));

    m.insert(
        "world".to_string(),
        match finding.parent_world_fid {
            Some(fid) => {
                let mut world = JsonMap::new();
                world.insert("fid".to_string(), fid_to_json(fid));
                world.insert(
                    "editor_id".to_string(),
                    JsonValue::String(finding.parent_world_editor_id.clone()),
                );
                JsonValue::Object(world)
            }
            None => JsonValue::Null,
        },
    );
    JsonValue::Object(m)
}

fn fog_result_to_json(path: &Path, result: &Result<FogFixReport, CoreError>) -> JsonValue {
    let mut out = JsonMap::new();
    out.insert(
        "plugin".to_string(),
        JsonValue::String(plugin_name(path)),
    );
    out.insert(
        "path".to_string(),
        JsonValue::String(path.display().to_string()),
    );
    match result {
        Ok(report) => {
            out.insert("status".to_string(), JsonValue::String("ok".to_string()));
            out.insert("fixed".to_string(), fids_to_json(&report.fixed));
            out.insert(
                "skipped_compressed".to_string(),
                fids_to_json(&report.skipped_compressed),
            );
            out.insert(
                "backup".to_string(),
                match &report.backup {
                    Some(backup) => JsonValue::String(backup.display().to_string()),
                    None => JsonValue::Null,
                },
            );
        }
        Err(error) => {
            out.insert("status".to_string(), JsonValue::String("failed".to_string()));
            out.insert("error".to_string(), error_to_json(error));
        }
    }
    JsonValue::Object(out)
}

fn write_scan_result(
    out: &mut String,
    result: &ScanResult,
    mask: DetectorMask,
    options: TextRenderOptions,
) {
    if result.is_clean() {
        writeln!(out, "  clean").expect("writing to String cannot fail");
        return;
    }

    if mask.contains(DetectorMask::UDR) && !result.udr.is_empty() {
        writeln!(out, "  Deleted references: {}", result.udr.len())
            .expect("writing to String cannot fail");
        for finding in &result.udr {
            writeln!(
                out,
                "    {:<width$}{}",
                finding.fid.to_string(),
                finding.record_type,
                width = FID_COL_WIDTH
            )
            .expect("writing to String cannot fail");
            if options.verbose {
                write_udr_parent(out, finding);
            }
        }
    }
    if mask.contains(DetectorMask::ITM) && !result.itm.is_empty() {
        writeln!(out, "  Identical to master: {}", result.itm.len())
            .expect("writing to String cannot fail");
        for fid in &result.itm {
            writeln!(out, "    {fid}").expect("writing to String cannot fail");
        }
    }
    if mask.contains(DetectorMask::FOG) && !result.fog.is_empty() {
        writeln!(out, "  Cells with broken fog: {}", result.fog.len())
            .expect("writing to String cannot fail");
        for fid in &result.fog {
            writeln!(out, "    {fid}").expect("writing to String cannot fail");
        }
    }
}

fn write_udr_parent(out: &mut String, finding: &UdrFinding) {
    let Some(cell) = finding.parent_fid else {
        return;
    };
    let place = if finding.parent_is_interior {
        "interior cell"
    } else {
        "cell"
    };
    writeln!(
        out,
        "      in {place} {cell}{}",
        editor_id_suffix(&finding.parent_editor_id)
    )
    .expect("writing to String cannot fail");
    if let Some(world) = finding.parent_world_fid {
        let grid = match finding.position {
            Some((x, y)) => format!(" at ({x}, {y})"),
            None => String::new(),
        };
        writeln!(
            out,
            "      of world {world}{}{grid}",
            editor_id_suffix(&finding.parent_world_editor_id)
        )
        .expect("writing to String cannot fail");
    }
}

fn header_line(out: &mut String, label: &str, value: &str) {
    writeln!(
        out,
        "{:<width$}{value}",
        format!("{label}:"),
        width = HEADER_LABEL_WIDTH
    )
    .expect("writing to String cannot fail");
}

fn editor_id_suffix(editor_id: &str) -> String {
    if editor_id.is_empty() {
        String::new()
    } else {
        format!(" \"{editor_id}\"")
    }
}

fn error_to_json(error: &CoreError) -> JsonValue {
    let mut m = JsonMap::new();
    m.insert(
        "code".to_string(),
        JsonValue::String(error_code_name(error.code).to_string()),
    );
    m.insert(
        "message".to_string(),
        JsonValue::String(error.message.clone()),
    );
    JsonValue::Object(m)
}

fn error_code_name(code: CoreErrorCode) -> &'static str {
    match code {
        CoreErrorCode::Io => "io",
        CoreErrorCode::MalformedHeader => "malformed_header",
        CoreErrorCode::Decompression => "decompression",
        CoreErrorCode::Cancelled => "cancelled",
    }
}

fn fid_to_json(fid: FormId) -> JsonValue {
    JsonValue::String(fid.to_string())
}

fn optional_fid(fid: Option<FormId>) -> JsonValue {
    match fid {
        Some(fid) => fid_to_json(fid),
        None => JsonValue::Null,
    }
}

fn fids_to_json<'a>(fids: impl IntoIterator<Item = &'a FormId>) -> JsonValue {
    JsonValue::Array(fids.into_iter().copied().map(fid_to_json).collect())
}

fn optional_string(value: &Option<String>) -> JsonValue {
    match value {
        Some(v) => JsonValue::String(v.clone()),
        None => JsonValue::Null,
    }
}

/// Header versions are stored as `f32`; two decimals is what the games write.
fn rounded_version(version: f32) -> f64 {
    (f64::from(version) * 100.0).round() / 100.0
}

fn plugin_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("1 {noun}")
    } else {
        format!("{count} {noun}s")
    }
}
