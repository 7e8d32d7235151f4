//! Streaming reader for Bethesda plugin files (`.esp`/`.esm`/`.esl`) and the dirty-edit
//! checks built on it: deleted references, broken cell fog, and the per-group details
//! listing.

pub mod compressed;
pub mod context;
pub mod details;
pub mod error;
pub mod exceptions;
pub mod fog;
pub mod game;
pub mod plugin_header;
pub mod progress;
pub mod reader;
pub mod record;
pub mod scanner;
pub mod subrecord;
pub mod types;
pub mod walk;

pub use details::{ModDetails, RecordSummary, read_mod_details};
pub use error::{CoreError, CoreErrorCode};
pub use fog::{FIXED_FOG_NEAR, FogFixReport, fix_fog};
pub use game::{Game, PluginFormat};
pub use plugin_header::{PluginHeader, read_plugin_header};
pub use progress::{NoProgress, Progress, SubProgress};
pub use reader::{ByteCursor, LittleEndianReader};
pub use scanner::{
    DetectorMask, ScanOptions, ScanOutcome, ScanResult, UdrFinding, scan_file, scan_many,
    scan_reader,
};
pub use types::{FormId, Tag};
