//! Builders for small synthetic plugins used across the workspace's tests.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::ZlibEncoder;

pub const FLAG_DELETED: u32 = 0x0000_0020;
pub const FLAG_COMPRESSED: u32 = 0x0004_0000;
pub const FLAG_MASTER: u32 = 0x0000_0001;

pub fn subrecord(tag: &[u8; 4], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 6);
    out.extend_from_slice(tag);
    out.extend_from_slice(&(data.len() as u16).to_le_bytes());
    out.extend_from_slice(data);
    out
}

/// `EDID` with a NUL terminator.
pub fn edid(editor_id: &str) -> Vec<u8> {
    let mut data = editor_id.as_bytes().to_vec();
    data.push(0);
    subrecord(b"EDID", &data)
}

pub fn xclc(x: i32, y: i32) -> Vec<u8> {
    let mut data = x.to_le_bytes().to_vec();
    data.extend_from_slice(&y.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    subrecord(b"XCLC", &data)
}

/// Cell lighting with the given fog distances. The payload is 40 bytes: the 36-byte
/// common prefix followed by one extra field, as later games write it.
pub fn xcll(near: f32, far: f32, clip: f32) -> Vec<u8> {
    let mut data = vec![0x20, 0x20, 0x20, 0, 0x40, 0x40, 0x40, 0, 0x60, 0x60, 0x60, 0];
    data.extend_from_slice(&near.to_le_bytes());
    data.extend_from_slice(&far.to_le_bytes());
    data.extend_from_slice(&45i32.to_le_bytes());
    data.extend_from_slice(&90i32.to_le_bytes());
    data.extend_from_slice(&1.0f32.to_le_bytes());
    data.extend_from_slice(&clip.to_le_bytes());
    data.extend_from_slice(&1.0f32.to_le_bytes());
    subrecord(b"XCLL", &data)
}

pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("zlib encode should write");
    encoder.finish().expect("zlib encode should finish")
}

#[derive(Debug, Clone)]
pub enum Node {
    Record {
        tag: [u8; 4],
        flags: u32,
        fid: u32,
        body: Vec<u8>,
        /// Overrides the decompressed size written before a compressed body.
        declared_size: Option<u32>,
    },
    Group {
        label: [u8; 4],
        group_type: i32,
        children: Vec<Node>,
    },
}

impl Node {
    pub fn with_flags(self, extra: u32) -> Self {
        match self {
            Node::Record {
                tag,
                flags,
                fid,
                body,
                declared_size,
            } => Node::Record {
                tag,
                flags: flags | extra,
                fid,
                body,
                declared_size,
            },
            group => group,
        }
    }

    /// Compresses the body but writes `declared` as its decompressed size.
    pub fn declaring_size(self, declared: u32) -> Self {
        match self.with_flags(FLAG_COMPRESSED) {
            Node::Record {
                tag,
                flags,
                fid,
                body,
                ..
            } => Node::Record {
                tag,
                flags,
                fid,
                body,
                declared_size: Some(declared),
            },
            group => group,
        }
    }

    fn encode(&self, header_width: usize, out: &mut Vec<u8>) {
        match self {
            Node::Record {
                tag,
                flags,
                fid,
                body,
                declared_size,
            } => {
                let stored = if flags & FLAG_COMPRESSED != 0 {
                    let declared = declared_size.unwrap_or(body.len() as u32);
                    let mut packed = declared.to_le_bytes().to_vec();
                    packed.extend(zlib(body));
                    packed
                } else {
                    body.clone()
                };
                out.extend_from_slice(tag);
                out.extend_from_slice(&(stored.len() as u32).to_le_bytes());
                out.extend_from_slice(&flags.to_le_bytes());
                out.extend_from_slice(&fid.to_le_bytes());
                out.resize(out.len() + header_width - 16, 0);
                out.extend_from_slice(&stored);
            }
            Node::Group {
                label,
                group_type,
                children,
            } => {
                let start = out.len();
                out.extend_from_slice(b"GRUP");
                out.extend_from_slice(&0u32.to_le_bytes());
                out.extend_from_slice(label);
                out.extend_from_slice(&group_type.to_le_bytes());
                out.resize(out.len() + header_width - 16, 0);
                for child in children {
                    child.encode(header_width, out);
                }
                let size = (out.len() - start) as u32;
                out[start + 4..start + 8].copy_from_slice(&size.to_le_bytes());
            }
        }
    }
}

pub fn record(tag: &[u8; 4], fid: u32, body: Vec<u8>) -> Node {
    Node::Record {
        tag: *tag,
        flags: 0,
        fid,
        body,
        declared_size: None,
    }
}

/// A deleted record with an empty body.
pub fn deleted(tag: &[u8; 4], fid: u32) -> Node {
    record(tag, fid, Vec::new()).with_flags(FLAG_DELETED)
}

pub fn compressed_record(tag: &[u8; 4], fid: u32, body: Vec<u8>) -> Node {
    record(tag, fid, body).with_flags(FLAG_COMPRESSED)
}

pub fn group(label: [u8; 4], group_type: i32, children: Vec<Node>) -> Node {
    Node::Group {
        label,
        group_type,
        children,
    }
}

pub fn top_group(tag: &[u8; 4], children: Vec<Node>) -> Node {
    group(*tag, 0, children)
}

pub fn world_children(world: u32, children: Vec<Node>) -> Node {
    group(world.to_le_bytes(), 1, children)
}

pub fn interior_block(block: i32, children: Vec<Node>) -> Node {
    group(block.to_le_bytes(), 2, children)
}

pub fn interior_sub_block(sub_block: i32, children: Vec<Node>) -> Node {
    group(sub_block.to_le_bytes(), 3, children)
}

/// Exterior block label: y then x, two i16 each.
pub fn exterior_block(x: i16, y: i16, children: Vec<Node>) -> Node {
    group(grid_label(x, y), 4, children)
}

pub fn exterior_sub_block(x: i16, y: i16, children: Vec<Node>) -> Node {
    group(grid_label(x, y), 5, children)
}

/// Children of `cell`; `group_type` is 6, 8, 9 or 10.
pub fn cell_children(cell: u32, group_type: i32, children: Vec<Node>) -> Node {
    group(cell.to_le_bytes(), group_type, children)
}

fn grid_label(x: i16, y: i16) -> [u8; 4] {
    let y = y.to_le_bytes();
    let x = x.to_le_bytes();
    [y[0], y[1], x[0], x[1]]
}

/// Assembles a plugin: a `TES4` header followed by top-level nodes.
#[derive(Debug, Clone)]
pub struct PluginBuilder {
    header_width: usize,
    with_header: bool,
    header_flags: u32,
    author: Option<String>,
    description: Option<String>,
    masters: Vec<String>,
    nodes: Vec<Node>,
    padding: usize,
}

impl Default for PluginBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginBuilder {
    /// 24-byte headers and one master, `Base.esm`.
    pub fn new() -> Self {
        Self {
            header_width: 24,
            with_header: true,
            header_flags: 0,
            author: None,
            description: None,
            masters: vec!["Base.esm".to_string()],
            nodes: Vec::new(),
            padding: 0,
        }
    }

    /// 20-byte headers, as Oblivion writes them.
    pub fn short_headers(mut self) -> Self {
        self.header_width = 20;
        self
    }

    pub fn masters(mut self, masters: &[&str]) -> Self {
        self.masters = masters.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn header_flags(mut self, flags: u32) -> Self {
        self.header_flags = flags;
        self
    }

    pub fn author(mut self, author: &str) -> Self {
        self.author = Some(author.to_string());
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Leaves out the `TES4` record entirely.
    pub fn without_header(mut self) -> Self {
        self.with_header = false;
        self
    }

    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Trailing zero bytes after the last group.
    pub fn padding(mut self, len: usize) -> Self {
        self.padding = len;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if self.with_header {
            self.header_record().encode(self.header_width, &mut out);
        }
        for node in &self.nodes {
            node.encode(self.header_width, &mut out);
        }
        out.resize(out.len() + self.padding, 0);
        out
    }

    pub fn write_to(&self, dir: &Path, file_name: &str) -> PathBuf {
        let path = dir.join(file_name);
        fs::write(&path, self.build()).expect("fixture plugin should be writable");
        path
    }

    fn header_record(&self) -> Node {
        let version: f32 = if self.header_width == 20 { 1.0 } else { 1.7 };
        let mut hedr = version.to_le_bytes().to_vec();
        hedr.extend_from_slice(&(self.count_records() as u32).to_le_bytes());
        hedr.extend_from_slice(&0x800u32.to_le_bytes());

        let mut body = subrecord(b"HEDR", &hedr);
        if let Some(author) = &self.author {
            body.extend(subrecord(b"CNAM", &zstring(author)));
        }
        if let Some(description) = &self.description {
            body.extend(subrecord(b"SNAM", &zstring(description)));
        }
        for master in &self.masters {
            body.extend(subrecord(b"MAST", &zstring(master)));
            body.extend(subrecord(b"DATA", &0u64.to_le_bytes()));
        }
        Node::Record {
            tag: *b"TES4",
            flags: self.header_flags,
            fid: 0,
            body,
            declared_size: None,
        }
    }

    fn count_records(&self) -> usize {
        fn count(node: &Node) -> usize {
            match node {
                Node::Record { .. } => 1,
                Node::Group { children, .. } => children.iter().map(count).sum(),
            }
        }
        self.nodes.iter().map(count).sum()
    }
}

fn zstring(text: &str) -> Vec<u8> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.push(0);
    bytes
}

/// Fresh temporary directory for fixture files.
pub fn fixture_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("temp dir should be creatable")
}
