//! Parsing of a single `<mesh>` element into a flat vertex/index fragment.
//!
//! [`MeshCursor`] does the work in bounded batches; [`parse_mesh`] drives it
//! and yields to the scheduler between batches so one huge mesh cannot starve
//! other tasks on the same thread.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{trace, warn};

use crate::error::{IngestError, Result};
use crate::mesh::IndexedMesh;
use crate::utils::parse_or_default;

/// Vertex and triangle data of one mesh element, with indices already shifted
/// by the offset the fragment was parsed at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshFragment {
    pub positions: Vec<[f32; 3]>,
    pub indices: Vec<[u32; 3]>,
    pub vertex_count: u32,
    /// Triangles that referenced a vertex outside this fragment.
    pub dropped_triangles: usize,
}

impl MeshFragment {
    pub fn is_empty(&self) -> bool {
        self.vertex_count == 0
    }

    pub fn into_mesh(self) -> IndexedMesh {
        IndexedMesh::new(self.positions, self.indices)
    }
}

#[derive(Debug)]
pub enum Step {
    /// A full batch was processed, call [`MeshCursor::step`] again.
    Pending,
    Done(MeshFragment),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Other,
    Vertices,
    Triangles,
}

/// Resumable parser over the text of one mesh element.
pub struct MeshCursor<'a> {
    reader: Reader<&'a [u8]>,
    source: &'a str,
    offset: u32,
    chunk_size: usize,
    section: Section,
    saw_vertices: bool,
    saw_triangles: bool,
    positions: Vec<[f32; 3]>,
    /// Local (unshifted) indices until the fragment is finished.
    triangles: Vec<[u32; 3]>,
    finished: bool,
}

impl<'a> MeshCursor<'a> {
    /// `xml` is either a whole `<mesh>` element or just its content.
    /// `source` names the document for error messages.
    pub fn new(xml: &'a str, source: &'a str, offset: u32, chunk_size: usize) -> Self {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);
        Self {
            reader,
            source,
            offset,
            chunk_size: chunk_size.max(1),
            section: Section::Other,
            saw_vertices: false,
            saw_triangles: false,
            positions: vec![],
            triangles: vec![],
            finished: false,
        }
    }

    /// Processes at most `chunk_size` vertices and triangles.
    pub fn step(&mut self) -> Result<Step> {
        if self.finished {
            return Ok(Step::Done(MeshFragment::default()));
        }

        let mut remaining = self.chunk_size;
        loop {
            let event = self
                .reader
                .read_event()
                .map_err(|e| IngestError::malformed(self.source, e))?;

            match event {
                Event::Start(e) => self.open(&e, false),
                Event::Empty(e) => self.open(&e, true),
                Event::End(e) => match e.local_name().as_ref() {
                    b"vertices" | b"triangles" => self.section = Section::Other,
                    _ => {}
                },
                Event::Eof => {
                    self.finished = true;
                    return Ok(Step::Done(self.finish()));
                }
                _ => continue,
            }

            // only vertices and triangles count against the batch
            if self.section != Section::Other {
                remaining = remaining.saturating_sub(1);
                if remaining == 0 {
                    trace!(
                        "{}: yielding after {} vertices, {} triangles",
                        self.source,
                        self.positions.len(),
                        self.triangles.len()
                    );
                    return Ok(Step::Pending);
                }
            }
        }
    }

    fn open(&mut self, e: &BytesStart, empty: bool) {
        match e.local_name().as_ref() {
            b"vertices" => {
                self.saw_vertices = true;
                if !empty {
                    self.section = Section::Vertices;
                }
            }
            b"triangles" => {
                self.saw_triangles = true;
                if !empty {
                    self.section = Section::Triangles;
                }
            }
            b"vertex" if self.section == Section::Vertices => {
                let [x, y, z] = attrs(e, ["x", "y", "z"]);
                self.positions.push([
                    parse_or_default(x.as_deref()),
                    parse_or_default(y.as_deref()),
                    parse_or_default(z.as_deref()),
                ]);
            }
            b"triangle" if self.section == Section::Triangles => {
                let [v1, v2, v3] = attrs(e, ["v1", "v2", "v3"]);
                self.triangles.push([
                    parse_or_default(v1.as_deref()),
                    parse_or_default(v2.as_deref()),
                    parse_or_default(v3.as_deref()),
                ]);
            }
            _ => {}
        }
    }

    fn finish(&mut self) -> MeshFragment {
        if !(self.saw_vertices && self.saw_triangles) {
            trace!("{}: mesh without vertices/triangles, empty fragment", self.source);
            return MeshFragment::default();
        }

        let positions = std::mem::take(&mut self.positions);
        let vertex_count = positions.len() as u32;
        let before = self.triangles.len();
        let offset = self.offset;
        let indices: Vec<[u32; 3]> = std::mem::take(&mut self.triangles)
            .into_iter()
            .filter(|t| t.iter().all(|&i| i < vertex_count))
            .map(|t| [t[0] + offset, t[1] + offset, t[2] + offset])
            .collect();

        let dropped_triangles = before - indices.len();
        if dropped_triangles > 0 {
            warn!(
                "{}: dropped {} triangles referencing missing vertices",
                self.source, dropped_triangles
            );
        }

        MeshFragment {
            positions,
            indices,
            vertex_count,
            dropped_triangles,
        }
    }
}

fn attrs<const N: usize>(e: &BytesStart, names: [&str; N]) -> [Option<String>; N] {
    let mut out: [Option<String>; N] = std::array::from_fn(|_| None);
    for attr in e.attributes().flatten() {
        let key = attr.key.local_name();
        if let Some(i) = names.iter().position(|n| n.as_bytes() == key.as_ref()) {
            out[i] = Some(String::from_utf8_lossy(&attr.value).into_owned());
        }
    }
    out
}

/// Parses one mesh element, yielding to the scheduler every `chunk_size`
/// elements.
pub async fn parse_mesh(xml: &str, source: &str, offset: u32, chunk_size: usize) -> Result<MeshFragment> {
    let mut cursor = MeshCursor::new(xml, source, offset, chunk_size);
    loop {
        match cursor.step()? {
            Step::Done(fragment) => return Ok(fragment),
            Step::Pending => tokio::task::yield_now().await,
        }
    }
}
