/// STL codec for binary and ASCII files
use nalgebra::{Point3, Vector3};
use nom::{
    bytes::complete::tag,
    character::complete::{multispace0, multispace1, not_line_ending},
    number::complete::{float, le_f32, le_u16},
    sequence::{preceded, tuple},
    IResult,
};

use crate::cancel::{CancelToken, CANCEL_CHECK_INTERVAL};
use crate::error::LoadError;
use crate::geometry::Mesh;

pub const HEADER_LEN: usize = 80;
/// Header plus the little-endian triangle count.
pub const PREAMBLE_LEN: usize = HEADER_LEN + 4;
/// Normal, three vertices and the attribute byte count.
pub const RECORD_LEN: usize = 50;

/// Which STL flavor a payload holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StlEncoding {
    Binary { triangles: usize },
    Ascii,
}

/// Classify a payload by inspecting its header.
///
/// Binary wins whenever the declared triangle count accounts for the payload
/// length exactly, even if the header happens to start with `solid`.
pub fn detect(data: &[u8]) -> Result<StlEncoding, LoadError> {
    if data.len() >= PREAMBLE_LEN {
        let declared = u32::from_le_bytes([data[80], data[81], data[82], data[83]]) as usize;
        let expected = declared
            .checked_mul(RECORD_LEN)
            .and_then(|body| body.checked_add(PREAMBLE_LEN));
        if expected == Some(data.len()) {
            return Ok(StlEncoding::Binary { triangles: declared });
        }
    }

    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    if data[start..].starts_with(b"solid") {
        return Ok(StlEncoding::Ascii);
    }

    if data.len() >= PREAMBLE_LEN {
        let declared = u32::from_le_bytes([data[80], data[81], data[82], data[83]]) as u64;
        Err(LoadError::Format(format!(
            "binary STL header declares {} triangles ({} bytes) but the payload has {} bytes",
            declared,
            declared * RECORD_LEN as u64 + PREAMBLE_LEN as u64,
            data.len()
        )))
    } else {
        Err(LoadError::Format(format!(
            "{} bytes is too small for binary STL and no `solid` marker was found",
            data.len()
        )))
    }
}

/// Detect and parse an STL file (binary or ASCII)
pub fn parse_stl(data: &[u8], cancel: &CancelToken) -> Result<Mesh, LoadError> {
    match detect(data)? {
        StlEncoding::Binary { .. } => parse_binary_stl(data, cancel),
        StlEncoding::Ascii => {
            let text = std::str::from_utf8(data)
                .map_err(|e| LoadError::Format(format!("ASCII STL is not valid UTF-8: {}", e)))?;
            parse_ascii_stl(text, cancel)
        }
    }
}

/// Parse a binary STL file
pub fn parse_binary_stl(data: &[u8], cancel: &CancelToken) -> Result<Mesh, LoadError> {
    let triangle_count = match detect(data)? {
        StlEncoding::Binary { triangles } => triangles,
        StlEncoding::Ascii => {
            return Err(LoadError::Format("payload is ASCII STL, not binary".to_string()))
        }
    };
    if triangle_count == 0 {
        return Err(LoadError::EmptyGeometry);
    }

    let mut mesh = Mesh::with_capacity(triangle_count);
    let mut input = &data[PREAMBLE_LEN..];

    for index in 0..triangle_count {
        if index % CANCEL_CHECK_INTERVAL == 0 {
            cancel.check()?;
        }
        let (rest, (corners, normal)) = binary_facet(input).map_err(|_| {
            LoadError::Format(format!("binary STL record {} is truncated", index))
        })?;
        mesh.push_facet(corners, normal);
        input = rest;
    }

    mesh.validate()?;
    log::debug!("decoded binary STL: {} triangles", mesh.triangle_count());
    Ok(mesh)
}

fn binary_vector(input: &[u8]) -> IResult<&[u8], Vector3<f32>> {
    let (input, (x, y, z)) = tuple((le_f32, le_f32, le_f32))(input)?;
    Ok((input, Vector3::new(x, y, z)))
}

fn binary_facet(input: &[u8]) -> IResult<&[u8], ([Point3<f32>; 3], Vector3<f32>)> {
    let (input, normal) = binary_vector(input)?;
    let (input, a) = binary_vector(input)?;
    let (input, b) = binary_vector(input)?;
    let (input, c) = binary_vector(input)?;
    // Attribute byte count, unused.
    let (input, _) = le_u16(input)?;
    Ok((input, ([a.into(), b.into(), c.into()], normal)))
}

/// Parse an ASCII STL file
///
/// Several `solid ... endsolid` blocks in one file are merged into one mesh.
pub fn parse_ascii_stl(text: &str, cancel: &CancelToken) -> Result<Mesh, LoadError> {
    let mut mesh = Mesh::with_capacity(0);
    let mut rest = text;
    let mut facets = 0usize;

    loop {
        let (after_header, name) = solid_header(rest).map_err(|_| {
            LoadError::Format(format!("expected `solid` at line {}", line_of(text, rest.trim_start())))
        })?;
        log::debug!("parsing ASCII STL solid {:?}", name);
        rest = after_header;

        loop {
            if let Ok((after_end, _)) = end_solid(rest) {
                rest = after_end;
                break;
            }
            let (after_facet, (corners, normal)) = ascii_facet(rest).map_err(|_| {
                LoadError::Format(format!("malformed facet near line {}", line_of(text, rest.trim_start())))
            })?;
            mesh.push_facet(corners, normal);
            rest = after_facet;

            facets += 1;
            if facets % CANCEL_CHECK_INTERVAL == 0 {
                cancel.check()?;
            }
        }

        let trailing = rest.trim_start();
        if trailing.is_empty() {
            break;
        }
        if !trailing.starts_with("solid") {
            log::warn!(
                "ignoring trailing content after endsolid at line {}",
                line_of(text, trailing)
            );
            break;
        }
        rest = trailing;
    }

    cancel.check()?;
    mesh.validate()?;
    log::debug!("decoded ASCII STL: {} triangles", mesh.triangle_count());
    Ok(mesh)
}

fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    preceded(multispace0, tag(word))
}

fn solid_header(input: &str) -> IResult<&str, &str> {
    let (input, _) = keyword("solid")(input)?;
    let (input, name) = not_line_ending(input)?;
    Ok((input, name.trim()))
}

fn end_solid(input: &str) -> IResult<&str, &str> {
    let (input, _) = keyword("endsolid")(input)?;
    let (input, name) = not_line_ending(input)?;
    Ok((input, name.trim()))
}

fn ascii_vector(input: &str) -> IResult<&str, Vector3<f32>> {
    let (input, (x, y, z)) = tuple((
        preceded(multispace1, float),
        preceded(multispace1, float),
        preceded(multispace1, float),
    ))(input)?;
    Ok((input, Vector3::new(x, y, z)))
}

fn ascii_vertex(input: &str) -> IResult<&str, Point3<f32>> {
    let (input, v) = preceded(keyword("vertex"), ascii_vector)(input)?;
    Ok((input, v.into()))
}

fn ascii_facet(input: &str) -> IResult<&str, ([Point3<f32>; 3], Vector3<f32>)> {
    let (input, _) = keyword("facet")(input)?;
    let (input, _) = preceded(multispace1, tag("normal"))(input)?;
    let (input, normal) = ascii_vector(input)?;
    let (input, _) = keyword("outer")(input)?;
    let (input, _) = preceded(multispace1, tag("loop"))(input)?;
    let (input, a) = ascii_vertex(input)?;
    let (input, b) = ascii_vertex(input)?;
    let (input, c) = ascii_vertex(input)?;
    let (input, _) = keyword("endloop")(input)?;
    let (input, _) = keyword("endfacet")(input)?;
    Ok((input, ([a, b, c], normal)))
}

fn line_of(text: &str, rest: &str) -> usize {
    let offset = text.len() - rest.len();
    text[..offset].matches('\n').count() + 1
}

/// Encode a mesh as binary STL. `header` is truncated or zero-padded to 80 bytes.
pub fn to_binary(mesh: &Mesh, header: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(PREAMBLE_LEN + mesh.triangle_count() * RECORD_LEN);
    let mut head = [0u8; HEADER_LEN];
    let bytes = header.as_bytes();
    let len = bytes.len().min(HEADER_LEN);
    head[..len].copy_from_slice(&bytes[..len]);
    out.extend_from_slice(&head);
    out.extend_from_slice(&(mesh.triangle_count() as u32).to_le_bytes());

    for index in 0..mesh.triangle_count() {
        let Some(corners) = mesh.triangle(index) else {
            continue;
        };
        let normal = mesh.face_normal(index);
        for v in std::iter::once(normal).chain(corners.iter().map(|p| p.coords)) {
            for c in v.iter() {
                out.extend_from_slice(&c.to_le_bytes());
            }
        }
        out.extend_from_slice(&0u16.to_le_bytes());
    }

    // Triangles with dangling indices were skipped; keep the count honest.
    let written = ((out.len() - PREAMBLE_LEN) / RECORD_LEN) as u32;
    out[HEADER_LEN..PREAMBLE_LEN].copy_from_slice(&written.to_le_bytes());
    out
}

/// Encode a mesh as ASCII STL
pub fn to_ascii(mesh: &Mesh, name: &str) -> String {
    let mut out = format!("solid {}\n", name);
    for index in 0..mesh.triangle_count() {
        let Some(corners) = mesh.triangle(index) else {
            continue;
        };
        let n = mesh.face_normal(index);
        out.push_str(&format!("  facet normal {} {} {}\n    outer loop\n", n.x, n.y, n.z));
        for p in &corners {
            out.push_str(&format!("      vertex {} {} {}\n", p.x, p.y, p.z));
        }
        out.push_str("    endloop\n  endfacet\n");
    }
    out.push_str(&format!("endsolid {}\n", name));
    out
}
