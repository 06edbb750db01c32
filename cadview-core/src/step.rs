/// STEP (ISO 10303-21) header validation and the tessellation seam
///
/// Geometry evaluation of B-rep entities is left to a [`Tessellator`]; this
/// module only checks that a payload is a structurally complete exchange file.
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_until},
    character::complete::{char, multispace0},
    multi::many0,
    sequence::{delimited, preceded},
    IResult,
};
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::error::LoadError;
use crate::geometry::Mesh;

pub const MAGIC: &str = "ISO-10303-21;";
pub const TERMINATOR: &str = "END-ISO-10303-21;";

/// The parts of the HEADER section the viewer reports.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepHeader {
    pub description: Vec<String>,
    pub file_name: Option<String>,
    pub schemas: Vec<String>,
}

/// Failures reported by a tessellation backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TessellationError {
    #[error("tessellator rejected the model: {0}")]
    InvalidModel(String),

    #[error("surface evaluation did not converge at tolerance {0}")]
    NonConvergent(f64),

    #[error("no STEP tessellation backend is configured")]
    Unavailable,

    #[error("tessellation cancelled")]
    Cancelled,
}

/// External CAD-kernel capability turning STEP B-rep data into triangles.
///
/// `tolerance` is the maximum chordal deflection in model units.
/// Implementations should poll `cancel` during long evaluations.
pub trait Tessellator: Send + Sync {
    fn tessellate(
        &self,
        step: &[u8],
        tolerance: f64,
        cancel: &CancelToken,
    ) -> Result<Mesh, TessellationError>;
}

/// Stand-in used when no CAD kernel is linked; every STEP load fails cleanly.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableTessellator;

impl Tessellator for UnavailableTessellator {
    fn tessellate(&self, _: &[u8], _: f64, _: &CancelToken) -> Result<Mesh, TessellationError> {
        Err(TessellationError::Unavailable)
    }
}

/// Validate the exchange-file structure and return the decoded header.
pub fn parse_header(data: &[u8]) -> Result<StepHeader, LoadError> {
    let text = std::str::from_utf8(data)
        .map_err(|e| LoadError::Format(format!("STEP file is not valid text: {}", e)))?;
    let text = text.trim_start_matches('\u{feff}').trim_start();

    let rest = text
        .strip_prefix(MAGIC)
        .ok_or_else(|| LoadError::Format("missing ISO-10303-21 preamble".to_string()))?;

    let (rest, header) = header_section(rest).map_err(|_| {
        LoadError::Format("HEADER section is missing or not terminated by ENDSEC".to_string())
    })?;

    data_section(rest).map_err(|_| LoadError::Format("missing DATA section".to_string()))?;

    if !text.trim_end().ends_with(TERMINATOR) {
        return Err(LoadError::Format(
            "missing END-ISO-10303-21 terminator, file is truncated".to_string(),
        ));
    }

    let schemas = entity_strings(header, "FILE_SCHEMA").ok_or_else(|| {
        LoadError::Format("HEADER section does not declare FILE_SCHEMA".to_string())
    })?;

    Ok(StepHeader {
        description: entity_strings(header, "FILE_DESCRIPTION").unwrap_or_default(),
        file_name: entity_strings(header, "FILE_NAME").and_then(|s| s.into_iter().next()),
        schemas,
    })
}

fn header_section(input: &str) -> IResult<&str, &str> {
    let (input, _) = preceded(multispace0, tag("HEADER;"))(input)?;
    let (input, body) = take_until("ENDSEC;")(input)?;
    let (input, _) = tag("ENDSEC;")(input)?;
    Ok((input, body))
}

fn data_section(input: &str) -> IResult<&str, &str> {
    let (input, _) = take_until("DATA;")(input)?;
    tag("DATA;")(input)
}

/// A quoted STEP string; `''` inside the quotes is an escaped quote.
fn step_string(input: &str) -> IResult<&str, String> {
    let (input, raw) = delimited(
        char('\''),
        nom::combinator::recognize(many0(alt((tag("''"), is_not("'"))))),
        char('\''),
    )(input)?;
    Ok((input, raw.replace("''", "'")))
}

/// All string literals inside the argument list of header entity `name`.
fn entity_strings(header: &str, name: &str) -> Option<Vec<String>> {
    let start = header.find(name)?;
    let args = header[start + name.len()..].trim_start().strip_prefix('(')?;
    let args = balanced_args(args)?;

    let mut strings = Vec::new();
    let mut input = args;
    while let Some(pos) = input.find('\'') {
        match step_string(&input[pos..]) {
            Ok((rest, s)) => {
                strings.push(s);
                input = rest;
            }
            Err(_) => break,
        }
    }
    Some(strings)
}

/// Slice up to the parenthesis closing an already-opened argument list.
fn balanced_args(input: &str) -> Option<&str> {
    let mut depth = 1usize;
    let mut in_string = false;
    for (i, c) in input.char_indices() {
        match c {
            '\'' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&input[..i]);
                }
            }
            _ => {}
        }
    }
    None
}
