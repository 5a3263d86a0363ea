//! Revision 3 source maps: the JSON shape, the VLQ `mappings` codec, inline
//! `sourceMappingURL` comments and composition of two maps.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMap {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_root: Option<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources_content: Vec<Option<String>>,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub mappings: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceMapError {
    #[error("invalid base64 in inline source map: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("inline source map is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("invalid source map json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid character {0:?} in source map mappings")]
    InvalidBase64Digit(char),

    #[error("truncated VLQ value in source map mappings")]
    TruncatedVlq,

    #[error("source map segment has {0} fields; expected 1, 4 or 5")]
    InvalidSegment(usize),

    #[error("source map segment refers to a negative position")]
    NegativeValue,
}

/// Position in a source file. Lines and columns are zero based.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OriginalPosition {
    pub source: u32,
    pub line: u32,
    pub column: u32,
    pub name: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
    pub generated_column: u32,
    pub original: Option<OriginalPosition>,
}

impl Segment {
    pub fn new(generated_column: u32, original: Option<OriginalPosition>) -> Self {
        Self {
            generated_column,
            original,
        }
    }
}

/// Decoded `mappings`: one segment list per generated line.
pub type Mappings = Vec<Vec<Segment>>;

const BASE64_DIGITS: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn base64_value(c: u8) -> Option<i64> {
    match c {
        b'A'..=b'Z' => Some(i64::from(c - b'A')),
        b'a'..=b'z' => Some(i64::from(c - b'a') + 26),
        b'0'..=b'9' => Some(i64::from(c - b'0') + 52),
        b'+' => Some(62),
        b'/' => Some(63),
        _ => None,
    }
}

fn decode_segment(text: &str) -> Result<Vec<i64>, SourceMapError> {
    let mut values = Vec::with_capacity(5);
    let mut value: i64 = 0;
    let mut shift = 0u32;
    let mut pending = false;
    for c in text.bytes() {
        let digit = base64_value(c).ok_or(SourceMapError::InvalidBase64Digit(char::from(c)))?;
        if shift > 60 {
            return Err(SourceMapError::TruncatedVlq);
        }
        value += (digit & 0x1f) << shift;
        if digit & 0x20 != 0 {
            shift += 5;
            pending = true;
        } else {
            let negative = value & 1 == 1;
            let magnitude = value >> 1;
            values.push(if negative { -magnitude } else { magnitude });
            value = 0;
            shift = 0;
            pending = false;
        }
    }
    if pending {
        return Err(SourceMapError::TruncatedVlq);
    }
    Ok(values)
}

fn encode_vlq(out: &mut String, value: i64) {
    let mut vlq = if value < 0 {
        ((-value) << 1) | 1
    } else {
        value << 1
    };
    loop {
        let mut digit = vlq & 0x1f;
        vlq >>= 5;
        if vlq > 0 {
            digit |= 0x20;
        }
        out.push(char::from(BASE64_DIGITS[digit as usize]));
        if vlq == 0 {
            break;
        }
    }
}

fn apply_delta(base: &mut i64, delta: i64) -> Result<u32, SourceMapError> {
    *base += delta;
    u32::try_from(*base).map_err(|_| SourceMapError::NegativeValue)
}

pub fn decode_mappings(mappings: &str) -> Result<Mappings, SourceMapError> {
    let mut lines = Vec::new();
    let (mut source, mut line, mut column, mut name) = (0i64, 0i64, 0i64, 0i64);

    for line_text in mappings.split(';') {
        let mut generated_column = 0i64;
        let mut segments = Vec::new();
        for segment_text in line_text.split(',').filter(|s| !s.is_empty()) {
            let fields = decode_segment(segment_text)?;
            let column_out = match fields.first() {
                Some(delta) => apply_delta(&mut generated_column, *delta)?,
                None => continue,
            };
            let original = match fields.len() {
                1 => None,
                4 | 5 => Some(OriginalPosition {
                    source: apply_delta(&mut source, fields[1])?,
                    line: apply_delta(&mut line, fields[2])?,
                    column: apply_delta(&mut column, fields[3])?,
                    name: match fields.get(4) {
                        Some(delta) => Some(apply_delta(&mut name, *delta)?),
                        None => None,
                    },
                }),
                other => return Err(SourceMapError::InvalidSegment(other)),
            };
            segments.push(Segment::new(column_out, original));
        }
        lines.push(segments);
    }

    Ok(lines)
}

pub fn encode_mappings(lines: &[Vec<Segment>]) -> String {
    let mut out = String::new();
    let (mut source, mut line, mut column, mut name) = (0i64, 0i64, 0i64, 0i64);

    for (index, segments) in lines.iter().enumerate() {
        if index > 0 {
            out.push(';');
        }
        let mut generated_column = 0i64;
        for (i, segment) in segments.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            let col = i64::from(segment.generated_column);
            encode_vlq(&mut out, col - generated_column);
            generated_column = col;

            if let Some(original) = segment.original {
                let (s, l, c) = (
                    i64::from(original.source),
                    i64::from(original.line),
                    i64::from(original.column),
                );
                encode_vlq(&mut out, s - source);
                encode_vlq(&mut out, l - line);
                encode_vlq(&mut out, c - column);
                (source, line, column) = (s, l, c);
                if let Some(n) = original.name {
                    let n = i64::from(n);
                    encode_vlq(&mut out, n - name);
                    name = n;
                }
            }
        }
    }

    out
}

fn inline_map_regex() -> &'static Regex {
    static INLINE_MAP_RE: OnceLock<Regex> = OnceLock::new();
    INLINE_MAP_RE.get_or_init(|| {
        Regex::new(
            r"(?m)^[ \t]*//[#@][ \t]*sourceMappingURL=data:application/json(?:;charset[:=][^;,\s]+)?;base64,([^\s]*)[ \t]*$",
        )
        .expect("inline source map regex should compile")
    })
}

impl SourceMap {
    /// Parses the last inline base64 `sourceMappingURL` comment in `code`.
    ///
    /// `Ok(None)` when there is no such comment.
    pub fn from_inline_comment(code: &str) -> Result<Option<SourceMap>, SourceMapError> {
        let Some(captures) = inline_map_regex().captures_iter(code).last() else {
            return Ok(None);
        };
        let payload = captures.get(1).map_or("", |m| m.as_str());
        let bytes = STANDARD.decode(payload)?;
        let text = String::from_utf8(bytes)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    /// `//# sourceMappingURL=` comment embedding this map.
    pub fn to_inline_comment(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(format!(
            "//# sourceMappingURL=data:application/json;charset=utf-8;base64,{}",
            STANDARD.encode(json)
        ))
    }

    pub fn decoded_mappings(&self) -> Result<Mappings, SourceMapError> {
        decode_mappings(&self.mappings)
    }

    /// Map from every line of `code` to the same line of `source`.
    pub fn identity(source: &str, code: &str) -> SourceMap {
        let lines: Mappings = (0..code.lines().count().max(1))
            .map(|line| {
                vec![Segment::new(
                    0,
                    Some(OriginalPosition {
                        source: 0,
                        line: u32::try_from(line).unwrap_or(u32::MAX),
                        column: 0,
                        name: None,
                    }),
                )]
            })
            .collect();
        SourceMap {
            version: 3,
            sources: vec![source.to_owned()],
            sources_content: vec![Some(code.to_owned())],
            mappings: encode_mappings(&lines),
            ..SourceMap::default()
        }
    }
}

/// Chains `outer` (final code to intermediate code) with `inner`
/// (intermediate code to original source), producing a map from the final
/// code straight to the original source.
///
/// Positions of `outer` that land on an unmapped part of the intermediate
/// code lose their original position.
pub fn compose(outer: &SourceMap, inner: &SourceMap) -> Result<SourceMap, SourceMapError> {
    let outer_lines = outer.decoded_mappings()?;
    let inner_lines = inner.decoded_mappings()?;

    let lines: Mappings = outer_lines
        .iter()
        .map(|segments| {
            segments
                .iter()
                .map(|segment| {
                    let original = segment
                        .original
                        .and_then(|pos| lookup(&inner_lines, pos.line, pos.column));
                    Segment::new(segment.generated_column, original)
                })
                .collect()
        })
        .collect();

    Ok(SourceMap {
        version: 3,
        file: outer.file.clone(),
        source_root: inner.source_root.clone(),
        sources: inner.sources.clone(),
        sources_content: inner.sources_content.clone(),
        names: inner.names.clone(),
        mappings: encode_mappings(&lines),
    })
}

fn lookup(lines: &Mappings, line: u32, column: u32) -> Option<OriginalPosition> {
    let segments = lines.get(usize::try_from(line).ok()?)?;
    let index = segments.partition_point(|segment| segment.generated_column <= column);
    segments.get(index.checked_sub(1)?)?.original
}
