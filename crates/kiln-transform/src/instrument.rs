//! Coverage instrumentation applied on top of transformed code.

use crate::error::BoxError;
use crate::source_map::{compose, encode_mappings, OriginalPosition, Segment, SourceMap};
use kiln_config::RunOptions;
use std::path::Path;

/// Global the bootstrap registers per-file coverage data under.
pub const COVERAGE_VARIABLE: &str = "__coverage__";

#[derive(Clone, Copy, Debug)]
pub struct InstrumentRequest<'a> {
    pub filename: &'a Path,
    pub root_dir: &'a Path,
    /// Code to instrument: transformer output, or the raw source.
    pub code: &'a str,
    /// Map from `code` back to the original file, when one is known.
    pub input_map: Option<&'a SourceMap>,
    /// Whether the output may claim a source-map relationship with the
    /// instrumented input.
    pub emit_source_map: bool,
    /// Capabilities of the module loader that will evaluate the output.
    pub run: &'a RunOptions,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Instrumented {
    pub code: String,
    /// Map of `code`, present only when the request allowed emitting one.
    pub map: Option<SourceMap>,
}

/// Injects coverage collection into a file.
pub trait Instrumenter: Send + Sync {
    fn instrument(&self, request: InstrumentRequest<'_>) -> Result<Instrumented, BoxError>;
}

/// Registers file-level coverage data on `globalThis.__coverage__` with a
/// one-line prologue.
///
/// The prologue shifts every line down by one; the emitted map accounts for
/// that and, given an input map, points through it to the original file.
#[derive(Clone, Copy, Debug, Default)]
pub struct BootstrapInstrumenter;

impl BootstrapInstrumenter {
    pub fn new() -> Self {
        Self
    }

    fn prologue(path: &str, hash: &str, lines: usize) -> Result<String, serde_json::Error> {
        let path_literal = serde_json::to_string(path)?;
        let hash_literal = serde_json::to_string(hash)?;
        Ok(format!(
            "var cov_{hash} = (function () {{ \
             var g = typeof globalThis !== \"undefined\" ? globalThis : this; \
             var c = g.{COVERAGE_VARIABLE} || (g.{COVERAGE_VARIABLE} = {{}}); \
             var p = {path_literal}; \
             if (!c[p] || c[p].hash !== {hash_literal}) {{ \
             c[p] = {{ path: p, hash: {hash_literal}, lines: {lines} }}; }} \
             return c[p]; }})();"
        ))
    }
}

impl Instrumenter for BootstrapInstrumenter {
    fn instrument(&self, request: InstrumentRequest<'_>) -> Result<Instrumented, BoxError> {
        let path = request.filename.to_string_lossy();
        let hash = kiln_cache::digest([path.as_bytes(), request.code.as_bytes()]);
        let line_count = request.code.lines().count();

        let mut code = Self::prologue(&path, &hash, line_count)?;
        code.push('\n');
        code.push_str(request.code);

        if !request.emit_source_map {
            return Ok(Instrumented { code, map: None });
        }

        let mut lines = Vec::with_capacity(line_count + 1);
        lines.push(Vec::new());
        for line in 0..line_count {
            lines.push(vec![Segment::new(
                0,
                Some(OriginalPosition {
                    source: 0,
                    line: u32::try_from(line)?,
                    column: 0,
                    name: None,
                }),
            )]);
        }
        let own_map = SourceMap {
            version: 3,
            file: Some(path.clone().into_owned()),
            sources: vec![path.into_owned()],
            sources_content: vec![Some(request.code.to_owned())],
            mappings: encode_mappings(&lines),
            ..SourceMap::default()
        };
        let map = match request.input_map {
            Some(input) => compose(&own_map, input)?,
            None => own_map,
        };

        if !code.ends_with('\n') {
            code.push('\n');
        }
        code.push_str(&map.to_inline_comment()?);

        Ok(Instrumented {
            code,
            map: Some(map),
        })
    }
}
