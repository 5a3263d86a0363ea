use super::support::{loaded, pattern, Fixture, Identity, Suffix};
use kiln_transform::{
    BoxError, CoverageProvider, InstrumentRequest, Instrumented, Instrumenter, ProjectCacheRegistry,
    RunOptions, ScriptTransformer, SourceMap, StaticTransformerProvider, Transformer,
    COVERAGE_VARIABLE,
};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn read_map(path: &std::path::Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).expect("read map")).expect("parse map")
}

#[test]
fn identity_transform_with_coverage_maps_back_to_source() {
    let fixture = Fixture::new();
    let file = fixture.write("src/a.js", "module.exports = 1;");
    let provider = StaticTransformerProvider::new()
        .with("identity", Transformer::from_sync(Identity::default()));
    let mut config = fixture.config(vec![pattern(r"\.js$", "identity")]);
    config.force_coverage_match = Vec::new();
    let transformer = loaded(config, provider);

    let result = transformer
        .transform(&file, &RunOptions::with_coverage(true), None)
        .unwrap();

    assert!(result.code.contains(COVERAGE_VARIABLE));
    assert!(result.code.contains("module.exports = 1;"));
    assert_eq!(result.original_code, "module.exports = 1;");

    let map = read_map(result.source_map_path.as_deref().expect("map path"));
    assert_eq!(map["sourcesContent"][0], "module.exports = 1;");
}

#[test]
fn instrumented_and_plain_results_are_cached_separately() {
    let fixture = Fixture::new();
    let file = fixture.write("src/a.js", "a();");
    let transformer = loaded(fixture.config(vec![]), StaticTransformerProvider::new());

    let plain = transformer.transform(&file, &RunOptions::default(), None).unwrap();
    let instrumented = transformer
        .transform(&file, &RunOptions::with_coverage(true), None)
        .unwrap();

    assert_eq!(plain.code, "a();");
    assert!(instrumented.code.contains(COVERAGE_VARIABLE));
    assert!(instrumented.source_map_path.is_some());
    assert_eq!(transformer.project_cache().cached_result_count(), 2);
}

#[test]
fn rewritten_code_without_map_gets_no_map() {
    let fixture = Fixture::new();
    let file = fixture.write("src/a.js", "a();");
    let provider = StaticTransformerProvider::new()
        .with("suffix", Transformer::new().with_sync(Suffix::new("s")));
    let transformer = loaded(fixture.config(vec![pattern(r"\.js$", "suffix")]), provider);

    let result = transformer
        .transform(&file, &RunOptions::with_coverage(true), None)
        .unwrap();
    assert!(result.code.contains(COVERAGE_VARIABLE));
    assert!(result.code.contains("// s"));
    assert_eq!(result.source_map_path, None);
}

#[test]
fn rewritten_code_with_map_is_mapped_through_it() {
    let fixture = Fixture::new();
    let file = fixture.write("src/a.ts", "let a: number = 1;");
    let mapped = super::support::func(|source| {
        Ok(kiln_transform::TransformedSource::new("let a = 1;")
            .with_map(SourceMap::identity("a.ts", source)))
    });
    let provider = StaticTransformerProvider::new().with("ts", mapped);
    let transformer = loaded(fixture.config(vec![pattern(r"\.ts$", "ts")]), provider);

    let result = transformer
        .transform(&file, &RunOptions::with_coverage(true), None)
        .unwrap();
    let map = read_map(result.source_map_path.as_deref().expect("map path"));
    assert_eq!(map["sources"][0], "a.ts");
    assert_eq!(map["sourcesContent"][0], "let a: number = 1;");
}

#[test]
fn self_instrumenting_transformer_output_stands() {
    let fixture = Fixture::new();
    let file = fixture.write("src/a.js", "a();");
    let provider = StaticTransformerProvider::new().with(
        "own",
        Transformer::new()
            .with_sync(Suffix::new("instrumented by transformer"))
            .with_can_instrument(true),
    );
    let transformer = loaded(fixture.config(vec![pattern(r"\.js$", "own")]), provider);

    let result = transformer
        .transform(&file, &RunOptions::with_coverage(true), None)
        .unwrap();
    assert_eq!(result.code, "a();\n// instrumented by transformer");
}

#[test]
fn external_bytecode_coverage_never_instruments() {
    let fixture = Fixture::new();
    let file = fixture.write("src/a.js", "a();");
    let transformer = loaded(fixture.config(vec![]), StaticTransformerProvider::new());

    let run = RunOptions {
        coverage_provider: CoverageProvider::ExternalBytecode,
        ..RunOptions::with_coverage(true)
    };
    let result = transformer.transform(&file, &run, None).unwrap();
    assert_eq!(result.code, "a();");
}

#[test]
fn test_files_are_not_instrumented() {
    let fixture = Fixture::new();
    let file = fixture.write("src/a.test.js", "test();");
    let transformer = loaded(fixture.config(vec![]), StaticTransformerProvider::new());

    let result = transformer
        .transform(&file, &RunOptions::with_coverage(true), None)
        .unwrap();
    assert_eq!(result.code, "test();");
}

#[derive(Default)]
struct RecordingInstrumenter {
    calls: AtomicUsize,
}

impl Instrumenter for RecordingInstrumenter {
    fn instrument(&self, request: InstrumentRequest<'_>) -> Result<Instrumented, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Instrumented {
            code: format!("/* covered */{}", request.code),
            map: None,
        })
    }
}

#[test]
fn custom_instrumenter_replaces_the_bootstrap() {
    let fixture = Fixture::new();
    let file = fixture.write("src/a.js", "a();");
    let instrumenter = Arc::new(RecordingInstrumenter::default());
    let transformer = ScriptTransformer::new(
        fixture.config(vec![]),
        &ProjectCacheRegistry::new(),
        Arc::new(StaticTransformerProvider::new()),
    )
    .unwrap()
    .with_instrumenter(instrumenter.clone());
    futures::executor::block_on(transformer.load_transformers()).unwrap();

    let result = transformer
        .transform(&file, &RunOptions::with_coverage(true), None)
        .unwrap();
    assert_eq!(result.code, "/* covered */a();");
    assert_eq!(result.source_map_path, None);
    assert_eq!(instrumenter.calls.load(Ordering::SeqCst), 1);
}
