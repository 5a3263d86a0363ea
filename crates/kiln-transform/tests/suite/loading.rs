use super::support::{pattern, Fixture, Identity, TaggedFactory};
use futures::executor::block_on;
use kiln_transform::{
    ProjectCacheRegistry, RunOptions, ScriptTransformer, StaticTransformerProvider,
    TransformError, TransformPattern, Transformer,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

fn tagged(tag: &str) -> TransformPattern {
    TransformPattern::new(r"\.js$", "tagged", json!({ "tag": tag }))
}

fn tagged_provider() -> StaticTransformerProvider {
    let mut provider = StaticTransformerProvider::new();
    provider.register_factory("tagged", Arc::new(TaggedFactory));
    provider
}

#[test]
fn transforms_before_loading_fail() {
    let fixture = Fixture::new();
    let file = fixture.write("src/a.js", "a();");
    let transformer = ScriptTransformer::new(
        fixture.config(vec![]),
        &ProjectCacheRegistry::new(),
        Arc::new(StaticTransformerProvider::new()),
    )
    .unwrap();

    let run = RunOptions::default();
    assert!(matches!(
        transformer.transform(&file, &run, None),
        Err(TransformError::NotLoaded)
    ));
    assert!(matches!(
        transformer.transform_source(&file, "a();", &run, false),
        Err(TransformError::NotLoaded)
    ));
    assert!(matches!(
        transformer.transform_json(&file, &run, "{}"),
        Err(TransformError::NotLoaded)
    ));

    block_on(transformer.load_transformers()).unwrap();
    assert!(transformer.transform(&file, &run, None).is_ok());
}

#[test]
fn transformer_without_process_is_rejected_at_load() {
    let fixture = Fixture::new();
    let provider = StaticTransformerProvider::new().with("empty", Transformer::new());
    let transformer = ScriptTransformer::new(
        fixture.config(vec![pattern(r"\.js$", "empty")]),
        &ProjectCacheRegistry::new(),
        Arc::new(provider),
    )
    .unwrap();

    let err = block_on(transformer.load_transformers()).unwrap_err();
    assert!(matches!(err, TransformError::MissingProcess { ref module } if module == "empty"));
    assert_eq!(transformer.transformer_count(), 0);
}

#[test]
fn unknown_module_is_a_load_error() {
    let fixture = Fixture::new();
    let transformer = ScriptTransformer::new(
        fixture.config(vec![pattern(r"\.js$", "missing-transformer")]),
        &ProjectCacheRegistry::new(),
        Arc::new(StaticTransformerProvider::new()),
    )
    .unwrap();

    let err = block_on(transformer.load_transformers()).unwrap_err();
    let TransformError::Load { module, message } = err else {
        panic!("expected a load error");
    };
    assert_eq!(module, "missing-transformer");
    assert!(message.contains("missing-transformer"));
}

#[test]
fn factory_failure_is_a_load_error() {
    let fixture = Fixture::new();
    let transformer = ScriptTransformer::new(
        fixture.config(vec![TransformPattern::new(r"\.js$", "tagged", json!({}))]),
        &ProjectCacheRegistry::new(),
        Arc::new(tagged_provider()),
    )
    .unwrap();

    let err = block_on(transformer.load_transformers()).unwrap_err();
    assert!(matches!(err, TransformError::Load { ref message, .. } if message.contains("tag")));
}

#[test]
fn factory_receives_entry_options() {
    let fixture = Fixture::new();
    let file = fixture.write("src/a.js", "a();");
    let transformer = ScriptTransformer::new(
        fixture.config(vec![tagged("blue")]),
        &ProjectCacheRegistry::new(),
        Arc::new(tagged_provider()),
    )
    .unwrap();
    block_on(transformer.load_transformers()).unwrap();

    let result = transformer.transform(&file, &RunOptions::default(), None).unwrap();
    assert_eq!(
        result.code,
        "a();\n// tag=blue config={\"tag\":\"blue\"} instrument=false"
    );
}

#[test]
fn each_pattern_module_pair_is_resolved_once() {
    let fixture = Fixture::new();
    let provider = StaticTransformerProvider::new()
        .with("a", Transformer::from_sync(Identity::default()))
        .with("b", Transformer::from_sync(Identity::default()));
    let transformer = ScriptTransformer::new(
        fixture.config(vec![
            pattern(r"\.js$", "a"),
            pattern(r"\.ts$", "a"),
            pattern(r"\.css$", "b"),
        ]),
        &ProjectCacheRegistry::new(),
        Arc::new(provider),
    )
    .unwrap();

    block_on(transformer.load_transformers()).unwrap();
    assert_eq!(transformer.transformer_count(), 3);

    let first = transformer.transformer_for(Path::new("/p/a.js")).unwrap().unwrap();
    block_on(transformer.load_transformers()).unwrap();
    let again = transformer.transformer_for(Path::new("/p/a.js")).unwrap().unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(transformer.transformer_count(), 3);
}

#[test]
fn projects_with_different_configs_do_not_share_results() {
    let fixture = Fixture::new();
    let file = fixture.write("src/a.js", "a();");
    let registry = ProjectCacheRegistry::new();
    let run = RunOptions::default();

    let red = ScriptTransformer::new(fixture.config(vec![tagged("red")]), &registry, Arc::new(tagged_provider()))
        .unwrap();
    let green = ScriptTransformer::new(fixture.config(vec![tagged("green")]), &registry, Arc::new(tagged_provider()))
        .unwrap();
    block_on(red.load_transformers()).unwrap();
    block_on(green.load_transformers()).unwrap();

    assert!(!Arc::ptr_eq(red.project_cache(), green.project_cache()));
    assert!(red.transform(&file, &run, None).unwrap().code.contains("tag=red"));
    assert!(green.transform(&file, &run, None).unwrap().code.contains("tag=green"));
}

#[test]
fn projects_with_the_same_config_share_state() {
    let fixture = Fixture::new();
    let file = fixture.write("src/a.js", "a();");
    let registry = ProjectCacheRegistry::new();
    let run = RunOptions::default();

    let first = ScriptTransformer::new(fixture.config(vec![tagged("red")]), &registry, Arc::new(tagged_provider()))
        .unwrap();
    let second = ScriptTransformer::new(fixture.config(vec![tagged("red")]), &registry, Arc::new(tagged_provider()))
        .unwrap();
    block_on(first.load_transformers()).unwrap();
    block_on(second.load_transformers()).unwrap();

    assert!(Arc::ptr_eq(first.project_cache(), second.project_cache()));
    assert!(Arc::ptr_eq(first.cache_fs(), second.cache_fs()));

    let a = first.transform(&file, &run, None).unwrap();
    let b = second.transform(&file, &run, None).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}

#[test]
fn invalid_transform_pattern_is_reported_on_construction() {
    let fixture = Fixture::new();
    let err = ScriptTransformer::new(
        fixture.config(vec![pattern("([", "x")]),
        &ProjectCacheRegistry::new(),
        Arc::new(StaticTransformerProvider::new()),
    )
    .unwrap_err();
    assert!(matches!(err, TransformError::InvalidPattern { .. }));
}
