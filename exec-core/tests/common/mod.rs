//! Shared scene fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use exec_core::esf::{MemoryStage, ScenePath};
use exec_core::exec::{DefinitionRegistry, InputKey, System, ValueKey};
use exec_core::value::ValueType;
use exec_core::vdf::Context;
use exec_core::ExecConfig;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn p(path: &str) -> ScenePath {
    ScenePath::new(path).unwrap()
}

pub fn attr(path: &str) -> ValueKey {
    ValueKey::attribute_value(p(path))
}

/// Two spheres, `/A` and `/B`, with radii 1 and 2.
pub fn spheres() -> MemoryStage {
    let stage = MemoryStage::new();
    stage.define_prim("/A", "Sphere").unwrap();
    stage.define_prim("/B", "Sphere").unwrap();
    stage.create_attribute("/A.radius", ValueType::Double, 1.0).unwrap();
    stage.create_attribute("/B.radius", ValueType::Double, 2.0).unwrap();
    stage
}

/// Registers `diameter` on spheres, counting how often it runs.
pub fn diameter_registry(runs: &Arc<AtomicUsize>) -> DefinitionRegistry {
    let runs = runs.clone();
    let mut registry = DefinitionRegistry::new();
    assert!(registry.register_prim_computation(
        "diameter",
        "Sphere",
        ValueType::Double,
        vec![InputKey::attribute_value("radius", ValueType::Double)],
        Arc::new(move |ctx: &mut Context<'_>| {
            runs.fetch_add(1, Ordering::SeqCst);
            let radius = ctx.input_or("radius", 0.0);
            ctx.set_output(2.0 * radius);
        }),
    ));
    registry
}

pub fn system(stage: &MemoryStage, registry: DefinitionRegistry) -> System {
    init_tracing();
    System::new(Arc::new(stage.clone()), registry, ExecConfig::new()).unwrap()
}
