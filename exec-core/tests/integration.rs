//! End-to-end tests of the execution system: requests over an in-memory
//! stage, builtin and plugin computations, and diagnostics.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{attr, diameter_registry, p, spheres, system};
use exec_core::esf::MemoryStage;
use exec_core::exec::{geom, DefinitionRegistry, InputKey, System, ValueKey};
use exec_core::value::{Matrix4d, Time, Value, ValueType, Vec3d};
use exec_core::vdf::Context;
use exec_core::{DataManagerKind, ExecConfig, ExecError};

#[test]
fn attribute_values_compute() {
    let stage = spheres();
    let system = system(&stage, DefinitionRegistry::new());
    let request = system.build_request(vec![attr("/A.radius"), attr("/B.radius")]);

    let view = system.compute(&request);
    assert_eq!(view.len(), 2);
    assert_eq!(view.get_double(0), Some(1.0));
    assert_eq!(view.get_double(1), Some(2.0));
    assert_eq!(view.type_name(0), "double");
    assert!(system.take_errors().is_empty());
}

#[test]
fn plugin_computation_reads_its_inputs() {
    let stage = spheres();
    let runs = Arc::new(AtomicUsize::new(0));
    let system = system(&stage, diameter_registry(&runs));
    let request = system.build_request(vec![
        ValueKey::new(p("/A"), "diameter"),
        ValueKey::new(p("/B"), "diameter"),
    ]);

    let view = system.compute(&request);
    assert_eq!(view.get_double(0), Some(2.0));
    assert_eq!(view.get_double(1), Some(4.0));
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    // Nothing changed, so the cache answers.
    let (view, stats) = system.compute_with_stats(&request);
    assert_eq!(view.get_double(1), Some(4.0));
    assert_eq!(stats.computed, 0);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn failures_only_empty_their_own_values() {
    let stage = spheres();
    let runs = Arc::new(AtomicUsize::new(0));
    let system = system(&stage, diameter_registry(&runs));
    let request = system.build_request(vec![
        ValueKey::new(p("/A"), "diameter"),
        ValueKey::new(p("/A"), "circumference"),
        attr("/Missing.radius"),
    ]);

    let view = system.compute(&request);
    assert_eq!(view.get_double(0), Some(2.0));
    assert_eq!(view.get(1), Value::Empty);
    assert_eq!(view.get(2), Value::Empty);

    let errors = system.take_errors();
    assert_eq!(errors.len(), 2);
    assert!(errors
        .iter()
        .any(|e| matches!(e, ExecError::UnknownComputation { .. })));
    assert!(errors.iter().any(|e| matches!(e, ExecError::InvalidProvider(_))));
}

#[test]
fn attribute_computations_run_on_attributes() {
    let stage = spheres();
    stage.define_prim("/Box", "Cube").unwrap();
    stage.create_attribute("/Box.radius", ValueType::Double, 4.0).unwrap();
    let mut registry = DefinitionRegistry::new();
    assert!(registry.register_attribute_computation(
        "scaled",
        "radius",
        "Sphere",
        ValueType::Double,
        vec![InputKey::computation("value", "computeValue", ValueType::Double)],
        Arc::new(|ctx: &mut Context<'_>| {
            let value = ctx.input_or("value", 0.0);
            ctx.set_output(value * 10.0);
        }),
    ));
    let system = system(&stage, registry);
    let request = system.build_request(vec![
        ValueKey::new(p("/A.radius"), "scaled"),
        ValueKey::new(p("/B.radius"), "scaled"),
        ValueKey::new(p("/Box.radius"), "scaled"),
        ValueKey::new(p("/A"), "scaled"),
    ]);

    let view = system.compute(&request);
    assert_eq!(view.get_double(0), Some(10.0));
    assert_eq!(view.get_double(1), Some(20.0));
    assert_eq!(view.get(2), Value::Empty);
    assert_eq!(view.get(3), Value::Empty);
    let errors = system.take_errors();
    assert_eq!(errors.len(), 2);
    assert!(errors
        .iter()
        .all(|e| matches!(e, ExecError::UnknownComputation { .. })));

    system.did_change_objects(&stage.set_default("/A.radius", 3.0).unwrap());
    assert_eq!(system.compute(&request).get_double(0), Some(30.0));
}

#[test]
fn invalid_requests_compute_nothing() {
    let stage = spheres();
    let system = system(&stage, DefinitionRegistry::new());
    let request = system.build_request(vec![attr("/A.radius"), ValueKey::new(p("/A"), "")]);
    assert!(!request.is_valid());

    let view = system.compute(&request);
    assert_eq!(view.len(), 2);
    assert_eq!(view.get(0), Value::Empty);
    assert_eq!(system.program().node_count(), 0);
}

#[test]
fn time_is_an_input() {
    let stage = spheres();
    let mut registry = DefinitionRegistry::new();
    registry.register_prim_computation(
        "frame",
        "Sphere",
        ValueType::Double,
        vec![InputKey::time("t")],
        Arc::new(|ctx: &mut Context<'_>| {
            let frame = ctx.input::<Time>("t").and_then(|t| t.frame()).unwrap_or(-1.0);
            ctx.set_output(frame);
        }),
    );
    let system = system(&stage, registry);
    let request = system.build_request(vec![ValueKey::new(p("/A"), "frame"), ValueKey::time()]);

    assert_eq!(system.compute(&request).get_double(0), Some(-1.0));
    system.change_time(Time::new(24.0));
    let view = system.compute(&request);
    assert_eq!(view.get_double(0), Some(24.0));
    assert_eq!(view.get_as::<Time>(1), Some(Time::new(24.0)));
}

#[test]
fn metadata_values_follow_edits() {
    let stage = spheres();
    assert!(stage.register_metadata_field("weight", Value::Double(0.0)));
    stage.set_metadata("/A", "weight", 3.0).unwrap();
    let system = system(&stage, DefinitionRegistry::new());
    let request = system.build_request(vec![
        ValueKey::metadata(p("/A"), "weight"),
        ValueKey::metadata(p("/B"), "weight"),
    ]);

    let view = system.compute(&request);
    assert_eq!(view.get_double(0), Some(3.0));
    assert_eq!(view.get_double(1), Some(0.0));

    let edits = stage.set_metadata("/B", "weight", 5.0).unwrap();
    system.did_change_objects(&edits);
    let view = system.compute(&request);
    assert_eq!(view.get_double(0), Some(3.0));
    assert_eq!(view.get_double(1), Some(5.0));
}

fn translation(x: f64, y: f64, z: f64) -> Matrix4d {
    Matrix4d::from_translation(Vec3d([x, y, z]))
}

fn xform_stage() -> MemoryStage {
    let stage = MemoryStage::new();
    stage.define_prim("/World", "Xform").unwrap();
    stage.define_prim("/World/Arm", "Xform").unwrap();
    stage.define_prim("/World/Arm/Hand", "Xform").unwrap();
    stage
        .create_attribute("/World.xformOp:transform", ValueType::Matrix4d, translation(1.0, 0.0, 0.0))
        .unwrap();
    stage
        .create_attribute("/World/Arm.xformOp:transform", ValueType::Matrix4d, translation(0.0, 2.0, 0.0))
        .unwrap();
    stage
        .create_attribute("/World/Arm/Hand.xformOp:transform", ValueType::Matrix4d, translation(0.0, 0.0, 3.0))
        .unwrap();
    stage
}

#[test]
fn world_transforms_compose_ancestors() {
    let stage = xform_stage();
    let mut registry = DefinitionRegistry::new();
    assert!(geom::register(&mut registry));
    let system = system(&stage, registry);
    let key = |path: &str| ValueKey::new(p(path), geom::COMPUTE_LOCAL_TO_WORLD_TRANSFORM);
    let request = system.build_request(vec![key("/World"), key("/World/Arm/Hand")]);

    let view = system.compute(&request);
    assert_eq!(view.get_matrix4d(0).map(|m| m.translation()), Some(Vec3d([1.0, 0.0, 0.0])));
    assert_eq!(view.get_matrix4d(1).map(|m| m.translation()), Some(Vec3d([1.0, 2.0, 3.0])));

    let edits = stage
        .set_default("/World.xformOp:transform", translation(5.0, 0.0, 0.0))
        .unwrap();
    system.did_change_objects(&edits);
    let view = system.compute(&request);
    assert_eq!(view.get_matrix4d(1).map(|m| m.translation()), Some(Vec3d([5.0, 2.0, 3.0])));
    assert!(system.take_errors().is_empty());
}

#[test]
fn diagnostics_describe_the_network() {
    let stage = spheres();
    let runs = Arc::new(AtomicUsize::new(0));
    let system = system(&stage, diameter_registry(&runs));
    let request = system.build_request(vec![ValueKey::new(p("/A"), "diameter")]);
    system.compute(&request);

    let diagnostics = system.diagnostics();
    let stats = diagnostics.network_stats();
    assert_eq!(stats.nodes, 2);
    assert_eq!(stats.connections, 1);
    assert_eq!(stats.requests, 1);

    let dot = diagnostics.to_dot();
    assert!(dot.starts_with("digraph ExecNetwork {"));
    assert!(dot.contains("->"));
    assert!(diagnostics.stats_json().unwrap().contains("\"nodes\": 2"));

    let mut buffer = Vec::new();
    diagnostics.write_dot(&mut buffer).unwrap();
    assert_eq!(String::from_utf8(buffer).unwrap(), dot);
}

#[test]
fn invalidate_all_recompiles_from_scratch() {
    let stage = spheres();
    let runs = Arc::new(AtomicUsize::new(0));
    let system = system(&stage, diameter_registry(&runs));
    let request = system.build_request(vec![ValueKey::new(p("/A"), "diameter")]);
    assert_eq!(system.compute(&request).get_double(0), Some(2.0));

    system.diagnostics().invalidate_all();
    assert_eq!(system.program().node_count(), 0);
    assert!(!request.is_prepared());

    assert_eq!(system.compute(&request).get_double(0), Some(2.0));
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn config_loads_from_json() {
    let config =
        ExecConfig::from_json(r#"{ "worker_threads": 2, "data_manager": "hash" }"#).unwrap();
    assert_eq!(config.worker_threads, Some(2));
    assert_eq!(config.data_manager, DataManagerKind::Hash);

    let stage = spheres();
    let system = System::new(Arc::new(stage), DefinitionRegistry::new(), config).unwrap();
    let request = system.build_request(vec![attr("/B.radius")]);
    assert_eq!(system.compute(&request).get_double(0), Some(2.0));

    assert!(ExecConfig::from_json(r#"{ "worker_threads": 0 }"#).is_err());
}

#[test]
fn requests_from_another_system_are_refused() {
    let stage = spheres();
    let first = system(&stage, DefinitionRegistry::new());
    let second = system(&stage, DefinitionRegistry::new());
    let request = first.build_request(vec![attr("/A.radius")]);

    assert_eq!(second.compute(&request).get(0), Value::Empty);
    assert_eq!(first.compute(&request).get_double(0), Some(1.0));
}
