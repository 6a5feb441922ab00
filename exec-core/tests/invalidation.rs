//! Scene edits and time changes: what gets invalidated, what gets
//! recompiled, and when request callbacks fire.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{attr, diameter_registry, p, spheres, system};
use exec_core::esf::{MemoryStage, SceneEdit};
use exec_core::exec::{DefinitionRegistry, InputKey, Request, System, ValueKey};
use exec_core::value::{InvalidationTimeInterval, Time, ValueType};
use exec_core::vdf::Context;
use exec_core::ExecConfig;
use parking_lot::Mutex;

/// Records every callback a request receives.
#[derive(Default)]
struct Calls {
    values: Mutex<Vec<Vec<usize>>>,
    times: Mutex<Vec<Vec<usize>>>,
}

fn watched(system: &System, keys: Vec<ValueKey>) -> (Request, Arc<Calls>) {
    let calls = Arc::new(Calls::default());
    let on_value = calls.clone();
    let on_time = calls.clone();
    let request = system.build_request_with_callbacks(
        keys,
        Box::new(move |indices: &[usize], interval: &InvalidationTimeInterval| {
            assert!(interval.is_full());
            on_value.values.lock().push(indices.to_vec());
        }),
        Box::new(move |indices: &[usize]| on_time.times.lock().push(indices.to_vec())),
    );
    (request, calls)
}

#[test]
fn edits_notify_only_dependent_requests() {
    let stage = spheres();
    let runs = Arc::new(AtomicUsize::new(0));
    let system = system(&stage, diameter_registry(&runs));
    let (a, a_calls) = watched(&system, vec![ValueKey::new(p("/A"), "diameter")]);
    let (b, b_calls) = watched(&system, vec![attr("/A.radius"), attr("/B.radius")]);
    system.compute(&a);
    system.compute(&b);

    system.did_change_objects(&stage.set_default("/B.radius", 3.0).unwrap());
    assert!(a_calls.values.lock().is_empty());
    assert_eq!(*b_calls.values.lock(), vec![vec![1]]);

    system.did_change_objects(&stage.set_default("/A.radius", 5.0).unwrap());
    assert_eq!(*a_calls.values.lock(), vec![vec![0]]);
    // `b` was not computed since its last notification.
    assert_eq!(b_calls.values.lock().len(), 1);

    assert_eq!(system.compute(&a).get_double(0), Some(10.0));
    let view = system.compute(&b);
    assert_eq!(view.get_double(0), Some(5.0));
    assert_eq!(view.get_double(1), Some(3.0));
}

#[test]
fn callbacks_fire_once_per_computation() {
    let stage = spheres();
    let runs = Arc::new(AtomicUsize::new(0));
    let system = system(&stage, diameter_registry(&runs));
    let (request, calls) = watched(&system, vec![ValueKey::new(p("/A"), "diameter")]);

    // Never computed, never notified.
    system.did_change_objects(&stage.set_default("/A.radius", 2.0).unwrap());
    assert!(calls.values.lock().is_empty());

    system.compute(&request);
    for radius in [3.0, 4.0, 5.0] {
        system.did_change_objects(&stage.set_default("/A.radius", radius).unwrap());
    }
    assert_eq!(calls.values.lock().len(), 1);

    assert_eq!(system.compute(&request).get_double(0), Some(10.0));
    system.did_change_objects(&stage.set_default("/A.radius", 6.0).unwrap());
    assert_eq!(calls.values.lock().len(), 2);
}

#[test]
fn unrelated_edits_keep_the_cache() {
    let stage = spheres();
    let runs = Arc::new(AtomicUsize::new(0));
    let system = system(&stage, diameter_registry(&runs));
    let request = system.build_request(vec![ValueKey::new(p("/A"), "diameter")]);
    system.compute(&request);

    system.did_change_objects(&stage.set_default("/B.radius", 7.0).unwrap());
    let (view, stats) = system.compute_with_stats(&request);
    assert_eq!(view.get_double(0), Some(2.0));
    assert_eq!(stats.computed, 0);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn editing_a_constant_rebuilds_only_it() {
    let stage = spheres();
    let runs = Arc::new(AtomicUsize::new(0));
    let system = system(&stage, diameter_registry(&runs));
    let request = system.build_request(vec![
        ValueKey::new(p("/A"), "diameter"),
        ValueKey::new(p("/B"), "diameter"),
    ]);
    system.compute(&request);
    let nodes = system.program().node_count();

    system.did_change_objects(&stage.set_default("/A.radius", 4.0).unwrap());
    assert_eq!(system.program().inputs_requiring_recompilation(), 1);

    let view = system.compute(&request);
    assert_eq!(view.get_double(0), Some(8.0));
    assert_eq!(view.get_double(1), Some(4.0));
    assert_eq!(system.program().node_count(), nodes);
    assert_eq!(system.program().inputs_requiring_recompilation(), 0);
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

fn animated() -> MemoryStage {
    let stage = spheres();
    stage.set_time_sample("/A.radius", 1.0, 4.0).unwrap();
    stage.set_time_sample("/A.radius", 10.0, 8.0).unwrap();
    stage
}

#[test]
fn time_changes_invalidate_only_changed_values() {
    let stage = animated();
    let system = system(&stage, DefinitionRegistry::new());
    let (request, calls) = watched(&system, vec![attr("/A.radius"), attr("/B.radius")]);

    system.change_time(Time::new(1.0));
    assert_eq!(system.compute(&request).get_double(0), Some(4.0));

    // Held interpolation: frames 1 and 5 resolve to the same sample.
    system.change_time(Time::new(5.0));
    assert!(calls.times.lock().is_empty());
    let (view, stats) = system.compute_with_stats(&request);
    assert_eq!(view.get_double(0), Some(4.0));
    assert_eq!(stats.computed, 0);

    system.change_time(Time::new(10.0));
    assert_eq!(*calls.times.lock(), vec![vec![0]]);
    let (view, stats) = system.compute_with_stats(&request);
    assert_eq!(view.get_double(0), Some(8.0));
    assert_eq!(view.get_double(1), Some(2.0));
    assert_eq!(stats.computed, 1);
    assert!(calls.values.lock().is_empty());
}

#[test]
fn time_samples_turn_a_constant_into_an_input() {
    let stage = spheres();
    let runs = Arc::new(AtomicUsize::new(0));
    let system = system(&stage, diameter_registry(&runs));
    let request = system.build_request(vec![ValueKey::new(p("/A"), "diameter")]);
    system.change_time(Time::new(1.0));
    assert_eq!(system.compute(&request).get_double(0), Some(2.0));

    system.did_change_objects(&stage.set_time_sample("/A.radius", 1.0, 3.0).unwrap());
    system.did_change_objects(&stage.set_time_sample("/A.radius", 20.0, 6.0).unwrap());
    assert_eq!(system.compute(&request).get_double(0), Some(6.0));

    system.change_time(Time::new(20.0));
    assert_eq!(system.compute(&request).get_double(0), Some(12.0));
}

fn sum_of_targets() -> DefinitionRegistry {
    let mut registry = DefinitionRegistry::new();
    registry.register_prim_computation(
        "total",
        "Group",
        ValueType::Double,
        vec![InputKey::relationship_targets(
            "radii",
            "members",
            "computeValue",
            ValueType::Double,
        )],
        Arc::new(|ctx: &mut Context<'_>| {
            let total: f64 = ctx
                .input_values("radii")
                .iter()
                .filter_map(|v| v.get::<f64>())
                .sum();
            ctx.set_output(total);
        }),
    );
    registry
}

#[test]
fn retargeting_a_relationship_recompiles() {
    let stage = spheres();
    stage.define_prim("/G", "Group").unwrap();
    stage.create_relationship("/G.members", &["/A.radius"]).unwrap();
    let system = system(&stage, sum_of_targets());
    let (request, calls) = watched(&system, vec![ValueKey::new(p("/G"), "total")]);
    assert_eq!(system.compute(&request).get_double(0), Some(1.0));

    let edits = stage.set_targets("/G.members", &["/A.radius", "/B.radius"]).unwrap();
    system.did_change_objects(&edits);
    assert_eq!(calls.values.lock().len(), 1);
    assert_eq!(system.compute(&request).get_double(0), Some(3.0));
}

#[test]
fn removing_a_prim_empties_its_values() {
    let stage = spheres();
    let system = system(&stage, DefinitionRegistry::new());
    let request = system.build_request(vec![attr("/A.radius"), attr("/B.radius")]);
    system.compute(&request);

    system.did_change_objects(&stage.remove_prim("/A").unwrap());
    let view = system.compute(&request);
    assert_eq!(view.get_double(0), None);
    assert_eq!(view.get_double(1), Some(2.0));

    let edits: Vec<SceneEdit> = [
        stage.define_prim("/A", "Sphere").unwrap(),
        stage.create_attribute("/A.radius", ValueType::Double, 9.0).unwrap(),
    ]
    .concat();
    system.did_change_objects(&edits);
    assert_eq!(system.compute(&request).get_double(0), Some(9.0));
}

#[test]
fn dropped_requests_release_their_nodes() {
    let stage = spheres();
    let runs = Arc::new(AtomicUsize::new(0));
    let system = System::new(
        Arc::new(stage.clone()),
        diameter_registry(&runs),
        ExecConfig::new().with_uncompile_unreachable(true),
    )
    .unwrap();

    let first = system.build_request(vec![ValueKey::new(p("/A"), "diameter")]);
    system.compute(&first);
    assert_eq!(system.program().node_count(), 2);
    drop(first);

    let second = system.build_request(vec![attr("/B.radius")]);
    system.compute(&second);
    assert_eq!(system.program().node_count(), 1);
    assert!(system
        .program()
        .compiled_output(&ValueKey::new(p("/A"), "diameter"))
        .is_none());
}

#[test]
fn prepared_requests_are_not_recompiled() {
    let stage = spheres();
    let runs = Arc::new(AtomicUsize::new(0));
    let system = system(&stage, diameter_registry(&runs));
    let request = system.build_request(vec![ValueKey::new(p("/A"), "diameter")]);

    let stats = system.prepare_request(&request).unwrap();
    assert_eq!(stats.keys, 2);
    assert!(request.is_prepared());
    assert!(system.prepare_request(&request).is_none());

    let nodes = system.program().node_count();
    system.compute(&request);
    system.compute(&request);
    assert_eq!(system.program().node_count(), nodes);
}
