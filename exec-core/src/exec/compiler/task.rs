//! Compilation tasks
//!
//! A leaf task compiles one value key: it finds the provider object and
//! the computation's definition, creates the node, and then requests the
//! source key of every input. The node's output is published to waiting
//! consumers as soon as the node exists, before its own inputs are
//! resolved, so a task never waits on anything that might wait on it.
//!
//! An input recompilation task re-resolves the providers of one input
//! whose connections were severed by uncompilation.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use rayon::Scope;
use tracing::trace;

use super::state::Entry;
use super::Round;
use crate::error::{report, DiagnosticScope, ExecError};
use crate::esf::{
    AttributeInterface, Journal, ObjectInterface, PrimInterface, RelationshipInterface,
    ScenePath, SceneObject,
};
use crate::exec::definition::ComputationDefinition;
use crate::exec::input_key::{DynamicTraversal, InputKey, LocalTraversal};
use crate::exec::value_key::ValueKey;
use crate::vdf::{InputId, Mask, MaskedOutput, NodeId, OutputId};

/// Compile the key of `entry`.
pub(super) fn compile_leaf<'s>(scope: &Scope<'s>, round: &'s Round<'s>, entry: Arc<Entry>) {
    round.tasks.fetch_add(1, Ordering::Relaxed);
    let _diagnostics = round.sink.clone().map(DiagnosticScope::enter);
    let key = entry.key();
    trace!(key = %key, "compiling");

    let mut journal = Journal::new();
    let Some(object) = round.stage.object_at_path(key.provider(), Some(&mut journal)) else {
        report(ExecError::InvalidProvider(key.provider().clone()));
        round.state.resolve(&entry, None);
        return;
    };
    let Some(definition) = find_definition(round, &object, key, &mut journal) else {
        report(ExecError::UnknownComputation {
            provider: key.provider().clone(),
            computation: key.computation().to_string(),
        });
        round.state.resolve(&entry, None);
        return;
    };
    let Some(node) = definition.compile_node(&object, key, Some(&mut journal), Some(round.program))
    else {
        round.state.resolve(&entry, None);
        return;
    };

    let output = MaskedOutput::new(OutputId::new(node, 0), Mask::all_ones(1));
    round.state.resolve(&entry, Some(output));

    let inputs = definition.input_keys(&object, Some(&mut journal));
    for input in inputs.iter() {
        connect_input(scope, round, &object, node, input, &mut journal);
    }
    round.program.merge_journal(node, &journal);
}

/// Reconnect `input`, whose connections were severed.
pub(super) fn recompile_input<'s>(scope: &Scope<'s>, round: &'s Round<'s>, input: InputId) {
    round.tasks.fetch_add(1, Ordering::Relaxed);
    let _diagnostics = round.sink.clone().map(DiagnosticScope::enter);

    let record = round
        .program
        .with_record(input.node, |r| (r.key.clone(), r.input_keys.clone()));
    let Some((Some(key), input_keys)) = record else {
        return;
    };
    let Some(name) = round.program.input_name(input) else {
        return;
    };
    trace!(key = %key, input = %name, "recompiling input");

    let mut journal = Journal::new();
    let Some(origin) = round.stage.object_at_path(key.provider(), Some(&mut journal)) else {
        return;
    };
    for input_key in input_keys.iter().filter(|k| *k.input_name == *name) {
        connect_input(scope, round, &origin, input.node, input_key, &mut journal);
    }
    round.program.merge_journal(input.node, &journal);
}

fn find_definition(
    round: &Round<'_>,
    object: &SceneObject,
    key: &ValueKey,
    journal: &mut Journal,
) -> Option<ComputationDefinition> {
    match key.dispatched_from() {
        Some(schema) => round.registry.find_dispatched(schema, key.computation()),
        None => round.registry.find(object, key.computation(), Some(journal)),
    }
}

/// Request the source of every provider of `input` and connect it to the
/// matching connector of `node`.
fn connect_input<'s>(
    scope: &Scope<'s>,
    round: &'s Round<'s>,
    origin: &SceneObject,
    node: NodeId,
    input: &InputKey,
    journal: &mut Journal,
) {
    let Some(index) = round.program.input_index(node, &input.input_name) else {
        return;
    };
    let target = InputId::new(node, index);

    let dispatch_schema = if input.falls_back_to_dispatched {
        origin
            .prim(Some(&mut *journal))
            .map(|prim| prim.type_name(Some(&mut *journal)))
    } else {
        None
    };

    for provider in resolve_providers(round, origin, input, &mut *journal) {
        let mut key = ValueKey::new(provider.path(), &input.computation);
        if let Some(id) = &input.disambiguating_id {
            key = key.with_disambiguating_id(id);
        }
        if let Some(schema) = &dispatch_schema {
            let local = round.registry.find(&provider, &input.computation, Some(&mut *journal));
            if local.is_none()
                && round.registry.find_dispatched(schema, &input.computation).is_some()
            {
                key = key.dispatched(schema);
            }
        }

        let (entry, is_new) = round.state.request(&key, round.program);
        if is_new {
            let spawned = entry.clone();
            scope.spawn(move |scope| compile_leaf(scope, round, spawned));
        }
        round.state.connect_when_resolved(&entry, target);
    }
}

/// The objects providing `input` for a computation on `origin`.
fn resolve_providers(
    round: &Round<'_>,
    origin: &SceneObject,
    input: &InputKey,
    journal: &mut Journal,
) -> Vec<SceneObject> {
    let local = match &input.local {
        LocalTraversal::Origin => Some(origin.clone()),
        LocalTraversal::Property(name) => property(origin, name, journal),
        LocalTraversal::Stage => Some(SceneObject::Prim(round.stage.pseudo_root())),
    };
    let Some(local) = local else {
        return Vec::new();
    };

    match input.dynamic {
        DynamicTraversal::Local => vec![local],
        DynamicTraversal::RelationshipTargets => {
            let Some(relationship) = local.as_relationship() else {
                return Vec::new();
            };
            let targets = relationship.targets(Some(&mut *journal));
            objects_at(round, &targets, journal)
        }
        DynamicTraversal::ConnectionTargets => {
            let Some(attribute) = local.as_attribute() else {
                return Vec::new();
            };
            let sources = attribute.connections(Some(&mut *journal));
            objects_at(round, &sources, journal)
        }
        DynamicTraversal::NamespaceAncestor => {
            let mut current = local.prim(Some(&mut *journal));
            while let Some(prim) = current {
                let Some(parent) = prim.parent(Some(&mut *journal)) else { break };
                if parent.path().is_absolute_root() {
                    break;
                }
                let candidate = SceneObject::Prim(parent.clone());
                if round
                    .registry
                    .find(&candidate, &input.computation, Some(&mut *journal))
                    .is_some()
                {
                    return vec![candidate];
                }
                current = Some(parent);
            }
            Vec::new()
        }
    }
}

/// The attribute or relationship `name` on the prim of `origin`.
fn property(origin: &SceneObject, name: &str, journal: &mut Journal) -> Option<SceneObject> {
    let prim = origin.prim(Some(&mut *journal))?;
    if let Some(attribute) = prim.attribute(name, Some(&mut *journal)) {
        return Some(SceneObject::Attribute(attribute));
    }
    prim.relationship(name, Some(journal)).map(SceneObject::Relationship)
}

fn objects_at(
    round: &Round<'_>,
    paths: &[ScenePath],
    journal: &mut Journal,
) -> Vec<SceneObject> {
    paths
        .iter()
        .filter_map(|path| round.stage.object_at_path(path, Some(&mut *journal)))
        .collect()
}
