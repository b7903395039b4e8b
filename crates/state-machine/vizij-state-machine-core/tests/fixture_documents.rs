use std::collections::HashMap;

use vizij_state_machine_core::{
    clip_hash, ClipHash, Controller, ControllerDocument, InputValue, Instance, RoundRobin, Uid,
};
use vizij_test_fixtures::state_machines;

fn controller(name: &str) -> Controller {
    let json = state_machines::json(name).expect("fixture json");
    Controller::from_json(&json).unwrap_or_else(|err| panic!("fixture '{name}': {err}"))
}

fn library(entries: &[(&str, f32)]) -> HashMap<ClipHash, f32> {
    entries
        .iter()
        .map(|(name, length)| (clip_hash(name), *length))
        .collect()
}

#[test]
fn every_fixture_compiles_and_round_trips() {
    for key in state_machines::keys() {
        let _: ControllerDocument = state_machines::load(&key).expect("document parses");
        let mut ctl = controller(&key);
        let graph = ctl.compile();
        assert!(!graph.states().is_empty(), "{key}: empty graph");

        let bytes = ctl.serialize();
        let mut loaded = Controller::deserialize(&bytes)
            .unwrap_or_else(|err| panic!("fixture '{key}' failed to reload: {err}"));
        assert_eq!(loaded.serialize(), bytes, "{key}: unstable encoding");
        assert_eq!(loaded.compile().states(), graph.states(), "{key}");
    }
}

#[test]
fn locomotion_lands_then_walks() {
    let mut ctl = controller("locomotion");
    let root = |name: &str| ctl.child_by_name(Uid::ROOT, name).unwrap();
    let (idle, walk, fall) = (root("Idle"), root("Walk"), root("Fall"));
    let clips = library(&[("idle", 2.0), ("walk", 1.0), ("run", 0.8), ("fall", 0.5)]);
    let mut inst = Instance::new(ctl.compile());

    // zeroed inputs: not grounded
    assert_eq!(inst.current_node(), Some(fall));

    inst.set_input("grounded", InputValue::Bool(true)).unwrap();
    inst.tick(0.3, &clips);
    assert_eq!(inst.current_node(), Some(fall));
    inst.tick(0.3, &clips);
    assert_eq!(inst.current_node(), Some(idle));

    inst.set_input("speed", InputValue::Float(1.0)).unwrap();
    let out = inst.tick(0.1, &clips);
    assert_eq!(out.leaves[0].state, walk);
    assert_eq!(out.leaves[0].weight, 0.0);
    assert_eq!(inst.current_node(), Some(walk));

    inst.set_input("turn", InputValue::Float(0.3)).unwrap();
    let out = inst.tick(0.1, &clips);
    assert_eq!(out.leaves[0].root_rotation, Some(0.3));
    assert_eq!(out.leaves[1].state, idle);
    assert_eq!(out.leaves[1].root_rotation, None);
}

#[test]
fn combat_swing_consumes_attack_and_returns_to_guard() {
    let mut ctl = controller("combat-layered");
    let combat = ctl.child_by_name(Uid::ROOT, "Combat").unwrap();
    let guard = ctl.child_by_name(combat, "Guard").unwrap();
    let swing = ctl.child_by_name(combat, "Swing").unwrap();
    let clips = library(&[("relaxed", 1.0), ("guard", 1.0), ("swing", 1.0)]);
    let mut inst = Instance::new(ctl.compile());
    assert_eq!(
        inst.current_node(),
        ctl.child_by_name(Uid::ROOT, "Relaxed")
    );

    inst.set_input("armed", InputValue::Bool(true)).unwrap();
    inst.tick(0.1, &clips);
    assert_eq!(inst.active_path(), vec![Uid::ROOT, combat, guard]);

    inst.set_input("attack", InputValue::Bool(true)).unwrap();
    inst.tick(0.1, &clips);
    assert_eq!(inst.current_node(), Some(swing));

    let out = inst.tick(0.1, &clips);
    assert_eq!(out.events.len(), 1);
    assert_eq!(out.events[0].state, swing);
    assert_eq!(inst.get_input("attack"), Some(InputValue::Bool(false)));
    assert_eq!(inst.current_node(), Some(swing));

    inst.tick(0.35, &clips);
    assert_eq!(inst.get_input("combo"), Some(InputValue::Int(1)));

    inst.tick(0.6, &clips);
    assert_eq!(inst.current_node(), Some(guard));
}

#[test]
fn idle_variants_rotate_under_round_robin() {
    let mut ctl = controller("idle-variants");
    let clips = library(&[("idle_a", 1.0), ("idle_b", 1.0), ("idle_c", 1.0)]);
    let mut inst = Instance::with_selector(ctl.compile(), Box::new(RoundRobin::default()));

    let mut played = Vec::new();
    for _ in 0..4 {
        let out = inst.tick(0.6, &clips);
        played.push(out.leaves[0].clips[0]);
    }
    // 0.6, 1.2 -> 0.2, 0.8, 1.4 -> 0.4
    assert_eq!(
        played,
        vec![
            clip_hash("idle_a"),
            clip_hash("idle_b"),
            clip_hash("idle_b"),
            clip_hash("idle_c"),
        ]
    );
}
