use std::collections::HashMap;

use vizij_state_machine_core::{
    ClipHash, ComponentType, Controller, InputType, InputValue, Instance, Uid, Vec2,
};

fn leaf(ctl: &mut Controller, container: Uid, name: &str) -> Uid {
    let uid = ctl
        .create_state(container, ComponentType::Animation, Vec2::default())
        .expect("create leaf");
    ctl.set_name(uid, name).expect("name leaf");
    uid
}

fn machine(ctl: &mut Controller, container: Uid, name: &str) -> Uid {
    let uid = ctl
        .create_state(container, ComponentType::StateMachine, Vec2::default())
        .expect("create machine");
    ctl.set_name(uid, name).expect("name machine");
    uid
}

#[test]
fn speed_condition_moves_from_a_to_b() {
    let mut ctl = Controller::default();
    ctl.declare_input("speed", InputType::Float).unwrap();
    let c = machine(&mut ctl, Uid::ROOT, "C");
    let a = leaf(&mut ctl, c, "A");
    let b = leaf(&mut ctl, c, "B");
    let entry = ctl.create_entry_edge(c, a).unwrap();
    ctl.set_entry_condition(c, entry, "true").unwrap();
    let edge = ctl.create_edge(a, b).unwrap();
    ctl.set_edge_condition(edge, "speed > 2.0").unwrap();

    let mut inst = Instance::new(ctl.compile());
    let clips: HashMap<ClipHash, f32> = HashMap::new();

    inst.set_input("speed", InputValue::Float(0.0)).unwrap();
    inst.tick(0.1, &clips);
    assert_eq!(inst.current_node(), Some(a));

    inst.set_input("speed", InputValue::Float(5.0)).unwrap();
    inst.tick(0.1, &clips);
    assert_eq!(inst.current_node(), Some(b));
    assert_eq!(inst.active_path(), vec![Uid::ROOT, c, b]);
    assert_eq!(inst.time(), 0.0);
}

#[test]
fn removing_an_event_restores_track_length() {
    let mut ctl = Controller::default();
    ctl.declare_input("speed", InputType::Float).unwrap();
    let a = leaf(&mut ctl, Uid::ROOT, "A");
    let before = ctl.events(a).unwrap().byte_len();

    let index = ctl
        .add_set_input_event(a, 1.0, "speed", InputValue::Float(3.0))
        .unwrap();
    assert!(ctl.events(a).unwrap().byte_len() > before);

    ctl.remove_event(a, index).unwrap();
    assert_eq!(ctl.events(a).unwrap().byte_len(), before);
    assert!(ctl.events(a).unwrap().is_empty());
}

#[test]
fn removing_a_referenced_input_disables_the_condition() {
    let mut ctl = Controller::default();
    ctl.declare_input("a", InputType::Bool).unwrap();
    ctl.declare_input("b", InputType::Int).unwrap();
    let x = leaf(&mut ctl, Uid::ROOT, "X");
    let y = leaf(&mut ctl, Uid::ROOT, "Y");
    let edge = ctl.create_edge(x, y).unwrap();
    ctl.set_edge_condition(edge, "a && b > 1").unwrap();

    let graph = ctl.compile();
    let x_index = graph.find(x).unwrap();
    assert!(!graph.state(x_index).transitions[0]
        .condition
        .is_always_false());

    ctl.remove_input("b").unwrap();
    let graph = ctl.compile();
    let x_index = graph.find(x).unwrap();
    assert!(graph.state(x_index).transitions[0]
        .condition
        .is_always_false());
    let condition = &ctl.component(edge).unwrap().as_edge().unwrap().condition;
    assert_eq!(condition.source(), "a && b > 1");
    assert!(condition.program().is_always_false());
}

#[test]
fn uids_are_never_reused() {
    let mut ctl = Controller::default();
    let mut seen = Vec::new();
    for i in 0..5 {
        seen.push(leaf(&mut ctl, Uid::ROOT, &format!("S{i}")));
    }
    ctl.remove(seen[1]).unwrap();
    ctl.remove(seen[3]).unwrap();
    for i in 5..8 {
        let uid = leaf(&mut ctl, Uid::ROOT, &format!("S{i}"));
        assert!(!seen.contains(&uid));
        assert!(uid.0 > seen.iter().map(|u| u.0).max().unwrap());
        seen.push(uid);
    }

    let mut reloaded = Controller::deserialize(&ctl.serialize()).unwrap();
    let next = leaf(&mut reloaded, Uid::ROOT, "after-load");
    assert!(!seen.contains(&next));
    assert_eq!(next.0, ctl.last_uid() + 1);
}

#[test]
fn removing_a_state_cascades_to_its_edges() {
    let mut ctl = Controller::default();
    let c = machine(&mut ctl, Uid::ROOT, "C");
    let a = leaf(&mut ctl, c, "A");
    let b = leaf(&mut ctl, c, "B");
    let ab = ctl.create_edge(a, b).unwrap();
    let ba = ctl.create_edge(b, a).unwrap();
    ctl.create_entry_edge(c, a).unwrap();
    ctl.create_entry_edge(c, b).unwrap();

    ctl.remove(a).unwrap();
    assert!(ctl.component(a).is_none());
    assert!(ctl.component(ab).is_none());
    assert!(ctl.component(ba).is_none());
    assert_eq!(ctl.children(c).unwrap(), &[b]);
    assert!(ctl.outgoing_edges(b).unwrap().is_empty());
    assert!(ctl.incoming_edges(b).unwrap().is_empty());
    assert_eq!(ctl.entry_edges(c).unwrap().len(), 1);
    assert_eq!(ctl.entry_edges(c).unwrap()[0].to, b);
    assert_eq!(ctl.selected(c).unwrap(), None);

    let other = leaf(&mut ctl, Uid::ROOT, "Other");
    let into_c = ctl.create_edge(other, c).unwrap();
    ctl.remove(c).unwrap();
    assert!(ctl.component(b).is_none());
    assert!(ctl.component(into_c).is_none());
    assert!(ctl.outgoing_edges(other).unwrap().is_empty());
    assert_eq!(ctl.component_count(), 2);
}

#[test]
fn compiling_twice_without_edits_is_stable() {
    let mut ctl = Controller::default();
    ctl.declare_input("go", InputType::Bool).unwrap();
    let a = leaf(&mut ctl, Uid::ROOT, "A");
    let b = leaf(&mut ctl, Uid::ROOT, "B");
    let e = ctl.create_edge(a, b).unwrap();
    ctl.set_edge_condition(e, "go").unwrap();
    // the bad entry condition degrades but compiles
    let entry = ctl.create_entry_edge(Uid::ROOT, a).unwrap();
    assert!(ctl.set_entry_condition(Uid::ROOT, entry, "missing").is_err());

    assert!(ctl.needs_compile());
    let first = ctl.compile();
    assert!(!ctl.needs_compile());
    let second = ctl.compile();
    assert_eq!(first, second);
    assert_eq!(first.revision(), second.revision());

    ctl.set_position(a, Vec2::new(10.0, 20.0)).unwrap();
    assert!(ctl.needs_compile());
    assert_ne!(ctl.compile().revision(), first.revision());
}
