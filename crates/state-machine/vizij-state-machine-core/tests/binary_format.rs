use vizij_state_machine_core::blob::Writer;
use vizij_state_machine_core::{
    clip_hash, ComponentType, Config, Controller, GraphError, InputType, InputValue, LoadError,
    Uid, Vec2, FORMAT_MAGIC, FORMAT_REVISION,
};

/// Root with a leaf, a nested machine holding two leaves, edges at both levels and events.
fn sample_controller() -> Controller {
    let mut ctl = Controller::default();
    ctl.declare_input("speed", InputType::Float).unwrap();
    ctl.declare_input("grounded", InputType::Bool).unwrap();
    ctl.add_slot("idle");
    ctl.add_slot("walk");

    let idle = ctl
        .create_state(Uid::ROOT, ComponentType::Animation, Vec2::new(0.0, 0.0))
        .unwrap();
    ctl.set_name(idle, "Idle").unwrap();
    ctl.add_clip(idle, "idle").unwrap();
    ctl.set_root_rotation_input(idle, Some("speed")).unwrap();
    ctl.add_set_input_event(idle, 0.5, "grounded", InputValue::Bool(true))
        .unwrap();

    let moving = ctl
        .create_state(Uid::ROOT, ComponentType::StateMachine, Vec2::new(200.0, 0.0))
        .unwrap();
    ctl.set_name(moving, "Moving").unwrap();
    let walk = ctl
        .create_state(moving, ComponentType::Animation, Vec2::new(0.0, 50.0))
        .unwrap();
    ctl.set_name(walk, "Walk").unwrap();
    ctl.add_clip(walk, "walk").unwrap();
    ctl.set_looped(walk, false).unwrap();
    let jog = ctl
        .create_state(moving, ComponentType::Animation, Vec2::new(100.0, 50.0))
        .unwrap();
    ctl.set_name(jog, "Jog").unwrap();
    let inner = ctl.create_edge(walk, jog).unwrap();
    ctl.set_edge_condition(inner, "speed > 2.0 && time > 0.25")
        .unwrap();
    ctl.set_blend_length(inner, 0.2).unwrap();
    let entry = ctl.create_entry_edge(moving, walk).unwrap();
    ctl.set_entry_condition(moving, entry, "true").unwrap();

    let go = ctl.create_edge(idle, moving).unwrap();
    ctl.set_edge_condition(go, "speed > 0.1").unwrap();
    let back = ctl.create_edge(moving, idle).unwrap();
    ctl.set_edge_condition(back, "speed <= 0.1").unwrap();
    ctl.set_entry_position(Uid::ROOT, Vec2::new(-100.0, 0.0))
        .unwrap();
    ctl
}

#[test]
fn serialize_deserialize_serialize_is_byte_identical() {
    let mut original = sample_controller();
    let bytes = original.serialize();
    let mut loaded = Controller::deserialize(&bytes).expect("load");
    assert_eq!(loaded.serialize(), bytes);

    assert_eq!(loaded.inputs(), original.inputs());
    assert_eq!(loaded.slots(), original.slots());
    assert_eq!(loaded.last_uid(), original.last_uid());
    assert_eq!(loaded.component_count(), original.component_count());

    // conditions are compiled on load, so both compile to the same states
    let a = original.compile();
    let b = loaded.compile();
    assert_eq!(a.states(), b.states());
    assert_eq!(a.inputs(), b.inputs());
}

#[test]
fn loaded_graph_keeps_structure_and_adjacency() {
    let original = sample_controller();
    let loaded = Controller::deserialize(&original.serialize()).unwrap();
    let idle = loaded.child_by_name(Uid::ROOT, "Idle").unwrap();
    let moving = loaded.child_by_name(Uid::ROOT, "Moving").unwrap();
    let walk = loaded.child_by_name(moving, "Walk").unwrap();

    assert_eq!(loaded.outgoing_edges(idle).unwrap().len(), 1);
    assert_eq!(loaded.incoming_edges(idle).unwrap().len(), 1);
    assert_eq!(loaded.entry_edges(moving).unwrap()[0].to, walk);
    assert_eq!(
        loaded.entry_position(Uid::ROOT).unwrap(),
        Vec2::new(-100.0, 0.0)
    );
    let anim = loaded.component(idle).unwrap().as_animation().unwrap();
    assert_eq!(anim.clips, vec![clip_hash("idle")]);
    assert_eq!(anim.root_rotation_input, Some(0));
    assert_eq!(anim.node.events.len(), 1);
    assert!(!loaded
        .component(walk)
        .unwrap()
        .as_animation()
        .unwrap()
        .looped);
    // selection is editor-only state
    assert_eq!(loaded.selected(Uid::ROOT).unwrap(), None);
}

#[test]
fn every_truncation_fails() {
    let bytes = sample_controller().serialize();
    for len in 0..bytes.len() {
        assert!(
            Controller::deserialize(&bytes[..len]).is_err(),
            "prefix of {len} bytes loaded"
        );
    }
}

#[test]
fn header_mismatches_are_rejected() {
    let bytes = sample_controller().serialize();

    let mut wrong_revision = bytes.clone();
    wrong_revision[4..8].copy_from_slice(&(FORMAT_REVISION + 1).to_le_bytes());
    assert!(matches!(
        Controller::deserialize(&wrong_revision),
        Err(LoadError::RevisionMismatch { found, .. }) if found == FORMAT_REVISION + 1
    ));

    let mut trailing = bytes;
    trailing.push(0);
    assert!(matches!(
        Controller::deserialize(&trailing),
        Err(LoadError::TrailingBytes(1))
    ));
}

fn write_node(w: &mut Writer, name: &str) {
    w.vec2(Vec2::default());
    w.vec2(Vec2::new(100.0, 30.0));
    w.str(name);
    w.i32(0);
    w.bytes(&[]);
}

fn write_leaf(w: &mut Writer, uid: i32, name: &str) {
    w.i32(uid);
    w.u8(ComponentType::Animation.tag());
    write_node(w, name);
    w.i32(0);
    w.u8(1);
    w.i32(-1);
}

fn write_entry(w: &mut Writer, edges: &[(i32, &str)]) {
    w.vec2(Vec2::default());
    w.vec2(Vec2::new(100.0, 30.0));
    w.str("Entry");
    w.i32(edges.len() as i32);
    for (to, condition) in edges {
        w.i32(*to);
        w.str(condition);
    }
}

fn header(w: &mut Writer, last_uid: i32) {
    w.u32(FORMAT_MAGIC);
    w.u32(FORMAT_REVISION);
    w.i32(0);
    w.i32(last_uid);
    write_node(w, "Root");
}

#[test]
fn skip_markers_are_ignored() {
    let mut w = Writer::new();
    header(&mut w, 1);
    w.i32(2);
    w.i32(-1);
    write_leaf(&mut w, 1, "Only");
    write_entry(&mut w, &[(1, "true")]);
    w.i32(0);

    let ctl = Controller::deserialize(&w.into_bytes()).unwrap();
    assert_eq!(ctl.children(Uid::ROOT).unwrap(), &[Uid(1)]);
    assert_eq!(ctl.node(Uid(1)).unwrap().name, "Only");
    assert!(!ctl.entry_edges(Uid::ROOT).unwrap()[0]
        .condition
        .program()
        .is_always_false());
}

#[test]
fn unresolvable_edge_endpoint_fails() {
    let mut w = Writer::new();
    header(&mut w, 3);
    w.i32(2);
    write_leaf(&mut w, 1, "A");
    w.i32(2);
    w.u8(ComponentType::Edge.tag());
    w.i32(1);
    w.i32(99);
    w.str("true");
    w.f32(0.0);
    write_entry(&mut w, &[]);
    w.i32(0);

    assert!(matches!(
        Controller::deserialize(&w.into_bytes()),
        Err(LoadError::UnresolvedUid {
            uid: 99,
            what: "edge target",
            ..
        })
    ));
}

#[test]
fn duplicate_uids_and_unknown_kinds_fail() {
    let mut w = Writer::new();
    header(&mut w, 1);
    w.i32(2);
    write_leaf(&mut w, 1, "A");
    write_leaf(&mut w, 1, "B");
    write_entry(&mut w, &[]);
    w.i32(0);
    assert!(matches!(
        Controller::deserialize(&w.into_bytes()),
        Err(LoadError::DuplicateUid(Uid(1)))
    ));

    let mut w = Writer::new();
    header(&mut w, 1);
    w.i32(1);
    w.i32(1);
    w.u8(7);
    assert!(matches!(
        Controller::deserialize(&w.into_bytes()),
        Err(LoadError::UnknownKind(7))
    ));
}

#[test]
fn nesting_beyond_the_configured_depth_fails() {
    let mut ctl = Controller::default();
    let mut container = Uid::ROOT;
    for _ in 0..3 {
        container = ctl
            .create_state(container, ComponentType::StateMachine, Vec2::default())
            .unwrap();
    }
    let bytes = ctl.serialize();

    let shallow = Config {
        max_load_depth: 2,
        ..Config::default()
    };
    assert!(matches!(
        Controller::deserialize_with_config(&bytes, shallow),
        Err(LoadError::TooDeep(2))
    ));
    assert!(Controller::deserialize(&bytes).is_ok());
}

#[test]
fn corrupt_event_track_names_its_state() {
    let mut w = Writer::new();
    header(&mut w, 1);
    w.i32(1);
    w.i32(1);
    w.u8(ComponentType::Animation.tag());
    w.vec2(Vec2::default());
    w.vec2(Vec2::default());
    w.str("A");
    w.i32(1);
    w.bytes(&[0u8; 8]);
    w.i32(0);
    w.u8(1);
    w.i32(-1);
    write_entry(&mut w, &[]);
    w.i32(0);

    assert!(matches!(
        Controller::deserialize(&w.into_bytes()),
        Err(LoadError::Event { uid: Uid(1), .. })
    ));
}

#[test]
fn edge_looping_onto_its_own_state_fails() {
    let mut w = Writer::new();
    header(&mut w, 2);
    w.i32(2);
    write_leaf(&mut w, 1, "A");
    w.i32(2);
    w.u8(ComponentType::Edge.tag());
    w.i32(1);
    w.i32(1);
    w.str("true");
    w.f32(0.0);
    write_entry(&mut w, &[]);
    w.i32(0);

    assert!(matches!(
        Controller::deserialize(&w.into_bytes()),
        Err(LoadError::SelfEdge {
            edge: Uid(2),
            state: Uid(1)
        })
    ));
}

#[test]
fn oversized_conditions_load_without_aborting() {
    let flat = vec!["true"; 20_000].join(" || ");
    let nested = format!("{}true{}", "(".repeat(500), ")".repeat(500));
    let mut w = Writer::new();
    header(&mut w, 1);
    w.i32(1);
    write_leaf(&mut w, 1, "A");
    write_entry(&mut w, &[(1, flat.as_str()), (1, nested.as_str())]);
    w.i32(0);

    let ctl = Controller::deserialize(&w.into_bytes()).unwrap();
    let entries = ctl.entry_edges(Uid::ROOT).unwrap();
    assert_eq!(entries.len(), 2);
    assert!(!entries[0].condition.program().is_always_false());
    assert_eq!(entries[1].condition.source(), nested);
    assert!(entries[1].condition.program().is_always_false());
}

#[test]
fn exhausted_uid_space_refuses_new_states() {
    let mut w = Writer::new();
    header(&mut w, i32::MAX);
    w.i32(0);
    write_entry(&mut w, &[]);
    w.i32(0);

    let mut ctl = Controller::deserialize(&w.into_bytes()).unwrap();
    assert_eq!(
        ctl.create_state(Uid::ROOT, ComponentType::Animation, Vec2::default()),
        Err(GraphError::UidsExhausted)
    );
    assert!(ctl.children(Uid::ROOT).unwrap().is_empty());
}
