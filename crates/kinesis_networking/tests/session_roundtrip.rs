//! End-to-end session tests over the in-process loopback.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use kinesis_core::{EntityId, KinematicWorld, Mesh, Pose, Scene, Vec3};
use kinesis_networking::{
    AnimationPlayer, AnimationSync, Cadence, ClientId, LoopbackNetwork, ManualClock, Message,
    PeerId, Session, SessionConfig, Topic, TransformSync, TransportError,
};

const FRAME_MS: f64 = 10.0;

struct Pair {
    net: LoopbackNetwork,
    clock: ManualClock,
    host: Session,
    client: Session,
}

impl Pair {
    fn new(config: SessionConfig) -> Self {
        let net = LoopbackNetwork::new();
        let clock = ManualClock::default();
        let host = Session::host(net.listen("host").unwrap(), Rc::new(clock.clone()), config.clone());
        let client = Session::client(net.connector("alice"), Rc::new(clock.clone()), config);
        Self { net, clock, host, client }
    }

    /// Host frame, then client frame, at the current time.
    fn frame(&mut self, host_scene: &mut Scene, client_scene: &mut Scene) {
        let mut physics = KinematicWorld::new();
        self.host.frame(host_scene, &mut physics);
        self.client.frame(client_scene, &mut physics);
    }

    fn step(&mut self, host_scene: &mut Scene, client_scene: &mut Scene) {
        self.frame(host_scene, client_scene);
        self.clock.advance(FRAME_MS);
    }
}

fn scene_with_mesh() -> (Scene, EntityId) {
    let mut scene = Scene::new();
    let entity = scene.spawn();
    scene.insert_mesh(entity, Mesh::default()).unwrap();
    (scene, entity)
}

#[derive(Clone, Default)]
struct Recorder(Rc<RefCell<Vec<String>>>);

impl AnimationPlayer for Recorder {
    fn play(&mut self, _entity: EntityId, name: &str) {
        self.0.borrow_mut().push(name.to_owned());
    }
}

#[test]
fn test_connect_publishes_connected_and_roster() {
    let mut pair = Pair::new(SessionConfig::default());
    let connected = Rc::new(Cell::new(0));
    let seen = Rc::clone(&connected);
    pair.client.bus().subscribe(Topic::Connected, move |_| seen.set(seen.get() + 1));

    pair.client.connect_to_host("host").unwrap();
    assert_eq!(connected.get(), 1);

    let (mut host_scene, _) = scene_with_mesh();
    let (mut client_scene, _) = scene_with_mesh();
    pair.step(&mut host_scene, &mut client_scene);

    let host_players = pair.host.players();
    assert_eq!(host_players.len(), 1);
    assert_eq!(host_players[0].id, ClientId(0));
    assert_eq!(host_players[0].peer_id, PeerId::from("alice"));
    assert_eq!(pair.client.players(), host_players);
}

#[test]
fn test_connect_to_missing_host_fails() {
    let mut pair = Pair::new(SessionConfig::default());
    let err = pair.client.connect_to_host("nobody").unwrap_err();
    assert!(matches!(err, TransportError::ConnectionFailed { .. }));
    assert!(!pair.client.client_handle().unwrap().is_connected());

    let err = pair.host.connect_to_host("host").unwrap_err();
    assert!(matches!(err, TransportError::NotAClient));
}

#[test]
fn test_ping_measures_round_trip() {
    let mut pair = Pair::new(SessionConfig::default());
    pair.client.connect_to_host("host").unwrap();
    let (mut host_scene, _) = scene_with_mesh();
    let (mut client_scene, _) = scene_with_mesh();

    assert_eq!(pair.client.latency_ms(), None);
    pair.step(&mut host_scene, &mut client_scene);
    assert_eq!(pair.client.latency_ms(), None);

    // Sent at t=0, echoed by the host at t=10 and read back in the same step.
    pair.step(&mut host_scene, &mut client_scene);
    assert_eq!(pair.client.latency_ms(), Some(10));
    assert_eq!(pair.host.latency_ms(), None);
}

#[test]
fn test_send_to_unknown_client_is_rejected() {
    let pair = Pair::new(SessionConfig::default());
    let host = pair.host.host_handle().unwrap();
    let message = Message::StartAnimation { entity: EntityId::new(0, 0), name: "wave".into() };

    let err = host.send_to_client(ClientId(99), &message).unwrap_err();
    assert!(matches!(err, TransportError::PeerNotFound(ClientId(99))));
}

#[test]
fn test_disconnect_frees_slot_and_reconnect_gets_new_one() {
    let mut pair = Pair::new(SessionConfig::default());
    let left = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&left);
    pair.host.bus().subscribe(Topic::PeerLeft, move |message| {
        if let Message::PeerLeft { client, .. } = message {
            log.borrow_mut().push(*client);
        }
    });

    let (mut host_scene, _) = scene_with_mesh();
    let (mut client_scene, _) = scene_with_mesh();
    pair.client.connect_to_host("host").unwrap();
    pair.step(&mut host_scene, &mut client_scene);
    assert_eq!(pair.client.players().len(), 1);

    pair.client.disconnect();
    assert!(pair.client.players().is_empty());
    pair.step(&mut host_scene, &mut client_scene);
    assert_eq!(*left.borrow(), vec![ClientId(0)]);
    assert!(pair.host.players().is_empty());

    pair.client.connect_to_host("host").unwrap();
    pair.step(&mut host_scene, &mut client_scene);
    assert_eq!(pair.client.players()[0].id, ClientId(1));
    assert_eq!(pair.net.listener_count(), 1);
}

#[test]
fn test_transform_follows_one_tick_behind() {
    let config = SessionConfig::default();
    let interval = 1000.0 / f64::from(config.tick_rate);
    let mut pair = Pair::new(config);
    pair.client.connect_to_host("host").unwrap();

    let (mut host_scene, entity) = scene_with_mesh();
    let (mut client_scene, mirrored) = scene_with_mesh();
    assert_eq!(entity, mirrored);

    let host_sync = TransformSync::new(entity, pair.host.context()).with_cadence(Cadence::EveryFrame);
    let sync = pair.host.attach(host_sync, &host_scene).unwrap();
    let follower = TransformSync::new(entity, pair.client.context());
    pair.client.attach(follower, &client_scene).unwrap();

    // Host mesh moves one unit per frame, so x = t / FRAME_MS.
    for frame in 0..6u8 {
        host_scene.mesh_mut(entity).unwrap().pose = Pose::at(Vec3::new(f32::from(frame), 0.0, 0.0));
        pair.frame(&mut host_scene, &mut client_scene);
        if frame < 5 {
            pair.clock.advance(FRAME_MS);
        }
    }

    let expected = (50.0 - interval) / FRAME_MS;
    #[allow(clippy::cast_possible_truncation)]
    let expected = expected as f32;
    let x = client_scene.mesh(entity).unwrap().pose.position.x;
    assert!((x - expected).abs() < 1e-3, "x = {x}, expected {expected}");
    assert_eq!(sync.borrow().published(), 6);
}

#[test]
fn test_transform_without_interpolation_applies_latest() {
    let mut pair = Pair::new(SessionConfig { interpolate: false, ..SessionConfig::default() });
    pair.client.connect_to_host("host").unwrap();

    let (mut host_scene, entity) = scene_with_mesh();
    let (mut client_scene, _) = scene_with_mesh();
    pair.host
        .attach(TransformSync::new(entity, pair.host.context()).with_cadence(Cadence::EveryFrame), &host_scene)
        .unwrap();
    pair.client.attach(TransformSync::new(entity, pair.client.context()), &client_scene).unwrap();

    host_scene.mesh_mut(entity).unwrap().pose = Pose::at(Vec3::new(4.0, 5.0, 6.0));
    pair.step(&mut host_scene, &mut client_scene);

    assert_eq!(client_scene.mesh(entity).unwrap().pose.position, Vec3::new(4.0, 5.0, 6.0));
}

#[test]
fn test_latency_delays_delivery() {
    let config = SessionConfig { simulated_latency_ms: Some(25.0), ..SessionConfig::default() };
    let mut pair = Pair::new(config);
    pair.client.connect_to_host("host").unwrap();
    let (mut host_scene, _) = scene_with_mesh();
    let (mut client_scene, _) = scene_with_mesh();

    // Roster leaves the host at t=30 (due at 25) and is dispatched at t=60
    // (due at 55).
    for _ in 0..6 {
        pair.step(&mut host_scene, &mut client_scene);
    }
    assert!(pair.client.players().is_empty());
    pair.step(&mut host_scene, &mut client_scene);
    assert_eq!(pair.client.players().len(), 1);
}

#[test]
fn test_animation_replays_on_client() {
    let mut pair = Pair::new(SessionConfig::default());
    pair.client.connect_to_host("host").unwrap();
    let (mut host_scene, entity) = scene_with_mesh();
    let (mut client_scene, _) = scene_with_mesh();

    let host_log = Recorder::default();
    let client_log = Recorder::default();
    let host_anim = pair
        .host
        .attach(AnimationSync::new(entity, pair.host.context(), host_log.clone()), &host_scene)
        .unwrap();
    let client_anim = pair
        .client
        .attach(AnimationSync::new(entity, pair.client.context(), client_log.clone()), &client_scene)
        .unwrap();

    assert!(!client_anim.borrow_mut().play("ignored"));
    assert!(host_anim.borrow_mut().play("wave"));
    assert_eq!(*host_log.0.borrow(), vec!["wave".to_owned()]);

    pair.step(&mut host_scene, &mut client_scene);
    assert_eq!(*client_log.0.borrow(), vec!["wave".to_owned()]);
}

#[test]
fn test_attach_requires_mesh() {
    let mut pair = Pair::new(SessionConfig::default());
    let mut scene = Scene::new();
    let bare = scene.spawn();

    let result = pair.host.attach(TransformSync::new(bare, pair.host.context()), &scene);
    assert!(result.is_err());
}

#[test]
fn test_roster_in_flight_survives_host_drop() {
    let config = SessionConfig { simulated_latency_ms: Some(25.0), ..SessionConfig::default() };
    let net = LoopbackNetwork::new();
    let clock = ManualClock::default();
    let mut host = Session::host(net.listen("host").unwrap(), Rc::new(clock.clone()), config.clone());
    let mut client = Session::client(net.connector("alice"), Rc::new(clock.clone()), config);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);
    client.bus().subscribe(Topic::PlayerJoined, move |message| {
        if let Message::PlayerJoined { players } = message {
            log.borrow_mut().push(format!("joined {}", players.len()));
        }
    });
    let log = Rc::clone(&seen);
    client.bus().subscribe(Topic::Disconnected, move |_| log.borrow_mut().push("disconnected".to_owned()));

    client.connect_to_host("host").unwrap();
    let (mut host_scene, _) = scene_with_mesh();
    let (mut client_scene, _) = scene_with_mesh();
    let mut physics = KinematicWorld::new();

    // Roster leaves the host at t=30 and reaches the client's inbound line
    // the same frame, due at t=55.
    for _ in 0..4 {
        host.frame(&mut host_scene, &mut physics);
        client.frame(&mut client_scene, &mut physics);
        clock.advance(FRAME_MS);
    }
    drop(host);

    for _ in 0..2 {
        client.frame(&mut client_scene, &mut physics);
        clock.advance(FRAME_MS);
    }
    assert!(seen.borrow().is_empty());
    assert!(!client.client_handle().unwrap().is_connected());

    client.frame(&mut client_scene, &mut physics);
    assert_eq!(*seen.borrow(), vec!["joined 1".to_owned(), "disconnected".to_owned()]);
    assert!(client.players().is_empty());
}

#[test]
fn test_messages_keep_order_under_latency() {
    let config = SessionConfig { simulated_latency_ms: Some(25.0), ..SessionConfig::default() };
    let mut pair = Pair::new(config);
    pair.client.connect_to_host("host").unwrap();
    let (mut host_scene, entity) = scene_with_mesh();
    let (mut client_scene, _) = scene_with_mesh();

    let client_log = Recorder::default();
    let host_anim = pair
        .host
        .attach(AnimationSync::new(entity, pair.host.context(), Recorder::default()), &host_scene)
        .unwrap();
    pair.client
        .attach(AnimationSync::new(entity, pair.client.context(), client_log.clone()), &client_scene)
        .unwrap();

    // Host accepts the client on the first frame.
    pair.step(&mut host_scene, &mut client_scene);
    let batches: [&[&str]; 4] = [&["a", "b"], &["c"], &[], &["d", "e"]];
    for batch in batches {
        for name in batch {
            assert!(host_anim.borrow_mut().play(name));
        }
        pair.step(&mut host_scene, &mut client_scene);
    }
    assert!(client_log.0.borrow().is_empty());

    for _ in 0..8 {
        pair.step(&mut host_scene, &mut client_scene);
    }
    assert_eq!(*client_log.0.borrow(), vec!["a", "b", "c", "d", "e"]);
}
