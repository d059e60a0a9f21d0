//! Client prediction against an authoritative host, over the loopback.

use std::cell::RefCell;
use std::rc::Rc;

use kinesis_core::{
    BodyHandle, EntityId, KinematicBody, KinematicWorld, Mesh, PhysicsWorld, Pose, RigidBody,
    Scene, Vec3,
};
use kinesis_networking::{
    InputState, LoopbackNetwork, ManualClock, PredictedBody, PredictionState, Session,
    SessionConfig, SetupError,
};

const FRAME_MS: f64 = 1000.0 / 60.0;

/// Inputs set the velocity outright so a zero input stops the body.
fn steer(physics: &mut dyn PhysicsWorld, body: BodyHandle, input: &InputState) {
    physics.set_linear_velocity(body, input.axes);
}

struct Peer {
    scene: Scene,
    physics: KinematicWorld,
    player: EntityId,
}

impl Peer {
    fn new() -> Self {
        let mut scene = Scene::new();
        let mut physics = KinematicWorld::new();
        let player = scene.spawn();
        let handle = physics.add_body(KinematicBody::at(Pose::IDENTITY));
        scene.insert_mesh(player, Mesh::default()).unwrap();
        scene.insert_body(player, RigidBody { handle }).unwrap();
        Self { scene, physics, player }
    }

    fn position(&self) -> Vec3 {
        self.scene.mesh(self.player).unwrap().pose.position
    }
}

fn unconnected(config: &SessionConfig) -> (ManualClock, Session, Session) {
    let net = LoopbackNetwork::new();
    let clock = ManualClock::default();
    let host = Session::host(net.listen("host").unwrap(), Rc::new(clock.clone()), config.clone());
    let client = Session::client(net.connector("alice"), Rc::new(clock.clone()), config.clone());
    (clock, host, client)
}

fn sessions(config: &SessionConfig) -> (ManualClock, Session, Session) {
    let (clock, host, mut client) = unconnected(config);
    client.connect_to_host("host").unwrap();
    (clock, host, client)
}

/// One predicted player, authoritative on the host and predicted on the client.
struct Scenario {
    clock: ManualClock,
    host: Session,
    client: Session,
    host_peer: Peer,
    client_peer: Peer,
    authority: Rc<RefCell<PredictedBody>>,
    predicted: Rc<RefCell<PredictedBody>>,
}

impl Scenario {
    /// Both sessions up with the body attached, client not yet connected.
    fn new(config: &SessionConfig) -> Self {
        let (clock, mut host, mut client) = unconnected(config);
        let host_peer = Peer::new();
        let client_peer = Peer::new();
        let authority = host
            .attach(
                PredictedBody::new(host_peer.player, host.context())
                    .with_prediction(true)
                    .with_input_handler(steer),
                &host_peer.scene,
            )
            .unwrap();
        let predicted = client
            .attach(
                PredictedBody::new(client_peer.player, client.context())
                    .with_prediction(true)
                    .with_input_handler(steer),
                &client_peer.scene,
            )
            .unwrap();
        Self { clock, host, client, host_peer, client_peer, authority, predicted }
    }

    fn connect(&mut self) {
        self.client.connect_to_host("host").unwrap();
    }

    fn host_only(&mut self, frames: u32) {
        for _ in 0..frames {
            self.host.frame(&mut self.host_peer.scene, &mut self.host_peer.physics);
            self.clock.advance(FRAME_MS);
        }
    }

    fn client_only(&mut self, frames: u32) {
        for _ in 0..frames {
            self.client.frame(&mut self.client_peer.scene, &mut self.client_peer.physics);
            self.clock.advance(FRAME_MS);
        }
    }

    /// Steers for 20 frames, sends one stop input, then lets both sides
    /// settle. `each_frame` sees the predicted body after every client frame.
    fn drive(&mut self, frames: u32, mut each_frame: impl FnMut(u32, &PredictedBody)) {
        for frame in 0..frames {
            if frame < 20 {
                let input = InputState::moving(Vec3::new(1.0, 0.0, 0.5));
                let predicted = self.predicted.borrow_mut().predict(input, &mut self.client_peer.physics);
                assert!(predicted.is_some());
            } else if frame == 20 {
                self.predicted
                    .borrow_mut()
                    .predict(InputState::default(), &mut self.client_peer.physics);
            }
            self.host.frame(&mut self.host_peer.scene, &mut self.host_peer.physics);
            self.client.frame(&mut self.client_peer.scene, &mut self.client_peer.physics);
            each_frame(frame, &self.predicted.borrow());
            self.clock.advance(FRAME_MS);
        }
    }

    fn assert_converged(&self) {
        let host_pos = self.host_peer.position();
        let client_pos = self.client_peer.position();
        assert!(host_pos.x > 0.0);
        assert!(host_pos.distance(client_pos) < 1e-4, "host {host_pos:?}, client {client_pos:?}");

        let body = self.predicted.borrow();
        assert!(body.pending().is_empty());
        assert_eq!(body.pending().total_acknowledged(), 21);
        let last = body.last_reconciliation().unwrap();
        assert_eq!(last.tick, self.authority.borrow().last_applied_input());
    }
}

#[test]
fn test_client_converges_on_host_after_input_stops() {
    let mut scenario = Scenario::new(&SessionConfig::default());
    scenario.connect();
    assert_eq!(scenario.authority.borrow().state(), PredictionState::Simulating);
    assert_eq!(scenario.predicted.borrow().state(), PredictionState::Predicting);

    scenario.drive(80, |_, _| {});
    scenario.assert_converged();
    assert!(scenario.authority.borrow().broadcasts() > 0);
}

#[test]
fn test_late_joiner_keeps_inputs_until_host_applies_them() {
    let config = SessionConfig { simulated_latency_ms: Some(50.0), ..SessionConfig::default() };
    let mut scenario = Scenario::new(&config);
    scenario.host_only(120);
    assert!(scenario.host.tick() > 100);
    scenario.connect();

    // 50 ms each way is about 12 frames for an input to come back.
    scenario.drive(80, |frame, body| {
        if frame == 10 {
            assert_eq!(body.pending().len(), 11);
            assert_eq!(body.pending().total_acknowledged(), 0);
            assert_eq!(body.last_reconciliation().map(|r| r.tick), Some(0));
        }
    });
    scenario.assert_converged();
    let last = scenario.predicted.borrow().last_reconciliation().unwrap();
    assert!(last.tick < 30, "echoed tick {} is not in client tick space", last.tick);
}

#[test]
fn test_client_started_first_still_gets_inputs_acknowledged() {
    let config = SessionConfig { simulated_latency_ms: Some(50.0), ..SessionConfig::default() };
    let mut scenario = Scenario::new(&config);
    scenario.client_only(120);
    let head_start = scenario.client.tick();
    assert!(head_start > 100);
    scenario.connect();

    let mut most_pending = 0;
    scenario.drive(80, |_, body| most_pending = most_pending.max(body.pending().len()));
    assert!(most_pending <= 20, "pending peaked at {most_pending}");
    scenario.assert_converged();

    let last = scenario.predicted.borrow().last_reconciliation().unwrap();
    assert!(last.tick > head_start);
    assert!(scenario.host.tick() < head_start);
}

#[test]
fn test_host_respects_broadcast_interval_when_predicting() {
    let config = SessionConfig { broadcast_interval: 4, ..SessionConfig::default() };
    let (clock, mut host, _client) = sessions(&config);
    let mut peer = Peer::new();

    let body = host
        .attach(
            PredictedBody::new(peer.player, host.context())
                .with_prediction(true)
                .with_input_handler(steer),
            &peer.scene,
        )
        .unwrap();

    // First frame only primes the clock; each later frame runs one tick.
    for _ in 0..9 {
        host.frame(&mut peer.scene, &mut peer.physics);
        clock.advance(FRAME_MS + 0.01);
    }
    assert_eq!(host.tick(), 8);
    // Ticks 4 and 8.
    assert_eq!(body.borrow().broadcasts(), 2);
}

#[test]
fn test_non_predicting_client_stays_idle() {
    let config = SessionConfig::default();
    let (_clock, _host, mut client) = sessions(&config);
    let mut peer = Peer::new();

    let body = client
        .attach(PredictedBody::new(peer.player, client.context()), &peer.scene)
        .unwrap();
    assert_eq!(body.borrow().state(), PredictionState::Idle);
    assert_eq!(body.borrow_mut().predict(InputState::default(), &mut peer.physics), None);
}

#[test]
fn test_prediction_without_handler_is_rejected() {
    let config = SessionConfig::default();
    let (_clock, _host, mut client) = sessions(&config);
    let peer = Peer::new();

    let err = client
        .attach(PredictedBody::new(peer.player, client.context()).with_prediction(true), &peer.scene)
        .err();
    assert_eq!(err, Some(SetupError::MissingInputHandler(peer.player)));
}
