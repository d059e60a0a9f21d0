//! # Client-Side Prediction
//!
//! Predict the local player's body for responsive input, then reconcile
//! against the host's snapshots.
//!
//! ## How It Works
//!
//! 1. Client applies input locally and forwards it to the host
//! 2. Host applies the forwarded input, simulates and broadcasts
//!    `{tick, linearVelocity, transform}`
//! 3. Client snaps to each snapshot, steps once, drops acknowledged input
//!    and replays the rest
//!
//! Inputs are stamped in the client's tick space and the host echoes the
//! newest stamp it has applied as the snapshot tick, so acknowledgement
//! holds however far apart the two tick counters are.
//!
//! ```text
//! Input:      [11] [12] [13]
//!               │    │    │
//! Snapshot:  tick 10 ──────────────► snap, step
//!                                    ack ≤ 10: none
//!                                    replay 11 → 12 → 13
//! Snapshot:  tick 12 ──────────────► snap, step
//!                                    ack ≤ 12: 11, 12
//!                                    replay 13
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use kinesis_core::{BodyHandle, EntityId, PhysicsWorld, Pose, Scene, Vec3};
use tracing::{debug, trace, warn};

use crate::error::SetupError;
use crate::events::OwnerId;
use crate::protocol::{InputState, Message, PhysicsUpdate, Topic};
use crate::session::SyncContext;
use crate::sync::{NetComponent, UpdateContext};
use crate::tick::Tick;

/// Applies one input to a body. Supplied by the game.
pub type InputHandler = Box<dyn Fn(&mut dyn PhysicsWorld, BodyHandle, &InputState)>;

/// Input waiting for the host to acknowledge it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PendingInput {
    /// Local tick that first simulates the input.
    pub tick: Tick,
    /// The input.
    pub input: InputState,
}

/// Tick-ordered queue of unacknowledged inputs.
///
/// An input leaves the queue exactly once, when a snapshot at or past its
/// tick is reconciled.
#[derive(Clone, Debug, Default)]
pub struct InputQueue {
    inputs: VecDeque<PendingInput>,
    acknowledged: u64,
}

impl InputQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an input. Same-tick inputs keep their insertion order.
    pub fn push(&mut self, tick: Tick, input: InputState) {
        let at = self.inputs.partition_point(|p| p.tick <= tick);
        self.inputs.insert(at, PendingInput { tick, input });
    }

    /// Removes every input with `tick <= up_to`.
    ///
    /// Returns how many were removed.
    pub fn acknowledge(&mut self, up_to: Tick) -> usize {
        let count = self.inputs.partition_point(|p| p.tick <= up_to);
        self.inputs.drain(..count);
        self.acknowledged += count as u64;
        count
    }

    /// Unacknowledged inputs, oldest tick first.
    pub fn iter(&self) -> impl Iterator<Item = &PendingInput> {
        self.inputs.iter()
    }

    /// Inputs waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    /// True when nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Inputs acknowledged over the queue's lifetime.
    #[must_use]
    pub const fn total_acknowledged(&self) -> u64 {
        self.acknowledged
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.inputs.clear();
    }
}

/// Authoritative body state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhysicsSnapshot {
    /// Newest client input tick folded into this state. 0 before any.
    pub tick: Tick,
    /// Linear velocity.
    pub linear_velocity: Vec3,
    /// Pose.
    pub pose: Pose,
}

impl PhysicsSnapshot {
    fn from_wire(update: &PhysicsUpdate, tick: Tick) -> Self {
        Self { tick, linear_velocity: update.linear_velocity, pose: update.transform.into() }
    }
}

/// What one reconciliation did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reconciliation {
    /// Snapshot tick.
    pub tick: Tick,
    /// Inputs dropped as acknowledged.
    pub acknowledged: usize,
    /// Inputs re-applied.
    pub replayed: usize,
    /// Distance between the predicted position and the reconciled one.
    pub correction: f32,
}

/// Lifecycle of a [`PredictedBody`]. Fixed once activated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PredictionState {
    /// Not driving the body; remote entities on clients stay here.
    Idle,
    /// Host: owns and simulates the body.
    Simulating,
    /// Client: predicts its own body.
    Predicting,
}

/// Physics body replicated from the host, optionally predicted on a client.
pub struct PredictedBody {
    entity: EntityId,
    ctx: SyncContext,
    owner: OwnerId,
    prediction: bool,
    apply_input: Option<InputHandler>,
    state: PredictionState,
    active: bool,
    body: Option<BodyHandle>,
    pending: InputQueue,
    snapshots: Rc<RefCell<VecDeque<PhysicsSnapshot>>>,
    forwarded: Rc<RefCell<VecDeque<(Tick, InputState)>>>,
    applied_input: Tick,
    broadcasts: u64,
    last_reconciliation: Option<Reconciliation>,
}

impl PredictedBody {
    /// Creates the component without prediction.
    #[must_use]
    pub fn new(entity: EntityId, ctx: &SyncContext) -> Self {
        Self {
            entity,
            owner: ctx.role.bus().register_owner(),
            ctx: ctx.clone(),
            prediction: false,
            apply_input: None,
            state: PredictionState::Idle,
            active: false,
            body: None,
            pending: InputQueue::new(),
            snapshots: Rc::new(RefCell::new(VecDeque::new())),
            forwarded: Rc::new(RefCell::new(VecDeque::new())),
            applied_input: 0,
            broadcasts: 0,
            last_reconciliation: None,
        }
    }

    /// Enables client prediction for this entity. On the host this switches
    /// snapshots to the configured broadcast cadence.
    #[must_use]
    pub const fn with_prediction(mut self, enabled: bool) -> Self {
        self.prediction = enabled;
        self
    }

    /// Sets the callback that turns an input into body changes.
    #[must_use]
    pub fn with_input_handler(
        mut self,
        handler: impl Fn(&mut dyn PhysicsWorld, BodyHandle, &InputState) + 'static,
    ) -> Self {
        self.apply_input = Some(Box::new(handler));
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> PredictionState {
        self.state
    }

    /// Unacknowledged inputs.
    #[must_use]
    pub const fn pending(&self) -> &InputQueue {
        &self.pending
    }

    /// Snapshots waiting to be reconciled.
    #[must_use]
    pub fn queued_snapshots(&self) -> usize {
        self.snapshots.borrow().len()
    }

    /// Host: newest forwarded input tick applied to the body.
    #[must_use]
    pub const fn last_applied_input(&self) -> Tick {
        self.applied_input
    }

    /// Snapshots broadcast by the host so far.
    #[must_use]
    pub const fn broadcasts(&self) -> u64 {
        self.broadcasts
    }

    /// Result of the most recent reconciliation.
    #[must_use]
    pub const fn last_reconciliation(&self) -> Option<Reconciliation> {
        self.last_reconciliation
    }

    /// Client: applies `input` now, queues it for replay and forwards it to
    /// the host, stamped with the next local tick (the first to simulate it).
    ///
    /// Returns the tick, or `None` when this body is not predicting.
    pub fn predict(&mut self, input: InputState, physics: &mut dyn PhysicsWorld) -> Option<Tick> {
        if self.state != PredictionState::Predicting {
            return None;
        }
        let (Some(body), Some(apply)) = (self.body, self.apply_input.as_ref()) else {
            return None;
        };
        let tick = self.ctx.current_tick() + 1;
        self.pending.push(tick, input);
        apply(physics, body, &input);

        let message = Message::PlayerInput { entity: self.entity, input, tick };
        if let Err(e) = self.ctx.role.send(&message) {
            warn!(entity = %self.entity, error = %e, "input not forwarded");
        }
        Some(tick)
    }

    /// Client: snaps to `snapshot`, steps once, drops acknowledged inputs and
    /// replays the rest in tick order.
    pub fn reconcile(&mut self, snapshot: PhysicsSnapshot, ctx: &mut UpdateContext<'_>) -> Option<Reconciliation> {
        let body = self.body?;
        let predicted = ctx.physics.pose(body).map(|p| p.position);

        ctx.physics.set_pose(body, snapshot.pose);
        ctx.physics.set_linear_velocity(body, snapshot.linear_velocity);
        if let Ok(mesh) = ctx.scene.mesh_mut(self.entity) {
            mesh.pose = snapshot.pose;
        }

        ctx.physics.simulate(ctx.dt(), &[body]);

        let acknowledged = self.pending.acknowledge(snapshot.tick);
        let mut replayed = 0;
        if let Some(apply) = self.apply_input.as_ref() {
            for pending in self.pending.iter() {
                apply(&mut *ctx.physics, body, &pending.input);
                replayed += 1;
            }
        }

        let settled = self.sync_mesh(ctx, body);
        let correction = match (predicted, settled) {
            (Some(before), Some(after)) => before.distance(after.position),
            _ => 0.0,
        };
        let result = Reconciliation { tick: snapshot.tick, acknowledged, replayed, correction };
        trace!(entity = %self.entity, tick = snapshot.tick, acknowledged, replayed, correction, "reconciled");
        self.last_reconciliation = Some(result);
        Some(result)
    }

    fn sync_mesh(&self, ctx: &mut UpdateContext<'_>, body: BodyHandle) -> Option<Pose> {
        let pose = ctx.physics.pose(body)?;
        if let Ok(mesh) = ctx.scene.mesh_mut(self.entity) {
            mesh.pose = pose;
        }
        Some(pose)
    }

    fn host_step(&mut self, ctx: &mut UpdateContext<'_>, body: BodyHandle) {
        let inputs: Vec<(Tick, InputState)> = self.forwarded.borrow_mut().drain(..).collect();
        if let Some(apply) = self.apply_input.as_ref() {
            for (_, input) in &inputs {
                apply(&mut *ctx.physics, body, input);
            }
        }
        if let Some(newest) = inputs.iter().map(|(tick, _)| *tick).max() {
            self.applied_input = self.applied_input.max(newest);
        }

        ctx.physics.simulate(ctx.dt(), &[body]);
        let Some(pose) = self.sync_mesh(ctx, body) else {
            return;
        };

        let interval = Tick::from(self.ctx.config.broadcast_interval.max(1));
        if self.prediction && ctx.tick % interval != 0 {
            return;
        }
        let update = PhysicsUpdate {
            linear_velocity: ctx.physics.linear_velocity(body).unwrap_or(Vec3::ZERO),
            transform: pose.into(),
        };
        let message = Message::PhysicsUpdate { entity: self.entity, update, tick: self.applied_input };
        match self.ctx.role.send(&message) {
            Ok(()) => self.broadcasts += 1,
            Err(e) => warn!(entity = %self.entity, error = %e, "physics broadcast failed"),
        }
    }

    fn client_step(&mut self, ctx: &mut UpdateContext<'_>, body: BodyHandle) {
        let next = self.snapshots.borrow_mut().pop_front();
        match next {
            Some(snapshot) => {
                self.reconcile(snapshot, ctx);
            }
            None => {
                ctx.physics.simulate(ctx.dt(), &[body]);
                self.sync_mesh(ctx, body);
            }
        }
    }
}

impl NetComponent for PredictedBody {
    fn entity(&self) -> EntityId {
        self.entity
    }

    fn activate(&mut self, scene: &Scene) -> Result<(), SetupError> {
        if self.active {
            return Err(SetupError::AlreadyActive(self.entity));
        }
        let body = scene.body(self.entity)?.handle;
        scene.mesh(self.entity)?;
        if self.prediction && self.apply_input.is_none() {
            return Err(SetupError::MissingInputHandler(self.entity));
        }
        self.body = Some(body);

        let bus = Rc::clone(self.ctx.role.bus());
        if self.ctx.role.is_host() {
            self.state = PredictionState::Simulating;
            let forwarded = Rc::clone(&self.forwarded);
            bus.subscribe_owned(self.owner, Topic::PlayerInput(self.entity), move |message| {
                if let Message::PlayerInput { input, tick, .. } = message {
                    forwarded.borrow_mut().push_back((*tick, *input));
                }
            });
        } else if self.prediction {
            self.state = PredictionState::Predicting;
            let snapshots = Rc::clone(&self.snapshots);
            bus.subscribe_owned(self.owner, Topic::PhysicsUpdate(self.entity), move |message| {
                if let Message::PhysicsUpdate { update, tick, .. } = message {
                    snapshots.borrow_mut().push_back(PhysicsSnapshot::from_wire(update, *tick));
                }
            });
        }
        debug!(entity = %self.entity, state = ?self.state, "predicted body active");
        self.active = true;
        Ok(())
    }

    fn on_fixed_update(&mut self, ctx: &mut UpdateContext<'_>) {
        let Some(body) = self.body else {
            return;
        };
        match self.state {
            PredictionState::Idle => {}
            PredictionState::Simulating => self.host_step(ctx, body),
            PredictionState::Predicting => self.client_step(ctx, body),
        }
    }

    fn detach(&mut self) {
        self.ctx.role.bus().unsubscribe_owner(self.owner);
        self.snapshots.borrow_mut().clear();
        self.forwarded.borrow_mut().clear();
        self.pending.clear();
        self.state = PredictionState::Idle;
        self.active = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::events::EventBus;
    use crate::session::{ClientRole, HostRole};
    use crate::time::ManualClock;
    use crate::transport::loopback::LoopbackNetwork;
    use crate::transport::{ClientLink, HostLink};
    use kinesis_core::{EulerRotation, KinematicBody, KinematicWorld, Mesh, RigidBody};

    const DT_MS: f64 = 1000.0 / 60.0;

    struct Rig {
        _link: ClientLink,
        ctx: SyncContext,
        scene: Scene,
        physics: KinematicWorld,
        entity: EntityId,
        applied: Rc<RefCell<Vec<u32>>>,
    }

    impl Rig {
        fn new() -> Self {
            let net = LoopbackNetwork::new();
            let link = ClientLink::new(net.connector("client"), Rc::new(EventBus::new()));
            let role = Rc::new(ClientRole::new(link.handle()));
            let ctx = SyncContext::new(role, Rc::new(ManualClock::default()), SessionConfig::default());

            let mut scene = Scene::new();
            let mut physics = KinematicWorld::new();
            let entity = scene.spawn();
            let handle = physics.add_body(KinematicBody::at(Pose::IDENTITY));
            scene.insert_mesh(entity, Mesh::default()).unwrap();
            scene.insert_body(entity, RigidBody { handle }).unwrap();

            Self { _link: link, ctx, scene, physics, entity, applied: Rc::new(RefCell::new(Vec::new())) }
        }

        fn predicted(&self) -> PredictedBody {
            let applied = Rc::clone(&self.applied);
            PredictedBody::new(self.entity, &self.ctx)
                .with_prediction(true)
                .with_input_handler(move |physics, body, input| {
                    applied.borrow_mut().push(input.buttons);
                    physics.apply_impulse(body, input.axes);
                })
        }

        fn update_ctx(&mut self, tick: Tick) -> UpdateContext<'_> {
            UpdateContext {
                scene: &mut self.scene,
                physics: &mut self.physics,
                now_ms: 0.0,
                tick,
                tick_interval_ms: DT_MS,
            }
        }
    }

    fn input(tick: u32) -> InputState {
        InputState { axes: Vec3::new(1.0, 0.0, 0.0), buttons: tick }
    }

    fn snapshot() -> PhysicsSnapshot {
        PhysicsSnapshot {
            tick: 10,
            linear_velocity: Vec3::new(0.0, 0.0, 5.0),
            pose: Pose::new(Vec3::new(1.0, 2.0, 3.0), EulerRotation::IDENTITY),
        }
    }

    #[test]
    fn test_input_queue_ack_is_exactly_once() {
        let mut queue = InputQueue::new();
        for tick in [3, 1, 2, 2, 5] {
            queue.push(tick, input(u32::try_from(tick).unwrap()));
        }
        let ticks: Vec<Tick> = queue.iter().map(|p| p.tick).collect();
        assert_eq!(ticks, vec![1, 2, 2, 3, 5]);

        assert_eq!(queue.acknowledge(2), 3);
        assert_eq!(queue.acknowledge(2), 0);
        assert_eq!(queue.acknowledge(1), 0);
        assert_eq!(queue.acknowledge(4), 1);
        assert_eq!(queue.acknowledge(9), 1);
        assert_eq!(queue.total_acknowledged(), 5);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_activation_preconditions() {
        let rig = Rig::new();

        let mut no_handler = PredictedBody::new(rig.entity, &rig.ctx).with_prediction(true);
        assert_eq!(no_handler.activate(&rig.scene), Err(SetupError::MissingInputHandler(rig.entity)));

        let mut scene = Scene::new();
        let bare = scene.spawn();
        scene.insert_mesh(bare, Mesh::default()).unwrap();
        let mut no_body = rig.predicted();
        no_body.entity = bare;
        assert!(matches!(
            no_body.activate(&scene),
            Err(SetupError::MissingComponent { kind: kinesis_core::ComponentKind::RigidBody, .. })
        ));

        let mut ok = rig.predicted();
        assert!(ok.activate(&rig.scene).is_ok());
        assert_eq!(ok.state(), PredictionState::Predicting);
        assert_eq!(ok.activate(&rig.scene), Err(SetupError::AlreadyActive(rig.entity)));
    }

    #[test]
    fn test_remote_body_without_prediction_stays_idle() {
        let mut rig = Rig::new();
        let mut remote = PredictedBody::new(rig.entity, &rig.ctx);
        remote.activate(&rig.scene).unwrap();
        assert_eq!(remote.state(), PredictionState::Idle);
        assert_eq!(remote.predict(input(1), &mut rig.physics), None);

        let mut ctx = rig.update_ctx(1);
        remote.on_fixed_update(&mut ctx);
        assert_eq!(rig.physics.steps(), 0);
    }

    #[test]
    fn test_reconcile_with_no_pending_is_snap_plus_step() {
        let mut rig = Rig::new();
        let mut body = rig.predicted();
        body.activate(&rig.scene).unwrap();

        let mut reference = KinematicWorld::new();
        let handle = reference.add_body(KinematicBody::at(Pose::IDENTITY));
        reference.set_pose(handle, snapshot().pose);
        reference.set_linear_velocity(handle, snapshot().linear_velocity);
        #[allow(clippy::cast_possible_truncation)]
        reference.simulate((DT_MS / 1000.0) as f32, &[handle]);

        let mut ctx = rig.update_ctx(1);
        let result = body.reconcile(snapshot(), &mut ctx).unwrap();
        assert_eq!(result.acknowledged, 0);
        assert_eq!(result.replayed, 0);

        let rigid = rig.scene.body(rig.entity).unwrap().handle;
        assert_eq!(rig.physics.pose(rigid), reference.pose(handle));
        assert_eq!(rig.physics.linear_velocity(rigid), reference.linear_velocity(handle));
        assert_eq!(rig.scene.mesh(rig.entity).unwrap().pose, reference.pose(handle).unwrap());
    }

    #[test]
    fn test_snapshot_before_pending_replays_all_in_order() {
        let mut rig = Rig::new();
        let mut body = rig.predicted();
        body.activate(&rig.scene).unwrap();

        for tick in [11, 12, 13] {
            rig.ctx.set_tick(tick - 1);
            body.predict(input(u32::try_from(tick).unwrap()), &mut rig.physics);
        }
        rig.applied.borrow_mut().clear();

        let mut ctx = rig.update_ctx(14);
        let result = body.reconcile(snapshot(), &mut ctx).unwrap();

        assert_eq!(result.acknowledged, 0);
        assert_eq!(result.replayed, 3);
        assert_eq!(body.pending().len(), 3);
        assert_eq!(*rig.applied.borrow(), vec![11, 12, 13]);

        // Snap to z=3 moving at 5/s, one step, then three +1 x impulses.
        let rigid = rig.scene.body(rig.entity).unwrap().handle;
        let pose = rig.physics.pose(rigid).unwrap();
        assert!((pose.position.x - 1.0).abs() < 1e-5);
        assert!((pose.position.z - (3.0 + 5.0 / 60.0)).abs() < 1e-4);
        assert_eq!(rig.physics.linear_velocity(rigid).unwrap().x, 3.0);
    }

    #[test]
    fn test_acknowledged_inputs_are_never_replayed_again() {
        let mut rig = Rig::new();
        let mut body = rig.predicted();
        body.activate(&rig.scene).unwrap();

        for tick in [9, 10, 11, 12] {
            rig.ctx.set_tick(tick - 1);
            body.predict(input(u32::try_from(tick).unwrap()), &mut rig.physics);
        }
        rig.applied.borrow_mut().clear();

        let mut first = snapshot();
        first.tick = 10;
        let mut second = snapshot();
        second.tick = 11;

        let mut ctx = rig.update_ctx(13);
        assert_eq!(body.reconcile(first, &mut ctx).unwrap().acknowledged, 2);
        assert_eq!(body.reconcile(first, &mut ctx).unwrap().acknowledged, 0);
        assert_eq!(body.reconcile(second, &mut ctx).unwrap().acknowledged, 1);

        assert_eq!(*rig.applied.borrow(), vec![11, 12, 11, 12, 12]);
        assert_eq!(body.pending().total_acknowledged(), 3);
    }

    #[test]
    fn test_host_echoes_newest_applied_input_tick() {
        let mut rig = Rig::new();
        let net = LoopbackNetwork::new();
        let link = HostLink::new(net.listen("host").unwrap(), Rc::new(EventBus::new()));
        let ctx = SyncContext::new(
            Rc::new(HostRole::new(link.handle())),
            Rc::new(ManualClock::default()),
            SessionConfig::default(),
        );
        let mut host = PredictedBody::new(rig.entity, &ctx).with_input_handler(steer_x);
        host.activate(&rig.scene).unwrap();
        assert_eq!(host.state(), PredictionState::Simulating);

        // Client counters run ahead of the host's.
        for tick in [42, 40, 41] {
            ctx.role.bus().notify(&Message::PlayerInput { entity: rig.entity, input: input(tick), tick: Tick::from(tick) });
        }
        let mut update = rig.update_ctx(3);
        host.on_fixed_update(&mut update);
        assert_eq!(host.last_applied_input(), 42);
        assert_eq!(host.broadcasts(), 1);

        let mut update = rig.update_ctx(4);
        host.on_fixed_update(&mut update);
        assert_eq!(host.last_applied_input(), 42);
    }

    fn steer_x(physics: &mut dyn PhysicsWorld, body: BodyHandle, input: &InputState) {
        physics.apply_impulse(body, input.axes);
    }

    #[test]
    fn test_fixed_update_consumes_one_snapshot_per_tick() {
        let mut rig = Rig::new();
        let mut body = rig.predicted();
        body.activate(&rig.scene).unwrap();

        let update = PhysicsUpdate {
            linear_velocity: Vec3::ZERO,
            transform: Pose::at(Vec3::new(7.0, 0.0, 0.0)).into(),
        };
        for tick in [1, 2] {
            rig.ctx.role.bus().notify(&Message::PhysicsUpdate { entity: rig.entity, update, tick });
        }
        assert_eq!(body.queued_snapshots(), 2);

        let mut ctx = rig.update_ctx(1);
        body.on_fixed_update(&mut ctx);
        assert_eq!(body.queued_snapshots(), 1);
        assert_eq!(body.last_reconciliation().unwrap().tick, 1);
        assert_eq!(rig.scene.mesh(rig.entity).unwrap().pose.position.x, 7.0);

        body.detach();
        assert_eq!(body.queued_snapshots(), 0);
        assert_eq!(body.state(), PredictionState::Idle);
    }
}
