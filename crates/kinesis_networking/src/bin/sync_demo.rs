//! # Sync Demo
//!
//! Runs a host and one client in a single process and prints how closely the
//! client tracked the host.
//!
//! ## Usage
//!
//! ```bash
//! RUST_LOG=kinesis_networking=debug sync_demo --duration-secs 5 --latency-ms 80
//! sync_demo --tcp --config session.toml
//! ```

use std::error::Error;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use clap::Parser;
use kinesis_core::{
    BodyHandle, EntityId, KinematicBody, KinematicWorld, Mesh, PhysicsWorld, Pose, RigidBody,
    Scene, Vec3,
};
use kinesis_networking::{
    AnimationPlayer, AnimationSync, Cadence, InputState, LoopbackNetwork, PredictedBody, Session,
    SessionConfig, SystemClock, TcpConnector, TcpPeerListener, TimeSource, TransformSync,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sync_demo")]
#[command(about = "Host and client in one process, over loopback or TCP")]
struct Args {
    /// How long to run
    #[arg(short, long, default_value_t = 3)]
    duration_secs: u64,

    /// Simulated one-way latency, applied by both links
    #[arg(short, long)]
    latency_ms: Option<f64>,

    /// Session config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use a localhost TCP socket instead of the in-process rendezvous
    #[arg(long)]
    tcp: bool,
}

/// Logs animation triggers instead of playing them.
struct LogPlayer(&'static str);

impl AnimationPlayer for LogPlayer {
    fn play(&mut self, entity: EntityId, name: &str) {
        info!(side = self.0, %entity, clip = name, "animation");
    }
}

/// One peer's world.
struct World {
    scene: Scene,
    physics: KinematicWorld,
    player: EntityId,
    prop: EntityId,
}

impl World {
    fn new() -> Result<Self, Box<dyn Error>> {
        let mut scene = Scene::new();
        let mut physics = KinematicWorld::with_damping(0.5);

        let player = scene.spawn();
        let handle = physics.add_body(KinematicBody::at(Pose::IDENTITY));
        scene.insert_mesh(player, Mesh::default())?;
        scene.insert_body(player, RigidBody { handle })?;

        let prop = scene.spawn();
        scene.insert_mesh(prop, Mesh::default())?;

        Ok(Self { scene, physics, player, prop })
    }
}

fn push(physics: &mut dyn PhysicsWorld, body: BodyHandle, input: &InputState) {
    physics.apply_impulse(body, input.axes * 0.1);
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("kinesis_networking=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if args.latency_ms.is_some() {
        config.simulated_latency_ms = args.latency_ms;
    }
    info!(?config, tcp = args.tcp, "starting sync demo");

    let clock: Rc<dyn TimeSource> = Rc::new(SystemClock::new());
    let loopback = LoopbackNetwork::new();
    let (mut host, mut client, host_id) = if args.tcp {
        let listener = TcpPeerListener::bind("127.0.0.1:0".parse()?)?;
        let host_id = listener.local_addr()?.to_string();
        let host = Session::host(listener, Rc::clone(&clock), config.clone());
        let client = Session::client(TcpConnector::new("client-1"), Rc::clone(&clock), config.clone());
        (host, client, host_id)
    } else {
        let host = Session::host(loopback.listen("host")?, Rc::clone(&clock), config.clone());
        let client = Session::client(loopback.connector("client-1"), Rc::clone(&clock), config.clone());
        (host, client, "host".to_owned())
    };
    client.connect_to_host(host_id.as_str())?;

    let mut host_world = World::new()?;
    let mut client_world = World::new()?;

    let host_body = PredictedBody::new(host_world.player, host.context())
        .with_prediction(true)
        .with_input_handler(push);
    host.attach(host_body, &host_world.scene)?;
    host.attach(
        TransformSync::new(host_world.prop, host.context()).with_cadence(Cadence::EveryFrame),
        &host_world.scene,
    )?;
    let host_anim = host.attach(
        AnimationSync::new(host_world.prop, host.context(), LogPlayer("host")),
        &host_world.scene,
    )?;

    let client_body = client.attach(
        PredictedBody::new(client_world.player, client.context())
            .with_prediction(true)
            .with_input_handler(push),
        &client_world.scene,
    )?;
    client.attach(TransformSync::new(client_world.prop, client.context()), &client_world.scene)?;
    client.attach(
        AnimationSync::new(client_world.prop, client.context(), LogPlayer("client")),
        &client_world.scene,
    )?;

    let end_ms = clock.now_ms() + Duration::from_secs(args.duration_secs).as_secs_f64() * 1000.0;
    let mut next_clip_ms = 0.0;
    let mut frames = 0u64;
    while clock.now_ms() < end_ms {
        let now = clock.now_ms();

        #[allow(clippy::cast_possible_truncation)]
        let angle = (now / 1000.0) as f32;
        if let Ok(mesh) = host_world.scene.mesh_mut(host_world.prop) {
            mesh.pose = Pose::at(Vec3::new(angle.cos() * 3.0, 0.0, angle.sin() * 3.0));
        }
        if now >= next_clip_ms {
            host_anim.borrow_mut().play("wave");
            next_clip_ms = now + 1000.0;
        }

        let steer = InputState::moving(Vec3::new(angle.sin(), 0.0, 1.0));
        client_body.borrow_mut().predict(steer, &mut client_world.physics);

        host.frame(&mut host_world.scene, &mut host_world.physics);
        client.frame(&mut client_world.scene, &mut client_world.physics);
        frames += 1;
        std::thread::sleep(Duration::from_millis(4));
    }

    let host_prop = host_world.scene.mesh(host_world.prop)?.pose.position;
    let client_prop = client_world.scene.mesh(client_world.prop)?.pose.position;
    let host_player = host_world.scene.mesh(host_world.player)?.pose.position;
    let client_player = client_world.scene.mesh(client_world.player)?.pose.position;
    let stats = *host.clock().stats();

    println!("frames            {frames}");
    println!("host ticks        {} (late {}, skipped {})", host.tick(), stats.late_ticks, stats.skipped_ticks);
    println!("players           {:?}", client.players());
    println!("round trip        {:?} ms", client.latency_ms());
    println!("prop drift        {:.3}", host_prop.distance(client_prop));
    println!("player drift      {:.3}", host_player.distance(client_player));
    println!("pending inputs    {}", client_body.borrow().pending().len());
    if let Some(r) = client_body.borrow().last_reconciliation() {
        println!("last correction   {:.4} at tick {}", r.correction, r.tick);
    }

    Ok(())
}
