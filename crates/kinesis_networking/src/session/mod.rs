//! # Session
//!
//! One explicit context per game session, built once and passed by reference.
//!
//! ```text
//! Session::frame(scene, physics)
//!   ├─ link.poll(now)              inbound frames ─► EventBus ─► component inboxes
//!   ├─ ping.poll(now)              (client)
//!   ├─ clock.advance(now) ─► N × on_fixed_update(tick)
//!   ├─ on_update
//!   └─ link.flush(now)             outbox ─► channels
//! ```
//!
//! Everything here runs on the calling thread.

mod ping;
mod roles;
mod roster;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use kinesis_core::{PhysicsWorld, Scene};
use tracing::info;

use crate::config::SessionConfig;
use crate::error::{SetupError, TransportError, TransportResult};
use crate::events::EventBus;
use crate::protocol::{Message, PlayerData};
use crate::sync::{NetComponent, UpdateContext};
use crate::tick::{Tick, TickClock};
use crate::time::TimeSource;
use crate::transport::{ClientHandle, ClientLink, HostHandle, HostLink, PeerConnector, PeerId, PeerListener};

pub use ping::{PingMonitor, PongResponder};
pub use roles::{ClientRole, HostRole, Role, RoleKind};
pub use roster::Roster;

/// What components need from their session.
#[derive(Clone)]
pub struct SyncContext {
    /// Host or client networking.
    pub role: Rc<dyn Role>,
    /// Session clock.
    pub time: Rc<dyn TimeSource>,
    /// Session tunables.
    pub config: Rc<SessionConfig>,
    tick: Rc<Cell<Tick>>,
}

impl SyncContext {
    /// Bundles a role, clock and config.
    #[must_use]
    pub fn new(role: Rc<dyn Role>, time: Rc<dyn TimeSource>, config: SessionConfig) -> Self {
        Self { role, time, config: Rc::new(config), tick: Rc::new(Cell::new(0)) }
    }

    /// Tick of the most recent fixed update.
    #[must_use]
    pub fn current_tick(&self) -> Tick {
        self.tick.get()
    }

    /// Moves the shared tick counter. The session loop calls this before each
    /// fixed update.
    pub fn set_tick(&self, tick: Tick) {
        self.tick.set(tick);
    }
}

enum Link {
    Host(HostLink),
    Client(ClientLink),
}

/// Outcome of one [`Session::frame`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// Inbound messages dispatched.
    pub dispatched: usize,
    /// Fixed updates run.
    pub ticks: u32,
    /// Tick counter after the frame.
    pub tick: Tick,
}

/// A running host or client.
pub struct Session {
    link: Link,
    context: SyncContext,
    clock: TickClock,
    components: Vec<Rc<RefCell<dyn NetComponent>>>,
    roster: Roster,
    ping: Option<PingMonitor>,
    pong: Option<PongResponder>,
}

impl Session {
    /// Starts an authoritative host on `listener`.
    #[must_use]
    pub fn host(
        listener: impl PeerListener + 'static,
        time: Rc<dyn TimeSource>,
        config: SessionConfig,
    ) -> Self {
        let bus = Rc::new(EventBus::new());
        let mut link = HostLink::new(listener, bus).with_max_clients(config.max_clients);
        if let Some(ms) = config.simulated_latency_ms {
            link = link.with_latency(ms);
        }
        let handle = link.handle();
        info!(peer = %handle.local_id(), tick_rate = config.tick_rate, "host session started");

        let pong = PongResponder::new(handle.clone());
        let context = SyncContext::new(Rc::new(HostRole::new(handle)), time, config);
        Self::assemble(Link::Host(link), context, None, Some(pong))
    }

    /// Starts a disconnected client using `connector`.
    #[must_use]
    pub fn client(
        connector: impl PeerConnector + 'static,
        time: Rc<dyn TimeSource>,
        config: SessionConfig,
    ) -> Self {
        let bus = Rc::new(EventBus::new());
        let mut link = ClientLink::new(connector, bus);
        if let Some(ms) = config.simulated_latency_ms {
            link = link.with_latency(ms);
        }
        let handle = link.handle();
        info!(peer = %handle.local_id(), tick_rate = config.tick_rate, "client session started");

        let ping = PingMonitor::new(handle.clone(), Rc::clone(&time), config.ping_interval_ms);
        let context = SyncContext::new(Rc::new(ClientRole::new(handle)), time, config);
        Self::assemble(Link::Client(link), context, Some(ping), None)
    }

    fn assemble(
        link: Link,
        context: SyncContext,
        ping: Option<PingMonitor>,
        pong: Option<PongResponder>,
    ) -> Self {
        let clock = TickClock::new(context.config.tick_rate, context.config.max_catch_up_ticks);
        let roster = Roster::new(Rc::clone(&context.role));
        Self { link, context, clock, components: Vec::new(), roster, ping, pong }
    }

    /// Opens the client's connection to `host`.
    ///
    /// # Errors
    ///
    /// `ConnectionFailed` if unreachable, `NotAClient` on a host session.
    pub fn connect_to_host(&mut self, host: impl Into<PeerId>) -> TransportResult<()> {
        match &mut self.link {
            Link::Client(link) => link.connect_to_host(host),
            Link::Host(_) => Err(TransportError::NotAClient),
        }
    }

    /// Closes the client's connection. No-op on a host.
    pub fn disconnect(&mut self) {
        if let Link::Client(link) = &mut self.link {
            link.disconnect();
        }
    }

    /// Context to build components with.
    #[must_use]
    pub const fn context(&self) -> &SyncContext {
        &self.context
    }

    /// Host or client networking.
    #[must_use]
    pub fn role(&self) -> &Rc<dyn Role> {
        &self.context.role
    }

    /// Session bus.
    #[must_use]
    pub fn bus(&self) -> &Rc<EventBus<Message>> {
        self.context.role.bus()
    }

    /// Host handle, on a host.
    #[must_use]
    pub fn host_handle(&self) -> Option<HostHandle> {
        self.context.role.as_host().cloned()
    }

    /// Client handle, on a client.
    #[must_use]
    pub fn client_handle(&self) -> Option<ClientHandle> {
        self.context.role.as_client().cloned()
    }

    /// Activates `component` and adds it to the update loop.
    ///
    /// The returned handle must not be borrowed across [`Session::frame`].
    ///
    /// # Errors
    ///
    /// Whatever the component's `activate` reports.
    pub fn attach<C: NetComponent + 'static>(
        &mut self,
        mut component: C,
        scene: &Scene,
    ) -> Result<Rc<RefCell<C>>, SetupError> {
        component.activate(scene)?;
        let component = Rc::new(RefCell::new(component));
        let erased: Rc<RefCell<dyn NetComponent>> = component.clone();
        self.components.push(erased);
        Ok(component)
    }

    /// Runs one main-loop iteration.
    pub fn frame(&mut self, scene: &mut Scene, physics: &mut dyn PhysicsWorld) -> FrameReport {
        let now_ms = self.context.time.now_ms();
        let dispatched = match &mut self.link {
            Link::Host(link) => link.poll(now_ms),
            Link::Client(link) => link.poll(now_ms),
        };
        if let Some(ping) = self.ping.as_mut() {
            ping.poll(now_ms);
        }

        let interval = self.clock.interval_ms();
        let ticks = self.clock.advance(now_ms);
        for _ in 0..ticks {
            let (tick, start) = self.clock.begin_tick();
            self.context.set_tick(tick);
            let mut ctx = UpdateContext {
                scene: &mut *scene,
                physics: &mut *physics,
                now_ms,
                tick,
                tick_interval_ms: interval,
            };
            for component in &self.components {
                component.borrow_mut().on_fixed_update(&mut ctx);
            }
            self.clock.end_tick(start);
        }

        let mut ctx = UpdateContext {
            scene,
            physics,
            now_ms,
            tick: self.clock.tick(),
            tick_interval_ms: interval,
        };
        for component in &self.components {
            component.borrow_mut().on_update(&mut ctx);
        }

        match &mut self.link {
            Link::Host(link) => link.flush(now_ms),
            Link::Client(link) => link.flush(now_ms),
        }
        FrameReport { dispatched, ticks, tick: self.clock.tick() }
    }

    /// Fixed-step clock.
    #[must_use]
    pub const fn clock(&self) -> &TickClock {
        &self.clock
    }

    /// Ticks run so far.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.clock.tick()
    }

    /// Connected players as last known.
    #[must_use]
    pub fn players(&self) -> Vec<PlayerData> {
        self.roster.players()
    }

    /// Last measured round trip to the host, on a client.
    #[must_use]
    pub fn latency_ms(&self) -> Option<u64> {
        self.ping.as_ref().and_then(PingMonitor::latency_ms)
    }

    /// Detaches every component and listener.
    pub fn shutdown(&mut self) {
        for component in self.components.drain(..) {
            component.borrow_mut().detach();
        }
        if let Some(ping) = self.ping.as_mut() {
            ping.detach();
        }
        if let Some(pong) = self.pong.as_mut() {
            pong.detach();
        }
        self.roster.detach();
        self.bus().clear();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
