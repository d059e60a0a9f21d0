//! Player roster.
//!
//! The host rebroadcasts the full list whenever a slot is assigned or freed;
//! clients keep whatever list arrived last.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{info, warn};

use crate::events::OwnerId;
use crate::protocol::{Message, PlayerData, Topic};
use crate::transport::{ClientHandle, HostHandle};

use super::Role;

/// Connected players as this peer knows them.
pub struct Roster {
    players: Rc<RefCell<Vec<PlayerData>>>,
    owner: OwnerId,
    role: Rc<dyn Role>,
}

impl Roster {
    /// Starts tracking players for `role`.
    #[must_use]
    pub fn new(role: Rc<dyn Role>) -> Self {
        let owner = role.bus().register_owner();
        let players = Rc::new(RefCell::new(Vec::new()));
        if let Some(host) = role.as_host() {
            Self::track_host(host, owner, &players);
        } else if let Some(client) = role.as_client() {
            Self::track_client(client, owner, &players);
        }
        Self { players, owner, role }
    }

    fn track_host(host: &HostHandle, owner: OwnerId, players: &Rc<RefCell<Vec<PlayerData>>>) {
        for topic in [Topic::PeerJoined, Topic::PeerLeft] {
            let handle = host.clone();
            let players = Rc::clone(players);
            host.add_owned_listener(owner, topic, move |_| {
                let roster = handle.roster();
                info!(players = roster.len(), "roster changed");
                *players.borrow_mut() = roster.clone();
                if let Err(e) = handle.send_to_all_clients(&Message::PlayerJoined { players: roster }) {
                    warn!(error = %e, "roster broadcast failed");
                }
            });
        }
    }

    fn track_client(client: &ClientHandle, owner: OwnerId, players: &Rc<RefCell<Vec<PlayerData>>>) {
        let list = Rc::clone(players);
        client.add_owned_listener(owner, Topic::PlayerJoined, move |message| {
            if let Message::PlayerJoined { players } = message {
                info!(players = players.len(), "roster received");
                list.borrow_mut().clone_from(players);
            }
        });
        let list = Rc::clone(players);
        client.add_owned_listener(owner, Topic::Disconnected, move |_| {
            list.borrow_mut().clear();
        });
    }

    /// Current players in slot order.
    #[must_use]
    pub fn players(&self) -> Vec<PlayerData> {
        self.players.borrow().clone()
    }

    /// Stops tracking.
    pub fn detach(&mut self) {
        self.role.bus().unsubscribe_owner(self.owner);
    }
}
