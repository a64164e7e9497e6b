use super::{normalize_code, AppState, Room, RoomHandle};
use crate::error::RoomResult;
use crate::protocol::{RoomSnapshot, ServerMessage};
use crate::types::*;
use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use tokio::sync::broadcast;

const CODE_CHARS: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Generate a random short room code
fn generate_short_code(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| CODE_CHARS[rng.random_range(0..CODE_CHARS.len())] as char)
        .collect()
}

/// A seat in a room together with the room's event stream.
/// The receiver is subscribed before the seat is taken, so the member
/// sees every event from its own join onwards.
#[derive(Debug)]
pub struct Membership {
    pub room_code: RoomCode,
    pub player_name: PlayerName,
    pub session_token: SessionToken,
    pub room: RoomSnapshot,
    pub events: broadcast::Receiver<ServerMessage>,
}

impl AppState {
    /// Open a new room with the caller as host
    pub async fn create_room(
        &self,
        host_name: &str,
        connection_id: Option<ConnectionId>,
    ) -> RoomResult<Membership> {
        let mut rooms = self.rooms.write().await;
        // Collisions are retried; the alphabet leaves ~920k four-letter codes
        let code = loop {
            let code = generate_short_code(self.config.room_code_length);
            if !rooms.contains_key(&code) {
                break code;
            }
        };
        let room = Room::new(code.clone(), host_name, connection_id, self.config.game.clone())?;
        let handle = RoomHandle::new(room);
        let events = handle.events.subscribe();

        let guard = handle.room.lock().await;
        let membership = Membership {
            room_code: code.clone(),
            player_name: guard.players[0].name.clone(),
            session_token: guard.players[0].session_token.clone(),
            room: guard.snapshot(),
            events,
        };
        drop(guard);

        rooms.insert(code.clone(), handle);
        tracing::info!("Room {} created by {}", code, membership.player_name);
        Ok(membership)
    }

    /// Take a seat in an existing room
    pub async fn join_room(
        &self,
        room_code: &str,
        player_name: &str,
        connection_id: Option<ConnectionId>,
    ) -> RoomResult<Membership> {
        let handle = self.room_handle(room_code).await?;
        let mut room = handle.room.lock().await;
        let events = handle.events.subscribe();
        let mut out = Vec::new();
        let session_token = room.join(player_name, connection_id, &mut out)?;
        handle.publish(out);

        let player_name = room
            .players
            .last()
            .map(|p| p.name.clone())
            .unwrap_or_default();
        Ok(Membership {
            room_code: room.code.clone(),
            player_name,
            session_token,
            room: room.snapshot(),
            events,
        })
    }

    /// Reattach a new connection to a seat kept through a disconnect
    pub async fn resume_session(
        &self,
        room_code: &str,
        player_name: &str,
        session_token: &str,
        connection_id: Option<ConnectionId>,
    ) -> RoomResult<Membership> {
        let handle = self.room_handle(room_code).await?;
        let mut room = handle.room.lock().await;
        let events = handle.events.subscribe();
        let mut out = Vec::new();
        room.resume(player_name, session_token, connection_id, &mut out)?;
        handle.publish(out);

        Ok(Membership {
            room_code: room.code.clone(),
            player_name: player_name.to_string(),
            session_token: session_token.to_string(),
            room: room.snapshot(),
            events,
        })
    }

    pub async fn leave_room(&self, room_code: &str, player_name: &str) -> RoomResult<()> {
        self.with_room(room_code, |room, out| room.leave(player_name, Utc::now(), out))
            .await
    }

    /// Read-only snapshot used for rehydration
    pub async fn get_room_info(&self, room_code: &str) -> RoomResult<RoomSnapshot> {
        let handle = self.room_handle(room_code).await?;
        let room = handle.room.lock().await;
        Ok(room.snapshot())
    }

    /// Note that a connection went away; the seat is held for the
    /// disconnect grace period
    pub async fn disconnect(&self, room_code: &str, player_name: &str, connection_id: &str) {
        let result = self
            .with_room(room_code, |room, out| {
                Ok(room.disconnect(player_name, connection_id, Utc::now(), out))
            })
            .await;
        if let Ok(true) = result {
            tracing::info!("Room {}: {} disconnected", normalize_code(room_code), player_name);
        }
    }

    /// Evict players past their disconnect grace and drop rooms that have
    /// been empty or finished for longer than the idle grace.
    /// Returns the codes of removed rooms.
    pub async fn collect_garbage(&self, now: DateTime<Utc>) -> Vec<RoomCode> {
        let disconnect_grace = to_delta(self.config.disconnect_grace);
        let idle_grace = to_delta(self.config.room_idle_grace);

        let handles: Vec<RoomHandle> = self.rooms.read().await.values().cloned().collect();
        let mut candidates = Vec::new();
        for handle in handles {
            let mut room = handle.room.lock().await;
            let mut out = Vec::new();
            let evicted = room.evict_disconnected(disconnect_grace, now, &mut out);
            if !evicted.is_empty() {
                tracing::info!("Room {}: evicted {:?}", room.code, evicted);
            }
            handle.publish(out);
            if room.is_collectable(idle_grace, now) {
                candidates.push(room.code.clone());
            }
        }
        if candidates.is_empty() {
            return candidates;
        }

        let mut rooms = self.rooms.write().await;
        let mut removed = Vec::new();
        for code in candidates {
            let Some(handle) = rooms.get(&code).cloned() else {
                continue;
            };
            // Someone may have joined since the first pass
            let room = handle.room.lock().await;
            if !room.is_collectable(idle_grace, now) {
                continue;
            }
            let _ = handle.events.send(ServerMessage::RoomClosed {
                room_code: code.clone(),
            });
            drop(room);
            rooms.remove(&code);
            tracing::info!("Room {} closed", code);
            removed.push(code);
        }
        removed
    }
}

fn to_delta(duration: std::time::Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}
