use std::io;
use std::path::Path;

use async_trait::async_trait;

use crate::limits::MAX_ROOM_ID_LEN;
use crate::model::Room;

use super::{RoomRegistry, StoreError};

/// Fixed room list, loaded once at startup.
#[derive(Debug, Clone)]
pub struct StaticRoomRegistry {
    rooms: Vec<Room>,
}

impl StaticRoomRegistry {
    pub fn new(rooms: Vec<Room>) -> Self {
        Self { rooms }
    }

    /// Load a JSON array of rooms.
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let rooms: Vec<Room> = serde_json::from_str(&raw)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if let Some(bad) = rooms
            .iter()
            .find(|r| r.room_id.is_empty() || r.room_id.len() > MAX_ROOM_ID_LEN)
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid room id: {:?}", bad.room_id),
            ));
        }
        Ok(Self { rooms })
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

impl Default for StaticRoomRegistry {
    fn default() -> Self {
        let room = |id: &str, name: &str, capacity: u32, features: &[&str]| Room {
            room_id: id.into(),
            name: name.into(),
            capacity,
            features: features.iter().map(|f| f.to_string()).collect(),
        };
        Self::new(vec![
            room("CSIS-101", "Computer Lab 101", 40, &["projector", "computers"]),
            room("CSIS-102", "Computer Lab 102", 30, &["computers"]),
            room("CSIS-201", "Seminar Room 201", 20, &["whiteboard"]),
            room("CSIS-301", "Lecture Hall 301", 120, &["projector", "microphone"]),
        ])
    }
}

#[async_trait]
impl RoomRegistry for StaticRoomRegistry {
    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError> {
        Ok(self.rooms.clone())
    }

    async fn contains_room(&self, room_id: &str) -> Result<bool, StoreError> {
        Ok(self.rooms.iter().any(|r| r.room_id == room_id))
    }
}
