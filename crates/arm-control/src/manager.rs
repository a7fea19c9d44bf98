//! Registry of live robots plus relay room bookkeeping.

use crate::config::ControlConfig;
use crate::descriptor::ArmDescriptor;
use crate::error::{ControlError, Result};
use crate::robot::Robot;
use relay_client::{RoomInfo, RoomRegistry};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub struct RobotManager {
    robots: Mutex<HashMap<String, Robot>>,
    rooms: Arc<dyn RoomRegistry>,
}

impl RobotManager {
    pub fn new(rooms: Arc<dyn RoomRegistry>) -> Self {
        Self {
            robots: Mutex::new(HashMap::new()),
            rooms,
        }
    }

    fn robots_guard(&self) -> std::sync::MutexGuard<'_, HashMap<String, Robot>> {
        match self.robots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Instantiate a robot; its joint set is fixed by the descriptor.
    pub fn create_robot(
        &self,
        id: impl Into<String>,
        descriptor: &ArmDescriptor,
        config: ControlConfig,
    ) -> Result<Robot> {
        let id = id.into();
        let mut robots = self.robots_guard();
        if robots.contains_key(&id) {
            return Err(ControlError::DuplicateRobot(id));
        }
        let robot = Robot::new(id.clone(), descriptor, config);
        robots.insert(id, robot.clone());
        Ok(robot)
    }

    pub fn robot(&self, id: &str) -> Option<Robot> {
        self.robots_guard().get(id).cloned()
    }

    pub fn robot_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.robots_guard().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Tear a robot down: drivers disconnect, then the entry is dropped.
    pub async fn remove_robot(&self, id: &str) -> Result<()> {
        let robot = self
            .robots_guard()
            .remove(id)
            .ok_or_else(|| ControlError::RobotNotFound(id.to_string()))?;
        robot.shutdown().await;
        Ok(())
    }

    pub async fn create_room(
        &self,
        workspace_id: &str,
        room_id: Option<String>,
    ) -> Result<RoomInfo> {
        Ok(self.rooms.create_room(workspace_id, room_id).await?)
    }

    pub async fn list_rooms(&self, workspace_id: &str) -> Result<Vec<RoomInfo>> {
        Ok(self.rooms.list_rooms(workspace_id).await?)
    }
}
