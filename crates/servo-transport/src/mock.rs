use crate::{PortInfo, Result, ServoBus, TransportError, RAW_CENTER, RAW_MAX};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct MockState {
    positions: HashMap<u8, u16>,
    torque: HashMap<u8, bool>,
    goal_log: Vec<(u8, u16)>,
    torque_log: Vec<(u8, bool)>,
    fail_writes: u32,
    fail_reads: u32,
    fail_torque_writes: u32,
}

/// An in-process servo bus. Servos report `RAW_CENTER` until moved.
///
/// The paired [`MockHandle`] lets a test move servos or inject faults while
/// the bus itself is owned by the driver under test.
pub struct MockBus {
    name: String,
    state: Arc<Mutex<MockState>>,
}

impl MockBus {
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // Recover from poison; mock state stays usable after a paniced test.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl ServoBus for MockBus {
    fn open(port: &str, _baud: u32) -> Result<Self> {
        Ok(Self {
            name: port.to_string(),
            state: Arc::new(Mutex::new(MockState::default())),
        })
    }

    fn list() -> Result<Vec<PortInfo>> {
        Ok(vec![PortInfo {
            name: "mock0".to_string(),
            driver: "mock".to_string(),
        }])
    }

    fn read_position(&mut self, id: u8) -> Result<u16> {
        let mut st = self.state();
        if st.fail_reads > 0 {
            st.fail_reads -= 1;
            return Err(TransportError::NoResponse(id));
        }
        Ok(st.positions.get(&id).copied().unwrap_or(RAW_CENTER))
    }

    fn write_position(&mut self, id: u8, raw: u16) -> Result<()> {
        let mut st = self.state();
        if st.fail_writes > 0 {
            st.fail_writes -= 1;
            st.goal_log.push((id, raw));
            return Err(TransportError::NoResponse(id));
        }
        let raw = raw.min(RAW_MAX);
        st.goal_log.push((id, raw));
        st.positions.insert(id, raw);
        Ok(())
    }

    fn sync_read_positions(&mut self, ids: &[u8]) -> Result<Vec<(u8, u16)>> {
        let mut st = self.state();
        if st.fail_reads > 0 {
            st.fail_reads -= 1;
            return Err(TransportError::NoResponse(ids.first().copied().unwrap_or(0)));
        }
        Ok(ids
            .iter()
            .map(|&id| (id, st.positions.get(&id).copied().unwrap_or(RAW_CENTER)))
            .collect())
    }

    fn sync_write_positions(&mut self, targets: &[(u8, u16)]) -> Result<()> {
        let mut st = self.state();
        if st.fail_writes > 0 {
            st.fail_writes -= 1;
            for &(id, raw) in targets {
                st.goal_log.push((id, raw));
            }
            return Err(TransportError::NoResponse(
                targets.first().map(|t| t.0).unwrap_or(0),
            ));
        }
        for &(id, raw) in targets {
            let raw = raw.min(RAW_MAX);
            st.goal_log.push((id, raw));
            st.positions.insert(id, raw);
        }
        Ok(())
    }

    fn write_torque_enable(&mut self, id: u8, enabled: bool) -> Result<()> {
        let mut st = self.state();
        if st.fail_torque_writes > 0 {
            st.fail_torque_writes -= 1;
            return Err(TransportError::NoResponse(id));
        }
        st.torque_log.push((id, enabled));
        st.torque.insert(id, enabled);
        let _ = &self.name;
        Ok(())
    }
}

/// Test-side view of a [`MockBus`].
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    fn state(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Move a servo as if by hand.
    pub fn set_position(&self, id: u8, raw: u16) {
        self.state().positions.insert(id, raw.min(RAW_MAX));
    }

    pub fn position(&self, id: u8) -> u16 {
        self.state().positions.get(&id).copied().unwrap_or(RAW_CENTER)
    }

    pub fn torque_enabled(&self, id: u8) -> bool {
        self.state().torque.get(&id).copied().unwrap_or(false)
    }

    /// Every goal-position write seen, including failed attempts.
    pub fn goal_writes(&self) -> Vec<(u8, u16)> {
        self.state().goal_log.clone()
    }

    /// Every torque-enable write seen, in order.
    pub fn torque_writes(&self) -> Vec<(u8, bool)> {
        self.state().torque_log.clone()
    }

    /// Make the next `n` position writes fail with a missing-response error.
    pub fn fail_next_writes(&self, n: u32) {
        self.state().fail_writes = n;
    }

    /// Make the next `n` position reads fail with a missing-response error.
    pub fn fail_next_reads(&self, n: u32) {
        self.state().fail_reads = n;
    }

    /// Make the next `n` torque writes fail with a missing-response error.
    pub fn fail_next_torque_writes(&self, n: u32) {
        self.state().fail_torque_writes = n;
    }
}
