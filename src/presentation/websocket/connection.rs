//! WebSocket Connection State

use std::time::Instant;

/// Per-connection state for one gateway socket
#[derive(Debug)]
pub struct ConnectionState {
    pub user_id: i64,
    pub connection_id: String,
    pub sequence: u64,
    pub last_heartbeat: Instant,
    pub identified: bool,
}

impl ConnectionState {
    pub fn new(connection_id: String) -> Self {
        Self {
            user_id: 0,
            connection_id,
            sequence: 0,
            last_heartbeat: Instant::now(),
            identified: false,
        }
    }

    pub fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    pub fn heartbeat(&mut self) {
        self.last_heartbeat = Instant::now();
    }

    pub fn is_alive(&self, timeout_ms: u64) -> bool {
        self.last_heartbeat.elapsed().as_millis() < timeout_ms as u128
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic() {
        let mut state = ConnectionState::new("conn".into());
        assert_eq!(state.next_sequence(), 1);
        assert_eq!(state.next_sequence(), 2);
    }

    #[test]
    fn fresh_connection_is_alive() {
        let state = ConnectionState::new("conn".into());
        assert!(state.is_alive(1000));
    }
}
