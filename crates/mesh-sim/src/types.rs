//! Common types for the player simulator
//!
//! Player numbering, simulator identifiers and the flag vocabulary shared by
//! the registry, the scheduler and the event builders.

/// Lowest player number a simulator can claim
pub const MIN_PLAYER: u8 = 1;

/// Highest player number a simulator can claim
pub const MAX_PLAYER: u8 = 6;

/// Fixed-point scale of the pitch field in beat and status packets (1.0 = 0x100000)
pub const PITCH_SCALE: f64 = 1_048_576.0;

/// Default playback pitch (normal speed)
pub const DEFAULT_PITCH: f64 = 1.0;

/// All player numbers in allocation order
pub fn player_numbers() -> impl Iterator<Item = u8> {
    MIN_PLAYER..=MAX_PLAYER
}

/// Check that a player number is within the simulated range
pub fn is_valid_player(player: u8) -> bool {
    (MIN_PLAYER..=MAX_PLAYER).contains(&player)
}

/// Encode a pitch multiplier the way player packets carry it
#[inline]
pub fn encode_pitch(pitch: f64) -> i32 {
    (pitch * PITCH_SCALE).round() as i32
}

/// Simulator identifier
///
/// Allocated from a monotonically increasing counter, so ordering by id is
/// the order in which simulators were created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimId(pub u64);

impl std::fmt::Display for SimId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sim-{}", self.0)
    }
}

/// Boolean flags a simulator exposes to the presentation surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimFlag {
    Playing,
    Master,
    OnAir,
    Sync,
}

impl SimFlag {
    /// Get the name of this flag
    pub fn name(&self) -> &'static str {
        match self {
            SimFlag::Playing => "Playing",
            SimFlag::Master => "Master",
            SimFlag::OnAir => "On-Air",
            SimFlag::Sync => "Sync",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pitch_encoding() {
        assert_eq!(encode_pitch(1.0), 0x100000);
        assert_eq!(encode_pitch(0.5), 0x80000);
        assert_eq!(encode_pitch(1.5), 0x180000);
        // 1.0001 * 2^20 = 1048680.8576 rounds up
        assert_eq!(encode_pitch(1.0001), 1_048_681);
    }

    #[test]
    fn test_player_range() {
        assert_eq!(player_numbers().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5, 6]);
        assert!(!is_valid_player(0));
        assert!(is_valid_player(6));
        assert!(!is_valid_player(7));
    }

    #[test]
    fn test_sim_id_order() {
        assert!(SimId(1) < SimId(2));
        assert_eq!(SimId(7).to_string(), "sim-7");
        assert_eq!(SimFlag::OnAir.name(), "On-Air");
    }
}
