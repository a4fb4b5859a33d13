//! Capacity arithmetic shared by the stores and the services.
//!
//! Occupancy is never cached: every admission decision counts live occupancy
//! records at decision time.

use crate::models::PlayerOccupancyRecord;

/// Slots held back for privileged requesters.
pub const DEFAULT_RESERVED_SLOTS: u32 = 3;

/// Seconds a connected record keeps counting without a refresh.
pub const DEFAULT_FRESHNESS_WINDOW_SECS: i64 = 60;

/// Capacity class of a requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
  Ordinary,
  Privileged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityPolicy {
  pub reserved_slots: u32,
  /// Seconds
  pub freshness_window: i64,
}

impl Default for CapacityPolicy {
  fn default() -> Self {
    Self {
      reserved_slots: DEFAULT_RESERVED_SLOTS,
      freshness_window: DEFAULT_FRESHNESS_WINDOW_SECS,
    }
  }
}

impl CapacityPolicy {
  /// Number of occupants a requester of the given class may join up to.
  ///
  /// When `reserved_slots >= max_players` ordinary requesters get zero slots.
  pub fn slot_limit(&self, max_players: u32, privilege: Privilege) -> u32 {
    match privilege {
      Privilege::Privileged => max_players,
      Privilege::Ordinary => max_players.saturating_sub(self.reserved_slots),
    }
  }

  /// Whether one more occupant of the given class fits.
  pub fn has_room(&self, live_occupancy: u32, max_players: u32, privilege: Privilege) -> bool {
    live_occupancy < self.slot_limit(max_players, privilege)
  }
}

/// Count records that hold a slot at `now`.
pub fn live_occupancy<'a>(
  records: impl IntoIterator<Item = &'a PlayerOccupancyRecord>,
  now: i64,
  freshness_window: i64,
) -> u32 {
  records
    .into_iter()
    .filter(|record| record.is_live(now, freshness_window))
    .count() as u32
}
