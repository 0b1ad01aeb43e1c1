use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use courier_core::{DomainError, DomainResult};
use courier_events::{Command, Event, Message};

/// Price of one booking is `PRICE_STEP × k` for a sampled `k` in `PRICE_STEPS`.
pub const PRICE_STEP: u64 = 10;
pub const PRICE_STEPS: core::ops::RangeInclusive<u32> = 1..=40;

/// Beers ordered per booking.
pub const BEERS_PER_ORDER: core::ops::RangeInclusive<u32> = 1..=10;

/// Reservation identifier (assigned when a room is booked).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationId(Uuid);

impl ReservationId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ReservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for ReservationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Command: BookRoom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookRoom {
    pub room_id: String,
    pub guest_name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl BookRoom {
    pub fn validate(&self) -> DomainResult<()> {
        if self.room_id.trim().is_empty() {
            return Err(DomainError::validation("room_id cannot be empty"));
        }
        if self.end_date < self.start_date {
            return Err(DomainError::validation("end_date precedes start_date"));
        }
        Ok(())
    }
}

impl Message for BookRoom {
    const MESSAGE_TYPE: &'static str = "booking.BookRoom";
}
impl Command for BookRoom {}

/// Event: RoomBooked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomBooked {
    pub reservation_id: ReservationId,
    pub room_id: String,
    pub guest_name: String,
    pub price: u64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl Message for RoomBooked {
    const MESSAGE_TYPE: &'static str = "booking.RoomBooked";
}
impl Event for RoomBooked {}

/// Command: OrderBeer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBeer {
    pub room_id: String,
    pub count: u32,
}

impl Message for OrderBeer {
    const MESSAGE_TYPE: &'static str = "booking.OrderBeer";
}
impl Command for OrderBeer {}

/// Event: BeerOrdered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeerOrdered {
    pub room_id: String,
    pub count: u32,
}

impl Message for BeerOrdered {
    const MESSAGE_TYPE: &'static str = "booking.BeerOrdered";
}
impl Event for BeerOrdered {}
