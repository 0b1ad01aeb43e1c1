use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::info;

use courier_events::{EventHandler, HandlerContext};

use crate::messages::{ReservationId, RoomBooked};

/// Running revenue totals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinancialReport {
    pub bookings: u64,
    pub total_charge: u64,
}

/// Reservations remembered for spotting redeliveries.
pub const DEDUP_WINDOW: usize = 4096;

#[derive(Debug, Default)]
struct Ledger {
    report: FinancialReport,
    seen: HashSet<ReservationId>,
    order: VecDeque<ReservationId>,
}

impl Ledger {
    /// `false` if `id` is among the last `window` reservations.
    fn remember(&mut self, id: ReservationId, window: usize) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back(id);
        while self.order.len() > window {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }
}

/// Second `RoomBooked` listener: sums the price of every booking.
///
/// Redelivered events are counted once, as long as the reservation is one of
/// the last [`DEDUP_WINDOW`] seen.
#[derive(Debug)]
pub struct BookingsFinancialReport {
    ledger: Mutex<Ledger>,
    window: usize,
}

impl Default for BookingsFinancialReport {
    fn default() -> Self {
        Self::with_window(DEDUP_WINDOW)
    }
}

impl BookingsFinancialReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            ledger: Mutex::new(Ledger::default()),
            window: window.max(1),
        }
    }

    pub fn report(&self) -> FinancialReport {
        self.ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .report
            .clone()
    }
}

#[async_trait]
impl EventHandler<RoomBooked> for BookingsFinancialReport {
    fn name(&self) -> &str {
        "BookingsFinancialReport"
    }

    async fn handle(&self, _ctx: &HandlerContext, event: RoomBooked) -> anyhow::Result<()> {
        let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        if !ledger.remember(event.reservation_id, self.window) {
            return Ok(());
        }

        ledger.report.bookings += 1;
        ledger.report.total_charge += event.price;
        info!(
            reservation_id = %event.reservation_id,
            total_charge = ledger.report.total_charge,
            "bookings financial report updated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use chrono::Utc;

    fn booked(price: u64) -> RoomBooked {
        RoomBooked {
            reservation_id: ReservationId::new(),
            room_id: "1".into(),
            guest_name: "Ann".into(),
            price,
            start_date: Utc::now(),
            end_date: Utc::now(),
        }
    }

    #[tokio::test]
    async fn sums_prices_once_per_reservation() {
        let fixture = Fixture::new();
        let ctx = fixture.context::<RoomBooked>();
        let report = BookingsFinancialReport::new();
        let first = booked(120);

        report.handle(&ctx, first.clone()).await.unwrap();
        report.handle(&ctx, booked(30)).await.unwrap();
        report.handle(&ctx, first).await.unwrap();

        assert_eq!(
            report.report(),
            FinancialReport {
                bookings: 2,
                total_charge: 150
            }
        );
    }

    #[tokio::test]
    async fn remembers_only_the_latest_reservations() {
        let fixture = Fixture::new();
        let ctx = fixture.context::<RoomBooked>();
        let report = BookingsFinancialReport::with_window(2);
        let bookings: Vec<RoomBooked> = (1..=3).map(|n| booked(n * 10)).collect();

        for event in &bookings {
            report.handle(&ctx, event.clone()).await.unwrap();
        }
        // Still in the window: ignored.
        report.handle(&ctx, bookings[2].clone()).await.unwrap();
        assert_eq!(report.report().bookings, 3);

        let ledger = report.ledger.lock().unwrap();
        assert_eq!(ledger.seen.len(), 2);
        assert_eq!(ledger.order.len(), 2);
        assert!(!ledger.seen.contains(&bookings[0].reservation_id));
    }
}
