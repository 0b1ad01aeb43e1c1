//! Background `BookRoom` traffic for the demo.
//!
//! Lives outside the dispatcher: it only uses the command bus, like any other
//! caller would.

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use courier_booking::BookRoom;
use courier_events::CommandBus;

const GUEST_NAME: &str = "John";
const STAY_DAYS: i64 = 3;

/// The `n`-th booking the generator sends.
pub fn booking(n: u64) -> BookRoom {
    let start_date = Utc::now();
    BookRoom {
        room_id: n.to_string(),
        guest_name: GUEST_NAME.to_string(),
        start_date,
        end_date: start_date + chrono::Duration::days(STAY_DAYS),
    }
}

/// Send one booking per `interval` until `cancel` fires.
///
/// The task resolves to the number of bookings the bus accepted. Publish
/// failures are logged and the generator keeps going.
pub fn spawn(commands: CommandBus, interval: Duration, cancel: CancellationToken) -> JoinHandle<u64> {
    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "traffic generator started");
        let mut sent = 0u64;
        let mut n = 0u64;

        loop {
            n += 1;
            match commands.send(booking(n)).await {
                Ok(message_id) => {
                    sent += 1;
                    debug!(%message_id, room_id = n, "booking sent");
                }
                Err(err) => warn!(room_id = n, error = %err, "failed to send booking"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!(sent, "traffic generator stopped");
        sent
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bookings_are_valid_three_night_stays() {
        let booking = booking(7);
        assert_eq!(booking.room_id, "7");
        assert_eq!(booking.guest_name, "John");
        assert_eq!(booking.end_date - booking.start_date, chrono::Duration::days(3));
        assert!(booking.validate().is_ok());
    }
}
