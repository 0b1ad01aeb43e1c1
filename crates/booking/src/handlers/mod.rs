//! Booking handlers.

mod book_room;
mod financial_report;
mod order_beer;
mod order_beer_on_room_booked;

pub use book_room::BookRoomHandler;
pub use financial_report::{BookingsFinancialReport, DEDUP_WINDOW, FinancialReport};
pub use order_beer::OrderBeerHandler;
pub use order_beer_on_room_booked::OrderBeerOnRoomBooked;
