//! Hotel booking domain wired onto the courier dispatch core.
//!
//! Booking a room publishes `RoomBooked`; two independent listeners react to
//! it: one orders welcome beers for the room, the other keeps a running
//! revenue total.

pub mod handlers;
pub mod messages;
pub mod sampler;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use courier_events::{RegistryBuilder, RegistryError};

pub use handlers::{
    BookRoomHandler, BookingsFinancialReport, FinancialReport, OrderBeerHandler,
    OrderBeerOnRoomBooked,
};
pub use messages::{BeerOrdered, BookRoom, OrderBeer, ReservationId, RoomBooked};
pub use sampler::{FixedSampler, RandomSampler, Sampler, ScriptedSampler};

/// Registers every booking handler.
///
/// Returns the financial report so callers can read the totals it keeps.
pub fn register(
    builder: &mut RegistryBuilder,
    sampler: Arc<dyn Sampler>,
) -> Result<Arc<BookingsFinancialReport>, RegistryError> {
    let report = Arc::new(BookingsFinancialReport::new());

    builder
        .register_command_handler::<BookRoom, _>(BookRoomHandler::new(sampler.clone()))?
        .register_command_handler::<OrderBeer, _>(OrderBeerHandler::new(sampler.clone()))?
        .register_event_handler::<RoomBooked, _>(OrderBeerOnRoomBooked::new(sampler))?
        .register_event_handler::<RoomBooked, _>(report.clone())?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_events::{HandlerRegistry, Message};

    #[test]
    fn registers_the_booking_routes() {
        let mut builder = HandlerRegistry::builder();
        register(&mut builder, Arc::new(FixedSampler(1))).unwrap();
        let registry = builder.build();

        assert_eq!(
            registry.command_handler(BookRoom::MESSAGE_TYPE).unwrap().name(),
            "BookRoomHandler"
        );
        assert_eq!(
            registry.command_handler(OrderBeer::MESSAGE_TYPE).unwrap().name(),
            "OrderBeerHandler"
        );
        let names: Vec<_> = registry
            .event_handlers(RoomBooked::MESSAGE_TYPE)
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        assert_eq!(names, ["OrderBeerOnRoomBooked", "BookingsFinancialReport"]);
        assert!(registry.event_handlers(BeerOrdered::MESSAGE_TYPE).is_empty());
    }

    #[test]
    fn registering_twice_is_rejected() {
        let mut builder = HandlerRegistry::builder();
        register(&mut builder, Arc::new(FixedSampler(1))).unwrap();
        let err = register(&mut builder, Arc::new(FixedSampler(1))).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateCommandHandler { .. }));
    }
}
