use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use courier_events::{CommandHandler, HandlerContext};

use crate::messages::{BookRoom, PRICE_STEP, PRICE_STEPS, ReservationId, RoomBooked};
use crate::sampler::Sampler;

/// Books a room and announces it with `RoomBooked`.
pub struct BookRoomHandler {
    sampler: Arc<dyn Sampler>,
}

impl BookRoomHandler {
    pub fn new(sampler: Arc<dyn Sampler>) -> Self {
        Self { sampler }
    }

    /// Some random price; a real system would ask a pricing service.
    fn price(&self) -> u64 {
        PRICE_STEP * u64::from(self.sampler.sample(PRICE_STEPS))
    }
}

#[async_trait]
impl CommandHandler<BookRoom> for BookRoomHandler {
    fn name(&self) -> &str {
        "BookRoomHandler"
    }

    async fn handle(&self, ctx: &HandlerContext, command: BookRoom) -> anyhow::Result<()> {
        command.validate()?;

        let price = self.price();
        info!(
            room_id = %command.room_id,
            guest = %command.guest_name,
            start = %command.start_date,
            end = %command.end_date,
            price,
            "room booked"
        );

        ctx.publish(RoomBooked {
            reservation_id: ReservationId::new(),
            room_id: command.room_id,
            guest_name: command.guest_name,
            price,
            start_date: command.start_date,
            end_date: command.end_date,
        })
        .await?;
        Ok(())
    }
}
