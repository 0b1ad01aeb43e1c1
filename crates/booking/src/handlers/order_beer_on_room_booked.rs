use std::sync::Arc;

use async_trait::async_trait;

use courier_events::{EventHandler, HandlerContext};

use crate::messages::{BEERS_PER_ORDER, OrderBeer, RoomBooked};
use crate::sampler::Sampler;

/// Welcome drinks: every booking triggers a beer order for the room.
pub struct OrderBeerOnRoomBooked {
    sampler: Arc<dyn Sampler>,
}

impl OrderBeerOnRoomBooked {
    pub fn new(sampler: Arc<dyn Sampler>) -> Self {
        Self { sampler }
    }
}

#[async_trait]
impl EventHandler<RoomBooked> for OrderBeerOnRoomBooked {
    fn name(&self) -> &str {
        // Also the durable subscription name.
        "OrderBeerOnRoomBooked"
    }

    async fn handle(&self, ctx: &HandlerContext, event: RoomBooked) -> anyhow::Result<()> {
        ctx.send(OrderBeer {
            room_id: event.room_id,
            count: self.sampler.sample(BEERS_PER_ORDER),
        })
        .await?;
        Ok(())
    }
}
