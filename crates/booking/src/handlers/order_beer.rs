use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use courier_core::DomainError;
use courier_events::{CommandHandler, HandlerContext};

use crate::messages::{BeerOrdered, OrderBeer};
use crate::sampler::Sampler;

/// Delivers beer to a room. Now and then the bar runs dry and the order is
/// retried through redelivery.
pub struct OrderBeerHandler {
    sampler: Arc<dyn Sampler>,
}

impl OrderBeerHandler {
    pub fn new(sampler: Arc<dyn Sampler>) -> Self {
        Self { sampler }
    }

    /// One order in ten finds no beer left.
    fn out_of_beer(&self) -> bool {
        self.sampler.sample(0..=9) == 0
    }
}

#[async_trait]
impl CommandHandler<OrderBeer> for OrderBeerHandler {
    fn name(&self) -> &str {
        "OrderBeerHandler"
    }

    async fn handle(&self, ctx: &HandlerContext, command: OrderBeer) -> anyhow::Result<()> {
        if self.out_of_beer() {
            return Err(DomainError::unavailable(format!(
                "no beer left for room {}, please try later",
                command.room_id
            ))
            .into());
        }

        ctx.publish(BeerOrdered {
            room_id: command.room_id.clone(),
            count: command.count,
        })
        .await?;

        info!(room_id = %command.room_id, count = command.count, "beers ordered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::{FixedSampler, ScriptedSampler};
    use crate::testing::Fixture;

    fn order() -> OrderBeer {
        OrderBeer {
            room_id: "12".into(),
            count: 4,
        }
    }

    #[tokio::test]
    async fn publishes_beer_ordered() {
        let fixture = Fixture::new();
        let handler = OrderBeerHandler::new(Arc::new(FixedSampler(5)));

        handler
            .handle(&fixture.context::<OrderBeer>(), order())
            .await
            .unwrap();

        assert_eq!(
            fixture.published_events::<BeerOrdered>(),
            vec![BeerOrdered {
                room_id: "12".into(),
                count: 4
            }]
        );
    }

    #[tokio::test]
    async fn empty_bar_fails_until_beer_is_back() {
        let fixture = Fixture::new();
        let handler = OrderBeerHandler::new(Arc::new(ScriptedSampler::new([0], 5)));

        let err = handler
            .handle(&fixture.context::<OrderBeer>(), order())
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<DomainError>(),
            Some(DomainError::Unavailable(msg)) if msg.contains("no beer left for room 12")
        ));
        assert!(fixture.published_events::<BeerOrdered>().is_empty());

        // Next attempt finds beer.
        handler
            .handle(&fixture.context::<OrderBeer>(), order())
            .await
            .unwrap();
        assert_eq!(fixture.published_events::<BeerOrdered>().len(), 1);
    }
}
