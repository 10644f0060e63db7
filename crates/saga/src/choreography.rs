//! Routes bus deliveries to the step subscribed to their topic.
//!
//! There is no coordinator: each step only knows its own topic and the
//! events it emits. The dispatcher is plumbing between the bus and the steps.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::{JoinError, JoinSet};

use crate::bus::InMemoryBus;
use crate::messages::{Envelope, SagaMessage, Topic};
use crate::steps::{
    BookStep, BookingCancellationStep, BookingCompletionStep, PayStep,
    ReservationCancellationStep, ReservationCompletionStep, ReserveStep, SagaServices,
    StepHandler, StepOutcome, observe,
};

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchResult {
    /// A step consumed the message.
    Handled(StepOutcome),
    /// The payload was invalid and was dropped.
    Dropped,
    /// No step subscribes to the topic.
    Unrouted,
}

/// The set of saga participants wired to their topics.
pub struct Choreography {
    services: SagaServices,
    reserve: ReserveStep,
    handlers: HashMap<Topic, Arc<dyn StepHandler>>,
}

impl Choreography {
    pub fn new(services: SagaServices) -> Self {
        let steps: [Arc<dyn StepHandler>; 6] = [
            Arc::new(BookStep::new(services.clone())),
            Arc::new(PayStep::new(services.clone())),
            Arc::new(BookingCompletionStep::new(services.clone())),
            Arc::new(BookingCancellationStep::new(services.clone())),
            Arc::new(ReservationCompletionStep::new(services.clone())),
            Arc::new(ReservationCancellationStep::new(services.clone())),
        ];

        let handlers = steps
            .into_iter()
            .filter_map(|handler| handler.step().inbound().map(|topic| (topic, handler)))
            .collect();

        Self {
            reserve: ReserveStep::new(services.clone()),
            services,
            handlers,
        }
    }

    pub fn services(&self) -> &SagaServices {
        &self.services
    }

    /// The synchronous entry step.
    pub fn reserve_step(&self) -> &ReserveStep {
        &self.reserve
    }

    /// Topics that have a consuming step.
    pub fn subscribed_topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self.handlers.keys().copied().collect();
        topics.sort();
        topics
    }

    /// Decodes one delivery and hands it to the subscribed step.
    #[tracing::instrument(skip(self, envelope), fields(topic = %topic))]
    pub async fn dispatch(&self, topic: Topic, envelope: &Envelope) -> DispatchResult {
        let Some(handler) = self.handlers.get(&topic) else {
            tracing::info!("No saga consumer for topic");
            return DispatchResult::Unrouted;
        };

        let message = match SagaMessage::decode(topic, envelope) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid message format");
                metrics::counter!("saga_messages_dropped_total", "topic" => topic.as_str())
                    .increment(1);
                return DispatchResult::Dropped;
            }
        };

        let started = Instant::now();
        let outcome = handler.handle(message).await;
        observe(handler.step(), started.elapsed());
        DispatchResult::Handled(outcome)
    }

    /// Delivers pending messages one at a time until the bus is empty.
    ///
    /// Returns the number of deliveries processed.
    pub async fn run_until_idle(&self, bus: &InMemoryBus) -> usize {
        let mut delivered = 0;
        while let Some(delivery) = bus.next_delivery() {
            self.dispatch(delivery.topic, &delivery.envelope).await;
            delivered += 1;
        }
        delivered
    }

    /// Long-running delivery loop: one task per message.
    ///
    /// Stops taking deliveries once `shutdown` resolves, then waits for the
    /// tasks still in flight. Returns the number of deliveries processed.
    pub async fn run(
        self: Arc<Self>,
        bus: InMemoryBus,
        shutdown: impl Future<Output = ()> + Send,
    ) -> usize {
        tracing::info!(topics = ?self.subscribed_topics(), "Choreography started");
        let mut tasks = JoinSet::new();
        let mut delivered = 0;
        tokio::pin!(shutdown);

        loop {
            let delivery = tokio::select! {
                () = &mut shutdown => break,
                delivery = bus.recv() => delivery,
            };

            let choreography = Arc::clone(&self);
            tasks.spawn(async move {
                choreography
                    .dispatch(delivery.topic, &delivery.envelope)
                    .await
            });
            delivered += 1;

            while let Some(finished) = tasks.try_join_next() {
                log_join_error(finished);
            }
        }

        tracing::info!(in_flight = tasks.len(), "Choreography stopping");
        while let Some(finished) = tasks.join_next().await {
            log_join_error(finished);
        }
        tracing::info!(delivered, "Choreography stopped");
        delivered
    }
}

fn log_join_error(finished: Result<DispatchResult, JoinError>) {
    if let Err(e) = finished {
        tracing::error!(error = %e, "Delivery task failed");
    }
}
