//! The "I need veggies" exchange.
//!
//! A consumer announces `I_NEED_VEGGIES`; every producer that hears it
//! answers with a `VEGGIE`. The consumer eats what arrives before its
//! deadline and logs the rest as too late. Nobody addresses anybody: the
//! hub fans each message out and components filter by kind.

use std::time::Duration;

use hubwire_core::{FnProcessor, Hub, MessageProcessor, spawn_processor};
use hubwire_types::config::HubConfig;
use hubwire_types::message::Message;
use tokio::time::Instant;
use tracing::{debug, info_span, Instrument};

use super::logger::LoggerService;

const LOG: &str = "LOG";
const I_NEED_VEGGIES: &str = "I_NEED_VEGGIES";
const VEGGIE: &str = "VEGGIE";

fn veggie(name: &str) -> Message {
    Message::new(VEGGIE).with("veggie", name)
}

/// Answers immediately.
fn cucumber_producer() -> FnProcessor<impl FnMut(&Message) -> Option<Message> + Send + 'static> {
    FnProcessor(|m: &Message| m.is(I_NEED_VEGGIES).then(|| veggie("Cucumber")))
}

/// Answers after `delay`.
struct TomatoProducer {
    delay: Duration,
}

impl MessageProcessor for TomatoProducer {
    async fn process(&mut self, message: &Message) -> Vec<Message> {
        if !message.is(I_NEED_VEGGIES) {
            return Vec::new();
        }
        tokio::time::sleep(self.delay).await;
        vec![veggie("Tomato")]
    }
}

/// Asks for veggies on start and eats those that arrive in time.
struct VeggieConsumer {
    patience: Duration,
    deadline: Option<Instant>,
}

impl VeggieConsumer {
    fn new(patience: Duration) -> Self {
        Self {
            patience,
            deadline: None,
        }
    }

    fn on_time(&self) -> bool {
        self.deadline.is_none_or(|deadline| Instant::now() <= deadline)
    }
}

impl MessageProcessor for VeggieConsumer {
    async fn on_start(&mut self) -> Vec<Message> {
        self.deadline = Some(Instant::now() + self.patience);
        vec![Message::new(I_NEED_VEGGIES)]
    }

    async fn process(&mut self, message: &Message) -> Vec<Message> {
        let Some(name) = message.is(VEGGIE).then(|| message.get_str("veggie")).flatten() else {
            return Vec::new();
        };
        let log = if self.on_time() {
            format!("I got a {name}")
        } else {
            format!("Too bad I won't eat {name} today.")
        };
        vec![Message::new(LOG).with("log", log)]
    }
}

/// Run the exchange and return the logged lines in arrival order.
pub async fn run(
    config: HubConfig,
    tomato_delay: Duration,
    patience: Duration,
) -> anyhow::Result<Vec<String>> {
    let (logger, mut lines) = LoggerService::new(LOG);

    // Component order does not matter.
    let hub = Hub::new(
        config.clone(),
        [
            spawn_processor(logger, &config),
            spawn_processor(cucumber_producer(), &config),
            spawn_processor(TomatoProducer { delay: tomato_delay }, &config),
            spawn_processor(VeggieConsumer::new(patience), &config),
        ],
    );

    // Two producers, two answers. Bound the wait in case one goes missing.
    let limit = tomato_delay.max(patience) + Duration::from_secs(1);
    let collected = async {
        let mut logged = Vec::new();
        while logged.len() < 2 {
            match lines.recv().await {
                Some(line) => logged.push(line),
                None => break,
            }
        }
        logged
    }
    .instrument(info_span!("veggies"));

    let logged = tokio::time::timeout(limit, collected)
        .await
        .map_err(|_| anyhow::anyhow!("veggie exchange did not finish within {limit:?}"))?;

    debug!(lines = logged.len(), "veggie exchange done");
    hub.shutdown();
    Ok(logged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn both_veggies_arrive_in_time() {
        let mut logged = run(
            HubConfig::default(),
            Duration::ZERO,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        logged.sort();
        assert_eq!(logged, vec!["I got a Cucumber", "I got a Tomato"]);
    }

    #[tokio::test]
    async fn late_tomato_is_not_eaten() {
        let logged = run(
            HubConfig::default(),
            Duration::from_millis(200),
            Duration::from_millis(20),
        )
        .await
        .unwrap();

        assert_eq!(
            logged,
            vec!["I got a Cucumber", "Too bad I won't eat Tomato today."]
        );
    }

    #[tokio::test]
    async fn consumer_ignores_other_kinds() {
        let mut consumer = VeggieConsumer::new(Duration::from_secs(1));
        assert_eq!(consumer.on_start().await, vec![Message::new(I_NEED_VEGGIES)]);
        assert!(consumer.process(&Message::new(LOG)).await.is_empty());
    }
}
