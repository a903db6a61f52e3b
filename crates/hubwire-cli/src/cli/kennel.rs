//! Kennel: add dogs and list them over the hub.
//!
//! The front desk takes requests from outside the bus (here, command line
//! arguments), so it is a pass-through channel wrapped in a [`Plug`] and
//! talks to the services through the request correlator. The adder and the
//! list service keep their state private and only share it as messages.

use std::time::Duration;

use anyhow::{Context, bail};
use hubwire_core::{Channel, Hub, MessageProcessor, Plug, Responder, request, spawn_processor};
use hubwire_types::config::HubConfig;
use hubwire_types::message::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::logger::LoggerService;

/// Message kinds, namespaced by role.
pub mod kinds {
    pub const LOG: &str = "system/LOG";
    pub const ADD_DOG: &str = "command/ADD_DOG";
    pub const DOG_ADDED: &str = "events/DOG_ADDED";
    pub const I_NEED_DOGS: &str = "query/I_NEED_DOGS";
    pub const LIST_OF_DOGS: &str = "document/LIST_OF_DOGS";
}

/// How long each service pretends its IO takes.
const SERVICE_LATENCY: Duration = Duration::from_millis(10);

/// How long the front desk waits for any answer.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dog {
    #[serde(rename = "type")]
    pub breed: String,
    pub name: String,
}

impl Dog {
    pub fn new(breed: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            breed: breed.into(),
            name: name.into(),
        }
    }

    /// Parse `TYPE:NAME`.
    pub fn parse(spec: &str) -> anyhow::Result<Self> {
        let Some((breed, name)) = spec.split_once(':') else {
            bail!("dog must be given as TYPE:NAME, got {spec:?}");
        };
        if breed.is_empty() || name.is_empty() {
            bail!("dog type and name must not be empty, got {spec:?}");
        }
        Ok(Self::new(breed, name))
    }

    fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

mod messages {
    use super::{Dog, kinds};
    use hubwire_types::message::Message;
    use serde_json::Value;

    pub fn log(line: &str) -> Message {
        Message::new(kinds::LOG).with("log", line)
    }

    pub fn add_dog(dog: &Dog) -> Message {
        Message::new(kinds::ADD_DOG).with("dog", dog.to_value())
    }

    pub fn dog_added(dog_id: usize, dog: Value) -> Message {
        Message::new(kinds::DOG_ADDED)
            .with("dogId", dog_id)
            .with("dog", dog)
    }

    pub fn ask_for_dogs() -> Message {
        Message::new(kinds::I_NEED_DOGS)
    }

    pub fn list_of_dogs(dogs: &[Value]) -> Message {
        Message::new(kinds::LIST_OF_DOGS).with("dogs", dogs.to_vec())
    }
}

/// Accepts `ADD_DOG` commands and announces each dog with its id.
#[derive(Default)]
struct DogAdderService {
    added: usize,
}

impl MessageProcessor for DogAdderService {
    async fn process(&mut self, message: &Message) -> Vec<Message> {
        if !message.is(kinds::ADD_DOG) {
            return Vec::new();
        }
        let Some(dog) = message.get("dog").filter(|d| d.is_object()) else {
            debug!("ADD_DOG without a dog ignored");
            return Vec::new();
        };
        tokio::time::sleep(SERVICE_LATENCY).await;
        let dog_id = self.added;
        self.added += 1;
        vec![messages::dog_added(dog_id, dog.clone())]
    }
}

/// Keeps its own list of dogs from `DOG_ADDED` events and answers
/// `I_NEED_DOGS` queries with it.
#[derive(Default)]
struct DogsListService {
    dogs: Vec<Value>,
}

impl MessageProcessor for DogsListService {
    async fn process(&mut self, message: &Message) -> Vec<Message> {
        match message.kind() {
            kinds::DOG_ADDED => {
                if let Some(dog) = message.get("dog") {
                    self.dogs.push(dog.clone());
                }
                Vec::new()
            }
            kinds::I_NEED_DOGS => {
                tokio::time::sleep(SERVICE_LATENCY).await;
                vec![messages::list_of_dogs(&self.dogs)]
            }
            _ => Vec::new(),
        }
    }
}

/// The outside-facing component: everything it writes goes to the hub, and
/// it hears the hub's broadcasts without echoing them back.
struct FrontDesk {
    channel: Channel,
}

impl FrontDesk {
    fn new(config: &HubConfig) -> (Self, Channel) {
        let channel = Channel::passthrough(config);
        let plugged = Plug::wrap(channel.clone(), config);
        (Self { channel }, plugged)
    }

    fn log(&self, line: &str) -> anyhow::Result<()> {
        self.channel.write(messages::log(line))?;
        Ok(())
    }

    /// Add `dog` and return the id the adder gave it.
    ///
    /// Dogs announced for other callers are skipped by comparing payloads,
    /// since the bus carries no correlation id.
    async fn add_dog(&self, dog: &Dog) -> anyhow::Result<u64> {
        let wanted = dog.to_value();
        let request_msg = messages::add_dog(dog);
        let pending = request(
            &self.channel,
            move |_| request_msg,
            move |msg: &Message, responder: &Responder<u64>| {
                if msg.is(kinds::DOG_ADDED) && msg.get("dog") == Some(&wanted) {
                    responder.respond(msg.get("dogId").and_then(Value::as_u64).unwrap_or_default());
                }
            },
        );
        let dog_id = tokio::time::timeout(REQUEST_TIMEOUT, pending)
            .await
            .context("adding a dog timed out")??;
        Ok(dog_id)
    }

    async fn list_dogs(&self) -> anyhow::Result<Vec<Dog>> {
        self.log("DOGS REQUEST")?;
        let pending = request(
            &self.channel,
            |_| messages::ask_for_dogs(),
            |msg: &Message, responder: &Responder<Value>| {
                if msg.is(kinds::LIST_OF_DOGS) {
                    responder.respond(msg.get("dogs").cloned().unwrap_or_default());
                }
            },
        );
        let dogs = tokio::time::timeout(REQUEST_TIMEOUT, pending)
            .await
            .context("listing dogs timed out")??;
        serde_json::from_value(dogs).context("malformed list of dogs")
    }
}

/// Outcome of one kennel run.
#[derive(Debug, Serialize)]
pub struct KennelReport {
    /// Ids assigned to the dogs added from the command line, in order.
    pub added: Vec<u64>,
    pub dogs: Vec<Dog>,
    #[serde(skip)]
    pub logs: Vec<String>,
}

/// Start the kennel, seed it with one dog, add `dogs` through the front desk,
/// and list everything.
pub async fn run(config: HubConfig, dogs: &[Dog]) -> anyhow::Result<KennelReport> {
    let (logger, mut lines) = LoggerService::new(kinds::LOG);
    let (front, plugged) = FrontDesk::new(&config);

    let hub = Hub::new(
        config.clone(),
        [
            spawn_processor(logger, &config),
            spawn_processor(DogAdderService::default(), &config),
            spawn_processor(DogsListService::default(), &config),
            plugged,
        ],
    );

    front.log("STARTING KENNEL")?;
    // Seed straight through the hub's inbound side.
    hub.write(messages::add_dog(&Dog::new("Beagle", "Izzy")))?;

    let mut added = Vec::with_capacity(dogs.len());
    for dog in dogs {
        let dog_id = front.add_dog(dog).await?;
        info!(dog_id, name = %dog.name, "dog added");
        added.push(dog_id);
    }
    let listed = front.list_dogs().await?;

    hub.shutdown();
    let mut logs = Vec::new();
    while let Ok(line) = lines.try_recv() {
        logs.push(line);
    }

    Ok(KennelReport {
        added,
        dogs: listed,
        logs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dog_spec() {
        assert_eq!(Dog::parse("Beagle:Izzy").unwrap(), Dog::new("Beagle", "Izzy"));
        assert!(Dog::parse("Beagle").is_err());
        assert!(Dog::parse(":Izzy").is_err());
    }

    #[test]
    fn dog_serializes_breed_as_type() {
        let value = Dog::new("Pit-Bull", "Dexter").to_value();
        assert_eq!(value, serde_json::json!({"type": "Pit-Bull", "name": "Dexter"}));
    }

    #[tokio::test]
    async fn lists_seeded_and_added_dogs() {
        let report = run(
            HubConfig::default(),
            &[Dog::new("Pit-Bull", "Dexter"), Dog::new("Swiss-Shepherd", "Chaser")],
        )
        .await
        .unwrap();

        assert_eq!(report.added, vec![1, 2]);
        let names: Vec<_> = report.dogs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Izzy", "Dexter", "Chaser"]);
        assert!(report.logs.contains(&"STARTING KENNEL".to_string()));
    }

    #[tokio::test]
    async fn list_service_answers_from_its_own_state() {
        let mut service = DogsListService::default();
        let dog = Dog::new("Beagle", "Izzy").to_value();

        service.process(&messages::dog_added(0, dog.clone())).await;
        let reply = service.process(&messages::ask_for_dogs()).await;

        assert_eq!(reply.len(), 1);
        assert_eq!(reply[0].get("dogs"), Some(&Value::Array(vec![dog])));
    }

    #[tokio::test]
    async fn adder_ignores_malformed_commands() {
        let mut adder = DogAdderService::default();
        assert!(adder.process(&Message::new(kinds::ADD_DOG)).await.is_empty());
        assert!(adder.process(&messages::log("hi")).await.is_empty());
    }
}
