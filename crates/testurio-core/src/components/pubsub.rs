//! Publish/subscribe components (spec §4.7).
//!
//! A [`Subscriber`] preserves per-topic FIFO delivery by funneling every
//! inbound `(topic, message)` pair through a single-consumer channel: the
//! adapter's `onMessage` callback only enqueues, and one background task
//! drains it in arrival order, so concurrent adapter threads can never
//! reorder a topic's messages relative to each other.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::component::handler::{execute_handlers, ChainResult};
use crate::component::{Component, ComponentBase};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::protocol::{MqAdapter, MqPublisher, MqSubscriber};
use crate::recorder::{Direction, Interaction, InteractionRecorder};
use crate::step::{Mode, Step, StepKind};
use crate::testcase::{HookBuilder, StepCollector, StepTarget};

/// A publisher bound to an MQ adapter (spec §4.7).
pub struct Publisher {
    base: ComponentBase,
    adapter: Arc<dyn MqAdapter>,
    publisher: Mutex<Option<Arc<dyn MqPublisher>>>,
    recorder: Arc<InteractionRecorder>,
}

impl Publisher {
    /// Declare a publisher against `adapter`.
    pub fn new(name: impl Into<String>, adapter: Arc<dyn MqAdapter>, recorder: Arc<InteractionRecorder>) -> Arc<Self> {
        Arc::new(Self { base: ComponentBase::new(name), adapter, publisher: Mutex::new(None), recorder })
    }

    fn publisher(&self) -> Result<Arc<dyn MqPublisher>> {
        self.publisher
            .lock()
            .clone()
            .ok_or_else(|| Error::lifecycle(format!("publisher '{}' has not been started", self.base.name())))
    }

    async fn execute_publish(&self, topic: &str, payload: Value) -> Result<()> {
        let publisher = self.publisher()?;
        let interaction_id = self.recorder.record_request(Interaction::start(
            self.base.name(),
            topic,
            "mq",
            Direction::Upstream,
            None,
            Some(payload.clone()),
        ));
        match publisher.publish(topic, Message::new(topic, payload)).await {
            Ok(()) => {
                self.recorder.record_response(&interaction_id, None);
                Ok(())
            }
            Err(e) => {
                self.recorder.record_failure(&interaction_id, e.to_string());
                Err(e)
            }
        }
    }

    async fn execute_publish_batch(&self, topic: &str, items: Vec<Value>) -> Result<()> {
        let publisher = self.publisher()?;
        let interaction_id = self.recorder.record_request(Interaction::start(
            self.base.name(),
            topic,
            "mq",
            Direction::Upstream,
            None,
            Some(Value::Array(items.clone())),
        ));
        let messages = items.into_iter().map(|payload| Message::new(topic, payload)).collect();
        match publisher.publish_batch(topic, messages).await {
            Ok(()) => {
                self.recorder.record_response(&interaction_id, None);
                Ok(())
            }
            Err(e) => {
                self.recorder.record_failure(&interaction_id, e.to_string());
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Component for Publisher {
    fn base(&self) -> &ComponentBase {
        &self.base
    }

    async fn do_start(&self) -> Result<()> {
        *self.publisher.lock() = Some(self.adapter.create_publisher().await?);
        Ok(())
    }

    async fn do_stop(&self) -> Result<()> {
        if let Some(publisher) = self.publisher.lock().take() {
            publisher.close().await?;
        }
        Ok(())
    }

    async fn create_hook_matcher(&self, _step: &Step) -> Box<dyn Fn(&Message) -> bool + Send + Sync> {
        Box::new(|_| false)
    }

    async fn execute_step(&self, step: &Step) -> Result<()> {
        match &step.kind {
            StepKind::Publish { topic, payload } => self.execute_publish(topic, payload.clone()).await,
            StepKind::PublishBatch { topic, items } => self.execute_publish_batch(topic, items.clone()).await,
            other => Err(Error::generic(format!("publisher cannot execute step kind {other:?}"))),
        }
    }
}

/// Step builder for [`Publisher`] (spec §4.7).
pub struct PublisherSteps<'a> {
    collector: &'a mut StepCollector,
    component: String,
}

impl<'a> PublisherSteps<'a> {
    /// `publish(topic, payload)` — action.
    pub fn publish(self, topic: impl Into<String>, payload: Value) -> Self {
        self.collector.push(self.component.clone(), StepKind::Publish { topic: topic.into(), payload }, Mode::Action);
        self
    }

    /// `publishBatch(topic, items)` — action; preserves per-topic ordering.
    pub fn publish_batch(self, topic: impl Into<String>, items: Vec<Value>) -> Self {
        self.collector.push(self.component.clone(), StepKind::PublishBatch { topic: topic.into(), items }, Mode::Action);
        self
    }
}

impl StepTarget for Publisher {
    type Builder<'a> = PublisherSteps<'a>;

    fn step_builder<'a>(&self, collector: &'a mut StepCollector) -> Self::Builder<'a> {
        PublisherSteps { collector, component: self.base.name().to_string() }
    }
}

/// A subscriber bound to an MQ adapter (spec §4.7). Topics are joined and
/// left explicitly via `.subscribe(topic)`/`.unsubscribe(topic)` steps.
pub struct Subscriber {
    base: ComponentBase,
    adapter: Arc<dyn MqAdapter>,
    subscriber: Mutex<Option<Arc<dyn MqSubscriber>>>,
    subscribed_topics: Mutex<HashSet<String>>,
    inbox: Mutex<Option<mpsc::UnboundedSender<(String, Message)>>>,
    recorder: Arc<InteractionRecorder>,
    self_ref: Weak<Subscriber>,
}

impl Subscriber {
    /// Declare a subscriber against `adapter`.
    pub fn new(name: impl Into<String>, adapter: Arc<dyn MqAdapter>, recorder: Arc<InteractionRecorder>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            base: ComponentBase::new(name),
            adapter,
            subscriber: Mutex::new(None),
            subscribed_topics: Mutex::new(HashSet::new()),
            inbox: Mutex::new(None),
            recorder,
            self_ref: weak.clone(),
        })
    }

    fn subscriber(&self) -> Result<Arc<dyn MqSubscriber>> {
        self.subscriber
            .lock()
            .clone()
            .ok_or_else(|| Error::lifecycle(format!("subscriber '{}' has not been started", self.base.name())))
    }

    async fn do_subscribe(&self, topic: &str) -> Result<()> {
        let subscriber = self.subscriber()?;
        let already = self.subscribed_topics.lock().contains(topic);
        if already {
            return Ok(());
        }
        subscriber.subscribe(topic).await?;
        self.subscribed_topics.lock().insert(topic.to_string());
        Ok(())
    }

    async fn do_unsubscribe(&self, topic: &str) -> Result<()> {
        let subscriber = self.subscriber()?;
        let was_subscribed = self.subscribed_topics.lock().remove(topic);
        if was_subscribed {
            subscriber.unsubscribe(topic).await?;
        }
        Ok(())
    }

    async fn dispatch_message(&self, topic: String, message: Message) {
        let probe = Message { message_type: topic, ..message };
        let interaction_id = self.recorder.record_request(Interaction::start(
            self.base.name(),
            &probe.message_type,
            "mq",
            Direction::Downstream,
            probe.trace_id.clone(),
            Some(probe.payload.clone()),
        ));
        let hooks = self.base.find_all_matching_hooks(&probe).await;
        let mut wait_hook_claimed = false;
        for hook in hooks {
            // `onMessage` hooks (no pending cell) fire on every matching
            // message; a `waitMessage` hook is one-shot, so only the oldest
            // still-unresolved one claims this message — later waiters stay
            // registered for later messages instead of all resolving together.
            if hook.pending.is_some() {
                if hook.resolved() || wait_hook_claimed {
                    continue;
                }
                wait_hook_claimed = true;
            }

            match execute_handlers(&hook.step.handlers, &probe).await {
                Ok((ChainResult::Forward(value), _)) => {
                    self.recorder.record_response(&interaction_id, Some(value));
                    if let Some(pending) = &hook.pending {
                        pending.resolve(probe.clone());
                    }
                }
                Ok((ChainResult::Dropped, _)) => {
                    self.recorder.record_response(&interaction_id, None);
                    if let Some(pending) = &hook.pending {
                        pending.reject("message dropped by handler chain");
                    }
                }
                Ok((ChainResult::Response(_) | ChainResult::Event { .. }, _)) => {
                    self.recorder.record_failure(&interaction_id, "mockResponse/mockEvent is not valid here");
                    self.base.track_unhandled_error("mockResponse/mockEvent is not valid on a subscriber onMessage chain");
                }
                Err(e) => {
                    self.recorder.record_failure(&interaction_id, e.to_string());
                    if let Some(pending) = &hook.pending {
                        pending.reject(e.to_string());
                    } else {
                        self.base.track_unhandled_error(e.to_string());
                    }
                }
            }
        }
    }

    async fn await_pending(&self, step: &Step) -> Result<()> {
        let hook = self
            .base
            .find_hook_by_step_id(&step.id)
            .await
            .ok_or_else(|| Error::generic(format!("no hook registered for step '{}'", step.id)))?;
        if hook.resolved() {
            return Err(Error::StrictOrderingViolation);
        }
        let pending = hook.pending.clone().ok_or_else(|| Error::generic("waitMessage step is missing its pending cell"))?;
        pending.wait(step.effective_timeout()).await?;
        Ok(())
    }
}

#[async_trait]
impl Component for Subscriber {
    fn base(&self) -> &ComponentBase {
        &self.base
    }

    async fn do_start(&self) -> Result<()> {
        let subscriber = self.adapter.create_subscriber().await?;
        let (tx, mut rx) = mpsc::unbounded_channel::<(String, Message)>();

        let worker_weak = self.self_ref.clone();
        tokio::spawn(async move {
            while let Some((topic, message)) = rx.recv().await {
                let Some(this) = worker_weak.upgrade() else { break };
                this.dispatch_message(topic, message).await;
            }
        });

        let forwarder = tx.clone();
        subscriber.on_message(Arc::new(move |topic: String, message: Message| {
            let _ = forwarder.send((topic, message));
        }));

        *self.inbox.lock() = Some(tx);
        *self.subscriber.lock() = Some(subscriber);
        Ok(())
    }

    async fn do_stop(&self) -> Result<()> {
        self.inbox.lock().take();
        if let Some(subscriber) = self.subscriber.lock().take() {
            subscriber.close().await?;
        }
        self.subscribed_topics.lock().clear();
        Ok(())
    }

    async fn create_hook_matcher(&self, step: &Step) -> Box<dyn Fn(&Message) -> bool + Send + Sync> {
        match &step.kind {
            StepKind::SubscriberOnMessage { topic, matcher } => {
                let topic = topic.clone();
                let matcher = matcher.clone();
                Box::new(move |msg: &Message| msg.message_type == topic && matcher.as_ref().map_or(true, |m| m(msg)))
            }
            _ => Box::new(|_| false),
        }
    }

    async fn execute_step(&self, step: &Step) -> Result<()> {
        match &step.kind {
            StepKind::Exec { operation, payload } => {
                let topic = payload
                    .as_str()
                    .ok_or_else(|| Error::generic(format!("subscriber exec '{operation}' expects a string topic payload")))?;
                match operation.as_str() {
                    "subscribe" => self.do_subscribe(topic).await,
                    "unsubscribe" => self.do_unsubscribe(topic).await,
                    other => Err(Error::generic(format!("unknown subscriber exec operation '{other}'"))),
                }
            }
            StepKind::SubscriberOnMessage { .. } if step.mode == Mode::Hook => Ok(()),
            StepKind::SubscriberOnMessage { .. } => self.await_pending(step).await,
            other => Err(Error::generic(format!("subscriber cannot execute step kind {other:?}"))),
        }
    }
}

/// Step builder for [`Subscriber`] (spec §4.7).
pub struct SubscriberSteps<'a> {
    collector: &'a mut StepCollector,
    component: String,
}

impl<'a> SubscriberSteps<'a> {
    /// `subscribe(topic)` — action; idempotent.
    pub fn subscribe(self, topic: impl Into<String>) -> Self {
        self.collector.push(
            self.component.clone(),
            StepKind::Exec { operation: "subscribe".to_string(), payload: Value::String(topic.into()) },
            Mode::Action,
        );
        self
    }

    /// `unsubscribe(topic)` — action; idempotent.
    pub fn unsubscribe(self, topic: impl Into<String>) -> Self {
        self.collector.push(
            self.component.clone(),
            StepKind::Exec { operation: "unsubscribe".to_string(), payload: Value::String(topic.into()) },
            Mode::Action,
        );
        self
    }

    /// `onMessage(topic)` — hook; non-strict.
    pub fn on_message(self, topic: impl Into<String>) -> HookBuilder<'a> {
        let idx =
            self.collector.push(self.component.clone(), StepKind::SubscriberOnMessage { topic: topic.into(), matcher: None }, Mode::Hook);
        HookBuilder::new(self.collector, idx)
    }

    /// `waitMessage(topic)` — wait; strict.
    pub fn wait_message(self, topic: impl Into<String>) -> HookBuilder<'a> {
        let idx =
            self.collector.push(self.component.clone(), StepKind::SubscriberOnMessage { topic: topic.into(), matcher: None }, Mode::Wait);
        HookBuilder::new(self.collector, idx)
    }
}

impl StepTarget for Subscriber {
    type Builder<'a> = SubscriberSteps<'a>;

    fn step_builder<'a>(&self, collector: &'a mut StepCollector) -> Self::Builder<'a> {
        SubscriberSteps { collector, component: self.base.name().to_string() }
    }
}
