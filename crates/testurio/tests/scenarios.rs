//! End-to-end scenarios exercising every component family against the
//! in-memory adapters.

use std::sync::Arc;

use serde_json::json;

use testurio::{
    Address, AsyncClient, AsyncServer, InteractionRecorder, Publisher, Scenario, Subscriber, SyncClient, SyncServer,
    TestCase,
};
use testurio::memory::{InMemoryBroker, InMemoryMq, InMemorySync};

fn recorder() -> Arc<InteractionRecorder> {
    Arc::new(InteractionRecorder::new())
}

#[tokio::test]
async fn sync_mock_request_response_happy_path() {
    let protocol = InMemorySync::new();
    let listen = Address::new("mock-service", 80);

    let server = SyncServer::new_mock("server", protocol.clone(), listen.clone(), recorder());
    let client = SyncClient::new("client", protocol, listen, recorder());

    let scenario = Scenario::new("sync happy path").with_component(server.clone()).with_component(client.clone());

    let test_case = TestCase::new("echo", move |collector| {
        collector.use_component(&server).on_request("echo").mock_response(|v| v.clone());
        collector.use_component(&client).request("echo", json!({ "ping": 1 }));
    });

    let result = scenario.run(vec![test_case]).await.expect("scenario run");
    assert!(result.passed, "{result:?}");
}

#[tokio::test]
async fn sync_wait_response_after_request_is_strict_ordering_violation() {
    let protocol = InMemorySync::new();
    let listen = Address::new("mock-service", 81);

    let server = SyncServer::new_mock("server", protocol.clone(), listen.clone(), recorder());
    let client = SyncClient::new("client", protocol, listen, recorder());

    let scenario = Scenario::new("strict ordering").with_component(server.clone()).with_component(client.clone());

    // The request resolves synchronously, so by the time the waitResponse
    // step in this same list reaches Phase 2 its hook is already resolved.
    let test_case = TestCase::new("late wait", move |collector| {
        collector.use_component(&server).on_request("echo").mock_response(|v| v.clone());
        collector.use_component(&client).request("echo", json!({}));
        collector.use_component(&client).wait_response("echo");
    });

    let result = scenario.run(vec![test_case]).await.expect("scenario run");
    assert!(!result.passed);
    let tc = &result.test_cases[0];
    let wait_step = tc.steps.last().expect("wait step result");
    assert!(!wait_step.passed);
    assert!(wait_step.error.as_deref().unwrap_or("").contains("strict ordering"));
}

#[tokio::test]
async fn async_server_broadcasts_to_connected_client() {
    let broker = InMemoryBroker::new();
    let listen = Address::new("broadcast-service", 82);

    let server = AsyncServer::new_mock("server", broker.clone(), listen.clone(), recorder());
    let client = AsyncClient::new("client", broker, listen, recorder());

    let scenario = Scenario::new("broadcast").with_component(server.clone()).with_component(client.clone());

    let test_case = TestCase::new("notify", move |collector| {
        collector.use_component(&server).broadcast("note", json!({ "seq": 1 }));
        collector.use_component(&client).wait_event("note");
    });

    let result = scenario.run(vec![test_case]).await.expect("scenario run");
    assert!(result.passed, "{result:?}");
}

#[tokio::test]
async fn async_server_routes_send_event_by_link_id() {
    let broker = InMemoryBroker::new();
    let listen = Address::new("link-service", 83);

    let server = AsyncServer::new_mock("server", broker.clone(), listen.clone(), recorder());
    let client = AsyncClient::new("client", broker, listen, recorder());

    let scenario = Scenario::new("link routing").with_component(server.clone()).with_component(client.clone());

    let test_case = TestCase::new("hello then reply", move |collector| {
        collector.use_component(&server).on_message("hello", None).link("peer");
        collector.use_component(&client).send_message("hello", json!({}));
        collector.use_component(&server).send_event("peer", "welcome", json!({ "ok": true }));
        collector.use_component(&client).wait_event("welcome");
    });

    let result = scenario.run(vec![test_case]).await.expect("scenario run");
    assert!(result.passed, "{result:?}");
}

#[tokio::test]
async fn async_proxy_forwards_unmatched_traffic_and_tears_down_on_backend_disconnect() {
    let broker = InMemoryBroker::new();
    let backend_listen = Address::new("backend", 84);
    let proxy_listen = Address::new("proxy", 85);

    let backend = AsyncServer::new_mock("backend", broker.clone(), backend_listen.clone(), recorder());
    let proxy = AsyncServer::new_proxy("proxy", broker.clone(), proxy_listen.clone(), backend_listen, recorder());
    let client = AsyncClient::new("client", broker, proxy_listen, recorder());

    let scenario = Scenario::new("proxy drop")
        .with_component(backend.clone())
        .with_component(proxy.clone())
        .with_component(client.clone());

    let test_case = TestCase::new("unmatched passthrough", move |collector| {
        collector.use_component(&backend).on_message("ping", None).link("downstream");
        collector.use_component(&client).send_message("ping", json!({ "n": 1 }));
        collector.use_component(&backend).disconnect("downstream");
        collector.use_component(&client).wait_disconnect();
    });

    let result = scenario.run(vec![test_case]).await.expect("scenario run");
    assert!(result.passed, "{result:?}");
}

#[tokio::test]
async fn pubsub_delivers_published_message_to_subscriber() {
    let mq = InMemoryMq::new();

    let publisher = Publisher::new("publisher", mq.clone(), recorder());
    let subscriber = Subscriber::new("subscriber", mq, recorder());

    let scenario =
        Scenario::new("pubsub ordering").with_component(publisher.clone()).with_component(subscriber.clone());

    let test_case = TestCase::new("single message", move |collector| {
        collector.use_component(&subscriber).subscribe("orders");
        collector.use_component(&publisher).publish("orders", json!({ "id": 1 }));
        collector.use_component(&subscriber).wait_message("orders");
    });

    let result = scenario.run(vec![test_case]).await.expect("scenario run");
    assert!(result.passed, "{result:?}");
}

#[tokio::test]
async fn pubsub_preserves_per_topic_order_across_a_batch() {
    let mq = InMemoryMq::new();

    let publisher = Publisher::new("publisher", mq.clone(), recorder());
    let subscriber = Subscriber::new("subscriber", mq, recorder());

    let scenario = Scenario::new("pubsub batch").with_component(publisher.clone()).with_component(subscriber.clone());

    // Three waitMessage steps over one topic resolve in arrival order: the
    // consumer task drains the batch sequentially, and dispatch only ever
    // claims the oldest still-unresolved waitMessage hook per inbound
    // message, so each step's assert sees exactly the message it should.
    let test_case = TestCase::new("ordered batch", move |collector| {
        collector.use_component(&subscriber).subscribe("events");
        collector.use_component(&publisher).publish_batch("events", vec![json!(1), json!(2), json!(3)]);
        collector.use_component(&subscriber).wait_message("events").assert(|v| v == &json!(1));
        collector.use_component(&subscriber).wait_message("events").assert(|v| v == &json!(2));
        collector.use_component(&subscriber).wait_message("events").assert(|v| v == &json!(3));
    });

    let result = scenario.run(vec![test_case]).await.expect("scenario run");
    assert!(result.passed, "{result:?}");
    for step in &result.test_cases[0].steps {
        assert!(step.passed, "{step:?}");
    }
}
