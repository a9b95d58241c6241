//! TLS listener lifecycle tests.
//!
//! Each test binds a real listener on an ephemeral localhost port, served
//! with a freshly minted identity, and talks to it over HTTPS with a client
//! that trusts only the minted CA.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use autoops_webhook::health::HealthState;
use autoops_webhook::webhooks::{AdmissionRequest, AdmissionReview};
use autoops_webhook::{Decision, Mutator, Patches, WebhookError, WebhookServer, webhook_router};
use kube::core::DynamicObject;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

use crate::common::{AdmissionReviewBuilder, TestIdentity};

/// Signals when a review starts, then takes `delay` to decide
struct Slow {
    delay: Duration,
    started: Mutex<Option<oneshot::Sender<()>>>,
}

impl Slow {
    fn new(delay: Duration) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                delay,
                started: Mutex::new(Some(tx)),
            },
            rx,
        )
    }
}

#[async_trait]
impl Mutator for Slow {
    async fn mutate(
        &self,
        _request: &AdmissionRequest<DynamicObject>,
        _patches: &mut Patches,
    ) -> autoops_webhook::Result<Decision> {
        if let Some(tx) = self.started.lock().await.take() {
            let _ = tx.send(());
        }
        tokio::time::sleep(self.delay).await;
        Ok(Decision::Allow)
    }
}

struct Running {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<(), WebhookError>>,
}

/// Start a server on an ephemeral port, stopped by sending on `stop`
async fn start(
    identity: &TestIdentity,
    mutator: Arc<dyn Mutator>,
    grace: Duration,
    health: Option<Arc<HealthState>>,
) -> Running {
    let listen: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let mut server = WebhookServer::new(webhook_router(mutator, health.clone()), listen, grace);
    if let Some(health) = health {
        server = server.with_health_state(health);
    }
    let handle = server.handle();

    let (stop, stop_rx) = oneshot::channel::<()>();
    let cert = identity.cert_path.clone();
    let key = identity.key_path.clone();
    let task = tokio::spawn(async move {
        server
            .run_until(&cert, &key, async {
                let _ = stop_rx.await;
            })
            .await
    });

    let addr = tokio::time::timeout(Duration::from_secs(5), handle.listening())
        .await
        .expect("listener bound in time")
        .expect("listener bound");
    Running { addr, stop, task }
}

fn client(identity: &TestIdentity, addr: SocketAddr) -> reqwest::Client {
    let ca = reqwest::Certificate::from_pem(identity.ca_pem().as_bytes()).unwrap();
    reqwest::Client::builder()
        .add_root_certificate(ca)
        .resolve("localhost", addr)
        .build()
        .unwrap()
}

fn url(addr: SocketAddr) -> String {
    format!("https://localhost:{}/mutate", addr.port())
}

#[tokio::test]
async fn test_serves_reviews_over_tls() {
    let identity = TestIdentity::localhost().await;
    let (slow, _started) = Slow::new(Duration::ZERO);
    let running = start(&identity, Arc::new(slow), Duration::from_secs(2), None).await;

    let response = client(&identity, running.addr)
        .post(url(running.addr))
        .body(AdmissionReviewBuilder::service("web", "team-a").to_body())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let review: AdmissionReview<DynamicObject> = response.json().await.unwrap();
    assert!(review.response.unwrap().allowed);

    running.stop.send(()).unwrap();
    running.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_in_flight_review_completes_after_signal() {
    let identity = TestIdentity::localhost().await;
    let (slow, started) = Slow::new(Duration::from_millis(300));
    let running = start(&identity, Arc::new(slow), Duration::from_secs(5), None).await;

    let request = {
        let req = client(&identity, running.addr)
            .post(url(running.addr))
            .body(AdmissionReviewBuilder::service("web", "team-a").to_body());
        tokio::spawn(async move { req.send().await })
    };

    started.await.unwrap();
    let signalled = Instant::now();
    running.stop.send(()).unwrap();

    let response = request.await.unwrap().unwrap();
    assert_eq!(response.status(), 200);

    let result = tokio::time::timeout(Duration::from_secs(6), running.task)
        .await
        .expect("server stopped within the grace period")
        .unwrap();
    assert!(result.is_ok());
    assert!(signalled.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_slow_review_is_abandoned_after_grace_period() {
    let identity = TestIdentity::localhost().await;
    let (slow, started) = Slow::new(Duration::from_secs(30));
    let running = start(&identity, Arc::new(slow), Duration::from_millis(200), None).await;

    let request = {
        let req = client(&identity, running.addr)
            .post(url(running.addr))
            .body(AdmissionReviewBuilder::service("web", "team-a").to_body());
        tokio::spawn(async move { req.send().await })
    };

    started.await.unwrap();
    let signalled = Instant::now();
    running.stop.send(()).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), running.task)
        .await
        .expect("server gave up on the slow review")
        .unwrap();
    assert!(result.is_ok());
    assert!(signalled.elapsed() < Duration::from_secs(3));

    let outcome = tokio::time::timeout(Duration::from_secs(5), request)
        .await
        .expect("client saw the connection close")
        .unwrap();
    assert!(outcome.is_err());
}

#[tokio::test]
async fn test_readiness_follows_listener() {
    let identity = TestIdentity::localhost().await;
    let health = Arc::new(HealthState::new());
    let (slow, _started) = Slow::new(Duration::ZERO);
    let running = start(
        &identity,
        Arc::new(slow),
        Duration::from_secs(1),
        Some(health.clone()),
    )
    .await;

    let deadline = Instant::now() + Duration::from_secs(2);
    while !health.is_ready().await {
        assert!(Instant::now() < deadline, "never became ready");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    running.stop.send(()).unwrap();
    running.task.await.unwrap().unwrap();
    assert!(!health.is_ready().await);
}

#[tokio::test]
async fn test_port_in_use_fails_without_signal() {
    let identity = TestIdentity::localhost().await;
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = occupied.local_addr().unwrap();

    let (slow, _started) = Slow::new(Duration::ZERO);
    let server = WebhookServer::new(
        webhook_router(Arc::new(slow), None),
        addr,
        Duration::from_secs(1),
    );

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        server.run_until(
            &identity.cert_path,
            &identity.key_path,
            std::future::pending::<()>(),
        ),
    )
    .await
    .expect("bind failure returned without a signal");

    assert!(matches!(result, Err(WebhookError::Server(_))));
    drop(occupied);
}

#[tokio::test]
async fn test_missing_certificate_fails_without_signal() {
    let dir = tempfile::tempdir().unwrap();
    let (slow, _started) = Slow::new(Duration::ZERO);
    let server = WebhookServer::new(
        webhook_router(Arc::new(slow), None),
        "127.0.0.1:0".parse().unwrap(),
        Duration::from_secs(1),
    );

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        server.run_until(
            &dir.path().join("tls.crt"),
            &dir.path().join("tls.key"),
            std::future::pending::<()>(),
        ),
    )
    .await
    .expect("certificate failure returned without a signal");

    assert!(matches!(result, Err(WebhookError::TlsConfig(_))));
}
