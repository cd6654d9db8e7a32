// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Event;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use keel::client::{MemoryClient, ResourceClient};
use keel::constants::WIDGET_FINALIZER;
use keel::controller::{Controller, ControllerConfig, Predicate};
use keel::events::EventRecorder;
use keel::operator::Operator;
use keel::reconcilers::WidgetReconciler;
use keel::types::widget::PHASE_RUNNING;
use keel::types::{Widget, WidgetSpec};
use keel::KeelError;

const NAMESPACE: &str = "default";

fn make_widget(name: &str, replicas: i32) -> Widget {
    Widget::new(
        name,
        WidgetSpec {
            replicas,
            image: None,
        },
    )
}

async fn eventually<F, Fut>(what: &str, check: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

type WidgetController = Controller<Widget, WidgetReconciler>;

struct Fixture {
    widgets: MemoryClient<Widget>,
    deployments: MemoryClient<Deployment>,
    events: MemoryClient<Event>,
    controller: Arc<WidgetController>,
}

impl Fixture {
    fn new() -> Self {
        let widgets = MemoryClient::<Widget>::new();
        let deployments = MemoryClient::<Deployment>::new();
        let events = MemoryClient::<Event>::new();

        let client: Arc<dyn ResourceClient<Widget>> = Arc::new(widgets.clone());
        let config = ControllerConfig {
            name: "widgets".to_string(),
            reconnect_backoff: Duration::from_millis(20),
            ..Default::default()
        }
        .with_finalizer(WIDGET_FINALIZER);
        let controller = Controller::new(
            client,
            WidgetReconciler::new(Arc::new(deployments.clone())),
            EventRecorder::new(Arc::new(events.clone()), "keel-test"),
            config,
        )
        .with_predicate(Predicate::GenerationChanged);

        Self {
            widgets,
            deployments,
            events,
            controller: Arc::new(controller),
        }
    }

    fn run(&self) -> (CancellationToken, JoinHandle<()>) {
        let token = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&self.controller).run(token.clone()));
        (token, task)
    }

    fn writes(&self) -> u64 {
        self.widgets.write_count() + self.deployments.write_count()
    }
}

async fn replicas_of(deployments: &MemoryClient<Deployment>, name: &str) -> Option<i32> {
    deployments
        .get(Some(NAMESPACE), name)
        .await
        .ok()
        .and_then(|d| d.spec)
        .and_then(|s| s.replicas)
}

async fn stop(token: CancellationToken, task: JoinHandle<()>) {
    token.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("controller did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_widget_lifecycle() {
    let fixture = Fixture::new();
    let (token, task) = fixture.run();
    let widgets = &fixture.widgets;
    let deployments = &fixture.deployments;

    widgets
        .create(Some(NAMESPACE), &make_widget("demo", 3))
        .await
        .unwrap();

    eventually("deployment created", || async move {
        replicas_of(deployments, "demo-widget").await == Some(3)
    })
    .await;
    eventually("widget running", || async move {
        widgets.get(Some(NAMESPACE), "demo").await.is_ok_and(|w| {
            w.is_ready()
                && w.is_observed()
                && w.status.as_ref().and_then(|s| s.phase.as_deref()) == Some(PHASE_RUNNING)
        })
    })
    .await;

    let widget = widgets.get(Some(NAMESPACE), "demo").await.unwrap();
    assert!(widget
        .metadata
        .finalizers
        .unwrap_or_default()
        .contains(&WIDGET_FINALIZER.to_string()));

    // Converged: nothing more gets written.
    let writes = fixture.writes();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(fixture.writes(), writes);

    // Scaling bumps the generation and is rolled out.
    widgets
        .patch(
            Some(NAMESPACE),
            "demo",
            &serde_json::json!({ "spec": { "replicas": 5 } }),
        )
        .await
        .unwrap();
    eventually("deployment scaled", || async move {
        replicas_of(deployments, "demo-widget").await == Some(5)
    })
    .await;
    eventually("new generation observed", || async move {
        widgets
            .get(Some(NAMESPACE), "demo")
            .await
            .is_ok_and(|w| w.metadata.generation == Some(2) && w.is_observed())
    })
    .await;

    stop(token, task).await;
}

#[tokio::test]
async fn test_widget_deletion_runs_cleanup() {
    let fixture = Fixture::new();
    let (token, task) = fixture.run();
    let widgets = &fixture.widgets;
    let deployments = &fixture.deployments;

    widgets
        .create(Some(NAMESPACE), &make_widget("doomed", 1))
        .await
        .unwrap();
    eventually("widget ready", || async move {
        widgets
            .get(Some(NAMESPACE), "doomed")
            .await
            .is_ok_and(|w| w.is_ready())
    })
    .await;

    widgets.delete(Some(NAMESPACE), "doomed").await.unwrap();

    eventually("widget removed", || async move {
        widgets
            .get(Some(NAMESPACE), "doomed")
            .await
            .is_err_and(|e| e.is_not_found())
    })
    .await;
    let err = deployments
        .get(Some(NAMESPACE), "doomed-widget")
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let reasons: Vec<String> = fixture
        .events
        .list(None)
        .await
        .unwrap()
        .items
        .into_iter()
        .filter_map(|e| e.reason)
        .collect();
    assert!(reasons.contains(&"Finalized".to_string()));

    stop(token, task).await;
}

#[tokio::test]
async fn test_invalid_widget_reports_condition_without_deployment() {
    let fixture = Fixture::new();
    let (token, task) = fixture.run();
    let widgets = &fixture.widgets;

    widgets
        .create(Some(NAMESPACE), &make_widget("broken", -1))
        .await
        .unwrap();

    eventually("invalid spec reported", || async move {
        widgets
            .get(Some(NAMESPACE), "broken")
            .await
            .is_ok_and(|w| w.is_observed() && !w.is_ready())
    })
    .await;
    assert!(fixture
        .deployments
        .get(Some(NAMESPACE), "broken-widget")
        .await
        .is_err());

    stop(token, task).await;
}

#[tokio::test]
async fn test_operator_runs_widget_controller_until_stopped() {
    let fixture = Fixture::new();
    let mut operator = Operator::new();
    operator.add_controller(Arc::clone(&fixture.controller)).unwrap();

    let duplicate = Fixture::new();
    let err = operator
        .add_controller(Arc::clone(&duplicate.controller))
        .unwrap_err();
    assert!(matches!(err, KeelError::DuplicateResource(_)));
    assert_eq!(operator.controller_names(), vec!["widgets"]);

    let operator = Arc::new(operator);
    let running = {
        let operator = Arc::clone(&operator);
        tokio::spawn(async move { operator.start().await })
    };

    let widgets = &fixture.widgets;
    widgets
        .create(Some(NAMESPACE), &make_widget("managed", 2))
        .await
        .unwrap();
    let deployments = &fixture.deployments;
    eventually("deployment created through operator", || async move {
        replicas_of(deployments, "managed-widget").await == Some(2)
    })
    .await;
    assert!(operator.is_ready());

    operator.stop();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("operator did not stop")
        .unwrap()
        .unwrap();
}
