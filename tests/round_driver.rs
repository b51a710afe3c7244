//! Full rounds through the driver, with paused time.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ec_controller::config::ControllerConfig;
use ec_controller::flow::ComponentSetPoint;
use ec_controller::round::{
    Outbound, RoundDriver, RoundHandle, RoundIo, SensorLimitsMessage, SetPointsMessage,
};
use ec_controller::sct::FirstByName;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Running {
    handle: RoundHandle,
    rx: mpsc::UnboundedReceiver<Outbound>,
    leader: mpsc::Sender<bool>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Running {
    async fn next_round(&mut self) -> (SetPointsMessage, Vec<ComponentSetPoint>) {
        loop {
            match self.rx.recv().await.expect("driver is running") {
                Outbound::SetPoints(message, rows) => return (message, rows),
                Outbound::FlowProposals(_) => continue,
            }
        }
    }

    async fn next_set_points(&mut self) -> SetPointsMessage {
        self.next_round().await.0
    }

    async fn stop(self) {
        self.cancel.cancel();
        self.task.await.expect("driver task exits cleanly");
    }
}

fn start(config: &ControllerConfig) -> Running {
    let (tx, rx) = mpsc::unbounded_channel();
    let io = RoundIo {
        demands: Arc::new(config.clone()),
        sink: Arc::new(tx),
    };
    let driver = RoundDriver::from_config(config, io, FirstByName).expect("driver builds");
    let handle = driver.handle();
    let (leader, leader_rx) = mpsc::channel(4);
    let cancel = CancellationToken::new();
    let task = driver.start(leader_rx, cancel.clone());
    Running {
        handle,
        rx,
        leader,
        cancel,
        task,
    }
}

fn value(message: &SetPointsMessage, id: &str) -> f64 {
    message
        .set_points
        .iter()
        .find(|s| s.id == id)
        .map(|s| s.value)
        .unwrap_or_else(|| panic!("no setpoint for {id}"))
}

fn assert_within_limits(handle: &RoundHandle) {
    handle.with_topology(|t| {
        for s in t.root().iter().skip(1) {
            assert!(
                s.flow().abs() <= s.limit + common::TOL,
                "{} carries {} over limit {}",
                s.id,
                s.flow(),
                s.limit
            );
        }
    });
}

#[tokio::test(start_paused = true)]
async fn demo_round_respects_sensor_limits() {
    let mut running = start(&ControllerConfig::demo());
    running.leader.send(true).await.expect("driver listens");

    let message = running.next_set_points().await;
    assert_eq!(message.round, 0);
    assert!((value(&message, "pv-1") - 2.0).abs() < common::TOL);
    assert!((value(&message, "pv-2") - 2.0).abs() < common::TOL);
    assert!((value(&message, "pv-roof") - 1.0).abs() < common::TOL);
    assert!((value(&message, "wallbox") - 1.0).abs() < common::TOL);
    assert!((value(&message, "ev-1") - 2.0).abs() < common::TOL);
    assert!((value(&message, "ev-2") - 2.0).abs() < common::TOL);
    assert_within_limits(&running.handle);

    running.stop().await;
}

#[tokio::test(start_paused = true)]
async fn rounds_follow_the_demand_profile() {
    let mut running = start(&ControllerConfig::demo());
    running.leader.send(true).await.expect("driver listens");

    let first = running.next_set_points().await;
    let second = running.next_set_points().await;
    assert_eq!((first.round, second.round), (0, 1));
    // ev-2 asks for nothing in the second round
    assert_eq!(value(&second, "ev-2"), 0.0);
    assert_eq!(running.handle.round(), 2);

    running.stop().await;
}

#[tokio::test(start_paused = true)]
async fn limit_update_applies_to_the_next_round() {
    let config = ControllerConfig::constrained();
    let mut running = start(&config);
    running.leader.send(true).await.expect("driver listens");

    running.next_set_points().await;
    assert_within_limits(&running.handle);

    let limits = SensorLimitsMessage {
        sensor_limits: config.limits_for_round(1).expect("update scheduled").clone(),
    };
    running
        .handle
        .sensor_limits_received(&limits)
        .await
        .expect("queue open");
    running.next_set_points().await;

    let street_a = running
        .handle
        .with_topology(|t| t.sensor("street-a").map(|s| (s.limit, s.flow())));
    let (limit, flow) = street_a.expect("street-a exists");
    assert_eq!(limit, 2.0);
    assert!(flow.abs() <= 2.0 + common::TOL);
    assert_within_limits(&running.handle);

    running.stop().await;
}

#[tokio::test(start_paused = true)]
async fn equal_allocation_splits_production() {
    let mut config = ControllerConfig::demo();
    config.controller.algorithm = "equal".to_string();
    let mut running = start(&config);
    running.leader.send(true).await.expect("driver listens");

    let message = running.next_set_points().await;
    let share = 11.0 / 3.0;
    assert_eq!(value(&message, "pv-1"), 5.0);
    assert_eq!(value(&message, "wallbox"), 1.0);
    assert!((value(&message, "ev-1") - share).abs() < common::TOL);
    assert!((value(&message, "ev-2") - share).abs() < common::TOL);

    running.stop().await;
}

#[tokio::test(start_paused = true)]
async fn losing_leadership_stops_rounds() {
    let mut running = start(&ControllerConfig::demo());
    running.leader.send(true).await.expect("driver listens");
    running.next_set_points().await;

    running.leader.send(false).await.expect("driver listens");
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(running.rx.try_recv().is_err());
    assert_eq!(running.handle.round(), 1);

    running.stop().await;
}

#[tokio::test(start_paused = true)]
async fn flow_proposals_report_unconstrained_flows() {
    let mut running = start(&ControllerConfig::demo());
    running.handle.with_topology(|t| {
        for (id, demand) in [("pv-1", 5.0), ("pv-2", 5.0), ("ev-1", 5.0), ("ev-2", 5.0)] {
            t.set_demand(id, demand);
        }
    });
    running
        .handle
        .request_flow_proposal()
        .await
        .expect("queue open");

    let Some(Outbound::FlowProposals(message)) = running.rx.recv().await else {
        panic!("expected flow proposals");
    };
    let solar = message.proposals["solar-field"];
    assert!((solar.flow + 10.0).abs() < common::TOL);
    assert_eq!(solar.number_of_nodes, 2);
    let parking = message.proposals["parking"];
    assert!((parking.flow - 10.0).abs() < common::TOL);
    assert_eq!(parking.number_of_nodes, 2);

    // the live tree keeps its limits
    let limit = running
        .handle
        .with_topology(|t| t.sensor("parking").map(|s| s.limit));
    assert_eq!(limit, Some(4.0));

    running.stop().await;
}

#[tokio::test]
async fn limits_for_unknown_sensors_are_ignored() {
    let running = start(&ControllerConfig::demo());
    let limits = SensorLimitsMessage {
        sensor_limits: HashMap::from([("nowhere".to_string(), 1.0), ("parking".to_string(), 3.0)]),
    };
    running
        .handle
        .sensor_limits_received(&limits)
        .await
        .expect("queue open");
    let (parking, household) = running.handle.with_topology(|t| {
        (
            t.sensor("parking").map(|s| s.limit),
            t.sensor("household").map(|s| s.limit),
        )
    });
    assert_eq!(parking, Some(3.0));
    assert_eq!(household, Some(0.0));
    running.stop().await;
}

#[tokio::test(start_paused = true)]
async fn published_rows_keep_the_demands_of_their_round() {
    let mut running = start(&ControllerConfig::demo());
    running.leader.send(true).await.expect("driver listens");

    let (message, rows) = running.next_round().await;
    // let the next round fetch its demands before looking at the rows
    tokio::time::sleep(Duration::from_millis(1200)).await;

    let ev_2 = rows
        .iter()
        .find(|r| r.component_id == "ev-2")
        .expect("ev-2 row");
    assert_eq!(ev_2.demand, 5.0);
    assert_eq!(ev_2.sensor_id, "parking");
    assert!((ev_2.set_point - value(&message, "ev-2")).abs() < common::TOL);
    assert_eq!(rows.len(), message.set_points.len());

    running.stop().await;
}

#[tokio::test(start_paused = true)]
async fn invalid_limit_does_not_stop_rounds() {
    let mut running = start(&ControllerConfig::demo());
    let limits = SensorLimitsMessage {
        sensor_limits: HashMap::from([
            ("solar-field".to_string(), 4.0),
            ("household".to_string(), f64::NAN),
            ("parking".to_string(), -2.0),
        ]),
    };
    running
        .handle
        .sensor_limits_received(&limits)
        .await
        .expect("queue open");
    running.leader.send(true).await.expect("driver listens");

    let first = running.next_set_points().await;
    let second = running.next_set_points().await;
    assert_eq!((first.round, second.round), (0, 1));
    // parking is closed, so its chargers get nothing
    assert_eq!(value(&second, "ev-1"), 0.0);
    assert_within_limits(&running.handle);

    running.stop().await;
}
