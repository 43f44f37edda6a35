// Integration tests for the bridge engine, run against a scripted fake
// bridge speaking newline-delimited JSON over in-memory pipes.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use leap_api::Connection;
use leap_core::{
    BackoffConfig, Bridge, BridgeConfig, ButtonEvent, ConnectionState, Connector, CoreError,
    Domain, FanSpeed, OccupancyStatus,
};

// ── Fake bridge ─────────────────────────────────────────────────────

struct FakeSession {
    writer: Arc<tokio::sync::Mutex<leap_api::ConnectionWriter>>,
    task: tokio::task::JoinHandle<()>,
}

struct Harness {
    connects: AtomicUsize,
    /// Level reported by zone-status reads; changed between connects to
    /// observe re-bootstrap.
    level: AtomicI64,
    current: Mutex<Option<FakeSession>>,
    requests_tx: mpsc::UnboundedSender<Value>,
    requests_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Value>>,
}

impl Harness {
    fn new() -> Arc<Self> {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            connects: AtomicUsize::new(0),
            level: AtomicI64::new(7),
            current: Mutex::new(None),
            requests_tx,
            requests_rx: tokio::sync::Mutex::new(requests_rx),
        })
    }

    fn connector(harness: &Arc<Self>) -> Connector {
        let harness = Arc::clone(harness);
        Arc::new(move || {
            let harness = Arc::clone(&harness);
            Box::pin(async move {
                harness.connects.fetch_add(1, Ordering::SeqCst);
                let (engine_side, server_side) = tokio::io::duplex(512 * 1024);
                let (reader, writer) = Connection::from_stream(server_side).into_split();
                let writer = Arc::new(tokio::sync::Mutex::new(writer));
                let task = tokio::spawn(serve(reader, Arc::clone(&writer), Arc::clone(&harness)));
                *harness.current.lock() = Some(FakeSession { writer, task });
                Ok(Connection::from_stream(engine_side))
            })
        })
    }

    /// Push an unsolicited message to the engine.
    async fn inject(&self, message: Value) {
        let writer = {
            let session = self.current.lock();
            Arc::clone(&session.as_ref().expect("no live fake session").writer)
        };
        writer.lock().await.write_json(&message).await.unwrap();
    }

    /// Drop the fake side of the connection, forcing the engine to see
    /// EOF and reconnect.
    fn kill(&self) {
        if let Some(session) = self.current.lock().take() {
            session.task.abort();
        }
    }

    async fn next_request(&self, predicate: impl Fn(&Value) -> bool) -> Value {
        let mut rx = self.requests_rx.lock().await;
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let request = rx.recv().await.expect("request channel closed");
                if predicate(&request) {
                    return request;
                }
            }
        })
        .await
        .expect("no matching request within deadline")
    }
}

async fn serve(
    mut reader: leap_api::ConnectionReader,
    writer: Arc<tokio::sync::Mutex<leap_api::ConnectionWriter>>,
    harness: Arc<Harness>,
) {
    while let Ok(Some(request)) = reader.read_value().await {
        let communique = request["CommuniqueType"].as_str().unwrap_or("").to_owned();
        let url = request["Header"]["Url"].as_str().unwrap_or("").to_owned();
        let tag = request["Header"]["ClientTag"].clone();
        let _ = harness.requests_tx.send(request.clone());

        let mut response = route(&communique, &url, harness.level.load(Ordering::SeqCst));
        if let Some(tag) = tag.as_str() {
            response["Header"]["ClientTag"] = json!(tag);
        }
        if writer.lock().await.write_json(&response).await.is_err() {
            break;
        }
    }
}

/// Responses for the standard Caséta test topology.
fn route(communique: &str, url: &str, level: i64) -> Value {
    let ok = |body_type: &str, body: Value| {
        json!({
            "CommuniqueType": "ReadResponse",
            "Header": {"StatusCode": "200 OK", "Url": url, "MessageBodyType": body_type},
            "Body": body,
        })
    };

    match (communique, url) {
        ("ReadRequest", "/project") => ok(
            "OneProjectDefinition",
            json!({"Project": {"ProductType": "Lutron Caseta Project"}}),
        ),
        ("ReadRequest", "/area") => ok(
            "MultipleAreaDefinition",
            json!({"Areas": [
                {"href": "/area/3", "Name": "Living Room"},
                {"href": "/area/9", "Name": "Master Bathroom"},
            ]}),
        ),
        ("ReadRequest", "/device") => ok(
            "MultipleDeviceDefinition",
            json!({"Devices": [
                {
                    "href": "/device/1",
                    "Name": "Smart Bridge",
                    "FullyQualifiedName": ["Smart Bridge"],
                    "DeviceType": "SmartBridge",
                    "ModelNumber": "L-BDG2-WH",
                    "SerialNumber": 12345678,
                },
                {
                    "href": "/device/2",
                    "Name": "Lamp",
                    "FullyQualifiedName": ["Living Room", "Lamp"],
                    "DeviceType": "WallDimmer",
                    "ModelNumber": "PD-6WCL-XX",
                    "SerialNumber": 43359585,
                    "LocalZones": [{"href": "/zone/1"}],
                    "AssociatedArea": {"href": "/area/3"},
                    "AddressedState": "Addressed",
                },
                {
                    "href": "/device/3",
                    "Name": "Fan",
                    "FullyQualifiedName": ["Master Bathroom", "Fan"],
                    "DeviceType": "CasetaFanSpeedController",
                    "ModelNumber": "PD-FSQN-XX",
                    "SerialNumber": 39870989,
                    "LocalZones": [{"href": "/zone/2"}],
                    "AssociatedArea": {"href": "/area/9"},
                },
                {
                    "href": "/device/4",
                    "Name": "Shade",
                    "FullyQualifiedName": ["Living Room", "Shade"],
                    "DeviceType": "SerenaRollerShade",
                    "ModelNumber": "PD-SHQN-XX",
                    "SerialNumber": 39870990,
                    "LocalZones": [{"href": "/zone/6"}],
                    "AssociatedArea": {"href": "/area/3"},
                },
                {
                    "href": "/device/8",
                    "Name": "Pico",
                    "FullyQualifiedName": ["Living Room", "Pico"],
                    "DeviceType": "Pico3ButtonRaiseLower",
                    "ModelNumber": "PJ2-3BRL-GXX-X01",
                    "SerialNumber": 43359585,
                    "ButtonGroups": [{"href": "/buttongroup/2"}],
                    "AssociatedArea": {"href": "/area/3"},
                },
            ]}),
        ),
        ("ReadRequest", "/button") => ok(
            "MultipleButtonDefinition",
            json!({"Buttons": [
                {"href": "/button/12", "Parent": {"href": "/buttongroup/2"}, "ButtonNumber": 0},
                {"href": "/button/13", "Parent": {"href": "/buttongroup/2"}, "ButtonNumber": 2},
            ]}),
        ),
        ("ReadRequest", "/virtualbutton") => ok(
            "MultipleVirtualButtonDefinition",
            json!({"VirtualButtons": [
                {"href": "/virtualbutton/1", "Name": "Bright", "IsProgrammed": true},
                {"href": "/virtualbutton/5", "IsProgrammed": false},
            ]}),
        ),
        ("ReadRequest", "/occupancygroup") => ok(
            "MultipleOccupancyGroupDefinition",
            json!({"OccupancyGroups": [{
                "href": "/occupancygroup/2",
                "AssociatedSensors": [{"OccupancySensor": {"href": "/occupancysensor/11"}}],
                "AssociatedAreas": [{"Area": {"href": "/area/3"}}],
            }]}),
        ),
        ("SubscribeRequest", "/occupancygroup/status") => json!({
            "CommuniqueType": "SubscribeResponse",
            "Header": {"StatusCode": "200 OK", "Url": url,
                       "MessageBodyType": "MultipleOccupancyGroupStatus"},
            "Body": {"OccupancyGroupStatuses": [{
                "OccupancyGroup": {"href": "/occupancygroup/2"},
                "OccupancyStatus": "Occupied",
            }]},
        }),
        ("SubscribeRequest", _) if url.starts_with("/button/") => json!({
            "CommuniqueType": "SubscribeResponse",
            "Header": {"StatusCode": "200 OK", "Url": url,
                       "MessageBodyType": "OneButtonStatusEvent"},
            "Body": {"ButtonStatus": {
                "Button": {"href": button_href_from_status_url(url)},
                "ButtonEvent": {"EventType": "Release"},
            }},
        }),
        ("ReadRequest", _) if url.starts_with("/zone/") && url.ends_with("/status") => {
            let zone = url.trim_end_matches("/status").to_owned();
            ok(
                "OneZoneStatus",
                json!({"ZoneStatus": {
                    "href": url,
                    "Zone": {"href": zone},
                    "Level": level,
                    "StatusAccuracy": "Good",
                }}),
            )
        }
        ("ReadRequest", "/server/1/status/ping") => ok(
            "OnePingResponse",
            json!({"PingResponse": {"LEAPVersion": 1.115}}),
        ),
        ("CreateRequest", _) | ("UpdateRequest", _) => json!({
            "CommuniqueType": "CreateResponse",
            "Header": {"StatusCode": "201 Created", "Url": url},
        }),
        _ => json!({
            "CommuniqueType": "ExceptionResponse",
            "Header": {"StatusCode": "404 NotFound", "Url": url},
        }),
    }
}

fn button_href_from_status_url(url: &str) -> String {
    url.trim_end_matches("/status/event").to_owned()
}

async fn connected_bridge() -> (Bridge, Arc<Harness>) {
    let harness = Harness::new();
    let config = BridgeConfig {
        host: "bridge.test".into(),
        backoff: BackoffConfig {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(50),
        },
        ..BridgeConfig::default()
    };
    let bridge = Bridge::with_connector(config, Harness::connector(&harness));
    bridge.connect().await.expect("bootstrap failed");
    (bridge, harness)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met within deadline");
}

// ── Bootstrap ───────────────────────────────────────────────────────

#[tokio::test]
async fn bootstrap_populates_the_model() {
    let (bridge, _harness) = connected_bridge().await;

    assert!(bridge.is_connected());
    assert_eq!(bridge.devices().len(), 5);

    let lamp = bridge.device(2).expect("device 2 missing");
    lamp.with(|d| {
        assert_eq!(d.name, "Living Room/Lamp");
        assert_eq!(d.device_name, "Lamp");
        assert_eq!(d.device_type, "WallDimmer");
        assert_eq!(d.domain(), Some(Domain::Light));
        assert_eq!(d.zone_id, Some(1));
        assert_eq!(d.area_id, Some(3));
        assert_eq!(d.serial.as_deref(), Some("43359585"));
        assert_eq!(d.type_extras["AddressedState"], "Addressed");
        // Primed by the initial zone-status read.
        assert_eq!(d.current_state, Some(7));
    });

    // Unprogrammed virtual buttons are not scenes.
    let scene_ids: Vec<u32> = bridge.scenes().iter().map(|s| s.with(|s| s.id)).collect();
    assert_eq!(scene_ids, [1]);

    let button_ids: Vec<u32> = bridge.buttons().iter().map(|b| b.with(|b| b.id)).collect();
    assert_eq!(button_ids, [12, 13]);
}

#[tokio::test]
async fn every_zone_maps_back_to_its_device() {
    let (bridge, _harness) = connected_bridge().await;

    for device in bridge.devices() {
        let (id, zone_id) = device.with(|d| (d.id, d.zone_id));
        if let Some(zone_id) = zone_id {
            let owner = bridge
                .store()
                .device_by_zone(zone_id)
                .expect("zone without reciprocal device");
            assert_eq!(owner.with(|d| d.id), id);
        }
    }
}

#[tokio::test]
async fn subscription_replay_sets_initial_occupancy() {
    let (bridge, _harness) = connected_bridge().await;

    let group = bridge.store().occupancy_group(2).expect("group missing");
    assert_eq!(group.with(|g| g.status), OccupancyStatus::Occupied);

    // The area mirrors its group's status.
    let area = bridge.store().area(3).expect("area missing");
    assert_eq!(area.with(|a| a.occupancy), OccupancyStatus::Occupied);
}

#[tokio::test]
async fn domain_and_type_views_filter_devices() {
    let (bridge, _harness) = connected_bridge().await;

    let lights: Vec<u32> = bridge
        .devices_by_domain(Domain::Light)
        .iter()
        .map(|d| d.with(|d| d.id))
        .collect();
    assert_eq!(lights, [2]);

    let sensors: Vec<u32> = bridge
        .devices_by_domain(Domain::Sensor)
        .iter()
        .map(|d| d.with(|d| d.id))
        .collect();
    assert_eq!(sensors, [8]);

    let by_type: Vec<u32> = bridge
        .devices_by_type("SerenaRollerShade")
        .iter()
        .map(|d| d.with(|d| d.id))
        .collect();
    assert_eq!(by_type, [4]);
}

// ── Commands ────────────────────────────────────────────────────────

#[tokio::test]
async fn turn_on_a_dimmer_issues_go_to_level() {
    let (bridge, harness) = connected_bridge().await;

    bridge.turn_on(2, None).await.unwrap();

    let request = harness
        .next_request(|r| r["Header"]["Url"] == "/zone/1/commandprocessor")
        .await;
    assert_eq!(request["CommuniqueType"], "CreateRequest");
    assert_eq!(
        request["Body"],
        json!({"Command": {
            "CommandType": "GoToLevel",
            "Parameter": [{"Type": "Level", "Value": 100}],
        }})
    );
}

#[tokio::test]
async fn set_value_with_fade_uses_dimmed_level() {
    let (bridge, harness) = connected_bridge().await;

    bridge
        .set_value(2, 30, Some(Duration::from_secs(2)))
        .await
        .unwrap();

    let request = harness
        .next_request(|r| r["Header"]["Url"] == "/zone/1/commandprocessor")
        .await;
    assert_eq!(
        request["Body"],
        json!({"Command": {
            "CommandType": "GoToDimmedLevel",
            "DimmedLevelParameters": {"Level": 30, "FadeTime": "00:00:02"},
        }})
    );
}

#[tokio::test]
async fn fan_commands_use_fan_speed_vocabulary() {
    let (bridge, harness) = connected_bridge().await;

    bridge.set_fan_speed(3, FanSpeed::Medium).await.unwrap();
    let request = harness
        .next_request(|r| r["Header"]["Url"] == "/zone/2/commandprocessor")
        .await;
    assert_eq!(
        request["Body"]["Command"],
        json!({"CommandType": "GoToFanSpeed", "FanSpeedParameters": {"FanSpeed": "Medium"}})
    );

    // turn_on on a fan goes to High, not GoToLevel.
    bridge.turn_on(3, None).await.unwrap();
    let request = harness
        .next_request(|r| r["Header"]["Url"] == "/zone/2/commandprocessor")
        .await;
    assert_eq!(
        request["Body"]["Command"]["FanSpeedParameters"]["FanSpeed"],
        "High"
    );
}

#[tokio::test]
async fn cover_movement_is_optimistic() {
    let (bridge, harness) = connected_bridge().await;

    bridge.turn_on(4, None).await.unwrap();
    let request = harness
        .next_request(|r| r["Header"]["Url"] == "/zone/6/commandprocessor")
        .await;
    assert_eq!(request["Body"]["Command"], json!({"CommandType": "Raise"}));
    assert_eq!(bridge.device(4).unwrap().with(|d| d.current_state), Some(100));

    bridge.lower_cover(4).await.unwrap();
    let request = harness
        .next_request(|r| r["Header"]["Url"] == "/zone/6/commandprocessor")
        .await;
    assert_eq!(request["Body"]["Command"], json!({"CommandType": "Lower"}));
    assert_eq!(bridge.device(4).unwrap().with(|d| d.current_state), Some(0));

    bridge.stop_cover(4).await.unwrap();
    let request = harness
        .next_request(|r| r["Header"]["Url"] == "/zone/6/commandprocessor")
        .await;
    assert_eq!(request["Body"]["Command"], json!({"CommandType": "Stop"}));
}

#[tokio::test]
async fn tap_button_and_scene_activation_press_and_release() {
    let (bridge, harness) = connected_bridge().await;

    bridge.tap_button(12).await.unwrap();
    let request = harness
        .next_request(|r| r["Header"]["Url"] == "/button/12/commandprocessor")
        .await;
    assert_eq!(request["Body"]["Command"], json!({"CommandType": "PressAndRelease"}));

    bridge.activate_scene(1).await.unwrap();
    let request = harness
        .next_request(|r| r["Header"]["Url"] == "/virtualbutton/1/commandprocessor")
        .await;
    assert_eq!(request["Body"]["Command"], json!({"CommandType": "PressAndRelease"}));
}

#[tokio::test]
async fn commands_against_unknown_entities_fail() {
    let (bridge, _harness) = connected_bridge().await;

    assert!(matches!(
        bridge.set_value(99, 50, None).await,
        Err(CoreError::UnknownEntity { id: 99 })
    ));
    // Device 8 is a Pico with no zone.
    assert!(matches!(
        bridge.set_value(8, 50, None).await,
        Err(CoreError::UnknownEntity { id: 8 })
    ));
    assert!(matches!(
        bridge.tap_button(999).await,
        Err(CoreError::UnknownEntity { id: 999 })
    ));
    // Virtual button 5 is unprogrammed, so it is not a scene.
    assert!(matches!(
        bridge.activate_scene(5).await,
        Err(CoreError::UnknownEntity { id: 5 })
    ));
}

// ── Event routing ───────────────────────────────────────────────────

#[tokio::test]
async fn zone_status_updates_device_and_notifies_subscriber_once() {
    let (bridge, harness) = connected_bridge().await;

    let notifications = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notifications);
    let _handle = bridge.add_subscriber(2, move |device| {
        assert_eq!(device.id, 2);
        counter.fetch_add(1, Ordering::SeqCst);
    });

    harness
        .inject(json!({
            "CommuniqueType": "ReadResponse",
            "Header": {"StatusCode": "200 OK", "Url": "/zone/1/status",
                       "MessageBodyType": "OneZoneStatus"},
            "Body": {"ZoneStatus": {"Level": 50, "Zone": {"href": "/zone/1"}}},
        }))
        .await;

    wait_until(|| bridge.device(2).unwrap().with(|d| d.current_state) == Some(50)).await;
    assert_eq!(notifications.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn button_event_reaches_button_subscriber() {
    let (bridge, harness) = connected_bridge().await;

    let events: Arc<Mutex<Vec<ButtonEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let _handle = bridge.add_button_subscriber(12, move |event| {
        sink.lock().push(*event);
    });

    // The URL carries the button id; the body is the bare event form.
    harness
        .inject(json!({
            "CommuniqueType": "ReadResponse",
            "Header": {"StatusCode": "200 OK",
                       "Url": "/device/8/buttongroup/2/button/12/status/event"},
            "Body": {"ButtonEvent": {"EventType": "Press"}},
        }))
        .await;

    wait_until(|| !events.lock().is_empty()).await;
    assert_eq!(events.lock().as_slice(), [ButtonEvent::Press]);
    assert_eq!(
        bridge.store().button(12).unwrap().with(|b| b.current_state),
        ButtonEvent::Press
    );
}

#[tokio::test]
async fn occupancy_change_updates_group_area_and_subscriber() {
    let (bridge, harness) = connected_bridge().await;

    let statuses: Arc<Mutex<Vec<OccupancyStatus>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&statuses);
    let _handle = bridge.add_occupancy_subscriber(2, move |group| {
        sink.lock().push(group.status);
    });

    harness
        .inject(json!({
            "CommuniqueType": "ReadResponse",
            "Header": {"StatusCode": "200 OK", "Url": "/occupancygroup/status",
                       "MessageBodyType": "MultipleOccupancyGroupStatus"},
            "Body": {"OccupancyGroupStatuses": [{
                "OccupancyGroup": {"href": "/occupancygroup/2"},
                "OccupancyStatus": "Unoccupied",
            }]},
        }))
        .await;

    wait_until(|| {
        bridge.store().occupancy_group(2).unwrap().with(|g| g.status)
            == OccupancyStatus::Unoccupied
    })
    .await;
    assert_eq!(
        bridge.store().area(3).unwrap().with(|a| a.occupancy),
        OccupancyStatus::Unoccupied
    );
    assert_eq!(statuses.lock().as_slice(), [OccupancyStatus::Unoccupied]);
}

#[tokio::test]
async fn unsubscribed_observer_stops_receiving() {
    let (bridge, harness) = connected_bridge().await;

    let notifications = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notifications);
    let handle = bridge.add_subscriber(2, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let status = |level: i64| {
        json!({
            "CommuniqueType": "ReadResponse",
            "Header": {"StatusCode": "200 OK", "Url": "/zone/1/status",
                       "MessageBodyType": "OneZoneStatus"},
            "Body": {"ZoneStatus": {"Level": level, "Zone": {"href": "/zone/1"}}},
        })
    };

    harness.inject(status(20)).await;
    wait_until(|| bridge.device(2).unwrap().with(|d| d.current_state) == Some(20)).await;
    handle.unsubscribe();

    harness.inject(status(80)).await;
    wait_until(|| bridge.device(2).unwrap().with(|d| d.current_state) == Some(80)).await;
    assert_eq!(notifications.load(Ordering::SeqCst), 1);
}

// ── Reconnect ───────────────────────────────────────────────────────

#[tokio::test]
async fn reconnect_preserves_entity_identity() {
    let (bridge, harness) = connected_bridge().await;

    let held = bridge.device(2).expect("device 2 missing");
    assert_eq!(held.with(|d| d.current_state), Some(7));

    // Next bootstrap reports a different level.
    harness.level.store(42, Ordering::SeqCst);
    harness.kill();

    wait_until(|| harness.connects.load(Ordering::SeqCst) >= 2 && bridge.is_connected()).await;
    wait_until(|| held.with(|d| d.current_state) == Some(42)).await;

    let after = bridge.device(2).expect("device 2 missing after reconnect");
    assert!(held.ptr_eq(&after), "reconnect must not replace device cells");
}

#[tokio::test]
async fn observers_survive_reconnect() {
    let (bridge, harness) = connected_bridge().await;

    let notifications = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notifications);
    let _handle = bridge.add_subscriber(2, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    harness.kill();
    wait_until(|| harness.connects.load(Ordering::SeqCst) >= 2 && bridge.is_connected()).await;

    harness
        .inject(json!({
            "CommuniqueType": "ReadResponse",
            "Header": {"StatusCode": "200 OK", "Url": "/zone/1/status",
                       "MessageBodyType": "OneZoneStatus"},
            "Body": {"ZoneStatus": {"Level": 66, "Zone": {"href": "/zone/1"}}},
        }))
        .await;

    wait_until(|| notifications.load(Ordering::SeqCst) >= 1).await;
}

#[tokio::test]
async fn connection_state_reaches_live_and_closing() {
    let (bridge, _harness) = connected_bridge().await;

    let state = bridge.connection_state();
    assert_eq!(*state.borrow(), ConnectionState::Live);

    bridge.close().await;
    assert_eq!(*state.borrow(), ConnectionState::Closing);

    assert!(matches!(
        bridge.set_value(2, 10, None).await,
        Err(CoreError::Disconnected)
    ));
}
