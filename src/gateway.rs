// =============================================================================
// gateway.rs — THE FRONT DESK
// =============================================================================
//
// Line-delimited JSON over raw TCP. One request per line, one response per
// line, no framing negotiation, no content types, no middleware towers.
// The web backend and the driver clients speak whatever HTTP dialect they
// like amongst themselves; by the time a request reaches this engine it
// has been boiled down to `{"op": "...", ...}\n`.
//
// Raw TCP because even axum is too much abstraction for a request shape
// this simple. The entire protocol fits in one enum.
//
// Every response is `{"ok": true, "data": ...}` or
// `{"ok": false, "error": {"kind", "message"}}`. The error kinds are the
// engine's taxonomy, verbatim. Malformed JSON gets a validation_error and
// a clear conscience.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::engine::{Engine, FailurePayload};
use crate::error::{EngineError, EngineResult};
use crate::models::{BusStatus, ReportStatus, ReportSubmission};

/// Every operation the outside world may request, straight off the wire.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request {
    // Fleet & location
    UpdateLocation {
        bus_id: String,
        latitude: f64,
        longitude: f64,
        #[serde(default)]
        speed: Option<f64>,
        #[serde(default)]
        heading: Option<f64>,
    },
    CurrentLocation { bus_id: String },
    LocationHistory {
        bus_id: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    RegisterBus {
        bus_number: String,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        capacity: Option<u32>,
        #[serde(default)]
        route_id: Option<String>,
    },
    AssignRoute {
        bus_id: String,
        #[serde(default)]
        route_id: Option<String>,
    },
    SetBusStatus { bus_id: String, status: BusStatus },
    GetBus { bus_id: String },
    ListBuses,
    ActiveBuses,

    // Routes
    CreateRoute {
        route_number: String,
        name: String,
        #[serde(default)]
        start_location: Option<String>,
        #[serde(default)]
        end_location: Option<String>,
    },
    AddStop {
        route_id: String,
        stop_name: String,
        latitude: f64,
        longitude: f64,
        sequence: u32,
        #[serde(default)]
        scheduled_arrival: Option<String>,
    },
    RouteStops { route_id: String },
    GetRoute { route_id: String },
    ListRoutes,
    DeleteRoute { route_id: String },

    // ETA
    EtaAllStops { bus_id: String },
    EtaForStop { bus_id: String, stop_id: String },
    IsNear {
        bus_id: String,
        stop_id: String,
        radius_km: f64,
    },

    // Reports
    SubmitReport(ReportSubmission),
    VerifyReport { report_id: String },
    ValidateReport {
        report_id: String,
        admin_id: String,
        approved: bool,
        #[serde(default)]
        points: Option<u32>,
    },
    GetReport { report_id: String },
    ReportsByBus { bus_id: String },
    ReportsByRider { rider_id: String },
    ReportsByStatus { status: ReportStatus },
    PendingBySeverity,

    // Riders & trust
    RegisterRider {
        name: String,
        #[serde(default)]
        email: Option<String>,
    },
    RiderProfile { rider_id: String },
    TrustScore { rider_id: String },
    SetTrustScore { rider_id: String, score: i64 },
}

/// The one response shape. ok xor error, like nature intended.
#[derive(Debug, Serialize)]
struct Response {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<FailurePayload>,
}

impl Response {
    fn success(data: serde_json::Value) -> Self {
        Response {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn failure(payload: FailurePayload) -> Self {
        Response {
            ok: false,
            data: None,
            error: Some(payload),
        }
    }
}

/// Turn a successful domain value into a JSON payload. A serialization
/// failure here is our bug, not the caller's, hence Internal.
fn to_value<T: Serialize>(value: T) -> EngineResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| EngineError::Internal(format!("serialize: {}", e)))
}

/// Route one parsed request to the engine.
fn dispatch(engine: &Engine, request: Request) -> EngineResult<serde_json::Value> {
    match request {
        Request::UpdateLocation {
            bus_id,
            latitude,
            longitude,
            speed,
            heading,
        } => to_value(engine.update_location(&bus_id, latitude, longitude, speed, heading)?),
        Request::CurrentLocation { bus_id } => to_value(engine.current_location(&bus_id)?),
        Request::LocationHistory { bus_id, start, end } => {
            to_value(engine.location_history(&bus_id, start, end)?)
        }
        Request::RegisterBus {
            bus_number,
            model,
            capacity,
            route_id,
        } => to_value(engine.register_bus(&bus_number, model, capacity, route_id)?),
        Request::AssignRoute { bus_id, route_id } => {
            to_value(engine.assign_route(&bus_id, route_id)?)
        }
        Request::SetBusStatus { bus_id, status } => {
            to_value(engine.set_bus_status(&bus_id, status)?)
        }
        Request::GetBus { bus_id } => to_value(engine.get_bus(&bus_id)?),
        Request::ListBuses => to_value(engine.list_buses()),
        Request::ActiveBuses => to_value(engine.active_buses()),

        Request::CreateRoute {
            route_number,
            name,
            start_location,
            end_location,
        } => to_value(engine.create_route(&route_number, &name, start_location, end_location)?),
        Request::AddStop {
            route_id,
            stop_name,
            latitude,
            longitude,
            sequence,
            scheduled_arrival,
        } => to_value(engine.add_stop(
            &route_id,
            &stop_name,
            latitude,
            longitude,
            sequence,
            scheduled_arrival,
        )?),
        Request::RouteStops { route_id } => to_value(engine.route_stops(&route_id)?),
        Request::GetRoute { route_id } => to_value(engine.get_route(&route_id)?),
        Request::ListRoutes => to_value(engine.list_routes()),
        Request::DeleteRoute { route_id } => to_value(engine.delete_route(&route_id)?),

        Request::EtaAllStops { bus_id } => to_value(engine.eta_all_stops(&bus_id)?),
        Request::EtaForStop { bus_id, stop_id } => {
            to_value(engine.eta_for_stop(&bus_id, &stop_id)?)
        }
        Request::IsNear {
            bus_id,
            stop_id,
            radius_km,
        } => to_value(engine.is_near(&bus_id, &stop_id, radius_km)?),

        Request::SubmitReport(submission) => to_value(engine.submit_report(submission)?),
        Request::VerifyReport { report_id } => to_value(engine.verify_report(&report_id)?),
        Request::ValidateReport {
            report_id,
            admin_id,
            approved,
            points,
        } => to_value(engine.validate_report(&report_id, &admin_id, approved, points)?),
        Request::GetReport { report_id } => to_value(engine.get_report(&report_id)?),
        Request::ReportsByBus { bus_id } => to_value(engine.reports_by_bus(&bus_id)),
        Request::ReportsByRider { rider_id } => to_value(engine.reports_by_rider(&rider_id)),
        Request::ReportsByStatus { status } => to_value(engine.reports_by_status(status)),
        Request::PendingBySeverity => to_value(engine.pending_by_severity()),

        Request::RegisterRider { name, email } => to_value(engine.register_rider(&name, email)?),
        Request::RiderProfile { rider_id } => to_value(engine.rider_profile(&rider_id)?),
        Request::TrustScore { rider_id } => to_value(engine.trust_score(&rider_id)?),
        Request::SetTrustScore { rider_id, score } => {
            to_value(engine.set_trust_score(&rider_id, score)?)
        }
    }
}

/// One request line in, one response line out.
fn handle_line(engine: &Engine, line: &str) -> String {
    let response = match serde_json::from_str::<Request>(line) {
        Ok(request) => match dispatch(engine, request) {
            Ok(data) => Response::success(data),
            Err(err) => Response::failure(engine.recover(&err)),
        },
        Err(parse_err) => {
            // Bad JSON or an op we've never heard of. The caller's
            // problem, phrased politely.
            let err = EngineError::Validation(format!("malformed request: {}", parse_err));
            Response::failure(engine.recover(&err))
        }
    };

    serde_json::to_string(&response).unwrap_or_else(|_| {
        r#"{"ok":false,"error":{"kind":"internal_error","message":"internal error"}}"#.to_string()
    })
}

/// Accept loop. Each connection gets its own task; each line gets an
/// answer. Runs until the shutdown watch flips.
pub async fn run_gateway(
    engine: Arc<Engine>,
    port: u16,
    shutdown: &mut watch::Receiver<bool>,
) {
    let listener = match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind gateway on :{}: {}", port, e);
            return;
        }
    };

    info!("🚌 Gateway listening on 0.0.0.0:{}", port);

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, addr)) => {
                        debug!(peer = %addr, "Gateway connection accepted");
                        let engine = Arc::clone(&engine);
                        tokio::spawn(async move {
                            let (read_half, mut write_half) = stream.into_split();
                            let mut lines = BufReader::new(read_half).lines();
                            while let Ok(Some(line)) = lines.next_line().await {
                                if line.trim().is_empty() {
                                    continue;
                                }
                                let mut reply = handle_line(&engine, &line);
                                reply.push('\n');
                                if write_half.write_all(reply.as_bytes()).await.is_err() {
                                    break;
                                }
                            }
                            debug!(peer = %addr, "Gateway connection closed");
                        });
                    }
                    Err(e) => {
                        error!("Gateway accept error: {}", e);
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("Gateway: shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::events::EventBus;
    use crate::metrics::MetricsCollector;

    fn engine() -> Engine {
        let config = Config::from_env();
        let (events, _rx) = EventBus::channel(1024);
        Engine::new(&config, events, Arc::new(MetricsCollector::new()))
    }

    fn call(engine: &Engine, line: &str) -> serde_json::Value {
        serde_json::from_str(&handle_line(engine, line)).unwrap()
    }

    #[test]
    fn test_request_response_roundtrip_over_the_wire_shape() {
        let engine = engine();

        let route = call(
            &engine,
            r#"{"op":"create_route","route_number":"42","name":"Crosstown"}"#,
        );
        assert_eq!(route["ok"], true);
        let route_id = route["data"]["id"].as_str().unwrap().to_string();

        let reply = call(
            &engine,
            &format!(
                r#"{{"op":"add_stop","route_id":"{}","stop_name":"Depot","latitude":40.0,"longitude":-74.0,"sequence":1}}"#,
                route_id
            ),
        );
        assert_eq!(reply["ok"], true);

        let bus = call(
            &engine,
            &format!(
                r#"{{"op":"register_bus","bus_number":"42-A","route_id":"{}"}}"#,
                route_id
            ),
        );
        let bus_id = bus["data"]["id"].as_str().unwrap().to_string();

        let reply = call(
            &engine,
            &format!(
                r#"{{"op":"update_location","bus_id":"{}","latitude":40.01,"longitude":-74.0,"speed":22.5}}"#,
                bus_id
            ),
        );
        assert_eq!(reply["ok"], true);
        assert_eq!(reply["data"]["latitude"], 40.01);

        let etas = call(&engine, &format!(r#"{{"op":"eta_all_stops","bus_id":"{}"}}"#, bus_id));
        assert_eq!(etas["ok"], true);
        assert_eq!(etas["data"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_domain_errors_come_back_structured() {
        let engine = engine();
        let reply = call(&engine, r#"{"op":"get_bus","bus_id":"ghost"}"#);
        assert_eq!(reply["ok"], false);
        assert_eq!(reply["error"]["kind"], "not_found");
        assert!(reply["error"]["message"].as_str().unwrap().contains("ghost"));
    }

    #[test]
    fn test_malformed_json_is_a_validation_error_not_a_crash() {
        let engine = engine();
        let reply = call(&engine, "this is not json");
        assert_eq!(reply["ok"], false);
        assert_eq!(reply["error"]["kind"], "validation_error");

        let reply = call(&engine, r#"{"op":"summon_more_buses"}"#);
        assert_eq!(reply["ok"], false);
        assert_eq!(reply["error"]["kind"], "validation_error");
    }

    #[test]
    fn test_report_lifecycle_over_the_wire() {
        let engine = engine();
        let rider = call(&engine, r#"{"op":"register_rider","name":"Ada"}"#);
        let rider_id = rider["data"]["id"].as_str().unwrap().to_string();
        let bus = call(&engine, r#"{"op":"register_bus","bus_number":"42-A"}"#);
        let bus_id = bus["data"]["id"].as_str().unwrap().to_string();

        let report = call(
            &engine,
            &format!(
                r#"{{"op":"submit_report","rider_id":"{}","bus_id":"{}","report_type":"BREAKDOWN","latitude":40.0,"longitude":-74.0,"description":"engine smoking, bus broke down"}}"#,
                rider_id, bus_id
            ),
        );
        assert_eq!(report["ok"], true);
        assert_eq!(report["data"]["status"], "PENDING");
        let report_id = report["data"]["id"].as_str().unwrap().to_string();

        let verdict = call(
            &engine,
            &format!(
                r#"{{"op":"validate_report","report_id":"{}","admin_id":"admin-1","approved":true}}"#,
                report_id
            ),
        );
        assert_eq!(verdict["data"]["status"], "VERIFIED");
        assert_eq!(verdict["data"]["points_awarded"], 10);

        let score = call(&engine, &format!(r#"{{"op":"trust_score","rider_id":"{}"}}"#, rider_id));
        assert_eq!(score["data"], 110);

        // And the closed case stays closed.
        let again = call(
            &engine,
            &format!(
                r#"{{"op":"validate_report","report_id":"{}","admin_id":"admin-2","approved":true}}"#,
                report_id
            ),
        );
        assert_eq!(again["error"]["kind"], "conflict");
    }
}
