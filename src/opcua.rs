//! OPC-UA integration simulator.
//!
//! No real OPC-UA stack is involved: the simulator holds nothing but its
//! start time, and every reading is a pure function of `(state, now)`.
//! The same instant always yields the same snapshot, so the endpoint can
//! be polled freely and tests can pin the clock.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::f64::consts::TAU;

/// Entire persistent state of the simulator.
#[derive(Debug, Clone)]
pub struct SimulatorState {
    pub start_time: DateTime<Utc>,
}

impl SimulatorState {
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self { start_time }
    }
}

/// One simulated process variable at an instant.
#[derive(Debug, Clone, Serialize)]
pub struct Reading {
    pub node_id: &'static str,
    pub name: &'static str,
    pub value: f64,
    pub unit: &'static str,
    /// OPC-UA quality code; the simulator always reports `Good`.
    pub quality: &'static str,
    pub in_tolerance: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Equipment {
    pub id: &'static str,
    pub name: &'static str,
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alarm {
    pub node_id: &'static str,
    pub message: &'static str,
    pub priority: &'static str,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub connected: bool,
    pub endpoint: &'static str,
    pub uptime_seconds: i64,
}

/// Full snapshot served to clients.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub server: ServerStatus,
    pub readings: Vec<Reading>,
    pub equipment: Vec<Equipment>,
    pub alarms: Vec<Alarm>,
}

pub const ENDPOINT: &str = "opc.tcp://plant-sim.local:4840";

/// Compute all six process variables at `now`.
///
/// Slow drift comes from sine waves with per-variable periods; the
/// residual noise is a deterministic hash of the millisecond timestamp,
/// never an RNG, so a snapshot is reproducible from its instant alone.
pub fn compute_readings(state: &SimulatorState, now: DateTime<Utc>) -> Vec<Reading> {
    let ms = now
        .signed_duration_since(state.start_time)
        .num_milliseconds();

    let reactor = 65.0 + 1.5 * phase(ms, 120_000) + 0.3 * noise(now, 1);
    let mixer = 120.0 + 10.0 * noise(now, 2);
    let humidity = 45.0 + 3.0 * phase(ms, 300_000) + 0.5 * noise(now, 3);
    let pressure = 1.013 + 0.01 * noise(now, 4);
    let dryer = 42.0 + 2.0 * phase(ms, 180_000) + 0.4 * noise(now, 5);
    let weight = 499.5 + 0.5 * noise(now, 6).abs();

    vec![
        reading("REACTOR_01.TEMP", "Reactor temperature", reactor, "°C", (reactor - 65.0).abs() <= 2.0, now),
        reading("MIXER_01.RPM", "Mixer speed", mixer, "rpm", (mixer - 120.0).abs() <= 15.0, now),
        reading("ENV_01.RH", "Relative humidity", humidity, "%", (humidity - 45.0).abs() <= 5.0, now),
        reading("VESSEL_01.PRESS", "Vessel pressure", pressure, "bar", (pressure - 1.013).abs() <= 0.05, now),
        reading("DRYER_01.OUTLET_TEMP", "Dryer outlet temperature", dryer, "°C", (dryer - 42.0).abs() <= 3.0, now),
        reading("SCALE_01.WEIGHT", "Batch weight", weight, "kg", weight <= 500.0, now),
    ]
}

fn reading(
    node_id: &'static str,
    name: &'static str,
    value: f64,
    unit: &'static str,
    in_tolerance: bool,
    timestamp: DateTime<Utc>,
) -> Reading {
    Reading {
        node_id,
        name,
        value: (value * 100.0).round() / 100.0,
        unit,
        quality: "Good",
        in_tolerance,
        timestamp,
    }
}

/// Plant equipment roster. Static by design: equipment state machines
/// are out of scope for the simulator.
pub fn equipment() -> Vec<Equipment> {
    vec![
        Equipment { id: "EQ-001", name: "Reactor R-101", status: "running" },
        Equipment { id: "EQ-002", name: "Mixer M-201", status: "running" },
        Equipment { id: "EQ-003", name: "Dryer D-301", status: "running" },
        Equipment { id: "EQ-004", name: "Scale S-401", status: "idle" },
    ]
}

/// Active alarms at `now`. Humidity raises a low-priority advisory for
/// roughly one minute out of every five, tied to the humidity wave so it
/// fires when the reading peaks.
pub fn alarms(state: &SimulatorState, now: DateTime<Utc>) -> Vec<Alarm> {
    let ms = now
        .signed_duration_since(state.start_time)
        .num_milliseconds();
    if phase(ms, 300_000) > 0.95 {
        vec![Alarm {
            node_id: "ENV_01.RH",
            message: "Relative humidity approaching upper limit",
            priority: "low",
            timestamp: now,
        }]
    } else {
        Vec::new()
    }
}

pub fn snapshot(state: &SimulatorState, now: DateTime<Utc>) -> Snapshot {
    Snapshot {
        server: ServerStatus {
            connected: true,
            endpoint: ENDPOINT,
            uptime_seconds: now.signed_duration_since(state.start_time).num_seconds().max(0),
        },
        readings: compute_readings(state, now),
        equipment: equipment(),
        alarms: alarms(state, now),
    }
}

/// Sine position for a wave with the given period in milliseconds.
fn phase(elapsed_ms: i64, period_ms: i64) -> f64 {
    (TAU * (elapsed_ms.rem_euclid(period_ms)) as f64 / period_ms as f64).sin()
}

/// Deterministic noise in [-1, 1], derived from the millisecond
/// timestamp and a per-variable salt via a splitmix64 round.
fn noise(now: DateTime<Utc>, salt: u64) -> f64 {
    let mut z = (now.timestamp_millis() as u64).wrapping_add(salt.wrapping_mul(0x9E3779B97F4A7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^= z >> 31;
    (z >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0
}
