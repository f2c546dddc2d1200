// src/main.rs
use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use log::info;

use musestream::drivers::log_scale_percent;
use musestream::engine;
use musestream::{ConnectionMode, EngineCommand, EngineMessage, PipelineConfig};

const DEFAULT_SECONDS: f64 = 10.0;

/// `musestream [config.json] [seconds]`
fn parse_args() -> Result<(PipelineConfig, f64)> {
    let mut config = PipelineConfig::default();
    let mut seconds = DEFAULT_SECONDS;
    for arg in std::env::args().skip(1) {
        if let Ok(value) = arg.parse::<f64>() {
            if !(value > 0.0) {
                return Err(anyhow!("run time must be positive, got {value}"));
            }
            seconds = value;
        } else {
            config = PipelineConfig::from_json_file(&arg)
                .with_context(|| format!("loading configuration from {arg}"))?;
        }
    }
    Ok((config, seconds))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let (config, seconds) = parse_args()?;

    let (tx, rx) = mpsc::channel();
    let (tx_cmd, rx_cmd) = mpsc::channel();
    let handle = engine::spawn_thread(tx, rx_cmd, config).context("starting engine")?;
    tx_cmd.send(EngineCommand::Connect(ConnectionMode::Simulation))?;
    tx_cmd.send(EngineCommand::StartStream)?;

    let deadline = Instant::now() + Duration::from_secs_f64(seconds);
    while Instant::now() < deadline {
        let Ok(msg) = rx.recv_timeout(Duration::from_millis(100)) else {
            continue;
        };
        match msg {
            EngineMessage::Tick(tick) => {
                if !tick.spectrum_ready {
                    continue;
                }
                let contact: Vec<String> = tick
                    .contact_quality
                    .iter()
                    .map(|(ch, q)| format!("{ch}:{q:?}"))
                    .collect();
                let alpha = tick.aggregate_powers.get("alpha").copied().unwrap_or(0.0);
                info!(
                    "focus {:.2} (L {:.2} R {:.2})  bias {:+.2}  alpha {:.0}%  contact [{}]  rate {:.2} Hz",
                    tick.focus_score,
                    tick.focus_left,
                    tick.focus_right,
                    tick.lateral_bias,
                    log_scale_percent(alpha, 1e2, 1e8),
                    contact.join(" "),
                    tick.clock_rate_hz.unwrap_or(0.0),
                );
            }
            EngineMessage::Telemetry(t) => info!(
                "battery {:.1}%  fuel gauge {:.0} mV  temperature {}",
                t.battery_percent, t.fuel_gauge_mv, t.temperature_raw
            ),
            EngineMessage::Log(_) | EngineMessage::Status(_) | EngineMessage::Streaming(_) => {}
        }
    }

    tx_cmd.send(EngineCommand::StopStream)?;
    tx_cmd.send(EngineCommand::Disconnect)?;
    tx_cmd.send(EngineCommand::Shutdown)?;
    handle
        .join()
        .map_err(|_| anyhow!("engine thread panicked"))?;
    Ok(())
}
