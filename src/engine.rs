// src/engine.rs
use std::sync::mpsc::{Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::drivers::{PipelineError, Session};
use crate::sim::SimulatedHeadset;
use crate::types::*;

/// Wall-clock seconds since the Unix epoch.
pub fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Run the processing lane on its own thread.
///
/// The thread owns the [`Session`]; everything else talks to it through
/// `EngineCommand`s and listens for `EngineMessage`s.
pub fn spawn_thread(
    tx: Sender<EngineMessage>,
    rx_cmd: Receiver<EngineCommand>,
    config: PipelineConfig,
) -> Result<JoinHandle<()>, PipelineError> {
    let session = Session::new(config)?;
    Ok(thread::spawn(move || Engine::new(session, tx).run(rx_cmd)))
}

struct Engine {
    session: Session,
    tx: Sender<EngineMessage>,
    mode: ConnectionMode,
    is_active: bool,
    is_streaming: bool,
    headset: Option<SimulatedHeadset>,
    sim_seed: u64,
    last_tick: Instant,
    last_telemetry: Option<u16>,
}

impl Engine {
    fn new(session: Session, tx: Sender<EngineMessage>) -> Self {
        Self {
            session,
            tx,
            mode: ConnectionMode::Simulation,
            is_active: false,
            is_streaming: false,
            headset: None,
            sim_seed: 0,
            last_tick: Instant::now(),
            last_telemetry: None,
        }
    }

    fn send(&self, msg: EngineMessage) {
        self.tx.send(msg).ok();
    }

    fn log(&self, text: impl Into<String>) {
        let text = text.into();
        info!("{text}");
        self.send(EngineMessage::Log(text));
    }

    fn run(mut self, rx_cmd: Receiver<EngineCommand>) {
        self.log("engine ready");
        let cadence = Duration::from_millis(self.session.config().analysis.cadence_ms);
        loop {
            // 1. commands
            for _ in 0..64 {
                match rx_cmd.try_recv() {
                    Ok(EngineCommand::Shutdown) => {
                        self.teardown();
                        info!("engine shut down");
                        return;
                    }
                    Ok(cmd) => self.handle_command(cmd),
                    Err(std::sync::mpsc::TryRecvError::Empty) => break,
                    Err(std::sync::mpsc::TryRecvError::Disconnected) => {
                        self.teardown();
                        return;
                    }
                }
            }

            // 2. data
            if self.is_streaming {
                if let Some(headset) = self.headset.as_mut() {
                    headset.advance_to(now_seconds());
                    if let Err(err) = self.session.pump(headset) {
                        warn!("simulated stream failed: {err}");
                    }
                }
                if self.last_tick.elapsed() >= cadence {
                    self.last_tick = Instant::now();
                    self.tick();
                }
                thread::sleep(Duration::from_millis(5));
            } else {
                thread::sleep(Duration::from_millis(20));
            }
        }
    }

    fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Connect(mode) => {
                if !self.is_active {
                    self.mode = mode;
                    self.is_active = true;
                    self.send(EngineMessage::Status(true));
                    self.log(format!("connected ({mode:?})"));
                }
            }
            EngineCommand::Disconnect => {
                self.teardown();
                self.send(EngineMessage::Status(false));
            }
            EngineCommand::StartStream => {
                if !self.is_active {
                    self.log("start ignored: not connected");
                    return;
                }
                if self.is_streaming {
                    return;
                }
                self.session.reset();
                if self.mode == ConnectionMode::Simulation {
                    self.sim_seed += 1;
                    self.headset = Some(SimulatedHeadset::new(self.sim_seed, now_seconds()));
                }
                self.is_streaming = true;
                self.last_tick = Instant::now();
                self.send(EngineMessage::Streaming(true));
                self.log("stream started");
            }
            EngineCommand::StopStream => {
                if self.is_streaming {
                    self.stop_stream();
                    self.log("stream stopped");
                }
            }
            EngineCommand::ConfigureFilter(filter) => match self.session.configure_filter(&filter) {
                Ok(()) => self.log(format!(
                    "filter {}-{} Hz, order {} ({})",
                    filter.low_hz,
                    filter.high_hz,
                    filter.order,
                    if filter.enabled { "on" } else { "off" }
                )),
                Err(err) => self.log(format!("filter rejected: {err}")),
            },
            EngineCommand::SetFilterEnabled(enabled) => self.session.set_filter_enabled(enabled),
            EngineCommand::Notify(notification) => {
                if !self.is_streaming || self.mode != ConnectionMode::External {
                    debug!("notification on handle {} ignored while idle", notification.handle);
                    return;
                }
                // Errors are logged and counted by the session.
                let _ = self.session.handle_notification(&notification);
            }
            EngineCommand::Shutdown => {}
        }
    }

    fn tick(&mut self) {
        let tick = self.session.analysis_tick();
        if let Some(t) = &tick.telemetry {
            if self.last_telemetry != Some(t.sequence_id) {
                self.last_telemetry = Some(t.sequence_id);
                self.send(EngineMessage::Telemetry(t.clone()));
            }
        }
        self.send(EngineMessage::Tick(Box::new(tick)));
    }

    fn stop_stream(&mut self) {
        self.is_streaming = false;
        self.headset = None;
        self.session.reset();
        self.last_telemetry = None;
        self.send(EngineMessage::Streaming(false));
    }

    fn teardown(&mut self) {
        if self.is_streaming {
            self.stop_stream();
        }
        self.session.reset();
        self.is_active = false;
    }
}
