//! Interactive driver for the LED controller session.
//!
//! Connects to the peripheral and accepts line commands on stdin, standing
//! in for the touch UI the controller was designed around. All session
//! activity is reported through the log.

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use led_controller::domain::models::{
    AnimationMode, AttributeRequest, SessionEvent, SessionState,
};
use led_controller::domain::session::{Session, SessionConfig, SessionHandle};
use led_controller::domain::settings::SettingsService;
use led_controller::infrastructure::bluetooth::btleplug_backend::BtleplugTransport;
use led_controller::infrastructure::logging;

#[tokio::main]
async fn main() -> Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();
    let _logging_guard = logging::init(&settings.log)?;
    info!("starting LED controller");

    let uuids = settings.ble.attribute_uuids()?;
    let config = SessionConfig {
        policies: settings.write.policies(),
    };
    let (handle, mut events) =
        Session::spawn(config, move |tx| BtleplugTransport::new(tx, uuids));
    handle.connect();

    let input_handle = handle.clone();
    tokio::spawn(async move {
        print_help();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if !dispatch(&input_handle, line.trim()) {
                break;
            }
        }
        input_handle.shutdown();
    });

    let mut supervisor = Supervisor::new(settings.rescan_on_disconnect);
    while let Some(event) = events.recv().await {
        match &event {
            SessionEvent::StateChanged(state) => info!(%state, "session state"),
            SessionEvent::AttributeChanged(value) => info!(%value, "attribute"),
            SessionEvent::LinkLost => info!("link lost"),
            SessionEvent::Failed(error) => error!(%error, "session operation failed"),
        }
        match supervisor.on_event(&event) {
            Some(Recovery::Connect) => {
                info!("scanning again");
                handle.connect();
            }
            Some(Recovery::Disconnect) => {
                info!("abandoning bring-up");
                handle.disconnect();
            }
            None => {}
        }
    }

    info!("session ended");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recovery {
    Connect,
    Disconnect,
}

/// Reconnection policy around the retry-free session core.
///
/// Link loss triggers a fresh scan. A transport failure during bring-up
/// (the session would otherwise sit parked mid-sequence) is abandoned with
/// a disconnect, and the resulting Idle triggers the reconnect. The Idle a
/// user-commanded disconnect produces matches neither case and is left
/// alone.
struct Supervisor {
    rescan_on_disconnect: bool,
    state: SessionState,
    recovering: bool,
}

impl Supervisor {
    fn new(rescan_on_disconnect: bool) -> Self {
        Self {
            rescan_on_disconnect,
            state: SessionState::Idle,
            recovering: false,
        }
    }

    fn on_event(&mut self, event: &SessionEvent) -> Option<Recovery> {
        match event {
            SessionEvent::LinkLost => self.rescan_on_disconnect.then_some(Recovery::Connect),
            SessionEvent::StateChanged(state) => {
                self.state = *state;
                if *state == SessionState::Idle && self.recovering {
                    self.recovering = false;
                    Some(Recovery::Connect)
                } else {
                    None
                }
            }
            SessionEvent::Failed(_) => {
                let bringing_up =
                    !matches!(self.state, SessionState::Idle | SessionState::Ready);
                if bringing_up && self.rescan_on_disconnect && !self.recovering {
                    self.recovering = true;
                    Some(Recovery::Disconnect)
                } else {
                    None
                }
            }
            SessionEvent::AttributeChanged(_) => None,
        }
    }
}

fn print_help() {
    println!("commands:");
    println!("  brightness <0-255>");
    println!("  delay <1-255>");
    println!("  animation <meteor|solid|wipe|fade|0-3>");
    println!("  color <hue> <sat> <val>      (each 0-255)");
    println!("  status | connect | disconnect | quit");
}

/// Parse and forward one input line. Returns false when the user quits.
fn dispatch(handle: &SessionHandle, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return true;
    };
    let args: Vec<&str> = parts.collect();

    let request = match command {
        "quit" | "exit" => return false,
        "help" => {
            print_help();
            return true;
        }
        "connect" => {
            handle.connect();
            return true;
        }
        "disconnect" => {
            handle.disconnect();
            return true;
        }
        "status" => {
            handle.report();
            return true;
        }
        "brightness" => scalar_arg(&args).map(AttributeRequest::Brightness),
        "delay" => scalar_arg(&args).map(AttributeRequest::DelayTime),
        "animation" => animation_arg(&args).map(AttributeRequest::Animation),
        "color" => color_arg(&args),
        other => {
            println!("unknown command: {other} (try 'help')");
            return true;
        }
    };

    match request {
        Some(request) => {
            if let Err(error) = handle.set(request) {
                println!("{error}");
            }
        }
        None => println!("bad arguments for '{command}' (try 'help')"),
    }
    true
}

fn scalar_arg(args: &[&str]) -> Option<u16> {
    match args {
        [value] => value.parse().ok(),
        _ => None,
    }
}

fn animation_arg(args: &[&str]) -> Option<u8> {
    match args {
        [name] => name
            .parse::<AnimationMode>()
            .map(AnimationMode::ordinal)
            .ok()
            .or_else(|| name.parse().ok()),
        _ => None,
    }
}

fn color_arg(args: &[&str]) -> Option<AttributeRequest> {
    match args {
        [hue, saturation, value] => Some(AttributeRequest::Color {
            hue: hue.parse().ok()?,
            saturation: saturation.parse().ok()?,
            value: value.parse().ok()?,
        }),
        _ => None,
    }
}
