// SwingCam operator binary
//
// Headless stand-in for the presentation layer: reads triggers from stdin,
// drains the frame queue on a fixed tick (the render consumer's contract)
// and prints recording notifications. Ctrl-C routes through the same
// graceful shutdown path as `quit`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use crossbeam_channel::{select, tick, unbounded};

use swingcam::config::default_config_path;
use swingcam::{enumerate_cameras, CaptureEngine, Config, EngineEvent, GstCamera};

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Record,
    Stop,
    Mode,
    Devices,
    Quit,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);
    let config = Config::load_or_default(&config_path);
    log::info!(
        "config: {} | clips: {}",
        config_path.display(),
        config.output_dir.display()
    );

    // Device open failure is fatal at startup; no retry
    let camera = Arc::new(GstCamera::open(&config).context("failed to open camera")?);
    let mut engine =
        CaptureEngine::start(&config, camera).context("failed to start capture engine")?;

    let (cmd_tx, cmd_rx) = unbounded();

    {
        let cmd_tx = cmd_tx.clone();
        ctrlc::set_handler(move || {
            let _ = cmd_tx.send(Command::Quit);
        })
        .context("failed to install Ctrl-C handler")?;
    }

    std::thread::spawn(move || read_commands(cmd_tx));

    println!("swingcam ready - commands: record, stop, mode, devices, quit");

    // The consumer polls on its own tick, independent of the camera rate
    let render_tick = tick(Duration::from_millis(33));
    let mut frames_consumed: u64 = 0;
    let mut last_report = Instant::now();

    loop {
        select! {
            recv(cmd_rx) -> cmd => {
                match cmd {
                    Ok(Command::Record) => {
                        if !engine.start_recording() {
                            println!("record trigger ignored (mode: {:?})", engine.current_mode());
                        }
                    }
                    Ok(Command::Stop) => {
                        if !engine.stop_recording() {
                            println!("stop trigger ignored (mode: {:?})", engine.current_mode());
                        }
                    }
                    Ok(Command::Mode) => {
                        println!(
                            "mode: {:?} | buffered pre-roll: {:.1}s | queued frames: {}",
                            engine.current_mode(),
                            engine.buffered_preroll().as_secs_f64(),
                            engine.pending_frames()
                        );
                    }
                    Ok(Command::Devices) => {
                        let devices = enumerate_cameras();
                        if devices.is_empty() {
                            println!("no cameras detected");
                        }
                        for (id, name) in devices {
                            println!("{id}: {name}");
                        }
                    }
                    Ok(Command::Quit) | Err(_) => break,
                }
            }
            recv(engine.events()) -> event => {
                match event {
                    Ok(EngineEvent::RecordingStarted { path, preroll }) => {
                        println!(
                            "recording -> {} ({:.1}s pre-roll captured)",
                            path.display(),
                            preroll.as_secs_f64()
                        );
                    }
                    Ok(EngineEvent::RecordingFinished(info)) => {
                        println!(
                            "saved {} ({:.1}s, {} bytes)",
                            info.path.display(),
                            info.duration.as_secs_f64(),
                            info.size_bytes
                        );
                    }
                    Ok(EngineEvent::RecordingFailed { reason }) => {
                        println!("recording failed: {reason} (back to preview)");
                    }
                    Err(_) => break,
                }
            }
            recv(render_tick) -> _ => {
                // A real renderer would display these; here they are counted
                while engine.next_frame().is_some() {
                    frames_consumed += 1;
                }
                if last_report.elapsed() >= Duration::from_secs(30) {
                    log::debug!("consumed {frames_consumed} frames so far");
                    last_report = Instant::now();
                }
            }
        }
    }

    engine.shutdown();
    println!("bye");
    Ok(())
}

fn read_commands(cmd_tx: crossbeam_channel::Sender<Command>) {
    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        line.clear();
        if stdin.read_line(&mut line).unwrap_or(0) == 0 {
            // EOF: treat like quit
            let _ = cmd_tx.send(Command::Quit);
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some(command) = parse_command(trimmed) else {
            println!("unknown command: {trimmed} (record/stop/mode/devices/quit)");
            continue;
        };
        let quitting = command == Command::Quit;
        if cmd_tx.send(command).is_err() || quitting {
            break;
        }
    }
}

fn parse_command(input: &str) -> Option<Command> {
    match input {
        "record" | "r" => Some(Command::Record),
        "stop" | "s" => Some(Command::Stop),
        "mode" | "m" => Some(Command::Mode),
        "devices" | "d" => Some(Command::Devices),
        "quit" | "q" => Some(Command::Quit),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_with_short_aliases() {
        assert_eq!(parse_command("record"), Some(Command::Record));
        assert_eq!(parse_command("r"), Some(Command::Record));
        assert_eq!(parse_command("stop"), Some(Command::Stop));
        assert_eq!(parse_command("mode"), Some(Command::Mode));
        assert_eq!(parse_command("devices"), Some(Command::Devices));
        assert_eq!(parse_command("d"), Some(Command::Devices));
        assert_eq!(parse_command("quit"), Some(Command::Quit));
        assert_eq!(parse_command("bogus"), None);
    }
}
