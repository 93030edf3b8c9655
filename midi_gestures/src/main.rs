//! midi-gestures — command-line entry point.

use clap::Parser;
use gesture_cc::{CcAssignments, MAX_DIST_PX, MIN_DIST_PX};
use midi_gestures::app::run;
use midi_gestures::config::{
    split_command, ControllerConfig, DEFAULT_DETECTOR_COMMAND, DEFAULT_PORT_SUBSTRING,
    DEFAULT_SEND_RATE_HZ, DEFAULT_SIM_HEIGHT, DEFAULT_SIM_WIDTH, DEFAULT_VIRTUAL_PORT,
};
use midi_gestures::emitter::list_output_ports;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "midi-gestures", version, about = "Fingertip distances as MIDI Control Change")]
struct Args {
    /// Use the first MIDI output whose name contains this text
    #[arg(long, default_value = DEFAULT_PORT_SUBSTRING)]
    port: String,

    /// Virtual port created when no output matches --port
    #[arg(long, default_value = DEFAULT_VIRTUAL_PORT)]
    virtual_port: String,

    /// MIDI channel, 0-based (0 = channel 1)
    #[arg(long, default_value_t = 0)]
    channel: u8,

    /// Controller for left thumb ↔ left index
    #[arg(long, default_value_t = 20)]
    cc_left_pinch: u8,

    /// Controller for right thumb ↔ right index
    #[arg(long, default_value_t = 21)]
    cc_right_pinch: u8,

    /// Controller for left thumb ↔ right thumb
    #[arg(long, default_value_t = 22)]
    cc_thumb_span: u8,

    /// Controller for left index ↔ right index
    #[arg(long, default_value_t = 23)]
    cc_index_span: u8,

    /// Distance in pixels that maps to 0
    #[arg(long, default_value_t = MIN_DIST_PX)]
    min_dist: f32,

    /// Distance in pixels that maps to 127
    #[arg(long, default_value_t = MAX_DIST_PX)]
    max_dist: f32,

    /// Maximum MIDI update rate (per second)
    #[arg(long, default_value_t = DEFAULT_SEND_RATE_HZ)]
    rate: u32,

    /// Camera index
    #[arg(long, default_value_t = 0)]
    camera: u32,

    /// Do not mirror the camera image
    #[arg(long)]
    no_mirror: bool,

    /// Landmark detector helper command (webcam mode). Relative paths are
    /// resolved against the working directory, so the default only works
    /// when started from the repository root
    #[arg(long, default_value = DEFAULT_DETECTOR_COMMAND)]
    detector: String,

    /// Simulated frame width
    #[arg(long, default_value_t = DEFAULT_SIM_WIDTH)]
    width: u32,

    /// Simulated frame height
    #[arg(long, default_value_t = DEFAULT_SIM_HEIGHT)]
    height: u32,

    /// Print the MIDI output ports and exit
    #[arg(long)]
    list_ports: bool,
}

impl Args {
    fn into_config(self) -> ControllerConfig {
        ControllerConfig {
            port_substring:    self.port,
            virtual_port_name: self.virtual_port,
            channel:           self.channel,
            cc: CcAssignments {
                left_pinch:  self.cc_left_pinch,
                right_pinch: self.cc_right_pinch,
                thumb_span:  self.cc_thumb_span,
                index_span:  self.cc_index_span,
            },
            min_dist_px:       self.min_dist,
            max_dist_px:       self.max_dist,
            send_rate_hz:      self.rate,
            camera_index:      self.camera,
            mirror:            !self.no_mirror,
            detector_command:  split_command(&self.detector),
            sim_width:         self.width,
            sim_height:        self.height,
        }
    }
}

fn main() {
    // RUST_LOG overrides, e.g. RUST_LOG=midi_gestures=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn,midi_gestures=info")),
        )
        .with_target(true)
        .init();

    let args = Args::parse();

    if args.list_ports {
        match list_output_ports() {
            Ok(names) if names.is_empty() => println!("No MIDI output ports."),
            Ok(names) => {
                for (i, name) in names.iter().enumerate() {
                    println!("  {}: {}", i, name);
                }
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║      MIDI Gestures — fingertip distances → Control Change    ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    #[cfg(feature = "webcam")]
    println!("  Mode: webcam + landmark detector");
    #[cfg(not(feature = "webcam"))]
    println!("  Mode: mouse/keyboard simulation  (use --features webcam for a camera)");
    println!("  Press 'q' to quit.");
    println!();

    let quit = Arc::new(AtomicBool::new(false));
    let flag = quit.clone();
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        tracing::warn!("Ctrl-C handler not installed: {}", e);
    }

    if let Err(e) = run(args.into_config(), quit) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_flags_gives_default_config() {
        let args = Args::parse_from(["midi-gestures"]);
        assert_eq!(args.into_config(), ControllerConfig::default());
    }

    #[test]
    fn detector_help_mentions_working_directory() {
        use clap::CommandFactory;
        let cmd = Args::command();
        let detector = cmd.get_arguments().find(|a| a.get_id() == "detector").unwrap();
        let help = detector.get_help().unwrap().to_string();
        assert!(help.contains("working directory"), "{}", help);
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::parse_from([
            "midi-gestures", "--port", "Bus", "--channel", "3", "--cc-index-span", "70",
            "--min-dist", "10", "--no-mirror", "--detector", "./detect --gpu",
        ]);
        let cfg = args.into_config();
        assert_eq!(cfg.port_substring, "Bus");
        assert_eq!(cfg.channel, 3);
        assert_eq!(cfg.cc.index_span, 70);
        assert_eq!(cfg.cc.left_pinch, 20);
        assert_eq!(cfg.min_dist_px, 10.0);
        assert!(!cfg.mirror);
        assert_eq!(cfg.detector_command, vec!["./detect", "--gpu"]);
    }
}
