//! fpscan
//!
//! Command-line front end for the scanner capture core: lists attached
//! scanners, shows the device property table, watches hotplug activity and
//! runs quality-gated captures.

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use common::{LogStyle, setup_logging_with};
use protocol::properties::PROPERTY_TABLE;
use protocol::{DeviceDescriptor, SessionEvent};
use scanner::sim::{SimulatedEngine, SimulatedProvider};
use scanner::usb::{RusbProvider, UsbAccessProvider};
use scanner::{
    CaptureReport, DeviceRegistry, DiscoveryEvent, Scanner, ScannerConfig, run_capture_with,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "fpscan")]
#[command(author, version, about = "Fingerprint scanner capture tool")]
#[command(long_about = "
Enumerates allow-listed fingerprint scanners, watches hotplug activity and
runs captures through the scanner capture core.

EXAMPLES:
    # Watch scanners being attached and detached
    fpscan

    # List attached scanners as JSON
    fpscan --list-devices --json

    # Show the device property table
    fpscan --list-properties

    # Capture against the in-process simulator
    fpscan --simulate --capture

CONFIGURATION:
    fpscan looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/fpscan/scanner.toml
    3. /etc/fpscan/scanner.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List attached scanners and exit
    #[arg(long)]
    list_devices: bool,

    /// Print the device property table and exit
    #[arg(long)]
    list_properties: bool,

    /// Run one capture with the configured policy and exit
    #[arg(long)]
    capture: bool,

    /// Registry index of the device to capture from
    #[arg(long, value_name = "INDEX", default_value_t = 0)]
    device_index: usize,

    /// Use the in-process engine and USB provider instead of hardware
    #[arg(long)]
    simulate: bool,

    /// Number of simulated scanners
    #[arg(long, value_name = "COUNT", default_value_t = 1)]
    sim_devices: u32,

    /// Print machine-readable JSON
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = ScannerConfig::default();
        let path = ScannerConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        ScannerConfig::load(Some(ScannerConfig::expand_path(path)))
            .context("Failed to load configuration")?
    } else {
        ScannerConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.scanner.log_level);
    setup_logging_with(log_level, LogStyle::Compact).context("Failed to setup logging")?;

    info!("fpscan v{}", env!("CARGO_PKG_VERSION"));

    if args.list_properties {
        return list_properties(args.json);
    }

    if args.capture {
        if !args.simulate {
            bail!("Capturing from hardware needs a native engine; run with --simulate");
        }
        let (engine, provider) = simulator(args.sim_devices);
        let scanner = Scanner::new(Arc::new(engine), Arc::new(provider), config.scanner_settings());
        return capture(&scanner, &config, args.device_index, args.json).await;
    }

    let provider: Arc<dyn UsbAccessProvider> = if args.simulate {
        Arc::new(simulator(args.sim_devices).1)
    } else {
        Arc::new(RusbProvider::new(config.usb.filters.clone()).context("Failed to open libusb")?)
    };
    let registry = DeviceRegistry::new(provider);

    if args.list_devices {
        return list_devices(&registry, args.json);
    }

    watch(&registry, args.json).await
}

fn simulator(devices: u32) -> (SimulatedEngine, SimulatedProvider) {
    (
        SimulatedEngine::with_devices(devices as usize),
        SimulatedProvider::with_scanners(devices),
    )
}

fn list_properties(json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(PROPERTY_TABLE)?);
        return Ok(());
    }

    println!("{:<28} {:>5}  {:<8}  {:<8}  DESCRIPTION", "KEY", "CODE", "ACCESS", "DEFAULT");
    for spec in PROPERTY_TABLE {
        let code = spec.code.map_or_else(|| "-".to_string(), |c| c.to_string());
        println!(
            "{:<28} {:>5}  {:<8}  {:<8}  {}",
            spec.key,
            code,
            format!("{:?}", spec.access),
            spec.default.unwrap_or("-"),
            spec.description
        );
    }
    Ok(())
}

fn list_devices(registry: &DeviceRegistry, json: bool) -> Result<()> {
    let devices = registry.enumerate();

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No scanners found");
        return Ok(());
    }

    println!("{} scanner(s):", devices.len());
    for (index, device) in devices.iter().enumerate() {
        println!("  [{}] {}", index, describe(device));
    }
    Ok(())
}

fn describe(device: &DeviceDescriptor) -> String {
    format!(
        "{} {:04x}:{:04x} {} (serial {}, permission {:?}, {:?})",
        device.id,
        device.vendor_id,
        device.product_id,
        device.product_name.as_deref().unwrap_or("unknown"),
        device.serial_number.as_deref().unwrap_or("-"),
        device.permission,
        device.open_state,
    )
}

/// Print discovery events until Ctrl+C
async fn watch(registry: &DeviceRegistry, json: bool) -> Result<()> {
    let initial = registry.enumerate();
    info!("{} scanner(s) attached", initial.len());
    let mut stream = registry
        .subscribe()
        .map_err(|e| anyhow!("Failed to watch for scanners: {}", e))?;

    println!("Watching for scanners (Ctrl+C to stop)");
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, stopping");
                break;
            }
            event = stream.next() => {
                let Some(event) = event else {
                    warn!("Discovery stream ended");
                    break;
                };
                print_discovery(&event, json)?;
            }
        }
    }

    stream.unsubscribe();
    Ok(())
}

fn print_discovery(event: &DiscoveryEvent, json: bool) -> Result<()> {
    if json {
        let value = match event {
            DiscoveryEvent::DeviceAttached(device) => {
                serde_json::json!({ "event": "attached", "device": device })
            }
            DiscoveryEvent::DeviceDetached(id) => {
                serde_json::json!({ "event": "detached", "device": id })
            }
            DiscoveryEvent::PermissionResult { device, granted } => {
                serde_json::json!({ "event": "permission", "device": device, "granted": granted })
            }
            DiscoveryEvent::DeviceCountChanged(count) => {
                serde_json::json!({ "event": "device_count", "count": count })
            }
            DiscoveryEvent::InitProgress { index, progress } => {
                serde_json::json!({ "event": "init_progress", "index": index, "progress": progress })
            }
            DiscoveryEvent::OpenComplete { index, result } => serde_json::json!({
                "event": "open_complete",
                "index": index,
                "error": result.as_ref().err().map(|f| f.to_string()),
            }),
        };
        println!("{}", serde_json::to_string(&value)?);
        return Ok(());
    }

    match event {
        DiscoveryEvent::DeviceAttached(device) => println!("+ {}", describe(device)),
        DiscoveryEvent::DeviceDetached(id) => println!("- {}", id),
        DiscoveryEvent::PermissionResult { device, granted } => {
            println!("  {} permission {}", device, if *granted { "granted" } else { "denied" })
        }
        DiscoveryEvent::DeviceCountChanged(count) => println!("  engine reports {} device(s)", count),
        DiscoveryEvent::InitProgress { index, progress } => {
            println!("  [{}] opening {}%", index, progress)
        }
        DiscoveryEvent::OpenComplete { index, result } => match result {
            Ok(_) => println!("  [{}] open", index),
            Err(failure) => println!("  [{}] open failed: {}", index, failure),
        },
    }
    Ok(())
}

async fn capture(scanner: &Scanner, config: &ScannerConfig, index: usize, json: bool) -> Result<()> {
    let devices = scanner.registry().enumerate();
    info!("{} scanner(s) attached", devices.len());

    let policy = config.capture_policy()?;
    let mut session = scanner
        .open_with(index, &config.open_options())
        .map_err(|failure| anyhow!("Failed to open device {}: {}", index, failure))?;
    config
        .apply_properties(&session)
        .map_err(|failure| anyhow!("Failed to apply configured properties: {}", failure))?;

    let mut events = session
        .take_events()
        .ok_or_else(|| anyhow!("Session events already taken"))?;

    let report = run_capture_with(&session, &mut events, &policy, |attempt, event| {
        match event {
            SessionEvent::FingerQualityChanged(quality) => {
                info!(attempt, "Quality {:?}", quality.fingers())
            }
            SessionEvent::PreviewAvailable(_) => {}
            other => info!(attempt, "{}", other.name()),
        }
    })
    .await;

    session.close();
    print_report(&report, json)?;

    if report.is_accepted() {
        Ok(())
    } else {
        bail!("Capture was not accepted after {} attempt(s)", report.attempts())
    }
}

fn print_report(report: &CaptureReport, json: bool) -> Result<()> {
    let (status, detail) = match report {
        CaptureReport::Accepted { result, .. } | CaptureReport::Rejected { result, .. } => {
            let image = result.image();
            (
                if report.is_accepted() { "accepted" } else { "rejected" },
                serde_json::json!({
                    "image_type": result.image_type(),
                    "width": image.width(),
                    "height": image.height(),
                    "fingers": result.finger_images().len(),
                    "quality": result.quality().fingers(),
                    "warnings": result.warnings().iter().map(|w| w.to_string()).collect::<Vec<_>>(),
                }),
            )
        }
        CaptureReport::Cancelled { frame, .. } => (
            "cancelled",
            serde_json::json!({ "width": frame.width(), "height": frame.height() }),
        ),
        CaptureReport::Failed { failure, .. } => {
            ("failed", serde_json::json!({ "error": failure.to_string() }))
        }
    };

    if json {
        let value = serde_json::json!({
            "status": status,
            "attempts": report.attempts(),
            "detail": detail,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("Capture {} after {} attempt(s)", status, report.attempts());
        println!("{}", serde_json::to_string_pretty(&detail)?);
    }
    Ok(())
}
