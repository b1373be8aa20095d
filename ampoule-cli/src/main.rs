//! Ampoule command line
//!
//! Drive a Gilson GX-241 liquid handler, its syringe pump and injection
//! valve over a GSIOC serial link.
//!
//! Usage:
//!     ampoule ports
//!     ampoule query pump
//!     ampoule move samples/A1
//!     ampoule aspirate 50 samples/A1 --rate 0.5
//!     ampoule --dry-run run chain.json

mod config;

use std::path::{Path, PathBuf};

use ampoule_core::ops::{ArmReport, InjectorReport, PumpReport};
use ampoule_core::{
    ChainReport, CommandLink, DeviceBackend, HandlerBed, LiquidHandler, Placeable, SimulatedLink,
};
use ampoule_drivers::{list_ports, DeviceSession};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;

use crate::config::{AppConfig, DEFAULT_CONFIG};

/// Drive a Gilson liquid handler over GSIOC
#[derive(Parser)]
#[command(name = "ampoule")]
#[command(version)]
#[command(about = "Drive a Gilson GX-241 liquid handler over GSIOC", long_about = None)]
struct Cli {
    /// Configuration file [default: ampoule.toml]
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Serial port, overriding the configuration ("AUTO" to detect)
    #[arg(long, global = true)]
    port: Option<String>,

    /// Run against the simulated bus and print the command stream
    #[arg(long, global = true)]
    dry_run: bool,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports
    Ports,

    /// Read identity and status from the devices
    Query {
        #[arg(value_enum, default_value_t = Device::All)]
        device: Device,
    },

    /// Home the arm and draw the system air gap
    Home,

    /// Move the needle to a place ("rack/A1" or "x,y,z")
    Move {
        #[arg(value_parser = parse_place)]
        place: Placeable,

        /// Stop over the vial edge instead of its center
        #[arg(long)]
        edge: bool,
    },

    /// Draw liquid from a place
    Aspirate {
        /// Volume (uL)
        volume: f64,

        #[arg(value_parser = parse_place)]
        place: Placeable,

        /// Flow rate (mL/min)
        #[arg(short, long)]
        rate: Option<f64>,
    },

    /// Push liquid into a place
    Dispense {
        /// Volume (uL)
        volume: f64,

        #[arg(value_parser = parse_place)]
        place: Placeable,

        /// Flow rate (mL/min)
        #[arg(short, long)]
        rate: Option<f64>,
    },

    /// Flush system fluid through the line into the waste
    Prime {
        /// Total volume (uL)
        volume: f64,

        /// Largest single stroke (uL) [default: syringe size]
        #[arg(long)]
        chunk: Option<f64>,

        /// Flow rate (mL/min) [default: priming rate]
        #[arg(short, long)]
        rate: Option<f64>,
    },

    /// Validate and run an operation chain (JSON)
    Run { chain: PathBuf },

    /// Show or edit the bed's resource file
    Resources {
        /// Set a value; VALUE is read as JSON, or taken as a string
        #[arg(long, value_name = "KEY=VALUE")]
        set: Vec<String>,
    },

    /// Show the bed and rack occupancy
    Bed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Device {
    Arm,
    Pump,
    Injector,
    All,
}

/// Parse "rack/A1" into a rack slot and "x,y,z" into a coordinate
fn parse_place(text: &str) -> Result<Placeable, String> {
    if let Some((rack, well)) = text.split_once('/') {
        let (rack, well) = (rack.trim(), well.trim());
        if rack.is_empty() || well.is_empty() {
            return Err(format!("expected rack/WELL, got {text:?}"));
        }
        return Ok(Placeable::named(rack, well));
    }
    let values: Vec<f64> = text
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("bad coordinate {text:?}: {e}"))?;
    match values.as_slice() {
        [x, y, z] => Ok(Placeable::xyz(*x, *y, *z)),
        _ => Err(format!("expected x,y,z or rack/WELL, got {text:?}")),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

type Handler = LiquidHandler<Box<dyn CommandLink>>;

/// Open the bus (or the simulator) and wrap it in a handler
fn connect(config: &AppConfig, dry_run: bool) -> Result<(Handler, Option<SimulatedLink>)> {
    let bed = config.load_bed()?;
    let (link, sim): (Box<dyn CommandLink>, _) = if dry_run {
        info!("Dry run: commands go to the simulated bus");
        let sim = SimulatedLink::new(config.devices);
        (Box::new(sim.clone()), Some(sim))
    } else {
        let session = DeviceSession::open(&config.serial).context("opening serial port")?;
        (Box::new(session), None)
    };
    let backend = DeviceBackend::new(link, config.devices);
    let handler = LiquidHandler::new(backend, bed, config.handler.clone())?;
    Ok((handler, sim))
}

fn cmd_ports() -> Result<()> {
    let ports = list_ports().context("listing serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

fn cmd_query<L: CommandLink>(handler: &mut LiquidHandler<L>, device: Device) -> Result<()> {
    if matches!(device, Device::Arm | Device::All) {
        let report: ArmReport = handler.query_arm().context("querying arm")?;
        println!("{report}");
    }
    if matches!(device, Device::Pump | Device::All) {
        let report: PumpReport = handler.query_pump().context("querying pump")?;
        println!("{report}");
    }
    if matches!(device, Device::Injector | Device::All) {
        let report: InjectorReport = handler.query_injector().context("querying injector")?;
        println!("{report}");
    }
    Ok(())
}

fn cmd_run<L: CommandLink>(handler: &mut LiquidHandler<L>, path: &Path) -> Result<ChainReport> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    handler.initialize()?;
    let report = handler
        .run_chain_json(&text)
        .with_context(|| format!("running {}", path.display()))?;
    Ok(report)
}

fn cmd_resources(bed: &HandlerBed, assignments: &[String]) -> Result<()> {
    for assignment in assignments {
        let Some((key, value)) = assignment.split_once('=') else {
            bail!("expected KEY=VALUE, got {assignment:?}");
        };
        let value = serde_json::from_str(value.trim())
            .unwrap_or_else(|_| serde_json::Value::String(value.trim().to_owned()));
        bed.resources().set(key.trim(), value)?;
    }
    let entries = bed.resources().entries();
    if entries.is_empty() {
        println!("(no resources)");
    }
    for (key, value) in entries {
        println!("{key} = {value}");
    }
    Ok(())
}

fn execute(cli: Cli, config: AppConfig) -> Result<()> {
    match &cli.command {
        Commands::Ports => return cmd_ports(),
        Commands::Bed => {
            print!("{}", config.load_bed()?.summary());
            return Ok(());
        }
        Commands::Resources { set } => {
            if config.bed.directory.is_none() {
                bail!("no [bed] directory configured");
            }
            return cmd_resources(&config.load_bed()?, set);
        }
        _ => {}
    }

    let (mut handler, sim) = connect(&config, cli.dry_run)?;
    let result = match cli.command {
        Commands::Query { device } => cmd_query(&mut handler, device),
        Commands::Home => handler.initialize().map_err(Into::into),
        Commands::Move { place, edge } => handler
            .initialize()
            .and_then(|()| handler.move_to(&place, edge))
            .map_err(Into::into),
        Commands::Aspirate {
            volume,
            place,
            rate,
        } => handler
            .initialize()
            .and_then(|()| handler.aspirate(volume, &place, rate))
            .map_err(Into::into),
        Commands::Dispense {
            volume,
            place,
            rate,
        } => handler
            .initialize()
            .and_then(|()| handler.dispense(volume, &place, rate))
            .map_err(Into::into),
        Commands::Prime {
            volume,
            chunk,
            rate,
        } => handler
            .initialize()
            .and_then(|()| handler.prime(volume, chunk, rate))
            .map_err(Into::into),
        Commands::Run { chain } => cmd_run(&mut handler, &chain).map(|report| {
            println!("{report}");
        }),
        Commands::Ports | Commands::Bed | Commands::Resources { .. } => Ok(()),
    };

    if let Some(sim) = sim {
        for entry in sim.log().entries() {
            println!("{entry}");
        }
    }
    info!("Session ended in state {:?}", handler.state());
    result
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let explicit = cli.config.is_some();
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let mut config = AppConfig::load(&path, explicit)?;
    if let Some(port) = &cli.port {
        config.serial.port = port.clone();
    }
    config.log_summary();

    execute(cli, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ampoule_core::safety::BedBounds;
    use ampoule_core::DeviceIds;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_place() {
        assert_eq!(parse_place("samples/A1").unwrap(), Placeable::named("samples", "A1"));
        assert_eq!(
            parse_place("10, 20.5, 90").unwrap(),
            Placeable::xyz(10.0, 20.5, 90.0)
        );
        assert!(parse_place("samples/").is_err());
        assert!(parse_place("10,20").is_err());
        assert!(parse_place("ten,20,30").is_err());
    }

    #[test]
    fn test_parse_arguments() {
        let cli = Cli::try_parse_from([
            "ampoule", "-vv", "--dry-run", "aspirate", "50", "samples/B2", "--rate", "0.5",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.dry_run);
        match cli.command {
            Commands::Aspirate {
                volume,
                place,
                rate,
            } => {
                assert_eq!(volume, 50.0);
                assert_eq!(place, Placeable::named("samples", "B2"));
                assert_eq!(rate, Some(0.5));
            }
            _ => panic!("expected aspirate"),
        }
    }

    #[test]
    fn test_dry_run_chain() {
        let dir = tempfile::tempdir().unwrap();
        let chain = dir.path().join("chain.json");
        std::fs::write(
            &chain,
            r#"[{"op": "move_to", "location": {"kind": "coordinate", "xy": {"x": 50, "y": 60}, "z": 100}},
                {"op": "comment", "message": "parked"}]"#,
        )
        .unwrap();

        let sim = SimulatedLink::new(DeviceIds::default());
        let backend = DeviceBackend::new(sim.clone(), DeviceIds::default());
        let bed = HandlerBed::new(BedBounds::default());
        let mut handler = LiquidHandler::new(backend, bed, Default::default()).unwrap();
        let report = cmd_run(&mut handler, &chain).unwrap();
        assert_eq!(report.steps.len(), 2);
        assert!(sim.log().buffered().contains(&"X50:50/60:50".to_owned()));
    }

    #[test]
    fn test_resources_set() {
        let dir = tempfile::tempdir().unwrap();
        HandlerBed::new(BedBounds::default())
            .save(dir.path(), "gx241")
            .unwrap();
        let bed = HandlerBed::load(dir.path()).unwrap();
        cmd_resources(
            &bed,
            &["system_fluid_volume_mL=250".into(), "operator = bench 3".into()],
        )
        .unwrap();
        let reopened = HandlerBed::load(dir.path()).unwrap();
        assert_eq!(reopened.system_fluid_ml(), Some(250.0));
        assert_eq!(
            reopened.resources().get("operator"),
            Some(serde_json::json!("bench 3"))
        );
    }
}
