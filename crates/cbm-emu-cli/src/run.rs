use std::path::PathBuf;

use cbm_emu_core::clock::Clock;
use cbm_emu_core::emulator::Emulator;
use cbm_emu_core::machine::{CpuRegisters, HeadlessMachine, Machine};
use cbm_emu_core::resources::{ResourceValue, Resources};
use cbm_emu_core::ui::UiHooks;
use cbm_emu_net::control::NetworkControl;
use cbm_emu_net::netplay::Netplay;
use log::{info, warn};

use crate::CliError;
use crate::config;

#[derive(clap::Args, Debug, Default)]
pub struct RunArgs {
    /// Play back the recording in the event snapshot directory
    #[arg(long, conflicts_with = "record")]
    pub playback: bool,

    /// Record a session into the event snapshot directory
    #[arg(long)]
    pub record: bool,

    /// Number of frames to run
    #[arg(long, default_value_t = 250)]
    pub frames: u64,

    /// Resource file to read instead of the default one
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write the resources in effect back to the resource file
    #[arg(long)]
    pub save_config: bool,

    /// Directory for event snapshots (EventSnapshotDir)
    #[arg(long, value_name = "DIR")]
    pub snapshot_dir: Option<String>,

    /// Wait for a netplay client
    #[arg(long, conflicts_with = "netplay_connect")]
    pub netplay_server: bool,

    /// Connect to a netplay server
    #[arg(long, value_name = "HOST")]
    pub netplay_connect: Option<String>,

    /// Netplay port (NetworkServerPort)
    #[arg(long)]
    pub port: Option<u16>,

    /// Who controls what, as keyboard,joy1,joy2,devices,resources with
    /// 0 none, 1 server, 2 client, 3 both
    #[arg(long, value_name = "k,j1,j2,d,r")]
    pub netplay_control: Option<NetworkControl>,
}

/// Where a run ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub clock: Clock,
    pub registers: CpuRegisters,
}

/// Resource file plus command line overrides.
pub fn resources_for(args: &RunArgs) -> Result<Resources, CliError> {
    let path = args.config.clone().unwrap_or_else(config::default_config_path);
    let mut resources = config::load_from_file(&path);

    if let Some(dir) = &args.snapshot_dir {
        resources.set("EventSnapshotDir", ResourceValue::from(dir.as_str()))?;
    }
    if let Some(port) = args.port {
        resources.set("NetworkServerPort", ResourceValue::Int(i32::from(port)))?;
    }
    if let Some(host) = &args.netplay_connect {
        resources.set("NetworkServerName", ResourceValue::from(host.as_str()))?;
    }
    if let Some(control) = args.netplay_control {
        resources.set("NetworkControl", ResourceValue::Int(control.bits() as i32))?;
    }

    if args.save_config {
        config::save_to_file(&path, &resources)?;
        info!("Saved resources to {}", path.display());
    }
    Ok(resources)
}

pub fn run(args: &RunArgs) -> Result<RunSummary, CliError> {
    let resources = resources_for(args)?;
    let mut emu = Emulator::new(HeadlessMachine::new(), resources);
    run_with(&mut emu, args)
}

/// Drive `emu` for `args.frames` frames with the requested session and
/// netplay role.
pub fn run_with<M: Machine, U: UiHooks>(
    emu: &mut Emulator<M, U>,
    args: &RunArgs,
) -> Result<RunSummary, CliError> {
    if args.record {
        emu.record_start()?;
    } else if args.playback {
        emu.playback_start()?;
    }

    let mut netplay = None;
    if args.netplay_server || args.netplay_connect.is_some() {
        let mut net = Netplay::from_resources(emu.resources());
        if args.netplay_server {
            net.start_server(emu)?;
        } else {
            net.connect(emu)?;
        }
        netplay = Some(net);
    }

    let mut frames = 0;
    while frames < args.frames {
        emu.run_frame();
        frames += 1;

        // A lost peer leaves a server listening and a client idle; either
        // way emulation goes on.
        if let Some(net) = netplay.as_mut()
            && let Err(e) = net.hook(emu)
        {
            warn!("Net: session ended: {e}");
        }

        if args.playback && !emu.events().is_playing() {
            info!("Playback finished after {frames} frames");
            break;
        }
    }

    if let Some(net) = netplay.as_mut() {
        net.shutdown(emu);
    }
    if emu.events().is_recording() {
        emu.record_stop()?;
    } else if emu.events().is_playing() {
        emu.playback_stop()?;
    }

    Ok(RunSummary {
        frames,
        clock: emu.clock(),
        registers: emu.registers(),
    })
}
