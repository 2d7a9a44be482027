use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use console::style;
use log::debug;
use simplelog::{ColorChoice, CombinedLogger, Config as LogConfig, LevelFilter, TermLogger, TerminalMode};
use usbmounts_core::UsbDevice;
use usbmounts_core::command::SystemRunner;
use usbmounts_core::config::{Config, LinuxMount};
use usbmounts_core::platform::{Correlator, Platform};

#[derive(Parser)]
#[command(name = "usbmounts")]
#[command(about = "Lists attached USB storage devices and where they are mounted", version)]
struct Cli {
    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List mounted USB storage devices
    List {
        /// Print the devices as a JSON array
        #[arg(long)]
        json: bool,

        /// How to find a device's mount point on Linux
        #[arg(long, value_enum, default_value_t = MountSource::Target)]
        linux_mount: MountSource,

        /// Use another platform's correlator instead of the host's
        #[arg(long, value_enum)]
        platform: Option<PlatformArg>,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum MountSource {
    /// The filesystem label from udev
    Label,
    /// The mount target reported by findmnt
    Target,
}

impl From<MountSource> for LinuxMount {
    fn from(source: MountSource) -> Self {
        match source {
            MountSource::Label => LinuxMount::Label,
            MountSource::Target => LinuxMount::Target,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PlatformArg {
    Linux,
    Macos,
    Windows,
}

impl From<PlatformArg> for Platform {
    fn from(platform: PlatformArg) -> Self {
        match platform {
            PlatformArg::Linux => Platform::Linux,
            PlatformArg::Macos => Platform::MacOs,
            PlatformArg::Windows => Platform::Windows,
        }
    }
}

fn init_logging(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    CombinedLogger::init(vec![TermLogger::new(
        level,
        LogConfig::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )])?;
    Ok(())
}

/// Lists devices with the process-wide host binding unless a flag overrides it.
fn list(linux_mount: MountSource, platform: Option<PlatformArg>) -> Result<Vec<UsbDevice>> {
    if linux_mount == MountSource::Target && platform.is_none() {
        return usbmounts_core::list_devices();
    }

    let platform = platform.map(Platform::from).unwrap_or_else(Platform::current);
    debug!("Using the {} correlator", platform);
    let config = Config::default().with_linux_mount(linux_mount.into());
    platform.correlator(config, SystemRunner).list_devices()
}

fn print_table(devices: &[UsbDevice]) {
    if devices.is_empty() {
        println!("No USB storage devices found.");
        return;
    }

    println!("Found {} USB storage devices:", devices.len());
    println!("\n  {:<24} {}", "SERIAL", "MOUNT POINT");
    println!("  {:-<24} {:-<20}", "", "");
    for device in devices {
        println!(
            "  {:<24} {}",
            style(&device.serial_number).cyan(),
            device.mount_point
        );
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    match cli.command {
        Commands::List {
            json,
            linux_mount,
            platform,
        } => {
            let devices = list(linux_mount, platform)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else {
                print_table(&devices);
            }
        }
    }

    Ok(())
}
