//! pvrec - record frames from a monochrome GigE camera.
//!
//! Usage:
//!   pvrec [OPTIONS] <FILENAME>
//!   pvrec --list | --info [-c <id>]
//!
//! Frames go to a FITS cube, or with `--png` to a directory of PNG images.
//! The exit code tells which phase failed: 1 arguments, 2 opening the camera,
//! 3 camera setup, 4 recording.

use std::{
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
};

use clap::{error::ErrorKind, Parser};
use pvrec::{
    sim::SimDriver, Camera, CameraInfo, CameraSelector, CaptureSettings, Error, ErrorCategory,
    FitsSink, FrameEvent, FrameSink, OutcomeReport, PacketSize, PixelFormat, PngSequenceSink,
    Recorder, RecorderOptions, Runtime, SinkOptions,
};

const E_OK: u8 = 0;
const E_ERR_GENERIC: u8 = 1;
const E_ERR_OPEN: u8 = 2;
const E_ERR_SETUP: u8 = 3;
const E_ERR_RECORD: u8 = 4;

/// Discovery budget for `--list` and `--info`.
const LIST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(name = "pvrec", version, about = "Record frames from a GigE camera")]
struct CliArgs {
    /// Output file (FITS), or output directory with --png.
    #[arg(value_name = "FILENAME", required_unless_present_any = ["list", "info"])]
    output: Option<PathBuf>,

    /// Number of frames to record.
    #[arg(short = 'n', long = "count", default_value_t = 1,
          value_parser = clap::value_parser!(u64).range(1..))]
    count: u64,

    /// Maximum frame rate in Hz.
    #[arg(short = 'r', long = "framerate", default_value_t = pvrec::config::DEFAULT_FRAME_RATE)]
    frame_rate: f32,

    /// Exposure time in ms.
    #[arg(short = 'e', long = "exposure", default_value_t = pvrec::config::DEFAULT_EXPOSURE_MS)]
    exposure: f64,

    /// Bits per pixel, 8 or 16.
    #[arg(short = 'b', long = "bits", default_value_t = 8)]
    bits: u32,

    /// Unique id of the camera; 0 picks the first available one.
    #[arg(short = 'c', long = "camera", default_value_t = 0)]
    camera: u64,

    /// Number of frame buffers.
    #[arg(short = 'N', long = "buffers", default_value_t = pvrec::config::DEFAULT_NUM_BUFFERS)]
    buffers: usize,

    /// Packet size in bytes; 0 negotiates the largest possible size.
    #[arg(short = 'm', long = "mtu", default_value_t = 0)]
    mtu: u32,

    /// Stream bandwidth in MB/s.
    #[arg(short = 'B', long = "bandwidth", default_value_t = pvrec::config::DEFAULT_BANDWIDTH_MB)]
    bandwidth: f64,

    /// Overwrite an existing output.
    #[arg(short = 'f', long = "force", action = clap::ArgAction::SetTrue)]
    force: bool,

    /// List available cameras.
    #[arg(short = 'l', long = "list", action = clap::ArgAction::SetTrue)]
    list: bool,

    /// Show camera details.
    #[arg(short = 'i', long = "info", action = clap::ArgAction::SetTrue)]
    info: bool,

    /// Write a directory of PNG images instead of a FITS file.
    #[arg(long = "png", action = clap::ArgAction::SetTrue)]
    png: bool,

    /// Enable debug logging.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::SetTrue)]
    verbose: bool,
}

/// Everything a recording run needs, validated.
#[derive(Debug)]
struct RecordConfig {
    output: PathBuf,
    num_frames: u64,
    selector: CameraSelector,
    settings: CaptureSettings,
    recorder: RecorderOptions,
    overwrite: bool,
    png: bool,
}

impl TryFrom<&CliArgs> for RecordConfig {
    type Error = Error;

    fn try_from(args: &CliArgs) -> Result<Self, Error> {
        let output = args
            .output
            .clone()
            .ok_or_else(|| Error::InvalidConfiguration("missing output filename".into()))?;
        let settings = CaptureSettings::builder()
            .frame_rate(args.frame_rate)
            .exposure_ms(args.exposure)
            .pixel_format(PixelFormat::from_bits(args.bits)?)
            .packet_size(PacketSize::from_bytes(args.mtu))
            .bandwidth_mb(args.bandwidth)
            .build()?;
        let recorder = RecorderOptions::builder().num_buffers(args.buffers).build()?;

        Ok(Self {
            output,
            num_frames: args.count,
            selector: CameraSelector::from_id(args.camera),
            settings,
            recorder,
            overwrite: args.force,
            png: args.png,
        })
    }
}

fn main() -> ExitCode {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => E_OK,
                _ => E_ERR_GENERIC,
            };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    let log_level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    ExitCode::from(run(&args))
}

fn run(args: &CliArgs) -> u8 {
    let runtime = match Runtime::new(SimDriver::demo()) {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: {e}");
            return E_ERR_OPEN;
        }
    };
    println!("Driver version: {}", runtime.version());

    if args.list || args.info {
        return query_cameras(&runtime, args);
    }

    let config = match RecordConfig::try_from(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return match e.category() {
                ErrorCategory::Usage => E_ERR_GENERIC,
                _ => E_ERR_SETUP,
            };
        }
    };

    if !config.overwrite && config.output.exists() {
        eprintln!(
            "Error: '{}' already exists. Use -f to overwrite it.",
            config.output.display()
        );
        return E_ERR_GENERIC;
    }

    print!("Opening camera... ");
    flush();
    let mut camera = match runtime.open_camera(config.selector) {
        Ok(camera) => camera,
        Err(e) => {
            println!();
            eprintln!("Error: {e}");
            return E_ERR_OPEN;
        }
    };
    println!("Done");
    print_camera(&*camera);

    if let Err(e) = config.settings.apply(&mut *camera) {
        eprintln!("Error: {e}");
        return E_ERR_SETUP;
    }
    print_settings(&*camera, &config);

    println!();
    println!(
        "Recording {} frame{} to '{}':",
        config.num_frames,
        if config.num_frames != 1 { "s" } else { "" },
        config.output.display()
    );

    let sink_options =
        SinkOptions::for_camera(&*camera, &config.output, config.num_frames, config.overwrite);
    let sink: pvrec::Result<Box<dyn FrameSink>> = if config.png {
        PngSequenceSink::create(sink_options).map(|s| Box::new(s) as Box<dyn FrameSink>)
    } else {
        FitsSink::create(sink_options).map(|s| Box::new(s) as Box<dyn FrameSink>)
    };
    let mut sink = match sink {
        Ok(sink) => sink,
        Err(e) => {
            eprintln!("Error: {e}");
            return E_ERR_RECORD;
        }
    };

    let mut recorder = Recorder::new(config.recorder.clone());
    recorder.on_frame_event(print_progress);
    let result = recorder.record(&mut *camera, &mut *sink, config.num_frames);
    println!();
    let closed = if result.is_err() && recorder.report().stored() == 0 {
        // nothing recorded, leave no empty output behind
        sink.discard()
    } else {
        sink.close()
    };

    print_report(recorder.report());
    if let Err(e) = result.and(closed) {
        eprintln!("Error: {e}");
        return E_ERR_RECORD;
    }
    E_OK
}

fn query_cameras(runtime: &Runtime<SimDriver>, args: &CliArgs) -> u8 {
    println!("Searching for cameras...");
    let cameras = runtime.available_cameras(LIST_TIMEOUT);
    if cameras.is_empty() {
        eprintln!("Error: {}", Error::NoCameraFound);
        return E_ERR_OPEN;
    }

    if args.list {
        println!("\nAvailable Cameras:");
        let width = cameras.iter().map(|c| c.name.len()).max().unwrap_or(0);
        for camera in &cameras {
            println!(
                "    {:>width$} - {} - UniqueId: {}",
                camera.name, camera.serial_number, camera.unique_id
            );
        }
    }

    if args.info {
        let selector = CameraSelector::from_id(args.camera);
        for (i, camera) in cameras.iter().enumerate() {
            if selector.matches(camera) {
                print_camera_info(i, camera);
            }
        }
    }

    println!();
    E_OK
}

fn print_camera_info(i: usize, info: &CameraInfo) {
    println!("\nCamera {i}:");
    println!("    UniqueId .......... {}", info.unique_id);
    println!("    CameraName ........ {}", info.name);
    println!("    ModelName ......... {}", info.model);
    println!("    SerialNumber ...... {}", info.serial_number);
    println!("    FirmwareVersion ... {}", info.firmware_version);
    println!("    PermittedAccess ... {}", info.permitted_access);
    println!("    InterfaceType ..... {}", info.interface_type);
    println!("    InterfaceId ....... {}", info.interface_id);
}

fn print_camera<C: Camera + ?Sized>(camera: &C) {
    let info = camera.info();
    println!("\nCamera infos:");
    println!("    UniqueId .......... {}", info.unique_id);
    println!("    CameraName ........ {}", info.name);
    println!("    ModelName ......... {}", info.model);
    println!("    SerialNumber ...... {}", info.serial_number);
    println!("    FirmwareVersion ... {}", info.firmware_version);
    println!("    IP Address ........ {}", camera.ip_address().unwrap_or("-"));
    println!("    Sensor ............ {}", camera.sensor());
}

fn print_settings<C: Camera + ?Sized>(camera: &C, config: &RecordConfig) {
    let settings = camera.settings();
    println!("\nSettings:");
    println!("    FrameRate ......... {} Hz (max)", settings.frame_rate);
    println!("    ExposureTime ...... {} ms", settings.exposure_ms());
    println!("    PixelFormat ....... {}", settings.pixel_format);
    println!("    Buffers ........... {}", config.recorder.num_buffers);
    println!("    PacketSize ........ {} bytes", settings.packet_size);
    println!("    Bandwidth ......... {} MB/s", settings.bandwidth_mb());
}

fn print_progress(event: &FrameEvent) {
    match event {
        FrameEvent::Written { .. } => print!("."),
        FrameEvent::Dropped { .. } => print!("D"),
        FrameEvent::MissingData { .. } => print!("M"),
        FrameEvent::CounterAnomaly { .. } => print!("E"),
        FrameEvent::Fault { code } => println!("\n{} [{}]", code.message(), code.name()),
        FrameEvent::WriteFailed { message, .. } => eprintln!("\n{message}"),
    }
    flush();
}

fn print_report(report: &OutcomeReport) {
    if !report.dropped.is_empty() {
        println!(
            "\n -> {} dropped frame(s): {}",
            report.dropped.len(),
            join(&report.dropped)
        );
    }
    if !report.missing_data.is_empty() {
        println!(
            "\n -> {} frame(s) with missing data: {}",
            report.missing_data.len(),
            join(&report.missing_data)
        );
    }
}

fn join(indices: &[u64]) -> String {
    indices
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

fn flush() {
    let _ = io::stdout().flush();
}
