use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{info, LevelFilter};
use sds_scope::{
    load_config_or_default, plot_spectrum, plot_trace, AppConfig, HookOutcome, ScopeApp,
    Spectrum, WaveformTrace,
};
use std::path::PathBuf;

/// Siglent SDS1104X-E remote control
#[derive(Parser, Debug)]
#[command(name = "scope-cli")]
#[command(about = "Set scales, capture and plot waveforms from a Siglent SDS1104X-E", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Instrument resource, e.g. TCPIP0::192.168.1.91::INSTR or SIM::demo
    #[arg(short, long, value_name = "RESOURCE", global = true)]
    resource: Option<String>,

    /// Channel 1 to 4
    #[arg(long, value_name = "N", global = true)]
    channel: Option<u8>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the instrument identification
    Idn,
    /// Show connection status and current scale settings
    Status,
    /// Set volts/div and/or time/div, e.g. `set --vdiv 500mV --tdiv 1ms`
    Set {
        #[arg(long)]
        vdiv: Option<String>,
        #[arg(long)]
        tdiv: Option<String>,
    },
    /// Acquire the channel and save it
    Acquire {
        /// Output file; defaults to a timestamped name in the data directory
        #[arg(short, long, value_name = "FILE")]
        out: Option<PathBuf>,
        /// Plot the trace in the terminal
        #[arg(long)]
        plot: bool,
        /// Also plot the amplitude spectrum
        #[arg(long)]
        fft: bool,
    },
    /// Plot a saved trace
    Plot {
        file: PathBuf,
        #[arg(long)]
        fft: bool,
    },
    /// Run function button N (1 to 6)
    Hook { n: usize },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = build_config(&args)?;

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.console.verbosity.clone());
    initialize_logging(&log_level);
    info!("Instrument: {} channel {}", config.instrument.resource, config.instrument.channel);

    let mut app = ScopeApp::new(config);
    match args.command {
        Command::Idn => {
            let id = app.identity()?;
            println!("{id}");
        }
        Command::Status => {
            // A failed connect is a status, not an error, here
            let _ = app.connect();
            print_status(&app);
        }
        Command::Set { vdiv, tdiv } => {
            app.update_scale(vdiv.as_deref().unwrap_or(""), tdiv.as_deref().unwrap_or(""))?;
            print_status(&app);
        }
        Command::Acquire { out, plot, fft } => {
            let path = match out {
                Some(out) => {
                    app.acquire()?;
                    app.save_last(&out)?;
                    out
                }
                None => app.acquire_and_save()?,
            };
            println!("Saved {}", path.display());
            if let Some(trace) = app.last_trace() {
                show(trace, plot, fft, app.config().plot.fft_max_frequency_hz)?;
            }
        }
        Command::Plot { file, fft } => {
            let trace = WaveformTrace::load_csv(&file)?;
            show(&trace, true, fft, app.config().plot.fft_max_frequency_hz)?;
        }
        Command::Hook { n } => {
            if !(1..=6).contains(&n) {
                return Err(format!("hook must be 1 to 6, got {n}").into());
            }
            match app.run_hook(n - 1)? {
                HookOutcome::Nothing => println!("F{n}: nothing to do"),
                HookOutcome::Message(text) => println!("F{n}: {text}"),
                HookOutcome::Fitted(report) => println!("F{n}: {report}"),
            }
            print_status(&app);
        }
    }

    Ok(())
}

fn build_config(args: &Args) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let mut config = load_config_or_default(args.config.as_deref());
    if let Some(resource) = &args.resource {
        config.instrument.resource = resource.clone();
    }
    if let Some(channel) = args.channel {
        config.instrument.channel = channel;
    }
    config.validate()?;
    Ok(config)
}

fn print_status(app: &ScopeApp) {
    let shown = app.displayed();
    println!("{}", app.status().label());
    println!("  V/div: {}", shown.volts_per_div_label());
    println!("  T/div: {}", shown.time_per_div_label());
    if let Some(message) = app.message() {
        println!("  {}", message.text);
    }
}

fn show(trace: &WaveformTrace, plot: bool, fft: bool, fft_max_hz: f64) -> Result<(), Box<dyn std::error::Error>> {
    if plot || fft {
        plot_trace(trace, None, None)?;
    }
    if fft {
        let spectrum = Spectrum::from_trace(trace)?.limited(fft_max_hz);
        plot_spectrum(&spectrum, None, None)?;
    }
    Ok(())
}

fn initialize_logging(log_level: &str) {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => {
            eprintln!("Warning: Invalid log level '{}', using 'info'", log_level);
            LevelFilter::Info
        }
    };

    env_logger::Builder::from_env(Env::default())
        .filter_level(level)
        .format_timestamp_millis()
        .init();
}
