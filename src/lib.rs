pub mod app;
pub mod commands;
pub mod config;
pub mod error;
pub mod hooks;
pub mod link;
pub mod logger;
pub mod plotting;
pub mod scpi;
pub mod session;
pub mod spectrum;
pub mod units;
pub mod utils;
pub mod waveform;

pub use app::{AcquisitionParameters, ConnectionStatus, MessageLevel, ScopeApp, StatusMessage};
pub use commands::{AcquisitionSetup, FitReport, Scope};
pub use config::{AppConfig, load_config, load_config_or_default};
pub use error::ScopeError;
pub use hooks::{HookContext, HookFn, HookOutcome, HookSlot, HookTable};
pub use link::{
    ConnectionConfig, Connector, DefaultConnector, InstrumentLink, LinkBuilder, ResourceAddress,
    SimHandle, SimulatedScope, SocketLink,
};
pub use logger::{CaptureLog, CaptureRecord};
pub use plotting::{PlotData, plot_spectrum, plot_trace};
pub use scpi::{Identity, TriggerMode};
pub use session::{Session, SessionSlot};
pub use spectrum::Spectrum;
pub use units::{TDIV_LEVELS, Unit, VDIV_LEVELS};
pub use waveform::{Sample, WaveformTrace, capture_filename};
