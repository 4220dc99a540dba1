pub mod archive;
pub mod campaign;
pub mod config;
pub mod device;
pub mod outcome;
pub mod pacing;
pub mod params;
pub mod results;
pub mod session;
pub mod setting;
pub mod sim;
pub mod status;

pub use archive::{ArchiveError, TraceArchive, TraceRecord};
pub use campaign::{
    BadSettingRule, Campaign, CampaignError, CaptureReport, RunOutcome, RunStats, StopHandle,
};
pub use config::{CampaignFile, CampaignOptions, OptionsError, ParamsSection};
pub use device::{DeviceError, DeviceSession, GlitchOutputs, IoLine, LineState, ResetPulse, WaitStatus};
pub use outcome::{Classifier, ExpectedResponseClassifier, Outcome};
pub use pacing::{Break, BreakKind, PacingPolicy};
pub use params::{ParamError, ParamName, ParameterRange, ParameterSpace, RangeSpec, Step};
pub use results::{ResultsError, ResultsStore, ResultsTable};
pub use session::{LoadedSession, SessionConfig, SessionError, SessionPaths, load_session};
pub use setting::Setting;
pub use sim::{SimulatedDevice, SimulationSettings};
pub use status::CampaignStatus;
