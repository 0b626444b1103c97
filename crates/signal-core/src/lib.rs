pub mod agent;
pub mod envelope;
pub mod error;
pub mod http;
pub mod labels;
pub mod llm;
pub mod profile;

pub use agent::{execute, Agent};
pub use envelope::{AgentStatus, Envelope, EnvelopeMeta};
pub use error::SignalError;
pub use http::HttpJson;
pub use labels::{classify, Direction, LabelBand};
pub use llm::LlmClient;
pub use profile::Profile;
