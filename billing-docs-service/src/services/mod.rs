pub mod calculator;
pub mod database;
pub mod documents;
pub mod metrics;
pub mod notifier;
pub mod sequence;
pub mod signatures;
pub mod storage;
pub mod sweeper;

pub use database::Database;
pub use documents::DocumentService;
pub use metrics::{get_metrics, init_metrics};
pub use notifier::{LogMailer, Mailer, Notifier, SmtpMailer};
pub use sequence::SequenceAllocator;
pub use signatures::SignatureService;
pub use storage::{ArtifactStore, LocalStorage};
pub use sweeper::ExpirySweeper;
