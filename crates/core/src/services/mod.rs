//! Engine services.
//!
//! - [`window`]: confirmed header windows over the chain
//! - [`synchronizer`]: the sync loop producing tenant batches
//! - [`ledger`]: batch application and outgoing transfer requests
//! - [`registration`]: tenant, address and token registration
//! - [`workers`]: the ledger workers and their run loops

pub mod ledger;
pub mod registration;
pub mod synchronizer;
pub mod window;
pub mod workers;


pub use ledger::{BatchOutcome, LedgerService, apply_batch};
pub use registration::{NewAddress, NewToken, RegistrationService};
pub use synchronizer::{SyncConfig, SyncLoop, TenantBatch};
pub use window::HeaderWindow;
pub use workers::{
    BroadcastWorker, CollectionWorker, DepositWorker, NotifyWorker, PollWorker, WorkerConfig,
    run_poll_worker,
};
