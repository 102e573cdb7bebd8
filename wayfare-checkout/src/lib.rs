pub mod controller;
pub mod countdown;
pub mod dispatcher;
pub mod error;
pub mod manual_check;
pub mod mock;
pub mod poller;
pub mod state_machine;

pub use controller::{ConfirmationSettings, PaymentConfirmation};
pub use countdown::{CountdownTimer, TimerHandle};
pub use dispatcher::CompletionDispatcher;
pub use error::CheckError;
pub use manual_check::{CheckOutcome, ManualCheck};
pub use mock::MockStatusProvider;
pub use poller::{PollerHandle, StatusPoller};
pub use state_machine::{CompletionSource, SessionEvent, SessionState, SessionStateMachine, Transition};
