//! Acton-reactive actors standing in for the host's owning threads.
//!
//! ```text
//! Ticker ──Tick──▶ Owner:global ──▶ due timers fire
//!        └─Tick──▶ Owner:region-N
//!
//! Router ──SubmitTask{due_tick}──▶ Owner:<label>
//!                                   ├─ due now: run (label marked on thread)
//!                                   └─ later:   park in timer wheel
//! ```
//!
//! Owners never share state; cross-owner hand-off always goes through a
//! `SubmitTask` in the target owner's mailbox.

mod owner_actor;

pub use owner_actor::{OwnerActor, OwnerActorState};
