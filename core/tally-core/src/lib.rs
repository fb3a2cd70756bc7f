//! # tally-core
//!
//! Core library for Tally, a personal time tracker. It holds the pieces with
//! real state: the session timer, the tray projection and the contract the
//! durable session store must honor. Storage, IPC and rendering live in the
//! daemon and its clients.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. Store calls are plain method calls;
//!   the timer machine models the await points explicitly as pending calls.
//! - **Single owner**: One [`TimerController`] owns the timer state. Readers subscribe
//!   to broadcasts instead of reaching into shared globals.
//! - **Graceful degradation**: Notification and tray push failures are logged, never fatal.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tally_core::{MemoryStore, TimerController, TallyConfig};
//!
//! let store = Arc::new(MemoryStore::new());
//! let mut controller = TimerController::builder(store, &TallyConfig::default()).build();
//! controller.configure("P1", 25)?;
//! controller.start()?;
//! ```

pub mod bridge;
pub mod broadcast;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod notify;
pub mod recovery;
pub mod stats;
pub mod storage;
pub mod store;
pub mod ticker;
pub mod timer;
pub mod tray;
pub mod types;

pub use bridge::{EventOutcome, SystemEvent, SystemEventBridge};
pub use broadcast::Broadcaster;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_config, TallyConfig};
pub use controller::{TimerController, TimerControllerBuilder};
pub use error::{Result, StoreError, TallyError};
pub use notify::{LogNotifier, Notification, Notifier};
pub use recovery::{detect_orphans, RecoveryReport};
pub use storage::StorageConfig;
pub use store::{MemoryStore, ObservedStore, SessionStore, StoreChange, AUTO_PAUSE_NOTE};
pub use ticker::{IntervalTicker, NoopTicker, TickControl};
pub use timer::{Effect, PendingCall, TimerMachine, TimerPhase, TimerState};
pub use tray::{
    build_tray_menu, compute_tray_list, PinnedList, TrayItem, TrayMenu, TrayReconciler, TraySink,
    TraySnapshot, TRAY_PINNED_KEY,
};
pub use types::{Project, ProjectStats, ProjectStatus, TimeSession};
