//! Adaptive rendering quality controller.
//!
//! Samples frame rate, classifies the runtime into a quality level, and
//! broadcasts the matching rendering budget to subscribers. It only decides
//! how much visual fidelity to request; drawing is left to the consumers.
//!
//! ```no_run
//! use adaptive_quality::capability::SystemProbe;
//! use adaptive_quality::controller::QualityController;
//!
//! let controller = QualityController::new(&SystemProbe::new());
//! let _sub = controller.subscribe(|level, config| {
//!     println!("{level}: render scale {}", config.render_scale);
//! });
//! controller.start();
//! controller.record_frame();
//! let state = controller.tick();
//! println!("{:?}", state.level);
//! ```

pub mod capability;
pub mod classifier;
pub mod config;
pub mod controller;
pub mod environment;
pub mod error;
pub mod frame_sampler;
pub mod ipc_server;
pub mod logging;
pub mod metrics;
pub mod quality_table;
pub mod subscribers;

pub use capability::{CapabilityProbe, CapabilitySnapshot, DeviceClass, StaticProbe, SystemProbe};
pub use config::QualitySettings;
pub use controller::{QualityController, QualityState};
pub use error::QualityError;
pub use quality_table::{config_for, QualityConfig, QualityLevel};
pub use subscribers::Subscription;
