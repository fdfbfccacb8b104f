//! CI cloud platform abstraction
//!
//! This crate provides the provider-neutral layer used by CI jobs to manage
//! the cloud instances of a workflow run: finding them by workflow tag,
//! locating the manager, and stopping, starting or terminating them.
//!
//! # Supported Platforms
//!
//! - **AWS**: EC2 instances (`ciflow-cloud-aws`)
//! - **Azure**: Virtual machines via Resource Graph and ARM (`ciflow-cloud-azure`)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                   ciflow CLI                     │
//! │       (change-state / monitor / manager-ip)      │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                 ciflow-cloud                     │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │        Platform Abstraction              │   │
//! │  │  trait CloudPlatform { ... }             │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────────────┐     │
//! │  │ Tag filters  │  │ Transition ordering  │     │
//! │  └──────────────┘  └──────────────────────┘     │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │      aws      │ │     azure     │
//! │   platform    │ │   platform    │
//! └───────────────┘ └───────────────┘
//! ```

pub mod error;
pub mod instance;
pub mod platform;
pub mod runner;
pub mod transition;
pub mod wait;

// Re-exports
pub use error::{CloudError, Result};
pub use instance::{
    COMMIT_TAG_KEY, Instance, InstanceState, MANAGER_TAG_KEY, TagFilter, WORKFLOW_TAG_KEY,
};
pub use platform::{CloudPlatform, DEFAULT_MANAGER_USER, PlatformKind};
pub use runner::{NoopDeregistration, RunnerDeregistration, deregister_best_effort};
pub use transition::{StateTransition, find_manager, manager_last};
pub use wait::{WaitConfig, wait_until};
