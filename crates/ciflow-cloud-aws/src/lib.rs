//! AWS platform for ciflow
//!
//! This crate implements the CloudPlatform trait for AWS, locating the EC2
//! instances of a CI workflow by tag and issuing batched stop, start and
//! terminate requests.
//!
//! # Requirements
//!
//! - Credentials resolvable by the standard AWS chain (env, profile, IMDS)
//! - `ec2:DescribeInstances`, `ec2:StartInstances`, `ec2:StopInstances`,
//!   `ec2:TerminateInstances` permissions
//!
//! # Example
//!
//! ```ignore
//! use ciflow_cloud::CloudPlatform;
//! use ciflow_cloud_aws::{AwsConfig, AwsPlatform};
//!
//! let platform = AwsPlatform::new(AwsConfig::from_env()?);
//!
//! if platform.manager_exists("run-1234").await? {
//!     println!("{}", platform.manager_ip("run-1234").await?);
//! }
//! ```

pub mod config;
pub mod ec2;
pub mod error;
pub mod platform;

pub use config::AwsConfig;
pub use ec2::{Ec2Api, Ec2Filter, SdkEc2Client};
pub use error::{AwsError, Result};
pub use platform::{AwsPlatform, instance_metadata};
