#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod cache;
pub mod catalog;
mod core;
mod engine;
mod error;
pub mod globs;
mod io;
pub mod manifest;
pub mod pipeline;
pub mod policy;
pub mod profile;
pub mod tasks;

pub use crate::core::Environment;
pub use crate::engine::{
    Blueprint, DaemonFn, Diagnostics, Plan, Runner, TaskBuilder, TaskContext, TaskDef,
    TaskExecution, TaskFn, TaskGraph, Work,
};
#[cfg(feature = "live")]
pub use crate::engine::{ReloadBridge, WatchRule, watch};
pub use crate::error::*;
pub use crate::globs::{Category, GlobSet, Selector};
pub use crate::manifest::Manifest;
pub use crate::policy::{Notification, Policy};
pub use crate::profile::{Flags, Layout, Profile};
