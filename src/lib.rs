#![cfg_attr(docsrs, doc = include_str!("../README.md"))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg, doc_cfg_hide))]

#[macro_use]
pub(crate) mod util;
pub(crate) mod loom;

pub mod cancel;
pub mod error;
mod graph;
pub mod job;
pub mod scheduler;
mod worker;

#[doc(inline)]
pub use self::{
    cancel::CancelToken,
    error::Error,
    job::{Job, JobBuilder, JobHandle, JobId, JobStatus},
    scheduler::{Builder, PanicPolicy, Scheduler, Tick},
};
