#![cfg_attr(docsrs, doc = include_str!("../README.md"))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg, doc_cfg_hide))]
#![cfg_attr(docsrs, deny(missing_docs))]
#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
pub(crate) mod util;

pub mod deque;
pub mod mailbox;
mod ring_buffer;

#[doc(inline)]
pub use deque::{Owner, Stealer, TryStealError, WorkStealingDeque};
#[doc(inline)]
pub use mailbox::{Mailbox, TryDequeueError};

pub(crate) mod loom;
