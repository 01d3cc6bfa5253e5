//! `Port`: an arrow's attachment point, either a Mailbox or the Pool
//! (spec §3: "an array of ports each of which is either an attached Mailbox
//! ... or the Pool").
//!
//! Arrow implementations keep typed `Arc<Mailbox<Event>>`/`Arc<Pool>` fields
//! for their actual hot-path access; `ports()` exists only so metrics and
//! introspection can walk an arrow's attachments uniformly (spec §6
//! "per-arrow queue visit count, queue overhead fraction").

use std::sync::Arc;

use crate::event::{Event, Pool};
use crate::mailbox::Mailbox;

#[derive(Clone)]
pub enum Port {
    MailboxInput(Arc<Mailbox<Event>>),
    MailboxOutput(Arc<Mailbox<Event>>),
    PoolInput(Arc<Pool>),
    PoolOutput(Arc<Pool>),
}

impl Port {
    pub fn queue_len(&self) -> usize {
        match self {
            Port::MailboxInput(m) | Port::MailboxOutput(m) => m.size(),
            Port::PoolInput(p) | Port::PoolOutput(p) => p.size(),
        }
    }
}
