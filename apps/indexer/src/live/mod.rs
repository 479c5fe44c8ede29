//! Live delivery (§4.6, §4.7): once catchup completes for a (chain, family),
//! the Coordinator hands off to one of these two transports depending on
//! `ChainDescriptor::transport`.

pub mod poller;
pub mod subscription;
