//! Verb dispatch: one parsed request in, zero or more replies out.
//!
//! The processor owns the storage engine and is generic over it; it maps
//! engine statuses onto protocol replies and leaves connection decisions
//! (close on quit, keep otherwise) to the worker. Replies are composed
//! straight into the connection's write buffer; on a full buffer the
//! worker rolls the buffer back to its mark, grows it, and calls again, so
//! a reply is never half-written.

use std::sync::Arc;

use log::trace;

use rcache_core::buf::Buf;
use rcache_core::metrics;
use rcache_core::store::{DataStore, StoreStatus};
use rcache_core::time;
use rcache_protocol::klog::Klog;
use rcache_protocol::request::{Request, Verb};
use rcache_protocol::response::{compose, NoSpace, Response, RspMsg};

use crate::stats::StatsRegistry;

pub const ERR_OVERSIZED: &str = "object too large for cache";
pub const ERR_NO_MEM: &str = "out of memory storing object";
pub const ERR_NOT_NUMERIC: &str = "cannot increment or decrement non-numeric value";

metrics! {
    pub struct ProcessMetrics {
        process_req: Counter => "requests processed",
        process_ex: Counter => "requests answered with an error reply",
        process_get_key_hit: Counter => "get/gets keys found",
        process_get_key_miss: Counter => "get/gets keys missed",
    }
}

/// What the worker should do with the connection afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostAction {
    Keep,
    Close,
}

pub struct Processor<S: DataStore> {
    pub store: S,
    klog: Option<Arc<Klog>>,
    stats: Arc<StatsRegistry>,
    metrics: Arc<ProcessMetrics>,
}

impl<S: DataStore> Processor<S> {
    pub fn new(store: S, klog: Option<Arc<Klog>>, stats: Arc<StatsRegistry>) -> Self {
        Processor {
            store,
            klog,
            stats,
            metrics: Arc::new(ProcessMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<ProcessMetrics> {
        self.metrics.clone()
    }

    /// Dispatch one request. `rdata` is the read-buffer contents the
    /// request's spans index into; replies go to `wbuf`.
    pub fn process(
        &mut self,
        req: &Request,
        rdata: &[u8],
        wbuf: &mut Buf,
        peer: &str,
    ) -> Result<PostAction, NoSpace> {
        trace!("processing {} request", req.verb.as_str());
        self.metrics.process_req.incr();

        // quit closes without a reply and without a log line
        if req.verb == Verb::Quit {
            return Ok(PostAction::Close);
        }

        let mut nbyte = 0;
        let mut code = 0;
        let mut emit = |wbuf: &mut Buf, rsp: &Response<'_>, noreply: bool| -> Result<(), NoSpace> {
            nbyte += compose(wbuf, rsp, noreply)?;
            code = rsp.code();
            Ok(())
        };

        match req.verb {
            Verb::Get | Verb::Gets => {
                let with_cas = req.verb == Verb::Gets;
                let mut hit_code = 0;
                for span in &req.keys {
                    let key = span.slice(rdata);
                    if let Some(v) = self.store.get(key) {
                        self.metrics.process_get_key_hit.incr();
                        let rsp = Response::Value {
                            key,
                            flag: 0,
                            val: v.val,
                            cas: with_cas.then_some(v.cas),
                        };
                        hit_code = rsp.code();
                        emit(wbuf, &rsp, false)?;
                    } else {
                        self.metrics.process_get_key_miss.incr();
                    }
                }
                emit(wbuf, &Response::Msg(RspMsg::End), false)?;
                if hit_code != 0 {
                    code = hit_code;
                }
            }

            Verb::Delete => {
                let key = req.keys[0].slice(rdata);
                let msg = if self.store.delete(key) {
                    RspMsg::Deleted
                } else {
                    RspMsg::NotFound
                };
                emit(wbuf, &Response::Msg(msg), req.noreply)?;
            }

            Verb::Set => {
                let status = self.store.set(
                    req.keys[0].slice(rdata),
                    req.vstr.slice(rdata),
                    time::reltime(req.expiry),
                );
                let msg = store_reply(status);
                self.note_error(&msg);
                emit(wbuf, &Response::Msg(msg), req.noreply)?;
            }

            Verb::Add | Verb::Replace => {
                let key = req.keys[0].slice(rdata);
                let exists = self.store.contains(key);
                let msg = if exists == (req.verb == Verb::Add) {
                    RspMsg::NotStored
                } else {
                    let status = self.store.set(
                        key,
                        req.vstr.slice(rdata),
                        time::reltime(req.expiry),
                    );
                    store_reply(status)
                };
                self.note_error(&msg);
                emit(wbuf, &Response::Msg(msg), req.noreply)?;
            }

            Verb::Cas => {
                let status = self.store.cas(
                    req.keys[0].slice(rdata),
                    req.vstr.slice(rdata),
                    time::reltime(req.expiry),
                    req.cas,
                );
                let msg = match status {
                    Ok(()) => RspMsg::Stored,
                    Err(StoreStatus::NotFound) => RspMsg::NotFound,
                    Err(StoreStatus::Exists) => RspMsg::Exists,
                    Err(status) => store_reply(Err(status)),
                };
                self.note_error(&msg);
                emit(wbuf, &Response::Msg(msg), req.noreply)?;
            }

            Verb::Append | Verb::Prepend => {
                let status = self.store.annex(
                    req.keys[0].slice(rdata),
                    req.vstr.slice(rdata),
                    req.verb == Verb::Append,
                );
                let msg = match status {
                    Ok(()) => RspMsg::Stored,
                    Err(StoreStatus::NotFound) => RspMsg::NotFound,
                    Err(status) => store_reply(Err(status)),
                };
                self.note_error(&msg);
                emit(wbuf, &Response::Msg(msg), req.noreply)?;
            }

            Verb::Incr | Verb::Decr => {
                let status =
                    self.store
                        .delta(req.keys[0].slice(rdata), req.delta, req.verb == Verb::Incr);
                match status {
                    Ok(v) => emit(wbuf, &Response::Numeric(v), req.noreply)?,
                    Err(StoreStatus::NotFound) => {
                        emit(wbuf, &Response::Msg(RspMsg::NotFound), req.noreply)?;
                    }
                    Err(_) => {
                        self.metrics.process_ex.incr();
                        emit(
                            wbuf,
                            &Response::Msg(RspMsg::ClientError(ERR_NOT_NUMERIC)),
                            req.noreply,
                        )?;
                    }
                }
            }

            Verb::Stats => {
                for (name, value) in self.stats.snapshot() {
                    emit(wbuf, &Response::Stat { name, value }, false)?;
                }
                emit(wbuf, &Response::Msg(RspMsg::End), false)?;
            }

            Verb::Quit | Verb::Unknown => unreachable!("rejected by the parser"),
        }

        if let Some(klog) = &self.klog {
            klog.log(peer, req, rdata, code, nbyte);
        }
        Ok(PostAction::Keep)
    }

    fn note_error(&self, msg: &RspMsg) {
        if matches!(msg, RspMsg::ClientError(_) | RspMsg::ServerError(_)) {
            self.metrics.process_ex.incr();
        }
    }
}

fn store_reply(status: Result<(), StoreStatus>) -> RspMsg {
    match status {
        Ok(()) => RspMsg::Stored,
        Err(StoreStatus::Oversized) => RspMsg::ClientError(ERR_OVERSIZED),
        Err(StoreStatus::NoMem) => RspMsg::ServerError(ERR_NO_MEM),
        Err(StoreStatus::Exists) => RspMsg::Exists,
        Err(StoreStatus::NotFound) => RspMsg::NotFound,
        Err(StoreStatus::NotNumeric) => RspMsg::ClientError(ERR_NOT_NUMERIC),
    }
}
