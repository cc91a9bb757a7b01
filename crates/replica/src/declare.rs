//! Key declarations per request kind
//!
//! Each request kind knows which keys it reads and writes. Administrative
//! requests have no declaration: they never take latches.

use crate::spanset::{SpanAccess, SpanSet};
use kvrange_protocol::{Header, Key, Method, RangeDescriptor, Request, Span};

/// Adds the spans one request touches to a span set.
pub type DeclareKeysFn = fn(&RangeDescriptor, &Header, &Request, &mut SpanSet);

/// Registry entry for a request kind that runs under latches.
#[derive(Clone, Copy)]
pub struct Command {
    pub declare_keys: DeclareKeysFn,
}

/// Looks up the command for a request kind. Returns `None` for kinds that
/// do not run under latches.
pub fn lookup_command(method: Method) -> Option<Command> {
    let declare_keys: DeclareKeysFn = match method {
        Method::Get | Method::Scan | Method::QueryIntent => declare_read,
        Method::Put
        | Method::ConditionalPut
        | Method::InitPut
        | Method::Increment
        | Method::Delete
        | Method::DeleteRange => declare_write,
        Method::EndTxn => declare_end_txn,
        Method::HeartbeatTxn => declare_heartbeat_txn,
        Method::PushTxn => declare_push_txn,
        Method::QueryTxn => declare_query_txn,
        Method::ResolveIntent => declare_resolve_intent,
        Method::AdminSplit
        | Method::AdminUnsplit
        | Method::AdminMerge
        | Method::AdminTransferLease
        | Method::AdminChangeReplicas
        | Method::AdminRelocateRange
        | Method::CheckConsistency
        | Method::Import
        | Method::AdminScatter => return None,
    };
    Some(Command { declare_keys })
}

/// Keys every transactional batch reads regardless of its requests.
pub fn declare_keys_for_batch(desc: &RangeDescriptor, header: &Header, spans: &mut SpanSet) {
    if let Some(txn) = &header.txn {
        spans.add(
            SpanAccess::ReadOnly,
            Span::point(Key::abort_span(desc.range_id, &txn.id())),
        );
    }
}

fn declare_read(_: &RangeDescriptor, header: &Header, req: &Request, spans: &mut SpanSet) {
    spans.add_mvcc(SpanAccess::ReadOnly, req.span(), header.timestamp);
}

fn declare_write(_: &RangeDescriptor, header: &Header, req: &Request, spans: &mut SpanSet) {
    spans.add_mvcc(SpanAccess::ReadWrite, req.span(), header.timestamp);
}

fn declare_end_txn(desc: &RangeDescriptor, header: &Header, req: &Request, spans: &mut SpanSet) {
    let Request::EndTxn(et) = req else {
        return;
    };
    if let Some(txn) = &header.txn {
        spans.add(
            SpanAccess::ReadWrite,
            Span::point(Key::transaction(&et.key, &txn.id())),
        );
        spans.add(
            SpanAccess::ReadWrite,
            Span::point(Key::abort_span(desc.range_id, &txn.id())),
        );
    }
    if et.commit {
        // Local intents are resolved synchronously during the commit.
        for span in &et.lock_spans {
            if desc.contains_span(span) {
                spans.add(SpanAccess::ReadWrite, span.clone());
            }
        }
        for write in &et.in_flight_writes {
            spans.add(SpanAccess::ReadWrite, Span::point(write.key.clone()));
        }
    }
}

fn declare_heartbeat_txn(_: &RangeDescriptor, header: &Header, req: &Request, spans: &mut SpanSet) {
    let Request::HeartbeatTxn(hb) = req else {
        return;
    };
    if let Some(txn) = &header.txn {
        spans.add(
            SpanAccess::ReadWrite,
            Span::point(Key::transaction(&hb.key, &txn.id())),
        );
    }
}

fn declare_push_txn(desc: &RangeDescriptor, _: &Header, req: &Request, spans: &mut SpanSet) {
    let Request::PushTxn(push) = req else {
        return;
    };
    let pushee = &push.pushee_txn;
    spans.add(
        SpanAccess::ReadWrite,
        Span::point(Key::transaction(&pushee.key, &pushee.id)),
    );
    spans.add(
        SpanAccess::ReadWrite,
        Span::point(Key::abort_span(desc.range_id, &pushee.id)),
    );
}

fn declare_query_txn(_: &RangeDescriptor, _: &Header, req: &Request, spans: &mut SpanSet) {
    let Request::QueryTxn(query) = req else {
        return;
    };
    spans.add(
        SpanAccess::ReadOnly,
        Span::point(Key::transaction(&query.txn.key, &query.txn.id)),
    );
}

fn declare_resolve_intent(desc: &RangeDescriptor, _: &Header, req: &Request, spans: &mut SpanSet) {
    let Request::ResolveIntent(resolve) = req else {
        return;
    };
    spans.add(SpanAccess::ReadWrite, resolve.span.clone());
    spans.add(
        SpanAccess::ReadWrite,
        Span::point(Key::abort_span(desc.range_id, &resolve.intent_txn.id)),
    );
}
