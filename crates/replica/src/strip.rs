//! In-flight write stripping for parallel commits
//!
//! A parallel commit lists the writes it is still waiting on. Writes carried
//! in the same batch as the commit are evaluated before it, so by the time
//! the commit runs they are no longer in flight and become plain lock spans.

use kvrange_protocol::{
    BatchRequest, EndTxnRequest, Error, Method, Request, Result, SequencedWrite, Span,
};
use std::borrow::Cow;

/// Moves in-flight writes that the batch itself performs into the commit's
/// lock spans.
///
/// The caller's batch is never modified. A new batch is returned only when
/// something changed.
pub fn maybe_strip_in_flight_writes(ba: &BatchRequest) -> Result<Cow<'_, BatchRequest>> {
    let Some(et_index) = ba
        .requests
        .iter()
        .position(|r| r.method() == Method::EndTxn)
    else {
        return Ok(Cow::Borrowed(ba));
    };
    let Request::EndTxn(et) = &ba.requests[et_index] else {
        return Ok(Cow::Borrowed(ba));
    };
    let others = &ba.requests[..et_index];
    if !et.is_parallel_commit() || others.is_empty() {
        return Ok(Cow::Borrowed(ba));
    }

    let mut et = et.clone();
    let point_writes = others
        .iter()
        .filter(|r| is_point_intent_write(r.method()) || r.method() == Method::QueryIntent)
        .count();
    if et.in_flight_writes.len() < point_writes {
        return Err(Error::message(
            "more writes in batch with EndTxn than listed in in-flight writes",
        ));
    }

    if et.in_flight_writes.len() == point_writes && !others.iter().any(|r| is_ranged_write(r.method())) {
        // Every in-flight write is in this batch.
        let writes = std::mem::take(&mut et.in_flight_writes);
        move_to_lock_spans(&mut et, writes);
    } else {
        for req in others {
            let method = req.method();
            if is_ranged_write(method) {
                let writes = std::mem::take(&mut et.in_flight_writes);
                move_to_lock_spans(&mut et, writes);
                break;
            }
            if !is_point_intent_write(method) && method != Method::QueryIntent {
                continue;
            }
            let key = req.span().key;
            if let Some(i) = et.in_flight_writes.iter().position(|w| w.key == key) {
                let write = et.in_flight_writes.remove(i);
                move_to_lock_spans(&mut et, vec![write]);
            }
        }
    }
    merge_lock_spans(&mut et.lock_spans);

    let mut stripped = ba.clone();
    stripped.requests[et_index] = Request::EndTxn(et);
    Ok(Cow::Owned(stripped))
}

fn is_point_intent_write(method: Method) -> bool {
    method.is_intent_write() && !method.is_range()
}

fn is_ranged_write(method: Method) -> bool {
    method.is_intent_write() && method.is_range()
}

fn move_to_lock_spans(et: &mut EndTxnRequest, writes: Vec<SequencedWrite>) {
    et.lock_spans
        .extend(writes.into_iter().map(|w| Span::point(w.key)));
}

fn merge_lock_spans(spans: &mut Vec<Span>) {
    spans.sort_by(|a, b| a.key.cmp(&b.key).then_with(|| a.exclusive_end().cmp(&b.exclusive_end())));
    let mut merged: Vec<Span> = Vec::with_capacity(spans.len());
    for next in spans.drain(..) {
        match merged.last_mut() {
            Some(last) if last.contains(&next) => {}
            Some(last) if !last.is_point() && next.key <= last.end_key => {
                last.end_key = next.exclusive_end();
            }
            _ => merged.push(next),
        }
    }
    *spans = merged;
}
