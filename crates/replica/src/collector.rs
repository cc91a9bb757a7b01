//! Span collection for a batch

use crate::declare::{declare_keys_for_batch, lookup_command};
use crate::spanset::{SpanAccess, SpanScope, SpanSet};
use kvrange_protocol::{BatchRequest, Error, Method, RangeDescriptor, Request, Result};

/// Computes the span set a batch must latch before it runs.
///
/// The result is sorted, deduplicated and validated. Fails if any request
/// kind has no key declaration.
pub fn collect_spans(desc: &RangeDescriptor, ba: &BatchRequest) -> Result<SpanSet> {
    let mut spans = SpanSet::new();

    if ba.is_read_only() {
        spans.reserve(SpanAccess::ReadOnly, SpanScope::Global, ba.requests.len());
    } else {
        let mut guess = ba.requests.len();
        if let Some(Request::EndTxn(et)) = ba.get_arg(Method::EndTxn) {
            // EndTxn declares a span per lock span instead of a single key.
            guess += et.lock_spans.len().saturating_sub(1);
        }
        spans.reserve(SpanAccess::ReadWrite, SpanScope::Global, guess);
    }

    declare_keys_for_batch(desc, &ba.header, &mut spans);
    for req in &ba.requests {
        let Some(cmd) = lookup_command(req.method()) else {
            return Err(Error::message(format!(
                "unrecognized command {}",
                req.method()
            )));
        };
        (cmd.declare_keys)(desc, &ba.header, req, &mut spans);
    }

    spans.sort_and_dedup();
    spans.validate()?;
    Ok(spans)
}
