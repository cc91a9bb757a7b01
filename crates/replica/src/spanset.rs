//! Declared key spans of a batch
//!
//! A [`SpanSet`] groups spans by access (read-only or read-write) and scope
//! (global user keys or range-local keys). Global spans may carry the MVCC
//! timestamp they are accessed at, which lets a read below a write proceed
//! without waiting on it.

use kvrange_hlc::HlcTimestamp;
use kvrange_protocol::{Error, Result, Span};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpanAccess {
    ReadOnly,
    ReadWrite,
}

impl SpanAccess {
    const ALL: [SpanAccess; 2] = [SpanAccess::ReadOnly, SpanAccess::ReadWrite];

    fn index(self) -> usize {
        match self {
            SpanAccess::ReadOnly => 0,
            SpanAccess::ReadWrite => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpanScope {
    Global,
    Local,
}

impl SpanScope {
    const ALL: [SpanScope; 2] = [SpanScope::Global, SpanScope::Local];

    fn index(self) -> usize {
        match self {
            SpanScope::Global => 0,
            SpanScope::Local => 1,
        }
    }

    fn of(span: &Span) -> SpanScope {
        if span.key.is_local() {
            SpanScope::Local
        } else {
            SpanScope::Global
        }
    }
}

/// A span and the timestamp it is accessed at. A zero timestamp means the
/// access is not tied to an MVCC time and conflicts at every time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredSpan {
    pub span: Span,
    pub timestamp: HlcTimestamp,
}

/// Spans a batch declares it will touch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpanSet {
    spans: [[Vec<DeclaredSpan>; 2]; 2],
}

impl SpanSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve room for `n` more spans in one bucket.
    pub fn reserve(&mut self, access: SpanAccess, scope: SpanScope, n: usize) {
        self.spans[access.index()][scope.index()].reserve(n);
    }

    /// Declare a span accessed at no particular timestamp.
    pub fn add(&mut self, access: SpanAccess, span: Span) {
        self.add_mvcc(access, span, HlcTimestamp::ZERO);
    }

    /// Declare a span accessed at `timestamp`. Local spans ignore timestamps.
    pub fn add_mvcc(&mut self, access: SpanAccess, span: Span, timestamp: HlcTimestamp) {
        let scope = SpanScope::of(&span);
        let timestamp = match scope {
            SpanScope::Global => timestamp,
            SpanScope::Local => HlcTimestamp::ZERO,
        };
        self.spans[access.index()][scope.index()].push(DeclaredSpan { span, timestamp });
    }

    pub fn get_spans(&self, access: SpanAccess, scope: SpanScope) -> &[DeclaredSpan] {
        &self.spans[access.index()][scope.index()]
    }

    pub fn len(&self) -> usize {
        self.spans.iter().flatten().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (SpanAccess, SpanScope, &DeclaredSpan)> {
        SpanAccess::ALL.into_iter().flat_map(move |access| {
            SpanScope::ALL.into_iter().flat_map(move |scope| {
                self.get_spans(access, scope)
                    .iter()
                    .map(move |s| (access, scope, s))
            })
        })
    }

    /// Sort every bucket and merge overlapping spans declared at the same
    /// timestamp.
    pub fn sort_and_dedup(&mut self) {
        for bucket in self.spans.iter_mut().flatten() {
            bucket.sort_by(|a, b| {
                a.timestamp
                    .cmp(&b.timestamp)
                    .then_with(|| a.span.key.cmp(&b.span.key))
                    .then_with(|| a.span.exclusive_end().cmp(&b.span.exclusive_end()))
            });

            let mut merged: Vec<DeclaredSpan> = Vec::with_capacity(bucket.len());
            for next in bucket.drain(..) {
                match merged.last_mut() {
                    Some(last)
                        if last.timestamp == next.timestamp
                            && next.span.key <= last.span.exclusive_end() =>
                    {
                        if last.span.contains(&next.span) {
                            continue;
                        }
                        last.span = Span::range(last.span.key.clone(), next.span.exclusive_end());
                    }
                    _ => merged.push(next),
                }
            }
            *bucket = merged;
        }
    }

    /// Every span must be well formed and sit in the bucket its keys belong to.
    pub fn validate(&self) -> Result<()> {
        for (_, scope, declared) in self.iter() {
            if !declared.span.valid() {
                return Err(Error::message(format!("invalid span {:?}", declared.span)));
            }
            if SpanScope::of(&declared.span) != scope {
                return Err(Error::message(format!(
                    "span {:?} declared in the wrong scope",
                    declared.span
                )));
            }
        }
        Ok(())
    }

    /// Whether a batch holding `self` must wait for one holding `other`, or
    /// the other way around.
    ///
    /// Two reads never conflict. A read at `t` and a write above `t` on a
    /// global span do not conflict either, since the read cannot observe it.
    pub fn conflicts_with(&self, other: &SpanSet) -> bool {
        for scope in SpanScope::ALL {
            for a_access in SpanAccess::ALL {
                for b_access in SpanAccess::ALL {
                    if a_access == SpanAccess::ReadOnly && b_access == SpanAccess::ReadOnly {
                        continue;
                    }
                    let ours = self.get_spans(a_access, scope);
                    let theirs = other.get_spans(b_access, scope);
                    for a in ours {
                        for b in theirs {
                            if a.span.overlaps(&b.span)
                                && timestamps_conflict(scope, (a_access, a), (b_access, b))
                            {
                                return true;
                            }
                        }
                    }
                }
            }
        }
        false
    }
}

fn timestamps_conflict(
    scope: SpanScope,
    a: (SpanAccess, &DeclaredSpan),
    b: (SpanAccess, &DeclaredSpan),
) -> bool {
    if scope == SpanScope::Local {
        return true;
    }
    let (read, write) = match (a.0, b.0) {
        (SpanAccess::ReadOnly, SpanAccess::ReadWrite) => (a.1, b.1),
        (SpanAccess::ReadWrite, SpanAccess::ReadOnly) => (b.1, a.1),
        _ => return true,
    };
    if read.timestamp.is_empty() || write.timestamp.is_empty() {
        return true;
    }
    write.timestamp <= read.timestamp
}

impl fmt::Display for SpanSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (access, scope, declared) in self.iter() {
            writeln!(
                f,
                "{:?} {:?}: {:?} at {}",
                access, scope, declared.span, declared.timestamp
            )?;
        }
        Ok(())
    }
}
